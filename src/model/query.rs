use crate::engine::predicate::PropertyPredicate;
use serde::{Deserialize, Serialize};

/// Which revisions of an identifier a type query returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RevisionFilter {
    /// Highest revision per identifier among non-deleted rows.
    #[default]
    Latest,
    /// Every non-deleted revision.
    All,
    /// Exactly the revision given in [`ProductQuery::revision`].
    Specific,
}

/// Optional recipe-presence constraint on a type query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecipeFilter {
    #[default]
    Unset,
    WithRecipe,
    WithoutRecipes,
}

/// Redirects a type query to return related rows instead of the matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Selector {
    /// The matched rows themselves.
    #[default]
    Matched,
    /// Types that reference a matched type as a part.
    Parents,
    /// Types referenced as parts by a matched type.
    Parts,
}

/// Query surface of `load_types`. Every field is optional; an empty query
/// returns the latest revision of everything configured.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProductQuery {
    /// Restrict to a registered type name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub type_name: Option<String>,
    /// When set, `type_name` matches that exact type only instead of
    /// expanding to registered subtypes.
    #[serde(default)]
    pub exclude_derived_types: bool,
    /// Identifier match supporting `*` as prefix/suffix glob.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    #[serde(default)]
    pub revision_filter: RevisionFilter,
    /// Revision used with [`RevisionFilter::Specific`].
    #[serde(default)]
    pub revision: i16,
    /// Case-insensitive name substring.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub recipe_filter: RecipeFilter,
    #[serde(default)]
    pub selector: Selector,
    /// Property-level filter, pushed down per type via the type strategy
    /// and re-checked against the materialized objects.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub property_filter: Option<PropertyPredicate>,
}

impl ProductQuery {
    pub fn by_type(type_name: impl Into<String>) -> Self {
        Self {
            type_name: Some(type_name.into()),
            ..Self::default()
        }
    }

    pub fn by_identifier(identifier: impl Into<String>) -> Self {
        Self {
            identifier: Some(identifier.into()),
            ..Self::default()
        }
    }
}

/// Identifier matching with glob-style `*` at either end: `AB*` anchors the
/// prefix, `*AB` the suffix, `*AB*` is a substring match, no star is exact.
pub fn identifier_matches(pattern: &str, identifier: &str) -> bool {
    let prefix_wild = pattern.starts_with('*');
    let suffix_wild = pattern.ends_with('*') && pattern.len() > 1 || pattern == "*";
    let core = pattern.trim_matches('*');

    match (prefix_wild, suffix_wild) {
        (true, true) => identifier.contains(core),
        (true, false) => identifier.ends_with(core),
        (false, true) => identifier.starts_with(core),
        (false, false) => identifier == core,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_wildcard() {
        assert!(identifier_matches("AB*", "ABC123"));
        assert!(!identifier_matches("AB*", "XABC"));
    }

    #[test]
    fn suffix_wildcard() {
        assert!(identifier_matches("*AB", "12AB"));
        assert!(!identifier_matches("*AB", "AB12"));
    }

    #[test]
    fn substring_wildcard() {
        assert!(identifier_matches("*AB*", "XABY"));
        assert!(identifier_matches("*AB*", "AB"));
        assert!(!identifier_matches("*AB*", "A-B"));
    }

    #[test]
    fn exact_match_without_star() {
        assert!(identifier_matches("AB", "AB"));
        assert!(!identifier_matches("AB", "ABC"));
    }

    #[test]
    fn lone_star_matches_everything() {
        assert!(identifier_matches("*", "anything"));
        assert!(identifier_matches("*", ""));
    }
}
