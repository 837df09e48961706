use crate::strategy::TypeHierarchy;

/// Sentinel for "this strategy cannot serve the target type".
pub const BAD_COMPLIANCE: i32 = i32::MAX;

/// Metadata a strategy plugin declares about the domain types it serves.
#[derive(Debug, Clone)]
pub struct SupportedTypes {
    pub names: Vec<String>,
    /// Whether types derived from a supported type are acceptable.
    pub derived_types: bool,
}

impl SupportedTypes {
    pub fn new<I, S>(names: I, derived_types: bool) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
            derived_types,
        }
    }

    pub fn exact(name: impl Into<String>) -> Self {
        Self::new([name.into()], false)
    }
}

/// Inheritance distance between a target type and a strategy's supported
/// set: 0 for an exact match, +1 per base-type hop (only walked while the
/// strategy accepts derived types), the full chain length for an interface
/// match when no class matched, [`BAD_COMPLIANCE`] otherwise.
pub fn compliance(supported: &SupportedTypes, target: &str, hierarchy: &TypeHierarchy) -> i32 {
    let chain = hierarchy.base_chain(target);

    for (distance, name) in chain.iter().enumerate() {
        if distance > 0 && !supported.derived_types {
            break;
        }
        if supported.names.iter().any(|s| s == name) {
            return distance as i32;
        }
    }

    let interfaces = hierarchy.interfaces_of(target);
    if supported
        .names
        .iter()
        .any(|s| interfaces.iter().any(|i| i == s))
    {
        return chain.len() as i32;
    }

    BAD_COMPLIANCE
}

/// Pick the best candidate for a target type by compliance distance.
///
/// Candidates are scored in ascending name order, which makes tie-breaking
/// deterministic instead of depending on registration order; the first
/// candidate reaching the lowest score wins.
pub fn select_strategy<'a, C, N, S>(
    candidates: &'a [C],
    name_of: N,
    supported_of: S,
    target: &str,
    hierarchy: &TypeHierarchy,
) -> Option<&'a C>
where
    N: Fn(&C) -> &str,
    S: Fn(&C) -> &SupportedTypes,
{
    let mut ordered: Vec<&C> = candidates.iter().collect();
    ordered.sort_by(|a, b| name_of(a).cmp(name_of(b)));

    let mut best: Option<(&C, i32)> = None;
    for candidate in ordered {
        let score = compliance(supported_of(candidate), target, hierarchy);
        if score == BAD_COMPLIANCE {
            continue;
        }
        match best {
            Some((_, current)) if current <= score => {}
            _ => best = Some((candidate, score)),
        }
    }
    best.map(|(candidate, _)| candidate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::TypeNode;

    fn hierarchy() -> TypeHierarchy {
        let mut hierarchy = TypeHierarchy::default();
        hierarchy.register("ProductType", TypeNode::default());
        hierarchy.register(
            "Watch",
            TypeNode {
                base: Some("ProductType".into()),
                interfaces: vec!["IDisplay".into()],
            },
        );
        hierarchy.register(
            "SmartWatch",
            TypeNode {
                base: Some("Watch".into()),
                interfaces: vec![],
            },
        );
        hierarchy
    }

    struct Candidate {
        name: &'static str,
        supported: SupportedTypes,
    }

    fn select<'a>(candidates: &'a [Candidate], target: &str) -> Option<&'a str> {
        select_strategy(
            candidates,
            |c| c.name,
            |c| &c.supported,
            target,
            &hierarchy(),
        )
        .map(|c| c.name)
    }

    #[test]
    fn exact_match_beats_base_match() {
        let candidates = [
            Candidate {
                name: "base",
                supported: SupportedTypes::new(["Watch"], true),
            },
            Candidate {
                name: "exact",
                supported: SupportedTypes::exact("SmartWatch"),
            },
        ];
        assert_eq!(select(&candidates, "SmartWatch"), Some("exact"));
    }

    #[test]
    fn base_hops_cost_one_each() {
        let h = hierarchy();
        let supported = SupportedTypes::new(["ProductType"], true);
        assert_eq!(compliance(&supported, "ProductType", &h), 0);
        assert_eq!(compliance(&supported, "Watch", &h), 1);
        assert_eq!(compliance(&supported, "SmartWatch", &h), 2);
    }

    #[test]
    fn derived_types_flag_gates_the_walk() {
        let h = hierarchy();
        let supported = SupportedTypes::exact("Watch");
        assert_eq!(compliance(&supported, "Watch", &h), 0);
        assert_eq!(compliance(&supported, "SmartWatch", &h), BAD_COMPLIANCE);
    }

    #[test]
    fn interface_match_costs_full_chain() {
        let h = hierarchy();
        let supported = SupportedTypes::new(["IDisplay"], true);
        // SmartWatch -> Watch -> ProductType is a chain of three.
        assert_eq!(compliance(&supported, "SmartWatch", &h), 3);
        assert_eq!(compliance(&supported, "Watch", &h), 2);
    }

    #[test]
    fn no_match_is_bad_compliance() {
        let h = hierarchy();
        let supported = SupportedTypes::exact("Gearbox");
        assert_eq!(compliance(&supported, "SmartWatch", &h), BAD_COMPLIANCE);
    }

    #[test]
    fn ties_resolve_alphabetically() {
        let candidates = [
            Candidate {
                name: "zeta",
                supported: SupportedTypes::exact("Watch"),
            },
            Candidate {
                name: "alpha",
                supported: SupportedTypes::exact("Watch"),
            },
        ];
        assert_eq!(select(&candidates, "Watch"), Some("alpha"));
    }
}
