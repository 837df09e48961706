use crate::model::{CustomData, Id, Workplan};
use serde::{Deserialize, Serialize};
use std::ops::BitOr;

/// Bitmask distinguishing the role of a recipe for its product. The clone
/// bit occupies the sign bit so the remaining bits always describe the
/// recipe's original role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecipeClassification(pub i32);

impl RecipeClassification {
    pub const UNSET: Self = Self(0);
    pub const DEFAULT: Self = Self(1);
    pub const ALTERNATIVE: Self = Self(2);
    pub const INTERMEDIATE: Self = Self(4);
    pub const PART: Self = Self(8);
    /// Marker bit for cloned recipes.
    pub const CLONE: Self = Self(i32::MIN);
    /// Mask stripping the clone bit, leaving the original role bits.
    pub const CLONE_FILTER: Self = Self(!i32::MIN);

    pub fn is_clone(self) -> bool {
        self.0 & Self::CLONE.0 != 0
    }

    /// Classification of a clone of this recipe: the original role bits
    /// plus the clone marker.
    pub fn as_clone(self) -> Self {
        Self(self.0 & Self::CLONE_FILTER.0 | Self::CLONE.0)
    }

    /// Whether a query with the given mask includes this classification.
    /// Clones only match when the mask carries the clone bit.
    pub fn matches(self, mask: Self) -> bool {
        if self.is_clone() && !mask.is_clone() {
            return false;
        }
        self.0 & mask.0 & Self::CLONE_FILTER.0 != 0
    }
}

impl BitOr for RecipeClassification {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Lifecycle state of a recipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecipeState {
    New,
    Released,
    Revoked,
}

impl RecipeState {
    pub fn as_raw(self) -> i64 {
        match self {
            RecipeState::New => 0,
            RecipeState::Released => 1,
            RecipeState::Revoked => 2,
        }
    }

    pub fn from_raw(raw: i64) -> Self {
        match raw {
            1 => RecipeState::Released,
            2 => RecipeState::Revoked,
            _ => RecipeState::New,
        }
    }
}

/// A named, classified production recipe referencing exactly one product
/// type and optionally one workplan. Recipe-specific data lives in generic
/// columns behind the configured recipe strategy.
#[derive(Debug, Clone)]
pub struct ProductRecipe {
    pub id: Id,
    pub name: String,
    /// Tag resolving the configured recipe strategy.
    pub type_name: String,
    pub classification: RecipeClassification,
    pub state: RecipeState,
    pub product_id: Id,
    pub workplan: Option<Workplan>,
    pub data: Box<dyn CustomData>,
}

impl ProductRecipe {
    pub fn new(type_name: impl Into<String>, data: Box<dyn CustomData>) -> Self {
        Self {
            id: 0,
            name: String::new(),
            type_name: type_name.into(),
            classification: RecipeClassification::UNSET,
            state: RecipeState::New,
            product_id: 0,
            workplan: None,
            data,
        }
    }

    /// Derive an unsaved clone of this recipe, keeping the original role
    /// bits and setting the clone marker.
    pub fn derive_clone(&self) -> Self {
        let mut clone = self.clone();
        clone.id = 0;
        clone.classification = self.classification.as_clone();
        clone
    }
}
