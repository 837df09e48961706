use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;

/// Database key. Zero means "not yet persisted".
pub type Id = i64;

/// Sentinel revision meaning "the highest active revision of an identifier".
pub const LATEST_REVISION: i16 = -1;

/// Business identity of a product type: string identifier plus revision,
/// unique together among non-deleted rows.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProductIdentity {
    pub identifier: String,
    pub revision: i16,
}

impl ProductIdentity {
    pub fn new(identifier: impl Into<String>, revision: i16) -> Self {
        Self {
            identifier: identifier.into(),
            revision,
        }
    }

    /// Identity resolving to the latest active revision of an identifier.
    pub fn latest(identifier: impl Into<String>) -> Self {
        Self::new(identifier, LATEST_REVISION)
    }

    pub fn is_latest(&self) -> bool {
        self.revision == LATEST_REVISION
    }
}

impl fmt::Display for ProductIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.identifier, self.revision)
    }
}

/// Identity kinds encountered in the system. Product types are keyed by
/// [`ProductIdentity`]; physical units carry serial numbers. The engine only
/// persists the structured product identity and rejects everything else at
/// save time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Identity {
    Product(ProductIdentity),
    Serial(String),
}

impl Identity {
    pub fn as_product(&self) -> Option<&ProductIdentity> {
        match self {
            Identity::Product(identity) => Some(identity),
            _ => None,
        }
    }
}

impl From<ProductIdentity> for Identity {
    fn from(identity: ProductIdentity) -> Self {
        Identity::Product(identity)
    }
}

/// Lifecycle state of a product type, stored on the version sub-row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductState {
    Created,
    Released,
    Locked,
    Deprecated,
}

impl ProductState {
    pub fn as_raw(self) -> i64 {
        match self {
            ProductState::Created => 0,
            ProductState::Released => 1,
            ProductState::Locked => 2,
            ProductState::Deprecated => 4,
        }
    }

    pub fn from_raw(raw: i64) -> Self {
        match raw {
            1 => ProductState::Released,
            2 => ProductState::Locked,
            4 => ProductState::Deprecated,
            _ => ProductState::Created,
        }
    }
}

/// Lifecycle state of a product instance flowing through production.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceState {
    Initial,
    InProduction,
    Success,
    Failure,
}

impl InstanceState {
    pub fn as_raw(self) -> i64 {
        match self {
            InstanceState::Initial => 0,
            InstanceState::InProduction => 1,
            InstanceState::Success => 2,
            InstanceState::Failure => 4,
        }
    }

    pub fn from_raw(raw: i64) -> Self {
        match raw {
            1 => InstanceState::InProduction,
            2 => InstanceState::Success,
            4 => InstanceState::Failure,
            _ => InstanceState::Initial,
        }
    }
}

/// Strategy-interpreted payload attached to types, links, instances and
/// recipes. Strategies downcast through `as_any` to their concrete payload
/// type; the engine never looks inside.
pub trait CustomData: Any + Send + Sync + fmt::Debug {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
    fn clone_box(&self) -> Box<dyn CustomData>;
}

/// Opt-in marker for concrete payload types. Implementing it supplies the
/// `CustomData` surface through the blanket impl below. `Box<dyn CustomData>`
/// carries no marker, so `as_any` called on a boxed payload derefs to the
/// inner value and downcasts hit the payload type.
pub trait CustomPayload: Any + Send + Sync + fmt::Debug + Clone {}

impl<T> CustomData for T
where
    T: CustomPayload,
{
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn clone_box(&self) -> Box<dyn CustomData> {
        Box::new(self.clone())
    }
}

impl Clone for Box<dyn CustomData> {
    fn clone(&self) -> Self {
        self.as_ref().clone_box()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latest_identity_uses_sentinel() {
        let identity = ProductIdentity::latest("P-100");
        assert!(identity.is_latest());
        assert_eq!(identity.revision, LATEST_REVISION);
    }

    #[test]
    fn custom_data_downcasts_through_the_box() {
        #[derive(Debug, Clone, PartialEq)]
        struct Payload(i32);
        impl CustomPayload for Payload {}

        let mut data: Box<dyn CustomData> = Box::new(Payload(42));
        let payload = data.as_any().downcast_ref::<Payload>().unwrap();
        assert_eq!(payload, &Payload(42));

        data.as_any_mut().downcast_mut::<Payload>().unwrap().0 = 43;
        let cloned = data.clone();
        assert_eq!(cloned.as_any().downcast_ref::<Payload>(), Some(&Payload(43)));
    }
}
