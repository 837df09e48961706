use crate::model::{CustomData, Id, Identity, InstanceState};

/// A realized occurrence of a product type: one physical unit flowing
/// through production. Instances form a tree mirroring the part structure
/// of their type.
#[derive(Debug, Clone)]
pub struct ProductInstance {
    pub id: Id,
    /// Row id of the product type this unit was instantiated from.
    pub type_id: Id,
    /// Type-name tag of the product type, resolves the instance strategy.
    pub type_name: String,
    /// Serial number or similar unit identity; interpretation is left to
    /// the instance strategy.
    pub identity: Option<Identity>,
    pub state: InstanceState,
    /// The part link that produced this unit as a part, when it is one.
    pub part_link_id: Option<Id>,
    pub data: Box<dyn CustomData>,
    /// Sub-instances, saved transitively unless the child type's instance
    /// strategy opts out.
    pub parts: Vec<ProductInstance>,
}

impl ProductInstance {
    pub fn new(type_id: Id, type_name: impl Into<String>, data: Box<dyn CustomData>) -> Self {
        Self {
            id: 0,
            type_id,
            type_name: type_name.into(),
            identity: None,
            state: InstanceState::Initial,
            part_link_id: None,
            data,
            parts: Vec::new(),
        }
    }
}
