use crate::model::{CustomData, Id, Identity, ProductState};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Shared handle to a materialized product type.
///
/// One load call materializes at most one object per database row; a part
/// referenced from two places in the same tree resolves to the same handle
/// (`Arc::ptr_eq` holds). Mutation during graph assembly goes through the
/// lock.
pub type ProductRef = Arc<RwLock<ProductType>>;

/// A node in the bill-of-materials hierarchy: a reusable product definition
/// with strategy-interpreted custom data and named part links to child
/// product types.
#[derive(Debug, Clone)]
pub struct ProductType {
    pub id: Id,
    pub identity: Identity,
    pub name: String,
    pub state: ProductState,
    /// Tag resolving the runtime subtype and its configured strategies.
    pub type_name: String,
    pub data: Box<dyn CustomData>,
    /// Part properties keyed by declaring property name. Iteration order is
    /// not authoritative; the engine walks links in configuration order.
    pub parts: BTreeMap<String, PartProperty>,
}

impl ProductType {
    pub fn new(
        type_name: impl Into<String>,
        identity: Identity,
        name: impl Into<String>,
        data: Box<dyn CustomData>,
    ) -> Self {
        Self {
            id: 0,
            identity,
            name: name.into(),
            state: ProductState::Created,
            type_name: type_name.into(),
            data,
            parts: BTreeMap::new(),
        }
    }

    pub fn into_ref(self) -> ProductRef {
        Arc::new(RwLock::new(self))
    }

    /// Single-valued part property, `None` when unset or collection-valued.
    pub fn single_part(&self, property: &str) -> Option<&PartLink> {
        match self.parts.get(property) {
            Some(PartProperty::Single(link)) => link.as_ref(),
            _ => None,
        }
    }

    pub fn set_single_part(&mut self, property: impl Into<String>, link: Option<PartLink>) {
        self.parts.insert(property.into(), PartProperty::Single(link));
    }

    pub fn part_collection(&self, property: &str) -> &[PartLink] {
        match self.parts.get(property) {
            Some(PartProperty::Collection(links)) => links,
            _ => &[],
        }
    }

    pub fn set_part_collection(&mut self, property: impl Into<String>, links: Vec<PartLink>) {
        self.parts
            .insert(property.into(), PartProperty::Collection(links));
    }
}

/// A typed, named edge from a parent product type to a child product type,
/// carrying its own generic-column payload (quantity and the like).
#[derive(Debug, Clone)]
pub struct PartLink {
    /// Link row id; zero marks a link that has never been persisted.
    pub id: Id,
    pub child: ProductRef,
    pub data: Box<dyn CustomData>,
}

impl PartLink {
    pub fn new(child: ProductRef, data: Box<dyn CustomData>) -> Self {
        Self { id: 0, child, data }
    }
}

/// Value of a part property: single links and collections both persist as
/// part-link rows, collections share `(parent, property_name)`.
#[derive(Debug, Clone)]
pub enum PartProperty {
    Single(Option<PartLink>),
    Collection(Vec<PartLink>),
}
