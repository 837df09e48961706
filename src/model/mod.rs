pub mod columns;
pub mod common;
pub mod instance;
pub mod product;
pub mod query;
pub mod recipe;
pub mod workplan;

pub use columns::{ColumnRef, GenericColumns, SLOTS};
pub use common::{
    CustomData, CustomPayload, Id, Identity, InstanceState, ProductIdentity, ProductState,
    LATEST_REVISION,
};
pub use instance::ProductInstance;
pub use product::{PartLink, PartProperty, ProductRef, ProductType};
pub use query::{
    identifier_matches, ProductQuery, RecipeFilter, RevisionFilter, Selector,
};
pub use recipe::{ProductRecipe, RecipeClassification, RecipeState};
pub use workplan::{
    Connector, ConnectorClassification, ConnectorRef, OutputDescription, OutputType,
    StepDescriptor, StepKind, StepRegistry, Workplan, WorkplanState, WorkplanStep,
};
