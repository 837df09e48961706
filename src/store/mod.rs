pub mod memory;
pub mod postgres;
pub mod rows;
pub mod traits;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;
pub use rows::{
    ConnectorReferenceRow, ConnectorRole, InstanceRow, OutputDescriptionRow, PartLinkRow,
    ProductTypeRow, RecipeRow, TypeVersionRow, WorkplanConnectorRow, WorkplanReferenceRow,
    WorkplanRow, WorkplanStepRow,
};
pub use traits::{ProductStore, StorageTx};
