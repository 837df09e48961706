use crate::engine::predicate::ColumnPredicate;
use crate::model::Id;
use crate::store::rows::{
    ConnectorReferenceRow, InstanceRow, OutputDescriptionRow, PartLinkRow, ProductTypeRow,
    RecipeRow, TypeVersionRow, WorkplanConnectorRow, WorkplanReferenceRow, WorkplanRow,
    WorkplanStepRow,
};
use anyhow::Result;
use chrono::{DateTime, Utc};

/// A storage backend for the product graph. Every public engine operation
/// runs against exactly one transaction obtained from `begin`.
#[async_trait::async_trait]
pub trait ProductStore: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn StorageTx>>;

    /// Connectivity probe only.
    async fn check_database(&self) -> Result<()>;
}

/// One open unit of work. Dropping without `commit` rolls back; recursive
/// sub-operations of one engine call all share the same transaction.
///
/// Row-returning methods never yield soft-deleted type rows unless noted.
#[async_trait::async_trait]
pub trait StorageTx: Send {
    // --- product types ---

    async fn get_type(&mut self, id: Id) -> Result<Option<ProductTypeRow>>;

    /// Identity lookup among non-deleted rows.
    async fn find_type_by_identity(
        &mut self,
        identifier: &str,
        revision: i16,
    ) -> Result<Option<ProductTypeRow>>;

    /// Active type rows, optionally narrowed to a type-name set and to
    /// rows whose current version matches the column predicate.
    async fn list_types(
        &mut self,
        type_names: Option<&[String]>,
        column_filter: Option<&ColumnPredicate>,
    ) -> Result<Vec<ProductTypeRow>>;

    async fn insert_type(&mut self, row: ProductTypeRow) -> Result<Id>;

    async fn update_type(&mut self, row: &ProductTypeRow) -> Result<()>;

    async fn soft_delete_type(&mut self, id: Id, when: DateTime<Utc>) -> Result<bool>;

    async fn get_version(&mut self, id: Id) -> Result<Option<TypeVersionRow>>;

    async fn insert_version(&mut self, row: TypeVersionRow) -> Result<Id>;

    // --- part links ---

    async fn links_for_parent(&mut self, parent_id: Id) -> Result<Vec<PartLinkRow>>;

    async fn links_to_child(&mut self, child_id: Id) -> Result<Vec<PartLinkRow>>;

    async fn insert_link(&mut self, row: PartLinkRow) -> Result<Id>;

    async fn update_link(&mut self, row: &PartLinkRow) -> Result<()>;

    async fn delete_link(&mut self, id: Id) -> Result<()>;

    // --- instances ---

    async fn get_instance(&mut self, id: Id) -> Result<Option<InstanceRow>>;

    async fn list_instances(&mut self, ids: &[Id]) -> Result<Vec<InstanceRow>>;

    async fn query_instances(
        &mut self,
        type_ids: &[Id],
        column_filter: Option<&ColumnPredicate>,
    ) -> Result<Vec<InstanceRow>>;

    async fn instance_children(&mut self, parent_id: Id) -> Result<Vec<InstanceRow>>;

    async fn insert_instance(&mut self, row: InstanceRow) -> Result<Id>;

    async fn update_instance(&mut self, row: &InstanceRow) -> Result<()>;

    // --- recipes ---

    async fn get_recipe(&mut self, id: Id) -> Result<Option<RecipeRow>>;

    async fn recipes_for_product(&mut self, product_id: Id) -> Result<Vec<RecipeRow>>;

    async fn product_has_recipes(&mut self, product_id: Id) -> Result<bool>;

    async fn insert_recipe(&mut self, row: RecipeRow) -> Result<Id>;

    async fn update_recipe(&mut self, row: &RecipeRow) -> Result<()>;

    async fn delete_recipe(&mut self, id: Id) -> Result<bool>;

    // --- workplans ---

    async fn get_workplan(&mut self, id: Id) -> Result<Option<WorkplanRow>>;

    async fn insert_workplan(&mut self, row: WorkplanRow) -> Result<Id>;

    async fn update_workplan(&mut self, row: &WorkplanRow) -> Result<()>;

    /// Record a new-version edge from an old workplan row to its successor.
    async fn insert_workplan_reference(&mut self, row: WorkplanReferenceRow) -> Result<Id>;

    async fn workplan_steps(&mut self, workplan_id: Id) -> Result<Vec<WorkplanStepRow>>;

    async fn workplan_connectors(&mut self, workplan_id: Id)
        -> Result<Vec<WorkplanConnectorRow>>;

    async fn connector_references(&mut self, step_row_id: Id)
        -> Result<Vec<ConnectorReferenceRow>>;

    async fn output_descriptions(&mut self, step_row_id: Id)
        -> Result<Vec<OutputDescriptionRow>>;

    async fn insert_step(&mut self, row: WorkplanStepRow) -> Result<Id>;

    async fn update_step(&mut self, row: &WorkplanStepRow) -> Result<()>;

    /// Removes the step row with its connector references and output
    /// descriptions.
    async fn delete_step(&mut self, id: Id) -> Result<()>;

    async fn insert_connector(&mut self, row: WorkplanConnectorRow) -> Result<Id>;

    async fn update_connector(&mut self, row: &WorkplanConnectorRow) -> Result<()>;

    async fn delete_connector(&mut self, id: Id) -> Result<()>;

    async fn insert_connector_reference(&mut self, row: ConnectorReferenceRow) -> Result<Id>;

    async fn clear_connector_references(&mut self, step_row_id: Id) -> Result<()>;

    async fn insert_output_description(&mut self, row: OutputDescriptionRow) -> Result<Id>;

    async fn clear_output_descriptions(&mut self, step_row_id: Id) -> Result<()>;

    // --- wrap-up ---

    async fn commit(self: Box<Self>) -> Result<()>;
}
