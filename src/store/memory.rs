use crate::engine::predicate::ColumnPredicate;
use crate::model::Id;
use crate::store::rows::{
    ConnectorReferenceRow, InstanceRow, OutputDescriptionRow, PartLinkRow, ProductTypeRow,
    RecipeRow, TypeVersionRow, WorkplanConnectorRow, WorkplanReferenceRow, WorkplanRow,
    WorkplanStepRow,
};
use crate::store::traits::{ProductStore, StorageTx};
use anyhow::Result;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

/// All tables of the product schema, one map per table keyed by row id.
#[derive(Debug, Clone, Default)]
struct MemState {
    next_id: Id,
    types: BTreeMap<Id, ProductTypeRow>,
    versions: BTreeMap<Id, TypeVersionRow>,
    links: BTreeMap<Id, PartLinkRow>,
    instances: BTreeMap<Id, InstanceRow>,
    recipes: BTreeMap<Id, RecipeRow>,
    workplans: BTreeMap<Id, WorkplanRow>,
    workplan_references: BTreeMap<Id, WorkplanReferenceRow>,
    steps: BTreeMap<Id, WorkplanStepRow>,
    connectors: BTreeMap<Id, WorkplanConnectorRow>,
    connector_references: BTreeMap<Id, ConnectorReferenceRow>,
    output_descriptions: BTreeMap<Id, OutputDescriptionRow>,
}

impl MemState {
    fn next_id(&mut self) -> Id {
        self.next_id += 1;
        self.next_id
    }
}

/// In-memory product store, used by tests. Transactions operate
/// on a copy of the whole state and publish it atomically on commit;
/// dropping a transaction discards the copy.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<RwLock<MemState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl ProductStore for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn StorageTx>> {
        let work = self.state.read().clone();
        Ok(Box::new(MemoryTx {
            shared: Arc::clone(&self.state),
            work,
        }))
    }

    async fn check_database(&self) -> Result<()> {
        Ok(())
    }
}

struct MemoryTx {
    shared: Arc<RwLock<MemState>>,
    work: MemState,
}

#[async_trait::async_trait]
impl StorageTx for MemoryTx {
    async fn get_type(&mut self, id: Id) -> Result<Option<ProductTypeRow>> {
        Ok(self
            .work
            .types
            .get(&id)
            .filter(|row| row.deleted.is_none())
            .cloned())
    }

    async fn find_type_by_identity(
        &mut self,
        identifier: &str,
        revision: i16,
    ) -> Result<Option<ProductTypeRow>> {
        Ok(self
            .work
            .types
            .values()
            .find(|row| {
                row.deleted.is_none() && row.identifier == identifier && row.revision == revision
            })
            .cloned())
    }

    async fn list_types(
        &mut self,
        type_names: Option<&[String]>,
        column_filter: Option<&ColumnPredicate>,
    ) -> Result<Vec<ProductTypeRow>> {
        let rows = self
            .work
            .types
            .values()
            .filter(|row| row.deleted.is_none())
            .filter(|row| {
                type_names
                    .map(|names| names.iter().any(|n| *n == row.type_name))
                    .unwrap_or(true)
            })
            .filter(|row| match column_filter {
                Some(filter) => row
                    .current_version_id
                    .and_then(|id| self.work.versions.get(&id))
                    .is_some_and(|version| filter.matches(&version.columns)),
                None => true,
            })
            .cloned()
            .collect();
        Ok(rows)
    }

    async fn insert_type(&mut self, mut row: ProductTypeRow) -> Result<Id> {
        let id = self.work.next_id();
        row.id = id;
        self.work.types.insert(id, row);
        Ok(id)
    }

    async fn update_type(&mut self, row: &ProductTypeRow) -> Result<()> {
        self.work.types.insert(row.id, row.clone());
        Ok(())
    }

    async fn soft_delete_type(&mut self, id: Id, when: DateTime<Utc>) -> Result<bool> {
        match self.work.types.get_mut(&id) {
            Some(row) if row.deleted.is_none() => {
                row.deleted = Some(when);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn get_version(&mut self, id: Id) -> Result<Option<TypeVersionRow>> {
        Ok(self.work.versions.get(&id).cloned())
    }

    async fn insert_version(&mut self, mut row: TypeVersionRow) -> Result<Id> {
        let id = self.work.next_id();
        row.id = id;
        self.work.versions.insert(id, row);
        Ok(id)
    }

    async fn links_for_parent(&mut self, parent_id: Id) -> Result<Vec<PartLinkRow>> {
        Ok(self
            .work
            .links
            .values()
            .filter(|row| row.parent_id == parent_id)
            .cloned()
            .collect())
    }

    async fn links_to_child(&mut self, child_id: Id) -> Result<Vec<PartLinkRow>> {
        Ok(self
            .work
            .links
            .values()
            .filter(|row| row.child_id == child_id)
            .cloned()
            .collect())
    }

    async fn insert_link(&mut self, mut row: PartLinkRow) -> Result<Id> {
        let id = self.work.next_id();
        row.id = id;
        self.work.links.insert(id, row);
        Ok(id)
    }

    async fn update_link(&mut self, row: &PartLinkRow) -> Result<()> {
        self.work.links.insert(row.id, row.clone());
        Ok(())
    }

    async fn delete_link(&mut self, id: Id) -> Result<()> {
        self.work.links.remove(&id);
        Ok(())
    }

    async fn get_instance(&mut self, id: Id) -> Result<Option<InstanceRow>> {
        Ok(self.work.instances.get(&id).cloned())
    }

    async fn list_instances(&mut self, ids: &[Id]) -> Result<Vec<InstanceRow>> {
        Ok(ids
            .iter()
            .filter_map(|id| self.work.instances.get(id))
            .cloned()
            .collect())
    }

    async fn query_instances(
        &mut self,
        type_ids: &[Id],
        column_filter: Option<&ColumnPredicate>,
    ) -> Result<Vec<InstanceRow>> {
        Ok(self
            .work
            .instances
            .values()
            .filter(|row| type_ids.contains(&row.type_id))
            .filter(|row| {
                column_filter
                    .map(|filter| filter.matches(&row.columns))
                    .unwrap_or(true)
            })
            .cloned()
            .collect())
    }

    async fn instance_children(&mut self, parent_id: Id) -> Result<Vec<InstanceRow>> {
        Ok(self
            .work
            .instances
            .values()
            .filter(|row| row.parent_id == Some(parent_id))
            .cloned()
            .collect())
    }

    async fn insert_instance(&mut self, mut row: InstanceRow) -> Result<Id> {
        let id = self.work.next_id();
        row.id = id;
        self.work.instances.insert(id, row);
        Ok(id)
    }

    async fn update_instance(&mut self, row: &InstanceRow) -> Result<()> {
        self.work.instances.insert(row.id, row.clone());
        Ok(())
    }

    async fn get_recipe(&mut self, id: Id) -> Result<Option<RecipeRow>> {
        Ok(self.work.recipes.get(&id).cloned())
    }

    async fn recipes_for_product(&mut self, product_id: Id) -> Result<Vec<RecipeRow>> {
        Ok(self
            .work
            .recipes
            .values()
            .filter(|row| row.product_id == product_id)
            .cloned()
            .collect())
    }

    async fn product_has_recipes(&mut self, product_id: Id) -> Result<bool> {
        Ok(self
            .work
            .recipes
            .values()
            .any(|row| row.product_id == product_id))
    }

    async fn insert_recipe(&mut self, mut row: RecipeRow) -> Result<Id> {
        let id = self.work.next_id();
        row.id = id;
        self.work.recipes.insert(id, row);
        Ok(id)
    }

    async fn update_recipe(&mut self, row: &RecipeRow) -> Result<()> {
        self.work.recipes.insert(row.id, row.clone());
        Ok(())
    }

    async fn delete_recipe(&mut self, id: Id) -> Result<bool> {
        Ok(self.work.recipes.remove(&id).is_some())
    }

    async fn get_workplan(&mut self, id: Id) -> Result<Option<WorkplanRow>> {
        Ok(self.work.workplans.get(&id).cloned())
    }

    async fn insert_workplan(&mut self, mut row: WorkplanRow) -> Result<Id> {
        let id = self.work.next_id();
        row.id = id;
        self.work.workplans.insert(id, row);
        Ok(id)
    }

    async fn update_workplan(&mut self, row: &WorkplanRow) -> Result<()> {
        self.work.workplans.insert(row.id, row.clone());
        Ok(())
    }

    async fn insert_workplan_reference(&mut self, mut row: WorkplanReferenceRow) -> Result<Id> {
        let id = self.work.next_id();
        row.id = id;
        self.work.workplan_references.insert(id, row);
        Ok(id)
    }

    async fn workplan_steps(&mut self, workplan_id: Id) -> Result<Vec<WorkplanStepRow>> {
        let mut rows: Vec<WorkplanStepRow> = self
            .work
            .steps
            .values()
            .filter(|row| row.workplan_id == workplan_id)
            .cloned()
            .collect();
        rows.sort_by_key(|row| row.position);
        Ok(rows)
    }

    async fn workplan_connectors(
        &mut self,
        workplan_id: Id,
    ) -> Result<Vec<WorkplanConnectorRow>> {
        Ok(self
            .work
            .connectors
            .values()
            .filter(|row| row.workplan_id == workplan_id)
            .cloned()
            .collect())
    }

    async fn connector_references(
        &mut self,
        step_row_id: Id,
    ) -> Result<Vec<ConnectorReferenceRow>> {
        let mut rows: Vec<ConnectorReferenceRow> = self
            .work
            .connector_references
            .values()
            .filter(|row| row.step_row_id == step_row_id)
            .cloned()
            .collect();
        rows.sort_by_key(|row| row.index);
        Ok(rows)
    }

    async fn output_descriptions(
        &mut self,
        step_row_id: Id,
    ) -> Result<Vec<OutputDescriptionRow>> {
        let mut rows: Vec<OutputDescriptionRow> = self
            .work
            .output_descriptions
            .values()
            .filter(|row| row.step_row_id == step_row_id)
            .cloned()
            .collect();
        rows.sort_by_key(|row| row.index);
        Ok(rows)
    }

    async fn insert_step(&mut self, mut row: WorkplanStepRow) -> Result<Id> {
        let id = self.work.next_id();
        row.id = id;
        self.work.steps.insert(id, row);
        Ok(id)
    }

    async fn update_step(&mut self, row: &WorkplanStepRow) -> Result<()> {
        self.work.steps.insert(row.id, row.clone());
        Ok(())
    }

    async fn delete_step(&mut self, id: Id) -> Result<()> {
        self.work.steps.remove(&id);
        self.work
            .connector_references
            .retain(|_, row| row.step_row_id != id);
        self.work
            .output_descriptions
            .retain(|_, row| row.step_row_id != id);
        Ok(())
    }

    async fn insert_connector(&mut self, mut row: WorkplanConnectorRow) -> Result<Id> {
        let id = self.work.next_id();
        row.id = id;
        self.work.connectors.insert(id, row);
        Ok(id)
    }

    async fn update_connector(&mut self, row: &WorkplanConnectorRow) -> Result<()> {
        self.work.connectors.insert(row.id, row.clone());
        Ok(())
    }

    async fn delete_connector(&mut self, id: Id) -> Result<()> {
        self.work.connectors.remove(&id);
        Ok(())
    }

    async fn insert_connector_reference(&mut self, mut row: ConnectorReferenceRow) -> Result<Id> {
        let id = self.work.next_id();
        row.id = id;
        self.work.connector_references.insert(id, row);
        Ok(id)
    }

    async fn clear_connector_references(&mut self, step_row_id: Id) -> Result<()> {
        self.work
            .connector_references
            .retain(|_, row| row.step_row_id != step_row_id);
        Ok(())
    }

    async fn insert_output_description(&mut self, mut row: OutputDescriptionRow) -> Result<Id> {
        let id = self.work.next_id();
        row.id = id;
        self.work.output_descriptions.insert(id, row);
        Ok(id)
    }

    async fn clear_output_descriptions(&mut self, step_row_id: Id) -> Result<()> {
        self.work
            .output_descriptions
            .retain(|_, row| row.step_row_id != step_row_id);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        *self.shared.write() = self.work;
        Ok(())
    }
}
