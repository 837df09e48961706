use crate::engine::predicate::{ColumnPredicate, CompareOp};
use crate::model::{ColumnRef, GenericColumns, Id, SLOTS};
use crate::store::rows::{
    ConnectorReferenceRow, ConnectorRole, InstanceRow, OutputDescriptionRow, PartLinkRow,
    ProductTypeRow, RecipeRow, TypeVersionRow, WorkplanConnectorRow, WorkplanReferenceRow,
    WorkplanRow, WorkplanStepRow,
};
use crate::store::traits::{ProductStore, StorageTx};
use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use itertools::Itertools;
use sqlx::postgres::{PgArguments, PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, Row, Transaction};

type PgQuery<'q> = sqlx::query::Query<'q, Postgres, PgArguments>;

#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Create a new PostgreSQL store with the given database URL.
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .context("Failed to create PostgreSQL connection pool")?;

        Ok(Self { pool })
    }

    /// Create the product schema if it does not exist yet.
    pub async fn migrate(&self) -> Result<()> {
        for statement in schema_statements() {
            sqlx::query(&statement)
                .execute(&self.pool)
                .await
                .context("Failed to apply schema statement")?;
        }
        Ok(())
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait::async_trait]
impl ProductStore for PostgresStore {
    async fn begin(&self) -> Result<Box<dyn StorageTx>> {
        let tx = self
            .pool
            .begin()
            .await
            .context("Failed to open transaction")?;
        Ok(Box::new(PgTx { tx }))
    }

    async fn check_database(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .context("Database connectivity check failed")?;
        Ok(())
    }
}

struct PgTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait::async_trait]
impl StorageTx for PgTx {
    async fn get_type(&mut self, id: Id) -> Result<Option<ProductTypeRow>> {
        let row = sqlx::query(
            "SELECT id, identifier, revision, name, type_name, current_version_id, deleted \
             FROM product_types WHERE id = $1 AND deleted IS NULL",
        )
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await
        .context("Failed to fetch product type")?;

        Ok(row.as_ref().map(read_type_row))
    }

    async fn find_type_by_identity(
        &mut self,
        identifier: &str,
        revision: i16,
    ) -> Result<Option<ProductTypeRow>> {
        let row = sqlx::query(
            "SELECT id, identifier, revision, name, type_name, current_version_id, deleted \
             FROM product_types \
             WHERE identifier = $1 AND revision = $2 AND deleted IS NULL",
        )
        .bind(identifier)
        .bind(revision)
        .fetch_optional(&mut *self.tx)
        .await
        .context("Failed to fetch product type by identity")?;

        Ok(row.as_ref().map(read_type_row))
    }

    async fn list_types(
        &mut self,
        type_names: Option<&[String]>,
        column_filter: Option<&ColumnPredicate>,
    ) -> Result<Vec<ProductTypeRow>> {
        let mut sql = String::from(
            "SELECT id, identifier, revision, name, type_name, current_version_id, deleted \
             FROM product_types WHERE deleted IS NULL",
        );
        let mut next = 1usize;
        let mut values = Vec::new();

        if type_names.is_some() {
            sql.push_str(&format!(" AND type_name = ANY(${next})"));
            next += 1;
        }
        if let Some(filter) = column_filter {
            let clause = render_predicate(filter, &mut values, &mut next)?;
            sql.push_str(&format!(
                " AND current_version_id IN \
                 (SELECT id FROM product_type_versions WHERE {clause})"
            ));
        }
        sql.push_str(" ORDER BY id");

        let mut query = sqlx::query(&sql);
        if let Some(names) = type_names {
            query = query.bind(names.to_vec());
        }
        query = bind_values(query, values);

        let rows = query
            .fetch_all(&mut *self.tx)
            .await
            .context("Failed to list product types")?;

        Ok(rows.iter().map(read_type_row).collect())
    }

    async fn insert_type(&mut self, row: ProductTypeRow) -> Result<Id> {
        let inserted = sqlx::query(
            "INSERT INTO product_types \
             (identifier, revision, name, type_name, current_version_id, deleted) \
             VALUES ($1, $2, $3, $4, $5, $6) RETURNING id",
        )
        .bind(row.identifier)
        .bind(row.revision)
        .bind(row.name)
        .bind(row.type_name)
        .bind(row.current_version_id)
        .bind(row.deleted)
        .fetch_one(&mut *self.tx)
        .await
        .context("Failed to insert product type")?;

        Ok(inserted.get("id"))
    }

    async fn update_type(&mut self, row: &ProductTypeRow) -> Result<()> {
        sqlx::query(
            "UPDATE product_types \
             SET identifier = $2, revision = $3, name = $4, type_name = $5, \
                 current_version_id = $6, deleted = $7 \
             WHERE id = $1",
        )
        .bind(row.id)
        .bind(&row.identifier)
        .bind(row.revision)
        .bind(&row.name)
        .bind(&row.type_name)
        .bind(row.current_version_id)
        .bind(row.deleted)
        .execute(&mut *self.tx)
        .await
        .context("Failed to update product type")?;

        Ok(())
    }

    async fn soft_delete_type(&mut self, id: Id, when: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE product_types SET deleted = $2 WHERE id = $1 AND deleted IS NULL",
        )
        .bind(id)
        .bind(when)
        .execute(&mut *self.tx)
        .await
        .context("Failed to delete product type")?;

        Ok(result.rows_affected() > 0)
    }

    async fn get_version(&mut self, id: Id) -> Result<Option<TypeVersionRow>> {
        let sql = format!(
            "SELECT id, type_id, state, created, {} FROM product_type_versions WHERE id = $1",
            generic_column_list()
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await
            .context("Failed to fetch type version")?;

        Ok(row.as_ref().map(|row| TypeVersionRow {
            id: row.get("id"),
            type_id: row.get("type_id"),
            state: row.get("state"),
            columns: read_columns(row),
            created: row.get("created"),
        }))
    }

    async fn insert_version(&mut self, row: TypeVersionRow) -> Result<Id> {
        let sql = format!(
            "INSERT INTO product_type_versions (type_id, state, created, {}) \
             VALUES ($1, $2, $3, {}) RETURNING id",
            generic_column_list(),
            placeholder_list(4, SLOTS * 3)
        );
        let query = sqlx::query(&sql)
            .bind(row.type_id)
            .bind(row.state)
            .bind(row.created);
        let inserted = bind_columns(query, &row.columns)
            .fetch_one(&mut *self.tx)
            .await
            .context("Failed to insert type version")?;

        Ok(inserted.get("id"))
    }

    async fn links_for_parent(&mut self, parent_id: Id) -> Result<Vec<PartLinkRow>> {
        let sql = format!(
            "SELECT id, parent_id, child_id, property_name, {} \
             FROM part_links WHERE parent_id = $1 ORDER BY id",
            generic_column_list()
        );
        let rows = sqlx::query(&sql)
            .bind(parent_id)
            .fetch_all(&mut *self.tx)
            .await
            .context("Failed to fetch part links of parent")?;

        Ok(rows.iter().map(read_link_row).collect())
    }

    async fn links_to_child(&mut self, child_id: Id) -> Result<Vec<PartLinkRow>> {
        let sql = format!(
            "SELECT id, parent_id, child_id, property_name, {} \
             FROM part_links WHERE child_id = $1 ORDER BY id",
            generic_column_list()
        );
        let rows = sqlx::query(&sql)
            .bind(child_id)
            .fetch_all(&mut *self.tx)
            .await
            .context("Failed to fetch part links to child")?;

        Ok(rows.iter().map(read_link_row).collect())
    }

    async fn insert_link(&mut self, row: PartLinkRow) -> Result<Id> {
        let sql = format!(
            "INSERT INTO part_links (parent_id, child_id, property_name, {}) \
             VALUES ($1, $2, $3, {}) RETURNING id",
            generic_column_list(),
            placeholder_list(4, SLOTS * 3)
        );
        let query = sqlx::query(&sql)
            .bind(row.parent_id)
            .bind(row.child_id)
            .bind(row.property_name);
        let inserted = bind_columns(query, &row.columns)
            .fetch_one(&mut *self.tx)
            .await
            .context("Failed to insert part link")?;

        Ok(inserted.get("id"))
    }

    async fn update_link(&mut self, row: &PartLinkRow) -> Result<()> {
        let sql = format!(
            "UPDATE part_links \
             SET parent_id = $2, child_id = $3, property_name = $4, {} \
             WHERE id = $1",
            generic_column_assignments(5)
        );
        let query = sqlx::query(&sql)
            .bind(row.id)
            .bind(row.parent_id)
            .bind(row.child_id)
            .bind(&row.property_name);
        bind_columns(query, &row.columns)
            .execute(&mut *self.tx)
            .await
            .context("Failed to update part link")?;

        Ok(())
    }

    async fn delete_link(&mut self, id: Id) -> Result<()> {
        sqlx::query("DELETE FROM part_links WHERE id = $1")
            .bind(id)
            .execute(&mut *self.tx)
            .await
            .context("Failed to delete part link")?;
        Ok(())
    }

    async fn get_instance(&mut self, id: Id) -> Result<Option<InstanceRow>> {
        let sql = format!(
            "SELECT id, type_id, state, parent_id, part_link_id, {} \
             FROM product_instances WHERE id = $1",
            generic_column_list()
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await
            .context("Failed to fetch product instance")?;

        Ok(row.as_ref().map(read_instance_row))
    }

    async fn list_instances(&mut self, ids: &[Id]) -> Result<Vec<InstanceRow>> {
        let sql = format!(
            "SELECT id, type_id, state, parent_id, part_link_id, {} \
             FROM product_instances WHERE id = ANY($1) ORDER BY id",
            generic_column_list()
        );
        let rows = sqlx::query(&sql)
            .bind(ids.to_vec())
            .fetch_all(&mut *self.tx)
            .await
            .context("Failed to list product instances")?;

        Ok(rows.iter().map(read_instance_row).collect())
    }

    async fn query_instances(
        &mut self,
        type_ids: &[Id],
        column_filter: Option<&ColumnPredicate>,
    ) -> Result<Vec<InstanceRow>> {
        let mut sql = format!(
            "SELECT id, type_id, state, parent_id, part_link_id, {} \
             FROM product_instances WHERE type_id = ANY($1)",
            generic_column_list()
        );
        let mut next = 2usize;
        let mut values = Vec::new();
        if let Some(filter) = column_filter {
            let clause = render_predicate(filter, &mut values, &mut next)?;
            sql.push_str(&format!(" AND {clause}"));
        }
        sql.push_str(" ORDER BY id");

        let query = sqlx::query(&sql).bind(type_ids.to_vec());
        let rows = bind_values(query, values)
            .fetch_all(&mut *self.tx)
            .await
            .context("Failed to query product instances")?;

        Ok(rows.iter().map(read_instance_row).collect())
    }

    async fn instance_children(&mut self, parent_id: Id) -> Result<Vec<InstanceRow>> {
        let sql = format!(
            "SELECT id, type_id, state, parent_id, part_link_id, {} \
             FROM product_instances WHERE parent_id = $1 ORDER BY id",
            generic_column_list()
        );
        let rows = sqlx::query(&sql)
            .bind(parent_id)
            .fetch_all(&mut *self.tx)
            .await
            .context("Failed to fetch child instances")?;

        Ok(rows.iter().map(read_instance_row).collect())
    }

    async fn insert_instance(&mut self, row: InstanceRow) -> Result<Id> {
        let sql = format!(
            "INSERT INTO product_instances (type_id, state, parent_id, part_link_id, {}) \
             VALUES ($1, $2, $3, $4, {}) RETURNING id",
            generic_column_list(),
            placeholder_list(5, SLOTS * 3)
        );
        let query = sqlx::query(&sql)
            .bind(row.type_id)
            .bind(row.state)
            .bind(row.parent_id)
            .bind(row.part_link_id);
        let inserted = bind_columns(query, &row.columns)
            .fetch_one(&mut *self.tx)
            .await
            .context("Failed to insert product instance")?;

        Ok(inserted.get("id"))
    }

    async fn update_instance(&mut self, row: &InstanceRow) -> Result<()> {
        let sql = format!(
            "UPDATE product_instances \
             SET type_id = $2, state = $3, parent_id = $4, part_link_id = $5, {} \
             WHERE id = $1",
            generic_column_assignments(6)
        );
        let query = sqlx::query(&sql)
            .bind(row.id)
            .bind(row.type_id)
            .bind(row.state)
            .bind(row.parent_id)
            .bind(row.part_link_id);
        bind_columns(query, &row.columns)
            .execute(&mut *self.tx)
            .await
            .context("Failed to update product instance")?;

        Ok(())
    }

    async fn get_recipe(&mut self, id: Id) -> Result<Option<RecipeRow>> {
        let sql = format!(
            "SELECT id, name, type_name, classification, state, product_id, workplan_id, {} \
             FROM product_recipes WHERE id = $1",
            generic_column_list()
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await
            .context("Failed to fetch recipe")?;

        Ok(row.as_ref().map(read_recipe_row))
    }

    async fn recipes_for_product(&mut self, product_id: Id) -> Result<Vec<RecipeRow>> {
        let sql = format!(
            "SELECT id, name, type_name, classification, state, product_id, workplan_id, {} \
             FROM product_recipes WHERE product_id = $1 ORDER BY id",
            generic_column_list()
        );
        let rows = sqlx::query(&sql)
            .bind(product_id)
            .fetch_all(&mut *self.tx)
            .await
            .context("Failed to fetch recipes of product")?;

        Ok(rows.iter().map(read_recipe_row).collect())
    }

    async fn product_has_recipes(&mut self, product_id: Id) -> Result<bool> {
        let row = sqlx::query("SELECT EXISTS(SELECT 1 FROM product_recipes WHERE product_id = $1)")
            .bind(product_id)
            .fetch_one(&mut *self.tx)
            .await
            .context("Failed to probe recipes of product")?;

        Ok(row.get(0))
    }

    async fn insert_recipe(&mut self, row: RecipeRow) -> Result<Id> {
        let sql = format!(
            "INSERT INTO product_recipes \
             (name, type_name, classification, state, product_id, workplan_id, {}) \
             VALUES ($1, $2, $3, $4, $5, $6, {}) RETURNING id",
            generic_column_list(),
            placeholder_list(7, SLOTS * 3)
        );
        let query = sqlx::query(&sql)
            .bind(row.name)
            .bind(row.type_name)
            .bind(row.classification)
            .bind(row.state)
            .bind(row.product_id)
            .bind(row.workplan_id);
        let inserted = bind_columns(query, &row.columns)
            .fetch_one(&mut *self.tx)
            .await
            .context("Failed to insert recipe")?;

        Ok(inserted.get("id"))
    }

    async fn update_recipe(&mut self, row: &RecipeRow) -> Result<()> {
        let sql = format!(
            "UPDATE product_recipes \
             SET name = $2, type_name = $3, classification = $4, state = $5, \
                 product_id = $6, workplan_id = $7, {} \
             WHERE id = $1",
            generic_column_assignments(8)
        );
        let query = sqlx::query(&sql)
            .bind(row.id)
            .bind(&row.name)
            .bind(&row.type_name)
            .bind(row.classification)
            .bind(row.state)
            .bind(row.product_id)
            .bind(row.workplan_id);
        bind_columns(query, &row.columns)
            .execute(&mut *self.tx)
            .await
            .context("Failed to update recipe")?;

        Ok(())
    }

    async fn delete_recipe(&mut self, id: Id) -> Result<bool> {
        let result = sqlx::query("DELETE FROM product_recipes WHERE id = $1")
            .bind(id)
            .execute(&mut *self.tx)
            .await
            .context("Failed to delete recipe")?;

        Ok(result.rows_affected() > 0)
    }

    async fn get_workplan(&mut self, id: Id) -> Result<Option<WorkplanRow>> {
        let row = sqlx::query("SELECT id, name, version, state FROM workplans WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await
            .context("Failed to fetch workplan")?;

        Ok(row.map(|row| WorkplanRow {
            id: row.get("id"),
            name: row.get("name"),
            version: row.get("version"),
            state: row.get("state"),
        }))
    }

    async fn insert_workplan(&mut self, row: WorkplanRow) -> Result<Id> {
        let inserted = sqlx::query(
            "INSERT INTO workplans (name, version, state) VALUES ($1, $2, $3) RETURNING id",
        )
        .bind(row.name)
        .bind(row.version)
        .bind(row.state)
        .fetch_one(&mut *self.tx)
        .await
        .context("Failed to insert workplan")?;

        Ok(inserted.get("id"))
    }

    async fn update_workplan(&mut self, row: &WorkplanRow) -> Result<()> {
        sqlx::query(
            "UPDATE workplans SET name = $2, version = $3, state = $4 WHERE id = $1",
        )
        .bind(row.id)
        .bind(&row.name)
        .bind(row.version)
        .bind(row.state)
        .execute(&mut *self.tx)
        .await
        .context("Failed to update workplan")?;

        Ok(())
    }

    async fn insert_workplan_reference(&mut self, row: WorkplanReferenceRow) -> Result<Id> {
        let inserted = sqlx::query(
            "INSERT INTO workplan_references (source_id, target_id) \
             VALUES ($1, $2) RETURNING id",
        )
        .bind(row.source_id)
        .bind(row.target_id)
        .fetch_one(&mut *self.tx)
        .await
        .context("Failed to insert workplan reference")?;

        Ok(inserted.get("id"))
    }

    async fn workplan_steps(&mut self, workplan_id: Id) -> Result<Vec<WorkplanStepRow>> {
        let rows = sqlx::query(
            "SELECT id, workplan_id, step_id, name, type_name, parameters, \
                    sub_workplan_id, position \
             FROM workplan_steps WHERE workplan_id = $1 ORDER BY position",
        )
        .bind(workplan_id)
        .fetch_all(&mut *self.tx)
        .await
        .context("Failed to fetch workplan steps")?;

        Ok(rows
            .iter()
            .map(|row| WorkplanStepRow {
                id: row.get("id"),
                workplan_id: row.get("workplan_id"),
                step_id: row.get("step_id"),
                name: row.get("name"),
                type_name: row.get("type_name"),
                parameters: row.get("parameters"),
                sub_workplan_id: row.get("sub_workplan_id"),
                position: row.get("position"),
            })
            .collect())
    }

    async fn workplan_connectors(
        &mut self,
        workplan_id: Id,
    ) -> Result<Vec<WorkplanConnectorRow>> {
        let rows = sqlx::query(
            "SELECT id, workplan_id, connector_id, name, classification \
             FROM workplan_connectors WHERE workplan_id = $1 ORDER BY id",
        )
        .bind(workplan_id)
        .fetch_all(&mut *self.tx)
        .await
        .context("Failed to fetch workplan connectors")?;

        Ok(rows
            .iter()
            .map(|row| WorkplanConnectorRow {
                id: row.get("id"),
                workplan_id: row.get("workplan_id"),
                connector_id: row.get("connector_id"),
                name: row.get("name"),
                classification: row.get("classification"),
            })
            .collect())
    }

    async fn connector_references(
        &mut self,
        step_row_id: Id,
    ) -> Result<Vec<ConnectorReferenceRow>> {
        let rows = sqlx::query(
            "SELECT id, step_row_id, role, slot_index, connector_row_id \
             FROM connector_references WHERE step_row_id = $1 ORDER BY slot_index",
        )
        .bind(step_row_id)
        .fetch_all(&mut *self.tx)
        .await
        .context("Failed to fetch connector references")?;

        rows.iter()
            .map(|row| {
                Ok(ConnectorReferenceRow {
                    id: row.get("id"),
                    step_row_id: row.get("step_row_id"),
                    role: role_from_str(row.get("role"))?,
                    index: row.get("slot_index"),
                    connector_row_id: row.get("connector_row_id"),
                })
            })
            .collect()
    }

    async fn output_descriptions(
        &mut self,
        step_row_id: Id,
    ) -> Result<Vec<OutputDescriptionRow>> {
        let rows = sqlx::query(
            "SELECT id, step_row_id, slot_index, output_type, name, mapping_value \
             FROM output_descriptions WHERE step_row_id = $1 ORDER BY slot_index",
        )
        .bind(step_row_id)
        .fetch_all(&mut *self.tx)
        .await
        .context("Failed to fetch output descriptions")?;

        Ok(rows
            .iter()
            .map(|row| OutputDescriptionRow {
                id: row.get("id"),
                step_row_id: row.get("step_row_id"),
                index: row.get("slot_index"),
                output_type: row.get("output_type"),
                name: row.get("name"),
                mapping_value: row.get("mapping_value"),
            })
            .collect())
    }

    async fn insert_step(&mut self, row: WorkplanStepRow) -> Result<Id> {
        let inserted = sqlx::query(
            "INSERT INTO workplan_steps \
             (workplan_id, step_id, name, type_name, parameters, sub_workplan_id, position) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING id",
        )
        .bind(row.workplan_id)
        .bind(row.step_id)
        .bind(row.name)
        .bind(row.type_name)
        .bind(row.parameters)
        .bind(row.sub_workplan_id)
        .bind(row.position)
        .fetch_one(&mut *self.tx)
        .await
        .context("Failed to insert workplan step")?;

        Ok(inserted.get("id"))
    }

    async fn update_step(&mut self, row: &WorkplanStepRow) -> Result<()> {
        sqlx::query(
            "UPDATE workplan_steps \
             SET workplan_id = $2, step_id = $3, name = $4, type_name = $5, \
                 parameters = $6, sub_workplan_id = $7, position = $8 \
             WHERE id = $1",
        )
        .bind(row.id)
        .bind(row.workplan_id)
        .bind(row.step_id)
        .bind(&row.name)
        .bind(&row.type_name)
        .bind(&row.parameters)
        .bind(row.sub_workplan_id)
        .bind(row.position)
        .execute(&mut *self.tx)
        .await
        .context("Failed to update workplan step")?;

        Ok(())
    }

    async fn delete_step(&mut self, id: Id) -> Result<()> {
        sqlx::query("DELETE FROM connector_references WHERE step_row_id = $1")
            .bind(id)
            .execute(&mut *self.tx)
            .await
            .context("Failed to delete connector references of step")?;
        sqlx::query("DELETE FROM output_descriptions WHERE step_row_id = $1")
            .bind(id)
            .execute(&mut *self.tx)
            .await
            .context("Failed to delete output descriptions of step")?;
        sqlx::query("DELETE FROM workplan_steps WHERE id = $1")
            .bind(id)
            .execute(&mut *self.tx)
            .await
            .context("Failed to delete workplan step")?;

        Ok(())
    }

    async fn insert_connector(&mut self, row: WorkplanConnectorRow) -> Result<Id> {
        let inserted = sqlx::query(
            "INSERT INTO workplan_connectors (workplan_id, connector_id, name, classification) \
             VALUES ($1, $2, $3, $4) RETURNING id",
        )
        .bind(row.workplan_id)
        .bind(row.connector_id)
        .bind(row.name)
        .bind(row.classification)
        .fetch_one(&mut *self.tx)
        .await
        .context("Failed to insert workplan connector")?;

        Ok(inserted.get("id"))
    }

    async fn update_connector(&mut self, row: &WorkplanConnectorRow) -> Result<()> {
        sqlx::query(
            "UPDATE workplan_connectors \
             SET workplan_id = $2, connector_id = $3, name = $4, classification = $5 \
             WHERE id = $1",
        )
        .bind(row.id)
        .bind(row.workplan_id)
        .bind(row.connector_id)
        .bind(&row.name)
        .bind(row.classification)
        .execute(&mut *self.tx)
        .await
        .context("Failed to update workplan connector")?;

        Ok(())
    }

    async fn delete_connector(&mut self, id: Id) -> Result<()> {
        sqlx::query("DELETE FROM workplan_connectors WHERE id = $1")
            .bind(id)
            .execute(&mut *self.tx)
            .await
            .context("Failed to delete workplan connector")?;
        Ok(())
    }

    async fn insert_connector_reference(&mut self, row: ConnectorReferenceRow) -> Result<Id> {
        let inserted = sqlx::query(
            "INSERT INTO connector_references (step_row_id, role, slot_index, connector_row_id) \
             VALUES ($1, $2, $3, $4) RETURNING id",
        )
        .bind(row.step_row_id)
        .bind(role_to_str(row.role))
        .bind(row.index)
        .bind(row.connector_row_id)
        .fetch_one(&mut *self.tx)
        .await
        .context("Failed to insert connector reference")?;

        Ok(inserted.get("id"))
    }

    async fn clear_connector_references(&mut self, step_row_id: Id) -> Result<()> {
        sqlx::query("DELETE FROM connector_references WHERE step_row_id = $1")
            .bind(step_row_id)
            .execute(&mut *self.tx)
            .await
            .context("Failed to clear connector references")?;
        Ok(())
    }

    async fn insert_output_description(&mut self, row: OutputDescriptionRow) -> Result<Id> {
        let inserted = sqlx::query(
            "INSERT INTO output_descriptions \
             (step_row_id, slot_index, output_type, name, mapping_value) \
             VALUES ($1, $2, $3, $4, $5) RETURNING id",
        )
        .bind(row.step_row_id)
        .bind(row.index)
        .bind(row.output_type)
        .bind(row.name)
        .bind(row.mapping_value)
        .fetch_one(&mut *self.tx)
        .await
        .context("Failed to insert output description")?;

        Ok(inserted.get("id"))
    }

    async fn clear_output_descriptions(&mut self, step_row_id: Id) -> Result<()> {
        sqlx::query("DELETE FROM output_descriptions WHERE step_row_id = $1")
            .bind(step_row_id)
            .execute(&mut *self.tx)
            .await
            .context("Failed to clear output descriptions")?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await.context("Failed to commit")?;
        Ok(())
    }
}

fn read_type_row(row: &PgRow) -> ProductTypeRow {
    ProductTypeRow {
        id: row.get("id"),
        identifier: row.get("identifier"),
        revision: row.get("revision"),
        name: row.get("name"),
        type_name: row.get("type_name"),
        current_version_id: row.get("current_version_id"),
        deleted: row.get("deleted"),
    }
}

fn read_link_row(row: &PgRow) -> PartLinkRow {
    PartLinkRow {
        id: row.get("id"),
        parent_id: row.get("parent_id"),
        child_id: row.get("child_id"),
        property_name: row.get("property_name"),
        columns: read_columns(row),
    }
}

fn read_instance_row(row: &PgRow) -> InstanceRow {
    InstanceRow {
        id: row.get("id"),
        type_id: row.get("type_id"),
        state: row.get("state"),
        parent_id: row.get("parent_id"),
        part_link_id: row.get("part_link_id"),
        columns: read_columns(row),
    }
}

fn read_recipe_row(row: &PgRow) -> RecipeRow {
    RecipeRow {
        id: row.get("id"),
        name: row.get("name"),
        type_name: row.get("type_name"),
        classification: row.get("classification"),
        state: row.get("state"),
        product_id: row.get("product_id"),
        workplan_id: row.get("workplan_id"),
        columns: read_columns(row),
    }
}

fn read_columns(row: &PgRow) -> GenericColumns {
    let mut columns = GenericColumns::default();
    for slot in 0..SLOTS as u8 {
        columns.set_integer(
            slot,
            row.get(ColumnRef::Integer(slot).column_name().as_str()),
        );
        columns.set_float(slot, row.get(ColumnRef::Float(slot).column_name().as_str()));
        columns.set_text(slot, row.get(ColumnRef::Text(slot).column_name().as_str()));
    }
    columns
}

fn bind_columns<'q>(mut query: PgQuery<'q>, columns: &GenericColumns) -> PgQuery<'q> {
    for slot in 0..SLOTS {
        query = query.bind(columns.integers[slot]);
    }
    for slot in 0..SLOTS {
        query = query.bind(columns.floats[slot]);
    }
    for slot in 0..SLOTS {
        query = query.bind(columns.texts[slot].clone());
    }
    query
}

fn bind_values(mut query: PgQuery<'_>, values: Vec<SqlValue>) -> PgQuery<'_> {
    for value in values {
        query = match value {
            SqlValue::Int(value) => query.bind(value),
            SqlValue::Float(value) => query.bind(value),
            SqlValue::Text(value) => query.bind(value),
        };
    }
    query
}

/// Bind value collected while rendering a column predicate to SQL.
enum SqlValue {
    Int(i64),
    Float(f64),
    Text(String),
}

/// Render a column predicate as a SQL clause over the generic columns of
/// one wide table. Comparisons whose value does not fit the column family
/// render as FALSE, matching [`ColumnPredicate::matches`].
fn render_predicate(
    predicate: &ColumnPredicate,
    values: &mut Vec<SqlValue>,
    next: &mut usize,
) -> Result<String> {
    match predicate {
        ColumnPredicate::All(predicates) => {
            if predicates.is_empty() {
                return Ok("TRUE".to_string());
            }
            let clauses: Result<Vec<String>> = predicates
                .iter()
                .map(|p| render_predicate(p, values, next))
                .collect();
            Ok(format!("({})", clauses?.join(" AND ")))
        }
        ColumnPredicate::Any(predicates) => {
            if predicates.is_empty() {
                return Ok("FALSE".to_string());
            }
            let clauses: Result<Vec<String>> = predicates
                .iter()
                .map(|p| render_predicate(p, values, next))
                .collect();
            Ok(format!("({})", clauses?.join(" OR ")))
        }
        ColumnPredicate::Compare { column, op, value } => {
            let name = column.column_name();
            let bound = match column {
                ColumnRef::Integer(_) => value.as_integer().map(SqlValue::Int),
                ColumnRef::Float(_) => value.as_float().map(SqlValue::Float),
                ColumnRef::Text(_) => value.as_text().map(|v| SqlValue::Text(v.to_string())),
            };
            let Some(bound) = bound else {
                return Ok("FALSE".to_string());
            };
            let clause = match (column, op) {
                (ColumnRef::Text(_), CompareOp::Eq) => format!("{name} = ${next}"),
                // NULL slots count as different, like the in-memory check.
                (ColumnRef::Text(_), CompareOp::Ne) => {
                    format!("{name} IS DISTINCT FROM ${next}")
                }
                (ColumnRef::Text(_), CompareOp::Contains) => {
                    format!("POSITION(${next} IN {name}) > 0")
                }
                (ColumnRef::Text(_), _) | (_, CompareOp::Contains) => {
                    return Ok("FALSE".to_string());
                }
                (_, CompareOp::Eq) => format!("{name} = ${next}"),
                (_, CompareOp::Ne) => format!("{name} <> ${next}"),
                (_, CompareOp::Gt) => format!("{name} > ${next}"),
                (_, CompareOp::Ge) => format!("{name} >= ${next}"),
                (_, CompareOp::Lt) => format!("{name} < ${next}"),
                (_, CompareOp::Le) => format!("{name} <= ${next}"),
            };
            values.push(bound);
            *next += 1;
            Ok(clause)
        }
    }
}

fn role_to_str(role: ConnectorRole) -> &'static str {
    match role {
        ConnectorRole::Input => "input",
        ConnectorRole::Output => "output",
    }
}

fn role_from_str(value: String) -> Result<ConnectorRole> {
    match value.as_str() {
        "input" => Ok(ConnectorRole::Input),
        "output" => Ok(ConnectorRole::Output),
        other => bail!("Unknown connector role '{other}'"),
    }
}

fn generic_column_list() -> String {
    ["integer", "float", "text"]
        .iter()
        .flat_map(|family| (1..=SLOTS).map(move |slot| format!("{family}{slot}")))
        .join(", ")
}

fn generic_column_assignments(start: usize) -> String {
    generic_column_list()
        .split(", ")
        .enumerate()
        .map(|(offset, name)| format!("{name} = ${}", start + offset))
        .join(", ")
}

fn placeholder_list(start: usize, count: usize) -> String {
    (start..start + count).map(|i| format!("${i}")).join(", ")
}

fn generic_column_ddl() -> String {
    let integers = (1..=SLOTS).map(|slot| format!("integer{slot} BIGINT NOT NULL DEFAULT 0"));
    let floats =
        (1..=SLOTS).map(|slot| format!("float{slot} DOUBLE PRECISION NOT NULL DEFAULT 0"));
    let texts = (1..=SLOTS).map(|slot| format!("text{slot} TEXT"));
    integers.chain(floats).chain(texts).join(", ")
}

fn schema_statements() -> Vec<String> {
    let generic = generic_column_ddl();
    vec![
        "CREATE TABLE IF NOT EXISTS product_types ( \
            id BIGSERIAL PRIMARY KEY, \
            identifier TEXT NOT NULL, \
            revision SMALLINT NOT NULL, \
            name TEXT NOT NULL, \
            type_name TEXT NOT NULL, \
            current_version_id BIGINT, \
            deleted TIMESTAMPTZ)"
            .to_string(),
        "CREATE INDEX IF NOT EXISTS idx_product_types_identity \
            ON product_types (identifier, revision)"
            .to_string(),
        format!(
            "CREATE TABLE IF NOT EXISTS product_type_versions ( \
                id BIGSERIAL PRIMARY KEY, \
                type_id BIGINT NOT NULL REFERENCES product_types(id), \
                state BIGINT NOT NULL DEFAULT 0, \
                created TIMESTAMPTZ NOT NULL, \
                {generic})"
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS part_links ( \
                id BIGSERIAL PRIMARY KEY, \
                parent_id BIGINT NOT NULL REFERENCES product_types(id), \
                child_id BIGINT NOT NULL REFERENCES product_types(id), \
                property_name TEXT NOT NULL, \
                {generic})"
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS product_instances ( \
                id BIGSERIAL PRIMARY KEY, \
                type_id BIGINT NOT NULL REFERENCES product_types(id), \
                state BIGINT NOT NULL DEFAULT 0, \
                parent_id BIGINT REFERENCES product_instances(id) ON DELETE CASCADE, \
                part_link_id BIGINT, \
                {generic})"
        ),
        "CREATE TABLE IF NOT EXISTS workplans ( \
            id BIGSERIAL PRIMARY KEY, \
            name TEXT NOT NULL, \
            version INTEGER NOT NULL DEFAULT 1, \
            state BIGINT NOT NULL DEFAULT 0)"
            .to_string(),
        format!(
            "CREATE TABLE IF NOT EXISTS product_recipes ( \
                id BIGSERIAL PRIMARY KEY, \
                name TEXT NOT NULL, \
                type_name TEXT NOT NULL, \
                classification INTEGER NOT NULL DEFAULT 0, \
                state BIGINT NOT NULL DEFAULT 0, \
                product_id BIGINT NOT NULL REFERENCES product_types(id), \
                workplan_id BIGINT REFERENCES workplans(id), \
                {generic})"
        ),
        "CREATE TABLE IF NOT EXISTS workplan_references ( \
            id BIGSERIAL PRIMARY KEY, \
            source_id BIGINT NOT NULL REFERENCES workplans(id), \
            target_id BIGINT NOT NULL REFERENCES workplans(id))"
            .to_string(),
        "CREATE TABLE IF NOT EXISTS workplan_steps ( \
            id BIGSERIAL PRIMARY KEY, \
            workplan_id BIGINT NOT NULL REFERENCES workplans(id), \
            step_id BIGINT NOT NULL, \
            name TEXT NOT NULL, \
            type_name TEXT NOT NULL, \
            parameters TEXT, \
            sub_workplan_id BIGINT REFERENCES workplans(id), \
            position INTEGER NOT NULL DEFAULT 0)"
            .to_string(),
        "CREATE TABLE IF NOT EXISTS workplan_connectors ( \
            id BIGSERIAL PRIMARY KEY, \
            workplan_id BIGINT NOT NULL REFERENCES workplans(id), \
            connector_id BIGINT NOT NULL, \
            name TEXT NOT NULL, \
            classification BIGINT NOT NULL DEFAULT 0)"
            .to_string(),
        "CREATE TABLE IF NOT EXISTS connector_references ( \
            id BIGSERIAL PRIMARY KEY, \
            step_row_id BIGINT NOT NULL REFERENCES workplan_steps(id), \
            role TEXT NOT NULL, \
            slot_index INTEGER NOT NULL, \
            connector_row_id BIGINT REFERENCES workplan_connectors(id))"
            .to_string(),
        "CREATE TABLE IF NOT EXISTS output_descriptions ( \
            id BIGSERIAL PRIMARY KEY, \
            step_row_id BIGINT NOT NULL REFERENCES workplan_steps(id), \
            slot_index INTEGER NOT NULL, \
            output_type BIGINT NOT NULL, \
            name TEXT NOT NULL, \
            mapping_value BIGINT NOT NULL)"
            .to_string(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::predicate::PropertyValue;

    #[test]
    fn predicate_renders_with_sequential_placeholders() {
        let predicate = ColumnPredicate::All(vec![
            ColumnPredicate::Compare {
                column: ColumnRef::Integer(0),
                op: CompareOp::Ge,
                value: PropertyValue::Integer(5),
            },
            ColumnPredicate::Compare {
                column: ColumnRef::Text(1),
                op: CompareOp::Contains,
                value: PropertyValue::Text("steel".into()),
            },
        ]);

        let mut values = Vec::new();
        let mut next = 2usize;
        let clause = render_predicate(&predicate, &mut values, &mut next).unwrap();

        assert_eq!(clause, "(integer1 >= $2 AND POSITION($3 IN text2) > 0)");
        assert_eq!(values.len(), 2);
        assert_eq!(next, 4);
    }

    #[test]
    fn mismatched_value_renders_false() {
        let predicate = ColumnPredicate::Compare {
            column: ColumnRef::Integer(0),
            op: CompareOp::Eq,
            value: PropertyValue::Text("nope".into()),
        };

        let mut values = Vec::new();
        let mut next = 1usize;
        let clause = render_predicate(&predicate, &mut values, &mut next).unwrap();

        assert_eq!(clause, "FALSE");
        assert!(values.is_empty());
    }

    #[test]
    fn empty_groups_collapse_to_constants() {
        let mut values = Vec::new();
        let mut next = 1usize;
        assert_eq!(
            render_predicate(&ColumnPredicate::All(vec![]), &mut values, &mut next).unwrap(),
            "TRUE"
        );
        assert_eq!(
            render_predicate(&ColumnPredicate::Any(vec![]), &mut values, &mut next).unwrap(),
            "FALSE"
        );
    }
}
