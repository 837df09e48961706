use crate::model::{GenericColumns, Id};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Product type row. Custom columns live on the version sub-rows, the type
/// row itself only carries identity and the mutable name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductTypeRow {
    pub id: Id,
    pub identifier: String,
    pub revision: i16,
    pub name: String,
    pub type_name: String,
    pub current_version_id: Option<Id>,
    /// Soft-delete marker; set rows are invisible to identity lookups.
    pub deleted: Option<DateTime<Utc>>,
}

/// One version of a type's properties: the generic columns plus state.
/// Version history is append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeVersionRow {
    pub id: Id,
    pub type_id: Id,
    pub state: i64,
    pub columns: GenericColumns,
    pub created: DateTime<Utc>,
}

/// Directed part edge between two type rows, keyed by the declaring
/// property; collection properties share `(parent_id, property_name)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartLinkRow {
    pub id: Id,
    pub parent_id: Id,
    pub child_id: Id,
    pub property_name: String,
    pub columns: GenericColumns,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceRow {
    pub id: Id,
    pub type_id: Id,
    pub state: i64,
    /// Parent instance, cascade-deleted with it.
    pub parent_id: Option<Id>,
    /// Back-reference to the part link that produced this unit as a part.
    pub part_link_id: Option<Id>,
    pub columns: GenericColumns,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecipeRow {
    pub id: Id,
    pub name: String,
    pub type_name: String,
    pub classification: i32,
    pub state: i64,
    pub product_id: Id,
    pub workplan_id: Option<Id>,
    pub columns: GenericColumns,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkplanRow {
    pub id: Id,
    pub name: String,
    pub version: i32,
    pub state: i64,
}

/// Version edge between two persisted workplans (old to new).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkplanReferenceRow {
    pub id: Id,
    pub source_id: Id,
    pub target_id: Id,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkplanStepRow {
    pub id: Id,
    pub workplan_id: Id,
    /// Author-assigned stable step id, the upsert key.
    pub step_id: i64,
    pub name: String,
    pub type_name: String,
    /// JSON-encoded parameters of task steps.
    pub parameters: Option<String>,
    /// Referenced workplan of sub-workplan steps.
    pub sub_workplan_id: Option<Id>,
    pub position: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkplanConnectorRow {
    pub id: Id,
    pub workplan_id: Id,
    /// Author-assigned stable connector id, the upsert key.
    pub connector_id: i64,
    pub name: String,
    pub classification: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectorRole {
    Input,
    Output,
}

/// Positional wiring of a step slot to a connector row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectorReferenceRow {
    pub id: Id,
    pub step_row_id: Id,
    pub role: ConnectorRole,
    pub index: i32,
    /// `None` models an unconnected slot.
    pub connector_row_id: Option<Id>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputDescriptionRow {
    pub id: Id,
    pub step_row_id: Id,
    pub index: i32,
    pub output_type: i64,
    pub name: String,
    pub mapping_value: i64,
}
