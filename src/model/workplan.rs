use crate::error::{Result, StorageError};
use crate::model::Id;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Shared handle to a workplan connector. Connectors referenced by several
/// steps resolve to the same handle after load, so rewiring one input is
/// visible everywhere.
pub type ConnectorRef = Arc<RwLock<Connector>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectorClassification {
    Start,
    End,
    Failed,
    Intermediate,
}

impl ConnectorClassification {
    pub fn as_raw(self) -> i64 {
        match self {
            ConnectorClassification::Start => 0,
            ConnectorClassification::End => 1,
            ConnectorClassification::Failed => 2,
            ConnectorClassification::Intermediate => 3,
        }
    }

    pub fn from_raw(raw: i64) -> Self {
        match raw {
            0 => ConnectorClassification::Start,
            1 => ConnectorClassification::End,
            2 => ConnectorClassification::Failed,
            _ => ConnectorClassification::Intermediate,
        }
    }
}

/// Named node wiring workplan steps together. The id is assigned by the
/// workplan author and is stable across saves; it is not the row id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Connector {
    pub id: u64,
    pub name: String,
    pub classification: ConnectorClassification,
}

impl Connector {
    pub fn new(id: u64, name: impl Into<String>, classification: ConnectorClassification) -> ConnectorRef {
        Arc::new(RwLock::new(Self {
            id,
            name: name.into(),
            classification,
        }))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkplanState {
    New,
    Released,
    Revoked,
}

impl WorkplanState {
    pub fn as_raw(self) -> i64 {
        match self {
            WorkplanState::New => 0,
            WorkplanState::Released => 1,
            WorkplanState::Revoked => 2,
        }
    }

    pub fn from_raw(raw: i64) -> Self {
        match raw {
            1 => WorkplanState::Released,
            2 => WorkplanState::Revoked,
            _ => WorkplanState::New,
        }
    }
}

/// Role of a step output when mapped onto the process result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputType {
    Success,
    Failure,
    Scrap,
}

impl OutputType {
    pub fn as_raw(self) -> i64 {
        match self {
            OutputType::Success => 0,
            OutputType::Failure => 1,
            OutputType::Scrap => 2,
        }
    }

    pub fn from_raw(raw: i64) -> Self {
        match raw {
            1 => OutputType::Failure,
            2 => OutputType::Scrap,
            _ => OutputType::Success,
        }
    }
}

/// Ordered description of one task-step output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputDescription {
    pub output_type: OutputType,
    pub name: String,
    pub mapping_value: i64,
}

/// Payload of a workplan step. Task steps carry JSON-encoded parameters
/// and ordered output descriptions; sub-workplan steps embed another full
/// workplan by reference.
#[derive(Debug, Clone)]
pub enum StepKind {
    Task {
        parameters: serde_json::Value,
        output_descriptions: Vec<OutputDescription>,
    },
    SubWorkplan {
        workplan: Workplan,
    },
}

/// A step in a workplan graph. Inputs and outputs reference connectors by
/// position; unconnected slots stay `None`.
#[derive(Debug, Clone)]
pub struct WorkplanStep {
    /// Author-assigned stable id, the upsert key across saves.
    pub id: u64,
    pub name: String,
    /// Tag resolved through the [`StepRegistry`] when loading.
    pub type_name: String,
    pub kind: StepKind,
    pub inputs: Vec<Option<ConnectorRef>>,
    pub outputs: Vec<Option<ConnectorRef>>,
}

/// A versioned step/connector process graph. Saving a bumped version
/// creates a new row with a version reference from old to new; persisted
/// versions are never rewritten.
#[derive(Debug, Clone)]
pub struct Workplan {
    pub id: Id,
    pub name: String,
    pub version: i32,
    pub state: WorkplanState,
    pub steps: Vec<WorkplanStep>,
    pub connectors: Vec<ConnectorRef>,
}

impl Workplan {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: 0,
            name: name.into(),
            version: 1,
            state: WorkplanState::New,
            steps: Vec::new(),
            connectors: Vec::new(),
        }
    }
}

/// Registry of loadable step types, the replacement for resolving a step's
/// recorded assembly/namespace/class name at runtime. Registered per
/// deployment, queried when a persisted step is rehydrated.
#[derive(Debug, Default)]
pub struct StepRegistry {
    steps: HashMap<String, StepDescriptor>,
}

/// What the registry knows about one step type.
#[derive(Debug, Clone)]
pub struct StepDescriptor {
    /// Parameter object in its default shape; stored JSON is deserialized
    /// over it in place.
    pub default_parameters: serde_json::Value,
}

impl StepRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, type_name: impl Into<String>, descriptor: StepDescriptor) {
        self.steps.insert(type_name.into(), descriptor);
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.steps.contains_key(type_name)
    }

    /// Rehydrate the parameter object of a persisted step: start from the
    /// registered default shape and overlay the stored JSON fields.
    pub fn rehydrate_parameters(
        &self,
        type_name: &str,
        stored: Option<&str>,
    ) -> Result<serde_json::Value> {
        let descriptor = self
            .steps
            .get(type_name)
            .ok_or_else(|| StorageError::UnknownStepType(type_name.to_string()))?;

        let mut parameters = descriptor.default_parameters.clone();
        if let Some(stored) = stored {
            let overlay: serde_json::Value = serde_json::from_str(stored)?;
            merge_parameters(&mut parameters, overlay);
        }
        Ok(parameters)
    }
}

fn merge_parameters(target: &mut serde_json::Value, overlay: serde_json::Value) {
    match (target, overlay) {
        (serde_json::Value::Object(target), serde_json::Value::Object(overlay)) => {
            for (key, value) in overlay {
                match target.get_mut(&key) {
                    Some(slot) => merge_parameters(slot, value),
                    None => {
                        target.insert(key, value);
                    }
                }
            }
        }
        (target, overlay) => *target = overlay,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parameters_overlay_defaults() {
        let mut registry = StepRegistry::new();
        registry.register(
            "MountStep",
            StepDescriptor {
                default_parameters: json!({"torque": 1.5, "retries": 3}),
            },
        );

        let parameters = registry
            .rehydrate_parameters("MountStep", Some(r#"{"torque": 2.0}"#))
            .unwrap();
        assert_eq!(parameters, json!({"torque": 2.0, "retries": 3}));
    }

    #[test]
    fn unknown_step_type_fails() {
        let registry = StepRegistry::new();
        let err = registry.rehydrate_parameters("Missing", None).unwrap_err();
        assert!(matches!(
            err,
            crate::error::StorageError::UnknownStepType(_)
        ));
    }
}
