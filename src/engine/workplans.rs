use crate::error::{Result, StorageError};
use crate::model::{
    Connector, ConnectorClassification, ConnectorRef, Id, OutputDescription, OutputType,
    StepKind, StepRegistry, Workplan, WorkplanState, WorkplanStep,
};
use crate::store::rows::{
    ConnectorReferenceRow, ConnectorRole, OutputDescriptionRow, WorkplanConnectorRow,
    WorkplanReferenceRow, WorkplanRow, WorkplanStepRow,
};
use crate::store::traits::StorageTx;
use anyhow::anyhow;
use log::debug;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Persist a workplan graph. A bumped version never rewrites the stored
/// plan: it creates a fresh row and records a version edge from old to new.
/// Within one version, steps and connectors are upserted by their stable
/// author-assigned ids and removed when gone.
pub(crate) fn save_workplan<'s>(
    tx: &'s mut dyn StorageTx,
    workplan: &'s mut Workplan,
) -> Pin<Box<dyn Future<Output = Result<Id>> + Send + 's>> {
    Box::pin(async move {
        let target_id = if workplan.id == 0 {
            tx.insert_workplan(WorkplanRow {
                id: 0,
                name: workplan.name.clone(),
                version: workplan.version,
                state: workplan.state.as_raw(),
            })
            .await?
        } else {
            let existing = tx
                .get_workplan(workplan.id)
                .await?
                .ok_or_else(|| StorageError::Store(anyhow!("workplan {} not found", workplan.id)))?;
            if workplan.version > existing.version {
                let new_id = tx
                    .insert_workplan(WorkplanRow {
                        id: 0,
                        name: workplan.name.clone(),
                        version: workplan.version,
                        state: workplan.state.as_raw(),
                    })
                    .await?;
                tx.insert_workplan_reference(WorkplanReferenceRow {
                    id: 0,
                    source_id: workplan.id,
                    target_id: new_id,
                })
                .await?;
                debug!(
                    "workplan '{}' version {} persisted as new row {}",
                    workplan.name, workplan.version, new_id
                );
                new_id
            } else {
                tx.update_workplan(&WorkplanRow {
                    id: workplan.id,
                    name: workplan.name.clone(),
                    version: workplan.version,
                    state: workplan.state.as_raw(),
                })
                .await?;
                workplan.id
            }
        };
        workplan.id = target_id;

        let existing_steps = tx.workplan_steps(target_id).await?;
        let existing_connectors = tx.workplan_connectors(target_id).await?;

        // Removed steps go first so their wiring rows do not pin connectors.
        let current_step_ids: HashSet<i64> =
            workplan.steps.iter().map(|s| s.id as i64).collect();
        for stale in existing_steps
            .iter()
            .filter(|s| !current_step_ids.contains(&s.step_id))
        {
            tx.delete_step(stale.id).await?;
        }

        // Connectors reachable from the plan or any step slot, deduplicated
        // by handle identity.
        let mut referenced: Vec<ConnectorRef> = workplan.connectors.clone();
        for step in &workplan.steps {
            for slot in step.inputs.iter().chain(step.outputs.iter()).flatten() {
                if !referenced.iter().any(|c| Arc::ptr_eq(c, slot)) {
                    referenced.push(slot.clone());
                }
            }
        }

        let mut connector_rows: HashMap<i64, Id> = existing_connectors
            .iter()
            .map(|c| (c.connector_id, c.id))
            .collect();
        let mut live_ids: HashSet<i64> = HashSet::new();
        for connector in &referenced {
            let snapshot = connector.read().clone();
            let stable = snapshot.id as i64;
            live_ids.insert(stable);
            let row = WorkplanConnectorRow {
                id: connector_rows.get(&stable).copied().unwrap_or(0),
                workplan_id: target_id,
                connector_id: stable,
                name: snapshot.name,
                classification: snapshot.classification.as_raw(),
            };
            if row.id == 0 {
                let id = tx.insert_connector(row).await?;
                connector_rows.insert(stable, id);
            } else {
                tx.update_connector(&row).await?;
            }
        }

        let step_rows: HashMap<i64, Id> = existing_steps
            .into_iter()
            .map(|s| (s.step_id, s.id))
            .collect();
        for (position, step) in workplan.steps.iter_mut().enumerate() {
            let (parameters, sub_workplan_id) = match &mut step.kind {
                StepKind::Task { parameters, .. } => {
                    (Some(serde_json::to_string(parameters)?), None)
                }
                StepKind::SubWorkplan { workplan } => {
                    let sub_id = save_workplan(&mut *tx, workplan).await?;
                    (None, Some(sub_id))
                }
            };
            let mut row = WorkplanStepRow {
                id: step_rows.get(&(step.id as i64)).copied().unwrap_or(0),
                workplan_id: target_id,
                step_id: step.id as i64,
                name: step.name.clone(),
                type_name: step.type_name.clone(),
                parameters,
                sub_workplan_id,
                position: position as i32,
            };
            if row.id == 0 {
                row.id = tx.insert_step(row.clone()).await?;
            } else {
                tx.update_step(&row).await?;
            }

            // Wiring and output descriptions are rewritten wholesale; they
            // are small and positional.
            tx.clear_connector_references(row.id).await?;
            save_slots(tx, row.id, ConnectorRole::Input, &step.inputs, &connector_rows).await?;
            save_slots(tx, row.id, ConnectorRole::Output, &step.outputs, &connector_rows).await?;

            tx.clear_output_descriptions(row.id).await?;
            if let StepKind::Task {
                output_descriptions,
                ..
            } = &step.kind
            {
                for (index, output) in output_descriptions.iter().enumerate() {
                    tx.insert_output_description(OutputDescriptionRow {
                        id: 0,
                        step_row_id: row.id,
                        index: index as i32,
                        output_type: output.output_type.as_raw(),
                        name: output.name.clone(),
                        mapping_value: output.mapping_value,
                    })
                    .await?;
                }
            }
        }

        for stale in existing_connectors
            .iter()
            .filter(|c| !live_ids.contains(&c.connector_id))
        {
            tx.delete_connector(stale.id).await?;
        }

        Ok(target_id)
    })
}

async fn save_slots(
    tx: &mut dyn StorageTx,
    step_row_id: Id,
    role: ConnectorRole,
    slots: &[Option<ConnectorRef>],
    connector_rows: &HashMap<i64, Id>,
) -> Result<()> {
    for (index, slot) in slots.iter().enumerate() {
        let connector_row_id = slot
            .as_ref()
            .and_then(|c| connector_rows.get(&(c.read().id as i64)).copied());
        tx.insert_connector_reference(ConnectorReferenceRow {
            id: 0,
            step_row_id,
            role,
            index: index as i32,
            connector_row_id,
        })
        .await?;
    }
    Ok(())
}

/// Rehydrate a persisted workplan. Connector handles are shared: every slot
/// referencing the same connector row resolves to the same `ConnectorRef`.
pub(crate) fn load_workplan<'s>(
    tx: &'s mut dyn StorageTx,
    steps: &'s StepRegistry,
    id: Id,
) -> Pin<Box<dyn Future<Output = Result<Option<Workplan>>> + Send + 's>> {
    Box::pin(async move {
        let Some(row) = tx.get_workplan(id).await? else {
            return Ok(None);
        };

        let mut connectors = Vec::new();
        let mut by_row_id: HashMap<Id, ConnectorRef> = HashMap::new();
        for connector_row in tx.workplan_connectors(id).await? {
            let handle = Connector::new(
                connector_row.connector_id as u64,
                connector_row.name,
                ConnectorClassification::from_raw(connector_row.classification),
            );
            by_row_id.insert(connector_row.id, handle.clone());
            connectors.push(handle);
        }

        let mut plan_steps = Vec::new();
        for step_row in tx.workplan_steps(id).await? {
            let kind = match step_row.sub_workplan_id {
                Some(sub_id) => {
                    let workplan = load_workplan(&mut *tx, steps, sub_id)
                        .await?
                        .ok_or_else(|| {
                            StorageError::Store(anyhow!("workplan {sub_id} not found"))
                        })?;
                    StepKind::SubWorkplan { workplan }
                }
                None => {
                    let parameters = steps
                        .rehydrate_parameters(&step_row.type_name, step_row.parameters.as_deref())?;
                    let output_descriptions = tx
                        .output_descriptions(step_row.id)
                        .await?
                        .into_iter()
                        .map(|o| OutputDescription {
                            output_type: OutputType::from_raw(o.output_type),
                            name: o.name,
                            mapping_value: o.mapping_value,
                        })
                        .collect();
                    StepKind::Task {
                        parameters,
                        output_descriptions,
                    }
                }
            };

            let mut inputs: Vec<Option<ConnectorRef>> = Vec::new();
            let mut outputs: Vec<Option<ConnectorRef>> = Vec::new();
            for reference in tx.connector_references(step_row.id).await? {
                let slot = reference
                    .connector_row_id
                    .and_then(|cid| by_row_id.get(&cid).cloned());
                let list = match reference.role {
                    ConnectorRole::Input => &mut inputs,
                    ConnectorRole::Output => &mut outputs,
                };
                let index = reference.index as usize;
                if list.len() <= index {
                    list.resize(index + 1, None);
                }
                list[index] = slot;
            }

            plan_steps.push(WorkplanStep {
                id: step_row.step_id as u64,
                name: step_row.name,
                type_name: step_row.type_name,
                kind,
                inputs,
                outputs,
            });
        }

        Ok(Some(Workplan {
            id: row.id,
            name: row.name,
            version: row.version,
            state: WorkplanState::from_raw(row.state),
            steps: plan_steps,
            connectors,
        }))
    })
}
