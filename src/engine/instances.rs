use crate::engine::predicate::PropertyPredicate;
use crate::error::Result;
use crate::model::{GenericColumns, Id, InstanceState, ProductInstance};
use crate::store::rows::{InstanceRow, PartLinkRow, ProductTypeRow};
use crate::store::traits::StorageTx;
use crate::strategy::{PartSourcing, StrategyRegistry};
use log::{debug, warn};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

/// Materializes instance rows with their sub-instance trees. Type rows and
/// the type's part links are fetched once per type and cached for the
/// duration of one engine operation.
pub(crate) struct InstanceLoader<'a> {
    registry: &'a StrategyRegistry,
    types: HashMap<Id, Option<ProductTypeRow>>,
    links: HashMap<Id, Vec<PartLinkRow>>,
}

impl<'a> InstanceLoader<'a> {
    pub(crate) fn new(registry: &'a StrategyRegistry) -> Self {
        Self {
            registry,
            types: HashMap::new(),
            links: HashMap::new(),
        }
    }

    async fn type_row(
        &mut self,
        tx: &mut dyn StorageTx,
        type_id: Id,
    ) -> Result<Option<ProductTypeRow>> {
        if let Some(row) = self.types.get(&type_id) {
            return Ok(row.clone());
        }
        let row = tx.get_type(type_id).await?;
        self.types.insert(type_id, row.clone());
        Ok(row)
    }

    async fn type_links(
        &mut self,
        tx: &mut dyn StorageTx,
        type_id: Id,
    ) -> Result<Vec<PartLinkRow>> {
        if let Some(links) = self.links.get(&type_id) {
            return Ok(links.clone());
        }
        let links = tx.links_for_parent(type_id).await?;
        self.links.insert(type_id, links.clone());
        Ok(links)
    }

    /// Materialize one row; `None` when its type row is gone or carries no
    /// configured instance strategy.
    pub(crate) fn load<'s>(
        &'s mut self,
        tx: &'s mut dyn StorageTx,
        row: InstanceRow,
    ) -> Pin<Box<dyn Future<Output = Result<Option<ProductInstance>>> + Send + 's>> {
        Box::pin(async move {
            let Some(type_row) = self.type_row(&mut *tx, row.type_id).await? else {
                warn!("instance {} references missing type {}", row.id, row.type_id);
                return Ok(None);
            };
            let Some(strategy) = self.registry.try_instance_strategy(&type_row.type_name) else {
                debug!(
                    "skipping instance {} of unconfigured type '{}'",
                    row.id, type_row.type_name
                );
                return Ok(None);
            };
            let strategy = strategy.clone();

            let mut data = strategy.new_data();
            strategy.load_instance(&row.columns, data.as_mut())?;

            let mut instance = ProductInstance {
                id: row.id,
                type_id: row.type_id,
                type_name: type_row.type_name.clone(),
                identity: None,
                state: InstanceState::from_raw(row.state),
                part_link_id: row.part_link_id,
                data,
                parts: Vec::new(),
            };

            let children = tx.instance_children(row.id).await?;
            if !children.is_empty() {
                let type_links = self.type_links(&mut *tx, row.type_id).await?;
                let entity_sourced = self
                    .registry
                    .link_strategies(&type_row.type_name)
                    .iter()
                    .any(|s| s.part_sourcing() == PartSourcing::FromEntities);
                for child in children {
                    // A child bound to a part link that no longer exists was
                    // dropped from the bill of materials; only entity-sourced
                    // structures keep it, the stored rows being authoritative
                    // there.
                    let include = match child.part_link_id {
                        None => true,
                        Some(link_id) => {
                            type_links.iter().any(|l| l.id == link_id) || entity_sourced
                        }
                    };
                    if !include {
                        continue;
                    }
                    if let Some(part) = self.load(&mut *tx, child).await? {
                        instance.parts.push(part);
                    }
                }
            }

            Ok(Some(instance))
        })
    }
}

/// Persist one instance and its sub-tree. Types whose instance strategy
/// opts out of persistence are skipped together with their subtree.
pub(crate) fn save_instance<'s>(
    registry: &'s StrategyRegistry,
    tx: &'s mut dyn StorageTx,
    instance: &'s mut ProductInstance,
    parent_id: Option<Id>,
) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 's>> {
    Box::pin(async move {
        let strategy = registry.instance_strategy(&instance.type_name)?.clone();
        if strategy.skip_instances() {
            debug!(
                "instances of '{}' are configured as not persisted",
                instance.type_name
            );
            return Ok(());
        }

        let mut columns = GenericColumns::default();
        strategy.save_instance(instance.data.as_ref(), &mut columns)?;

        let row = InstanceRow {
            id: instance.id,
            type_id: instance.type_id,
            state: instance.state.as_raw(),
            parent_id,
            part_link_id: instance.part_link_id,
            columns,
        };
        if instance.id == 0 {
            instance.id = tx.insert_instance(row).await?;
        } else {
            tx.update_instance(&row).await?;
        }

        let parent = instance.id;
        for part in &mut instance.parts {
            save_instance(registry, &mut *tx, part, Some(parent)).await?;
        }
        Ok(())
    })
}

/// Query instances of a type (and its registered subtypes) with optional
/// per-type predicate pushdown and re-check.
pub(crate) async fn query_instances(
    registry: &StrategyRegistry,
    tx: &mut dyn StorageTx,
    type_name: &str,
    filter: Option<&PropertyPredicate>,
) -> Result<Vec<ProductInstance>> {
    let mut names = registry.hierarchy().derived_of(type_name);
    if names.is_empty() {
        names.push(type_name.to_string());
    }

    let mut loader = InstanceLoader::new(registry);
    let mut results = Vec::new();
    for name in names {
        let Some(strategy) = registry.try_instance_strategy(&name) else {
            continue;
        };
        let strategy = strategy.clone();

        let selection = [name.clone()];
        let type_rows = tx.list_types(Some(&selection), None).await?;
        if type_rows.is_empty() {
            continue;
        }
        let type_ids: Vec<Id> = type_rows.iter().map(|row| row.id).collect();

        let pushdown = match filter {
            Some(predicate) => match strategy.translate_predicate(predicate) {
                Ok(column_filter) => Some(column_filter),
                Err(err) => {
                    debug!("no instance pushdown for '{name}': {err}");
                    None
                }
            },
            None => None,
        };

        for row in tx.query_instances(&type_ids, pushdown.as_ref()).await? {
            let Some(instance) = loader.load(&mut *tx, row).await? else {
                continue;
            };
            let keep = match filter {
                Some(predicate) => strategy.matches(instance.data.as_ref(), predicate)?,
                None => true,
            };
            if keep {
                results.push(instance);
            }
        }
    }
    Ok(results)
}
