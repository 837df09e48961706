use crate::error::{Result, StorageError};
use crate::model::{
    identifier_matches, GenericColumns, Id, Identity, PartLink, PartProperty, ProductIdentity,
    ProductQuery, ProductRef, ProductState, ProductType, RecipeFilter, RevisionFilter, Selector,
};
use crate::store::rows::{PartLinkRow, ProductTypeRow, TypeVersionRow};
use crate::store::traits::StorageTx;
use crate::strategy::StrategyRegistry;
use chrono::Utc;
use log::{debug, warn};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Materializes product type rows into shared handles. One loader serves one
/// engine operation; its cache guarantees that every row materializes at most
/// once, which both preserves reference identity for shared subtrees and
/// terminates cyclic part structures.
pub(crate) struct TypeLoader<'a> {
    registry: &'a StrategyRegistry,
    cache: HashMap<Id, ProductRef>,
}

impl<'a> TypeLoader<'a> {
    pub(crate) fn new(registry: &'a StrategyRegistry) -> Self {
        Self {
            registry,
            cache: HashMap::new(),
        }
    }

    pub(crate) fn load<'s>(
        &'s mut self,
        tx: &'s mut dyn StorageTx,
        id: Id,
    ) -> Pin<Box<dyn Future<Output = Result<Option<ProductRef>>> + Send + 's>> {
        Box::pin(async move {
            if let Some(handle) = self.cache.get(&id) {
                return Ok(Some(handle.clone()));
            }
            let Some(row) = tx.get_type(id).await? else {
                return Ok(None);
            };
            self.materialize(tx, row).await.map(Some)
        })
    }

    async fn materialize(
        &mut self,
        tx: &mut dyn StorageTx,
        row: ProductTypeRow,
    ) -> Result<ProductRef> {
        let strategy = self.registry.type_strategy(&row.type_name)?.clone();

        let version = match row.current_version_id {
            Some(version_id) => tx.get_version(version_id).await?,
            None => None,
        };
        let columns = version
            .as_ref()
            .map(|v| v.columns.clone())
            .unwrap_or_default();
        let state = ProductState::from_raw(version.as_ref().map(|v| v.state).unwrap_or(0));

        let mut data = strategy.new_data();
        strategy.load_type(&columns, data.as_mut())?;

        let handle = ProductType {
            id: row.id,
            identity: Identity::Product(ProductIdentity::new(row.identifier, row.revision)),
            name: row.name,
            state,
            type_name: row.type_name.clone(),
            data,
            parts: BTreeMap::new(),
        }
        .into_ref();
        // The handle enters the cache before its parts load, so a part that
        // points back at this row resolves instead of recursing forever.
        self.cache.insert(row.id, handle.clone());

        let link_rows = tx.links_for_parent(row.id).await?;
        let strategies = self.registry.link_strategies(&row.type_name).to_vec();
        for link_strategy in &strategies {
            let property = link_strategy.property_name().to_string();
            let mut links = Vec::new();
            for link_row in link_rows.iter().filter(|l| l.property_name == property) {
                let Some(child) = self.load(&mut *tx, link_row.child_id).await? else {
                    warn!(
                        "part link {} ('{}') references missing child type {}",
                        link_row.id, property, link_row.child_id
                    );
                    continue;
                };
                let mut data = link_strategy.new_data();
                link_strategy.load_part_link(&link_row.columns, data.as_mut())?;
                links.push(PartLink {
                    id: link_row.id,
                    child,
                    data,
                });
            }
            let mut product = handle.write();
            if link_strategy.collection() {
                product.set_part_collection(property, links);
            } else {
                product.set_single_part(property, links.into_iter().next());
            }
        }

        Ok(handle)
    }
}

/// Persists product type graphs recursively. The saved-handles cache makes
/// a subtree shared between two parents persist exactly once per call, and
/// terminates cyclic structures the same way the loader does.
pub(crate) struct TypeSaver<'a> {
    registry: &'a StrategyRegistry,
    saved: HashMap<usize, Id>,
}

impl<'a> TypeSaver<'a> {
    pub(crate) fn new(registry: &'a StrategyRegistry) -> Self {
        Self {
            registry,
            saved: HashMap::new(),
        }
    }

    pub(crate) fn save<'s>(
        &'s mut self,
        tx: &'s mut dyn StorageTx,
        product: ProductRef,
    ) -> Pin<Box<dyn Future<Output = Result<Id>> + Send + 's>> {
        Box::pin(async move {
            let key = Arc::as_ptr(&product) as usize;
            if let Some(id) = self.saved.get(&key) {
                return Ok(*id);
            }

            let snapshot = product.read().clone();
            let identity = snapshot
                .identity
                .as_product()
                .ok_or_else(|| {
                    StorageError::UnsupportedIdentity(format!("{:?}", snapshot.identity))
                })?
                .clone();
            let strategy = self.registry.type_strategy(&snapshot.type_name)?.clone();

            // Rows are found by identity, never by a previously assigned id.
            // A loaded product whose revision was bumped gets a fresh row
            // while the old revision stays untouched.
            let existing = tx
                .find_type_by_identity(&identity.identifier, identity.revision)
                .await?;

            let mut row = match existing {
                Some(mut row) => {
                    if row.name != snapshot.name {
                        row.name = snapshot.name.clone();
                        tx.update_type(&row).await?;
                    }
                    row
                }
                None => {
                    let mut row = ProductTypeRow {
                        id: 0,
                        identifier: identity.identifier.clone(),
                        revision: identity.revision,
                        name: snapshot.name.clone(),
                        type_name: snapshot.type_name.clone(),
                        current_version_id: None,
                        deleted: None,
                    };
                    row.id = tx.insert_type(row.clone()).await?;
                    debug!("created type row {} for {}", row.id, identity);
                    row
                }
            };
            let type_id = row.id;
            self.saved.insert(key, type_id);

            // Versions are append-only: a new sub-row only when the state or
            // the strategy-written columns differ from the current version.
            let current = match row.current_version_id {
                Some(version_id) => tx.get_version(version_id).await?,
                None => None,
            };
            let needs_version = match &current {
                Some(version) => {
                    version.state != snapshot.state.as_raw()
                        || strategy.has_changed(snapshot.data.as_ref(), &version.columns)?
                }
                None => true,
            };
            if needs_version {
                let mut columns = current.map(|v| v.columns).unwrap_or_default();
                strategy.save_type(snapshot.data.as_ref(), &mut columns)?;
                let version_id = tx
                    .insert_version(TypeVersionRow {
                        id: 0,
                        type_id,
                        state: snapshot.state.as_raw(),
                        columns,
                        created: Utc::now(),
                    })
                    .await?;
                row.current_version_id = Some(version_id);
                tx.update_type(&row).await?;
            }

            // Children first, then diff the link rows per configured property
            // keyed by row id: zero ids insert, known ids update, stored rows
            // no longer referenced are removed.
            let existing_links = tx.links_for_parent(type_id).await?;
            let strategies = self.registry.link_strategies(&snapshot.type_name).to_vec();
            let mut kept: HashSet<Id> = HashSet::new();
            let mut assigned: Vec<(String, usize, Id)> = Vec::new();
            for link_strategy in &strategies {
                let property = link_strategy.property_name().to_string();
                let links: Vec<PartLink> = match snapshot.parts.get(&property) {
                    Some(PartProperty::Single(link)) => link.clone().into_iter().collect(),
                    Some(PartProperty::Collection(links)) => links.clone(),
                    None => Vec::new(),
                };
                for (position, link) in links.iter().enumerate() {
                    let child_id = self.save(&mut *tx, link.child.clone()).await?;
                    let mut columns = GenericColumns::default();
                    link_strategy.save_part_link(link.data.as_ref(), &mut columns)?;
                    let link_row = PartLinkRow {
                        id: link.id,
                        parent_id: type_id,
                        child_id,
                        property_name: property.clone(),
                        columns,
                    };
                    let link_id = if link.id == 0 {
                        let id = tx.insert_link(link_row).await?;
                        assigned.push((property.clone(), position, id));
                        id
                    } else {
                        tx.update_link(&link_row).await?;
                        link.id
                    };
                    kept.insert(link_id);
                }

                let orphaned: Vec<PartLinkRow> = existing_links
                    .iter()
                    .filter(|l| l.property_name == property && !kept.contains(&l.id))
                    .cloned()
                    .collect();
                if !orphaned.is_empty() {
                    link_strategy.delete_part_links(&orphaned)?;
                    for orphan in &orphaned {
                        tx.delete_link(orphan.id).await?;
                    }
                }
            }

            // Backfill database ids into the shared handle.
            {
                let mut product = product.write();
                product.id = type_id;
                for (property, position, link_id) in assigned {
                    match product.parts.get_mut(&property) {
                        Some(PartProperty::Single(Some(link))) if position == 0 => {
                            link.id = link_id;
                        }
                        Some(PartProperty::Collection(links)) => {
                            if let Some(link) = links.get_mut(position) {
                                link.id = link_id;
                            }
                        }
                        _ => {}
                    }
                }
            }

            Ok(type_id)
        })
    }
}

/// The `load_types` pipeline: row filters, per-type predicate pushdown,
/// materialization, predicate re-check and selector redirection.
pub(crate) async fn load_types(
    registry: &StrategyRegistry,
    tx: &mut dyn StorageTx,
    query: &ProductQuery,
) -> Result<Vec<ProductRef>> {
    let type_names: Option<Vec<String>> = query.type_name.as_ref().map(|root| {
        if query.exclude_derived_types {
            vec![root.clone()]
        } else {
            registry.expand_type_names(root)
        }
    });

    let mut rows: Vec<ProductTypeRow> = Vec::new();
    match (&type_names, &query.property_filter) {
        (Some(names), Some(filter)) => {
            // Pushdown happens per type name because every type translates
            // the predicate through its own strategy. A strategy that cannot
            // lower the predicate falls back to the re-check alone.
            for name in names {
                let Some(strategy) = registry.try_type_strategy(name) else {
                    continue;
                };
                let pushdown = match strategy.translate_predicate(filter) {
                    Ok(column_filter) => Some(column_filter),
                    Err(err) => {
                        debug!("no pushdown for '{name}': {err}");
                        None
                    }
                };
                let names = [name.clone()];
                rows.extend(tx.list_types(Some(&names), pushdown.as_ref()).await?);
            }
        }
        (Some(names), None) => {
            rows = tx.list_types(Some(names), None).await?;
        }
        (None, _) => {
            rows = tx.list_types(None, None).await?;
        }
    }

    if let Some(pattern) = &query.identifier {
        rows.retain(|row| identifier_matches(pattern, &row.identifier));
    }
    if let Some(name) = &query.name {
        let needle = name.to_lowercase();
        rows.retain(|row| row.name.to_lowercase().contains(&needle));
    }
    match query.revision_filter {
        RevisionFilter::All => {}
        RevisionFilter::Specific => rows.retain(|row| row.revision == query.revision),
        RevisionFilter::Latest => {
            let mut highest: HashMap<String, i16> = HashMap::new();
            for row in &rows {
                let entry = highest.entry(row.identifier.clone()).or_insert(row.revision);
                if row.revision > *entry {
                    *entry = row.revision;
                }
            }
            rows.retain(|row| highest.get(&row.identifier) == Some(&row.revision));
        }
    }
    if query.recipe_filter != RecipeFilter::Unset {
        let want = query.recipe_filter == RecipeFilter::WithRecipe;
        let mut filtered = Vec::with_capacity(rows.len());
        for row in rows {
            if tx.product_has_recipes(row.id).await? == want {
                filtered.push(row);
            }
        }
        rows = filtered;
    }

    let mut loader = TypeLoader::new(registry);
    let mut handles = Vec::new();
    for row in &rows {
        if registry.try_type_strategy(&row.type_name).is_none() {
            debug!(
                "skipping type row {} with unconfigured type '{}'",
                row.id, row.type_name
            );
            continue;
        }
        if let Some(handle) = loader.load(&mut *tx, row.id).await? {
            handles.push(handle);
        }
    }

    // Re-check the original predicate against the materialized objects; a
    // lossy translation can then only drop rows, never leak wrong ones.
    if let Some(filter) = &query.property_filter {
        let mut surviving = Vec::with_capacity(handles.len());
        for handle in handles {
            let matched = {
                let product = handle.read();
                let strategy = registry.type_strategy(&product.type_name)?;
                strategy.matches(product.data.as_ref(), filter)?
            };
            if matched {
                surviving.push(handle);
            }
        }
        handles = surviving;
    }

    match query.selector {
        Selector::Matched => Ok(handles),
        Selector::Parents => {
            let mut related = Vec::new();
            let mut seen = HashSet::new();
            for handle in &handles {
                let id = handle.read().id;
                for link in tx.links_to_child(id).await? {
                    if seen.insert(link.parent_id) {
                        related.push(link.parent_id);
                    }
                }
            }
            load_related(registry, tx, &mut loader, related).await
        }
        Selector::Parts => {
            let mut related = Vec::new();
            let mut seen = HashSet::new();
            for handle in &handles {
                let id = handle.read().id;
                for link in tx.links_for_parent(id).await? {
                    if seen.insert(link.child_id) {
                        related.push(link.child_id);
                    }
                }
            }
            load_related(registry, tx, &mut loader, related).await
        }
    }
}

async fn load_related(
    registry: &StrategyRegistry,
    tx: &mut dyn StorageTx,
    loader: &mut TypeLoader<'_>,
    ids: Vec<Id>,
) -> Result<Vec<ProductRef>> {
    let mut handles = Vec::with_capacity(ids.len());
    for id in ids {
        let Some(row) = tx.get_type(id).await? else {
            continue;
        };
        if registry.try_type_strategy(&row.type_name).is_none() {
            continue;
        }
        if let Some(handle) = loader.load(&mut *tx, id).await? {
            handles.push(handle);
        }
    }
    Ok(handles)
}
