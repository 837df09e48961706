mod instances;
pub mod predicate;
mod products;
mod recipes;
mod workplans;

pub use predicate::{ColumnPredicate, CompareOp, PropertyPredicate, PropertyValue};

use crate::error::Result;
use crate::model::{
    Id, ProductIdentity, ProductInstance, ProductQuery, ProductRecipe, ProductRef,
    RecipeClassification, RevisionFilter, StepRegistry, Workplan,
};
use crate::store::traits::ProductStore;
use crate::strategy::StrategyRegistry;
use chrono::Utc;
use log::info;
use std::sync::Arc;

/// The persistence facade: every public operation opens one transaction on
/// the underlying store, runs to completion inside it and commits. Reads
/// roll back their transaction by dropping it.
pub struct ProductStorage {
    store: Arc<dyn ProductStore>,
    registry: StrategyRegistry,
    steps: StepRegistry,
}

impl ProductStorage {
    pub fn new(
        store: Arc<dyn ProductStore>,
        registry: StrategyRegistry,
        steps: StepRegistry,
    ) -> Self {
        Self {
            store,
            registry,
            steps,
        }
    }

    pub fn strategies(&self) -> &StrategyRegistry {
        &self.registry
    }

    pub fn step_registry(&self) -> &StepRegistry {
        &self.steps
    }

    /// Connectivity probe against the backing database.
    pub async fn check_database(&self) -> Result<()> {
        self.store.check_database().await?;
        Ok(())
    }

    /// Load one product type with its full part graph.
    pub async fn load_type(&self, id: Id) -> Result<Option<ProductRef>> {
        let mut tx = self.store.begin().await?;
        let mut loader = products::TypeLoader::new(&self.registry);
        loader.load(tx.as_mut(), id).await
    }

    /// Load a product type by business identity; the latest-revision
    /// sentinel resolves to the highest active revision.
    pub async fn load_type_by_identity(
        &self,
        identity: &ProductIdentity,
    ) -> Result<Option<ProductRef>> {
        let mut query = ProductQuery::by_identifier(identity.identifier.clone());
        if !identity.is_latest() {
            query.revision_filter = RevisionFilter::Specific;
            query.revision = identity.revision;
        }
        Ok(self.load_types(&query).await?.into_iter().next())
    }

    /// Query product types. See [`ProductQuery`] for the filter surface.
    pub async fn load_types(&self, query: &ProductQuery) -> Result<Vec<ProductRef>> {
        let mut tx = self.store.begin().await?;
        products::load_types(&self.registry, tx.as_mut(), query).await
    }

    /// Save a product type graph recursively and return its row id. Shared
    /// subtrees persist once; ids are written back into the handles.
    pub async fn save_type(&self, product: &ProductRef) -> Result<Id> {
        let mut tx = self.store.begin().await?;
        let mut saver = products::TypeSaver::new(&self.registry);
        let id = saver.save(tx.as_mut(), product.clone()).await?;
        tx.commit().await?;
        Ok(id)
    }

    /// Save several product type graphs in one transaction, sharing the
    /// saved-handles cache across all of them.
    pub async fn save_types(&self, products: &[ProductRef]) -> Result<Vec<Id>> {
        let mut tx = self.store.begin().await?;
        let mut saver = products::TypeSaver::new(&self.registry);
        let mut ids = Vec::with_capacity(products.len());
        for product in products {
            ids.push(saver.save(tx.as_mut(), product.clone()).await?);
        }
        tx.commit().await?;
        Ok(ids)
    }

    /// Soft-delete a product type. Returns `false` without deleting when
    /// other live types still reference it as a part; links of already
    /// deleted parents do not block.
    pub async fn delete_type(&self, id: Id) -> Result<bool> {
        let mut tx = self.store.begin().await?;
        for link in tx.links_to_child(id).await? {
            if tx.get_type(link.parent_id).await?.is_some() {
                info!("type {id} is still referenced as a part, not deleting");
                return Ok(false);
            }
        }
        let deleted = tx.soft_delete_type(id, Utc::now()).await?;
        tx.commit().await?;
        Ok(deleted)
    }

    /// Load instances by row id, each with its sub-instance tree.
    pub async fn load_instances(&self, ids: &[Id]) -> Result<Vec<ProductInstance>> {
        let mut tx = self.store.begin().await?;
        let mut loader = instances::InstanceLoader::new(&self.registry);
        let mut result = Vec::with_capacity(ids.len());
        for row in tx.list_instances(ids).await? {
            if let Some(instance) = loader.load(tx.as_mut(), row).await? {
                result.push(instance);
            }
        }
        Ok(result)
    }

    /// Query instances of a type and its registered subtypes, with optional
    /// property filtering pushed down per type and re-checked.
    pub async fn query_instances(
        &self,
        type_name: &str,
        filter: Option<&PropertyPredicate>,
    ) -> Result<Vec<ProductInstance>> {
        let mut tx = self.store.begin().await?;
        instances::query_instances(&self.registry, tx.as_mut(), type_name, filter).await
    }

    /// Save instance trees in one transaction. Row ids are written back.
    pub async fn save_instances(&self, roots: &mut [ProductInstance]) -> Result<()> {
        let mut tx = self.store.begin().await?;
        for instance in roots.iter_mut() {
            instances::save_instance(&self.registry, tx.as_mut(), instance, None).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Construct a fresh, unsaved recipe through the strategy configured
    /// for the type name.
    pub fn create_recipe(&self, type_name: &str) -> Result<ProductRecipe> {
        let strategy = self.registry.recipe_strategy(type_name)?;
        Ok(strategy.new_recipe())
    }

    pub async fn load_recipe(&self, id: Id) -> Result<Option<ProductRecipe>> {
        let mut tx = self.store.begin().await?;
        let Some(row) = tx.get_recipe(id).await? else {
            return Ok(None);
        };
        recipes::materialize_recipe(&self.registry, tx.as_mut(), &self.steps, row).await
    }

    /// Load the recipes of a product whose classification matches the mask.
    /// Cloned recipes only surface when the mask carries the clone bit.
    pub async fn load_recipes(
        &self,
        product_id: Id,
        mask: RecipeClassification,
    ) -> Result<Vec<ProductRecipe>> {
        let mut tx = self.store.begin().await?;
        let rows = tx.recipes_for_product(product_id).await?;
        let mut result = Vec::with_capacity(rows.len());
        for row in rows {
            if !RecipeClassification(row.classification).matches(mask) {
                continue;
            }
            if let Some(recipe) =
                recipes::materialize_recipe(&self.registry, tx.as_mut(), &self.steps, row).await?
            {
                result.push(recipe);
            }
        }
        Ok(result)
    }

    /// Save a recipe (and its workplan) and return its row id.
    pub async fn save_recipe(&self, recipe: &mut ProductRecipe) -> Result<Id> {
        let mut tx = self.store.begin().await?;
        let id = recipes::save_recipe(&self.registry, tx.as_mut(), recipe).await?;
        tx.commit().await?;
        Ok(id)
    }

    /// Save several recipes in one transaction.
    pub async fn save_recipes(&self, recipes: &mut [ProductRecipe]) -> Result<()> {
        let mut tx = self.store.begin().await?;
        for recipe in recipes.iter_mut() {
            self::recipes::save_recipe(&self.registry, tx.as_mut(), recipe).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Delete a recipe row. Returns `false` when it does not exist.
    pub async fn delete_recipe(&self, id: Id) -> Result<bool> {
        let mut tx = self.store.begin().await?;
        let deleted = tx.delete_recipe(id).await?;
        tx.commit().await?;
        Ok(deleted)
    }

    pub async fn load_workplan(&self, id: Id) -> Result<Option<Workplan>> {
        let mut tx = self.store.begin().await?;
        workplans::load_workplan(tx.as_mut(), &self.steps, id).await
    }

    pub async fn save_workplan(&self, workplan: &mut Workplan) -> Result<Id> {
        let mut tx = self.store.begin().await?;
        let id = workplans::save_workplan(tx.as_mut(), workplan).await?;
        tx.commit().await?;
        Ok(id)
    }
}
