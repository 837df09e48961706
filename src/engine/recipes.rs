use crate::engine::workplans::{load_workplan, save_workplan};
use crate::error::{Result, StorageError};
use crate::model::{
    GenericColumns, Id, ProductRecipe, RecipeClassification, RecipeState, StepRegistry,
};
use crate::store::rows::RecipeRow;
use crate::store::traits::StorageTx;
use crate::strategy::StrategyRegistry;
use log::debug;

/// Materialize one recipe row, `None` when its type name has no configured
/// recipe strategy.
pub(crate) async fn materialize_recipe(
    registry: &StrategyRegistry,
    tx: &mut dyn StorageTx,
    steps: &StepRegistry,
    row: RecipeRow,
) -> Result<Option<ProductRecipe>> {
    let Some(strategy) = registry.try_recipe_strategy(&row.type_name) else {
        debug!(
            "skipping recipe {} of unconfigured type '{}'",
            row.id, row.type_name
        );
        return Ok(None);
    };
    let strategy = strategy.clone();

    let mut data = strategy.new_data();
    strategy.load_recipe(&row.columns, data.as_mut())?;

    let workplan = match row.workplan_id {
        Some(workplan_id) => load_workplan(tx, steps, workplan_id).await?,
        None => None,
    };

    Ok(Some(ProductRecipe {
        id: row.id,
        name: row.name,
        type_name: row.type_name,
        classification: RecipeClassification(row.classification),
        state: RecipeState::from_raw(row.state),
        product_id: row.product_id,
        workplan,
        data,
    }))
}

/// Persist one recipe with its workplan. The referenced product type must
/// already be saved.
pub(crate) async fn save_recipe(
    registry: &StrategyRegistry,
    tx: &mut dyn StorageTx,
    recipe: &mut ProductRecipe,
) -> Result<Id> {
    let strategy = registry.recipe_strategy(&recipe.type_name)?.clone();

    if tx.get_type(recipe.product_id).await?.is_none() {
        return Err(StorageError::ProductNotFound(recipe.product_id));
    }

    let workplan_id = match &mut recipe.workplan {
        Some(workplan) => Some(save_workplan(tx, workplan).await?),
        None => None,
    };

    let mut columns = GenericColumns::default();
    strategy.save_recipe(recipe.data.as_ref(), &mut columns)?;

    let row = RecipeRow {
        id: recipe.id,
        name: recipe.name.clone(),
        type_name: recipe.type_name.clone(),
        classification: recipe.classification.0,
        state: recipe.state.as_raw(),
        product_id: recipe.product_id,
        workplan_id,
        columns,
    };
    if recipe.id == 0 {
        recipe.id = tx.insert_recipe(row).await?;
    } else {
        tx.update_recipe(&row).await?;
    }
    Ok(recipe.id)
}
