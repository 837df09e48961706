pub mod config;
pub mod engine;
pub mod error;
pub mod model;
pub mod store;
pub mod strategy;

pub use engine::{
    ColumnPredicate, CompareOp, ProductStorage, PropertyPredicate, PropertyValue,
};
pub use error::{Result, StorageError};

// Export all model types
pub use model::*;

pub use store::{MemoryStore, PostgresStore, ProductStore};
pub use strategy::{
    auto_configure, DescriptorRegistry, PropertyKind, StrategyPlugins, StrategyRegistry,
    TypeDescriptor,
};

/// Wire up a storage engine against PostgreSQL: environment-driven
/// configuration, schema creation, automatic strategy binding for every
/// registered descriptor without an explicit binding.
pub async fn connect(
    descriptors: DescriptorRegistry,
    plugins: StrategyPlugins,
    steps: StepRegistry,
) -> anyhow::Result<ProductStorage> {
    use std::sync::Arc;

    // Load environment variables from a .env file if one exists
    dotenvy::dotenv().ok();

    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .try_init();

    let mut storage_config = config::StorageConfig::load()?;
    auto_configure(&mut storage_config, &descriptors, &plugins);

    let database_url = storage_config.database_url()?;
    let max_connections = storage_config.database.max_connections.unwrap_or(20);
    let postgres_store = PostgresStore::new(&database_url, max_connections).await?;
    postgres_store.migrate().await?;

    let registry = StrategyRegistry::build(&storage_config, &descriptors, &plugins)?;
    Ok(ProductStorage::new(
        Arc::new(postgres_store),
        registry,
        steps,
    ))
}
