pub mod auto;
pub mod compliance;
pub mod mapped;

pub use auto::{auto_configure, auto_map, ColumnMap};
pub use compliance::{compliance, select_strategy, SupportedTypes, BAD_COMPLIANCE};
pub use mapped::{MappedLinkStrategy, MappedStrategy, PropertyBag};

use crate::config::{
    InstanceStrategyConfig, LinkStrategyConfig, RecipeStrategyConfig, StorageConfig,
    TypeStrategyConfig,
};
use crate::engine::predicate::{ColumnPredicate, PropertyPredicate};
use crate::error::{Result, StorageError};
use crate::model::{CustomData, GenericColumns, ProductRecipe};
use crate::store::rows::PartLinkRow;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// How instance parts for a link are restored on load: recreated by
/// re-walking the type's part links and matching on link id, or taken from
/// separately persisted child instance rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartSourcing {
    #[default]
    FromPartLink,
    FromEntities,
}

/// Kind of value a described property holds. Drives the automatic
/// column-slot assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyKind {
    Bool,
    Int8,
    Int16,
    Int32,
    Int64,
    Float32,
    Float64,
    Text,
    Enum,
    Interface,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropertyDescriptor {
    pub name: String,
    pub kind: PropertyKind,
}

/// Registered description of a domain type: its place in the hierarchy and
/// the custom properties its payload carries. This is the explicit stand-in
/// for runtime type reflection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypeDescriptor {
    pub type_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base: Option<String>,
    #[serde(default)]
    pub interfaces: Vec<String>,
    #[serde(default)]
    pub properties: Vec<PropertyDescriptor>,
}

impl TypeDescriptor {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            base: None,
            interfaces: Vec::new(),
            properties: Vec::new(),
        }
    }

    pub fn with_base(mut self, base: impl Into<String>) -> Self {
        self.base = Some(base.into());
        self
    }

    pub fn with_interface(mut self, interface: impl Into<String>) -> Self {
        self.interfaces.push(interface.into());
        self
    }

    pub fn with_property(mut self, name: impl Into<String>, kind: PropertyKind) -> Self {
        self.properties.push(PropertyDescriptor {
            name: name.into(),
            kind,
        });
        self
    }
}

/// One node of the registered type hierarchy.
#[derive(Debug, Clone, Default)]
pub struct TypeNode {
    pub base: Option<String>,
    pub interfaces: Vec<String>,
}

/// Base-type and interface relations of all registered domain types,
/// queried for compliance scoring and derived-type expansion.
#[derive(Debug, Clone, Default)]
pub struct TypeHierarchy {
    nodes: HashMap<String, TypeNode>,
}

impl TypeHierarchy {
    pub fn register(&mut self, name: impl Into<String>, node: TypeNode) {
        self.nodes.insert(name.into(), node);
    }

    /// Base chain starting at the type itself. Unregistered names yield a
    /// one-element chain.
    pub fn base_chain(&self, name: &str) -> Vec<String> {
        let mut chain = vec![name.to_string()];
        let mut current = name;
        while let Some(base) = self.nodes.get(current).and_then(|n| n.base.as_deref()) {
            chain.push(base.to_string());
            current = base;
        }
        chain
    }

    /// Interfaces implemented anywhere along the base chain.
    pub fn interfaces_of(&self, name: &str) -> HashSet<String> {
        self.base_chain(name)
            .iter()
            .filter_map(|n| self.nodes.get(n))
            .flat_map(|n| n.interfaces.iter().cloned())
            .collect()
    }

    pub fn is_derived_from(&self, name: &str, root: &str) -> bool {
        self.base_chain(name).iter().any(|n| n == root)
            || self.interfaces_of(name).contains(root)
    }

    /// All registered names assignable to the root, the root included.
    pub fn derived_of(&self, root: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .nodes
            .keys()
            .filter(|name| self.is_derived_from(name, root))
            .cloned()
            .collect();
        names.sort();
        names
    }
}

/// Registered type descriptors plus the hierarchy derived from them.
#[derive(Debug, Clone, Default)]
pub struct DescriptorRegistry {
    descriptors: HashMap<String, TypeDescriptor>,
    hierarchy: TypeHierarchy,
}

impl DescriptorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, descriptor: TypeDescriptor) {
        self.hierarchy.register(
            descriptor.type_name.clone(),
            TypeNode {
                base: descriptor.base.clone(),
                interfaces: descriptor.interfaces.clone(),
            },
        );
        self.descriptors
            .insert(descriptor.type_name.clone(), descriptor);
    }

    pub fn get(&self, type_name: &str) -> Option<&TypeDescriptor> {
        self.descriptors.get(type_name)
    }

    pub fn require(&self, type_name: &str) -> Result<&TypeDescriptor> {
        self.get(type_name).ok_or_else(|| {
            StorageError::Config(format!("no type descriptor registered for '{type_name}'"))
        })
    }

    pub fn hierarchy(&self) -> &TypeHierarchy {
        &self.hierarchy
    }

    pub fn type_names(&self) -> impl Iterator<Item = &str> {
        self.descriptors.keys().map(String::as_str)
    }
}

/// Translates a product type's custom data to and from generic columns.
pub trait TypeStrategy: Send + Sync {
    fn type_name(&self) -> &str;

    /// Fresh payload for materializing a row of this type.
    fn new_data(&self) -> Box<dyn CustomData>;

    fn load_type(&self, columns: &GenericColumns, data: &mut dyn CustomData) -> Result<()>;

    fn save_type(&self, data: &dyn CustomData, columns: &mut GenericColumns) -> Result<()>;

    /// Gate for creating a new properties version. The default writes into
    /// a scratch copy of the current columns and compares.
    fn has_changed(&self, data: &dyn CustomData, current: &GenericColumns) -> Result<bool> {
        let mut scratch = current.clone();
        self.save_type(data, &mut scratch)?;
        Ok(scratch != *current)
    }

    /// Lower a property predicate to generic columns for query pushdown.
    fn translate_predicate(&self, predicate: &PropertyPredicate) -> Result<ColumnPredicate>;

    /// Evaluate the original predicate against a materialized payload; the
    /// engine re-checks every pushdown result through this.
    fn matches(&self, data: &dyn CustomData, predicate: &PropertyPredicate) -> Result<bool>;
}

/// Translates product instance data to and from generic columns.
pub trait InstanceStrategy: Send + Sync {
    fn type_name(&self) -> &str;

    /// Persistence opt-out: instances of this type are never stored.
    fn skip_instances(&self) -> bool {
        false
    }

    fn new_data(&self) -> Box<dyn CustomData>;

    fn load_instance(&self, columns: &GenericColumns, data: &mut dyn CustomData) -> Result<()>;

    fn save_instance(&self, data: &dyn CustomData, columns: &mut GenericColumns) -> Result<()>;

    fn translate_predicate(&self, predicate: &PropertyPredicate) -> Result<ColumnPredicate>;

    fn matches(&self, data: &dyn CustomData, predicate: &PropertyPredicate) -> Result<bool>;
}

/// Translates one part-link property of a parent type.
pub trait LinkStrategy: Send + Sync {
    /// Parent type name this link strategy is configured for.
    fn type_name(&self) -> &str;

    /// The declaring property on the parent type.
    fn property_name(&self) -> &str;

    fn part_sourcing(&self) -> PartSourcing {
        PartSourcing::FromPartLink
    }

    /// Whether the bound property is collection-valued.
    fn collection(&self) -> bool {
        false
    }

    fn new_data(&self) -> Box<dyn CustomData>;

    fn load_part_link(&self, columns: &GenericColumns, data: &mut dyn CustomData) -> Result<()>;

    fn save_part_link(&self, data: &dyn CustomData, columns: &mut GenericColumns) -> Result<()>;

    /// Cleanup hook invoked with the now-orphaned link rows before they are
    /// removed. Default: nothing beyond the removal itself.
    fn delete_part_links(&self, _orphaned: &[PartLinkRow]) -> Result<()> {
        Ok(())
    }
}

/// Translates recipe data to and from generic columns and constructs new
/// recipes of its type.
pub trait RecipeStrategy: Send + Sync {
    fn type_name(&self) -> &str;

    /// Factory behind `create_recipe`.
    fn new_recipe(&self) -> ProductRecipe;

    fn new_data(&self) -> Box<dyn CustomData>;

    fn load_recipe(&self, columns: &GenericColumns, data: &mut dyn CustomData) -> Result<()>;

    fn save_recipe(&self, data: &dyn CustomData, columns: &mut GenericColumns) -> Result<()>;
}

type TypeFactory = Box<
    dyn Fn(&TypeStrategyConfig, &DescriptorRegistry) -> Result<Arc<dyn TypeStrategy>>
        + Send
        + Sync,
>;
type InstanceFactory = Box<
    dyn Fn(&InstanceStrategyConfig, &DescriptorRegistry) -> Result<Arc<dyn InstanceStrategy>>
        + Send
        + Sync,
>;
type LinkFactory = Box<
    dyn Fn(&LinkStrategyConfig, &DescriptorRegistry) -> Result<Arc<dyn LinkStrategy>>
        + Send
        + Sync,
>;
type RecipeFactory = Box<
    dyn Fn(&RecipeStrategyConfig, &DescriptorRegistry) -> Result<Arc<dyn RecipeStrategy>>
        + Send
        + Sync,
>;

struct Plugin<F> {
    supported: SupportedTypes,
    factory: F,
}

/// Strategy implementations available to the configuration: plugin name to
/// factory function, each carrying the supported-type metadata consulted by
/// the auto configurator.
#[derive(Default)]
pub struct StrategyPlugins {
    types: HashMap<String, Plugin<TypeFactory>>,
    instances: HashMap<String, Plugin<InstanceFactory>>,
    links: HashMap<String, Plugin<LinkFactory>>,
    recipes: HashMap<String, Plugin<RecipeFactory>>,
}

impl StrategyPlugins {
    pub fn new() -> Self {
        Self::default()
    }

    /// Plugin set containing the built-in column-mapped strategies under
    /// the plugin name `"mapped"`, serving every type derived from the
    /// `ProductType` / `ProductInstance` / `ProductRecipe` roots.
    pub fn with_defaults() -> Self {
        let mut plugins = Self::new();
        plugins.register_type_plugin(
            "mapped",
            SupportedTypes::new(["ProductType"], true),
            |config, descriptors| {
                Ok(Arc::new(MappedStrategy::for_type(&config.type_name, descriptors)?)
                    as Arc<dyn TypeStrategy>)
            },
        );
        plugins.register_instance_plugin(
            "mapped",
            SupportedTypes::new(["ProductType", "ProductInstance"], true),
            |config, descriptors| {
                let strategy = MappedStrategy::for_type(&config.type_name, descriptors)?
                    .with_skip_instances(config.skip_instances);
                Ok(Arc::new(strategy) as Arc<dyn InstanceStrategy>)
            },
        );
        plugins.register_link_plugin(
            "mapped",
            SupportedTypes::new(["ProductType"], true),
            |config, descriptors| {
                Ok(Arc::new(MappedLinkStrategy::from_config(config, descriptors)?)
                    as Arc<dyn LinkStrategy>)
            },
        );
        plugins.register_recipe_plugin(
            "mapped",
            SupportedTypes::new(["ProductRecipe"], true),
            |config, descriptors| {
                Ok(Arc::new(MappedStrategy::for_type(&config.type_name, descriptors)?)
                    as Arc<dyn RecipeStrategy>)
            },
        );
        plugins
    }

    pub fn register_type_plugin<F>(&mut self, name: &str, supported: SupportedTypes, factory: F)
    where
        F: Fn(&TypeStrategyConfig, &DescriptorRegistry) -> Result<Arc<dyn TypeStrategy>>
            + Send
            + Sync
            + 'static,
    {
        self.types.insert(
            name.to_string(),
            Plugin {
                supported,
                factory: Box::new(factory),
            },
        );
    }

    pub fn register_instance_plugin<F>(&mut self, name: &str, supported: SupportedTypes, factory: F)
    where
        F: Fn(&InstanceStrategyConfig, &DescriptorRegistry) -> Result<Arc<dyn InstanceStrategy>>
            + Send
            + Sync
            + 'static,
    {
        self.instances.insert(
            name.to_string(),
            Plugin {
                supported,
                factory: Box::new(factory),
            },
        );
    }

    pub fn register_link_plugin<F>(&mut self, name: &str, supported: SupportedTypes, factory: F)
    where
        F: Fn(&LinkStrategyConfig, &DescriptorRegistry) -> Result<Arc<dyn LinkStrategy>>
            + Send
            + Sync
            + 'static,
    {
        self.links.insert(
            name.to_string(),
            Plugin {
                supported,
                factory: Box::new(factory),
            },
        );
    }

    pub fn register_recipe_plugin<F>(&mut self, name: &str, supported: SupportedTypes, factory: F)
    where
        F: Fn(&RecipeStrategyConfig, &DescriptorRegistry) -> Result<Arc<dyn RecipeStrategy>>
            + Send
            + Sync
            + 'static,
    {
        self.recipes.insert(
            name.to_string(),
            Plugin {
                supported,
                factory: Box::new(factory),
            },
        );
    }

    pub(crate) fn type_candidates(&self) -> Vec<(&str, &SupportedTypes)> {
        self.types
            .iter()
            .map(|(name, plugin)| (name.as_str(), &plugin.supported))
            .collect()
    }

    pub(crate) fn instance_candidates(&self) -> Vec<(&str, &SupportedTypes)> {
        self.instances
            .iter()
            .map(|(name, plugin)| (name.as_str(), &plugin.supported))
            .collect()
    }

    pub(crate) fn recipe_candidates(&self) -> Vec<(&str, &SupportedTypes)> {
        self.recipes
            .iter()
            .map(|(name, plugin)| (name.as_str(), &plugin.supported))
            .collect()
    }
}

/// Runtime strategy registry of the storage engine: one strategy per
/// configured type name and kind, link strategies kept in configuration
/// order per parent type.
#[derive(Default)]
pub struct StrategyRegistry {
    types: HashMap<String, Arc<dyn TypeStrategy>>,
    instances: HashMap<String, Arc<dyn InstanceStrategy>>,
    links: HashMap<String, Vec<Arc<dyn LinkStrategy>>>,
    recipes: HashMap<String, Arc<dyn RecipeStrategy>>,
    hierarchy: TypeHierarchy,
}

impl StrategyRegistry {
    /// Build the registry from the configured bindings, resolving each
    /// plugin name through the available plugins.
    pub fn build(
        config: &StorageConfig,
        descriptors: &DescriptorRegistry,
        plugins: &StrategyPlugins,
    ) -> Result<Self> {
        let mut registry = Self {
            hierarchy: descriptors.hierarchy().clone(),
            ..Self::default()
        };

        for binding in &config.type_strategies {
            let plugin = plugins.types.get(&binding.plugin_name).ok_or_else(|| {
                StorageError::Config(format!("unknown type plugin '{}'", binding.plugin_name))
            })?;
            let strategy = (plugin.factory)(binding, descriptors)?;
            registry.types.insert(binding.type_name.clone(), strategy);
        }

        for binding in &config.instance_strategies {
            let plugin = plugins.instances.get(&binding.plugin_name).ok_or_else(|| {
                StorageError::Config(format!("unknown instance plugin '{}'", binding.plugin_name))
            })?;
            let strategy = (plugin.factory)(binding, descriptors)?;
            registry
                .instances
                .insert(binding.type_name.clone(), strategy);
        }

        for binding in &config.link_strategies {
            let plugin = plugins.links.get(&binding.plugin_name).ok_or_else(|| {
                StorageError::Config(format!("unknown link plugin '{}'", binding.plugin_name))
            })?;
            let strategy = (plugin.factory)(binding, descriptors)?;
            registry
                .links
                .entry(binding.type_name.clone())
                .or_default()
                .push(strategy);
        }

        for binding in &config.recipe_strategies {
            let plugin = plugins.recipes.get(&binding.plugin_name).ok_or_else(|| {
                StorageError::Config(format!("unknown recipe plugin '{}'", binding.plugin_name))
            })?;
            let strategy = (plugin.factory)(binding, descriptors)?;
            registry.recipes.insert(binding.type_name.clone(), strategy);
        }

        Ok(registry)
    }

    pub fn hierarchy(&self) -> &TypeHierarchy {
        &self.hierarchy
    }

    pub fn type_strategy(&self, type_name: &str) -> Result<&Arc<dyn TypeStrategy>> {
        self.types
            .get(type_name)
            .ok_or_else(|| StorageError::MissingStrategy {
                kind: "type",
                type_name: type_name.to_string(),
            })
    }

    /// Non-failing lookup for bulk reads, where unconfigured rows are
    /// skipped instead of failing the query.
    pub fn try_type_strategy(&self, type_name: &str) -> Option<&Arc<dyn TypeStrategy>> {
        self.types.get(type_name)
    }

    pub fn instance_strategy(&self, type_name: &str) -> Result<&Arc<dyn InstanceStrategy>> {
        self.instances
            .get(type_name)
            .ok_or_else(|| StorageError::MissingStrategy {
                kind: "instance",
                type_name: type_name.to_string(),
            })
    }

    pub fn try_instance_strategy(&self, type_name: &str) -> Option<&Arc<dyn InstanceStrategy>> {
        self.instances.get(type_name)
    }

    /// Link strategies of a type in configuration order, empty when none
    /// are configured.
    pub fn link_strategies(&self, type_name: &str) -> &[Arc<dyn LinkStrategy>] {
        self.links.get(type_name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn recipe_strategy(&self, type_name: &str) -> Result<&Arc<dyn RecipeStrategy>> {
        self.recipes
            .get(type_name)
            .ok_or_else(|| StorageError::MissingStrategy {
                kind: "recipe",
                type_name: type_name.to_string(),
            })
    }

    pub fn try_recipe_strategy(&self, type_name: &str) -> Option<&Arc<dyn RecipeStrategy>> {
        self.recipes.get(type_name)
    }

    /// Expand a root type name to all configured type names assignable to
    /// it (derived-type expansion for queries).
    pub fn expand_type_names(&self, root: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .types
            .keys()
            .filter(|name| self.hierarchy.is_derived_from(name, root))
            .cloned()
            .collect();
        names.sort();
        names
    }
}
