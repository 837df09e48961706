use crate::config::StorageConfig;
use crate::error::{Result, StorageError};
use crate::model::{ColumnRef, SLOTS};
use crate::strategy::{
    compliance::BAD_COMPLIANCE, DescriptorRegistry, PropertyKind, StrategyPlugins, SupportedTypes,
    TypeDescriptor,
};
use log::{debug, warn};

/// Property-to-slot assignment of one domain type, produced by the auto
/// configurator and consumed by the mapped strategies.
#[derive(Debug, Clone, Default)]
pub struct ColumnMap {
    entries: Vec<ColumnMapping>,
}

#[derive(Debug, Clone)]
pub struct ColumnMapping {
    pub property: String,
    pub column: ColumnRef,
    pub kind: PropertyKind,
}

impl ColumnMap {
    pub fn get(&self, property: &str) -> Option<&ColumnMapping> {
        self.entries.iter().find(|e| e.property == property)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ColumnMapping> {
        self.entries.iter()
    }
}

/// The three built-in column-kind strategies. Compliance over property
/// kinds decides which family stores a property.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnFamily {
    Float,
    Integer,
    Text,
}

impl ColumnFamily {
    fn name(self) -> &'static str {
        match self {
            ColumnFamily::Float => "float",
            ColumnFamily::Integer => "integer",
            ColumnFamily::Text => "text",
        }
    }

    /// Compliance of this family for a property kind. Integral kinds walk
    /// their widening chain towards `Int64`; enums always match the integer
    /// strategy perfectly; interfaces only fit the text strategy, one step
    /// better than the bad sentinel.
    fn compliance(self, kind: PropertyKind) -> i32 {
        match (self, kind) {
            (ColumnFamily::Integer, PropertyKind::Int64) => 0,
            (ColumnFamily::Integer, PropertyKind::Int32) => 1,
            (ColumnFamily::Integer, PropertyKind::Int16) => 2,
            (ColumnFamily::Integer, PropertyKind::Int8) => 3,
            (ColumnFamily::Integer, PropertyKind::Bool) => 4,
            (ColumnFamily::Integer, PropertyKind::Enum) => 0,
            (ColumnFamily::Float, PropertyKind::Float64) => 0,
            (ColumnFamily::Float, PropertyKind::Float32) => 1,
            (ColumnFamily::Text, PropertyKind::Text) => 0,
            (ColumnFamily::Text, PropertyKind::Interface) => BAD_COMPLIANCE - 1,
            _ => BAD_COMPLIANCE,
        }
    }

    fn column(self, slot: u8) -> ColumnRef {
        match self {
            ColumnFamily::Float => ColumnRef::Float(slot),
            ColumnFamily::Integer => ColumnRef::Integer(slot),
            ColumnFamily::Text => ColumnRef::Text(slot),
        }
    }
}

/// Candidates in deterministic (alphabetical) order.
const FAMILIES: [ColumnFamily; 3] = [
    ColumnFamily::Float,
    ColumnFamily::Integer,
    ColumnFamily::Text,
];

/// Assign every described property of a type to the best-matching generic
/// column slot. Properties a kind's family cannot hold at all, or that
/// overflow the eight slots of a family, fail the configuration.
pub fn auto_map(descriptor: &TypeDescriptor) -> Result<ColumnMap> {
    let mut entries = Vec::with_capacity(descriptor.properties.len());
    let mut used = [0u8; 3];

    for property in &descriptor.properties {
        let mut best: Option<(ColumnFamily, i32)> = None;
        for family in FAMILIES {
            let score = family.compliance(property.kind);
            if score == BAD_COMPLIANCE {
                continue;
            }
            match best {
                Some((_, current)) if current <= score => {}
                _ => best = Some((family, score)),
            }
        }

        let Some((family, score)) = best else {
            return Err(StorageError::Config(format!(
                "property '{}' of '{}' has no matching column strategy",
                property.name, descriptor.type_name
            )));
        };

        let slot = used[family as usize];
        if slot as usize >= SLOTS {
            return Err(StorageError::Config(format!(
                "type '{}' exceeds the {} {} column slots",
                descriptor.type_name,
                SLOTS,
                family.name()
            )));
        }
        used[family as usize] += 1;

        debug!(
            "mapping {}.{} to {:?} (compliance {})",
            descriptor.type_name,
            property.name,
            family.column(slot),
            score
        );
        entries.push(ColumnMapping {
            property: property.name.clone(),
            column: family.column(slot),
            kind: property.kind,
        });
    }

    Ok(ColumnMap { entries })
}

/// Best-effort completion of the strategy configuration: every registered
/// type without an explicit binding gets the plugin with the best
/// compliance for it. Types nothing matches are left unbound (tolerated on
/// read, fatal at save) and logged.
pub fn auto_configure(
    config: &mut StorageConfig,
    descriptors: &DescriptorRegistry,
    plugins: &StrategyPlugins,
) {
    let hierarchy = descriptors.hierarchy();
    let mut type_names: Vec<&str> = descriptors.type_names().collect();
    type_names.sort_unstable();

    for type_name in type_names {
        let is_recipe = hierarchy.is_derived_from(type_name, "ProductRecipe");

        if is_recipe {
            if !config
                .recipe_strategies
                .iter()
                .any(|b| b.type_name == type_name)
            {
                match pick_plugin(plugins.recipe_candidates(), type_name, descriptors) {
                    Some(plugin) => config.bind_recipe(type_name, plugin),
                    None => warn!("no recipe strategy matches '{type_name}'"),
                }
            }
            continue;
        }

        if !config
            .type_strategies
            .iter()
            .any(|b| b.type_name == type_name)
        {
            match pick_plugin(plugins.type_candidates(), type_name, descriptors) {
                Some(plugin) => config.bind_type(type_name, plugin),
                None => warn!("no type strategy matches '{type_name}'"),
            }
        }

        if !config
            .instance_strategies
            .iter()
            .any(|b| b.type_name == type_name)
        {
            match pick_plugin(plugins.instance_candidates(), type_name, descriptors) {
                Some(plugin) => config.bind_instance(type_name, plugin, false),
                None => warn!("no instance strategy matches '{type_name}'"),
            }
        }
    }
}

fn pick_plugin(
    candidates: Vec<(&str, &SupportedTypes)>,
    target: &str,
    descriptors: &DescriptorRegistry,
) -> Option<String> {
    crate::strategy::select_strategy(
        &candidates,
        |(name, _)| name,
        |(_, supported)| supported,
        target,
        descriptors.hierarchy(),
    )
    .map(|(name, _)| name.to_string())
}
