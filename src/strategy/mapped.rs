use crate::config::LinkStrategyConfig;
use crate::engine::predicate::{ColumnPredicate, CompareOp, PropertyPredicate, PropertyValue};
use crate::error::{Result, StorageError};
use crate::model::{ColumnRef, CustomData, CustomPayload, GenericColumns, ProductRecipe};
use crate::strategy::{
    auto_map, ColumnMap, DescriptorRegistry, InstanceStrategy, LinkStrategy, PartSourcing,
    PropertyKind, RecipeStrategy, TypeStrategy,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The payload used by the built-in mapped strategies: named property
/// values without a hand-written struct per type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PropertyBag {
    values: BTreeMap<String, PropertyValue>,
}

impl CustomPayload for PropertyBag {}

impl PropertyBag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn boxed() -> Box<dyn CustomData> {
        Box::new(Self::default())
    }

    pub fn set(&mut self, property: impl Into<String>, value: PropertyValue) -> &mut Self {
        self.values.insert(property.into(), value);
        self
    }

    pub fn get(&self, property: &str) -> Option<&PropertyValue> {
        self.values.get(property)
    }

    pub fn integer(&self, property: &str) -> Option<i64> {
        self.get(property).and_then(PropertyValue::as_integer)
    }

    pub fn float(&self, property: &str) -> Option<f64> {
        self.get(property).and_then(PropertyValue::as_float)
    }

    pub fn text(&self, property: &str) -> Option<&str> {
        self.get(property).and_then(PropertyValue::as_text)
    }
}

/// Borrow the property bag out of a strategy payload.
pub(crate) fn as_bag(data: &dyn CustomData) -> Result<&PropertyBag> {
    data.as_any()
        .downcast_ref::<PropertyBag>()
        .ok_or_else(|| StorageError::Config("payload is not a PropertyBag".to_string()))
}

pub(crate) fn as_bag_mut(data: &mut dyn CustomData) -> Result<&mut PropertyBag> {
    data.as_any_mut()
        .downcast_mut::<PropertyBag>()
        .ok_or_else(|| StorageError::Config("payload is not a PropertyBag".to_string()))
}

/// Built-in strategy backed by an automatically assigned column map. Serves
/// as type, instance and recipe strategy for types whose payload is a
/// [`PropertyBag`].
#[derive(Debug, Clone)]
pub struct MappedStrategy {
    type_name: String,
    map: ColumnMap,
    skip_instances: bool,
}

impl MappedStrategy {
    pub fn new(type_name: impl Into<String>, map: ColumnMap) -> Self {
        Self {
            type_name: type_name.into(),
            map,
            skip_instances: false,
        }
    }

    pub fn for_type(type_name: &str, descriptors: &DescriptorRegistry) -> Result<Self> {
        let descriptor = descriptors.require(type_name)?;
        Ok(Self::new(type_name, auto_map(descriptor)?))
    }

    pub fn with_skip_instances(mut self, skip: bool) -> Self {
        self.skip_instances = skip;
        self
    }

    fn read_columns(&self, columns: &GenericColumns, bag: &mut PropertyBag) {
        for mapping in self.map.iter() {
            let value = match mapping.column {
                ColumnRef::Integer(slot) => {
                    let raw = columns.integer(slot);
                    match mapping.kind {
                        PropertyKind::Bool => PropertyValue::Bool(raw != 0),
                        _ => PropertyValue::Integer(raw),
                    }
                }
                ColumnRef::Float(slot) => PropertyValue::Float(columns.float(slot)),
                ColumnRef::Text(slot) => match columns.text(slot) {
                    Some(text) => PropertyValue::Text(text.to_string()),
                    None => continue,
                },
            };
            bag.set(mapping.property.clone(), value);
        }
    }

    fn write_columns(&self, bag: &PropertyBag, columns: &mut GenericColumns) {
        for mapping in self.map.iter() {
            match mapping.column {
                ColumnRef::Integer(slot) => {
                    columns.set_integer(slot, bag.integer(&mapping.property).unwrap_or(0))
                }
                ColumnRef::Float(slot) => {
                    columns.set_float(slot, bag.float(&mapping.property).unwrap_or(0.0))
                }
                ColumnRef::Text(slot) => {
                    columns.set_text(slot, bag.text(&mapping.property).map(str::to_string))
                }
            }
        }
    }

    fn translate(&self, predicate: &PropertyPredicate) -> Result<ColumnPredicate> {
        match predicate {
            PropertyPredicate::All(predicates) => Ok(ColumnPredicate::All(
                predicates
                    .iter()
                    .map(|p| self.translate(p))
                    .collect::<Result<_>>()?,
            )),
            PropertyPredicate::Any(predicates) => Ok(ColumnPredicate::Any(
                predicates
                    .iter()
                    .map(|p| self.translate(p))
                    .collect::<Result<_>>()?,
            )),
            PropertyPredicate::Compare {
                property,
                op,
                value,
            } => {
                let mapping = self.map.get(property).ok_or_else(|| {
                    StorageError::UnsupportedPredicate(format!(
                        "property '{}' is not column-mapped on '{}'",
                        property, self.type_name
                    ))
                })?;
                Ok(ColumnPredicate::Compare {
                    column: mapping.column,
                    op: *op,
                    value: value.clone(),
                })
            }
        }
    }

    fn eval(&self, bag: &PropertyBag, predicate: &PropertyPredicate) -> bool {
        match predicate {
            PropertyPredicate::All(predicates) => predicates.iter().all(|p| self.eval(bag, p)),
            PropertyPredicate::Any(predicates) => predicates.iter().any(|p| self.eval(bag, p)),
            PropertyPredicate::Compare {
                property,
                op,
                value,
            } => match bag.get(property) {
                Some(actual) => compare_values(actual, value, *op),
                None => false,
            },
        }
    }
}

fn compare_values(lhs: &PropertyValue, rhs: &PropertyValue, op: CompareOp) -> bool {
    if let (Some(l), Some(r)) = (lhs.as_integer(), rhs.as_integer()) {
        return match op {
            CompareOp::Eq => l == r,
            CompareOp::Ne => l != r,
            CompareOp::Gt => l > r,
            CompareOp::Ge => l >= r,
            CompareOp::Lt => l < r,
            CompareOp::Le => l <= r,
            CompareOp::Contains => false,
        };
    }
    if let (Some(l), Some(r)) = (lhs.as_float(), rhs.as_float()) {
        return match op {
            CompareOp::Eq => l == r,
            CompareOp::Ne => l != r,
            CompareOp::Gt => l > r,
            CompareOp::Ge => l >= r,
            CompareOp::Lt => l < r,
            CompareOp::Le => l <= r,
            CompareOp::Contains => false,
        };
    }
    if let (Some(l), Some(r)) = (lhs.as_text(), rhs.as_text()) {
        return match op {
            CompareOp::Eq => l == r,
            CompareOp::Ne => l != r,
            CompareOp::Contains => l.contains(r),
            _ => false,
        };
    }
    false
}

impl TypeStrategy for MappedStrategy {
    fn type_name(&self) -> &str {
        &self.type_name
    }

    fn new_data(&self) -> Box<dyn CustomData> {
        PropertyBag::boxed()
    }

    fn load_type(&self, columns: &GenericColumns, data: &mut dyn CustomData) -> Result<()> {
        self.read_columns(columns, as_bag_mut(data)?);
        Ok(())
    }

    fn save_type(&self, data: &dyn CustomData, columns: &mut GenericColumns) -> Result<()> {
        self.write_columns(as_bag(data)?, columns);
        Ok(())
    }

    fn translate_predicate(&self, predicate: &PropertyPredicate) -> Result<ColumnPredicate> {
        self.translate(predicate)
    }

    fn matches(&self, data: &dyn CustomData, predicate: &PropertyPredicate) -> Result<bool> {
        Ok(self.eval(as_bag(data)?, predicate))
    }
}

impl InstanceStrategy for MappedStrategy {
    fn type_name(&self) -> &str {
        &self.type_name
    }

    fn skip_instances(&self) -> bool {
        self.skip_instances
    }

    fn new_data(&self) -> Box<dyn CustomData> {
        PropertyBag::boxed()
    }

    fn load_instance(&self, columns: &GenericColumns, data: &mut dyn CustomData) -> Result<()> {
        self.read_columns(columns, as_bag_mut(data)?);
        Ok(())
    }

    fn save_instance(&self, data: &dyn CustomData, columns: &mut GenericColumns) -> Result<()> {
        self.write_columns(as_bag(data)?, columns);
        Ok(())
    }

    fn translate_predicate(&self, predicate: &PropertyPredicate) -> Result<ColumnPredicate> {
        self.translate(predicate)
    }

    fn matches(&self, data: &dyn CustomData, predicate: &PropertyPredicate) -> Result<bool> {
        Ok(self.eval(as_bag(data)?, predicate))
    }
}

impl RecipeStrategy for MappedStrategy {
    fn type_name(&self) -> &str {
        &self.type_name
    }

    fn new_recipe(&self) -> ProductRecipe {
        ProductRecipe::new(self.type_name.clone(), PropertyBag::boxed())
    }

    fn new_data(&self) -> Box<dyn CustomData> {
        PropertyBag::boxed()
    }

    fn load_recipe(&self, columns: &GenericColumns, data: &mut dyn CustomData) -> Result<()> {
        self.read_columns(columns, as_bag_mut(data)?);
        Ok(())
    }

    fn save_recipe(&self, data: &dyn CustomData, columns: &mut GenericColumns) -> Result<()> {
        self.write_columns(as_bag(data)?, columns);
        Ok(())
    }
}

/// Built-in link strategy: property-bag link payload with an optional
/// column map of its own (bound via `data_type_name` in the link
/// configuration).
pub struct MappedLinkStrategy {
    inner: MappedStrategy,
    property_name: String,
    sourcing: PartSourcing,
    collection: bool,
}

impl MappedLinkStrategy {
    pub fn from_config(
        config: &LinkStrategyConfig,
        descriptors: &DescriptorRegistry,
    ) -> Result<Self> {
        let map = match &config.data_type_name {
            Some(data_type) => auto_map(descriptors.require(data_type)?)?,
            None => ColumnMap::default(),
        };
        Ok(Self {
            inner: MappedStrategy::new(config.type_name.clone(), map),
            property_name: config.property_name.clone(),
            sourcing: config.part_sourcing,
            collection: config.collection,
        })
    }
}

impl LinkStrategy for MappedLinkStrategy {
    fn type_name(&self) -> &str {
        &self.inner.type_name
    }

    fn property_name(&self) -> &str {
        &self.property_name
    }

    fn part_sourcing(&self) -> PartSourcing {
        self.sourcing
    }

    fn collection(&self) -> bool {
        self.collection
    }

    fn new_data(&self) -> Box<dyn CustomData> {
        PropertyBag::boxed()
    }

    fn load_part_link(&self, columns: &GenericColumns, data: &mut dyn CustomData) -> Result<()> {
        self.inner.read_columns(columns, as_bag_mut(data)?);
        Ok(())
    }

    fn save_part_link(&self, data: &dyn CustomData, columns: &mut GenericColumns) -> Result<()> {
        self.inner.write_columns(as_bag(data)?, columns);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::TypeDescriptor;

    fn watch_strategy() -> MappedStrategy {
        let descriptor = TypeDescriptor::new("Watch")
            .with_property("weight", PropertyKind::Float64)
            .with_property("pieces", PropertyKind::Int32)
            .with_property("material", PropertyKind::Text);
        MappedStrategy::new("Watch", auto_map(&descriptor).unwrap())
    }

    #[test]
    fn bag_round_trips_through_columns() {
        let strategy = watch_strategy();
        let mut bag = PropertyBag::new();
        bag.set("weight", PropertyValue::Float(12.5))
            .set("pieces", PropertyValue::Integer(3))
            .set("material", PropertyValue::Text("steel".into()));

        let mut columns = GenericColumns::default();
        strategy.save_type(&bag, &mut columns).unwrap();

        let mut restored = PropertyBag::new();
        strategy.load_type(&columns, &mut restored).unwrap();
        assert_eq!(restored, bag);
    }

    #[test]
    fn unchanged_bag_reports_no_change() {
        let strategy = watch_strategy();
        let mut bag = PropertyBag::new();
        bag.set("pieces", PropertyValue::Integer(3));

        let mut columns = GenericColumns::default();
        strategy.save_type(&bag, &mut columns).unwrap();
        assert!(!strategy.has_changed(&bag, &columns).unwrap());

        bag.set("pieces", PropertyValue::Integer(4));
        assert!(strategy.has_changed(&bag, &columns).unwrap());
    }

    #[test]
    fn predicate_translation_targets_mapped_slots() {
        let strategy = watch_strategy();
        let predicate = PropertyPredicate::compare(
            "pieces",
            CompareOp::Ge,
            PropertyValue::Integer(2),
        );
        let translated = TypeStrategy::translate_predicate(&strategy, &predicate).unwrap();
        assert_eq!(
            translated,
            ColumnPredicate::Compare {
                column: ColumnRef::Integer(0),
                op: CompareOp::Ge,
                value: PropertyValue::Integer(2),
            }
        );
    }

    #[test]
    fn unmapped_property_fails_fast() {
        let strategy = watch_strategy();
        let predicate =
            PropertyPredicate::eq("unknown", PropertyValue::Integer(1));
        let err = TypeStrategy::translate_predicate(&strategy, &predicate).unwrap_err();
        assert!(matches!(err, StorageError::UnsupportedPredicate(_)));
    }
}
