use mes_product_db::config::StorageConfig;
use mes_product_db::store::rows::ProductTypeRow;
use mes_product_db::strategy::{PartSourcing, PropertyBag};
use mes_product_db::{
    auto_configure, CompareOp, Connector, ConnectorClassification, CustomData, DescriptorRegistry,
    Identity, MemoryStore, OutputDescription, OutputType, ProductIdentity, ProductInstance,
    ProductQuery, ProductRef, ProductState, ProductStorage, ProductStore,
    ProductType, PropertyKind, PropertyPredicate, PropertyValue, RecipeClassification,
    RevisionFilter, StepDescriptor, StepKind, StepRegistry, StorageError, StrategyPlugins,
    StrategyRegistry, TypeDescriptor, Workplan, WorkplanState, WorkplanStep,
};
use serde_json::json;
use std::sync::Arc;

fn descriptors() -> DescriptorRegistry {
    let mut descriptors = DescriptorRegistry::new();
    descriptors.register(TypeDescriptor::new("ProductType"));
    descriptors.register(
        TypeDescriptor::new("Watch")
            .with_base("ProductType")
            .with_property("weight", PropertyKind::Float64)
            .with_property("pieces", PropertyKind::Int32)
            .with_property("material", PropertyKind::Text),
    );
    descriptors.register(
        TypeDescriptor::new("Movement")
            .with_base("ProductType")
            .with_property("jewels", PropertyKind::Int32),
    );
    descriptors.register(TypeDescriptor::new("Gasket").with_base("ProductType"));
    descriptors.register(TypeDescriptor::new("ProductRecipe"));
    descriptors.register(
        TypeDescriptor::new("AssemblyRecipe")
            .with_base("ProductRecipe")
            .with_property("takt_seconds", PropertyKind::Int32),
    );
    descriptors
}

fn steps() -> StepRegistry {
    let mut steps = StepRegistry::new();
    steps.register(
        "MountStep",
        StepDescriptor {
            default_parameters: json!({"torque": 1.0, "retries": 3}),
        },
    );
    steps.register(
        "InspectStep",
        StepDescriptor {
            default_parameters: json!({"samples": 1}),
        },
    );
    steps
}

/// Engine on the in-memory store. The store handle stays available so
/// tests can inspect raw rows through a transaction of their own.
fn storage() -> (ProductStorage, Arc<MemoryStore>) {
    let descriptors = descriptors();
    let plugins = StrategyPlugins::with_defaults();

    let mut config = StorageConfig::default();
    config.bind_link("Watch", "movement", "mapped", PartSourcing::FromPartLink, false);
    config.bind_link("Watch", "gaskets", "mapped", PartSourcing::FromPartLink, true);
    // Gaskets are bulk goods, their individual units are not tracked.
    config.bind_instance("Gasket", "mapped", true);
    auto_configure(&mut config, &descriptors, &plugins);

    let registry = StrategyRegistry::build(&config, &descriptors, &plugins).unwrap();
    let store = Arc::new(MemoryStore::new());
    (
        ProductStorage::new(store.clone(), registry, steps()),
        store,
    )
}

fn watch_data(weight: f64, pieces: i64, material: &str) -> Box<dyn CustomData> {
    let mut bag = PropertyBag::new();
    bag.set("weight", PropertyValue::Float(weight));
    bag.set("pieces", PropertyValue::Integer(pieces));
    bag.set("material", PropertyValue::Text(material.to_string()));
    Box::new(bag)
}

fn watch(identifier: &str, revision: i16, name: &str) -> ProductRef {
    ProductType::new(
        "Watch",
        Identity::Product(ProductIdentity::new(identifier, revision)),
        name,
        watch_data(42.0, 120, "steel"),
    )
    .into_ref()
}

fn movement(identifier: &str, jewels: i64) -> ProductRef {
    let mut bag = PropertyBag::new();
    bag.set("jewels", PropertyValue::Integer(jewels));
    ProductType::new(
        "Movement",
        Identity::Product(ProductIdentity::new(identifier, 1)),
        "Movement",
        Box::new(bag),
    )
    .into_ref()
}

fn gasket(identifier: &str, name: &str) -> ProductRef {
    ProductType::new(
        "Gasket",
        Identity::Product(ProductIdentity::new(identifier, 1)),
        name,
        PropertyBag::boxed(),
    )
    .into_ref()
}

fn bag_of(product: &ProductType) -> &PropertyBag {
    product.data.as_any().downcast_ref::<PropertyBag>().unwrap()
}

#[tokio::test]
async fn test_type_round_trip_with_parts() {
    let (storage, _) = storage();

    let parent = watch("W-100", 1, "Diver 300");
    {
        let mut product = parent.write();
        product.set_single_part(
            "movement",
            Some(mes_product_db::PartLink::new(
                movement("M-10", 21),
                PropertyBag::boxed(),
            )),
        );
        product.set_part_collection(
            "gaskets",
            vec![
                mes_product_db::PartLink::new(gasket("G-1", "Crown gasket"), PropertyBag::boxed()),
                mes_product_db::PartLink::new(gasket("G-2", "Back gasket"), PropertyBag::boxed()),
            ],
        );
    }

    let id = storage.save_type(&parent).await.unwrap();
    assert!(id > 0);
    {
        let product = parent.read();
        assert_eq!(product.id, id);
        let link = product.single_part("movement").unwrap();
        assert!(link.id > 0);
        assert!(link.child.read().id > 0);
        for link in product.part_collection("gaskets") {
            assert!(link.id > 0);
        }
    }

    let loaded = storage.load_type(id).await.unwrap().unwrap();
    let product = loaded.read();
    assert_eq!(product.name, "Diver 300");
    assert_eq!(product.state, ProductState::Created);
    let bag = bag_of(&product);
    assert_eq!(bag.float("weight"), Some(42.0));
    assert_eq!(bag.integer("pieces"), Some(120));
    assert_eq!(bag.text("material"), Some("steel"));

    let link = product.single_part("movement").unwrap();
    let child = link.child.read();
    assert_eq!(child.name, "Movement");
    assert_eq!(bag_of(&child).integer("jewels"), Some(21));

    let gaskets = product.part_collection("gaskets");
    assert_eq!(gaskets.len(), 2);
}

#[tokio::test]
async fn test_unchanged_save_appends_no_version() {
    let (storage, store) = storage();

    let product = watch("W-100", 1, "Diver 300");
    let id = storage.save_type(&product).await.unwrap();

    let version_after_first = {
        let mut tx = store.begin().await.unwrap();
        tx.get_type(id).await.unwrap().unwrap().current_version_id
    };
    assert!(version_after_first.is_some());

    // Saving the same content again leaves the current version alone.
    storage.save_type(&product).await.unwrap();
    let version_after_second = {
        let mut tx = store.begin().await.unwrap();
        tx.get_type(id).await.unwrap().unwrap().current_version_id
    };
    assert_eq!(version_after_first, version_after_second);

    // A data change appends a new version.
    {
        let mut handle = product.write();
        handle
            .data
            .as_any_mut()
            .downcast_mut::<PropertyBag>()
            .unwrap()
            .set("pieces", PropertyValue::Integer(121));
    }
    storage.save_type(&product).await.unwrap();
    let version_after_change = {
        let mut tx = store.begin().await.unwrap();
        tx.get_type(id).await.unwrap().unwrap().current_version_id
    };
    assert_ne!(version_after_second, version_after_change);

    // So does a state transition with unchanged data.
    product.write().state = ProductState::Released;
    storage.save_type(&product).await.unwrap();
    let version_after_release = {
        let mut tx = store.begin().await.unwrap();
        tx.get_type(id).await.unwrap().unwrap().current_version_id
    };
    assert_ne!(version_after_change, version_after_release);

    let loaded = storage.load_type(id).await.unwrap().unwrap();
    assert_eq!(loaded.read().state, ProductState::Released);
    assert_eq!(bag_of(&loaded.read()).integer("pieces"), Some(121));
}

#[tokio::test]
async fn test_revision_bump_on_loaded_type_creates_new_row() {
    let (storage, _) = storage();

    let first = storage
        .save_type(&watch("W-100", 1, "Diver 300"))
        .await
        .unwrap();

    let reloaded = storage.load_type(first).await.unwrap().unwrap();
    {
        let mut product = reloaded.write();
        product.identity = Identity::Product(ProductIdentity::new("W-100", 2));
        product.name = "Diver 300 Mk II".to_string();
    }
    let second = storage.save_type(&reloaded).await.unwrap();
    assert_ne!(second, first);
    assert_eq!(reloaded.read().id, second);

    // The old revision keeps its row and its name.
    let old = storage
        .load_type_by_identity(&ProductIdentity::new("W-100", 1))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(old.read().id, first);
    assert_eq!(old.read().name, "Diver 300");

    let latest = storage
        .load_type_by_identity(&ProductIdentity::latest("W-100"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(latest.read().id, second);
    assert_eq!(latest.read().name, "Diver 300 Mk II");
}

#[tokio::test]
async fn test_shared_subtree_persists_once_and_reloads_shared() {
    let (storage, store) = storage();

    let shared = movement("M-10", 21);
    let first = watch("W-100", 1, "Diver 300");
    let second = watch("W-200", 1, "Field 38");
    for parent in [&first, &second] {
        parent.write().set_single_part(
            "movement",
            Some(mes_product_db::PartLink::new(
                shared.clone(),
                PropertyBag::boxed(),
            )),
        );
    }

    storage.save_types(&[first.clone(), second.clone()]).await.unwrap();
    let movement_id = shared.read().id;
    assert!(movement_id > 0);

    // One row, two links pointing at it.
    {
        let mut tx = store.begin().await.unwrap();
        assert_eq!(tx.links_to_child(movement_id).await.unwrap().len(), 2);
    }

    // One query materializes the shared child once.
    let loaded = storage
        .load_types(&ProductQuery::by_type("Watch"))
        .await
        .unwrap();
    assert_eq!(loaded.len(), 2);
    let children: Vec<ProductRef> = loaded
        .iter()
        .map(|p| p.read().single_part("movement").unwrap().child.clone())
        .collect();
    assert!(Arc::ptr_eq(&children[0], &children[1]));
}

#[tokio::test]
async fn test_link_diff_updates_inserts_and_deletes() {
    let (storage, store) = storage();

    let parent = watch("W-100", 1, "Diver 300");
    parent.write().set_part_collection(
        "gaskets",
        vec![
            mes_product_db::PartLink::new(gasket("G-1", "Crown gasket"), PropertyBag::boxed()),
            mes_product_db::PartLink::new(gasket("G-2", "Back gasket"), PropertyBag::boxed()),
        ],
    );
    let id = storage.save_type(&parent).await.unwrap();

    let reloaded = storage.load_type(id).await.unwrap().unwrap();
    {
        let mut product = reloaded.write();
        let mut gaskets: Vec<_> = product
            .part_collection("gaskets")
            .iter()
            .filter(|link| link.child.read().name == "Back gasket")
            .cloned()
            .collect();
        assert_eq!(gaskets.len(), 1);
        gaskets.push(mes_product_db::PartLink::new(
            gasket("G-3", "Bezel gasket"),
            PropertyBag::boxed(),
        ));
        product.set_part_collection("gaskets", gaskets);
    }
    storage.save_type(&reloaded).await.unwrap();

    let after = storage.load_type(id).await.unwrap().unwrap();
    let product = after.read();
    let mut names: Vec<String> = product
        .part_collection("gaskets")
        .iter()
        .map(|link| link.child.read().name.clone())
        .collect();
    names.sort();
    assert_eq!(names, ["Back gasket", "Bezel gasket"]);

    let mut tx = store.begin().await.unwrap();
    assert_eq!(tx.links_for_parent(id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_single_link_diff_updates_replaces_and_clears() {
    let (storage, store) = storage();

    let parent = watch("W-100", 1, "Diver 300");
    parent.write().set_single_part(
        "movement",
        Some(mes_product_db::PartLink::new(
            movement("M-10", 21),
            PropertyBag::boxed(),
        )),
    );
    let id = storage.save_type(&parent).await.unwrap();
    let first_link_id = parent.read().single_part("movement").unwrap().id;
    assert!(first_link_id > 0);

    // Unchanged reference updates the existing row instead of recreating it.
    storage.save_type(&parent).await.unwrap();
    {
        let mut tx = store.begin().await.unwrap();
        let rows = tx.links_for_parent(id).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, first_link_id);
    }

    // Swapping the child drops the old row and creates a fresh one.
    parent.write().set_single_part(
        "movement",
        Some(mes_product_db::PartLink::new(
            movement("M-20", 25),
            PropertyBag::boxed(),
        )),
    );
    storage.save_type(&parent).await.unwrap();
    let second_link_id = parent.read().single_part("movement").unwrap().id;
    assert_ne!(second_link_id, first_link_id);
    {
        let mut tx = store.begin().await.unwrap();
        let rows = tx.links_for_parent(id).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, second_link_id);
    }

    // Clearing the property removes the remaining row.
    parent.write().set_single_part("movement", None);
    storage.save_type(&parent).await.unwrap();
    let mut tx = store.begin().await.unwrap();
    assert!(tx.links_for_parent(id).await.unwrap().is_empty());

    let reloaded = storage.load_type(id).await.unwrap().unwrap();
    assert!(reloaded.read().single_part("movement").is_none());
}

#[tokio::test]
async fn test_latest_revision_and_identifier_queries() {
    let (storage, _) = storage();

    storage.save_type(&watch("W-100", 1, "Diver 300")).await.unwrap();
    storage.save_type(&watch("W-100", 2, "Diver 300 Mk II")).await.unwrap();
    storage.save_type(&watch("X-200", 1, "Field 38")).await.unwrap();

    let latest = storage
        .load_types(&ProductQuery::by_identifier("W*"))
        .await
        .unwrap();
    assert_eq!(latest.len(), 1);
    assert_eq!(latest[0].read().name, "Diver 300 Mk II");

    let mut all = ProductQuery::by_identifier("W*");
    all.revision_filter = RevisionFilter::All;
    assert_eq!(storage.load_types(&all).await.unwrap().len(), 2);

    let by_latest_identity = storage
        .load_type_by_identity(&ProductIdentity::latest("W-100"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        by_latest_identity.read().identity,
        Identity::Product(ProductIdentity::new("W-100", 2))
    );

    let by_specific = storage
        .load_type_by_identity(&ProductIdentity::new("W-100", 1))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(by_specific.read().name, "Diver 300");

    let by_name = storage
        .load_types(&ProductQuery {
            name: Some("mk ii".to_string()),
            ..ProductQuery::default()
        })
        .await
        .unwrap();
    assert_eq!(by_name.len(), 1);
}

#[tokio::test]
async fn test_property_filter_pushdown_and_recheck() {
    let (storage, _) = storage();

    for (identifier, pieces) in [("W-1", 5), ("W-2", 10), ("W-3", 20)] {
        let product = ProductType::new(
            "Watch",
            Identity::Product(ProductIdentity::new(identifier, 1)),
            identifier,
            watch_data(42.0, pieces, "steel"),
        )
        .into_ref();
        storage.save_type(&product).await.unwrap();
    }

    let mut query = ProductQuery::by_type("Watch");
    query.property_filter = Some(PropertyPredicate::compare(
        "pieces",
        CompareOp::Ge,
        PropertyValue::Integer(10),
    ));
    assert_eq!(storage.load_types(&query).await.unwrap().len(), 2);

    // A property outside the column map cannot be pushed down; the engine
    // falls back to the re-check, which finds no bag value and drops all.
    query.property_filter = Some(PropertyPredicate::eq(
        "caliber",
        PropertyValue::Text("2824".to_string()),
    ));
    assert!(storage.load_types(&query).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_delete_blocked_while_referenced_as_part() {
    let (storage, _) = storage();

    let parent = watch("W-100", 1, "Diver 300");
    let child = movement("M-10", 21);
    parent.write().set_single_part(
        "movement",
        Some(mes_product_db::PartLink::new(
            child.clone(),
            PropertyBag::boxed(),
        )),
    );
    let parent_id = storage.save_type(&parent).await.unwrap();
    let child_id = child.read().id;

    assert!(!storage.delete_type(child_id).await.unwrap());
    assert!(storage.load_type(child_id).await.unwrap().is_some());

    assert!(storage.delete_type(parent_id).await.unwrap());
    assert!(storage.load_type(parent_id).await.unwrap().is_none());

    // The parent's links went with it, so the child is free now.
    assert!(storage.delete_type(child_id).await.unwrap());
}

#[tokio::test]
async fn test_serial_identity_rejected_at_save() {
    let (storage, _) = storage();

    let product = ProductType::new(
        "Watch",
        Identity::Serial("SN-0001".to_string()),
        "Unit under test",
        PropertyBag::boxed(),
    )
    .into_ref();

    let err = storage.save_type(&product).await.unwrap_err();
    assert!(matches!(err, StorageError::UnsupportedIdentity(_)));
}

#[tokio::test]
async fn test_unconfigured_type_fails_saves_but_not_bulk_reads() {
    let (storage, store) = storage();

    storage.save_type(&watch("W-100", 1, "Diver 300")).await.unwrap();

    // A row whose type name has no configured strategy, as left behind by
    // an older deployment.
    let legacy_id = {
        let mut tx = store.begin().await.unwrap();
        let id = tx
            .insert_type(ProductTypeRow {
                id: 0,
                identifier: "L-1".to_string(),
                revision: 1,
                name: "Legacy".to_string(),
                type_name: "LegacyType".to_string(),
                current_version_id: None,
                deleted: None,
            })
            .await
            .unwrap();
        tx.commit().await.unwrap();
        id
    };

    // Bulk reads skip the unconfigured row.
    let all = storage.load_types(&ProductQuery::default()).await.unwrap();
    assert_eq!(all.len(), 1);

    // A targeted load is fatal.
    let err = storage.load_type(legacy_id).await.unwrap_err();
    assert!(matches!(err, StorageError::MissingStrategy { .. }));

    // So is saving an object of the unconfigured type.
    let orphan = ProductType::new(
        "LegacyType",
        Identity::Product(ProductIdentity::new("L-2", 1)),
        "Legacy",
        PropertyBag::boxed(),
    )
    .into_ref();
    let err = storage.save_type(&orphan).await.unwrap_err();
    assert!(matches!(err, StorageError::MissingStrategy { .. }));
}

#[tokio::test]
async fn test_instance_round_trip_skips_untracked_types() {
    let (storage, _) = storage();

    let parent = watch("W-100", 1, "Diver 300");
    parent.write().set_single_part(
        "movement",
        Some(mes_product_db::PartLink::new(
            movement("M-10", 21),
            PropertyBag::boxed(),
        )),
    );
    parent.write().set_part_collection(
        "gaskets",
        vec![mes_product_db::PartLink::new(
            gasket("G-1", "Crown gasket"),
            PropertyBag::boxed(),
        )],
    );
    let watch_id = storage.save_type(&parent).await.unwrap();
    let (movement_link_id, movement_type_id, gasket_type_id) = {
        let product = parent.read();
        let link = product.single_part("movement").unwrap();
        let movement_type_id = link.child.read().id;
        let gasket_type_id = product.part_collection("gaskets")[0].child.read().id;
        (link.id, movement_type_id, gasket_type_id)
    };

    let mut root = ProductInstance::new(watch_id, "Watch", PropertyBag::boxed());
    let mut movement_unit = ProductInstance::new(movement_type_id, "Movement", PropertyBag::boxed());
    movement_unit.part_link_id = Some(movement_link_id);
    root.parts.push(movement_unit);
    // Gasket instances are configured as not persisted.
    root.parts
        .push(ProductInstance::new(gasket_type_id, "Gasket", PropertyBag::boxed()));

    storage.save_instances(std::slice::from_mut(&mut root)).await.unwrap();
    assert!(root.id > 0);
    assert!(root.parts[0].id > 0);
    assert_eq!(root.parts[1].id, 0);

    let loaded = storage.load_instances(&[root.id]).await.unwrap();
    assert_eq!(loaded.len(), 1);
    assert_eq!(loaded[0].type_name, "Watch");
    assert_eq!(loaded[0].parts.len(), 1);
    assert_eq!(loaded[0].parts[0].type_name, "Movement");
    assert_eq!(loaded[0].parts[0].part_link_id, Some(movement_link_id));
}

#[tokio::test]
async fn test_instance_with_stale_part_link_is_dropped() {
    let (storage, store) = storage();

    let watch_id = storage.save_type(&watch("W-100", 1, "Diver 300")).await.unwrap();
    let movement_id = storage.save_type(&movement("M-10", 21)).await.unwrap();

    let mut root = ProductInstance::new(watch_id, "Watch", PropertyBag::boxed());
    let mut unit = ProductInstance::new(movement_id, "Movement", PropertyBag::boxed());
    // Bound to a part link that does not exist on the type anymore.
    unit.part_link_id = Some(99_999);
    root.parts.push(unit);
    storage.save_instances(std::slice::from_mut(&mut root)).await.unwrap();

    // The child row is persisted regardless, the filter applies on load.
    {
        let mut tx = store.begin().await.unwrap();
        assert_eq!(tx.instance_children(root.id).await.unwrap().len(), 1);
    }
    let loaded = storage.load_instances(&[root.id]).await.unwrap();
    assert!(loaded[0].parts.is_empty());
}

#[tokio::test]
async fn test_instance_query_with_property_filter() {
    let (storage, _) = storage();

    let watch_id = storage.save_type(&watch("W-100", 1, "Diver 300")).await.unwrap();
    for pieces in [5, 20] {
        let mut bag = PropertyBag::new();
        bag.set("pieces", PropertyValue::Integer(pieces));
        let mut instance = ProductInstance::new(watch_id, "Watch", Box::new(bag));
        storage
            .save_instances(std::slice::from_mut(&mut instance))
            .await
            .unwrap();
    }

    let filter = PropertyPredicate::compare("pieces", CompareOp::Ge, PropertyValue::Integer(10));
    let matched = storage.query_instances("Watch", Some(&filter)).await.unwrap();
    assert_eq!(matched.len(), 1);

    let all = storage.query_instances("Watch", None).await.unwrap();
    assert_eq!(all.len(), 2);
}

#[tokio::test]
async fn test_recipe_round_trip_and_clone_masking() {
    let (storage, _) = storage();

    let product_id = storage.save_type(&watch("W-100", 1, "Diver 300")).await.unwrap();

    let mut recipe = storage.create_recipe("AssemblyRecipe").unwrap();
    recipe.name = "Standard assembly".to_string();
    recipe.classification = RecipeClassification::DEFAULT;
    recipe.product_id = product_id;
    recipe
        .data
        .as_any_mut()
        .downcast_mut::<PropertyBag>()
        .unwrap()
        .set("takt_seconds", PropertyValue::Integer(95));

    let recipe_id = storage.save_recipe(&mut recipe).await.unwrap();
    assert!(recipe_id > 0);

    let loaded = storage.load_recipe(recipe_id).await.unwrap().unwrap();
    assert_eq!(loaded.name, "Standard assembly");
    assert_eq!(loaded.classification, RecipeClassification::DEFAULT);
    assert_eq!(loaded.product_id, product_id);
    let bag = loaded.data.as_any().downcast_ref::<PropertyBag>().unwrap();
    assert_eq!(bag.integer("takt_seconds"), Some(95));

    let mut clone = loaded.derive_clone();
    storage.save_recipe(&mut clone).await.unwrap();

    let defaults = storage
        .load_recipes(product_id, RecipeClassification::DEFAULT)
        .await
        .unwrap();
    assert_eq!(defaults.len(), 1);
    assert_eq!(defaults[0].id, recipe_id);

    let with_clones = storage
        .load_recipes(
            product_id,
            RecipeClassification::DEFAULT | RecipeClassification::CLONE,
        )
        .await
        .unwrap();
    assert_eq!(with_clones.len(), 2);

    assert!(storage.delete_recipe(clone.id).await.unwrap());
    assert!(!storage.delete_recipe(clone.id).await.unwrap());
}

#[tokio::test]
async fn test_recipe_requires_existing_product() {
    let (storage, _) = storage();

    let mut recipe = storage.create_recipe("AssemblyRecipe").unwrap();
    recipe.name = "Orphaned".to_string();
    recipe.product_id = 12_345;

    let err = storage.save_recipe(&mut recipe).await.unwrap_err();
    assert!(matches!(err, StorageError::ProductNotFound(12_345)));
}

fn mount_step(id: u64, name: &str, input: ConnectorSlot, output: ConnectorSlot) -> WorkplanStep {
    WorkplanStep {
        id,
        name: name.to_string(),
        type_name: "MountStep".to_string(),
        kind: StepKind::Task {
            parameters: json!({"torque": 2.5}),
            output_descriptions: vec![OutputDescription {
                output_type: OutputType::Success,
                name: "done".to_string(),
                mapping_value: 1,
            }],
        },
        inputs: vec![input],
        outputs: vec![output],
    }
}

type ConnectorSlot = Option<mes_product_db::ConnectorRef>;

#[tokio::test]
async fn test_workplan_round_trip_with_shared_connectors() {
    let (storage, _) = storage();

    let start = Connector::new(1, "start", ConnectorClassification::Start);
    let mid = Connector::new(2, "handoff", ConnectorClassification::Intermediate);
    let end = Connector::new(3, "end", ConnectorClassification::End);

    let mut workplan = Workplan::new("Case assembly");
    workplan.connectors = vec![start.clone(), mid.clone(), end.clone()];
    workplan.steps = vec![
        mount_step(10, "Mount movement", Some(start), Some(mid.clone())),
        mount_step(11, "Close case", Some(mid), Some(end)),
    ];

    let id = storage.save_workplan(&mut workplan).await.unwrap();
    let loaded = storage.load_workplan(id).await.unwrap().unwrap();

    assert_eq!(loaded.name, "Case assembly");
    assert_eq!(loaded.version, 1);
    assert_eq!(loaded.steps.len(), 2);
    assert_eq!(loaded.steps[0].name, "Mount movement");
    assert_eq!(loaded.steps[1].name, "Close case");

    // Both steps resolve the handoff connector to the same handle.
    let first_out = loaded.steps[0].outputs[0].as_ref().unwrap();
    let second_in = loaded.steps[1].inputs[0].as_ref().unwrap();
    assert!(Arc::ptr_eq(first_out, second_in));
    assert_eq!(first_out.read().name, "handoff");

    // Stored parameters overlay the registered defaults.
    match &loaded.steps[0].kind {
        StepKind::Task {
            parameters,
            output_descriptions,
        } => {
            assert_eq!(parameters, &json!({"torque": 2.5, "retries": 3}));
            assert_eq!(output_descriptions.len(), 1);
            assert_eq!(output_descriptions[0].name, "done");
        }
        StepKind::SubWorkplan { .. } => panic!("expected a task step"),
    }
}

#[tokio::test]
async fn test_workplan_version_bump_preserves_old_row() {
    let (storage, _) = storage();

    let start = Connector::new(1, "start", ConnectorClassification::Start);
    let end = Connector::new(2, "end", ConnectorClassification::End);
    let mut workplan = Workplan::new("Case assembly");
    workplan.connectors = vec![start.clone(), end.clone()];
    workplan.steps = vec![
        mount_step(10, "Mount movement", Some(start.clone()), Some(end.clone())),
        mount_step(11, "Close case", Some(start.clone()), Some(end.clone())),
    ];
    let first_id = storage.save_workplan(&mut workplan).await.unwrap();

    // Same version: the stored plan is updated in place.
    workplan.state = WorkplanState::Released;
    assert_eq!(storage.save_workplan(&mut workplan).await.unwrap(), first_id);
    let reloaded = storage.load_workplan(first_id).await.unwrap().unwrap();
    assert_eq!(reloaded.state, WorkplanState::Released);

    // Bumped version: a fresh row, the released plan stays untouched.
    workplan.steps.truncate(1);
    workplan.version = 2;
    let second_id = storage.save_workplan(&mut workplan).await.unwrap();
    assert_ne!(second_id, first_id);
    assert_eq!(workplan.id, second_id);

    let old = storage.load_workplan(first_id).await.unwrap().unwrap();
    assert_eq!(old.version, 1);
    assert_eq!(old.steps.len(), 2);

    let new = storage.load_workplan(second_id).await.unwrap().unwrap();
    assert_eq!(new.version, 2);
    assert_eq!(new.steps.len(), 1);
}

#[tokio::test]
async fn test_step_upsert_and_connector_cleanup_within_version() {
    let (storage, store) = storage();

    let start = Connector::new(1, "start", ConnectorClassification::Start);
    let mid = Connector::new(2, "handoff", ConnectorClassification::Intermediate);
    let end = Connector::new(3, "end", ConnectorClassification::End);
    let mut workplan = Workplan::new("Case assembly");
    workplan.connectors = vec![start.clone(), mid.clone(), end.clone()];
    workplan.steps = vec![
        mount_step(10, "Mount movement", Some(start.clone()), Some(mid.clone())),
        mount_step(11, "Close case", Some(mid.clone()), Some(end.clone())),
    ];
    let id = storage.save_workplan(&mut workplan).await.unwrap();

    // Collapse to one step wired straight through; the handoff connector
    // loses its last reference.
    workplan.connectors = vec![start.clone(), end.clone()];
    workplan.steps = vec![mount_step(10, "Assemble", Some(start), Some(end))];
    storage.save_workplan(&mut workplan).await.unwrap();

    let loaded = storage.load_workplan(id).await.unwrap().unwrap();
    assert_eq!(loaded.steps.len(), 1);
    assert_eq!(loaded.steps[0].name, "Assemble");
    assert_eq!(loaded.connectors.len(), 2);

    let mut tx = store.begin().await.unwrap();
    assert_eq!(tx.workplan_connectors(id).await.unwrap().len(), 2);
    assert_eq!(tx.workplan_steps(id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_recipe_with_workplan_and_sub_workplan() {
    let (storage, _) = storage();

    let product_id = storage.save_type(&watch("W-100", 1, "Diver 300")).await.unwrap();

    let inner_start = Connector::new(1, "start", ConnectorClassification::Start);
    let inner_end = Connector::new(2, "end", ConnectorClassification::End);
    let mut inner = Workplan::new("Movement prep");
    inner.connectors = vec![inner_start.clone(), inner_end.clone()];
    inner.steps = vec![mount_step(20, "Oil jewels", Some(inner_start), Some(inner_end))];

    let start = Connector::new(1, "start", ConnectorClassification::Start);
    let end = Connector::new(2, "end", ConnectorClassification::End);
    let mut outer = Workplan::new("Full assembly");
    outer.connectors = vec![start.clone(), end.clone()];
    outer.steps = vec![
        WorkplanStep {
            id: 10,
            name: "Prepare movement".to_string(),
            type_name: "SubWorkplan".to_string(),
            kind: StepKind::SubWorkplan { workplan: inner },
            inputs: vec![Some(start.clone())],
            outputs: vec![Some(end.clone())],
        },
        WorkplanStep {
            id: 11,
            name: "Final inspection".to_string(),
            type_name: "InspectStep".to_string(),
            kind: StepKind::Task {
                parameters: json!({"samples": 3}),
                output_descriptions: Vec::new(),
            },
            inputs: vec![Some(start)],
            outputs: vec![Some(end)],
        },
    ];

    let mut recipe = storage.create_recipe("AssemblyRecipe").unwrap();
    recipe.name = "With workplan".to_string();
    recipe.classification = RecipeClassification::DEFAULT;
    recipe.product_id = product_id;
    recipe.workplan = Some(outer);

    let recipe_id = storage.save_recipe(&mut recipe).await.unwrap();
    let loaded = storage.load_recipe(recipe_id).await.unwrap().unwrap();

    let workplan = loaded.workplan.unwrap();
    assert_eq!(workplan.name, "Full assembly");
    assert_eq!(workplan.steps.len(), 2);
    match &workplan.steps[0].kind {
        StepKind::SubWorkplan { workplan } => {
            assert_eq!(workplan.name, "Movement prep");
            assert_eq!(workplan.steps.len(), 1);
        }
        StepKind::Task { .. } => panic!("expected a sub-workplan step"),
    }
}
