//! Integration tests for script events driven through a custom host.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use kiln_ecs::prelude::*;
use uuid::Uuid;

type Journal = Rc<RefCell<Vec<String>>>;

struct Counter {
    class: String,
    journal: Journal,
}

impl Scriptable for Counter {
    fn has_method(&self, method: &str) -> bool {
        method != "OnUpdate" || self.class == "Ticker"
    }

    fn invoke(&mut self, method: &str) {
        self.journal.borrow_mut().push(format!("{}:{method}", self.class));
    }
}

#[derive(Default)]
struct Host {
    objects: HashMap<Uuid, Counter>,
    owners: HashMap<Uuid, Uuid>,
    journal: Journal,
}

impl ScriptHost for Host {
    fn create_object(&mut self, class: &str, object_id: Uuid, entity_id: Uuid) -> bool {
        if class == "Missing" {
            return false;
        }
        self.owners.insert(object_id, entity_id);
        self.objects.insert(
            object_id,
            Counter {
                class: class.to_owned(),
                journal: Rc::clone(&self.journal),
            },
        );
        true
    }

    fn object(&mut self, object_id: Uuid) -> Option<&mut dyn Scriptable> {
        self.objects
            .get_mut(&object_id)
            .map(|o| o as &mut dyn Scriptable)
    }

    fn destroy_object(&mut self, object_id: Uuid) {
        self.owners.remove(&object_id);
        if let Some(object) = self.objects.remove(&object_id) {
            self.journal.borrow_mut().push(format!("{}:destroyed", object.class));
        }
    }
}

/// Route registry logs to the test output; `RUST_LOG` overrides the level.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

fn setup() -> (EntityRegistry, Journal) {
    init_tracing();
    for class in ["Ticker", "Sleeper", "Missing"] {
        EntityRegistry::register_script(class);
    }
    let host = Host::default();
    let journal = Rc::clone(&host.journal);
    let mut registry = EntityRegistry::with_config(RegistryConfig {
        start_loaded: false,
        ..RegistryConfig::default().with_seed(3)
    });
    registry.set_script_host(Box::new(host));
    (registry, journal)
}

fn drain(journal: &Journal) -> Vec<String> {
    std::mem::take(&mut *journal.borrow_mut())
}

#[test]
fn update_reaches_only_enabled_implementers() {
    let (mut registry, journal) = setup();
    let ticking = registry.create();
    let sleeping = registry.create();
    let disabled = registry.create();
    registry.emplace_by_name(ticking, "Ticker").unwrap();
    registry.emplace_by_name(sleeping, "Sleeper").unwrap();
    registry.emplace_by_name(disabled, "Ticker").unwrap();
    registry.disable(disabled);
    drain(&journal);

    registry.update_scripts();
    assert_eq!(drain(&journal), ["Ticker:OnUpdate"]);
}

#[test]
fn load_and_unload_bracket_enable_events() {
    let (mut registry, journal) = setup();
    let e = registry.create();
    registry.emplace_by_name(e, "Sleeper").unwrap();
    assert_eq!(drain(&journal), ["Sleeper:OnCreate"]);

    registry.set_loaded(true);
    assert_eq!(drain(&journal), ["Sleeper:OnLoad", "Sleeper:OnEnable"]);
    registry.disable(e);
    registry.enable(e);
    assert_eq!(drain(&journal), ["Sleeper:OnDisable", "Sleeper:OnEnable"]);
    registry.set_loaded(false);
    assert_eq!(drain(&journal), ["Sleeper:OnDisable", "Sleeper:OnUnload"]);
}

#[test]
fn refused_class_attaches_nothing() {
    let (mut registry, _journal) = setup();
    let e = registry.create();
    assert!(registry.emplace_by_name(e, "Missing").is_none());
    assert!(registry.script_classes(e).is_empty());
}

#[test]
fn component_destroy_request_tears_down_one_script() {
    let (mut registry, journal) = setup();
    registry.set_loaded(true);
    let e = registry.create();
    registry.emplace_by_name(e, "Ticker").unwrap();
    registry.emplace_by_name(e, "Sleeper").unwrap();
    drain(&journal);

    registry.destroy_component(e, "Sleeper");
    registry.destroy_component(e, "Sleeper");
    let report = registry.destroy_queued();

    assert_eq!(report.components_removed, 1);
    assert_eq!(
        drain(&journal),
        ["Sleeper:OnDisable", "Sleeper:OnUnload", "Sleeper:OnDestroy", "Sleeper:destroyed"]
    );
    assert_eq!(registry.script_classes(e), vec!["Ticker".to_owned()]);
}

#[test]
fn clone_gets_its_own_script_objects() {
    let (mut registry, journal) = setup();
    let original = registry.create_named("Original");
    registry.emplace_by_name(original, "Ticker").unwrap();
    let copy = registry.clone_entity(original).unwrap();
    assert_eq!(drain(&journal), ["Ticker:OnCreate", "Ticker:OnCreate"]);
    assert_eq!(registry.get_name(copy), "Original");

    registry.destroy_immediate(original, false);
    assert_eq!(drain(&journal), ["Ticker:OnDestroy", "Ticker:destroyed"]);
    registry.update_scripts();
    assert_eq!(drain(&journal), ["Ticker:OnUpdate"]);
}

#[test]
fn clear_destroys_every_object() {
    let (mut registry, journal) = setup();
    for _ in 0..3 {
        let e = registry.create();
        registry.emplace_by_name(e, "Sleeper").unwrap();
    }
    drain(&journal);
    registry.clear();
    let events = drain(&journal);
    assert_eq!(events.iter().filter(|e| *e == "Sleeper:OnDestroy").count(), 3);
    assert_eq!(events.iter().filter(|e| *e == "Sleeper:destroyed").count(), 3);
    assert!(registry.is_empty());
}
