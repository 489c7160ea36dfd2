use std::sync::Arc;
use std::thread;

use plugkeys::key::{KeyRegistry, KeySpace, PluginKind, TagKind};
use plugkeys::settings::IdSpace;

#[test]
fn lookup_is_idempotent_and_case_insensitive() {
    let registry = KeyRegistry::<PluginKind>::new();
    let first = registry.get_or_create("Foo");
    let again = registry.get_or_create("Foo");
    let lower = registry.get_or_create("foo");
    assert!(first.is_same(&again));
    assert!(first.is_same(&lower));
    assert_eq!(first, lower);
    assert_eq!(registry.len(), 1);
    // the first spelling wins
    assert_eq!(lower.name(), "Foo");
}

#[test]
fn get_does_not_create() {
    let registry = KeyRegistry::<TagKind>::new();
    assert!(registry.get("missing").is_none());
    assert!(registry.is_empty());
    let key = registry.get_or_create("Present");
    assert_eq!(registry.get("PRESENT"), Some(key));
    assert!(registry.contains("present"));
}

#[test]
fn ids_increase_in_creation_order() {
    let registry = KeyRegistry::<TagKind>::new();
    let a = registry.get_or_create("a");
    let b = registry.get_or_create("b");
    let c = registry.get_or_create("c");
    assert!(a.id() < b.id() && b.id() < c.id());
    let names: Vec<_> = registry.keys().iter().map(|k| k.name().to_owned()).collect();
    assert_eq!(names, vec!["a", "b", "c"]);
}

#[test]
fn same_id_in_different_kinds_is_not_equal() {
    let keys = KeySpace::new(IdSpace::PerKind);
    let tag = keys.tag("x");
    let plugin = keys.plugin("x");
    // per kind counting starts at 1 for both
    assert_eq!(tag.id(), 1);
    assert_eq!(plugin.id(), 1);
    assert_ne!(tag.erase(), plugin.erase());
    assert_eq!(tag.erase(), keys.tag("X").erase());
}

#[test]
fn shared_id_space_never_repeats_an_id() {
    let keys = KeySpace::new(IdSpace::Shared);
    let tag = keys.tag("speed");
    let plugin = keys.plugin("speed");
    let trigger = keys.trigger("speed");
    assert_ne!(tag.id(), plugin.id());
    assert_ne!(plugin.id(), trigger.id());
    assert_ne!(tag.id(), trigger.id());
}

#[test]
fn well_known_triggers_are_interned_up_front() {
    let keys = KeySpace::default();
    assert!(keys.assign().is_same(&keys.trigger("ASSIGN")));
    assert!(keys.unassign().is_same(&keys.trigger("unassign")));
    assert!(keys.destroy().is_same(&keys.trigger("Destroy")));
    assert_eq!(keys.triggers().len(), 3);
}

#[test]
fn absent_key_is_unequal() {
    let keys = KeySpace::default();
    let key = Some(keys.plugin("weapon"));
    assert_ne!(key, None);
}

#[test]
fn concurrent_interning_yields_one_key() {
    let registry = Arc::new(KeyRegistry::<PluginKind>::new());
    let handles: Vec<_> = (0..8)
        .map(|i| {
            let registry = Arc::clone(&registry);
            thread::spawn(move || {
                let name = if i % 2 == 0 { "Shared" } else { "SHARED" };
                registry.get_or_create(name)
            })
        })
        .collect();
    let keys: Vec<_> = handles.into_iter().map(|h| h.join().expect("thread")).collect();
    assert!(keys.windows(2).all(|w| w[0].is_same(&w[1])));
    assert_eq!(registry.len(), 1);
}
