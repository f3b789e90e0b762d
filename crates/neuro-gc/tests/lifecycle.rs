//! Collector lifecycle: init, destroy, restart.

use std::time::Duration;

use neuro_gc::{Collector, CollectorConfig, Error, Object};

fn test_config() -> CollectorConfig {
    CollectorConfig {
        scan_interval: Duration::from_secs(3600),
        ..CollectorConfig::default()
    }
}

/// One test exercises the whole lifecycle, since init/destroy are
/// process-global and this binary runs its tests in parallel.
#[test]
fn lifecycle_round_trip() {
    assert!(Collector::instance().is_none());
    assert_eq!(neuro_gc::destroy(), Err(Error::InvalidState));

    neuro_gc::init_with_config(test_config()).unwrap();
    assert!(Collector::instance().is_some());

    // Double init is rejected and leaves the collector intact.
    assert_eq!(neuro_gc::init(), Err(Error::InvalidState));
    assert!(Collector::instance().is_some());

    // Handles held across destroy resolve to null instead of dangling.
    let obj = Object::create(4, 0).unwrap();
    obj.root().unwrap();
    obj.set("x", 1i32).unwrap();
    assert!(obj.is_resolvable());

    neuro_gc::destroy().unwrap();
    assert!(Collector::instance().is_none());
    assert!(!obj.is_resolvable());
    assert!(obj.resolve().is_none());

    // The collector restarts cleanly after a destroy.
    neuro_gc::init_with_config(test_config()).unwrap();
    let fresh = Object::create(2, 0).unwrap();
    fresh.set("y", 2i32).unwrap();
    assert_eq!(fresh.length(), 1);
    neuro_gc::destroy().unwrap();
}

#[test]
fn object_creation_requires_collector() {
    // Runs in the same process; only assert the uninitialized path when no
    // other test currently holds the collector.
    if Collector::instance().is_none() {
        assert_eq!(Object::create(4, 0), Err(Error::InvalidState));
    }
}
