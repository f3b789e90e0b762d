//! Identifier interning across the object model.

mod common;

use std::thread;

use neuro_gc::{Identifier, Object, Value, EMPTY_ID};

#[test]
fn identifiers_are_stable_across_objects() {
    let _session = common::session();

    let id = Identifier::lookup("shared_key");

    let a = Object::create(4, 0).unwrap();
    let b = Object::create(4, 0).unwrap();
    a.set_property(id, Value::Int(1)).unwrap();
    b.set_property(id, Value::Int(2)).unwrap();

    // Same id, independent slots.
    assert_eq!(a.get_property(id), Value::Int(1));
    assert_eq!(b.get_property(id), Value::Int(2));
    assert_eq!(Identifier::lookup("shared_key"), id);
}

#[test]
fn interning_is_first_come_first_serve() {
    let ids: Vec<Identifier> = ["x", "y", "z", "x", "y", "z"]
        .iter()
        .map(|name| Identifier::lookup(name))
        .collect();

    assert_eq!(ids[0], ids[3]);
    assert_eq!(ids[1], ids[4]);
    assert_eq!(ids[2], ids[5]);
    assert_ne!(ids[0], ids[1]);
    assert_ne!(ids[1], ids[2]);
}

#[test]
fn ids_never_collide_with_the_empty_sentinel() {
    for i in 0..512 {
        let id = Identifier::lookup(&format!("sentinel_check_{i}"));
        assert_ne!(id.uid(), EMPTY_ID);
    }
}

#[test]
fn concurrent_lookup_and_property_use() {
    let _session = common::session();

    let obj = Object::create(16, 0).unwrap();
    obj.root().unwrap();

    let mut handles = Vec::new();
    for t in 0..4 {
        let obj = obj;
        handles.push(thread::spawn(move || {
            for i in 0..16 {
                let id = Identifier::lookup(&format!("concurrent_{i}"));
                obj.set_property(id, Value::Int(t * 100 + i)).unwrap();
                assert!(!obj.get_property(id).is_undefined());
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    // One slot per identifier, regardless of how many threads raced.
    assert_eq!(obj.length(), 16);
}
