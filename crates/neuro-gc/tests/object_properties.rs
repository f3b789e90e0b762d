//! Property map behavior of the generic object.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};

use neuro_gc::{Identifier, Object, ObjectPtr, Value};

#[test]
fn property_set_get_round_trip() {
    let _session = common::session();

    let obj = Object::create(4, 0).unwrap();
    obj.set("foobar", 42i32).unwrap();
    obj.set("barfoo", 420i32).unwrap();
    obj.set("testeroo", 6969i32).unwrap();

    assert_eq!(obj.length(), 3);
    assert_eq!(obj.get("foobar"), Value::Int(42));
    assert_eq!(obj.get("barfoo"), Value::Int(420));
    assert_eq!(obj.get("testeroo"), Value::Int(6969));
    assert_eq!(obj.get("unset"), Value::UNDEFINED);
}

#[test]
fn manual_recreate_preserves_properties() {
    let _session = common::session();

    let obj = Object::create(4, 0).unwrap();
    obj.set("foobar", 42i32).unwrap();
    obj.set("barfoo", 420i32).unwrap();
    obj.set("testeroo", 6969i32).unwrap();

    let same = Object::recreate(obj, 8, 0).unwrap();
    assert_eq!(same, obj, "recreate keeps the handle");
    assert_eq!(obj.capacity(), 8);
    assert_eq!(obj.length(), 3);
    assert_eq!(obj.get("foobar"), Value::Int(42));
    assert_eq!(obj.get("barfoo"), Value::Int(420));
    assert_eq!(obj.get("testeroo"), Value::Int(6969));
}

#[test]
fn overwrite_replaces_value_and_tag() {
    let _session = common::session();

    let obj = Object::create(4, 0).unwrap();
    let id = Identifier::lookup("mutable");

    obj.set_property(id, Value::Int(1)).unwrap();
    assert_eq!(obj.get_property(id), Value::Int(1));

    obj.set_property(id, Value::Double(2.5)).unwrap();
    assert_eq!(obj.get_property(id), Value::Double(2.5));
    assert_eq!(obj.length(), 1, "overwrite reuses the slot");
}

#[test]
fn full_map_grows_on_insert() {
    let _session = common::session();

    let obj = Object::create(2, 0).unwrap();
    assert_eq!(obj.capacity(), 2);

    // capacity + 1 distinct identifiers force one growth.
    obj.set("alpha", 1i32).unwrap();
    obj.set("beta", 2i32).unwrap();
    obj.set("gamma", 3i32).unwrap();

    assert!(obj.capacity() > 2);
    assert_eq!(obj.length(), 3);
    assert_eq!(obj.get("alpha"), Value::Int(1));
    assert_eq!(obj.get("beta"), Value::Int(2));
    assert_eq!(obj.get("gamma"), Value::Int(3));
}

#[test]
fn many_properties_stay_readable() {
    let _session = common::session();

    let obj = Object::create(4, 0).unwrap();
    for i in 0..64i32 {
        obj.set(&format!("prop_{i}"), i).unwrap();
    }

    assert_eq!(obj.length(), 64);
    for i in 0..64i32 {
        assert_eq!(obj.get(&format!("prop_{i}")), Value::Int(i), "prop_{i}");
    }
}

#[test]
fn iteration_skips_empty_slots() {
    let _session = common::session();

    let obj = Object::create(3, 7).unwrap();
    obj.set("one", 1i32).unwrap();
    obj.set("two", 2i32).unwrap();

    let props = obj.properties();
    assert_eq!(props.len(), 2);

    let one = Identifier::lookup("one");
    let two = Identifier::lookup("two");
    assert!(props.contains(&(one, Value::Int(1))));
    assert!(props.contains(&(two, Value::Int(2))));
}

#[test]
fn mixed_value_types() {
    let _session = common::session();

    let obj = Object::create(8, 0).unwrap();
    obj.set("flag", true).unwrap();
    obj.set("byte", 7u8).unwrap();
    obj.set("ratio", 0.25f64).unwrap();
    obj.set("big", u64::MAX).unwrap();

    assert_eq!(obj.get("flag"), Value::Bool(true));
    assert_eq!(obj.get("byte"), Value::UByte(7));
    assert_eq!(obj.get("ratio"), Value::Double(0.25));
    assert_eq!(obj.get("big"), Value::ULong(u64::MAX));
}

#[test]
fn object_valued_properties() {
    let _session = common::session();

    let parent = Object::create(4, 0).unwrap();
    let child = Object::create(4, 0).unwrap();
    child.set("tag", 99i32).unwrap();

    parent.set("child", Value::Object(child)).unwrap();

    let loaded = parent.get("child").as_object().unwrap();
    assert_eq!(loaded, child);
    assert_eq!(loaded.get("tag"), Value::Int(99));
}

static MOVES: AtomicUsize = AtomicUsize::new(0);

fn count_move(_: ObjectPtr) {
    MOVES.fetch_add(1, Ordering::SeqCst);
}

#[test]
fn recreate_fires_move_handler() {
    let _session = common::session();
    MOVES.store(0, Ordering::SeqCst);

    let obj = Object::create(2, 0).unwrap();
    obj.add_move_handler(count_move).unwrap();
    obj.set("x", 1i32).unwrap();

    Object::recreate(obj, 6, 0).unwrap();
    assert_eq!(MOVES.load(Ordering::SeqCst), 1);

    // Growth through a full map recreates as well.
    obj.set("y", 2i32).unwrap();
    obj.set("z", 3i32).unwrap();
    obj.set("w", 4i32).unwrap();
    obj.set("v", 5i32).unwrap();
    obj.set("u", 6i32).unwrap();
    obj.set("t", 7i32).unwrap();
    assert!(MOVES.load(Ordering::SeqCst) >= 2);
}

#[test]
fn recreate_same_capacity_is_a_no_op() {
    let _session = common::session();
    MOVES.store(0, Ordering::SeqCst);

    let obj = Object::create(4, 0).unwrap();
    obj.add_move_handler(count_move).unwrap();

    Object::recreate(obj, 4, 0).unwrap();
    assert_eq!(obj.capacity(), 4);
    assert_eq!(MOVES.load(Ordering::SeqCst), 0);
}
