//! Builds an object graph, lets the collector reclaim the unreachable
//! half, and prints the cycle statistics.
//!
//! Run with `cargo run --example object_graph`.

use std::time::Duration;

use neuro_gc::{Collector, CollectorConfig, Object, Value};

fn main() {
    neuro_gc::init_with_config(CollectorConfig {
        scan_interval: Duration::from_millis(200),
        ..CollectorConfig::default()
    })
    .expect("collector init");

    let collector = Collector::instance().unwrap();

    // A rooted binary tree of depth 10...
    let root = Object::create(4, 0).unwrap();
    root.root().unwrap();
    build_tree(root, 10);

    // ...and an equally sized unreachable one.
    let doomed = Object::create(4, 0).unwrap();
    build_tree(doomed, 10);

    println!("before: ~{} live records", tree_size(10) * 2);

    collector.collect_now();
    let stats = collector.last_cycle_stats();
    println!(
        "cycle {}: scanned {}, reclaimed {} ({} bytes), relocated {}",
        stats.cycle, stats.scanned, stats.reclaimed, stats.reclaimed_bytes, stats.relocated
    );

    assert!(root.is_resolvable());
    assert!(!doomed.is_resolvable());

    // The rooted tree is still fully traversable.
    let mut depth = 0;
    let mut cursor = root;
    while let Value::Object(next) = cursor.get("left") {
        cursor = next;
        depth += 1;
    }
    println!("left spine depth after collection: {depth}");

    neuro_gc::destroy().expect("collector destroy");
}

fn build_tree(node: neuro_gc::ObjectPtr, depth: u32) {
    if depth == 0 {
        return;
    }
    let left = Object::create(4, 0).unwrap();
    let right = Object::create(4, 0).unwrap();
    node.set("left", Value::Object(left)).unwrap();
    node.set("right", Value::Object(right)).unwrap();
    node.set("depth", depth).unwrap();
    build_tree(left, depth - 1);
    build_tree(right, depth - 1);
}

fn tree_size(depth: u32) -> u64 {
    (1u64 << (depth + 1)) - 1
}
