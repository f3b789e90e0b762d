//! The Neuro runtime substrate: a concurrent, compacting, tracing garbage
//! collector and the classless object model it manages.
//!
//! Managed allocations are never addressed directly. Every allocation is
//! registered in a process-wide **indirection table** and reached through a
//! [`Handle`] — a table index plus a salted registration uid. The collector
//! relocates allocations at will during compaction and merely retargets
//! table records; handles stay valid, reclaimed slots can never be confused
//! with their previous tenants.
//!
//! # Architecture
//!
//! - [`ident`] — interns property names into dense 32-bit ids through a
//!   lock-free binary search tree.
//! - [`header`] — the per-allocation overhead: shape, collection state,
//!   relocation/finalization callbacks.
//! - [`segment`] — bump-allocated arena chains, one for trivial and one for
//!   non-trivial memory.
//! - [`table`] — the indirection table: lock-free resolution, shared-mode
//!   record updates, writer-priority page growth.
//! - [`handle`] — typed and untyped managed pointers.
//! - [`value`] — the tagged runtime value held by object properties.
//! - [`object`] — the classless object with its inline open-addressed
//!   property map.
//! - [`gc`] — the collector core and its background scan/sweep/compact
//!   cycle.
//! - [`sync`] — the writer-priority readers/writer lock the table builds
//!   on.
//!
//! # Quick start
//!
//! ```no_run
//! use neuro_gc::{Collector, Object, Value};
//!
//! neuro_gc::init().unwrap();
//!
//! let obj = Object::create(4, 0).unwrap();
//! obj.root().unwrap();
//! obj.set("answer", 42i32).unwrap();
//! assert_eq!(obj.get("answer"), Value::Int(42));
//!
//! // The background thread collects unreachable objects periodically;
//! // tests drive cycles explicitly instead:
//! Collector::instance().unwrap().collect_now();
//!
//! neuro_gc::destroy().unwrap();
//! ```
//!
//! # Threading
//!
//! Any number of mutator threads may allocate, resolve and mutate
//! concurrently with the single collector thread. There is no
//! stop-the-world phase: compaction excludes allocators from one segment
//! at a time, and the indirection table absorbs relocations.

#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]

pub mod error;
pub mod gc;
pub mod handle;
pub mod header;
pub mod ident;
pub mod metrics;
pub mod object;
pub mod segment;
pub mod sync;
pub mod table;
pub mod value;

pub use error::{Error, Result};
pub use gc::{destroy, init, init_with_config, Collector, CollectorConfig, Scanner};
pub use handle::{Handle, RawHandle};
pub use ident::{reset_registry, Identifier, EMPTY_ID};
pub use metrics::CycleStats;
pub use object::{Object, ObjectPtr, DEFAULT_SLACK};
pub use sync::ReverseSemaphore;
pub use value::{Value, ValueType};
