//! Interned property identifiers.
//!
//! Property names are interned process-wide into dense 32-bit ids. The
//! registry is an unbalanced binary search tree ordered by name, built for
//! lock-free insertion: readers traverse atomic child pointers, writers
//! publish fresh nodes with a compare-and-swap and retry on contention.
//! Ids are allocated monotonically; a lost insertion race wastes the
//! incremented id, which is accepted.

use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicU32, Ordering};

/// Id reserved for "empty property slot". Never handed out by the registry.
pub const EMPTY_ID: u32 = u32::MAX;

/// An interned property name.
///
/// Two identifiers compare equal iff they were interned from the same name
/// within the same process.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct Identifier(u32);

impl Identifier {
    /// Interns `name`, returning its process-wide id.
    ///
    /// Safe to call from any number of threads concurrently.
    #[must_use]
    pub fn lookup(name: &str) -> Self {
        registry().lookup(name)
    }

    /// The raw interned id.
    #[must_use]
    pub const fn uid(self) -> u32 {
        self.0
    }

    /// Reconstructs an identifier from a raw id.
    ///
    /// Intended for property iteration and serialization paths that already
    /// hold a valid id; fabricating ids that were never interned yields an
    /// identifier that matches no name.
    #[must_use]
    pub const fn from_uid(uid: u32) -> Self {
        Self(uid)
    }
}

struct Node {
    name: Box<str>,
    number: u32,
    left: AtomicPtr<Node>,
    right: AtomicPtr<Node>,
}

/// The process-wide interning tree.
pub(crate) struct Registry {
    root: AtomicPtr<Node>,
    next_number: AtomicU32,
}

static REGISTRY: Registry = Registry {
    root: AtomicPtr::new(ptr::null_mut()),
    next_number: AtomicU32::new(0),
};

pub(crate) fn registry() -> &'static Registry {
    &REGISTRY
}

impl Registry {
    fn alloc_node(&self, name: &str) -> *mut Node {
        let number = self.next_number.fetch_add(1, Ordering::Relaxed);
        assert!(number != EMPTY_ID, "identifier space exhausted");
        Box::into_raw(Box::new(Node {
            name: name.into(),
            number,
            left: AtomicPtr::new(ptr::null_mut()),
            right: AtomicPtr::new(ptr::null_mut()),
        }))
    }

    fn lookup(&self, name: &str) -> Identifier {
        // Deferred node creation: the common case is a hit, which must not
        // burn an id.
        let mut fresh: *mut Node = ptr::null_mut();

        let mut link = &self.root;
        let mut curr = link.load(Ordering::Acquire);

        // Descend to the insertion point, resuming from the updated child
        // whenever a CAS loses.
        let result = loop {
            if curr.is_null() {
                if fresh.is_null() {
                    fresh = self.alloc_node(name);
                }
                match link.compare_exchange(
                    ptr::null_mut(),
                    fresh,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                ) {
                    // SAFETY: `fresh` was just published; its number field
                    // is immutable.
                    Ok(_) => break unsafe { (*fresh).number },
                    Err(updated) => {
                        curr = updated;
                        continue;
                    }
                }
            }

            // SAFETY: published nodes are never freed while lookups run.
            let node = unsafe { &*curr };
            match name.cmp(&node.name) {
                std::cmp::Ordering::Less => {
                    link = &node.left;
                    curr = link.load(Ordering::Acquire);
                }
                std::cmp::Ordering::Greater => {
                    link = &node.right;
                    curr = link.load(Ordering::Acquire);
                }
                std::cmp::Ordering::Equal => break node.number,
            }
        };

        // Discard the speculative node if an existing entry won.
        if !fresh.is_null() {
            // SAFETY: `fresh` is only non-null here when it was allocated by
            // this call; if its number is not the result, the CAS never
            // published it and we still own it.
            unsafe {
                if (*fresh).number != result {
                    drop(Box::from_raw(fresh));
                }
            }
        }

        Identifier(result)
    }

    /// Detaches and frees the whole tree.
    ///
    /// # Safety
    ///
    /// Must not race with concurrent `lookup` calls: traversals may still
    /// hold references into the detached nodes.
    pub(crate) unsafe fn reset(&self) {
        let old_root = self.root.swap(ptr::null_mut(), Ordering::AcqRel);
        let mut stack = vec![old_root];
        while let Some(node) = stack.pop() {
            if node.is_null() {
                continue;
            }
            // SAFETY: the tree is detached and the caller guarantees no
            // concurrent readers.
            unsafe {
                stack.push((*node).left.load(Ordering::Relaxed));
                stack.push((*node).right.load(Ordering::Relaxed));
                drop(Box::from_raw(node));
            }
        }
    }
}

/// Clears the identifier registry, freeing every interned name.
///
/// # Safety
///
/// Not safe against concurrent [`Identifier::lookup`] calls; callers must
/// guarantee the registry is quiescent (typically only sensible between
/// collector lifecycles in test harnesses).
pub unsafe fn reset_registry() {
    // SAFETY: forwarded contract.
    unsafe { registry().reset() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::thread;

    #[test]
    fn same_name_same_id() {
        let a = Identifier::lookup("position");
        let b = Identifier::lookup("position");
        assert_eq!(a, b);
        assert_eq!(a.uid(), b.uid());
    }

    #[test]
    fn distinct_names_distinct_ids() {
        let a = Identifier::lookup("velocity");
        let b = Identifier::lookup("acceleration");
        assert_ne!(a, b);
    }

    #[test]
    fn from_uid_round_trip() {
        let a = Identifier::lookup("mass");
        assert_eq!(Identifier::from_uid(a.uid()), a);
    }

    #[test]
    fn concurrent_interning_agrees() {
        let names: Vec<String> = (0..64).map(|i| format!("prop_{i}")).collect();

        let mut handles = Vec::new();
        for _ in 0..4 {
            let names = names.clone();
            handles.push(thread::spawn(move || {
                names
                    .iter()
                    .map(|n| Identifier::lookup(n).uid())
                    .collect::<Vec<_>>()
            }));
        }

        let results: Vec<Vec<u32>> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        for window in results.windows(2) {
            assert_eq!(window[0], window[1], "threads disagree on interned ids");
        }
        let unique: HashSet<u32> = results[0].iter().copied().collect();
        assert_eq!(unique.len(), names.len());
    }
}
