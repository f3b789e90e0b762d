//! Managed pointer handles.
//!
//! A handle names an allocation by indirection-table slot, not by address:
//! `(table index, row uid)`. Dereferencing resolves the slot against the
//! live collector's table, so relocation by the compactor is invisible to
//! handle holders. Once the slot is reclaimed the old uid can never match
//! again — uids are salted per registration.

use std::fmt;
use std::marker::PhantomData;
use std::ptr::NonNull;

use crate::gc::Collector;

/// Untyped managed pointer: a table slot plus its registration uid.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawHandle {
    index: u32,
    uid: u64,
}

impl RawHandle {
    /// The null handle. Never resolves.
    pub const NULL: RawHandle = RawHandle {
        index: u32::MAX,
        uid: 0,
    };

    pub(crate) const fn from_parts(index: u32, uid: u64) -> Self {
        Self { index, uid }
    }

    /// Table slot index.
    #[must_use]
    pub const fn index(self) -> u32 {
        self.index
    }

    /// Salted registration uid; `0` only on the null handle.
    #[must_use]
    pub const fn uid(self) -> u64 {
        self.uid
    }

    /// Whether this is the null handle. A non-null handle may still fail to
    /// resolve once its allocation was collected.
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.uid == 0
    }

    /// Resolves to the current payload address, if the slot still carries
    /// this uid.
    #[must_use]
    pub fn resolve(self) -> Option<NonNull<u8>> {
        let collector = Collector::instance()?;
        collector.resolve(self)
    }

    /// Truthiness: has a resolvable, non-null target.
    #[must_use]
    pub fn is_resolvable(self) -> bool {
        self.resolve().is_some()
    }
}

impl Default for RawHandle {
    fn default() -> Self {
        Self::NULL
    }
}

impl fmt::Debug for RawHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            f.write_str("RawHandle(null)")
        } else {
            write!(f, "RawHandle({}#{:x})", self.index, self.uid)
        }
    }
}

/// Typed façade over [`RawHandle`].
///
/// Freely copyable; does not own the pointee. Equality compares the slot
/// and uid, so two handles are equal iff they denote the same registration
/// of the same allocation.
pub struct Handle<T> {
    raw: RawHandle,
    _marker: PhantomData<*const T>,
}

impl<T> Handle<T> {
    /// The null handle. Never resolves.
    pub const NULL: Handle<T> = Handle {
        raw: RawHandle::NULL,
        _marker: PhantomData,
    };

    /// Wraps an untyped handle.
    ///
    /// The caller asserts the allocation's element type is `T`; a wrong
    /// assertion surfaces as garbage reads, not memory unsafety by itself,
    /// because every access still goes through `unsafe` resolution.
    #[must_use]
    pub const fn from_raw(raw: RawHandle) -> Self {
        Self {
            raw,
            _marker: PhantomData,
        }
    }

    /// The untyped handle.
    #[must_use]
    pub const fn raw(self) -> RawHandle {
        self.raw
    }

    /// Whether this is the null handle.
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.raw.is_null()
    }

    /// Resolves element `0`.
    #[must_use]
    pub fn resolve(self) -> Option<NonNull<T>> {
        self.resolve_at(0)
    }

    /// Resolves element `index` of the underlying buffer.
    ///
    /// Returns `None` for the null handle, a reclaimed slot, or when no
    /// collector is live.
    #[must_use]
    pub fn resolve_at(self, index: u32) -> Option<NonNull<T>> {
        let collector = Collector::instance()?;
        collector.resolve_element(self.raw, index).map(NonNull::cast)
    }

    /// Truthiness: has a resolvable, non-null target.
    #[must_use]
    pub fn is_resolvable(self) -> bool {
        self.resolve().is_some()
    }

    /// Copies element `index` out of the buffer.
    #[must_use]
    pub fn read_at(self, index: u32) -> Option<T>
    where
        T: Copy,
    {
        let ptr = self.resolve_at(index)?;
        // SAFETY: the address came out of the table this instant; element
        // reads race only with relocation, which preserves bytes.
        Some(unsafe { ptr.as_ptr().read() })
    }

    /// Copies element `0` out of the buffer.
    #[must_use]
    pub fn read(self) -> Option<T>
    where
        T: Copy,
    {
        self.read_at(0)
    }

    /// Overwrites element `index` of the buffer.
    ///
    /// Returns `false` when the handle does not resolve.
    pub fn write_at(self, index: u32, value: T) -> bool {
        match self.resolve_at(index) {
            Some(ptr) => {
                // SAFETY: resolved address, exclusive by caller protocol.
                unsafe { ptr.as_ptr().write(value) };
                true
            }
            None => false,
        }
    }

    /// Overwrites element `0` of the buffer.
    pub fn write(self, value: T) -> bool {
        self.write_at(0, value)
    }
}

// SAFETY: a handle is an index/uid pair; it carries no access rights of its
// own — every dereference revalidates against the table.
unsafe impl<T> Send for Handle<T> {}
unsafe impl<T> Sync for Handle<T> {}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Handle<T> {}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl<T> Eq for Handle<T> {}

impl<T> std::hash::Hash for Handle<T> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.raw.hash(state);
    }
}

impl<T> Default for Handle<T> {
    fn default() -> Self {
        Self::NULL
    }
}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Handle").field(&self.raw).finish()
    }
}
