//! The classless generic object.
//!
//! An object is a single managed allocation: the object fields followed
//! directly by an inline open-addressed property map of `(id, value)`
//! slots. Properties are addressed by interned identifier through a
//! two-stage probe — eight rotated hash positions, then one linear wrap —
//! and the map grows by recreating the object behind its (stable) handle.
//!
//! Objects are flat-copyable: relocation by the compactor moves the whole
//! allocation bytewise, and every internal address is derived from `&self`
//! rather than stored, so nothing dangles afterwards.

use std::cell::UnsafeCell;
use std::mem::size_of;
use std::ptr;
use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::gc::Collector;
use crate::handle::Handle;
use crate::ident::{Identifier, EMPTY_ID};
use crate::value::Value;

/// Handle to a managed [`Object`].
pub type ObjectPtr = Handle<Object>;

/// Extra slots reserved beyond the requested property count.
pub const DEFAULT_SLACK: u32 = 10;

/// Hash probe attempts before falling back to the linear scan.
const HASH_PROBES: u32 = 8;

/// Fixed capacity of each event handler list.
const MAX_EVENT_HANDLERS: usize = 4;

/// Callback fired after an object was relocated behind its handle.
pub type MoveHandler = fn(ObjectPtr);

/// Callback fired before an object's properties are torn down.
pub type DestroyHandler = fn(ObjectPtr);

/// One inline property slot. Free iff `id == EMPTY_ID`.
#[repr(C)]
pub struct PropertySlot {
    id: AtomicU32,
    value: Value,
}

/// Fixed-size multicast list of plain function handlers, invoked in
/// registration order, removed by equality.
#[derive(Clone, Copy)]
struct HandlerList<F: Copy + PartialEq> {
    slots: [Option<F>; MAX_EVENT_HANDLERS],
}

impl<F: Copy + PartialEq> HandlerList<F> {
    const fn new() -> Self {
        Self {
            slots: [None; MAX_EVENT_HANDLERS],
        }
    }

    fn add(&mut self, handler: F) -> Result<()> {
        if self.slots.iter().flatten().any(|h| *h == handler) {
            return Err(Error::IllegalDuplicate);
        }
        match self.slots.iter_mut().find(|slot| slot.is_none()) {
            Some(slot) => {
                *slot = Some(handler);
                Ok(())
            }
            None => Err(Error::OutOfMemory),
        }
    }

    fn remove(&mut self, handler: F) -> Result<()> {
        match self.slots.iter_mut().find(|slot| **slot == Some(handler)) {
            Some(slot) => {
                *slot = None;
                Ok(())
            }
            None => Err(Error::DataSetNotFound),
        }
    }

    fn fire(&self, arg: ObjectPtr)
    where
        F: Fn(ObjectPtr),
    {
        for handler in self.slots.iter().flatten() {
            handler(arg);
        }
    }
}

/// A managed, classless object with an inline property map.
///
/// Never constructed on the Rust stack: objects live exclusively inside
/// managed memory and are reached through [`ObjectPtr`] handles.
#[repr(C)]
pub struct Object {
    /// Serializes slot claims, map growth and handler registration.
    prop_lock: Mutex<()>,
    /// This object's own handle; survives relocation unchanged.
    self_ptr: ObjectPtr,
    capacity: u32,
    on_move: UnsafeCell<HandlerList<MoveHandler>>,
    on_destroy: UnsafeCell<HandlerList<DestroyHandler>>,
}

impl Object {
    /// Managed allocation size for an object with `capacity` slots.
    #[must_use]
    pub const fn alloc_size(capacity: u32) -> usize {
        size_of::<Object>() + size_of::<PropertySlot>() * capacity as usize
    }

    /// Creates an object with `props_count + slack` slots through the live
    /// collector.
    ///
    /// # Errors
    ///
    /// `InvalidState` without a live collector, `InvalidArgument` for a
    /// zero total capacity, `OutOfMemory` when the arena is exhausted.
    pub fn create(props_count: u32, slack: u32) -> Result<ObjectPtr> {
        let collector = Collector::instance().ok_or(Error::InvalidState)?;
        collector.create_object(props_count, slack)
    }

    /// Recreates the object behind `handle` with `props_count + slack`
    /// slots, rehashing all live properties. The handle itself is
    /// unchanged and resolves to the expanded object afterwards.
    ///
    /// # Errors
    ///
    /// `InvalidState` without a live collector; `DataSetNotFound` when the
    /// handle no longer resolves; `InvalidArgument` when the new capacity
    /// cannot hold the live properties.
    pub fn recreate(handle: ObjectPtr, props_count: u32, slack: u32) -> Result<ObjectPtr> {
        let collector = Collector::instance().ok_or(Error::InvalidState)?;
        collector.recreate_object(handle, props_count, slack)
    }

    /// Writes a fresh object into `at`, with all slots empty.
    ///
    /// # Safety
    ///
    /// `at` must point to [`Object::alloc_size`]`(capacity)` bytes of
    /// exclusively owned managed memory.
    pub(crate) unsafe fn init_in_place(at: *mut Object, self_ptr: ObjectPtr, capacity: u32) {
        // SAFETY: caller guarantees exclusive ownership and size.
        unsafe {
            at.write(Object {
                prop_lock: Mutex::new(()),
                self_ptr,
                capacity,
                on_move: UnsafeCell::new(HandlerList::new()),
                on_destroy: UnsafeCell::new(HandlerList::new()),
            });
            let slots = (*at).slots_ptr();
            for i in 0..capacity as usize {
                slots.add(i).write(PropertySlot {
                    id: AtomicU32::new(EMPTY_ID),
                    value: Value::UNDEFINED,
                });
            }
        }
    }

    fn slots_ptr(&self) -> *mut PropertySlot {
        // The property map follows the object fields directly.
        unsafe { (self as *const Object).add(1).cast::<PropertySlot>().cast_mut() }
    }

    fn slot(&self, index: u32) -> &PropertySlot {
        debug_assert!(index < self.capacity);
        // SAFETY: index is bounded by the co-allocated capacity.
        unsafe { &*self.slots_ptr().add(index as usize) }
    }

    fn slot_id(&self, index: u32) -> u32 {
        self.slot(index).id.load(Ordering::Acquire)
    }

    fn read_slot_value(&self, index: u32) -> Value {
        // SAFETY: bounded index; concurrent writers race benignly — the
        // reader observes the old or the new value.
        unsafe { ptr::addr_of!((*self.slots_ptr().add(index as usize)).value).read() }
    }

    fn write_slot_value(&self, index: u32, value: Value) {
        // SAFETY: bounded index.
        unsafe {
            ptr::addr_of_mut!((*self.slots_ptr().add(index as usize)).value).write(value);
        }
    }

    /// Probe position `i` of the hash stage.
    fn probe_position(&self, id: u32, i: u32) -> u32 {
        id.rotate_left(self.capacity.wrapping_mul(i) % 32) % self.capacity
    }

    /// Locates the slot holding `id`: eight rotated hash probes, then a
    /// linear scan from `id % capacity` wrapping once (the scan start
    /// itself is probe 0).
    fn find_slot(&self, id: u32) -> Option<u32> {
        for i in 0..HASH_PROBES {
            let pos = self.probe_position(id, i);
            if self.slot_id(pos) == id {
                return Some(pos);
            }
        }

        let start = id % self.capacity;
        let mut index = (start + 1) % self.capacity;
        while index != start {
            if self.slot_id(index) == id {
                return Some(index);
            }
            index = (index + 1) % self.capacity;
        }
        None
    }

    /// Finds or claims a slot for `id`. `None` means the map is full and
    /// the object must grow.
    pub(crate) fn find_or_claim_slot(&self, id: u32) -> Option<u32> {
        debug_assert!(id != EMPTY_ID, "the empty sentinel is not a property id");

        if let Some(pos) = self.find_slot(id) {
            return Some(pos);
        }

        let _guard = self.prop_lock.lock();

        // Re-probe under the lock: another claimant may have inserted the
        // id, or freed slots may have appeared.
        for i in 0..HASH_PROBES {
            let pos = self.probe_position(id, i);
            let slot_id = self.slot_id(pos);
            if slot_id == id {
                return Some(pos);
            }
            if slot_id == EMPTY_ID {
                self.slot(pos).id.store(id, Ordering::Release);
                return Some(pos);
            }
        }

        let start = id % self.capacity;
        let mut index = (start + 1) % self.capacity;
        while index != start {
            let slot_id = self.slot_id(index);
            if slot_id == id {
                return Some(index);
            }
            if slot_id == EMPTY_ID {
                self.slot(index).id.store(id, Ordering::Release);
                return Some(index);
            }
            index = (index + 1) % self.capacity;
        }
        None
    }

    /// The property value for `id`, or [`Value::UNDEFINED`] when absent.
    /// Never allocates.
    #[must_use]
    pub fn get_property(&self, id: Identifier) -> Value {
        match self.find_slot(id.uid()) {
            Some(pos) => self.read_slot_value(pos),
            None => Value::UNDEFINED,
        }
    }

    /// Stores `value` under `id` if a slot can be found or claimed.
    ///
    /// Returns `false` when the map is full; callers grow via
    /// [`Object::recreate`] and retry (the handle-level
    /// [`set_property`](Handle::set_property) does this automatically).
    pub(crate) fn set_property_in_place(&self, id: Identifier, value: Value) -> bool {
        match self.find_or_claim_slot(id.uid()) {
            Some(pos) => {
                self.write_slot_value(pos, value);
                true
            }
            None => false,
        }
    }

    /// Number of occupied slots.
    #[must_use]
    pub fn length(&self) -> u32 {
        (0..self.capacity)
            .filter(|&i| self.slot_id(i) != EMPTY_ID)
            .count() as u32
    }

    /// Total slot count.
    #[must_use]
    pub const fn capacity(&self) -> u32 {
        self.capacity
    }

    /// This object's own handle.
    #[must_use]
    pub const fn self_ptr(&self) -> ObjectPtr {
        self.self_ptr
    }

    pub(crate) fn set_self_ptr(&mut self, handle: ObjectPtr) {
        self.self_ptr = handle;
    }

    /// Iterates the occupied property slots in storage order.
    pub fn iter(&self) -> PropsIter<'_> {
        PropsIter {
            object: self,
            index: 0,
        }
    }

    /// Registers a relocation handler, fired after every recreate.
    ///
    /// # Errors
    ///
    /// `IllegalDuplicate` when already registered, `OutOfMemory` when the
    /// handler list is full.
    pub fn add_move_handler(&self, handler: MoveHandler) -> Result<()> {
        let _guard = self.prop_lock.lock();
        // SAFETY: handler lists are only mutated under the property lock.
        unsafe { (*self.on_move.get()).add(handler) }
    }

    /// Removes a relocation handler by equality.
    ///
    /// # Errors
    ///
    /// `DataSetNotFound` when the handler was not registered.
    pub fn remove_move_handler(&self, handler: MoveHandler) -> Result<()> {
        let _guard = self.prop_lock.lock();
        // SAFETY: handler lists are only mutated under the property lock.
        unsafe { (*self.on_move.get()).remove(handler) }
    }

    /// Registers a teardown handler, fired before the properties are
    /// cleared when the object is swept or the collector shuts down.
    ///
    /// # Errors
    ///
    /// `IllegalDuplicate` when already registered, `OutOfMemory` when the
    /// handler list is full.
    pub fn add_destroy_handler(&self, handler: DestroyHandler) -> Result<()> {
        let _guard = self.prop_lock.lock();
        // SAFETY: handler lists are only mutated under the property lock.
        unsafe { (*self.on_destroy.get()).add(handler) }
    }

    /// Removes a teardown handler by equality.
    ///
    /// # Errors
    ///
    /// `DataSetNotFound` when the handler was not registered.
    pub fn remove_destroy_handler(&self, handler: DestroyHandler) -> Result<()> {
        let _guard = self.prop_lock.lock();
        // SAFETY: handler lists are only mutated under the property lock.
        unsafe { (*self.on_destroy.get()).remove(handler) }
    }

    pub(crate) fn fire_on_move(&self, handle: ObjectPtr) {
        // SAFETY: fn-pointer slots are word-sized; a racing registration is
        // observed entirely or not at all.
        let list = unsafe { *self.on_move.get() };
        list.fire(handle);
    }

    pub(crate) fn fire_on_destroy(&self, handle: ObjectPtr) {
        // SAFETY: see `fire_on_move`.
        let list = unsafe { *self.on_destroy.get() };
        list.fire(handle);
    }

    pub(crate) fn event_handlers(&self) -> HandlerListPair {
        // SAFETY: see `fire_on_move`.
        unsafe {
            HandlerListPair {
                on_move: *self.on_move.get(),
                on_destroy: *self.on_destroy.get(),
            }
        }
    }

    pub(crate) fn restore_event_handlers(&mut self, handlers: HandlerListPair) {
        *self.on_move.get_mut() = handlers.on_move;
        *self.on_destroy.get_mut() = handlers.on_destroy;
    }

    /// Blocks out slot claims and handler changes while the compactor
    /// copies this object.
    pub(crate) fn lock_properties(&self) -> parking_lot::MutexGuard<'_, ()> {
        self.prop_lock.lock()
    }

    /// Re-arms the property lock of a bytewise-relocated copy.
    ///
    /// The copy was taken while the source's lock was held, so the cloned
    /// lock bytes read as locked; the fresh copy has no owner yet.
    ///
    /// # Safety
    ///
    /// Must only be called on a relocated copy before it is published.
    pub(crate) unsafe fn reset_property_lock(&mut self) {
        // SAFETY: per the contract, nothing observes this copy yet.
        unsafe { ptr::write(&mut self.prop_lock, Mutex::new(())) };
    }

    /// Empties every slot. Runs after `on_destroy` during teardown.
    pub(crate) fn clear_properties(&self) {
        for i in 0..self.capacity {
            self.slot(i).id.store(EMPTY_ID, Ordering::Release);
            self.write_slot_value(i, Value::UNDEFINED);
        }
    }
}

/// Snapshot of both event handler lists, carried across a recreate.
#[derive(Clone, Copy)]
pub(crate) struct HandlerListPair {
    on_move: HandlerList<MoveHandler>,
    on_destroy: HandlerList<DestroyHandler>,
}

/// Iterator over occupied property slots.
pub struct PropsIter<'a> {
    object: &'a Object,
    index: u32,
}

impl Iterator for PropsIter<'_> {
    type Item = (Identifier, Value);

    fn next(&mut self) -> Option<(Identifier, Value)> {
        while self.index < self.object.capacity() {
            let index = self.index;
            self.index += 1;
            let id = self.object.slot_id(index);
            if id != EMPTY_ID {
                return Some((
                    Identifier::from_uid(id),
                    self.object.read_slot_value(index),
                ));
            }
        }
        None
    }
}

impl Handle<Object> {
    /// Reads the property `id`, or [`Value::UNDEFINED`] when the property
    /// is absent or the handle no longer resolves.
    #[must_use]
    pub fn get_property(self, id: Identifier) -> Value {
        match self.resolve() {
            // SAFETY: freshly resolved object address.
            Some(obj) => unsafe { obj.as_ref() }.get_property(id),
            None => Value::UNDEFINED,
        }
    }

    /// Reads the property named `name`, interning it first.
    #[must_use]
    pub fn get(self, name: &str) -> Value {
        self.get_property(Identifier::lookup(name))
    }

    /// Stores `value` under `id`, growing the property map when full. The
    /// handle keeps resolving to the (possibly recreated) object.
    ///
    /// # Errors
    ///
    /// `NullPointer` when the handle does not resolve, plus any growth
    /// failure from [`Object::recreate`].
    pub fn set_property(self, id: Identifier, value: Value) -> Result<()> {
        loop {
            let obj = self.resolve().ok_or(Error::NullPointer)?;
            // SAFETY: freshly resolved object address.
            let obj = unsafe { obj.as_ref() };
            if obj.set_property_in_place(id, value) {
                return Ok(());
            }
            // Map full: grow behind the same handle and retry.
            Object::recreate(self, obj.capacity() + 1, DEFAULT_SLACK)?;
        }
    }

    /// Stores `value` under the property named `name`, interning it first.
    ///
    /// # Errors
    ///
    /// See [`set_property`](Handle::set_property).
    pub fn set(self, name: &str, value: impl Into<Value>) -> Result<()> {
        self.set_property(Identifier::lookup(name), value.into())
    }

    /// Number of occupied slots, or `0` when the handle does not resolve.
    #[must_use]
    pub fn length(self) -> u32 {
        match self.resolve() {
            // SAFETY: freshly resolved object address.
            Some(obj) => unsafe { obj.as_ref() }.length(),
            None => 0,
        }
    }

    /// Slot capacity, or `0` when the handle does not resolve.
    #[must_use]
    pub fn capacity(self) -> u32 {
        match self.resolve() {
            // SAFETY: freshly resolved object address.
            Some(obj) => unsafe { obj.as_ref() }.capacity(),
            None => 0,
        }
    }

    /// Snapshot of the occupied properties in storage order.
    #[must_use]
    pub fn properties(self) -> Vec<(Identifier, Value)> {
        match self.resolve() {
            // SAFETY: freshly resolved object address.
            Some(obj) => unsafe { obj.as_ref() }.iter().collect(),
            None => Vec::new(),
        }
    }

    /// Registers a relocation handler on the live object.
    ///
    /// # Errors
    ///
    /// `NullPointer` when the handle does not resolve; otherwise see
    /// [`Object::add_move_handler`].
    pub fn add_move_handler(self, handler: MoveHandler) -> Result<()> {
        let obj = self.resolve().ok_or(Error::NullPointer)?;
        // SAFETY: freshly resolved object address.
        unsafe { obj.as_ref() }.add_move_handler(handler)
    }

    /// Registers a teardown handler on the live object.
    ///
    /// # Errors
    ///
    /// `NullPointer` when the handle does not resolve; otherwise see
    /// [`Object::add_destroy_handler`].
    pub fn add_destroy_handler(self, handler: DestroyHandler) -> Result<()> {
        let obj = self.resolve().ok_or(Error::NullPointer)?;
        // SAFETY: freshly resolved object address.
        unsafe { obj.as_ref() }.add_destroy_handler(handler)
    }

    /// Registers this object as a collection root.
    ///
    /// # Errors
    ///
    /// `InvalidState` without a live collector.
    pub fn root(self) -> Result<()> {
        let collector = Collector::instance().ok_or(Error::InvalidState)?;
        collector.root(self.raw());
        Ok(())
    }

    /// Removes one registration of this object from the root set.
    ///
    /// # Errors
    ///
    /// `InvalidState` without a live collector, `DataSetNotFound` when the
    /// handle was not rooted.
    pub fn unroot(self) -> Result<()> {
        let collector = Collector::instance().ok_or(Error::InvalidState)?;
        collector.unroot(self.raw())
    }
}
