//! The collector core.
//!
//! A single process-wide [`Collector`] owns the indirection table, the two
//! segment arenas, the root set, the marked-for-sweep buffer and the
//! scanner multicast, and runs a dedicated background thread stepping
//! scan → sweep → compact cycles (see [`cycle`]).
//!
//! Mutator threads allocate, resolve and mutate concurrently; nothing
//! stops the world. Compaction excludes allocators per segment only, and
//! handles stay valid across it because they name table slots, not
//! addresses.

mod cycle;

use std::mem::{needs_drop, size_of};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::{Condvar, Mutex, RwLock};
use rustc_hash::FxHashSet;
use tracing::info;

use crate::error::{Error, Result};
use crate::handle::{Handle, RawHandle};
use crate::header::{AllocHeader, CopyFn, DestroyFn, GarbageState};
use crate::ident::Identifier;
use crate::metrics::CycleStats;
use crate::object::{Object, ObjectPtr};
use crate::segment::{Arena, Segment, MIN_SEGMENT_SIZE};
use crate::table::PointerTable;
use crate::value::Value;

/// A registered memory scanner.
///
/// Called during the scan phase with the suspected set — every live handle
/// the table knows. The scanner's contract: remove from the set every
/// handle it can prove reachable from the roots under its type discipline.
pub type Scanner = Box<dyn Fn(&Collector, &mut FxHashSet<RawHandle>) + Send + Sync>;

/// Collector construction parameters.
#[derive(Clone, Copy, Debug)]
pub struct CollectorConfig {
    /// Pause between background cycles.
    pub scan_interval: Duration,
    /// Initial size of the trivial arena's first segment.
    pub trivial_segment_size: usize,
    /// Initial size of the non-trivial arena's first segment. Non-trivial
    /// allocations are expected to be rarer, so this may be smaller; the
    /// segment minimum still applies.
    pub non_trivial_segment_size: usize,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            scan_interval: Duration::from_secs(3),
            trivial_segment_size: MIN_SEGMENT_SIZE,
            non_trivial_segment_size: 512 * 1024,
        }
    }
}

/// Cycle coordination between the background thread and `collect_now`.
pub(crate) struct CycleSignal {
    inner: Mutex<CycleSignalState>,
    cond: Condvar,
}

struct CycleSignalState {
    requested: bool,
    in_cycle: bool,
    completed: u64,
}

impl CycleSignal {
    fn new() -> Self {
        Self {
            inner: Mutex::new(CycleSignalState {
                requested: false,
                in_cycle: false,
                completed: 0,
            }),
            cond: Condvar::new(),
        }
    }

    /// Requests a cycle and returns the sequence number whose completion
    /// proves a full cycle observed the request.
    fn request(&self) -> u64 {
        let mut state = self.inner.lock();
        state.requested = true;
        let target = state
            .completed
            .saturating_add(if state.in_cycle { 2 } else { 1 });
        self.cond.notify_all();
        target
    }

    fn wait_for(&self, target: u64) {
        let mut state = self.inner.lock();
        while state.completed < target {
            self.cond.wait(&mut state);
        }
    }

    /// Background thread: sleep until a request arrives or `interval`
    /// elapses, then enter a cycle.
    pub(crate) fn begin_cycle(&self, interval: Duration) {
        let mut state = self.inner.lock();
        if !state.requested {
            self.cond.wait_for(&mut state, interval);
        }
        state.requested = false;
        state.in_cycle = true;
    }

    pub(crate) fn end_cycle(&self) {
        let mut state = self.inner.lock();
        state.in_cycle = false;
        state.completed += 1;
        self.cond.notify_all();
    }

    /// Terminal state: releases every present and future waiter.
    pub(crate) fn shutdown(&self) {
        let mut state = self.inner.lock();
        state.in_cycle = false;
        state.completed = u64::MAX;
        self.cond.notify_all();
    }
}

/// Header pointer queued between the scan and sweep phases. The slot was
/// already removed from the table, so only the collector reaches it.
pub(crate) struct MarkedAllocation(pub(crate) NonNull<AllocHeader>);

// SAFETY: headers stay mapped until teardown; the buffer is mutex-guarded.
unsafe impl Send for MarkedAllocation {}

/// Segment fully evacuated by a compact, waiting for the next compact
/// before its bytes may be reused.
pub(crate) struct RetiredSegment(pub(crate) NonNull<Segment>);

// SAFETY: segments stay mapped until teardown.
unsafe impl Send for RetiredSegment {}

static COLLECTOR: RwLock<Option<Arc<Collector>>> = RwLock::new(None);

/// The process-wide garbage collector.
pub struct Collector {
    config: CollectorConfig,
    pub(crate) table: PointerTable,
    pub(crate) trivial_arena: Arena,
    pub(crate) non_trivial_arena: Arena,
    pub(crate) roots: Mutex<Vec<RawHandle>>,
    scanners: Mutex<Vec<Scanner>>,
    pub(crate) marked: Mutex<Vec<MarkedAllocation>>,
    pub(crate) retired_segments: Mutex<Vec<RetiredSegment>>,
    terminate: AtomicBool,
    signal: CycleSignal,
    stats: Mutex<CycleStats>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Collector {
    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Initializes the process-wide collector with default configuration.
    ///
    /// # Errors
    ///
    /// `InvalidState` when already initialized, `OutOfMemory` when the
    /// initial arenas cannot be mapped.
    pub fn init() -> Result<()> {
        Self::init_with_config(CollectorConfig::default())
    }

    /// Initializes the process-wide collector.
    ///
    /// Maps the initial arenas, registers the default object scanner, and
    /// starts the background thread.
    ///
    /// # Errors
    ///
    /// See [`Collector::init`].
    pub fn init_with_config(config: CollectorConfig) -> Result<()> {
        let mut slot = COLLECTOR.write();
        if slot.is_some() {
            return Err(Error::InvalidState);
        }

        let collector = Arc::new(Collector {
            config,
            table: PointerTable::new(),
            trivial_arena: Arena::with_initial_size(config.trivial_segment_size)
                .ok_or(Error::OutOfMemory)?,
            non_trivial_arena: Arena::with_initial_size(config.non_trivial_segment_size)
                .ok_or(Error::OutOfMemory)?,
            roots: Mutex::new(Vec::new()),
            scanners: Mutex::new(Vec::new()),
            marked: Mutex::new(Vec::new()),
            retired_segments: Mutex::new(Vec::new()),
            terminate: AtomicBool::new(false),
            signal: CycleSignal::new(),
            stats: Mutex::new(CycleStats::default()),
            thread: Mutex::new(None),
        });

        collector.register_memory_scanner(Box::new(cycle::object_scanner));

        let thread = {
            let collector = Arc::clone(&collector);
            std::thread::Builder::new()
                .name("neuro-gc".into())
                .spawn(move || cycle::collector_main(&collector))
                .map_err(|_| Error::Generic)?
        };
        *collector.thread.lock() = Some(thread);

        info!(
            scan_interval_ms = config.scan_interval.as_millis() as u64,
            "collector initialized"
        );
        *slot = Some(collector);
        Ok(())
    }

    /// Stops the background thread, finalizes live non-trivial allocations,
    /// clears the table and unmaps both arenas.
    ///
    /// Handles held past this point resolve to null.
    ///
    /// # Errors
    ///
    /// `InvalidState` when no collector is initialized.
    pub fn destroy() -> Result<()> {
        let collector = COLLECTOR.write().take().ok_or(Error::InvalidState)?;

        collector.terminate.store(true, Ordering::Release);
        // A standing request survives even if the thread is mid-cycle, so
        // the terminate flag is observed without waiting out the interval.
        let _ = collector.signal.request();
        if let Some(thread) = collector.thread.lock().take() {
            let _ = thread.join();
        }

        collector.teardown();
        info!("collector destroyed");
        Ok(())
    }

    /// The live collector, if initialized.
    #[must_use]
    pub fn instance() -> Option<Arc<Collector>> {
        COLLECTOR.read().clone()
    }

    pub(crate) fn should_terminate(&self) -> bool {
        self.terminate.load(Ordering::Acquire)
    }

    pub(crate) fn config(&self) -> &CollectorConfig {
        &self.config
    }

    fn teardown(&self) {
        // Finalize before the table goes away so callbacks can still
        // resolve handles.
        // SAFETY: the background thread has been joined; mutators must not
        // race teardown per the `destroy` contract.
        unsafe {
            for segment in self.non_trivial_arena.iter_segments() {
                Arena::walk_headers(segment.as_ref(), |header| {
                    if header.state() == GarbageState::Live {
                        header.set_state(GarbageState::Dying);
                        if let Some(destroy) = header.destroy_fn() {
                            destroy(header.payload_ptr());
                        }
                        header.set_state(GarbageState::Swept);
                    }
                });
            }
            for segment in self.trivial_arena.iter_segments() {
                Arena::walk_headers(segment.as_ref(), |header| {
                    if header.state() == GarbageState::Live && header.is_object() {
                        let object = &*header.payload_ptr().cast::<Object>();
                        object.fire_on_destroy(object.self_ptr());
                        object.clear_properties();
                        header.set_state(GarbageState::Swept);
                    }
                });
            }
        }

        self.table.clear();
        self.marked.lock().clear();
        self.retired_segments.lock().clear();

        // SAFETY: every path into the arenas goes through the singleton,
        // which was cleared before teardown started.
        unsafe {
            self.trivial_arena.unmap_all();
            self.non_trivial_arena.unmap_all();
        }
    }

    // ========================================================================
    // Allocation
    // ========================================================================

    /// Arena-allocates one block and initializes its header in place. The
    /// block is not yet registered in the table.
    pub(crate) fn allocate_block(
        &self,
        element_size: u32,
        count: u32,
        trivial: bool,
        object: bool,
        copy_fn: Option<CopyFn>,
        destroy_fn: Option<DestroyFn>,
    ) -> Result<NonNull<AllocHeader>> {
        let payload = element_size as usize * count as usize;
        let total = AllocHeader::total_for(payload);
        let arena = if trivial {
            &self.trivial_arena
        } else {
            &self.non_trivial_arena
        };

        let addr = arena
            .allocate(total, &mut |addr| {
                // Runs under the segment spinlock: walkers that observe the
                // bumped cursor observe an initialized header.
                // SAFETY: the block is exclusively ours.
                unsafe {
                    AllocHeader::init(
                        addr.as_ptr().cast::<AllocHeader>(),
                        element_size,
                        count,
                        trivial,
                        copy_fn,
                        destroy_fn,
                    );
                    if object {
                        (*addr.as_ptr().cast::<AllocHeader>()).mark_object();
                    }
                }
            })
            .ok_or(Error::OutOfMemory)?;

        Ok(addr.cast::<AllocHeader>())
    }

    fn register_block(&self, header: NonNull<AllocHeader>) -> Result<RawHandle> {
        let handle = self.table.add_pointer(header)?;
        // SAFETY: header is live; the back-reference fields are atomic.
        unsafe { header.as_ref() }.set_table_slot(handle);
        Ok(handle)
    }

    /// Allocates `count × element_size` bytes of trivial managed memory.
    ///
    /// # Errors
    ///
    /// `OutOfMemory` when the arena or the table is exhausted.
    pub fn allocate_trivial(&self, element_size: u32, count: u32) -> Result<RawHandle> {
        let header = self.allocate_block(element_size, count, true, false, None, None)?;
        self.register_block(header)
    }

    /// Allocates `count × element_size` bytes of non-trivial managed
    /// memory. The collector relocates the payload through `copy_fn` and
    /// finalizes it through `destroy_fn`.
    ///
    /// # Errors
    ///
    /// `OutOfMemory` when the arena or the table is exhausted.
    pub fn allocate_non_trivial(
        &self,
        element_size: u32,
        count: u32,
        copy_fn: CopyFn,
        destroy_fn: DestroyFn,
    ) -> Result<RawHandle> {
        let header =
            self.allocate_block(element_size, count, false, false, Some(copy_fn), Some(destroy_fn))?;
        self.register_block(header)
    }

    /// Allocates managed memory for one `T`, picking the arena from `T`'s
    /// drop requirements, and moves `value` in.
    ///
    /// # Errors
    ///
    /// See [`Collector::allocate_trivial`].
    pub fn allocate_value<T: Clone>(&self, value: T) -> Result<Handle<T>> {
        self.allocate_value_with(value, !needs_drop::<T>())
    }

    /// Allocates managed memory for one `T` in the arena chosen by
    /// `trivial`, overriding the compile-time default. Useful for types
    /// that own no resources but are not `Copy`-trivial to the compiler.
    ///
    /// # Errors
    ///
    /// See [`Collector::allocate_trivial`].
    pub fn allocate_value_with<T: Clone>(&self, value: T, trivial: bool) -> Result<Handle<T>> {
        let element_size = u32::try_from(size_of::<T>()).map_err(|_| Error::InvalidArgument)?;
        let header = if trivial {
            self.allocate_block(element_size, 1, true, false, None, None)?
        } else {
            self.allocate_block(
                element_size,
                1,
                false,
                false,
                Some(clone_shim::<T>),
                Some(drop_shim::<T>),
            )?
        };

        // Initialize the payload before the handle exists, so a cycle can
        // never observe (or relocate) uninitialized memory.
        // SAFETY: fresh block, exclusively owned until registration.
        unsafe { header.as_ref().payload_ptr().cast::<T>().write(value) };

        Ok(Handle::from_raw(self.register_block(header)?))
    }

    /// Allocates a trivial array of `count` elements of `T`, zero-filled
    /// by the arena mapping.
    ///
    /// # Errors
    ///
    /// See [`Collector::allocate_trivial`].
    pub fn allocate_trivial_array<T: Copy>(&self, count: u32) -> Result<Handle<T>> {
        let element_size = u32::try_from(size_of::<T>()).map_err(|_| Error::InvalidArgument)?;
        Ok(Handle::from_raw(self.allocate_trivial(element_size, count)?))
    }

    /// Reallocates the block behind `handle` to a new shape in the same
    /// arena. With `auto_copy`, up to the smaller of both payload sizes is
    /// carried over (bytewise for trivial memory, through the copy
    /// callback otherwise). The handle then resolves to the new block; the
    /// old block is finalized (if it was auto-copied non-trivial memory)
    /// and left for the next compact to reclaim.
    ///
    /// # Errors
    ///
    /// `DataSetNotFound` when the handle does not resolve, `OutOfMemory`
    /// when the new block cannot be allocated.
    pub fn reallocate(
        &self,
        handle: RawHandle,
        element_size: u32,
        count: u32,
        auto_copy: bool,
    ) -> Result<()> {
        let old_header = self.table.get_header(handle).ok_or(Error::DataSetNotFound)?;
        // SAFETY: table-resolved header.
        let old = unsafe { old_header.as_ref() };
        let trivial = old.is_trivial();

        let new_header = self.allocate_block(
            element_size,
            count,
            trivial,
            old.is_object(),
            old.copy_fn(),
            old.destroy_fn(),
        )?;
        // SAFETY: fresh block, not yet registered.
        unsafe { new_header.as_ref() }.set_table_slot(handle);

        if auto_copy {
            // SAFETY: both payloads are live; sizes are bounded below.
            unsafe {
                let new = new_header.as_ref();
                if trivial {
                    let bytes = old.buffer_bytes().min(new.buffer_bytes());
                    std::ptr::copy_nonoverlapping(old.payload_ptr(), new.payload_ptr(), bytes);
                } else if let Some(copy) = old.copy_fn() {
                    copy(new.payload_ptr(), old.payload_ptr());
                }
            }
        }

        self.commit_reallocate(handle, old_header, new_header, auto_copy && !trivial)
    }

    /// Retargets `handle` at `new_header` and parks the old block for the
    /// next compact. `run_destroy` finalizes the old payload first.
    pub(crate) fn commit_reallocate(
        &self,
        handle: RawHandle,
        old_header: NonNull<AllocHeader>,
        new_header: NonNull<AllocHeader>,
        run_destroy: bool,
    ) -> Result<()> {
        self.table.replace_pointer(handle, new_header)?;
        // SAFETY: the old header stays mapped; only its state changes.
        let old = unsafe { old_header.as_ref() };
        if old.try_claim() {
            if run_destroy {
                if let Some(destroy) = old.destroy_fn() {
                    // SAFETY: payload was copied out; finalize the original.
                    unsafe { destroy(old.payload_ptr()) };
                }
            }
            old.set_state(GarbageState::Swept);
        }
        // Lost claim: the compactor owns the old block and finalizes it.
        Ok(())
    }

    // ========================================================================
    // Objects
    // ========================================================================

    /// Allocates an object with `props_count + slack` property slots.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for a zero or overflowing capacity, `OutOfMemory`
    /// when the arena is exhausted.
    pub fn create_object(&self, props_count: u32, slack: u32) -> Result<ObjectPtr> {
        let capacity = props_count
            .checked_add(slack)
            .filter(|&c| c > 0)
            .ok_or(Error::InvalidArgument)?;

        let size = u32::try_from(Object::alloc_size(capacity)).map_err(|_| Error::InvalidArgument)?;
        let header = self.allocate_block(size, 1, true, true, None, None)?;

        // SAFETY: fresh block, exclusively owned until registration.
        let object = unsafe { header.as_ref() }.payload_ptr().cast::<Object>();
        unsafe { Object::init_in_place(object, ObjectPtr::NULL, capacity) };

        let handle = ObjectPtr::from_raw(self.register_block(header)?);
        // SAFETY: the handle has not escaped yet; no concurrent access.
        unsafe { (*object).set_self_ptr(handle) };
        Ok(handle)
    }

    /// Recreates the object behind `handle` with `props_count + slack`
    /// slots, rehashing every live property into the new map and firing
    /// the object's move handlers. The handle is unchanged.
    ///
    /// # Errors
    ///
    /// `DataSetNotFound` when the handle does not resolve,
    /// `InvalidArgument` when the new capacity cannot hold the live
    /// properties, `OutOfMemory` when allocation fails.
    pub fn recreate_object(
        &self,
        handle: ObjectPtr,
        props_count: u32,
        slack: u32,
    ) -> Result<ObjectPtr> {
        let capacity = props_count
            .checked_add(slack)
            .filter(|&c| c > 0)
            .ok_or(Error::InvalidArgument)?;

        let old_header = self
            .table
            .get_header(handle.raw())
            .ok_or(Error::DataSetNotFound)?;
        // SAFETY: table-resolved header fronting a live object.
        let old_object = unsafe { &*old_header.as_ref().payload_ptr().cast::<Object>() };

        if capacity == old_object.capacity() {
            return Ok(handle);
        }

        // Capture before the backing is replaced.
        let saved: Vec<(Identifier, Value)> = old_object.iter().collect();
        if (saved.len() as u32) > capacity {
            return Err(Error::InvalidArgument);
        }
        let handlers = old_object.event_handlers();

        let size = u32::try_from(Object::alloc_size(capacity)).map_err(|_| Error::InvalidArgument)?;
        let new_header = self.allocate_block(size, 1, true, true, None, None)?;
        // SAFETY: fresh block; fully initialized before the table swap
        // makes it reachable.
        let new_object = unsafe {
            new_header.as_ref().set_table_slot(handle.raw());
            let object = new_header.as_ref().payload_ptr().cast::<Object>();
            Object::init_in_place(object, handle, capacity);
            (*object).restore_event_handlers(handlers);
            for (id, value) in saved {
                (*object).set_property_in_place(id, value);
            }
            &*object
        };

        self.commit_reallocate(handle.raw(), old_header, new_header, false)?;
        new_object.fire_on_move(handle);
        Ok(handle)
    }

    // ========================================================================
    // Roots, resolution, scanners
    // ========================================================================

    /// Registers `handle` as a collection root. Duplicates are allowed.
    pub fn root(&self, handle: RawHandle) {
        self.roots.lock().push(handle);
    }

    /// Removes one registration of `handle` from the root set.
    ///
    /// # Errors
    ///
    /// `DataSetNotFound` when the handle was not rooted.
    pub fn unroot(&self, handle: RawHandle) -> Result<()> {
        let mut roots = self.roots.lock();
        match roots.iter().position(|&root| root == handle) {
            Some(position) => {
                roots.remove(position);
                Ok(())
            }
            None => Err(Error::DataSetNotFound),
        }
    }

    /// Resolves `handle` to its current payload address.
    #[must_use]
    pub fn resolve(&self, handle: RawHandle) -> Option<NonNull<u8>> {
        self.table.get(handle)
    }

    /// Resolves element `index` of the buffer behind `handle`.
    #[must_use]
    pub(crate) fn resolve_element(&self, handle: RawHandle, index: u32) -> Option<NonNull<u8>> {
        let header = self.table.get_header(handle)?;
        // SAFETY: table-resolved header.
        let head = unsafe { header.as_ref() };
        if index >= head.count() {
            return None;
        }
        // SAFETY: bounded element offset within the payload.
        NonNull::new(unsafe {
            head.payload_ptr()
                .add(index as usize * head.element_size() as usize)
        })
    }

    /// Removes the table slot behind `handle` without sweeping the block.
    ///
    /// Low-level: the block's bytes are reclaimed by a later compact only
    /// if its state is updated separately. Primarily useful to detach
    /// native-facing handles.
    ///
    /// # Errors
    ///
    /// `DataSetNotFound` when the slot no longer carries the handle's uid.
    pub fn remove_pointer(&self, handle: RawHandle) -> Result<()> {
        self.table.remove_pointer(handle)
    }

    /// Appends a scanner to the scan-phase multicast. Scanners run in
    /// registration order on the collector thread.
    pub fn register_memory_scanner(&self, scanner: Scanner) {
        self.scanners.lock().push(scanner);
    }

    pub(crate) fn run_scanners(&self, suspected: &mut FxHashSet<RawHandle>) {
        let scanners = self.scanners.lock();
        for scanner in scanners.iter() {
            if suspected.is_empty() {
                break;
            }
            scanner(self, suspected);
        }
    }

    /// Runs one full collection cycle on the background thread and blocks
    /// until it finished. Mainly for tests and deterministic shutdown
    /// paths; production callers normally rely on the periodic cycle.
    pub fn collect_now(&self) {
        let target = self.signal.request();
        self.signal.wait_for(target);
    }

    pub(crate) fn signal(&self) -> &CycleSignal {
        &self.signal
    }

    /// Statistics of the most recently completed cycle.
    #[must_use]
    pub fn last_cycle_stats(&self) -> CycleStats {
        *self.stats.lock()
    }

    pub(crate) fn record_cycle_stats(&self, stats: CycleStats) {
        *self.stats.lock() = stats;
    }
}

// SAFETY: all interior state is lock- or atomic-guarded; raw pointers into
// segments are valid for the collector's lifetime.
unsafe impl Send for Collector {}
unsafe impl Sync for Collector {}

unsafe fn clone_shim<T: Clone>(dst: *mut u8, src: *const u8) {
    // SAFETY: the collector calls copy callbacks with a valid source
    // payload and an uninitialized destination of the same shape.
    unsafe { dst.cast::<T>().write((*src.cast::<T>()).clone()) }
}

unsafe fn drop_shim<T>(ptr: *mut u8) {
    // SAFETY: the collector finalizes each non-trivial payload exactly
    // once.
    unsafe { std::ptr::drop_in_place(ptr.cast::<T>()) }
}

/// Initializes the process-wide collector. See [`Collector::init`].
///
/// # Errors
///
/// `InvalidState` when already initialized.
pub fn init() -> Result<()> {
    Collector::init()
}

/// Initializes the process-wide collector with explicit configuration.
///
/// # Errors
///
/// `InvalidState` when already initialized.
pub fn init_with_config(config: CollectorConfig) -> Result<()> {
    Collector::init_with_config(config)
}

/// Tears the process-wide collector down. See [`Collector::destroy`].
///
/// # Errors
///
/// `InvalidState` when no collector is initialized.
pub fn destroy() -> Result<()> {
    Collector::destroy()
}
