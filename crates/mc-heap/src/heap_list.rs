//! Registry of live heaps for statistics and diagnostics.
//!
//! Heaps register themselves when they commit and unregister on destroy.
//! Slots are reused first-fit, so a slot number identifies a heap only until
//! that heap is destroyed. Aggregate totals are recomputed from scratch by
//! [`HeapList::update`] rather than maintained incrementally.

use crate::config::HeapConfig;
use crate::error::{HeapError, Result};
use crate::stats::{HeapKind, HeapListSnapshot, HeapRecord, HeapTotals};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

/// Figures a heap publishes for the registry to read.
#[derive(Debug)]
pub struct HeapCounters {
    name: String,
    kind: HeapKind,
    owner: Mutex<Option<String>>,
    base: AtomicUsize,
    total_size: AtomicUsize,
    committed: AtomicUsize,
    core_left: AtomicUsize,
    total_core_left: AtomicUsize,
}

impl HeapCounters {
    pub(crate) fn new(name: impl Into<String>, kind: HeapKind) -> Self {
        Self {
            name: name.into(),
            kind,
            owner: Mutex::new(None),
            base: AtomicUsize::new(0),
            total_size: AtomicUsize::new(0),
            committed: AtomicUsize::new(0),
            core_left: AtomicUsize::new(0),
            total_core_left: AtomicUsize::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> HeapKind {
        self.kind
    }

    pub fn owner(&self) -> Option<String> {
        self.owner.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub(crate) fn set_owner(&self, owner: Option<String>) {
        *self.owner.lock().unwrap_or_else(PoisonError::into_inner) = owner;
    }

    pub(crate) fn set_region(&self, base: usize, total_size: usize, committed: usize) {
        self.base.store(base, Ordering::Relaxed);
        self.total_size.store(total_size, Ordering::Relaxed);
        self.committed.store(committed, Ordering::Relaxed);
    }

    pub(crate) fn set_free(&self, core_left: usize, total_core_left: usize) {
        self.core_left.store(core_left, Ordering::Relaxed);
        self.total_core_left.store(total_core_left, Ordering::Relaxed);
    }

    fn record(&self, slot: usize) -> HeapRecord {
        let user = self.kind == HeapKind::User;
        HeapRecord {
            slot,
            name: self.name.clone(),
            kind: self.kind,
            owner: self.owner(),
            base: self.base.load(Ordering::Relaxed),
            heap_size: self.total_size.load(Ordering::Relaxed),
            committed: self.committed.load(Ordering::Relaxed),
            core_left: if user { self.core_left.load(Ordering::Relaxed) } else { 0 },
            total_core_left: if user {
                self.total_core_left.load(Ordering::Relaxed)
            } else {
                0
            },
        }
    }
}

#[derive(Debug, Default)]
struct Slot {
    heap: Option<Arc<HeapCounters>>,
    record: Option<HeapRecord>,
}

#[derive(Debug)]
struct Inner {
    slots: Vec<Slot>,
    max_heaps: Option<usize>,
    totals: HeapTotals,
}

/// Process-wide heap registry handle.
///
/// Cloning shares the same registry. Create one at startup and pass it to
/// every heap; tests build their own.
#[derive(Debug, Clone)]
pub struct HeapList {
    inner: Arc<Mutex<Inner>>,
}

impl Default for HeapList {
    fn default() -> Self {
        Self::new(&HeapConfig::default())
    }
}

impl HeapList {
    pub fn new(config: &HeapConfig) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                slots: Vec::new(),
                max_heaps: config.max_heaps,
                totals: HeapTotals::default(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Track a heap. Returns its slot, or None when the registry is full.
    pub fn add_heap(&self, heap: &Arc<HeapCounters>) -> Option<usize> {
        let mut inner = self.lock();

        let present = inner
            .slots
            .iter()
            .position(|s| s.heap.as_ref().is_some_and(|h| Arc::ptr_eq(h, heap)));
        if let Some(slot) = present {
            return Some(slot);
        }

        let slot = match inner.slots.iter().position(|s| s.heap.is_none()) {
            Some(free) => free,
            None if inner.max_heaps.is_some_and(|max| inner.slots.len() >= max) => {
                warn!(
                    heap = heap.name(),
                    max = inner.slots.len(),
                    "Heap list full, heap will not be tracked"
                );
                return None;
            }
            None => {
                inner.slots.push(Slot::default());
                inner.slots.len() - 1
            }
        };

        inner.slots[slot] = Slot {
            record: Some(heap.record(slot)),
            heap: Some(Arc::clone(heap)),
        };
        debug!(heap = heap.name(), slot, "Registered heap");
        Some(slot)
    }

    /// Stop tracking a heap. Returns whether it was tracked.
    pub fn remove_heap(&self, heap: &Arc<HeapCounters>) -> bool {
        let mut inner = self.lock();
        let found = inner
            .slots
            .iter_mut()
            .find(|s| s.heap.as_ref().is_some_and(|h| Arc::ptr_eq(h, heap)));

        match found {
            Some(slot) => {
                *slot = Slot::default();
                debug!(heap = heap.name(), "Unregistered heap");
                true
            }
            None => false,
        }
    }

    /// Refresh every slot and rebuild the aggregate totals.
    pub fn update(&self) -> HeapTotals {
        let mut inner = self.lock();
        let mut totals = HeapTotals::default();

        for (index, slot) in inner.slots.iter_mut().enumerate() {
            let Some(heap) = &slot.heap else {
                slot.record = None;
                continue;
            };
            let record = heap.record(index);
            totals.total_size += record.heap_size;
            totals.total_left += record.core_left;
            totals.total_core_left += record.total_core_left;
            slot.record = Some(record);
        }

        inner.totals = totals;
        totals
    }

    /// Totals as of the last `update`.
    pub fn totals(&self) -> HeapTotals {
        self.lock().totals
    }

    /// Occupied slots as of the last `update` (or registration).
    pub fn records(&self) -> Vec<HeapRecord> {
        self.lock().slots.iter().filter_map(|s| s.record.clone()).collect()
    }

    pub fn live_heaps(&self) -> usize {
        self.lock().slots.iter().filter(|s| s.heap.is_some()).count()
    }

    /// Number of slots ever used, occupied or not.
    pub fn slot_count(&self) -> usize {
        self.lock().slots.len()
    }

    /// Update and capture everything for an external reporter.
    pub fn snapshot(&self) -> HeapListSnapshot {
        let totals = self.update();
        HeapListSnapshot {
            totals,
            records: self.records(),
        }
    }

    /// Write the per-heap text report.
    pub fn write_report<W: Write>(&self, out: &mut W) -> io::Result<()> {
        self.update();
        let inner = self.lock();

        let mut heap_number = 1;
        let mut total_commit = 0;
        let mut total_free = 0;

        for (index, slot) in inner.slots.iter().enumerate() {
            match &slot.record {
                Some(rec) => {
                    writeln!(
                        out,
                        "ListNo: {}     Heap: {}     Type: {}     Made by: {}",
                        index,
                        heap_number,
                        rec.kind.code(),
                        rec.owner.as_deref().unwrap_or("unknown")
                    )?;
                    writeln!(
                        out,
                        "Name: {}     HeapSize: {}     HeapStart: {:#010x}",
                        rec.name, rec.heap_size, rec.base
                    )?;
                    total_commit += rec.heap_size;

                    if rec.kind == HeapKind::User {
                        writeln!(
                            out,
                            "TotalCoreLeft: {}     CoreLeft: {}",
                            rec.total_core_left, rec.core_left
                        )?;
                        writeln!(
                            out,
                            "Frag Level: {:.6}       PercentFree: {:.6}",
                            rec.frag_level(),
                            rec.percent_free()
                        )?;
                        total_free += rec.core_left;
                    }
                    heap_number += 1;
                }
                None => writeln!(out, "ListNo: {}  is Freed", index)?,
            }
            writeln!(out, "---------------------------")?;
        }

        writeln!(
            out,
            "Total Committed Memory: {}      Total Free in Commit: {}",
            total_commit, total_free
        )?;
        writeln!(out, "---------------------------")?;
        Ok(())
    }

    /// Write the text report to a file, conventionally `heap.dump.log`.
    pub fn dump_log(&self, path: impl AsRef<Path>) -> Result<()> {
        let file = File::create(path).map_err(HeapError::Report)?;
        let mut writer = BufWriter::new(file);
        self.write_report(&mut writer).map_err(HeapError::Report)?;
        writer.flush().map_err(HeapError::Report)
    }
}
