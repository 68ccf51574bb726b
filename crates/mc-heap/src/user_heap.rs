//! Named heaps that hand out allocations from their committed region.

use crate::config::HeapConfig;
use crate::error::{HeapError, Result};
use crate::heap_list::HeapList;
use crate::manager::HeapManager;
use crate::platform::{default_platform, PlatformMemory};
use crate::stats::HeapKind;
use std::collections::{BTreeMap, VecDeque};
use std::panic::Location;
use std::ptr::NonNull;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Kind of event kept in a heap's malloc log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MallocOp {
    Malloc,
    Free,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MallocRecord {
    pub op: MallocOp,
    /// Offset from the heap start (0 for failed requests).
    pub offset: usize,
    pub size: usize,
}

/// One block as seen by [`UserHeap::walk_heap`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapBlockInfo {
    pub offset: usize,
    pub size: usize,
    pub allocated: bool,
}

#[derive(Debug, Clone, Copy)]
struct Allocation {
    size: usize,
    requested: usize,
}

#[derive(Debug)]
struct MallocLog {
    enabled: bool,
    capacity: usize,
    records: VecDeque<MallocRecord>,
}

impl MallocLog {
    fn push(&mut self, record: MallocRecord) {
        if !self.enabled || self.capacity == 0 {
            return;
        }
        if self.records.len() == self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }
}

/// A named heap with its own best-fit allocator.
///
/// Allocation bookkeeping lives outside the managed region, so the region
/// holds nothing but user data. Every pointer returned by [`malloc`](Self::malloc)
/// must go back through [`free`](Self::free) on the same heap.
pub struct UserHeap {
    manager: HeapManager,
    config: HeapConfig,
    align: usize,
    /// Free blocks keyed by offset.
    free_blocks: BTreeMap<usize, usize>,
    allocated: BTreeMap<usize, Allocation>,
    log: MallocLog,
}

fn round_up(value: usize, align: usize) -> Option<usize> {
    value.checked_add(align - 1).map(|v| v & !(align - 1))
}

impl UserHeap {
    /// Reserve and commit a `size` byte heap named `name`.
    ///
    /// The calling location is recorded as the heap owner.
    #[track_caller]
    pub fn init(size: usize, name: &str, list: &HeapList, config: &HeapConfig) -> Result<Self> {
        let owner = Location::caller().to_string();
        Self::init_with_platform(size, name, list, config, default_platform(), &owner)
    }

    pub fn init_with_platform(
        size: usize,
        name: &str,
        list: &HeapList,
        config: &HeapConfig,
        platform: Arc<dyn PlatformMemory>,
        owner: &str,
    ) -> Result<Self> {
        let mut manager = HeapManager::with_identity(list, platform, name, HeapKind::User);
        manager.create_heap(size)?;
        manager.commit_heap(0, owner)?;

        let mut heap = Self {
            manager,
            config: config.clone(),
            align: config.effective_alignment(),
            free_blocks: BTreeMap::new(),
            allocated: BTreeMap::new(),
            log: MallocLog {
                enabled: false,
                capacity: config.malloc_log_capacity,
                records: VecDeque::new(),
            },
        };
        heap.reset_arena();

        debug!(heap = name, size, "Created user heap");
        Ok(heap)
    }

    /// Rebuild the free list to cover the committed region.
    fn reset_arena(&mut self) {
        self.free_blocks.clear();
        self.allocated.clear();

        if let Some(base) = self.manager.heap_ptr() {
            let lead = base.as_ptr().align_offset(self.align);
            let usable = self.manager.committed_size().saturating_sub(lead) & !(self.align - 1);
            if usable > 0 {
                self.free_blocks.insert(lead, usable);
            }
        }
        self.publish_free();
    }

    fn publish_free(&self) {
        self.manager
            .counters()
            .set_free(self.core_left(), self.total_core_left());
    }

    fn offset_of(&self, ptr: *const u8) -> Option<usize> {
        let base = self.manager.heap_ptr()?.as_ptr() as usize;
        let addr = ptr as usize;
        (addr >= base && addr < base + self.manager.committed_size()).then(|| addr - base)
    }

    /// Allocate `size` bytes. Returns None when no free block is large
    /// enough or the heap has been destroyed.
    pub fn malloc(&mut self, size: usize) -> Option<NonNull<u8>> {
        let base = self.manager.heap_ptr()?;
        let Some(needed) = round_up(size.max(1), self.align) else {
            self.log.push(MallocRecord { op: MallocOp::Failed, offset: 0, size });
            return None;
        };

        let best = self
            .free_blocks
            .iter()
            .filter(|&(_, &len)| len >= needed)
            .min_by_key(|&(_, &len)| len)
            .map(|(&offset, &len)| (offset, len));

        let Some((offset, len)) = best else {
            warn!(
                heap = self.name(),
                requested = size,
                core_left = self.core_left(),
                "User heap allocation failed"
            );
            self.log.push(MallocRecord { op: MallocOp::Failed, offset: 0, size });
            return None;
        };

        self.free_blocks.remove(&offset);
        if len > needed {
            self.free_blocks.insert(offset + needed, len - needed);
        }
        self.allocated.insert(
            offset,
            Allocation {
                size: needed,
                requested: size,
            },
        );
        self.log.push(MallocRecord { op: MallocOp::Malloc, offset, size: needed });
        self.publish_free();

        // SAFETY: offset + needed lies inside the committed region.
        Some(unsafe { base.add(offset) })
    }

    /// Allocate `size` zeroed bytes.
    pub fn calloc(&mut self, size: usize) -> Option<NonNull<u8>> {
        let ptr = self.malloc(size)?;
        // SAFETY: malloc returned at least `size` writable bytes.
        unsafe { ptr.as_ptr().write_bytes(0, size) };
        Some(ptr)
    }

    /// Release an allocation. A null pointer is a no-op.
    ///
    /// The pointer must have come from `malloc` on this heap. Pointers that
    /// do not name a live allocation are logged and ignored.
    pub fn free(&mut self, ptr: *mut u8) {
        if ptr.is_null() {
            return;
        }

        let Some(allocation) = self
            .offset_of(ptr)
            .and_then(|offset| self.allocated.remove(&offset).map(|a| (offset, a)))
        else {
            warn!(heap = self.name(), ptr = ?ptr, "Free of pointer not allocated from this heap");
            return;
        };

        let (offset, Allocation { size, .. }) = allocation;
        self.log.push(MallocRecord { op: MallocOp::Free, offset, size });
        self.insert_free(offset, size);
        self.publish_free();
    }

    fn insert_free(&mut self, mut offset: usize, mut size: usize) {
        if let Some(next) = self.free_blocks.remove(&(offset + size)) {
            size += next;
        }
        if let Some((&prev, &prev_len)) = self.free_blocks.range(..offset).next_back() {
            if prev + prev_len == offset {
                self.free_blocks.remove(&prev);
                offset = prev;
                size += prev_len;
            }
        }
        self.free_blocks.insert(offset, size);
    }

    /// Borrow a live allocation as a byte slice of its requested length.
    pub fn block_mut(&mut self, ptr: NonNull<u8>) -> Option<&mut [u8]> {
        let offset = self.offset_of(ptr.as_ptr())?;
        let allocation = self.allocated.get(&offset)?;
        // SAFETY: the allocation is live and `&mut self` keeps the heap
        // from handing out or freeing it while the slice exists.
        Some(unsafe { std::slice::from_raw_parts_mut(ptr.as_ptr(), allocation.requested) })
    }

    /// Whether `ptr` points into this heap's committed region.
    pub fn pointer_on_heap(&self, ptr: *const u8) -> bool {
        self.offset_of(ptr).is_some()
    }

    /// Largest free block in bytes.
    pub fn core_left(&self) -> usize {
        self.free_blocks.values().copied().max().unwrap_or(0)
    }

    /// Total free bytes.
    pub fn total_core_left(&self) -> usize {
        self.free_blocks.values().sum()
    }

    pub fn live_allocations(&self) -> usize {
        self.allocated.len()
    }

    /// Visit every block in address order without changing the heap.
    pub fn walk_heap(&self, print: bool, skip_allocated: bool) -> Vec<HeapBlockInfo> {
        let free = self.free_blocks.iter().map(|(&offset, &size)| HeapBlockInfo {
            offset,
            size,
            allocated: false,
        });
        let used = self
            .allocated
            .iter()
            .filter(|_| !skip_allocated)
            .map(|(&offset, a)| HeapBlockInfo {
                offset,
                size: a.size,
                allocated: true,
            });

        let mut blocks: Vec<_> = free.chain(used).collect();
        blocks.sort_by_key(|b| b.offset);

        if print {
            info!(heap = self.name(), blocks = blocks.len(), "Walking heap");
            for block in &blocks {
                info!(
                    heap = self.name(),
                    offset = block.offset,
                    size = block.size,
                    allocated = block.allocated,
                    "heap block"
                );
            }
        }
        blocks
    }

    pub fn start_malloc_log(&mut self) {
        self.log.enabled = true;
    }

    pub fn stop_malloc_log(&mut self) {
        self.log.enabled = false;
    }

    pub fn malloc_log(&self) -> impl Iterator<Item = &MallocRecord> {
        self.log.records.iter()
    }

    /// Emit the malloc log through tracing. Returns the number of records.
    pub fn dump_record_log(&self) -> usize {
        for record in &self.log.records {
            debug!(
                heap = self.name(),
                op = ?record.op,
                offset = record.offset,
                size = record.size,
                "malloc record"
            );
        }
        self.log.records.len()
    }

    /// Recommit a heap after `decommit_heap`.
    pub fn commit_heap(&mut self, owner: &str) -> Result<usize> {
        let committed = self.manager.commit_heap(0, owner)?;
        self.reset_arena();
        Ok(committed)
    }

    /// Give memory back to the system. Only allowed with no live allocations.
    pub fn decommit_heap(&mut self, size: usize) -> Result<usize> {
        if !self.allocated.is_empty() {
            return Err(HeapError::BlocksInUse {
                live: self.allocated.len(),
            });
        }
        let released = self.manager.decommit_heap(size)?;
        self.reset_arena();
        Ok(released)
    }

    /// Drop every allocation and release the heap. Safe to repeat.
    pub fn destroy(&mut self) {
        self.free_blocks.clear();
        self.allocated.clear();
        self.log.records.clear();
        self.manager.destroy();
    }

    pub fn name(&self) -> &str {
        self.manager.name()
    }

    pub fn total_size(&self) -> usize {
        self.manager.total_size()
    }

    pub fn committed_size(&self) -> usize {
        self.manager.committed_size()
    }

    pub fn config(&self) -> &HeapConfig {
        &self.config
    }

    pub fn manager(&self) -> &HeapManager {
        &self.manager
    }
}

impl Drop for UserHeap {
    fn drop(&mut self) {
        if !self.allocated.is_empty() {
            debug!(
                heap = self.name(),
                live = self.allocated.len(),
                "Dropping user heap with live allocations"
            );
        }
    }
}
