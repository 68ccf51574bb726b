//! Base heap manager: one reserved address range with all-or-nothing commit.

use crate::error::{HeapError, Result};
use crate::heap_list::{HeapCounters, HeapList};
use crate::platform::{default_platform, PlatformMemory, Region};
use crate::stats::HeapKind;
use std::ptr::NonNull;
use std::sync::Arc;
use tracing::{debug, warn};

/// Owns a reserved range of address space and the committed prefix of it.
///
/// The heap registers itself with its [`HeapList`] on commit and
/// unregisters on [`destroy`](Self::destroy), which also runs on drop.
/// `committed_size() <= total_size()` always holds.
pub struct HeapManager {
    platform: Arc<dyn PlatformMemory>,
    list: HeapList,
    counters: Arc<HeapCounters>,
    region: Option<Box<dyn Region>>,
    total_size: usize,
    committed_size: usize,
}

impl HeapManager {
    /// Empty heap manager using the platform's virtual memory.
    pub fn new(list: &HeapList) -> Self {
        Self::with_platform(list, default_platform())
    }

    pub fn with_platform(list: &HeapList, platform: Arc<dyn PlatformMemory>) -> Self {
        Self::with_identity(list, platform, "", HeapKind::Base)
    }

    pub(crate) fn with_identity(
        list: &HeapList,
        platform: Arc<dyn PlatformMemory>,
        name: &str,
        kind: HeapKind,
    ) -> Self {
        Self {
            platform,
            list: list.clone(),
            counters: Arc::new(HeapCounters::new(name, kind)),
            region: None,
            total_size: 0,
            committed_size: 0,
        }
    }

    /// Reserve `size` bytes of address space without committing any of it.
    ///
    /// An existing reservation is destroyed first.
    pub fn create_heap(&mut self, size: usize) -> Result<()> {
        if self.region.is_some() {
            self.destroy();
        }

        let region = self
            .platform
            .reserve(size)
            .map_err(HeapError::CouldNotCreate)?;

        debug!(heap = self.name(), size, "Reserved heap");
        self.region = Some(region);
        self.total_size = size;
        self.publish();
        Ok(())
    }

    /// Commit the whole reservation (`size` 0 or `size == total_size()`).
    ///
    /// `owner` is stored for diagnostics and shows up in heap reports.
    /// Returns the number of bytes newly committed.
    pub fn commit_heap(&mut self, size: usize, owner: &str) -> Result<usize> {
        let total = self.total_size;
        let region = self.region.as_mut().ok_or(HeapError::NotReserved)?;

        let requested = if size == 0 { total } else { size };
        if requested > total {
            return Err(HeapError::AllocTooBig {
                requested,
                reserved: total,
            });
        }
        if requested < total {
            return Err(HeapError::CouldNotCommit {
                requested,
                reserved: total,
            });
        }

        let left = total - self.committed_size;
        if left == 0 {
            return Err(HeapError::OutOfMemory);
        }
        let commit = requested.min(left);

        region
            .commit(self.committed_size + commit)
            .map_err(HeapError::Platform)?;
        self.committed_size += commit;

        self.counters.set_owner(Some(owner.to_string()));
        self.publish();
        self.list.add_heap(&self.counters);

        debug!(heap = self.name(), committed = self.committed_size, owner, "Committed heap");
        Ok(commit)
    }

    /// Give back `size` bytes (0 = everything) from the top of the committed
    /// range. Returns the number of bytes actually decommitted.
    pub fn decommit_heap(&mut self, size: usize) -> Result<usize> {
        if self.committed_size == 0 {
            return Ok(0);
        }
        let region = self.region.as_mut().ok_or(HeapError::NotReserved)?;

        let size = if size == 0 {
            self.committed_size
        } else {
            size.min(self.committed_size)
        };
        let offset = self.committed_size - size;

        region.decommit(offset, size).map_err(HeapError::Platform)?;
        self.committed_size = offset;
        self.publish();

        debug!(heap = self.name(), released = size, committed = self.committed_size, "Decommitted heap");
        Ok(size)
    }

    /// Decommit, release the reservation and unregister. Safe to repeat.
    pub fn destroy(&mut self) {
        self.list.remove_heap(&self.counters);

        if let Some(mut region) = self.region.take() {
            if self.committed_size > 0 {
                if let Err(e) = region.decommit(0, self.committed_size) {
                    warn!(heap = self.name(), error = %e, "Decommit during destroy failed");
                }
            }
            drop(region);
            debug!(heap = self.name(), size = self.total_size, "Released heap");
        }

        self.total_size = 0;
        self.committed_size = 0;
        self.counters.set_owner(None);
        self.counters.set_free(0, 0);
        self.publish();
    }

    fn publish(&self) {
        let base = self.region.as_ref().map_or(0, |r| r.base().as_ptr() as usize);
        self.counters
            .set_region(base, self.total_size, self.committed_size);
    }

    /// Start of the heap, only once it is reserved and committed.
    pub fn heap_ptr(&self) -> Option<NonNull<u8>> {
        match &self.region {
            Some(region) if self.total_size > 0 && self.committed_size > 0 => Some(region.base()),
            _ => None,
        }
    }

    pub fn is_reserved(&self) -> bool {
        self.region.is_some()
    }

    pub fn total_size(&self) -> usize {
        self.total_size
    }

    pub fn committed_size(&self) -> usize {
        self.committed_size
    }

    pub fn name(&self) -> &str {
        self.counters.name()
    }

    pub fn kind(&self) -> HeapKind {
        self.counters.kind()
    }

    /// Tag supplied by whoever committed this heap.
    pub fn owner(&self) -> Option<String> {
        self.counters.owner()
    }

    pub fn heap_list(&self) -> &HeapList {
        &self.list
    }

    pub(crate) fn counters(&self) -> &Arc<HeapCounters> {
        &self.counters
    }
}

impl Drop for HeapManager {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl std::fmt::Debug for HeapManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeapManager")
            .field("name", &self.name())
            .field("kind", &self.kind())
            .field("total_size", &self.total_size)
            .field("committed_size", &self.committed_size)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::EagerMemory;

    fn heap(list: &HeapList, size: usize) -> HeapManager {
        let mut heap = HeapManager::new(list);
        heap.create_heap(size).expect("reserve");
        heap
    }

    #[test]
    fn test_commit_then_decommit_restores_zero() {
        let list = HeapList::default();
        for size in [4096, 10_000, 1 << 20] {
            let mut heap = heap(&list, size);
            assert_eq!(heap.commit_heap(size, "test").unwrap(), size);
            assert_eq!(heap.committed_size(), size);
            assert_eq!(heap.decommit_heap(size).unwrap(), size);
            assert_eq!(heap.committed_size(), 0);
        }
    }

    #[test]
    fn test_commit_zero_commits_everything() {
        let list = HeapList::default();
        let mut heap = heap(&list, 8192);
        heap.commit_heap(0, "test").unwrap();
        assert_eq!(heap.committed_size(), 8192);
        assert!(heap.heap_ptr().is_some());
    }

    #[test]
    fn test_commit_errors() {
        let list = HeapList::default();
        let mut heap = heap(&list, 8192);

        assert!(matches!(
            heap.commit_heap(8193, "test"),
            Err(HeapError::AllocTooBig { requested: 8193, reserved: 8192 })
        ));
        assert!(matches!(
            heap.commit_heap(4096, "test"),
            Err(HeapError::CouldNotCommit { .. })
        ));
        assert_eq!(heap.committed_size(), 0);

        heap.commit_heap(0, "test").unwrap();
        assert!(matches!(heap.commit_heap(0, "test"), Err(HeapError::OutOfMemory)));

        let mut empty = HeapManager::new(&list);
        assert!(matches!(empty.commit_heap(0, "test"), Err(HeapError::NotReserved)));
    }

    #[test]
    fn test_create_failure_reported() {
        let list = HeapList::default();
        let mut heap = HeapManager::new(&list);
        assert!(matches!(heap.create_heap(0), Err(HeapError::CouldNotCreate(_))));
        assert!(!heap.is_reserved());
    }

    #[test]
    fn test_partial_decommit_is_exact() {
        let list = HeapList::default();
        let mut heap = heap(&list, 64 * 1024);
        heap.commit_heap(0, "test").unwrap();

        assert_eq!(heap.decommit_heap(16 * 1024).unwrap(), 16 * 1024);
        assert_eq!(heap.committed_size(), 48 * 1024);

        // Asking for more than is committed clamps.
        assert_eq!(heap.decommit_heap(1 << 30).unwrap(), 48 * 1024);
        assert_eq!(heap.committed_size(), 0);

        // Already decommitted.
        assert_eq!(heap.decommit_heap(0).unwrap(), 0);

        // Commit brings back exactly what was given up.
        assert_eq!(heap.commit_heap(0, "test").unwrap(), 64 * 1024);
    }

    #[test]
    fn test_double_destroy_is_noop() {
        let list = HeapList::default();
        let mut heap = heap(&list, 4096);
        heap.commit_heap(0, "test").unwrap();
        assert_eq!(list.live_heaps(), 1);

        heap.destroy();
        assert_eq!(heap.total_size(), 0);
        assert_eq!(heap.committed_size(), 0);
        assert!(heap.heap_ptr().is_none());
        assert_eq!(list.live_heaps(), 0);

        heap.destroy();
        assert_eq!(list.live_heaps(), 0);

        // Reusable after destroy.
        heap.create_heap(4096).unwrap();
        heap.commit_heap(0, "again").unwrap();
        assert_eq!(heap.owner().as_deref(), Some("again"));
    }

    #[test]
    fn test_three_heaps_total_sixty() {
        let list = HeapList::default();
        let mut heaps = Vec::new();
        for size in [10, 20, 30] {
            let mut heap = HeapManager::with_platform(&list, Arc::new(EagerMemory));
            heap.create_heap(size).unwrap();
            heap.commit_heap(0, "stats").unwrap();
            heaps.push(heap);
        }

        let totals = list.update();
        assert_eq!(totals.total_size, 60);
        assert_eq!(list.live_heaps(), 3);

        drop(heaps);
        assert_eq!(list.update().total_size, 0);
    }

    #[test]
    fn test_owner_recorded_in_registry() {
        let list = HeapList::default();
        let mut heap = heap(&list, 4096);
        heap.commit_heap(0, "renderer").unwrap();

        let records = list.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].owner.as_deref(), Some("renderer"));
        assert_eq!(records[0].heap_size, 4096);
        assert_eq!(records[0].kind, HeapKind::Base);
    }
}
