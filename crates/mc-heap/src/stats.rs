//! Heap statistics snapshots.

use serde::Serialize;

/// Whether a registered heap only manages address space or also hands out
/// allocations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum HeapKind {
    Base,
    User,
}

impl HeapKind {
    /// Numeric type code used in the text report.
    pub fn code(self) -> u32 {
        match self {
            HeapKind::Base => 0,
            HeapKind::User => 1,
        }
    }
}

/// Aggregate figures across every live heap, rebuilt by `HeapList::update`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HeapTotals {
    /// Sum of reservation sizes.
    pub total_size: usize,
    /// Sum of free bytes inside user heaps.
    pub total_core_left: usize,
    /// Sum of the largest free block of each user heap.
    pub total_left: usize,
}

/// One occupied registry slot as of the last update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HeapRecord {
    pub slot: usize,
    pub name: String,
    pub kind: HeapKind,
    pub owner: Option<String>,
    pub base: usize,
    pub heap_size: usize,
    pub committed: usize,
    /// Largest free block.
    pub core_left: usize,
    /// Total free bytes.
    pub total_core_left: usize,
}

impl HeapRecord {
    /// Largest free block relative to all free bytes. 1.0 means unfragmented.
    pub fn frag_level(&self) -> f64 {
        if self.total_core_left == 0 {
            return 1.0;
        }
        self.core_left as f64 / self.total_core_left as f64
    }

    /// Fraction of the heap that is free, counted by largest free block.
    pub fn percent_free(&self) -> f64 {
        if self.heap_size == 0 {
            return 0.0;
        }
        1.0 - (self.heap_size - self.core_left.min(self.heap_size)) as f64 / self.heap_size as f64
    }
}

/// Serializable view of the whole registry for telemetry collectors.
#[derive(Debug, Clone, Default, Serialize)]
pub struct HeapListSnapshot {
    pub totals: HeapTotals,
    pub records: Vec<HeapRecord>,
}

impl HeapListSnapshot {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Format memory size for display.
pub fn format_bytes(bytes: usize) -> String {
    const KB: usize = 1024;
    const MB: usize = KB * 1024;
    const GB: usize = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
