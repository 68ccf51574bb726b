//! MC2 Heap Management
//!
//! Reserve/commit heaps over platform virtual memory, named user heaps with
//! their own allocator, and a heap registry that aggregates statistics for
//! reporting.

mod config;
mod error;
mod heap_list;
mod manager;
mod platform;
mod stats;
mod user_heap;

pub use config::HeapConfig;
pub use error::{HeapError, Result};
pub use heap_list::{HeapCounters, HeapList};
pub use manager::HeapManager;
pub use platform::{default_platform, EagerMemory, PlatformMemory, Region};
#[cfg(unix)]
pub use platform::VirtualMemory;
pub use stats::{format_bytes, HeapKind, HeapListSnapshot, HeapRecord, HeapTotals};
pub use user_heap::{HeapBlockInfo, MallocOp, MallocRecord, UserHeap};
