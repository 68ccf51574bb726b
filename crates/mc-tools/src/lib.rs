//! MC2 asset pipeline tools
//!
//! Shared pieces of `makersp` (wildcards to response file) and `makefst`
//! (response file to fast file).

pub mod cli;
pub mod response;
pub mod wildcard;

use anyhow::{Context, Result};
use mc_heap::{HeapConfig, HeapList, UserHeap};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::FmtSubscriber;

/// Size of the system heap every tool sets up before doing any work.
pub const SYSTEM_HEAP_SIZE: usize = 32 * 1024 * 1024;

pub fn init_logging(level: LevelFilter) {
    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .compact()
        .init();
}

#[track_caller]
pub fn system_heap(list: &HeapList) -> Result<UserHeap> {
    UserHeap::init(SYSTEM_HEAP_SIZE, "system", list, &HeapConfig::default())
        .context("Failed to initialize system heap")
}
