//! Heap manager error codes.

use std::io;
use thiserror::Error;

/// Errors returned by heap reservation, commit and allocation bookkeeping.
///
/// None of these abort the process. Deciding that a failed system heap is
/// fatal is left to the caller.
#[derive(Debug, Error)]
pub enum HeapError {
    #[error("could not reserve heap address space: {0}")]
    CouldNotCreate(#[source] io::Error),

    #[error("commit of {requested} bytes exceeds the {reserved} byte reservation")]
    AllocTooBig { requested: usize, reserved: usize },

    #[error("partial commit of {requested} of {reserved} bytes is not supported")]
    CouldNotCommit { requested: usize, reserved: usize },

    #[error("heap is already fully committed")]
    OutOfMemory,

    #[error("heap has no reserved address space")]
    NotReserved,

    #[error("platform memory operation failed: {0}")]
    Platform(#[source] io::Error),

    #[error("cannot decommit while {live} allocations are live")]
    BlocksInUse { live: usize },

    #[error("failed to write heap report: {0}")]
    Report(#[source] io::Error),
}

pub type Result<T> = std::result::Result<T, HeapError>;
