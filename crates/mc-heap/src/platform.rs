//! Platform memory reservation.
//!
//! A heap first reserves address space and later commits it. How that maps
//! to the operating system is hidden behind [`PlatformMemory`] so the heap
//! manager never issues raw VM calls itself:
//!
//! - [`VirtualMemory`] (unix): `mmap(PROT_NONE)` reserves, `mprotect` commits,
//!   `madvise(DONTNEED)` gives pages back.
//! - [`EagerMemory`] (everywhere): one zeroed allocation up front, commit and
//!   decommit only check bounds.

use std::alloc::{self, Layout};
use std::fmt;
use std::io;
use std::ptr::NonNull;
use std::sync::Arc;

/// A reserved range of address space.
///
/// Dropping the region releases the whole reservation, committed or not.
pub trait Region: Send {
    /// Start of the reservation.
    fn base(&self) -> NonNull<u8>;

    /// Size of the reservation in bytes, as requested.
    fn len(&self) -> usize;

    /// Back the first `bytes` bytes of the reservation with memory.
    fn commit(&mut self, bytes: usize) -> io::Result<()>;

    /// Give back the memory behind `[offset, offset + bytes)`.
    ///
    /// Only whole pages inside the range are returned to the system, so
    /// bytes sharing a page with still-committed memory are left alone.
    fn decommit(&mut self, offset: usize, bytes: usize) -> io::Result<()>;
}

/// Source of reservations for the heap manager.
pub trait PlatformMemory: Send + Sync + fmt::Debug {
    /// Reserve `bytes` of address space without committing it.
    fn reserve(&self, bytes: usize) -> io::Result<Box<dyn Region>>;
}

/// The best platform implementation for this target.
pub fn default_platform() -> Arc<dyn PlatformMemory> {
    #[cfg(unix)]
    {
        Arc::new(VirtualMemory)
    }
    #[cfg(not(unix))]
    {
        Arc::new(EagerMemory)
    }
}

fn zero_sized() -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, "cannot reserve zero bytes")
}

fn out_of_range(offset: usize, bytes: usize, len: usize) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidInput,
        format!("range {offset}+{bytes} outside {len} byte reservation"),
    )
}

/// Allocate-on-create fallback where reserve and commit are the same step.
#[derive(Debug, Default, Clone, Copy)]
pub struct EagerMemory;

const EAGER_ALIGN: usize = 4096;

struct EagerRegion {
    ptr: NonNull<u8>,
    layout: Layout,
    len: usize,
}

// The region exclusively owns its allocation.
unsafe impl Send for EagerRegion {}

impl PlatformMemory for EagerMemory {
    fn reserve(&self, bytes: usize) -> io::Result<Box<dyn Region>> {
        if bytes == 0 {
            return Err(zero_sized());
        }

        let layout = Layout::from_size_align(bytes, EAGER_ALIGN)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

        // SAFETY: layout has a non-zero size.
        let ptr = unsafe { alloc::alloc_zeroed(layout) };
        let ptr = NonNull::new(ptr).ok_or_else(|| io::Error::from(io::ErrorKind::OutOfMemory))?;

        Ok(Box::new(EagerRegion {
            ptr,
            layout,
            len: bytes,
        }))
    }
}

impl Region for EagerRegion {
    fn base(&self) -> NonNull<u8> {
        self.ptr
    }

    fn len(&self) -> usize {
        self.len
    }

    fn commit(&mut self, bytes: usize) -> io::Result<()> {
        if bytes > self.len {
            return Err(out_of_range(0, bytes, self.len));
        }
        Ok(())
    }

    fn decommit(&mut self, offset: usize, bytes: usize) -> io::Result<()> {
        match offset.checked_add(bytes) {
            Some(end) if end <= self.len => Ok(()),
            _ => Err(out_of_range(offset, bytes, self.len)),
        }
    }
}

impl Drop for EagerRegion {
    fn drop(&mut self) {
        // SAFETY: allocated in `reserve` with this exact layout.
        unsafe { alloc::dealloc(self.ptr.as_ptr(), self.layout) };
    }
}

#[cfg(unix)]
pub use self::virtual_memory::VirtualMemory;

#[cfg(unix)]
mod virtual_memory {
    use super::{out_of_range, zero_sized, PlatformMemory, Region};
    use rustix::mm::{self, Advice, MapFlags, MprotectFlags, ProtFlags};
    use std::ffi::c_void;
    use std::io;
    use std::ptr::{self, NonNull};

    /// Anonymous-mapping reservations with separate fault-in on commit.
    #[derive(Debug, Default, Clone, Copy)]
    pub struct VirtualMemory;

    struct MappedRegion {
        ptr: NonNull<u8>,
        len: usize,
        mapped_len: usize,
        page_size: usize,
    }

    // The mapping is private to this region.
    unsafe impl Send for MappedRegion {}

    fn round_up(value: usize, page: usize) -> usize {
        value.div_ceil(page) * page
    }

    #[cfg(any(target_os = "linux", target_os = "android"))]
    const DONT_NEED: Advice = Advice::LinuxDontNeed;
    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    const DONT_NEED: Advice = Advice::DontNeed;

    impl PlatformMemory for VirtualMemory {
        fn reserve(&self, bytes: usize) -> io::Result<Box<dyn Region>> {
            if bytes == 0 {
                return Err(zero_sized());
            }

            let page_size = rustix::param::page_size();
            let mapped_len = round_up(bytes, page_size);

            // SAFETY: a fresh anonymous mapping does not alias anything.
            let ptr = unsafe {
                mm::mmap_anonymous(
                    ptr::null_mut(),
                    mapped_len,
                    ProtFlags::empty(),
                    MapFlags::PRIVATE,
                )?
            };

            let ptr = NonNull::new(ptr.cast::<u8>())
                .ok_or_else(|| io::Error::other("mmap returned null"))?;

            Ok(Box::new(MappedRegion {
                ptr,
                len: bytes,
                mapped_len,
                page_size,
            }))
        }
    }

    impl MappedRegion {
        fn addr(&self, offset: usize) -> *mut c_void {
            // SAFETY: callers keep offset within the mapping.
            unsafe { self.ptr.as_ptr().add(offset).cast() }
        }
    }

    impl Region for MappedRegion {
        fn base(&self) -> NonNull<u8> {
            self.ptr
        }

        fn len(&self) -> usize {
            self.len
        }

        fn commit(&mut self, bytes: usize) -> io::Result<()> {
            if bytes > self.len {
                return Err(out_of_range(0, bytes, self.len));
            }
            let len = round_up(bytes, self.page_size);
            if len == 0 {
                return Ok(());
            }
            // SAFETY: the range lies inside our own mapping.
            unsafe {
                mm::mprotect(self.addr(0), len, MprotectFlags::READ | MprotectFlags::WRITE)?;
            }
            Ok(())
        }

        fn decommit(&mut self, offset: usize, bytes: usize) -> io::Result<()> {
            let end = match offset.checked_add(bytes) {
                Some(end) if end <= self.len => end,
                _ => return Err(out_of_range(offset, bytes, self.len)),
            };

            let start = round_up(offset, self.page_size);
            let end = round_up(end, self.page_size).min(self.mapped_len);
            if start >= end {
                return Ok(());
            }

            // SAFETY: page-aligned range inside our own mapping; nothing
            // borrows the decommitted bytes.
            unsafe {
                mm::madvise(self.addr(start), end - start, DONT_NEED)?;
                mm::mprotect(self.addr(start), end - start, MprotectFlags::empty())?;
            }
            Ok(())
        }
    }

    impl Drop for MappedRegion {
        fn drop(&mut self) {
            // SAFETY: unmapping exactly what `reserve` mapped.
            if let Err(e) = unsafe { mm::munmap(self.addr(0), self.mapped_len) } {
                tracing::warn!(error = %e, len = self.mapped_len, "munmap failed");
            }
        }
    }
}
