//! File-backed shared-memory regions.
//!
//! A `MappedBuffer` lets two processes attach the same ring or broadcast
//! layout: one side calls [`MappedBuffer::create`], the other
//! [`MappedBuffer::open`]. The trailer counters live inside the mapping, so
//! no other coordination channel is needed.

use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::io::AsRawFd;
use std::path::Path;

use crate::buffer::AtomicBuffer;

/// A `MAP_SHARED` file mapping usable as an [`AtomicBuffer`].
pub struct MappedBuffer {
    ptr: *mut u8,
    capacity: usize,
    _file: File,
}

impl MappedBuffer {
    /// Create (or truncate) `path` at `capacity` bytes and map it shared.
    ///
    /// The file is zero-filled by the kernel, which matches the all-zero
    /// initial state every layout in this crate expects.
    pub fn create<P: AsRef<Path>>(path: P, capacity: usize) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.set_len(capacity as u64)?;
        Self::map(file, capacity)
    }

    /// Map an existing region created by another process.
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let capacity = file.metadata()?.len() as usize;
        Self::map(file, capacity)
    }

    fn map(file: File, capacity: usize) -> io::Result<Self> {
        if capacity == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "cannot map an empty region",
            ));
        }

        // SAFETY: fd is valid for the lifetime of `file`, which we keep; a
        // MAP_SHARED mapping of `capacity` bytes matches the file length set
        // by create()/reported by metadata().
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                capacity,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                file.as_raw_fd(),
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }

        Ok(Self {
            ptr: ptr.cast::<u8>(),
            capacity,
            _file: file,
        })
    }
}

impl AtomicBuffer for MappedBuffer {
    fn as_mut_ptr(&self) -> *mut u8 {
        self.ptr
    }

    fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Drop for MappedBuffer {
    fn drop(&mut self) {
        // SAFETY: mapped in map() with this exact length.
        unsafe {
            libc::munmap(self.ptr.cast::<libc::c_void>(), self.capacity);
        }
    }
}

// SAFETY: access goes through atomic loads/stores or raw copies governed by
// the ownership protocol of the layout imposed on the mapping.
unsafe impl Send for MappedBuffer {}
unsafe impl Sync for MappedBuffer {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ring::descriptor::trailer::TRAILER_LENGTH;
    use crate::{ManyToOneRingBuffer, RingBuffer};

    fn scratch_path(name: &str) -> std::path::PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!("ringkit-{}-{}", name, std::process::id()));
        path
    }

    #[test]
    fn mapping_is_page_aligned_and_zeroed() {
        let path = scratch_path("zeroed");
        let buffer = MappedBuffer::create(&path, 4096).unwrap();
        assert!(buffer.verify_alignment().is_ok());
        for i in 0..512 {
            assert_eq!(buffer.get_i64(i * 8), 0);
        }
        drop(buffer);
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn two_mappings_share_one_ring() {
        let path = scratch_path("shared-ring");
        let capacity = 1024 + TRAILER_LENGTH;

        let producer_side =
            ManyToOneRingBuffer::new(MappedBuffer::create(&path, capacity).unwrap()).unwrap();
        let consumer_side =
            ManyToOneRingBuffer::new(MappedBuffer::open(&path).unwrap()).unwrap();

        assert!(producer_side.write(3, b"across mappings").unwrap());

        let mut seen = Vec::new();
        let count = consumer_side.read(
            |msg_type_id, payload| seen.push((msg_type_id, payload.to_vec())),
            usize::MAX,
        );
        assert_eq!(count, 1);
        assert_eq!(seen, [(3, b"across mappings".to_vec())]);

        drop(producer_side);
        drop(consumer_side);
        let _ = std::fs::remove_file(path);
    }
}
