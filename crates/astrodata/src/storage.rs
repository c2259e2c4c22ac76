//! Backing storage for a container: a memory-mapped file or an owned buffer.

use std::fs::File;
use std::path::Path;

use memmap2::Mmap;

use crate::error::Result;

/// Bytes a container was read from.
///
/// Mapped storage supports partial reads, so arrays read from it are left
/// lazy. The file must not be truncated or rewritten while any array handle
/// created from it is alive.
#[derive(Debug)]
pub enum Storage {
    /// Memory-mapped file.
    Mapped(Mmap),
    /// Owned in-memory buffer.
    Memory(Vec<u8>),
}

impl Storage {
    /// Map `path` read-only, or read it into memory when `memmap` is false.
    pub fn open(path: impl AsRef<Path>, memmap: bool) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        let size = file.metadata()?.len();
        if memmap && size > 0 {
            // Safety: the mapping is read-only; callers must not modify the
            // file while it is mapped.
            let mmap = unsafe { Mmap::map(&file) }?;
            Ok(Storage::Mapped(mmap))
        } else {
            Ok(Storage::Memory(std::fs::read(path.as_ref())?))
        }
    }

    pub fn bytes(&self) -> &[u8] {
        match self {
            Storage::Mapped(mmap) => mmap,
            Storage::Memory(buf) => buf,
        }
    }

    /// `true` when partial reads avoid touching the rest of the file.
    pub fn is_mapped(&self) -> bool {
        matches!(self, Storage::Mapped(_))
    }
}

impl From<Vec<u8>> for Storage {
    fn from(buf: Vec<u8>) -> Self {
        Storage::Memory(buf)
    }
}
