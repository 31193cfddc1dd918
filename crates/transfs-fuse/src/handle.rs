//! Open file and directory handles.
//!
//! A file handle owns its descriptor: a plain passthrough descriptor for
//! real files, or an already-unlinked extracted temp descriptor for
//! archive members. Both serve positioned reads through `read_at`, so
//! concurrent reads on one handle never seek each other.

use std::fs::File;
use std::os::unix::fs::FileExt;

use transfs_mapping::DirEntryOut;

/// An open file.
#[derive(Debug)]
pub enum OpenHandle {
    /// Descriptor on a physical file.
    Real(File),
    /// Descriptor on an extracted archive member; the temp path was
    /// unlinked at open, the kernel reclaims the bytes on close.
    Extracted(File),
}

impl OpenHandle {
    /// Read up to `size` bytes at `offset`. Reads past EOF yield an empty
    /// buffer; short reads at EOF are legal.
    pub fn read_at(&self, offset: u64, size: u32) -> std::io::Result<Vec<u8>> {
        let file = match self {
            OpenHandle::Real(file) | OpenHandle::Extracted(file) => file,
        };
        let mut buf = vec![0u8; size as usize];
        let mut filled = 0usize;
        while filled < buf.len() {
            let n = file.read_at(&mut buf[filled..], offset + filled as u64)?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        buf.truncate(filled);
        Ok(buf)
    }
}

/// An open directory: the listing materialised at opendir, sliced by the
/// kernel's readdir offsets.
#[derive(Debug)]
pub struct DirHandle {
    pub entries: Vec<DirEntryOut>,
}
