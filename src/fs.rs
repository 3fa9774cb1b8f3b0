//! Filesystem access, abstracted so change detection can be exercised
//! against an in-memory filesystem.

use crate::hash::Signature;
use std::path::Path;
use std::time::UNIX_EPOCH;

/// MTime info gathered for a file.  This also models "file is absent".
/// It's not using an Option<> just because it makes the code using it easier
/// to follow.  Stamps are nanoseconds since the epoch and are only ever
/// compared for equality.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MTime {
    Missing,
    Stamp(i64),
}

impl MTime {
    pub fn exists(&self) -> bool {
        matches!(self, MTime::Stamp(_))
    }
}

/// The filesystem as seen by the coordinator.  Must be shareable across
/// threads, since content signatures are computed in parallel when the
/// signature store is flushed.
pub trait FileSystem: Sync {
    fn read(&self, path: &Path) -> std::io::Result<Vec<u8>>;

    /// stat() an on-disk path, producing its MTime.
    fn stat(&self, path: &Path) -> std::io::Result<MTime>;

    /// Content signature of a regular file.
    fn signature(&self, path: &Path) -> std::io::Result<Signature> {
        Ok(Signature::of(self.read(path)?))
    }
}

#[derive(Default)]
pub struct RealFileSystem {}

impl RealFileSystem {
    pub fn new() -> Self {
        RealFileSystem {}
    }
}

impl FileSystem for RealFileSystem {
    fn read(&self, path: &Path) -> std::io::Result<Vec<u8>> {
        std::fs::read(path)
    }

    fn stat(&self, path: &Path) -> std::io::Result<MTime> {
        let meta = match std::fs::metadata(path) {
            Ok(meta) => meta,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(MTime::Missing),
            Err(err) => return Err(err),
        };
        let modified = meta.modified()?;
        let nanos = match modified.duration_since(UNIX_EPOCH) {
            Ok(d) => d.as_nanos() as i64,
            // Pre-epoch timestamps only need to stay distinct.
            Err(e) => -(e.duration().as_nanos() as i64),
        };
        Ok(MTime::Stamp(nanos))
    }

    fn signature(&self, path: &Path) -> std::io::Result<Signature> {
        Signature::of_file(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stat_real_files() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let fs = RealFileSystem::new();
        let path = dir.path().join("f");
        assert_eq!(fs.stat(&path)?, MTime::Missing);

        std::fs::write(&path, "hello")?;
        filetime::set_file_mtime(&path, filetime::FileTime::from_unix_time(1000, 5))?;
        assert_eq!(fs.stat(&path)?, MTime::Stamp(1000 * 1_000_000_000 + 5));
        assert_eq!(fs.signature(&path)?, Signature::of("hello"));
        Ok(())
    }
}
