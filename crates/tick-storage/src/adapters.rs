//! Filesystem adapters for the snapshot port.

use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use crate::ports::SnapshotIo;

/// Snapshot files in a plain directory.
///
/// Writes go through a temp file that is synced and renamed into place, so a
/// crash mid-write never leaves a half-written snapshot section behind.
pub struct DirSnapshotIo {
    dir: PathBuf,
}

impl DirSnapshotIo {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }
}

impl SnapshotIo for DirSnapshotIo {
    fn save_file(&self, name: &str, data: &[u8]) -> io::Result<u64> {
        fs::create_dir_all(&self.dir)?;
        let target = self.dir.join(name);
        let temp = self.dir.join(format!("{name}.tmp"));
        let mut file = fs::File::create(&temp)?;
        file.write_all(data)?;
        file.sync_all()?;
        fs::rename(&temp, &target)?;
        Ok(data.len() as u64)
    }

    fn load_file(&self, name: &str, max_size: u64) -> io::Result<Vec<u8>> {
        let file = fs::File::open(self.dir.join(name))?;
        let mut bytes = Vec::new();
        file.take(max_size).read_to_end(&mut bytes)?;
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let io = DirSnapshotIo::new(dir.path());
        let written = io.save_file("snapshotMetadata.042", b"hello").unwrap();
        assert_eq!(written, 5);
        let bytes = io.load_file("snapshotMetadata.042", 1024).unwrap();
        assert_eq!(bytes, b"hello");
    }

    #[test]
    fn load_caps_at_max_size() {
        let dir = tempfile::tempdir().unwrap();
        let io = DirSnapshotIo::new(dir.path());
        io.save_file("blob", &[7u8; 100]).unwrap();
        let bytes = io.load_file("blob", 10).unwrap();
        assert_eq!(bytes.len(), 10);
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let io = DirSnapshotIo::new(dir.path());
        assert!(io.load_file("absent", 10).is_err());
    }
}
