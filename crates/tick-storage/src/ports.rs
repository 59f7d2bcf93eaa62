//! Outbound collaborator interfaces.

/// Filesystem boundary for snapshot files.
///
/// The storage only ever writes and reads whole named blobs; where those
/// blobs live (a directory, an object store, a test fixture) is the
/// adapter's business.
pub trait SnapshotIo: Send + Sync {
    /// Writes `data` under `name`, replacing any previous content. Returns
    /// the number of bytes written; the caller treats anything other than
    /// `data.len()` as a failed step.
    fn save_file(&self, name: &str, data: &[u8]) -> std::io::Result<u64>;

    /// Reads the blob stored under `name`, up to `max_size` bytes. The
    /// caller validates the exact length.
    fn load_file(&self, name: &str, max_size: u64) -> std::io::Result<Vec<u8>>;
}
