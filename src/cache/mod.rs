//! 快照缓存：编码、文件读写、按有效期查找

pub mod discovery;
pub mod snapshot;

pub use discovery::{discover_latest_snapshot, DiscoveredSnapshot};
pub use snapshot::{
    deserialize_snapshots, read_snapshot_file, serialize_snapshots, snapshot_file_name,
    write_snapshot_file, InstitutionSnapshot, SnapshotCache, SnapshotFile,
};
