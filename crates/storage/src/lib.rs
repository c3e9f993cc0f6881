mod db;
pub mod diff;
pub mod exploration;
pub mod versions;

pub use diff::DiffSegment;
pub use exploration::{ExplorationRecord, ExplorationStore};
pub use versions::{
    format_in_zone, Version, VersionDiff, VersionMeta, VersionMetaUpdate, VersionSnapshot,
    VersionStore, VersionSummary,
};
