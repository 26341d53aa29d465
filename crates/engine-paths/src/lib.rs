//! Typed directory layout for a single [`DataDirRoot`].
//!
//! Mirrors the on-disk layout described by the engine specification: a
//! `cluster_id` file, a `data/<shard>/<tablet_id>/<schema_hash>` tree, and
//! `snapshot/`/`trash/` sweep directories whose entries are named
//! `YYYYMMDDhhmmss[.<n>.<ttl_seconds>]`.

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{NaiveDateTime, TimeZone, Utc};
use thiserror::Error;

const DATA_DIR_NAME: &str = "data";
const SNAPSHOT_PREFIX: &str = "snapshot";
const TRASH_PREFIX: &str = "trash";
const CLUSTER_ID_FILE_NAME: &str = "cluster_id";
const SWEEP_NAME_FORMAT: &str = "%Y%m%d%H%M%S";

/// The root path of one physical disk owned by the engine.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DataDirRoot(PathBuf);

impl DataDirRoot {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self(root.into())
    }

    pub fn as_path(&self) -> &Path {
        &self.0
    }

    pub fn cluster_id_file(&self) -> ClusterIdFile {
        ClusterIdFile(self.0.join(CLUSTER_ID_FILE_NAME))
    }

    pub fn shard(&self, shard_id: u32) -> ShardDir {
        ShardDir(self.0.join(DATA_DIR_NAME).join(shard_id.to_string()))
    }

    pub fn snapshot_dir(&self) -> SweepDir {
        SweepDir {
            root: self.0.join(SNAPSHOT_PREFIX),
            kind: SweepDirKind::Snapshot,
        }
    }

    pub fn trash_dir(&self) -> SweepDir {
        SweepDir {
            root: self.0.join(TRASH_PREFIX),
            kind: SweepDirKind::Trash,
        }
    }
}

impl fmt::Display for DataDirRoot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

/// `<root>/cluster_id`, a plain-text 32-bit signed integer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClusterIdFile(PathBuf);

impl ClusterIdFile {
    pub fn as_path(&self) -> &Path {
        &self.0
    }
}

/// `<root>/data/<shard_id>`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShardDir(PathBuf);

impl ShardDir {
    pub fn as_path(&self) -> &Path {
        &self.0
    }

    pub fn tablet(&self, tablet_id: u64) -> TabletDir {
        TabletDir(self.0.join(tablet_id.to_string()))
    }
}

/// `<root>/data/<shard_id>/<tablet_id>/<schema_hash>`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TabletDir(PathBuf);

impl TabletDir {
    pub fn as_path(&self) -> &Path {
        &self.0
    }

    pub fn schema_hash(&self, schema_hash: u64) -> SchemaHashDir {
        SchemaHashDir(self.0.join(schema_hash.to_string()))
    }
}

/// `<root>/data/<shard_id>/<tablet_id>/<schema_hash>`, owning the tablet
/// header file `<tablet_id>.hdr` and rowset files.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SchemaHashDir(PathBuf);

impl SchemaHashDir {
    pub fn as_path(&self) -> &Path {
        &self.0
    }

    pub fn header_file(&self, tablet_id: u64) -> PathBuf {
        self.0.join(format!("{tablet_id}.hdr"))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SweepDirKind {
    Snapshot,
    Trash,
}

/// Either `<root>/snapshot` or `<root>/trash`: a directory whose entries are
/// named `YYYYMMDDhhmmss[.<n>.<ttl_seconds>]`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SweepDir {
    root: PathBuf,
    kind: SweepDirKind,
}

impl SweepDir {
    pub fn as_path(&self) -> &Path {
        &self.root
    }

    pub fn kind(&self) -> SweepDirKind {
        self.kind
    }

    pub fn entry_path(&self, name: &SweepEntryName) -> PathBuf {
        self.root.join(name.to_string())
    }
}

/// A parsed `YYYYMMDDhhmmss[.<n>.<ttl_seconds>]` sweep-directory entry name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SweepEntryName {
    pub create_time: NaiveDateTime,
    pub seq: Option<u32>,
    pub ttl_seconds: Option<u64>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SweepNameParseError {
    #[error("entry name `{0}` does not start with a YYYYMMDDhhmmss timestamp")]
    BadTimestamp(String),
    #[error("entry name `{0}` has a malformed `.<n>.<ttl_seconds>` suffix")]
    BadSuffix(String),
}

impl SweepEntryName {
    pub fn new(create_time: NaiveDateTime, seq: Option<u32>, ttl_seconds: Option<u64>) -> Self {
        Self {
            create_time,
            seq,
            ttl_seconds,
        }
    }

    /// Parses a filename of the form `YYYYMMDDhhmmss[.<n>.<ttl_seconds>]`.
    ///
    /// The timestamp prefix is always exactly 14 digits; the `.<n>.<ttl>`
    /// suffix, when present, must supply both components.
    pub fn parse(name: &str) -> Result<Self, SweepNameParseError> {
        let mut parts = name.splitn(3, '.');
        let ts = parts.next().unwrap_or_default();
        let create_time = NaiveDateTime::parse_from_str(ts, SWEEP_NAME_FORMAT)
            .map_err(|_| SweepNameParseError::BadTimestamp(name.to_owned()))?;

        let rest: Vec<&str> = parts.collect();
        let (seq, ttl_seconds) = match rest.len() {
            0 => (None, None),
            2 => {
                let seq: u32 = rest[0]
                    .parse()
                    .map_err(|_| SweepNameParseError::BadSuffix(name.to_owned()))?;
                let ttl: u64 = rest[1]
                    .parse()
                    .map_err(|_| SweepNameParseError::BadSuffix(name.to_owned()))?;
                (Some(seq), Some(ttl))
            }
            _ => return Err(SweepNameParseError::BadSuffix(name.to_owned())),
        };

        Ok(Self {
            create_time,
            seq,
            ttl_seconds,
        })
    }

    pub fn create_time_utc(&self) -> chrono::DateTime<Utc> {
        Utc.from_utc_datetime(&self.create_time)
    }
}

impl fmt::Display for SweepEntryName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.create_time.format(SWEEP_NAME_FORMAT))?;
        if let (Some(seq), Some(ttl)) = (self.seq, self.ttl_seconds) {
            write!(f, ".{seq}.{ttl}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_joins_match_the_documented_convention() {
        let root = DataDirRoot::new("/mnt/disk0");
        assert_eq!(root.cluster_id_file().as_path(), Path::new("/mnt/disk0/cluster_id"));
        assert_eq!(root.shard(3).as_path(), Path::new("/mnt/disk0/data/3"));
        assert_eq!(
            root.shard(3).tablet(42).schema_hash(7).header_file(42),
            Path::new("/mnt/disk0/data/3/42/7/42.hdr")
        );
        assert_eq!(root.snapshot_dir().as_path(), Path::new("/mnt/disk0/snapshot"));
        assert_eq!(root.trash_dir().as_path(), Path::new("/mnt/disk0/trash"));
    }

    #[test]
    fn sweep_name_round_trips_without_suffix() {
        let name = SweepEntryName::parse("20240101120000").unwrap();
        assert_eq!(name.seq, None);
        assert_eq!(name.ttl_seconds, None);
        assert_eq!(name.to_string(), "20240101120000");
    }

    #[test]
    fn sweep_name_round_trips_with_suffix() {
        let name = SweepEntryName::parse("20240101120000.1.3600").unwrap();
        assert_eq!(name.seq, Some(1));
        assert_eq!(name.ttl_seconds, Some(3600));
        assert_eq!(name.to_string(), "20240101120000.1.3600");
    }

    #[test]
    fn sweep_name_rejects_bad_timestamp() {
        assert!(matches!(
            SweepEntryName::parse("not-a-timestamp"),
            Err(SweepNameParseError::BadTimestamp(_))
        ));
    }

    #[test]
    fn sweep_name_rejects_partial_suffix() {
        assert!(matches!(
            SweepEntryName::parse("20240101120000.1"),
            Err(SweepNameParseError::BadSuffix(_))
        ));
    }

    proptest::proptest! {
        #[test]
        fn sweep_name_parse_is_inverse_of_display(
            year in 2000i32..2100,
            month in 1u32..=12,
            day in 1u32..=28,
            hour in 0u32..24,
            minute in 0u32..60,
            second in 0u32..60,
            seq in proptest::option::of(0u32..1000),
            ttl in proptest::option::of(0u64..1_000_000),
        ) {
            let create_time = chrono::NaiveDate::from_ymd_opt(year, month, day)
                .unwrap()
                .and_hms_opt(hour, minute, second)
                .unwrap();
            // The suffix only exists as a pair: normalize independent Options.
            let (seq, ttl) = match (seq, ttl) {
                (Some(s), Some(t)) => (Some(s), Some(t)),
                _ => (None, None),
            };
            let name = SweepEntryName::new(create_time, seq, ttl);
            let parsed = SweepEntryName::parse(&name.to_string()).unwrap();
            prop_assert_eq!(parsed, name);
        }
    }
}
