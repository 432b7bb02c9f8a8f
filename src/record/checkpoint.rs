//! Checkpoint files and the checksum index.
//!
//! A checkpoint is a [`RollingRecord`] serialized as JSON, compressed with
//! zstd and written as `{last_duties_slot}-{epoch}.json.zst`. The index file
//! lists one `sha384-hex  filename` line per retained checkpoint, sorted
//! ascending by slot.

use super::RollingRecord;
use crate::primitives::{Epoch, Slot};
use parking_lot::RwLock;
use sha2::{Digest, Sha384};
use std::{
    cmp::Ordering,
    collections::BTreeMap,
    fmt,
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
    str::FromStr,
    sync::Arc,
};

/// Name of the checksum index file.
pub const CHECKSUM_INDEX_FILE: &str = "checksums.sha384";

/// Version assumed for records written before versions were recorded.
const UNVERSIONED_RECORD: &str = "1.10.0";

/// Result type for checkpoint operations.
pub type CheckpointResult<T> = Result<T, CheckpointError>;

/// Errors reading, writing or validating checkpoints.
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    /// Filesystem failure.
    #[error("checkpoint io error: {0}")]
    Io(#[from] std::io::Error),

    /// A file listed in the index does not exist.
    #[error("checkpoint file {0} not found")]
    MissingFile(String),

    /// File contents do not hash to the indexed checksum.
    #[error("checksum mismatch for {file}: expected {expected}, got {actual}")]
    ChecksumMismatch { file: String, expected: String, actual: String },

    /// Malformed index line.
    #[error("invalid checksum index line: {0:?}")]
    InvalidIndexLine(String),

    /// Filename does not follow `{slot}-{epoch}.json.zst`.
    #[error("invalid checkpoint filename: {0}")]
    InvalidFilename(String),

    /// zstd failure.
    #[error("checkpoint compression failed: {0}")]
    Compression(String),

    /// JSON failure.
    #[error("checkpoint decoding failed: {0}")]
    Decode(#[from] serde_json::Error),

    /// The checkpoint belongs to another interval.
    #[error("checkpoint is for interval {found}, expected {expected}")]
    IntervalMismatch { expected: u64, found: u64 },

    /// The checkpoint starts at another slot.
    #[error("checkpoint starts at slot {found}, expected {expected}")]
    StartSlotMismatch { expected: Slot, found: Slot },

    /// The checkpoint was written by an incompatible version.
    #[error("checkpoint version {version} is older than {minimum}")]
    IncompatibleVersion { version: String, minimum: String },

    /// The version string could not be parsed.
    #[error("invalid version string: {0:?}")]
    InvalidVersion(String),
}

/// Blob storage for checkpoint files and the index.
pub trait CheckpointStore: Send + Sync {
    /// Read a file, `None` when it does not exist.
    fn read(&self, name: &str) -> CheckpointResult<Option<Vec<u8>>>;

    /// Create or replace a file.
    fn write(&self, name: &str, contents: &[u8]) -> CheckpointResult<()>;

    /// Delete a file. Returns whether it existed.
    fn delete(&self, name: &str) -> CheckpointResult<bool>;
}

impl<T: CheckpointStore + ?Sized> CheckpointStore for Arc<T> {
    fn read(&self, name: &str) -> CheckpointResult<Option<Vec<u8>>> {
        (**self).read(name)
    }

    fn write(&self, name: &str, contents: &[u8]) -> CheckpointResult<()> {
        (**self).write(name, contents)
    }

    fn delete(&self, name: &str) -> CheckpointResult<bool> {
        (**self).delete(name)
    }
}

/// Checkpoints in a directory on disk.
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    dir: PathBuf,
}

impl FileCheckpointStore {
    /// Use `dir` for checkpoints, creating it if needed.
    pub fn open(dir: impl AsRef<Path>) -> CheckpointResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// The checkpoint directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl CheckpointStore for FileCheckpointStore {
    fn read(&self, name: &str) -> CheckpointResult<Option<Vec<u8>>> {
        match fs::read(self.dir.join(name)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn write(&self, name: &str, contents: &[u8]) -> CheckpointResult<()> {
        fs::write(self.dir.join(name), contents)?;
        Ok(())
    }

    fn delete(&self, name: &str) -> CheckpointResult<bool> {
        match fs::remove_file(self.dir.join(name)) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }
}

/// In-memory checkpoint storage for tests.
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    files: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryCheckpointStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Names of all stored files.
    pub fn file_names(&self) -> Vec<String> {
        self.files.read().keys().cloned().collect()
    }

    /// Number of stored files, the index included.
    pub fn len(&self) -> usize {
        self.files.read().len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.files.read().is_empty()
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    fn read(&self, name: &str) -> CheckpointResult<Option<Vec<u8>>> {
        Ok(self.files.read().get(name).cloned())
    }

    fn write(&self, name: &str, contents: &[u8]) -> CheckpointResult<()> {
        self.files.write().insert(name.to_string(), contents.to_vec());
        Ok(())
    }

    fn delete(&self, name: &str) -> CheckpointResult<bool> {
        Ok(self.files.write().remove(name).is_some())
    }
}

/// Filename of the checkpoint for `slot`.
pub fn checkpoint_filename(slot: Slot, epoch: Epoch) -> String {
    format!("{slot}-{epoch}.json.zst")
}

/// Slot and epoch encoded in a checkpoint filename.
pub fn parse_checkpoint_filename(name: &str) -> CheckpointResult<(Slot, Epoch)> {
    let invalid = || CheckpointError::InvalidFilename(name.to_string());
    let stem = name.strip_suffix(".json.zst").ok_or_else(invalid)?;
    let (slot, epoch) = stem.split_once('-').ok_or_else(invalid)?;
    Ok((slot.parse().map_err(|_| invalid())?, epoch.parse().map_err(|_| invalid())?))
}

/// One line of the checksum index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointEntry {
    /// Hex sha384 of the compressed file.
    pub checksum: String,
    pub filename: String,
    pub slot: Slot,
}

impl CheckpointEntry {
    /// Entry for a checkpoint at `slot`.
    pub fn new(checksum: String, slot: Slot, epoch: Epoch) -> Self {
        Self { checksum, filename: checkpoint_filename(slot, epoch), slot }
    }
}

impl FromStr for CheckpointEntry {
    type Err = CheckpointError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let (checksum, filename) = line
            .split_once("  ")
            .ok_or_else(|| CheckpointError::InvalidIndexLine(line.to_string()))?;
        let (slot, _) = parse_checkpoint_filename(filename)?;
        Ok(Self { checksum: checksum.to_string(), filename: filename.to_string(), slot })
    }
}

impl fmt::Display for CheckpointEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}  {}", self.checksum, self.filename)
    }
}

/// The checksum index: retained checkpoints sorted ascending by slot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChecksumIndex {
    entries: Vec<CheckpointEntry>,
}

impl ChecksumIndex {
    /// Parse the index file contents. Blank lines are ignored.
    pub fn parse(contents: &str) -> CheckpointResult<Self> {
        let mut entries = contents
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(CheckpointEntry::from_str)
            .collect::<CheckpointResult<Vec<_>>>()?;
        entries.sort_by_key(|entry| entry.slot);
        Ok(Self { entries })
    }

    /// Entries, oldest first.
    pub fn entries(&self) -> &[CheckpointEntry] {
        &self.entries
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the index is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Replace the entry with the same filename, or insert a new one in slot order.
    pub fn upsert(&mut self, entry: CheckpointEntry) {
        if let Some(existing) = self.entries.iter_mut().find(|e| e.filename == entry.filename) {
            *existing = entry;
            return;
        }
        self.entries.push(entry);
        self.entries.sort_by_key(|entry| entry.slot);
    }

    /// Remove the oldest entries beyond `limit` and return them.
    pub fn cull(&mut self, limit: usize) -> Vec<CheckpointEntry> {
        let excess = self.entries.len().saturating_sub(limit);
        self.entries.drain(..excess).collect()
    }
}

impl fmt::Display for ChecksumIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, entry) in self.entries.iter().enumerate() {
            if i > 0 {
                f.write_str("\n")?;
            }
            write!(f, "{entry}")?;
        }
        Ok(())
    }
}

/// A compressed checkpoint and its checksum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedCheckpoint {
    pub bytes: Vec<u8>,
    pub checksum: String,
}

fn sha384_hex(bytes: &[u8]) -> String {
    hex::encode(Sha384::digest(bytes))
}

/// Serialize, compress and checksum `record`.
pub fn encode_checkpoint(record: &RollingRecord, level: i32) -> CheckpointResult<EncodedCheckpoint> {
    let json = serde_json::to_vec(record)?;
    let bytes = zstd::encode_all(json.as_slice(), level)
        .map_err(|err| CheckpointError::Compression(err.to_string()))?;
    let checksum = sha384_hex(&bytes);
    Ok(EncodedCheckpoint { bytes, checksum })
}

/// Verify `bytes` against `expected_checksum`, then decompress and decode them.
pub fn decode_checkpoint(
    file: &str,
    bytes: &[u8],
    expected_checksum: &str,
) -> CheckpointResult<RollingRecord> {
    let actual = sha384_hex(bytes);
    if !actual.eq_ignore_ascii_case(expected_checksum) {
        return Err(CheckpointError::ChecksumMismatch {
            file: file.to_string(),
            expected: expected_checksum.to_string(),
            actual,
        });
    }
    let json =
        zstd::decode_all(bytes).map_err(|err| CheckpointError::Compression(err.to_string()))?;
    Ok(serde_json::from_slice(&json)?)
}

/// A `major.minor.patch[-pre]` version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordVersion {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
    pub pre: Option<String>,
}

impl RecordVersion {
    /// Version of a record's `format_version`, treating empty as the first unversioned release.
    pub fn of_record(record: &RollingRecord) -> CheckpointResult<Self> {
        if record.format_version.is_empty() {
            return UNVERSIONED_RECORD.parse();
        }
        record.format_version.parse()
    }
}

impl FromStr for RecordVersion {
    type Err = CheckpointError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || CheckpointError::InvalidVersion(s.to_string());
        let s = s.trim().trim_start_matches('v');
        let (core, pre) = match s.split_once('-') {
            Some((core, pre)) => (core, Some(pre.to_string())),
            None => (s, None),
        };
        let mut parts = core.split('.');
        let mut next = || -> CheckpointResult<u64> {
            parts.next().ok_or_else(invalid)?.parse().map_err(|_| invalid())
        };
        let version = Self { major: next()?, minor: next()?, patch: next()?, pre };
        if parts.next().is_some() {
            return Err(invalid());
        }
        Ok(version)
    }
}

impl fmt::Display for RecordVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if let Some(pre) = &self.pre {
            write!(f, "-{pre}")?;
        }
        Ok(())
    }
}

impl Ord for RecordVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.major, self.minor, self.patch).cmp(&(other.major, other.minor, other.patch)).then_with(
            || match (&self.pre, &other.pre) {
                (None, None) => Ordering::Equal,
                // a pre-release sorts before its release
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (Some(a), Some(b)) => a.cmp(b),
            },
        )
    }
}

impl PartialOrd for RecordVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filename_round_trip() {
        assert_eq!(checkpoint_filename(3199, 99), "3199-99.json.zst");
        assert_eq!(parse_checkpoint_filename("3199-99.json.zst").unwrap(), (3199, 99));
        assert!(parse_checkpoint_filename("3199.json.zst").is_err());
        assert!(parse_checkpoint_filename("a-1.json.zst").is_err());
        assert!(parse_checkpoint_filename("1-1.json").is_err());
    }

    #[test]
    fn test_index_upsert_sort_and_cull() {
        let mut index = ChecksumIndex::parse("bb  200-6.json.zst\naa  100-3.json.zst\n").unwrap();
        assert_eq!(index.entries()[0].slot, 100);

        // same filename replaces the checksum in place
        index.upsert(CheckpointEntry::new("cc".into(), 200, 6));
        assert_eq!(index.len(), 2);
        assert_eq!(index.entries()[1].checksum, "cc");

        index.upsert(CheckpointEntry::new("dd".into(), 150, 4));
        assert_eq!(index.to_string(), "aa  100-3.json.zst\ndd  150-4.json.zst\ncc  200-6.json.zst");

        let culled = index.cull(2);
        assert_eq!(culled.len(), 1);
        assert_eq!(culled[0].filename, "100-3.json.zst");
        assert_eq!(index.len(), 2);
        assert!(index.cull(5).is_empty());
    }

    #[test]
    fn test_index_rejects_bad_lines() {
        assert!(matches!(
            ChecksumIndex::parse("aa 100-3.json.zst"),
            Err(CheckpointError::InvalidIndexLine(_))
        ));
        assert!(ChecksumIndex::parse("").unwrap().is_empty());
    }

    #[test]
    fn test_encode_decode_checkpoint() {
        let mut record = RollingRecord::new(64, 5);
        record.last_duties_slot = Some(95);
        let encoded = encode_checkpoint(&record, 3).unwrap();
        assert_eq!(encoded.checksum.len(), 96);

        let decoded = decode_checkpoint("95-2.json.zst", &encoded.bytes, &encoded.checksum).unwrap();
        assert_eq!(decoded, record);

        let mut corrupted = encoded.bytes.clone();
        corrupted[0] ^= 0xff;
        assert!(matches!(
            decode_checkpoint("95-2.json.zst", &corrupted, &encoded.checksum),
            Err(CheckpointError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_version_ordering() {
        let v = |s: &str| s.parse::<RecordVersion>().unwrap();
        assert!(v("1.10.0") < v("1.11.0"));
        assert!(v("1.11.0-dev") < v("1.11.0"));
        assert!(v("1.11.1") > v("1.11.0"));
        assert!(v("2.0.0") > v("1.99.99"));
        assert_eq!(v("v1.11.0"), v("1.11.0"));
        assert!("1.11".parse::<RecordVersion>().is_err());
        assert!("1.11.0.1".parse::<RecordVersion>().is_err());

        let mut record = RollingRecord::new(0, 1);
        record.format_version.clear();
        assert_eq!(RecordVersion::of_record(&record).unwrap(), v("1.10.0"));
    }

    #[test]
    fn test_file_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::open(dir.path().join("records")).unwrap();

        assert_eq!(store.read("missing").unwrap(), None);
        store.write("a", b"hello").unwrap();
        assert_eq!(store.read("a").unwrap().as_deref(), Some(&b"hello"[..]));
        assert!(store.delete("a").unwrap());
        assert!(!store.delete("a").unwrap());
    }
}
