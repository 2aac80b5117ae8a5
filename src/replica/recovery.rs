//! Undo/redo recovery log
//!
//! Every checkpoint rewrites a whole snapshot of the key-value map; nothing is
//! appended. File format: [MAGIC][BODY_LEN][BODY][CRC32], where BODY is the
//! bincode-encoded map and the CRC covers BODY only.
//!
//! Writes go to a sibling temp file which is flushed, fsynced and renamed over
//! the target, so a crash leaves either the old or the new snapshot.

use crate::common::{Error, Result, Snapshot};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

const SNAPSHOT_MAGIC: &[u8; 4] = b"RKV1";
const HEADER_LEN: usize = 4 + 8;
const TRAILER_LEN: usize = 4;

/// Snapshots found at startup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveredState {
    pub undo: Option<Snapshot>,
    pub redo: Option<Snapshot>,
}

/// Persistence strategy for the two-phase snapshots.
pub trait RecoveryLog: Send + Sync {
    /// Persist the pre-transaction map. Must be durable before returning.
    fn persist_undo(&self, snapshot: &Snapshot) -> Result<()>;

    /// Persist the post-transaction map. Must be durable before returning.
    fn persist_redo(&self, snapshot: &Snapshot) -> Result<()>;

    /// Read back whatever snapshots exist. A snapshot that exists but cannot be
    /// decoded is an error, never an empty map.
    fn load_on_startup(&self) -> Result<RecoveredState>;
}

/// One undo file and one redo file per node.
pub struct SnapshotFileLog {
    undo_path: PathBuf,
    redo_path: PathBuf,
}

impl SnapshotFileLog {
    /// Use `dir/undo_<id>_storage.log` and `dir/redo_<id>_storage.log`.
    pub fn open(dir: impl AsRef<Path>, server_id: &str) -> Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        Ok(Self {
            undo_path: dir.join(format!("undo_{}_storage.log", server_id)),
            redo_path: dir.join(format!("redo_{}_storage.log", server_id)),
        })
    }

    pub fn undo_path(&self) -> &Path {
        &self.undo_path
    }

    pub fn redo_path(&self) -> &Path {
        &self.redo_path
    }

    fn write_snapshot(path: &Path, snapshot: &Snapshot) -> Result<()> {
        let body = bincode::serialize(snapshot)?;
        let checksum = crc32fast::hash(&body);

        let tmp_path = path.with_extension("log.tmp");
        {
            let file = File::create(&tmp_path)?;
            let mut writer = BufWriter::new(file);
            writer.write_all(SNAPSHOT_MAGIC)?;
            writer.write_all(&(body.len() as u64).to_le_bytes())?;
            writer.write_all(&body)?;
            writer.write_all(&checksum.to_le_bytes())?;
            writer.flush()?;
            let file = writer
                .into_inner()
                .map_err(|e| Error::Io(e.into_error()))?;
            file.sync_all()?;
        }
        fs::rename(&tmp_path, path)?;
        Ok(())
    }

    fn read_snapshot(path: &Path) -> Result<Option<Snapshot>> {
        let bytes = match fs::read(path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        if bytes.len() < HEADER_LEN + TRAILER_LEN {
            return Err(Error::Corrupted(format!(
                "{}: truncated ({} bytes)",
                path.display(),
                bytes.len()
            )));
        }
        if &bytes[..4] != SNAPSHOT_MAGIC {
            return Err(Error::Corrupted(format!("{}: bad magic", path.display())));
        }

        let mut len_bytes = [0u8; 8];
        len_bytes.copy_from_slice(&bytes[4..HEADER_LEN]);
        let body_len = usize::try_from(u64::from_le_bytes(len_bytes))
            .ok()
            .filter(|len| {
                len.checked_add(HEADER_LEN + TRAILER_LEN) == Some(bytes.len())
            })
            .ok_or_else(|| Error::Corrupted(format!("{}: length mismatch", path.display())))?;

        let body = &bytes[HEADER_LEN..HEADER_LEN + body_len];
        let mut crc_bytes = [0u8; 4];
        crc_bytes.copy_from_slice(&bytes[HEADER_LEN + body_len..]);
        let expected = u32::from_le_bytes(crc_bytes);
        let actual = crc32fast::hash(body);
        if expected != actual {
            return Err(Error::ChecksumMismatch { expected, actual });
        }

        Ok(Some(bincode::deserialize(body)?))
    }
}

impl RecoveryLog for SnapshotFileLog {
    fn persist_undo(&self, snapshot: &Snapshot) -> Result<()> {
        Self::write_snapshot(&self.undo_path, snapshot)
    }

    fn persist_redo(&self, snapshot: &Snapshot) -> Result<()> {
        Self::write_snapshot(&self.redo_path, snapshot)
    }

    fn load_on_startup(&self) -> Result<RecoveredState> {
        let undo = Self::read_snapshot(&self.undo_path)?;
        if undo.is_some() {
            tracing::info!("Fetched undo log {}", self.undo_path.display());
        }
        let redo = Self::read_snapshot(&self.redo_path)?;
        if redo.is_some() {
            tracing::info!("Fetched redo log {}", self.redo_path.display());
        }
        Ok(RecoveredState { undo, redo })
    }
}

/// Non-durable log. Survives only as long as the value does.
#[derive(Default)]
pub struct MemoryRecoveryLog {
    state: Mutex<RecoveredState>,
    fail_writes: AtomicBool,
}

impl MemoryRecoveryLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from previously persisted snapshots.
    pub fn with_state(state: RecoveredState) -> Self {
        Self {
            state: Mutex::new(state),
            fail_writes: AtomicBool::new(false),
        }
    }

    /// Make every subsequent persist fail with an I/O error.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn persisted(&self) -> RecoveredState {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn store(
        &self,
        snapshot: &Snapshot,
        slot: fn(&mut RecoveredState) -> &mut Option<Snapshot>,
    ) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "injected write failure",
            )));
        }
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        *slot(&mut state) = Some(snapshot.clone());
        Ok(())
    }
}

impl RecoveryLog for MemoryRecoveryLog {
    fn persist_undo(&self, snapshot: &Snapshot) -> Result<()> {
        self.store(snapshot, |s| &mut s.undo)
    }

    fn persist_redo(&self, snapshot: &Snapshot) -> Result<()> {
        self.store(snapshot, |s| &mut s.redo)
    }

    fn load_on_startup(&self) -> Result<RecoveredState> {
        Ok(self.persisted())
    }
}
