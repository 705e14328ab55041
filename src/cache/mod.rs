//! Filesystem tile cache.
//!
//! Persistent entries live under a stable hierarchy derived from the tile
//! address; non-cacheable addresses go to a scratch area that a periodic
//! sweep empties. Writes publish atomically (temp file + rename) so the
//! sweep never observes a half-written entry.

use std::fmt::{Debug, Formatter};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant, SystemTime};

use bytes::Bytes;
use log::{debug, info, warn};
use uuid::Uuid;

use crate::matrix::TileAddress;
use crate::mvt::Tile;

/// Temporary entries older than this are removed by the sweep.
pub const TEMP_TTL: Duration = Duration::from_secs(600);
/// Minimum interval between opportunistic sweeps.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(600);

const TEMP_DIR: &str = "__tmp__";
const ALL_COLLECTIONS: &str = "__all__";

pub enum CacheError {
    Io(io::Error),
}

impl Debug for CacheError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                CacheError::Io(e) => format!("Io: {}", e),
            }
        )
    }
}

impl std::fmt::Display for CacheError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Debug::fmt(self, f)
    }
}

impl std::error::Error for CacheError {}

impl From<io::Error> for CacheError {
    fn from(value: io::Error) -> Self {
        CacheError::Io(value)
    }
}

/// Maps tile addresses to files under a persistent or temporary store.
pub struct TileCache {
    root: PathBuf,
    api: String,
    extension: String,
    last_sweep: Mutex<Instant>,
}

impl TileCache {
    /// Opens (and creates if missing) the cache under `root`, scoped to
    /// one API. Runs the startup sweep of the temporary store.
    pub fn new(
        root: impl Into<PathBuf>,
        api: impl Into<String>,
        extension: impl Into<String>,
    ) -> Result<Self, CacheError> {
        let cache = Self {
            root: root.into(),
            api: api.into(),
            extension: extension.into(),
            last_sweep: Mutex::new(Instant::now()),
        };

        fs::create_dir_all(cache.temp_dir())?;
        cache.sweep();

        Ok(cache)
    }

    fn temp_dir(&self) -> PathBuf {
        self.root.join(TEMP_DIR)
    }

    fn collection_scope(address: &TileAddress) -> &str {
        match address.collections.as_slice() {
            [single] => single,
            _ => ALL_COLLECTIONS,
        }
    }

    /// The filesystem location for an address. Persistent addresses map
    /// to a stable path; non-cacheable addresses get a fresh scratch path
    /// on every call.
    pub fn locate(&self, address: &TileAddress) -> PathBuf {
        if !address.cacheable {
            return self
                .temp_dir()
                .join(format!("{}.{}", Uuid::new_v4(), self.extension));
        }

        self.root
            .join(&self.api)
            .join(Self::collection_scope(address))
            .join(&address.matrix_set)
            .join(address.level.to_string())
            .join(address.row.to_string())
            .join(format!("{}.{}", address.col, self.extension))
    }

    /// Existence check only, no freshness or validity test. Temporary
    /// entries are never addressable again, so they never "exist".
    pub fn exists(&self, address: &TileAddress) -> bool {
        address.cacheable && self.locate(address).is_file()
    }

    pub fn read(&self, address: &TileAddress) -> Result<Option<Bytes>, CacheError> {
        self.maybe_sweep();

        if !address.cacheable {
            return Ok(None);
        }

        match fs::read(self.locate(address)) {
            Ok(bytes) => Ok(Some(Bytes::from(bytes))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// A read that self-heals corruption: persisted bytes that fail to
    /// parse as tile content are deleted and reported as a miss, so the
    /// caller regenerates.
    pub fn read_valid(&self, address: &TileAddress) -> Result<Option<Bytes>, CacheError> {
        let Some(bytes) = self.read(address)? else {
            return Ok(None);
        };

        if Tile::from_bytes(&bytes).is_err() {
            warn!("corrupt cache entry at {}, regenerating", address);
            let path = self.locate(address);
            if let Err(e) = fs::remove_file(&path) {
                warn!("failed to drop corrupt entry {}: {}", path.display(), e);
            }
            return Ok(None);
        }

        Ok(Some(bytes))
    }

    /// Writes the entry, creating missing directories along the way and
    /// publishing atomically. Returns the final location.
    pub fn write(&self, address: &TileAddress, bytes: &[u8]) -> Result<PathBuf, CacheError> {
        self.maybe_sweep();

        let path = self.locate(address);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let staging = path.with_extension(format!("{}.{}", self.extension, Uuid::new_v4()));
        fs::write(&staging, bytes)?;
        fs::rename(&staging, &path)?;

        debug!("cached {} ({} bytes)", address, bytes.len());
        Ok(path)
    }

    fn maybe_sweep(&self) {
        let mut last = match self.last_sweep.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if last.elapsed() < SWEEP_INTERVAL {
            return;
        }
        *last = Instant::now();
        drop(last);

        self.sweep();
    }

    /// Deletes temporary entries past their TTL. Failures abort the sweep
    /// only, never the cache.
    pub fn sweep(&self) {
        self.sweep_older_than(TEMP_TTL);
    }

    fn sweep_older_than(&self, ttl: Duration) {
        let entries = match fs::read_dir(self.temp_dir()) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("temporary store sweep failed: {}", e);
                return;
            }
        };

        let now = SystemTime::now();
        let mut removed = 0usize;

        for entry in entries.flatten() {
            if !Self::expired(entry.path().as_path(), now, ttl) {
                continue;
            }
            match fs::remove_file(entry.path()) {
                Ok(()) => removed += 1,
                Err(e) => warn!("sweep could not remove {:?}: {}", entry.path(), e),
            }
        }

        if removed > 0 {
            info!("sweep removed {} expired temporary tiles", removed);
        }
    }

    /// Provably expired by modification time; unreadable metadata keeps
    /// the file.
    fn expired(path: &Path, now: SystemTime, ttl: Duration) -> bool {
        fs::metadata(path)
            .and_then(|m| m.modified())
            .ok()
            .and_then(|modified| now.duration_since(modified).ok())
            .map(|age| age > ttl)
            .unwrap_or(false)
    }
}
