//! Object and ref storage.
//!
//! Operations are stored as immutable content-addressed objects; a board is
//! made visible by its ref, the set of current leaf ids. Writing objects is
//! idempotent and invisible until a ref points at them, and refs are only
//! advanced with compare-and-swap ([`ObjectStore::update_ref`]), so readers
//! never observe half of a commit.
//!
//! Two implementations are provided:
//!
//! - [`MemoryStore`]: in-process, for tests and simulations;
//! - [`FsStore`]: a directory under the repository root.
//!
//! ```text
//! .trellis/
//!   config.toml
//!   refs.lock
//!   objects/<hex>
//!   refs/boards/<hex>          one leaf id per line, sorted
//!   identities/<hex>.json
//! ```

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::error::ErrorCode;
use crate::id::{Id, IdError};
use crate::identity::{Identity, IdentityError, IdentityResolver};
use crate::lock::{LockError, RefLock};
use crate::operation::{Operation, OperationError};

/// Name of the store directory under a repository root.
pub const STORE_DIR: &str = ".trellis";

/// Default time to wait for the ref lock.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_millis(5000);

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors from object and ref storage.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The repository has no store directory.
    #[error("no trellis store at {0}")]
    NotInitialized(PathBuf),

    /// No object with this id is stored.
    #[error("object {0} not found")]
    ObjectNotFound(Id),

    /// A stored object could not be decoded or failed its hash check.
    #[error("object {id} is corrupt: {source}")]
    Corrupt {
        /// Address the object was read from.
        id: Id,
        /// What was wrong with it.
        #[source]
        source: OperationError,
    },

    /// A ref file contains something other than leaf ids.
    #[error("ref for {entity} is malformed: {source}")]
    MalformedRef {
        /// The board whose ref was read.
        entity: Id,
        /// The offending line.
        #[source]
        source: IdError,
    },

    /// The filesystem failed.
    #[error("{}: {source}", .path.display())]
    Io {
        /// File or directory involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// The ref lock could not be taken.
    #[error(transparent)]
    Lock(#[from] LockError),

    /// An identity record could not be stored.
    #[error(transparent)]
    Identity(#[from] IdentityError),
}

impl StoreError {
    /// Machine-readable code for this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::NotInitialized(_) => ErrorCode::NotInitialized,
            Self::ObjectNotFound(_) => ErrorCode::ObjectNotFound,
            Self::Corrupt { source, .. } => source.code(),
            Self::MalformedRef { source, .. } => source.code(),
            Self::Io { .. } => ErrorCode::StorageIo,
            Self::Lock(e) => e.code(),
            Self::Identity(e) => e.code(),
        }
    }

    fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

// ---------------------------------------------------------------------------
// Contract
// ---------------------------------------------------------------------------

/// Outcome of a compare-and-swap ref update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefUpdate {
    /// The ref now holds the new leaves.
    Updated,
    /// The ref did not hold the expected leaves; nothing was written.
    Conflict {
        /// What the ref holds instead.
        current: BTreeSet<Id>,
    },
}

/// Content-addressed object storage plus per-board refs.
///
/// Implementations use interior mutability so one store can be shared by
/// several boards.
pub trait ObjectStore {
    /// Read the bytes stored under `id`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ObjectNotFound`] if nothing is stored there.
    fn read_object(&self, id: &Id) -> Result<Vec<u8>, StoreError>;

    /// Store `bytes` under their hash. Storing the same bytes twice is a
    /// no-op.
    ///
    /// # Errors
    ///
    /// Returns a backend error if the write fails.
    fn write_object(&self, bytes: &[u8]) -> Result<Id, StoreError>;

    /// The leaf set of board `entity`; empty if the board has no ref.
    ///
    /// # Errors
    ///
    /// Returns a backend error if the ref cannot be read.
    fn read_ref(&self, entity: &Id) -> Result<BTreeSet<Id>, StoreError>;

    /// Replace the leaf set of `entity` with `new` if it currently equals
    /// `old`.
    ///
    /// # Errors
    ///
    /// Returns a backend error if the ref cannot be read or written. A lost
    /// race is not an error; it is reported as [`RefUpdate::Conflict`].
    fn update_ref(
        &self,
        entity: &Id,
        old: &BTreeSet<Id>,
        new: &BTreeSet<Id>,
    ) -> Result<RefUpdate, StoreError>;

    /// Ids of every board that has a ref, sorted.
    ///
    /// # Errors
    ///
    /// Returns a backend error if the refs cannot be listed.
    fn list_refs(&self) -> Result<Vec<Id>, StoreError>;
}

/// Read and verify the operation stored under `id`.
///
/// # Errors
///
/// [`StoreError::ObjectNotFound`], or [`StoreError::Corrupt`] if the bytes do
/// not hash to `id` or do not decode.
pub fn read_operation(store: &dyn ObjectStore, id: &Id) -> Result<Operation, StoreError> {
    let bytes = store.read_object(id)?;
    Operation::decode(*id, &bytes).map_err(|source| StoreError::Corrupt { id: *id, source })
}

/// Collect every operation reachable from `leaves` through parent links,
/// stopping at ids for which `known` returns true.
///
/// # Errors
///
/// Fails on the first object that is missing or corrupt.
pub fn read_history(
    store: &dyn ObjectStore,
    leaves: &BTreeSet<Id>,
    known: impl Fn(&Id) -> bool,
) -> Result<Vec<Operation>, StoreError> {
    let mut seen: HashSet<Id> = HashSet::new();
    let mut queue: VecDeque<Id> = leaves.iter().copied().collect();
    let mut ops = Vec::new();

    while let Some(id) = queue.pop_front() {
        if known(&id) || !seen.insert(id) {
            continue;
        }
        let op = read_operation(store, &id)?;
        queue.extend(op.parents().iter().copied());
        ops.push(op);
    }
    Ok(ops)
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct MemoryInner {
    objects: HashMap<Id, Vec<u8>>,
    refs: BTreeMap<Id, BTreeSet<Id>>,
}

/// An in-process store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored objects.
    #[must_use]
    pub fn object_count(&self) -> usize {
        self.inner().objects.len()
    }

    fn inner(&self) -> MutexGuard<'_, MemoryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ObjectStore for MemoryStore {
    fn read_object(&self, id: &Id) -> Result<Vec<u8>, StoreError> {
        self.inner()
            .objects
            .get(id)
            .cloned()
            .ok_or(StoreError::ObjectNotFound(*id))
    }

    fn write_object(&self, bytes: &[u8]) -> Result<Id, StoreError> {
        let id = Id::of(bytes);
        self.inner()
            .objects
            .entry(id)
            .or_insert_with(|| bytes.to_vec());
        Ok(id)
    }

    fn read_ref(&self, entity: &Id) -> Result<BTreeSet<Id>, StoreError> {
        Ok(self.inner().refs.get(entity).cloned().unwrap_or_default())
    }

    fn update_ref(
        &self,
        entity: &Id,
        old: &BTreeSet<Id>,
        new: &BTreeSet<Id>,
    ) -> Result<RefUpdate, StoreError> {
        let mut inner = self.inner();
        let current = inner.refs.get(entity).cloned().unwrap_or_default();
        if current != *old {
            return Ok(RefUpdate::Conflict { current });
        }
        inner.refs.insert(*entity, new.clone());
        Ok(RefUpdate::Updated)
    }

    fn list_refs(&self) -> Result<Vec<Id>, StoreError> {
        Ok(self.inner().refs.keys().copied().collect())
    }
}

// ---------------------------------------------------------------------------
// FsStore
// ---------------------------------------------------------------------------

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// A store kept in `.trellis/` under a repository root.
#[derive(Debug, Clone)]
pub struct FsStore {
    dir: PathBuf,
    lock_timeout: Duration,
}

impl FsStore {
    /// Create the store layout under `repo_root` (idempotent) and open it.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] if a directory cannot be created.
    pub fn init(repo_root: &Path) -> Result<Self, StoreError> {
        let dir = repo_root.join(STORE_DIR);
        for sub in ["objects", "refs/boards", "identities"] {
            let path = dir.join(sub);
            fs::create_dir_all(&path).map_err(|e| StoreError::io(&path, e))?;
        }
        tracing::info!(path = %dir.display(), "initialized store");
        Ok(Self {
            dir,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        })
    }

    /// Open an existing store under `repo_root`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotInitialized`] if there is no store there.
    pub fn open(repo_root: &Path) -> Result<Self, StoreError> {
        let dir = repo_root.join(STORE_DIR);
        if !dir.join("objects").is_dir() {
            return Err(StoreError::NotInitialized(repo_root.to_path_buf()));
        }
        Ok(Self {
            dir,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        })
    }

    /// How long [`ObjectStore::update_ref`] waits for the ref lock.
    #[must_use]
    pub const fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// The `.trellis` directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Save an identity record so it can be resolved later.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be encoded or written.
    pub fn store_identity(&self, identity: &Identity) -> Result<(), StoreError> {
        let bytes = identity.encode()?;
        let path = self.identity_path(&identity.id());
        write_atomic(&path, &bytes)?;
        tracing::debug!(identity = %identity.id().human(), "stored identity");
        Ok(())
    }

    /// Ids of every stored identity, sorted.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] if the directory cannot be read.
    pub fn list_identities(&self) -> Result<Vec<Id>, StoreError> {
        let dir = self.dir.join("identities");
        let mut ids: Vec<Id> = list_dir(&dir)?
            .into_iter()
            .filter_map(|name| name.strip_suffix(".json").and_then(|hex| hex.parse().ok()))
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }

    fn object_path(&self, id: &Id) -> PathBuf {
        self.dir.join("objects").join(id.to_hex())
    }

    fn ref_path(&self, entity: &Id) -> PathBuf {
        self.dir.join("refs/boards").join(entity.to_hex())
    }

    fn identity_path(&self, id: &Id) -> PathBuf {
        self.dir.join("identities").join(format!("{}.json", id.to_hex()))
    }

    fn read_ref_file(&self, entity: &Id) -> Result<BTreeSet<Id>, StoreError> {
        let path = self.ref_path(entity);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(BTreeSet::new()),
            Err(e) => return Err(StoreError::io(&path, e)),
        };
        content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(|line| {
                line.parse::<Id>().map_err(|source| StoreError::MalformedRef {
                    entity: *entity,
                    source,
                })
            })
            .collect()
    }
}

impl ObjectStore for FsStore {
    fn read_object(&self, id: &Id) -> Result<Vec<u8>, StoreError> {
        let path = self.object_path(id);
        match fs::read(&path) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(StoreError::ObjectNotFound(*id)),
            Err(e) => Err(StoreError::io(&path, e)),
        }
    }

    fn write_object(&self, bytes: &[u8]) -> Result<Id, StoreError> {
        let id = Id::of(bytes);
        let path = self.object_path(&id);
        if !path.exists() {
            write_atomic(&path, bytes)?;
        }
        Ok(id)
    }

    fn read_ref(&self, entity: &Id) -> Result<BTreeSet<Id>, StoreError> {
        self.read_ref_file(entity)
    }

    fn update_ref(
        &self,
        entity: &Id,
        old: &BTreeSet<Id>,
        new: &BTreeSet<Id>,
    ) -> Result<RefUpdate, StoreError> {
        let lock = RefLock::acquire(&self.dir.join("refs.lock"), self.lock_timeout)?;
        let current = self.read_ref_file(entity)?;
        if current != *old {
            return Ok(RefUpdate::Conflict { current });
        }

        let mut content = String::with_capacity(new.len() * 65);
        for leaf in new {
            content.push_str(&leaf.to_hex());
            content.push('\n');
        }
        write_atomic(&self.ref_path(entity), content.as_bytes())?;
        lock.release();
        Ok(RefUpdate::Updated)
    }

    fn list_refs(&self) -> Result<Vec<Id>, StoreError> {
        let mut ids: Vec<Id> = list_dir(&self.dir.join("refs/boards"))?
            .into_iter()
            .filter_map(|name| name.parse().ok())
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }
}

impl IdentityResolver for FsStore {
    fn resolve(&self, id: &Id) -> Result<Identity, IdentityError> {
        match fs::read(self.identity_path(id)) {
            Ok(bytes) => Identity::decode(*id, &bytes),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(IdentityError::Unknown(*id)),
            Err(e) => Err(IdentityError::Io(e)),
        }
    }
}

/// Write `bytes` to a temp file next to `path`, then rename over it.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let parent = path
        .parent()
        .ok_or_else(|| StoreError::io(path, io::Error::from(io::ErrorKind::InvalidInput)))?;
    fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;

    let tmp = parent.join(format!(
        ".tmp-{}-{}",
        std::process::id(),
        TMP_COUNTER.fetch_add(1, Ordering::Relaxed)
    ));
    fs::write(&tmp, bytes).map_err(|e| StoreError::io(&tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| {
        let _ = fs::remove_file(&tmp);
        StoreError::io(path, e)
    })
}

/// File names in `dir`, skipping temp files. A missing directory is empty.
fn list_dir(dir: &Path) -> Result<Vec<String>, StoreError> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(StoreError::io(dir, e)),
    };
    let mut names = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| StoreError::io(dir, e))?;
        if let Some(name) = entry.file_name().to_str() {
            if !name.starts_with('.') {
                names.push(name.to_string());
            }
        }
    }
    Ok(names)
}
