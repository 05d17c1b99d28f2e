//! Snapshot persistence
//!
//! Stores replace the whole document on save. A save only lands when the
//! stored version is exactly one behind the incoming snapshot; anything else
//! is a `VersionConflict` and the caller must reload and re-apply.

use crate::loader::{load_snapshot, seed_snapshot};
use crate::mutation::{apply, Applied, Mutation, MutationContext};
use crate::{HierarchySnapshot, Result, SurveyError};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use tracing::{debug, info, warn};

pub const DEFAULT_COMMIT_ATTEMPTS: usize = 3;

pub trait SnapshotStore: Send + Sync {
    fn load(&self) -> Result<HierarchySnapshot>;
    fn save(&self, snapshot: &HierarchySnapshot) -> Result<()>;
}

impl<T: SnapshotStore + ?Sized> SnapshotStore for Arc<T> {
    fn load(&self) -> Result<HierarchySnapshot> {
        (**self).load()
    }

    fn save(&self, snapshot: &HierarchySnapshot) -> Result<()> {
        (**self).save(snapshot)
    }
}

fn check_version(stored: u64, incoming: u64) -> Result<()> {
    if incoming.checked_sub(1) == Some(stored) {
        Ok(())
    } else {
        Err(SurveyError::VersionConflict {
            expected: incoming.saturating_sub(1),
            found: stored,
        })
    }
}

/// In-process store
#[derive(Debug, Default)]
pub struct MemoryStore {
    current: RwLock<HierarchySnapshot>,
}

impl MemoryStore {
    pub fn new(snapshot: HierarchySnapshot) -> Self {
        Self {
            current: RwLock::new(snapshot),
        }
    }

    pub fn version(&self) -> u64 {
        self.current.read().version
    }
}

impl SnapshotStore for MemoryStore {
    fn load(&self) -> Result<HierarchySnapshot> {
        Ok(self.current.read().clone())
    }

    fn save(&self, snapshot: &HierarchySnapshot) -> Result<()> {
        let mut current = self.current.write();
        check_version(current.version, snapshot.version)?;
        *current = snapshot.clone();
        debug!("MemoryStore now at v{}", current.version);
        Ok(())
    }
}

/// Writer locks shared by every store in this process, keyed by absolute path
fn writer_lock(path: &Path) -> Arc<Mutex<()>> {
    static WRITERS: OnceLock<Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>> = OnceLock::new();
    WRITERS
        .get_or_init(|| Mutex::new(HashMap::new()))
        .lock()
        .entry(path.to_path_buf())
        .or_default()
        .clone()
}

/// Single JSON document on disk
///
/// Writes go to a sibling temp file which is then renamed over the target,
/// so readers never see a half-written document. A missing file loads as
/// the seed snapshot.
///
/// Stores opened on the same path within one process share a writer lock.
/// Separate processes writing the same file are not coordinated.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    writer: Arc<Mutex<()>>,
}

impl JsonFileStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        let path = if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir()
                .map(|dir| dir.join(path))
                .unwrap_or_else(|_| path.to_path_buf())
        };
        Self {
            writer: writer_lock(&path),
            path,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "snapshot.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    fn read_current(&self) -> Result<HierarchySnapshot> {
        if self.path.exists() {
            load_snapshot(&self.path)
        } else {
            info!("No snapshot at {:?}, starting from seed", self.path);
            Ok(seed_snapshot())
        }
    }
}

impl SnapshotStore for JsonFileStore {
    fn load(&self) -> Result<HierarchySnapshot> {
        self.read_current()
    }

    fn save(&self, snapshot: &HierarchySnapshot) -> Result<()> {
        let _guard = self.writer.lock();
        let stored = self.read_current()?;
        check_version(stored.version, snapshot.version)?;

        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }
        let tmp = self.temp_path();
        fs::write(&tmp, serde_json::to_vec_pretty(snapshot)?)?;
        fs::rename(&tmp, &self.path)?;

        info!("Saved snapshot v{} to {:?}", snapshot.version, self.path);
        Ok(())
    }
}

/// Load, apply, save; retried when another writer got there first
pub struct Repository<S> {
    store: S,
    max_attempts: usize,
}

impl<S: SnapshotStore> Repository<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            max_attempts: DEFAULT_COMMIT_ATTEMPTS,
        }
    }

    pub fn with_max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn snapshot(&self) -> Result<HierarchySnapshot> {
        self.store.load()
    }

    /// Commit one mutation. Validation errors are returned immediately;
    /// only version conflicts are retried.
    pub fn commit(&self, mutation: Mutation, ctx: &MutationContext) -> Result<Applied> {
        for attempt in 1..=self.max_attempts {
            let current = self.store.load()?;
            let applied = apply(&current, mutation.clone(), ctx)?;
            match self.store.save(&applied.snapshot) {
                Ok(()) => return Ok(applied),
                Err(SurveyError::VersionConflict { expected, found }) => {
                    warn!(
                        "Commit attempt {}/{} lost a race (expected v{}, found v{})",
                        attempt, self.max_attempts, expected, found
                    );
                }
                Err(e) => return Err(e),
            }
        }
        Err(SurveyError::RetriesExhausted(self.max_attempts))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::rollup_governorate;
    use crate::fixtures::snapshot;
    use crate::mutation::SurveyPatch;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn ctx() -> MutationContext {
        MutationContext::now(None)
    }

    #[test]
    fn test_stale_save_conflicts() {
        let store = MemoryStore::new(snapshot());
        let base = store.load().unwrap();

        let first = apply(&base, Mutation::Delete { survey_id: "s1".into() }, &ctx()).unwrap();
        let second = apply(&base, Mutation::Delete { survey_id: "s2".into() }, &ctx()).unwrap();

        store.save(&first.snapshot).unwrap();
        let err = store.save(&second.snapshot).unwrap_err();
        assert!(matches!(err, SurveyError::VersionConflict { expected: 3, found: 4 }));

        // Loser's change never landed
        let now = store.load().unwrap();
        assert!(now.survey("s2").is_some());
        assert!(now.survey("s1").is_none());
    }

    #[test]
    fn test_json_file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("nested").join("snapshot.json"));

        let seed = store.load().unwrap();
        assert_eq!(seed.version, 0);
        assert!(seed.governorate("jazan-city").is_some());

        let mut next = snapshot();
        next.version = 1;
        store.save(&next).unwrap();
        assert!(store.path().exists());
        assert!(!store.temp_path().exists());

        let reloaded = store.load().unwrap();
        assert_eq!(reloaded, next);

        let err = store.save(&next).unwrap_err();
        assert!(matches!(err, SurveyError::VersionConflict { expected: 0, found: 1 }));
    }

    #[test]
    fn test_stores_on_one_path_share_a_writer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shared.json");
        let a = JsonFileStore::new(&path);
        let b = JsonFileStore::new(&path);
        assert!(Arc::ptr_eq(&a.writer, &b.writer));

        let other = JsonFileStore::new(dir.path().join("other.json"));
        assert!(!Arc::ptr_eq(&a.writer, &other.writer));

        let mut from_a = snapshot();
        from_a.version = 1;
        let mut from_b = snapshot();
        from_b.version = 1;
        from_b.regions.truncate(1);

        let results = std::thread::scope(|scope| {
            let ha = scope.spawn(|| a.save(&from_a));
            let hb = scope.spawn(|| b.save(&from_b));
            [ha.join().unwrap(), hb.join().unwrap()]
        });

        let landed = results.iter().filter(|r| r.is_ok()).count();
        let conflicts = results
            .iter()
            .filter(|r| matches!(r, Err(SurveyError::VersionConflict { expected: 0, found: 1 })))
            .count();
        assert_eq!((landed, conflicts), (1, 1));

        let stored = b.load().unwrap();
        assert_eq!(stored.version, 1);
        assert!(stored == from_a || stored == from_b);
    }

    #[test]
    fn test_repository_commits_through_store() {
        let repo = Repository::new(MemoryStore::new(snapshot()));
        let patch = SurveyPatch {
            total_samples: Some(500),
            ..SurveyPatch::default()
        };

        repo.commit(Mutation::Update { survey_id: "s4".into(), patch }, &ctx())
            .unwrap();

        assert_eq!(repo.store().version(), 4);
        assert_eq!(rollup_governorate(&repo.snapshot().unwrap(), "samtah").total_samples, 500);
    }

    #[test]
    fn test_repository_returns_validation_errors_without_retry() {
        let repo = Repository::new(MemoryStore::new(snapshot()));
        let patch = SurveyPatch {
            positive_samples: Some(10_000),
            ..SurveyPatch::default()
        };

        let err = repo
            .commit(Mutation::Update { survey_id: "s4".into(), patch }, &ctx())
            .unwrap_err();
        assert!(err.is_validation());
        assert_eq!(repo.store().version(), 3);
    }

    /// Loses the first `conflicts` saves to a phantom writer
    struct ContendedStore {
        inner: MemoryStore,
        conflicts: AtomicUsize,
        saves: AtomicUsize,
    }

    impl SnapshotStore for ContendedStore {
        fn load(&self) -> Result<HierarchySnapshot> {
            self.inner.load()
        }

        fn save(&self, snapshot: &HierarchySnapshot) -> Result<()> {
            self.saves.fetch_add(1, Ordering::SeqCst);
            let remaining = self.conflicts.load(Ordering::SeqCst);
            if remaining > 0 {
                self.conflicts.store(remaining - 1, Ordering::SeqCst);
                return Err(SurveyError::VersionConflict {
                    expected: snapshot.version - 1,
                    found: snapshot.version,
                });
            }
            self.inner.save(snapshot)
        }
    }

    fn contended(conflicts: usize) -> ContendedStore {
        ContendedStore {
            inner: MemoryStore::new(snapshot()),
            conflicts: AtomicUsize::new(conflicts),
            saves: AtomicUsize::new(0),
        }
    }

    #[test]
    fn test_repository_retries_conflicts() {
        let repo = Repository::new(contended(2));
        repo.commit(Mutation::Delete { survey_id: "s7".into() }, &ctx())
            .unwrap();

        assert_eq!(repo.store().saves.load(Ordering::SeqCst), 3);
        assert!(repo.snapshot().unwrap().survey("s7").is_none());
    }

    #[test]
    fn test_repository_gives_up() {
        let repo = Repository::new(contended(10)).with_max_attempts(4);
        let err = repo
            .commit(Mutation::Delete { survey_id: "s7".into() }, &ctx())
            .unwrap_err();

        assert!(matches!(err, SurveyError::RetriesExhausted(4)));
        assert_eq!(repo.store().saves.load(Ordering::SeqCst), 4);
        assert!(repo.snapshot().unwrap().survey("s7").is_some());
    }
}
