//! Session caches.
//!
//! [`FileCache`] memoizes values derived from a file (dictionaries, headers)
//! keyed by path and modification time. [`ResultCache`] stores materialized
//! sub-query results under their signature and lets at most one thread
//! produce a given signature at a time.

use crate::gor::{GorError, Result};
use log::{debug, info};
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::SystemTime;
use tempfile::{NamedTempFile, TempDir};

use crate::streaming::buffers::PART_OUTPUT_BUFFER;

/// Modification time of a path, `None` when it does not exist.
pub fn modified(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// Values loaded from files, invalidated when the file's mtime changes.
pub struct FileCache<T> {
    entries: RwLock<FxHashMap<PathBuf, (Option<SystemTime>, Arc<T>)>>,
}

impl<T> Default for FileCache<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> FileCache<T> {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(FxHashMap::default()),
        }
    }

    /// Cached value for `path`, loading it when absent or stale.
    pub fn get_or_load<F>(&self, path: &Path, load: F) -> Result<Arc<T>>
    where
        F: FnOnce(&Path) -> Result<T>,
    {
        let mtime = modified(path);
        if let Some((cached_mtime, value)) = self.entries.read().get(path) {
            if *cached_mtime == mtime {
                return Ok(value.clone());
            }
        }
        let value = Arc::new(load(path)?);
        self.entries
            .write()
            .insert(path.to_path_buf(), (mtime, value.clone()));
        Ok(value)
    }

    pub fn invalidate(&self, path: &Path) {
        self.entries.write().remove(path);
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

type Slot = Arc<Mutex<Option<PathBuf>>>;

/// Materialized results keyed by signature.
pub struct ResultCache {
    dir: PathBuf,
    _private_dir: Option<TempDir>,
    slots: Mutex<FxHashMap<String, Slot>>,
    materializations: AtomicUsize,
}

impl ResultCache {
    /// Cache in `dir`, which must exist; without a directory a private
    /// temporary one is created and removed with the cache.
    pub fn new(dir: Option<&Path>) -> Result<Self> {
        let (dir, private) = match dir {
            Some(d) => {
                if !d.is_dir() {
                    return Err(GorError::system(format!(
                        "Cache directory {} does not exist",
                        d.display()
                    )));
                }
                (d.to_path_buf(), None)
            }
            None => {
                let temp = TempDir::new().map_err(|e| {
                    GorError::system(format!("Cannot create cache directory: {}", e))
                })?;
                (temp.path().to_path_buf(), Some(temp))
            }
        };
        Ok(Self {
            dir,
            _private_dir: private,
            slots: Mutex::new(FxHashMap::default()),
            materializations: AtomicUsize::new(0),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, signature: &str, nor: bool) -> PathBuf {
        let ext = if nor { "nor" } else { "gor" };
        self.dir.join(format!("{}.{}", signature, ext))
    }

    /// Number of results produced (not reused) by this cache.
    pub fn materializations(&self) -> usize {
        self.materializations.load(Ordering::Relaxed)
    }

    /// Path of the result for `signature`, running `produce` only if no
    /// result exists yet.
    ///
    /// Concurrent callers with the same signature block until the first one
    /// has published its result and then reuse it. The result is written to
    /// a temporary file and moved into place, so readers never see a
    /// partial file.
    pub fn get_or_materialize<F>(&self, signature: &str, nor: bool, produce: F) -> Result<PathBuf>
    where
        F: FnOnce(&mut dyn Write) -> Result<()>,
    {
        let slot = self
            .slots
            .lock()
            .entry(signature.to_string())
            .or_default()
            .clone();
        let mut published = slot.lock();
        if let Some(path) = published.as_ref() {
            if path.exists() {
                debug!("Cache hit for {}", signature);
                self.release(signature, &slot);
                return Ok(path.clone());
            }
        }
        let target = self.path_for(signature, nor);
        if target.exists() {
            debug!("Reusing cached result {}", target.display());
            *published = Some(target.clone());
            self.release(signature, &slot);
            return Ok(target);
        }

        let mut tmp = NamedTempFile::new_in(&self.dir).map_err(|e| {
            GorError::system(format!(
                "Cannot create temporary file in {}: {}",
                self.dir.display(),
                e
            ))
        })?;
        {
            let mut writer = BufWriter::with_capacity(PART_OUTPUT_BUFFER, tmp.as_file_mut());
            produce(&mut writer)?;
            writer.flush()?;
        }
        tmp.persist(&target).map_err(|e| {
            GorError::system(format!(
                "Could not store result {}: {}",
                target.display(),
                e.error
            ))
        })?;
        self.materializations.fetch_add(1, Ordering::Relaxed);
        info!("Materialized {}", target.display());
        *published = Some(target.clone());
        self.release(signature, &slot);
        Ok(target)
    }

    /// Forget the slot of a published signature. Callers already waiting on
    /// it still see the result; later callers find the file on disk.
    fn release(&self, signature: &str, slot: &Slot) {
        let mut slots = self.slots.lock();
        if slots.get(signature).is_some_and(|s| Arc::ptr_eq(s, slot)) {
            slots.remove(signature);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_file_cache_reloads_on_change() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("x.txt");
        fs::write(&path, "one").unwrap();
        let cache: FileCache<String> = FileCache::new();
        let loads = AtomicUsize::new(0);
        let load = |p: &Path| {
            loads.fetch_add(1, Ordering::SeqCst);
            Ok(fs::read_to_string(p)?)
        };
        assert_eq!(*cache.get_or_load(&path, load).unwrap(), "one");
        assert_eq!(*cache.get_or_load(&path, load).unwrap(), "one");
        assert_eq!(loads.load(Ordering::SeqCst), 1);

        thread::sleep(Duration::from_millis(20));
        fs::write(&path, "two").unwrap();
        let f = fs::File::options().write(true).open(&path).unwrap();
        f.set_modified(SystemTime::now() + Duration::from_secs(5)).unwrap();
        assert_eq!(*cache.get_or_load(&path, load).unwrap(), "two");
        assert_eq!(loads.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_missing_cache_dir_is_system_error() {
        let err = ResultCache::new(Some(Path::new("/nonexistent/cache")))
            .err()
            .unwrap();
        assert_eq!(err.category(), crate::gor::ErrorCategory::System);
    }

    #[test]
    fn test_materialize_once() {
        let cache = ResultCache::new(None).unwrap();
        let p1 = cache
            .get_or_materialize("abc", false, |w| Ok(w.write_all(b"Chrom\tPos\n")?))
            .unwrap();
        let p2 = cache
            .get_or_materialize("abc", false, |_| panic!("must not run twice"))
            .unwrap();
        assert_eq!(p1, p2);
        assert_eq!(cache.materializations(), 1);
        assert_eq!(fs::read_to_string(p1).unwrap(), "Chrom\tPos\n");
    }

    #[test]
    fn test_published_slots_are_released() {
        let cache = ResultCache::new(None).unwrap();
        for sig in ["s1", "s2", "s3"] {
            cache
                .get_or_materialize(sig, false, |w| Ok(w.write_all(b"Chrom\tPos\n")?))
                .unwrap();
        }
        cache
            .get_or_materialize("s1", false, |_| panic!("must not run twice"))
            .unwrap();
        assert!(cache.slots.lock().is_empty());
        assert_eq!(cache.materializations(), 3);
    }

    #[test]
    fn test_concurrent_materialize_runs_once() {
        let cache = Arc::new(ResultCache::new(None).unwrap());
        let runs = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                let runs = runs.clone();
                thread::spawn(move || {
                    cache
                        .get_or_materialize("sig", false, |w| {
                            runs.fetch_add(1, Ordering::SeqCst);
                            thread::sleep(Duration::from_millis(20));
                            Ok(w.write_all(b"Chrom\tPos\n")?)
                        })
                        .unwrap()
                })
            })
            .collect();
        let paths: Vec<PathBuf> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(paths.windows(2).all(|w| w[0] == w[1]));
        assert!(cache.slots.lock().is_empty());
    }

    #[test]
    fn test_failed_materialization_leaves_no_result() {
        let cache = ResultCache::new(None).unwrap();
        let err = cache.get_or_materialize("bad", false, |_| Err(GorError::data("boom")));
        assert!(err.is_err());
        assert!(!cache.path_for("bad", false).exists());
        let ok = cache.get_or_materialize("bad", false, |w| Ok(w.write_all(b"A\tB\n")?));
        assert!(ok.is_ok());
    }
}
