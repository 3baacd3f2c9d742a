//! Directory-level stat cache.
//!
//! Exporting to a network volume turns every `stat()` into a round trip. The
//! [`DirectoryStatCache`] lists a whole directory once, keeps the entry type
//! bits that the listing reports for free, and only stats an individual file
//! when its size or mtime is actually needed. Listings expire after a TTL or
//! on explicit invalidation.
//!
//! # Design
//!
//! - One `Mutex` guards the whole cache. Scans run under the lock so two
//!   threads never list the same directory concurrently.
//! - `exists`, `is_file` and `is_dir` are answered from type bits only.
//! - `stat` is lazy and cached per entry.
//! - A directory that cannot be listed is cached as empty until the TTL runs
//!   out.
//! - Filesystem access goes through [`FsProbe`] so tests can count syscalls.

use crate::config::CacheConfig;
use crate::path::nfc;
use crate::signature::{FileSignature, S_IFDIR, S_IFLNK, S_IFMT, S_IFREG, system_time_to_secs};
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Instant, SystemTime};
use tracing::{debug, warn};

// ── Probe ─────────────────────────────────────────────────────

/// Entry type reported by a directory listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Dir,
    Symlink,
    Other,
}

impl EntryKind {
    /// Derive the kind from `st_mode` type bits.
    #[must_use]
    pub const fn from_mode(mode: u32) -> Self {
        match mode & S_IFMT {
            S_IFREG => Self::File,
            S_IFDIR => Self::Dir,
            S_IFLNK => Self::Symlink,
            _ => Self::Other,
        }
    }

    fn from_file_type(ft: std::fs::FileType) -> Self {
        if ft.is_symlink() {
            Self::Symlink
        } else if ft.is_dir() {
            Self::Dir
        } else if ft.is_file() {
            Self::File
        } else {
            Self::Other
        }
    }
}

/// One name from a directory listing.
#[derive(Debug, Clone)]
pub struct ProbeEntry {
    pub name: String,
    /// `None` when the platform could not report a type without a stat.
    pub kind: Option<EntryKind>,
}

/// Filesystem access used by the cache.
pub trait FsProbe: Send + Sync {
    /// List `dir`, reporting entry types where the platform provides them.
    ///
    /// # Errors
    ///
    /// Returns the I/O error from opening or reading the directory.
    fn read_dir(&self, dir: &Path) -> io::Result<Vec<ProbeEntry>>;

    /// Stat `path` without following a final symlink.
    ///
    /// # Errors
    ///
    /// Returns the I/O error from the stat call.
    fn stat(&self, path: &Path) -> io::Result<FileSignature>;
}

/// Probe backed by `std::fs`.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsProbe;

impl FsProbe for OsProbe {
    fn read_dir(&self, dir: &Path) -> io::Result<Vec<ProbeEntry>> {
        let mut entries = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            let kind = entry.file_type().ok().map(EntryKind::from_file_type);
            entries.push(ProbeEntry { name, kind });
        }
        Ok(entries)
    }

    fn stat(&self, path: &Path) -> io::Result<FileSignature> {
        std::fs::symlink_metadata(path).map(|m| FileSignature::from_metadata(&m))
    }
}

// ── Cache state ───────────────────────────────────────────────

#[derive(Debug, Clone)]
struct CachedEntry {
    name: String,
    kind: EntryKind,
    stat: Option<FileSignature>,
}

#[derive(Debug)]
struct DirListing {
    scanned_at: Instant,
    entries: HashMap<String, CachedEntry>,
}

/// Counters describing cache effectiveness.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub directories: usize,
    pub scans: u64,
    pub stat_calls: u64,
    pub lookups: u64,
}

#[derive(Default)]
struct Inner {
    dirs: HashMap<String, DirListing>,
    virtual_files: HashMap<String, HashMap<String, CachedEntry>>,
    stats: CacheStats,
}

/// Thread-safe per-directory cache of entry types and lazily fetched stats.
pub struct DirectoryStatCache {
    config: CacheConfig,
    probe: Arc<dyn FsProbe>,
    inner: Mutex<Inner>,
}

impl std::fmt::Debug for DirectoryStatCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectoryStatCache")
            .field("ttl", &self.config.ttl)
            .finish_non_exhaustive()
    }
}

impl Default for DirectoryStatCache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

/// Split a file path into (directory key, directory path, file name key).
fn split(path: &Path) -> (String, PathBuf, String) {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let name = path
        .file_name()
        .map(|n| nfc(&n.to_string_lossy()))
        .unwrap_or_default();
    (dir_key(&dir), dir, name)
}

fn dir_key(dir: &Path) -> String {
    nfc(&dir.to_string_lossy())
}

impl DirectoryStatCache {
    #[must_use]
    pub fn new(config: CacheConfig) -> Self {
        Self::with_probe(config, Arc::new(OsProbe))
    }

    /// Build a cache over a custom probe.
    #[must_use]
    pub fn with_probe(config: CacheConfig, probe: Arc<dyn FsProbe>) -> Self {
        Self {
            config,
            probe,
            inner: Mutex::new(Inner::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // Cached listings stay valid even if a holder panicked.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_stale(&self, listing: &DirListing) -> bool {
        listing.scanned_at.elapsed() >= self.config.ttl
    }

    /// Make sure `key` has a listing younger than the TTL.
    fn ensure_fresh(&self, inner: &mut Inner, key: &str, dir: &Path) {
        let fresh = inner.dirs.get(key).is_some_and(|l| !self.is_stale(l));
        if !fresh {
            let listing = self.scan(inner, key, dir);
            inner.dirs.insert(key.to_string(), listing);
        }
    }

    fn scan(&self, inner: &mut Inner, key: &str, dir: &Path) -> DirListing {
        inner.stats.scans += 1;
        let mut entries = HashMap::new();

        match self.probe.read_dir(dir) {
            Ok(listed) => {
                for ProbeEntry { name, kind } in listed {
                    let name = nfc(&name);
                    let (kind, stat) = match kind {
                        Some(kind) => (kind, None),
                        None => {
                            // Type not reported by the listing: full stat.
                            inner.stats.stat_calls += 1;
                            match self.probe.stat(&dir.join(&name)) {
                                Ok(sig) => (EntryKind::from_mode(sig.mode), Some(sig)),
                                Err(_) => continue,
                            }
                        }
                    };
                    entries.insert(name.clone(), CachedEntry { name, kind, stat });
                }
                debug!(dir = %dir.display(), entries = entries.len(), "Scanned directory");
            }
            Err(e) => {
                if e.kind() == io::ErrorKind::NotFound {
                    debug!(dir = %dir.display(), "Directory does not exist; caching as empty");
                } else {
                    warn!(dir = %dir.display(), error = %e, "Could not list directory; caching as empty");
                }
            }
        }

        if let Some(virtual_entries) = inner.virtual_files.get(key) {
            for (name, entry) in virtual_entries {
                entries.insert(name.clone(), entry.clone());
            }
        }

        DirListing {
            scanned_at: Instant::now(),
            entries,
        }
    }

    /// Lazily stat one entry of an already-fresh listing.
    fn stat_entry(&self, inner: &mut Inner, key: &str, dir: &Path, name: &str) -> Option<FileSignature> {
        let cached = inner.dirs.get(key)?.entries.get(name)?;
        if let Some(sig) = cached.stat {
            return Some(sig);
        }
        let full = dir.join(&cached.name);

        inner.stats.stat_calls += 1;
        let result = self.probe.stat(&full);
        let listing = inner.dirs.get_mut(key)?;
        match result {
            Ok(sig) => {
                if let Some(entry) = listing.entries.get_mut(name) {
                    entry.stat = Some(sig);
                }
                Some(sig)
            }
            Err(e) => {
                debug!(path = %full.display(), error = %e, "Listed entry vanished before stat");
                listing.entries.remove(name);
                None
            }
        }
    }

    fn lookup_kind(&self, path: &Path) -> Option<EntryKind> {
        let (key, dir, name) = split(path);
        let mut inner = self.lock();
        inner.stats.lookups += 1;
        self.ensure_fresh(&mut inner, &key, &dir);
        inner
            .dirs
            .get(&key)
            .and_then(|l| l.entries.get(&name))
            .map(|e| e.kind)
    }

    /// Signature of `path`, or `None` if the directory listing doesn't contain it.
    ///
    /// Known-absent paths cost no syscall. A listed entry is stat'ed at most
    /// once per listing lifetime.
    pub fn stat(&self, path: &Path) -> Option<FileSignature> {
        let (key, dir, name) = split(path);
        let mut inner = self.lock();
        inner.stats.lookups += 1;
        self.ensure_fresh(&mut inner, &key, &dir);
        self.stat_entry(&mut inner, &key, &dir, &name)
    }

    /// Alias of [`Self::stat`] used by signature comparisons.
    pub fn file_signature(&self, path: &Path) -> Option<FileSignature> {
        self.stat(path)
    }

    pub fn exists(&self, path: &Path) -> bool {
        self.lookup_kind(path).is_some()
    }

    pub fn is_file(&self, path: &Path) -> bool {
        self.lookup_kind(path) == Some(EntryKind::File)
    }

    pub fn is_dir(&self, path: &Path) -> bool {
        self.lookup_kind(path) == Some(EntryKind::Dir)
    }

    /// Names in `dir`, optionally filtered by a name prefix. Sorted.
    pub fn list_directory(&self, dir: &Path, prefix: Option<&str>, case_sensitive: bool) -> Vec<String> {
        let key = dir_key(dir);
        let mut inner = self.lock();
        inner.stats.lookups += 1;
        self.ensure_fresh(&mut inner, &key, dir);

        let Some(listing) = inner.dirs.get(&key) else {
            return Vec::new();
        };
        let prefix = prefix.map(|p| {
            let p = nfc(p);
            if case_sensitive { p } else { p.to_lowercase() }
        });
        let mut names: Vec<String> = listing
            .entries
            .values()
            .map(|e| e.name.clone())
            .filter(|name| match &prefix {
                None => true,
                Some(p) if case_sensitive => name.starts_with(p.as_str()),
                Some(p) => name.to_lowercase().starts_with(p.as_str()),
            })
            .collect();
        names.sort();
        names
    }

    /// Regular files in `dir` whose name starts with `prefix` (case-insensitive),
    /// optionally skipping one extension, largest first.
    ///
    /// Used to pick the best-quality variant among same-named outputs.
    pub fn find_files_by_prefix(&self, dir: &Path, prefix: &str, ignore_ext: Option<&str>) -> Vec<PathBuf> {
        let key = dir_key(dir);
        let prefix = nfc(prefix).to_lowercase();
        let ignore_ext = ignore_ext.map(|e| e.trim_start_matches('.').to_lowercase());

        let mut inner = self.lock();
        inner.stats.lookups += 1;
        self.ensure_fresh(&mut inner, &key, dir);

        let candidates: Vec<String> = inner
            .dirs
            .get(&key)
            .map(|l| {
                l.entries
                    .iter()
                    .filter(|(_, e)| e.kind == EntryKind::File)
                    .filter(|(_, e)| e.name.to_lowercase().starts_with(&prefix))
                    .filter(|(_, e)| {
                        let ext = Path::new(&e.name)
                            .extension()
                            .map(|x| x.to_string_lossy().to_lowercase());
                        ignore_ext.is_none() || ext != ignore_ext
                    })
                    .map(|(k, _)| k.clone())
                    .collect()
            })
            .unwrap_or_default();

        let mut sized: Vec<(u64, PathBuf)> = candidates
            .iter()
            .filter_map(|name| {
                let sig = self.stat_entry(&mut inner, &key, dir, name)?;
                Some((sig.size, dir.join(name)))
            })
            .collect();
        sized.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
        sized.into_iter().map(|(_, p)| p).collect()
    }

    /// Refresh one entry after the caller wrote `path`.
    ///
    /// Does nothing unless the directory is already cached. With an
    /// `mtime_hint` and an existing cached stat, only the mtime is patched and
    /// no syscall is made.
    pub fn update_file(&self, path: &Path, mtime_hint: Option<i64>) {
        let (key, dir, name) = split(path);
        let mut inner = self.lock();
        if !inner.dirs.contains_key(&key) {
            return;
        }

        if let Some(mtime) = mtime_hint {
            if let Some(sig) = inner
                .dirs
                .get_mut(&key)
                .and_then(|l| l.entries.get_mut(&name))
                .and_then(|e| e.stat.as_mut())
            {
                sig.mtime = mtime;
                return;
            }
        }

        inner.stats.stat_calls += 1;
        let result = self.probe.stat(&dir.join(&name));
        let is_virtual = inner
            .virtual_files
            .get(&key)
            .is_some_and(|v| v.contains_key(&name));
        let Some(listing) = inner.dirs.get_mut(&key) else {
            return;
        };
        match result {
            Ok(sig) => {
                listing.entries.insert(
                    name.clone(),
                    CachedEntry {
                        name,
                        kind: EntryKind::from_mode(sig.mode),
                        stat: Some(sig),
                    },
                );
            }
            Err(_) if is_virtual => {}
            Err(_) => {
                listing.entries.remove(&name);
            }
        }
    }

    /// Claim `path` as existing without touching the filesystem.
    ///
    /// Dry runs use this so later name collisions see the file that would
    /// have been written. Virtual entries survive rescans until [`Self::clear`].
    pub fn register_virtual_file(&self, path: &Path) {
        let (key, _, name) = split(path);
        let now = system_time_to_secs(SystemTime::now());
        let entry = CachedEntry {
            name: name.clone(),
            kind: EntryKind::File,
            stat: Some(FileSignature::new(S_IFREG | 0o644, 0, now)),
        };

        let mut inner = self.lock();
        if let Some(listing) = inner.dirs.get_mut(&key) {
            listing.entries.insert(name.clone(), entry.clone());
        }
        inner.virtual_files.entry(key).or_default().insert(name, entry);
    }

    /// Forget one entry after the caller deleted it.
    pub fn remove_file(&self, path: &Path) {
        let (key, _, name) = split(path);
        let mut inner = self.lock();
        if let Some(listing) = inner.dirs.get_mut(&key) {
            listing.entries.remove(&name);
        }
        if let Some(v) = inner.virtual_files.get_mut(&key) {
            v.remove(&name);
        }
    }

    /// Drop the listing of the directory containing `path`.
    pub fn invalidate(&self, path: &Path) {
        let (key, _, _) = split(path);
        self.lock().dirs.remove(&key);
    }

    pub fn invalidate_directory(&self, dir: &Path) {
        self.lock().dirs.remove(&dir_key(dir));
    }

    /// Drop every listing and virtual file.
    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.dirs.clear();
        inner.virtual_files.clear();
    }

    /// Scan several directories up front.
    pub fn prefetch_directories<P: AsRef<Path>>(&self, dirs: &[P]) {
        let mut inner = self.lock();
        for dir in dirs {
            let dir = dir.as_ref();
            self.ensure_fresh(&mut inner, &dir_key(dir), dir);
        }
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let inner = self.lock();
        CacheStats {
            directories: inner.dirs.len(),
            ..inner.stats
        }
    }
}

/// Whether two existing paths live on the same filesystem.
///
/// Returns `false` if either path cannot be stat'ed.
#[must_use]
pub fn are_same_filesystem(a: &Path, b: &Path) -> bool {
    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        match (std::fs::metadata(a), std::fs::metadata(b)) {
            (Ok(ma), Ok(mb)) => ma.dev() == mb.dev(),
            _ => false,
        }
    }
    #[cfg(not(unix))]
    {
        let root = |p: &Path| p.canonicalize().ok().and_then(|c| c.components().next().map(|c| c.as_os_str().to_owned()));
        matches!((root(a), root(b)), (Some(x), Some(y)) if x == y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Wraps the OS probe and counts calls.
    #[derive(Default)]
    struct CountingProbe {
        read_dirs: AtomicUsize,
        stats: AtomicUsize,
        hide_types: bool,
    }

    impl FsProbe for CountingProbe {
        fn read_dir(&self, dir: &Path) -> io::Result<Vec<ProbeEntry>> {
            self.read_dirs.fetch_add(1, Ordering::SeqCst);
            let mut entries = OsProbe.read_dir(dir)?;
            if self.hide_types {
                for e in &mut entries {
                    e.kind = None;
                }
            }
            Ok(entries)
        }

        fn stat(&self, path: &Path) -> io::Result<FileSignature> {
            self.stats.fetch_add(1, Ordering::SeqCst);
            OsProbe.stat(path)
        }
    }

    fn cache_with(probe: &Arc<CountingProbe>, ttl: Duration) -> DirectoryStatCache {
        DirectoryStatCache::with_probe(CacheConfig { ttl }, Arc::clone(probe) as Arc<dyn FsProbe>)
    }

    fn fixture() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("IMG_0001.JPG"), vec![0u8; 100]).unwrap();
        std::fs::write(dir.path().join("IMG_0001.heic"), vec![0u8; 300]).unwrap();
        std::fs::write(dir.path().join("IMG_0001_edited.jpg"), vec![0u8; 200]).unwrap();
        std::fs::create_dir(dir.path().join("album")).unwrap();
        dir
    }

    #[test]
    fn test_type_queries_never_stat() {
        let dir = fixture();
        let probe = Arc::new(CountingProbe::default());
        let cache = cache_with(&probe, Duration::from_secs(300));

        assert!(cache.exists(&dir.path().join("IMG_0001.JPG")));
        assert!(cache.is_file(&dir.path().join("IMG_0001.JPG")));
        assert!(!cache.is_dir(&dir.path().join("IMG_0001.JPG")));
        assert!(cache.is_dir(&dir.path().join("album")));
        assert!(!cache.exists(&dir.path().join("missing.jpg")));

        assert_eq!(probe.stats.load(Ordering::SeqCst), 0);
        assert_eq!(probe.read_dirs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_stat_is_lazy_and_cached() {
        let dir = fixture();
        let probe = Arc::new(CountingProbe::default());
        let cache = cache_with(&probe, Duration::from_secs(300));
        let path = dir.path().join("IMG_0001.JPG");

        assert!(cache.stat(&dir.path().join("nope.jpg")).is_none());
        assert_eq!(probe.stats.load(Ordering::SeqCst), 0);

        let sig = cache.stat(&path).unwrap();
        assert_eq!(sig.size, 100);
        let again = cache.stat(&path).unwrap();
        assert_eq!(sig, again);
        assert_eq!(probe.stats.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_update_with_hint_patches_mtime_without_syscall() {
        let dir = fixture();
        let probe = Arc::new(CountingProbe::default());
        let cache = cache_with(&probe, Duration::from_secs(300));
        let path = dir.path().join("IMG_0001.JPG");

        cache.stat(&path).unwrap();
        let before = probe.stats.load(Ordering::SeqCst);

        cache.update_file(&path, Some(1_600_000_000));
        let sig = cache.stat(&path).unwrap();
        assert_eq!(sig.mtime, 1_600_000_000);
        assert_eq!(probe.stats.load(Ordering::SeqCst), before);
    }

    #[test]
    fn test_update_without_hint_restats_or_removes() {
        let dir = fixture();
        let probe = Arc::new(CountingProbe::default());
        let cache = cache_with(&probe, Duration::from_secs(300));
        let new_file = dir.path().join("new.jpg");

        assert!(!cache.exists(&new_file));
        std::fs::write(&new_file, b"abc").unwrap();
        cache.update_file(&new_file, None);
        assert!(cache.is_file(&new_file));
        assert_eq!(cache.stat(&new_file).unwrap().size, 3);

        std::fs::remove_file(&new_file).unwrap();
        cache.update_file(&new_file, None);
        assert!(!cache.exists(&new_file));
    }

    #[test]
    fn test_update_ignores_uncached_directory() {
        let dir = fixture();
        let probe = Arc::new(CountingProbe::default());
        let cache = cache_with(&probe, Duration::from_secs(300));
        cache.update_file(&dir.path().join("IMG_0001.JPG"), None);
        assert_eq!(probe.stats.load(Ordering::SeqCst), 0);
        assert_eq!(cache.stats().directories, 0);
    }

    #[test]
    fn test_find_files_by_prefix_sorted_by_size() {
        let dir = fixture();
        let cache = DirectoryStatCache::default();

        let found = cache.find_files_by_prefix(dir.path(), "img_0001", None);
        let names: Vec<_> = found
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, ["IMG_0001.heic", "IMG_0001_edited.jpg", "IMG_0001.JPG"]);

        let found = cache.find_files_by_prefix(dir.path(), "IMG_0001", Some(".HEIC"));
        assert_eq!(found.len(), 2);
        assert!(found.iter().all(|p| p.extension().unwrap() != "heic"));
    }

    #[test]
    fn test_list_directory_prefix_case() {
        let dir = fixture();
        let cache = DirectoryStatCache::default();
        assert_eq!(cache.list_directory(dir.path(), None, false).len(), 4);
        assert_eq!(cache.list_directory(dir.path(), Some("img_0001."), false).len(), 2);
        assert!(cache.list_directory(dir.path(), Some("img_"), true).is_empty());
    }

    #[test]
    fn test_missing_directory_cached_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let probe = Arc::new(CountingProbe::default());
        let cache = cache_with(&probe, Duration::from_secs(300));
        let ghost = dir.path().join("ghost");

        assert!(!cache.exists(&ghost.join("a.jpg")));
        assert!(!cache.exists(&ghost.join("b.jpg")));
        assert_eq!(probe.read_dirs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_ttl_expiry_rescans() {
        let dir = fixture();
        let probe = Arc::new(CountingProbe::default());
        let cache = cache_with(&probe, Duration::ZERO);
        let path = dir.path().join("IMG_0001.JPG");

        assert!(cache.exists(&path));
        assert!(cache.exists(&path));
        assert_eq!(probe.read_dirs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_invalidate_forces_rescan() {
        let dir = fixture();
        let probe = Arc::new(CountingProbe::default());
        let cache = cache_with(&probe, Duration::from_secs(300));
        let late = dir.path().join("late.jpg");

        assert!(!cache.exists(&late));
        std::fs::write(&late, b"x").unwrap();
        assert!(!cache.exists(&late));

        cache.invalidate(&late);
        assert!(cache.exists(&late));

        cache.remove_file(&late);
        assert!(!cache.exists(&late));

        cache.invalidate_directory(dir.path());
        assert!(cache.exists(&late));
        assert_eq!(probe.read_dirs.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_untyped_listing_falls_back_to_stat() {
        let dir = fixture();
        let probe = Arc::new(CountingProbe {
            hide_types: true,
            ..CountingProbe::default()
        });
        let cache = cache_with(&probe, Duration::from_secs(300));

        assert!(cache.is_file(&dir.path().join("IMG_0001.JPG")));
        assert!(cache.is_dir(&dir.path().join("album")));
        // One stat per entry during the scan, then answers come from cache.
        assert_eq!(probe.stats.load(Ordering::SeqCst), 4);
        assert_eq!(cache.stat(&dir.path().join("IMG_0001.JPG")).unwrap().size, 100);
        assert_eq!(probe.stats.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_virtual_files_survive_rescan_until_clear() {
        let dir = fixture();
        let cache = DirectoryStatCache::default();
        let planned = dir.path().join("planned.jpg");

        cache.register_virtual_file(&planned);
        assert!(cache.is_file(&planned));

        cache.invalidate_directory(dir.path());
        assert!(cache.is_file(&planned));

        // Stat fails on disk but the virtual entry is kept.
        cache.update_file(&planned, None);
        assert!(cache.exists(&planned));

        cache.clear();
        assert!(!cache.exists(&planned));
    }

    #[test]
    fn test_prefetch_and_stats() {
        let dir = fixture();
        let cache = DirectoryStatCache::default();
        let album = dir.path().join("album");
        cache.prefetch_directories(&[dir.path(), album.as_path()]);
        let stats = cache.stats();
        assert_eq!(stats.directories, 2);
        assert_eq!(stats.scans, 2);
    }

    #[test]
    fn test_same_filesystem() {
        let dir = fixture();
        assert!(are_same_filesystem(dir.path(), &dir.path().join("album")));
        assert!(!are_same_filesystem(dir.path(), &dir.path().join("missing")));
    }
}
