#![forbid(unsafe_code)]

use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::{info, warn};

use crate::config;
use crate::core::discovery::{self, DiscoveredRepo};
use crate::core::naming::parse_github_url;
use crate::core::resolve::Candidate;
use crate::error::WtError;

pub const CACHE_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RemoteType {
    Github,
    Local,
    Other,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RepoRecord {
    pub name: String,
    pub path: PathBuf,
    /// `owner/name` for GitHub origins.
    #[serde(default)]
    pub remote: Option<String>,
    pub remote_type: RemoteType,
    #[serde(default)]
    pub last_accessed: Option<String>,
}

impl RepoRecord {
    #[must_use]
    pub fn from_discovered(found: &DiscoveredRepo) -> Self {
        let name = found
            .path
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let (remote, remote_type) = match found.origin_url.as_deref() {
            None => (None, RemoteType::Local),
            Some(url) => match parse_github_url(url) {
                Some((owner, repo)) => (Some(format!("{owner}/{repo}")), RemoteType::Github),
                None => (None, RemoteType::Other),
            },
        };
        Self {
            name,
            path: found.path.clone(),
            remote,
            remote_type,
            last_accessed: None,
        }
    }

    #[must_use]
    pub fn from_path(path: &Path) -> Self {
        Self::from_discovered(&DiscoveredRepo {
            path: path.to_path_buf(),
            origin_url: discovery::read_origin_url(path),
        })
    }
}

impl Candidate for RepoRecord {
    fn keys(&self) -> Vec<String> {
        let mut keys = vec![self.name.clone()];
        if let Some(r) = &self.remote {
            keys.push(r.clone());
        }
        keys
    }

    fn label(&self) -> String {
        let origin = self.remote.clone().unwrap_or_else(|| match self.remote_type {
            RemoteType::Local => "local".to_owned(),
            _ => "other remote".to_owned(),
        });
        format!(
            "{}  ({origin})  {}",
            self.name,
            config::tilde_path(&self.path.to_string_lossy())
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheFile {
    pub version: u32,
    pub scanned_at: String,
    pub repos: Vec<RepoRecord>,
}

/// Persistence for the repository list. A missing, corrupt or foreign-version
/// file loads as `None`.
pub trait CacheStore {
    fn load(&self) -> Option<CacheFile>;
    fn save(&self, cache: &CacheFile) -> Result<(), WtError>;
    fn invalidate(&self) -> Result<(), WtError>;
}

#[derive(Debug, Clone)]
pub struct FileCacheStore {
    path: PathBuf,
}

impl FileCacheStore {
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CacheStore for FileCacheStore {
    fn load(&self) -> Option<CacheFile> {
        let data = std::fs::read(&self.path).ok()?;
        match serde_json::from_slice::<CacheFile>(&data) {
            Ok(cache) if cache.version == CACHE_VERSION => Some(cache),
            Ok(cache) => {
                warn!(path = %self.path.display(), version = cache.version, "ignoring repo cache with unknown version");
                None
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "ignoring corrupt repo cache");
                None
            }
        }
    }

    /// Written to a uniquely named sibling temp file and renamed into place,
    /// so concurrent writers never share a partial file.
    fn save(&self, cache: &CacheFile) -> Result<(), WtError> {
        let parent = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(parent).map_err(|e| WtError::io(parent, e))?;
        let data = serde_json::to_vec_pretty(cache)
            .map_err(|e| WtError::Other(format!("failed to encode repo cache: {e}")))?;
        let mut tmp = tempfile::Builder::new()
            .prefix(".repos.")
            .suffix(".tmp")
            .tempfile_in(parent)
            .map_err(|e| WtError::io(parent, e))?;
        tmp.write_all(&data)
            .and_then(|()| tmp.as_file().sync_all())
            .map_err(|e| WtError::io(tmp.path(), e))?;
        tmp.persist(&self.path)
            .map_err(|e| WtError::io(&self.path, e.error))?;
        Ok(())
    }

    fn invalidate(&self) -> Result<(), WtError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(WtError::io(&self.path, e)),
        }
    }
}

fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_owned())
}

fn is_fresh(scanned_at: &str, ttl: Duration, now: OffsetDateTime) -> bool {
    let Ok(at) = OffsetDateTime::parse(scanned_at, &Rfc3339) else {
        return false;
    };
    let age = now - at;
    !age.is_negative() && age < ttl
}

fn sort_repos(repos: &mut [RepoRecord]) {
    repos.sort_by(|a, b| {
        a.name
            .to_lowercase()
            .cmp(&b.name.to_lowercase())
            .then_with(|| a.path.cmp(&b.path))
    });
}

pub struct RepoManager<S: CacheStore> {
    store: S,
    scan_dirs: Vec<PathBuf>,
    scan_depth: usize,
    ttl: Duration,
}

impl<S: CacheStore> RepoManager<S> {
    #[must_use]
    pub fn new(store: S, scan_dirs: Vec<PathBuf>, scan_depth: usize, ttl: Duration) -> Self {
        Self {
            store,
            scan_dirs,
            scan_depth,
            ttl,
        }
    }

    #[must_use]
    pub fn scan_dirs(&self) -> &[PathBuf] {
        &self.scan_dirs
    }

    /// The repository list and whether it came from the cache.
    pub fn repos(&self, refresh: bool) -> Result<(Vec<RepoRecord>, bool), WtError> {
        if !refresh
            && let Some(cache) = self.store.load()
            && is_fresh(&cache.scanned_at, self.ttl, OffsetDateTime::now_utc())
        {
            return Ok((cache.repos, true));
        }
        Ok((self.refresh()?, false))
    }

    /// Drops the cache, rescans and writes it again. Access times survive.
    pub fn refresh(&self) -> Result<Vec<RepoRecord>, WtError> {
        let previous = self.store.load();
        self.store.invalidate()?;
        let repos = self.scan(previous.as_ref().map_or(&[][..], |c| c.repos.as_slice()));
        self.persist(&repos);
        Ok(repos)
    }

    fn scan(&self, previous: &[RepoRecord]) -> Vec<RepoRecord> {
        let mut repos: Vec<RepoRecord> = discovery::discover_repos(&self.scan_dirs, self.scan_depth)
            .iter()
            .map(RepoRecord::from_discovered)
            .collect();
        for repo in &mut repos {
            repo.last_accessed = previous
                .iter()
                .find(|p| p.path == repo.path)
                .and_then(|p| p.last_accessed.clone());
        }
        sort_repos(&mut repos);
        info!(count = repos.len(), "scanned repositories");
        repos
    }

    fn persist(&self, repos: &[RepoRecord]) {
        let cache = CacheFile {
            version: CACHE_VERSION,
            scanned_at: now_rfc3339(),
            repos: repos.to_vec(),
        };
        if let Err(e) = self.store.save(&cache) {
            warn!(error = %e, "failed to write repo cache");
        }
    }

    /// Applies `f` to the cached list. A cache miss is filled by a scan first
    /// so the rewritten cache never hides unscanned repositories.
    fn update(&self, f: impl FnOnce(&mut Vec<RepoRecord>)) -> Result<(), WtError> {
        let mut cache = match self.store.load() {
            Some(cache) => cache,
            None => CacheFile {
                version: CACHE_VERSION,
                scanned_at: now_rfc3339(),
                repos: self.scan(&[]),
            },
        };
        f(&mut cache.repos);
        sort_repos(&mut cache.repos);
        self.store.save(&cache)
    }

    /// Records a repository that was just created, cloned or renamed.
    pub fn add(&self, path: &Path) -> Result<RepoRecord, WtError> {
        let record = RepoRecord::from_path(path);
        let added = record.clone();
        self.update(move |repos| {
            repos.retain(|r| r.path != added.path);
            repos.push(added);
        })?;
        Ok(record)
    }

    pub fn remove(&self, path: &Path) -> Result<(), WtError> {
        self.update(|repos| repos.retain(|r| r.path != path))
    }

    pub fn touch(&self, path: &Path) -> Result<(), WtError> {
        let now = now_rfc3339();
        self.update(|repos| {
            if let Some(r) = repos.iter_mut().find(|r| r.path == path) {
                r.last_accessed = Some(now);
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mkrepo(path: &Path) {
        std::fs::create_dir_all(path.join(".git")).unwrap();
    }

    fn record(name: &str) -> RepoRecord {
        RepoRecord {
            name: name.to_owned(),
            path: PathBuf::from(format!("/src/{name}")),
            remote: None,
            remote_type: RemoteType::Local,
            last_accessed: None,
        }
    }

    #[test]
    fn cache_round_trip_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCacheStore::new(dir.path().join("cache").join("repos.json"));
        let cache = CacheFile {
            version: CACHE_VERSION,
            scanned_at: now_rfc3339(),
            repos: vec![record("a"), record("b")],
        };
        store.save(&cache).unwrap();
        let loaded = store.load().unwrap();
        assert_eq!(loaded.repos, cache.repos);
        let names: Vec<_> = std::fs::read_dir(dir.path().join("cache"))
            .unwrap()
            .flatten()
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["repos.json"]);

        store.invalidate().unwrap();
        assert!(store.load().is_none());
        store.invalidate().unwrap();
    }

    #[test]
    fn corrupt_or_foreign_cache_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("repos.json");
        let store = FileCacheStore::new(path.clone());
        std::fs::write(&path, "{not json").unwrap();
        assert!(store.load().is_none());
        std::fs::write(&path, r#"{"version":9,"scanned_at":"x","repos":[]}"#).unwrap();
        assert!(store.load().is_none());
    }

    #[test]
    fn stale_cache_is_rescanned() {
        let dir = tempfile::tempdir().unwrap();
        let scan = dir.path().join("code");
        mkrepo(&scan.join("Zeta"));
        mkrepo(&scan.join("alpha"));

        let store = FileCacheStore::new(dir.path().join("repos.json"));
        store
            .save(&CacheFile {
                version: CACHE_VERSION,
                scanned_at: "2000-01-01T00:00:00Z".to_owned(),
                repos: vec![record("ghost")],
            })
            .unwrap();

        let mgr = RepoManager::new(store, vec![scan.clone()], 3, Duration::from_secs(3600));
        let (repos, from_cache) = mgr.repos(false).unwrap();
        assert!(!from_cache);
        let names: Vec<_> = repos.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "Zeta"]);

        let (again, from_cache) = mgr.repos(false).unwrap();
        assert!(from_cache);
        assert_eq!(again, repos);

        let (_, from_cache) = mgr.repos(true).unwrap();
        assert!(!from_cache);
    }

    #[test]
    fn add_touch_and_remove_update_the_cache() {
        let dir = tempfile::tempdir().unwrap();
        let repo = dir.path().join("fresh");
        mkrepo(&repo);
        let store = FileCacheStore::new(dir.path().join("repos.json"));
        let mgr = RepoManager::new(store.clone(), vec![], 3, Duration::from_secs(3600));

        let rec = mgr.add(&repo).unwrap();
        assert_eq!(rec.name, "fresh");
        assert_eq!(rec.remote_type, RemoteType::Local);
        mgr.touch(&repo).unwrap();
        let cache = store.load().unwrap();
        assert_eq!(cache.repos.len(), 1);
        assert!(cache.repos[0].last_accessed.is_some());

        mgr.remove(&repo).unwrap();
        assert!(store.load().unwrap().repos.is_empty());
    }

    #[test]
    fn add_on_empty_cache_keeps_scanned_repos() {
        let dir = tempfile::tempdir().unwrap();
        let scan = dir.path().join("code");
        for name in ["alpha", "beta", "gamma", "fresh"] {
            mkrepo(&scan.join(name));
        }
        let store = FileCacheStore::new(dir.path().join("repos.json"));
        let mgr = RepoManager::new(store, vec![scan.clone()], 3, Duration::from_secs(3600));

        mgr.add(&scan.join("fresh")).unwrap();
        let (repos, from_cache) = mgr.repos(false).unwrap();
        assert!(from_cache);
        let names: Vec<_> = repos.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "beta", "fresh", "gamma"]);
    }

    #[test]
    fn concurrent_saves_all_succeed() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCacheStore::new(dir.path().join("repos.json"));
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        store
                            .save(&CacheFile {
                                version: CACHE_VERSION,
                                scanned_at: now_rfc3339(),
                                repos: vec![record(&format!("r{i}"))],
                            })
                            .unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(store.load().unwrap().repos.len(), 1);
        let leftovers = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(leftovers, 1);
    }

    #[test]
    fn github_origin_sets_remote() {
        let rec = RepoRecord::from_discovered(&DiscoveredRepo {
            path: PathBuf::from("/src/cli"),
            origin_url: Some("git@github.com:octo/cli.git".to_owned()),
        });
        assert_eq!(rec.remote.as_deref(), Some("octo/cli"));
        assert_eq!(rec.remote_type, RemoteType::Github);

        let rec = RepoRecord::from_discovered(&DiscoveredRepo {
            path: PathBuf::from("/src/lab"),
            origin_url: Some("https://gitlab.com/o/lab.git".to_owned()),
        });
        assert_eq!(rec.remote_type, RemoteType::Other);
    }

    #[test]
    fn freshness_window() {
        let now = OffsetDateTime::parse("2024-05-01T12:00:00Z", &Rfc3339).unwrap();
        let ttl = Duration::from_secs(3600);
        assert!(is_fresh("2024-05-01T11:30:00Z", ttl, now));
        assert!(!is_fresh("2024-05-01T10:59:59Z", ttl, now));
        assert!(!is_fresh("garbage", ttl, now));
    }
}
