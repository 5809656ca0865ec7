//! Cross-process session registry
//!
//! One JSON file per platform (`<dir>/<platform>.json`) maps session ids to
//! [`SessionRecord`]s. Every read-modify-write runs under an exclusive lock on
//! `<dir>/<platform>.lock`, so independent processes can share the directory.
//! Files are replaced atomically (write temp file, then rename).

use chrono::{DateTime, Utc};
use devrig_core::prelude::*;
use devrig_core::Platform;
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::Duration;

type SessionMap = BTreeMap<String, SessionRecord>;

/// A session as persisted in the registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub session_id: String,
    pub platform: Platform,
    pub device_id: String,
    pub created_at: DateTime<Utc>,
    pub last_heartbeat_at: DateTime<Utc>,
    pub owner_pid: u32,
}

impl SessionRecord {
    /// Record owned by this process with its first heartbeat at now
    pub fn new(session_id: impl Into<String>, platform: Platform, device_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.into(),
            platform,
            device_id: device_id.into(),
            created_at: now,
            last_heartbeat_at: now,
            owner_pid: std::process::id(),
        }
    }

    /// Active unless the last heartbeat is older than `expiry`
    pub fn is_active_at(&self, now: DateTime<Utc>, expiry: Duration) -> bool {
        match now.signed_duration_since(self.last_heartbeat_at).to_std() {
            Ok(age) => age <= expiry,
            // Heartbeat in the future (clock skew between processes)
            Err(_) => true,
        }
    }

    pub fn references(&self, device_id: &str) -> bool {
        self.device_id.eq_ignore_ascii_case(device_id)
    }
}

#[derive(Debug, Clone)]
pub struct SessionRegistry {
    dir: PathBuf,
    expiry: Duration,
}

impl SessionRegistry {
    pub fn new(dir: impl Into<PathBuf>, expiry: Duration) -> Self {
        Self {
            dir: dir.into(),
            expiry,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn expiry(&self) -> Duration {
        self.expiry
    }

    fn data_path(&self, platform: Platform) -> PathBuf {
        self.dir.join(format!("{}.json", platform.as_str()))
    }

    fn lock_path(&self, platform: Platform) -> PathBuf {
        self.dir.join(format!("{}.lock", platform.as_str()))
    }

    /// Run `f` on the platform's sessions while holding the exclusive lock
    ///
    /// The file is rewritten only when `f` changed the map.
    fn with_locked<T>(&self, platform: Platform, f: impl FnOnce(&mut SessionMap) -> T) -> Result<T> {
        fs::create_dir_all(&self.dir).map_err(|e| {
            Error::registry(format!("Failed to create registry dir {:?}: {}", self.dir, e))
        })?;

        let lock_path = self.lock_path(platform);
        let lock = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(|e| Error::registry(format!("Failed to open {:?}: {}", lock_path, e)))?;

        // Blocks while another process holds the lock; released on drop
        lock.lock_exclusive()
            .map_err(|e| Error::registry(format!("Failed to lock {:?}: {}", lock_path, e)))?;

        let mut sessions = self.read(platform);
        let before = sessions.clone();
        let out = f(&mut sessions);
        if sessions != before {
            self.write(platform, &sessions)?;
        }

        drop(lock);
        Ok(out)
    }

    fn read(&self, platform: Platform) -> SessionMap {
        let path = self.data_path(platform);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return SessionMap::new(),
            Err(e) => {
                warn!("Failed to read session registry {:?}: {}", path, e);
                return SessionMap::new();
            }
        };

        match serde_json::from_str(&content) {
            Ok(sessions) => sessions,
            Err(e) => {
                warn!("Discarding corrupt session registry {:?}: {}", path, e);
                SessionMap::new()
            }
        }
    }

    fn write(&self, platform: Platform, sessions: &SessionMap) -> Result<()> {
        let path = self.data_path(platform);
        let tmp = path.with_extension("json.tmp");

        let content = serde_json::to_string_pretty(sessions)?;
        {
            use std::io::Write;
            let mut file = File::create(&tmp)
                .map_err(|e| Error::registry(format!("Failed to create {:?}: {}", tmp, e)))?;
            file.write_all(content.as_bytes())
                .map_err(|e| Error::registry(format!("Failed to write {:?}: {}", tmp, e)))?;
            file.sync_all()
                .map_err(|e| Error::registry(format!("Failed to sync {:?}: {}", tmp, e)))?;
        }
        fs::rename(&tmp, &path)
            .map_err(|e| Error::registry(format!("Failed to replace {:?}: {}", path, e)))?;
        Ok(())
    }

    fn prune_stale(&self, sessions: &mut SessionMap, now: DateTime<Utc>) {
        sessions.retain(|id, record| {
            let active = record.is_active_at(now, self.expiry);
            if !active {
                debug!(
                    "Pruning stale session {} on {} (last heartbeat {})",
                    id, record.device_id, record.last_heartbeat_at
                );
            }
            active
        });
    }

    /// Register `record`, reporting whether another active session already used its device
    ///
    /// The existence check runs before the record is written, inside the same
    /// lock, so a session never sees itself as pre-existing.
    pub fn register_checked(&self, record: &SessionRecord) -> Result<bool> {
        let now = Utc::now();
        let joined = self.with_locked(record.platform, |sessions| {
            self.prune_stale(sessions, now);
            let joined = sessions
                .values()
                .any(|r| r.session_id != record.session_id && r.references(&record.device_id));
            sessions.insert(record.session_id.clone(), record.clone());
            joined
        })?;

        info!(
            "Registered session {} on {} ({})",
            record.session_id,
            record.device_id,
            if joined { "joining" } else { "fresh" }
        );
        Ok(joined)
    }

    /// Refresh the session's heartbeat, re-inserting it if it was pruned
    pub fn heartbeat(&self, record: &SessionRecord) -> Result<()> {
        let now = Utc::now();
        self.with_locked(record.platform, |sessions| {
            sessions
                .entry(record.session_id.clone())
                .or_insert_with(|| record.clone())
                .last_heartbeat_at = now;
        })?;
        trace!("Heartbeat for session {}", record.session_id);
        Ok(())
    }

    /// Remove a session; `false` if it was not registered
    pub fn delete(&self, platform: Platform, session_id: &str) -> Result<bool> {
        self.with_locked(platform, |sessions| sessions.remove(session_id).is_some())
    }

    /// Sessions on `platform` whose heartbeat is within the expiry window
    pub fn active_sessions(&self, platform: Platform) -> Result<Vec<SessionRecord>> {
        let now = Utc::now();
        self.with_locked(platform, |sessions| {
            sessions
                .values()
                .filter(|r| r.is_active_at(now, self.expiry))
                .cloned()
                .collect()
        })
    }

    /// Whether any active session still references `device_id`
    pub fn references_device(&self, platform: Platform, device_id: &str) -> Result<bool> {
        Ok(self
            .active_sessions(platform)?
            .iter()
            .any(|r| r.references(device_id)))
    }
}
