//! The on-disk, advisory-locked mirror of the process registry
//! (`processes/registry.json`, §6).
//!
//! This is a deliberate departure from the teacher's cross-process registry,
//! which shares a `shared_hashmap`-backed memory segment between processes.
//! The specification calls for a live source of truth owned by a single
//! daemon task, with the disk copy existing only for crash recovery (§9) —
//! a shared-memory segment is the wrong shape for that. Instead this reads
//! and rewrites one JSON file, synchronising concurrent access (a control
//! client reading `ps` while the daemon writes a state transition) with
//! `flock`, in the same "wrap the unsafe libc call in a small safe
//! function" style as `platform::unix`.

use crate::error::{AgoError, AgoResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum InstanceState {
    Starting,
    Ready,
    Stopping,
    Stopped,
    Crashed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RegistryRecord {
    pub instance_id: String,
    pub pid: u32,
    pub socket_path: PathBuf,
    pub template_name: String,
    pub state: InstanceState,
    pub spawned_at_unix_secs: u64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RegistryFileBody {
    #[serde(default)]
    instances: HashMap<String, RegistryRecord>,
}

/// A handle to the registry file. Every mutating operation opens the file,
/// takes an exclusive advisory lock, reads-modifies-writes, then releases
/// the lock on drop — the file handle itself is not held across calls.
pub struct RegistryFile {
    path: PathBuf,
}

impl RegistryFile {
    pub fn new(path: PathBuf) -> Self {
        RegistryFile { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn list(&self) -> AgoResult<Vec<RegistryRecord>> {
        let guard = self.open_locked(false)?;
        let body = guard.read_body()?;
        let mut records: Vec<_> = body.instances.into_values().collect();
        records.sort_by(|a, b| a.instance_id.cmp(&b.instance_id));
        Ok(records)
    }

    pub fn get(&self, instance_id: &str) -> AgoResult<Option<RegistryRecord>> {
        let guard = self.open_locked(false)?;
        let body = guard.read_body()?;
        Ok(body.instances.get(instance_id).cloned())
    }

    pub fn upsert(&self, record: RegistryRecord) -> AgoResult<()> {
        let mut guard = self.open_locked(true)?;
        let mut body = guard.read_body()?;
        body.instances.insert(record.instance_id.clone(), record);
        guard.write_body(&body)
    }

    pub fn remove(&self, instance_id: &str) -> AgoResult<()> {
        let mut guard = self.open_locked(true)?;
        let mut body = guard.read_body()?;
        body.instances.remove(instance_id);
        guard.write_body(&body)
    }

    /// Apply an arbitrary read-modify-write transaction under a single
    /// exclusive lock, used by orphan cleanup at daemon startup.
    pub fn transact<F>(&self, f: F) -> AgoResult<()>
    where
        F: FnOnce(&mut HashMap<String, RegistryRecord>),
    {
        let mut guard = self.open_locked(true)?;
        let mut body = guard.read_body()?;
        f(&mut body.instances);
        guard.write_body(&body)
    }

    fn open_locked(&self, writable: bool) -> AgoResult<LockedFile> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&self.path)
            .map_err(|source| AgoError::SocketIO { path: self.path.clone(), source })?;

        lock_exclusive(&file, &self.path)?;
        Ok(LockedFile { file, path: self.path.clone(), _writable: writable })
    }
}

struct LockedFile {
    file: File,
    path: PathBuf,
    _writable: bool,
}

impl LockedFile {
    fn read_body(&mut self) -> AgoResult<RegistryFileBody> {
        self.file.seek(SeekFrom::Start(0))?;
        let mut text = String::new();
        self.file.read_to_string(&mut text)?;
        if text.trim().is_empty() {
            return Ok(RegistryFileBody::default());
        }
        serde_json::from_str(&text).map_err(|e| AgoError::RegistryCorrupt {
            path: self.path.clone(),
            reason: e.to_string(),
        })
    }

    fn write_body(&mut self, body: &RegistryFileBody) -> AgoResult<()> {
        let text = serde_json::to_string_pretty(body)?;
        self.file.seek(SeekFrom::Start(0))?;
        self.file.set_len(0)?;
        self.file.write_all(text.as_bytes())?;
        self.file.flush()?;
        Ok(())
    }
}

impl Drop for LockedFile {
    fn drop(&mut self) {
        unlock(&self.file);
    }
}

#[cfg(unix)]
fn lock_exclusive(file: &File, path: &Path) -> AgoResult<()> {
    use std::os::unix::io::AsRawFd;
    let fd = file.as_raw_fd();
    let rc = unsafe { libc::flock(fd, libc::LOCK_EX) };
    if rc != 0 {
        return Err(AgoError::SocketIO { path: path.to_path_buf(), source: std::io::Error::last_os_error() });
    }
    Ok(())
}

#[cfg(not(unix))]
fn lock_exclusive(_file: &File, _path: &Path) -> AgoResult<()> {
    Ok(())
}

#[cfg(unix)]
fn unlock(file: &File) {
    use std::os::unix::io::AsRawFd;
    unsafe {
        libc::flock(file.as_raw_fd(), libc::LOCK_UN);
    }
}

#[cfg(not(unix))]
fn unlock(_file: &File) {}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample(id: &str) -> RegistryRecord {
        RegistryRecord {
            instance_id: id.to_string(),
            pid: 4242,
            socket_path: PathBuf::from(format!("/tmp/{id}.sock")),
            template_name: "researcher".to_string(),
            state: InstanceState::Ready,
            spawned_at_unix_secs: 0,
        }
    }

    #[test]
    fn upsert_then_get_round_trips() {
        let dir = TempDir::new().unwrap();
        let reg = RegistryFile::new(dir.path().join("registry.json"));
        reg.upsert(sample("researcher-aaaaaaaa")).unwrap();
        let record = reg.get("researcher-aaaaaaaa").unwrap().unwrap();
        assert_eq!(record.pid, 4242);
    }

    #[test]
    fn remove_drops_the_record() {
        let dir = TempDir::new().unwrap();
        let reg = RegistryFile::new(dir.path().join("registry.json"));
        reg.upsert(sample("researcher-aaaaaaaa")).unwrap();
        reg.remove("researcher-aaaaaaaa").unwrap();
        assert!(reg.get("researcher-aaaaaaaa").unwrap().is_none());
    }

    #[test]
    fn list_is_sorted_by_instance_id() {
        let dir = TempDir::new().unwrap();
        let reg = RegistryFile::new(dir.path().join("registry.json"));
        reg.upsert(sample("zeta-aaaaaaaa")).unwrap();
        reg.upsert(sample("alpha-bbbbbbbb")).unwrap();
        let list = reg.list().unwrap();
        assert_eq!(list[0].instance_id, "alpha-bbbbbbbb");
        assert_eq!(list[1].instance_id, "zeta-aaaaaaaa");
    }

    #[test]
    fn missing_file_reads_as_empty() {
        let dir = TempDir::new().unwrap();
        let reg = RegistryFile::new(dir.path().join("registry.json"));
        assert!(reg.list().unwrap().is_empty());
    }

    #[test]
    fn transact_applies_bulk_mutation() {
        let dir = TempDir::new().unwrap();
        let reg = RegistryFile::new(dir.path().join("registry.json"));
        reg.upsert(sample("a-aaaaaaaa")).unwrap();
        reg.upsert(sample("b-bbbbbbbb")).unwrap();
        reg.transact(|map| {
            map.retain(|id, _| id.starts_with('a'));
        })
        .unwrap();
        assert_eq!(reg.list().unwrap().len(), 1);
    }
}
