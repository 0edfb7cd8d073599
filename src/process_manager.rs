//! Process manager (§C5): spawn, health-check, stop, and reap agent worker
//! processes.
//!
//! The spawn/log-pipe mechanics are grounded on the teacher's
//! `execute_cli_internal` (pre_exec via `platform::prepare_command`,
//! stdout/stderr piped to a log file through a background copy task); the
//! supervision policy (health-check ping cadence, graceful-then-forceful
//! shutdown escalation, orphan cleanup against the on-disk registry) is new
//! and comes directly from the component design.

use crate::config::{DEFAULT_T_GRACE, DEFAULT_T_HEALTH, DEFAULT_T_KILL};
use crate::error::{AgoError, AgoResult};
use crate::framing::{self, DecodeOutcome};
use crate::logging::debug;
use crate::platform;
use crate::protocol::{Frame, Op, Request};
use crate::registry_file::{InstanceState, RegistryFile, RegistryRecord};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::fs::OpenOptions as TokioOpenOptions;
use tokio::io::{AsyncRead, AsyncWriteExt, BufWriter};
use tokio::net::UnixStream;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;

/// The startup handshake handed to a freshly spawned worker: everything it
/// needs that doesn't fit comfortably as a CLI flag. Written to a small
/// temp file under `processes/` whose path is passed as `--handshake`; the
/// worker reads it once at startup and the process manager deletes it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerHandshake {
    pub instance_id: String,
    pub template_name: String,
    pub template_yaml: String,
    pub config_yaml: String,
}

struct ChildHandle {
    child: Child,
    pid: u32,
    socket_path: PathBuf,
    template_name: String,
    state: InstanceState,
    consecutive_health_misses: u32,
    spawned_at_unix_secs: u64,
}

/// A snapshot of one live instance, as returned by `ps`/`inspect`. The
/// in-memory children map is the live source of truth while the daemon is
/// up; the on-disk registry exists only for crash recovery (§9).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LiveInstanceSummary {
    pub instance_id: String,
    pub pid: u32,
    pub template_name: String,
    pub socket_path: PathBuf,
    pub state: InstanceState,
    pub spawned_at_unix_secs: u64,
}

pub struct ProcessManager {
    base_dir: PathBuf,
    registry: Arc<RegistryFile>,
    children: Mutex<HashMap<String, ChildHandle>>,
    worker_bin: PathBuf,
    t_health: Duration,
    t_grace: Duration,
    t_kill: Duration,
}

impl ProcessManager {
    pub fn new(base_dir: PathBuf, registry: Arc<RegistryFile>, worker_bin: PathBuf) -> Self {
        ProcessManager {
            base_dir,
            registry,
            children: Mutex::new(HashMap::new()),
            worker_bin,
            t_health: DEFAULT_T_HEALTH,
            t_grace: DEFAULT_T_GRACE,
            t_kill: DEFAULT_T_KILL,
        }
    }

    fn socket_path(&self, instance_id: &str) -> PathBuf {
        self.base_dir.join("processes").join(format!("{instance_id}.sock"))
    }

    fn log_path(&self, instance_id: &str) -> PathBuf {
        self.base_dir.join("logs").join(format!("{instance_id}.log"))
    }

    /// Read the on-disk registry at daemon startup; for each record, test
    /// whether the PID is still alive and its socket still answers `Ping`.
    /// Non-responsive entries are purged and any stale socket file removed.
    pub async fn orphan_cleanup(&self) -> AgoResult<()> {
        let records = self.registry.list()?;
        let mut dead = Vec::new();

        for record in &records {
            let alive = platform::process_alive(record.pid) && ping(&record.socket_path).await;
            if !alive {
                dead.push(record.instance_id.clone());
                let _ = std::fs::remove_file(&record.socket_path);
            }
        }

        if !dead.is_empty() {
            self.registry.transact(|map| {
                for id in &dead {
                    map.remove(id);
                }
            })?;
            tracing::info!(count = dead.len(), "orphan cleanup purged stale registry records");
        }
        Ok(())
    }

    /// Spawn a worker subprocess for `instance_id`, recording it in both
    /// the live map and the on-disk registry.
    pub async fn spawn(
        &self,
        instance_id: &str,
        template_name: &str,
        template_yaml: &str,
        config_yaml: &str,
    ) -> AgoResult<()> {
        {
            let children = self.children.lock().await;
            if children.contains_key(instance_id) {
                return Err(AgoError::AlreadyRunning(instance_id.to_string()));
            }
        }

        let socket_path = self.socket_path(instance_id);
        let _ = std::fs::remove_file(&socket_path);
        let log_path = self.log_path(instance_id);

        let handshake = WorkerHandshake {
            instance_id: instance_id.to_string(),
            template_name: template_name.to_string(),
            template_yaml: template_yaml.to_string(),
            config_yaml: config_yaml.to_string(),
        };
        let handshake_path = self.base_dir.join("processes").join(format!("{instance_id}.handshake.json"));
        if let Some(parent) = handshake_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&handshake_path, serde_json::to_vec(&handshake)?)?;

        let mut command = Command::new(&self.worker_bin);
        command
            .arg("--socket-path")
            .arg(&socket_path)
            .arg("--handshake")
            .arg(&handshake_path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        platform::prepare_command_tokio(&mut command)?;

        let mut child = command.spawn().map_err(|e| AgoError::SpawnFailed {
            instance: instance_id.to_string(),
            reason: e.to_string(),
        })?;
        let pid = child.id().ok_or_else(|| AgoError::SpawnFailed {
            instance: instance_id.to_string(),
            reason: "child exited before its pid could be read".to_string(),
        })?;

        if let Some(parent) = log_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let log_file = TokioOpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .await?;
        let writer = Arc::new(Mutex::new(BufWriter::new(log_file)));

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(copy_to_log(stdout, writer.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(copy_to_log(stderr, writer));
        }

        let spawned_at = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs();
        self.registry.upsert(RegistryRecord {
            instance_id: instance_id.to_string(),
            pid,
            socket_path: socket_path.clone(),
            template_name: template_name.to_string(),
            state: InstanceState::Starting,
            spawned_at_unix_secs: spawned_at,
        })?;

        let mut children = self.children.lock().await;
        children.insert(
            instance_id.to_string(),
            ChildHandle {
                child,
                pid,
                socket_path,
                template_name: template_name.to_string(),
                state: InstanceState::Starting,
                consecutive_health_misses: 0,
                spawned_at_unix_secs: spawned_at,
            },
        );

        tracing::info!(instance_id, pid, "spawned worker");
        Ok(())
    }

    /// One health-check pass over every live instance: probe its socket
    /// with `Ping`, mark `Crashed` and reap after two consecutive misses.
    pub async fn health_check_tick(&self) -> AgoResult<()> {
        let probes: Vec<(String, PathBuf)> = {
            let children = self.children.lock().await;
            children.iter().map(|(id, h)| (id.clone(), h.socket_path.clone())).collect()
        };

        for (instance_id, socket_path) in probes {
            let healthy = ping(&socket_path).await;
            let mut children = self.children.lock().await;
            let Some(handle) = children.get_mut(&instance_id) else { continue };

            if healthy {
                handle.consecutive_health_misses = 0;
                if handle.state == InstanceState::Starting {
                    handle.state = InstanceState::Ready;
                    let template_name = handle.template_name.clone();
                    let pid = handle.pid;
                    let path = handle.socket_path.clone();
                    drop(children);
                    self.registry.upsert(RegistryRecord {
                        instance_id: instance_id.clone(),
                        pid,
                        socket_path: path,
                        template_name,
                        state: InstanceState::Ready,
                        spawned_at_unix_secs: SystemTime::now()
                            .duration_since(UNIX_EPOCH)
                            .unwrap_or_default()
                            .as_secs(),
                    })?;
                }
                continue;
            }

            handle.consecutive_health_misses += 1;
            let misses = handle.consecutive_health_misses;
            drop(children);

            if misses >= 2 {
                tracing::warn!(instance_id, "health check missed twice, marking crashed");
                self.mark_crashed_and_reap(&instance_id).await?;
            }
        }
        Ok(())
    }

    async fn mark_crashed_and_reap(&self, instance_id: &str) -> AgoResult<()> {
        let mut children = self.children.lock().await;
        if let Some(handle) = children.get_mut(instance_id) {
            handle.state = InstanceState::Crashed;
        }
        children.remove(instance_id);
        drop(children);

        let _ = std::fs::remove_file(self.socket_path(instance_id));
        self.registry.remove(instance_id)?;
        Ok(())
    }

    /// Graceful-then-forceful shutdown: send `Shutdown`, wait T_grace, then
    /// SIGTERM, wait T_kill, then SIGKILL. Always reaps on return.
    pub async fn stop(&self, instance_id: &str) -> AgoResult<()> {
        let (pid, socket_path) = {
            let children = self.children.lock().await;
            match children.get(instance_id) {
                Some(h) => (h.pid, h.socket_path.clone()),
                None => return Err(AgoError::NotRunning(instance_id.to_string())),
            }
        };

        tracing::info!(instance_id, "stopping instance");
        let _ = send_request(&socket_path, Request::new(Op::Shutdown)).await;

        if !wait_for_exit(pid, self.t_grace).await {
            platform::send_sigterm(pid);
            if !wait_for_exit(pid, self.t_kill).await {
                platform::send_sigkill(pid);
            }
        }

        let mut children = self.children.lock().await;
        if let Some(mut handle) = children.remove(instance_id) {
            let _ = handle.child.wait().await;
        }
        drop(children);

        let _ = std::fs::remove_file(&socket_path);
        self.registry.remove(instance_id)?;
        tracing::info!(instance_id, "instance reaped");
        Ok(())
    }

    pub async fn stop_all(&self) -> AgoResult<Vec<String>> {
        let ids: Vec<String> = {
            let children = self.children.lock().await;
            children.keys().cloned().collect()
        };
        for id in &ids {
            self.stop(id).await?;
        }
        Ok(ids)
    }

    pub async fn is_running(&self, instance_id: &str) -> bool {
        self.children.lock().await.contains_key(instance_id)
    }

    pub async fn list_live(&self) -> Vec<LiveInstanceSummary> {
        let children = self.children.lock().await;
        let mut summaries: Vec<_> = children
            .iter()
            .map(|(id, h)| LiveInstanceSummary {
                instance_id: id.clone(),
                pid: h.pid,
                template_name: h.template_name.clone(),
                socket_path: h.socket_path.clone(),
                state: h.state,
                spawned_at_unix_secs: h.spawned_at_unix_secs,
            })
            .collect();
        summaries.sort_by(|a, b| a.instance_id.cmp(&b.instance_id));
        summaries
    }

    pub async fn get_live(&self, instance_id: &str) -> Option<LiveInstanceSummary> {
        let children = self.children.lock().await;
        children.get(instance_id).map(|h| LiveInstanceSummary {
            instance_id: instance_id.to_string(),
            pid: h.pid,
            template_name: h.template_name.clone(),
            socket_path: h.socket_path.clone(),
            state: h.state,
            spawned_at_unix_secs: h.spawned_at_unix_secs,
        })
    }

    pub async fn socket_path_of(&self, instance_id: &str) -> Option<PathBuf> {
        self.children.lock().await.get(instance_id).map(|h| h.socket_path.clone())
    }

    /// How often the daemon's health-check loop should call
    /// [`Self::health_check_tick`].
    pub fn health_check_interval(&self) -> Duration {
        self.t_health
    }
}

async fn wait_for_exit(pid: u32, timeout: Duration) -> bool {
    let start = tokio::time::Instant::now();
    while start.elapsed() < timeout {
        if !platform::process_alive(pid) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    !platform::process_alive(pid)
}

async fn ping(socket_path: &Path) -> bool {
    match send_request(socket_path, Request::new(Op::Ping)).await {
        Ok(Frame::Response(resp)) => resp.is_ok(),
        _ => false,
    }
}

async fn send_request(socket_path: &Path, request: Request) -> AgoResult<Frame> {
    let mut stream = tokio::time::timeout(Duration::from_secs(2), UnixStream::connect(socket_path))
        .await
        .map_err(|_| AgoError::SocketIO {
            path: socket_path.to_path_buf(),
            source: std::io::Error::new(std::io::ErrorKind::TimedOut, "connect timed out"),
        })?
        .map_err(|source| AgoError::SocketIO { path: socket_path.to_path_buf(), source })?;

    framing::write_frame(&mut stream, &Frame::Request(request)).await?;
    match framing::read_frame(&mut stream).await? {
        DecodeOutcome::Frame(frame) => Ok(frame),
        DecodeOutcome::Eof => Err(AgoError::SocketIO {
            path: socket_path.to_path_buf(),
            source: std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "connection closed"),
        }),
    }
}

async fn copy_to_log<R>(mut reader: R, writer: Arc<Mutex<BufWriter<tokio::fs::File>>>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    use tokio::io::AsyncReadExt;

    let mut buf = [0u8; 8192];
    loop {
        let read = match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                debug(format!("log copy aborted: {e}"));
                break;
            }
        };
        let mut guard = writer.lock().await;
        if guard.write_all(&buf[..read]).await.is_err() {
            break;
        }
        let _ = guard.flush().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn stop_unknown_instance_is_not_running() {
        let dir = TempDir::new().unwrap();
        let registry = Arc::new(RegistryFile::new(dir.path().join("registry.json")));
        let manager = ProcessManager::new(dir.path().to_path_buf(), registry, PathBuf::from("/bin/true"));
        let err = manager.stop("ghost-00000000").await.unwrap_err();
        assert!(matches!(err, AgoError::NotRunning(_)));
    }

    #[tokio::test]
    async fn orphan_cleanup_on_empty_registry_is_a_no_op() {
        let dir = TempDir::new().unwrap();
        let registry = Arc::new(RegistryFile::new(dir.path().join("registry.json")));
        let manager = ProcessManager::new(dir.path().to_path_buf(), registry, PathBuf::from("/bin/true"));
        manager.orphan_cleanup().await.unwrap();
    }

    #[tokio::test]
    async fn orphan_cleanup_purges_dead_pid() {
        let dir = TempDir::new().unwrap();
        let registry = Arc::new(RegistryFile::new(dir.path().join("registry.json")));
        registry
            .upsert(RegistryRecord {
                instance_id: "ghost-aaaaaaaa".to_string(),
                pid: 999_999, // practically never a real, live pid
                socket_path: dir.path().join("ghost.sock"),
                template_name: "ghost".to_string(),
                state: InstanceState::Ready,
                spawned_at_unix_secs: 0,
            })
            .unwrap();

        let manager = ProcessManager::new(dir.path().to_path_buf(), registry.clone(), PathBuf::from("/bin/true"));
        manager.orphan_cleanup().await.unwrap();
        assert!(registry.get("ghost-aaaaaaaa").unwrap().is_none());
    }
}
