//! Control server (§C6): accepts connections on the daemon socket, dispatches
//! one `Request` per connection to an internal handler, and upgrades to a
//! streaming exchange (a sequence of `Event` frames followed by a terminal
//! `Response`) for `chat`, `logs --follow`, and `queues --follow`.
//!
//! Grounded on the teacher's accept-loop shape (`UnixListener::accept` in a
//! `loop { ... tokio::spawn(handle_connection(...)) }`), generalised from a
//! single-shot IPC command to the op-dispatch table this design calls for.

use crate::config::{Config, ConfigStore};
use crate::error::{AgoError, AgoResult};
use crate::framing::{self, DecodeOutcome};
use crate::identity::{self, mint_instance_id};
use crate::process_manager::ProcessManager;
use crate::protocol::{Event, EventKind, Frame, Op, Request, Response};
use crate::registry_file::RegistryFile;
use crate::router::{MessageRole, Router};
use crate::templates::TemplateRegistry;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::Mutex;

/// Everything the control server's handlers need: the shared daemon state.
pub struct Core {
    pub base_dir: PathBuf,
    pub config: Mutex<ConfigStore>,
    pub templates: TemplateRegistry,
    pub registry_file: Arc<RegistryFile>,
    pub process_manager: Arc<ProcessManager>,
    pub router: Arc<Router>,
    pub shutdown: tokio::sync::Notify,
}

/// A previously `create`d instance's materialised template + config, kept on
/// disk so a later `run` can start from it without re-resolving.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct InstanceSnapshot {
    instance_id: String,
    template_name: String,
    template_yaml: String,
    config_yaml: String,
}

impl Core {
    fn snapshot_path(&self, instance_id: &str) -> PathBuf {
        self.base_dir.join("processes").join(format!("{instance_id}.created.json"))
    }

    async fn existing_instance_ids(&self) -> Vec<String> {
        self.process_manager.list_live().await.into_iter().map(|s| s.instance_id).collect()
    }

    /// Resolve `template_name` via C2, mint a fresh instance ID, serialise
    /// both into a snapshot written under `processes/`. Used by `create` and,
    /// when no existing snapshot is named, by `run`.
    async fn materialize(&self, template_name: &str) -> AgoResult<InstanceSnapshot> {
        let order = self.config.lock().await.current().template_resolution_order.clone();
        let template = self.templates.resolve(template_name, &order)?;

        let live = self.existing_instance_ids().await;
        let instance_id = mint_instance_id(template_name, &|candidate| live.iter().any(|id| id == candidate))?;

        let template_yaml = serde_yaml::to_string(&template)?;
        let config_yaml = serde_yaml::to_string(self.config.lock().await.current())?;

        let snapshot = InstanceSnapshot {
            instance_id,
            template_name: template_name.to_string(),
            template_yaml,
            config_yaml,
        };
        let path = self.snapshot_path(&snapshot.instance_id);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, serde_json::to_vec(&snapshot)?)?;
        Ok(snapshot)
    }

    fn load_snapshot(&self, instance_id: &str) -> AgoResult<InstanceSnapshot> {
        let path = self.snapshot_path(instance_id);
        let bytes = std::fs::read(&path).map_err(|_| AgoError::NoSuchAgent(instance_id.to_string()))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn resolve_to_live_id(&self, name: &str) -> AgoResult<String> {
        let live = self.process_manager.list_live().await;
        let map: HashMap<String, String> =
            live.into_iter().map(|s| (s.instance_id.clone(), s.template_name)).collect();
        identity::resolve_agent(name, &map)
    }
}

/// Accept connections forever, spawning a task per connection. Returns once
/// the listener itself errors (the daemon is going down).
pub async fn serve(core: Arc<Core>, listener: UnixListener) -> AgoResult<()> {
    loop {
        let (stream, _addr) = listener.accept().await?;
        let core = core.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(core, stream).await {
                tracing::warn!(error = %e, "control connection ended with an error");
            }
        });
    }
}

async fn handle_connection(core: Arc<Core>, mut stream: UnixStream) -> AgoResult<()> {
    let request = match framing::read_frame(&mut stream).await? {
        DecodeOutcome::Frame(Frame::Request(req)) => req,
        DecodeOutcome::Frame(_) => {
            let resp = Response::error("DecodeFailure", "expected a Request frame");
            framing::write_frame(&mut stream, &Frame::Response(resp)).await?;
            return Ok(());
        }
        DecodeOutcome::Eof => return Ok(()),
    };

    tracing::debug!(op = ?request.op, "control request received");

    let response = match request.op {
        Op::Chat => return stream_chat(&core, request, &mut stream).await,
        Op::Logs if request.arg("follow") == Some("true") => return stream_logs(&core, request, &mut stream).await,
        Op::Queues if request.arg("follow") == Some("true") => {
            return stream_queues(&core, request, &mut stream).await
        }
        _ => dispatch(&core, request).await,
    };

    let frame = match response {
        Ok(resp) => Frame::Response(resp),
        Err(e) => Frame::Response(Response::error(e.kind_name(), e.to_string())),
    };
    framing::write_frame(&mut stream, &frame).await
}

async fn dispatch(core: &Core, request: Request) -> AgoResult<Response> {
    match request.op {
        Op::Create => handle_create(core, request).await,
        Op::Run => handle_run(core, request).await,
        Op::Ps => handle_ps(core).await,
        Op::Inspect => handle_inspect(core, request).await,
        Op::Send => handle_send(core, request).await,
        Op::Logs => handle_logs(core, request).await,
        Op::Stop => handle_stop(core, request).await,
        Op::Queues => handle_queues(core).await,
        Op::Templates => handle_templates(core).await,
        Op::Pull => handle_pull(core, request).await,
        Op::ConfigGet => handle_config_get(core, request).await,
        Op::ConfigSet => handle_config_set(core, request).await,
        Op::ConfigShow => handle_config_show(core).await,
        Op::RegistryAdd => handle_registry_add(core, request).await,
        Op::RegistryRemove => handle_registry_remove(core, request).await,
        Op::Shutdown => handle_shutdown(core).await,
        Op::Chat | Op::Ping => unreachable!("handled before dispatch"),
    }
}

async fn handle_create(core: &Core, request: Request) -> AgoResult<Response> {
    let template_name = request.arg("template").ok_or_else(|| AgoError::ConfigInvalid {
        key: "template".to_string(),
        reason: "create requires a template name".to_string(),
    })?;
    let snapshot = core.materialize(template_name).await?;
    let mut payload = HashMap::new();
    payload.insert("instance_id".to_string(), snapshot.instance_id);
    Ok(Response::ok(payload))
}

async fn handle_run(core: &Core, request: Request) -> AgoResult<Response> {
    let snapshot = if let Some(instance_id) = request.arg("instance_id") {
        core.load_snapshot(instance_id)?
    } else {
        let template_name = request.arg("template").ok_or_else(|| AgoError::ConfigInvalid {
            key: "template".to_string(),
            reason: "run requires a template name or instance_id".to_string(),
        })?;
        core.materialize(template_name).await?
    };

    core.process_manager
        .spawn(&snapshot.instance_id, &snapshot.template_name, &snapshot.template_yaml, &snapshot.config_yaml)
        .await?;

    let socket_path = core
        .process_manager
        .socket_path_of(&snapshot.instance_id)
        .await
        .unwrap_or_else(|| core.base_dir.join("processes").join(format!("{}.sock", snapshot.instance_id)));
    core.router.register(&snapshot.instance_id, socket_path);

    let mut payload = HashMap::new();
    payload.insert("instance_id".to_string(), snapshot.instance_id);
    Ok(Response::ok(payload))
}

async fn handle_ps(core: &Core) -> AgoResult<Response> {
    let live = core.process_manager.list_live().await;
    let mut payload = HashMap::new();
    payload.insert("instances".to_string(), serde_json::to_string(&live)?);
    Ok(Response::ok(payload))
}

async fn handle_inspect(core: &Core, request: Request) -> AgoResult<Response> {
    let name = request.arg("id").ok_or_else(|| AgoError::NoSuchAgent("<missing id>".to_string()))?;
    let id = core.resolve_to_live_id(name).await?;
    let summary = core.process_manager.get_live(&id).await.ok_or_else(|| AgoError::NoSuchAgent(id.clone()))?;
    let mut payload = HashMap::new();
    payload.insert("instance".to_string(), serde_json::to_string(&summary)?);
    Ok(Response::ok(payload))
}

async fn handle_send(core: &Core, request: Request) -> AgoResult<Response> {
    let from = request.arg("from").unwrap_or("client").to_string();
    let to_name = request.arg("to").ok_or_else(|| AgoError::NoSuchAgent("<missing to>".to_string()))?;
    let payload_text = request.arg("payload").unwrap_or_default().to_string();

    let to_id = core.resolve_to_live_id(to_name).await?;
    let role = if from == "client" { MessageRole::User } else { MessageRole::Agent };
    let message_id = core.router.send(&from, &to_id, payload_text, role).await?;

    let mut payload = HashMap::new();
    payload.insert("message_id".to_string(), message_id.to_string());
    Ok(Response::ok(payload))
}

async fn handle_logs(core: &Core, request: Request) -> AgoResult<Response> {
    let name = request.arg("id").ok_or_else(|| AgoError::NoSuchAgent("<missing id>".to_string()))?;
    let id = core.resolve_to_live_id(name).await?;
    let entries = core.router.conversation_log(&id).await?;
    let mut payload = HashMap::new();
    payload.insert("entries".to_string(), serde_json::to_string(&entries)?);
    Ok(Response::ok(payload))
}

async fn handle_stop(core: &Core, request: Request) -> AgoResult<Response> {
    if request.arg("all") == Some("true") {
        let stopped = core.process_manager.stop_all().await?;
        for id in &stopped {
            core.router.unregister(id);
        }
        let mut payload = HashMap::new();
        payload.insert("stopped".to_string(), serde_json::to_string(&stopped)?);
        return Ok(Response::ok(payload));
    }

    let name = request.arg("id").ok_or_else(|| AgoError::NoSuchAgent("<missing id>".to_string()))?;
    let id = core.resolve_to_live_id(name).await.unwrap_or_else(|_| name.to_string());
    core.process_manager.stop(&id).await?;
    core.router.unregister(&id);
    Ok(Response::ok(HashMap::new()))
}

async fn handle_queues(core: &Core) -> AgoResult<Response> {
    let mut depths = HashMap::new();
    for id in core.router.live_instance_ids() {
        if let Some(depth) = core.router.queue_depth(&id) {
            depths.insert(id, depth);
        }
    }
    let mut payload = HashMap::new();
    payload.insert("depths".to_string(), serde_json::to_string(&depths)?);
    Ok(Response::ok(payload))
}

async fn handle_templates(core: &Core) -> AgoResult<Response> {
    let order = core.config.lock().await.current().template_resolution_order.clone();
    let list = core.templates.list(&order)?;
    let mut payload = HashMap::new();
    payload.insert("templates".to_string(), serde_json::to_string(&list)?);
    Ok(Response::ok(payload))
}

async fn handle_pull(core: &Core, request: Request) -> AgoResult<Response> {
    let name = request.arg("name").ok_or_else(|| AgoError::ConfigInvalid {
        key: "name".to_string(),
        reason: "pull requires a template name".to_string(),
    })?;
    let body = request.arg("body").ok_or_else(|| AgoError::ConfigInvalid {
        key: "body".to_string(),
        reason: "pull requires the resolved template body".to_string(),
    })?;
    let template = core.templates.pull(name, body)?;
    let mut payload = HashMap::new();
    payload.insert("name".to_string(), template.name);
    Ok(Response::ok(payload))
}

async fn handle_config_get(core: &Core, request: Request) -> AgoResult<Response> {
    let key = request.arg("key").ok_or_else(|| AgoError::ConfigInvalid {
        key: "key".to_string(),
        reason: "config get requires a key".to_string(),
    })?;
    let value = core.config.lock().await.get(key)?;
    let mut payload = HashMap::new();
    if let Some(v) = value {
        payload.insert("value".to_string(), v);
    }
    Ok(Response::ok(payload))
}

async fn handle_config_set(core: &Core, request: Request) -> AgoResult<Response> {
    let key = request.arg("key").ok_or_else(|| AgoError::ConfigInvalid {
        key: "key".to_string(),
        reason: "config set requires a key".to_string(),
    })?;
    let value = request.arg("value").ok_or_else(|| AgoError::ConfigInvalid {
        key: "value".to_string(),
        reason: "config set requires a value".to_string(),
    })?;
    core.config.lock().await.set_global(key, value)?;
    Ok(Response::ok(HashMap::new()))
}

async fn handle_config_show(core: &Core) -> AgoResult<Response> {
    let config: Config = core.config.lock().await.current().clone();
    let mut payload = HashMap::new();
    payload.insert("config".to_string(), serde_yaml::to_string(&config)?);
    Ok(Response::ok(payload))
}

async fn handle_registry_add(core: &Core, request: Request) -> AgoResult<Response> {
    let name = request.arg("name").ok_or_else(|| AgoError::ConfigInvalid {
        key: "name".to_string(),
        reason: "registry add requires a name".to_string(),
    })?;
    let url = request.arg("url").ok_or_else(|| AgoError::ConfigInvalid {
        key: "url".to_string(),
        reason: "registry add requires a url".to_string(),
    })?;
    core.config.lock().await.upsert_registry(name, url)?;
    Ok(Response::ok(HashMap::new()))
}

async fn handle_registry_remove(core: &Core, request: Request) -> AgoResult<Response> {
    let name = request.arg("name").ok_or_else(|| AgoError::ConfigInvalid {
        key: "name".to_string(),
        reason: "registry remove requires a name".to_string(),
    })?;
    core.config.lock().await.remove_registry(name)?;
    Ok(Response::ok(HashMap::new()))
}

async fn handle_shutdown(core: &Core) -> AgoResult<Response> {
    core.shutdown.notify_waiters();
    Ok(Response::ok(HashMap::new()))
}

/// `chat`: open a direct connection to the target worker's socket, forward
/// the client's request, then relay every frame the worker sends back —
/// `Event`s as they arrive, terminating on the worker's own `Response`.
async fn stream_chat(core: &Arc<Core>, request: Request, client: &mut UnixStream) -> AgoResult<()> {
    let name = match request.arg("to") {
        Some(n) => n.to_string(),
        None => {
            let resp = Response::error("NoSuchAgent", "chat requires a \"to\" instance id");
            return framing::write_frame(client, &Frame::Response(resp)).await;
        }
    };

    let id = match core.resolve_to_live_id(&name).await {
        Ok(id) => id,
        Err(e) => return framing::write_frame(client, &Frame::Response(Response::error(e.kind_name(), e.to_string()))).await,
    };

    let socket_path = match core.process_manager.socket_path_of(&id).await {
        Some(p) => p,
        None => {
            let resp = Response::error("NotRunning", format!("instance {id} is not running"));
            return framing::write_frame(client, &Frame::Response(resp)).await;
        }
    };

    let mut worker = match UnixStream::connect(&socket_path).await {
        Ok(s) => s,
        Err(source) => {
            let err = AgoError::SocketIO { path: socket_path, source };
            return framing::write_frame(client, &Frame::Response(Response::error(err.kind_name(), err.to_string()))).await;
        }
    };

    let payload = request.arg("payload").unwrap_or_default().to_string();
    let forwarded = Request::new(Op::Chat).with_arg("from", "client").with_arg("payload", payload.clone());
    framing::write_frame(&mut worker, &Frame::Request(forwarded)).await?;

    core.router
        .append_log(&id, crate::router::ConversationEntry {
            message_id: 0,
            role: MessageRole::User,
            content: payload,
            timestamp_unix_secs: unix_now(),
        })
        .await;

    loop {
        match framing::read_frame(&mut worker).await? {
            DecodeOutcome::Frame(Frame::Event(event)) => {
                if event.kind == EventKind::TurnComplete {
                    if let Some(text) = event.payload.get("text") {
                        core.router
                            .append_log(&id, crate::router::ConversationEntry {
                                message_id: 0,
                                role: MessageRole::Agent,
                                content: text.clone(),
                                timestamp_unix_secs: unix_now(),
                            })
                            .await;
                    }
                }
                framing::write_frame(client, &Frame::Event(event)).await?;
            }
            DecodeOutcome::Frame(Frame::Response(resp)) => {
                return framing::write_frame(client, &Frame::Response(resp)).await;
            }
            DecodeOutcome::Frame(Frame::Request(_)) => continue,
            DecodeOutcome::Eof => {
                let resp = Response::error("ChildCrashed", format!("instance {id} closed the connection mid-turn"));
                return framing::write_frame(client, &Frame::Response(resp)).await;
            }
        }
    }
}

/// `logs --follow`: send the current ring as `Event(LogEntry)` frames, then
/// keep streaming newly appended entries until the client disconnects.
async fn stream_logs(core: &Arc<Core>, request: Request, client: &mut UnixStream) -> AgoResult<()> {
    let name = match request.arg("id") {
        Some(n) => n.to_string(),
        None => {
            let resp = Response::error("NoSuchAgent", "logs requires an \"id\"");
            return framing::write_frame(client, &Frame::Response(resp)).await;
        }
    };
    let id = match core.resolve_to_live_id(&name).await {
        Ok(id) => id,
        Err(e) => return framing::write_frame(client, &Frame::Response(Response::error(e.kind_name(), e.to_string()))).await,
    };

    let existing = core.router.conversation_log(&id).await?;
    for entry in existing {
        framing::write_frame(client, &Frame::Event(log_entry_event(&entry))).await?;
    }

    let mut receiver = match core.router.subscribe_log(&id) {
        Ok(r) => r,
        Err(e) => return framing::write_frame(client, &Frame::Response(Response::error(e.kind_name(), e.to_string()))).await,
    };

    loop {
        tokio::select! {
            entry = receiver.recv() => {
                match entry {
                    Ok(entry) => framing::write_frame(client, &Frame::Event(log_entry_event(&entry))).await?,
                    Err(_) => break,
                }
            }
            outcome = framing::read_frame(client) => {
                // The client half is only ever used to detect disconnect
                // during a follow session; it never sends a second request.
                if matches!(outcome, Ok(DecodeOutcome::Eof) | Err(_)) {
                    break;
                }
            }
        }
    }
    Ok(())
}

fn log_entry_event(entry: &crate::router::ConversationEntry) -> Event {
    Event::new(EventKind::LogEntry)
        .with_field("role", format!("{:?}", entry.role))
        .with_field("content", entry.content.clone())
        .with_field("timestamp", entry.timestamp_unix_secs.to_string())
}

/// `queues --follow`: poll queue depths on a short interval and stream them
/// as `Event(QueueUpdate)` frames until the client disconnects.
async fn stream_queues(core: &Arc<Core>, _request: Request, client: &mut UnixStream) -> AgoResult<()> {
    let mut interval = tokio::time::interval(std::time::Duration::from_millis(500));
    loop {
        tokio::select! {
            _ = interval.tick() => {
                for id in core.router.live_instance_ids() {
                    if let Some(depth) = core.router.queue_depth(&id) {
                        let event = Event::new(EventKind::QueueUpdate)
                            .with_field("instance_id", id)
                            .with_field("depth", depth.to_string());
                        framing::write_frame(client, &Frame::Event(event)).await?;
                    }
                }
            }
            outcome = framing::read_frame(client) => {
                if matches!(outcome, Ok(DecodeOutcome::Eof) | Err(_)) {
                    break;
                }
            }
        }
    }
    Ok(())
}

fn unix_now() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigStore;
    use crate::templates::TemplateRegistry;
    use std::fs;
    use tempfile::TempDir;

    fn build_core(base: &std::path::Path) -> Core {
        let local = base.join("local");
        let pulled = base.join("registry/templates/pulled");
        let builtin = base.join("registry/templates/builtin");
        fs::create_dir_all(&local).unwrap();
        fs::create_dir_all(&pulled).unwrap();
        fs::create_dir_all(&builtin).unwrap();
        fs::write(
            builtin.join("researcher.yaml"),
            "name: researcher\nmodel: gpt-4o-mini\nprompt: You are a researcher.\n",
        )
        .unwrap();

        let registry_file = Arc::new(RegistryFile::new(base.join("processes/registry.json")));
        let process_manager =
            Arc::new(ProcessManager::new(base.to_path_buf(), registry_file.clone(), PathBuf::from("/bin/true")));
        Core {
            base_dir: base.to_path_buf(),
            config: Mutex::new(ConfigStore::load(base.to_path_buf(), Some(local.clone())).unwrap()),
            templates: TemplateRegistry::new(local, pulled, builtin),
            registry_file,
            process_manager,
            router: Arc::new(Router::new(base.to_path_buf())),
            shutdown: tokio::sync::Notify::new(),
        }
    }

    #[tokio::test]
    async fn create_materialises_a_snapshot_without_spawning() {
        let dir = TempDir::new().unwrap();
        let core = build_core(dir.path());
        let resp = handle_create(&core, Request::new(Op::Create).with_arg("template", "researcher")).await.unwrap();
        assert!(resp.is_ok());
        let id = resp.payload.get("instance_id").unwrap();
        assert!(id.starts_with("researcher-"));
        assert!(core.process_manager.get_live(id).await.is_none());
    }

    #[tokio::test]
    async fn ps_on_empty_daemon_lists_nothing() {
        let dir = TempDir::new().unwrap();
        let core = build_core(dir.path());
        let resp = handle_ps(&core).await.unwrap();
        let instances: Vec<serde_json::Value> = serde_json::from_str(resp.payload.get("instances").unwrap()).unwrap();
        assert!(instances.is_empty());
    }

    #[tokio::test]
    async fn stop_unknown_is_not_running() {
        let dir = TempDir::new().unwrap();
        let core = build_core(dir.path());
        let err = handle_stop(&core, Request::new(Op::Stop).with_arg("id", "ghost-00000000")).await.unwrap_err();
        assert!(matches!(err, AgoError::NotRunning(_)) || matches!(err, AgoError::NoSuchAgent(_)));
    }

    #[tokio::test]
    async fn config_set_then_get_round_trips() {
        let dir = TempDir::new().unwrap();
        let core = build_core(dir.path());
        handle_config_set(&core, Request::new(Op::ConfigSet).with_arg("key", "default_model").with_arg("value", "claude-x"))
            .await
            .unwrap();
        let resp = handle_config_get(&core, Request::new(Op::ConfigGet).with_arg("key", "default_model")).await.unwrap();
        assert_eq!(resp.payload.get("value").map(String::as_str), Some("claude-x"));
    }

    #[tokio::test]
    async fn templates_lists_the_builtin_researcher() {
        let dir = TempDir::new().unwrap();
        let core = build_core(dir.path());
        let resp = handle_templates(&core).await.unwrap();
        assert!(resp.payload.get("templates").unwrap().contains("researcher"));
    }

    #[tokio::test]
    async fn registry_add_then_remove_round_trips_through_config_show() {
        let dir = TempDir::new().unwrap();
        let core = build_core(dir.path());

        handle_registry_add(
            &core,
            Request::new(Op::RegistryAdd).with_arg("name", "upstream").with_arg("url", "https://templates.example/"),
        )
        .await
        .unwrap();

        let shown = handle_config_show(&core).await.unwrap();
        let config: crate::config::Config = serde_yaml::from_str(shown.payload.get("config").unwrap()).unwrap();
        assert_eq!(config.registries.len(), 1);
        assert_eq!(config.registries[0].name, "upstream");
        assert_eq!(config.registries[0].url.as_deref(), Some("https://templates.example/"));

        handle_registry_add(
            &core,
            Request::new(Op::RegistryAdd).with_arg("name", "upstream").with_arg("url", "https://other.example/"),
        )
        .await
        .unwrap();
        let shown = handle_config_show(&core).await.unwrap();
        let config: crate::config::Config = serde_yaml::from_str(shown.payload.get("config").unwrap()).unwrap();
        assert_eq!(config.registries.len(), 1, "adding the same name again updates in place");
        assert_eq!(config.registries[0].url.as_deref(), Some("https://other.example/"));

        handle_registry_remove(&core, Request::new(Op::RegistryRemove).with_arg("name", "upstream")).await.unwrap();
        let shown = handle_config_show(&core).await.unwrap();
        let config: crate::config::Config = serde_yaml::from_str(shown.payload.get("config").unwrap()).unwrap();
        assert!(config.registries.is_empty());
    }
}
