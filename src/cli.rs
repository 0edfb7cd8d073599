//! CLI front-end (§C11, ambient): a thin `clap`-derive binary that never
//! touches templates, processes, or sockets directly — every subcommand
//! opens one connection to the daemon's control socket, sends a single
//! framed `Request`, and renders whatever `Response`/`Event` frames come
//! back.

use crate::config::{self, AGO_HOME_ENV};
use crate::error::{AgoError, AgoResult};
use crate::framing::{self, DecodeOutcome};
use crate::protocol::{EventKind, Frame, Op, Request, Response};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tokio::net::UnixStream;

#[derive(Parser, Debug)]
#[command(name = "ago", about = "Local orchestration daemon for long-running AI agent worker processes")]
pub struct Cli {
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Materialise a template instance's runtime config without spawning it.
    Create { template: String },
    /// Spawn a worker, either fresh from a template or from a prior `create`.
    Run {
        template: Option<String>,
        #[arg(long)]
        instance_id: Option<String>,
    },
    /// List live instances.
    Ps,
    /// Show one instance's full state.
    Inspect { id: String },
    /// Open an interactive streamed chat with an instance.
    Chat { id: String, message: String },
    /// Enqueue a message from one instance to another.
    Send { from: String, to: String, message: String },
    /// Show (optionally follow) an instance's conversation log.
    Logs {
        id: String,
        #[arg(long)]
        follow: bool,
    },
    /// Stop one instance, or every instance with `--all`.
    Stop {
        id: Option<String>,
        #[arg(long)]
        all: bool,
    },
    /// Show (optionally follow) every instance's queue depth.
    Queues {
        #[arg(long)]
        follow: bool,
    },
    /// List templates visible across all configured layers.
    Templates,
    /// Pull a template from a configured registry (`registry:template`).
    Pull { reference: String },
    #[command(subcommand)]
    Config(ConfigCommand),
    #[command(subcommand)]
    Registry(RegistryCommand),
    #[command(subcommand)]
    Daemon(DaemonCommand),
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    Get { key: String },
    Set { key: String, value: String },
    Show,
}

#[derive(Subcommand, Debug)]
pub enum RegistryCommand {
    Add { name: String, url: String },
    List,
    Remove { name: String },
}

#[derive(Subcommand, Debug)]
pub enum DaemonCommand {
    Start,
    Stop,
    Status,
}

fn daemon_socket_path(base_dir: &std::path::Path) -> PathBuf {
    base_dir.join("daemon.sock")
}

/// Connect, send one request, and return its terminal response, printing
/// any `Event` frames that precede it (for the streaming ops) as they
/// arrive.
async fn send_request(base_dir: &std::path::Path, request: Request) -> AgoResult<Response> {
    let socket_path = daemon_socket_path(base_dir);
    let mut stream = UnixStream::connect(&socket_path)
        .await
        .map_err(|source| AgoError::SocketIO { path: socket_path.clone(), source })?;

    framing::write_frame(&mut stream, &Frame::Request(request)).await?;

    loop {
        match framing::read_frame(&mut stream).await? {
            DecodeOutcome::Frame(Frame::Response(response)) => return Ok(response),
            DecodeOutcome::Frame(Frame::Event(event)) => print_event(&event),
            DecodeOutcome::Frame(Frame::Request(_)) => continue,
            DecodeOutcome::Eof => {
                return Err(AgoError::ChildCrashed("daemon closed the connection without a response".to_string()))
            }
        }
    }
}

fn print_event(event: &crate::protocol::Event) {
    match event.kind {
        EventKind::TurnStarted => println!("… thinking"),
        EventKind::ToolCall => println!(
            "→ tool call: {} {}",
            event.payload.get("name").map(String::as_str).unwrap_or("?"),
            event.payload.get("params").map(String::as_str).unwrap_or("")
        ),
        EventKind::Observation => println!("← observation: {}", event.payload.get("text").map(String::as_str).unwrap_or("")),
        EventKind::TurnComplete => println!("{}", event.payload.get("text").map(String::as_str).unwrap_or("")),
        EventKind::TurnTruncated => println!("(turn truncated: too many iterations)"),
        EventKind::LogEntry => println!(
            "[{}] {}",
            event.payload.get("role").map(String::as_str).unwrap_or("?"),
            event.payload.get("content").map(String::as_str).unwrap_or("")
        ),
        EventKind::QueueUpdate => println!(
            "{}: depth {}",
            event.payload.get("instance_id").map(String::as_str).unwrap_or("?"),
            event.payload.get("depth").map(String::as_str).unwrap_or("?")
        ),
        EventKind::Ready => println!("ready"),
        EventKind::Error => println!("error: {}", event.payload.get("message").map(String::as_str).unwrap_or("")),
    }
}

fn render(response: Response) -> std::process::ExitCode {
    if response.is_ok() {
        let mut keys: Vec<_> = response.payload.keys().collect();
        keys.sort();
        for key in keys {
            println!("{key}: {}", response.payload[key]);
        }
        std::process::ExitCode::SUCCESS
    } else {
        eprintln!(
            "error [{}]: {}",
            response.error_kind.as_deref().unwrap_or("Unknown"),
            response.message.as_deref().unwrap_or("")
        );
        std::process::ExitCode::FAILURE
    }
}

pub async fn run(cli: Cli) -> std::process::ExitCode {
    let base_dir = match config::base_dir() {
        Ok(dir) => dir,
        Err(e) => {
            eprintln!("cannot resolve {AGO_HOME_ENV}/$HOME/.ago: {e}");
            return std::process::ExitCode::FAILURE;
        }
    };

    if let Command::Daemon(DaemonCommand::Start) = &cli.command {
        return start_daemon(&base_dir);
    }

    let request = if let Command::Pull { reference } = cli.command {
        match fetch_pull_request(&base_dir, &reference).await {
            Ok(request) => request,
            Err(e) => {
                eprintln!("pull failed: {e}");
                return std::process::ExitCode::FAILURE;
            }
        }
    } else {
        match build_request(cli.command) {
            Ok(request) => request,
            Err(code) => return code,
        }
    };

    match send_request(&base_dir, request).await {
        Ok(response) => render(response),
        Err(e) => {
            eprintln!("error: {e}");
            std::process::ExitCode::FAILURE
        }
    }
}

fn build_request(command: Command) -> Result<Request, std::process::ExitCode> {
    Ok(match command {
        Command::Create { template } => Request::new(Op::Create).with_arg("template", template),
        Command::Run { template, instance_id } => {
            let mut req = Request::new(Op::Run);
            if let Some(t) = template {
                req = req.with_arg("template", t);
            }
            if let Some(id) = instance_id {
                req = req.with_arg("instance_id", id);
            }
            req
        }
        Command::Ps => Request::new(Op::Ps),
        Command::Inspect { id } => Request::new(Op::Inspect).with_arg("id", id),
        Command::Chat { id, message } => Request::new(Op::Chat).with_arg("to", id).with_arg("payload", message),
        Command::Send { from, to, message } => {
            Request::new(Op::Send).with_arg("from", from).with_arg("to", to).with_arg("payload", message)
        }
        Command::Logs { id, follow } => {
            Request::new(Op::Logs).with_arg("id", id).with_arg("follow", follow.to_string())
        }
        Command::Stop { id, all } => {
            let mut req = Request::new(Op::Stop);
            if all {
                req = req.with_arg("all", "true");
            } else if let Some(id) = id {
                req = req.with_arg("id", id);
            } else {
                eprintln!("stop requires either an instance id or --all");
                return Err(std::process::ExitCode::FAILURE);
            }
            req
        }
        Command::Queues { follow } => Request::new(Op::Queues).with_arg("follow", follow.to_string()),
        Command::Templates => Request::new(Op::Templates),
        Command::Pull { .. } => unreachable!("pull is resolved by fetch_pull_request before dispatch"),
        Command::Config(ConfigCommand::Get { key }) => Request::new(Op::ConfigGet).with_arg("key", key),
        Command::Config(ConfigCommand::Set { key, value }) => {
            Request::new(Op::ConfigSet).with_arg("key", key).with_arg("value", value)
        }
        Command::Config(ConfigCommand::Show) => Request::new(Op::ConfigShow),
        Command::Registry(RegistryCommand::Add { name, url }) => {
            Request::new(Op::RegistryAdd).with_arg("name", name).with_arg("url", url)
        }
        Command::Registry(RegistryCommand::List) => Request::new(Op::ConfigShow),
        Command::Registry(RegistryCommand::Remove { name }) => {
            Request::new(Op::RegistryRemove).with_arg("name", name)
        }
        Command::Daemon(DaemonCommand::Stop) => Request::new(Op::Shutdown),
        Command::Daemon(DaemonCommand::Status) => Request::new(Op::Ping),
        Command::Daemon(DaemonCommand::Start) => unreachable!("handled before dispatch"),
    })
}

/// `pull registry:template` names a registry and a template; the core never
/// fetches from a forge itself (§1 non-goal), so the CLI resolves the
/// registry's URL from the local config, downloads the template body, and
/// hands the daemon the already-fetched bytes via `Op::Pull`.
async fn fetch_pull_request(base_dir: &std::path::Path, reference: &str) -> AgoResult<Request> {
    let (registry_name, template_name) = reference.split_once(':').ok_or_else(|| AgoError::ConfigInvalid {
        key: "pull".to_string(),
        reason: "pull reference must be of the form registry:template".to_string(),
    })?;

    let store = crate::config::ConfigStore::load(base_dir.to_path_buf(), None)?;
    let registry = store
        .current()
        .registries
        .iter()
        .find(|r| r.name == registry_name)
        .ok_or_else(|| AgoError::ConfigInvalid {
            key: "registries".to_string(),
            reason: format!("no configured registry named {registry_name:?}"),
        })?;
    let base_url = registry.url.clone().ok_or_else(|| AgoError::ConfigInvalid {
        key: format!("registries.{registry_name}.url"),
        reason: "registry has no url configured".to_string(),
    })?;

    let url = format!("{}/{template_name}.yaml", base_url.trim_end_matches('/'));
    let body = reqwest::get(&url)
        .await
        .map_err(|e| AgoError::ConfigInvalid { key: "pull".to_string(), reason: format!("fetch {url} failed: {e}") })?
        .error_for_status()
        .map_err(|e| AgoError::ConfigInvalid { key: "pull".to_string(), reason: format!("{url} returned an error: {e}") })?
        .text()
        .await
        .map_err(|e| AgoError::ConfigInvalid { key: "pull".to_string(), reason: format!("reading {url} failed: {e}") })?;

    Ok(Request::new(Op::Pull).with_arg("name", template_name).with_arg("body", body))
}

/// Launch a detached daemon process: the same binary re-invoked with the
/// hidden `--run-daemon` flag, stdio redirected into `logs/daemon.log`.
fn start_daemon(base_dir: &std::path::Path) -> std::process::ExitCode {
    if let Err(e) = config::ensure_base_dir(base_dir) {
        eprintln!("failed to prepare {}: {e}", base_dir.display());
        return std::process::ExitCode::FAILURE;
    }

    let exe = match std::env::current_exe() {
        Ok(exe) => exe,
        Err(e) => {
            eprintln!("cannot locate the ago binary to relaunch as a daemon: {e}");
            return std::process::ExitCode::FAILURE;
        }
    };

    let log_path = base_dir.join("logs").join("daemon.log");
    let log_file = match std::fs::OpenOptions::new().create(true).append(true).open(&log_path) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("cannot open {}: {e}", log_path.display());
            return std::process::ExitCode::FAILURE;
        }
    };
    let log_file_err = match log_file.try_clone() {
        Ok(f) => f,
        Err(e) => {
            eprintln!("cannot duplicate log file handle: {e}");
            return std::process::ExitCode::FAILURE;
        }
    };

    let mut command = std::process::Command::new(exe);
    command.arg("--run-daemon").stdin(std::process::Stdio::null()).stdout(log_file).stderr(log_file_err);
    if let Err(e) = crate::platform::prepare_command(&mut command) {
        eprintln!("failed to detach the daemon process: {e}");
        return std::process::ExitCode::FAILURE;
    }

    match command.spawn() {
        Ok(child) => {
            println!("daemon starting (pid {})", child.id());
            std::process::ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("failed to spawn daemon: {e}");
            std::process::ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pull_reference_without_colon_is_rejected() {
        let dir = tempfile::TempDir::new().unwrap();
        let err = fetch_pull_request(dir.path(), "no-colon-here").await.unwrap_err();
        assert!(matches!(err, AgoError::ConfigInvalid { .. }));
    }

    #[tokio::test]
    async fn pull_reference_for_an_unconfigured_registry_is_rejected() {
        let dir = tempfile::TempDir::new().unwrap();
        let err = fetch_pull_request(dir.path(), "missing-registry:some-template").await.unwrap_err();
        assert!(matches!(err, AgoError::ConfigInvalid { .. }));
    }

    #[test]
    fn stop_without_id_or_all_is_rejected() {
        let result = build_request(Command::Stop { id: None, all: false });
        assert!(result.is_err());
    }

    #[test]
    fn stop_all_sets_the_all_arg() {
        let request = build_request(Command::Stop { id: None, all: true }).unwrap();
        assert_eq!(request.arg("all"), Some("true"));
    }
}
