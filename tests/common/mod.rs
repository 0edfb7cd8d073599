//! Shared black-box test harness: spawn a real daemon against a scratch
//! `AGO_HOME`, drive it with the compiled `ago` binary, and tear it back
//! down. Every scenario in this suite talks to the daemon exactly the way a
//! user would, over the control socket, never through the library crate.

use assert_cmd::Command;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

pub const RESEARCHER_TEMPLATE: &str = "\
name: researcher
model: gpt-4o-mini
description: a researcher
prompt: You are a researcher. Investigate the question and answer concisely.
";

pub const HELPER_TEMPLATE: &str = "\
name: helper
model: gpt-4o-mini
description: a helper
prompt: You help whoever asks.
";

/// A running daemon bound to its own temporary `AGO_HOME`. Stopped on drop.
pub struct Daemon {
    home: tempfile::TempDir,
    env: Vec<(String, String)>,
}

impl Daemon {
    pub fn start() -> Self {
        Self::start_with(None, &[])
    }

    pub fn start_in_cwd(cwd: &Path) -> Self {
        Self::start_with(Some(cwd), &[])
    }

    pub fn start_with_env(env: &[(&str, &str)]) -> Self {
        Self::start_with(None, env)
    }

    fn start_with(cwd: Option<&Path>, env: &[(&str, &str)]) -> Self {
        let home = tempfile::TempDir::new().expect("create scratch AGO_HOME");
        let env: Vec<(String, String)> = env.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();

        let mut cmd = Command::cargo_bin("ago").expect("locate ago binary");
        cmd.env("AGO_HOME", home.path());
        for (k, v) in &env {
            cmd.env(k, v);
        }
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }
        cmd.args(["daemon", "start"]);
        cmd.assert().success();

        let daemon = Daemon { home, env };
        daemon.wait_for_socket();
        daemon
    }

    fn socket_path(&self) -> PathBuf {
        self.home.path().join("daemon.sock")
    }

    fn wait_for_socket(&self) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while Instant::now() < deadline {
            if self.socket_path().exists() {
                return;
            }
            std::thread::sleep(Duration::from_millis(50));
        }
        panic!("daemon socket never appeared at {}", self.socket_path().display());
    }

    pub fn home_path(&self) -> &Path {
        self.home.path()
    }

    /// A fresh `ago` invocation pointed at this daemon's `AGO_HOME`.
    pub fn cmd(&self) -> Command {
        let mut cmd = Command::cargo_bin("ago").expect("locate ago binary");
        cmd.env("AGO_HOME", self.home.path());
        for (k, v) in &self.env {
            cmd.env(k, v);
        }
        cmd
    }

    pub fn write_builtin_template(&self, name: &str, body: &str) {
        let dir = self.home.path().join("registry").join("templates").join("builtin");
        std::fs::create_dir_all(&dir).expect("create builtin template dir");
        std::fs::write(dir.join(format!("{name}.yaml")), body).expect("write builtin template");
    }

    pub fn run_template(&self, template: &str) -> String {
        let out = self.cmd().args(["run", template]).output().expect("run ago run");
        assert!(out.status.success(), "run {template} failed: {}", String::from_utf8_lossy(&out.stderr));
        field(&String::from_utf8_lossy(&out.stdout), "instance_id").expect("instance_id in run output")
    }

    pub fn wait_until_ps_contains(&self, instance_id: &str) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            let out = self.cmd().arg("ps").output().expect("run ago ps");
            if String::from_utf8_lossy(&out.stdout).contains(instance_id) {
                return;
            }
            std::thread::sleep(Duration::from_millis(50));
        }
        panic!("{instance_id} never appeared in ps");
    }
}

impl Drop for Daemon {
    fn drop(&mut self) {
        let _ = self.cmd().args(["daemon", "stop"]).output();
    }
}

/// Pull a `key: value` line out of the CLI's rendered stdout (one line per
/// response payload key, sorted — see `cli::render`).
pub fn field(rendered: &str, key: &str) -> Option<String> {
    let prefix = format!("{key}: ");
    rendered.lines().find_map(|line| line.strip_prefix(prefix.as_str()).map(str::to_string))
}

pub fn json_field(rendered: &str, key: &str) -> serde_json::Value {
    let raw = field(rendered, key).unwrap_or_else(|| panic!("no {key:?} field in:\n{rendered}"));
    serde_json::from_str(&raw).unwrap_or_else(|e| panic!("{key} is not valid JSON ({e}): {raw}"))
}
