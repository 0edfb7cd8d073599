//! Inter-agent `send`/`logs`: fire-and-forget delivery between two live
//! instances, with the sender's own log mirroring the outgoing message.

mod common;

use common::{Daemon, HELPER_TEMPLATE, RESEARCHER_TEMPLATE};
use serial_test::serial;
use std::time::{Duration, Instant};

#[test]
#[serial]
fn send_delivers_into_the_recipients_log_and_mirrors_into_the_senders() {
    let daemon = Daemon::start();
    daemon.write_builtin_template("researcher", RESEARCHER_TEMPLATE);
    daemon.write_builtin_template("helper", HELPER_TEMPLATE);

    let researcher_id = daemon.run_template("researcher");
    let helper_id = daemon.run_template("helper");
    daemon.wait_until_ps_contains(&researcher_id);
    daemon.wait_until_ps_contains(&helper_id);

    let message = "Organise these findings.";
    let send = daemon.cmd().args(["send", &researcher_id, &helper_id, message]).output().unwrap();
    assert!(send.status.success(), "send failed: {}", String::from_utf8_lossy(&send.stderr));

    let helper_entries = wait_for_logs(&daemon, &helper_id, 1);
    assert_eq!(helper_entries.len(), 1);
    assert_eq!(helper_entries[0]["content"], message);
    assert_eq!(helper_entries[0]["role"], "agent");

    let researcher_entries = wait_for_logs(&daemon, &researcher_id, 1);
    assert_eq!(researcher_entries.len(), 1);
    assert_eq!(researcher_entries[0]["content"], message);
}

fn wait_for_logs(daemon: &Daemon, instance_id: &str, at_least: usize) -> Vec<serde_json::Value> {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let out = daemon.cmd().args(["logs", instance_id]).output().unwrap();
        assert!(out.status.success(), "logs failed: {}", String::from_utf8_lossy(&out.stderr));
        let entries = common::json_field(&String::from_utf8_lossy(&out.stdout), "entries");
        let entries = entries.as_array().cloned().unwrap_or_default();
        if entries.len() >= at_least {
            return entries;
        }
        if Instant::now() > deadline {
            panic!("{instance_id} never accumulated {at_least} log entries (got {})", entries.len());
        }
        std::thread::sleep(Duration::from_millis(50));
    }
}
