//! Interactive `chat`: one synchronous turn against a mocked reasoner
//! endpoint, streamed back as events and mirrored into the instance's log.

mod common;

use common::{Daemon, RESEARCHER_TEMPLATE};
use serial_test::serial;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

// Needs a real second OS thread: the mock server's accept loop has to keep
// running while this test blocks the calling thread on synchronous child
// process I/O (`Command::output`).
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[serial]
async fn chat_streams_events_and_leaves_one_user_and_one_agent_log_entry() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "choices": [{
                "message": {
                    "content": "{\"type\":\"final_answer\",\"text\":\"Reinforcement learning trains an agent via reward signals.\"}"
                }
            }]
        })))
        .mount(&server)
        .await;

    let endpoint = format!("{}/v1/chat/completions", server.uri());
    let daemon = Daemon::start_with_env(&[("AGO_REASONER_ENDPOINT", &endpoint)]);
    daemon.write_builtin_template("researcher", RESEARCHER_TEMPLATE);

    let instance_id = daemon.run_template("researcher");
    daemon.wait_until_ps_contains(&instance_id);

    let chat = daemon.cmd().args(["chat", &instance_id, "Summarise reinforcement learning"]).output().unwrap();
    assert!(chat.status.success(), "chat failed: {}", String::from_utf8_lossy(&chat.stderr));
    let stdout = String::from_utf8_lossy(&chat.stdout);
    assert!(stdout.contains("Reinforcement learning trains an agent via reward signals."));

    let logs = daemon.cmd().args(["logs", &instance_id]).output().unwrap();
    assert!(logs.status.success());
    let entries = common::json_field(&String::from_utf8_lossy(&logs.stdout), "entries");
    let entries = entries.as_array().unwrap();
    assert_eq!(entries.len(), 2, "expected one user entry and one agent entry: {entries:?}");
    assert_eq!(entries[0]["role"], "user");
    assert_eq!(entries[0]["content"], "Summarise reinforcement learning");
    assert_eq!(entries[1]["role"], "agent");
    assert!(entries[1]["content"].as_str().unwrap().contains("Reinforcement learning"));
}
