//! Template layer precedence and the registry pull round trip.

mod common;

use common::Daemon;
use serial_test::serial;

const RESEARCHER_LOCAL: &str = "\
name: researcher
model: gpt-4o-mini
description: LOCAL
prompt: You are a researcher, overridden locally.
";

const RESEARCHER_BUILTIN: &str = "\
name: researcher
model: gpt-4o-mini
description: BUILTIN
prompt: You are a researcher.
";

#[test]
#[serial]
fn local_templates_take_precedence_over_builtin_by_default() {
    let project = tempfile::TempDir::new().unwrap();
    std::fs::write(project.path().join("researcher.yaml"), RESEARCHER_LOCAL).unwrap();

    let daemon = Daemon::start_in_cwd(project.path());
    daemon.write_builtin_template("researcher", RESEARCHER_BUILTIN);

    let out = daemon.cmd().arg("templates").output().unwrap();
    assert!(out.status.success());
    let templates = common::json_field(&String::from_utf8_lossy(&out.stdout), "templates");
    let researcher =
        templates.as_array().unwrap().iter().find(|t| t["name"] == "researcher").expect("researcher listed");
    assert_eq!(researcher["description"], "LOCAL");
    assert_eq!(researcher["layer"], "local");

    let run = daemon.cmd().args(["run", "researcher"]).output().unwrap();
    assert!(run.status.success());
    let instance_id = common::field(&String::from_utf8_lossy(&run.stdout), "instance_id").unwrap();
    daemon.wait_until_ps_contains(&instance_id);
}

// Needs a real second OS thread: the mock server's accept loop has to keep
// running while this test blocks the calling thread on synchronous child
// process I/O (`Command::output`).
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[serial]
async fn pull_from_a_configured_registry_lands_in_the_pulled_layer() {
    let server = wiremock::MockServer::start().await;
    wiremock::Mock::given(wiremock::matchers::method("GET"))
        .and(wiremock::matchers::path("/writer.yaml"))
        .respond_with(wiremock::ResponseTemplate::new(200).set_body_string(
            "name: writer\nmodel: gpt-4o-mini\ndescription: REMOTE\nprompt: You write things.\n",
        ))
        .mount(&server)
        .await;

    let daemon = Daemon::start();

    let add = daemon.cmd().args(["registry", "add", "upstream", &server.uri()]).output().unwrap();
    assert!(add.status.success(), "registry add failed: {}", String::from_utf8_lossy(&add.stderr));

    let pull = daemon.cmd().args(["pull", "upstream:writer"]).output().unwrap();
    assert!(pull.status.success(), "pull failed: {}", String::from_utf8_lossy(&pull.stderr));

    let templates_out = daemon.cmd().arg("templates").output().unwrap();
    let templates = common::json_field(&String::from_utf8_lossy(&templates_out.stdout), "templates");
    let writer = templates.as_array().unwrap().iter().find(|t| t["name"] == "writer").expect("writer listed");
    assert_eq!(writer["description"], "REMOTE");
    assert_eq!(writer["layer"], "pulled");
}

#[test]
#[serial]
fn pulling_from_an_unconfigured_registry_fails() {
    let daemon = Daemon::start();
    let pull = daemon.cmd().args(["pull", "ghost:writer"]).output().unwrap();
    assert!(!pull.status.success());
    assert!(String::from_utf8_lossy(&pull.stderr).contains("no configured registry"));
}
