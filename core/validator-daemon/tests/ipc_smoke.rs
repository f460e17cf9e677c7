use chrono::{Duration as ChronoDuration, Utc};
use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::sleep;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use validator_protocol::{
    FaultNotification, Method, ProjectSummary, Reading, Request, Response, ValidateResponse,
    PROTOCOL_VERSION, VIOLATION_MESSAGE,
};

struct DaemonGuard {
    child: Child,
}

impl Drop for DaemonGuard {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

impl DaemonGuard {
    fn terminate(&mut self) {
        let rc = unsafe { libc::kill(self.child.id() as i32, libc::SIGTERM) };
        assert_eq!(rc, 0, "failed to signal daemon");
    }

    fn wait_for_exit(&mut self, timeout: Duration) -> ExitStatus {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if let Some(status) = self.child.try_wait().expect("poll daemon") {
                return status;
            }
            sleep(Duration::from_millis(25));
        }
        panic!("Timed out waiting for daemon to exit");
    }
}

fn write_config(home: &Path, monitor: &str) -> PathBuf {
    let path = home.join("validator.toml");
    let config = format!(
        r#"
{monitor}

[shutdown]
drain_timeout_secs = 5

[recipients]
p1 = "owner@example.com"
"#
    );
    std::fs::write(&path, config).expect("write config");
    path
}

fn spawn_daemon(home: &Path, config_path: &Path) -> DaemonGuard {
    let child = Command::new(env!("CARGO_BIN_EXE_validator-daemon"))
        .env("HOME", home)
        .env("VALIDATOR_CONFIG_PATH", config_path)
        .env_remove("RUST_LOG")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("Failed to spawn validator-daemon");
    DaemonGuard { child }
}

fn state_dir(home: &Path) -> PathBuf {
    home.join(".gridwatch")
}

fn socket_path(home: &Path) -> PathBuf {
    state_dir(home).join("validator.sock")
}

fn reports_dir(home: &Path) -> PathBuf {
    state_dir(home).join("outbox").join("reports")
}

fn wait_for_socket(path: &Path, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if path.exists() {
            return;
        }
        sleep(Duration::from_millis(25));
    }
    panic!("Timed out waiting for validator socket at {}", path.display());
}

fn send_request(socket: &Path, request: Request) -> Response {
    let mut stream = UnixStream::connect(socket).expect("Failed to connect to validator socket");
    serde_json::to_writer(&mut stream, &request).expect("Failed to serialize request");
    stream.write_all(b"\n").expect("Failed to write request");
    stream.flush().ok();
    read_response(&mut stream)
}

fn read_response(stream: &mut UnixStream) -> Response {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 4096];

    loop {
        let n = stream.read(&mut chunk).expect("Failed to read response");
        if n == 0 {
            break;
        }
        buffer.extend_from_slice(&chunk[..n]);
        if chunk[..n].contains(&b'\n') {
            break;
        }
    }

    let newline_index = buffer.iter().position(|b| *b == b'\n');
    let response_bytes = match newline_index {
        Some(index) => &buffer[..index],
        None => buffer.as_slice(),
    };

    serde_json::from_slice(response_bytes).expect("Failed to parse response JSON")
}

fn reading(project_id: &str, average_output: f64) -> Reading {
    let end = Utc::now();
    let start = end - ChronoDuration::minutes(5);
    Reading {
        project_id: project_id.to_string(),
        baseline: 100.0,
        average_output,
        contract_threshold: 10.0,
        start_time: start.to_rfc3339(),
        end_time: end.to_rfc3339(),
    }
}

fn validate(socket: &Path, readings: Vec<Reading>) -> Response {
    send_request(
        socket,
        Request {
            protocol_version: PROTOCOL_VERSION,
            method: Method::ValidateAverageOutputs,
            id: Some("validate".to_string()),
            params: Some(serde_json::json!({ "average_outputs": readings })),
        },
    )
}

fn report_files(home: &Path) -> Vec<PathBuf> {
    match std::fs::read_dir(reports_dir(home)) {
        Ok(entries) => entries
            .map(|entry| entry.expect("outbox entry").path())
            .collect(),
        Err(_) => Vec::new(),
    }
}

#[test]
fn daemon_validates_batches_and_drains_on_sigterm() {
    let home = TempDir::new().expect("Failed to create temp HOME");
    let config = write_config(home.path(), "");
    let socket = socket_path(home.path());
    let mut daemon = spawn_daemon(home.path(), &config);

    wait_for_socket(&socket, Duration::from_secs(5));

    let health = send_request(
        &socket,
        Request {
            protocol_version: PROTOCOL_VERSION,
            method: Method::GetHealth,
            id: Some("health-check".to_string()),
            params: None,
        },
    );
    assert!(health.ok, "health response was not ok");
    let status = health
        .data
        .as_ref()
        .and_then(|data| data.get("status"))
        .and_then(|value| value.as_str())
        .unwrap_or("missing");
    assert_eq!(status, "ok");

    let response = validate(&socket, vec![reading("p1", 95.0), reading("p2", 80.0)]);
    assert!(response.ok, "validate response was not ok: {:?}", response.error);
    let result: ValidateResponse =
        serde_json::from_value(response.data.expect("validate data")).expect("parse result");
    assert!(!result.success);
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].project_id, "p1");
    assert_eq!(result.errors[0].message, VIOLATION_MESSAGE);

    let summaries = send_request(
        &socket,
        Request {
            protocol_version: PROTOCOL_VERSION,
            method: Method::GetSummaries,
            id: None,
            params: None,
        },
    );
    assert!(summaries.ok);
    let summaries: Vec<ProjectSummary> =
        serde_json::from_value(summaries.data.expect("summaries data")).expect("parse summaries");
    let ids: Vec<&str> = summaries.iter().map(|s| s.project_id.as_str()).collect();
    assert_eq!(ids, vec!["p1", "p2"]);
    assert_eq!(summaries[0].violation_records.len(), 1);

    daemon.terminate();
    let status = daemon.wait_for_exit(Duration::from_secs(15));
    assert!(status.success(), "daemon exited with {:?}", status);

    // p1 has a recipient; p2 does not and is only logged.
    let reports = report_files(home.path());
    assert_eq!(reports.len(), 1);
    let report = std::fs::read_to_string(&reports[0]).expect("read report");
    assert!(report.contains("To: owner@example.com\n"));
    assert!(report.contains("Project ID: p1\n"));
    assert!(report.contains("Total Violations: 1\n"));

    let faults = std::fs::read_to_string(state_dir(home.path()).join("outbox").join("faults.jsonl"))
        .expect("read fault spool");
    let notifications: Vec<FaultNotification> = faults
        .lines()
        .map(|line| serde_json::from_str(line).expect("parse fault line"))
        .collect();
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].project_id, "p1");

    assert!(!socket.exists(), "socket should be removed on exit");
}

#[test]
fn daemon_rejects_malformed_and_answers_empty_batches() {
    let home = TempDir::new().expect("Failed to create temp HOME");
    let config = write_config(home.path(), "");
    let socket = socket_path(home.path());
    let _daemon = spawn_daemon(home.path(), &config);

    wait_for_socket(&socket, Duration::from_secs(5));

    let mut bad = reading("p1", 95.0);
    bad.project_id = String::new();
    let response = validate(&socket, vec![bad]);
    assert!(!response.ok);
    assert_eq!(
        response.error.as_ref().map(|err| err.code.as_str()),
        Some("invalid_project_id")
    );

    let response = validate(&socket, Vec::new());
    assert!(response.ok);
    let result: ValidateResponse =
        serde_json::from_value(response.data.expect("validate data")).expect("parse result");
    assert_eq!(result, ValidateResponse::no_data());

    let mismatch = send_request(
        &socket,
        Request {
            protocol_version: PROTOCOL_VERSION + 1,
            method: Method::GetHealth,
            id: None,
            params: None,
        },
    );
    assert!(!mismatch.ok);
    assert_eq!(
        mismatch.error.as_ref().map(|err| err.code.as_str()),
        Some("protocol_mismatch")
    );
}

#[test]
fn daemon_finalizes_projects_after_idle_period() {
    let home = TempDir::new().expect("Failed to create temp HOME");
    let config = write_config(
        home.path(),
        "[monitor]\ncheck_interval_secs = 1\nidle_threshold_secs = 1",
    );
    let socket = socket_path(home.path());
    let _daemon = spawn_daemon(home.path(), &config);

    wait_for_socket(&socket, Duration::from_secs(5));

    let response = validate(&socket, vec![reading("p1", 95.0)]);
    assert!(response.ok);

    let deadline = Instant::now() + Duration::from_secs(10);
    while report_files(home.path()).is_empty() && Instant::now() < deadline {
        sleep(Duration::from_millis(100));
    }
    let reports = report_files(home.path());
    assert_eq!(reports.len(), 1, "expected one idle report");

    let summaries = send_request(
        &socket,
        Request {
            protocol_version: PROTOCOL_VERSION,
            method: Method::GetSummaries,
            id: None,
            params: None,
        },
    );
    let summaries: Vec<ProjectSummary> =
        serde_json::from_value(summaries.data.expect("summaries data")).expect("parse summaries");
    assert!(summaries.is_empty());
}
