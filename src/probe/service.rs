//! OS service probe and control.
//!
//! Uses `systemctl` on Unix and `sc` on Windows. Remote hosts are only
//! reachable through `sc`.

use std::process::Stdio;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use tokio::process::Command;
use tokio::time::Instant;

use super::ProbeError;
use crate::monitor::Status;

/// Interval between status checks while waiting on a start/stop.
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Service control verbs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceCommand {
    Start,
    Stop,
}

impl ServiceCommand {
    fn verb(self) -> &'static str {
        match self {
            ServiceCommand::Start => "start",
            ServiceCommand::Stop => "stop",
        }
    }

    fn goal(self) -> Status {
        match self {
            ServiceCommand::Start => Status::Accepting,
            ServiceCommand::Stop => Status::Refusing,
        }
    }
}

/// Whether a host name designates this machine.
pub fn is_local_host(host: &str) -> bool {
    matches!(
        host.trim().to_ascii_lowercase().as_str(),
        "" | "." | "localhost" | "127.0.0.1" | "::1"
    )
}

/// Query the current status of a service.
pub async fn query_service(host: &str, name: &str, timeout: Duration) -> Result<Status, ProbeError> {
    let mut cmd = service_command(host, name, "query")?;
    let output = tokio::time::timeout(timeout, cmd.output())
        .await
        .map_err(|_| ProbeError::Timeout(timeout))?
        .map_err(|e| ProbeError::Command(format!("failed to query service {}: {}", name, e)))?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    if cfg!(windows) {
        parse_sc_output(&stdout)
    } else {
        // is-active exits non-zero for anything but "active"; the word still tells the state
        parse_systemctl_state(&stdout)
    }
}

/// Issue a start/stop and wait until the service reaches the goal state.
pub async fn control_service(
    host: &str,
    name: &str,
    command: ServiceCommand,
    timeout: Duration,
) -> Result<(), ProbeError> {
    let deadline = Instant::now() + timeout;

    let mut cmd = service_command(host, name, command.verb())?;
    let output = tokio::time::timeout(timeout, cmd.output())
        .await
        .map_err(|_| ProbeError::Timeout(timeout))?
        .map_err(|e| ProbeError::Command(format!("failed to {} {}: {}", command.verb(), name, e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let stdout = String::from_utf8_lossy(&output.stdout);
        // sc reports "already running" / "not started" as errors; the wait below settles it
        if !(stdout.contains("1056") || stdout.contains("1062")) {
            return Err(ProbeError::Command(format!(
                "{} {} failed: {}{}",
                command.verb(),
                name,
                stdout.trim(),
                stderr.trim()
            )));
        }
    }

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(ProbeError::Timeout(timeout));
        }

        match query_service(host, name, remaining).await {
            Ok(status) if status == command.goal() => return Ok(()),
            Ok(_) => {}
            Err(ProbeError::Timeout(_)) => return Err(ProbeError::Timeout(timeout)),
            Err(e) => return Err(e),
        }

        tokio::time::sleep(WAIT_POLL_INTERVAL.min(remaining)).await;
    }
}

fn service_command(host: &str, name: &str, verb: &str) -> Result<Command, ProbeError> {
    if name.trim().is_empty() {
        return Err(ProbeError::Config("service name is empty".to_string()));
    }

    let mut cmd = if cfg!(windows) {
        let mut cmd = Command::new("sc");
        if !is_local_host(host) {
            cmd.arg(format!(r"\\{}", host));
        }
        cmd.args([verb, name]);
        cmd
    } else {
        if !is_local_host(host) {
            return Err(ProbeError::Config(format!(
                "remote service control is not supported on this platform ({})",
                host
            )));
        }
        let verb = if verb == "query" { "is-active" } else { verb };
        let mut cmd = Command::new("systemctl");
        cmd.args([verb, name]);
        cmd
    };

    cmd.stdout(Stdio::piped()).stderr(Stdio::piped()).kill_on_drop(true);
    Ok(cmd)
}

/// Parse the single-word output of `systemctl is-active`.
pub fn parse_systemctl_state(output: &str) -> Result<Status, ProbeError> {
    let word = output.lines().next().unwrap_or("").trim();
    match word {
        "active" | "reloading" => Ok(Status::Accepting),
        "inactive" | "failed" => Ok(Status::Refusing),
        "activating" => Ok(Status::Starting),
        "deactivating" => Ok(Status::Stopping),
        "" => Err(ProbeError::Command("systemctl returned no state".to_string())),
        other => Err(ProbeError::Command(format!("unexpected service state: {}", other))),
    }
}

/// Parse the output of `sc query`.
pub fn parse_sc_output(output: &str) -> Result<Status, ProbeError> {
    static STATE_RE: OnceLock<Regex> = OnceLock::new();
    static FAILED_RE: OnceLock<Regex> = OnceLock::new();

    let failed_re = FAILED_RE.get_or_init(|| {
        Regex::new(r"FAILED\s+(?P<code>\d+)").expect("static regex")
    });
    if let Some(caps) = failed_re.captures(output) {
        return Err(ProbeError::Command(format!(
            "service query failed with code {}",
            &caps["code"]
        )));
    }

    let state_re = STATE_RE.get_or_init(|| {
        Regex::new(r"STATE\s*:\s*(?P<code>\d+)").expect("static regex")
    });
    let code = state_re
        .captures(output)
        .and_then(|caps| caps["code"].parse::<u8>().ok())
        .ok_or_else(|| ProbeError::Command("no STATE line in sc output".to_string()))?;

    match code {
        1 => Ok(Status::Refusing),
        2 | 5 => Ok(Status::Starting),
        3 | 6 => Ok(Status::Stopping),
        4 => Ok(Status::Accepting),
        7 => Ok(Status::Paused),
        other => Err(ProbeError::Command(format!("unknown service state code {}", other))),
    }
}
