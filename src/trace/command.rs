//! Hop discovery via the system traceroute/tracert tool.

use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

use super::TraceRunner;
use crate::probe::DiagnosticError;

/// Runs `traceroute` (Unix) or `tracert` (Windows) and returns its output.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTraceRunner;

fn trace_command(
    address: &str,
    max_hops: u8,
    per_hop_timeout: Duration,
) -> (&'static str, Vec<String>) {
    if cfg!(windows) {
        let millis = per_hop_timeout.as_millis().max(1);
        (
            "tracert",
            vec![
                "-d".into(),
                "-h".into(),
                max_hops.to_string(),
                "-w".into(),
                millis.to_string(),
                address.into(),
            ],
        )
    } else {
        // BSD and busybox traceroute only take whole seconds for -w.
        let secs = per_hop_timeout.as_millis().div_ceil(1000).max(1);
        (
            "traceroute",
            vec![
                "-n".into(),
                "-q".into(),
                "1".into(),
                "-m".into(),
                max_hops.to_string(),
                "-w".into(),
                secs.to_string(),
                address.into(),
            ],
        )
    }
}

#[async_trait]
impl TraceRunner for SystemTraceRunner {
    async fn run(
        &self,
        address: &str,
        max_hops: u8,
        per_hop_timeout: Duration,
    ) -> Result<String, DiagnosticError> {
        let (program, args) = trace_command(address, max_hops, per_hop_timeout);
        tracing::info!("Tracing route to {} (max {} hops)", address, max_hops);

        let output = Command::new(program)
            .args(&args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                DiagnosticError::Invocation(format!("failed to execute {}: {}", program, e))
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let text = if stderr.trim().is_empty() { stdout.trim() } else { stderr.trim() };
            return Err(DiagnosticError::Invocation(format!(
                "{} exited with {}: {}",
                program, output.status, text
            )));
        }

        Ok(stdout)
    }
}
