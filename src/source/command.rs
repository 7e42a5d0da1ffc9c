//! `pivpn` command invocation

use super::{AttributeProvider, SnapshotProvider, SourceError};
use crate::backend::ClientId;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

const LIST_ARG: &str = "-l";
const CONNECTED_ARG: &str = "-c";

/// Runs the PiVPN CLI with a per-invocation timeout
#[derive(Debug, Clone)]
pub struct PivpnCommand {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl PivpnCommand {
    /// `command` may carry leading arguments, e.g. `sudo pivpn`
    pub fn new(command: &str, timeout: Duration) -> Self {
        let mut words = command.split_whitespace().map(str::to_string);
        let program = words.next().unwrap_or_default();
        Self {
            program,
            args: words.collect(),
            timeout,
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    async fn run(&self, arg: &str) -> Result<String, SourceError> {
        debug!("Running {} {:?} {}", self.program, self.args, arg);

        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .arg(arg)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, command.output())
            .await
            .map_err(|_| SourceError::Timeout {
                program: self.program.clone(),
                timeout: self.timeout,
            })?
            .map_err(|e| SourceError::Spawn {
                program: self.program.clone(),
                source: e,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SourceError::Failed {
                program: self.program.clone(),
                status: output.status,
                stderr: stderr.trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Keep only the lines that mention `client` literally
fn matching_lines(output: &str, client: &ClientId) -> String {
    output
        .lines()
        .filter(|line| line.contains(client.as_str()))
        .fold(String::new(), |mut acc, line| {
            acc.push_str(line);
            acc.push('\n');
            acc
        })
}

impl SnapshotProvider for PivpnCommand {
    async fn listing(&self) -> Result<String, SourceError> {
        self.run(LIST_ARG).await
    }
}

impl AttributeProvider for PivpnCommand {
    async fn record(&self, client: &ClientId) -> Result<String, SourceError> {
        let output = self.run(CONNECTED_ARG).await?;
        Ok(matching_lines(&output, client))
    }
}
