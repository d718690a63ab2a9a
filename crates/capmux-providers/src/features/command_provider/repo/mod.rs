use async_trait::async_trait;
use capmux_core::{CoreError, Result};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    pub fn combined(&self) -> String {
        match (self.stdout.is_empty(), self.stderr.is_empty()) {
            (_, true) => self.stdout.clone(),
            (true, false) => self.stderr.clone(),
            (false, false) => format!("{}\n{}", self.stdout.trim_end(), self.stderr),
        }
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CommandRepository: Send + Sync {
    async fn run(
        &self,
        command: String,
        timeout: Duration,
        cancel: CancellationToken,
    ) -> Result<CommandOutput>;
}

/// Runs commands through `sh -c` in a process group of its own. The whole
/// group is killed when a run ends early or its guard is dropped.
pub struct ShellCommandRepository {
    shell: String,
}

impl ShellCommandRepository {
    pub fn new() -> Self {
        Self {
            shell: "sh".to_string(),
        }
    }
}

impl Default for ShellCommandRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CommandRepository for ShellCommandRepository {
    async fn run(
        &self,
        command: String,
        timeout: Duration,
        cancel: CancellationToken,
    ) -> Result<CommandOutput> {
        let mut shell = Command::new(&self.shell);
        shell
            .arg("-c")
            .arg(&command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        shell.process_group(0);
        let child = shell
            .spawn()
            .map_err(|e| CoreError::Io(format!("failed to spawn '{command}': {e}")))?;
        let mut group = ProcessGroup::new(child.id());

        tokio::select! {
            output = child.wait_with_output() => {
                group.disarm();
                let output = output
                    .map_err(|e| CoreError::Io(format!("failed to run '{command}': {e}")))?;
                Ok(CommandOutput {
                    status: output.status.code(),
                    stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                    stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                })
            }
            _ = tokio::time::sleep(timeout) => Err(CoreError::Timeout(format!(
                "command '{command}' did not finish within {}s",
                timeout.as_secs()
            ))),
            _ = cancel.cancelled() => Err(CoreError::Cancelled(format!("command '{command}'"))),
        }
    }
}

// Kills every process of the shell's group on drop unless disarmed.
// `kill_on_drop` alone only reaches the shell, not the pipeline under it.
struct ProcessGroup {
    leader: Option<u32>,
}

impl ProcessGroup {
    fn new(leader: Option<u32>) -> Self {
        Self { leader }
    }

    fn disarm(&mut self) {
        self.leader = None;
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        #[cfg(unix)]
        if let Some(pgid) = self.leader.and_then(|pid| libc::pid_t::try_from(pid).ok()) {
            // SAFETY: signalling a process group has no memory effects.
            unsafe {
                libc::kill(-pgid, libc::SIGKILL);
            }
        }
    }
}
