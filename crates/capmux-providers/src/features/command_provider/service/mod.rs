use crate::features::command_provider::repo::{CommandOutput, CommandRepository};
use crate::split_list;
use capmux_core::config::{check_positive, check_prompt_file};
use capmux_core::{ConfigCheck, CoreError, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub const DEFAULT_ALLOWED_COMMANDS: &str =
    "ls,cat,echo,pwd,head,tail,grep,find,stat,date,whoami,ps,wc,sort,uniq,df,du,uname,git,curl,ping,netstat,ifconfig,which";

// `cd` only changes the working directory of the spawned shell.
const ALWAYS_ALLOWED: &[&str] = &["cd"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandConfig {
    pub prompt_file: String,
    pub allowed_command: String,
    /// Seconds.
    pub timeout: i64,
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            prompt_file: String::new(),
            allowed_command: DEFAULT_ALLOWED_COMMANDS.to_string(),
            timeout: 30,
        }
    }
}

impl ConfigCheck for CommandConfig {
    fn check(&self) -> Result<()> {
        check_positive("timeout", self.timeout)?;
        check_prompt_file(&self.prompt_file)
    }
}

pub struct CommandProviderService {
    repo: Arc<dyn CommandRepository>,
    allowed: Vec<String>,
    timeout: Duration,
}

impl CommandProviderService {
    pub fn new(repo: Arc<dyn CommandRepository>, config: &CommandConfig) -> Self {
        Self {
            repo,
            allowed: split_list(&config.allowed_command),
            timeout: Duration::from_secs(config.timeout.max(1) as u64),
        }
    }

    pub fn allowed_commands(&self) -> &[String] {
        &self.allowed
    }

    /// Every segment of a pipeline or command list must start with an
    /// allow-listed program.
    pub fn is_allowed(&self, command: &str) -> bool {
        // Command substitution would run programs the segment check never sees.
        if command.contains('`') || command.contains("$(") {
            return false;
        }
        let segments = split_segments(command);
        if segments.is_empty() {
            return false;
        }
        segments.iter().all(|segment| {
            let program = segment.split_whitespace().next().unwrap_or_default();
            ALWAYS_ALLOWED.contains(&program) || self.allowed.iter().any(|a| a == program)
        })
    }

    pub async fn execute(&self, command: &str, cancel: CancellationToken) -> Result<CommandOutput> {
        let command = command.trim();
        if command.is_empty() {
            return Err(CoreError::InvalidArgument("command is empty".to_string()));
        }
        if !self.is_allowed(command) {
            return Err(CoreError::PermissionDenied(format!(
                "command '{command}' is not in the allow list"
            )));
        }

        debug!(command = command, "executing command");
        self.repo
            .run(command.to_string(), self.timeout, cancel)
            .await
    }
}

// Splits on `|`, `||`, `&`, `&&`, `;` and newlines. An `&` that belongs to a
// redirection (`2>&1`, `&>file`) stays inside its segment.
fn split_segments(command: &str) -> Vec<String> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut prev: Option<char> = None;
    let mut chars = command.chars().peekable();

    while let Some(c) = chars.next() {
        let is_separator = match c {
            '|' | ';' | '\n' => true,
            '&' => !matches!(prev, Some('>') | Some('<')) && chars.peek() != Some(&'>'),
            _ => false,
        };
        if is_separator {
            segments.push(std::mem::take(&mut current));
        } else {
            current.push(c);
        }
        prev = Some(c);
    }
    segments.push(current);

    segments
        .into_iter()
        .map(|segment| segment.trim().to_string())
        .filter(|segment| !segment.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::command_provider::repo::MockCommandRepository;
    use mockall::predicate::{always, eq};

    fn ok_output() -> CommandOutput {
        CommandOutput {
            status: Some(0),
            stdout: "ok".to_string(),
            stderr: String::new(),
        }
    }

    fn service_with(repo: MockCommandRepository) -> CommandProviderService {
        CommandProviderService::new(Arc::new(repo), &CommandConfig::default())
    }

    fn service() -> CommandProviderService {
        service_with(MockCommandRepository::new())
    }

    #[test]
    fn test_cd_and_git_chain_is_allowed() {
        assert!(service().is_allowed(
            "cd /var/logs/notfound && git log --since=\"today\" --pretty=format:\"%h - %an\""
        ));
    }

    #[test]
    fn test_every_pipeline_segment_is_checked() {
        let service = service();
        assert!(service.is_allowed("ls -la | grep foo | wc -l"));
        assert!(!service.is_allowed("ls -la | rm -rf /"));
        assert!(!service.is_allowed("echo hi; shutdown now"));
        assert!(!service.is_allowed("   "));
        assert!(!service.is_allowed("ls || reboot"));
        assert!(service.is_allowed("ls missing 2>&1"));
        assert!(!service.is_allowed("ls & reboot"));
        assert!(!service.is_allowed("echo $(reboot)"));
    }

    #[tokio::test]
    async fn test_execute_rejects_disallowed_without_running() {
        let mut repo = MockCommandRepository::new();
        repo.expect_run().never();

        let err = service_with(repo)
            .execute("rm -rf /tmp/x", CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, CoreError::PermissionDenied(_)));
    }

    #[tokio::test]
    async fn test_execute_runs_allowed_command() {
        let mut repo = MockCommandRepository::new();
        repo.expect_run()
            .with(
                eq("echo hello".to_string()),
                eq(Duration::from_secs(30)),
                always(),
            )
            .times(1)
            .returning(|_, _, _| Ok(ok_output()));

        let output = service_with(repo)
            .execute("  echo hello  ", CancellationToken::new())
            .await
            .unwrap();

        assert!(output.success());
    }

    #[tokio::test]
    async fn test_execute_propagates_repository_timeout() {
        let mut repo = MockCommandRepository::new();
        repo.expect_run()
            .returning(|command, _, _| Err(CoreError::Timeout(command)));

        let err = service_with(repo)
            .execute("find / -name core", CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(err, CoreError::Timeout("find / -name core".to_string()));
    }

    #[test]
    fn test_custom_allow_list() {
        let config = CommandConfig {
            allowed_command: "python3, node".to_string(),
            ..CommandConfig::default()
        };
        let service = CommandProviderService::new(Arc::new(MockCommandRepository::new()), &config);

        assert_eq!(service.allowed_commands(), ["python3", "node"]);
        assert!(service.is_allowed("node script.js"));
        assert!(!service.is_allowed("ls"));
    }

    #[test]
    fn test_config_check() {
        assert!(CommandConfig::default().check().is_ok());
        let bad = CommandConfig {
            timeout: 0,
            ..CommandConfig::default()
        };
        assert!(matches!(bad.check(), Err(CoreError::InvalidConfig(_))));
    }
}
