use std::io;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::process::Command;
use tracing::debug;

use crate::error::CommandError;

pub const VERSION_TIMEOUT: Duration = Duration::from_secs(5);
pub const IDENTITY_TIMEOUT: Duration = Duration::from_secs(10);
pub const CHECK_TIMEOUT: Duration = Duration::from_secs(15);
pub const LIST_TIMEOUT: Duration = Duration::from_secs(30);
pub const SLOW_LIST_TIMEOUT: Duration = Duration::from_secs(60);
pub const LOGOUT_TIMEOUT: Duration = Duration::from_secs(30);
pub const LOGIN_TIMEOUT: Duration = Duration::from_secs(300);

/// Runs external programs. Every CLI the engine talks to goes through one of
/// these so a missing binary or a hang becomes a typed error.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(
        &self,
        program: &str,
        args: &[&str],
        timeout: Duration,
    ) -> Result<String, CommandError>;
}

/// Run and parse stdout as JSON. Partial or non-JSON output is a failure.
pub async fn run_json(
    runner: &dyn CommandRunner,
    program: &str,
    args: &[&str],
    timeout: Duration,
) -> Result<Value, CommandError> {
    let out = runner.run(program, args, timeout).await?;
    serde_json::from_str(&out)
        .map_err(|e| CommandError::other(format!("{program}: invalid JSON output: {e}")))
}

/// Process-backed runner.
#[derive(Debug, Default, Clone)]
pub struct SystemRunner;

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(
        &self,
        program: &str,
        args: &[&str],
        timeout: Duration,
    ) -> Result<String, CommandError> {
        debug!("exec: {} {}", program, args.join(" "));
        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(timeout, child).await {
            Err(_) => {
                debug!("{} timed out after {:?}", program, timeout);
                return Err(CommandError::Timeout {
                    program: program.to_string(),
                    timeout,
                });
            }
            Ok(Err(e)) if e.kind() == io::ErrorKind::NotFound => {
                return Err(CommandError::NotInstalled(program.to_string()));
            }
            Ok(Err(e)) => return Err(CommandError::other(e.to_string())),
            Ok(Ok(out)) => out,
        };

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            debug!(
                "{} exited with {:?}: {}",
                program,
                output.status.code(),
                stderr
            );
            Err(CommandError::NonZeroExit {
                code: output.status.code(),
                stderr,
            })
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use super::*;

    /// Canned runner for tests. Rules match on a prefix of the joined
    /// command line; the first matching rule wins. Unmatched commands fail
    /// with a non-zero exit.
    #[derive(Default)]
    pub struct ScriptedRunner {
        rules: Mutex<Vec<(String, Result<String, CommandError>)>>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedRunner {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn ok(self, prefix: &str, stdout: impl Into<String>) -> Self {
            self.push(prefix, Ok(stdout.into()));
            self
        }

        pub fn fail(self, prefix: &str, err: CommandError) -> Self {
            self.push(prefix, Err(err));
            self
        }

        pub fn push(&self, prefix: &str, result: Result<String, CommandError>) {
            self.rules
                .lock()
                .unwrap()
                .push((prefix.to_string(), result));
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        pub fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }

        pub fn count_matching(&self, prefix: &str) -> usize {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .filter(|c| c.starts_with(prefix))
                .count()
        }
    }

    #[async_trait]
    impl CommandRunner for ScriptedRunner {
        async fn run(
            &self,
            program: &str,
            args: &[&str],
            _timeout: Duration,
        ) -> Result<String, CommandError> {
            let line = if args.is_empty() {
                program.to_string()
            } else {
                format!("{} {}", program, args.join(" "))
            };
            self.calls.lock().unwrap().push(line.clone());
            let rules = self.rules.lock().unwrap();
            for (prefix, result) in rules.iter() {
                if line.starts_with(prefix.as_str()) {
                    return result.clone();
                }
            }
            Err(CommandError::NonZeroExit {
                code: Some(1),
                stderr: format!("unscripted: {line}"),
            })
        }
    }
}
