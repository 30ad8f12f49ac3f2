//! External tool execution for pg_dump and psql.

use std::io::Write;
use std::process::Stdio;

use tabula_core::{Result, TabulaError};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

/// Split a command line into arguments, honoring double quotes so that
/// paths with spaces survive as a single argument. Quotes are stripped
/// from the result.
fn tokenize(command_line: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;

    for ch in command_line.chars() {
        match ch {
            '"' => in_quotes = !in_quotes,
            c if c.is_whitespace() && !in_quotes => {
                if !current.is_empty() {
                    args.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        args.push(current);
    }
    args
}

/// Runs external PostgreSQL tools with credentials passed through a
/// transient password file rather than the command line or environment.
#[derive(Debug, Default)]
pub struct ProcessOrchestrator;

impl ProcessOrchestrator {
    pub fn new() -> Self {
        Self
    }

    /// Execute a tool command line to completion. Both output streams are
    /// drained concurrently so a verbose tool cannot fill a pipe buffer
    /// and stall. A non-zero exit status surfaces as a `Process` error
    /// carrying the collected stderr lines.
    #[tracing::instrument(skip(self, password), fields(tool = %command_line.split_whitespace().next().unwrap_or("")))]
    pub async fn run_tool(&self, command_line: &str, user: &str, password: &str) -> Result<()> {
        // The file is removed when this binding drops, on every path.
        let mut pass_file = tempfile::NamedTempFile::new()?;
        writeln!(pass_file, "*:*:*:{user}:{password}")?;
        pass_file.flush()?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            // libpq ignores a group/world readable password file; failure
            // to tighten the mode just downgrades to a password prompt.
            let _ = std::fs::set_permissions(
                pass_file.path(),
                std::fs::Permissions::from_mode(0o600),
            );
        }

        let args = tokenize(command_line);
        let (program, rest) = args
            .split_first()
            .ok_or_else(|| TabulaError::Process("empty command line".into()))?;

        let mut child = Command::new(program)
            .args(rest)
            .env("PGPASSFILE", pass_file.path())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| TabulaError::Process(format!("cannot start {program}: {err}")))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| TabulaError::Process("child stdout not captured".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| TabulaError::Process("child stderr not captured".into()))?;

        let out_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            let mut collected = Vec::new();
            while let Ok(Some(line)) = lines.next_line().await {
                tracing::debug!(target: "tool", "{line}");
                collected.push(line);
            }
            collected
        });
        let err_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            let mut collected = Vec::new();
            while let Ok(Some(line)) = lines.next_line().await {
                tracing::debug!(target: "tool", "{line}");
                collected.push(line);
            }
            collected
        });

        let status = child
            .wait()
            .await
            .map_err(|err| TabulaError::Process(format!("wait for {program}: {err}")))?;
        let _ = out_task.await;
        let errors = err_task.await.unwrap_or_default();

        if status.success() {
            Ok(())
        } else {
            Err(TabulaError::Process(errors.join("; ")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_plain_arguments() {
        assert_eq!(
            tokenize("pg_dump -U admin --no-owner mydb"),
            vec!["pg_dump", "-U", "admin", "--no-owner", "mydb"]
        );
    }

    #[test]
    fn test_tokenize_quoted_path_with_spaces() {
        assert_eq!(
            tokenize(r#"psql -f "/tmp/my backups/proj.sql" -d proj"#),
            vec!["psql", "-f", "/tmp/my backups/proj.sql", "-d", "proj"]
        );
    }

    #[test]
    fn test_tokenize_empty() {
        assert!(tokenize("   ").is_empty());
    }

    #[tokio::test]
    async fn test_missing_tool_is_process_error() {
        let orchestrator = ProcessOrchestrator::new();
        let err = orchestrator
            .run_tool("definitely_not_a_real_tool_4x --version", "u", "p")
            .await
            .unwrap_err();
        assert!(matches!(err, TabulaError::Process(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_nonzero_exit_carries_joined_stderr() {
        let orchestrator = ProcessOrchestrator::new();
        let err = orchestrator
            .run_tool(
                r#"sh -c "echo one >&2; echo two >&2; exit 3""#,
                "u",
                "p",
            )
            .await
            .unwrap_err();
        match err {
            TabulaError::Process(message) => {
                assert!(message.contains("one; two"), "got: {message}");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_large_stderr_does_not_deadlock() {
        // 64KB+ on stderr exceeds the default pipe buffer; the drain
        // tasks must keep the child from blocking on write.
        let orchestrator = ProcessOrchestrator::new();
        let script = r#"sh -c "i=0; while [ $i -lt 2000 ]; do echo 0123456789012345678901234567890123456789 >&2; i=$((i+1)); done; exit 1""#;
        let result = tokio::time::timeout(
            std::time::Duration::from_secs(30),
            orchestrator.run_tool(script, "u", "p"),
        )
        .await
        .expect("tool run must not hang");
        assert!(matches!(result, Err(TabulaError::Process(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_credential_file_visible_to_child() {
        let orchestrator = ProcessOrchestrator::new();
        orchestrator
            .run_tool(
                r#"sh -c "grep -q '\*:\*:\*:alice:secret' $PGPASSFILE""#,
                "alice",
                "secret",
            )
            .await
            .expect("child should read the password file");
    }
}
