//! Stdio process management for MCP clients: command construction, sandboxing,
//! and stderr log capture.

use crate::config::McpServer;
use crate::logging::LogManager;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{ChildStderr, Command};

/// Build the child-process command for a stdio-transport server, hardened the
/// same way regardless of which plugin it launches: a cleared environment, a
/// minimal `PATH`, and (on Unix) core dumps disabled and privileges dropped to
/// the invoking user before exec.
pub fn build_stdio_command(server: &McpServer) -> anyhow::Result<Command> {
    let program = server
        .command
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("no command configured for stdio transport"))?;

    let mut cmd = Command::new(program);
    apply_args_env_cwd(&mut cmd, server);
    configure_stdio(&mut cmd);
    Ok(cmd)
}

fn apply_args_env_cwd(cmd: &mut Command, server: &McpServer) {
    cmd.env_clear();
    #[cfg(unix)]
    {
        cmd.env("PATH", "/usr/bin:/bin");
    }
    #[cfg(windows)]
    {
        if let Ok(path) = std::env::var("PATH") {
            cmd.env("PATH", path);
        }
    }

    if let Some(args) = &server.args {
        cmd.args(args);
    }
    if let Some(env) = &server.env {
        for var in env {
            cmd.env(&var.key, &var.value);
        }
    }
    if let Some(cwd) = &server.cwd {
        cmd.current_dir(cwd);
    }
}

fn configure_stdio(cmd: &mut Command) {
    cmd.stdin(Stdio::piped());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());

    #[cfg(unix)]
    {
        use libc::{getgid, getuid, setgid, setuid};
        unsafe {
            cmd.pre_exec(|| {
                #[cfg(target_os = "linux")]
                {
                    use libc::{PR_SET_DUMPABLE, prctl};
                    let _ = prctl(PR_SET_DUMPABLE, 0, 0, 0, 0);
                }
                #[cfg(all(unix, not(target_os = "linux")))]
                {
                    use libc::{RLIMIT_CORE, rlimit, setrlimit};
                    let lim = rlimit { rlim_cur: 0, rlim_max: 0 };
                    let _ = setrlimit(RLIMIT_CORE, &lim);
                }

                let uid = getuid();
                let gid = getgid();
                if setgid(gid) != 0 {
                    return Err(std::io::Error::last_os_error());
                }
                if setuid(uid) != 0 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }
    }
}

/// Spawn a background task that streams a child process's stderr into the
/// shared log manager, one line per log entry.
pub fn spawn_stderr_logger(server_name: String, log_manager: Arc<LogManager>, stderr: ChildStderr) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    log_manager.add_stderr_line(&server_name, line).await;
                }
                Ok(None) => break,
                Err(err) => {
                    tracing::debug!(server = %server_name, error = %err, "stderr stream closed with error");
                    break;
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_command_errors_without_program() {
        let server = McpServer::default();
        assert!(build_stdio_command(&server).is_err());
    }

    #[test]
    fn build_command_uses_configured_program() {
        let server = McpServer {
            command: Some("echo".to_string()),
            args: Some(vec!["hello".to_string()]),
            ..Default::default()
        };
        let cmd = build_stdio_command(&server).expect("command builds");
        assert_eq!(cmd.as_std().get_program(), "echo");
    }
}
