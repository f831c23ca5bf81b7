//
// process.rs
//
// Copyright (C) 2024-2025 Posit Software, PBC. All rights reserved.
//
//

use std::collections::BTreeMap;
use std::process::{ExitStatus, Stdio};

use tokio::io::{AsyncBufReadExt, AsyncRead};

use crate::error::{YKError, YKResult};

/// The local launcher process that submits the kernel to YARN.
#[derive(Debug)]
pub struct LauncherProcess {
    kernel_id: String,
    child: tokio::process::Child,
    pid: Option<u32>,
}

impl LauncherProcess {
    /// Start `argv` with `env` added to the inherited environment. The
    /// launcher's output is forwarded to the log.
    pub fn spawn(
        kernel_id: &str,
        argv: &[String],
        env: &BTreeMap<String, String>,
    ) -> YKResult<Self> {
        let Some((program, args)) = argv.split_first() else {
            return Err(YKError::LauncherStartFailed {
                kernel_id: kernel_id.to_string(),
                source: std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "the kernelspec has an empty argv",
                ),
            });
        };

        log::debug!("[session {}] Starting launcher: {:?}", kernel_id, argv);

        let mut child = tokio::process::Command::new(program)
            .args(args)
            .envs(env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| YKError::LauncherStartFailed {
                kernel_id: kernel_id.to_string(),
                source,
            })?;

        if let Some(stdout) = child.stdout.take() {
            Self::stream_output(kernel_id.to_string(), "stdout", stdout);
        }
        if let Some(stderr) = child.stderr.take() {
            Self::stream_output(kernel_id.to_string(), "stderr", stderr);
        }

        let pid = child.id();
        log::info!(
            "[session {}] Launcher started with pid {}",
            kernel_id,
            pid.map(|p| p.to_string()).unwrap_or_else(|| "<unknown>".to_string())
        );

        Ok(Self {
            kernel_id: kernel_id.to_string(),
            child,
            pid,
        })
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// The exit status, if the launcher has already exited.
    pub fn try_wait(&mut self) -> YKResult<Option<ExitStatus>> {
        Ok(self.child.try_wait()?)
    }

    /// Kill the launcher if it is still running and reap it.
    pub async fn terminate(&mut self) -> YKResult<ExitStatus> {
        if let Some(status) = self.child.try_wait()? {
            return Ok(status);
        }
        log::debug!("[session {}] Killing launcher process", self.kernel_id);
        if let Err(e) = self.child.start_kill() {
            // Exited between the check and the kill.
            log::trace!("[session {}] Launcher kill: {}", self.kernel_id, e);
        }
        let status = self.child.wait().await?;
        log::debug!(
            "[session {}] Launcher exited with status: {}",
            self.kernel_id,
            status
        );
        Ok(status)
    }

    fn stream_output<T: AsyncRead + Unpin + Send + 'static>(
        kernel_id: String,
        kind: &'static str,
        stream: T,
    ) {
        tokio::spawn(async move {
            let mut lines = tokio::io::BufReader::new(stream).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        log::debug!("[session {}] launcher {}: {}", kernel_id, kind, line);
                    }
                    Ok(None) => {
                        log::trace!("[session {}] End of launcher {}", kernel_id, kind);
                        break;
                    }
                    Err(e) => {
                        log::warn!(
                            "[session {}] Failed to read launcher {}: {}",
                            kernel_id,
                            kind,
                            e
                        );
                        break;
                    }
                }
            }
        });
    }
}
