//! Byte-stream providers for a language server process.

use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use globset::GlobSet;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::{Child, Command};
use tokio::runtime::Handle;

use crate::config::{ConfigError, ServerConfig};

/// How long a stopped server may take to exit on its own before it is killed.
const EXIT_GRACE: Duration = Duration::from_secs(2);

/// The two halves of a started transport. The session owns them until shutdown.
pub struct TransportStreams {
    pub reader: Box<dyn AsyncRead + Send + Unpin>,
    pub writer: Box<dyn AsyncWrite + Send + Unpin>,
}

impl TransportStreams {
    pub fn new(
        reader: impl AsyncRead + Send + Unpin + 'static,
        writer: impl AsyncWrite + Send + Unpin + 'static,
    ) -> Self {
        Self {
            reader: Box::new(reader),
            writer: Box::new(writer),
        }
    }
}

/// Supplies the byte streams for one external process.
pub trait Transport: Send {
    /// Launch the process. Fails with an I/O error if it cannot be started.
    fn start(&mut self) -> io::Result<TransportStreams>;

    /// Release the process and its streams. Calling it again is a no-op.
    ///
    /// Called after the session has written `exit` and closed its writer.
    fn stop(&mut self);
}

/// A language server spawned as a child process speaking over stdio.
pub struct ProcessTransport {
    command: String,
    args: Vec<String>,
    working_dir: PathBuf,
    env_denylist: GlobSet,
    child: Option<Child>,
}

impl ProcessTransport {
    pub fn new(config: &ServerConfig, working_dir: &Path) -> Result<Self, ConfigError> {
        Ok(Self {
            command: config.command().to_string(),
            args: config.args().to_vec(),
            working_dir: working_dir.to_path_buf(),
            env_denylist: config.env_denylist()?,
            child: None,
        })
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.child.is_some()
    }
}

impl Transport for ProcessTransport {
    fn start(&mut self) -> io::Result<TransportStreams> {
        let resolved = which::which(&self.command).map_err(|e| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} not found in PATH: {e}", self.command),
            )
        })?;

        let mut cmd = Command::new(&resolved);
        cmd.args(&self.args)
            .current_dir(&self.working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        for (key, _) in std::env::vars_os() {
            if key.to_str().is_some_and(|k| self.env_denylist.is_match(k)) {
                cmd.env_remove(&key);
            }
        }

        let mut child = cmd.spawn()?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::other("no stdout from child"))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| io::Error::other("no stdin from child"))?;

        tracing::info!(
            command = %resolved.display(),
            pid = child.id().unwrap_or_default(),
            "Spawned language server"
        );
        self.child = Some(child);
        Ok(TransportStreams::new(stdout, stdin))
    }

    fn stop(&mut self) {
        let Some(mut child) = self.child.take() else {
            return;
        };
        let Ok(runtime) = Handle::try_current() else {
            if let Err(e) = child.start_kill() {
                tracing::debug!("Language server '{}' already gone: {e}", self.command);
            }
            return;
        };
        let command = self.command.clone();
        runtime.spawn(async move {
            match tokio::time::timeout(EXIT_GRACE, child.wait()).await {
                Ok(Ok(status)) => {
                    tracing::debug!("Language server '{command}' exited with {status}");
                }
                Ok(Err(e)) => tracing::debug!("Waiting for '{command}' failed: {e}"),
                Err(_) => {
                    tracing::debug!("Language server '{command}' didn't exit in time, killing");
                    let _ = child.kill().await;
                }
            }
        });
    }
}
