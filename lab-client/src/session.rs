//! SSH session launching.
//!
//! [`ProcessLauncher`] shells out to the system `ssh` binary via
//! `tokio::process::Command`. Authentication is left to the user's SSH
//! configuration (agent, keys, `~/.ssh/config`).

use async_trait::async_trait;
use p2plab_core::SshSettings;
use p2plab_types::{CancelReason, LabError, NodeId, NodeMetadata};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::config::SshConfig;

/// `ssh` exits with 255 when the connection itself fails.
const SSH_CONNECTION_FAILED: i32 = 255;

/// Opens a remote session on a node.
#[async_trait]
pub trait SessionLauncher: Send + Sync {
    /// Open a session to `node` and block until it ends.
    async fn launch(
        &self,
        cancel: &CancellationToken,
        node: &NodeMetadata,
        settings: &SshSettings,
    ) -> Result<(), LabError>;
}

/// Launches sessions with the system `ssh` binary, attached to this
/// process's terminal.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    program: String,
    defaults: SshConfig,
}

impl ProcessLauncher {
    /// Create a launcher using `ssh` from `PATH`.
    pub fn new(defaults: SshConfig) -> Self {
        Self {
            program: "ssh".to_string(),
            defaults,
        }
    }

    /// Use a different client binary.
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// Fill settings no option has set from the configured defaults.
    pub fn effective_settings(&self, settings: &SshSettings) -> SshSettings {
        let mut effective = settings.clone();
        if effective.user.is_none() {
            effective.user = self.defaults.user.clone();
        }
        if effective.port.is_none() {
            effective.port = self.defaults.port;
        }
        if !self.defaults.strict_host_key_checking {
            effective
                .options
                .entry("StrictHostKeyChecking".to_string())
                .or_insert_with(|| "no".to_string());
        }
        effective
            .options
            .entry("ConnectTimeout".to_string())
            .or_insert_with(|| self.defaults.connect_timeout_secs.to_string());
        effective
    }

    /// Full argument list passed to the client binary.
    pub fn args(&self, node: &NodeMetadata, settings: &SshSettings) -> Vec<String> {
        self.effective_settings(settings).to_args(&node.address)
    }
}

#[async_trait]
impl SessionLauncher for ProcessLauncher {
    async fn launch(
        &self,
        cancel: &CancellationToken,
        node: &NodeMetadata,
        settings: &SshSettings,
    ) -> Result<(), LabError> {
        let args = self.args(node, settings);
        tracing::debug!(node = %node.id, program = %self.program, ?args, "Opening ssh session");

        let mut child = tokio::process::Command::new(&self.program)
            .args(&args)
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| LabError::Connectivity {
                node: node.id.clone(),
                address: node.address.clone(),
                reason: format!("failed to spawn {}: {}", self.program, e),
            })?;

        let status = tokio::select! {
            _ = cancel.cancelled() => {
                // Returning drops `child`, which kills it (kill_on_drop).
                tracing::warn!(node = %node.id, "ssh session canceled");
                return Err(LabError::canceled("ssh", &node.id, CancelReason::Canceled));
            }
            status = child.wait() => status.map_err(|e| LabError::Remote {
                node: node.id.clone(),
                operation: "ssh".to_string(),
                message: e.to_string(),
            })?,
        };

        match status.code() {
            Some(0) => Ok(()),
            Some(SSH_CONNECTION_FAILED) => Err(LabError::Connectivity {
                node: node.id.clone(),
                address: node.address.clone(),
                reason: "ssh connection failed".to_string(),
            }),
            code => Err(LabError::Remote {
                node: node.id.clone(),
                operation: "ssh".to_string(),
                message: format!("session exited with {:?}", code),
            }),
        }
    }
}

/// Session launcher for testing: records sessions instead of opening them.
#[derive(Debug, Clone, Default)]
pub struct MockLauncher {
    sessions: Arc<Mutex<Vec<(NodeId, SshSettings)>>>,
}

impl MockLauncher {
    /// Create a new mock launcher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sessions opened so far, in order.
    pub fn sessions(&self) -> Vec<(NodeId, SshSettings)> {
        self.sessions.lock().unwrap().clone()
    }
}

#[async_trait]
impl SessionLauncher for MockLauncher {
    async fn launch(
        &self,
        cancel: &CancellationToken,
        node: &NodeMetadata,
        settings: &SshSettings,
    ) -> Result<(), LabError> {
        if cancel.is_cancelled() {
            return Err(LabError::canceled("ssh", &node.id, CancelReason::Canceled));
        }
        self.sessions
            .lock()
            .unwrap()
            .push((node.id.clone(), settings.clone()));
        Ok(())
    }
}
