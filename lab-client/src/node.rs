//! Live node handles.
//!
//! A node exposes two capabilities plus its metadata:
//! - [`Agent`] - management plane (software update, remote shell)
//! - [`Application`] - data plane (peer info, task execution)
//!
//! [`RemoteNode`] implements both over a control [`Transport`], guarded by
//! the lifecycle [`NodeState`] machine from p2plab-core.
//!
//! # Example
//!
//! ```ignore
//! let node = RemoteNode::bind(&cancel, metadata, &dialer, launcher, control).await?;
//! node.update(&cancel, "https://builds.example.com/app-1.2.0.tar.gz").await?;
//! node.run(&cancel, &Task::new(TaskKind::Get, cid)).await?;
//! ```

use async_trait::async_trait;
use p2plab_core::{NodeEvent, NodeIdentity, NodeState, Rejection, SshOption, SshSettings};
use p2plab_types::{
    CancelReason, LabError, NodeMetadata, PeerRecord, RemoteErrorKind, Request, Response, Task,
    TaskId,
};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio_util::sync::CancellationToken;

use crate::config::ControlConfig;
use crate::session::SessionLauncher;
use crate::transport::{Dialer, Transport, TransportError};

/// Build URL schemes a node can fetch from.
const UPDATE_SCHEMES: [&str; 3] = ["http", "https", "file"];

/// Management-plane capability of a node.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Fetch and install a new build of the application from `url`.
    ///
    /// Rejected with [`LabError::Busy`] while a task is running or another
    /// update is in progress.
    async fn update(&self, cancel: &CancellationToken, url: &str) -> Result<(), LabError>;

    /// Open a remote shell. `opts` are applied in order over default
    /// settings; the first failing option aborts before anything is opened.
    async fn ssh(&self, cancel: &CancellationToken, opts: &[SshOption]) -> Result<(), LabError>;
}

/// Data-plane capability of a node.
#[async_trait]
pub trait Application: Send + Sync {
    /// The node's current peer discovery record, queried live.
    async fn peer_info(&self, cancel: &CancellationToken) -> Result<PeerRecord, LabError>;

    /// Execute `task`, blocking until it completes or `cancel` fires.
    async fn run(&self, cancel: &CancellationToken, task: &Task) -> Result<(), LabError>;
}

/// An instance running the P2P application to be benchmarked.
pub trait Node: Agent + Application + NodeIdentity + std::fmt::Debug {}

impl<T: Agent + Application + NodeIdentity + std::fmt::Debug> Node for T {}

/// A node controlled through its control endpoint.
pub struct RemoteNode {
    metadata: NodeMetadata,
    transport: Arc<dyn Transport>,
    launcher: Arc<dyn SessionLauncher>,
    control: ControlConfig,
    state: Mutex<NodeState>,
}

impl std::fmt::Debug for RemoteNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteNode")
            .field("id", &self.metadata.id)
            .field("control_address", &self.metadata.control_address)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Applies the closing event of an operation when dropped, so the state
/// machine is released even if the caller drops the operation's future.
struct Finish<'a> {
    node: &'a RemoteNode,
    event: NodeEvent,
}

impl Drop for Finish<'_> {
    fn drop(&mut self) {
        // Fails only if the node was destroyed meanwhile; nothing to release then.
        let _ = self.node.apply(self.event);
    }
}

impl RemoteNode {
    /// Bind a live node to the control endpoint named in `metadata`.
    ///
    /// Fails with [`LabError::Connectivity`] if the endpoint cannot be
    /// reached within the configured connect timeout.
    pub async fn bind(
        cancel: &CancellationToken,
        metadata: NodeMetadata,
        dialer: &dyn Dialer,
        launcher: Arc<dyn SessionLauncher>,
        control: ControlConfig,
    ) -> Result<Self, LabError> {
        let dial = tokio::time::timeout(
            control.connect_timeout(),
            dialer.dial(&metadata.control_address),
        );

        let transport = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(LabError::canceled("bind", &metadata.id, CancelReason::Canceled));
            }
            dialed = dial => match dialed {
                Ok(Ok(transport)) => transport,
                Ok(Err(e)) => return Err(connectivity(&metadata, e)),
                Err(_) => return Err(connectivity(&metadata, TransportError::Timeout)),
            },
        };

        let node = Self::new(metadata, transport, launcher, control);
        node.apply(NodeEvent::Bound)
            .map_err(|r| node.rejected(r, "bind"))?;

        tracing::info!(
            node = %node.metadata.id,
            cluster = %node.metadata.cluster,
            address = %node.metadata.control_address,
            "Node bound"
        );
        Ok(node)
    }

    /// Wrap an already-connected transport. The node starts in
    /// [`NodeState::Provisioning`] until bound.
    fn new(
        metadata: NodeMetadata,
        transport: Arc<dyn Transport>,
        launcher: Arc<dyn SessionLauncher>,
        control: ControlConfig,
    ) -> Self {
        Self {
            metadata,
            transport,
            launcher,
            control,
            state: Mutex::new(NodeState::new()),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> NodeState {
        *self.lock_state()
    }

    /// Mark the node destroyed and close its control connection.
    ///
    /// Every later Agent/Application call fails with [`LabError::Gone`].
    pub async fn mark_destroyed(&self) {
        let _ = self.apply(NodeEvent::Destroyed);
        if let Err(e) = self.transport.close().await {
            tracing::debug!(node = %self.metadata.id, "Closing control connection failed: {}", e);
        }
        tracing::debug!(node = %self.metadata.id, "Node destroyed");
    }

    fn lock_state(&self) -> MutexGuard<'_, NodeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn apply(&self, event: NodeEvent) -> Result<(), Rejection> {
        let mut state = self.lock_state();
        *state = state.on_event(event)?;
        Ok(())
    }

    fn check_usable(&self, operation: &str) -> Result<(), LabError> {
        self.lock_state()
            .check_usable()
            .map_err(|r| self.rejected(r, operation))
    }

    /// Start an operation that holds the state machine until the returned
    /// guard drops.
    fn begin(
        &self,
        start: NodeEvent,
        finish: NodeEvent,
        operation: &str,
    ) -> Result<Finish<'_>, LabError> {
        self.apply(start).map_err(|r| self.rejected(r, operation))?;
        Ok(Finish {
            node: self,
            event: finish,
        })
    }

    fn rejected(&self, rejection: Rejection, operation: &str) -> LabError {
        let node = self.metadata.id.clone();
        match rejection {
            Rejection::Busy { operation, current } => LabError::Busy {
                node,
                operation: operation.to_string(),
                current: current.to_string(),
            },
            Rejection::Gone => LabError::Gone { node },
            Rejection::NotReady => LabError::Connectivity {
                node,
                address: self.metadata.control_address.clone(),
                reason: "control endpoint not bound".to_string(),
            },
            Rejection::Invalid { .. } => LabError::validation(operation, rejection.to_string()),
        }
    }

    /// Send one request and wait for the response, observing `cancel` and
    /// the request timeout.
    async fn exchange(
        &self,
        cancel: &CancellationToken,
        request: &Request,
    ) -> Result<Response, LabError> {
        let operation = request.operation();
        if cancel.is_cancelled() {
            return Err(LabError::canceled(operation, &self.metadata.id, CancelReason::Canceled));
        }

        let bytes = request.to_bytes()?;
        let call = tokio::time::timeout(self.control.request_timeout(), self.transport.request(&bytes));

        let reply = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(LabError::canceled(operation, &self.metadata.id, CancelReason::Canceled));
            }
            reply = call => match reply {
                Ok(Ok(reply)) => reply,
                Ok(Err(e)) => return Err(connectivity(&self.metadata, e)),
                Err(_) => {
                    return Err(LabError::canceled(
                        operation,
                        &self.metadata.id,
                        CancelReason::DeadlineExceeded,
                    ))
                }
            },
        };

        match Response::from_bytes(&reply) {
            Ok(Response::Error { kind, message }) => Err(self.remote_error(operation, kind, message)),
            Ok(response) => Ok(response),
            Err(e) => Err(LabError::Protocol {
                node: self.metadata.id.clone(),
                reason: e.to_string(),
            }),
        }
    }

    fn remote_error(&self, operation: &str, kind: RemoteErrorKind, message: String) -> LabError {
        let node = self.metadata.id.clone();
        match kind {
            RemoteErrorKind::Busy => LabError::Busy {
                node,
                operation: operation.to_string(),
                current: message,
            },
            RemoteErrorKind::Invalid => LabError::validation(operation, message),
            RemoteErrorKind::Failed => LabError::Remote {
                node,
                operation: operation.to_string(),
                message,
            },
        }
    }

    fn unexpected(&self, operation: &str, response: Response) -> LabError {
        LabError::Protocol {
            node: self.metadata.id.clone(),
            reason: format!("unexpected reply to {}: {:?}", operation, response),
        }
    }

    /// Best-effort abort of a task the caller stopped waiting for.
    async fn abort(&self, task_id: TaskId) {
        let request = Request::Abort { task_id };
        let bytes = match request.to_bytes() {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(node = %self.metadata.id, %task_id, "Encoding abort failed: {}", e);
                return;
            }
        };

        match tokio::time::timeout(self.control.abort_timeout(), self.transport.request(&bytes)).await {
            Ok(Ok(_)) => tracing::debug!(node = %self.metadata.id, %task_id, "Task aborted"),
            Ok(Err(e)) => {
                tracing::warn!(node = %self.metadata.id, %task_id, "Abort not delivered: {}", e)
            }
            Err(_) => {
                tracing::warn!(node = %self.metadata.id, %task_id, "Abort not acknowledged in time")
            }
        }
    }
}

impl NodeIdentity for RemoteNode {
    fn metadata(&self) -> &NodeMetadata {
        &self.metadata
    }
}

#[async_trait]
impl Agent for RemoteNode {
    async fn update(&self, cancel: &CancellationToken, url: &str) -> Result<(), LabError> {
        self.check_usable("update")?;
        validate_update_url(url)?;

        let _finish = self.begin(NodeEvent::UpdateStarted, NodeEvent::UpdateFinished, "update")?;
        tracing::info!(node = %self.metadata.id, url, "Updating node");

        let request = Request::Update {
            url: url.to_string(),
        };
        match self.exchange(cancel, &request).await? {
            Response::Ack => {
                tracing::info!(node = %self.metadata.id, "Update installed");
                Ok(())
            }
            other => Err(self.unexpected("update", other)),
        }
    }

    async fn ssh(&self, cancel: &CancellationToken, opts: &[SshOption]) -> Result<(), LabError> {
        self.check_usable("ssh")?;
        let settings = SshSettings::from_options(opts)?;
        self.launcher.launch(cancel, &self.metadata, &settings).await
    }
}

#[async_trait]
impl Application for RemoteNode {
    async fn peer_info(&self, cancel: &CancellationToken) -> Result<PeerRecord, LabError> {
        self.check_usable("peer_info")?;
        match self.exchange(cancel, &Request::PeerInfo).await? {
            Response::Peer { record } => Ok(record),
            other => Err(self.unexpected("peer_info", other)),
        }
    }

    async fn run(&self, cancel: &CancellationToken, task: &Task) -> Result<(), LabError> {
        self.check_usable("run")?;
        if cancel.is_cancelled() {
            return Err(LabError::canceled("run", &self.metadata.id, CancelReason::Canceled));
        }

        let _finish = self.begin(NodeEvent::RunStarted, NodeEvent::RunFinished, "run")?;
        tracing::debug!(node = %self.metadata.id, task = %task.id, kind = ?task.kind, "Running task");

        let request = Request::Run { task: task.clone() };
        match self.exchange(cancel, &request).await {
            Ok(Response::TaskDone { task_id }) if task_id == task.id => Ok(()),
            Ok(other) => Err(self.unexpected("run", other)),
            Err(e @ LabError::Canceled { .. }) => {
                tracing::warn!(node = %self.metadata.id, task = %task.id, "Task stopped: {}", e);
                self.abort(task.id).await;
                Err(e)
            }
            Err(e) => Err(e),
        }
    }
}

fn connectivity(metadata: &NodeMetadata, error: TransportError) -> LabError {
    LabError::Connectivity {
        node: metadata.id.clone(),
        address: metadata.control_address.clone(),
        reason: error.to_string(),
    }
}

fn validate_update_url(raw: &str) -> Result<(), LabError> {
    let parsed = url::Url::parse(raw).map_err(|e| LabError::validation("update url", e.to_string()))?;
    if !UPDATE_SCHEMES.contains(&parsed.scheme()) {
        return Err(LabError::validation(
            "update url",
            format!("unsupported scheme {:?}", parsed.scheme()),
        ));
    }
    if parsed.scheme() != "file" && parsed.host_str().map_or(true, str::is_empty) {
        return Err(LabError::validation("update url", "missing host"));
    }
    Ok(())
}
