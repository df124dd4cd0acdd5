//! Control protocol messages exchanged with a node's control endpoint.
//!
//! Every exchange is one [`Request`] answered by one [`Response`].

use serde::{Deserialize, Serialize};

use crate::{LabError, PeerRecord, Task, TaskId};

/// A request sent to a node's control endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Fetch and install a new build.
    Update {
        /// Where the build is fetched from.
        url: String,
    },
    /// Report current peer discovery information.
    PeerInfo,
    /// Execute a task and answer when it completes.
    Run {
        /// The task to execute.
        task: Task,
    },
    /// Abort a running task.
    Abort {
        /// The task to abort.
        task_id: TaskId,
    },
}

impl Request {
    /// Short operation name, used in logs and errors.
    pub fn operation(&self) -> &'static str {
        match self {
            Request::Update { .. } => "update",
            Request::PeerInfo => "peer_info",
            Request::Run { .. } => "run",
            Request::Abort { .. } => "abort",
        }
    }

    /// Serialize to MessagePack bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, LabError> {
        rmp_serde::to_vec(self).map_err(LabError::Serialization)
    }

    /// Deserialize from MessagePack bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, LabError> {
        rmp_serde::from_slice(bytes).map_err(LabError::Deserialization)
    }
}

/// Category of a failure reported by a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteErrorKind {
    /// The node is already executing a conflicting operation.
    Busy,
    /// The node rejected the request's arguments.
    Invalid,
    /// The node accepted the request but it failed.
    Failed,
}

/// A node's answer to a [`Request`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    /// The request completed.
    Ack,
    /// Answer to [`Request::PeerInfo`].
    Peer {
        /// Current peer record.
        record: PeerRecord,
    },
    /// Answer to [`Request::Run`].
    TaskDone {
        /// The completed task.
        task_id: TaskId,
    },
    /// The request failed on the node.
    Error {
        /// Failure category.
        kind: RemoteErrorKind,
        /// Human-readable detail.
        message: String,
    },
}

impl Response {
    /// Serialize to MessagePack bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, LabError> {
        rmp_serde::to_vec(self).map_err(LabError::Serialization)
    }

    /// Deserialize from MessagePack bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, LabError> {
        rmp_serde::from_slice(bytes).map_err(LabError::Deserialization)
    }
}
