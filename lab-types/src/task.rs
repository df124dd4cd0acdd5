//! Application-plane payloads: benchmark tasks and peer records.

use serde::{Deserialize, Serialize};

use crate::TaskId;

/// What a task asks the node's application to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Restart the application on the build named by the subject.
    Update,
    /// Fetch the content named by the subject.
    Get,
    /// Connect to the peers listed in the subject.
    Connect,
    /// Disconnect from all peers.
    Disconnect,
}

/// A unit of benchmark work submitted to a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Task identifier, used to abort the task.
    pub id: TaskId,
    /// Kind of work.
    pub kind: TaskKind,
    /// Free-form argument (content id, peer list, build reference).
    pub subject: String,
}

impl Task {
    /// Create a task with a fresh id.
    pub fn new(kind: TaskKind, subject: impl Into<String>) -> Self {
        Self {
            id: TaskId::new(),
            kind,
            subject: subject.into(),
        }
    }
}

/// A node's current peer discovery information.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerRecord {
    /// The application's peer identity.
    pub peer_id: String,
    /// Addresses the peer is reachable on.
    pub addrs: Vec<String>,
}
