//! # p2plab-types
//!
//! Value types shared by every p2plab crate:
//! - [`NodeId`], [`ClusterId`], [`GroupId`], [`TaskId`] - Identity types
//! - [`NodeMetadata`], [`NodeGroup`], [`ClusterDefinition`] - Provisioning records
//! - [`Task`], [`PeerRecord`] - Application-plane payloads
//! - [`Request`], [`Response`] - Control protocol messages
//! - [`LabError`] - Error taxonomy

#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
mod ids;
mod messages;
mod metadata;
mod task;

pub use error::{CancelReason, LabError, NodeFailure};
pub use ids::{ClusterId, GroupId, NodeId, TaskId};
pub use messages::{RemoteErrorKind, Request, Response};
pub use metadata::{ClusterDefinition, ClusterGroup, NodeGroup, NodeMetadata};
pub use task::{PeerRecord, Task, TaskKind};

/// Result type alias for p2plab operations.
pub type Result<T> = std::result::Result<T, LabError>;
