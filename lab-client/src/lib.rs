//! # p2plab-client
//!
//! Node lifecycle for P2P benchmarking labs.
//!
//! ## Features
//!
//! - **All-or-Nothing Provisioning**: a failed group is rolled back before the error returns
//! - **Aggregated Teardown**: every node is attempted, every failure is reported
//! - **Live Node Handles**: update, ssh, peer info and task execution over a control transport
//! - **Cancellation**: every I/O operation takes a `CancellationToken` and honors deadlines
//!
//! ## Example
//!
//! ```ignore
//! use p2plab_client::{BackendProvider, Fleet, LabConfig, MemoryBackend};
//!
//! let config = LabConfig::from_file(Path::new("p2plab.toml"))?;
//! let provider = BackendProvider::new(Arc::new(MemoryBackend::new()), config.provider.clone());
//! let fleet = Fleet::new(Arc::new(provider), dialer, launcher, config.control.clone());
//!
//! let group = fleet.provision(&cancel, &GroupId::new("bench"), &definition).await?;
//! for node in fleet.members(&group) {
//!     node.run(&cancel, &Task::new(TaskKind::Get, cid)).await?;
//! }
//! fleet.teardown(&cancel, &group).await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod api;
pub mod backend;
pub mod config;
pub mod fleet;
pub mod node;
pub mod provider;
pub mod session;
pub mod transport;

pub use api::{LabNodeApi, MemoryMetadataStore, MetadataStore, NodeApi};
pub use backend::{AllocationRequest, InfraBackend, MemoryBackend};
pub use config::{ConfigError, ControlConfig, LabConfig, ProviderConfig, SshConfig};
pub use fleet::Fleet;
pub use node::{Agent, Application, Node, RemoteNode};
pub use provider::{BackendProvider, NodeProvider};
pub use session::{MockLauncher, ProcessLauncher, SessionLauncher};
pub use transport::{Dialer, MockDialer, MockTransport, Responder, Transport, TransportError};
