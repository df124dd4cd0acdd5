//! Node lifecycle state machine.
//!
//! `Provisioning -> Live -> (Updating <-> Live) -> Destroyed`
//!
//! The machine is pure: it takes an event and returns the next state or a
//! [`Rejection`]. p2plab-client holds one per node behind a lock and maps
//! rejections onto `LabError` with the node's identity attached.

use thiserror::Error;

/// Lifecycle state of a node handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    /// Handle exists but its control endpoint is not bound yet.
    Provisioning,
    /// Bound and accepting operations.
    Live {
        /// Number of tasks currently running.
        runs: u32,
    },
    /// A build is being installed; no task may run.
    Updating,
    /// Terminal. Infrastructure is gone.
    Destroyed,
}

/// Inputs to the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeEvent {
    /// Control endpoint bound.
    Bound,
    /// An update was requested.
    UpdateStarted,
    /// The update finished (successfully or not).
    UpdateFinished,
    /// A task was submitted.
    RunStarted,
    /// A task finished, failed or was cancelled.
    RunFinished,
    /// The node's infrastructure was torn down.
    Destroyed,
}

/// Why the state machine refused an event.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    /// A conflicting operation holds the node.
    #[error("{operation} rejected while {current} in progress")]
    Busy {
        /// Operation that was refused.
        operation: &'static str,
        /// Operation holding the node.
        current: &'static str,
    },

    /// The node is destroyed.
    #[error("node is destroyed")]
    Gone,

    /// The node has not been bound yet.
    #[error("node is still provisioning")]
    NotReady,

    /// The event makes no sense in this state (caller bug).
    #[error("{event:?} is not valid in state {state:?}")]
    Invalid {
        /// State the machine was in.
        state: NodeState,
        /// Event that was refused.
        event: NodeEvent,
    },
}

impl NodeState {
    /// Create a new state machine in the Provisioning state.
    pub fn new() -> Self {
        Self::Provisioning
    }

    /// Process an event and return the new state.
    ///
    /// This is a pure function. On rejection the caller keeps its current state.
    pub fn on_event(self, event: NodeEvent) -> Result<Self, Rejection> {
        use NodeEvent as E;
        use NodeState as S;

        match (self, event) {
            (_, E::Destroyed) => Ok(S::Destroyed),
            (S::Destroyed, _) => Err(Rejection::Gone),

            (S::Provisioning, E::Bound) => Ok(S::Live { runs: 0 }),
            (S::Provisioning, E::UpdateStarted | E::RunStarted) => Err(Rejection::NotReady),

            (S::Live { runs: 0 }, E::UpdateStarted) => Ok(S::Updating),
            (S::Live { .. }, E::UpdateStarted) => Err(Rejection::Busy {
                operation: "update",
                current: "run",
            }),
            (S::Live { runs }, E::RunStarted) => Ok(S::Live {
                runs: runs.saturating_add(1),
            }),
            (S::Live { runs }, E::RunFinished) if runs > 0 => Ok(S::Live { runs: runs - 1 }),

            (S::Updating, E::UpdateFinished) => Ok(S::Live { runs: 0 }),
            (S::Updating, E::UpdateStarted) => Err(Rejection::Busy {
                operation: "update",
                current: "update",
            }),
            (S::Updating, E::RunStarted) => Err(Rejection::Busy {
                operation: "run",
                current: "update",
            }),

            (state, event) => Err(Rejection::Invalid { state, event }),
        }
    }

    /// Check that a read-only or session operation may proceed.
    pub fn check_usable(&self) -> Result<(), Rejection> {
        match self {
            Self::Destroyed => Err(Rejection::Gone),
            Self::Provisioning => Err(Rejection::NotReady),
            Self::Live { .. } | Self::Updating => Ok(()),
        }
    }

    /// Check if the node is live (possibly running tasks).
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Live { .. })
    }

    /// Check if the node is destroyed.
    pub fn is_destroyed(&self) -> bool {
        matches!(self, Self::Destroyed)
    }
}

impl Default for NodeState {
    fn default() -> Self {
        Self::new()
    }
}
