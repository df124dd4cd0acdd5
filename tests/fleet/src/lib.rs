//! # fleet-tests
//!
//! End-to-end scenarios for p2plab node lifecycle.
//!
//! Everything runs in-process: machines come from `MemoryBackend` and each
//! node's control endpoint is a [`FakeAgent`](harness::FakeAgent) behind a
//! `MockDialer`, so no cloud account or network is needed.

#![warn(missing_docs)]
#![warn(clippy::all)]
