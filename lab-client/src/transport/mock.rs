//! Mock transport for testing.
//!
//! Allows queueing responses, installing a responder and capturing sent
//! requests for verification.

use super::{Dialer, Transport, TransportError};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Computes a response for a request when the queue is empty.
pub type Responder = Arc<dyn Fn(&[u8]) -> Result<Vec<u8>, TransportError> + Send + Sync>;

/// Mock transport for testing.
///
/// Clones share state, so a test can keep one clone while a node owns another.
#[derive(Default)]
pub struct MockTransport {
    inner: Arc<Mutex<MockTransportInner>>,
}

#[derive(Default)]
struct MockTransportInner {
    connected: bool,
    connected_address: Option<String>,
    sent_messages: Vec<Vec<u8>>,
    receive_queue: VecDeque<Vec<u8>>,
    responder: Option<Responder>,
    latency: Option<Duration>,
    fail_next_connect: Option<String>,
    fail_next_request: Option<String>,
}

impl MockTransport {
    /// Create a new mock transport.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockTransportInner> {
        self.inner.lock().unwrap()
    }

    /// Queue a message to be returned by the next `request()` call.
    pub fn queue_response(&self, data: Vec<u8>) {
        self.lock().receive_queue.push_back(data);
    }

    /// Answer requests with `responder` once the queue is drained.
    pub fn set_responder(&self, responder: Responder) {
        self.lock().responder = Some(responder);
    }

    /// Delay every response by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.lock().latency = Some(latency);
    }

    /// Get all requests that were sent.
    pub fn sent_messages(&self) -> Vec<Vec<u8>> {
        self.lock().sent_messages.clone()
    }

    /// Get the address that was connected to.
    pub fn connected_address(&self) -> Option<String> {
        self.lock().connected_address.clone()
    }

    /// Cause the next connect() to fail with the given error.
    pub fn fail_next_connect(&self, error: &str) {
        self.lock().fail_next_connect = Some(error.to_string());
    }

    /// Cause the next request() to fail with the given error.
    pub fn fail_next_request(&self, error: &str) {
        self.lock().fail_next_request = Some(error.to_string());
    }
}

impl Clone for MockTransport {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl std::fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("MockTransport")
            .field("connected", &inner.connected)
            .field("connected_address", &inner.connected_address)
            .field("sent", &inner.sent_messages.len())
            .field("queued", &inner.receive_queue.len())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self, address: &str) -> Result<(), TransportError> {
        let mut inner = self.lock();

        // Check for forced failure
        if let Some(error) = inner.fail_next_connect.take() {
            return Err(TransportError::ConnectionFailed(error));
        }

        inner.connected = true;
        inner.connected_address = Some(address.to_string());
        Ok(())
    }

    async fn request(&self, data: &[u8]) -> Result<Vec<u8>, TransportError> {
        let (response, latency) = {
            let mut inner = self.lock();

            if !inner.connected {
                return Err(TransportError::NotConnected);
            }

            // Check for forced failure
            if let Some(error) = inner.fail_next_request.take() {
                return Err(TransportError::SendFailed(error));
            }

            inner.sent_messages.push(data.to_vec());

            let response = match inner.receive_queue.pop_front() {
                Some(queued) => Ok(queued),
                None => match &inner.responder {
                    Some(responder) => responder(data),
                    None => Err(TransportError::ConnectionClosed),
                },
            };
            (response, inner.latency)
        };

        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        response
    }

    fn is_connected(&self) -> bool {
        self.lock().connected
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.lock().connected = false;
        Ok(())
    }
}

/// Mock dialer handing out one shared [`MockTransport`] per address.
#[derive(Default)]
pub struct MockDialer {
    inner: Mutex<MockDialerInner>,
}

#[derive(Default)]
struct MockDialerInner {
    transports: HashMap<String, MockTransport>,
    unreachable: HashSet<String>,
    responder: Option<Responder>,
    dials: usize,
}

impl MockDialer {
    /// Create a new mock dialer.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockDialerInner> {
        self.inner.lock().unwrap()
    }

    /// Install `responder` on every transport this dialer creates.
    pub fn with_responder(self, responder: Responder) -> Self {
        self.lock().responder = Some(responder);
        self
    }

    /// The transport for `address`, created on first use.
    ///
    /// Lets a test program a node's transport before (or after) it is dialed.
    pub fn transport(&self, address: &str) -> MockTransport {
        let mut inner = self.lock();
        let responder = inner.responder.clone();
        inner
            .transports
            .entry(address.to_string())
            .or_insert_with(|| {
                let transport = MockTransport::new();
                if let Some(responder) = responder {
                    transport.set_responder(responder);
                }
                transport
            })
            .clone()
    }

    /// Make every dial of `address` fail.
    pub fn set_unreachable(&self, address: &str) {
        self.lock().unreachable.insert(address.to_string());
    }

    /// Number of dial attempts so far.
    pub fn dial_count(&self) -> usize {
        self.lock().dials
    }
}

#[async_trait]
impl Dialer for MockDialer {
    async fn dial(&self, address: &str) -> Result<Arc<dyn Transport>, TransportError> {
        {
            let mut inner = self.lock();
            inner.dials += 1;
            if inner.unreachable.contains(address) {
                return Err(TransportError::ConnectionFailed(format!(
                    "{} is unreachable",
                    address
                )));
            }
        }

        let transport = self.transport(address);
        transport.connect(address).await?;
        Ok(Arc::new(transport))
    }
}
