//! Mock transport for testing
//!
//! This adapter provides a simulated instrument link for exercising the
//! session engine without physical hardware. It provides:
//! - Scripted device replies, consumed in order
//! - Controllable failure injection
//! - Call logging and I/O counters for test verification
//!
//! The transport itself is handed to a session; tests keep a [`MockHandle`]
//! onto the same shared state to script replies and inspect traffic.

use super::{CommsParams, PortIdentity, PortSelector, Transport};
use crate::error::TransportError;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

#[derive(Debug, Default)]
struct MockState {
    open: bool,
    identity: PortIdentity,
    replies: VecDeque<Vec<u8>>,
    sent: Vec<Vec<u8>>,
    call_log: Vec<String>,
    opens: usize,
    closes: usize,
    sends: usize,
    receives: usize,
    fail_next_open: bool,
    fail_next_io: Option<TransportError>,
    latency: Duration,
}

/// Shared view onto a [`MockTransport`]'s state.
#[derive(Clone, Default)]
pub struct MockHandle {
    state: Arc<Mutex<MockState>>,
}

/// In-memory transport with scripted replies.
///
/// # Example
///
/// ```
/// use rust_spectro::adapters::MockTransport;
///
/// let (transport, handle) = MockTransport::new();
/// handle.push_reply(vec![0x00]);
/// assert_eq!(handle.pending_replies(), 1);
/// # drop(transport);
/// ```
pub struct MockTransport {
    handle: MockHandle,
}

impl MockTransport {
    /// Create a transport and the handle that scripts it.
    pub fn new() -> (Self, MockHandle) {
        let handle = MockHandle::default();
        (
            Self {
                handle: handle.clone(),
            },
            handle,
        )
    }

    /// Create a transport that reports the given identity when opened.
    pub fn with_identity(identity: PortIdentity) -> (Self, MockHandle) {
        let (transport, handle) = Self::new();
        handle.state().identity = identity;
        (transport, handle)
    }
}

impl MockHandle {
    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Queue one device reply.
    pub fn push_reply(&self, bytes: Vec<u8>) {
        self.state().replies.push_back(bytes);
    }

    /// Queue several device replies in order.
    pub fn push_replies<I: IntoIterator<Item = Vec<u8>>>(&self, replies: I) {
        self.state().replies.extend(replies);
    }

    /// Number of replies not yet consumed.
    pub fn pending_replies(&self) -> usize {
        self.state().replies.len()
    }

    /// Set simulated per-receive latency.
    pub fn set_latency(&self, latency: Duration) {
        self.state().latency = latency;
    }

    /// Make the next `open` fail.
    pub fn fail_next_open(&self) {
        self.state().fail_next_open = true;
    }

    /// Make the next `send` or `receive` fail with `error`.
    pub fn fail_next_io(&self, error: TransportError) {
        self.state().fail_next_io = Some(error);
    }

    /// Whether the transport is currently open.
    pub fn is_open(&self) -> bool {
        self.state().open
    }

    /// Total sends plus receives.
    pub fn io_count(&self) -> usize {
        let state = self.state();
        state.sends + state.receives
    }

    /// Number of successful opens.
    pub fn open_count(&self) -> usize {
        self.state().opens
    }

    /// Number of closes that released an open port.
    pub fn close_count(&self) -> usize {
        self.state().closes
    }

    /// Every message written so far.
    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.state().sent.clone()
    }

    /// Get the call log
    pub fn call_log(&self) -> Vec<String> {
        self.state().call_log.clone()
    }

    /// Clear the call log
    pub fn clear_log(&self) {
        self.state().call_log.clear();
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn name(&self) -> &str {
        "mock"
    }

    async fn open(
        &mut self,
        selector: &PortSelector,
        _params: &CommsParams,
        _timeout: Duration,
    ) -> Result<PortIdentity, TransportError> {
        let mut state = self.handle.state();
        state.call_log.push(format!("open: {}", selector));

        if std::mem::take(&mut state.fail_next_open) {
            return Err(TransportError::Open {
                port: selector.to_string(),
                reason: "Injected failure".to_string(),
            });
        }

        state.open = true;
        state.opens += 1;
        Ok(state.identity.clone())
    }

    async fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        let mut state = self.handle.state();
        state.sends += 1;
        state.call_log.push(format!("send: {:02x?}", bytes));

        if !state.open {
            return Err(TransportError::NotOpen);
        }
        if let Some(err) = state.fail_next_io.take() {
            return Err(err);
        }

        state.sent.push(bytes.to_vec());
        Ok(())
    }

    async fn receive(
        &mut self,
        max_len: usize,
        timeout: Duration,
    ) -> Result<Vec<u8>, TransportError> {
        let latency = {
            let mut state = self.handle.state();
            state.receives += 1;
            state.call_log.push(format!("receive: {}", max_len));
            state.latency
        };
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let mut state = self.handle.state();
        if !state.open {
            return Err(TransportError::NotOpen);
        }
        if let Some(err) = state.fail_next_io.take() {
            return Err(err);
        }

        let Some(mut reply) = state.replies.pop_front() else {
            return Err(TransportError::Timeout(timeout.as_millis() as u64));
        };
        if reply.len() > max_len {
            let rest = reply.split_off(max_len);
            state.replies.push_front(rest);
        }
        Ok(reply)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        let mut state = self.handle.state();
        state.call_log.push("close".to_string());
        if state.open {
            state.open = false;
            state.closes += 1;
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.handle.is_open()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usb0() -> PortSelector {
        PortSelector::Usb { index: 0 }
    }

    #[tokio::test]
    async fn test_mock_transport_open_close() {
        let (mut transport, handle) = MockTransport::new();
        assert!(!transport.is_open());

        transport
            .open(&usb0(), &CommsParams::default(), Duration::from_secs(1))
            .await
            .unwrap();
        assert!(handle.is_open());

        transport.close().await.unwrap();
        transport.close().await.unwrap();
        assert_eq!(handle.open_count(), 1);
        assert_eq!(handle.close_count(), 1);
    }

    #[tokio::test]
    async fn test_mock_transport_failure_injection() {
        let (mut transport, handle) = MockTransport::new();
        handle.fail_next_open();
        let result = transport
            .open(&usb0(), &CommsParams::default(), Duration::from_secs(1))
            .await;
        assert!(result.is_err());
        assert!(!handle.is_open());

        // Failure should be consumed
        let result = transport
            .open(&usb0(), &CommsParams::default(), Duration::from_secs(1))
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_mock_transport_splits_long_replies() {
        let (mut transport, handle) = MockTransport::new();
        transport
            .open(&usb0(), &CommsParams::default(), Duration::from_secs(1))
            .await
            .unwrap();
        handle.push_reply(vec![1, 2, 3, 4, 5]);

        let first = transport.receive(2, Duration::from_millis(10)).await.unwrap();
        let rest = transport.receive(10, Duration::from_millis(10)).await.unwrap();
        assert_eq!(first, vec![1, 2]);
        assert_eq!(rest, vec![3, 4, 5]);

        let err = transport.receive(1, Duration::from_millis(10)).await.unwrap_err();
        assert_eq!(err, TransportError::Timeout(10));
    }

    #[tokio::test]
    async fn test_mock_transport_counts_io() {
        let (mut transport, handle) = MockTransport::new();
        assert!(transport.send(&[0x01]).await.is_err());
        transport
            .open(&usb0(), &CommsParams::default(), Duration::from_secs(1))
            .await
            .unwrap();
        transport.send(&[0x01]).await.unwrap();
        handle.push_reply(vec![0x00]);
        transport.receive(1, Duration::from_millis(10)).await.unwrap();

        assert_eq!(handle.io_count(), 3);
        assert_eq!(handle.sent(), vec![vec![0x01]]);
        assert_eq!(handle.call_log().len(), 4);
        handle.clear_log();
        assert!(handle.call_log().is_empty());
    }
}
