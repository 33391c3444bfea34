//! Scripted transport
//!
//! Plays the adapter side of a conversation: bytes can be queued up front,
//! or produced by a responder closure each time something is sent. Every
//! queued chunk is delivered by its own `receive` call (split further when
//! a read limit is set), which exercises partial-read handling.

use bytes::{Buf, Bytes};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use super::{PortConfig, Transport};
use crate::protocol::ProtocolError;

type Responder = Box<dyn FnMut(&[u8]) -> Vec<Vec<u8>> + Send>;

#[derive(Default)]
struct MockState {
    config: Option<PortConfig>,
    sent: Vec<Vec<u8>>,
    incoming: VecDeque<Bytes>,
    timeout: Option<Duration>,
    failing_sends: usize,
    max_read: Option<usize>,
    discards: usize,
}

/// Inspection handle that stays valid after the transport is moved
#[derive(Clone)]
pub struct MockHandle {
    state: Arc<Mutex<MockState>>,
}

fn lock(state: &Mutex<MockState>) -> MutexGuard<'_, MockState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MockHandle {
    /// Every buffer written so far, in order
    pub fn sent(&self) -> Vec<Vec<u8>> {
        lock(&self.state).sent.clone()
    }

    /// Forget recorded writes
    pub fn clear_sent(&self) {
        lock(&self.state).sent.clear();
    }

    /// Queue bytes for the next `receive`
    pub fn enqueue(&self, bytes: impl AsRef<[u8]>) {
        lock(&self.state)
            .incoming
            .push_back(Bytes::copy_from_slice(bytes.as_ref()));
    }

    /// Make the next `count` sends fail
    pub fn fail_next_sends(&self, count: usize) {
        lock(&self.state).failing_sends = count;
    }

    /// Limit how many bytes one `receive` returns
    pub fn set_max_read(&self, max_read: usize) {
        lock(&self.state).max_read = Some(max_read.max(1));
    }

    /// Configuration passed to `open`, if open
    pub fn config(&self) -> Option<PortConfig> {
        lock(&self.state).config
    }

    /// True while open
    pub fn is_open(&self) -> bool {
        lock(&self.state).config.is_some()
    }

    /// Timeout last set on the transport
    pub fn timeout(&self) -> Option<Duration> {
        lock(&self.state).timeout
    }

    /// Number of `discard_buffers` calls
    pub fn discard_count(&self) -> usize {
        lock(&self.state).discards
    }
}

/// Transport that replays scripted adapter output
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
    responder: Option<Responder>,
}

impl MockTransport {
    /// Transport with nothing scripted
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState::default())),
            responder: None,
        }
    }

    /// Transport that answers each send with the chunks `responder` returns
    pub fn with_responder<F>(responder: F) -> Self
    where
        F: FnMut(&[u8]) -> Vec<Vec<u8>> + Send + 'static,
    {
        Self {
            state: Arc::new(Mutex::new(MockState::default())),
            responder: Some(Box::new(responder)),
        }
    }

    /// Inspection handle
    pub fn handle(&self) -> MockHandle {
        MockHandle {
            state: Arc::clone(&self.state),
        }
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for MockTransport {
    fn open(&mut self, config: &PortConfig) -> Result<(), ProtocolError> {
        lock(&self.state).config = Some(*config);
        Ok(())
    }

    fn send(&mut self, bytes: &[u8]) -> Result<(), ProtocolError> {
        {
            let mut state = lock(&self.state);
            if state.config.is_none() {
                return Err(ProtocolError::NotConnected);
            }
            if state.failing_sends > 0 {
                state.failing_sends -= 1;
                return Err(ProtocolError::TransportError("scripted send failure".into()));
            }
            state.sent.push(bytes.to_vec());
        }
        if let Some(responder) = self.responder.as_mut() {
            let replies = responder(bytes);
            let mut state = lock(&self.state);
            state
                .incoming
                .extend(replies.into_iter().map(Bytes::from));
        }
        Ok(())
    }

    fn receive(&mut self, buffer: &mut [u8]) -> Result<usize, ProtocolError> {
        let mut state = lock(&self.state);
        if state.config.is_none() {
            return Err(ProtocolError::NotConnected);
        }
        let limit = state.max_read.unwrap_or(usize::MAX).min(buffer.len());
        let Some(chunk) = state.incoming.front_mut() else {
            return Err(ProtocolError::Timeout);
        };
        let count = limit.min(chunk.len());
        buffer[..count].copy_from_slice(&chunk[..count]);
        chunk.advance(count);
        if chunk.is_empty() {
            state.incoming.pop_front();
        }
        Ok(count)
    }

    fn discard_buffers(&mut self) -> Result<(), ProtocolError> {
        let mut state = lock(&self.state);
        state.incoming.clear();
        state.discards += 1;
        Ok(())
    }

    fn queued_byte_count(&mut self) -> Result<usize, ProtocolError> {
        Ok(lock(&self.state).incoming.iter().map(Bytes::len).sum())
    }

    fn set_timeout(&mut self, timeout: Duration) -> Result<(), ProtocolError> {
        lock(&self.state).timeout = Some(timeout);
        Ok(())
    }

    fn close(&mut self) {
        lock(&self.state).config = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunks_arrive_separately() {
        let mut transport = MockTransport::new();
        let handle = transport.handle();
        transport.open(&PortConfig::Plain).unwrap();
        handle.enqueue([0x01u8, 0x02, 0x03]);
        handle.enqueue([0x04u8]);
        handle.set_max_read(2);

        let mut buffer = [0u8; 16];
        assert_eq!(transport.queued_byte_count().unwrap(), 4);
        assert_eq!(transport.receive(&mut buffer).unwrap(), 2);
        assert_eq!(transport.receive(&mut buffer).unwrap(), 1);
        assert_eq!(buffer[0], 0x03);
        assert_eq!(transport.receive(&mut buffer).unwrap(), 1);
        assert!(matches!(transport.receive(&mut buffer), Err(ProtocolError::Timeout)));
    }

    #[test]
    fn test_responder_and_failures() {
        let mut transport = MockTransport::with_responder(|sent| vec![sent.iter().rev().copied().collect()]);
        let handle = transport.handle();
        assert!(matches!(transport.send(&[1]), Err(ProtocolError::NotConnected)));

        transport.open(&PortConfig::Plain).unwrap();
        handle.fail_next_sends(1);
        assert!(transport.send(&[1, 2]).is_err());
        transport.send(&[1, 2]).unwrap();
        assert_eq!(handle.sent(), vec![vec![1, 2]]);

        let mut buffer = [0u8; 4];
        assert_eq!(transport.receive(&mut buffer).unwrap(), 2);
        assert_eq!(&buffer[..2], &[2, 1]);
    }

    #[test]
    fn test_discard_and_close() {
        let mut transport = MockTransport::new();
        let handle = transport.handle();
        transport.open(&PortConfig::Plain).unwrap();
        handle.enqueue(b"stale");
        transport.discard_buffers().unwrap();
        assert_eq!(transport.queued_byte_count().unwrap(), 0);
        assert_eq!(handle.discard_count(), 1);
        transport.close();
        assert!(!handle.is_open());
    }
}
