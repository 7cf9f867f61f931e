// In-memory link used for dry runs and tests.

use std::collections::VecDeque;
use std::io;

use crate::error::InterceptorError;

use super::LinkSocket;

type Responder = Box<dyn FnMut(&[u8]) -> Vec<Vec<u8>> + Send>;

/// A `LinkSocket` that records sent frames and replays queued ones.
///
/// An optional responder sees every sent frame and may queue replies,
/// which lets ARP and ICMP exchanges run without a real network.
pub struct MemoryLink {
    name: String,
    sent: Vec<Vec<u8>>,
    inbound: VecDeque<Vec<u8>>,
    responder: Option<Responder>,
    recv_error: Option<String>,
}

impl MemoryLink {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            sent: Vec::new(),
            inbound: VecDeque::new(),
            responder: None,
            recv_error: None,
        }
    }

    pub fn with_responder<F>(mut self, responder: F) -> Self
    where
        F: FnMut(&[u8]) -> Vec<Vec<u8>> + Send + 'static,
    {
        self.responder = Some(Box::new(responder));
        self
    }

    pub fn push_inbound(&mut self, frame: Vec<u8>) {
        self.inbound.push_back(frame);
    }

    /// Frames sent so far, oldest first.
    pub fn sent(&self) -> &[Vec<u8>] {
        &self.sent
    }

    /// Make the next receive fail with a non-transient error.
    pub fn fail_next_recv(&mut self, reason: &str) {
        self.recv_error = Some(reason.to_string());
    }
}

impl LinkSocket for MemoryLink {
    fn interface_name(&self) -> &str {
        &self.name
    }

    fn send_frame(&mut self, frame: &[u8]) -> Result<(), InterceptorError> {
        self.sent.push(frame.to_vec());
        if let Some(responder) = self.responder.as_mut() {
            self.inbound.extend(responder(frame));
        }
        Ok(())
    }

    fn try_recv_frame(&mut self, buf: &mut [u8]) -> Result<Option<usize>, InterceptorError> {
        if let Some(reason) = self.recv_error.take() {
            return Err(InterceptorError::Socket {
                interface: self.name.clone(),
                source: io::Error::other(reason),
            });
        }
        Ok(self.inbound.pop_front().map(|frame| {
            let n = frame.len().min(buf.len());
            buf[..n].copy_from_slice(&frame[..n]);
            n
        }))
    }
}
