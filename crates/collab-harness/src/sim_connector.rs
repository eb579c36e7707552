//! Recording in-memory transport.
//!
//! `SimConnector` never produces events on its own. A test opens, closes or
//! fails the channel by handing [`ChannelEvent`]s to the session, and
//! inspects what the session tried to do through the recorded log.

use std::{cell::RefCell, collections::VecDeque, rc::Rc};

use collab_core::{Channel, ConnectTarget, Connector, Generation, TransportError};
use collab_proto::{CloseCode, Frame};

#[derive(Debug, Default)]
struct Log {
    targets: Vec<(Generation, ConnectTarget)>,
    sent: Vec<(Generation, String)>,
    closes: Vec<(Generation, CloseCode, String)>,
    open_failures: VecDeque<TransportError>,
    send_failures: usize,
}

/// Connector that records instead of connecting.
///
/// Clones share the log.
#[derive(Debug, Clone, Default)]
pub struct SimConnector {
    log: Rc<RefCell<Log>>,
}

impl SimConnector {
    /// Connector with an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `open` fail synchronously with `error`.
    pub fn fail_next_open(&self, error: TransportError) {
        self.log.borrow_mut().open_failures.push_back(error);
    }

    /// Make the next `count` sends fail.
    pub fn fail_next_sends(&self, count: usize) {
        self.log.borrow_mut().send_failures = count;
    }

    /// Every target opened, in order.
    pub fn targets(&self) -> Vec<ConnectTarget> {
        self.log.borrow().targets.iter().map(|(_, t)| t.clone()).collect()
    }

    /// URLs opened, in order.
    pub fn urls(&self) -> Vec<String> {
        self.log.borrow().targets.iter().map(|(_, t)| t.url().to_string()).collect()
    }

    /// Number of channels opened.
    pub fn open_count(&self) -> usize {
        self.log.borrow().targets.len()
    }

    /// Generation of the most recently opened channel.
    pub fn last_generation(&self) -> Option<Generation> {
        self.log.borrow().targets.last().map(|(g, _)| *g)
    }

    /// Raw text payloads transmitted, in order.
    pub fn sent_texts(&self) -> Vec<String> {
        self.log.borrow().sent.iter().map(|(_, text)| text.clone()).collect()
    }

    /// Transmitted payloads decoded back to frames. Undecodable payloads
    /// are skipped.
    pub fn sent_frames(&self) -> Vec<Frame> {
        self.log.borrow().sent.iter().filter_map(|(_, text)| Frame::decode(text).ok()).collect()
    }

    /// Frames transmitted on channel `generation`.
    pub fn sent_frames_on(&self, generation: Generation) -> Vec<Frame> {
        self.log
            .borrow()
            .sent
            .iter()
            .filter(|(g, _)| *g == generation)
            .filter_map(|(_, text)| Frame::decode(text).ok())
            .collect()
    }

    /// Close handshakes started by the client.
    pub fn closes(&self) -> Vec<(Generation, CloseCode, String)> {
        self.log.borrow().closes.clone()
    }
}

impl Connector for SimConnector {
    type Channel = SimChannel;

    fn open(
        &mut self,
        target: &ConnectTarget,
        generation: Generation,
    ) -> Result<SimChannel, TransportError> {
        let mut log = self.log.borrow_mut();
        log.targets.push((generation, target.clone()));

        if let Some(error) = log.open_failures.pop_front() {
            return Err(error);
        }

        Ok(SimChannel { generation, log: Rc::clone(&self.log) })
    }
}

/// Channel handle backed by the connector's log.
#[derive(Debug)]
pub struct SimChannel {
    generation: Generation,
    log: Rc<RefCell<Log>>,
}

impl Channel for SimChannel {
    fn send_text(&mut self, text: &str) -> Result<(), TransportError> {
        let mut log = self.log.borrow_mut();
        if log.send_failures > 0 {
            log.send_failures -= 1;
            return Err(TransportError::Send { reason: "simulated drop".to_string() });
        }
        log.sent.push((self.generation, text.to_string()));
        Ok(())
    }

    fn close(&mut self, code: CloseCode, reason: &str) {
        self.log.borrow_mut().closes.push((self.generation, code, reason.to_string()));
    }
}
