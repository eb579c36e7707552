//! Outbound frames held while no channel is open.

use std::{collections::VecDeque, ops::Sub, time::Duration};

use collab_proto::Frame;

use crate::transport::{Channel, TransportError};

/// A frame waiting for a channel.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingMessage<I> {
    /// Frame to transmit.
    pub frame: Frame,
    /// When the frame was queued.
    pub enqueued_at: I,
}

/// Strict FIFO of frames accepted while disconnected.
///
/// # Invariants
///
/// - Frames leave in the order they were enqueued.
/// - A frame is transmitted at most once per successful `flush`; a frame
///   that failed to transmit goes back to the front with everything behind
///   it.
/// - Duplicates are legal and preserved.
#[derive(Debug, Clone)]
pub struct PendingQueue<I> {
    messages: VecDeque<PendingMessage<I>>,
}

impl<I> Default for PendingQueue<I> {
    fn default() -> Self {
        Self { messages: VecDeque::new() }
    }
}

impl<I: Copy> PendingQueue<I> {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `frame`.
    pub fn enqueue(&mut self, frame: Frame, now: I) {
        self.messages.push_back(PendingMessage { frame, enqueued_at: now });
    }

    /// Insert `frame` ahead of everything queued.
    pub fn enqueue_front(&mut self, frame: Frame, now: I) {
        self.messages.push_front(PendingMessage { frame, enqueued_at: now });
    }

    /// Transmit every queued frame in order on `channel`.
    ///
    /// Returns the number of frames sent. On a transmit failure the failed
    /// frame and all frames behind it stay queued, in order.
    ///
    /// Frames that cannot be encoded are dropped with a warning, since no
    /// later flush could send them either.
    pub fn flush<C: Channel>(&mut self, channel: &mut C) -> Result<usize, TransportError> {
        let mut sent = 0;

        while let Some(message) = self.messages.pop_front() {
            let text = match message.frame.encode() {
                Ok(text) => text,
                Err(e) => {
                    tracing::warn!(
                        event_type = message.frame.event_type(),
                        "dropping unencodable frame: {e}"
                    );
                    continue;
                },
            };

            if let Err(e) = channel.send_text(&text) {
                self.messages.push_front(message);
                tracing::debug!(sent, remaining = self.messages.len(), "flush interrupted");
                return Err(e);
            }

            sent += 1;
        }

        Ok(sent)
    }

    /// Number of queued frames.
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Whether nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Drop every queued frame.
    pub fn clear(&mut self) {
        self.messages.clear();
    }

    /// Keep only frames for which `keep` is true, in order. Returns how many
    /// were dropped.
    pub fn retain(&mut self, mut keep: impl FnMut(&Frame) -> bool) -> usize {
        let before = self.messages.len();
        self.messages.retain(|message| keep(&message.frame));
        before - self.messages.len()
    }

    /// Queued messages, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &PendingMessage<I>> {
        self.messages.iter()
    }

    /// How long the oldest message has waited.
    pub fn oldest_age(&self, now: I) -> Option<Duration>
    where
        I: Sub<Output = Duration>,
    {
        self.messages.front().map(|message| now - message.enqueued_at)
    }
}
