//! Bounded outbound queue owned by a connection.
//!
//! Producers push serialized messages; a single drain task pops them in FIFO
//! order. When the queue is full the configured [`OverflowPolicy`] decides
//! what happens to the new message.

use crate::error::PublishError;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use vemo_core::OverflowPolicy;

/// A message waiting to be handed to the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub channel: String,
    pub payload: Vec<u8>,
}

/// Result of a successful push
#[derive(Debug, PartialEq, Eq)]
pub enum PushOutcome {
    Queued,
    /// Queued after evicting the oldest message
    Evicted(OutboundMessage),
    /// The queue stayed full for the whole wait
    TimedOut,
}

#[derive(Debug, Default)]
struct QueueState {
    items: VecDeque<OutboundMessage>,
    closed: bool,
}

#[derive(Debug)]
pub struct OutboundQueue {
    state: Mutex<QueueState>,
    capacity: usize,
    policy: OverflowPolicy,
    not_empty: Notify,
    not_full: Notify,
}

impl OutboundQueue {
    pub fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            capacity: capacity.max(1),
            policy,
            not_empty: Notify::new(),
            not_full: Notify::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }

    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Push a message, applying the overflow policy when full.
    ///
    /// `wait` bounds how long the `Block` policy waits for space.
    pub async fn push(
        &self,
        message: OutboundMessage,
        wait: Duration,
    ) -> Result<PushOutcome, PublishError> {
        let deadline = Instant::now() + wait;
        let mut pending = Some(message);

        loop {
            let space = self.not_full.notified();
            {
                let mut state = self.state.lock();
                if state.closed {
                    return Err(PublishError::Closed);
                }
                if state.items.len() < self.capacity {
                    if let Some(message) = pending.take() {
                        state.items.push_back(message);
                    }
                    self.not_empty.notify_one();
                    return Ok(PushOutcome::Queued);
                }
                match self.policy {
                    OverflowPolicy::Reject => {
                        return Err(PublishError::QueueFull {
                            capacity: self.capacity,
                        })
                    }
                    OverflowPolicy::DropOldest => {
                        let evicted = state.items.pop_front();
                        if let Some(message) = pending.take() {
                            state.items.push_back(message);
                        }
                        self.not_empty.notify_one();
                        return Ok(match evicted {
                            Some(old) => PushOutcome::Evicted(old),
                            None => PushOutcome::Queued,
                        });
                    }
                    OverflowPolicy::Block => {}
                }
            }

            if tokio::time::timeout_at(deadline, space).await.is_err() {
                return Ok(PushOutcome::TimedOut);
            }
        }
    }

    /// Pop the oldest message, waiting for one.
    ///
    /// Returns `None` once the queue is closed and empty.
    pub async fn pop(&self) -> Option<OutboundMessage> {
        loop {
            let ready = self.not_empty.notified();
            {
                let mut state = self.state.lock();
                if let Some(message) = state.items.pop_front() {
                    self.not_full.notify_one();
                    return Some(message);
                }
                if state.closed {
                    return None;
                }
            }
            ready.await;
        }
    }

    /// Stop accepting messages; queued messages can still be popped
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.not_empty.notify_one();
        self.not_full.notify_waiters();
    }

    /// Drop every queued message, returning how many were discarded
    pub fn clear(&self) -> usize {
        let mut state = self.state.lock();
        let dropped = state.items.len();
        state.items.clear();
        self.not_full.notify_waiters();
        dropped
    }
}
