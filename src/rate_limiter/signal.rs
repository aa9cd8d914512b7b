//! Advisory "capacity changed" broadcasts.
//!
//! Signals are hints. A receiver must re-check
//! [`RateLimiter::at_rate_limit`](crate::RateLimiter::at_rate_limit) under
//! the lock before acting on one.

use std::sync::mpsc::{self, Receiver, Sender};
use tracing::debug;

/// Change in the limiter's capacity, as seen by external observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LimitSignal {
    /// Capacity might have freed up (a delayed re-check fired).
    MayHaveLifted,
    /// The limiter went from at-limit to below the limit.
    Lifted,
}

/// Fan-out of signals to every live subscriber.
#[derive(Debug, Default)]
pub(crate) struct SignalHub {
    subscribers: Vec<Sender<LimitSignal>>,
}

impl SignalHub {
    pub(crate) fn subscribe(&mut self) -> Receiver<LimitSignal> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.push(tx);
        rx
    }

    /// Sends `signal` to every subscriber, dropping the ones that hung up.
    pub(crate) fn publish(&mut self, signal: LimitSignal) -> usize {
        let before = self.subscribers.len();
        self.subscribers.retain(|tx| tx.send(signal).is_ok());
        let dropped = before - self.subscribers.len();
        if dropped > 0 {
            debug!("Dropped {} disconnected signal subscribers", dropped);
        }
        self.subscribers.len()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.subscribers.len()
    }

    /// Disconnects every subscriber.
    pub(crate) fn clear(&mut self) {
        self.subscribers.clear();
    }
}
