//! Bounded blocking handoff between the receive path and protocol consumers
//!
//! Mirrors the classic fixed-size mailbox of an RTOS abstraction layer: one
//! mutex, ring cursors, and condition variables re-checked in a loop so
//! spurious wakeups are harmless. This queue is the only cross-thread handoff
//! point in the crate; the [`Bus`](crate::Bus) tables carry no lock of their
//! own and are serialized by the caller.

use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::Instant;

use bytes::Bytes;
use thiserror::Error;
use tracing::trace;

use crate::Timeout;

/// A received mailbox datagram tagged for dispatch
///
/// Ownership moves into the queue on post and back out on fetch; the payload
/// is never copied by the queue itself.
#[derive(Debug, Clone)]
pub struct MailboxMessage {
    /// Index of the slave the datagram was read from
    pub slave: u16,
    /// Mailbox sub-protocol tag, one of the [`mbx_prot`](crate::mbx_prot) bits
    pub protocol: u8,
    /// Raw mailbox payload
    pub payload: Bytes,
}

/// The queue was still full when the timeout elapsed; carries the rejected
/// message back to the caller
#[derive(Debug, Error)]
#[error("mailbox queue post timed out")]
pub struct PostTimeout<T>(pub T);

/// The queue was still empty when the timeout elapsed
#[derive(Debug, Copy, Clone, Eq, PartialEq, Error)]
#[error("mailbox queue fetch timed out")]
pub struct FetchTimeout;

/// Bounded, strictly FIFO, blocking MPMC queue
///
/// `post` blocks while full and `fetch` blocks while empty, each up to a
/// caller-supplied [`Timeout`]. There is no priority and no internal retry;
/// operations complete or time out.
#[derive(Debug)]
pub struct MailboxQueue<T> {
    state: Mutex<State<T>>,
    not_full: Condvar,
    not_empty: Condvar,
}

#[derive(Debug)]
struct State<T> {
    slots: Box<[Option<T>]>,
    read: usize,
    write: usize,
    count: usize,
}

impl<T> MailboxQueue<T> {
    /// Create a queue holding at most `capacity` messages
    ///
    /// # Panics
    ///
    /// If `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "mailbox queue capacity must be nonzero");
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self {
            state: Mutex::new(State {
                slots: slots.into_boxed_slice(),
                read: 0,
                write: 0,
                count: 0,
            }),
            not_full: Condvar::new(),
            not_empty: Condvar::new(),
        }
    }

    /// Maximum number of queued messages
    pub fn capacity(&self) -> usize {
        self.state.lock().unwrap().slots.len()
    }

    /// Number of messages currently queued
    pub fn len(&self) -> usize {
        self.state.lock().unwrap().count
    }

    /// Whether the queue is currently empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append `msg`, blocking until a slot frees or `timeout` elapses
    ///
    /// On timeout the message is handed back inside the error.
    pub fn post(&self, msg: T, timeout: Timeout) -> Result<(), PostTimeout<T>> {
        let deadline = timeout.deadline_from(Instant::now());
        let mut state = self.state.lock().unwrap();
        while state.count == state.slots.len() {
            let (next, timed_out) = wait_until(&self.not_full, state, deadline);
            state = next;
            if timed_out && state.count == state.slots.len() {
                return Err(PostTimeout(msg));
            }
        }
        let w = state.write;
        debug_assert!(state.slots[w].is_none());
        state.slots[w] = Some(msg);
        state.write = (w + 1) % state.slots.len();
        state.count += 1;
        drop(state);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Remove the oldest message, blocking until one arrives or `timeout`
    /// elapses
    pub fn fetch(&self, timeout: Timeout) -> Result<T, FetchTimeout> {
        let deadline = timeout.deadline_from(Instant::now());
        let mut state = self.state.lock().unwrap();
        while state.count == 0 {
            let (next, timed_out) = wait_until(&self.not_empty, state, deadline);
            state = next;
            if timed_out && state.count == 0 {
                trace!("mailbox fetch timed out");
                return Err(FetchTimeout);
            }
        }
        let r = state.read;
        let msg = state.slots[r].take().expect("count was nonzero");
        state.read = (r + 1) % state.slots.len();
        state.count -= 1;
        drop(state);
        self.not_full.notify_one();
        Ok(msg)
    }
}

/// Block on `cv` until woken or `deadline` passes; the caller re-checks its
/// predicate either way
fn wait_until<'a, T>(
    cv: &Condvar,
    guard: MutexGuard<'a, State<T>>,
    deadline: Option<Instant>,
) -> (MutexGuard<'a, State<T>>, bool) {
    match deadline {
        None => (cv.wait(guard).unwrap(), false),
        Some(deadline) => {
            let now = Instant::now();
            if now >= deadline {
                return (guard, true);
            }
            let (guard, _) = cv.wait_timeout(guard, deadline - now).unwrap();
            (guard, Instant::now() >= deadline)
        }
    }
}
