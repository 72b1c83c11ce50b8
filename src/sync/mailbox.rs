use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use event_listener::{Event, IntoNotification};
use thiserror::Error;

/// Error returned when sending into a closed or saturated mailbox.
///
/// Carries the rejected value so the sender can recycle it.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("the mailbox has been closed")]
pub struct SendError<T>(pub T);

/// Error returned when a timed receive fails.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum RecvError {
    /// No value arrived within the deadline.
    ///
    /// Not terminal; a later receive may succeed.
    #[error("timed out waiting for a value")]
    Timeout,

    /// The mailbox is closed and fully drained.
    #[error("the mailbox has been closed")]
    Closed,
}

enum TrySend<T> {
    Full(T),
    Closed(T),
}

enum TryRecv<T> {
    Item(T),
    Empty,
    Closed,
}

struct Inner<T> {
    state: Mutex<State<T>>,
    /// Signalled after every push; receivers listen on it.
    on_push: Event,
    /// Signalled after every pop; blocked senders listen on it.
    on_pop: Event,
}

struct State<T> {
    queue: VecDeque<T>,
    closed: bool,
}

/// A thread-safe bounded FIFO with blocking send and timed receive.
///
/// `Mailbox` is the handoff point between the subscriber's reader task and
/// its consumer: one instance carries decoded messages toward the caller,
/// another recycles spent messages back toward the reader. Cloning a
/// `Mailbox` clones a handle; all clones share the same queue.
///
/// A full mailbox blocks senders until space is freed, which is how
/// backpressure propagates from a slow consumer down to the transport.
/// After [`close`](Self::close), sends fail immediately while receivers
/// drain whatever is buffered before seeing [`RecvError::Closed`].
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use gnat::sync::{Mailbox, RecvError};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let mailbox = Mailbox::new(4);
/// mailbox.send(1u32).await.unwrap();
/// mailbox.send(2u32).await.unwrap();
///
/// assert_eq!(mailbox.receive(Duration::from_millis(10)).await, Ok(1));
/// assert_eq!(mailbox.receive(Duration::from_millis(10)).await, Ok(2));
/// assert_eq!(
///     mailbox.receive(Duration::from_millis(10)).await,
///     Err(RecvError::Timeout)
/// );
/// # }
/// ```
pub struct Mailbox<T> {
    inner: Arc<Inner<T>>,
    capacity: usize,
}

impl<T> Clone for Mailbox<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            capacity: self.capacity,
        }
    }
}

impl<T> std::fmt::Debug for Mailbox<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mailbox")
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}

impl<T> Mailbox<T> {
    /// Creates a mailbox holding at most `capacity` values.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "mailbox capacity must be non-zero");
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    queue: VecDeque::new(),
                    closed: false,
                }),
                on_push: Event::new(),
                on_pop: Event::new(),
            }),
            capacity,
        }
    }

    /// Creates a mailbox without a practical capacity bound.
    #[must_use]
    pub fn unbounded() -> Self {
        Self::new(usize::MAX)
    }

    /// Sends a value, waiting for space when the mailbox is full.
    ///
    /// # Errors
    ///
    /// Returns the value inside [`SendError`] if the mailbox is closed.
    pub async fn send(&self, value: T) -> Result<(), SendError<T>> {
        let mut value = match self.push(value) {
            Ok(()) => return Ok(()),
            Err(TrySend::Closed(v)) => return Err(SendError(v)),
            Err(TrySend::Full(v)) => v,
        };
        loop {
            let listener = self.inner.on_pop.listen();
            // Re-check between registering and waiting, otherwise a pop that
            // happened in the gap would be missed.
            value = match self.push(value) {
                Ok(()) => return Ok(()),
                Err(TrySend::Closed(v)) => return Err(SendError(v)),
                Err(TrySend::Full(v)) => v,
            };
            listener.await;
            value = match self.push(value) {
                Ok(()) => return Ok(()),
                Err(TrySend::Closed(v)) => return Err(SendError(v)),
                Err(TrySend::Full(v)) => v,
            };
        }
    }

    /// Sends without waiting.
    ///
    /// # Errors
    ///
    /// Returns the value inside [`SendError`] if the mailbox is closed or
    /// currently full.
    pub fn try_send(&self, value: T) -> Result<(), SendError<T>> {
        self.push(value)
            .map_err(|e| match e {
                TrySend::Full(v) | TrySend::Closed(v) => SendError(v),
            })
    }

    /// Receives the next value, waiting up to `timeout`.
    ///
    /// # Errors
    ///
    /// [`RecvError::Timeout`] if nothing arrived in time,
    /// [`RecvError::Closed`] if the mailbox is closed and drained.
    pub async fn receive(&self, timeout: Duration) -> Result<T, RecvError> {
        match tokio::time::timeout(timeout, self.receive_inner()).await {
            Ok(result) => result,
            Err(_) => Err(RecvError::Timeout),
        }
    }

    /// Receives without waiting, draining buffered values even after close.
    pub fn try_receive(&self) -> Option<T> {
        match self.pop() {
            TryRecv::Item(value) => Some(value),
            TryRecv::Empty | TryRecv::Closed => None,
        }
    }

    /// Closes the mailbox.
    ///
    /// Senders fail from this point on; receivers drain the remaining
    /// values and then observe [`RecvError::Closed`]. Idempotent.
    pub fn close(&self) {
        {
            let mut state = self.lock();
            state.closed = true;
        }
        self.inner.on_push.notify(usize::MAX.additional());
        self.inner.on_pop.notify(usize::MAX.additional());
    }

    /// Returns `true` once [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Number of values currently buffered.
    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    /// Returns `true` if no values are buffered.
    pub fn is_empty(&self) -> bool {
        self.lock().queue.is_empty()
    }

    async fn receive_inner(&self) -> Result<T, RecvError> {
        loop {
            match self.pop() {
                TryRecv::Item(value) => return Ok(value),
                TryRecv::Closed => return Err(RecvError::Closed),
                TryRecv::Empty => {}
            }
            let listener = self.inner.on_push.listen();
            match self.pop() {
                TryRecv::Item(value) => return Ok(value),
                TryRecv::Closed => return Err(RecvError::Closed),
                TryRecv::Empty => listener.await,
            }
        }
    }

    fn push(&self, value: T) -> Result<(), TrySend<T>> {
        let mut state = self.lock();
        if state.closed {
            return Err(TrySend::Closed(value));
        }
        if state.queue.len() >= self.capacity {
            return Err(TrySend::Full(value));
        }
        state.queue.push_back(value);
        drop(state);
        self.inner.on_push.notify(1.additional());
        Ok(())
    }

    fn pop(&self) -> TryRecv<T> {
        let mut state = self.lock();
        match state.queue.pop_front() {
            Some(value) => {
                drop(state);
                self.inner.on_pop.notify(1.additional());
                TryRecv::Item(value)
            }
            None if state.closed => TryRecv::Closed,
            None => TryRecv::Empty,
        }
    }

    fn lock(&self) -> MutexGuard<'_, State<T>> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
