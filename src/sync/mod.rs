//! Synchronization primitives shared by the subscriber runtime.

pub(crate) mod mailbox;

pub use mailbox::{Mailbox, RecvError, SendError};
