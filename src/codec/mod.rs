//! Wire codec for the text-framed protocol.
//!
//! [`parser`] turns transport bytes into [`Message`](crate::Message)s one
//! frame at a time; [`formatter`] renders client-emitted frames into a
//! reusable buffer. Both sides treat control lines as ASCII and bodies as
//! opaque bytes.

pub(crate) mod formatter;
pub(crate) mod parser;

pub use parser::DecodeError;
pub(crate) use parser::FrameDecoder;

pub(crate) use formatter::Formatter;
