use core::fmt;

use super::{Headers, Kind};
use crate::buffers::Appendable;

/// A parsed or to-be-emitted protocol frame.
///
/// Every variable-length field is an [`Appendable`] that survives recycling:
/// [`reset`](Self::reset) zeroes the lengths and sets a new kind but keeps
/// the allocations, so a `Message` cycling through the subscriber's free
/// pool stops allocating once its buffers have grown to the working set.
///
/// Field population follows the frame grammar:
/// - `subject`, `sid`, `reply_to`, `queue` are filled for the kinds whose
///   control line carries them and empty otherwise.
/// - `headers` is populated only for [`Kind::HPub`] and [`Kind::HMsg`].
/// - `payload` is populated only for [`Kind::Pub`], [`Kind::HPub`],
///   [`Kind::Msg`] and [`Kind::HMsg`].
/// - `args` holds the control-line remainder of [`Kind::Info`],
///   [`Kind::Connect`] (the JSON document) and [`Kind::Err`] (the reason,
///   quotes stripped).
#[derive(Default, Clone, PartialEq, Eq)]
pub struct Message {
    kind: Kind,
    subject: Appendable,
    sid: Appendable,
    reply_to: Appendable,
    queue: Appendable,
    args: Appendable,
    headers: Headers,
    payload: Appendable,
}

impl Message {
    /// Creates an empty message of kind [`Kind::Unknown`].
    ///
    /// No storage is allocated; fields allocate lazily as they are filled.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            kind: Kind::Unknown,
            subject: Appendable::new(),
            sid: Appendable::new(),
            reply_to: Appendable::new(),
            queue: Appendable::new(),
            args: Appendable::new(),
            headers: Headers::new(),
            payload: Appendable::new(),
        }
    }

    /// The frame kind.
    pub fn kind(&self) -> Kind {
        self.kind
    }

    /// The subject, when the kind carries one.
    pub fn subject(&self) -> Option<&[u8]> {
        self.subject.body()
    }

    /// The subscription id, when the kind carries one.
    pub fn sid(&self) -> Option<&[u8]> {
        self.sid.body()
    }

    /// The reply subject, when present.
    pub fn reply_to(&self) -> Option<&[u8]> {
        self.reply_to.body()
    }

    /// The queue group of a SUB frame, when present.
    pub fn queue(&self) -> Option<&[u8]> {
        self.queue.body()
    }

    /// The control-line remainder of INFO/CONNECT/ERR frames.
    pub fn args(&self) -> Option<&[u8]> {
        self.args.body()
    }

    /// The header block. Borrowed; never copied out of the message.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// The payload, absent when zero-length.
    pub fn payload(&self) -> Option<&[u8]> {
        self.payload.body()
    }

    /// Clears every field and stamps a new kind.
    ///
    /// Backing allocations are retained for reuse.
    pub fn reset(&mut self, kind: Kind) {
        self.kind = kind;
        self.subject.clear();
        self.sid.clear();
        self.reply_to.clear();
        self.queue.clear();
        self.args.clear();
        self.headers.reset();
        self.payload.clear();
    }

    /// Releases the backing storage of every field.
    pub fn free(&mut self) {
        self.kind = Kind::Unknown;
        self.subject.free();
        self.sid.free();
        self.reply_to.free();
        self.queue.free();
        self.args.free();
        self.headers.free();
        self.payload.free();
    }

    pub(crate) fn subject_mut(&mut self) -> &mut Appendable {
        &mut self.subject
    }

    pub(crate) fn sid_mut(&mut self) -> &mut Appendable {
        &mut self.sid
    }

    pub(crate) fn reply_to_mut(&mut self) -> &mut Appendable {
        &mut self.reply_to
    }

    pub(crate) fn queue_mut(&mut self) -> &mut Appendable {
        &mut self.queue
    }

    pub(crate) fn args_mut(&mut self) -> &mut Appendable {
        &mut self.args
    }

    pub(crate) fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    pub(crate) fn payload_mut(&mut self) -> &mut Appendable {
        &mut self.payload
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let lossy = |buf: Option<&[u8]>| String::from_utf8_lossy(buf.unwrap_or(&[])).into_owned();
        f.debug_struct("Message")
            .field("kind", &self.kind)
            .field("subject", &lossy(self.subject()))
            .field("sid", &lossy(self.sid()))
            .field("reply_to", &lossy(self.reply_to()))
            .field("payload_len", &self.payload.len())
            .finish_non_exhaustive()
    }
}
