use crate::{
    buffers::{Appendable, BufError},
    protocol::{headers::CRLF, Headers, Kind, Message},
};

/// The smallest valid header block: version line plus empty terminator.
const EMPTY_HEADER_BLOCK: &[u8] = b"NATS/1.0\r\n\r\n";

/// Renderer for client-emitted frames.
///
/// Every method appends exactly one complete frame to the target buffer;
/// the connection then hands the buffer to the transport in a single
/// `write_all`, which keeps frames atomic relative to other writers.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Formatter;

impl Formatter {
    pub(crate) const fn new() -> Self {
        Self
    }

    pub(crate) fn ping(self, buf: &mut Appendable) -> Result<(), BufError> {
        buf.append(b"PING\r\n")
    }

    pub(crate) fn pong(self, buf: &mut Appendable) -> Result<(), BufError> {
        buf.append(b"PONG\r\n")
    }

    pub(crate) fn connect(self, buf: &mut Appendable, json: &[u8]) -> Result<(), BufError> {
        buf.append(b"CONNECT ")?;
        buf.append(json)?;
        buf.append(CRLF)
    }

    pub(crate) fn sub(
        self,
        buf: &mut Appendable,
        subject: &[u8],
        queue: Option<&[u8]>,
        sid: &[u8],
    ) -> Result<(), BufError> {
        buf.append(b"SUB ")?;
        buf.append(subject)?;
        if let Some(queue) = queue {
            buf.append(b" ")?;
            buf.append(queue)?;
        }
        buf.append(b" ")?;
        buf.append(sid)?;
        buf.append(CRLF)
    }

    pub(crate) fn unsub(
        self,
        buf: &mut Appendable,
        sid: &[u8],
        max_msgs: Option<u64>,
    ) -> Result<(), BufError> {
        buf.append(b"UNSUB ")?;
        buf.append(sid)?;
        if let Some(max) = max_msgs {
            buf.append(b" ")?;
            buf.append_decimal(max)?;
        }
        buf.append(CRLF)
    }

    pub(crate) fn publish(
        self,
        buf: &mut Appendable,
        subject: &[u8],
        reply: Option<&[u8]>,
        payload: &[u8],
    ) -> Result<(), BufError> {
        buf.append(b"PUB ")?;
        buf.append(subject)?;
        if let Some(reply) = reply {
            buf.append(b" ")?;
            buf.append(reply)?;
        }
        buf.append(b" ")?;
        buf.append_decimal(payload.len() as u64)?;
        buf.append(CRLF)?;
        buf.append(payload)?;
        buf.append(CRLF)
    }

    pub(crate) fn hpublish(
        self,
        buf: &mut Appendable,
        subject: &[u8],
        reply: Option<&[u8]>,
        headers: &Headers,
        payload: &[u8],
    ) -> Result<(), BufError> {
        let block = headers.body().unwrap_or(EMPTY_HEADER_BLOCK);
        buf.append(b"HPUB ")?;
        buf.append(subject)?;
        if let Some(reply) = reply {
            buf.append(b" ")?;
            buf.append(reply)?;
        }
        buf.append(b" ")?;
        buf.append_decimal(block.len() as u64)?;
        buf.append(b" ")?;
        buf.append_decimal((block.len() + payload.len()) as u64)?;
        buf.append(CRLF)?;
        buf.append(block)?;
        buf.append(payload)?;
        buf.append(CRLF)
    }

    /// Renders a whole [`Message`] back into wire form.
    ///
    /// The inverse of the parser on grammatically valid frames; emitting a
    /// [`Kind::Unknown`] message writes nothing.
    pub(crate) fn message(self, buf: &mut Appendable, msg: &Message) -> Result<(), BufError> {
        let subject = msg.subject().unwrap_or_default();
        let sid = msg.sid().unwrap_or_default();
        let payload = msg.payload().unwrap_or_default();

        match msg.kind() {
            Kind::Unknown => Ok(()),

            Kind::Ping => self.ping(buf),
            Kind::Pong => self.pong(buf),
            Kind::Ok => buf.append(b"+OK\r\n"),

            Kind::Err => {
                buf.append(b"-ERR '")?;
                buf.append(msg.args().unwrap_or_default())?;
                buf.append(b"'")?;
                buf.append(CRLF)
            }

            Kind::Info | Kind::Connect => {
                buf.append(msg.kind().verb().as_bytes())?;
                buf.append(b" ")?;
                buf.append(msg.args().unwrap_or_default())?;
                buf.append(CRLF)
            }

            Kind::Sub => self.sub(buf, subject, msg.queue(), sid),

            Kind::Unsub => {
                buf.append(b"UNSUB ")?;
                buf.append(sid)?;
                if let Some(max) = msg.args() {
                    buf.append(b" ")?;
                    buf.append(max)?;
                }
                buf.append(CRLF)
            }

            Kind::Pub => self.publish(buf, subject, msg.reply_to(), payload),

            Kind::HPub => self.hpublish(buf, subject, msg.reply_to(), msg.headers(), payload),

            Kind::Msg => {
                buf.append(b"MSG ")?;
                buf.append(subject)?;
                buf.append(b" ")?;
                buf.append(sid)?;
                if let Some(reply) = msg.reply_to() {
                    buf.append(b" ")?;
                    buf.append(reply)?;
                }
                buf.append(b" ")?;
                buf.append_decimal(payload.len() as u64)?;
                buf.append(CRLF)?;
                buf.append(payload)?;
                buf.append(CRLF)
            }

            Kind::HMsg => {
                let block = msg.headers().body().unwrap_or(EMPTY_HEADER_BLOCK);
                buf.append(b"HMSG ")?;
                buf.append(subject)?;
                buf.append(b" ")?;
                buf.append(sid)?;
                if let Some(reply) = msg.reply_to() {
                    buf.append(b" ")?;
                    buf.append(reply)?;
                }
                buf.append(b" ")?;
                buf.append_decimal(block.len() as u64)?;
                buf.append(b" ")?;
                buf.append_decimal((block.len() + payload.len()) as u64)?;
                buf.append(CRLF)?;
                buf.append(block)?;
                buf.append(payload)?;
                buf.append(CRLF)
            }
        }
    }
}
