use std::io;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};

use crate::{
    buffers::BufError,
    protocol::{
        headers::{CRLF, HEADER_PREFIX},
        Kind, Message,
    },
};

/// Upper bound on the length of a single control line, terminator included.
///
/// Generous enough for any INFO document a server realistically sends, small
/// enough that a stream of garbage cannot grow the scratch line unbounded.
const MAX_CONTROL_LINE: usize = 64 * 1024;

/// Error returned when decoding an inbound frame fails.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The transport reached end-of-stream, possibly mid-frame.
    #[error("connection closed")]
    Closed,

    /// The byte stream violated the frame grammar.
    #[error("malformed frame: {0}")]
    MalformedFrame(&'static str),

    /// The transport failed.
    #[error("transport read failed")]
    Io(#[source] io::Error),

    /// A message buffer could not grow to hold the frame.
    #[error(transparent)]
    Buffer(#[from] BufError),
}

/// What follows the control line of a classified frame.
enum Body {
    /// Control-only frame.
    None,
    /// Unrecognized verb; the line has been consumed, drop the frame.
    Skip,
    /// A payload of exactly this many bytes.
    Payload(usize),
    /// A header block and a payload, split per `hdr_len`/`tot_len`.
    Full { hdr_len: usize, tot_len: usize },
}

/// Streaming frame decoder.
///
/// Wraps the transport's read half and decodes one frame per
/// [`read_message`](Self::read_message) call, filling a caller-supplied
/// [`Message`] so the hot path never allocates once the message's buffers
/// have warmed up.
pub(crate) struct FrameDecoder<R> {
    io: BufReader<R>,
    line: Vec<u8>,
}

impl<R> std::fmt::Debug for FrameDecoder<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameDecoder").finish_non_exhaustive()
    }
}

impl<R> FrameDecoder<R>
where
    R: AsyncRead + Unpin,
{
    pub(crate) fn new(io: R) -> Self {
        Self {
            io: BufReader::new(io),
            line: Vec::new(),
        }
    }

    /// Decodes the next frame into `msg`.
    ///
    /// Blocks until a complete frame has been consumed. Frames with an
    /// unrecognized verb are consumed and silently dropped. On error the
    /// message contents are unspecified; the caller recycles it either way.
    pub(crate) async fn read_message(&mut self, msg: &mut Message) -> Result<(), DecodeError> {
        loop {
            self.read_control_line().await?;
            match parse_control(&self.line, msg)? {
                Body::Skip => continue,
                Body::None => return Ok(()),
                Body::Payload(len) => {
                    self.read_payload(msg, len).await?;
                    self.read_terminator().await?;
                    return Ok(());
                }
                Body::Full { hdr_len, tot_len } => {
                    self.read_headers(msg, hdr_len).await?;
                    self.read_payload(msg, tot_len - hdr_len).await?;
                    self.read_terminator().await?;
                    return Ok(());
                }
            }
        }
    }

    /// Reads one CRLF-terminated line into the scratch buffer, CRLF
    /// stripped.
    async fn read_control_line(&mut self) -> Result<(), DecodeError> {
        self.line.clear();
        let limit = (MAX_CONTROL_LINE + 1) as u64;
        let n = (&mut self.io)
            .take(limit)
            .read_until(b'\n', &mut self.line)
            .await
            .map_err(DecodeError::Io)?;
        if n == 0 {
            return Err(DecodeError::Closed);
        }
        if !self.line.ends_with(b"\n") {
            if self.line.len() as u64 == limit {
                return Err(DecodeError::MalformedFrame("control line too long"));
            }
            // EOF before the terminator.
            return Err(DecodeError::Closed);
        }
        if !self.line.ends_with(CRLF) {
            return Err(DecodeError::MalformedFrame("control line must end with CRLF"));
        }
        self.line.truncate(self.line.len() - CRLF.len());
        Ok(())
    }

    async fn read_headers(&mut self, msg: &mut Message, hdr_len: usize) -> Result<(), DecodeError> {
        let block = msg.headers_mut().block_mut().grow_tail(hdr_len)?;
        fill(&mut self.io, block).await?;
        let block = msg
            .headers()
            .body()
            .ok_or(DecodeError::MalformedFrame("header length cannot be zero"))?;
        if !block.starts_with(HEADER_PREFIX) {
            return Err(DecodeError::MalformedFrame("header block must open with NATS/1.0"));
        }
        if !block.ends_with(b"\r\n\r\n") {
            return Err(DecodeError::MalformedFrame(
                "header block must end with an empty line",
            ));
        }
        Ok(())
    }

    async fn read_payload(&mut self, msg: &mut Message, len: usize) -> Result<(), DecodeError> {
        let tail = msg.payload_mut().grow_tail(len)?;
        fill(&mut self.io, tail).await
    }

    /// Consumes the CRLF that closes a payload-bearing frame.
    async fn read_terminator(&mut self) -> Result<(), DecodeError> {
        let mut end = [0u8; 2];
        fill(&mut self.io, &mut end).await?;
        if &end[..] != CRLF {
            return Err(DecodeError::MalformedFrame("missing frame terminator"));
        }
        Ok(())
    }
}

async fn fill<R>(io: &mut BufReader<R>, buf: &mut [u8]) -> Result<(), DecodeError>
where
    R: AsyncRead + Unpin,
{
    match io.read_exact(buf).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(DecodeError::Closed),
        Err(e) => Err(DecodeError::Io(e)),
    }
}

/// Classifies a control line and fills the message's control fields.
fn parse_control(line: &[u8], msg: &mut Message) -> Result<Body, DecodeError> {
    let text = core::str::from_utf8(line)
        .map_err(|_| DecodeError::MalformedFrame("control line is not valid ASCII"))?;
    let (verb, rest) = split_verb(text);
    let kind = Kind::from_verb(verb);
    msg.reset(kind);

    match kind {
        Kind::Unknown => Ok(Body::Skip),

        Kind::Ping | Kind::Pong | Kind::Ok => {
            if rest.is_empty() {
                Ok(Body::None)
            } else {
                Err(DecodeError::MalformedFrame("unexpected arguments"))
            }
        }

        Kind::Info | Kind::Connect => {
            if rest.is_empty() {
                return Err(DecodeError::MalformedFrame("missing JSON document"));
            }
            msg.args_mut().append(rest.as_bytes())?;
            Ok(Body::None)
        }

        Kind::Err => {
            let reason = rest
                .strip_prefix('\'')
                .and_then(|r| r.strip_suffix('\''))
                .unwrap_or(rest);
            msg.args_mut().append(reason.as_bytes())?;
            Ok(Body::None)
        }

        Kind::Sub => {
            let (argv, argc) = split_args(rest)?;
            match argc {
                2 => {
                    msg.subject_mut().append(argv[0].as_bytes())?;
                    msg.sid_mut().append(argv[1].as_bytes())?;
                }
                3 => {
                    msg.subject_mut().append(argv[0].as_bytes())?;
                    msg.queue_mut().append(argv[1].as_bytes())?;
                    msg.sid_mut().append(argv[2].as_bytes())?;
                }
                _ => return Err(DecodeError::MalformedFrame("SUB takes 2 or 3 arguments")),
            }
            Ok(Body::None)
        }

        Kind::Unsub => {
            let (argv, argc) = split_args(rest)?;
            match argc {
                1 => {
                    msg.sid_mut().append(argv[0].as_bytes())?;
                }
                2 => {
                    parse_count(argv[1])?;
                    msg.sid_mut().append(argv[0].as_bytes())?;
                    msg.args_mut().append(argv[1].as_bytes())?;
                }
                _ => return Err(DecodeError::MalformedFrame("UNSUB takes 1 or 2 arguments")),
            }
            Ok(Body::None)
        }

        Kind::Pub => {
            let (argv, argc) = split_args(rest)?;
            let nbytes = match argc {
                2 => parse_count(argv[1])?,
                3 => {
                    msg.reply_to_mut().append(argv[1].as_bytes())?;
                    parse_count(argv[2])?
                }
                _ => return Err(DecodeError::MalformedFrame("PUB takes 2 or 3 arguments")),
            };
            msg.subject_mut().append(argv[0].as_bytes())?;
            Ok(Body::Payload(nbytes))
        }

        Kind::Msg => {
            let (argv, argc) = split_args(rest)?;
            let nbytes = match argc {
                3 => parse_count(argv[2])?,
                4 => {
                    msg.reply_to_mut().append(argv[2].as_bytes())?;
                    parse_count(argv[3])?
                }
                _ => return Err(DecodeError::MalformedFrame("MSG takes 3 or 4 arguments")),
            };
            msg.subject_mut().append(argv[0].as_bytes())?;
            msg.sid_mut().append(argv[1].as_bytes())?;
            Ok(Body::Payload(nbytes))
        }

        Kind::HPub => {
            let (argv, argc) = split_args(rest)?;
            let (hdr_len, tot_len) = match argc {
                3 => (parse_count(argv[1])?, parse_count(argv[2])?),
                4 => {
                    msg.reply_to_mut().append(argv[1].as_bytes())?;
                    (parse_count(argv[2])?, parse_count(argv[3])?)
                }
                _ => return Err(DecodeError::MalformedFrame("HPUB takes 3 or 4 arguments")),
            };
            msg.subject_mut().append(argv[0].as_bytes())?;
            body_split(hdr_len, tot_len)
        }

        Kind::HMsg => {
            let (argv, argc) = split_args(rest)?;
            let (hdr_len, tot_len) = match argc {
                4 => (parse_count(argv[2])?, parse_count(argv[3])?),
                5 => {
                    msg.reply_to_mut().append(argv[2].as_bytes())?;
                    (parse_count(argv[3])?, parse_count(argv[4])?)
                }
                _ => return Err(DecodeError::MalformedFrame("HMSG takes 4 or 5 arguments")),
            };
            msg.subject_mut().append(argv[0].as_bytes())?;
            msg.sid_mut().append(argv[1].as_bytes())?;
            body_split(hdr_len, tot_len)
        }
    }
}

fn body_split(hdr_len: usize, tot_len: usize) -> Result<Body, DecodeError> {
    if tot_len < hdr_len {
        return Err(DecodeError::MalformedFrame(
            "total length is smaller than the header length",
        ));
    }
    Ok(Body::Full { hdr_len, tot_len })
}

/// Splits the verb token from the rest of the control line.
fn split_verb(text: &str) -> (&str, &str) {
    let blank = |c: char| c == ' ' || c == '\t';
    match text.find(blank) {
        Some(at) => (&text[..at], text[at..].trim_matches(blank)),
        None => (text, ""),
    }
}

/// Tokenizes up to five whitespace-separated arguments.
fn split_args(rest: &str) -> Result<([&str; 5], usize), DecodeError> {
    let mut argv = [""; 5];
    let mut argc = 0;
    for token in rest.split_ascii_whitespace() {
        if argc == argv.len() {
            return Err(DecodeError::MalformedFrame("too many arguments"));
        }
        argv[argc] = token;
        argc += 1;
    }
    Ok((argv, argc))
}

/// Parses a base-10 byte count. Stricter than `usize::from_str`: signs and
/// non-digit bytes are rejected.
fn parse_count(token: &str) -> Result<usize, DecodeError> {
    if token.is_empty() || !token.bytes().all(|b| b.is_ascii_digit()) {
        return Err(DecodeError::MalformedFrame("invalid byte count"));
    }
    token
        .parse()
        .map_err(|_| DecodeError::MalformedFrame("byte count out of range"))
}
