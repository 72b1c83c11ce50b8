pub(crate) mod headers;
pub(crate) mod message;

pub use headers::{HeaderError, Headers, HeadersIter};
pub use message::Message;

/// The kind of a NATS protocol frame.
///
/// Covers every operation of the client protocol, in both directions.
/// [`Kind::Unknown`] is the state of a freshly created or recycled
/// [`Message`] and the classification of an unrecognized verb.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Kind {
    /// Not a protocol frame; the initial and recycled state.
    #[default]
    Unknown,
    /// Server handshake announcement carrying a JSON document.
    Info,
    /// Client handshake reply carrying a JSON document.
    Connect,
    /// Subscription request.
    Sub,
    /// Subscription removal.
    Unsub,
    /// Keep-alive probe.
    Ping,
    /// Keep-alive answer.
    Pong,
    /// Acknowledgement sent by the server in verbose mode.
    Ok,
    /// Server-side error report with a quoted reason.
    Err,
    /// Publication without headers.
    Pub,
    /// Publication with a header block.
    HPub,
    /// Delivery without headers.
    Msg,
    /// Delivery with a header block.
    HMsg,
}

impl Kind {
    /// The on-the-wire verb token for this kind.
    pub const fn verb(self) -> &'static str {
        match self {
            Kind::Unknown => "",
            Kind::Info => "INFO",
            Kind::Connect => "CONNECT",
            Kind::Sub => "SUB",
            Kind::Unsub => "UNSUB",
            Kind::Ping => "PING",
            Kind::Pong => "PONG",
            Kind::Ok => "+OK",
            Kind::Err => "-ERR",
            Kind::Pub => "PUB",
            Kind::HPub => "HPUB",
            Kind::Msg => "MSG",
            Kind::HMsg => "HMSG",
        }
    }

    /// Classifies a verb token, case-insensitively.
    ///
    /// Unrecognized verbs map to [`Kind::Unknown`].
    pub fn from_verb(token: &str) -> Self {
        const VERBS: [Kind; 12] = [
            Kind::Info,
            Kind::Connect,
            Kind::Sub,
            Kind::Unsub,
            Kind::Ping,
            Kind::Pong,
            Kind::Ok,
            Kind::Err,
            Kind::Pub,
            Kind::HPub,
            Kind::Msg,
            Kind::HMsg,
        ];
        for kind in VERBS {
            if token.eq_ignore_ascii_case(kind.verb()) {
                return kind;
            }
        }
        Kind::Unknown
    }

    /// Whether frames of this kind carry a payload segment.
    pub const fn has_payload(self) -> bool {
        matches!(self, Kind::Pub | Kind::HPub | Kind::Msg | Kind::HMsg)
    }

    /// Whether frames of this kind carry a header block.
    pub const fn has_headers(self) -> bool {
        matches!(self, Kind::HPub | Kind::HMsg)
    }

    /// Whether frames of this kind carry a free-form control-line remainder
    /// (the JSON document of INFO/CONNECT, the reason of -ERR).
    pub const fn has_args(self) -> bool {
        matches!(self, Kind::Info | Kind::Connect | Kind::Err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verb_round_trip() {
        for kind in [
            Kind::Info,
            Kind::Connect,
            Kind::Sub,
            Kind::Unsub,
            Kind::Ping,
            Kind::Pong,
            Kind::Ok,
            Kind::Err,
            Kind::Pub,
            Kind::HPub,
            Kind::Msg,
            Kind::HMsg,
        ] {
            assert_eq!(Kind::from_verb(kind.verb()), kind);
            assert_eq!(Kind::from_verb(&kind.verb().to_ascii_lowercase()), kind);
        }
    }

    #[test]
    fn unknown_verbs() {
        assert_eq!(Kind::from_verb("NOPE"), Kind::Unknown);
        assert_eq!(Kind::from_verb(""), Kind::Unknown);
        assert_eq!(Kind::from_verb("PUBLISH"), Kind::Unknown);
    }
}
