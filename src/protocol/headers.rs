use thiserror::Error;

use crate::buffers::{Appendable, BufError};

/// The version token every header block opens with.
pub(crate) const HEADER_PREFIX: &[u8] = b"NATS/1.0";
/// The version line, CRLF included.
pub(crate) const HEADER_VERSION_LINE: &[u8] = b"NATS/1.0\r\n";
pub(crate) const CRLF: &[u8] = b"\r\n";

/// Error returned when a header operation fails.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HeaderError {
    /// The field name was empty after trimming ASCII whitespace.
    #[error("header name is empty")]
    BadName,

    /// The field value was empty after trimming ASCII whitespace.
    #[error("header value is empty")]
    BadValue,

    /// Iteration was requested on an empty header block.
    #[error("the message carries no headers")]
    NoHeaders,

    /// The underlying buffer operation failed.
    #[error(transparent)]
    Buffer(#[from] BufError),
}

/// A NATS/1.0 header block kept in canonical wire form.
///
/// The block is stored exactly as it travels on the wire: the
/// `NATS/1.0\r\n` version line, zero or more `name:value\r\n` fields, and a
/// terminating empty line. An empty `Headers` has zero length; the version
/// line is emitted by the first [`append`](Self::append).
///
/// Duplicate field names are allowed and preserved in insertion order, as
/// the protocol permits.
///
/// # Examples
///
/// ```
/// use gnat::Headers;
///
/// let mut headers = Headers::new();
/// headers.append("Content-Type", "text/plain").unwrap();
/// headers.append("Trace-Id", "7f2a").unwrap();
///
/// let fields: Vec<_> = headers.iter().unwrap().collect();
/// assert_eq!(fields[0], (&b"Content-Type"[..], &b"text/plain"[..]));
/// assert_eq!(fields[1], (&b"Trace-Id"[..], &b"7f2a"[..]));
///
/// assert!(headers.body().unwrap().starts_with(b"NATS/1.0\r\n"));
/// assert!(headers.body().unwrap().ends_with(b"\r\n\r\n"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    block: Appendable,
}

impl Headers {
    /// Creates an empty header block.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            block: Appendable::new(),
        }
    }

    /// Returns the wire form of the block, or [`None`] when empty.
    pub fn body(&self) -> Option<&[u8]> {
        self.block.body()
    }

    /// Returns `true` if no fields have been appended.
    pub fn is_empty(&self) -> bool {
        self.block.is_empty()
    }

    /// Appends a `name:value` field to the block.
    ///
    /// ASCII whitespace is trimmed from both sides of `name` and `value`.
    /// The two-CRLF terminator is maintained by shrinking the trailing empty
    /// line before the new field is written and re-appending it after.
    ///
    /// # Errors
    ///
    /// [`HeaderError::BadName`] or [`HeaderError::BadValue`] if the trimmed
    /// input is empty, [`HeaderError::Buffer`] if the block cannot grow.
    pub fn append(&mut self, name: impl AsRef<[u8]>, value: impl AsRef<[u8]>) -> Result<(), HeaderError> {
        let name = name.as_ref().trim_ascii();
        let value = value.as_ref().trim_ascii();
        if name.is_empty() {
            return Err(HeaderError::BadName);
        }
        if value.is_empty() {
            return Err(HeaderError::BadValue);
        }

        if self.block.is_empty() {
            self.block.append(HEADER_VERSION_LINE)?;
        } else {
            // Drop the trailing CRLF of the empty terminator line.
            self.block.shrink(CRLF.len())?;
        }
        self.block.append(name)?;
        self.block.append(b":")?;
        self.block.append(value)?;
        self.block.append(CRLF)?;
        self.block.append(CRLF)?;
        Ok(())
    }

    /// Returns a restartable iterator over the `(name, value)` fields.
    ///
    /// Fields are yielded in wire order, duplicates included, with ASCII
    /// whitespace trimmed from names and values. The version line and the
    /// terminator are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`HeaderError::NoHeaders`] when the block is empty.
    pub fn iter(&self) -> Result<HeadersIter<'_>, HeaderError> {
        match self.block.body() {
            Some(block) => Ok(HeadersIter { rest: block, seen_version: false }),
            None => Err(HeaderError::NoHeaders),
        }
    }

    /// Clears the block. The next [`append`](Self::append) re-emits the
    /// version line.
    pub fn reset(&mut self) {
        self.block.clear();
    }

    /// Releases the backing storage.
    pub(crate) fn free(&mut self) {
        self.block.free();
    }

    /// Raw access for the frame decoder, which fills the block straight off
    /// the wire.
    pub(crate) fn block_mut(&mut self) -> &mut Appendable {
        &mut self.block
    }
}

/// Iterator over the fields of a [`Headers`] block.
///
/// Created by [`Headers::iter`]. Lines without a `:` separator (other than
/// the version line) are skipped.
#[derive(Debug, Clone)]
pub struct HeadersIter<'a> {
    rest: &'a [u8],
    seen_version: bool,
}

impl<'a> Iterator for HeadersIter<'a> {
    type Item = (&'a [u8], &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let line_end = find_crlf(self.rest)?;
            let line = &self.rest[..line_end];
            self.rest = &self.rest[line_end + CRLF.len()..];

            if !self.seen_version {
                // The version line may carry an inline status; skip it whole.
                self.seen_version = true;
                continue;
            }
            if line.is_empty() {
                // Terminator reached.
                self.rest = &[];
                return None;
            }
            if let Some(colon) = line.iter().position(|&b| b == b':') {
                let name = line[..colon].trim_ascii();
                let value = line[colon + 1..].trim_ascii();
                return Some((name, value));
            }
        }
    }
}

fn find_crlf(block: &[u8]) -> Option<usize> {
    block.windows(2).position(|pair| pair == CRLF)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_builds_canonical_block() {
        let mut headers = Headers::new();
        assert!(headers.body().is_none());

        headers.append("A", "1").unwrap();
        assert_eq!(headers.body(), Some(&b"NATS/1.0\r\nA:1\r\n\r\n"[..]));

        headers.append("B", "2").unwrap();
        assert_eq!(headers.body(), Some(&b"NATS/1.0\r\nA:1\r\nB:2\r\n\r\n"[..]));
    }

    #[test]
    fn append_trims_and_rejects_empty() {
        let mut headers = Headers::new();
        headers.append("  Key \t", " padded value ").unwrap();
        let fields: Vec<_> = headers.iter().unwrap().collect();
        assert_eq!(fields, vec![(&b"Key"[..], &b"padded value"[..])]);

        assert_eq!(headers.append("   ", "v"), Err(HeaderError::BadName));
        assert_eq!(headers.append("k", " \t "), Err(HeaderError::BadValue));
        // Failed appends leave the block untouched.
        assert!(headers.body().unwrap().ends_with(b"\r\n\r\n"));
        assert_eq!(headers.iter().unwrap().count(), 1);
    }

    #[test]
    fn append_after_reset() {
        let mut headers = Headers::new();
        headers.append("X", "Y").unwrap();
        headers.append("Z", "W").unwrap();

        headers.reset();
        assert!(headers.body().is_none());
        assert!(matches!(headers.iter(), Err(HeaderError::NoHeaders)));

        headers.append("A", "1").unwrap();
        assert_eq!(headers.body(), Some(&b"NATS/1.0\r\nA:1\r\n\r\n"[..]));
    }

    #[test]
    fn duplicates_preserved_in_order() {
        let mut headers = Headers::new();
        headers.append("Header1", "X").unwrap();
        headers.append("Header1", "Y").unwrap();
        headers.append("Header2", "Z").unwrap();

        let fields: Vec<_> = headers.iter().unwrap().collect();
        assert_eq!(
            fields,
            vec![
                (&b"Header1"[..], &b"X"[..]),
                (&b"Header1"[..], &b"Y"[..]),
                (&b"Header2"[..], &b"Z"[..]),
            ]
        );

        // Iteration is non-consuming and restartable.
        assert_eq!(headers.iter().unwrap().count(), 3);
        assert_eq!(headers.iter().unwrap().count(), 3);
    }

    #[test]
    fn iterates_wire_blocks_with_inline_status() {
        let mut headers = Headers::new();
        headers
            .block_mut()
            .append(b"NATS/1.0 503\r\nNo-Responders: true\r\n\r\n")
            .unwrap();

        let fields: Vec<_> = headers.iter().unwrap().collect();
        assert_eq!(fields, vec![(&b"No-Responders"[..], &b"true"[..])]);
    }
}
