use core::fmt;

use thiserror::Error;

/// Default allocation granularity for [`Appendable`] buffers, in bytes.
pub const DEFAULT_ROUND: usize = 256;

/// Error returned when a buffer operation fails.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum BufError {
    /// The allocator could not provide the requested capacity.
    #[error("buffer allocation failed")]
    AllocFailed,

    /// The operation requires backing storage but the buffer has none.
    ///
    /// Returned by [`Appendable::reset`] when the buffer was never allocated
    /// or has been released with [`Appendable::free`].
    #[error("buffer is not allocated")]
    NotAllocated,

    /// A shrink request exceeded the number of bytes currently held.
    #[error("cannot shrink below zero length")]
    Underflow,
}

/// A growable, reusable byte buffer.
///
/// `Appendable` owns a single heap allocation and tracks how much of it is in
/// use. It is the building block for every variable-length field handled by
/// this crate (subjects, header blocks, payloads): a field is filled with
/// [`append`](Self::append), handed around, and then recycled with
/// [`clear`](Self::reset) so that steady-state receive loops never allocate.
///
/// Capacity grows in multiples of a rounding granularity (default
/// [`DEFAULT_ROUND`]) and at least doubles on reallocation, which dampens the
/// number of reallocations under jagged payload sizes.
///
/// # Examples
///
/// ```
/// use gnat::Appendable;
///
/// let mut buf = Appendable::new();
/// assert!(buf.body().is_none());
///
/// buf.append(b"Hello").unwrap();
/// buf.append(b", world").unwrap();
/// assert_eq!(buf.body(), Some(&b"Hello, world"[..]));
///
/// // Shrinking trims from the tail.
/// buf.shrink(7).unwrap();
/// assert_eq!(buf.body(), Some(&b"Hello"[..]));
///
/// // Resetting keeps the allocation for reuse.
/// let capacity = buf.capacity();
/// buf.reset().unwrap();
/// assert!(buf.body().is_none());
/// assert_eq!(buf.capacity(), capacity);
/// ```
#[derive(Clone)]
pub struct Appendable {
    buf: Option<Box<[u8]>>,
    len: usize,
    round: usize,
}

/// Equality is over the active contents only; capacity and granularity do
/// not participate.
impl PartialEq for Appendable {
    fn eq(&self, other: &Self) -> bool {
        self.body() == other.body()
    }
}

impl Eq for Appendable {}

impl Appendable {
    /// Creates an empty buffer with no backing storage.
    ///
    /// The first [`append`](Self::append) allocates on demand.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            buf: None,
            len: 0,
            round: DEFAULT_ROUND,
        }
    }

    /// Creates a buffer pre-allocated for at least `capacity` bytes.
    ///
    /// The actual capacity is `capacity` rounded up to the default
    /// granularity.
    ///
    /// # Errors
    ///
    /// Returns [`BufError::AllocFailed`] if the allocation fails.
    pub fn init(capacity: usize) -> Result<Self, BufError> {
        Self::with_round(capacity, DEFAULT_ROUND)
    }

    /// Creates a buffer pre-allocated for at least `capacity` bytes, growing
    /// in multiples of `round`.
    ///
    /// # Errors
    ///
    /// Returns [`BufError::AllocFailed`] if the allocation fails.
    ///
    /// # Panics
    ///
    /// Panics if `round` is zero.
    pub fn with_round(capacity: usize, round: usize) -> Result<Self, BufError> {
        assert!(round > 0, "rounding granularity must be non-zero");
        let mut this = Self {
            buf: None,
            len: 0,
            round,
        };
        this.grow(round_up(capacity, round))?;
        Ok(this)
    }

    /// Returns the allocated capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.buf.as_ref().map_or(0, |b| b.len())
    }

    /// Returns the number of bytes currently held.
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if the buffer holds no bytes.
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns the active prefix of the buffer, or [`None`] when empty.
    pub fn body(&self) -> Option<&[u8]> {
        match (&self.buf, self.len) {
            (_, 0) | (None, _) => None,
            (Some(buf), len) => Some(&buf[..len]),
        }
    }

    /// Appends `bytes` to the tail, growing the allocation if needed.
    ///
    /// Appending an empty slice is a no-op. On reallocation the capacity at
    /// least doubles, and is always a multiple of the rounding granularity.
    ///
    /// # Errors
    ///
    /// Returns [`BufError::AllocFailed`] if growth fails.
    pub fn append(&mut self, bytes: &[u8]) -> Result<(), BufError> {
        if bytes.is_empty() {
            return Ok(());
        }
        let tail = self.grow_tail(bytes.len())?;
        tail.copy_from_slice(bytes);
        Ok(())
    }

    /// Grows the buffer by `extra` bytes and returns the new tail for
    /// in-place filling. The new bytes are zeroed.
    pub(crate) fn grow_tail(&mut self, extra: usize) -> Result<&mut [u8], BufError> {
        if extra == 0 {
            return Ok(&mut []);
        }
        let needed = self.len.checked_add(extra).ok_or(BufError::AllocFailed)?;
        if needed > self.capacity() {
            let target = round_up(needed, self.round).max(self.capacity().saturating_mul(2));
            self.grow(target)?;
        }
        let start = self.len;
        self.len = needed;
        match &mut self.buf {
            Some(buf) => Ok(&mut buf[start..needed]),
            // grow() above guarantees storage for any non-zero `extra`
            None => Err(BufError::NotAllocated),
        }
    }

    /// Appends the base-10 ASCII rendering of `n`, without leading zeros.
    pub(crate) fn append_decimal(&mut self, mut n: u64) -> Result<(), BufError> {
        let mut digits = [0u8; 20];
        let mut at = digits.len();
        loop {
            at -= 1;
            digits[at] = b'0' + (n % 10) as u8;
            n /= 10;
            if n == 0 {
                break;
            }
        }
        self.append(&digits[at..])
    }

    /// Drops the last `count` bytes from the tail.
    ///
    /// # Errors
    ///
    /// Returns [`BufError::Underflow`] if `count` exceeds the current length.
    pub fn shrink(&mut self, count: usize) -> Result<(), BufError> {
        if count > self.len {
            return Err(BufError::Underflow);
        }
        self.len -= count;
        Ok(())
    }

    /// Resets the length to zero without releasing the allocation.
    ///
    /// # Errors
    ///
    /// Returns [`BufError::NotAllocated`] if the buffer has no backing
    /// storage.
    pub fn reset(&mut self) -> Result<(), BufError> {
        if self.buf.is_none() {
            return Err(BufError::NotAllocated);
        }
        self.len = 0;
        Ok(())
    }

    /// Resets the length to zero whether or not storage is allocated.
    pub(crate) fn clear(&mut self) {
        self.len = 0;
    }

    /// Replaces the contents with `bytes`.
    ///
    /// Equivalent to [`reset`](Self::reset) followed by
    /// [`append`](Self::append).
    ///
    /// # Errors
    ///
    /// Returns [`BufError::NotAllocated`] if the buffer has no backing
    /// storage, or [`BufError::AllocFailed`] if growth fails.
    pub fn copy(&mut self, bytes: &[u8]) -> Result<(), BufError> {
        self.reset()?;
        self.append(bytes)
    }

    /// Releases the backing storage. Idempotent.
    pub fn free(&mut self) {
        self.buf = None;
        self.len = 0;
    }

    fn grow(&mut self, new_capacity: usize) -> Result<(), BufError> {
        let mut storage = Vec::new();
        storage
            .try_reserve_exact(new_capacity)
            .map_err(|_| BufError::AllocFailed)?;
        storage.resize(new_capacity, 0u8);
        let mut boxed = storage.into_boxed_slice();
        if let Some(old) = self.buf.take() {
            boxed[..self.len].copy_from_slice(&old[..self.len]);
        }
        self.buf = Some(boxed);
        Ok(())
    }
}

impl Default for Appendable {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Appendable {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:02x?}", self.body().unwrap_or(&[]))
    }
}

const fn round_up(n: usize, round: usize) -> usize {
    match n % round {
        0 => n,
        rem => n + (round - rem),
    }
}
