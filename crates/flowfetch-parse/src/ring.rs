use std::borrow::Cow;

use crate::error::{ParseError, Result};

/// Default starting capacity for stream buffers
pub const DEFAULT_INITIAL_CAPACITY: usize = 8 * 1024;

/// Default ceiling a stream buffer may grow to (1 MiB)
pub const DEFAULT_MAX_CAPACITY: usize = 1024 * 1024;

/// Growable circular byte buffer with zero-copy read views
///
/// Capacity is always a power of two so logical offsets map to physical
/// indexes with a mask instead of a modulo. Growth doubles the capacity up to
/// `max_capacity`; past that, writes fail with [`ParseError::BufferOverflow`].
///
/// Views returned by [`RingBuffer::view`] borrow the buffer, so the compiler
/// rejects holding one across a `write`, `consume` or `clear`.
pub struct RingBuffer {
    buf: Vec<u8>,
    head: usize,
    len: usize,
    max_capacity: usize,
}

impl RingBuffer {
    /// Create a buffer starting at `capacity` bytes that may grow to `max_capacity`
    ///
    /// Both values are rounded up to the next power of two.
    pub fn with_capacity(capacity: usize, max_capacity: usize) -> Self {
        let max_capacity = max_capacity.max(1).next_power_of_two();
        let capacity = capacity.max(1).next_power_of_two().min(max_capacity);

        Self {
            buf: vec![0; capacity],
            head: 0,
            len: 0,
            max_capacity,
        }
    }

    #[inline]
    fn mask(&self) -> usize {
        self.buf.len() - 1
    }

    /// Current physical capacity
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Largest capacity this buffer is allowed to grow to
    pub fn max_capacity(&self) -> usize {
        self.max_capacity
    }

    /// Bytes available to read
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Append bytes, growing the buffer when needed
    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }

        let needed = self
            .len
            .checked_add(data.len())
            .ok_or(ParseError::BufferOverflow {
                len: usize::MAX,
                max: self.max_capacity,
            })?;
        if needed > self.capacity() {
            self.grow(needed)?;
        }

        let cap = self.capacity();
        let tail = (self.head + self.len) & self.mask();
        let first = data.len().min(cap - tail);
        self.buf[tail..tail + first].copy_from_slice(&data[..first]);
        self.buf[..data.len() - first].copy_from_slice(&data[first..]);
        self.len += data.len();

        Ok(())
    }

    /// Reallocate to fit `needed` bytes, linearizing the wrapped content
    fn grow(&mut self, needed: usize) -> Result<()> {
        if needed > self.max_capacity {
            return Err(ParseError::BufferOverflow {
                len: needed,
                max: self.max_capacity,
            });
        }

        let mut cap = self.capacity();
        while cap < needed {
            cap *= 2;
        }

        let mut next = vec![0; cap];
        let (front, back) = self.as_slices();
        next[..front.len()].copy_from_slice(front);
        next[front.len()..front.len() + back.len()].copy_from_slice(back);

        self.buf = next;
        self.head = 0;
        tracing::trace!(capacity = cap, occupied = self.len, "ring buffer grew");

        Ok(())
    }

    /// Readable content as two physical slices (the second is empty unless wrapped)
    pub fn as_slices(&self) -> (&[u8], &[u8]) {
        let first = self.len.min(self.capacity() - self.head);
        (
            &self.buf[self.head..self.head + first],
            &self.buf[..self.len - first],
        )
    }

    /// Byte at a logical offset from the read cursor, without consuming it
    pub fn peek_byte(&self, offset: usize) -> Option<u8> {
        (offset < self.len).then(|| self.buf[(self.head + offset) & self.mask()])
    }

    /// View `len` bytes starting at logical `offset`
    ///
    /// Borrowed when the range is physically contiguous; a range that crosses
    /// the wraparound point is copied into a temporary owned buffer.
    pub fn view(&self, offset: usize, len: usize) -> Option<Cow<'_, [u8]>> {
        let end = offset.checked_add(len)?;
        if end > self.len {
            return None;
        }
        if len == 0 {
            return Some(Cow::Borrowed(&[]));
        }

        let cap = self.capacity();
        let start = (self.head + offset) & self.mask();
        if start + len <= cap {
            return Some(Cow::Borrowed(&self.buf[start..start + len]));
        }

        let first = cap - start;
        let mut copy = Vec::with_capacity(len);
        copy.extend_from_slice(&self.buf[start..]);
        copy.extend_from_slice(&self.buf[..len - first]);
        Some(Cow::Owned(copy))
    }

    /// Advance the read cursor; returns how many bytes were actually consumed
    pub fn consume(&mut self, len: usize) -> usize {
        let n = len.min(self.len);
        self.len -= n;
        // Rewinding an empty buffer keeps the next frames contiguous.
        self.head = if self.len == 0 {
            0
        } else {
            (self.head + n) & self.mask()
        };
        n
    }

    /// Byte-for-byte comparison of `seq` against the content at `offset`
    pub fn match_sequence(&self, offset: usize, seq: &[u8]) -> bool {
        match offset.checked_add(seq.len()) {
            Some(end) if end <= self.len => {
                let mask = self.mask();
                seq.iter()
                    .enumerate()
                    .all(|(i, &b)| self.buf[(self.head + offset + i) & mask] == b)
            }
            _ => false,
        }
    }

    /// Logical offset of the first `byte` at or after `from`
    pub fn find_byte(&self, from: usize, byte: u8) -> Option<usize> {
        if from >= self.len {
            return None;
        }

        let (front, back) = self.as_slices();
        if from < front.len() {
            memchr::memchr(byte, &front[from..])
                .map(|pos| from + pos)
                .or_else(|| memchr::memchr(byte, back).map(|pos| front.len() + pos))
        } else {
            memchr::memchr(byte, &back[from - front.len()..]).map(|pos| from + pos)
        }
    }

    /// Drop all content, keeping the allocation
    pub fn clear(&mut self) {
        self.head = 0;
        self.len = 0;
    }
}

impl Default for RingBuffer {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_INITIAL_CAPACITY, DEFAULT_MAX_CAPACITY)
    }
}

impl std::fmt::Debug for RingBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingBuffer")
            .field("capacity", &self.capacity())
            .field("max_capacity", &self.max_capacity)
            .field("len", &self.len)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Buffer of capacity 8 holding "abcde", wrapped after "ab"
    fn wrapped() -> RingBuffer {
        let mut ring = RingBuffer::with_capacity(8, 8);
        ring.write(b"xxxxxx").unwrap();
        ring.consume(5);
        ring.write(b"abcde").unwrap();
        ring.consume(1);
        ring
    }

    #[test]
    fn test_capacity_rounds_to_power_of_two() {
        let ring = RingBuffer::with_capacity(100, 1000);
        assert_eq!(ring.capacity(), 128);
        assert_eq!(ring.max_capacity(), 1024);
    }

    #[test]
    fn test_write_and_consume() {
        let mut ring = RingBuffer::with_capacity(16, 16);
        ring.write(b"hello").unwrap();
        assert_eq!(ring.len(), 5);
        assert_eq!(ring.peek_byte(0), Some(b'h'));
        assert_eq!(ring.peek_byte(4), Some(b'o'));
        assert_eq!(ring.peek_byte(5), None);

        assert_eq!(ring.consume(2), 2);
        assert_eq!(ring.view(0, 3).unwrap().as_ref(), b"llo");

        // Never consumes more than is occupied
        assert_eq!(ring.consume(10), 3);
        assert!(ring.is_empty());
    }

    #[test]
    fn test_view_is_borrowed_when_contiguous() {
        let mut ring = RingBuffer::with_capacity(16, 16);
        ring.write(b"contiguous").unwrap();
        let view = ring.view(2, 4).unwrap();
        assert!(matches!(view, Cow::Borrowed(_)));
        assert_eq!(view.as_ref(), b"ntig");
    }

    #[test]
    fn test_view_copies_across_wraparound() {
        let ring = wrapped();
        assert_eq!(ring.len(), 5);
        let (front, back) = ring.as_slices();
        assert_eq!(front, b"ab");
        assert_eq!(back, b"cde");

        let head = ring.view(0, 2).unwrap();
        assert!(matches!(head, Cow::Borrowed(_)));
        assert_eq!(head.as_ref(), b"ab");

        let view = ring.view(1, 3).unwrap();
        assert!(matches!(view, Cow::Owned(_)));
        assert_eq!(view.as_ref(), b"bcd");

        assert!(ring.view(3, 3).is_none());
    }

    #[test]
    fn test_growth_linearizes_wrapped_content() {
        let mut ring = RingBuffer::with_capacity(8, 64);
        ring.write(b"xxxxxx").unwrap();
        ring.consume(5);
        ring.write(b"0123456").unwrap();
        ring.consume(1);

        ring.write(b"789abc").unwrap();
        assert_eq!(ring.capacity(), 16);
        let (front, back) = ring.as_slices();
        assert_eq!(front, b"0123456789abc");
        assert!(back.is_empty());
    }

    #[test]
    fn test_overflow_past_max_capacity() {
        let mut ring = RingBuffer::with_capacity(4, 8);
        ring.write(b"12345678").unwrap();
        let err = ring.write(b"9").unwrap_err();
        assert!(matches!(err, ParseError::BufferOverflow { len: 9, max: 8 }));
        // Content survives a rejected write
        assert_eq!(ring.len(), 8);
    }

    #[test]
    fn test_match_sequence() {
        let ring = wrapped();
        assert!(ring.match_sequence(1, b"bcd"));
        assert!(!ring.match_sequence(1, b"bce"));
        assert!(!ring.match_sequence(3, b"def"));
    }

    #[test]
    fn test_find_byte_across_halves() {
        let ring = wrapped();
        assert_eq!(ring.find_byte(0, b'a'), Some(0));
        assert_eq!(ring.find_byte(0, b'c'), Some(2));
        assert_eq!(ring.find_byte(1, b'd'), Some(3));
        assert_eq!(ring.find_byte(3, b'c'), None);
        assert_eq!(ring.find_byte(0, b'z'), None);
        assert_eq!(ring.find_byte(9, b'a'), None);
    }
}
