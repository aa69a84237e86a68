//! Byte containers shared between the send path and the retransmission
//! queue.
//!
//! A user write is buffered once and may then be referenced by several
//! outstanding segments at the same time: the portion still in the write
//! queue, the copies sitting in the retransmission queue, and the segment
//! currently handed to the network layer. The split here follows that
//! usage: a [`Chunk`] is the refcounted storage itself, and a [`Payload`]
//! is a list of windows into chunks. Slicing a payload narrows windows
//! without touching the bytes, and the storage is released when the last
//! window over it is dropped.

use std::{collections::VecDeque, fmt::Display, ops::Range, sync::Arc};

/// A refcounted, immutable run of bytes: the storage unit behind
/// [`Payload`]. Cloning a chunk clones a reference, never the bytes.
#[derive(Debug, Clone)]
pub struct Chunk(Arc<[u8]>);

impl Chunk {
    pub fn new(bytes: impl Into<Arc<[u8]>>) -> Self {
        Self(bytes.into())
    }

    /// Every byte in the chunk.
    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl PartialEq for Chunk {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Eq for Chunk {}

impl From<Vec<u8>> for Chunk {
    fn from(vector: Vec<u8>) -> Self {
        Self(vector.into())
    }
}

impl From<&[u8]> for Chunk {
    fn from(slice: &[u8]) -> Self {
        Self(Arc::from(slice))
    }
}

impl<const N: usize> From<&[u8; N]> for Chunk {
    fn from(array: &[u8; N]) -> Self {
        array.as_slice().into()
    }
}

impl<const N: usize> From<[u8; N]> for Chunk {
    fn from(array: [u8; N]) -> Self {
        array.as_slice().into()
    }
}

impl From<&str> for Chunk {
    fn from(string: &str) -> Self {
        string.as_bytes().into()
    }
}

/// One payload's window into a chunk. Payloads never store an empty
/// span.
#[derive(Debug, Clone)]
struct Span {
    chunk: Chunk,
    window: Range<usize>,
}

impl Span {
    fn whole(chunk: Chunk) -> Self {
        let window = 0..chunk.len();
        Self { chunk, window }
    }

    fn as_slice(&self) -> &[u8] {
        &self.chunk.as_slice()[self.window.clone()]
    }

    fn len(&self) -> usize {
        self.window.len()
    }

    /// The same chunk, seen through a smaller window.
    fn narrowed(&self, start: usize, len: usize) -> Self {
        debug_assert!(start + len <= self.len());
        let start = self.window.start + start;
        Self {
            chunk: self.chunk.clone(),
            window: start..start + len,
        }
    }
}

/// A sequence of chunk windows acting as one logical byte string.
///
/// # Examples
///
/// ```
/// # use unitcp::payload::Payload;
/// let payload = Payload::new(b"stream of bytes");
/// let word = payload.range(10, 5);
/// assert_eq!(word.to_vec(), b"bytes");
/// assert_eq!(payload.len(), 15);
/// ```
#[derive(Debug, Clone, Default)]
pub struct Payload {
    spans: VecDeque<Span>,
}

impl Payload {
    /// Creates a payload holding the given bytes.
    pub fn new(body: impl Into<Chunk>) -> Self {
        let body = body.into();
        let mut spans = VecDeque::new();
        if !body.is_empty() {
            spans.push_back(Span::whole(body));
        }
        Self { spans }
    }

    /// Creates a payload with no bytes.
    pub fn empty() -> Self {
        Self::default()
    }

    /// The total number of bytes across all windows.
    pub fn len(&self) -> usize {
        self.spans.iter().map(Span::len).sum()
    }

    /// Whether the payload contains no bytes.
    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }

    /// Prepends a chunk, e.g. a serialized header, in front of the
    /// existing bytes.
    pub fn prepend(&mut self, header: impl Into<Chunk>) {
        let header = header.into();
        if !header.is_empty() {
            self.spans.push_front(Span::whole(header));
        }
    }

    /// An aliased view of `len` bytes starting at `start`. The returned
    /// payload narrows windows over the same chunks; no bytes are
    /// copied.
    ///
    /// # Panics
    /// Panics if `start + len` exceeds the payload length.
    pub fn range(&self, start: usize, len: usize) -> Payload {
        assert!(start + len <= self.len());
        let mut spans = VecDeque::new();
        let mut skip = start;
        let mut want = len;
        for span in &self.spans {
            if want == 0 {
                break;
            }
            if skip >= span.len() {
                skip -= span.len();
                continue;
            }
            let take = want.min(span.len() - skip);
            spans.push_back(span.narrowed(skip, take));
            skip = 0;
            want -= take;
        }
        Payload { spans }
    }

    /// Iterates over every byte in order.
    pub fn iter(&self) -> impl Iterator<Item = u8> + '_ {
        self.spans.iter().flat_map(|span| span.as_slice().iter().copied())
    }

    /// Collects the bytes into a freshly allocated vector.
    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.len());
        for span in &self.spans {
            out.extend_from_slice(span.as_slice());
        }
        out
    }
}

impl Display for Payload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for byte in self.iter() {
            write!(f, "{byte:x} ")?;
        }
        Ok(())
    }
}

impl PartialEq for Payload {
    fn eq(&self, other: &Self) -> bool {
        self.iter().eq(other.iter())
    }
}

impl Eq for Payload {}

impl From<Vec<u8>> for Payload {
    fn from(val: Vec<u8>) -> Self {
        Payload::new(val)
    }
}

impl From<&[u8]> for Payload {
    fn from(val: &[u8]) -> Self {
        Payload::new(val)
    }
}

impl From<&str> for Payload {
    fn from(val: &str) -> Self {
        Payload::new(val)
    }
}

impl<const L: usize> From<[u8; L]> for Payload {
    fn from(val: [u8; L]) -> Self {
        Payload::new(val)
    }
}

impl<const L: usize> From<&[u8; L]> for Payload {
    fn from(val: &[u8; L]) -> Self {
        Payload::new(val)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prepend_header() {
        let mut payload = Payload::new(b"body");
        payload.prepend(b"header");
        assert_eq!(payload.len(), 10);
        assert_eq!(payload.to_vec(), b"headerbody");
    }

    #[test]
    fn range_spans_chunks() {
        let mut payload = Payload::new(b"body");
        payload.prepend(b"header");
        let middle = payload.range(3, 5);
        assert_eq!(middle.to_vec(), b"derbo");
    }

    #[test]
    fn range_aliases_storage() {
        let payload = Payload::new(vec![7u8; 2048]);
        let window = payload.range(512, 1024);
        assert_eq!(window.len(), 1024);
        // Narrowing a narrowed payload still refers to the same chunk.
        let again = window.range(0, 16);
        assert_eq!(again.to_vec(), vec![7u8; 16]);
        assert!(Arc::ptr_eq(
            &payload.spans[0].chunk.0,
            &again.spans[0].chunk.0
        ));
    }

    #[test]
    fn empty_ranges() {
        let payload = Payload::new(b"data");
        assert!(payload.range(4, 0).is_empty());
        assert!(payload.range(0, 0).is_empty());
    }
}
