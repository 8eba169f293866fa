//! Output Buffer
//!
//! An operation's result lands either in an inline span the caller lends for
//! the duration of the call, or in a heap buffer allocated on demand when the
//! span is too small. Exactly one of the two is active at any time.
//!
//! ```text
//!   OutputBuffer::inline(&mut span)          OutputBuffer::unbound()
//!            │                                        │
//!            │ write(n), n <= span.len()              │ write(n), n > 0
//!            ▼                                        ▼
//!     Inline { span, len: n }      ──n too big──>  Heap(HeapBuffer)
//!            │                                        │
//!            │ finalize()                             │ finalize()
//!            ▼                                        ▼
//!     Output::Inline(&[u8])                     Output::Heap(HeapBuffer)
//! ```
//!
//! The heap form has a single owner. It is released exactly once, either by
//! [`HeapBuffer::release`] or when its owner goes out of scope.

use bytes::Bytes;

/// Result container for one store operation.
#[derive(Debug)]
pub enum OutputBuffer<'a> {
    /// Caller-supplied span; `len` bytes of it are valid
    Inline { span: &'a mut [u8], len: usize },
    /// Heap allocation owned by this buffer
    Heap(HeapBuffer),
}

impl Default for OutputBuffer<'_> {
    fn default() -> Self {
        Self::unbound()
    }
}

impl<'a> OutputBuffer<'a> {
    /// Output backed by a caller span.
    pub fn inline(span: &'a mut [u8]) -> Self {
        OutputBuffer::Inline { span, len: 0 }
    }

    /// Output with no span: any non-empty result is heap-allocated.
    pub fn unbound() -> Self {
        OutputBuffer::Inline {
            span: &mut [],
            len: 0,
        }
    }

    /// Returns a writable region of exactly `capacity_hint` bytes.
    ///
    /// Stays inline when the hint fits the span; otherwise switches to (or
    /// reuses) the heap form. At most one allocation happens per call.
    pub fn write(&mut self, capacity_hint: usize) -> &mut [u8] {
        let fits_inline =
            matches!(self, OutputBuffer::Inline { span, .. } if capacity_hint <= span.len());

        if !fits_inline {
            if let OutputBuffer::Inline { .. } = self {
                *self = OutputBuffer::Heap(HeapBuffer::with_capacity(capacity_hint));
            }
        }

        match self {
            OutputBuffer::Inline { span, len } => {
                *len = capacity_hint;
                &mut span[..capacity_hint]
            }
            OutputBuffer::Heap(heap) => {
                heap.data.clear();
                heap.data.resize(capacity_hint, 0);
                &mut heap.data[..]
            }
        }
    }

    /// Replaces the contents with `bytes`.
    pub fn fill(&mut self, bytes: &[u8]) {
        self.write(bytes.len()).copy_from_slice(bytes);
    }

    /// Shortens the valid region; no-op if `new_len` is not shorter.
    pub fn truncate(&mut self, new_len: usize) {
        match self {
            OutputBuffer::Inline { len, .. } => *len = (*len).min(new_len),
            OutputBuffer::Heap(heap) => heap.data.truncate(new_len),
        }
    }

    /// Drops the contents but keeps the representation.
    pub fn clear(&mut self) {
        self.truncate(0);
    }

    pub fn is_inline(&self) -> bool {
        matches!(self, OutputBuffer::Inline { .. })
    }

    pub fn len(&self) -> usize {
        match self {
            OutputBuffer::Inline { len, .. } => *len,
            OutputBuffer::Heap(heap) => heap.data.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_slice(&self) -> &[u8] {
        match self {
            OutputBuffer::Inline { span, len } => &span[..*len],
            OutputBuffer::Heap(heap) => &heap.data,
        }
    }

    /// Ends the call: yields a read-only view, plus ownership of the heap
    /// allocation when there is one.
    pub fn finalize(self) -> Output<'a> {
        match self {
            OutputBuffer::Inline { span, len } => {
                let span: &'a [u8] = span;
                Output::Inline(&span[..len])
            }
            OutputBuffer::Heap(heap) => Output::Heap(heap),
        }
    }
}

/// A finalized operation result.
#[derive(Debug)]
pub enum Output<'a> {
    Inline(&'a [u8]),
    Heap(HeapBuffer),
}

impl Output<'_> {
    pub fn as_slice(&self) -> &[u8] {
        match self {
            Output::Inline(bytes) => bytes,
            Output::Heap(heap) => heap.as_slice(),
        }
    }

    /// Converts into owned bytes. The heap form is handed over without a copy.
    pub fn into_bytes(self) -> Bytes {
        match self {
            Output::Inline(bytes) => Bytes::copy_from_slice(bytes),
            Output::Heap(heap) => Bytes::from(heap.data),
        }
    }

    /// Releases the heap allocation, if any.
    pub fn release(self) {
        if let Output::Heap(heap) = self {
            heap.release();
        }
    }
}

/// Heap-backed output owned by exactly one holder.
#[derive(Debug, Default)]
pub struct HeapBuffer {
    data: Vec<u8>,
}

impl HeapBuffer {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Frees the allocation. Consuming `self` makes a second release impossible.
    pub fn release(self) {
        drop(self);
    }
}

/// Fixed header some RMW callbacks write instead of a RESP reply.
///
/// EXPIRE writes `result1 = 1` when the timeout was changed; PERSIST writes
/// `result1 = 1` when an expiration was removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutputHeader {
    pub result1: i32,
}

impl OutputHeader {
    pub const SIZE: usize = 4;

    pub fn new(result1: i32) -> Self {
        Self { result1 }
    }

    pub fn write_to(&self, output: &mut OutputBuffer<'_>) {
        output.fill(&self.result1.to_le_bytes());
    }

    /// Parses a header from the front of `bytes`.
    pub fn read(bytes: &[u8]) -> Option<Self> {
        let raw: [u8; Self::SIZE] = bytes.get(..Self::SIZE)?.try_into().ok()?;
        Some(Self {
            result1: i32::from_le_bytes(raw),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_write_stays_inline() {
        let mut span = [0u8; 16];
        let mut output = OutputBuffer::inline(&mut span);
        output.fill(b"hello");

        assert!(output.is_inline());
        assert_eq!(output.as_slice(), b"hello");
        assert!(matches!(output.finalize(), Output::Inline(b"hello")));
    }

    #[test]
    fn test_large_write_moves_to_heap() {
        let mut span = [0u8; 4];
        let mut output = OutputBuffer::inline(&mut span);
        output.fill(b"too large for the span");

        assert!(!output.is_inline());
        assert_eq!(output.as_slice(), b"too large for the span");

        let finalized = output.finalize();
        assert!(matches!(finalized, Output::Heap(_)));
        assert_eq!(finalized.into_bytes(), Bytes::from("too large for the span"));
    }

    #[test]
    fn test_unbound_output_is_heap_for_any_payload() {
        let mut output = OutputBuffer::unbound();
        assert!(output.is_inline());
        assert!(output.is_empty());

        output.fill(b"x");
        assert!(!output.is_inline());
    }

    #[test]
    fn test_heap_output_is_reused() {
        let mut output = OutputBuffer::unbound();
        output.fill(b"first value");
        output.fill(b"2nd");
        assert_eq!(output.as_slice(), b"2nd");
        assert!(!output.is_inline());
    }

    #[test]
    fn test_truncate_and_clear() {
        let mut span = [0u8; 8];
        let mut output = OutputBuffer::inline(&mut span);
        output.fill(b"abcdef");
        output.truncate(3);
        assert_eq!(output.as_slice(), b"abc");
        output.truncate(10);
        assert_eq!(output.as_slice(), b"abc");
        output.clear();
        assert!(output.is_empty());
    }

    #[test]
    fn test_release_heap_output() {
        let mut output = OutputBuffer::unbound();
        output.fill(&[7u8; 1024]);
        let finalized = output.finalize();
        assert_eq!(finalized.as_slice().len(), 1024);
        finalized.release();
    }

    #[test]
    fn test_output_header() {
        let mut span = [0u8; OutputHeader::SIZE];
        let mut output = OutputBuffer::inline(&mut span);
        OutputHeader::new(1).write_to(&mut output);

        assert!(output.is_inline());
        assert_eq!(OutputHeader::read(output.as_slice()), Some(OutputHeader::new(1)));
        assert_eq!(OutputHeader::read(&[1, 0]), None);
    }
}
