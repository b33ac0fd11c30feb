//! Fixed-capacity byte buffers.
//!
//! All buffers are allocated once when the sorter is built and reused for the whole run: the sort buffer is
//! overwritten for every chunk and later partitioned into per-source read-ahead buffers for the merge.

use std::collections::TryReserveError;
use std::io::{self, prelude::*};

/// Fixed-capacity byte buffer filled from a reader.
///
/// Every fill increments the buffer generation. Record references extracted from one generation must not be
/// used after the next fill.
pub struct ByteBuffer<B> {
    inner: B,
    filled: usize,
    generation: u64,
}

impl ByteBuffer<Vec<u8>> {
    /// Allocates a zeroed buffer of `capacity` bytes, reporting allocation failure instead of aborting.
    pub fn allocate(capacity: usize) -> Result<Self, TryReserveError> {
        let mut inner = Vec::new();
        inner.try_reserve_exact(capacity)?;
        inner.resize(capacity, 0);

        return Ok(ByteBuffer {
            inner,
            filled: 0,
            generation: 0,
        });
    }

    /// Splits the buffer into `parts` disjoint buffers of `capacity() / parts` bytes each.
    /// Remainder bytes are left unused. The current fill is discarded.
    ///
    /// # Panics
    /// Panics if `parts` is zero or greater than the capacity.
    pub fn partition(&mut self, parts: usize) -> Vec<ByteBuffer<&mut [u8]>> {
        assert!(parts > 0 && parts <= self.inner.len(), "invalid partition count: {}", parts);

        self.filled = 0;
        self.generation += 1;

        let part_size = self.inner.len() / parts;
        self.inner
            .chunks_exact_mut(part_size)
            .take(parts)
            .map(|inner| ByteBuffer {
                inner,
                filled: 0,
                generation: 0,
            })
            .collect()
    }
}

impl<B> ByteBuffer<B>
where
    B: AsRef<[u8]> + AsMut<[u8]>,
{
    pub fn capacity(&self) -> usize {
        self.inner.as_ref().len()
    }

    /// Returns the bytes of the current fill.
    pub fn filled(&self) -> &[u8] {
        &self.inner.as_ref()[..self.filled]
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Discards the current fill.
    pub fn clear(&mut self) {
        self.filled = 0;
        self.generation += 1;
    }

    /// Replaces the buffer content with up to `capacity()` bytes read from `reader`.
    /// Reads until the buffer is full or the reader reaches end of stream, so a short fill means end of stream.
    /// Returns the number of bytes read.
    pub fn fill_from<R: Read>(&mut self, reader: &mut R) -> io::Result<usize> {
        self.filled = 0;
        self.generation += 1;

        let buf = self.inner.as_mut();
        while self.filled < buf.len() {
            match reader.read(&mut buf[self.filled..]) {
                Ok(0) => break,
                Ok(n) => self.filled += n,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            }
        }

        return Ok(self.filled);
    }
}

/// Merge output buffer. Accumulates delimiter-terminated records and writes them out in batches of at most
/// `capacity` bytes.
pub struct OutputBuffer {
    inner: Vec<u8>,
    capacity: usize,
    delimiter: u8,
    flushes: u64,
}

impl OutputBuffer {
    pub fn allocate(capacity: usize, delimiter: u8) -> Result<Self, TryReserveError> {
        let mut inner = Vec::new();
        inner.try_reserve_exact(capacity)?;

        return Ok(OutputBuffer {
            inner,
            capacity,
            delimiter,
            flushes: 0,
        });
    }

    /// Appends a record followed by the delimiter, flushing to `writer` first if it would not fit.
    /// A record that exceeds the whole capacity bypasses the buffer.
    pub fn push<W: Write>(&mut self, record: &[u8], writer: &mut W) -> io::Result<()> {
        let required = record.len() + 1;
        if self.inner.len() + required > self.capacity {
            self.flush(writer)?;
        }

        if required > self.capacity {
            writer.write_all(record)?;
            writer.write_all(&[self.delimiter])?;
        } else {
            self.inner.extend_from_slice(record);
            self.inner.push(self.delimiter);
        }

        return Ok(());
    }

    /// Writes buffered bytes to `writer` and flushes it.
    pub fn flush<W: Write>(&mut self, writer: &mut W) -> io::Result<()> {
        if !self.inner.is_empty() {
            writer.write_all(&self.inner)?;
            self.inner.clear();
            self.flushes += 1;
        }

        return writer.flush();
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Number of non-empty flushes so far.
    pub fn flushes(&self) -> u64 {
        self.flushes
    }
}

#[cfg(test)]
mod test {
    use std::io;

    use rstest::*;

    use super::{ByteBuffer, OutputBuffer};

    /// Reader returning at most `step` bytes per call.
    struct Trickle<'a> {
        data: &'a [u8],
        step: usize,
    }

    impl<'a> io::Read for Trickle<'a> {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = self.step.min(buf.len()).min(self.data.len());
            buf[..n].copy_from_slice(&self.data[..n]);
            self.data = &self.data[n..];
            Ok(n)
        }
    }

    #[rstest]
    #[case(b"hello world", 4, b"hello wo")]
    #[case(b"hi", 4, b"hi")]
    #[case(b"", 4, b"")]
    fn test_fill_from(#[case] data: &[u8], #[case] step: usize, #[case] expected: &[u8]) {
        let mut buffer = ByteBuffer::allocate(8).unwrap();
        let mut reader = Trickle { data, step };

        let n = buffer.fill_from(&mut reader).unwrap();

        assert_eq!(n, expected.len());
        assert_eq!(buffer.filled(), expected);
        assert_eq!(buffer.generation(), 1);
    }

    #[test]
    fn test_fill_replaces_previous_content() {
        let mut buffer = ByteBuffer::allocate(4).unwrap();
        buffer.fill_from(&mut io::Cursor::new(b"abcd")).unwrap();
        buffer.fill_from(&mut io::Cursor::new(b"xy")).unwrap();

        assert_eq!(buffer.filled(), b"xy");
        assert_eq!(buffer.generation(), 2);
    }

    #[test]
    fn test_partition() {
        let mut buffer = ByteBuffer::allocate(10).unwrap();
        buffer.fill_from(&mut io::Cursor::new(b"0123456789")).unwrap();

        let mut parts = buffer.partition(3);
        assert_eq!(parts.len(), 3);
        assert!(parts.iter().all(|p| p.capacity() == 3 && p.filled().is_empty()));

        parts[0].fill_from(&mut io::Cursor::new(b"aaaa")).unwrap();
        parts[2].fill_from(&mut io::Cursor::new(b"c")).unwrap();
        assert_eq!(parts[0].filled(), b"aaa");
        assert_eq!(parts[1].filled(), b"");
        assert_eq!(parts[2].filled(), b"c");
    }

    #[test]
    fn test_output_buffer_flushes_on_overflow() {
        let mut output = OutputBuffer::allocate(6, b'\n').unwrap();
        let mut sink = Vec::new();

        output.push(b"11", &mut sink).unwrap();
        output.push(b"22", &mut sink).unwrap();
        assert!(sink.is_empty());
        assert_eq!(output.len(), 6);

        output.push(b"3", &mut sink).unwrap();
        assert_eq!(sink, b"11\n22\n");
        assert_eq!(output.len(), 2);

        output.flush(&mut sink).unwrap();
        assert_eq!(sink, b"11\n22\n3\n");
        assert_eq!(output.flushes(), 2);
    }

    #[test]
    fn test_output_buffer_oversized_record() {
        let mut output = OutputBuffer::allocate(4, b'\n').unwrap();
        let mut sink = Vec::new();

        output.push(b"1", &mut sink).unwrap();
        output.push(b"123456", &mut sink).unwrap();
        output.push(b"2", &mut sink).unwrap();
        output.flush(&mut sink).unwrap();

        assert_eq!(sink, b"1\n123456\n2\n");
    }
}
