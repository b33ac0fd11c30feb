//! Binary heap merger.

use std::cmp::Ordering;
use std::io::{self, prelude::*};

use crate::buffer::{ByteBuffer, OutputBuffer};
use crate::record::{compare_records, extract_records, RecordRef};
use crate::sort::{IoTarget, Phase, SortError};

/// Merge statistics.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MergeStats {
    /// Number of records written to the output.
    pub records: u64,
    /// Number of bytes written to the output, delimiters included.
    pub bytes: u64,
}

/// Read cursor over one sorted chunk. Reads the chunk into its own fixed-size buffer piece by piece,
/// never splitting a record between two fills.
pub struct SourceCursor<'a, R> {
    chunk: usize,
    reader: R,
    chunk_len: u64,
    /// Chunk bytes already consumed, the unterminated tail of the last fill excluded.
    file_offset: u64,
    buffer: ByteBuffer<&'a mut [u8]>,
    refs: Vec<RecordRef>,
    current: usize,
    delimiter: u8,
    refills: u64,
}

impl<'a, R> SourceCursor<'a, R>
where
    R: Read + Seek,
{
    /// Opens a cursor over the chunk `chunk` and performs the first fill.
    pub fn open(
        chunk: usize,
        mut reader: R,
        buffer: ByteBuffer<&'a mut [u8]>,
        delimiter: u8,
    ) -> Result<Self, SortError> {
        let chunk_len = reader.seek(io::SeekFrom::End(0)).map_err(|err| chunk_error(chunk, err))?;

        let mut cursor = SourceCursor {
            chunk,
            reader,
            chunk_len,
            file_offset: 0,
            buffer,
            refs: Vec::new(),
            current: 0,
            delimiter,
            refills: 0,
        };
        cursor.refill()?;

        return Ok(cursor);
    }

    pub fn chunk(&self) -> usize {
        self.chunk
    }

    /// Returns the smallest unconsumed record of the chunk.
    pub fn head(&self) -> Option<RecordRef> {
        self.refs.get(self.current).copied()
    }

    /// Returns the bytes of a record extracted by the current fill.
    pub fn record(&self, record: RecordRef) -> &[u8] {
        record.resolve(self.buffer.filled())
    }

    pub fn generation(&self) -> u64 {
        self.buffer.generation()
    }

    pub fn is_exhausted(&self) -> bool {
        self.current >= self.refs.len() && self.file_offset >= self.chunk_len
    }

    /// Number of buffer fills performed so far.
    pub fn refills(&self) -> u64 {
        self.refills
    }

    /// Consumes the current head and returns the next one, refilling the buffer when needed.
    /// Every previously returned reference is invalid after this call.
    pub fn advance(&mut self) -> Result<Option<RecordRef>, SortError> {
        self.current += 1;
        if self.current >= self.refs.len() {
            self.refill()?;
        }

        return Ok(self.head());
    }

    /// Reads the next part of the chunk into the buffer and extracts its records.
    ///
    /// A buffer filled up without a single delimiter is reported as [`SortError::RecordTooLarge`], even if the
    /// bytes read are the unterminated end of the chunk.
    fn refill(&mut self) -> Result<(), SortError> {
        self.refs.clear();
        self.current = 0;

        if self.file_offset >= self.chunk_len {
            self.buffer.clear();
            return Ok(());
        }

        let chunk = self.chunk;
        self.reader
            .seek(io::SeekFrom::Start(self.file_offset))
            .map_err(|err| chunk_error(chunk, err))?;
        let read = self
            .buffer
            .fill_from(&mut self.reader)
            .map_err(|err| chunk_error(chunk, err))?;
        self.refills += 1;

        if read == 0 {
            return Err(SortError::MalformedChunk {
                chunk,
                reason: format!("truncated at offset {} of {}", self.file_offset, self.chunk_len),
            });
        }

        let fragment = extract_records(self.buffer.filled(), self.delimiter, &mut self.refs);
        let at_end = read < self.buffer.capacity();

        if self.refs.is_empty() && !at_end {
            return Err(SortError::RecordTooLarge {
                phase: Phase::Merge,
                chunk: Some(chunk),
                capacity: self.buffer.capacity(),
            });
        }
        if fragment > 0 && at_end {
            return Err(SortError::MalformedChunk {
                chunk,
                reason: format!("unterminated record at offset {}", self.file_offset + (read - fragment) as u64),
            });
        }

        log::trace!(
            "chunk {} refilled at offset {} ({} records)",
            chunk,
            self.file_offset,
            self.refs.len()
        );
        self.file_offset += (read - fragment) as u64;

        return Ok(());
    }
}

fn chunk_error(chunk: usize, err: io::Error) -> SortError {
    SortError::Io {
        phase: Phase::Merge,
        target: IoTarget::Chunk(chunk),
        source: err,
    }
}

/// Merge heap entry: the current head record of one source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapEntry {
    pub record: RecordRef,
    pub source: usize,
    /// Fill generation of the source buffer the record was extracted from.
    pub generation: u64,
}

/// Binary min-heap whose order is defined by a comparator over the entries.
/// The entries do not own the records they are ordered by, so the comparator is supplied by every operation.
pub struct MergeHeap {
    entries: Vec<HeapEntry>,
}

impl MergeHeap {
    pub fn with_capacity(capacity: usize) -> Self {
        MergeHeap {
            entries: Vec::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn peek(&self) -> Option<&HeapEntry> {
        self.entries.first()
    }

    pub fn push<F>(&mut self, entry: HeapEntry, less: &F)
    where
        F: Fn(&HeapEntry, &HeapEntry) -> bool,
    {
        self.entries.push(entry);
        self.sift_up(self.entries.len() - 1, less);
    }

    pub fn pop<F>(&mut self, less: &F) -> Option<HeapEntry>
    where
        F: Fn(&HeapEntry, &HeapEntry) -> bool,
    {
        let last = self.entries.pop()?;
        if self.entries.is_empty() {
            return Some(last);
        }

        let top = std::mem::replace(&mut self.entries[0], last);
        self.sift_down(0, less);

        return Some(top);
    }

    /// Replaces the minimum with `entry`. Cheaper than a pop followed by a push.
    ///
    /// # Panics
    /// Panics if the heap is empty.
    pub fn replace_top<F>(&mut self, entry: HeapEntry, less: &F) -> HeapEntry
    where
        F: Fn(&HeapEntry, &HeapEntry) -> bool,
    {
        let top = std::mem::replace(&mut self.entries[0], entry);
        self.sift_down(0, less);

        return top;
    }

    fn sift_up<F>(&mut self, mut i: usize, less: &F)
    where
        F: Fn(&HeapEntry, &HeapEntry) -> bool,
    {
        while i > 0 {
            let parent = (i - 1) / 2;
            if !less(&self.entries[i], &self.entries[parent]) {
                break;
            }
            self.entries.swap(i, parent);
            i = parent;
        }
    }

    fn sift_down<F>(&mut self, mut i: usize, less: &F)
    where
        F: Fn(&HeapEntry, &HeapEntry) -> bool,
    {
        let n = self.entries.len();
        loop {
            let left = 2 * i + 1;
            if left >= n {
                break;
            }

            let right = left + 1;
            let mut child = left;
            if right < n && less(&self.entries[right], &self.entries[left]) {
                child = right;
            }

            if !less(&self.entries[child], &self.entries[i]) {
                break;
            }
            self.entries.swap(i, child);
            i = child;
        }
    }
}

/// Heap order: record collation, lower source index first among equal records.
fn entry_less<R>(cursors: &[SourceCursor<'_, R>], a: &HeapEntry, b: &HeapEntry) -> bool
where
    R: Read + Seek,
{
    let record_a = resolve_entry(cursors, a);
    let record_b = resolve_entry(cursors, b);

    compare_records(record_a, record_b).then_with(|| a.source.cmp(&b.source)) == Ordering::Less
}

fn resolve_entry<'c, R>(cursors: &'c [SourceCursor<'_, R>], entry: &HeapEntry) -> &'c [u8]
where
    R: Read + Seek,
{
    let cursor = &cursors[entry.source];
    debug_assert_eq!(entry.generation, cursor.generation(), "stale record reference");

    cursor.record(entry.record)
}

/// Binary heap merger implementation.
/// Merges multiple sorted chunks into a single sorted output.
/// Time complexity is *m* \* log(*n*) in worst case where *m* is the number of records,
/// *n* is the number of chunks.
pub struct KWayMerger<'a, R> {
    cursors: Vec<SourceCursor<'a, R>>,
    heap: MergeHeap,
}

impl<'a, R> KWayMerger<'a, R>
where
    R: Read + Seek,
{
    /// Creates a merger over sorted chunks, reading the chunk `i` from `readers[i]` into `buffers[i]`.
    /// Records of each chunk should be sorted in collation order otherwise the result is undefined.
    ///
    /// # Panics
    /// Panics if the number of readers and buffers differ.
    pub fn new(readers: Vec<R>, buffers: Vec<ByteBuffer<&'a mut [u8]>>, delimiter: u8) -> Result<Self, SortError> {
        assert_eq!(readers.len(), buffers.len(), "each chunk requires its own buffer");

        let mut cursors = Vec::with_capacity(readers.len());
        for (chunk, (reader, buffer)) in readers.into_iter().zip(buffers).enumerate() {
            cursors.push(SourceCursor::open(chunk, reader, buffer, delimiter)?);
        }

        let mut heap = MergeHeap::with_capacity(cursors.len());
        for (source, cursor) in cursors.iter().enumerate() {
            if let Some(record) = cursor.head() {
                let entry = HeapEntry {
                    record,
                    source,
                    generation: cursor.generation(),
                };
                heap.push(entry, &|a: &HeapEntry, b: &HeapEntry| entry_less(&cursors, a, b));
            }
        }

        return Ok(KWayMerger { cursors, heap });
    }

    /// Writes all records in collation order through `output` to `writer` and flushes both.
    pub fn merge_into<W: Write>(self, output: &mut OutputBuffer, writer: &mut W) -> Result<MergeStats, SortError> {
        let KWayMerger { mut cursors, mut heap } = self;
        let mut stats = MergeStats::default();

        while let Some(&top) = heap.peek() {
            let record = resolve_entry(&cursors, &top);
            output.push(record, writer).map_err(output_error)?;
            stats.records += 1;
            stats.bytes += record.len() as u64 + 1;

            let cursor = &mut cursors[top.source];
            match cursor.advance()? {
                Some(record) => {
                    let entry = HeapEntry {
                        record,
                        source: top.source,
                        generation: cursor.generation(),
                    };
                    heap.replace_top(entry, &|a: &HeapEntry, b: &HeapEntry| entry_less(&cursors, a, b));
                }
                None => {
                    debug_assert!(cursor.is_exhausted());
                    log::debug!("chunk {} exhausted after {} refills", cursor.chunk(), cursor.refills());
                    heap.pop(&|a: &HeapEntry, b: &HeapEntry| entry_less(&cursors, a, b));
                }
            }
        }

        output.flush(writer).map_err(output_error)?;
        log::debug!("merge output flushed {} times", output.flushes());

        return Ok(stats);
    }
}

fn output_error(err: io::Error) -> SortError {
    SortError::Io {
        phase: Phase::Merge,
        target: IoTarget::Output,
        source: err,
    }
}

#[cfg(test)]
mod test {
    use std::io;

    use rand::seq::SliceRandom;
    use rstest::*;

    use super::{HeapEntry, KWayMerger, MergeHeap, SourceCursor};
    use crate::buffer::{ByteBuffer, OutputBuffer};
    use crate::record::RecordRef;
    use crate::sort::{Phase, SortError};

    fn merge(chunks: &[&[u8]], region: usize, output_size: usize) -> Result<Vec<u8>, SortError> {
        let mut buffer = ByteBuffer::allocate(region).unwrap();
        let buffers = if chunks.is_empty() { Vec::new() } else { buffer.partition(chunks.len()) };
        let readers = chunks.iter().map(|chunk| io::Cursor::new(*chunk)).collect();

        let mut output = OutputBuffer::allocate(output_size, b'\n').unwrap();
        let mut result = Vec::new();
        let merger = KWayMerger::new(readers, buffers, b'\n')?;
        let stats = merger.merge_into(&mut output, &mut result)?;
        assert_eq!(stats.bytes, result.len() as u64);

        return Ok(result);
    }

    #[rstest]
    #[case(vec![], b"")]
    #[case(vec![b"".as_slice(), b"".as_slice()], b"")]
    #[case(
        vec![b"1\n22\n333\n".as_slice(), b"2\n33\n444\n".as_slice(), b"5\n66\n555\n".as_slice()],
        b"1\n2\n5\n22\n33\n66\n333\n444\n555\n",
    )]
    #[case(vec![b"7\n".as_slice(), b"7\n".as_slice()], b"7\n7\n")]
    #[case(vec![b"\n\n1\n".as_slice(), b"\n".as_slice()], b"\n\n\n1\n")]
    #[case(
        vec![b"4\n5\n7\n".as_slice(), b"1\n6\n".as_slice(), b"3\n".as_slice(), b"".as_slice()],
        b"1\n3\n4\n5\n6\n7\n",
    )]
    fn test_merger(#[case] chunks: Vec<&[u8]>, #[case] expected: &[u8]) {
        let actual = merge(&chunks, 24, 4).unwrap();
        assert_eq!(actual, expected);
    }

    #[test]
    fn test_merger_small_buffers_many_refills() {
        let mut values = Vec::from_iter(0..2000u32);
        values.shuffle(&mut rand::thread_rng());

        let mut chunks: Vec<Vec<u32>> = values.chunks(300).map(|c| c.to_vec()).collect();
        let chunks: Vec<Vec<u8>> = chunks
            .iter_mut()
            .map(|chunk| {
                chunk.sort();
                chunk.iter().map(|v| format!("{}\n", v)).collect::<String>().into_bytes()
            })
            .collect();
        let chunk_refs: Vec<&[u8]> = chunks.iter().map(|c| c.as_slice()).collect();

        let actual = merge(&chunk_refs, 7 * 16, 64).unwrap();
        let expected: String = (0..2000u32).map(|v| format!("{}\n", v)).collect();

        assert_eq!(String::from_utf8(actual).unwrap(), expected);
    }

    #[test]
    fn test_merger_record_too_large() {
        let result = merge(&[b"1\n".as_slice(), b"123456789\n".as_slice()], 16, 16);

        match result {
            Err(SortError::RecordTooLarge {
                phase: Phase::Merge,
                chunk: Some(1),
                capacity: 8,
            }) => {}
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[rstest]
    #[case(b"1\n2")]
    #[case(b"12")]
    fn test_merger_malformed_chunk(#[case] chunk: &[u8]) {
        let result = merge(&[b"1\n".as_slice(), chunk], 32, 16);

        match result {
            Err(SortError::MalformedChunk { chunk: 1, .. }) => {}
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_source_cursor() {
        let mut buffer = ByteBuffer::allocate(5).unwrap();
        let mut buffers = buffer.partition(1);
        let buffer = buffers.pop().unwrap();

        let mut cursor = SourceCursor::open(0, io::Cursor::new(b"1\n22\n333\n"), buffer, b'\n').unwrap();
        let mut records = Vec::new();
        let mut head = cursor.head();
        while let Some(record) = head {
            records.push(String::from_utf8(cursor.record(record).to_vec()).unwrap());
            head = cursor.advance().unwrap();
        }

        assert_eq!(records, vec!["1", "22", "333"]);
        assert!(cursor.is_exhausted());
        assert_eq!(cursor.refills(), 2);
    }

    #[test]
    fn test_heap_tie_break_by_source() {
        let keys = [3u32, 1, 2, 1, 3];
        let less = |a: &HeapEntry, b: &HeapEntry| (keys[a.source], a.source) < (keys[b.source], b.source);

        let mut heap = MergeHeap::with_capacity(keys.len());
        for source in [4, 2, 0, 3, 1] {
            let entry = HeapEntry {
                record: RecordRef::new(0, 0),
                source,
                generation: 0,
            };
            heap.push(entry, &less);
        }
        assert_eq!(heap.len(), 5);

        let mut order = Vec::new();
        while let Some(entry) = heap.pop(&less) {
            order.push(entry.source);
        }

        assert_eq!(order, vec![1, 3, 2, 0, 4]);
        assert!(heap.is_empty());
    }
}
