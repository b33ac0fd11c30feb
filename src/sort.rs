//! External sorter.

use log;
use std::collections::TryReserveError;
use std::error::Error;
use std::fmt;
use std::fmt::Display;
use std::io::{self, prelude::*};
use std::path::Path;

use crate::buffer::{ByteBuffer, OutputBuffer};
use crate::chunk::{ChunkStore, TempDirChunkStore};
use crate::merger::{KWayMerger, MergeStats};
use crate::record::{extract_records, sort_records, RecordRef};

/// Default sort buffer size, also used as the merge read-ahead region.
pub const DEFAULT_BLOCK_SIZE: usize = 256 * 1024 * 1024;
/// Default merge output buffer size.
pub const DEFAULT_OUTPUT_BUFFER_SIZE: usize = 32 * 1024 * 1024;
/// Default record delimiter.
pub const DEFAULT_DELIMITER: u8 = b'\n';

/// Sorting phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Chunk sorting.
    Sort,
    /// Chunk merging.
    Merge,
}

impl Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Sort => write!(f, "sort"),
            Phase::Merge => write!(f, "merge"),
        }
    }
}

/// Target of a failed I/O operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoTarget {
    Input,
    Output,
    Chunk(usize),
}

impl Display for IoTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IoTarget::Input => write!(f, "input"),
            IoTarget::Output => write!(f, "output"),
            IoTarget::Chunk(index) => write!(f, "chunk {}", index),
        }
    }
}

/// Sorting error. Every error aborts the run.
#[derive(Debug)]
pub enum SortError {
    /// Invalid sorter configuration.
    Config(String),
    /// Buffer allocation error.
    Allocation { requested: usize, source: TryReserveError },
    /// Temporary directory creation error.
    TempDir(io::Error),
    /// Input, output or chunk I/O error.
    Io {
        phase: Phase,
        target: IoTarget,
        source: io::Error,
    },
    /// A record together with its delimiter does not fit into the buffer it has to be read into.
    RecordTooLarge {
        phase: Phase,
        chunk: Option<usize>,
        capacity: usize,
    },
    /// A chunk is missing or its content can't be split into records.
    MalformedChunk { chunk: usize, reason: String },
}

impl Error for SortError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match &self {
            SortError::Allocation { source, .. } => Some(source),
            SortError::TempDir(err) => Some(err),
            SortError::Io { source, .. } => Some(source),
            SortError::Config(_) | SortError::RecordTooLarge { .. } | SortError::MalformedChunk { .. } => None,
        }
    }
}

impl Display for SortError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self {
            SortError::Config(msg) => write!(f, "invalid configuration: {}", msg),
            SortError::Allocation { requested, source } => {
                write!(f, "{} bytes buffer allocation failed: {}", requested, source)
            }
            SortError::TempDir(err) => write!(f, "temporary directory not created: {}", err),
            SortError::Io { phase, target, source } => {
                write!(f, "{} phase: I/O operation on {} failed: {}", phase, target, source)
            }
            SortError::RecordTooLarge {
                phase,
                chunk: Some(chunk),
                capacity,
            } => write!(
                f,
                "{} phase: chunk {} has a record exceeding the {} bytes buffer",
                phase, chunk, capacity
            ),
            SortError::RecordTooLarge {
                phase,
                chunk: None,
                capacity,
            } => write!(f, "{} phase: records can't exceed the {} bytes buffer", phase, capacity),
            SortError::MalformedChunk { chunk, reason } => {
                write!(f, "{} phase: chunk {} is malformed: {}", Phase::Merge, chunk, reason)
            }
        }
    }
}

/// Sorting run statistics.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SortStats {
    /// Number of sorted chunks created.
    pub chunks: usize,
    /// Number of records sorted.
    pub records: u64,
    /// Number of input bytes consumed.
    pub input_bytes: u64,
    /// Number of output bytes written.
    pub output_bytes: u64,
}

/// External sorter builder. Provides methods for [`ExternalSorter`] initialization.
#[derive(Clone)]
pub struct ExternalSorterBuilder {
    /// Sort buffer size.
    block_size: usize,
    /// Merge output buffer size.
    output_buffer_size: usize,
    /// Record delimiter.
    delimiter: u8,
    /// Directory to be used to store temporary data.
    tmp_dir: Option<Box<Path>>,
    /// Chunk file write buffer size.
    rw_buf_size: Option<usize>,
}

impl ExternalSorterBuilder {
    /// Creates an instance of a builder with default parameters.
    pub fn new() -> Self {
        ExternalSorterBuilder::default()
    }

    /// Builds an [`ExternalSorter`] storing chunks in a temporary directory.
    /// Buffers are allocated before the directory is created.
    pub fn build(self) -> Result<ExternalSorter<TempDirChunkStore>, SortError> {
        let (buffer, output) = self.allocate()?;
        let store =
            TempDirChunkStore::new(self.tmp_dir.as_deref(), self.rw_buf_size).map_err(|err| SortError::TempDir(err))?;

        return Ok(ExternalSorter::from_parts(store, buffer, output, self.delimiter));
    }

    /// Builds an [`ExternalSorter`] storing chunks in the provided store.
    pub fn build_with_store<S: ChunkStore>(self, store: S) -> Result<ExternalSorter<S>, SortError> {
        let (buffer, output) = self.allocate()?;

        return Ok(ExternalSorter::from_parts(store, buffer, output, self.delimiter));
    }

    /// Sets sort buffer size. The same amount of memory is shared by all chunks during the merge,
    /// so the largest record must fit into `block_size / chunks` bytes.
    pub fn with_block_size(mut self, block_size: usize) -> ExternalSorterBuilder {
        self.block_size = block_size;
        return self;
    }

    /// Sets merge output buffer size.
    pub fn with_output_buffer_size(mut self, output_buffer_size: usize) -> ExternalSorterBuilder {
        self.output_buffer_size = output_buffer_size;
        return self;
    }

    /// Sets record delimiter.
    pub fn with_delimiter(mut self, delimiter: u8) -> ExternalSorterBuilder {
        self.delimiter = delimiter;
        return self;
    }

    /// Sets directory to be used to store temporary data.
    pub fn with_tmp_dir(mut self, path: &Path) -> ExternalSorterBuilder {
        self.tmp_dir = Some(path.into());
        return self;
    }

    /// Sets chunk file write buffer size.
    pub fn with_rw_buf_size(mut self, buf_size: usize) -> ExternalSorterBuilder {
        self.rw_buf_size = Some(buf_size);
        return self;
    }

    fn validate(&self) -> Result<(), SortError> {
        if self.block_size == 0 {
            return Err(SortError::Config("block size must be positive".to_string()));
        }
        if self.block_size > u32::MAX as usize {
            return Err(SortError::Config(format!(
                "block size {} exceeds the maximum of {} bytes",
                self.block_size,
                u32::MAX
            )));
        }
        if self.output_buffer_size == 0 {
            return Err(SortError::Config("output buffer size must be positive".to_string()));
        }

        return Ok(());
    }

    fn allocate(&self) -> Result<(ByteBuffer<Vec<u8>>, OutputBuffer), SortError> {
        self.validate()?;

        log::info!(
            "allocating buffers (block: {} bytes, output: {} bytes)",
            self.block_size,
            self.output_buffer_size
        );
        let buffer = ByteBuffer::allocate(self.block_size).map_err(|err| SortError::Allocation {
            requested: self.block_size,
            source: err,
        })?;
        let output = OutputBuffer::allocate(self.output_buffer_size, self.delimiter).map_err(|err| {
            SortError::Allocation {
                requested: self.output_buffer_size,
                source: err,
            }
        })?;

        return Ok((buffer, output));
    }
}

impl Default for ExternalSorterBuilder {
    fn default() -> Self {
        ExternalSorterBuilder {
            block_size: DEFAULT_BLOCK_SIZE,
            output_buffer_size: DEFAULT_OUTPUT_BUFFER_SIZE,
            delimiter: DEFAULT_DELIMITER,
            tmp_dir: None,
            rw_buf_size: None,
        }
    }
}

/// External sorter.
///
/// Sorts delimiter-terminated records in two phases. The input is read block by block into the sort buffer,
/// each block is sorted and saved as a chunk. The chunks are then merged using the same buffer split into
/// equal read-ahead buffers, one per chunk.
pub struct ExternalSorter<S: ChunkStore = TempDirChunkStore> {
    /// Sorted chunks storage.
    store: S,
    /// Sort buffer, partitioned between chunks during the merge.
    buffer: ByteBuffer<Vec<u8>>,
    /// Record references of the current sort buffer fill.
    refs: Vec<RecordRef>,
    /// Merge output buffer.
    output: OutputBuffer,
    /// Record delimiter.
    delimiter: u8,
}

impl<S: ChunkStore> ExternalSorter<S> {
    fn from_parts(store: S, buffer: ByteBuffer<Vec<u8>>, output: OutputBuffer, delimiter: u8) -> Self {
        ExternalSorter {
            store,
            buffer,
            refs: Vec::new(),
            output,
            delimiter,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Sorts records from the input starting at its current position and writes them to the output.
    /// Records not terminated at the end of the input are terminated in the output.
    ///
    /// # Arguments
    /// * `input` - Input stream records to be fetched from
    /// * `output` - Output stream sorted records to be written to
    pub fn sort<R, W>(&mut self, input: &mut R, output: &mut W) -> Result<SortStats, SortError>
    where
        R: Read + Seek,
        W: Write,
    {
        let mut stats = self.sort_chunks(input)?;
        log::info!(
            "external sort preparation done ({} chunks, {} records, {} bytes)",
            stats.chunks,
            stats.records,
            stats.input_bytes
        );

        let merged = self.merge_chunks(stats.chunks, output)?;
        stats.output_bytes = merged.bytes;
        log::info!("merge done ({} records, {} bytes)", merged.records, merged.bytes);

        for index in 0..stats.chunks {
            if let Err(err) = self.store.remove_chunk(index) {
                log::warn!("chunk {} removal failed: {}", index, err);
            }
        }

        return Ok(stats);
    }

    /// Splits the input into sorted chunks. Returns the statistics with the output fields unset.
    pub fn sort_chunks<R>(&mut self, input: &mut R) -> Result<SortStats, SortError>
    where
        R: Read + Seek,
    {
        let input_error = |err| SortError::Io {
            phase: Phase::Sort,
            target: IoTarget::Input,
            source: err,
        };

        let start = input.stream_position().map_err(input_error)?;
        let capacity = self.buffer.capacity();
        let mut file_offset = start;
        let mut stats = SortStats::default();

        loop {
            let chunk = stats.chunks;

            input.seek(io::SeekFrom::Start(file_offset)).map_err(input_error)?;
            let read = self.buffer.fill_from(input).map_err(input_error)?;
            if read == 0 {
                break;
            }
            log::debug!("chunk {} read ({} bytes)", chunk, read);

            let at_end = read < capacity;
            let fragment = extract_records(self.buffer.filled(), self.delimiter, &mut self.refs);
            if fragment > 0 {
                if at_end {
                    self.refs.push(RecordRef::new(read - fragment, fragment));
                } else if self.refs.is_empty() {
                    return Err(SortError::RecordTooLarge {
                        phase: Phase::Sort,
                        chunk: Some(chunk),
                        capacity,
                    });
                }
            }
            let consumed = if at_end { read } else { read - fragment };
            file_offset += consumed as u64;
            log::debug!("chunk {} parsed ({} records)", chunk, self.refs.len());

            sort_records(self.buffer.filled(), &mut self.refs);
            log::debug!("chunk {} sorted", chunk);

            self.save_chunk(chunk)?;
            log::debug!("chunk {} saved", chunk);

            stats.chunks += 1;
            stats.records += self.refs.len() as u64;
            stats.input_bytes += consumed as u64;

            if at_end {
                break;
            }
        }
        self.refs.clear();

        return Ok(stats);
    }

    fn save_chunk(&mut self, index: usize) -> Result<(), SortError> {
        let chunk_error = |err| SortError::Io {
            phase: Phase::Sort,
            target: IoTarget::Chunk(index),
            source: err,
        };

        let buf = self.buffer.filled();
        let delimiter = [self.delimiter];
        let mut writer = self.store.create_chunk(index).map_err(chunk_error)?;

        for record in &self.refs {
            writer.write_all(record.resolve(buf)).map_err(chunk_error)?;
            writer.write_all(&delimiter).map_err(chunk_error)?;
        }
        writer.flush().map_err(chunk_error)?;

        return Ok(());
    }

    /// Merges chunks `0..chunks` of the store into the output.
    pub fn merge_chunks<W>(&mut self, chunks: usize, output: &mut W) -> Result<MergeStats, SortError>
    where
        W: Write,
    {
        if chunks == 0 {
            self.output.flush(output).map_err(|err| SortError::Io {
                phase: Phase::Merge,
                target: IoTarget::Output,
                source: err,
            })?;
            return Ok(MergeStats::default());
        }

        if self.buffer.capacity() / chunks == 0 {
            return Err(SortError::RecordTooLarge {
                phase: Phase::Merge,
                chunk: None,
                capacity: 0,
            });
        }

        log::info!(
            "merging {} chunks ({} bytes buffer per chunk)",
            chunks,
            self.buffer.capacity() / chunks
        );

        let mut readers = Vec::with_capacity(chunks);
        for index in 0..chunks {
            let reader = self.store.open_chunk(index).map_err(|err| match err.kind() {
                io::ErrorKind::NotFound => SortError::MalformedChunk {
                    chunk: index,
                    reason: "missing".to_string(),
                },
                _ => SortError::Io {
                    phase: Phase::Merge,
                    target: IoTarget::Chunk(index),
                    source: err,
                },
            })?;
            readers.push(reader);
        }

        let buffers = self.buffer.partition(chunks);
        let merger = KWayMerger::new(readers, buffers, self.delimiter)?;

        return merger.merge_into(&mut self.output, output);
    }
}
