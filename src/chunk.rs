//! Sorted chunk storage.

use std::fs;
use std::io::{self, prelude::*};
use std::path::{Path, PathBuf};

use tempfile;

/// Storage for sorted chunks. Chunks are addressed by index `0..N` in creation order.
///
/// A chunk is written once through the writer returned by [`ChunkStore::create_chunk`] and is complete as soon as
/// the writer has been flushed. During the merge all chunks are open for reading at the same time.
pub trait ChunkStore {
    type Writer<'a>: Write
    where
        Self: 'a;
    type Reader<'a>: Read + Seek
    where
        Self: 'a;

    /// Opens a fresh chunk for writing, replacing an existing one with the same index.
    fn create_chunk(&mut self, index: usize) -> io::Result<Self::Writer<'_>>;

    /// Opens a chunk for reading. Fails with [`io::ErrorKind::NotFound`] if the chunk does not exist.
    fn open_chunk(&self, index: usize) -> io::Result<Self::Reader<'_>>;

    /// Deletes a chunk that is no longer needed.
    fn remove_chunk(&mut self, index: usize) -> io::Result<()>;
}

/// Chunk store keeping one file per chunk in a temporary directory.
/// The directory and all remaining chunks are deleted when the store is dropped.
pub struct TempDirChunkStore {
    dir: tempfile::TempDir,
    rw_buf_size: Option<usize>,
}

impl TempDirChunkStore {
    /// Creates a store in a new temporary directory inside `tmp_path`, or inside the OS temporary directory
    /// if `tmp_path` is [`None`].
    pub fn new(tmp_path: Option<&Path>, rw_buf_size: Option<usize>) -> io::Result<Self> {
        let dir = if let Some(tmp_path) = tmp_path {
            tempfile::tempdir_in(tmp_path)
        } else {
            tempfile::tempdir()
        }?;

        log::info!("using {} as a temporary directory", dir.path().display());

        return Ok(TempDirChunkStore { dir, rw_buf_size });
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn chunk_path(&self, index: usize) -> PathBuf {
        self.dir.path().join(format!("chunk-{}", index))
    }
}

impl ChunkStore for TempDirChunkStore {
    type Writer<'a> = ChunkFileWriter;
    type Reader<'a> = fs::File;

    fn create_chunk(&mut self, index: usize) -> io::Result<Self::Writer<'_>> {
        let file = fs::File::create(self.chunk_path(index))?;

        let inner = match self.rw_buf_size {
            Some(buf_size) => io::BufWriter::with_capacity(buf_size, file),
            None => io::BufWriter::new(file),
        };

        return Ok(ChunkFileWriter { inner });
    }

    fn open_chunk(&self, index: usize) -> io::Result<Self::Reader<'_>> {
        fs::File::open(self.chunk_path(index))
    }

    fn remove_chunk(&mut self, index: usize) -> io::Result<()> {
        fs::remove_file(self.chunk_path(index))
    }
}

/// Buffered chunk file writer. Flushing also syncs the file data to the storage device.
pub struct ChunkFileWriter {
    inner: io::BufWriter<fs::File>,
}

impl Write for ChunkFileWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf)
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.inner.write_all(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()?;
        self.inner.get_ref().sync_data()
    }
}

/// In-memory chunk store.
#[derive(Default)]
pub struct MemoryChunkStore {
    chunks: Vec<Option<Vec<u8>>>,
}

impl MemoryChunkStore {
    pub fn new() -> Self {
        MemoryChunkStore::default()
    }

    /// Returns the content of a chunk.
    pub fn chunk(&self, index: usize) -> Option<&[u8]> {
        self.chunks.get(index)?.as_deref()
    }

    /// Number of chunks currently stored.
    pub fn len(&self) -> usize {
        self.chunks.iter().filter(|chunk| chunk.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ChunkStore for MemoryChunkStore {
    type Writer<'a> = &'a mut Vec<u8>;
    type Reader<'a> = io::Cursor<&'a [u8]>;

    fn create_chunk(&mut self, index: usize) -> io::Result<Self::Writer<'_>> {
        if self.chunks.len() <= index {
            self.chunks.resize_with(index + 1, || None);
        }

        let chunk = self.chunks[index].insert(Vec::new());
        return Ok(chunk);
    }

    fn open_chunk(&self, index: usize) -> io::Result<Self::Reader<'_>> {
        match self.chunk(index) {
            Some(chunk) => Ok(io::Cursor::new(chunk)),
            None => Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("chunk {} not found", index),
            )),
        }
    }

    fn remove_chunk(&mut self, index: usize) -> io::Result<()> {
        if let Some(chunk) = self.chunks.get_mut(index) {
            *chunk = None;
        }

        return Ok(());
    }
}
