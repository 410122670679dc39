//! Chunked, disk-backed row source.
//!
//! A [`StreamingDatasetCursor`] describes the source. Each call to
//! [`StreamingDatasetCursor::open`] starts a new pass from the first record:
//! the file is read `chunk_size` records at a time and regrouped into batches
//! of exactly `batch_size` rows. Batches may span chunk boundaries; a final
//! batch shorter than `batch_size` is dropped.

use std::collections::VecDeque;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{Receiver, SyncSender, sync_channel};
use std::thread::JoinHandle;

use csv::{Reader, ReaderBuilder, StringRecord};

use super::preprocessor::StreamPreprocessor;
use crate::widedeep::error::{Result, WideDeepError};

/// One preprocessed row and its absolute position in the source.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamRow {
    pub index: usize,
    pub values: Vec<f32>,
}

pub type RowBatch = Vec<StreamRow>;

#[derive(Debug)]
pub struct StreamingDatasetCursor<P> {
    path: PathBuf,
    chunk_size: usize,
    preprocessor: Arc<P>,
    passes: AtomicUsize,
}

impl<P: StreamPreprocessor + 'static> StreamingDatasetCursor<P> {
    pub fn new(path: impl AsRef<Path>, chunk_size: usize, preprocessor: Arc<P>) -> Result<Self> {
        if chunk_size == 0 {
            return Err(WideDeepError::configuration("chunk_size must be positive"));
        }
        Ok(Self {
            path: path.as_ref().to_path_buf(),
            chunk_size,
            preprocessor,
            passes: AtomicUsize::new(0),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn preprocessor(&self) -> &P {
        &self.preprocessor
    }

    /// Number of passes started so far.
    pub fn passes(&self) -> usize {
        self.passes.load(Ordering::Relaxed)
    }

    /// Start a pass from the first record, reading on the caller's thread.
    pub fn open(&self, batch_size: usize) -> Result<ChunkedBatchIter<P>> {
        if batch_size == 0 {
            return Err(WideDeepError::configuration("batch_size must be positive"));
        }
        let reader = ReaderBuilder::new()
            .has_headers(self.preprocessor.has_headers())
            .delimiter(self.preprocessor.delimiter())
            .flexible(true)
            .from_path(&self.path)?;
        let pass = self.passes.fetch_add(1, Ordering::Relaxed);
        log::debug!("opening pass {} over {}", pass, self.path.display());

        Ok(ChunkedBatchIter {
            reader,
            preprocessor: Arc::clone(&self.preprocessor),
            chunk_size: self.chunk_size,
            batch_size,
            buffer: VecDeque::with_capacity(self.chunk_size + batch_size),
            next_row: 0,
            chunks_read: 0,
            exhausted: false,
            failed: false,
        })
    }

    /// Start a pass, reading ahead on a background thread.
    ///
    /// At most `depth` batches wait in the queue. `depth == 0` reads on the
    /// caller's thread.
    pub fn open_prefetched(&self, batch_size: usize, depth: usize) -> Result<BatchStream<P>> {
        let iter = self.open(batch_size)?;
        if depth == 0 {
            return Ok(BatchStream::Direct(iter));
        }
        Ok(BatchStream::Prefetched(PrefetchedBatches::spawn(iter, depth)?))
    }
}

/// Batches of one pass over the source.
pub struct ChunkedBatchIter<P> {
    reader: Reader<File>,
    preprocessor: Arc<P>,
    chunk_size: usize,
    batch_size: usize,
    buffer: VecDeque<StreamRow>,
    next_row: usize,
    chunks_read: usize,
    exhausted: bool,
    failed: bool,
}

impl<P: StreamPreprocessor> ChunkedBatchIter<P> {
    pub fn chunks_read(&self) -> usize {
        self.chunks_read
    }

    fn read_chunk(&mut self) -> Result<()> {
        let mut record = StringRecord::new();
        let mut read = 0;
        while read < self.chunk_size {
            let row = self.next_row;
            let more = self
                .reader
                .read_record(&mut record)
                .map_err(|e| WideDeepError::decode(row, e.to_string()))?;
            if !more {
                self.exhausted = true;
                break;
            }
            let values = self.preprocessor.transform(&record, row)?;
            self.buffer.push_back(StreamRow { index: row, values });
            self.next_row += 1;
            read += 1;
        }
        if read > 0 {
            self.chunks_read += 1;
        }
        Ok(())
    }
}

impl<P: StreamPreprocessor> Iterator for ChunkedBatchIter<P> {
    type Item = Result<RowBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        while self.buffer.len() < self.batch_size && !self.exhausted {
            if let Err(e) = self.read_chunk() {
                self.failed = true;
                return Some(Err(e));
            }
        }
        if self.buffer.len() < self.batch_size {
            if !self.buffer.is_empty() {
                log::debug!("dropping final partial batch of {} rows", self.buffer.len());
                self.buffer.clear();
            }
            return None;
        }
        Some(Ok(self.buffer.drain(..self.batch_size).collect()))
    }
}

/// Batches produced by a background reader through a bounded queue.
///
/// Order is preserved. The first error ends the stream.
pub struct PrefetchedBatches {
    receiver: Option<Receiver<Result<RowBatch>>>,
    handle: Option<JoinHandle<()>>,
}

impl PrefetchedBatches {
    fn spawn<P: StreamPreprocessor + 'static>(iter: ChunkedBatchIter<P>, depth: usize) -> Result<Self> {
        let (sender, receiver) = sync_channel(depth);
        let handle = std::thread::Builder::new()
            .name("widedeep-prefetch".into())
            .spawn(move || produce(iter, sender))?;
        Ok(Self {
            receiver: Some(receiver),
            handle: Some(handle),
        })
    }
}

fn produce<P: StreamPreprocessor>(iter: ChunkedBatchIter<P>, sender: SyncSender<Result<RowBatch>>) {
    for item in iter {
        let failed = item.is_err();
        // receiver gone: the consumer stopped early
        if sender.send(item).is_err() || failed {
            break;
        }
    }
}

impl Iterator for PrefetchedBatches {
    type Item = Result<RowBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        self.receiver.as_ref()?.recv().ok()
    }
}

impl Drop for PrefetchedBatches {
    fn drop(&mut self) {
        // unblock a producer waiting on a full queue before joining it
        self.receiver.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::warn!("prefetch reader thread panicked");
            }
        }
    }
}

pub enum BatchStream<P> {
    Direct(ChunkedBatchIter<P>),
    Prefetched(PrefetchedBatches),
}

impl<P: StreamPreprocessor> Iterator for BatchStream<P> {
    type Item = Result<RowBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            BatchStream::Direct(iter) => iter.next(),
            BatchStream::Prefetched(iter) => iter.next(),
        }
    }
}
