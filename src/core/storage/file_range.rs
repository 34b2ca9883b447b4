// src/core/storage/file_range.rs

//! A range store that spills to a temporary file once its in-memory buffer
//! fills up.
//!
//! Spilled records are laid out back to back as a little-endian `u64` id
//! followed by `dimension` little-endian `f32` components. The file is
//! removed when the store is dropped.
//!
//! File I/O runs on tokio's blocking pool so that spilling and replaying do
//! not stall the runtime's worker threads.

use crate::core::common::OxivecError;
use crate::core::config::Config;
use crate::core::storage::traits::{RangeStore, RangeStoreFactory};
use crate::core::types::{NodeId, Point, PointId};
use async_trait::async_trait;
use futures::stream::{self, BoxStream, Stream, StreamExt, TryStreamExt};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::NamedTempFile;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinError;
use tracing::{debug, warn};

const ID_BYTES: usize = std::mem::size_of::<u64>();
const COMPONENT_BYTES: usize = std::mem::size_of::<f32>();

/// Records read per blocking task while replaying.
const REPLAY_CHUNK: u64 = 1024;

#[derive(Debug)]
pub struct FileRangeStore {
    node: NodeId,
    dimension: usize,
    buffer_limit: usize,
    buffer: Vec<Point>,
    /// Records committed to the spill file when `buffer` started filling.
    spilled: u64,
    spill: Arc<AsyncMutex<Option<SpillFile>>>,
    temp_dir: Option<PathBuf>,
}

impl FileRangeStore {
    pub fn new(node: NodeId, dimension: usize, buffer_limit: usize, temp_dir: Option<PathBuf>) -> Self {
        Self {
            node,
            dimension,
            buffer_limit: buffer_limit.max(1),
            buffer: Vec::new(),
            spilled: 0,
            spill: Arc::new(AsyncMutex::new(None)),
            temp_dir,
        }
    }

    /// Number of points written to the spill file.
    pub fn spilled(&self) -> u64 {
        self.spilled
    }

    /// Drops buffered points that a spill left running by a cancelled `add`
    /// has committed since.
    async fn settle(&mut self) {
        let committed = self.spill.lock().await.as_ref().map_or(0, |spill| spill.records);
        if committed > self.spilled {
            let flushed = usize::try_from(committed - self.spilled).unwrap_or(usize::MAX);
            self.buffer.drain(..flushed.min(self.buffer.len()));
            self.spilled = committed;
        }
    }

    /// Appends the buffer to the spill file. The buffer is only cleared once
    /// the file holds all of it, so a failed spill loses nothing.
    async fn flush_buffer(&mut self) -> Result<(), OxivecError> {
        let spill = Arc::clone(&self.spill);
        let points = self.buffer.clone();
        let temp_dir = self.temp_dir.clone();
        let record_bytes = record_bytes(self.dimension);
        let node = self.node;

        tokio::task::spawn_blocking(move || {
            let mut spill = spill.blocking_lock();
            if spill.is_none() {
                debug!(node, "range store spilling to disk");
                *spill = Some(SpillFile::create(temp_dir.as_deref(), record_bytes)?);
            }
            match spill.as_mut() {
                Some(file) => file.append(&points),
                None => Err(OxivecError::Store("spill file unavailable".to_string())),
            }
        })
        .await
        .map_err(join_error)??;

        self.spilled += self.buffer.len() as u64;
        self.buffer.clear();
        Ok(())
    }

    async fn replay_start(&self) -> Result<(SpillReader, usize), OxivecError> {
        let spill = self.spill.lock().await;
        let (path, committed) = match spill.as_ref() {
            Some(file) => (Some(file.path().to_path_buf()), file.records),
            None => (None, 0),
        };
        let skip = usize::try_from(committed.saturating_sub(self.spilled)).unwrap_or(usize::MAX);
        let reader = SpillReader { path, reader: None, remaining: committed, dimension: self.dimension };
        Ok((reader, skip.min(self.buffer.len())))
    }
}

/// A spilled point that cannot be written is not stored: the `add` fails
/// and every point added before it stays readable.
#[async_trait]
impl RangeStore for FileRangeStore {
    async fn add(&mut self, id: PointId, vector: Vec<f32>) -> Result<(), OxivecError> {
        OxivecError::check_dimension(self.dimension, vector.len())?;
        self.settle().await;

        if self.buffer.len() >= self.buffer_limit {
            self.flush_buffer().await?;
        }

        self.buffer.push((id, vector));
        Ok(())
    }

    fn points(&self) -> BoxStream<'_, Result<Point, OxivecError>> {
        let buffer = &self.buffer;
        stream::once(self.replay_start())
            .map_ok(move |(reader, skip)| {
                reader.into_stream().chain(stream::iter(buffer[skip..].iter().cloned().map(Ok)))
            })
            .try_flatten()
            .boxed()
    }

    fn len(&self) -> u64 {
        self.spilled + self.buffer.len() as u64
    }
}

fn record_bytes(dimension: usize) -> u64 {
    (ID_BYTES + dimension * COMPONENT_BYTES) as u64
}

fn join_error(err: JoinError) -> OxivecError {
    OxivecError::Store(format!("spill task failed: {err}"))
}

/// A spill file and the number of records committed to it. Bytes past the
/// committed records are never read.
#[derive(Debug)]
struct SpillFile {
    file: NamedTempFile,
    records: u64,
    record_bytes: u64,
}

impl SpillFile {
    fn create(temp_dir: Option<&Path>, record_bytes: u64) -> Result<Self, OxivecError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("oxivec-range-");
        let file = match temp_dir {
            Some(dir) => builder.tempfile_in(dir)?,
            None => builder.tempfile()?,
        };
        Ok(Self { file, records: 0, record_bytes })
    }

    fn path(&self) -> &Path {
        self.file.path()
    }

    /// Writes `points` after the committed records and commits them, or
    /// leaves the committed records as they were.
    fn append(&mut self, points: &[Point]) -> Result<(), OxivecError> {
        let committed = self.records * self.record_bytes;
        match self.write_at(committed, points) {
            Ok(()) => {
                self.records += points.len() as u64;
                Ok(())
            }
            Err(e) => {
                if let Err(truncate) = self.file.as_file().set_len(committed) {
                    warn!(error = %truncate, "cannot truncate spill file after a failed write");
                }
                Err(e)
            }
        }
    }

    fn write_at(&mut self, offset: u64, points: &[Point]) -> Result<(), OxivecError> {
        let file = self.file.as_file_mut();
        file.seek(SeekFrom::Start(offset))?;

        let mut writer = BufWriter::new(file);
        for (id, vector) in points {
            writer.write_all(&id.to_le_bytes())?;
            for component in vector {
                writer.write_all(&component.to_le_bytes())?;
            }
        }
        writer.flush()?;
        Ok(())
    }
}

/// Reads the committed records of a spill file, a chunk per blocking task.
struct SpillReader {
    path: Option<PathBuf>,
    reader: Option<BufReader<File>>,
    remaining: u64,
    dimension: usize,
}

impl SpillReader {
    fn into_stream(self) -> impl Stream<Item = Result<Point, OxivecError>> + Send {
        stream::try_unfold(self, |reader| async move {
            if reader.remaining == 0 {
                return Ok(None);
            }
            let (chunk, reader) = tokio::task::spawn_blocking(move || reader.read_chunk())
                .await
                .map_err(join_error)??;
            Ok::<_, OxivecError>(Some((chunk, reader)))
        })
        .map_ok(|chunk| stream::iter(chunk.into_iter().map(Ok)))
        .try_flatten()
    }

    fn read_chunk(mut self) -> Result<(Vec<Point>, Self), OxivecError> {
        if self.reader.is_none() {
            let path = self
                .path
                .as_deref()
                .ok_or_else(|| OxivecError::Store("spilled records without a spill file".to_string()))?;
            self.reader = Some(BufReader::new(File::open(path)?));
        }

        let count = self.remaining.min(REPLAY_CHUNK);
        let mut chunk = Vec::with_capacity(count as usize);
        for _ in 0..count {
            chunk.push(self.read_point()?);
        }
        self.remaining -= count;
        Ok((chunk, self))
    }

    fn read_point(&mut self) -> Result<Point, OxivecError> {
        let reader = self
            .reader
            .as_mut()
            .ok_or_else(|| OxivecError::Store("spill file not open".to_string()))?;

        let mut id = [0_u8; ID_BYTES];
        reader.read_exact(&mut id)?;

        let mut bytes = vec![0_u8; self.dimension * COMPONENT_BYTES];
        reader.read_exact(&mut bytes)?;
        let vector = bytes
            .chunks_exact(COMPONENT_BYTES)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect();

        Ok((u64::from_le_bytes(id), vector))
    }
}

/// Creates [`FileRangeStore`]s for the recursive builder.
#[derive(Debug, Clone)]
pub struct FileRangeStoreFactory {
    dimension: usize,
    buffer_limit: usize,
    temp_dir: Option<PathBuf>,
}

impl FileRangeStoreFactory {
    pub fn new(dimension: usize, config: &Config) -> Result<Self, OxivecError> {
        config.validate()?;
        if dimension == 0 {
            return Err(OxivecError::InvalidVector { expected: 0, actual: 0 });
        }
        Ok(Self { dimension, buffer_limit: config.range_buffer, temp_dir: config.temp_dir.clone() })
    }
}

impl RangeStoreFactory for FileRangeStoreFactory {
    fn create(&self, node: NodeId, _capacity: u64) -> Result<Box<dyn RangeStore>, OxivecError> {
        Ok(Box::new(FileRangeStore::new(
            node,
            self.dimension,
            self.buffer_limit,
            self.temp_dir.clone(),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;

    fn point(id: u64, dimension: usize) -> Point {
        (id, (0..dimension).map(|j| id as f32 * 0.01 - j as f32 * 0.1).collect())
    }

    #[tokio::test]
    async fn test_buffered_points_are_replayed_without_spilling() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FileRangeStore::new(0, 3, 8, Some(dir.path().to_path_buf()));
        for id in 0..5 {
            let (id, vector) = point(id, 3);
            store.add(id, vector).await.unwrap();
        }

        assert_eq!(store.spilled(), 0);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
        let points: Vec<Point> = store.points().try_collect().await.unwrap();
        assert_eq!(points, (0..5).map(|id| point(id, 3)).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_spilled_points_are_replayed_in_order_twice() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FileRangeStore::new(5, 4, 3, Some(dir.path().to_path_buf()));
        for id in 0..11 {
            let (id, vector) = point(id, 4);
            store.add(id, vector).await.unwrap();
        }

        assert_eq!(store.len(), 11);
        assert_eq!(store.spilled(), 9);

        let expected: Vec<Point> = (0..11).map(|id| point(id, 4)).collect();
        for _ in 0..2 {
            let points: Vec<Point> = store.points().try_collect().await.unwrap();
            assert_eq!(points, expected);
        }
    }

    #[tokio::test]
    async fn test_spill_file_is_removed_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut store = FileRangeStore::new(1, 2, 1, Some(dir.path().to_path_buf()));
            for id in 0..4 {
                let (id, vector) = point(id, 2);
                store.add(id, vector).await.unwrap();
            }
            assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
        }
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_failed_spill_keeps_buffered_points() {
        let dir = tempfile::tempdir().unwrap();
        let spill_dir = dir.path().join("not-yet");
        let mut store = FileRangeStore::new(2, 2, 2, Some(spill_dir.clone()));
        for id in 0..2 {
            let (id, vector) = point(id, 2);
            store.add(id, vector).await.unwrap();
        }

        let (id, vector) = point(2, 2);
        let err = store.add(id, vector).await.unwrap_err();
        assert!(matches!(err, OxivecError::Io(_)));
        assert_eq!(store.len(), 2);
        assert_eq!(store.spilled(), 0);
        let points: Vec<Point> = store.points().try_collect().await.unwrap();
        assert_eq!(points, (0..2).map(|id| point(id, 2)).collect::<Vec<_>>());

        // Once the directory exists the retried point goes through.
        std::fs::create_dir(&spill_dir).unwrap();
        let (id, vector) = point(2, 2);
        store.add(id, vector).await.unwrap();
        assert_eq!(store.len(), 3);
        assert_eq!(store.spilled(), 2);
        let points: Vec<Point> = store.points().try_collect().await.unwrap();
        assert_eq!(points, (0..3).map(|id| point(id, 2)).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_failed_append_leaves_committed_records() {
        let dir = tempfile::tempdir().unwrap();
        let mut spill = SpillFile::create(Some(dir.path()), record_bytes(3)).unwrap();
        let points: Vec<Point> = (0..5).map(|id| point(id, 3)).collect();
        spill.append(&points[..3]).unwrap();

        // Reopen the committed file read-only so the next append fails.
        let SpillFile { file, records, record_bytes } = spill;
        let (file, path) = file.into_parts();
        drop(file);
        let read_only = File::open(&path).unwrap();
        let mut spill = SpillFile { file: NamedTempFile::from_parts(read_only, path), records, record_bytes };

        assert!(spill.append(&points[3..]).is_err());
        assert_eq!(spill.records, 3);
        assert_eq!(std::fs::metadata(spill.path()).unwrap().len(), 3 * record_bytes);

        let reader = SpillReader {
            path: Some(spill.path().to_path_buf()),
            reader: None,
            remaining: spill.records,
            dimension: 3,
        };
        let replayed: Vec<Point> = reader.into_stream().try_collect().await.unwrap();
        assert_eq!(replayed, points[..3].to_vec());
    }

    #[tokio::test]
    async fn test_replay_crosses_chunk_boundaries() {
        let mut store = FileRangeStore::new(0, 1, 1000, None);
        let count = 2 * REPLAY_CHUNK + 17;
        for id in 0..count {
            store.add(id, vec![id as f32]).await.unwrap();
        }
        assert_eq!(store.spilled(), 2000);

        let ids: Vec<PointId> = store.points().map_ok(|(id, _)| id).try_collect().await.unwrap();
        assert_eq!(ids, (0..count).collect::<Vec<_>>());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_spilling_yields_to_other_futures() {
        let mut store = FileRangeStore::new(0, 8, 4, None);
        let done = std::cell::Cell::new(false);
        let ticks = std::cell::Cell::new(0_u32);

        tokio::join!(
            async {
                for id in 0..64 {
                    let (id, vector) = point(id, 8);
                    store.add(id, vector).await.unwrap();
                }
                let replayed: Vec<Point> = store.points().try_collect().await.unwrap();
                assert_eq!(replayed.len(), 64);
                done.set(true);
            },
            async {
                while !done.get() {
                    ticks.set(ticks.get() + 1);
                    tokio::task::yield_now().await;
                }
            }
        );

        // Spill I/O runs off the runtime thread, so the other future made
        // progress while points were written and read back.
        assert!(ticks.get() > 1);
        assert_eq!(store.spilled(), 60);
    }

    #[tokio::test]
    async fn test_rejects_wrong_dimension() {
        let mut store = FileRangeStore::new(0, 3, 4, None);
        let err = store.add(1, vec![0.0, 1.0]).await.unwrap_err();
        assert!(matches!(err, OxivecError::InvalidVector { expected: 3, actual: 2 }));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_factory_uses_config() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::builder().range_buffer(2).temp_dir(dir.path()).build().unwrap();
        let factory = FileRangeStoreFactory::new(2, &config).unwrap();

        let mut store = factory.create(1, 10).unwrap();
        for id in 0..5 {
            store.add(id, vec![0.0, 0.5]).await.unwrap();
        }
        assert_eq!(store.len(), 5);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);

        assert!(FileRangeStoreFactory::new(0, &config).is_err());
    }
}
