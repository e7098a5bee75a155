//! Line-by-line pairing of two incrementally decompressed streams.
//!
//! Each side owns at most one outstanding chunk request. The request runs as
//! its own task holding the source, and the source comes back with the chunk,
//! so a side can never queue a second read.

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use std::collections::VecDeque;
use std::fmt;
use std::io::Read;
use std::path::PathBuf;

use crate::{TaskprofError, TaskprofResult};

pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Something that yields decompressed bytes a chunk at a time. `Ok(None)`
/// means the underlying data is exhausted.
#[async_trait]
pub trait ChunkSource: Send + 'static {
    async fn next_chunk(&mut self) -> TaskprofResult<Option<Vec<u8>>>;
}

/// Chunks from any blocking reader, read on the blocking pool.
pub struct ReaderSource<R> {
    reader: Option<R>,
    chunk_size: usize,
}

impl<R: Read + Send + 'static> ReaderSource<R> {
    pub fn new(reader: R, chunk_size: usize) -> Self {
        Self {
            reader: Some(reader),
            chunk_size: chunk_size.max(1),
        }
    }
}

#[async_trait]
impl<R: Read + Send + 'static> ChunkSource for ReaderSource<R> {
    async fn next_chunk(&mut self) -> TaskprofResult<Option<Vec<u8>>> {
        let Some(mut reader) = self.reader.take() else {
            return Ok(None);
        };
        let size = self.chunk_size;
        let (reader, chunk) = tokio::task::spawn_blocking(move || {
            let chunk = read_chunk(&mut reader, size);
            (reader, chunk)
        })
        .await
        .map_err(|e| TaskprofError::Stream(format!("reader task failed: {e}")))?;

        let chunk = chunk?;
        if chunk.is_empty() {
            return Ok(None);
        }
        self.reader = Some(reader);
        Ok(Some(chunk))
    }
}

fn read_chunk(reader: &mut impl Read, size: usize) -> std::io::Result<Vec<u8>> {
    let mut buf = vec![0u8; size];
    loop {
        match reader.read(&mut buf) {
            Ok(n) => {
                buf.truncate(n);
                return Ok(buf);
            }
            Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }
}

type ChunkReply = oneshot::Sender<TaskprofResult<Option<Vec<u8>>>>;

/// Inflates one entry of a zip archive on a dedicated thread. Requests travel
/// over a capacity-1 channel and each one yields a single chunk.
pub struct ZipEntrySource {
    requests: mpsc::Sender<ChunkReply>,
    finished: bool,
}

impl ZipEntrySource {
    /// Starts the reader thread. Open and lookup failures surface on the
    /// first `next_chunk`.
    pub fn open(archive: PathBuf, entry: String, chunk_size: usize) -> TaskprofResult<Self> {
        let (requests, rx) = mpsc::channel(1);
        std::thread::Builder::new()
            .name(format!("zip-{entry}"))
            .spawn(move || zip_worker(archive, entry, chunk_size.max(1), rx))?;
        Ok(Self {
            requests,
            finished: false,
        })
    }
}

fn zip_worker(path: PathBuf, name: String, chunk_size: usize, mut rx: mpsc::Receiver<ChunkReply>) {
    let opened = std::fs::File::open(&path)
        .map_err(TaskprofError::from)
        .and_then(|file| zip::ZipArchive::new(file).map_err(TaskprofError::from));
    let mut archive = match opened {
        Ok(archive) => archive,
        Err(err) => return fail_first(&mut rx, err),
    };
    let mut entry = match archive.by_name(&name) {
        Ok(entry) => entry,
        Err(err) => {
            return fail_first(
                &mut rx,
                TaskprofError::Zip(format!("{}: {name}: {err}", path.display())),
            );
        }
    };

    while let Some(reply) = rx.blocking_recv() {
        let result = match read_chunk(&mut entry, chunk_size) {
            Ok(chunk) if chunk.is_empty() => Ok(None),
            Ok(chunk) => Ok(Some(chunk)),
            Err(err) => Err(TaskprofError::from(err)),
        };
        let last = !matches!(result, Ok(Some(_)));
        if reply.send(result).is_err() || last {
            break;
        }
    }
}

fn fail_first(rx: &mut mpsc::Receiver<ChunkReply>, err: TaskprofError) {
    if let Some(reply) = rx.blocking_recv() {
        let _ = reply.send(Err(err));
    }
}

#[async_trait]
impl ChunkSource for ZipEntrySource {
    async fn next_chunk(&mut self) -> TaskprofResult<Option<Vec<u8>>> {
        if self.finished {
            return Ok(None);
        }
        let (tx, rx) = oneshot::channel();
        let stopped = || TaskprofError::Stream("zip reader stopped".to_string());
        self.requests.send(tx).await.map_err(|_| stopped())?;
        let result = rx.await.map_err(|_| stopped())?;
        if !matches!(result, Ok(Some(_))) {
            self.finished = true;
        }
        result
    }
}

type Pending<S> = JoinHandle<(S, TaskprofResult<Option<Vec<u8>>>)>;

/// Splits one source into lines, keeping a read ahead in flight.
struct LineStream<S> {
    source: Option<S>,
    pending: Option<Pending<S>>,
    buffer: Vec<u8>,
    lines: VecDeque<String>,
    exhausted: bool,
}

impl<S: ChunkSource> LineStream<S> {
    fn new(source: S) -> Self {
        Self {
            source: Some(source),
            pending: None,
            buffer: Vec::new(),
            lines: VecDeque::new(),
            exhausted: false,
        }
    }

    /// Starts a read unless one is already running or the source is done.
    fn request(&mut self) {
        if self.exhausted || self.pending.is_some() {
            return;
        }
        if let Some(mut source) = self.source.take() {
            self.pending = Some(tokio::spawn(async move {
                let chunk = source.next_chunk().await;
                (source, chunk)
            }));
        }
    }

    async fn next_line(&mut self) -> TaskprofResult<Option<String>> {
        loop {
            if let Some(line) = self.lines.pop_front() {
                self.request();
                return Ok(Some(line));
            }
            if self.exhausted {
                return Ok(None);
            }
            self.request();
            let Some(pending) = self.pending.take() else {
                return Ok(None);
            };
            let (source, chunk) = pending
                .await
                .map_err(|e| TaskprofError::Stream(format!("chunk task failed: {e}")))?;
            self.source = Some(source);
            match chunk? {
                Some(bytes) => self.absorb(&bytes),
                None => self.finish(),
            }
        }
    }

    fn absorb(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
        let mut consumed = 0;
        while let Some(offset) = self.buffer[consumed..].iter().position(|&b| b == b'\n') {
            let end = consumed + offset;
            self.lines
                .push_back(String::from_utf8_lossy(&self.buffer[consumed..end]).into_owned());
            consumed = end + 1;
        }
        self.buffer.drain(..consumed);
    }

    fn finish(&mut self) {
        self.exhausted = true;
        if !self.buffer.is_empty() {
            let tail = std::mem::take(&mut self.buffer);
            self.lines.push_back(String::from_utf8_lossy(&tail).into_owned());
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamSide {
    A,
    B,
}

/// The two streams disagreed on their line count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamMismatch {
    /// Side that ran out of lines first.
    pub shorter: StreamSide,
    /// Pairs produced before it did.
    pub paired: usize,
}

impl fmt::Display for StreamMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let longer = match self.shorter {
            StreamSide::A => "b",
            StreamSide::B => "a",
        };
        write!(f, "stream {longer} has more lines than the {} lines paired", self.paired)
    }
}

/// Zips two line streams. Single pass; stops at the shorter stream.
pub struct LinePairer<A, B> {
    a: LineStream<A>,
    b: LineStream<B>,
    paired: usize,
    mismatch: Option<StreamMismatch>,
    done: bool,
}

impl<A: ChunkSource, B: ChunkSource> LinePairer<A, B> {
    pub fn new(a: A, b: B) -> Self {
        Self {
            a: LineStream::new(a),
            b: LineStream::new(b),
            paired: 0,
            mismatch: None,
            done: false,
        }
    }

    pub async fn next_pair(&mut self) -> TaskprofResult<Option<(String, String)>> {
        if self.done {
            return Ok(None);
        }
        self.a.request();
        self.b.request();
        let (a, b) = tokio::join!(self.a.next_line(), self.b.next_line());
        let shorter = match (a?, b?) {
            (Some(a), Some(b)) => {
                self.paired += 1;
                return Ok(Some((a, b)));
            }
            (None, None) => None,
            (None, Some(_)) => Some(StreamSide::A),
            (Some(_), None) => Some(StreamSide::B),
        };
        self.done = true;
        if let Some(shorter) = shorter {
            let mismatch = StreamMismatch {
                shorter,
                paired: self.paired,
            };
            tracing::warn!(%mismatch, "line streams differ in length");
            self.mismatch = Some(mismatch);
        }
        Ok(None)
    }

    pub fn paired(&self) -> usize {
        self.paired
    }

    pub fn mismatch(&self) -> Option<StreamMismatch> {
        self.mismatch
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write as _};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Hands out fixed chunks slowly and records how many reads overlap.
    struct SlowChunks {
        chunks: VecDeque<Vec<u8>>,
        active: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    impl SlowChunks {
        fn new(chunks: &[&str], peak: Arc<AtomicUsize>) -> Self {
            Self {
                chunks: chunks.iter().map(|c| c.as_bytes().to_vec()).collect(),
                active: Arc::new(AtomicUsize::new(0)),
                peak,
            }
        }
    }

    #[async_trait]
    impl ChunkSource for SlowChunks {
        async fn next_chunk(&mut self) -> TaskprofResult<Option<Vec<u8>>> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(2)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok(self.chunks.pop_front())
        }
    }

    async fn drain<A: ChunkSource, B: ChunkSource>(pairer: &mut LinePairer<A, B>) -> Vec<(String, String)> {
        let mut out = Vec::new();
        while let Some(pair) = pairer.next_pair().await.expect("pair") {
            out.push(pair);
        }
        out
    }

    fn owned(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs.iter().map(|(a, b)| (a.to_string(), b.to_string())).collect()
    }

    #[tokio::test]
    async fn pairs_lines_split_across_chunks() {
        let peak = Arc::new(AtomicUsize::new(0));
        let a = SlowChunks::new(&["hel", "lo\nwor", "ld\nlast"], Arc::clone(&peak));
        let b = SlowChunks::new(&["Hallo\nWelt\nEn", "de\n"], Arc::clone(&peak));
        let mut pairer = LinePairer::new(a, b);

        let pairs = drain(&mut pairer).await;
        assert_eq!(
            pairs,
            owned(&[("hello", "Hallo"), ("world", "Welt"), ("last", "Ende")])
        );
        assert_eq!(pairer.mismatch(), None);
        assert_eq!(pairer.paired(), 3);
        assert_eq!(peak.load(Ordering::SeqCst), 1, "one read in flight per source");
        assert_eq!(pairer.next_pair().await.expect("after end"), None);
    }

    #[tokio::test]
    async fn shorter_stream_ends_pairing_and_is_reported() {
        let peak = Arc::new(AtomicUsize::new(0));
        let a = SlowChunks::new(&["1\n2\n3\n4\n"], Arc::clone(&peak));
        let b = SlowChunks::new(&["one\ntwo\n"], Arc::clone(&peak));
        let mut pairer = LinePairer::new(a, b);

        let pairs = drain(&mut pairer).await;
        assert_eq!(pairs, owned(&[("1", "one"), ("2", "two")]));
        assert_eq!(
            pairer.mismatch(),
            Some(StreamMismatch {
                shorter: StreamSide::B,
                paired: 2
            })
        );
    }

    #[tokio::test]
    async fn reader_source_handles_tiny_chunks_and_empty_lines() {
        let a = ReaderSource::new(Cursor::new(b"x\n\ny\n".to_vec()), 1);
        let b = ReaderSource::new(Cursor::new(b"X\n\nY".to_vec()), 3);
        let mut pairer = LinePairer::new(a, b);
        let pairs = drain(&mut pairer).await;
        assert_eq!(pairs, owned(&[("x", "X"), ("", ""), ("y", "Y")]));
        assert_eq!(pairer.mismatch(), None);
    }

    #[tokio::test]
    async fn zip_entries_pair_through_worker_threads() {
        let dir = std::env::temp_dir().join(format!("taskprof-pairer-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).expect("mkdir");
        let path = dir.join("corpus.zip");
        {
            let file = std::fs::File::create(&path).expect("create zip");
            let mut writer = zip::ZipWriter::new(file);
            let options = || {
                zip::write::SimpleFileOptions::default()
                    .compression_method(zip::CompressionMethod::Deflated)
            };
            writer.start_file("src.txt", options()).expect("start src");
            writer
                .write_all("guten tag\ndanke\n".repeat(500).as_bytes())
                .expect("write src");
            writer.start_file("trg.txt", options()).expect("start trg");
            writer
                .write_all("good day\nthanks\n".repeat(500).as_bytes())
                .expect("write trg");
            writer.finish().expect("finish zip");
        }

        let a = ZipEntrySource::open(path.clone(), "src.txt".to_string(), 1024).expect("open src");
        let b = ZipEntrySource::open(path.clone(), "trg.txt".to_string(), 700).expect("open trg");
        let mut pairer = LinePairer::new(a, b);
        let pairs = drain(&mut pairer).await;
        assert_eq!(pairs.len(), 1000);
        assert_eq!(pairs[1], ("danke".to_string(), "thanks".to_string()));
        assert_eq!(pairer.mismatch(), None);

        let mut missing = ZipEntrySource::open(path, "nope.txt".to_string(), 64).expect("spawn");
        assert!(missing.next_chunk().await.is_err());
        let _ = std::fs::remove_dir_all(&dir);
    }
}
