use bytes::Bytes;
use crossbeam_channel::{Receiver, Sender};
use std::io::{self, Read};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Append side of a streaming media source.
///
/// Chunks appended here are read, in order, by the [`MediaReader`] on the
/// decoder thread. Once detached, every later append is dropped.
pub struct MediaBuffer {
    tx: Mutex<Option<Sender<Bytes>>>,
    detached: AtomicBool,
    appended: Arc<AtomicUsize>,
}

impl MediaBuffer {
    /// Create a buffer and the reader that drains it. `appended` counts accepted chunks.
    pub fn open(appended: Arc<AtomicUsize>) -> (Arc<Self>, MediaReader) {
        let (tx, rx) = crossbeam_channel::unbounded();
        let buffer = Arc::new(Self {
            tx: Mutex::new(Some(tx)),
            detached: AtomicBool::new(false),
            appended,
        });
        (buffer, MediaReader { rx, current: Bytes::new() })
    }

    /// Queue a chunk. Returns false if the buffer was detached or the reader is gone.
    pub fn append(&self, chunk: Bytes) -> bool {
        if self.detached.load(Ordering::SeqCst) {
            debug!("Dropping {} byte chunk for detached media buffer", chunk.len());
            return false;
        }

        let guard = match self.tx.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let Some(tx) = guard.as_ref() else {
            return false;
        };

        if tx.send(chunk).is_err() {
            return false;
        }
        self.appended.fetch_add(1, Ordering::SeqCst);
        true
    }

    /// Signal that no more chunks will follow
    pub fn end_of_stream(&self) {
        if let Ok(mut tx) = self.tx.lock() {
            tx.take();
        }
    }

    /// Release the buffer: the reader sees end-of-stream and later appends are dropped
    pub fn detach(&self) {
        self.detached.store(true, Ordering::SeqCst);
        self.end_of_stream();
    }

    pub fn is_detached(&self) -> bool {
        self.detached.load(Ordering::SeqCst)
    }
}

/// Blocking reader over appended chunks
pub struct MediaReader {
    rx: Receiver<Bytes>,
    current: Bytes,
}

impl Read for MediaReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.current.is_empty() {
            match self.rx.recv() {
                Ok(chunk) => self.current = chunk,
                // Sender dropped: end of stream
                Err(_) => return Ok(0),
            }
        }

        let n = buf.len().min(self.current.len());
        buf[..n].copy_from_slice(&self.current.split_to(n));
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reader_sees_chunks_then_eof() {
        let (buffer, mut reader) = MediaBuffer::open(Arc::new(AtomicUsize::new(0)));
        assert!(buffer.append(Bytes::from_static(b"abc")));
        assert!(buffer.append(Bytes::from_static(b"de")));
        buffer.end_of_stream();

        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"abcde");
    }

    #[test]
    fn detached_buffer_drops_appends() {
        let appended = Arc::new(AtomicUsize::new(0));
        let (buffer, _reader) = MediaBuffer::open(Arc::clone(&appended));
        assert!(buffer.append(Bytes::from_static(b"a")));

        buffer.detach();
        assert!(!buffer.append(Bytes::from_static(b"b")));
        assert_eq!(appended.load(Ordering::SeqCst), 1);
        assert!(buffer.is_detached());
    }
}
