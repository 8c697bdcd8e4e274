//! Client-facing stream sink and the per-attempt buffer in front of it

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};

/// Write side of a streaming response
///
/// Chunks travel over a bounded channel to the HTTP body, so writes wait
/// while the client is slow. Writes after the client disconnected are
/// dropped without error.
pub struct ClientStream {
    tx: mpsc::Sender<Bytes>,
    headers_sent: AtomicBool,
    commit: Mutex<Option<oneshot::Sender<()>>>,
}

/// Read side handed to the HTTP layer
pub struct ClientReceiver {
    /// Chunks to write to the response body
    pub chunks: mpsc::Receiver<Bytes>,
    /// Resolves when an attempt has been committed and the response can start
    pub committed: oneshot::Receiver<()>,
}

impl ClientStream {
    /// Create a stream whose body channel holds at most `capacity` chunks
    pub fn channel(capacity: usize) -> (Arc<Self>, ClientReceiver) {
        let (tx, chunks) = mpsc::channel(capacity.max(1));
        let (commit_tx, committed) = oneshot::channel();

        let stream = Arc::new(Self {
            tx,
            headers_sent: AtomicBool::new(false),
            commit: Mutex::new(Some(commit_tx)),
        });

        (stream, ClientReceiver { chunks, committed })
    }

    /// Whether response headers have gone out, after which retries are unsafe
    pub fn headers_sent(&self) -> bool {
        self.headers_sent.load(Ordering::Acquire)
    }

    /// Whether the client has gone away
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Resolves once the client has gone away
    pub async fn closed(&self) {
        self.tx.closed().await;
    }

    fn commit(&self) {
        if self.headers_sent.swap(true, Ordering::AcqRel) {
            return;
        }
        let signal = self
            .commit
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(signal) = signal {
            // The handler may already have given up on the request
            let _ = signal.send(());
        }
    }

    async fn write(&self, chunk: Bytes) {
        if self.tx.send(chunk).await.is_err() {
            tracing::trace!("client stream closed, dropping chunk");
        }
    }
}

/// Per-attempt sink in front of a [`ClientStream`]
///
/// Starts out buffering: enqueued chunks are held in memory and nothing is
/// written. [`StreamBuffer::flush`] commits the attempt, writes the held
/// chunks in order and switches to writing through. An attempt that is never
/// flushed leaves no trace on the client.
pub struct StreamBuffer {
    client: Arc<ClientStream>,
    pending: Vec<Bytes>,
    buffering: bool,
}

impl StreamBuffer {
    pub fn new(client: Arc<ClientStream>) -> Self {
        Self {
            client,
            pending: Vec::new(),
            buffering: true,
        }
    }

    pub async fn enqueue(&mut self, chunk: impl Into<Bytes>) {
        let chunk = chunk.into();
        if self.buffering {
            self.pending.push(chunk);
        } else {
            self.client.write(chunk).await;
        }
    }

    pub async fn flush(&mut self) {
        if !self.buffering {
            return;
        }
        self.buffering = false;
        self.client.commit();

        for chunk in std::mem::take(&mut self.pending) {
            self.client.write(chunk).await;
        }
    }

    pub const fn is_buffering(&self) -> bool {
        self.buffering
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}
