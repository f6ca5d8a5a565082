use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::Stream;

/// Progress callback receiving (delta, completed, total) in bytes.
pub type ProgressCallback = Arc<dyn Fn(u64, u64, u64) + Send + Sync + 'static>;

/// Byte progress of one whole transfer, shared by every part and attempt of it.
#[derive(Clone)]
pub struct TransferProgress {
    total: Arc<AtomicU64>,
    completed: Arc<AtomicU64>,
    callback: Option<ProgressCallback>,
}

impl TransferProgress {
    pub fn new(total: u64, callback: Option<ProgressCallback>) -> Self {
        Self {
            total: Arc::new(AtomicU64::new(total)),
            completed: Arc::new(AtomicU64::new(0)),
            callback,
        }
    }

    #[cfg(test)]
    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    /// Sets the total once it is known, e.g. from the first download response.
    pub fn set_total(&self, total: u64) {
        self.total.store(total, Ordering::Relaxed);
    }

    fn add(&self, delta: u64) {
        let completed = self.completed.fetch_add(delta, Ordering::Relaxed) + delta;
        if let Some(cb) = self.callback.as_ref() {
            cb(delta, completed, self.total.load(Ordering::Relaxed).max(completed));
        }
    }

    /// A reporter for one byte range of the transfer (a part, or the whole file). Keep it across
    /// retries of that range so resent bytes are not counted twice.
    pub fn reporter(&self) -> StreamProgressReporter {
        StreamProgressReporter {
            bytes_reported: Arc::new(AtomicU64::new(0)),
            transfer: self.clone(),
        }
    }
}

/// Forwards progress of one byte range, only reporting bytes beyond the previous high-water mark.
#[derive(Clone)]
pub struct StreamProgressReporter {
    bytes_reported: Arc<AtomicU64>,
    transfer: TransferProgress,
}

impl StreamProgressReporter {
    pub fn report_progress(&self, new_completed: u64) {
        let old_completed = self.bytes_reported.fetch_max(new_completed, Ordering::Relaxed);
        if old_completed >= new_completed {
            return;
        }
        self.transfer.add(new_completed - old_completed);
    }

    pub fn set_total(&self, total: u64) {
        self.transfer.set_total(total);
    }
}

/// Wraps a body stream and reports the bytes passing through it.
pub struct ProgressStream<S> {
    inner: Pin<Box<S>>,
    position: u64,
    reporter: StreamProgressReporter,
}

impl<S, B, E> ProgressStream<S>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
{
    /// `start` is the offset of the first byte within the range, non-zero when resuming.
    pub fn wrap_stream(stream: S, start: u64, reporter: StreamProgressReporter) -> Self {
        Self {
            inner: Box::pin(stream),
            position: start,
            reporter,
        }
    }
}

impl<S, B, E> Stream for ProgressStream<S>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
{
    type Item = Result<B, E>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match self.inner.as_mut().poll_next(cx) {
            Poll::Ready(Some(Ok(b))) => {
                let self_ = self.get_mut();
                self_.position += b.as_ref().len() as u64;
                self_.reporter.report_progress(self_.position);
                Poll::Ready(Some(Ok(b)))
            },
            other => other,
        }
    }
}
