use std::{
    io,
    pin::Pin,
    sync::Arc,
    task::{ready, Context, Poll},
};

use pin_project_lite::pin_project;
use tokio::io::{AsyncRead, ReadBuf};
use tokio_util::sync::CancellationToken;

//--------------------------------------------------------------------------------------------------
// Traits
//--------------------------------------------------------------------------------------------------

/// Receives progress events of a pull.
pub trait ProgressOutput: Send + Sync {
    /// Reports that `current` of `total` bytes of `id` are done.
    fn update(&self, id: &str, action: &str, current: u64, total: u64);

    /// Reports a one-off message about `id`. An empty `id` refers to the whole pull.
    fn message(&self, id: &str, message: &str);
}

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Writes progress events as log lines.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingProgress;

/// Discards progress events.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopProgress;

pin_project! {
    /// An [`AsyncRead`] that reports progress and stops once cancelled.
    ///
    /// An update is sent every time at least one percent of `total` has been read, and once at
    /// the end of the stream.
    pub struct ProgressReader<R> {
        #[pin]
        inner: R,
        output: Arc<dyn ProgressOutput>,
        id: String,
        action: String,
        total: u64,
        read: u64,
        reported: u64,
        finished: bool,
        token: CancellationToken,
    }
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl<R> ProgressReader<R> {
    /// Wraps a reader.
    pub fn new(
        inner: R,
        output: Arc<dyn ProgressOutput>,
        id: impl Into<String>,
        action: impl Into<String>,
        total: u64,
        token: CancellationToken,
    ) -> Self {
        Self {
            inner,
            output,
            id: id.into(),
            action: action.into(),
            total,
            read: 0,
            reported: 0,
            finished: false,
            token,
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl ProgressOutput for TracingProgress {
    fn update(&self, id: &str, action: &str, current: u64, total: u64) {
        tracing::info!("{id}: {action} {current}/{total}");
    }

    fn message(&self, id: &str, message: &str) {
        if id.is_empty() {
            tracing::info!("{message}");
        } else {
            tracing::info!("{id}: {message}");
        }
    }
}

impl ProgressOutput for NoopProgress {
    fn update(&self, _id: &str, _action: &str, _current: u64, _total: u64) {}

    fn message(&self, _id: &str, _message: &str) {}
}

impl<R: AsyncRead> AsyncRead for ProgressReader<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.project();
        if this.token.is_cancelled() {
            return Poll::Ready(Err(io::Error::other("read cancelled")));
        }

        let before = buf.filled().len();
        ready!(this.inner.poll_read(cx, buf))?;
        let n = (buf.filled().len() - before) as u64;
        *this.read += n;

        let step = (*this.total / 100).max(1);
        let at_end = n == 0 && !*this.finished;
        if at_end || *this.read - *this.reported >= step {
            *this.reported = *this.read;
            *this.finished |= n == 0;
            this.output.update(this.id, this.action, *this.read, *this.total);
        }

        Poll::Ready(Ok(()))
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use tokio::io::AsyncReadExt;

    use super::*;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<u64>>);

    impl ProgressOutput for Recorder {
        fn update(&self, _id: &str, _action: &str, current: u64, _total: u64) {
            self.0.lock().unwrap().push(current);
        }

        fn message(&self, _id: &str, _message: &str) {}
    }

    #[tokio::test]
    async fn test_progress_reports_in_percent_steps_and_at_end() -> anyhow::Result<()> {
        let data = vec![1u8; 1000];
        let recorder = Arc::new(Recorder::default());
        let mut reader = ProgressReader::new(
            &data[..],
            recorder.clone(),
            "layer",
            "Extracting",
            1000,
            CancellationToken::new(),
        );

        let mut chunk = [0u8; 5];
        let mut out = Vec::new();
        loop {
            let n = reader.read(&mut chunk).await?;
            if n == 0 {
                break;
            }
            out.extend_from_slice(&chunk[..n]);
        }
        assert_eq!(reader.read(&mut chunk).await?, 0);

        assert_eq!(out, data);
        let updates = recorder.0.lock().unwrap().clone();
        // One update per 10 bytes, plus exactly one at the end.
        assert_eq!(updates.len(), 101);
        assert_eq!(updates.first(), Some(&10));
        assert_eq!(updates.last(), Some(&1000));

        Ok(())
    }

    #[tokio::test]
    async fn test_progress_reader_stops_when_cancelled() {
        let token = CancellationToken::new();
        let mut reader = ProgressReader::new(
            &b"abc"[..],
            Arc::new(NoopProgress),
            "layer",
            "Extracting",
            3,
            token.clone(),
        );

        token.cancel();
        let mut buf = Vec::new();
        assert!(reader.read_to_end(&mut buf).await.is_err());
    }
}
