//! Async frame reader on top of [`JsonFramer`].

use crate::error::ClientError;
use luawire_protocol::{Frame, JsonFramer};
use tokio::io::{AsyncRead, AsyncReadExt};

/// Reads whole JSON frames from an async byte source.
pub struct FrameReader<R> {
    inner: R,
    framer: JsonFramer,
    read_buffer_size: usize,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R, max_frame_size: usize) -> Self {
        Self {
            inner,
            framer: JsonFramer::with_max_frame_size(max_frame_size),
            read_buffer_size: crate::connection::DEFAULT_READ_BUFFER_SIZE,
        }
    }

    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size;
        self
    }

    pub fn framer(&self) -> &JsonFramer {
        &self.framer
    }

    pub fn framer_mut(&mut self) -> &mut JsonFramer {
        &mut self.framer
    }

    /// Waits until one complete frame is available and returns it.
    ///
    /// Errors from the framer are passed through unchanged; after
    /// `FrameTooLarge` the next call retries from the same buffered bytes.
    pub async fn read_object(&mut self) -> Result<Frame, ClientError> {
        loop {
            if let Some(frame) = self.framer.decode_frame()? {
                tracing::trace!("read frame ({} bytes)", frame.raw.len());
                return Ok(frame);
            }

            let buf = self.framer.buffer_mut();
            buf.reserve(self.read_buffer_size);
            let n = self.inner.read_buf(buf).await?;
            if n == 0 {
                tracing::debug!("end of stream ({} bytes buffered)", self.framer.buffered());
                self.framer.mark_eof();
            }
        }
    }
}
