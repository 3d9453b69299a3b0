//! Live preview stream.
//!
//! A dedicated thread repeatedly pulls one Video-mode frame from a
//! [`FrameSource`], encodes it as JPEG and hands it to a [`PreviewHandle`]
//! through a small bounded channel. Frames the consumer is too slow to take
//! are dropped. The loop never reconfigures Still mode and backs off after
//! failures instead of spinning.

use crate::config::PreviewSettings;
use crate::error::{CaptureError, ImagingError};
use crate::imaging;
use crate::manager::CameraManager;
use crate::traits::CameraDevice;
use embedded_hal::i2c::I2c;
use image::RgbImage;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

/// Frames buffered between the loop and the consumer.
const PREVIEW_BUFFER: usize = 2;

/// Poll interval while waiting for the loop thread to exit.
const JOIN_POLL: Duration = Duration::from_millis(5);

/// How long dropping a handle waits for the loop to exit.
const DROP_TIMEOUT: Duration = Duration::from_secs(2);

/// Multipart boundary used by [`multipart_chunk`].
pub const BOUNDARY: &str = "frame";

/// Anything able to produce annotated preview frames.
pub trait FrameSource: Send + Sync {
    /// Produce the next preview frame.
    fn next_preview(&self) -> Result<RgbImage, CaptureError>;
}

impl<B, D> FrameSource for CameraManager<B, D>
where
    B: I2c + Send,
    D: CameraDevice + Send,
{
    fn next_preview(&self) -> Result<RgbImage, CaptureError> {
        self.preview_frame()
    }
}

/// One encoded preview frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviewFrame {
    /// Position in the stream, starting at 0.
    pub sequence: u64,
    /// JPEG bytes.
    pub jpeg: Vec<u8>,
    /// Whether this is an error frame standing in for a failed capture.
    pub is_error: bool,
}

/// Handle to a running preview loop; iterate it to receive frames.
///
/// The iterator ends once the loop has stopped. Dropping the handle stops
/// the loop.
pub struct PreviewHandle {
    frames: Receiver<PreviewFrame>,
    stop_tx: Option<SyncSender<()>>,
    thread_handle: Option<JoinHandle<()>>,
}

impl PreviewHandle {
    /// Whether the loop thread is still running.
    pub fn is_running(&self) -> bool {
        self.thread_handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Signal the loop to stop without waiting.
    pub fn request_stop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            debug!("requesting preview stop");
            // a full or closed channel means the loop is already stopping
            let _ = stop_tx.try_send(());
        }
    }

    /// Stop the loop and wait up to `timeout` for its thread to exit.
    ///
    /// Returns whether the thread exited and was joined. A loop stuck in a
    /// hardware call is left running detached.
    pub fn stop(&mut self, timeout: Duration) -> bool {
        self.request_stop();
        let Some(handle) = self.thread_handle.take() else {
            return true;
        };

        let deadline = Instant::now().checked_add(timeout);
        while !handle.is_finished() {
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                warn!(?timeout, "preview loop did not stop in time");
                self.thread_handle = Some(handle);
                return false;
            }
            thread::sleep(JOIN_POLL);
        }

        if handle.join().is_err() {
            warn!("preview loop thread panicked");
        }
        true
    }
}

impl Iterator for PreviewHandle {
    type Item = PreviewFrame;

    fn next(&mut self) -> Option<Self::Item> {
        self.frames.recv().ok()
    }
}

impl Drop for PreviewHandle {
    fn drop(&mut self) {
        if self.thread_handle.is_some() && !self.stop(DROP_TIMEOUT) {
            warn!("detaching preview loop thread");
        }
    }
}

/// Start the preview loop on its own thread.
pub fn spawn_preview<S>(source: Arc<S>, settings: &PreviewSettings) -> PreviewHandle
where
    S: FrameSource + ?Sized + 'static,
{
    let (frames_tx, frames) = mpsc::sync_channel(PREVIEW_BUFFER);
    let (stop_tx, stop_rx) = mpsc::sync_channel(1);
    let settings = settings.clone();

    info!(interval = ?settings.frame_interval, "starting preview loop");
    let thread_handle = thread::spawn(move || {
        run_loop(&*source, &settings, &frames_tx, &stop_rx);
        info!("preview loop exiting");
    });

    PreviewHandle {
        frames,
        stop_tx: Some(stop_tx),
        thread_handle: Some(thread_handle),
    }
}

fn run_loop<S: FrameSource + ?Sized>(
    source: &S,
    settings: &PreviewSettings,
    frames_tx: &SyncSender<PreviewFrame>,
    stop_rx: &Receiver<()>,
) {
    let mut sequence = 0u64;
    loop {
        let (jpeg, is_error) = match source.next_preview() {
            Ok(image) => match imaging::encode_jpeg(&image, settings.jpeg_quality) {
                Ok(jpeg) => (Some(jpeg), false),
                Err(err) => (error_jpeg(&err.to_string(), settings.jpeg_quality), true),
            },
            Err(err) => {
                warn!(%err, "preview frame failed");
                (error_jpeg(&err.to_string(), settings.jpeg_quality), true)
            }
        };

        if let Some(jpeg) = jpeg {
            let frame = PreviewFrame {
                sequence,
                jpeg,
                is_error,
            };
            match frames_tx.try_send(frame) {
                Ok(()) => sequence += 1,
                Err(TrySendError::Full(_)) => trace!(sequence, "consumer behind, frame dropped"),
                Err(TrySendError::Disconnected(_)) => {
                    debug!("preview consumer gone");
                    return;
                }
            }
        }

        let pause = if is_error {
            settings.error_backoff
        } else {
            settings.frame_interval
        };
        match stop_rx.recv_timeout(pause) {
            Err(RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                debug!("preview stop received");
                return;
            }
        }
    }
}

fn error_jpeg(message: &str, quality: u8) -> Option<Vec<u8>> {
    imaging::encode_jpeg(&imaging::error_image(message), quality)
        .map_err(|err| warn!(%err, "error frame could not be encoded"))
        .ok()
}

/// Frame `jpeg` as one part of a `multipart/x-mixed-replace` stream.
pub fn multipart_chunk(jpeg: &[u8]) -> Vec<u8> {
    let header = format!("--{BOUNDARY}\r\nContent-Type: image/jpeg\r\n\r\n");
    let mut chunk = Vec::with_capacity(header.len() + jpeg.len() + 2);
    chunk.extend_from_slice(header.as_bytes());
    chunk.extend_from_slice(jpeg);
    chunk.extend_from_slice(b"\r\n");
    chunk
}

/// The single error frame served when no camera manager is available.
pub fn unavailable_frame() -> Result<Vec<u8>, ImagingError> {
    imaging::encode_jpeg(
        &imaging::error_image("camera manager unavailable"),
        PreviewSettings::default().jpeg_quality,
    )
}
