//! Single-slot frame cell shared between the ingestion and processing contexts.
//!
//! Writers overwrite, readers take a cheap `Arc` clone of whatever is newest.
//! Frames written between two reads are dropped on purpose: a live preview only
//! ever cares about the latest picture, so there is no queue and no
//! backpressure on the transport.

use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Duration,
};

use crossbeam_channel::{Receiver, RecvTimeoutError};
use tracing::{debug, info, warn};

use crate::types::{CaptureError, Frame};

const FEEDER_RECV_TIMEOUT_MS: u64 = 200;

#[derive(Debug, Default)]
pub struct FrameSlot {
    latest: Mutex<Option<Arc<Frame>>>,
}

impl FrameSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the current frame. Never blocks on readers beyond the pointer swap.
    pub fn store(&self, frame: Frame) {
        let frame = Arc::new(frame);
        if let Ok(mut guard) = self.latest.lock() {
            *guard = Some(frame);
        }
    }

    /// Put the explicit "no frame" placeholder in the slot.
    pub fn clear(&self) {
        if let Ok(mut guard) = self.latest.lock() {
            *guard = None;
        }
    }

    /// Newest frame, or `None` when nothing has arrived or the slot was cleared.
    pub fn latest(&self) -> Option<Arc<Frame>> {
        match self.latest.lock() {
            Ok(guard) => guard.clone(),
            Err(_) => None,
        }
    }
}

/// Spawn the ingestion context: drain `frames` into `slot` until the source
/// closes or `running` is cleared.
///
/// Capture errors are logged and leave the previous frame in place, which the
/// health monitor will then report as frozen.
pub fn spawn_slot_feeder(
    frames: Receiver<Result<Frame, CaptureError>>,
    slot: Arc<FrameSlot>,
    running: Arc<AtomicBool>,
) -> std::io::Result<thread::JoinHandle<()>> {
    thread::Builder::new()
        .name("frame-ingest".into())
        .spawn(move || {
            let mut received: u64 = 0;
            while running.load(Ordering::Relaxed) {
                match frames.recv_timeout(Duration::from_millis(FEEDER_RECV_TIMEOUT_MS)) {
                    Ok(Ok(frame)) => {
                        if received == 0 {
                            info!(pts = frame.pts, "first video frame received");
                        } else {
                            debug!(pts = frame.pts, "video frame received");
                        }
                        received = received.wrapping_add(1);
                        slot.store(frame);
                    }
                    Ok(Err(err)) => warn!("capture error: {err}"),
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => {
                        info!("frame source closed after {received} frame(s)");
                        break;
                    }
                }
            }
        })
}
