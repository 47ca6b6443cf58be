//! Processing thread driving [`FrameProcessor`] at a fixed cadence.

use std::{
    io,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use tracing::{debug, error, info, warn};

use crate::{
    pipeline::{
        processor::{FrameProcessor, FramePacket, SharedPacket},
        telemetry,
    },
    recording::{RecordingController, RecordingStatus},
};

/// Handle for the processing thread. Dropping it stops the loop.
pub struct ProcessingLoop {
    running: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl ProcessingLoop {
    /// Start polling the frame slot every `interval`, publishing each packet
    /// into `latest`. An active recording is closed when the loop exits.
    pub fn spawn(
        processor: Arc<Mutex<FrameProcessor>>,
        interval: Duration,
        latest: SharedPacket,
        recorder: Arc<RecordingController>,
    ) -> io::Result<Self> {
        let running = Arc::new(AtomicBool::new(true));
        let loop_running = running.clone();
        let handle = telemetry::spawn_thread("frame-processing", move || {
            info!(interval_ms = interval.as_millis() as u64, "processing loop started");
            let mut iterations: u64 = 0;
            while loop_running.load(Ordering::Relaxed) {
                let started = Instant::now();
                let packet = match processor.lock() {
                    Ok(mut processor) => {
                        tracing::info_span!("pipeline.frame", iteration = iterations)
                            .in_scope(|| processor.process_frame(started))
                    }
                    Err(_) => {
                        error!("frame processor lock poisoned; stopping loop");
                        break;
                    }
                };
                let frames = packet.summary.frame_number;
                publish(&latest, packet);
                ::metrics::histogram!("robowatch_process_frame_seconds")
                    .record(started.elapsed().as_secs_f64());

                iterations = iterations.wrapping_add(1);
                if iterations % 500 == 0 {
                    debug!(iterations, frames, "processing heartbeat");
                }
                thread::sleep(interval.saturating_sub(started.elapsed()));
            }

            match recorder.stop() {
                Ok(RecordingStatus::Stopped { file }) => info!("closed {file} on shutdown"),
                Ok(_) => {}
                Err(err) => warn!("failed to close recording on shutdown: {err}"),
            }
            info!("processing loop stopped");
        })?;
        Ok(Self {
            running,
            handle: Some(handle),
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Signal the loop and wait for the thread to finish.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("processing thread panicked");
            }
        }
    }
}

impl Drop for ProcessingLoop {
    fn drop(&mut self) {
        self.shutdown();
    }
}

pub(crate) fn publish(latest: &SharedPacket, packet: FramePacket) {
    match latest.lock() {
        Ok(mut guard) => *guard = Some(packet),
        Err(_) => warn!("latest frame lock poisoned"),
    }
}

/// Copy of the most recent packet, if the loop produced one yet.
pub fn latest_packet(latest: &SharedPacket) -> Option<FramePacket> {
    match latest.lock() {
        Ok(guard) => guard.clone(),
        Err(_) => None,
    }
}
