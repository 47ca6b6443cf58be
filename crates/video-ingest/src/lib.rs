//! Frame ingestion for the monitoring pipeline.
//!
//! - `types`: the transport-agnostic [`Frame`] and its decoding.
//! - `slot`: the last-write-wins [`FrameSlot`] and the ingestion thread feeding it.
//! - `ffmpeg`: an ffmpeg subprocess source for cameras, files and RTSP feeds.

mod ffmpeg;
mod slot;
mod types;

pub use ffmpeg::spawn_ffmpeg_reader;
pub use slot::{FrameSlot, spawn_slot_feeder};
pub use types::{CaptureError, Frame, FrameFormat};
