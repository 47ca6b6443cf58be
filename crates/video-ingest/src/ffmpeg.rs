//! ffmpeg-backed frame source producing raw BGR frames.
//!
//! ffmpeg handles protocol and codec details (RTSP, V4L2 devices, files); this
//! module only reads fixed-size raw frames from its stdout and stamps each one
//! with a monotonically increasing presentation timestamp.

use std::{
    io::Read,
    process::{Child, Command, Stdio},
    thread,
};

use anyhow::{Result, anyhow};
use crossbeam_channel::{Receiver, Sender, bounded};
use tracing::debug;

use crate::types::{CaptureError, Frame};

const READER_QUEUE: usize = 4;

/// Spawn ffmpeg for `uri`, scaled to `target_size`, and return the frame stream.
pub fn spawn_ffmpeg_reader(
    uri: &str,
    target_size: (u32, u32),
) -> Result<Receiver<Result<Frame, CaptureError>>> {
    let (width, height) = target_size;
    if width == 0 || height == 0 {
        return Err(anyhow!("capture size must be non-zero, got {width}x{height}"));
    }

    let mut cmd = Command::new("ffmpeg");
    cmd.arg("-hide_banner").arg("-loglevel").arg("error");

    if uri.starts_with("rtsp://") || uri.starts_with("rtsps://") {
        cmd.arg("-rtsp_transport")
            .arg("tcp")
            .arg("-fflags")
            .arg("nobuffer")
            .arg("-flags")
            .arg("low_delay");
    }

    let input = match parse_device_index(uri) {
        Some(index) => {
            cmd.arg("-f").arg("video4linux2");
            format!("/dev/video{index}")
        }
        None => uri.to_string(),
    };

    cmd.arg("-i")
        .arg(&input)
        .arg("-an")
        .arg("-vf")
        .arg(format!("scale={width}:{height}"))
        .arg("-pix_fmt")
        .arg("bgr24")
        .arg("-f")
        .arg("rawvideo")
        .arg("-")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit());

    let mut child = cmd.spawn().map_err(|err| CaptureError::Open {
        uri: format!("{input} ({err})"),
    })?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("failed to capture ffmpeg stdout"))?;

    let (tx, rx) = bounded(READER_QUEUE);
    thread::Builder::new()
        .name("ffmpeg-reader".into())
        .spawn(move || {
            if let Err(err) = read_loop(stdout, child, target_size, tx.clone()) {
                let _ = tx.send(Err(err));
            }
        })?;

    Ok(rx)
}

fn read_loop(
    mut stdout: impl Read,
    mut child: Child,
    target_size: (u32, u32),
    tx: Sender<Result<Frame, CaptureError>>,
) -> Result<(), CaptureError> {
    let (width, height) = target_size;
    let frame_bytes = (width as usize) * (height as usize) * 3;
    let mut buffer = vec![0u8; frame_bytes];
    let mut pts: i64 = 0;
    let mut result = Ok(());

    loop {
        match stdout.read_exact(&mut buffer) {
            Ok(()) => {
                pts = pts.wrapping_add(1);
                if tx
                    .send(Ok(Frame::bgr8(pts, width, height, buffer.clone())))
                    .is_err()
                {
                    debug!("frame receiver dropped; stopping ffmpeg");
                    break;
                }
            }
            Err(err) => {
                result = Err(CaptureError::Other(err.into()));
                break;
            }
        }
    }

    let _ = child.kill();
    let _ = child.wait();
    result
}

pub(crate) fn parse_device_index(uri: &str) -> Option<u32> {
    if let Ok(index) = uri.parse::<u32>() {
        return Some(index);
    }
    uri.strip_prefix("/dev/video")
        .filter(|rest| !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit()))
        .and_then(|rest| rest.parse().ok())
}
