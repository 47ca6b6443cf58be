//! Pose model served by an external inference process over HTTP.
//!
//! The frame is posted as a JPEG body; the server answers with a JSON array of
//! [`PersonDetection`]s in the coordinate space of the posted image.

use std::time::Duration;

use image::{RgbImage, codecs::jpeg::JpegEncoder};
use reqwest::blocking::Client;
use tracing::trace;

use crate::detector::{ModelError, PersonDetection, PoseModel};

const DEFAULT_TIMEOUT_MS: u64 = 2_000;

pub struct HttpPoseModel {
    client: Client,
    endpoint: String,
    jpeg_quality: u8,
}

impl HttpPoseModel {
    pub fn new(endpoint: impl Into<String>) -> Result<Self, ModelError> {
        let client = Client::builder()
            .timeout(Duration::from_millis(DEFAULT_TIMEOUT_MS))
            .build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            jpeg_quality: 80,
        })
    }

    pub fn with_jpeg_quality(mut self, quality: u8) -> Self {
        self.jpeg_quality = quality.clamp(1, 100);
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl PoseModel for HttpPoseModel {
    fn detect(&self, image: &RgbImage) -> Result<Vec<PersonDetection>, ModelError> {
        let mut body = Vec::new();
        JpegEncoder::new_with_quality(&mut body, self.jpeg_quality).encode_image(image)?;

        let response = self
            .client
            .post(&self.endpoint)
            .header(reqwest::header::CONTENT_TYPE, "image/jpeg")
            .body(body)
            .send()?
            .error_for_status()?;
        let bytes = response.bytes()?;
        let people = parse_detections(&bytes)?;
        trace!(count = people.len(), "pose model response");
        Ok(people)
    }
}

pub(crate) fn parse_detections(bytes: &[u8]) -> Result<Vec<PersonDetection>, ModelError> {
    serde_json::from_slice(bytes).map_err(|err| ModelError::Malformed(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_bodies_are_reported() {
        assert!(matches!(
            parse_detections(b"{\"oops\": true}"),
            Err(ModelError::Malformed(_))
        ));
        assert!(parse_detections(b"[]").unwrap().is_empty());
    }

    #[test]
    fn quality_is_clamped() {
        let model = HttpPoseModel::new("http://127.0.0.1:9/pose")
            .unwrap()
            .with_jpeg_quality(0);
        assert_eq!(model.jpeg_quality, 1);
        assert_eq!(model.endpoint(), "http://127.0.0.1:9/pose");
    }
}
