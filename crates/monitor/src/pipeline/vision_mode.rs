//! Operator-selected preview mode.
//!
//! The default grid runs the full fall pipeline. Fullscreen and glasses are
//! short-lived show modes that fall back to the grid on their own.

use std::{
    sync::Mutex,
    time::{Duration, Instant},
};

use serde::Serialize;
use tracing::info;

const FULLSCREEN_HOLD: Duration = Duration::from_secs(60);
const GLASSES_HOLD: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VisionMode {
    #[default]
    Grid,
    /// The raw frame at recording size, no inference.
    Fullscreen,
    /// The raw frame with sunglasses and a mustache drawn over each face.
    Glasses,
}

impl VisionMode {
    /// Mode named by a control request. Unknown names select the grid.
    pub fn from_request(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "fullscreen" => VisionMode::Fullscreen,
            "glasses" => VisionMode::Glasses,
            _ => VisionMode::Grid,
        }
    }

    /// How long the mode lasts before reverting to the grid.
    pub fn hold(self) -> Option<Duration> {
        match self {
            VisionMode::Grid => None,
            VisionMode::Fullscreen => Some(FULLSCREEN_HOLD),
            VisionMode::Glasses => Some(GLASSES_HOLD),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct VisionModeStatus {
    pub mode: VisionMode,
    pub glasses: bool,
    pub fullscreen: bool,
    /// Seconds until the mode reverts; absent for the grid.
    pub expires_in_secs: Option<f64>,
}

#[derive(Debug, Default)]
pub struct VisionModeSwitch {
    state: Mutex<(VisionMode, Option<Instant>)>,
}

impl VisionModeSwitch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, mode: VisionMode, now: Instant) -> VisionModeStatus {
        if let Ok(mut state) = self.state.lock() {
            *state = (mode, Some(now));
        }
        info!(?mode, "vision mode set");
        self.status(now)
    }

    /// Active mode at `now`, reverting an expired show mode to the grid.
    pub fn current(&self, now: Instant) -> VisionMode {
        let Ok(mut state) = self.state.lock() else {
            return VisionMode::Grid;
        };
        let (mode, since) = *state;
        let expired = match (mode.hold(), since) {
            (Some(hold), Some(since)) => now.saturating_duration_since(since) > hold,
            _ => false,
        };
        if expired {
            info!(?mode, "vision mode expired; back to grid");
            *state = (VisionMode::Grid, None);
            return VisionMode::Grid;
        }
        mode
    }

    pub fn status(&self, now: Instant) -> VisionModeStatus {
        let mode = self.current(now);
        let since = self.state.lock().ok().and_then(|state| state.1);
        let expires_in_secs = match (mode.hold(), since) {
            (Some(hold), Some(since)) => Some(
                hold.saturating_sub(now.saturating_duration_since(since))
                    .as_secs_f64(),
            ),
            _ => None,
        };
        VisionModeStatus {
            mode,
            glasses: mode == VisionMode::Glasses,
            fullscreen: mode == VisionMode::Fullscreen,
            expires_in_secs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_names_map_to_modes() {
        assert_eq!(VisionMode::from_request("glasses"), VisionMode::Glasses);
        assert_eq!(VisionMode::from_request(" Fullscreen "), VisionMode::Fullscreen);
        assert_eq!(VisionMode::from_request("off"), VisionMode::Grid);
        assert_eq!(VisionMode::from_request(""), VisionMode::Grid);
    }

    #[test]
    fn show_modes_revert_after_their_hold() {
        let t0 = Instant::now();
        let switch = VisionModeSwitch::new();
        assert_eq!(switch.current(t0), VisionMode::Grid);

        switch.set(VisionMode::Glasses, t0);
        assert_eq!(switch.current(t0 + Duration::from_secs(30)), VisionMode::Glasses);
        assert_eq!(switch.current(t0 + Duration::from_secs(31)), VisionMode::Grid);

        let status = switch.set(VisionMode::Fullscreen, t0);
        assert!(status.fullscreen && !status.glasses);
        assert_eq!(status.expires_in_secs, Some(60.0));
        assert_eq!(switch.current(t0 + Duration::from_secs(59)), VisionMode::Fullscreen);
        assert_eq!(switch.current(t0 + Duration::from_secs(61)), VisionMode::Grid);
    }

    #[test]
    fn selecting_the_grid_cancels_a_show_mode() {
        let t0 = Instant::now();
        let switch = VisionModeSwitch::new();
        switch.set(VisionMode::Fullscreen, t0);
        let status = switch.set(VisionMode::from_request("none"), t0 + Duration::from_secs(1));
        assert_eq!(status.mode, VisionMode::Grid);
        assert_eq!(status.expires_in_secs, None);
    }

    #[test]
    fn status_serializes_lowercase() {
        let status = VisionModeSwitch::new().set(VisionMode::Glasses, Instant::now());
        let json = serde_json::to_value(status).unwrap();
        assert_eq!(json["mode"], "glasses");
        assert_eq!(json["glasses"], true);
        assert_eq!(json["expires_in_secs"], 30.0);
    }
}
