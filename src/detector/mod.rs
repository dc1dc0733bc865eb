//! Acquisition appliance session
//!
//! The detector is driven by a separate acquisition appliance (Jungfraujoch
//! style broker). This module only models the control surface the rest of the
//! system needs: initialise, start a dataset, cancel, record a pedestal, and
//! poll status until the appliance is idle again.
//!
//! - [`DetectorApi`]: the appliance operations, one call per request.
//! - [`DetectorSession`]: holds acquisition defaults and implements the
//!   blocking workflows (`wait_until_idle`, `record_dataset`, ...).
//! - [`MockDetector`]: in-process appliance for tests and dry runs.
//!
//! The wire protocol of a real appliance is provided by whoever implements
//! [`DetectorApi`]; the session owns no transport.

pub mod mock;
pub mod session;

pub use mock::MockDetector;
pub use session::DetectorSession;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::AppResult;

/// Appliance state as reported by `status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DetectorState {
    /// Ready to accept a new request.
    Idle,
    /// Measuring or calibrating.
    Busy {
        /// Completed fraction, 0.0 to 1.0.
        progress: f64,
    },
    /// Appliance reported a failure.
    Error(String),
}

impl DetectorState {
    /// True for [`DetectorState::Idle`].
    pub fn is_idle(&self) -> bool {
        matches!(self, DetectorState::Idle)
    }
}

impl fmt::Display for DetectorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DetectorState::Idle => write!(f, "Idle"),
            DetectorState::Busy { progress } => write!(f, "Busy ({:.0}%)", progress * 100.0),
            DetectorState::Error(message) => write!(f, "Error: {message}"),
        }
    }
}

/// Geometry and threshold parameters sent with every dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Geometry {
    /// Beam center x in pixels.
    pub beam_x_pxl: f64,
    /// Beam center y in pixels.
    pub beam_y_pxl: f64,
    /// Sample to detector distance.
    pub detector_distance_mm: f64,
    /// Incident beam energy.
    pub incident_energy_kev: f64,
    /// Pixels below this value are zeroed.
    pub pixel_value_low_threshold: i64,
}

impl Default for Geometry {
    fn default() -> Self {
        Self {
            beam_x_pxl: 1.0,
            beam_y_pxl: 1.0,
            detector_distance_mm: 100.0,
            incident_energy_kev: 1.0,
            pixel_value_low_threshold: 0,
        }
    }
}

impl Geometry {
    /// Use the `beam_center` value (`[x, y]`) if it is a pair of numbers.
    pub fn with_beam_center(mut self, beam_center: &serde_json::Value) -> Self {
        if let Some([x, y]) = beam_center.as_array().map(Vec::as_slice) {
            if let (Some(x), Some(y)) = (x.as_f64(), y.as_f64()) {
                self.beam_x_pxl = x;
                self.beam_y_pxl = y;
            }
        }
        self
    }
}

/// Parameters of one dataset request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetSettings {
    /// Total image time in microseconds.
    pub image_time_us: u64,
    /// Number of images to collect.
    pub images_per_trigger: u64,
    /// Geometry and thresholds.
    #[serde(flatten)]
    pub geometry: Geometry,
    /// File prefix. Empty means the data is not written.
    pub file_prefix: String,
}

/// Status reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectorStatus {
    /// Current state.
    pub state: DetectorState,
}

/// Requests understood by the acquisition appliance.
#[async_trait]
pub trait DetectorApi: Send + Sync {
    /// One-time setup after the appliance (re)starts.
    async fn initialize(&self) -> AppResult<()>;

    /// Start a dataset. The appliance rejects this when it is not idle.
    async fn start(&self, settings: &DatasetSettings) -> AppResult<()>;

    /// Abort the running measurement.
    async fn cancel(&self) -> AppResult<()>;

    /// Start a pedestal (dark frame) calibration run.
    async fn pedestal(&self) -> AppResult<()>;

    /// Current state.
    async fn status(&self) -> AppResult<DetectorStatus>;

    /// Statistics of the last pedestal run.
    async fn calibration_statistics(&self) -> AppResult<serde_json::Value>;

    /// Statistics of the last data collection.
    async fn collection_statistics(&self) -> AppResult<serde_json::Value>;
}
