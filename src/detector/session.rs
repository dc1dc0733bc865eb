//! Blocking workflows on top of [`DetectorApi`].

use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use super::{DatasetSettings, DetectorApi, DetectorState, Geometry};
use crate::client::{ConfigurationClient, DATA_EXTENSION};
use crate::error::{AppResult, EpocError};
use crate::field::BEAM_CENTER;

/// Default total image time (100 x 500 us).
pub const DEFAULT_IMAGE_TIME_US: u64 = 50_000;
/// Image count used for live view (1 h at 20 Hz).
pub const LIVE_VIEW_IMAGES: u64 = 72_000;
/// Interval between status polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);
/// Pause after a start request before the first poll.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(300);

/// Acquisition defaults plus the appliance handle.
pub struct DetectorSession<A: DetectorApi> {
    api: A,
    image_time_us: u64,
    live_images: u64,
    geometry: Geometry,
    poll_interval: Duration,
    settle_delay: Duration,
}

impl<A: DetectorApi> DetectorSession<A> {
    /// Session with default timing and geometry.
    pub fn new(api: A) -> Self {
        Self {
            api,
            image_time_us: DEFAULT_IMAGE_TIME_US,
            live_images: LIVE_VIEW_IMAGES,
            geometry: Geometry::default(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            settle_delay: DEFAULT_SETTLE_DELAY,
        }
    }

    /// Override the status poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Override the pause after start requests.
    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    /// Override the geometry sent with each dataset.
    pub fn with_geometry(mut self, geometry: Geometry) -> Self {
        self.geometry = geometry;
        self
    }

    /// The appliance handle.
    pub fn api(&self) -> &A {
        &self.api
    }

    /// Total image time in microseconds.
    pub fn image_time_us(&self) -> u64 {
        self.image_time_us
    }

    /// Change the total image time.
    pub fn set_image_time_us(&mut self, value: u64) {
        self.image_time_us = value;
    }

    /// Geometry sent with each dataset.
    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    /// Take the beam center from the shared configuration, if it is set.
    pub fn configure_from(&mut self, cfg: &mut ConfigurationClient) -> AppResult<()> {
        match cfg.read(BEAM_CENTER) {
            Ok(beam_center) => {
                self.geometry = self.geometry.clone().with_beam_center(&beam_center);
                Ok(())
            }
            Err(EpocError::NotSet(_)) => Ok(()),
            Err(err) => Err(err),
        }
    }

    /// Run once after the appliance starts.
    pub async fn initialize(&self) -> AppResult<()> {
        info!("Initializing detector");
        self.api.initialize().await
    }

    /// Current appliance state.
    pub async fn status(&self) -> AppResult<DetectorState> {
        Ok(self.api.status().await?.state)
    }

    /// Start a measurement. Without a prefix the data is not saved.
    ///
    /// Fails with `DetectorNotIdle` unless the appliance is idle. With `wait`
    /// the call returns once the appliance is idle again.
    pub async fn start(&self, n_images: u64, file_prefix: Option<&Path>, wait: bool) -> AppResult<()> {
        let state = self.status().await?;
        if !state.is_idle() {
            return Err(EpocError::DetectorNotIdle(state.to_string()));
        }

        let settings = DatasetSettings {
            image_time_us: self.image_time_us,
            images_per_trigger: n_images,
            geometry: self.geometry.clone(),
            file_prefix: file_prefix
                .map(|p| p.to_string_lossy().into_owned())
                .unwrap_or_default(),
        };
        info!(
            "Starting {} images (prefix: '{}')",
            n_images, settings.file_prefix
        );
        self.api.start(&settings).await?;

        if wait {
            tokio::time::sleep(self.settle_delay).await;
            self.wait_until_idle(false).await?;
        }
        Ok(())
    }

    /// Abort the running measurement.
    pub async fn cancel(&self) -> AppResult<()> {
        debug!("Cancelling measurement");
        self.api.cancel().await
    }

    /// Record a pedestal. With `wait`, block until done and return its statistics.
    pub async fn collect_pedestal(&self, wait: bool) -> AppResult<Option<serde_json::Value>> {
        info!("Collecting pedestal");
        self.api.pedestal().await?;
        if !wait {
            return Ok(None);
        }
        tokio::time::sleep(self.settle_delay).await;
        self.wait_until_idle(false).await?;
        let stats = self.api.calibration_statistics().await?;
        info!("Pedestal statistics: {}", stats);
        Ok(Some(stats))
    }

    /// Poll status until the appliance is idle.
    ///
    /// There is no timeout; wrap the call if one is needed. An `Error` state
    /// ends the wait with `EpocError::Detector`.
    pub async fn wait_until_idle(&self, report_progress: bool) -> AppResult<()> {
        loop {
            match self.status().await? {
                DetectorState::Idle => {
                    if report_progress {
                        info!("Progress: 100%");
                    }
                    return Ok(());
                }
                DetectorState::Busy { progress } => {
                    if report_progress {
                        info!("Progress: {:.0}%", progress * 100.0);
                    }
                }
                DetectorState::Error(message) => return Err(EpocError::Detector(message)),
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Start an unsaved long run for live viewing.
    pub async fn live(&self) -> AppResult<()> {
        self.start(self.live_images, None, false).await
    }

    /// Stop live view, record `n_images` to the configured location, update
    /// the bookkeeping and resume live view. Returns the dataset path.
    pub async fn record_dataset(
        &self,
        cfg: &mut ConfigurationClient,
        n_images: u64,
    ) -> AppResult<PathBuf> {
        self.cancel().await?;
        self.wait_until_idle(false).await?;

        let prefix = cfg.file_prefix()?;
        let mut fpath = prefix.clone().into_os_string();
        fpath.push(format!("_master{DATA_EXTENSION}"));
        let fpath = PathBuf::from(fpath);

        info!("Starting to record: {}", fpath.display());
        self.start(n_images, Some(&prefix), true).await?;
        info!("Measurement stopped");

        let stats = self.api.collection_statistics().await?;
        info!("Collection statistics: {}", stats);
        cfg.record_dataset(&fpath)?;

        self.live().await?;
        Ok(fpath)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::clock::FixedClock;
    use crate::detector::MockDetector;
    use serde_json::json;

    fn session(polls: u32) -> DetectorSession<MockDetector> {
        DetectorSession::new(MockDetector::new(polls))
            .with_poll_interval(Duration::from_millis(1))
            .with_settle_delay(Duration::from_millis(1))
    }

    fn configured_client() -> ConfigurationClient {
        let mut cfg = ConfigurationClient::new(MemoryBackend::new())
            .unwrap()
            .with_clock(FixedClock::parse("2024-08-13 09:05:00").unwrap());
        cfg.set("PI_name", "Erik").unwrap();
        cfg.set("project_id", "epoc").unwrap();
        cfg.set("affiliation", "UniVie").unwrap();
        cfg.set("base_data_dir", "/data").unwrap();
        cfg.set("measurement_tag", "Lysozyme").unwrap();
        cfg.set_file_id(4).unwrap();
        cfg
    }

    #[tokio::test]
    async fn test_start_and_wait() {
        let session = session(3);
        session.start(10, Some(Path::new("/tmp/run")), true).await.unwrap();
        assert!(session.status().await.unwrap().is_idle());

        let started = session.api().started();
        assert_eq!(started.len(), 1);
        assert_eq!(started[0].images_per_trigger, 10);
        assert_eq!(started[0].image_time_us, DEFAULT_IMAGE_TIME_US);
        assert_eq!(started[0].file_prefix, "/tmp/run");
    }

    #[tokio::test]
    async fn test_start_refused_while_busy() {
        let session = session(100);
        session.live().await.unwrap();
        let err = session.start(1, None, false).await.unwrap_err();
        assert!(matches!(err, EpocError::DetectorNotIdle(_)));
    }

    #[tokio::test]
    async fn test_error_state_ends_wait() {
        let session = session(3);
        session.api().inject_error("trigger timeout");
        let err = session.wait_until_idle(true).await.unwrap_err();
        assert!(matches!(err, EpocError::Detector(msg) if msg == "trigger timeout"));
    }

    #[tokio::test]
    async fn test_pedestal_returns_statistics() {
        let session = session(2);
        let stats = session.collect_pedestal(true).await.unwrap();
        assert_eq!(stats, Some(json!({ "pedestal_runs": 1 })));
        assert_eq!(session.collect_pedestal(false).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_record_dataset_updates_bookkeeping() {
        let session = session(2);
        let mut cfg = configured_client();
        session.live().await.unwrap();

        let fpath = session.record_dataset(&mut cfg, 500).await.unwrap();
        let expected = PathBuf::from(
            "/data/UniVie/Erik/2024/epoc/2024-08-13/004_epoc_Lysozyme_2024-08-13_0905_master.h5",
        );
        assert_eq!(fpath, expected);
        assert_eq!(cfg.last_dataset().unwrap(), expected);
        assert_eq!(cfg.file_id().unwrap(), 5);

        let started = session.api().started();
        assert_eq!(started.len(), 3);
        assert_eq!(started[1].images_per_trigger, 500);
        assert_eq!(
            started[1].file_prefix,
            "/data/UniVie/Erik/2024/epoc/2024-08-13/004_epoc_Lysozyme_2024-08-13_0905"
        );
        assert_eq!(started[2].images_per_trigger, LIVE_VIEW_IMAGES);
        assert!(started[2].file_prefix.is_empty());
        assert!(session.api().cancel_count() >= 1);
    }

    #[tokio::test]
    async fn test_configure_from_beam_center() {
        let mut session = session(1);
        let mut cfg = configured_client();
        session.configure_from(&mut cfg).unwrap();
        assert_eq!(session.geometry(), &Geometry::default());

        cfg.set("beam_center", json!([512.5, 256])).unwrap();
        session.configure_from(&mut cfg).unwrap();
        assert_eq!(session.geometry().beam_x_pxl, 512.5);
        assert_eq!(session.geometry().beam_y_pxl, 256.0);
    }
}
