//! Simulated acquisition appliance.
//!
//! A started run stays busy for a fixed number of status polls, then becomes
//! idle. Start and pedestal requests are rejected while busy, like the real
//! appliance.

use async_trait::async_trait;
use serde_json::json;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;

use super::{DatasetSettings, DetectorApi, DetectorState, DetectorStatus};
use crate::error::{AppResult, EpocError};

#[derive(Debug)]
struct MockState {
    state: DetectorState,
    remaining_polls: u32,
    initialized: bool,
    started: Vec<DatasetSettings>,
    pedestal_runs: u32,
    cancels: u32,
}

/// In-process appliance.
#[derive(Debug)]
pub struct MockDetector {
    polls_per_run: u32,
    inner: Mutex<MockState>,
}

impl Default for MockDetector {
    fn default() -> Self {
        Self::new(3)
    }
}

impl MockDetector {
    /// Runs finish after `polls_per_run` status polls (at least one).
    pub fn new(polls_per_run: u32) -> Self {
        Self {
            polls_per_run: polls_per_run.max(1),
            inner: Mutex::new(MockState {
                state: DetectorState::Idle,
                remaining_polls: 0,
                initialized: false,
                started: Vec::new(),
                pedestal_runs: 0,
                cancels: 0,
            }),
        }
    }

    /// Force the appliance into the error state.
    pub fn inject_error(&self, message: &str) {
        self.lock().state = DetectorState::Error(message.to_string());
    }

    /// Every accepted start request, oldest first.
    pub fn started(&self) -> Vec<DatasetSettings> {
        self.lock().started.clone()
    }

    /// Whether `initialize` was called.
    pub fn is_initialized(&self) -> bool {
        self.lock().initialized
    }

    /// Number of cancel requests.
    pub fn cancel_count(&self) -> u32 {
        self.lock().cancels
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn begin_run(&self, inner: &mut MockState) -> AppResult<()> {
        if !inner.state.is_idle() {
            return Err(EpocError::DetectorNotIdle(inner.state.to_string()));
        }
        inner.state = DetectorState::Busy { progress: 0.0 };
        inner.remaining_polls = self.polls_per_run;
        Ok(())
    }
}

#[async_trait]
impl DetectorApi for MockDetector {
    async fn initialize(&self) -> AppResult<()> {
        let mut inner = self.lock();
        inner.initialized = true;
        inner.state = DetectorState::Idle;
        Ok(())
    }

    async fn start(&self, settings: &DatasetSettings) -> AppResult<()> {
        let mut inner = self.lock();
        self.begin_run(&mut inner)?;
        debug!("Mock detector started: {:?}", settings);
        inner.started.push(settings.clone());
        Ok(())
    }

    async fn cancel(&self) -> AppResult<()> {
        let mut inner = self.lock();
        inner.cancels += 1;
        if let DetectorState::Busy { .. } = inner.state {
            inner.state = DetectorState::Idle;
            inner.remaining_polls = 0;
        }
        Ok(())
    }

    async fn pedestal(&self) -> AppResult<()> {
        let mut inner = self.lock();
        self.begin_run(&mut inner)?;
        inner.pedestal_runs += 1;
        Ok(())
    }

    async fn status(&self) -> AppResult<DetectorStatus> {
        let mut inner = self.lock();
        if let DetectorState::Busy { .. } = inner.state {
            inner.remaining_polls = inner.remaining_polls.saturating_sub(1);
            inner.state = if inner.remaining_polls == 0 {
                DetectorState::Idle
            } else {
                let done = self.polls_per_run - inner.remaining_polls;
                DetectorState::Busy {
                    progress: f64::from(done) / f64::from(self.polls_per_run),
                }
            };
        }
        Ok(DetectorStatus {
            state: inner.state.clone(),
        })
    }

    async fn calibration_statistics(&self) -> AppResult<serde_json::Value> {
        Ok(json!({ "pedestal_runs": self.lock().pedestal_runs }))
    }

    async fn collection_statistics(&self) -> AppResult<serde_json::Value> {
        let inner = self.lock();
        Ok(match inner.started.last() {
            Some(last) => json!({
                "images_expected": last.images_per_trigger,
                "file_prefix": last.file_prefix,
            }),
            None => json!({}),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::Geometry;

    fn settings(n: u64) -> DatasetSettings {
        DatasetSettings {
            image_time_us: 50_000,
            images_per_trigger: n,
            geometry: Geometry::default(),
            file_prefix: String::new(),
        }
    }

    #[tokio::test]
    async fn test_run_finishes_after_polls() {
        let det = MockDetector::new(2);
        det.start(&settings(10)).await.unwrap();
        assert_eq!(
            det.status().await.unwrap().state,
            DetectorState::Busy { progress: 0.5 }
        );
        assert_eq!(det.status().await.unwrap().state, DetectorState::Idle);
    }

    #[tokio::test]
    async fn test_start_rejected_while_busy() {
        let det = MockDetector::new(5);
        det.start(&settings(10)).await.unwrap();
        assert!(matches!(
            det.start(&settings(10)).await,
            Err(EpocError::DetectorNotIdle(_))
        ));
        assert!(det.pedestal().await.is_err());
        det.cancel().await.unwrap();
        assert_eq!(det.status().await.unwrap().state, DetectorState::Idle);
        assert_eq!(det.started().len(), 1);
    }
}
