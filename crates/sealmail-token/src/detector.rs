//! Token presence polling with coalesced change notifications.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::driver::{DriverError, TokenDriver};
use crate::identity::{IdentityShape, TokenIdentity};

/// Errors from a detection poll.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DetectError {
    /// The driver stack (reader, daemon) is unavailable.
    #[error("Token driver unavailable: {0}")]
    DriverUnavailable(String),

    /// Communication with the token failed mid-read.
    #[error("Token detection failed: {0}")]
    Communication(String),
}

/// Result of one detection poll. Absence is a normal outcome, not an error.
#[derive(Debug, Clone)]
pub enum Detection {
    /// A token is connected.
    Present(TokenIdentity),
    /// No token is connected.
    Absent,
}

/// Change notification raised by the detector.
///
/// Consecutive identical samples are coalesced; an event is only raised
/// when presence, serial, or per-slot fingerprint presence differs from
/// the previous sample.
#[derive(Debug, Clone)]
pub enum TokenEvent {
    /// A token appeared where none was known before.
    Connected(TokenIdentity),
    /// The connected token's identity changed (serial or key presence).
    Changed(TokenIdentity),
    /// The previously known token is gone.
    Disconnected,
}

/// Value-comparable record of the last emitted sample.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Shape {
    Absent,
    Present(IdentityShape),
}

/// Polls a [`TokenDriver`] for token presence and identity.
///
/// Owns the "last known" sample so callers never compare detections
/// themselves.
#[derive(Debug)]
pub struct TokenDetector<D> {
    driver: Arc<D>,
    last: Option<Shape>,
}

impl<D: TokenDriver> TokenDetector<D> {
    /// Creates a detector over the given driver.
    #[must_use]
    pub fn new(driver: D) -> Self {
        Self {
            driver: Arc::new(driver),
            last: None,
        }
    }

    /// Performs one on-demand detection poll.
    ///
    /// Blocks on the driver; async callers should use [`Self::watch`] or
    /// wrap this in `spawn_blocking`.
    ///
    /// # Errors
    ///
    /// Returns an error for driver faults; plain absence is `Ok(Absent)`.
    pub fn sample(&self) -> Result<Detection, DetectError> {
        Self::sample_driver(&self.driver)
    }

    fn sample_driver(driver: &D) -> Result<Detection, DetectError> {
        match driver.detect() {
            Ok(false) => return Ok(Detection::Absent),
            Ok(true) => {}
            Err(DriverError::Unavailable(reason)) => {
                return Err(DetectError::DriverUnavailable(reason));
            }
            Err(e) => return Err(DetectError::Communication(e.to_string())),
        }

        match driver.read_identity() {
            Ok(identity) => Ok(Detection::Present(identity)),
            // The token can vanish between presence check and read.
            Err(DriverError::Communication(_)) => Ok(Detection::Absent),
            Err(DriverError::Unavailable(reason)) => {
                Err(DetectError::DriverUnavailable(reason))
            }
            Err(e) => Err(DetectError::Communication(e.to_string())),
        }
    }

    /// Feeds a detection sample through the coalescing filter.
    ///
    /// Returns an event only when the sample differs from the last one by
    /// presence, serial, or fingerprint presence. An initial `Absent`
    /// sample raises nothing.
    pub fn observe(&mut self, detection: &Detection) -> Option<TokenEvent> {
        let shape = match detection {
            Detection::Present(identity) => Shape::Present(identity.shape()),
            Detection::Absent => Shape::Absent,
        };

        let previous = self.last.replace(shape.clone());
        if previous.as_ref() == Some(&shape) {
            return None;
        }

        match (previous, detection) {
            (Some(Shape::Present(_)), Detection::Present(identity)) => {
                Some(TokenEvent::Changed(identity.clone()))
            }
            (_, Detection::Present(identity)) => Some(TokenEvent::Connected(identity.clone())),
            (Some(Shape::Present(_)), Detection::Absent) => Some(TokenEvent::Disconnected),
            // First-ever sample with no token: nothing to report.
            (_, Detection::Absent) => None,
        }
    }

    /// Starts interval polling, delivering coalesced events in detection
    /// order.
    ///
    /// Polling stops when the receiver is dropped (UI teardown) or the
    /// handle is aborted. Driver calls run on the blocking pool.
    #[must_use]
    pub fn watch(mut self, interval: Duration) -> (JoinHandle<()>, mpsc::Receiver<TokenEvent>)
    where
        D: 'static,
    {
        let (tx, rx) = mpsc::channel(16);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;

                // A dropped receiver ends polling even when no event is
                // pending; coalescing can leave sends arbitrarily far apart.
                if tx.is_closed() {
                    break;
                }

                let driver = Arc::clone(&self.driver);
                let sample =
                    tokio::task::spawn_blocking(move || Self::sample_driver(&driver)).await;

                let detection = match sample {
                    Ok(Ok(detection)) => detection,
                    Ok(Err(e)) => {
                        warn!("Token detection failed: {e}");
                        continue;
                    }
                    Err(e) => {
                        warn!("Detection task failed: {e}");
                        break;
                    }
                };

                if let Some(event) = self.observe(&detection) {
                    debug!("Token event: {event:?}");
                    if tx.send(event).await.is_err() {
                        break;
                    }
                }
            }
        });

        (handle, rx)
    }
}
