//! Presence detection
//!
//! Before any share is touched the operator must prove they are physically
//! present. The primary signal is an 18 kHz tone (a dog whistle or a phone
//! app) picked up by the microphone; hosts without a usable recorder fall
//! back to pressing Enter at the console.
//!
//! Backends:
//! - [`ToneBackend`] over any [`SampleSource`] (synthetic or recorded PCM)
//! - [`CaptureBackend`] streaming from an external recorder process
//! - [`ManualConfirmation`] reading a line of operator input

pub mod capture;
pub mod goertzel;
pub mod manual;
pub mod tone;

use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::config::PresenceConfig;
use crate::error::Result;

pub use capture::CaptureBackend;
pub use goertzel::{ChunkAnalysis, Debounce, ToneAnalyzer};
pub use manual::ManualConfirmation;
pub use tone::{ChunkReader, PcmReader, SampleSource, ToneBackend, ToneGenerator};

/// Progress reported while a backend listens
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PresenceEvent {
    /// A chunk carried in-band energy above the threshold
    ToneChunk {
        energy: f64,
        frequency: f64,
        consecutive: u32,
    },
    /// The operator was asked to confirm manually
    Prompted,
}

/// A way of proving physical presence
pub trait PresenceBackend: Send {
    /// Short name for logs and audit records
    fn backend_type(&self) -> &'static str;

    /// Block for at most `timeout`; `Ok(false)` means no presence was shown
    fn detect(&mut self, timeout: Duration, observer: &mut dyn FnMut(PresenceEvent)) -> Result<bool>;
}

/// Primary backend with an optional fallback used when the primary errors
pub struct PresenceDetector {
    primary: Box<dyn PresenceBackend>,
    fallback: Option<Box<dyn PresenceBackend>>,
}

impl PresenceDetector {
    pub fn new(primary: Box<dyn PresenceBackend>) -> Self {
        Self {
            primary,
            fallback: None,
        }
    }

    pub fn with_fallback(mut self, fallback: Box<dyn PresenceBackend>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    /// Microphone capture when the recorder is installed, manual confirmation otherwise
    pub fn from_config(config: &PresenceConfig) -> Self {
        match CaptureBackend::from_config(config) {
            Some(capture) => {
                info!("Presence detection: microphone capture with manual fallback");
                Self::new(Box::new(capture)).with_fallback(Box::new(ManualConfirmation::stdin()))
            }
            None => {
                info!("Presence detection: manual confirmation");
                Self::new(Box::new(ManualConfirmation::stdin()))
            }
        }
    }

    pub fn backend_type(&self) -> &'static str {
        self.primary.backend_type()
    }

    /// Detect presence, reporting progress to `observer`
    ///
    /// The fallback only gets the time the primary left unused.
    pub fn detect_with(
        &mut self,
        timeout: Duration,
        observer: &mut dyn FnMut(PresenceEvent),
    ) -> Result<bool> {
        let start = Instant::now();
        match self.primary.detect(timeout, observer) {
            Ok(detected) => Ok(detected),
            Err(e) => match self.fallback.as_mut() {
                Some(fallback) => {
                    warn!(
                        "{} presence backend failed ({}), falling back to {}",
                        self.primary.backend_type(),
                        e,
                        fallback.backend_type()
                    );
                    let remaining = timeout.saturating_sub(start.elapsed());
                    fallback.detect(remaining, observer)
                }
                None => Err(e),
            },
        }
    }

    /// Detect presence; any backend error counts as absence
    pub fn detect_presence(&mut self, timeout: Duration) -> bool {
        self.detect_with(timeout, &mut |_| {}).unwrap_or_else(|e| {
            warn!("Presence detection failed: {}", e);
            false
        })
    }
}
