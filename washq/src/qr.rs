//! QR payloads: machine URLs in, machine ids out.
//!
//! A machine QR code encodes `{base}/machine/{id}`. Scanned text is accepted
//! in any of these shapes, tried in order:
//!
//! 1. a `/machine/{id}` path segment
//! 2. an `id` query parameter
//! 3. a `machineId` query parameter
//! 4. a bare id

use crate::error::{Result, WashqError};
use crate::registry::MachineRegistry;
use crate::types::{Machine, MachineId};
use regex::Regex;
use std::sync::{Arc, LazyLock};
use tracing::{debug, warn};

#[allow(clippy::expect_used)]
static PATTERNS: LazyLock<[Regex; 4]> = LazyLock::new(|| {
    [
        r"/machine/([^/?#]+)",
        r"[?&]id=([^&#]+)",
        r"[?&]machineId=([^&#]+)",
        r"^([A-Za-z0-9_-]+)$",
    ]
    .map(|pattern| Regex::new(pattern).expect("static regex is valid"))
});

/// Extract a machine id from scanned text.
///
/// # Errors
///
/// Returns [`WashqError::Validation`] if no pattern matches.
pub fn parse_machine_id(raw: &str) -> Result<MachineId> {
    let raw = raw.trim();
    PATTERNS
        .iter()
        .find_map(|pattern| pattern.captures(raw))
        .and_then(|captures| captures.get(1))
        .map(|id| MachineId::new(id.as_str()))
        .ok_or_else(|| {
            WashqError::Validation("Invalid QR code format. Expected machine ID.".to_string())
        })
}

/// URL encoded into a machine's QR code.
#[must_use]
pub fn machine_url(base_url: &str, machine_id: &MachineId) -> String {
    format!("{}/machine/{machine_id}", base_url.trim_end_matches('/'))
}

/// Turns a camera frame into scanned text.
pub trait QrDecoder: Send + Sync {
    /// Decode one frame; `None` when no code is visible.
    fn decode(&self, frame: &[u8]) -> Option<String>;
}

/// Decoder that never finds a code. Stands in until a real decoder is wired.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopDecoder;

impl QrDecoder for NoopDecoder {
    fn decode(&self, _frame: &[u8]) -> Option<String> {
        None
    }
}

/// Resolves scanned QR text to a known machine.
pub struct QrResolver {
    registry: Arc<MachineRegistry>,
    decoder: Arc<dyn QrDecoder>,
}

impl QrResolver {
    /// Create a resolver backed by the registry.
    #[must_use]
    pub fn new(registry: Arc<MachineRegistry>, decoder: Arc<dyn QrDecoder>) -> Self {
        Self { registry, decoder }
    }

    /// Resolve scanned text to a machine.
    ///
    /// # Errors
    ///
    /// Returns [`WashqError::Validation`] for unrecognised text,
    /// [`WashqError::NotFound`] for an unknown machine, or
    /// [`WashqError::Persistence`] if the store fails.
    pub async fn resolve(&self, raw: &str) -> Result<Machine> {
        let machine_id =
            parse_machine_id(raw).inspect_err(|_| warn!(raw, "Unrecognised QR payload"))?;
        debug!(machine_id = %machine_id, "QR payload parsed");
        self.registry.get(&machine_id).await
    }

    /// Decode a frame and resolve it. `Ok(None)` when no code is visible.
    ///
    /// # Errors
    ///
    /// Same as [`Self::resolve`].
    pub async fn scan(&self, frame: &[u8]) -> Result<Option<Machine>> {
        match self.decoder.decode(frame) {
            Some(raw) => self.resolve(&raw).await.map(Some),
            None => Ok(None),
        }
    }
}
