//! Error taxonomy for the AR core
//!
//! Component-local failures use their own `thiserror` enums (`LoadError`,
//! `DecodeError`, `PlatformError`, `PlacementError`). Anything that reaches
//! the host page is converted into an [`ArError`], which carries the code,
//! whether the orchestrator can recover from it, and an optional hint for
//! the user.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::placement::ObjectId;

/// Host-facing error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ArErrorCode {
    /// A capability is missing at the current mode
    NotSupported,
    /// The platform refused or failed to start a session
    SessionFailed,
    /// An asset could not be fetched or decoded after all retries
    LoadFailed,
    /// An asset load ran out of time
    Timeout,
}

impl ArErrorCode {
    /// Errors that describe what the device can do, handled by stepping the mode down
    pub fn affects_capability(self) -> bool {
        matches!(self, Self::NotSupported | Self::SessionFailed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotSupported => "NOT_SUPPORTED",
            Self::SessionFailed => "SESSION_FAILED",
            Self::LoadFailed => "LOAD_FAILED",
            Self::Timeout => "TIMEOUT",
        }
    }
}

impl std::fmt::Display for ArErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error value handed to the host through the event channel
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[error("{code}: {message}")]
pub struct ArError {
    pub code: ArErrorCode,
    pub message: String,
    pub details: Option<String>,
    pub recoverable: bool,
    pub suggested_action: Option<String>,
}

impl ArError {
    pub fn new(code: ArErrorCode, message: impl Into<String>, recoverable: bool) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
            recoverable,
            suggested_action: None,
        }
    }

    /// Capability missing at the current tier
    pub fn not_supported(message: impl Into<String>) -> Self {
        Self::new(ArErrorCode::NotSupported, message, false)
            .with_suggested_action("Continuing with a simpler viewing mode")
    }

    /// Platform session could not start
    pub fn session_failed(message: impl Into<String>) -> Self {
        Self::new(ArErrorCode::SessionFailed, message, true)
            .with_suggested_action("Check camera permissions and try again")
    }

    pub fn load_failed(message: impl Into<String>) -> Self {
        Self::new(ArErrorCode::LoadFailed, message, true)
            .with_suggested_action("Check your connection and try loading the model again")
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ArErrorCode::Timeout, message, true)
            .with_suggested_action("The model is taking too long to download; try again")
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_suggested_action(mut self, action: impl Into<String>) -> Self {
        self.suggested_action = Some(action.into());
        self
    }

    pub fn unrecoverable(mut self) -> Self {
        self.recoverable = false;
        self
    }
}

/// Failure of the asset pipeline
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LoadError {
    #[error("Failed to fetch {url}: {reason}")]
    Fetch { url: String, reason: String },
    #[error("Failed to decode {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: DecodeError,
    },
    #[error("Decoder task for {url} failed: {reason}")]
    DecodeTask { url: String, reason: String },
    #[error("Loading {url} timed out after {timeout_ms}ms")]
    Timeout { url: String, timeout_ms: u64 },
    #[error("Giving up on {url} after {attempts} attempts: {last}")]
    Exhausted {
        url: String,
        attempts: u32,
        last: Box<LoadError>,
    },
}

impl LoadError {
    pub fn url(&self) -> &str {
        match self {
            Self::Fetch { url, .. }
            | Self::Decode { url, .. }
            | Self::DecodeTask { url, .. }
            | Self::Timeout { url, .. }
            | Self::Exhausted { url, .. } => url,
        }
    }

    /// Whether the failure, or the final attempt behind it, was a timeout
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Timeout { .. } => true,
            Self::Exhausted { last, .. } => last.is_timeout(),
            _ => false,
        }
    }
}

impl From<LoadError> for ArError {
    fn from(err: LoadError) -> Self {
        let details = err.to_string();
        if err.is_timeout() {
            ArError::timeout(format!("Timed out loading {}", err.url())).with_details(details)
        } else {
            ArError::load_failed(format!("Could not load model {}", err.url())).with_details(details)
        }
    }
}

/// glTF decoding failure
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DecodeError {
    #[error("Invalid glTF: {0}")]
    Invalid(String),
    #[error("Model uses compressed meshes ({extension}) but compression is disabled")]
    CompressionDisabled { extension: String },
    #[error("No mesh decompressor configured for {extension} (decoder path {decoder_path})")]
    NoDecompressor {
        extension: String,
        decoder_path: String,
    },
    #[error("Mesh decompression failed: {0}")]
    Decompression(String),
    #[error("Model contains no renderable scene")]
    EmptyScene,
}

/// Failure reported by the platform seam
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlatformError {
    #[error("Not supported: {0}")]
    Unsupported(String),
    #[error("Request rejected: {0}")]
    Rejected(String),
    #[error("Session has ended")]
    SessionEnded,
    #[error("Platform failure: {0}")]
    Failed(String),
}

/// Failure of a placed-object registry operation
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PlacementError {
    #[error("Unknown object: {0}")]
    UnknownObject(ObjectId),
    #[error(transparent)]
    Load(#[from] LoadError),
}

impl From<PlacementError> for ArError {
    fn from(err: PlacementError) -> Self {
        match err {
            PlacementError::Load(e) => e.into(),
            PlacementError::UnknownObject(id) => {
                ArError::new(ArErrorCode::LoadFailed, format!("Unknown object {}", id), true)
            }
        }
    }
}
