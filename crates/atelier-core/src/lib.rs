//! Atelier Core - AR subsystem of the Atelier room planner
//!
//! This crate provides the AR layer that places furniture models in a room:
//! - Capability detection and AR mode selection (native, viewer, fallback)
//! - Model loading with caching, in-flight deduplication, retry and timeout
//! - Frame-rate and memory monitoring with adaptive quality
//! - Surface detection, reticle and scan guidance
//! - Placed-object registry with selection, transforms and anchors
//! - The session orchestrator tying these together
//!
//! Platform APIs are consumed through the traits in [`platform`]; [`sim`]
//! provides an in-process implementation for tests and headless hosts.

pub mod capabilities;
pub mod catalog;
pub mod config;
pub mod error;
pub mod handoff;
pub mod loader;
pub mod notice;
pub mod performance;
pub mod placement;
pub mod platform;
pub mod quality;
pub mod scene;
pub mod session;
pub mod sim;
pub mod surface;
pub mod viewer;

pub use capabilities::{detect_capabilities, ArMode, DeviceCapabilities, Environment};
pub use catalog::{CatalogError, ModelCatalog, ModelInfo};
pub use config::ArConfig;
pub use error::{ArError, ArErrorCode, LoadError};
pub use loader::{AssetLoader, LoadedModel, ModelFetcher};
pub use performance::{PerformanceMonitor, PerformanceStats};
pub use placement::{ObjectId, PlacementEngine};
pub use quality::{QualityLevel, QualitySettings};
pub use scene::{RecordingRenderer, Renderer};
pub use session::{ArEvent, ArSessionManager, SessionState, TickOutcome};
pub use surface::SurfaceDetector;
