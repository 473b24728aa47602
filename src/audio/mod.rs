//! Spatial audio: per-source gain controls driven by zone acoustics

pub mod backend;
pub mod capture;
pub mod engine;

pub use backend::{AudioBackend, GainNode, SoftwareBackend, StreamHandle};
pub use capture::{CaptureSource, LocalMicrophone};
pub use engine::{SourceInfo, SpatialAudioEngine};
