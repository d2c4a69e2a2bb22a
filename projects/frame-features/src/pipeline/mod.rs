// Per-frame feature pipeline

pub mod detection;
pub mod encoder;
pub mod geometry;
pub mod orchestrator;
pub mod preprocess;
pub mod types;
