// Library exports for testing
pub mod audio;
pub mod calibration;
pub mod config;
pub mod constants;
pub mod controller;
pub mod recorder;
pub mod sequencer;
pub mod stimulus;
pub mod store;
pub mod surface;
