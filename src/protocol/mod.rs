//! Protocol module for sensor payloads and configuration commands.
//!
//! This module contains the implementations for:
//! - Decoding notification payloads into samples
//! - Encoding sample-rate commands

pub mod commands;
pub mod samples;

pub use commands::SampleRate;
pub use samples::{Axes, DecodedSample, Environmental, Gesture, Motion, SampleSchema};
