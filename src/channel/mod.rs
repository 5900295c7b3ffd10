//! Channel layer: output accumulation and prompt detection.
//!
//! This module owns the byte-level view of an interactive session: a
//! sanitizing buffer with a hard size ceiling, and the prompt state machine
//! that decides when the device is ready for the next command.

mod buffer;
mod prompt;

pub use buffer::OutputBuffer;
pub use prompt::{PromptDetector, PromptMatch, PromptMode};
