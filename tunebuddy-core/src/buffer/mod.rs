//! # Buffer Module
//!
//! Thread-safe containers that sit between the pipeline stages. Each type
//! guards its storage with exactly one lock, never held across anything but
//! in-memory copies.

pub mod frame_queue;
pub mod sample_buffer;

pub use frame_queue::{Frame, FrameQueue};
pub use sample_buffer::SampleBuffer;
