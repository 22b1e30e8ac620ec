//! Buffers shared with the host for reading delivered samples

pub mod sample_buffer;
pub mod triple_buffer;

pub use sample_buffer::{DeliveredSample, SharedSampleBuffer};
pub use triple_buffer::TripleBuffer;
