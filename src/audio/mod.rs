//! Audio-side buffering for received PCM

pub mod buffer;

pub use buffer::{create_shared_buffer, PcmRingBuffer, SharedPcmBuffer};
