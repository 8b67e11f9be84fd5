//! Buffering between the transport and the engine.

mod frame_buffer;

pub use frame_buffer::{FrameBuffer, DEFAULT_INITIAL_SIZE};
