pub mod buffer_config;
pub mod frame_buffer;
pub mod pacing;
