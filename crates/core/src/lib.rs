//! Latest-frame buffering over video files, network streams and capture
//! devices.
//!
//! [`FrameBuffer`](buffering::frame_buffer::FrameBuffer) reads a source on a
//! background thread and always holds the newest frame, so consumers never
//! wait on source I/O.

pub mod buffering;
pub mod capture;
pub mod shared;
