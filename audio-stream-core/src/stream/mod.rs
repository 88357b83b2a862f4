pub mod capture_stream;
pub mod playback_sink;
