pub mod capture;
mod lifecycle;
pub mod playback;
