// Format probing, demuxing and frame decoding using Symphonia

pub mod demux;
pub mod frame_source;
pub mod probe;

pub use demux::Demuxer;
pub use frame_source::FrameSource;
pub use probe::FormatProbe;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
