//! FFmpeg implementation of the engine contract
//!
//! Decode sessions open each segment file and decode all of its video
//! frames; encode sessions scale and encode those frames once per output
//! spec. With Nvidia acceleration the NVDEC/NVENC codecs are pinned to the
//! session's GPU through the codecs' `gpu` option.

mod decoder;
mod encoder;
mod hw;

use ffmpeg_next as ffmpeg;

pub use decoder::FfmpegDecoder;
pub use encoder::FfmpegEncoder;

use crate::engine::Engine;
use crate::error::EngineError;
use crate::types::{Accel, DeviceId};

/// Raw frames of one segment plus the source frame rate
pub struct VideoFrames {
    pub frames: Vec<ffmpeg::frame::Video>,
    pub rate: ffmpeg::Rational,
}

// Frames are owned outright and only ever touched by one thread at a time
unsafe impl Send for VideoFrames {}

/// Engine backed by the system FFmpeg libraries
#[derive(Debug)]
pub struct FfmpegEngine {
    _private: (),
}

impl FfmpegEngine {
    /// Initialise FFmpeg once for the process
    pub fn new() -> Result<Self, EngineError> {
        ffmpeg::init().map_err(|e| EngineError::Unsupported(format!("ffmpeg init: {}", e)))?;
        ffmpeg::util::log::set_level(ffmpeg::util::log::Level::Error);
        Ok(Self { _private: () })
    }
}

impl Engine for FfmpegEngine {
    type Frames = VideoFrames;
    type Decoder = FfmpegDecoder;
    type Encoder = FfmpegEncoder;

    fn new_decoder(
        &self,
        accel: Accel,
        device: Option<&DeviceId>,
    ) -> Result<FfmpegDecoder, EngineError> {
        Ok(FfmpegDecoder::new(accel, device.cloned()))
    }

    fn new_encoder(
        &self,
        accel: Accel,
        device: Option<&DeviceId>,
    ) -> Result<FfmpegEncoder, EngineError> {
        if ffmpeg::encoder::find_by_name(hw::h264_encoder_name(accel)).is_none() {
            return Err(EngineError::Unsupported(format!(
                "encoder {} is not available in this FFmpeg build",
                hw::h264_encoder_name(accel)
            )));
        }
        Ok(FfmpegEncoder::new(accel, device.cloned()))
    }
}
