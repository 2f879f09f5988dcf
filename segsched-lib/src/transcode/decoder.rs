//! Segment decoder
//!
//! Opens a segment file, decodes every frame of its best video stream and
//! returns them as raw frames. The session itself only remembers the
//! acceleration mode and device, so it holds no FFmpeg state between calls.

use ffmpeg_next as ffmpeg;
use std::path::Path;

use super::hw;
use super::VideoFrames;
use crate::engine::{DecodeMeta, DecodeSession, Decoded};
use crate::error::EngineError;
use crate::types::{Accel, DeviceId};

pub struct FfmpegDecoder {
    accel: Accel,
    device: Option<DeviceId>,
    segments: u64,
}

impl FfmpegDecoder {
    pub fn new(accel: Accel, device: Option<DeviceId>) -> Self {
        Self {
            accel,
            device,
            segments: 0,
        }
    }

    fn open_video(
        &self,
        stream: &ffmpeg::format::stream::Stream,
    ) -> Result<ffmpeg::decoder::Video, EngineError> {
        let params = stream.parameters();
        let codec = hw::find_decoder(params.id(), self.accel)
            .ok_or_else(|| EngineError::Decoder(format!("no decoder for {:?}", params.id())))?;

        let mut context = ffmpeg::codec::Context::new_with_codec(codec);
        context
            .set_parameters(params)
            .map_err(|e| EngineError::Decoder(format!("codec parameters: {}", e)))?;

        let mut opts = ffmpeg::Dictionary::new();
        if self.accel == Accel::Nvidia {
            if let Some(device) = &self.device {
                opts.set("gpu", device.as_str());
            }
        }

        context
            .decoder()
            .open_as_with(codec, opts)
            .and_then(|opened| opened.video())
            .map_err(|e| EngineError::Decoder(format!("open {}: {}", codec.name(), e)))
    }

    fn drain(
        decoder: &mut ffmpeg::decoder::Video,
        out: &mut Vec<ffmpeg::frame::Video>,
    ) -> Result<(), EngineError> {
        loop {
            let mut frame = ffmpeg::frame::Video::empty();
            match decoder.receive_frame(&mut frame) {
                Ok(()) => out.push(frame),
                Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::error::EAGAIN => {
                    return Ok(())
                }
                Err(ffmpeg::Error::Eof) => return Ok(()),
                Err(e) => return Err(EngineError::Decoder(format!("receive_frame: {}", e))),
            }
        }
    }
}

impl DecodeSession for FfmpegDecoder {
    type Frames = VideoFrames;

    fn decode(&mut self, path: &Path) -> Result<Decoded<VideoFrames>, EngineError> {
        let mut input = ffmpeg::format::input(&path).map_err(|e| EngineError::OpenInput {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        let (stream_index, rate, mut decoder) = {
            let stream = input
                .streams()
                .best(ffmpeg::media::Type::Video)
                .ok_or_else(|| EngineError::NoVideoStream(path.display().to_string()))?;
            let decoder = self.open_video(&stream)?;
            (stream.index(), stream.avg_frame_rate(), decoder)
        };

        let mut frames = Vec::new();
        for (stream, packet) in input.packets() {
            if stream.index() != stream_index {
                continue;
            }
            match decoder.send_packet(&packet) {
                Ok(()) => {}
                // Corrupt packets at segment boundaries are skipped
                Err(ffmpeg::Error::InvalidData) => continue,
                Err(e) => return Err(EngineError::Decoder(format!("send_packet: {}", e))),
            }
            Self::drain(&mut decoder, &mut frames)?;
        }
        if let Err(e) = decoder.send_eof() {
            tracing::debug!("decoder send_eof: {}", e);
        }
        Self::drain(&mut decoder, &mut frames)?;

        self.segments += 1;
        let pixels = frames
            .iter()
            .map(|f| u64::from(f.width()) * u64::from(f.height()))
            .sum();
        let meta = DecodeMeta {
            frames: frames.len(),
            pixels,
        };
        Ok(Decoded {
            frames: VideoFrames { frames, rate },
            meta,
        })
    }

    fn stop(self) {
        tracing::trace!(segments = self.segments, device = ?self.device, "decoder stopped");
    }
}
