//! Rendition encoder
//!
//! Encodes one decoded segment into every requested output: scale to the
//! profile size, encode H.264 with the profile's rate settings, then mux to
//! MPEG-TS or throw the packets away for the `null` muxer.

use ffmpeg_next as ffmpeg;
use ffmpeg_next::Rational;

use super::hw;
use super::VideoFrames;
use crate::engine::{EncodeOutcome, EncodeSession};
use crate::error::EngineError;
use crate::profile::{Gop, Muxer, OutputSpec};
use crate::types::{Accel, DeviceId};

pub struct FfmpegEncoder {
    accel: Accel,
    device: Option<DeviceId>,
    jobs: u64,
}

fn enc_err(what: &str, e: ffmpeg::Error) -> EngineError {
    EngineError::Encoder(format!("{}: {}", what, e))
}

fn mux_err(what: &str, e: ffmpeg::Error) -> EngineError {
    EngineError::Muxer(format!("{}: {}", what, e))
}

/// Where encoded packets go
enum Sink {
    Discard,
    File {
        output: ffmpeg::format::context::Output,
        time_base: Rational,
    },
}

impl FfmpegEncoder {
    pub fn new(accel: Accel, device: Option<DeviceId>) -> Self {
        Self {
            accel,
            device,
            jobs: 0,
        }
    }

    fn open_encoder(
        &self,
        spec: &OutputSpec,
        source_rate: Rational,
        global_header: bool,
    ) -> Result<(ffmpeg::encoder::Video, Rational), EngineError> {
        let name = hw::h264_encoder_name(self.accel);
        let codec = ffmpeg::encoder::find_by_name(name)
            .ok_or_else(|| EngineError::Unsupported(format!("encoder {} not available", name)))?;

        let profile = &spec.profile;
        let rate = match profile.frame_rate() {
            Some((num, den)) => Rational::new(num as i32, den as i32),
            None if source_rate.numerator() > 0 => source_rate,
            None => Rational::new(30, 1),
        };
        let time_base = rate.invert();

        let mut encoder = ffmpeg::codec::Context::new_with_codec(codec)
            .encoder()
            .video()
            .map_err(|e| enc_err("encoder context", e))?;
        encoder.set_width(profile.width);
        encoder.set_height(profile.height);
        encoder.set_format(hw::encoder_pixel_format(self.accel));
        encoder.set_time_base(time_base);
        encoder.set_frame_rate(Some(rate));
        encoder.set_bit_rate(profile.bitrate as usize);
        match profile.gop {
            Gop::Default => {}
            Gop::IntraOnly => encoder.set_gop(1),
            Gop::Interval(interval) => {
                let fps = f64::from(rate);
                encoder.set_gop((interval.as_secs_f64() * fps).round().max(1.0) as u32);
            }
        }
        if global_header {
            encoder.set_flags(ffmpeg::codec::Flags::GLOBAL_HEADER);
        }

        let mut opts = ffmpeg::Dictionary::new();
        if let Some(p) = profile.encoder_profile.as_encoder_option() {
            opts.set("profile", p);
        }
        match self.accel {
            Accel::Nvidia => {
                if let Some(device) = &self.device {
                    opts.set("gpu", device.as_str());
                }
            }
            Accel::Software => {
                opts.set("preset", "veryfast");
            }
        }

        let encoder = encoder
            .open_with(opts)
            .map_err(|e| enc_err(&format!("open {}", name), e))?;
        Ok((encoder, time_base))
    }

    fn open_sink(
        spec: &OutputSpec,
        encoder: &ffmpeg::encoder::Video,
        output: Option<ffmpeg::format::context::Output>,
    ) -> Result<Sink, EngineError> {
        let Some(mut output) = output else {
            return Ok(Sink::Discard);
        };
        {
            let mut stream = output
                .add_stream(ffmpeg::encoder::find(ffmpeg::codec::Id::H264))
                .map_err(|e| mux_err("add_stream", e))?;
            stream.set_parameters(encoder);
        }
        output
            .write_header()
            .map_err(|e| mux_err(&format!("write_header {}", spec.output_name), e))?;
        let time_base = output
            .stream(0)
            .map(|s| s.time_base())
            .unwrap_or_else(|| Rational::new(1, 90_000));
        Ok(Sink::File { output, time_base })
    }

    fn encode_one(&self, frames: &VideoFrames, spec: &OutputSpec) -> Result<usize, EngineError> {
        let output = match spec.muxer {
            Muxer::Null => None,
            Muxer::MpegTs => Some(
                ffmpeg::format::output_as(&spec.output_name, spec.muxer.format_name())
                    .map_err(|e| mux_err(&format!("create {}", spec.output_name), e))?,
            ),
        };
        let global_header = output
            .as_ref()
            .map(|o| o.format().flags().contains(ffmpeg::format::Flags::GLOBAL_HEADER))
            .unwrap_or(false);

        let (mut encoder, enc_tb) = self.open_encoder(spec, frames.rate, global_header)?;
        let mut sink = Self::open_sink(spec, &encoder, output)?;

        // Frames of one segment share size and format
        let mut scaler = frames
            .frames
            .first()
            .map(|first| {
                ffmpeg::software::scaling::Context::get(
                    first.format(),
                    first.width(),
                    first.height(),
                    encoder.format(),
                    encoder.width(),
                    encoder.height(),
                    ffmpeg::software::scaling::Flags::BILINEAR,
                )
            })
            .transpose()
            .map_err(|e| enc_err("scaler", e))?;
        let mut written = 0usize;
        for (index, frame) in frames.frames.iter().enumerate() {
            let Some(scaler) = scaler.as_mut() else {
                break;
            };
            let mut scaled = ffmpeg::frame::Video::empty();
            scaler
                .run(frame, &mut scaled)
                .map_err(|e| enc_err("scale", e))?;
            scaled.set_pts(Some(index as i64));

            encoder
                .send_frame(&scaled)
                .map_err(|e| enc_err("send_frame", e))?;
            Self::drain(&mut encoder, &mut sink, enc_tb)?;
            written += 1;
        }
        encoder.send_eof().map_err(|e| enc_err("send_eof", e))?;
        Self::drain(&mut encoder, &mut sink, enc_tb)?;

        if let Sink::File { mut output, .. } = sink {
            output
                .write_trailer()
                .map_err(|e| mux_err(&format!("write_trailer {}", spec.output_name), e))?;
        }
        Ok(written)
    }

    fn drain(
        encoder: &mut ffmpeg::encoder::Video,
        sink: &mut Sink,
        enc_tb: Rational,
    ) -> Result<(), EngineError> {
        loop {
            let mut packet = ffmpeg::Packet::empty();
            match encoder.receive_packet(&mut packet) {
                Ok(()) => {}
                Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::error::EAGAIN => {
                    return Ok(())
                }
                Err(ffmpeg::Error::Eof) => return Ok(()),
                Err(e) => return Err(enc_err("receive_packet", e)),
            }
            if let Sink::File { output, time_base } = sink {
                packet.set_stream(0);
                packet.rescale_ts(enc_tb, *time_base);
                packet
                    .write_interleaved(output)
                    .map_err(|e| mux_err("write_interleaved", e))?;
            }
        }
    }
}

impl EncodeSession for FfmpegEncoder {
    type Frames = VideoFrames;

    fn encode(
        &mut self,
        frames: VideoFrames,
        outputs: &[OutputSpec],
    ) -> Result<EncodeOutcome, EngineError> {
        let mut written = 0;
        for spec in outputs {
            written = self.encode_one(&frames, spec)?;
        }
        self.jobs += 1;
        Ok(EncodeOutcome {
            frames: written,
            outputs: outputs.len(),
        })
    }

    fn stop(self) {
        tracing::trace!(jobs = self.jobs, device = ?self.device, "encoder stopped");
    }
}
