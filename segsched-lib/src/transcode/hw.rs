//! Codec selection per acceleration mode.

use ffmpeg_next as ffmpeg;

use crate::types::Accel;

/// NVDEC decoder name for a source codec, if there is one
pub fn cuvid_decoder_name(codec_id: ffmpeg::codec::Id) -> Option<&'static str> {
    match codec_id {
        ffmpeg::codec::Id::H264 => Some("h264_cuvid"),
        ffmpeg::codec::Id::HEVC => Some("hevc_cuvid"),
        ffmpeg::codec::Id::VP8 => Some("vp8_cuvid"),
        ffmpeg::codec::Id::VP9 => Some("vp9_cuvid"),
        ffmpeg::codec::Id::AV1 => Some("av1_cuvid"),
        ffmpeg::codec::Id::MPEG2VIDEO => Some("mpeg2_cuvid"),
        ffmpeg::codec::Id::MPEG4 => Some("mpeg4_cuvid"),
        _ => None,
    }
}

/// Decoder for the source stream: NVDEC when requested and available,
/// otherwise the default software decoder.
pub fn find_decoder(codec_id: ffmpeg::codec::Id, accel: Accel) -> Option<ffmpeg::Codec> {
    if accel == Accel::Nvidia {
        if let Some(codec) = cuvid_decoder_name(codec_id).and_then(ffmpeg::decoder::find_by_name) {
            return Some(codec);
        }
        tracing::warn!(?codec_id, "no hardware decoder, falling back to software");
    }
    ffmpeg::decoder::find(codec_id)
}

/// H.264 encoder name for the acceleration mode
pub fn h264_encoder_name(accel: Accel) -> &'static str {
    match accel {
        Accel::Nvidia => "h264_nvenc",
        Accel::Software => "libx264",
    }
}

/// Pixel format the encoder is fed
pub fn encoder_pixel_format(accel: Accel) -> ffmpeg::format::Pixel {
    match accel {
        Accel::Nvidia => ffmpeg::format::Pixel::NV12,
        Accel::Software => ffmpeg::format::Pixel::YUV420P,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cuvid_names() {
        assert_eq!(
            cuvid_decoder_name(ffmpeg::codec::Id::H264),
            Some("h264_cuvid")
        );
        assert_eq!(cuvid_decoder_name(ffmpeg::codec::Id::PNG), None);
    }

    #[test]
    fn test_encoder_names() {
        assert_eq!(h264_encoder_name(Accel::Nvidia), "h264_nvenc");
        assert_eq!(h264_encoder_name(Accel::Software), "libx264");
    }
}
