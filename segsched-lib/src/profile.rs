//! Output profiles
//!
//! Builds the ordered list of video profiles a session encodes every segment
//! into, either from built-in presets or from a JSON document, and turns them
//! into per-segment `OutputSpec`s.

use serde::Deserialize;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::error::ProfileError;
use crate::types::{SegmentIndex, StreamId};

/// Group-of-pictures policy
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Gop {
    /// Let the encoder decide
    Default,
    /// Every frame is a keyframe
    IntraOnly,
    /// Keyframe interval in seconds
    Interval(Duration),
}

impl Gop {
    /// Parse a GOP spec: empty, `"intra"`, or a positive number of seconds.
    pub fn parse(value: &str) -> Result<Self, ProfileError> {
        let value = value.trim();
        if value.is_empty() {
            return Ok(Gop::Default);
        }
        if value == "intra" {
            return Ok(Gop::IntraOnly);
        }
        let secs: f64 = value
            .parse()
            .map_err(|_| ProfileError::GopParse(value.to_string()))?;
        if !secs.is_finite() {
            return Err(ProfileError::GopParse(value.to_string()));
        }
        if secs <= 0.0 {
            return Err(ProfileError::GopNotPositive(secs));
        }
        Duration::try_from_secs_f64(secs)
            .map(Gop::Interval)
            .map_err(|_| ProfileError::GopParse(value.to_string()))
    }
}

/// H.264 encoder profile
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EncoderProfile {
    #[default]
    None,
    H264Baseline,
    H264Main,
    H264High,
    H264ConstrainedHigh,
}

impl EncoderProfile {
    /// Value for the encoder's `profile` option, if any
    pub fn as_encoder_option(&self) -> Option<&'static str> {
        match self {
            EncoderProfile::None => None,
            EncoderProfile::H264Baseline => Some("baseline"),
            EncoderProfile::H264Main => Some("main"),
            EncoderProfile::H264High | EncoderProfile::H264ConstrainedHigh => Some("high"),
        }
    }
}

impl FromStr for EncoderProfile {
    type Err = ProfileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "none" => Ok(EncoderProfile::None),
            "h264baseline" => Ok(EncoderProfile::H264Baseline),
            "h264main" => Ok(EncoderProfile::H264Main),
            "h264high" => Ok(EncoderProfile::H264High),
            "h264constrainedhigh" => Ok(EncoderProfile::H264ConstrainedHigh),
            _ => Err(ProfileError::EncoderProfile(s.to_string())),
        }
    }
}

/// One output rendition
#[derive(Debug, Clone, PartialEq)]
pub struct VideoProfile {
    pub name: String,
    pub width: u32,
    pub height: u32,
    /// Bits per second
    pub bitrate: u64,
    /// Frame rate numerator; 0 keeps the source rate
    pub framerate: u32,
    /// Frame rate denominator; 0 is treated as 1
    pub framerate_den: u32,
    pub encoder_profile: EncoderProfile,
    pub gop: Gop,
}

impl VideoProfile {
    fn preset(name: &str, width: u32, height: u32, bitrate: u64, framerate: u32) -> Self {
        Self {
            name: name.to_string(),
            width,
            height,
            bitrate,
            framerate,
            framerate_den: 1,
            encoder_profile: EncoderProfile::None,
            gop: Gop::Default,
        }
    }

    /// `WIDTHxHEIGHT`
    pub fn resolution(&self) -> String {
        format!("{}x{}", self.width, self.height)
    }

    /// Frame rate as (numerator, denominator), or None to keep the source rate
    pub fn frame_rate(&self) -> Option<(u32, u32)> {
        if self.framerate == 0 {
            None
        } else {
            Some((self.framerate, self.framerate_den.max(1)))
        }
    }
}

/// Built-in presets
pub fn presets() -> Vec<VideoProfile> {
    vec![
        VideoProfile::preset("P720p60fps16x9", 1280, 720, 6_000_000, 60),
        VideoProfile::preset("P720p30fps16x9", 1280, 720, 4_000_000, 30),
        VideoProfile::preset("P720p25fps16x9", 1280, 720, 3_500_000, 25),
        VideoProfile::preset("P720p30fps4x3", 960, 720, 3_500_000, 30),
        VideoProfile::preset("P576p30fps16x9", 1024, 576, 1_500_000, 30),
        VideoProfile::preset("P576p25fps16x9", 1024, 576, 1_500_000, 25),
        VideoProfile::preset("P360p30fps16x9", 640, 360, 1_200_000, 30),
        VideoProfile::preset("P360p25fps16x9", 640, 360, 1_000_000, 25),
        VideoProfile::preset("P360p30fps4x3", 480, 360, 1_000_000, 30),
        VideoProfile::preset("P240p30fps16x9", 426, 240, 600_000, 30),
        VideoProfile::preset("P240p25fps16x9", 426, 240, 600_000, 25),
        VideoProfile::preset("P240p30fps4x3", 320, 240, 600_000, 30),
        VideoProfile::preset("P144p30fps16x9", 256, 144, 400_000, 30),
        VideoProfile::preset("P144p25fps16x9", 256, 144, 400_000, 25),
    ]
}

/// Look up a built-in preset by name
pub fn lookup_preset(name: &str) -> Option<VideoProfile> {
    presets().into_iter().find(|p| p.name == name)
}

#[derive(Debug, Deserialize)]
struct JsonProfile {
    #[serde(default)]
    name: String,
    #[serde(default)]
    width: u32,
    #[serde(default)]
    height: u32,
    #[serde(default)]
    bitrate: u64,
    #[serde(default)]
    fps: u32,
    #[serde(default, rename = "fpsDen")]
    fps_den: u32,
    #[serde(default)]
    profile: String,
    #[serde(default)]
    gop: String,
}

impl TryFrom<JsonProfile> for VideoProfile {
    type Error = ProfileError;

    fn try_from(p: JsonProfile) -> Result<Self, Self::Error> {
        let name = if p.name.is_empty() {
            format!("custom_{}x{}_{}", p.width, p.height, p.bitrate)
        } else {
            p.name
        };
        Ok(Self {
            name,
            width: p.width,
            height: p.height,
            bitrate: p.bitrate,
            framerate: p.fps,
            framerate_den: p.fps_den,
            encoder_profile: p.profile.parse()?,
            gop: Gop::parse(&p.gop)?,
        })
    }
}

/// Parse a JSON array of profile objects
pub fn parse_profiles_json(content: &str) -> Result<Vec<VideoProfile>, ProfileError> {
    let raw: Vec<JsonProfile> = serde_json::from_str(content)?;
    let profiles = raw
        .into_iter()
        .map(VideoProfile::try_from)
        .collect::<Result<Vec<_>, _>>()?;
    if profiles.is_empty() {
        return Err(ProfileError::Empty);
    }
    Ok(profiles)
}

/// Parse a comma-separated preset list. Unknown names are skipped.
pub fn parse_preset_list(list: &str) -> Result<Vec<VideoProfile>, ProfileError> {
    let mut profiles = Vec::new();
    for name in list.split(',').map(str::trim).filter(|n| !n.is_empty()) {
        match lookup_preset(name) {
            Some(profile) => profiles.push(profile),
            None => tracing::warn!(preset = name, "unknown transcoding preset, skipping"),
        }
    }
    if profiles.is_empty() {
        return Err(ProfileError::Empty);
    }
    Ok(profiles)
}

/// Load profiles from `option`: a readable, non-empty file is parsed as JSON,
/// anything else as a preset list.
pub fn load_profiles(option: &str) -> Result<ProfileSet, ProfileError> {
    let path = Path::new(option);
    let profiles = match std::fs::read_to_string(path) {
        Ok(content) if !content.trim().is_empty() => {
            tracing::debug!(path = %path.display(), "loading transcoding options from JSON");
            parse_profiles_json(&content)?
        }
        _ => parse_preset_list(option)?,
    };
    Ok(ProfileSet::new(profiles))
}

/// Ordered, immutable profile list shared read-only by every session
#[derive(Debug, Clone)]
pub struct ProfileSet(Arc<[Arc<VideoProfile>]>);

impl ProfileSet {
    pub fn new(profiles: Vec<VideoProfile>) -> Self {
        Self(profiles.into_iter().map(Arc::new).collect())
    }

    pub fn profiles(&self) -> &[Arc<VideoProfile>] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.0.iter().map(|p| p.name.as_str()).collect()
    }
}

/// Container the encoded output is written to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Muxer {
    MpegTs,
    /// Encode and discard
    Null,
}

impl Muxer {
    pub fn format_name(&self) -> &'static str {
        match self {
            Muxer::MpegTs => "mpegts",
            Muxer::Null => "null",
        }
    }
}

impl fmt::Display for Muxer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.format_name())
    }
}

/// A profile bound to a concrete output target
#[derive(Debug, Clone, PartialEq)]
pub struct OutputSpec {
    pub profile: Arc<VideoProfile>,
    pub output_name: String,
    pub muxer: Muxer,
}

impl OutputSpec {
    pub fn name(&self) -> &str {
        &self.profile.name
    }

    pub fn resolution(&self) -> String {
        self.profile.resolution()
    }
}

/// Decides where encoded renditions go
#[derive(Debug, Clone, Default)]
pub struct OutputNaming {
    prefix: Option<String>,
}

impl OutputNaming {
    /// `prefix` empty or None discards all output
    pub fn new(prefix: Option<String>) -> Self {
        Self {
            prefix: prefix.filter(|p| !p.is_empty()),
        }
    }

    pub fn discards(&self) -> bool {
        self.prefix.is_none()
    }

    /// Output specs for one segment of one stream, in profile order
    pub fn output_specs(
        &self,
        profiles: &ProfileSet,
        stream: StreamId,
        segment: SegmentIndex,
    ) -> Vec<OutputSpec> {
        profiles
            .profiles()
            .iter()
            .enumerate()
            .map(|(n, profile)| {
                let (output_name, muxer) = match &self.prefix {
                    Some(prefix) => (
                        format!("{}_{}_{}_{}_{}.ts", prefix, profile.name, n, stream, segment),
                        Muxer::MpegTs,
                    ),
                    None => ("-".to_string(), Muxer::Null),
                };
                OutputSpec {
                    profile: Arc::clone(profile),
                    output_name,
                    muxer,
                }
            })
            .collect()
    }
}
