//! Audio sample and video pixel format catalog.
//!
//! Both enumerations are stored in shared memory as a single tag byte, so
//! every lookup goes through [`AudioFormat::from_tag`] /
//! [`VideoFormat::from_tag`] and never trusts the byte to be a valid
//! discriminant. Unrecognized tags collapse to `Unknown`, which reports the
//! same zero width as `None`.

use std::fmt;

/// Audio sample formats (interleaved PCM).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum AudioFormat {
    /// No audio track.
    #[default]
    None = 0,
    PcmS8 = 1,
    PcmU8 = 2,
    PcmS16Be = 3,
    PcmS16Le = 4,
    PcmU16Be = 5,
    PcmU16Le = 6,
    PcmS24Be = 7,
    PcmS24Le = 8,
    PcmU24Be = 9,
    PcmU24Le = 10,
    PcmS32Be = 11,
    PcmS32Le = 12,
    PcmU32Be = 13,
    PcmU32Le = 14,
    PcmF32Be = 15,
    PcmF32Le = 16,
    PcmF64Be = 17,
    PcmF64Le = 18,
    Unknown = 255,
}

/// Video pixel formats (packed, single plane).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum VideoFormat {
    /// No video track.
    #[default]
    None = 0,
    Gray8 = 1,
    Gray16Be = 2,
    Gray16Le = 3,
    Rgb = 4,
    Bgr = 5,
    Rgba = 6,
    Bgra = 7,
    Argb = 8,
    Abgr = 9,
    Unknown = 255,
}

impl AudioFormat {
    /// Every format that carries samples, in tag order.
    pub const ALL: [AudioFormat; 18] = [
        AudioFormat::PcmS8,
        AudioFormat::PcmU8,
        AudioFormat::PcmS16Be,
        AudioFormat::PcmS16Le,
        AudioFormat::PcmU16Be,
        AudioFormat::PcmU16Le,
        AudioFormat::PcmS24Be,
        AudioFormat::PcmS24Le,
        AudioFormat::PcmU24Be,
        AudioFormat::PcmU24Le,
        AudioFormat::PcmS32Be,
        AudioFormat::PcmS32Le,
        AudioFormat::PcmU32Be,
        AudioFormat::PcmU32Le,
        AudioFormat::PcmF32Be,
        AudioFormat::PcmF32Le,
        AudioFormat::PcmF64Be,
        AudioFormat::PcmF64Le,
    ];

    /// Decodes a tag byte read from shared memory.
    pub fn from_tag(tag: u8) -> Self {
        match tag {
            0 => AudioFormat::None,
            1..=18 => Self::ALL[usize::from(tag) - 1],
            _ => AudioFormat::Unknown,
        }
    }

    #[inline]
    pub fn tag(self) -> u8 {
        self as u8
    }

    /// Width of a single sample of a single channel, in bytes.
    pub fn bytes_per_sample(self) -> u8 {
        use AudioFormat::*;
        match self {
            PcmS8 | PcmU8 => 1,
            PcmS16Be | PcmS16Le | PcmU16Be | PcmU16Le => 2,
            PcmS24Be | PcmS24Le | PcmU24Be | PcmU24Le => 3,
            PcmS32Be | PcmS32Le | PcmU32Be | PcmU32Le | PcmF32Be | PcmF32Le => 4,
            PcmF64Be | PcmF64Le => 8,
            None | Unknown => 0,
        }
    }

    pub fn description(self) -> &'static str {
        use AudioFormat::*;
        match self {
            PcmS8 => "PCM signed 8-bit",
            PcmU8 => "PCM unsigned 8-bit",
            PcmS16Be => "PCM signed 16-bit big-endian",
            PcmS16Le => "PCM signed 16-bit little-endian",
            PcmU16Be => "PCM unsigned 16-bit big-endian",
            PcmU16Le => "PCM unsigned 16-bit little-endian",
            PcmS24Be => "PCM signed 24-bit big-endian",
            PcmS24Le => "PCM signed 24-bit little-endian",
            PcmU24Be => "PCM unsigned 24-bit big-endian",
            PcmU24Le => "PCM unsigned 24-bit little-endian",
            PcmS32Be => "PCM signed 32-bit big-endian",
            PcmS32Le => "PCM signed 32-bit little-endian",
            PcmU32Be => "PCM unsigned 32-bit big-endian",
            PcmU32Le => "PCM unsigned 32-bit little-endian",
            PcmF32Be => "PCM 32-bit floating-point big-endian",
            PcmF32Le => "PCM 32-bit floating-point little-endian",
            PcmF64Be => "PCM 64-bit floating-point big-endian",
            PcmF64Le => "PCM 64-bit floating-point little-endian",
            None | Unknown => "No audio",
        }
    }

    /// `true` if this format carries samples.
    pub fn is_present(self) -> bool {
        self.bytes_per_sample() > 0
    }
}

impl VideoFormat {
    /// Every format that carries pixels, in tag order.
    pub const ALL: [VideoFormat; 9] = [
        VideoFormat::Gray8,
        VideoFormat::Gray16Be,
        VideoFormat::Gray16Le,
        VideoFormat::Rgb,
        VideoFormat::Bgr,
        VideoFormat::Rgba,
        VideoFormat::Bgra,
        VideoFormat::Argb,
        VideoFormat::Abgr,
    ];

    /// Decodes a tag byte read from shared memory.
    pub fn from_tag(tag: u8) -> Self {
        match tag {
            0 => VideoFormat::None,
            1..=9 => Self::ALL[usize::from(tag) - 1],
            _ => VideoFormat::Unknown,
        }
    }

    #[inline]
    pub fn tag(self) -> u8 {
        self as u8
    }

    pub fn bytes_per_pixel(self) -> u8 {
        use VideoFormat::*;
        match self {
            Gray8 => 1,
            Gray16Be | Gray16Le => 2,
            Rgb | Bgr => 3,
            Rgba | Bgra | Argb | Abgr => 4,
            None | Unknown => 0,
        }
    }

    pub fn description(self) -> &'static str {
        use VideoFormat::*;
        match self {
            Gray8 => "Grayscale 8-bit",
            Gray16Be => "Grayscale 16-bit big-endian",
            Gray16Le => "Grayscale 16-bit little-endian",
            Rgb => "RGB 24-bit",
            Bgr => "BGR 24-bit",
            Rgba => "RGBA 32-bit",
            Bgra => "BGRA 32-bit",
            Argb => "ARGB 32-bit",
            Abgr => "ABGR 32-bit",
            None | Unknown => "No video",
        }
    }

    /// `true` if this format carries pixels.
    pub fn is_present(self) -> bool {
        self.bytes_per_pixel() > 0
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

impl fmt::Display for VideoFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audio_tags_decode_to_themselves() {
        for tag in 0..=18u8 {
            assert_eq!(AudioFormat::from_tag(tag).tag(), tag);
        }
    }

    #[test]
    fn video_tags_decode_to_themselves() {
        for tag in 0..=9u8 {
            assert_eq!(VideoFormat::from_tag(tag).tag(), tag);
        }
    }

    #[test]
    fn unrecognized_tags_behave_like_none() {
        for tag in [19u8, 42, 200, 254, 255] {
            let audio = AudioFormat::from_tag(tag);
            assert_eq!(audio, AudioFormat::Unknown);
            assert_eq!(audio.bytes_per_sample(), 0);
            assert_eq!(audio.description(), AudioFormat::None.description());

            let video = VideoFormat::from_tag(tag.max(10));
            assert_eq!(video, VideoFormat::Unknown);
            assert_eq!(video.bytes_per_pixel(), 0);
            assert_eq!(video.description(), VideoFormat::None.description());
        }
    }

    #[test]
    fn widths_match_the_catalog() {
        assert_eq!(AudioFormat::PcmU8.bytes_per_sample(), 1);
        assert_eq!(AudioFormat::PcmS16Le.bytes_per_sample(), 2);
        assert_eq!(AudioFormat::PcmS24Le.bytes_per_sample(), 3);
        assert_eq!(AudioFormat::PcmF32Le.bytes_per_sample(), 4);
        assert_eq!(AudioFormat::PcmF64Le.bytes_per_sample(), 8);

        assert_eq!(VideoFormat::Gray8.bytes_per_pixel(), 1);
        assert_eq!(VideoFormat::Rgb.bytes_per_pixel(), 3);
        assert_eq!(VideoFormat::Bgra.bytes_per_pixel(), 4);
    }

    #[test]
    fn every_audio_format_has_a_width_and_a_distinct_description() {
        let expected: [u8; 18] = [1, 1, 2, 2, 2, 2, 3, 3, 3, 3, 4, 4, 4, 4, 4, 4, 8, 8];
        for (format, width) in AudioFormat::ALL.iter().zip(expected) {
            assert_eq!(format.bytes_per_sample(), width, "{format:?}");
            assert!(format.is_present());
        }
        let mut descriptions: Vec<_> = AudioFormat::ALL.iter().map(|f| f.description()).collect();
        descriptions.sort_unstable();
        descriptions.dedup();
        assert_eq!(descriptions.len(), AudioFormat::ALL.len());
        assert!(!descriptions.contains(&AudioFormat::None.description()));
    }

    #[test]
    fn every_video_format_has_a_width_and_a_distinct_description() {
        let expected: [u8; 9] = [1, 2, 2, 3, 3, 4, 4, 4, 4];
        for (format, width) in VideoFormat::ALL.iter().zip(expected) {
            assert_eq!(format.bytes_per_pixel(), width, "{format:?}");
        }
        let mut descriptions: Vec<_> = VideoFormat::ALL.iter().map(|f| f.description()).collect();
        descriptions.sort_unstable();
        descriptions.dedup();
        assert_eq!(descriptions.len(), VideoFormat::ALL.len());
        assert_eq!(VideoFormat::Gray16Be.to_string(), "Grayscale 16-bit big-endian");
        assert_eq!(AudioFormat::PcmU24Be.to_string(), "PCM unsigned 24-bit big-endian");
    }

    #[test]
    fn none_is_the_default_and_absent() {
        assert_eq!(AudioFormat::default(), AudioFormat::None);
        assert_eq!(VideoFormat::default(), VideoFormat::None);
        assert!(!AudioFormat::None.is_present());
        assert!(!VideoFormat::Unknown.is_present());
        assert!(VideoFormat::Rgb.is_present());
        assert_eq!(VideoFormat::None.to_string(), "No video");
        assert_eq!(AudioFormat::None.to_string(), "No audio");
    }
}
