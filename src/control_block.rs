//! Stream parameters and their fixed shared-memory layout.
//!
//! [`ControlBlock`] is the value callers work with: the video and audio
//! parameters of one stream plus the sizes and cadences derived from them.
//! [`SharedControlBlock`] is the record that actually lives in the
//! control-block segment. It carries the same parameters with the format
//! tags stored as raw bytes, followed by the three control flags.
//!
//! ```text
//! offset  field               guarded by
//!      0  width        u32
//!      4  height       u32
//!      8  frame_rate   u32
//!     12  video_format u8
//!     16  channels     u32
//!     20  sample_rate  u32
//!     24  samples_per_buffer u32
//!     28  audio_format u8
//!     29  active       bool    status mutex
//!     30  last_buffer  u8      video-selection mutex
//!     32  ring_head    u32     audio mutex
//! ```
//!
//! The parameter fields are written once by the producer while it holds the
//! status mutex and are never touched again. The flags are only reachable
//! through accessors that demand a guard of the matching lock.

use crate::formats::{AudioFormat, VideoFormat};
use crate::named_mutex::{LockGuard, Status, VideoSelect};
use std::fmt;
use std::mem::offset_of;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};
use std::time::Duration;

const MICROS_PER_SECOND: u64 = 1_000_000;

/// Which of the two video slots holds the newest frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum VideoBuffer {
    #[default]
    Front = 0,
    Back = 1,
}

impl VideoBuffer {
    /// Decodes the flag byte. Anything other than `1` reads as `Front`.
    #[inline]
    pub fn from_tag(tag: u8) -> Self {
        if tag == VideoBuffer::Back as u8 {
            VideoBuffer::Back
        } else {
            VideoBuffer::Front
        }
    }

    /// The slot the next frame goes into.
    #[inline]
    pub fn other(self) -> Self {
        match self {
            VideoBuffer::Front => VideoBuffer::Back,
            VideoBuffer::Back => VideoBuffer::Front,
        }
    }
}

/// Parameters of one stream.
///
/// A zeroed value (the `Default`) describes a stream with neither a video
/// nor an audio track. Zero rates or dimensions are not rejected; they simply
/// produce zero buffer sizes and zero intervals.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ControlBlock {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Video frames per second.
    pub frame_rate: u32,
    pub video_format: VideoFormat,

    /// Interleaved audio channels.
    pub channels: u32,
    /// Audio samples per second.
    pub sample_rate: u32,
    /// Samples processed together as one buffer (1 means no batching).
    pub samples_per_buffer: u32,
    pub audio_format: AudioFormat,
}

impl ControlBlock {
    /// Bytes needed to hold one video frame.
    pub fn calculate_video_bufsize(&self) -> u64 {
        (self.width as u64)
            .saturating_mul(self.height as u64)
            .saturating_mul(self.video_format.bytes_per_pixel() as u64)
    }

    /// Bytes needed to hold one buffer of audio samples.
    pub fn calculate_audio_bufsize(&self) -> u64 {
        (self.channels as u64)
            .saturating_mul(self.audio_format.bytes_per_sample() as u64)
            .saturating_mul(self.samples_per_buffer as u64)
    }

    /// Time between two video frames, truncated to whole microseconds.
    pub fn calculate_video_interval(&self) -> Duration {
        if self.frame_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_micros(MICROS_PER_SECOND / self.frame_rate as u64)
    }

    /// Time covered by one audio buffer, truncated to whole microseconds.
    pub fn calculate_audio_interval(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_micros(
            (self.samples_per_buffer as u64).saturating_mul(MICROS_PER_SECOND)
                / self.sample_rate as u64,
        )
    }

    /// `true` if the stream carries video frames.
    pub fn has_video(&self) -> bool {
        self.calculate_video_bufsize() > 0
    }

    /// `true` if the stream carries audio samples.
    pub fn has_audio(&self) -> bool {
        self.calculate_audio_bufsize() > 0
    }
}

impl fmt::Display for ControlBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "videoFormat = {}", self.video_format)?;
        if self.video_format.is_present() {
            writeln!(f, "width = {}", self.width)?;
            writeln!(f, "height = {}", self.height)?;
            writeln!(f, "bytesPerPixel = {}", self.video_format.bytes_per_pixel())?;
            writeln!(f, "frameRate = {}", self.frame_rate)?;
        }

        writeln!(f, "audioFormat = {}", self.audio_format)?;
        if self.audio_format.is_present() {
            writeln!(f, "channels = {}", self.channels)?;
            writeln!(f, "sampleRate = {}", self.sample_rate)?;
            writeln!(f, "samplesPerBuffer = {}", self.samples_per_buffer)?;
            writeln!(f, "bytesPerSample = {}", self.audio_format.bytes_per_sample())?;
        }
        Ok(())
    }
}

/// The control block as laid out in shared memory.
///
/// Both processes must agree on this layout byte for byte; the assertions
/// below pin every offset.
#[derive(Debug)]
#[repr(C)]
pub(crate) struct SharedControlBlock {
    width: u32,
    height: u32,
    frame_rate: u32,
    video_format: u8,
    _reserved0: [u8; 3],
    channels: u32,
    sample_rate: u32,
    samples_per_buffer: u32,
    audio_format: u8,
    active: AtomicBool,
    last_buffer: AtomicU8,
    _reserved1: u8,
    ring_head: AtomicU32,
}

const _: () = {
    assert!(std::mem::size_of::<SharedControlBlock>() == 36);
    assert!(std::mem::align_of::<SharedControlBlock>() == 4);
    assert!(offset_of!(SharedControlBlock, video_format) == 12);
    assert!(offset_of!(SharedControlBlock, channels) == 16);
    assert!(offset_of!(SharedControlBlock, audio_format) == 28);
    assert!(offset_of!(SharedControlBlock, active) == 29);
    assert!(offset_of!(SharedControlBlock, last_buffer) == 30);
    assert!(offset_of!(SharedControlBlock, ring_head) == 32);
};

impl SharedControlBlock {
    /// Builds the initial record for a freshly started stream: active, front
    /// buffer current, ring head at zero.
    pub(crate) fn new(params: &ControlBlock) -> Self {
        Self {
            width: params.width,
            height: params.height,
            frame_rate: params.frame_rate,
            video_format: params.video_format.tag(),
            _reserved0: [0; 3],
            channels: params.channels,
            sample_rate: params.sample_rate,
            samples_per_buffer: params.samples_per_buffer,
            audio_format: params.audio_format.tag(),
            active: AtomicBool::new(true),
            last_buffer: AtomicU8::new(VideoBuffer::Front as u8),
            _reserved1: 0,
            ring_head: AtomicU32::new(0),
        }
    }

    /// Copies the stream parameters out of shared memory.
    ///
    /// Holding the status lock guarantees the producer has finished
    /// initializing the record.
    pub(crate) fn snapshot(&self, _status: &LockGuard<'_, Status>) -> ControlBlock {
        ControlBlock {
            width: self.width,
            height: self.height,
            frame_rate: self.frame_rate,
            video_format: VideoFormat::from_tag(self.video_format),
            channels: self.channels,
            sample_rate: self.sample_rate,
            samples_per_buffer: self.samples_per_buffer,
            audio_format: AudioFormat::from_tag(self.audio_format),
        }
    }

    pub(crate) fn is_active(&self, _status: &LockGuard<'_, Status>) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub(crate) fn set_active(&self, _status: &LockGuard<'_, Status>, active: bool) {
        self.active.store(active, Ordering::Release);
    }

    pub(crate) fn last_buffer(&self, _video: &LockGuard<'_, VideoSelect>) -> VideoBuffer {
        VideoBuffer::from_tag(self.last_buffer.load(Ordering::Acquire))
    }

    pub(crate) fn set_last_buffer(&self, _video: &LockGuard<'_, VideoSelect>, buffer: VideoBuffer) {
        self.last_buffer.store(buffer as u8, Ordering::Release);
    }

    /// The shared cursor, handed to the audio ring views. They read and move
    /// it only under the audio mutex.
    pub(crate) fn ring_head_cell(&self) -> &AtomicU32 {
        &self.ring_head
    }
}
