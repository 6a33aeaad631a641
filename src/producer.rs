//! The producing side of a stream.

use crate::control_block::ControlBlock;
use crate::error::Result;
use crate::names::ObjectNames;
use crate::ring_buffer::RingWriter;
use crate::stream::Stream;
use tracing::{debug, info};

/// Publishes video frames and audio samples to any consumer attached to the
/// same prefix.
///
/// The producer creates, and on drop removes, every OS object of the stream.
/// All calls run on the caller's thread; there are no internal threads.
///
/// Frames go into a double buffer: each frame is written into the slot that
/// is *not* currently published and then published by flipping the
/// `last_buffer` flag, so a consumer never observes a partially written
/// frame. Audio goes into a ring holding exactly one audio buffer.
pub struct MediaProducer {
    // Points into `stream`, so it is declared (and dropped) first.
    ring: RingWriter,
    stream: Stream,
    params: ControlBlock,
    prefix: String,
}

impl MediaProducer {
    /// Creates the stream's segments and mutexes and starts the stream.
    ///
    /// Objects left behind under the same names by a crashed run are removed
    /// first. The producer is active as soon as this returns.
    pub fn new(prefix: &str, params: &ControlBlock) -> Result<Self> {
        let names = ObjectNames::new(prefix);
        let (stream, ring) = Stream::create(&names, params)?;

        info!(
            prefix,
            video_bufsize = params.calculate_video_bufsize(),
            audio_bufsize = params.calculate_audio_bufsize(),
            "stream started"
        );
        Ok(Self {
            ring,
            stream,
            params: *params,
            prefix: prefix.to_owned(),
        })
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// The parameters the stream was started with.
    pub fn control_block(&self) -> &ControlBlock {
        &self.params
    }

    /// Publishes one video frame.
    ///
    /// At most one slot's worth of bytes is copied; a shorter frame leaves
    /// the rest of the slot as it was. Three short critical sections: pick
    /// the unpublished slot, fill it under its own lock, publish it.
    pub fn submit_video_frame(&mut self, frame: &[u8]) {
        let target = {
            let video = self.stream.video_mutex.lock();
            self.stream.control().last_buffer(&video).other()
        };

        let copied = {
            let slot = self.stream.slot(target);
            let guard = slot.lock();
            slot.write(&guard, frame)
        };
        if copied < frame.len() {
            debug!(
                submitted = frame.len(),
                copied, "video frame larger than the slot, truncated"
            );
        }

        let video = self.stream.video_mutex.lock();
        self.stream.control().set_last_buffer(&video, target);
    }

    /// Appends audio samples to the ring.
    pub fn submit_audio_samples(&mut self, samples: &[u8]) {
        let audio = self.stream.audio_mutex.lock();
        self.ring.write(&audio, samples);
    }

    /// Marks the stream as finished. Consumers return once they notice.
    ///
    /// Calling this more than once is harmless.
    pub fn stop(&self) {
        let status = self.stream.status_mutex.lock();
        if self.stream.control().is_active(&status) {
            self.stream.control().set_active(&status, false);
            info!(prefix = %self.prefix, "stream stopped");
        }
    }

    /// `true` until [`MediaProducer::stop`] is called.
    pub fn is_active(&self) -> bool {
        self.stream.is_active()
    }
}

impl Drop for MediaProducer {
    fn drop(&mut self) {
        self.stop();
        debug!(prefix = %self.prefix, "removing stream objects");
    }
}
