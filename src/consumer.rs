//! The consuming side of a stream.

use crate::control_block::ControlBlock;
use crate::delegate::ConsumerDelegate;
use crate::error::{Error, Result};
use crate::names::ObjectNames;
use crate::ring_buffer::RingReader;
use crate::shm::ATTACH_BACKOFF;
use crate::stream::Stream;
use crate::utils::Ticker;
use crossbeam_utils::thread;
use std::time::Duration;
use tracing::{debug, info, trace};

/// Poll period of a sampling loop whose channel has nothing to sample.
const IDLE_POLL: Duration = Duration::from_millis(100);

/// How a consumer waits for its producer.
#[derive(Clone, Debug)]
pub struct ConsumerConfig {
    /// Delay between two attempts to find a segment.
    pub attach_backoff: Duration,
    /// Give up after this long. `None` waits for as long as it takes.
    pub attach_timeout: Option<Duration>,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            attach_backoff: ATTACH_BACKOFF,
            attach_timeout: None,
        }
    }
}

/// Samples a stream published by a [`crate::MediaProducer`] under the same
/// prefix.
///
/// The consumer only attaches: it maps the producer's segments read-only,
/// opens its mutexes, and never removes any of them.
///
/// Video and audio are sampled by two independent loops on their own
/// threads, each at the cadence derived from the stream parameters. Both
/// loops poll the producer's `active` flag once per iteration and return
/// when it goes false; they do not coordinate with each other.
///
/// A consumer is consumed by [`MediaConsumer::consume`], so the delegate
/// sees the control block exactly once.
pub struct MediaConsumer {
    // Points into `stream`, so it is declared (and dropped) first.
    ring: RingReader,
    stream: Stream,
    params: ControlBlock,
    prefix: String,
}

impl MediaConsumer {
    /// Attaches to the stream, waiting for the producer indefinitely.
    pub fn attach(prefix: &str) -> Result<Self> {
        Self::attach_with(prefix, &ConsumerConfig::default())
    }

    /// Attaches to the stream.
    ///
    /// Blocks until every segment exists, then copies the control block
    /// under the status lock. The producer holds that lock for the whole of
    /// its initialization, so the copy is always complete.
    pub fn attach_with(prefix: &str, config: &ConsumerConfig) -> Result<Self> {
        let names = ObjectNames::new(prefix);
        debug!(prefix, ?config, "waiting for producer");
        let (stream, ring) = Stream::attach(&names, config.attach_backoff, config.attach_timeout)?;
        let params = stream.snapshot();

        let video_bufsize = params.calculate_video_bufsize();
        if video_bufsize > stream.video_slot_len() as u64 {
            return Err(Error::SegmentTooSmall {
                name: names.video_front_buffer,
                expected: video_bufsize as usize,
                actual: stream.video_slot_len(),
            });
        }
        let audio_bufsize = params.calculate_audio_bufsize();
        if audio_bufsize > u64::from(ring.capacity()) {
            return Err(Error::SegmentTooSmall {
                name: names.audio_buffer,
                expected: audio_bufsize as usize,
                actual: stream.audio_len(),
            });
        }

        info!(prefix, video_bufsize, audio_bufsize, "attached to stream");
        Ok(Self {
            ring,
            stream,
            params,
            prefix: prefix.to_owned(),
        })
    }

    /// Attaches to the stream and consumes it until the producer stops.
    ///
    /// This blocks for the whole lifetime of the stream.
    pub fn run<D: ConsumerDelegate>(prefix: &str, delegate: D) -> Result<()> {
        Self::attach(prefix)?.consume(&delegate)
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// The parameters copied from the producer at attach time.
    pub fn control_block(&self) -> &ControlBlock {
        &self.params
    }

    /// `true` while the producer is streaming.
    pub fn is_active(&self) -> bool {
        self.stream.is_active()
    }

    /// Hands the control block to `delegate`, then samples video and audio
    /// on two threads until the producer stops.
    ///
    /// Returns once both loops have finished, releasing the consumer's
    /// handles. A panic raised by a callback ends that callback's loop only;
    /// it is re-raised here after the other loop has finished too.
    ///
    /// A consumer can be consumed only once:
    ///
    /// ```compile_fail
    /// # use media_ipc::{FunctionDelegate, MediaConsumer};
    /// # fn twice(consumer: MediaConsumer) -> media_ipc::Result<()> {
    /// let delegate = FunctionDelegate::new();
    /// consumer.consume(&delegate)?;
    /// consumer.consume(&delegate)?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn consume<D: ConsumerDelegate + ?Sized>(self, delegate: &D) -> Result<()> {
        delegate.on_control_block(&self.params);

        let this = &self;
        let (video, audio) = thread::scope(|s| -> Result<_> {
            let video = s
                .builder()
                .name("media-ipc-video".into())
                .spawn(|_| this.video_loop(delegate))
                .map_err(|source| Error::Os {
                    op: "spawn",
                    name: "media-ipc-video".into(),
                    source,
                })?;
            let audio = s
                .builder()
                .name("media-ipc-audio".into())
                .spawn(|_| this.audio_loop(delegate))
                .map_err(|source| Error::Os {
                    op: "spawn",
                    name: "media-ipc-audio".into(),
                    source,
                })?;
            Ok((video.join(), audio.join()))
        })
        .unwrap_or_else(|payload| std::panic::resume_unwind(payload))?;

        for outcome in [video, audio] {
            if let Err(payload) = outcome {
                std::panic::resume_unwind(payload);
            }
        }

        info!(prefix = %self.prefix, "stream complete");
        Ok(())
    }

    fn video_loop<D: ConsumerDelegate + ?Sized>(&self, delegate: &D) {
        let interval = self.params.calculate_video_interval();
        if !self.params.has_video() || interval.is_zero() {
            debug!(prefix = %self.prefix, "no video to sample");
            return self.wait_for_stop();
        }

        let mut frame = vec![0u8; self.params.calculate_video_bufsize() as usize];
        let mut ticker = Ticker::new(interval);
        let mut frames = 0u64;
        debug!(prefix = %self.prefix, interval = ?ticker.interval(), "sampling video");

        while self.stream.is_active() {
            let current = {
                let video = self.stream.video_mutex.lock();
                self.stream.control().last_buffer(&video)
            };
            {
                let slot = self.stream.slot(current);
                let guard = slot.lock();
                slot.read(&guard, &mut frame);
            }

            delegate.on_video_frame(&frame);
            frames += 1;
            ticker.wait();
        }
        debug!(prefix = %self.prefix, frames, "video loop finished");
    }

    fn audio_loop<D: ConsumerDelegate + ?Sized>(&self, delegate: &D) {
        let interval = self.params.calculate_audio_interval();
        if !self.params.has_audio() || interval.is_zero() {
            debug!(prefix = %self.prefix, "no audio to sample");
            return self.wait_for_stop();
        }

        let mut samples = vec![0u8; self.params.calculate_audio_bufsize() as usize];
        let mut ticker = Ticker::new(interval);
        let mut buffers = 0u64;
        debug!(prefix = %self.prefix, interval = ?ticker.interval(), "sampling audio");

        while self.stream.is_active() {
            {
                let audio = self.stream.audio_mutex.lock();
                self.ring.read(&audio, &mut samples);
                trace!(head = self.ring.head(&audio), "sampled audio ring");
            }

            delegate.on_audio_samples(&samples);
            buffers += 1;
            ticker.wait();
        }
        debug!(prefix = %self.prefix, buffers, "audio loop finished");
    }

    /// Loop body for a channel without data: only watch for the end of the
    /// stream.
    fn wait_for_stop(&self) {
        let mut ticker = Ticker::new(IDLE_POLL);
        while self.stream.is_active() {
            ticker.wait();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::{AudioFormat, VideoFormat};
    use crate::producer::MediaProducer;
    use crate::FunctionDelegate;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Instant;

    fn prefix(tag: &str) -> String {
        format!("media-ipc-consumer-test-{}-{tag}-", std::process::id())
    }

    fn quick() -> ConsumerConfig {
        ConsumerConfig {
            attach_backoff: Duration::from_millis(10),
            attach_timeout: Some(Duration::from_secs(5)),
        }
    }

    #[test]
    fn attach_copies_the_control_block() {
        let prefix = prefix("copy");
        let params = ControlBlock {
            width: 8,
            height: 2,
            frame_rate: 50,
            video_format: VideoFormat::Gray8,
            channels: 2,
            sample_rate: 48_000,
            samples_per_buffer: 480,
            audio_format: AudioFormat::PcmS16Le,
        };
        let _producer = MediaProducer::new(&prefix, &params).unwrap();

        let consumer = MediaConsumer::attach_with(&prefix, &quick()).unwrap();
        assert_eq!(consumer.control_block(), &params);
        assert_eq!(consumer.prefix(), prefix);
        assert!(consumer.is_active());
    }

    #[test]
    fn attach_times_out_without_a_producer() {
        let config = ConsumerConfig {
            attach_backoff: Duration::from_millis(5),
            attach_timeout: Some(Duration::from_millis(30)),
        };
        let started = Instant::now();
        let err = MediaConsumer::attach_with(&prefix("nobody"), &config)
            .err()
            .unwrap();
        assert!(matches!(err, Error::AttachTimedOut { .. }));
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn consumer_sees_the_producer_stop() {
        let prefix = prefix("stop");
        let producer = MediaProducer::new(&prefix, &ControlBlock::default()).unwrap();
        let consumer = MediaConsumer::attach_with(&prefix, &quick()).unwrap();
        assert!(consumer.is_active());
        producer.stop();
        assert!(!consumer.is_active());
    }

    #[test]
    fn the_control_block_is_delivered_once_before_any_sample() {
        let prefix = prefix("once");
        let params = ControlBlock {
            width: 1,
            height: 1,
            frame_rate: 50,
            video_format: VideoFormat::Gray8,
            ..Default::default()
        };
        let producer = MediaProducer::new(&prefix, &params).unwrap();
        let consumer = MediaConsumer::attach_with(&prefix, &quick()).unwrap();

        let control_blocks = Arc::new(AtomicUsize::new(0));
        let frames_before_control_block = Arc::new(AtomicUsize::new(0));
        let delegate = FunctionDelegate::new()
            .with_control_block_handler({
                let control_blocks = control_blocks.clone();
                move |_| {
                    control_blocks.fetch_add(1, Ordering::SeqCst);
                }
            })
            .with_video_handler({
                let control_blocks = control_blocks.clone();
                let early = frames_before_control_block.clone();
                move |_| {
                    if control_blocks.load(Ordering::SeqCst) == 0 {
                        early.fetch_add(1, Ordering::SeqCst);
                    }
                }
            });

        let stopper = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(100));
            producer.stop();
            producer
        });
        consumer.consume(&delegate).unwrap();
        drop(stopper.join().unwrap());

        assert_eq!(control_blocks.load(Ordering::SeqCst), 1);
        assert_eq!(frames_before_control_block.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn channels_without_data_never_call_back() {
        let prefix = prefix("idle");
        let producer = MediaProducer::new(&prefix, &ControlBlock::default()).unwrap();
        let consumer = MediaConsumer::attach_with(&prefix, &quick()).unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let delegate = FunctionDelegate::new()
            .with_video_handler({
                let calls = calls.clone();
                move |_| {
                    calls.fetch_add(1, Ordering::SeqCst);
                }
            })
            .with_audio_handler({
                let calls = calls.clone();
                move |_| {
                    calls.fetch_add(1, Ordering::SeqCst);
                }
            });

        let stopper = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(150));
            producer.stop();
            producer
        });
        consumer.consume(&delegate).unwrap();
        drop(stopper.join().unwrap());

        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn a_panicking_callback_is_re_raised_after_both_loops_end() {
        let prefix = prefix("panic");
        let params = ControlBlock {
            width: 1,
            height: 1,
            frame_rate: 100,
            video_format: VideoFormat::Gray8,
            channels: 1,
            sample_rate: 1000,
            samples_per_buffer: 10,
            audio_format: AudioFormat::PcmU8,
        };
        let producer = MediaProducer::new(&prefix, &params).unwrap();
        let consumer = MediaConsumer::attach_with(&prefix, &quick()).unwrap();

        let audio_calls = Arc::new(AtomicUsize::new(0));
        let delegate = FunctionDelegate::new()
            .with_video_handler(|_| panic!("video handler failed"))
            .with_audio_handler({
                let audio_calls = audio_calls.clone();
                move |_| {
                    audio_calls.fetch_add(1, Ordering::SeqCst);
                }
            });

        let stopper = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(100));
            producer.stop();
            producer
        });
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            consumer.consume(&delegate)
        }));
        drop(stopper.join().unwrap());

        assert!(outcome.is_err());
        // The audio loop kept running until the producer stopped.
        assert!(audio_calls.load(Ordering::SeqCst) > 1);
    }
}
