//! # Media IPC
//!
//! Streams live video frames and audio samples from one process (the
//! *producer*) to another (the *consumer*) on the same machine through
//! POSIX shared memory.
//!
//! A stream is identified by a caller-chosen **prefix**. Both sides derive
//! the names of every OS object from it, so there is no discovery step: a
//! consumer given the same prefix simply waits until the producer's objects
//! appear.
//!
//! ## Layout
//!
//! ```text
//! ┌──────────────────────────┐   status mutex
//! │ control block (36 bytes) │── video-selection mutex (last_buffer)
//! │  parameters + flags      │   audio mutex (ring_head)
//! ├──────────────────────────┤
//! │ video front buffer       │── front-buffer mutex
//! ├──────────────────────────┤
//! │ video back buffer        │── back-buffer mutex
//! ├──────────────────────────┤
//! │ audio ring               │── audio mutex
//! └──────────────────────────┘
//! ```
//!
//! - **Video** is double buffered: the producer fills the slot that is not
//!   published and then flips `last_buffer`, so the consumer never samples a
//!   frame that is being written.
//! - **Audio** goes through a ring of exactly one audio buffer with a single
//!   shared head and no flow control. Only the producer's writes move the
//!   head; the consumer reads the most recent buffer's worth of bytes.
//!
//! Five named mutexes protect the five independent pieces of shared state.
//! No two are ever held at the same time by either side, and none is held
//! across a sleep or a callback. Every internal accessor of shared state
//! takes a guard of the matching mutex, so there is no way to touch a flag,
//! a video slot or the audio ring without holding its lock.
//!
//! ## Lifecycle
//!
//! 1. [`MediaProducer::new`] creates all objects and initializes them under
//!    the status mutex.
//! 2. [`MediaConsumer::attach`] waits for the objects, then copies the
//!    control block under the status mutex.
//! 3. The producer calls [`MediaProducer::submit_video_frame`] and
//!    [`MediaProducer::submit_audio_samples`] at its own pace;
//!    [`MediaConsumer::consume`] samples both channels at the cadence the
//!    control block describes and hands the data to a [`ConsumerDelegate`].
//! 4. [`MediaProducer::stop`] (or dropping the producer) clears the `active`
//!    flag; both sampling loops notice within one interval and return.
//!    Dropping the producer removes every OS object it created.
//!
//! ## Known limitations
//!
//! - A consumer that samples audio slower than the producer writes it
//!   silently loses the overwritten part of the ring.
//! - Video frames carry no sequence numbers: a frame may be delivered twice
//!   or skipped when the two cadences drift.
//! - Removing a segment while a stream is running is not detected.
//!
//! ## License
//!
//! Licensed under the terms of the **GNU Lesser General Public License**,
//! version 3.0, or (at your option) any later version.
//!
//! See <https://www.gnu.org/licenses/lgpl-3.0.html> for details.

#[cfg(not(unix))]
compile_error!("This crate only supports Unix-like operating systems.");

mod consumer;
mod control_block;
mod delegate;
mod error;
mod formats;
mod named_mutex;
mod names;
mod producer;
mod ring_buffer;
mod shm;
mod stream;
mod utils;

pub use consumer::{ConsumerConfig, MediaConsumer};
pub use control_block::{ControlBlock, VideoBuffer};
pub use delegate::{ConsumerDelegate, FunctionDelegate};
pub use error::{Error, Result};
pub use formats::{AudioFormat, VideoFormat};
pub use names::ObjectNames;
pub use producer::MediaProducer;
pub use shm::ATTACH_BACKOFF;
pub use utils::Ticker;
