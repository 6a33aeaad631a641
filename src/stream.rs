//! The set of OS objects behind one stream, shared by producer and consumer.

use crate::control_block::{ControlBlock, SharedControlBlock, VideoBuffer};
use crate::error::{Error, Result};
use crate::named_mutex::{Audio, LockGuard, NamedMutex, Status, VideoSelect, VideoSlot};
use crate::names::ObjectNames;
use crate::ring_buffer::{RingParts, RingReader, RingWriter};
use crate::shm::{Access, SharedMemory};
use std::ptr::NonNull;
use std::time::{Duration, Instant};

/// One video slot: its segment and the mutex that guards its contents.
#[derive(Debug)]
pub(crate) struct Slot {
    memory: SharedMemory,
    mutex: NamedMutex<VideoSlot>,
}

impl Slot {
    pub(crate) fn lock(&self) -> LockGuard<'_, VideoSlot> {
        self.mutex.lock()
    }

    pub(crate) fn len(&self) -> usize {
        self.memory.len()
    }

    /// Copies as much of `frame` as fits into the slot and returns the
    /// number of bytes copied.
    ///
    /// # Panics
    ///
    /// Panics if `guard` was not taken on this slot's mutex, or if the slot
    /// is mapped read-only.
    pub(crate) fn write(&self, guard: &LockGuard<'_, VideoSlot>, frame: &[u8]) -> usize {
        assert!(guard.holds(&self.mutex), "guard does not hold this slot's mutex");
        // SAFETY: the slot's mutex is held for the duration of the copy.
        unsafe { self.memory.copy_from(frame) }
    }

    /// Fills as much of `frame` as the slot holds and returns the number of
    /// bytes copied.
    ///
    /// # Panics
    ///
    /// Panics if `guard` was not taken on this slot's mutex.
    pub(crate) fn read(&self, guard: &LockGuard<'_, VideoSlot>, frame: &mut [u8]) -> usize {
        assert!(guard.holds(&self.mutex), "guard does not hold this slot's mutex");
        // SAFETY: the slot's mutex is held for the duration of the copy.
        unsafe { self.memory.copy_into(frame) }
    }
}

/// Every segment and mutex of a stream.
///
/// The audio ring view is handed out separately by [`Stream::create`] (the
/// writing end) and [`Stream::attach`] (the reading end), and must be
/// dropped before the stream it points into. Fields drop in declaration
/// order and each handle releases its local mapping before unlinking.
pub(crate) struct Stream {
    control_block: SharedMemory,
    video_front: Slot,
    video_back: Slot,
    audio: SharedMemory,

    pub(crate) status_mutex: NamedMutex<Status>,
    pub(crate) video_mutex: NamedMutex<VideoSelect>,
    pub(crate) audio_mutex: NamedMutex<Audio>,
}

impl Stream {
    /// Creates all objects of a new stream and publishes `params`.
    ///
    /// The five mutexes are created first. The segments are then created
    /// and initialized while the status mutex is held, so a consumer that
    /// already sees the segments cannot read the control block until it is
    /// complete.
    pub(crate) fn create(names: &ObjectNames, params: &ControlBlock) -> Result<(Self, RingWriter)> {
        let status_mutex = NamedMutex::<Status>::get_or_create(&names.status_mutex, true)?;
        let video_mutex = NamedMutex::<VideoSelect>::get_or_create(&names.video_mutex, true)?;
        let front_mutex = NamedMutex::<VideoSlot>::get_or_create(&names.front_buffer_mutex, true)?;
        let back_mutex = NamedMutex::<VideoSlot>::get_or_create(&names.back_buffer_mutex, true)?;
        let audio_mutex = NamedMutex::<Audio>::get_or_create(&names.audio_mutex, true)?;

        let status = status_mutex.lock();

        let control_block = SharedMemory::create(
            &names.control_block_memory,
            std::mem::size_of::<SharedControlBlock>(),
        )?;
        // SAFETY: the segment is page aligned, large enough and not yet
        // visible to any reader that could hold the status lock.
        unsafe {
            std::ptr::write(
                control_block.as_ptr().cast::<SharedControlBlock>(),
                SharedControlBlock::new(params),
            );
        }

        let video_len = segment_len("video buffer", params.calculate_video_bufsize())?;
        let mut video_front = SharedMemory::create(&names.video_front_buffer, video_len)?;
        let mut video_back = SharedMemory::create(&names.video_back_buffer, video_len)?;
        video_front.fill(0);
        video_back.fill(0);

        let audio_len = ring_len(params.calculate_audio_bufsize())?;
        let mut audio = SharedMemory::create(&names.audio_buffer, audio_len as usize)?;
        audio.fill(0);

        // SAFETY: the control block was initialized above, the audio segment
        // is `audio_len` bytes and mapped read-write, and this is the only
        // writer. The producer drops the view before the stream.
        let ring = unsafe {
            RingWriter::from_parts(ring_parts(&control_block, &audio, &audio_mutex, audio_len))
        };
        drop(status);

        let stream = Self {
            control_block,
            video_front: Slot {
                memory: video_front,
                mutex: front_mutex,
            },
            video_back: Slot {
                memory: video_back,
                mutex: back_mutex,
            },
            audio,
            status_mutex,
            video_mutex,
            audio_mutex,
        };
        Ok((stream, ring))
    }

    /// Waits for every segment of the stream to exist, maps them read-only
    /// and opens the mutexes without taking ownership of them.
    pub(crate) fn attach(
        names: &ObjectNames,
        backoff: Duration,
        timeout: Option<Duration>,
    ) -> Result<(Self, RingReader)> {
        let deadline = timeout.map(|timeout| (Instant::now(), timeout));
        let open = |name: &str| {
            let remaining =
                deadline.map(|(started, timeout)| timeout.saturating_sub(started.elapsed()));
            SharedMemory::open_existing(name, Access::ReadOnly, backoff, remaining)
        };

        // Segments first: the producer creates its mutexes before any segment,
        // so once the segments exist the mutexes are the producer's.
        let control_block = open(&names.control_block_memory)?;
        let video_front = open(&names.video_front_buffer)?;
        let video_back = open(&names.video_back_buffer)?;
        let audio = open(&names.audio_buffer)?;

        let expected = std::mem::size_of::<SharedControlBlock>();
        if control_block.len() < expected {
            return Err(Error::SegmentTooSmall {
                name: control_block.name().to_owned(),
                expected,
                actual: control_block.len(),
            });
        }

        let status_mutex = NamedMutex::<Status>::get_or_create(&names.status_mutex, false)?;
        let video_mutex = NamedMutex::<VideoSelect>::get_or_create(&names.video_mutex, false)?;
        let front_mutex = NamedMutex::<VideoSlot>::get_or_create(&names.front_buffer_mutex, false)?;
        let back_mutex = NamedMutex::<VideoSlot>::get_or_create(&names.back_buffer_mutex, false)?;
        let audio_mutex = NamedMutex::<Audio>::get_or_create(&names.audio_mutex, false)?;

        let audio_len = u32::try_from(audio.len()).map_err(|_| Error::BufferTooLarge {
            what: "audio ring",
            size: audio.len() as u64,
        })?;
        // SAFETY: the control block segment is large enough (checked above)
        // and the audio segment is `audio_len` bytes. The consumer drops the
        // view before the stream.
        let ring = unsafe {
            RingReader::from_parts(ring_parts(&control_block, &audio, &audio_mutex, audio_len))
        };

        let stream = Self {
            control_block,
            video_front: Slot {
                memory: video_front,
                mutex: front_mutex,
            },
            video_back: Slot {
                memory: video_back,
                mutex: back_mutex,
            },
            audio,
            status_mutex,
            video_mutex,
            audio_mutex,
        };
        Ok((stream, ring))
    }

    /// The control block inside its segment.
    pub(crate) fn control(&self) -> &SharedControlBlock {
        // SAFETY: the segment is at least `size_of::<SharedControlBlock>()`
        // bytes (checked on create and attach), page aligned, and lives as
        // long as `self`.
        unsafe { &*self.control_block.as_ptr().cast::<SharedControlBlock>() }
    }

    pub(crate) fn slot(&self, which: VideoBuffer) -> &Slot {
        match which {
            VideoBuffer::Front => &self.video_front,
            VideoBuffer::Back => &self.video_back,
        }
    }

    /// Size of each video slot segment.
    pub(crate) fn video_slot_len(&self) -> usize {
        self.video_front.len().min(self.video_back.len())
    }

    /// Size of the audio segment.
    pub(crate) fn audio_len(&self) -> usize {
        self.audio.len()
    }

    /// Reads the `active` flag under the status lock.
    pub(crate) fn is_active(&self) -> bool {
        let status = self.status_mutex.lock();
        self.control().is_active(&status)
    }

    /// Copies the stream parameters under the status lock.
    pub(crate) fn snapshot(&self) -> ControlBlock {
        let status = self.status_mutex.lock();
        self.control().snapshot(&status)
    }
}

/// Segment length for a buffer of `size` bytes: never zero, so a stream
/// without a track still gets every segment.
fn segment_len(what: &'static str, size: u64) -> Result<usize> {
    usize::try_from(size.max(1)).map_err(|_| Error::BufferTooLarge { what, size })
}

/// Ring capacity for an audio buffer of `size` bytes; the shared head is a
/// `u32`, so the ring cannot be larger than that.
fn ring_len(size: u64) -> Result<u32> {
    u32::try_from(size.max(1)).map_err(|_| Error::BufferTooLarge {
        what: "audio ring",
        size,
    })
}

/// Locates the ring: bytes in `audio`, head inside the control block.
///
/// `control_block` must hold an initialized [`SharedControlBlock`] and
/// `audio` must be at least `len` bytes.
fn ring_parts(
    control_block: &SharedMemory,
    audio: &SharedMemory,
    audio_mutex: &NamedMutex<Audio>,
    len: u32,
) -> RingParts {
    // SAFETY: the caller passes a control block segment holding an
    // initialized, page-aligned `SharedControlBlock`.
    let control = unsafe { &*control_block.as_ptr().cast::<SharedControlBlock>() };
    RingParts {
        // SAFETY: mmap never returns a null mapping.
        base: unsafe { NonNull::new_unchecked(audio.as_ptr()) },
        capacity: len.max(1),
        head: NonNull::from(control.ring_head_cell()),
        lock: audio_mutex.id(),
    }
}
