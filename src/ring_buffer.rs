use crate::named_mutex::{Audio, LockGuard, LockId};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU32, Ordering};

/// Where a ring lives: its bytes, its shared head and the mutex that
/// serializes access to both.
#[derive(Clone, Copy, Debug)]
pub(crate) struct RingParts {
    pub(crate) base: NonNull<u8>,
    pub(crate) capacity: u32,
    pub(crate) head: NonNull<AtomicU32>,
    pub(crate) lock: LockId,
}

/// Fixed-capacity circular byte buffer over borrowed memory.
///
/// The view owns neither the bytes nor the head cursor. In a stream both
/// live in shared memory: the bytes in the audio segment, the head inside
/// the control block, so producer and consumer see the same position.
///
/// # Protocol
///
/// The ring has exactly **one writer and one reader** and keeps no count of
/// unread bytes. The two ends are separate types:
///
/// - [`RingWriter::write`] copies at the head and advances it, wrapping at
///   `capacity` as many times as the input requires.
/// - [`RingReader::read`] copies starting at the head *without* moving it.
///   With a read length equal to `capacity` this returns the whole ring in
///   chronological order, oldest byte first.
///
/// There is **no backpressure**: the ring is a rolling window over the most
/// recent `capacity` bytes. A reader that polls slower than the writer
/// writes silently loses whatever was overwritten in between.
///
/// Both ends take a guard of the ring's audio mutex and panic if the guard
/// belongs to another mutex.
#[derive(Debug)]
struct RingBuffer {
    base: NonNull<u8>,
    capacity: u32,
    head: NonNull<AtomicU32>,
    lock: LockId,
}

impl RingBuffer {
    /// # Safety
    ///
    /// `parts.base` must be valid for reads of `parts.capacity` bytes (and
    /// for writes, when wrapped by a [`RingWriter`]) and `parts.head` must
    /// stay valid for as long as the view exists.
    ///
    /// # Panics
    ///
    /// Panics if the capacity is zero.
    unsafe fn from_parts(parts: RingParts) -> Self {
        assert!(parts.capacity > 0, "ring capacity must be non-zero");
        Self {
            base: parts.base,
            capacity: parts.capacity,
            head: parts.head,
            lock: parts.lock,
        }
    }

    fn check(&self, guard: &LockGuard<'_, Audio>) {
        assert!(guard.id() == self.lock, "guard does not hold this ring's mutex");
    }

    fn read(&self, dst: &mut [u8]) {
        let mut offset = self.load_head();
        let mut done = 0usize;
        while done < dst.len() {
            let count = (dst.len() - done).min((self.capacity - offset) as usize);
            unsafe {
                std::ptr::copy_nonoverlapping(
                    self.base.as_ptr().add(offset as usize),
                    dst.as_mut_ptr().add(done),
                    count,
                );
            }
            offset = ((offset as usize + count) % self.capacity as usize) as u32;
            done += count;
        }
    }

    fn write(&mut self, src: &[u8]) {
        let mut done = 0usize;
        while done < src.len() {
            let offset = self.load_head();
            let count = (src.len() - done).min((self.capacity - offset) as usize);
            unsafe {
                std::ptr::copy_nonoverlapping(
                    src.as_ptr().add(done),
                    self.base.as_ptr().add(offset as usize),
                    count,
                );
            }
            let next = ((offset as usize + count) % self.capacity as usize) as u32;
            unsafe { self.head.as_ref() }.store(next, Ordering::Release);
            done += count;
        }
    }

    // A head written by a misbehaving peer must not index past the end.
    #[inline(always)]
    fn load_head(&self) -> u32 {
        unsafe { self.head.as_ref() }.load(Ordering::Acquire) % self.capacity
    }
}

/// The writing end of a ring. There is one per ring, held by the producer.
#[derive(Debug)]
pub(crate) struct RingWriter(RingBuffer);

/// The reading end of a ring, held by the consumer.
#[derive(Debug)]
pub(crate) struct RingReader(RingBuffer);

// SAFETY: the views only touch memory through raw copies made while the
// ring's mutex is held, which `check` enforces on every call.
unsafe impl Send for RingWriter {}
unsafe impl Sync for RingWriter {}
unsafe impl Send for RingReader {}
unsafe impl Sync for RingReader {}

impl RingWriter {
    /// # Safety
    ///
    /// `parts.base` must be valid for reads and writes of `parts.capacity`
    /// bytes and `parts.head` must stay valid for as long as the view
    /// exists. No other writer may exist for the same ring.
    ///
    /// # Panics
    ///
    /// Panics if the capacity is zero.
    pub(crate) unsafe fn from_parts(parts: RingParts) -> Self {
        Self(unsafe { RingBuffer::from_parts(parts) })
    }

    #[inline(always)]
    pub(crate) fn capacity(&self) -> u32 {
        self.0.capacity
    }

    /// Current head, already reduced modulo `capacity`.
    pub(crate) fn head(&self, audio: &LockGuard<'_, Audio>) -> u32 {
        self.0.check(audio);
        self.0.load_head()
    }

    /// Copies `src` into the ring at the head, wrapping as needed, and
    /// leaves the head just past the last byte written.
    pub(crate) fn write(&mut self, audio: &LockGuard<'_, Audio>, src: &[u8]) {
        self.0.check(audio);
        self.0.write(src);
    }
}

impl RingReader {
    /// # Safety
    ///
    /// `parts.base` must be valid for reads of `parts.capacity` bytes and
    /// `parts.head` must stay valid for as long as the view exists.
    ///
    /// # Panics
    ///
    /// Panics if the capacity is zero.
    pub(crate) unsafe fn from_parts(parts: RingParts) -> Self {
        Self(unsafe { RingBuffer::from_parts(parts) })
    }

    #[inline(always)]
    pub(crate) fn capacity(&self) -> u32 {
        self.0.capacity
    }

    /// Current head, already reduced modulo `capacity`.
    pub(crate) fn head(&self, audio: &LockGuard<'_, Audio>) -> u32 {
        self.0.check(audio);
        self.0.load_head()
    }

    /// Fills `dst` from the ring, starting at the head and wrapping as
    /// needed. The head does not move.
    pub(crate) fn read(&self, audio: &LockGuard<'_, Audio>, dst: &mut [u8]) {
        self.0.check(audio);
        self.0.read(dst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::named_mutex::NamedMutex;

    struct Backing {
        bytes: Vec<u8>,
        head: Box<AtomicU32>,
        mutex: NamedMutex<Audio>,
    }

    impl Backing {
        fn new(tag: &str, capacity: usize) -> Self {
            let name = format!("media-ipc-ring-test-{}-{tag}", std::process::id());
            Self {
                bytes: vec![0u8; capacity],
                head: Box::new(AtomicU32::new(0)),
                mutex: NamedMutex::get_or_create(&name, true).unwrap(),
            }
        }

        fn parts(&mut self) -> RingParts {
            RingParts {
                base: NonNull::new(self.bytes.as_mut_ptr()).unwrap(),
                capacity: self.bytes.len() as u32,
                head: NonNull::from(&*self.head),
                lock: self.mutex.id(),
            }
        }

        fn ends(&mut self) -> (RingWriter, RingReader) {
            let parts = self.parts();
            unsafe { (RingWriter::from_parts(parts), RingReader::from_parts(parts)) }
        }
    }

    #[test]
    fn write_advances_head_and_read_does_not() {
        let mut backing = Backing::new("advance", 8);
        let (mut writer, reader) = backing.ends();
        let audio = backing.mutex.lock();

        writer.write(&audio, &[1, 2, 3]);
        assert_eq!(writer.head(&audio), 3);

        let mut out = [0u8; 4];
        reader.read(&audio, &mut out);
        assert_eq!(reader.head(&audio), 3);
        assert_eq!(out, [0, 0, 0, 0]);
    }

    #[test]
    fn roundtrip_from_the_same_start_position() {
        let mut backing = Backing::new("roundtrip", 8);
        let (mut writer, reader) = backing.ends();
        let audio = backing.mutex.lock();
        writer.write(&audio, &[9; 3]);
        let start = writer.head(&audio);

        writer.write(&audio, &[10, 11, 12, 13]);
        backing.head.store(start, Ordering::SeqCst);

        let mut out = [0u8; 4];
        reader.read(&audio, &mut out);
        assert_eq!(out, [10, 11, 12, 13]);
    }

    #[test]
    fn write_wraps_around_the_end() {
        let mut backing = Backing::new("wrap-write", 8);
        let (mut writer, _reader) = backing.ends();
        {
            let audio = backing.mutex.lock();
            writer.write(&audio, &[0; 6]);
            assert_eq!(writer.head(&audio), 6);

            writer.write(&audio, &[1, 2, 3, 4, 5]);
            assert_eq!(writer.head(&audio), 3);
        }
        drop(writer);
        assert_eq!(backing.bytes, vec![3, 4, 5, 0, 0, 0, 1, 2]);
    }

    #[test]
    fn read_wraps_around_the_end() {
        let mut backing = Backing::new("wrap-read", 8);
        let (mut writer, reader) = backing.ends();
        let audio = backing.mutex.lock();
        writer.write(&audio, &[0; 6]);
        writer.write(&audio, &[1, 2, 3, 4, 5]);

        backing.head.store(6, Ordering::SeqCst);
        let mut out = [0u8; 5];
        reader.read(&audio, &mut out);
        assert_eq!(out, [1, 2, 3, 4, 5]);
    }

    #[test]
    fn full_capacity_read_is_chronological() {
        let mut backing = Backing::new("chrono", 4);
        let (mut writer, reader) = backing.ends();
        let audio = backing.mutex.lock();
        for b in 1..=6u8 {
            writer.write(&audio, &[b]);
        }

        let mut out = [0u8; 4];
        reader.read(&audio, &mut out);
        assert_eq!(out, [3, 4, 5, 6]);
    }

    #[test]
    fn writes_longer_than_capacity_keep_the_newest_bytes() {
        let mut backing = Backing::new("long-write", 4);
        let (mut writer, reader) = backing.ends();
        let audio = backing.mutex.lock();
        writer.write(&audio, &[1, 2, 3, 4, 5, 6, 7, 8, 9, 10]);
        assert_eq!(writer.head(&audio), 2);

        let mut out = [0u8; 4];
        reader.read(&audio, &mut out);
        assert_eq!(out, [7, 8, 9, 10]);
    }

    #[test]
    fn reads_longer_than_capacity_repeat_the_ring() {
        let mut backing = Backing::new("long-read", 3);
        let (mut writer, reader) = backing.ends();
        let audio = backing.mutex.lock();
        writer.write(&audio, &[1, 2, 3]);

        let mut out = [0u8; 7];
        reader.read(&audio, &mut out);
        assert_eq!(out, [1, 2, 3, 1, 2, 3, 1]);
    }

    #[test]
    fn out_of_range_head_is_reduced() {
        let mut backing = Backing::new("reduce", 4);
        backing.head.store(9, Ordering::SeqCst);
        let (mut writer, _reader) = backing.ends();
        let audio = backing.mutex.lock();
        assert_eq!(writer.head(&audio), 1);
        writer.write(&audio, &[5]);
        assert_eq!(writer.head(&audio), 2);
    }

    #[test]
    fn empty_calls_are_no_ops() {
        let mut backing = Backing::new("empty", 4);
        let (mut writer, reader) = backing.ends();
        let audio = backing.mutex.lock();
        writer.write(&audio, &[]);
        reader.read(&audio, &mut []);
        assert_eq!(reader.head(&audio), 0);
    }

    #[test]
    #[should_panic(expected = "guard does not hold this ring's mutex")]
    fn writing_with_another_mutex_held_panics() {
        let mut backing = Backing::new("foreign-write", 4);
        let other = Backing::new("foreign-write-other", 4);
        let (mut writer, _reader) = backing.ends();
        let foreign = other.mutex.lock();
        writer.write(&foreign, &[1]);
    }

    #[test]
    #[should_panic(expected = "guard does not hold this ring's mutex")]
    fn reading_with_another_mutex_held_panics() {
        let mut backing = Backing::new("foreign-read", 4);
        let other = Backing::new("foreign-read-other", 4);
        let (_writer, reader) = backing.ends();
        let foreign = other.mutex.lock();
        reader.read(&foreign, &mut [0u8; 2]);
    }

    #[test]
    #[should_panic(expected = "ring capacity must be non-zero")]
    fn zero_capacity_is_rejected() {
        let mut backing = Backing::new("zero", 1);
        let parts = RingParts {
            capacity: 0,
            ..backing.parts()
        };
        let _ = unsafe { RingReader::from_parts(parts) };
    }
}
