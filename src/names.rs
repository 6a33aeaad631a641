//! Names of every shared-memory segment and named mutex of one stream.
//!
//! Producer and consumer derive the names independently from the same
//! caller-supplied prefix; there is no rendezvous beyond agreeing on it.
//!
//! The names here are the logical ones. A name longer than the platform's
//! POSIX IPC limit (31 bytes on macOS, where even `TestPrefix` plus the
//! longest suffix does not fit) is shortened to its head plus a hash of the
//! whole name when the OS object is opened. Both sides shorten the same
//! way, so streams work on every Unix, but the OS-level names of long
//! prefixes are no longer readable in full.

const STATUS_MEMORY: &str = "ProducerStatusSharedMemory";
const STATUS_MUTEX: &str = "ProducerStatusNamedMutex";
const CONTROL_BLOCK_MEMORY: &str = "ControlBlockSharedMemory";
const CONTROL_BLOCK_MUTEX: &str = "ControlBlockNamedMutex";
const VIDEO_FRONT_BUFFER: &str = "VideoFrontBufferSharedMemory";
const VIDEO_BACK_BUFFER: &str = "VideoBackBufferSharedMemory";
const VIDEO_MUTEX: &str = "VideoNamedMutex";
const FRONT_BUFFER_MUTEX: &str = "VideoFrontBufferNamedMutex";
const BACK_BUFFER_MUTEX: &str = "VideoBackBufferNamedMutex";
const AUDIO_BUFFER: &str = "AudioBufferSharedMemory";
const AUDIO_MUTEX: &str = "AudioNamedMutex";

/// The eleven OS object names derived from one prefix.
///
/// `status_memory` and `control_block_mutex` are reserved names: the status
/// flag lives in the control-block segment and the control block is guarded
/// by the status mutex, so neither object is ever created.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ObjectNames {
    pub status_memory: String,
    pub status_mutex: String,
    pub control_block_memory: String,
    pub control_block_mutex: String,
    pub video_front_buffer: String,
    pub video_back_buffer: String,
    pub video_mutex: String,
    pub front_buffer_mutex: String,
    pub back_buffer_mutex: String,
    pub audio_buffer: String,
    pub audio_mutex: String,
}

impl ObjectNames {
    pub fn new(prefix: &str) -> Self {
        let name = |suffix: &str| format!("{prefix}{suffix}");
        Self {
            status_memory: name(STATUS_MEMORY),
            status_mutex: name(STATUS_MUTEX),
            control_block_memory: name(CONTROL_BLOCK_MEMORY),
            control_block_mutex: name(CONTROL_BLOCK_MUTEX),
            video_front_buffer: name(VIDEO_FRONT_BUFFER),
            video_back_buffer: name(VIDEO_BACK_BUFFER),
            video_mutex: name(VIDEO_MUTEX),
            front_buffer_mutex: name(FRONT_BUFFER_MUTEX),
            back_buffer_mutex: name(BACK_BUFFER_MUTEX),
            audio_buffer: name(AUDIO_BUFFER),
            audio_mutex: name(AUDIO_MUTEX),
        }
    }

    /// All eleven names, in declaration order.
    pub fn all(&self) -> [&str; 11] {
        [
            &self.status_memory,
            &self.status_mutex,
            &self.control_block_memory,
            &self.control_block_mutex,
            &self.video_front_buffer,
            &self.video_back_buffer,
            &self.video_mutex,
            &self.front_buffer_mutex,
            &self.back_buffer_mutex,
            &self.audio_buffer,
            &self.audio_mutex,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn derivation_is_deterministic() {
        assert_eq!(ObjectNames::new("TestPrefix"), ObjectNames::new("TestPrefix"));
    }

    #[test]
    fn names_are_prefix_plus_suffix() {
        let names = ObjectNames::new("Cam1-");
        assert_eq!(names.status_mutex, "Cam1-ProducerStatusNamedMutex");
        assert_eq!(names.control_block_memory, "Cam1-ControlBlockSharedMemory");
        assert_eq!(names.video_front_buffer, "Cam1-VideoFrontBufferSharedMemory");
        assert_eq!(names.video_back_buffer, "Cam1-VideoBackBufferSharedMemory");
        assert_eq!(names.video_mutex, "Cam1-VideoNamedMutex");
        assert_eq!(names.front_buffer_mutex, "Cam1-VideoFrontBufferNamedMutex");
        assert_eq!(names.back_buffer_mutex, "Cam1-VideoBackBufferNamedMutex");
        assert_eq!(names.audio_buffer, "Cam1-AudioBufferSharedMemory");
        assert_eq!(names.audio_mutex, "Cam1-AudioNamedMutex");
        assert!(names.all().iter().all(|n| n.starts_with("Cam1-")));
    }

    #[test]
    fn names_within_a_set_are_distinct() {
        let names = ObjectNames::new("p");
        let unique: HashSet<&str> = names.all().into_iter().collect();
        assert_eq!(unique.len(), 11);
    }

    #[test]
    fn different_prefixes_never_collide() {
        let prefixes = ["", "a", "b", "TestPrefix", "TestPrefix-", "stream/1", "Video"];
        let mut seen = HashSet::new();
        for prefix in prefixes {
            for name in ObjectNames::new(prefix).all() {
                assert!(seen.insert(name.to_owned()), "duplicate name {name}");
            }
        }
    }
}
