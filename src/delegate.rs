use crate::control_block::ControlBlock;

/// Receives everything a [`crate::MediaConsumer`] samples from a stream.
///
/// `on_control_block` runs once on the thread that called
/// [`crate::MediaConsumer::consume`], before sampling starts. The other two
/// callbacks run on the consumer's video and audio threads, concurrently with
/// each other, hence the `Sync` bound.
///
/// Callbacks sit on the sampling path: a slow callback delays the next
/// sample of its channel, and a callback that never returns keeps that
/// channel from noticing the end of the stream.
pub trait ConsumerDelegate: Sync {
    fn on_control_block(&self, control_block: &ControlBlock);

    /// Called once per video tick with a full frame.
    fn on_video_frame(&self, frame: &[u8]);

    /// Called once per audio tick with one audio buffer.
    fn on_audio_samples(&self, samples: &[u8]);
}

type ControlBlockHandler = Box<dyn Fn(&ControlBlock) + Send + Sync>;
type DataHandler = Box<dyn Fn(&[u8]) + Send + Sync>;

/// A [`ConsumerDelegate`] assembled from closures.
///
/// Handlers that are not set do nothing.
///
/// ```no_run
/// use media_ipc::{FunctionDelegate, MediaConsumer};
///
/// let delegate = FunctionDelegate::new()
///     .with_control_block_handler(|cb| println!("{cb}"))
///     .with_video_handler(|frame| println!("frame of {} bytes", frame.len()));
/// MediaConsumer::run("TestPrefix", delegate).unwrap();
/// ```
pub struct FunctionDelegate {
    control_block: ControlBlockHandler,
    video: DataHandler,
    audio: DataHandler,
}

impl FunctionDelegate {
    pub fn new() -> Self {
        Self {
            control_block: Box::new(|_| {}),
            video: Box::new(|_| {}),
            audio: Box::new(|_| {}),
        }
    }

    pub fn with_control_block_handler(
        mut self,
        handler: impl Fn(&ControlBlock) + Send + Sync + 'static,
    ) -> Self {
        self.control_block = Box::new(handler);
        self
    }

    pub fn with_video_handler(mut self, handler: impl Fn(&[u8]) + Send + Sync + 'static) -> Self {
        self.video = Box::new(handler);
        self
    }

    pub fn with_audio_handler(mut self, handler: impl Fn(&[u8]) + Send + Sync + 'static) -> Self {
        self.audio = Box::new(handler);
        self
    }
}

impl Default for FunctionDelegate {
    fn default() -> Self {
        Self::new()
    }
}

impl ConsumerDelegate for FunctionDelegate {
    fn on_control_block(&self, control_block: &ControlBlock) {
        (self.control_block)(control_block)
    }

    fn on_video_frame(&self, frame: &[u8]) {
        (self.video)(frame)
    }

    fn on_audio_samples(&self, samples: &[u8]) {
        (self.audio)(samples)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn unset_handlers_do_nothing() {
        let delegate = FunctionDelegate::default();
        delegate.on_control_block(&ControlBlock::default());
        delegate.on_video_frame(&[1, 2, 3]);
        delegate.on_audio_samples(&[4, 5]);
    }

    #[test]
    fn handlers_receive_their_data() {
        let video = Arc::new(AtomicUsize::new(0));
        let audio = Arc::new(AtomicUsize::new(0));
        let blocks = Arc::new(AtomicUsize::new(0));

        let delegate = FunctionDelegate::new()
            .with_control_block_handler({
                let blocks = blocks.clone();
                move |cb| {
                    assert_eq!(cb.width, 640);
                    blocks.fetch_add(1, Ordering::SeqCst);
                }
            })
            .with_video_handler({
                let video = video.clone();
                move |frame| {
                    video.fetch_add(frame.len(), Ordering::SeqCst);
                }
            })
            .with_audio_handler({
                let audio = audio.clone();
                move |samples| {
                    audio.fetch_add(samples.len(), Ordering::SeqCst);
                }
            });

        delegate.on_control_block(&ControlBlock {
            width: 640,
            ..Default::default()
        });
        delegate.on_video_frame(&[0; 48]);
        delegate.on_audio_samples(&[0; 800]);
        delegate.on_audio_samples(&[0; 800]);

        assert_eq!(blocks.load(Ordering::SeqCst), 1);
        assert_eq!(video.load(Ordering::SeqCst), 48);
        assert_eq!(audio.load(Ordering::SeqCst), 1600);
    }
}
