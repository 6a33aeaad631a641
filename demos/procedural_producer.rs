//! Publishes a procedurally generated RGB pattern and a sine tone until
//! enter is pressed.
//!
//! Usage: `procedural_producer [prefix]` (default prefix `TestPrefix`).

use media_ipc::{AudioFormat, ControlBlock, MediaProducer, Ticker, VideoFormat};
use std::f64::consts::PI;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;

const TONE_HZ: f64 = 261.6;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let prefix = std::env::args().nth(1).unwrap_or_else(|| "TestPrefix".to_owned());

    let params = ControlBlock {
        width: 1920,
        height: 1080,
        frame_rate: 30,
        video_format: VideoFormat::Rgb,
        channels: 2,
        sample_rate: 44_100,
        samples_per_buffer: 1470,
        audio_format: AudioFormat::PcmF32Le,
    };
    let mut producer = MediaProducer::new(&prefix, &params)?;
    info!(prefix, "producing; press enter to stop");

    let should_exit = Arc::new(AtomicBool::new(false));
    let input = {
        let should_exit = should_exit.clone();
        std::thread::spawn(move || {
            let mut line = String::new();
            let _ = std::io::stdin().read_line(&mut line);
            should_exit.store(true, Ordering::SeqCst);
        })
    };

    let bpp = params.video_format.bytes_per_pixel() as usize;
    let mut video = vec![0u8; params.calculate_video_bufsize() as usize];
    let mut audio = vec![0u8; params.calculate_audio_bufsize() as usize];
    let mut ticker = Ticker::new(params.calculate_video_interval());
    let mut frame_num = 0u64;
    let mut sample_num = 0u64;

    while !should_exit.load(Ordering::SeqCst) {
        for (i, pixel) in video.chunks_exact_mut(bpp).enumerate() {
            let val = (i as u64).wrapping_add(frame_num % 255) as u8;
            pixel[0] = val;
            pixel[1] = val.wrapping_add(50);
            pixel[2] = val.wrapping_sub(50);
        }

        let frame_bytes = params.channels as usize * 4;
        for frame in audio.chunks_exact_mut(frame_bytes) {
            let t = sample_num as f64 / params.sample_rate as f64;
            let value = (0.25 * (2.0 * PI * TONE_HZ * t).sin()) as f32;
            for channel in frame.chunks_exact_mut(4) {
                channel.copy_from_slice(&value.to_le_bytes());
            }
            sample_num += 1;
        }

        producer.submit_video_frame(&video);
        producer.submit_audio_samples(&audio);
        frame_num += 1;

        ticker.wait();
    }

    producer.stop();
    let _ = input.join();
    info!(frames = frame_num, "producer finished");
    Ok(())
}
