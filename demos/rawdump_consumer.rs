//! Dumps a stream to `controlblock.txt`, `video.raw` and `audio.raw` in the
//! current directory.
//!
//! Usage: `rawdump_consumer [prefix]` (default prefix `TestPrefix`).

use media_ipc::{FunctionDelegate, MediaConsumer};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{error, info};

type Dump = Arc<Mutex<BufWriter<File>>>;

fn open_dump(path: &str) -> std::io::Result<Dump> {
    Ok(Arc::new(Mutex::new(BufWriter::new(File::create(path)?))))
}

fn append(dump: &Dump, path: &str, bytes: &[u8]) {
    // A panic in another callback must not stop this file from growing.
    let mut file = dump.lock().unwrap_or_else(PoisonError::into_inner);
    if let Err(err) = file.write_all(bytes) {
        error!(%err, path, "write failed");
    }
}

fn finish(dump: &Dump, path: &str) -> bool {
    let mut file = dump.lock().unwrap_or_else(PoisonError::into_inner);
    match file.flush() {
        Ok(()) => true,
        Err(err) => {
            error!(%err, path, "flush failed");
            false
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let prefix = std::env::args().nth(1).unwrap_or_else(|| "TestPrefix".to_owned());

    let video = open_dump("video.raw")?;
    let audio = open_dump("audio.raw")?;

    info!(prefix, "awaiting control block from producer process");
    let consumer = MediaConsumer::attach(&prefix)?;

    let delegate = FunctionDelegate::new()
        .with_control_block_handler(|cb| {
            println!("Received Control Block:\n\n{cb}");
            if let Err(err) = std::fs::write("controlblock.txt", cb.to_string()) {
                error!(%err, "could not write controlblock.txt");
            }
            info!("receiving stream data from producer process");
        })
        .with_video_handler({
            let video = video.clone();
            move |frame| append(&video, "video.raw", frame)
        })
        .with_audio_handler({
            let audio = audio.clone();
            move |samples| append(&audio, "audio.raw", samples)
        });

    consumer.consume(&delegate)?;

    let flushed = finish(&video, "video.raw") & finish(&audio, "audio.raw");
    if !flushed {
        return Err("could not write every dump file".into());
    }
    info!("stream complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn a_poisoned_dump_keeps_recording_and_flushes() {
        let path = std::env::temp_dir().join(format!("media-ipc-dump-{}.raw", std::process::id()));
        let dump = open_dump(path.to_str().unwrap()).unwrap();
        append(&dump, "dump", &[1, 2]);

        let poisoner = dump.clone();
        let _ = std::thread::spawn(move || {
            let _file = poisoner.lock().unwrap();
            panic!("callback failed");
        })
        .join();
        assert!(dump.is_poisoned());

        append(&dump, "dump", &[3]);
        assert!(finish(&dump, "dump"));
        assert_eq!(std::fs::read(&path).unwrap(), [1, 2, 3]);
        std::fs::remove_file(&path).unwrap();
    }
}
