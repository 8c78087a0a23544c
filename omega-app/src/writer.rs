//! Recording writer thread
//!
//! Finished takes arrive from the control loop and are encoded to disk
//! here, away from both the audio callback and the control loop.

use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, SendTimeoutError, Sender};
use omega_audio::recorder::write_take;
use omega_audio::RecordedTake;
use tracing::{error, info, warn};

/// Takes that may wait for the writer
const QUEUE_DEPTH: usize = 8;
/// How long `submit` waits for room in the queue
const SUBMIT_TIMEOUT: Duration = Duration::from_millis(250);

pub struct TakeWriter {
    tx: Sender<Box<RecordedTake>>,
    handle: JoinHandle<usize>,
}

impl TakeWriter {
    /// Start the writer; takes without their own path land in `dir`
    pub fn spawn(dir: PathBuf) -> std::io::Result<Self> {
        let (tx, rx) = bounded::<Box<RecordedTake>>(QUEUE_DEPTH);
        let handle = thread::Builder::new().name("omega-writer".into()).spawn(move || {
            let mut written = 0;
            for take in rx.iter() {
                let path = take_path(&dir, &take, written);
                match write_take(&take, &path) {
                    Ok(()) => {
                        written += 1;
                        info!(path = %path.display(), seconds = take.duration_secs(), "take written");
                    }
                    Err(e) => error!(path = %path.display(), error = %e, "could not write take"),
                }
            }
            written
        })?;
        Ok(Self { tx, handle })
    }

    /// Queue a take for writing, waiting briefly for room. A take that
    /// cannot be queued is handed back so the caller can retry.
    pub fn submit(&self, take: Box<RecordedTake>) -> Result<(), Box<RecordedTake>> {
        match self.tx.send_timeout(take, SUBMIT_TIMEOUT) {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Timeout(take)) => {
                warn!(frames = take.frames(), "writer busy; take held back");
                Err(take)
            }
            Err(SendTimeoutError::Disconnected(take)) => {
                error!(frames = take.frames(), "writer thread gone");
                Err(take)
            }
        }
    }

    /// Write everything queued and stop. Returns the number of takes written.
    pub fn finish(self) -> usize {
        drop(self.tx);
        self.handle.join().unwrap_or(0)
    }
}

fn take_path(dir: &Path, take: &RecordedTake, index: usize) -> PathBuf {
    match &take.settings.path {
        Some(path) => path.clone(),
        None => dir.join(format!("take-{:03}.{}", index + 1, take.settings.format.extension())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use omega_audio::{RecordFormat, RecordSettings};

    fn take(format: RecordFormat) -> Box<RecordedTake> {
        let settings = RecordSettings { format, ..RecordSettings::default() };
        let mut take = RecordedTake::with_capacity(settings, 2, 48_000, 256);
        take.samples.extend((0..256).map(|i| (i as f32 * 0.05).sin() * 0.5));
        take.peak = 0.5;
        Box::new(take)
    }

    #[test]
    fn test_takes_written_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let writer = TakeWriter::spawn(dir.path().to_path_buf()).unwrap();
        assert!(writer.submit(take(RecordFormat::Wav24)).is_ok());
        assert!(writer.submit(take(RecordFormat::Wav16)).is_ok());
        assert_eq!(writer.finish(), 2);
        assert!(dir.path().join("take-001.wav").exists());
        assert!(dir.path().join("take-002.wav").exists());
    }

    #[test]
    fn test_explicit_path_used() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("bounce").join("master.wav");
        let mut t = take(RecordFormat::Wav32Float);
        t.settings.path = Some(target.clone());
        let writer = TakeWriter::spawn(dir.path().to_path_buf()).unwrap();
        assert!(writer.submit(t).is_ok());
        assert_eq!(writer.finish(), 1);
        assert!(target.exists());
    }

    #[test]
    fn test_empty_take_not_counted() {
        let dir = tempfile::tempdir().unwrap();
        let writer = TakeWriter::spawn(dir.path().to_path_buf()).unwrap();
        let settings = RecordSettings::default();
        assert!(writer.submit(Box::new(RecordedTake::with_capacity(settings, 2, 48_000, 0))).is_ok());
        assert_eq!(writer.finish(), 0);
    }

    #[test]
    fn test_full_queue_hands_take_back() {
        // nothing drains this queue
        let (tx, _rx) = bounded(1);
        let writer = TakeWriter { tx, handle: thread::spawn(|| 0) };
        assert!(writer.submit(take(RecordFormat::Wav24)).is_ok());
        let returned = writer.submit(take(RecordFormat::Flac)).unwrap_err();
        assert_eq!(returned.frames(), 128);
        assert_eq!(returned.settings.format, RecordFormat::Flac);
    }

    #[test]
    fn test_gone_writer_hands_take_back() {
        let (tx, rx) = bounded(1);
        drop(rx);
        let writer = TakeWriter { tx, handle: thread::spawn(|| 0) };
        assert!(writer.submit(take(RecordFormat::Wav16)).is_err());
        assert_eq!(writer.finish(), 0);
    }
}
