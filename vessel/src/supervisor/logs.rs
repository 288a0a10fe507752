//! Container log capture and tailing.
//!
//! stdout and stderr of the entrypoint are pumped line-wise into a single
//! per-container log file; flushes land on newline boundaries so tailing
//! consumers never observe a torn line mid-file. Transient write failures
//! are retried with bounded backoff.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use vessel_shared::{VesselError, VesselResult};

const WRITE_RETRIES: usize = 3;
const RETRY_BACKOFF: std::time::Duration = std::time::Duration::from_millis(10);

/// Shared append-only sink for one container's log file.
pub(crate) struct LogSink {
    file: Mutex<File>,
    path: PathBuf,
}

impl LogSink {
    pub fn open(path: &Path) -> VesselResult<Arc<Self>> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Arc::new(Self {
            file: Mutex::new(file),
            path: path.to_path_buf(),
        }))
    }

    fn append(&self, chunk: &[u8]) {
        let mut file = self.file.lock();
        for attempt in 0..=WRITE_RETRIES {
            match file.write_all(chunk).and_then(|_| file.flush()) {
                Ok(()) => return,
                Err(e) if attempt < WRITE_RETRIES => {
                    tracing::debug!(
                        path = %self.path.display(),
                        error = %e,
                        attempt,
                        "log append failed; retrying"
                    );
                    std::thread::sleep(RETRY_BACKOFF);
                }
                Err(e) => {
                    tracing::warn!(
                        path = %self.path.display(),
                        error = %e,
                        "dropping log chunk after retries"
                    );
                    return;
                }
            }
        }
    }
}

/// Pump one stream into the sink until EOF. Returns the thread handle so
/// the supervisor can join it when the container is removed.
pub(crate) fn spawn_pump(
    stream: Box<dyn Read + Send>,
    sink: Arc<LogSink>,
    name: &'static str,
) -> std::thread::JoinHandle<()> {
    std::thread::Builder::new()
        .name(format!("vessel-log-{}", name))
        .spawn(move || {
            let mut reader = BufReader::new(stream);
            let mut line = Vec::with_capacity(256);
            loop {
                line.clear();
                match reader.read_until(b'\n', &mut line) {
                    Ok(0) => break,
                    Ok(_) => sink.append(&line),
                    Err(e) => {
                        tracing::debug!(error = %e, "log stream closed");
                        break;
                    }
                }
            }
        })
        .expect("spawning log pump thread")
}

/// Read log bytes from `offset`; returns the chunk and the next offset.
pub(crate) fn tail(path: &Path, offset: u64, max_bytes: usize) -> VesselResult<(Vec<u8>, u64)> {
    let mut file = File::open(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => {
            VesselError::NotFound(format!("no log at {}", path.display()))
        }
        _ => VesselError::from(e),
    })?;
    let len = file.metadata()?.len();
    let start = offset.min(len);
    file.seek(SeekFrom::Start(start))?;

    let mut buf = vec![0u8; max_bytes.min((len - start) as usize)];
    let mut read = 0;
    while read < buf.len() {
        let n = file.read(&mut buf[read..])?;
        if n == 0 {
            break;
        }
        read += n;
    }
    buf.truncate(read);
    let next = start + read as u64;
    Ok((buf, next))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn pump_writes_lines_to_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("log");
        let sink = LogSink::open(&path).unwrap();

        let data: &[u8] = b"one\ntwo\nthree\n";
        let pump = spawn_pump(Box::new(std::io::Cursor::new(data.to_vec())), sink, "stdout");
        pump.join().unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), data);
    }

    #[test]
    fn partial_final_line_is_kept() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("log");
        let sink = LogSink::open(&path).unwrap();

        let pump = spawn_pump(
            Box::new(std::io::Cursor::new(b"no newline".to_vec())),
            sink,
            "stdout",
        );
        pump.join().unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"no newline");
    }

    #[test]
    fn tail_reads_from_offset() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("log");
        std::fs::write(&path, b"hello\nworld\n").unwrap();

        let (chunk, next) = tail(&path, 0, 1024).unwrap();
        assert_eq!(chunk, b"hello\nworld\n");
        assert_eq!(next, 12);

        let (chunk, next) = tail(&path, 6, 1024).unwrap();
        assert_eq!(chunk, b"world\n");
        assert_eq!(next, 12);

        // Past-the-end offsets return an empty chunk, not an error.
        let (chunk, next) = tail(&path, 100, 1024).unwrap();
        assert!(chunk.is_empty());
        assert_eq!(next, 12);
    }

    #[test]
    fn tail_missing_log_is_not_found() {
        let tmp = TempDir::new().unwrap();
        let err = tail(&tmp.path().join("absent"), 0, 10).unwrap_err();
        assert_eq!(err.kind(), vessel_shared::ErrorKind::NotFound);
    }

    #[test]
    fn concurrent_pumps_interleave_whole_lines() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("log");
        let sink = LogSink::open(&path).unwrap();

        let a = spawn_pump(
            Box::new(std::io::Cursor::new(b"aaaa\n".repeat(50))),
            sink.clone(),
            "stdout",
        );
        let b = spawn_pump(
            Box::new(std::io::Cursor::new(b"bbbb\n".repeat(50))),
            sink,
            "stderr",
        );
        a.join().unwrap();
        b.join().unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 100);
        for line in contents.lines() {
            assert!(line == "aaaa" || line == "bbbb");
        }
    }
}
