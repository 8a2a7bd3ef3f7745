use std::fs::{DirBuilder, OpenOptions};
use std::io::{Read, Seek, SeekFrom};
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::thread::JoinHandle;

use crossbeam_channel::{bounded, Receiver, Sender};

pub struct AssembleInput<P> {
    /// Forward-slash path relative to the staging root
    pub file_path: String,
    pub offset: u64,
    pub chunk_id: String,
    pub content: Box<dyn Read + Send>,
    pub payload: P
}

pub struct AssembleOutput<P> {
    pub file_path: String,
    pub offset: u64,
    pub chunk_id: String,
    pub succeeded: bool,
    pub payload: P
}

/// Single-threaded positional writer for the staging directory.
///
/// Several chunks may target the same file; the one-writer discipline is what
/// makes unlocked positional writes safe. Parallelising this across files
/// would need per-path locking (or partitioning by path hash).
pub struct Assembler<P: Send + 'static> {
    input_tx: Mutex<Option<Sender<AssembleInput<P>>>>,
    output_rx: Receiver<AssembleOutput<P>>,
    worker: Mutex<Option<JoinHandle<()>>>
}

impl<P: Send + 'static> Assembler<P> {
    pub fn new(staging_dir: impl Into<PathBuf>, queue_size: usize) -> Self {
        let staging_dir = staging_dir.into();

        let (input_tx, input_rx) = bounded::<AssembleInput<P>>(queue_size);
        let (output_tx, output_rx) = bounded::<AssembleOutput<P>>(queue_size);

        let worker = std::thread::spawn(move || worker(staging_dir, input_rx, output_tx));

        Self {
            input_tx: Mutex::new(Some(input_tx)),
            output_rx,
            worker: Mutex::new(Some(worker))
        }
    }

    /// Submit a positional write. Silently dropped once the writer has been stopped
    pub fn enqueue(
        &self,
        file_path: String,
        offset: u64,
        chunk_id: String,
        content: Box<dyn Read + Send>,
        payload: P
    ) {
        if let Some(input_tx) = self.input_tx.lock().unwrap().as_ref() {
            let _ = input_tx.send(AssembleInput {
                file_path,
                offset,
                chunk_id,
                content,
                payload
            });
        }
    }

    #[inline]
    pub fn output(&self) -> Receiver<AssembleOutput<P>> {
        self.output_rx.clone()
    }

    pub fn backlog(&self) -> usize {
        self.input_tx.lock().unwrap()
            .as_ref()
            .map(Sender::len)
            .unwrap_or(0)
    }

    pub fn stop(&self) {
        drop(self.input_tx.lock().unwrap().take());

        if let Some(worker) = self.worker.lock().unwrap().take() {
            let _ = worker.join();
        }

        tracing::debug!("Assembler stopped");
    }
}

impl<P: Send + 'static> Drop for Assembler<P> {
    fn drop(&mut self) {
        self.stop();
    }
}

fn write_at(
    staging_dir: &Path,
    file_path: &str,
    offset: u64,
    content: &mut dyn Read
) -> std::io::Result<u64> {
    let full_path = staging_dir.join(file_path);

    if let Some(parent) = full_path.parent() {
        DirBuilder::new()
            .recursive(true)
            .mode(0o755)
            .create(parent)?;
    }

    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .mode(0o644)
        .open(&full_path)?;

    file.seek(SeekFrom::Start(offset))?;

    std::io::copy(content, &mut file)
}

fn worker<P>(
    staging_dir: PathBuf,
    input_rx: Receiver<AssembleInput<P>>,
    output_tx: Sender<AssembleOutput<P>>
) {
    tracing::debug!("Started assembler worker");

    for input in input_rx.iter() {
        let AssembleInput {
            file_path,
            offset,
            chunk_id,
            mut content,
            payload
        } = input;

        let succeeded = match write_at(&staging_dir, &file_path, offset, &mut content) {
            Ok(written) => {
                tracing::debug!(%chunk_id, %file_path, offset, written, "Wrote chunk");

                true
            }

            Err(err) => {
                tracing::error!(%chunk_id, %file_path, offset, %err, "Failed to write chunk");

                false
            }
        };

        drop(content);

        let _ = output_tx.send(AssembleOutput {
            file_path,
            offset,
            chunk_id,
            succeeded,
            payload
        });
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    #[test]
    fn positional_writes_land_at_their_offsets() {
        let staging = tempfile::tempdir().unwrap();
        let assembler = Assembler::<u8>::new(staging.path(), 8);

        assembler.enqueue(
            "dir/file.bin".to_string(),
            4,
            "b".to_string(),
            Box::new(Cursor::new(b"5678".to_vec())),
            1
        );

        let out = assembler.output().recv().unwrap();
        assert!(out.succeeded);
        assert_eq!(out.offset, 4);

        assembler.enqueue(
            "dir/file.bin".to_string(),
            0,
            "a".to_string(),
            Box::new(Cursor::new(b"1234".to_vec())),
            2
        );

        let out = assembler.output().recv().unwrap();
        assert!(out.succeeded);

        assembler.stop();

        let written = std::fs::read(staging.path().join("dir/file.bin")).unwrap();

        assert_eq!(written, b"12345678");
    }
}
