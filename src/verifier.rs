use std::io::Read;
use std::sync::Mutex;
use std::thread::JoinHandle;

use crossbeam_channel::{bounded, Receiver, Sender};
use md5::{Digest, Md5};

pub struct VerifyInput<P> {
    /// Name used in log lines only (chunk id or file path)
    pub name: String,
    pub content: Box<dyn Read + Send>,
    pub expected_md5: String,
    pub payload: P
}

pub struct VerifyOutput<P> {
    /// Buffered content, present on success when the pool returns content
    pub content: Option<Vec<u8>>,
    pub succeeded: bool,
    pub payload: P
}

/// Worker pool streaming input through an MD5 hasher.
///
/// With `return_content` the verified bytes are also buffered and handed
/// back, which is what chunk verification needs before fan-out assembly.
/// Without it the stream is hashed and discarded, used for pre-verification
/// of existing files and for post-assembly file verification.
///
/// The input stream is always dropped before the result is emitted.
pub struct Verifier<P: Send + 'static> {
    input_tx: Mutex<Option<Sender<VerifyInput<P>>>>,
    output_rx: Receiver<VerifyOutput<P>>,
    workers: Mutex<Vec<JoinHandle<()>>>
}

impl<P: Send + 'static> Verifier<P> {
    pub fn new(threads: usize, queue_size: usize, return_content: bool) -> Self {
        tracing::info!(threads, return_content, "Initializing verifier");

        let (input_tx, input_rx) = bounded::<VerifyInput<P>>(queue_size);
        let (output_tx, output_rx) = bounded::<VerifyOutput<P>>(queue_size);

        let workers = (0..threads)
            .map(|id| {
                let input_rx = input_rx.clone();
                let output_tx = output_tx.clone();

                std::thread::spawn(move || worker(id, input_rx, output_tx, return_content))
            })
            .collect();

        Self {
            input_tx: Mutex::new(Some(input_tx)),
            output_rx,
            workers: Mutex::new(workers)
        }
    }

    /// Submit a stream for hashing. Silently dropped once the pool has been stopped
    pub fn enqueue(
        &self,
        name: String,
        content: Box<dyn Read + Send>,
        expected_md5: String,
        payload: P
    ) {
        if let Some(input_tx) = self.input_tx.lock().unwrap().as_ref() {
            let _ = input_tx.send(VerifyInput {
                name,
                content,
                expected_md5,
                payload
            });
        }
    }

    #[inline]
    pub fn output(&self) -> Receiver<VerifyOutput<P>> {
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

        let workers = std::mem::take(&mut *self.workers.lock().unwrap());

        for worker in workers {
            let _ = worker.join();
        }

        tracing::debug!("Verifier stopped");
    }
}

impl<P: Send + 'static> Drop for Verifier<P> {
    fn drop(&mut self) {
        self.stop();
    }
}

fn read_hashed(
    content: &mut dyn Read,
    hasher: &mut Md5,
    buffered: bool
) -> std::io::Result<Vec<u8>> {
    if !buffered {
        std::io::copy(content, hasher)?;

        return Ok(Vec::new());
    }

    let mut buffer = [0u8; 64 * 1024];
    let mut collected = Vec::new();

    loop {
        let read = content.read(&mut buffer)?;

        if read == 0 {
            return Ok(collected);
        }

        hasher.update(&buffer[..read]);
        collected.extend_from_slice(&buffer[..read]);
    }
}

fn worker<P>(
    id: usize,
    input_rx: Receiver<VerifyInput<P>>,
    output_tx: Sender<VerifyOutput<P>>,
    return_content: bool
) {
    tracing::debug!(worker = id, "Started verifier worker");

    for input in input_rx.iter() {
        let VerifyInput {
            name,
            mut content,
            expected_md5,
            payload
        } = input;

        let mut hasher = Md5::new();

        let collected = match read_hashed(&mut content, &mut hasher, return_content) {
            Ok(collected) => collected,

            Err(err) => {
                tracing::error!(worker = id, %name, %err, "Failed to read content, marking verification as failed");

                drop(content);

                let _ = output_tx.send(VerifyOutput {
                    content: None,
                    succeeded: false,
                    payload
                });

                continue;
            }
        };

        drop(content);

        let computed = format!("{:x}", hasher.finalize());

        if computed != expected_md5 {
            tracing::warn!(
                worker = id,
                %name,
                expected = %expected_md5,
                got = %computed,
                "MD5 mismatch"
            );

            let _ = output_tx.send(VerifyOutput {
                content: None,
                succeeded: false,
                payload
            });

            continue;
        }

        tracing::debug!(worker = id, %name, "MD5 verified successfully");

        let _ = output_tx.send(VerifyOutput {
            content: return_content.then_some(collected),
            succeeded: true,
            payload
        });
    }
}
