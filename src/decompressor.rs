use std::io::Read;
use std::sync::Mutex;
use std::thread::JoinHandle;

use crossbeam_channel::{bounded, Receiver, Sender};

pub struct DecompressInput<P> {
    pub content: Box<dyn Read + Send>,
    pub payload: P
}

pub struct DecompressOutput<P> {
    /// Composed stream; dropping it releases both the decoder and the source
    pub content: Option<Box<dyn Read + Send>>,
    pub succeeded: bool,
    pub payload: P
}

/// Worker pool wrapping chunk byte streams in a zstd streaming decoder.
///
/// The decompressed bytes are never materialised here; downstream stages
/// read through the returned stream.
pub struct Decompressor<P: Send + 'static> {
    input_tx: Mutex<Option<Sender<DecompressInput<P>>>>,
    output_rx: Receiver<DecompressOutput<P>>,
    workers: Mutex<Vec<JoinHandle<()>>>
}

impl<P: Send + 'static> Decompressor<P> {
    pub fn new(threads: usize, queue_size: usize) -> Self {
        tracing::info!(threads, "Initializing decompressor");

        let (input_tx, input_rx) = bounded::<DecompressInput<P>>(queue_size);
        let (output_tx, output_rx) = bounded::<DecompressOutput<P>>(queue_size);

        let workers = (0..threads)
            .map(|id| {
                let input_rx = input_rx.clone();
                let output_tx = output_tx.clone();

                std::thread::spawn(move || worker(id, input_rx, output_tx))
            })
            .collect();

        Self {
            input_tx: Mutex::new(Some(input_tx)),
            output_rx,
            workers: Mutex::new(workers)
        }
    }

    /// Submit a compressed stream. Silently dropped once the pool has been stopped
    pub fn enqueue(&self, content: Box<dyn Read + Send>, payload: P) {
        if let Some(input_tx) = self.input_tx.lock().unwrap().as_ref() {
            let _ = input_tx.send(DecompressInput { content, payload });
        }
    }

    #[inline]
    pub fn output(&self) -> Receiver<DecompressOutput<P>> {
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

        tracing::debug!("Decompressor stopped");
    }
}

impl<P: Send + 'static> Drop for Decompressor<P> {
    fn drop(&mut self) {
        self.stop();
    }
}

fn worker<P>(
    id: usize,
    input_rx: Receiver<DecompressInput<P>>,
    output_tx: Sender<DecompressOutput<P>>
) {
    tracing::debug!(worker = id, "Started decompressor worker");

    for DecompressInput { content, payload } in input_rx.iter() {
        match zstd::Decoder::new(content) {
            Ok(decoder) => {
                let _ = output_tx.send(DecompressOutput {
                    content: Some(Box::new(decoder)),
                    succeeded: true,
                    payload
                });
            }

            Err(err) => {
                tracing::error!(worker = id, %err, "Failed to create zstd decoder");

                let _ = output_tx.send(DecompressOutput {
                    content: None,
                    succeeded: false,
                    payload
                });
            }
        }
    }
}
