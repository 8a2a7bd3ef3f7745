use std::io::Read;
use std::sync::Mutex;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender};
use reqwest::blocking::Client;

pub struct DownloadRequest<P> {
    pub url: String,
    pub payload: P
}

pub struct DownloadOutput<P> {
    /// Owned response body stream. The consumer must fully read and drop it
    pub body: Option<Box<dyn Read + Send>>,
    pub succeeded: bool,
    pub payload: P
}

/// Worker pool performing chunk HTTP GETs over one shared keep-alive client.
///
/// No ordering is guaranteed across workers; the payload carries everything
/// downstream needs to identify the chunk.
pub struct Downloader<P: Send + 'static> {
    input_tx: Mutex<Option<Sender<DownloadRequest<P>>>>,
    output_rx: Receiver<DownloadOutput<P>>,
    workers: Mutex<Vec<JoinHandle<()>>>
}

impl<P: Send + 'static> Downloader<P> {
    pub fn new(
        threads: usize,
        queue_size: usize,
        max_retries: u32
    ) -> Result<Self, reqwest::Error> {
        tracing::info!(threads, "Initializing downloader");

        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(threads * 2)
            .timeout(Duration::from_secs(5 * 60))
            .build()?;

        let (input_tx, input_rx) = bounded::<DownloadRequest<P>>(queue_size);
        let (output_tx, output_rx) = bounded::<DownloadOutput<P>>(queue_size);

        let workers = (0..threads)
            .map(|id| {
                let client = client.clone();
                let input_rx = input_rx.clone();
                let output_tx = output_tx.clone();

                std::thread::spawn(move || worker(id, client, input_rx, output_tx, max_retries))
            })
            .collect();

        Ok(Self {
            input_tx: Mutex::new(Some(input_tx)),
            output_rx,
            workers: Mutex::new(workers)
        })
    }

    /// Submit a download. Silently dropped once the pool has been stopped
    pub fn enqueue(&self, url: String, payload: P) {
        if let Some(input_tx) = self.input_tx.lock().unwrap().as_ref() {
            let _ = input_tx.send(DownloadRequest { url, payload });
        }
    }

    #[inline]
    pub fn output(&self) -> Receiver<DownloadOutput<P>> {
        self.output_rx.clone()
    }

    /// Pending downloads not yet picked up by a worker
    pub fn backlog(&self) -> usize {
        self.input_tx.lock().unwrap()
            .as_ref()
            .map(Sender::len)
            .unwrap_or(0)
    }

    /// Close the input queue, drain the workers, then let the output queue
    /// disconnect. Idempotent
    pub fn stop(&self) {
        drop(self.input_tx.lock().unwrap().take());

        let workers = std::mem::take(&mut *self.workers.lock().unwrap());

        for worker in workers {
            let _ = worker.join();
        }

        tracing::debug!("Downloader stopped");
    }
}

impl<P: Send + 'static> Drop for Downloader<P> {
    fn drop(&mut self) {
        self.stop();
    }
}

fn worker<P>(
    id: usize,
    client: Client,
    input_rx: Receiver<DownloadRequest<P>>,
    output_tx: Sender<DownloadOutput<P>>,
    max_retries: u32
) {
    tracing::debug!(worker = id, "Started downloader worker");

    for DownloadRequest { url, payload } in input_rx.iter() {
        let mut body: Option<Box<dyn Read + Send>> = None;

        for attempt in 1..=max_retries {
            match client.get(&url).send() {
                Ok(response) if response.status().is_success() => {
                    tracing::debug!(worker = id, %url, "Downloaded chunk");

                    body = Some(Box::new(response));

                    break;
                }

                Ok(response) => {
                    tracing::warn!(
                        worker = id,
                        %url,
                        status = %response.status(),
                        attempt,
                        "Chunk download failed, retrying"
                    );
                }

                Err(err) => {
                    tracing::warn!(
                        worker = id,
                        %url,
                        %err,
                        attempt,
                        "Chunk download failed, retrying"
                    );
                }
            }
        }

        let succeeded = body.is_some();

        if !succeeded {
            tracing::error!(worker = id, %url, "Chunk download out of retries");
        }

        let _ = output_tx.send(DownloadOutput {
            body,
            succeeded,
            payload
        });
    }
}
