use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::bounded;
use thiserror::Error;

use crate::api::schemas::sophon_builds::DownloadInfo;
use crate::assembler::Assembler;
use crate::config::Config;
use crate::decompressor::Decompressor;
use crate::downloader::Downloader;
use crate::logging;
use crate::manifest::SophonManifest;
use crate::prettify_bytes::prettify_bytes;
use crate::verifier::Verifier;

mod prepare;
mod progress;
mod queue;
mod stages;

pub use progress::{Progress, ProgressSnapshot};
pub use queue::InputQueue;

use stages::PipelineContext;

#[derive(Error, Debug)]
pub enum InstallerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("reqwest error: {0}")]
    Reqwest(String),

    #[error("Encrypted chunks are not supported")]
    EncryptedChunks
}

impl From<reqwest::Error> for InstallerError {
    #[inline(always)]
    fn from(error: reqwest::Error) -> Self {
        Self::Reqwest(error.to_string())
    }
}

/// Where a chunk's decompressed bytes must land: a file plus a byte offset.
///
/// Files are referenced by their manifest path only. The maps never form a
/// `file -> chunk -> file` pointer graph.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChunkDestination {
    pub file_path: Arc<str>,
    pub offset: u64
}

/// In-pipeline chunk descriptor.
///
/// Deduplication makes `destinations` a list: identical chunk content
/// referenced by several files is fetched and verified once, then written to
/// every destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkRef {
    pub chunk_id: String,
    pub url: String,
    pub md5: String,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    pub is_compressed: bool,
    pub destinations: Vec<ChunkDestination>
}

impl ChunkRef {
    /// Shallow copy driving a single destination, used to restart one file's
    /// failed write without re-driving unrelated destinations
    pub fn with_single_destination(&self, destination: ChunkDestination) -> Arc<Self> {
        Arc::new(Self {
            chunk_id: self.chunk_id.clone(),
            url: self.url.clone(),
            md5: self.md5.clone(),
            compressed_size: self.compressed_size,
            uncompressed_size: self.uncompressed_size,
            is_compressed: self.is_compressed,
            destinations: vec![destination]
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    /// Forward-slash path relative to the game root
    pub path: Arc<str>,
    pub size: i32,
    pub md5: String,
    /// Chunk ids in manifest order; a chunk id may repeat at different offsets
    pub chunk_ids: Vec<String>,
    pub is_folder: bool
}

impl FileEntry {
    pub fn distinct_chunk_count(&self) -> usize {
        self.chunk_ids.iter()
            .collect::<HashSet<_>>()
            .len()
    }
}

struct Components {
    downloader: Arc<Downloader<Arc<ChunkRef>>>,
    decompressor: Arc<Decompressor<Arc<ChunkRef>>>,
    chunk_verifier: Arc<Verifier<Arc<ChunkRef>>>,
    assembler: Arc<Assembler<Arc<ChunkRef>>>,
    file_verifier: Arc<Verifier<Arc<FileEntry>>>
}

/// Multi-stage concurrent installer reconstructing a file tree from
/// deduplicated compressed chunks.
///
/// Lifecycle: [`parse_manifest`](Self::parse_manifest) builds the chunk and
/// file maps, [`prepare`](Self::prepare) prunes already-valid files and resets
/// the staging directory, [`start`](Self::start) spawns the pipeline and
/// [`wait`](Self::wait) blocks until the mover has renamed every verified
/// file into place. A stopped pipeline cannot be restarted without re-running
/// `prepare`.
pub struct Installer {
    pub game_dir: PathBuf,
    pub staging_dir: PathBuf,
    pub config: Config,

    queue_size: usize,

    chunk_map: HashMap<String, Arc<ChunkRef>>,
    file_map: HashMap<Arc<str>, Arc<FileEntry>>,
    progress: Arc<Progress>,

    input_queue: Option<Arc<InputQueue>>,
    components: Option<Components>,
    tasks: Vec<JoinHandle<()>>
}

impl Installer {
    pub fn new(
        game_dir: impl Into<PathBuf>,
        staging_dir: impl Into<PathBuf>,
        queue_size: usize,
        config: Config
    ) -> Self {
        Self {
            game_dir: game_dir.into(),
            staging_dir: staging_dir.into(),
            config,

            queue_size,

            chunk_map: HashMap::new(),
            file_map: HashMap::new(),
            progress: Arc::new(Progress::default()),

            input_queue: None,
            components: None,
            tasks: Vec::new()
        }
    }

    #[inline]
    pub fn progress(&self) -> ProgressSnapshot {
        self.progress.snapshot()
    }

    #[inline]
    pub fn chunks(&self) -> &HashMap<String, Arc<ChunkRef>> {
        &self.chunk_map
    }

    #[inline]
    pub fn files(&self) -> &HashMap<Arc<str>, Arc<FileEntry>> {
        &self.file_map
    }

    /// Rebuild the chunk and file maps from a decoded manifest.
    ///
    /// Repeated parses overwrite previous state completely, so parsing is a
    /// pure function of the manifest and the chunk download descriptor.
    pub fn parse_manifest(
        &mut self,
        manifest: &SophonManifest,
        chunk_download: &DownloadInfo
    ) -> Result<(), InstallerError> {
        if chunk_download.encryption != 0 {
            return Err(InstallerError::EncryptedChunks);
        }

        tracing::debug!("Resetting installer state before parsing manifest");

        self.chunk_map = HashMap::new();
        self.file_map = HashMap::new();
        self.progress.reset();

        let is_compressed = chunk_download.compression != 0;

        for file in &manifest.files {
            let path: Arc<str> = file.filename.as_str().into();
            let is_folder = file.flags == 64;

            let mut chunk_ids = Vec::with_capacity(file.chunks.len());

            for chunk in &file.chunks {
                chunk_ids.push(chunk.chunk_id.clone());

                let destination = ChunkDestination {
                    file_path: Arc::clone(&path),
                    offset: chunk.offset
                };

                match self.chunk_map.entry(chunk.chunk_id.clone()) {
                    Entry::Vacant(slot) => {
                        slot.insert(Arc::new(ChunkRef {
                            chunk_id: chunk.chunk_id.clone(),
                            url: chunk_download.download_url(&chunk.chunk_id),
                            md5: chunk.md5.clone(),
                            compressed_size: chunk.compressed_size,
                            uncompressed_size: chunk.uncompressed_size,
                            is_compressed,
                            destinations: vec![destination]
                        }));
                    }

                    Entry::Occupied(mut slot) => {
                        Arc::make_mut(slot.get_mut()).destinations.push(destination);
                    }
                }
            }

            self.file_map.insert(
                Arc::clone(&path),
                Arc::new(FileEntry {
                    path,
                    size: file.size,
                    md5: file.md5.clone(),
                    chunk_ids,
                    is_folder
                })
            );
        }

        self.refresh_totals();
        self.compute_total_bytes();

        let progress = self.progress.snapshot();

        tracing::info!(
            chunks = progress.total_chunks,
            files = self.file_map.len(),
            total = %prettify_bytes(progress.total_bytes),
            "Parsed manifest"
        );

        Ok(())
    }

    pub(crate) fn refresh_totals(&self) {
        let total_files = self.file_map.values()
            .filter(|entry| !entry.is_folder)
            .count();

        self.progress.set_totals(self.chunk_map.len() as u64, total_files as u64);
    }

    pub(crate) fn compute_total_bytes(&self) {
        let total = self.chunk_map.values()
            .map(|chunk| chunk.compressed_size as u64)
            .sum();

        self.progress.set_total_bytes(total);

        tracing::debug!(total, "Recomputed total bytes from chunk map");
    }

    /// Deterministic priority order over the live chunks.
    ///
    /// Front-loads small root-level high-value files so the installation
    /// becomes partially usable early; ties break lexicographically so two
    /// runs over the same maps produce identical sequences.
    pub fn enumerate_chunks_with_file_order(&self) -> Vec<Arc<ChunkRef>> {
        let mut files = self.file_map.values()
            .map(|entry| (file_priority(&entry.path), entry))
            .collect::<Vec<_>>();

        files.sort_by(|(pa, a), (pb, b)| pb.cmp(pa).then_with(|| a.path.cmp(&b.path)));

        let mut added = HashSet::new();
        let mut chunks = Vec::with_capacity(self.chunk_map.len());

        for (_, entry) in files {
            for chunk_id in &entry.chunk_ids {
                if added.insert(chunk_id.as_str()) {
                    if let Some(chunk) = self.chunk_map.get(chunk_id) {
                        chunks.push(Arc::clone(chunk));
                    }
                }
            }
        }

        tracing::info!(
            chunks = chunks.len(),
            files = self.file_map.len(),
            "Enumerated chunks in priority order"
        );

        chunks
    }

    /// Spawn the pipeline stages. Returns once every stage is running
    pub fn start(&mut self) -> Result<(), InstallerError> {
        tracing::info!("Starting installation pipeline");

        let config = self.config.clone();

        let downloader = Arc::new(Downloader::new(
            config.concurrent_downloads,
            config.download_chan_size,
            config.max_chunk_download_retries
        )?);

        let decompressor = Arc::new(Decompressor::new(
            config.concurrent_decompressions,
            config.decompress_chan_size
        ));

        // Verifier pools follow the download concurrency knob
        let chunk_verifier = Arc::new(Verifier::new(
            config.concurrent_downloads,
            config.verify_chan_size,
            true
        ));

        let file_verifier = Arc::new(Verifier::new(
            config.concurrent_downloads,
            config.verify_chan_size,
            false
        ));

        let assembler = Arc::new(Assembler::new(&self.staging_dir, self.queue_size));

        let ordered = self.enumerate_chunks_with_file_order();

        if ordered.len() != self.chunk_map.len() {
            logging::fatal("Chunk enumeration mismatch, ordered list does not cover the chunk map");
        }

        let queue = Arc::new(InputQueue::new());

        let context = Arc::new(PipelineContext {
            game_dir: self.game_dir.clone(),
            staging_dir: self.staging_dir.clone(),
            chunk_map: self.chunk_map.clone(),
            file_map: self.file_map.clone(),
            progress: Arc::clone(&self.progress),
            queue: Arc::clone(&queue)
        });

        let (input_tx, input_rx) = bounded(self.queue_size);

        self.spawn("enqueue-chunks", {
            let context = Arc::clone(&context);

            move || stages::enqueue_chunks(context, ordered, input_tx)
        })?;

        self.spawn("download-chunks", {
            let context = Arc::clone(&context);
            let downloader = Arc::clone(&downloader);

            move || stages::download_chunks(context, input_rx, downloader)
        })?;

        self.spawn("decompress-chunks", {
            let context = Arc::clone(&context);
            let downloader = Arc::clone(&downloader);
            let decompressor = Arc::clone(&decompressor);

            move || stages::decompress_chunks(context, downloader, decompressor)
        })?;

        self.spawn("verify-chunks", {
            let context = Arc::clone(&context);
            let decompressor = Arc::clone(&decompressor);
            let chunk_verifier = Arc::clone(&chunk_verifier);

            move || stages::verify_chunks(context, decompressor, chunk_verifier)
        })?;

        self.spawn("assemble-chunks", {
            let context = Arc::clone(&context);
            let chunk_verifier = Arc::clone(&chunk_verifier);
            let assembler = Arc::clone(&assembler);

            move || stages::assemble_chunks(context, chunk_verifier, assembler)
        })?;

        self.spawn("verify-files", {
            let context = Arc::clone(&context);
            let assembler = Arc::clone(&assembler);
            let file_verifier = Arc::clone(&file_verifier);

            move || stages::verify_files(context, assembler, file_verifier)
        })?;

        self.spawn("move-files", {
            let context = Arc::clone(&context);
            let file_verifier = Arc::clone(&file_verifier);

            move || stages::move_files(context, file_verifier)
        })?;

        if config.queue_length_print_interval > 0 {
            let interval = Duration::from_secs(config.queue_length_print_interval);

            self.spawn("queue-depths", {
                let context = Arc::clone(&context);

                let downloader = Arc::clone(&downloader);
                let decompressor = Arc::clone(&decompressor);
                let chunk_verifier = Arc::clone(&chunk_verifier);
                let assembler = Arc::clone(&assembler);
                let file_verifier = Arc::clone(&file_verifier);

                move || {
                    stages::report_queue_depths(
                        context,
                        downloader,
                        decompressor,
                        chunk_verifier,
                        assembler,
                        file_verifier,
                        interval
                    )
                }
            })?;
        }

        self.input_queue = Some(queue);

        self.components = Some(Components {
            downloader,
            decompressor,
            chunk_verifier,
            assembler,
            file_verifier
        });

        tracing::info!("All pipeline stages started");

        Ok(())
    }

    fn spawn(
        &mut self,
        name: &str,
        task: impl FnOnce() + Send + 'static
    ) -> Result<(), InstallerError> {
        let handle = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(task)?;

        self.tasks.push(handle);

        Ok(())
    }

    /// Block until the pipeline has shut down
    pub fn wait(&mut self) {
        tracing::info!("Waiting for installation to complete");

        for task in self.tasks.drain(..) {
            let _ = task.join();
        }

        self.components = None;
        self.input_queue = None;

        tracing::info!("Installation pipeline stopped");
    }

    /// Close the input queue and stop every component in topological order.
    /// Safe to call more than once, and a no-op after completion
    pub fn stop(&mut self) {
        tracing::info!("Stopping installation pipeline");

        if let Some(queue) = &self.input_queue {
            queue.close();
        }

        if let Some(components) = &self.components {
            components.downloader.stop();
            components.decompressor.stop();
            components.chunk_verifier.stop();
            components.assembler.stop();
            components.file_verifier.stop();
        }

        self.wait();
    }
}

fn file_priority(path: &str) -> i32 {
    const PRIORITY_MARKERS: [&str; 4] = ["globalgame", "pkg_version", "data.unity3d", "exe"];

    let mut priority = 0;

    for marker in PRIORITY_MARKERS {
        if path.contains(marker) {
            priority += 10000;
        }
    }

    if path.contains('/') {
        priority -= 100;
    }

    priority
}
