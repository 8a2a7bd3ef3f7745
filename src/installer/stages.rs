use std::collections::{HashMap, HashSet};
use std::fs::{DirBuilder, File};
use std::io::Cursor;
use std::os::unix::fs::DirBuilderExt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};

use crate::assembler::Assembler;
use crate::decompressor::Decompressor;
use crate::downloader::Downloader;
use crate::logging;
use crate::verifier::Verifier;

use super::queue::InputQueue;
use super::{ChunkRef, FileEntry, Progress};

/// State shared by every dispatcher stage. The maps are read-only while the
/// pipeline runs; only `progress` is mutated, under its own guard.
pub(super) struct PipelineContext {
    pub game_dir: PathBuf,
    pub staging_dir: PathBuf,
    pub chunk_map: HashMap<String, Arc<ChunkRef>>,
    pub file_map: HashMap<Arc<str>, Arc<FileEntry>>,
    pub progress: Arc<Progress>,
    pub queue: Arc<InputQueue>
}

/// Push the priority-ordered chunk list onto the input channel, then keep
/// merging re-injected chunks until the queue closes. Dropping the sender is
/// what closes the input channel for the download stage.
pub(super) fn enqueue_chunks(
    context: Arc<PipelineContext>,
    ordered: Vec<Arc<ChunkRef>>,
    input_tx: Sender<Arc<ChunkRef>>
) {
    for chunk in ordered {
        if context.queue.is_closed() || input_tx.send(chunk).is_err() {
            return;
        }
    }

    while let Some(chunk) = context.queue.next_retry() {
        if input_tx.send(chunk).is_err() {
            return;
        }
    }
}

/// Drain the input channel into the downloader pool
pub(super) fn download_chunks(
    context: Arc<PipelineContext>,
    input_rx: Receiver<Arc<ChunkRef>>,
    downloader: Arc<Downloader<Arc<ChunkRef>>>
) {
    tracing::info!("Starting chunk download");

    for chunk in input_rx.iter() {
        if context.queue.is_closed() {
            continue;
        }

        downloader.enqueue(chunk.url.clone(), chunk);
    }

    downloader.stop();
}

/// Feed downloaded bodies into the decompressor; a failed download sends the
/// chunk back to the entry queue
pub(super) fn decompress_chunks(
    context: Arc<PipelineContext>,
    downloader: Arc<Downloader<Arc<ChunkRef>>>,
    decompressor: Arc<Decompressor<Arc<ChunkRef>>>
) {
    tracing::info!("Starting chunk decompression");

    for out in downloader.output().iter() {
        let chunk = out.payload;

        if context.queue.is_closed() {
            continue;
        }

        if !out.succeeded {
            tracing::warn!(chunk_id = %chunk.chunk_id, "Download failed, re-enqueueing");

            context.queue.reinject(chunk);

            continue;
        }

        if !chunk.is_compressed {
            logging::fatal(format!(
                "Uncompressed chunks are not supported (chunk {})",
                chunk.chunk_id
            ));
        }

        let Some(body) = out.body else {
            logging::fatal(format!(
                "Downloader returned no body for chunk {}",
                chunk.chunk_id
            ));
        };

        let compressed_size = chunk.compressed_size as u64;

        decompressor.enqueue(body, Arc::clone(&chunk));

        context.progress.add_downloaded_chunk(compressed_size);
    }

    decompressor.stop();
}

/// Submit decompressed streams to the chunk verifier; a decoder failure
/// re-enqueues the chunk and restores its share of `total_bytes`
pub(super) fn verify_chunks(
    context: Arc<PipelineContext>,
    decompressor: Arc<Decompressor<Arc<ChunkRef>>>,
    chunk_verifier: Arc<Verifier<Arc<ChunkRef>>>
) {
    tracing::info!("Starting chunk verification");

    for out in decompressor.output().iter() {
        let chunk = out.payload;

        if context.queue.is_closed() {
            continue;
        }

        if !out.succeeded {
            tracing::warn!(chunk_id = %chunk.chunk_id, "Decompression failed, re-enqueueing");

            context.progress.restore_total_bytes(chunk.compressed_size as u64);
            context.queue.reinject(chunk);

            continue;
        }

        let Some(content) = out.content else {
            logging::fatal(format!(
                "Decompressor returned no stream for chunk {}",
                chunk.chunk_id
            ));
        };

        chunk_verifier.enqueue(
            chunk.chunk_id.clone(),
            content,
            chunk.md5.clone(),
            Arc::clone(&chunk)
        );

        context.progress.inc_decompressed_chunks();
    }

    chunk_verifier.stop();
}

/// Fan verified chunk bytes out to every destination. This is the
/// deduplication point: the buffer is read once and replayed per destination
pub(super) fn assemble_chunks(
    context: Arc<PipelineContext>,
    chunk_verifier: Arc<Verifier<Arc<ChunkRef>>>,
    assembler: Arc<Assembler<Arc<ChunkRef>>>
) {
    tracing::info!("Starting chunk assembly");

    for out in chunk_verifier.output().iter() {
        let chunk = out.payload;

        if context.queue.is_closed() {
            continue;
        }

        if !out.succeeded {
            tracing::warn!(chunk_id = %chunk.chunk_id, "Verification failed, re-enqueueing");

            context.progress.restore_total_bytes(chunk.compressed_size as u64);
            context.queue.reinject(chunk);

            continue;
        }

        let Some(content) = out.content else {
            logging::fatal(format!(
                "Chunk verifier returned no content for chunk {}",
                chunk.chunk_id
            ));
        };

        context.progress.inc_verified_chunks();

        let content: Arc<[u8]> = content.into();

        for destination in &chunk.destinations {
            assembler.enqueue(
                destination.file_path.to_string(),
                destination.offset,
                chunk.chunk_id.clone(),
                Box::new(Cursor::new(Arc::clone(&content))),
                Arc::clone(&chunk)
            );
        }
    }

    assembler.stop();
}

/// Track per-file write completion and hand finished files to the file
/// verifier.
///
/// A file is complete when every distinct `(chunk, offset)` pair derivable
/// from its entry has been written. Tracking state is dropped as soon as the
/// file is submitted, so a later verification failure re-accumulates from
/// zero once the mover re-enqueues the file's chunks.
pub(super) fn verify_files(
    context: Arc<PipelineContext>,
    assembler: Arc<Assembler<Arc<ChunkRef>>>,
    file_verifier: Arc<Verifier<Arc<FileEntry>>>
) {
    tracing::info!("Starting file verification");

    let mut seen: HashMap<Arc<str>, HashSet<(String, u64)>> = HashMap::new();
    let mut expected: HashMap<Arc<str>, usize> = HashMap::new();

    for out in assembler.output().iter() {
        let chunk = out.payload;

        if context.queue.is_closed() {
            continue;
        }

        if !out.succeeded {
            tracing::warn!(
                chunk_id = %chunk.chunk_id,
                file = %out.file_path,
                "Assembly failed, re-enqueueing for this file only"
            );

            let Some(destination) = chunk.destinations.iter().find(|dest| {
                &*dest.file_path == out.file_path.as_str() && dest.offset == out.offset
            }) else {
                logging::fatal(format!(
                    "Chunk {} has no destination {} at offset {}",
                    chunk.chunk_id, out.file_path, out.offset
                ));
            };

            context.progress.restore_total_bytes(chunk.compressed_size as u64);
            context.queue.reinject(chunk.with_single_destination(destination.clone()));

            continue;
        }

        context.progress.inc_assembled_chunks();

        let Some(entry) = context.file_map.get(out.file_path.as_str()) else {
            logging::fatal(format!("Assembled chunk for unknown file {}", out.file_path));
        };

        let path = Arc::clone(&entry.path);

        let seen_writes = seen.entry(Arc::clone(&path)).or_default();
        seen_writes.insert((out.chunk_id, out.offset));

        let wanted = *expected
            .entry(Arc::clone(&path))
            .or_insert_with(|| entry.distinct_chunk_count());

        if seen_writes.len() < wanted {
            continue;
        }

        seen.remove(&path);

        let staging_path = context.staging_dir.join(&*path);

        tracing::info!(file = %path, "File complete, verifying");

        match File::open(&staging_path) {
            Ok(file) => {
                file_verifier.enqueue(
                    path.to_string(),
                    Box::new(file),
                    entry.md5.clone(),
                    Arc::clone(entry)
                );
            }

            Err(err) => {
                tracing::error!(file = %path, %err, "Failed to open completed file, restarting it");

                let _ = std::fs::remove_file(&staging_path);

                restart_file_chunks(&context, entry);
            }
        }
    }

    file_verifier.stop();
}

/// Rename verified files from staging into the game root and close the entry
/// queue once every file made it
pub(super) fn move_files(context: Arc<PipelineContext>, file_verifier: Arc<Verifier<Arc<FileEntry>>>) {
    tracing::info!("Starting file move to game directory");

    maybe_close(&context);

    for out in file_verifier.output().iter() {
        let entry = out.payload;

        let staging_path = context.staging_dir.join(&*entry.path);
        let final_path = context.game_dir.join(&*entry.path);

        if !out.succeeded {
            tracing::error!(
                file = %entry.path,
                "File verification failed, re-enqueueing all of its chunks"
            );

            let _ = std::fs::remove_file(&staging_path);

            restart_file_chunks(&context, &entry);

            continue;
        }

        tracing::info!(file = %entry.path, "File verified successfully");

        if let Some(parent) = final_path.parent() {
            let created = DirBuilder::new()
                .recursive(true)
                .mode(0o755)
                .create(parent);

            if let Err(err) = created {
                logging::fatal(format!(
                    "Failed to create directory for final file location {parent:?}: {err}"
                ));
            }
        }

        if let Err(err) = std::fs::rename(&staging_path, &final_path) {
            logging::fatal(format!(
                "Failed to move file from staging to final location {staging_path:?} -> {final_path:?}: {err}"
            ));
        }

        context.progress.inc_verified_files();

        maybe_close(&context);
    }
}

fn maybe_close(context: &PipelineContext) {
    let progress = context.progress.snapshot();

    if progress.verified_files >= progress.total_files && context.queue.close() {
        tracing::info!("All files verified, closing input queue");
    }
}

/// Re-enqueue one single-destination clone per `(chunk, offset)` destination
/// pointing at the file, restoring `total_bytes` per clone
fn restart_file_chunks(context: &PipelineContext, entry: &Arc<FileEntry>) {
    let mut distinct = HashSet::new();

    for chunk_id in &entry.chunk_ids {
        if !distinct.insert(chunk_id.as_str()) {
            continue;
        }

        let Some(chunk) = context.chunk_map.get(chunk_id) else {
            logging::fatal(format!(
                "Chunk {chunk_id} referenced by {} is not in the chunk map",
                entry.path
            ));
        };

        let mut found = false;

        for destination in &chunk.destinations {
            if destination.file_path != entry.path {
                continue;
            }

            found = true;

            context.progress.restore_total_bytes(chunk.compressed_size as u64);
            context.queue.reinject(chunk.with_single_destination(destination.clone()));
        }

        if !found {
            logging::fatal(format!(
                "Offset not found for file {} in chunk {chunk_id}",
                entry.path
            ));
        }
    }
}

/// Periodic queue-depth report, useful when a run looks stalled
#[allow(clippy::too_many_arguments)]
pub(super) fn report_queue_depths(
    context: Arc<PipelineContext>,
    downloader: Arc<Downloader<Arc<ChunkRef>>>,
    decompressor: Arc<Decompressor<Arc<ChunkRef>>>,
    chunk_verifier: Arc<Verifier<Arc<ChunkRef>>>,
    assembler: Arc<Assembler<Arc<ChunkRef>>>,
    file_verifier: Arc<Verifier<Arc<FileEntry>>>,
    interval: Duration
) {
    loop {
        if context.queue.wait_closed(interval) {
            return;
        }

        tracing::debug!(
            retries = context.queue.retry_backlog(),
            downloader = downloader.backlog(),
            decompressor = decompressor.backlog(),
            chunk_verifier = chunk_verifier.backlog(),
            assembler = assembler.backlog(),
            file_verifier = file_verifier.backlog(),
            "Queue depths"
        );
    }
}
