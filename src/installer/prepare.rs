use std::collections::HashMap;
use std::fs::{DirBuilder, File, OpenOptions};
use std::io::ErrorKind;
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt};
use std::sync::Arc;

use crate::prettify_bytes::prettify_bytes;
use crate::verifier::Verifier;

use super::{ChunkRef, FileEntry, Installer, InstallerError};

impl Installer {
    /// Reset the staging directory and prune every file that already exists
    /// under the game root with the right digest.
    ///
    /// Pruning removes the file's destinations from each chunk it referenced;
    /// chunks left without destinations are dropped entirely. Stale files
    /// failing verification are deleted so the pipeline re-downloads them.
    pub fn prepare(&mut self) -> Result<(), InstallerError> {
        tracing::info!("Clearing staging directory");

        match std::fs::remove_dir_all(&self.staging_dir) {
            Ok(()) => (),
            Err(err) if err.kind() == ErrorKind::NotFound => (),
            Err(err) => return Err(err.into())
        }

        DirBuilder::new()
            .recursive(true)
            .mode(0o755)
            .create(&self.staging_dir)?;

        // No subscriber drains the output while jobs are queued, so the
        // queue has to hold every result
        let verifier = Verifier::<Arc<FileEntry>>::new(
            self.config.concurrent_downloads,
            self.file_map.len() + 10,
            false
        );

        let output = verifier.output();
        let mut jobs = 0usize;

        for entry in self.file_map.values() {
            if entry.is_folder {
                tracing::debug!(file = %entry.path, "Skipping directory entry");

                continue;
            }

            let absolute = self.game_dir.join(&*entry.path);

            match std::fs::metadata(&absolute) {
                Err(err) if err.kind() == ErrorKind::NotFound => {
                    tracing::debug!(file = %entry.path, "File not present, will download");

                    continue;
                }

                Err(err) => return Err(err.into()),

                Ok(metadata) if metadata.is_dir() => {
                    tracing::debug!(file = %entry.path, "Skipping directory entry");

                    continue;
                }

                Ok(_) => {
                    let file = File::open(&absolute)?;

                    verifier.enqueue(
                        entry.path.to_string(),
                        Box::new(file),
                        entry.md5.clone(),
                        Arc::clone(entry)
                    );

                    jobs += 1;
                }
            }
        }

        for _ in 0..jobs {
            let Ok(out) = output.recv() else {
                break;
            };

            let entry = out.payload;
            let absolute = self.game_dir.join(&*entry.path);

            if out.succeeded {
                tracing::debug!(file = %entry.path, "Existing file verified, skipping download");

                prune_file_destinations(&mut self.chunk_map, &entry);
                self.file_map.remove(&entry.path);
            }
            else {
                tracing::warn!(file = %entry.path, "File failed verification, deleting");

                std::fs::remove_file(&absolute)?;
            }
        }

        verifier.stop();

        self.create_chunkless_files()?;

        self.refresh_totals();
        self.compute_total_bytes();

        let progress = self.progress.snapshot();

        tracing::info!(
            chunks = progress.total_chunks,
            files = progress.total_files,
            remaining = %prettify_bytes(progress.total_bytes),
            "Prepare complete"
        );

        Ok(())
    }

    /// Regular entries with no chunk payload never travel the pipeline, so
    /// they are written out here and dropped from the map
    fn create_chunkless_files(&mut self) -> Result<(), InstallerError> {
        let chunkless = self.file_map.values()
            .filter(|entry| !entry.is_folder && entry.chunk_ids.is_empty())
            .map(|entry| Arc::clone(&entry.path))
            .collect::<Vec<_>>();

        for path in chunkless {
            let absolute = self.game_dir.join(&*path);

            if let Some(parent) = absolute.parent() {
                DirBuilder::new()
                    .recursive(true)
                    .mode(0o755)
                    .create(parent)?;
            }

            OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .mode(0o644)
                .open(&absolute)?;

            tracing::debug!(file = %path, "Created empty file");

            self.file_map.remove(&path);
        }

        Ok(())
    }
}

pub(super) fn prune_file_destinations(
    chunk_map: &mut HashMap<String, Arc<ChunkRef>>,
    entry: &FileEntry
) {
    for chunk_id in &entry.chunk_ids {
        let Some(chunk) = chunk_map.get_mut(chunk_id) else {
            continue;
        };

        let chunk = Arc::make_mut(chunk);

        chunk.destinations.retain(|dest| dest.file_path != entry.path);

        if chunk.destinations.is_empty() {
            chunk_map.remove(chunk_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use md5::{Digest, Md5};

    use crate::config::Config;
    use crate::manifest::SophonManifest;

    use super::super::tests::{chunk_download_info, manifest_chunk, manifest_file};
    use super::*;

    fn md5_hex(data: &[u8]) -> String {
        format!("{:x}", Md5::digest(data))
    }

    /// Manifest with `a.bin = [X, Y]` and `b.bin = [Y, Z]`, where chunk
    /// contents are the chunk id repeated four times
    fn shared_chunk_manifest() -> SophonManifest {
        let mut manifest = SophonManifest::new();

        let mut file_a = manifest_file(
            "a.bin",
            vec![manifest_chunk("X", 4, 4, 0), manifest_chunk("Y", 4, 4, 4)]
        );
        file_a.md5 = md5_hex(b"XXXXYYYY");

        let mut file_b = manifest_file(
            "b.bin",
            vec![manifest_chunk("Y", 4, 4, 0), manifest_chunk("Z", 4, 4, 4)]
        );
        file_b.md5 = md5_hex(b"YYYYZZZZ");

        manifest.files.push(file_a);
        manifest.files.push(file_b);

        manifest
    }

    #[test]
    fn verified_file_is_pruned_from_both_maps() {
        let game = tempfile::tempdir().unwrap();
        let staging = tempfile::tempdir().unwrap();

        std::fs::write(game.path().join("a.bin"), b"XXXXYYYY").unwrap();

        let mut installer = Installer::new(
            game.path(),
            staging.path().join("staging"),
            32,
            Config::default()
        );

        installer.parse_manifest(&shared_chunk_manifest(), &chunk_download_info()).unwrap();
        installer.prepare().unwrap();

        // a.bin verified: X gone entirely, Y keeps only b.bin's destination
        assert!(!installer.files().contains_key("a.bin"));
        assert!(installer.files().contains_key("b.bin"));

        assert!(!installer.chunks().contains_key("X"));

        let y = &installer.chunks()["Y"];

        assert_eq!(y.destinations.len(), 1);
        assert_eq!(&*y.destinations[0].file_path, "b.bin");
        assert_eq!(y.destinations[0].offset, 0);

        let z = &installer.chunks()["Z"];

        assert_eq!(z.destinations.len(), 1);
        assert_eq!(z.destinations[0].offset, 4);

        let progress = installer.progress();

        assert_eq!(progress.total_chunks, 2);
        assert_eq!(progress.total_files, 1);
        assert_eq!(progress.total_bytes, 8);
    }

    #[test]
    fn stale_file_is_deleted_for_redownload() {
        let game = tempfile::tempdir().unwrap();
        let staging = tempfile::tempdir().unwrap();

        std::fs::write(game.path().join("a.bin"), b"corrupted").unwrap();

        let mut installer = Installer::new(
            game.path(),
            staging.path().join("staging"),
            32,
            Config::default()
        );

        installer.parse_manifest(&shared_chunk_manifest(), &chunk_download_info()).unwrap();
        installer.prepare().unwrap();

        assert!(!game.path().join("a.bin").exists());
        assert!(installer.files().contains_key("a.bin"));
        assert_eq!(installer.chunks().len(), 3);
    }

    #[test]
    fn staging_directory_is_recreated_fresh() {
        let game = tempfile::tempdir().unwrap();
        let staging_root = tempfile::tempdir().unwrap();
        let staging = staging_root.path().join("staging");

        std::fs::create_dir_all(&staging).unwrap();
        std::fs::write(staging.join("leftover.bin"), b"junk").unwrap();

        let mut installer = Installer::new(game.path(), &staging, 32, Config::default());

        installer.parse_manifest(&SophonManifest::new(), &chunk_download_info()).unwrap();
        installer.prepare().unwrap();

        assert!(staging.exists());
        assert!(!staging.join("leftover.bin").exists());
    }

    #[test]
    fn prepare_twice_on_complete_tree_is_a_noop() {
        let game = tempfile::tempdir().unwrap();
        let staging = tempfile::tempdir().unwrap();

        std::fs::write(game.path().join("a.bin"), b"XXXXYYYY").unwrap();
        std::fs::write(game.path().join("b.bin"), b"YYYYZZZZ").unwrap();

        let mut installer = Installer::new(
            game.path(),
            staging.path().join("staging"),
            32,
            Config::default()
        );

        installer.parse_manifest(&shared_chunk_manifest(), &chunk_download_info()).unwrap();
        installer.prepare().unwrap();

        let progress = installer.progress();

        assert_eq!(progress.total_chunks, 0);
        assert_eq!(progress.total_files, 0);
        assert_eq!(progress.total_bytes, 0);
        assert!(installer.chunks().is_empty());
        assert!(installer.files().is_empty());
    }

    #[test]
    fn chunkless_regular_file_is_created_directly() {
        let game = tempfile::tempdir().unwrap();
        let staging = tempfile::tempdir().unwrap();

        let mut manifest = SophonManifest::new();
        let mut empty = manifest_file("logs/empty.txt", vec![]);
        empty.md5 = md5_hex(b"");

        manifest.files.push(empty);

        let mut installer = Installer::new(
            game.path(),
            staging.path().join("staging"),
            32,
            Config::default()
        );

        installer.parse_manifest(&manifest, &chunk_download_info()).unwrap();
        installer.prepare().unwrap();

        assert!(game.path().join("logs/empty.txt").exists());
        assert!(installer.files().is_empty());
        assert_eq!(installer.progress().total_files, 0);
    }
}
