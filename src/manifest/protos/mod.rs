include!(concat!(env!("OUT_DIR"), "/protos/mod.rs"));

pub use sophon_manifest::{SophonChunkInfo, SophonFileInfo, SophonManifest};

impl SophonManifest {
    pub fn total_bytes_compressed(&self) -> u64 {
        self.files.iter()
            .flat_map(|file| &file.chunks)
            .map(|chunk| chunk.compressed_size as u64)
            .sum()
    }

    pub fn total_bytes_decompressed(&self) -> u64 {
        self.files.iter()
            .flat_map(|file| &file.chunks)
            .map(|chunk| chunk.uncompressed_size as u64)
            .sum()
    }

    pub fn total_chunks(&self) -> u64 {
        self.files.iter()
            .flat_map(|file| &file.chunks)
            .count() as u64
    }

    pub fn total_files(&self) -> u64 {
        self.files.len() as u64
    }
}
