use std::collections::{HashMap, VecDeque};
use std::io::{BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use md5::{Digest, Md5};

use crate::api::schemas::sophon_builds::DownloadInfo;
use crate::config::Config;
use crate::manifest::{SophonChunkInfo, SophonFileInfo, SophonManifest};

pub fn md5_hex(data: &[u8]) -> String {
    format!("{:x}", Md5::digest(data))
}

/// Small pools keep the test thread count reasonable
pub fn test_config() -> Config {
    Config {
        max_chunk_download_retries: 2,
        concurrent_downloads: 4,
        concurrent_decompressions: 2,
        download_chan_size: 8,
        verify_chan_size: 8,
        decompress_chan_size: 8,
        queue_length_print_interval: 0,
        ..Config::default()
    }
}

pub fn download_info(url_prefix: String) -> DownloadInfo {
    DownloadInfo {
        encryption: 0,
        compression: 1,
        url_prefix,
        url_suffix: String::new()
    }
}

/// One file entry whose chunks are laid out back to back from offset 0.
/// `chunks` maps chunk id to decompressed content.
pub fn manifest_file(path: &str, chunks: &[(&str, &[u8])]) -> SophonFileInfo {
    let mut file = SophonFileInfo::new();
    let mut contents = Vec::new();

    for (chunk_id, chunk_content) in chunks {
        let mut chunk = SophonChunkInfo::new();

        chunk.chunk_id = chunk_id.to_string();
        chunk.md5 = md5_hex(chunk_content);
        chunk.compressed_size = zstd::encode_all(*chunk_content, 0).unwrap().len() as u32;
        chunk.uncompressed_size = chunk_content.len() as u32;
        chunk.offset = contents.len() as u64;

        file.chunks.push(chunk);

        contents.extend_from_slice(chunk_content);
    }

    file.filename = path.to_string();
    file.size = contents.len() as i32;
    file.md5 = md5_hex(&contents);

    file
}

pub fn manifest(files: Vec<SophonFileInfo>) -> SophonManifest {
    let mut manifest = SophonManifest::new();

    manifest.files = files;

    manifest
}

/// What the fixture serves for one request
pub enum Served {
    Body(Vec<u8>),
    Status(u16)
}

impl Served {
    pub fn compressed(content: &[u8]) -> Self {
        Self::Body(zstd::encode_all(content, 0).unwrap())
    }
}

struct ServerState {
    // per-chunk responses popped in order, the last one repeats
    responses: HashMap<String, VecDeque<Served>>,
    hits: HashMap<String, usize>
}

/// Tiny single-purpose HTTP fixture serving chunks under `/chunks/<id>`
pub struct ChunkServer {
    address: SocketAddr,
    state: Arc<Mutex<ServerState>>,
    shutdown: Arc<AtomicBool>,
    listener: Option<JoinHandle<()>>
}

impl ChunkServer {
    pub fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap();

        let state = Arc::new(Mutex::new(ServerState {
            responses: HashMap::new(),
            hits: HashMap::new()
        }));

        let shutdown = Arc::new(AtomicBool::new(false));

        let handle = {
            let state = Arc::clone(&state);
            let shutdown = Arc::clone(&shutdown);

            std::thread::spawn(move || {
                for stream in listener.incoming() {
                    if shutdown.load(Ordering::Acquire) {
                        break;
                    }

                    let Ok(stream) = stream else {
                        continue;
                    };

                    let state = Arc::clone(&state);

                    std::thread::spawn(move || handle_request(stream, state));
                }
            })
        };

        Self {
            address,
            state,
            shutdown,
            listener: Some(handle)
        }
    }

    pub fn url_prefix(&self) -> String {
        format!("http://{}/chunks", self.address)
    }

    /// Register the responses served for a chunk, one per request in order;
    /// the last entry keeps being served once the queue runs dry
    pub fn serve(&self, chunk_id: &str, responses: Vec<Served>) {
        self.state.lock().unwrap()
            .responses
            .insert(chunk_id.to_string(), responses.into());
    }

    pub fn serve_chunk(&self, chunk_id: &str, content: &[u8]) {
        self.serve(chunk_id, vec![Served::compressed(content)]);
    }

    pub fn hits(&self, chunk_id: &str) -> usize {
        self.state.lock().unwrap()
            .hits
            .get(chunk_id)
            .copied()
            .unwrap_or(0)
    }
}

impl Drop for ChunkServer {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Release);

        // unblock the accept loop
        let _ = TcpStream::connect(self.address);

        if let Some(listener) = self.listener.take() {
            let _ = listener.join();
        }
    }
}

fn handle_request(stream: TcpStream, state: Arc<Mutex<ServerState>>) {
    let mut reader = BufReader::new(stream);

    let mut request_line = String::new();

    if reader.read_line(&mut request_line).is_err() {
        return;
    }

    // drain the remaining headers
    loop {
        let mut line = String::new();

        match reader.read_line(&mut line) {
            Ok(_) if line == "\r\n" || line.is_empty() => break,
            Ok(_) => continue,
            Err(_) => return
        }
    }

    let chunk_id = request_line
        .split_whitespace()
        .nth(1)
        .and_then(|path| path.strip_prefix("/chunks/"))
        .unwrap_or("")
        .to_string();

    let response = {
        let mut state = state.lock().unwrap();

        *state.hits.entry(chunk_id.clone()).or_insert(0) += 1;

        match state.responses.get_mut(&chunk_id) {
            Some(responses) if responses.len() > 1 => responses.pop_front(),

            Some(responses) => responses.front().map(|served| match served {
                Served::Body(body) => Served::Body(body.clone()),
                Served::Status(status) => Served::Status(*status)
            }),

            None => None
        }
    };

    let mut stream = reader.into_inner();

    match response {
        Some(Served::Body(body)) => {
            let header = format!(
                "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                body.len()
            );

            let _ = stream.write_all(header.as_bytes());
            let _ = stream.write_all(&body);
        }

        Some(Served::Status(status)) => {
            let header = format!(
                "HTTP/1.1 {status} ERROR\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
            );

            let _ = stream.write_all(header.as_bytes());
        }

        None => {
            let _ = stream.write_all(
                b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
            );
        }
    }

    let _ = stream.flush();
}

/// Regular files left anywhere under a directory tree
pub fn files_under(dir: &std::path::Path) -> Vec<std::path::PathBuf> {
    let mut found = Vec::new();

    let Ok(entries) = std::fs::read_dir(dir) else {
        return found;
    };

    for entry in entries.flatten() {
        let path = entry.path();

        if path.is_dir() {
            found.extend(files_under(&path));
        }
        else {
            found.push(path);
        }
    }

    found
}
