//! Archive content hashes used to re-identify a backup on restore.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use md5::{Digest as _, Md5};
use sha2::Sha256;

const READ_BUFFER: usize = 64 * 1024;

/// SHA-256 of a file as lowercase hex.
pub fn sha256_file(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; READ_BUFFER];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// [`sha256_file`] on the blocking pool.
pub async fn sha256_file_async(path: &Path) -> io::Result<String> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || sha256_file(&path))
        .await
        .map_err(io::Error::other)?
}

/// Multipart MD5 of a file, as produced for archives of older releases.
///
/// A file that fits in one chunk hashes to its plain MD5. A larger file
/// hashes to the MD5 of the concatenated per-chunk digests, followed by
/// `-<chunk count>`.
pub fn chunked_md5_file(path: &Path, chunk_size: u64) -> io::Result<String> {
    if chunk_size == 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "chunk size must be greater than zero",
        ));
    }

    let mut file = File::open(path)?;
    let mut digests: Vec<u8> = Vec::new();
    let mut last = None;
    let mut chunks = 0usize;
    let mut buf = vec![0u8; READ_BUFFER];

    loop {
        let mut chunk = Md5::new();
        let mut remaining = chunk_size;
        let mut read_any = false;
        while remaining > 0 {
            let want = remaining.min(buf.len() as u64) as usize;
            let n = file.read(&mut buf[..want])?;
            if n == 0 {
                break;
            }
            chunk.update(&buf[..n]);
            remaining -= n as u64;
            read_any = true;
        }
        if !read_any && chunks > 0 {
            break;
        }
        let digest = chunk.finalize();
        digests.extend_from_slice(&digest);
        last = Some(digest);
        chunks += 1;
        if remaining > 0 {
            break;
        }
    }

    match last {
        Some(digest) if chunks == 1 => Ok(format!("{:x}", digest)),
        _ => Ok(format!("{:x}-{}", Md5::digest(&digests), chunks)),
    }
}

/// [`chunked_md5_file`] on the blocking pool.
pub async fn chunked_md5_file_async(path: &Path, chunk_size: u64) -> io::Result<String> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || chunked_md5_file(&path, chunk_size))
        .await
        .map_err(io::Error::other)?
}
