//! File Transfer Subprotocol — upload/download handshake layered on the
//! chat connection.
//!
//! Grounded on `original_source/file.c`/`server.c` for the basic shape
//! (binary read/write loop, `__END__` trailer), but implements the
//! size-prefixed download framing `spec.md` §9 mandates in place of the
//! original's trailer-scanning, which corrupts any payload that happens
//! to contain the bytes `__END__`.

use crate::error::ChatError;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

pub const END_MARKER: &[u8] = b"__END__";
const READY_TOKEN: &str = "READY";
const TRANSFER_CHUNK: usize = 8192;

/// Reject filenames containing `..` or a path separator.
pub fn validate_filename(filename: &str) -> Result<(), ChatError> {
    if filename.is_empty() || filename.contains("..") || filename.contains('/') || filename.contains('\\') {
        return Err(ChatError::InvalidFilename(format!(
            "invalid filename: {filename}"
        )));
    }
    Ok(())
}

/// Receive a file over `stream` and write it to `<uploads_dir>/<filename>`.
///
/// Writes to a temporary path first and renames into place only once the
/// `__END__` trailer is observed, so a disconnect mid-transfer never
/// leaves a truncated file visible under its final name (`spec.md` §5:
/// "a disconnect abandons the transfer and the partial file ... is
/// deleted").
pub async fn upload(stream: &mut TcpStream, uploads_dir: &Path, filename: &str) -> Result<(), ChatError> {
    validate_filename(filename)?;
    tokio::fs::create_dir_all(uploads_dir).await?;
    set_private_mode(uploads_dir).await;

    let final_path = uploads_dir.join(filename);
    let tmp_path = uploads_dir.join(format!(".{filename}.part"));

    let mut file = File::create(&tmp_path).await?;
    let mut buf = vec![0u8; TRANSFER_CHUNK];

    let result = async {
        loop {
            let n = stream.read(&mut buf).await?;
            if n == 0 {
                return Err(ChatError::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "connection closed during upload",
                )));
            }
            if n == END_MARKER.len() && &buf[..n] == END_MARKER {
                break;
            }
            file.write_all(&buf[..n]).await?;
        }
        file.flush().await?;
        Ok(())
    }
    .await;

    match result {
        Ok(()) => {
            tokio::fs::rename(&tmp_path, &final_path).await?;
            Ok(())
        }
        Err(e) => {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            Err(e)
        }
    }
}

/// Send `<uploads_dir>/<filename>` to the client: header, wait for
/// `READY`, exactly `size` bytes, the `__END__` trailer, then a
/// confirmation line (sent by the caller once this returns).
pub async fn download(stream: &mut TcpStream, uploads_dir: &Path, filename: &str) -> Result<(), ChatError> {
    validate_filename(filename)?;
    let path: PathBuf = uploads_dir.join(filename);

    let mut file = match File::open(&path).await {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ChatError::NotFound(format!("file not found: {filename}")));
        }
        Err(e) => return Err(ChatError::Io(e)),
    };
    let size = file.metadata().await?.len();

    let header = format!("READY_TO_SEND:{filename}:{size}\0");
    stream.write_all(header.as_bytes()).await?;

    let mut ack = vec![0u8; 32];
    let n = stream.read(&mut ack).await?;
    if n == 0 {
        return Err(ChatError::Io(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "connection closed awaiting READY",
        )));
    }
    let token = String::from_utf8_lossy(&ack[..n]);
    if token.trim() != READY_TOKEN {
        return Err(ChatError::ProtocolViolation(format!(
            "expected {READY_TOKEN}, got {:?}",
            token.trim()
        )));
    }

    let mut buf = vec![0u8; TRANSFER_CHUNK];
    let mut remaining = size;
    while remaining > 0 {
        let take = remaining.min(buf.len() as u64) as usize;
        let n = file.read(&mut buf[..take]).await?;
        if n == 0 {
            break;
        }
        stream.write_all(&buf[..n]).await?;
        remaining -= n as u64;
    }

    stream.write_all(END_MARKER).await?;
    Ok(())
}

#[cfg(unix)]
async fn set_private_mode(dir: &Path) {
    use std::os::unix::fs::PermissionsExt;
    if let Ok(metadata) = tokio::fs::metadata(dir).await {
        let mut perms = metadata.permissions();
        perms.set_mode(0o700);
        let _ = tokio::fs::set_permissions(dir, perms).await;
    }
}

#[cfg(not(unix))]
async fn set_private_mode(_dir: &Path) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_parent_traversal() {
        assert!(validate_filename("../etc/passwd").is_err());
    }

    #[test]
    fn rejects_path_separators() {
        assert!(validate_filename("a/b").is_err());
        assert!(validate_filename("a\\b").is_err());
    }

    #[test]
    fn rejects_empty_filename() {
        assert!(validate_filename("").is_err());
    }

    #[test]
    fn accepts_plain_filename() {
        assert!(validate_filename("photo.bin").is_ok());
    }

    #[tokio::test]
    async fn download_reports_not_found_for_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = tokio::net::TcpStream::connect(addr).await.unwrap();
        let (mut server_stream, _) = listener.accept().await.unwrap();
        drop(client);

        let result = download(&mut server_stream, dir.path(), "missing.bin").await;
        assert!(matches!(result, Err(ChatError::NotFound(_))));
    }
}
