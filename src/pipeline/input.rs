//! Input resolution: normalise a path, URL or uploaded bytes to a local PDF.
//!
//! pdfium opens files, not streams. URLs are downloaded into a `TempDir` and
//! uploaded bytes are written to a `NamedTempFile`; both are cleaned up when
//! the [`ResolvedInput`] is dropped, even if the pipeline fails halfway.
//! The `%PDF` magic bytes are checked up front so a mislabelled upload gets
//! a clear error instead of a pdfium failure.

use crate::error::ExamError;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::{NamedTempFile, TempDir};
use tracing::{debug, info};

/// A resolved local path, download or upload.
pub enum ResolvedInput {
    /// Input was already a local file.
    Local(PathBuf),
    /// Input was a URL; the `TempDir` is kept alive until processing completes.
    Downloaded { path: PathBuf, _temp_dir: TempDir },
    /// Input arrived as bytes (HTTP upload).
    Uploaded(NamedTempFile),
}

impl ResolvedInput {
    /// Get the path to the PDF file regardless of how it was resolved.
    pub fn path(&self) -> &Path {
        match self {
            ResolvedInput::Local(p) => p,
            ResolvedInput::Downloaded { path, .. } => path,
            ResolvedInput::Uploaded(tmp) => tmp.path(),
        }
    }
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Default paper name for an input: the file stem of its path or URL.
pub fn paper_name_from_input(input: &str) -> String {
    let without_query = input.split(&['?', '#'][..]).next().unwrap_or(input);
    let last = without_query
        .trim_end_matches('/')
        .rsplit(&['/', '\\'][..])
        .next()
        .unwrap_or(without_query);
    Path::new(last)
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "paper".to_string())
}

/// Resolve the input string to a local PDF file path.
pub async fn resolve_input(input: &str, timeout_secs: u64) -> Result<ResolvedInput, ExamError> {
    if is_url(input) {
        download_url(input, timeout_secs).await
    } else {
        resolve_local(input)
    }
}

/// Write uploaded PDF bytes to a managed temp file.
pub fn resolve_bytes(bytes: &[u8]) -> Result<ResolvedInput, ExamError> {
    let mut tmp = NamedTempFile::new().map_err(|e| ExamError::Internal(format!("tempfile: {e}")))?;
    check_magic(bytes, tmp.path())?;
    tmp.write_all(bytes)
        .map_err(|e| ExamError::Internal(format!("tempfile write: {e}")))?;
    Ok(ResolvedInput::Uploaded(tmp))
}

fn check_magic(bytes: &[u8], path: &Path) -> Result<(), ExamError> {
    if bytes.len() < 4 || &bytes[..4] != b"%PDF" {
        let mut magic = [0u8; 4];
        let n = bytes.len().min(4);
        magic[..n].copy_from_slice(&bytes[..n]);
        return Err(ExamError::NotAPdf {
            path: path.to_path_buf(),
            magic,
        });
    }
    Ok(())
}

/// Resolve a local file path, validating existence and PDF magic bytes.
fn resolve_local(path_str: &str) -> Result<ResolvedInput, ExamError> {
    let path = PathBuf::from(path_str);

    if !path.exists() {
        return Err(ExamError::FileNotFound { path });
    }

    match std::fs::File::open(&path) {
        Ok(mut f) => {
            use std::io::Read;
            let mut magic = [0u8; 4];
            if f.read_exact(&mut magic).is_ok() && &magic != b"%PDF" {
                return Err(ExamError::NotAPdf { path, magic });
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(ExamError::PermissionDenied { path });
        }
        Err(_) => {
            return Err(ExamError::FileNotFound { path });
        }
    }

    debug!("Resolved local PDF: {}", path.display());
    Ok(ResolvedInput::Local(path))
}

/// Download a URL to a temporary directory and return the path.
async fn download_url(url: &str, timeout_secs: u64) -> Result<ResolvedInput, ExamError> {
    info!("Downloading PDF from: {}", url);

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| ExamError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            ExamError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            ExamError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    })?;

    if !response.status().is_success() {
        return Err(ExamError::DownloadFailed {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    let filename = format!("{}.pdf", paper_name_from_input(url));
    let temp_dir = TempDir::new().map_err(|e| ExamError::Internal(e.to_string()))?;
    let file_path = temp_dir.path().join(&filename);

    let bytes = response
        .bytes()
        .await
        .map_err(|e| ExamError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    check_magic(&bytes, &file_path)?;

    tokio::fs::write(&file_path, &bytes)
        .await
        .map_err(|e| ExamError::Internal(format!("Failed to write temp file: {}", e)))?;

    info!("Downloaded to: {}", file_path.display());

    Ok(ResolvedInput::Downloaded {
        path: file_path,
        _temp_dir: temp_dir,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_url() {
        assert!(is_url("https://example.com/doc.pdf"));
        assert!(is_url("http://example.com/doc.pdf"));
        assert!(!is_url("/tmp/doc.pdf"));
        assert!(!is_url(""));
    }

    #[test]
    fn paper_name_from_path_and_url() {
        assert_eq!(paper_name_from_input("/papers/AES 2019.pdf"), "AES 2019");
        assert_eq!(
            paper_name_from_input("https://cdn.example.com/p/Nanyang_P6.pdf?sig=abc"),
            "Nanyang_P6"
        );
        assert_eq!(paper_name_from_input(""), "paper");
    }

    #[test]
    fn bytes_without_magic_are_rejected() {
        let err = resolve_bytes(b"<html>").err().expect("should fail");
        assert!(matches!(err, ExamError::NotAPdf { .. }));
    }

    #[test]
    fn bytes_with_magic_are_written() {
        let resolved = resolve_bytes(b"%PDF-1.7\n%%EOF").expect("valid header");
        let written = std::fs::read(resolved.path()).unwrap();
        assert!(written.starts_with(b"%PDF"));
    }

    #[test]
    fn missing_local_file() {
        let err = resolve_local("/definitely/not/here.pdf").err().unwrap();
        assert!(matches!(err, ExamError::FileNotFound { .. }));
    }
}
