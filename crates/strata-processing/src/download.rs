//! Remote downloader: turns a URL into a [`FileHandle`] with local bytes.

use std::path::Path;

use futures::StreamExt;
use reqwest::header::CONTENT_TYPE;
use reqwest::redirect::Policy;
use reqwest::Url;
use strata_core::{DownloadConfig, FileHandle, StrataError};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("invalid URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("server responded with {status} for {url}")]
    Status { status: u16, url: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Handle(#[from] StrataError),
}

/// Download `url` into the scratch directory.
///
/// Redirects are followed up to `config.max_redirects`. The handle's name is
/// taken from the URL path, with an extension derived from the response
/// `Content-Type` when the path has none.
#[tracing::instrument(skip(config))]
pub async fn download(url: &str, config: &DownloadConfig) -> Result<FileHandle, DownloadError> {
    let parsed = Url::parse(url).map_err(|e| DownloadError::InvalidUrl {
        url: url.to_string(),
        reason: e.to_string(),
    })?;

    let client = reqwest::Client::builder()
        .redirect(Policy::limited(config.max_redirects))
        .timeout(config.timeout)
        .build()?;

    let response = client.get(parsed.clone()).send().await?;
    if !response.status().is_success() {
        return Err(DownloadError::Status {
            status: response.status().as_u16(),
            url: url.to_string(),
        });
    }

    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(normalize_mime_type);
    let name = derive_name(&parsed, content_type.as_deref());

    fs::create_dir_all(&config.scratch_dir).await?;
    let path = config
        .scratch_dir
        .join(format!("download-{}{}", Uuid::new_v4(), extension_of(&name)));

    let mut file = fs::File::create(&path).await?;
    let mut body = response.bytes_stream();
    let written: Result<u64, DownloadError> = async {
        let mut size = 0u64;
        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            size += chunk.len() as u64;
        }
        file.flush().await?;
        Ok(size)
    }
    .await;

    let size = match written {
        Ok(size) => size,
        Err(e) => {
            let _ = fs::remove_file(&path).await;
            return Err(e);
        }
    };

    tracing::info!(
        url = %url,
        name = %name,
        size_bytes = size,
        path = %path.display(),
        "Download complete"
    );

    Ok(FileHandle::new(Some(name), Some(path))?)
}

/// Name for a downloaded file: the last path segment, percent-decoded, or a
/// generated one when the path has no usable segment.
fn derive_name(url: &Url, content_type: Option<&str>) -> String {
    let derived_ext = content_type.and_then(extension_for_mime_type).unwrap_or("");

    let segment = url
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .map(|segment| {
            urlencoding::decode(segment)
                .map(|decoded| decoded.into_owned())
                .unwrap_or_else(|_| segment.to_string())
        })
        .filter(|segment| usable_segment(segment));

    match segment {
        Some(name) if !extension_of(&name).is_empty() => name,
        Some(name) => format!("{}{}", name, derived_ext),
        None => format!("{}{}", Uuid::new_v4(), derived_ext),
    }
}

fn usable_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment != "."
        && segment != ".."
        && !segment.contains(['/', '\\', '\0'])
}

fn extension_of(name: &str) -> String {
    Path::new(name)
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy().to_lowercase()))
        .unwrap_or_default()
}

/// Strip parameters from a MIME type ("image/jpeg; charset=utf-8" -> "image/jpeg").
fn normalize_mime_type(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .map(|s| s.trim())
        .unwrap_or(content_type)
        .to_lowercase()
}

fn extension_for_mime_type(mime_type: &str) -> Option<&'static str> {
    let ext = match mime_type {
        "image/jpeg" => ".jpg",
        "image/png" => ".png",
        "image/gif" => ".gif",
        "image/webp" => ".webp",
        "image/avif" => ".avif",
        "image/svg+xml" => ".svg",
        "image/tiff" => ".tiff",
        "application/pdf" => ".pdf",
        "application/json" => ".json",
        "application/zip" => ".zip",
        "text/plain" => ".txt",
        "text/html" => ".html",
        "text/csv" => ".csv",
        "video/mp4" => ".mp4",
        "video/webm" => ".webm",
        "video/quicktime" => ".mov",
        "audio/mpeg" => ".mp3",
        "audio/wav" | "audio/x-wav" => ".wav",
        "audio/ogg" => ".ogg",
        _ => return None,
    };
    Some(ext)
}
