//! Bundle download

use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::header::CONTENT_DISPOSITION;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::errors::AgentError;
use crate::http::client::HttpClient;

impl HttpClient {
    /// Stream bundle `bundle_id` into `target_dir`.
    ///
    /// The file is named after the `Content-Disposition` filename, or the
    /// bundle id when the header is missing. Returns the written path.
    pub async fn download_bundle(
        &self,
        bundle_id: &str,
        target_dir: &Path,
        timeout: Duration,
    ) -> Result<PathBuf, AgentError> {
        tokio::fs::create_dir_all(target_dir).await?;

        let path = format!("/bundles/{}", bundle_id);
        let mut response = self.get_stream(&path, timeout).await?;

        let filename = response
            .headers()
            .get(CONTENT_DISPOSITION)
            .and_then(|v| v.to_str().ok())
            .and_then(filename_from_disposition)
            .and_then(|name| sanitize_filename(&name))
            .unwrap_or_else(|| bundle_id.to_string());
        let bundle_path = target_dir.join(&filename);
        debug!("Downloading bundle {} to {:?}", bundle_id, bundle_path);

        let mut file = tokio::fs::File::create(&bundle_path).await?;
        let mut written: u64 = 0;
        while let Some(chunk) = response.chunk().await? {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        file.sync_all().await?;

        info!("Downloaded bundle {} ({} bytes)", bundle_id, written);
        Ok(bundle_path)
    }
}

/// Extract `filename="..."` from a Content-Disposition header value
pub fn filename_from_disposition(header: &str) -> Option<String> {
    header.split(';').map(str::trim).find_map(|part| {
        let value = part.strip_prefix("filename=")?;
        let value = value.trim_matches('"');
        if value.is_empty() {
            None
        } else {
            Some(value.to_string())
        }
    })
}

/// Reduce a server-supplied name to its final path component
pub fn sanitize_filename(name: &str) -> Option<String> {
    let last = name.rsplit(['/', '\\']).next()?.trim();
    if last.is_empty() || last == "." || last == ".." {
        return None;
    }
    Some(last.to_string())
}
