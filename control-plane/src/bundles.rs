//! Bundle upload, download and verification

use chrono::Utc;
use openapi_server::{BundleSummary, BundleVerifyResponse};
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use crate::blob::{Blob, BlobStore};
use crate::errors::ControlPlaneError;
use crate::integrity::{checksum_bytes, checksum_reader};
use crate::models::Bundle;
use crate::store::{self, Store};

const DEFAULT_FILE_NAME: &str = "bundle.tar.gz";

/// Upload parameters as received from the operator
#[derive(Debug)]
pub struct NewBundle<'a> {
    pub file_name: Option<&'a str>,
    pub data: &'a [u8],
    pub manifest: &'a str,
    pub org_id: Option<String>,
}

/// Parse and check an uploaded manifest, returning it with its version
pub fn parse_manifest(raw: &str) -> Result<(Value, String), ControlPlaneError> {
    let manifest: Value = serde_json::from_str(raw)
        .map_err(|e| ControlPlaneError::InvalidRequest(format!("Invalid manifest JSON: {}", e)))?;
    if !manifest.is_object() {
        return Err(ControlPlaneError::InvalidRequest(
            "Manifest must be a JSON object".to_string(),
        ));
    }
    let version = manifest
        .get("version")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| {
            ControlPlaneError::InvalidRequest("Manifest must include version".to_string())
        })?
        .to_string();
    Ok((manifest, version))
}

/// Store the payload, compute its checksum and record the bundle
pub async fn upload(
    store: &Store,
    blobs: &dyn BlobStore,
    upload: NewBundle<'_>,
) -> Result<Bundle, ControlPlaneError> {
    let (manifest, version) = parse_manifest(upload.manifest)?;

    let mut conn = store.acquire().await?;
    let taken = store::bundles::find_by_version(&mut conn, &version).await?;
    drop(conn);
    if taken.is_some() {
        return Err(ControlPlaneError::Conflict(format!(
            "bundle version {} already exists",
            version
        )));
    }

    let id = Uuid::new_v4().to_string();
    let file_name = format!(
        "{}-{}",
        version,
        upload
            .file_name
            .and_then(base_name)
            .unwrap_or(DEFAULT_FILE_NAME)
    );
    let checksum = checksum_bytes(upload.data);
    let locator = blobs.put(&format!("{}/{}", id, file_name), upload.data).await?;

    let model = manifest.get("model").and_then(Value::as_object);
    let bundle = Bundle {
        id,
        org_id: upload.org_id,
        version,
        checksum_sha256: checksum,
        model_name: model
            .and_then(|m| m.get("name"))
            .and_then(Value::as_str)
            .map(str::to_string),
        model_size_mb: model.and_then(|m| m.get("size_mb")).and_then(Value::as_f64),
        manifest,
        storage_path: locator,
        file_name,
        created_at: Utc::now(),
    };

    if let Err(e) = insert(store, &bundle).await {
        if let Err(cleanup) = blobs.delete(&bundle.storage_path).await {
            warn!("Failed to remove orphaned blob {}: {}", bundle.storage_path, cleanup);
        }
        return Err(e);
    }

    info!(
        "Uploaded bundle {} version {} ({} bytes)",
        bundle.id,
        bundle.version,
        upload.data.len()
    );
    Ok(bundle)
}

async fn insert(store: &Store, bundle: &Bundle) -> Result<(), ControlPlaneError> {
    let mut conn = store.acquire().await?;
    store::bundles::insert(&mut conn, bundle).await
}

/// Open a bundle's payload for download
pub async fn download(
    store: &Store,
    blobs: &dyn BlobStore,
    bundle_id: &str,
) -> Result<(Bundle, Blob), ControlPlaneError> {
    let mut conn = store.acquire().await?;
    let bundle = store::bundles::get(&mut conn, bundle_id).await?;
    drop(conn);
    let blob = blobs.open(&bundle.storage_path).await?;
    Ok((bundle, blob))
}

/// Recompute a bundle's checksum from storage
pub async fn verify(
    store: &Store,
    blobs: &dyn BlobStore,
    bundle_id: &str,
    provided: Option<&str>,
) -> Result<BundleVerifyResponse, ControlPlaneError> {
    let (bundle, blob) = download(store, blobs, bundle_id).await?;
    let checksum = checksum_reader(blob.reader).await?;
    if checksum != bundle.checksum_sha256 {
        warn!(
            "Stored payload of bundle {} no longer matches its recorded checksum",
            bundle.id
        );
    }
    let valid = match provided {
        Some(expected) => expected.trim().eq_ignore_ascii_case(&checksum),
        None => true,
    };
    Ok(BundleVerifyResponse { valid, checksum })
}

/// Upload order
pub async fn list(store: &Store) -> Result<Vec<BundleSummary>, ControlPlaneError> {
    let mut conn = store.acquire().await?;
    let bundles = store::bundles::list(&mut conn).await?;
    Ok(bundles.iter().map(Bundle::summary).collect())
}

fn base_name(name: &str) -> Option<&str> {
    let last = name.rsplit(['/', '\\']).next()?.trim();
    if last.is_empty() || last == "." || last == ".." {
        None
    } else {
        Some(last)
    }
}
