//! Bundle extraction and manifest handling

use std::fs::File as StdFile;
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use serde_json::Value;
use tar::Archive;
use tracing::debug;

use crate::errors::AgentError;

/// Name of the manifest at the root of every bundle
pub const MANIFEST_FILE: &str = "manifest.json";

/// Validated bundle manifest.
///
/// Keeps the verbatim JSON so fields this agent does not interpret survive.
#[derive(Debug, Clone, PartialEq)]
pub struct Manifest {
    version: String,
    raw: Value,
}

impl Manifest {
    /// Validate and wrap a parsed manifest
    pub fn from_value(raw: Value) -> Result<Self, AgentError> {
        validate_manifest(&raw)?;
        let version = raw
            .get("version")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        Ok(Self { version, raw })
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn raw(&self) -> &Value {
        &self.raw
    }

    /// `deploy.script`, if any
    pub fn deploy_script(&self) -> Option<&str> {
        script_at(&self.raw, "deploy")
    }

    /// `rollback.script`, falling back to `deploy.script`
    pub fn rollback_script(&self) -> Option<&str> {
        script_at(&self.raw, "rollback").or_else(|| self.deploy_script())
    }
}

fn script_at<'a>(raw: &'a Value, section: &str) -> Option<&'a str> {
    raw.get(section)
        .and_then(|s| s.get("script"))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Unpack a gzip-compressed tarball into `extract_dir`.
///
/// Returns the bundle root: the single top-level directory when the archive
/// has one, `extract_dir` otherwise.
pub async fn extract(bundle_path: &Path, extract_dir: &Path) -> Result<PathBuf, AgentError> {
    let bundle_path = bundle_path.to_path_buf();
    let extract_dir = extract_dir.to_path_buf();
    tokio::task::spawn_blocking(move || extract_blocking(&bundle_path, &extract_dir)).await?
}

fn extract_blocking(bundle_path: &Path, extract_dir: &Path) -> Result<PathBuf, AgentError> {
    debug!("Extracting {:?} into {:?}", bundle_path, extract_dir);
    std::fs::create_dir_all(extract_dir)?;

    let file = StdFile::open(bundle_path)?;
    let mut archive = Archive::new(GzDecoder::new(file));
    archive.set_preserve_permissions(true);

    for entry in archive.entries()? {
        let mut entry = entry?;
        if !entry.unpack_in(extract_dir)? {
            let path = entry.path()?.to_path_buf();
            return Err(AgentError::InvalidRequest(format!(
                "archive entry escapes extraction directory: {:?}",
                path
            )));
        }
    }

    let mut contents = Vec::new();
    for entry in std::fs::read_dir(extract_dir)? {
        contents.push(entry?.path());
    }
    if contents.len() == 1 && contents[0].is_dir() {
        return Ok(contents.remove(0));
    }
    Ok(extract_dir.to_path_buf())
}

/// Read `manifest.json` from a bundle root
pub async fn load_manifest(bundle_root: &Path) -> Result<Value, AgentError> {
    let manifest_path = bundle_root.join(MANIFEST_FILE);
    if tokio::fs::metadata(&manifest_path).await.is_err() {
        return Err(AgentError::NotFound(format!(
            "{} not found in {:?}",
            MANIFEST_FILE, bundle_root
        )));
    }
    let contents = tokio::fs::read(&manifest_path).await?;
    Ok(serde_json::from_slice(&contents)?)
}

/// A manifest must be an object with a non-empty string `version`
pub fn validate_manifest(manifest: &Value) -> Result<(), AgentError> {
    let object = manifest
        .as_object()
        .ok_or_else(|| AgentError::InvalidRequest("Manifest must be a JSON object".to_string()))?;

    match object.get("version").and_then(Value::as_str) {
        Some(version) if !version.trim().is_empty() => Ok(()),
        Some(_) => Err(AgentError::InvalidRequest(
            "Manifest 'version' must not be empty".to_string(),
        )),
        None => Err(AgentError::InvalidRequest(
            "Manifest missing required field: version".to_string(),
        )),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    use flate2::write::GzEncoder;
    use flate2::Compression;

    /// Build a .tar.gz from `(path, contents)` pairs
    pub(crate) fn build_tarball(dest: &Path, files: &[(&str, &[u8])]) {
        let file = StdFile::create(dest).unwrap();
        let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
        for (path, contents) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(contents.len() as u64);
            header.set_mode(0o755);
            header.set_cksum();
            builder.append_data(&mut header, path, *contents).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap();
    }

    #[tokio::test]
    async fn test_extract_single_root_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let tarball = tmp.path().join("bundle.tar.gz");
        build_tarball(
            &tarball,
            &[
                ("app-1.0.0/manifest.json", br#"{"version":"1.0.0"}"#),
                ("app-1.0.0/bin/run.sh", b"echo hi"),
            ],
        );

        let root = extract(&tarball, &tmp.path().join("out")).await.unwrap();

        assert_eq!(root, tmp.path().join("out").join("app-1.0.0"));
        assert!(root.join("manifest.json").exists());
    }

    #[tokio::test]
    async fn test_extract_flat_layout() {
        let tmp = tempfile::tempdir().unwrap();
        let tarball = tmp.path().join("bundle.tar.gz");
        build_tarball(
            &tarball,
            &[("manifest.json", br#"{"version":"1.0.0"}"#), ("model.bin", b"\x00\x01")],
        );

        let out = tmp.path().join("out");
        let root = extract(&tarball, &out).await.unwrap();

        assert_eq!(root, out);
        let manifest = load_manifest(&root).await.unwrap();
        assert_eq!(manifest["version"], "1.0.0");
    }

    #[tokio::test]
    async fn test_extract_rejects_corrupt_archive() {
        let tmp = tempfile::tempdir().unwrap();
        let tarball = tmp.path().join("bundle.tar.gz");
        std::fs::write(&tarball, b"definitely not gzip").unwrap();

        assert!(extract(&tarball, &tmp.path().join("out")).await.is_err());
    }

    #[tokio::test]
    async fn test_load_manifest_missing() {
        let tmp = tempfile::tempdir().unwrap();
        let err = load_manifest(tmp.path()).await.unwrap_err();
        assert!(matches!(err, AgentError::NotFound(_)));
    }

    #[test]
    fn test_validate_manifest() {
        validate_manifest(&serde_json::json!({"version": "1.0.0"})).unwrap();

        for bad in [
            serde_json::json!({}),
            serde_json::json!({"version": ""}),
            serde_json::json!({"version": 3}),
            serde_json::json!(["version"]),
        ] {
            let err = validate_manifest(&bad).unwrap_err();
            assert!(matches!(err, AgentError::InvalidRequest(_)), "{:?}", bad);
        }
    }

    #[test]
    fn test_manifest_scripts() {
        let manifest = Manifest::from_value(serde_json::json!({
            "version": "2.0.0",
            "deploy": {"script": "./install.sh"}
        }))
        .unwrap();
        assert_eq!(manifest.version(), "2.0.0");
        assert_eq!(manifest.deploy_script(), Some("./install.sh"));
        assert_eq!(manifest.rollback_script(), Some("./install.sh"));

        let manifest = Manifest::from_value(serde_json::json!({
            "version": "2.0.0",
            "deploy": {"script": "./install.sh"},
            "rollback": {"script": "./revert.sh"}
        }))
        .unwrap();
        assert_eq!(manifest.rollback_script(), Some("./revert.sh"));
    }
}
