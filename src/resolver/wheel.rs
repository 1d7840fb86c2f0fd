use std::io::{Cursor, Read, Seek};
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use reqwest::Client;
use tracing::{debug, warn};
use zip::ZipArchive;

use crate::error::AuditError;
use crate::registry::USER_AGENT;

use super::requirement::RequirementSpec;

/// Recover a requirement from a remote or local wheel without installing it.
///
/// Supports `http(s)://` and `file://` URIs and plain filesystem paths,
/// which are taken relative to `base_dir`. Failures are logged and yield
/// `None`; the package may then be reported as transitive.
pub async fn requirement_from_wheel_uri(
    client: &Client,
    uri: &str,
    base_dir: &Path,
) -> Option<RequirementSpec> {
    match fetch_wheel_requirement(client, uri, base_dir).await {
        Ok(Some(spec)) => {
            debug!("Resolved wheel {} to {}{}", uri, spec.name, spec.specifier.as_deref().unwrap_or(""));
            Some(spec)
        }
        Ok(None) => {
            warn!(
                "Unsupported wheel URI [{}]. Requirement might falsely report as transitive.",
                uri
            );
            None
        }
        Err(e) => {
            warn!(
                "Couldn't retrieve .whl from URI [{}]: {:#}. Requirement might falsely report as transitive.",
                uri, e
            );
            None
        }
    }
}

async fn fetch_wheel_requirement(
    client: &Client,
    uri: &str,
    base_dir: &Path,
) -> Result<Option<RequirementSpec>> {
    let bytes = if uri.starts_with("https://") || uri.starts_with("http://") {
        let response = client
            .get(uri)
            .header("User-Agent", USER_AGENT)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(AuditError::Fetch {
                url: uri.to_string(),
                details: format!("HTTP {}", response.status()),
            }
            .into());
        }
        response.bytes().await?.to_vec()
    } else if let Some(path) = uri.strip_prefix("file://") {
        std::fs::read(path).with_context(|| format!("Failed to read wheel {}", path))?
    } else if uri.contains("://") {
        return Ok(None);
    } else {
        let path = base_dir.join(uri);
        std::fs::read(&path).with_context(|| format!("Failed to read wheel {}", path.display()))?
    };

    let (name, version) = read_wheel_metadata(Cursor::new(bytes))?;
    Ok(Some(RequirementSpec {
        name,
        specifier: Some(format!("=={}", version)),
        url: Some(uri.to_string()),
        ..Default::default()
    }))
}

/// Read `Name` and `Version` from the `.dist-info/METADATA` entry of a wheel.
pub fn read_wheel_metadata<R: Read + Seek>(reader: R) -> Result<(String, String)> {
    let mut archive = ZipArchive::new(reader).context("Not a wheel archive")?;

    let metadata_path = (0..archive.len())
        .filter_map(|i| archive.by_index_raw(i).ok().map(|f| f.name().to_string()))
        .find(|name| name.ends_with(".dist-info/METADATA"))
        .ok_or_else(|| anyhow!("No METADATA file found in wheel archive"))?;

    let mut content = String::new();
    archive
        .by_name(&metadata_path)?
        .read_to_string(&mut content)
        .with_context(|| format!("Failed to read {}", metadata_path))?;

    parse_metadata(&content).ok_or_else(|| anyhow!("METADATA is missing Name or Version"))
}

/// Parse the RFC 822 header block of a core metadata file.
pub fn parse_metadata(content: &str) -> Option<(String, String)> {
    let mut name = None;
    let mut version = None;
    for line in content.lines() {
        if line.trim().is_empty() {
            break;
        }
        if let Some(value) = line.strip_prefix("Name:") {
            name.get_or_insert_with(|| value.trim().to_string());
        } else if let Some(value) = line.strip_prefix("Version:") {
            version.get_or_insert_with(|| value.trim().to_string());
        }
    }
    Some((name?, version?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;
    use zip::CompressionMethod;

    fn write_wheel(path: &std::path::Path, metadata: &str) {
        let file = std::fs::File::create(path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
        writer.start_file("mock_wheel/__init__.py", options).unwrap();
        writer.write_all(b"").unwrap();
        writer
            .start_file("mock_wheel-1.2.3.dist-info/METADATA", options)
            .unwrap();
        writer.write_all(metadata.as_bytes()).unwrap();
        writer.finish().unwrap();
    }

    #[test]
    fn test_parse_metadata_headers_only() {
        let content = "Metadata-Version: 2.1\nName: mock-wheel\nVersion: 1.2.3\n\nName: not-this\n";
        assert_eq!(
            parse_metadata(content),
            Some(("mock-wheel".to_string(), "1.2.3".to_string()))
        );
        assert_eq!(parse_metadata("Name: x\n"), None);
    }

    #[tokio::test]
    async fn test_local_wheel() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mock_wheel-1.2.3-py3-none-any.whl");
        write_wheel(&path, "Metadata-Version: 2.1\nName: mock-wheel\nVersion: 1.2.3\n");

        let uri = format!("file://{}", path.display());
        let spec = requirement_from_wheel_uri(&Client::new(), &uri, dir.path())
            .await
            .unwrap();
        assert_eq!(spec.name, "mock-wheel");
        assert_eq!(spec.specifier.as_deref(), Some("==1.2.3"));
        assert_eq!(spec.url.as_deref(), Some(uri.as_str()));
    }

    #[tokio::test]
    async fn test_local_wheel_path_relative_to_base_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("dist")).unwrap();
        let path = dir.path().join("dist/mock_wheel-1.2.3-py3-none-any.whl");
        write_wheel(&path, "Metadata-Version: 2.1\nName: mock-wheel\nVersion: 1.2.3\n");

        let client = Client::new();
        let relative = "./dist/mock_wheel-1.2.3-py3-none-any.whl";
        let spec = requirement_from_wheel_uri(&client, relative, dir.path())
            .await
            .unwrap();
        assert_eq!(spec.name, "mock-wheel");
        assert_eq!(spec.specifier.as_deref(), Some("==1.2.3"));
        assert_eq!(spec.url.as_deref(), Some(relative));

        let absolute = path.display().to_string();
        let other_dir = tempfile::tempdir().unwrap();
        let spec = requirement_from_wheel_uri(&client, &absolute, other_dir.path())
            .await
            .unwrap();
        assert_eq!(spec.name, "mock-wheel");
    }

    #[tokio::test]
    async fn test_unsupported_or_broken_wheels() {
        let client = Client::new();
        let dir = tempfile::tempdir().unwrap();
        assert!(requirement_from_wheel_uri(&client, "ftp://host/x.whl", dir.path())
            .await
            .is_none());
        assert!(requirement_from_wheel_uri(&client, "missing.whl", dir.path())
            .await
            .is_none());

        let path = dir.path().join("broken.whl");
        std::fs::write(&path, b"definitely not a zip").unwrap();
        let uri = format!("file://{}", path.display());
        assert!(requirement_from_wheel_uri(&client, &uri, dir.path()).await.is_none());

        let missing = format!("file://{}", dir.path().join("missing.whl").display());
        assert!(requirement_from_wheel_uri(&client, &missing, dir.path())
            .await
            .is_none());
    }
}
