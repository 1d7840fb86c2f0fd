use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::debug;

/// One available version of a system package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AptVersion {
    pub version: String,
    pub source_name: String,
    /// Archive path, e.g. `pool/main/c/cmake/cmake_3.16.3-1ubuntu1_amd64.deb`.
    pub filename: String,
}

/// Lookup of system package versions.
#[async_trait]
pub trait PackageIndex: Send + Sync {
    /// `Ok(None)` when the package is unknown to the index.
    async fn versions(&self, package_name: &str) -> Result<Option<Vec<AptVersion>>>;
}

/// [`PackageIndex`] backed by the host's `apt-cache show`.
pub struct AptCacheIndex;

#[async_trait]
impl PackageIndex for AptCacheIndex {
    async fn versions(&self, package_name: &str) -> Result<Option<Vec<AptVersion>>> {
        if package_name.is_empty() || package_name.starts_with('-') {
            return Ok(None);
        }

        let output = tokio::process::Command::new("apt-cache")
            .arg("show")
            .arg(package_name)
            .output()
            .await
            .context("Failed to run apt-cache")?;

        if !output.status.success() {
            debug!(
                "apt-cache show {} exited with {}",
                package_name, output.status
            );
            return Ok(None);
        }

        let versions = parse_apt_cache_show(&String::from_utf8_lossy(&output.stdout), package_name);
        Ok((!versions.is_empty()).then_some(versions))
    }
}

/// Parse `apt-cache show` output into the versions of `package_name`, in
/// the order listed, without duplicates.
pub fn parse_apt_cache_show(output: &str, package_name: &str) -> Vec<AptVersion> {
    let mut versions: Vec<AptVersion> = Vec::new();

    for paragraph in output.split("\n\n") {
        let mut package = None;
        let mut version = None;
        let mut source = None;
        let mut filename = None;

        for line in paragraph.lines() {
            if line.starts_with(' ') || line.starts_with('\t') {
                continue;
            }
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let value = value.trim();
            match key {
                "Package" => package = Some(value),
                "Version" => version = Some(value),
                // `Source: vim (2:8.1.2269-1)` carries a version when it differs.
                "Source" => source = value.split_whitespace().next(),
                "Filename" => filename = Some(value),
                _ => {}
            }
        }

        let (Some(package), Some(version)) = (package, version) else {
            continue;
        };
        if package != package_name || versions.iter().any(|v| v.version == version) {
            continue;
        }

        versions.push(AptVersion {
            version: version.to_string(),
            source_name: source.unwrap_or(package).to_string(),
            filename: filename.unwrap_or_default().to_string(),
        });
    }

    versions
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHOW_OUTPUT: &str = "Package: vim
Architecture: amd64
Version: 2:8.1.2269-1ubuntu5.11
Priority: optional
Source: vim
Filename: pool/main/v/vim/vim_8.1.2269-1ubuntu5.11_amd64.deb
Description: Vi IMproved - enhanced vi editor
 Vim is an almost compatible version of the UNIX editor Vi.
 Filename: not-a-field

Package: vim
Architecture: amd64
Version: 2:8.1.2269-1ubuntu5
Filename: pool/main/v/vim/vim_8.1.2269-1ubuntu5_amd64.deb

Package: vim
Architecture: amd64
Version: 2:8.1.2269-1ubuntu5.11
Filename: pool/main/v/vim/vim_8.1.2269-1ubuntu5.11_amd64.deb

Package: libpython3.8
Version: 3.8.10-0ubuntu1~20.04
Source: python3.8 (3.8.10-0ubuntu1~20.04)
Filename: pool/main/p/python3.8/libpython3.8_3.8.10-0ubuntu1~20.04_amd64.deb
";

    #[test]
    fn test_parse_versions_for_package() {
        let versions = parse_apt_cache_show(SHOW_OUTPUT, "vim");
        assert_eq!(versions.len(), 2);
        assert_eq!(versions[0].version, "2:8.1.2269-1ubuntu5.11");
        assert_eq!(versions[0].source_name, "vim");
        assert_eq!(
            versions[0].filename,
            "pool/main/v/vim/vim_8.1.2269-1ubuntu5.11_amd64.deb"
        );
        // Missing Source falls back to the package name.
        assert_eq!(versions[1].source_name, "vim");
    }

    #[test]
    fn test_source_with_version() {
        let versions = parse_apt_cache_show(SHOW_OUTPUT, "libpython3.8");
        assert_eq!(versions.len(), 1);
        assert_eq!(versions[0].source_name, "python3.8");
    }

    #[test]
    fn test_unknown_package() {
        assert!(parse_apt_cache_show(SHOW_OUTPUT, "emacs").is_empty());
    }

    #[tokio::test]
    async fn test_flag_like_names_are_not_looked_up() {
        assert_eq!(AptCacheIndex.versions("--help").await.unwrap(), None);
    }
}
