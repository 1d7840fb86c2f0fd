use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, error, warn};

use crate::license::policy::Policy;
use crate::models::{Package, UNKNOWN_LICENSE};
use crate::registry::apt_index::{AptVersion, PackageIndex};
use crate::registry::ubuntu::CopyrightSource;

const CHANGELOGS_URL: &str = "https://changelogs.ubuntu.com/changelogs";

/// Candidate copyright URLs for one package version.
///
/// Returns nothing when the archive filename has no pool component.
pub fn changelog_uris(version: &AptVersion) -> Vec<String> {
    let source = &version.source_name;
    let (Some(pool), Some(initial)) = (version.filename.split('/').nth(1), source.chars().next())
    else {
        error!(
            "Failed to get URI for package {} {}: unexpected filename {:?}",
            source, version.version, version.filename
        );
        return Vec::new();
    };

    vec![
        format!(
            "{}/binary/{}/{}/{}/copyright",
            CHANGELOGS_URL, initial, source, version.version
        ),
        format!(
            "{}/pool/{}/{}/{}/{}_{}/copyright",
            CHANGELOGS_URL, pool, initial, source, source, version.version
        ),
    ]
}

/// `License:` and `Files:` values in document order.
pub fn parse_copyright_text(text: &str) -> (Vec<String>, Vec<String>) {
    let mut licenses = Vec::new();
    let mut files = Vec::new();
    for line in text.lines() {
        if let Some(license) = line.strip_prefix("License:") {
            licenses.push(license.trim().to_string());
        } else if let Some(file) = line.strip_prefix("Files:") {
            files.push(file.trim().to_string());
        }
    }
    (licenses, files)
}

/// Build a package from parsed copyright lists.
///
/// The first license is the direct one. Later licenses are paired with the
/// `Files:` entry at the same index and grouped by license. Returns `None`
/// when no license was found.
pub fn generate_output_package(
    name: &str,
    version: Option<&str>,
    uri: &str,
    licenses: &[String],
    files: &[String],
    policy: &Policy,
) -> Option<Package> {
    let direct = licenses.first()?;
    let transitive = licenses
        .iter()
        .skip(1)
        .zip(files.iter().skip(1))
        .map(|(license, file)| (license.clone(), vec![file.clone()]))
        .collect();

    Some(Package::system(
        name,
        version,
        direct,
        transitive,
        Some(uri.to_string()),
        policy,
    ))
}

/// On-disk copyright text cache, one file per package name.
#[derive(Debug, Clone)]
pub struct LicenseCache {
    dir: PathBuf,
}

impl LicenseCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, package_name: &str) -> PathBuf {
        self.dir.join(format!("license_{}.txt", package_name))
    }

    /// Cached text, if present and non-empty.
    pub fn read(&self, package_name: &str) -> Option<String> {
        let path = self.path_for(package_name);
        let text = std::fs::read_to_string(&path).ok()?;
        if text.is_empty() {
            return None;
        }
        debug!("Cache hit for file: {}", path.display());
        Some(text)
    }

    pub fn write(&self, package_name: &str, text: &str) -> Result<()> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create cache dir {}", self.dir.display()))?;
        let path = self.path_for(package_name);
        std::fs::write(&path, text)
            .with_context(|| format!("Failed to write cache file {}", path.display()))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

/// Resolves system packages to licenses via copyright files.
pub struct AptResolver {
    index: Box<dyn PackageIndex>,
    source: Box<dyn CopyrightSource>,
    cache: LicenseCache,
    no_cache: bool,
    show_progress: bool,
}

impl AptResolver {
    pub fn new(
        index: Box<dyn PackageIndex>,
        source: Box<dyn CopyrightSource>,
        cache: LicenseCache,
        no_cache: bool,
    ) -> Self {
        Self {
            index,
            source,
            cache,
            no_cache,
            show_progress: false,
        }
    }

    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    /// Resolve one package. Never fails: anything that goes wrong yields an
    /// `UNKNOWN` license.
    pub async fn resolve(&self, package_name: &str, policy: &Policy) -> Package {
        debug!("Processing APT package [{}]", package_name);

        let versions = match self.index.versions(package_name).await {
            Ok(Some(versions)) => versions,
            Ok(None) => {
                warn!(
                    "Couldn't find package {} in the apt index. The license will be flagged as unknown. \
                     To have it auto-discovered, run `apt-get update` (or install {}) and rerun.",
                    package_name, package_name
                );
                return Package::system(package_name, None, UNKNOWN_LICENSE, Vec::new(), None, policy);
            }
            Err(e) => {
                warn!("Failed to look up {} in the apt index: {:#}", package_name, e);
                return Package::system(package_name, None, UNKNOWN_LICENSE, Vec::new(), None, policy);
            }
        };

        for version in &versions {
            for url in changelog_uris(version) {
                let Some(text) = self.copyright_text(package_name, &url).await else {
                    continue;
                };

                let (licenses, files) = parse_copyright_text(&text);
                let resolved = generate_output_package(
                    package_name,
                    Some(&version.version),
                    &url,
                    &licenses,
                    &files,
                    policy,
                );
                return match resolved {
                    Some(package) => {
                        debug!("  Direct license: {}", package.licenses[0]);
                        for group in package.transitive_licenses() {
                            debug!("    {}: {}", group.license, group.files.join(", "));
                        }
                        package
                    }
                    None => {
                        debug!("  No License entries in {}", url);
                        Package::system(
                            package_name,
                            Some(&version.version),
                            UNKNOWN_LICENSE,
                            Vec::new(),
                            Some(url),
                            policy,
                        )
                    }
                };
            }
        }

        debug!("  License not found for {}", package_name);
        let first_version = versions.first().map(|v| v.version.as_str());
        Package::system(package_name, first_version, UNKNOWN_LICENSE, Vec::new(), None, policy)
    }

    async fn copyright_text(&self, package_name: &str, url: &str) -> Option<String> {
        if !self.no_cache {
            if let Some(text) = self.cache.read(package_name) {
                return Some(text);
            }
        }

        match self.source.fetch(url).await {
            Ok(Some(text)) => {
                if let Err(e) = self.cache.write(package_name, &text) {
                    warn!("{:#}", e);
                }
                Some(text)
            }
            Ok(None) => None,
            Err(e) => {
                debug!("Failed to fetch {}: {:#}", url, e);
                None
            }
        }
    }

    /// Resolve every name in order, skipping blanks.
    pub async fn resolve_all(&self, names: &[String], policy: &Policy) -> Vec<Package> {
        let names: Vec<&str> = names.iter().map(|n| n.trim()).filter(|n| !n.is_empty()).collect();

        let pb = if self.show_progress && !names.is_empty() {
            let pb = ProgressBar::new(names.len() as u64);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_bar())
                    .progress_chars("#>-"),
            );
            Some(pb)
        } else {
            None
        };

        let mut packages = Vec::with_capacity(names.len());
        for name in names {
            if let Some(pb) = &pb {
                pb.set_message(name.to_string());
            }
            packages.push(self.resolve(name, policy).await);
            if let Some(pb) = &pb {
                pb.inc(1);
            }
        }

        if let Some(pb) = pb {
            pb.finish_and_clear();
        }
        packages
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::license::policy::PackageLists;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    const COPYRIGHT: &str = "Format: https://www.debian.org/doc/packaging-manuals/copyright-format/1.0/
Upstream-Name: CMake

Files: *
Copyright: 2000-2019 Kitware, Inc.
License: BSD-3-clause

Files: Utilities/cmcurl/*
Copyright: 1996-2019 Daniel Stenberg
License: MIT

Files: Utilities/cmlibarchive/*
License: BSD-2-clause

Files: Utilities/cmzlib/*
License: MIT

License: BSD-3-clause
 Redistribution and use in source and binary forms...
";

    struct FakeIndex(HashMap<String, Vec<AptVersion>>);

    #[async_trait]
    impl PackageIndex for FakeIndex {
        async fn versions(&self, package_name: &str) -> Result<Option<Vec<AptVersion>>> {
            Ok(self.0.get(package_name).cloned())
        }
    }

    #[derive(Default)]
    struct FakeChangelogs {
        pages: HashMap<String, String>,
        requests: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl CopyrightSource for FakeChangelogs {
        async fn fetch(&self, url: &str) -> Result<Option<String>> {
            self.requests.lock().unwrap().push(url.to_string());
            Ok(self.pages.get(url).cloned())
        }
    }

    fn policy() -> Policy {
        Policy::new(
            &["MIT".to_string(), "BSD.*".to_string()],
            PackageLists::default(),
            PackageLists::default(),
        )
        .unwrap()
    }

    fn version(source: &str, version: &str, filename: &str) -> AptVersion {
        AptVersion {
            version: version.to_string(),
            source_name: source.to_string(),
            filename: filename.to_string(),
        }
    }

    fn cmake_index() -> FakeIndex {
        let mut versions = HashMap::new();
        versions.insert(
            "cmake".to_string(),
            vec![version(
                "cmake",
                "3.16.3-1ubuntu1",
                "pool/main/c/cmake/cmake_3.16.3-1ubuntu1_amd64.deb",
            )],
        );
        FakeIndex(versions)
    }

    #[test]
    fn test_changelog_uris() {
        let cases = [
            (
                version("cmake", "3.16.3-1ubuntu1", "pool/main/c/cmake/cmake_3.16.3-1ubuntu1_amd64.deb"),
                vec![
                    "https://changelogs.ubuntu.com/changelogs/binary/c/cmake/3.16.3-1ubuntu1/copyright",
                    "https://changelogs.ubuntu.com/changelogs/pool/main/c/cmake/cmake_3.16.3-1ubuntu1/copyright",
                ],
            ),
            (
                version("vim", "2:8.1.2269-1ubuntu5.11", "pool/main/v/vim/vim_8.1.2269-1ubuntu5.11_amd64.deb"),
                vec![
                    "https://changelogs.ubuntu.com/changelogs/binary/v/vim/2:8.1.2269-1ubuntu5.11/copyright",
                    "https://changelogs.ubuntu.com/changelogs/pool/main/v/vim/vim_2:8.1.2269-1ubuntu5.11/copyright",
                ],
            ),
            (version("vim", "2:8.1.2269-1ubuntu5.7", ""), vec![]),
            (
                version(
                    "python-virtualenv",
                    "20.0.17-1ubuntu0.4",
                    "pool/universe/p/python-virtualenv/virtualenv_20.0.17-1ubuntu0.4_all.deb",
                ),
                vec![
                    "https://changelogs.ubuntu.com/changelogs/binary/p/python-virtualenv/20.0.17-1ubuntu0.4/copyright",
                    "https://changelogs.ubuntu.com/changelogs/pool/universe/p/python-virtualenv/python-virtualenv_20.0.17-1ubuntu0.4/copyright",
                ],
            ),
        ];
        for (v, expected) in cases {
            assert_eq!(changelog_uris(&v), expected);
        }
    }

    #[test]
    fn test_parse_copyright_text() {
        let (licenses, files) = parse_copyright_text(COPYRIGHT);
        assert_eq!(
            licenses,
            vec!["BSD-3-clause", "MIT", "BSD-2-clause", "MIT", "BSD-3-clause"]
        );
        assert_eq!(
            files,
            vec!["*", "Utilities/cmcurl/*", "Utilities/cmlibarchive/*", "Utilities/cmzlib/*"]
        );
    }

    #[test]
    fn test_generate_output_package_groups_pairs() {
        let licenses: Vec<String> = ["GPL", "MIT", "BSD", "MIT"].iter().map(|s| s.to_string()).collect();
        let files: Vec<String> = ["*", "a/*", "b/*"].iter().map(|s| s.to_string()).collect();
        let pkg = generate_output_package("x", Some("1"), "https://u", &licenses, &files, &policy()).unwrap();

        assert_eq!(pkg.licenses[0].name, "GPL");
        let groups = pkg.transitive_licenses();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].license.name, "MIT");
        assert_eq!(groups[0].files, vec!["a/*"]);
        assert_eq!(groups[1].license.name, "BSD");
        assert_eq!(groups[1].files, vec!["b/*"]);

        assert!(generate_output_package("x", None, "u", &[], &files, &policy()).is_none());
    }

    #[test]
    fn test_cache_paths() {
        let dir = tempfile::tempdir().unwrap();
        let cache = LicenseCache::new(dir.path().join("apt"));
        assert_eq!(
            cache.path_for("zlib1g"),
            dir.path().join("apt").join("license_zlib1g.txt")
        );
        assert_eq!(cache.read("zlib1g"), None);
        cache.write("zlib1g", "").unwrap();
        assert_eq!(cache.read("zlib1g"), None);
        cache.write("zlib1g", "License: Zlib").unwrap();
        assert_eq!(cache.read("zlib1g").as_deref(), Some("License: Zlib"));
    }

    #[tokio::test]
    async fn test_resolve_falls_through_to_pool_url_and_caches() {
        let dir = tempfile::tempdir().unwrap();
        let pool_url =
            "https://changelogs.ubuntu.com/changelogs/pool/main/c/cmake/cmake_3.16.3-1ubuntu1/copyright";
        let mut changelogs = FakeChangelogs::default();
        changelogs.pages.insert(pool_url.to_string(), COPYRIGHT.to_string());

        let resolver = AptResolver::new(
            Box::new(cmake_index()),
            Box::new(changelogs),
            LicenseCache::new(dir.path()),
            false,
        );
        let pkg = resolver.resolve("cmake", &policy()).await;

        assert_eq!(pkg.version.as_deref(), Some("3.16.3-1ubuntu1"));
        assert_eq!(pkg.uri.as_deref(), Some(pool_url));
        assert_eq!(pkg.licenses[0].name, "BSD-3-clause");
        let groups = pkg.transitive_licenses();
        assert_eq!(groups[0].license.name, "MIT");
        assert_eq!(groups[0].files, vec!["Utilities/cmcurl/*", "Utilities/cmzlib/*"]);
        assert!(!pkg.has_problems(true));

        let cached = std::fs::read_to_string(dir.path().join("license_cmake.txt")).unwrap();
        assert_eq!(cached, COPYRIGHT);
    }

    #[tokio::test]
    async fn test_cache_hit_skips_network() {
        let dir = tempfile::tempdir().unwrap();
        let cache = LicenseCache::new(dir.path());
        cache.write("cmake", "License: GPL-2\n").unwrap();

        let resolver = AptResolver::new(
            Box::new(cmake_index()),
            Box::new(FakeChangelogs::default()),
            cache,
            false,
        );
        let pkg = resolver.resolve("cmake", &policy()).await;
        assert_eq!(pkg.licenses[0].name, "GPL-2");
        assert!(pkg.has_problems(false));
        assert_eq!(
            pkg.uri.as_deref(),
            Some("https://changelogs.ubuntu.com/changelogs/binary/c/cmake/3.16.3-1ubuntu1/copyright")
        );
    }

    #[tokio::test]
    async fn test_no_cache_refetches() {
        let dir = tempfile::tempdir().unwrap();
        let cache = LicenseCache::new(dir.path());
        cache.write("cmake", "License: GPL-2\n").unwrap();

        let binary_url =
            "https://changelogs.ubuntu.com/changelogs/binary/c/cmake/3.16.3-1ubuntu1/copyright";
        let mut changelogs = FakeChangelogs::default();
        changelogs.pages.insert(binary_url.to_string(), "License: MIT\n".to_string());

        let resolver = AptResolver::new(Box::new(cmake_index()), Box::new(changelogs), cache.clone(), true);
        let pkg = resolver.resolve("cmake", &policy()).await;
        assert_eq!(pkg.licenses[0].name, "MIT");
        assert_eq!(cache.read("cmake").as_deref(), Some("License: MIT\n"));
    }

    #[tokio::test]
    async fn test_unknown_outcomes() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = AptResolver::new(
            Box::new(cmake_index()),
            Box::new(FakeChangelogs::default()),
            LicenseCache::new(dir.path()),
            false,
        );

        let missing = resolver.resolve("not-a-package", &policy()).await;
        assert_eq!(missing.licenses[0].name, UNKNOWN_LICENSE);
        assert_eq!(missing.version, None);
        assert_eq!(missing.uri, None);
        assert!(missing.has_problems(false));

        let unfetched = resolver.resolve("cmake", &policy()).await;
        assert_eq!(unfetched.licenses[0].name, UNKNOWN_LICENSE);
        assert_eq!(unfetched.uri, None);
        assert!(unfetched.transitive_licenses().is_empty());
    }

    #[tokio::test]
    async fn test_text_without_licenses_keeps_url() {
        let dir = tempfile::tempdir().unwrap();
        let binary_url =
            "https://changelogs.ubuntu.com/changelogs/binary/c/cmake/3.16.3-1ubuntu1/copyright";
        let mut changelogs = FakeChangelogs::default();
        changelogs.pages.insert(binary_url.to_string(), "free-form copyright notice".to_string());

        let resolver = AptResolver::new(
            Box::new(cmake_index()),
            Box::new(changelogs),
            LicenseCache::new(dir.path()),
            false,
        );
        let pkg = resolver.resolve("cmake", &policy()).await;
        assert_eq!(pkg.licenses[0].name, UNKNOWN_LICENSE);
        assert_eq!(pkg.uri.as_deref(), Some(binary_url));
    }

    #[tokio::test]
    async fn test_resolve_all_skips_blank_names() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = AptResolver::new(
            Box::new(cmake_index()),
            Box::new(FakeChangelogs::default()),
            LicenseCache::new(dir.path()),
            false,
        );
        let names = vec!["cmake".to_string(), "  ".to_string(), " zip ".to_string()];
        let pkgs = resolver.resolve_all(&names, &policy()).await;
        let got: Vec<_> = pkgs.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(got, vec!["cmake", "zip"]);
    }
}
