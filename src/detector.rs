use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result};
use glob::{MatchOptions, Pattern};
use tracing::{debug, info};
use walkdir::WalkDir;

/// Find files under `base` whose repository-relative path matches any of
/// the glob `names`. A leading `**/` is implied, so `requirements.txt`
/// matches at any depth.
///
/// Paths inside `ignore_paths` and `.git` directories are skipped. Results
/// are relative to `base`, sorted and deduplicated.
pub fn find_files(base: &Path, names: &[String], ignore_paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
    if names.is_empty() {
        return Ok(Vec::new());
    }
    let patterns = names
        .iter()
        .map(|n| name_pattern(n))
        .collect::<Result<Vec<_>>>()?;

    let mut found = BTreeSet::new();
    let walker = WalkDir::new(base)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| e.file_name() != ".git" && !is_ignored(e.path(), ignore_paths));

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                debug!("Skipping unreadable path: {}", e);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(base) else {
            continue;
        };
        let relative_str = relative.to_string_lossy().replace('\\', "/");
        if patterns
            .iter()
            .any(|p| p.matches_with(&relative_str, MATCH_OPTIONS))
        {
            found.insert(relative.to_path_buf());
        }
    }

    let found: Vec<PathBuf> = found.into_iter().collect();
    info!(
        "Found files {:?} for {:?}",
        found.iter().map(|p| p.display().to_string()).collect::<Vec<_>>(),
        names
    );
    Ok(found)
}

/// `true` when `path` is, or is inside, one of `ignore_paths`.
pub fn is_ignored(path: &Path, ignore_paths: &[PathBuf]) -> bool {
    ignore_paths.iter().any(|ignored| path.starts_with(ignored))
}

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// Compile a discovery name, anchoring it at any depth.
fn name_pattern(name: &str) -> Result<Pattern> {
    let name = name.trim_start_matches("./");
    let anchored = if name.starts_with("**/") {
        name.to_string()
    } else {
        format!("**/{}", name)
    };
    Pattern::new(&anchored).with_context(|| format!("Invalid file name pattern `{}`", name))
}

/// Lexically normalise a path: drop `.` components and fold `..` into the
/// preceding component where there is one.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                let can_pop = matches!(out.components().next_back(), Some(Component::Normal(_)));
                if can_pop {
                    out.pop();
                } else {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(base: &Path, rel: &str) {
        let path = base.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, "").unwrap();
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_find_files_any_depth() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "requirements.txt");
        touch(dir.path(), "app/requirements.txt");
        touch(dir.path(), "app/dev-requirements.txt");
        touch(dir.path(), ".git/requirements.txt");
        touch(dir.path(), "notebooks/demo.ipynb");

        let found = find_files(dir.path(), &names(&["requirements.txt", "*.ipynb"]), &[]).unwrap();
        assert_eq!(
            found,
            vec![
                PathBuf::from("app/requirements.txt"),
                PathBuf::from("notebooks/demo.ipynb"),
                PathBuf::from("requirements.txt"),
            ]
        );
    }

    #[test]
    fn test_find_files_skips_ignored() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "Dockerfile");
        touch(dir.path(), "vendor/thing/Dockerfile");
        touch(dir.path(), "docker/Dockerfile");

        let ignore = vec![dir.path().join("vendor")];
        let found = find_files(dir.path(), &names(&["Dockerfile", "Dockerfile"]), &ignore).unwrap();
        assert_eq!(
            found,
            vec![PathBuf::from("Dockerfile"), PathBuf::from("docker/Dockerfile")]
        );
    }

    #[test]
    fn test_glob_patterns() {
        let matches = |pattern: &Pattern, path: &str| pattern.matches_with(path, MATCH_OPTIONS);

        let p = name_pattern("**/*.ipynb").unwrap();
        assert!(matches(&p, "a.ipynb"));
        assert!(matches(&p, "x/y/a.ipynb"));
        assert!(!matches(&p, "a.ipynb.bak"));

        let p = name_pattern("docker/*.sh").unwrap();
        assert!(matches(&p, "docker/build.sh"));
        assert!(matches(&p, "tools/docker/build.sh"));
        assert!(!matches(&p, "docker/sub/build.sh"));

        let p = name_pattern("requirements?.txt").unwrap();
        assert!(matches(&p, "requirements2.txt"));
        assert!(!matches(&p, "requirements.txt"));

        let p = name_pattern("./Dockerfile").unwrap();
        assert!(matches(&p, "Dockerfile"));
        assert!(matches(&p, "services/api/Dockerfile"));
    }

    #[test]
    fn test_invalid_pattern_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = find_files(dir.path(), &names(&["a***b"]), &[]).unwrap_err();
        assert!(err.to_string().contains("a***b"));
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path(Path::new("./a/./b/../c.txt")), PathBuf::from("a/c.txt"));
        assert_eq!(normalize_path(Path::new("a/../../c.txt")), PathBuf::from("../c.txt"));
        assert_eq!(normalize_path(Path::new("/a/b/../c")), PathBuf::from("/a/c"));
    }
}
