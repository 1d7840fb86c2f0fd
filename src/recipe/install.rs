use std::path::Path;

use anyhow::Result;
use regex::Regex;

/// pip options that consume the following token. Taken from `pip install --help`.
const PIP_TWO_TOKEN_FLAGS: &[&str] = &[
    "-r",
    "--requirement",
    "-c",
    "--constraint",
    "-e",
    "--editable",
    "-t",
    "--target",
    "--platform",
    "--python-version",
    "--implementation",
    "--abi",
    "--root",
    "--prefix",
    "-b",
    "--build",
    "--src",
    "--upgrade-strategy",
    "--install-option",
    "--global-option",
    "--config-settings",
    "-C",
    "--no-binary",
    "--only-binary",
    "--progress-bar",
    "-i",
    "--index-url",
    "--extra-index-url",
    "-f",
    "--find-links",
    "--log",
    "--proxy",
    "--retries",
    "--timeout",
    "--exists-action",
    "--trusted-host",
    "--cert",
    "--client-cert",
    "--cache-dir",
];

/// apt/apt-get options that consume the following token.
const APT_TWO_TOKEN_FLAGS: &[&str] = &[
    "--with-source",
    "-o",
    "--option",
    "-c",
    "--config-file",
    "-p",
    "--pkg-cache",
    "-s",
    "--src-cache",
    "-t",
    "--target-release",
    "--default-release",
];

/// A `COPY` instruction: one or more sources copied to a destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyInstruction {
    pub sources: Vec<String>,
    pub destination: String,
}

impl CopyInstruction {
    /// Parse the argument string of a `COPY` instruction (flags already removed).
    pub fn parse(value: &str) -> Option<Self> {
        let mut tokens: Vec<String> = value.split_whitespace().map(str::to_string).collect();
        if tokens.len() < 2 {
            return None;
        }
        let destination = tokens.pop()?;
        Some(Self {
            sources: tokens,
            destination,
        })
    }
}

/// Finds pip and apt install invocations in extracted commands.
///
/// Detection is regex based, not a shell grammar: quoted arguments that
/// happen to contain `install`, or installs inside nested subshells, can be
/// misclassified.
#[derive(Debug, Clone)]
pub struct InstallClassifier {
    pip: Regex,
    apt: Regex,
}

impl InstallClassifier {
    pub fn new() -> Result<Self> {
        Ok(Self {
            pip: Regex::new(r"\bpip(?:3(?:\.\d+)?)?\s+(?:-\S+\s+)*install\s+(.+)")?,
            apt: Regex::new(r"\bapt(?:-get)?\s+(?:-\S+\s+)*install\s+(.+)")?,
        })
    }

    /// Package specifiers requested by `pip install` commands, in order.
    pub fn pip_packages(&self, commands: &[String]) -> Vec<String> {
        commands
            .iter()
            .filter_map(|c| self.pip.captures(c))
            .flat_map(|caps| strip_flags(&caps[1], PIP_TWO_TOKEN_FLAGS, is_requirement_flag))
            .collect()
    }

    /// Package names requested by `apt install` / `apt-get install` commands, in order.
    pub fn apt_packages(&self, commands: &[String]) -> Vec<String> {
        commands
            .iter()
            .filter_map(|c| self.apt.captures(c))
            .flat_map(|caps| strip_flags(&caps[1], APT_TWO_TOKEN_FLAGS, |_| false))
            .collect()
    }

    /// Paths given to `-r`/`--requirement` in `pip install` commands.
    pub fn requirement_files(&self, commands: &[String]) -> Vec<String> {
        let mut files = Vec::new();
        for caps in commands.iter().filter_map(|c| self.pip.captures(c)) {
            let tokens = tokenize(&caps[1]);
            let mut iter = tokens.iter();
            while let Some(token) = iter.next() {
                if let Some(path) = token.strip_prefix("--requirement=") {
                    files.push(path.to_string());
                } else if is_requirement_flag(token) {
                    if let Some(path) = iter.next() {
                        files.push(path.clone());
                    }
                }
            }
        }
        files
    }
}

/// `--requirement`, `-r`, or a bundle of short flags ending in `r` such as `-qr`.
fn is_requirement_flag(token: &str) -> bool {
    if token == "--requirement" {
        return true;
    }
    match token.strip_prefix('-') {
        Some(short) if !short.starts_with('-') => {
            short.ends_with('r')
                && short.chars().all(|c| c.is_ascii_alphabetic())
                && short[..short.len() - 1].chars().all(|c| c != 'r')
        }
        _ => false,
    }
}

fn tokenize(tail: &str) -> Vec<String> {
    // Stop at the end of the simple command.
    let tail = tail.split([';', '|']).next().unwrap_or_default();
    tail.split_whitespace()
        .map(|t| t.trim_matches(|c| c == '"' || c == '\'').to_string())
        .filter(|t| !t.is_empty())
        .collect()
}

fn strip_flags(tail: &str, two_token_flags: &[&str], takes_value: fn(&str) -> bool) -> Vec<String> {
    let mut packages = Vec::new();
    let mut tokens = tokenize(tail).into_iter();
    while let Some(token) = tokens.next() {
        if two_token_flags.contains(&token.as_str()) || takes_value(&token) {
            tokens.next();
            continue;
        }
        if token.starts_with('-') {
            continue;
        }
        packages.push(token);
    }
    packages
}

/// Map requirements-file paths seen inside a container back to the sources
/// they were copied from. The most recent matching `COPY` wins; paths with no
/// matching copy are returned unchanged.
pub fn resolve_copied_files(requirement_files: &[String], copies: &[CopyInstruction]) -> Vec<String> {
    requirement_files
        .iter()
        .map(|req| {
            let req_norm = strip_dot_slash(req);
            copies
                .iter()
                .rev()
                .find_map(|copy| copied_source(req_norm, copy))
                .unwrap_or_else(|| req.clone())
        })
        .collect()
}

fn copied_source(requirement: &str, copy: &CopyInstruction) -> Option<String> {
    let destination = strip_dot_slash(&copy.destination);

    if destination == requirement && copy.sources.len() == 1 {
        return Some(copy.sources[0].clone());
    }

    let is_dir = copy.destination == "."
        || copy.destination == "./"
        || copy.destination.ends_with('/');
    if !is_dir {
        return None;
    }

    let dir = destination.trim_end_matches('/');
    let file_name = match dir {
        "" | "." => requirement,
        _ => requirement.strip_prefix(dir)?.strip_prefix('/')?,
    };

    copy.sources
        .iter()
        .find(|source| {
            Path::new(source.as_str())
                .file_name()
                .map(|n| n.to_string_lossy() == file_name)
                .unwrap_or(false)
        })
        .cloned()
}

fn strip_dot_slash(path: &str) -> &str {
    path.strip_prefix("./").unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cmds(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn copy(value: &str) -> CopyInstruction {
        CopyInstruction::parse(value).unwrap()
    }

    #[test]
    fn test_pip_flag_stripping() {
        let c = InstallClassifier::new().unwrap();
        assert_eq!(c.pip_packages(&cmds(&["pip install --no-cache -U numpy"])), vec!["numpy"]);
        assert_eq!(
            c.pip_packages(&cmds(&["python -m pip install --upgrade setuptools wheel"])),
            vec!["setuptools", "wheel"]
        );
        assert_eq!(
            c.pip_packages(&cmds(&[
                "pip3 install -i https://example.org/simple --extra-index-url https://x.y torch==2.0"
            ])),
            vec!["torch==2.0"]
        );
    }

    #[test]
    fn test_pip_requirement_file_is_not_a_package() {
        let c = InstallClassifier::new().unwrap();
        assert!(c
            .pip_packages(&cmds(&["pip install --no-cache -r requirements.txt"]))
            .is_empty());
        assert!(c.pip_packages(&cmds(&["%pip install -qr nbk-requirements.txt"])).is_empty());
        assert_eq!(
            c.pip_packages(&cmds(&["!pip install matplotlib", "%pip install numpy==1.23.4"])),
            vec!["matplotlib", "numpy==1.23.4"]
        );
    }

    #[test]
    fn test_pip_quoted_specifiers_and_trailing_commands() {
        let c = InstallClassifier::new().unwrap();
        assert_eq!(
            c.pip_packages(&cmds(&["pip install \"pandas>=1.5\" 'six' ; rm -rf /tmp/x"])),
            vec!["pandas>=1.5", "six"]
        );
    }

    #[test]
    fn test_apt_flag_stripping() {
        let c = InstallClassifier::new().unwrap();
        assert_eq!(
            c.apt_packages(&cmds(&["apt-get install -y zip htop screen"])),
            vec!["zip", "htop", "screen"]
        );
        assert_eq!(c.apt_packages(&cmds(&["apt-get -y install git"])), vec!["git"]);
        assert_eq!(
            c.apt_packages(&cmds(&[
                "sudo apt install -o Dpkg::Options::=--force-confnew --no-install-recommends vim"
            ])),
            vec!["vim"]
        );
        assert!(c.apt_packages(&cmds(&["apt-get update", "apt-cache show vim"])).is_empty());
    }

    #[test]
    fn test_requirement_files() {
        let c = InstallClassifier::new().unwrap();
        let files = c.requirement_files(&cmds(&[
            "pip install --no-cache -r requirements.txt",
            "pip install -U numpy",
            "%pip install -qr nbk-requirements.txt",
            "pip3 install --requirement=dev.txt --requirement other.txt",
        ]));
        assert_eq!(
            files,
            vec!["requirements.txt", "nbk-requirements.txt", "dev.txt", "other.txt"]
        );
    }

    #[test]
    fn test_is_requirement_flag() {
        assert!(is_requirement_flag("-r"));
        assert!(is_requirement_flag("-qr"));
        assert!(is_requirement_flag("--requirement"));
        assert!(!is_requirement_flag("-U"));
        assert!(!is_requirement_flag("--no-cache"));
        assert!(!is_requirement_flag("-rr"));
    }

    #[test]
    fn test_copy_into_directory() {
        let copies = vec![
            copy("requirements.txt ."),
            copy("./notebook/nbk-requirements.txt a_new_requirements_file.txt"),
            copy(". /usr/src/app"),
        ];
        let reqs = cmds(&["requirements.txt", "a_new_requirements_file.txt", "other.txt"]);
        assert_eq!(
            resolve_copied_files(&reqs, &copies),
            vec![
                "requirements.txt",
                "./notebook/nbk-requirements.txt",
                "other.txt"
            ]
        );
    }

    #[test]
    fn test_most_recent_copy_wins() {
        let copies = vec![copy("old/reqs.txt reqs.txt"), copy("new/reqs.txt reqs.txt")];
        assert_eq!(
            resolve_copied_files(&cmds(&["reqs.txt"]), &copies),
            vec!["new/reqs.txt"]
        );
    }

    #[test]
    fn test_copy_into_named_directory() {
        let copies = vec![copy("deps/requirements.txt setup.py /app/")];
        assert_eq!(
            resolve_copied_files(&cmds(&["/app/requirements.txt"]), &copies),
            vec!["deps/requirements.txt"]
        );
    }
}
