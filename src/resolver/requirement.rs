use std::path::Path;

use anyhow::Result;
use regex::Regex;
use tracing::{debug, warn};

use crate::error::AuditError;

use super::wheel;

const VCS_PREFIXES: [&str; 4] = ["git+", "hg+", "svn+", "bzr+"];

/// A requested dependency before resolution.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RequirementSpec {
    pub name: String,
    pub extras: Vec<String>,
    /// Version specifier such as `==1.2.3` or `>=1,<2`.
    pub specifier: Option<String>,
    /// VCS or wheel URL given with `name @ url` or recovered from the line.
    pub url: Option<String>,
    pub marker: Option<String>,
}

impl RequirementSpec {
    /// Name used to match installed distributions.
    pub fn key(&self) -> String {
        normalize_name(&self.name)
    }
}

/// PEP 503 normalisation: lowercase, runs of `-`, `_` and `.` become `-`.
pub fn normalize_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut in_separator = false;
    for c in name.chars() {
        if matches!(c, '-' | '_' | '.') {
            if !in_separator {
                out.push('-');
            }
            in_separator = true;
        } else {
            out.extend(c.to_lowercase());
            in_separator = false;
        }
    }
    out
}

/// Parse one PEP 508 requirement line.
pub fn parse_requirement(line: &str) -> Result<RequirementSpec, AuditError> {
    let fail = |reason: &str| AuditError::RequirementParse {
        line: line.to_string(),
        reason: reason.to_string(),
    };

    let (body, marker) = match line.split_once(';') {
        Some((body, marker)) => (body.trim(), Some(marker.trim().to_string())),
        None => (line.trim(), None),
    };
    if marker.as_deref() == Some("") {
        return Err(fail("empty environment marker"));
    }

    let head = Regex::new(r"^([A-Za-z0-9](?:[A-Za-z0-9._-]*[A-Za-z0-9])?)\s*(?:\[([^\]]*)\])?\s*(.*)$")
        .map_err(|e| fail(&e.to_string()))?;
    let caps = head.captures(body).ok_or_else(|| fail("missing package name"))?;

    let name = caps[1].to_string();
    let extras: Vec<String> = caps
        .get(2)
        .map(|m| {
            m.as_str()
                .split(',')
                .map(str::trim)
                .filter(|e| !e.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    let rest = caps[3].trim();

    let mut spec = RequirementSpec {
        name,
        extras,
        marker,
        ..Default::default()
    };

    if let Some(url) = rest.strip_prefix('@') {
        let url = url.trim();
        if url.is_empty() || url.contains(char::is_whitespace) {
            return Err(fail("invalid URL"));
        }
        spec.url = Some(url.to_string());
        return Ok(spec);
    }

    if !rest.is_empty() {
        spec.specifier = Some(parse_specifier(rest).ok_or_else(|| fail("invalid version specifier"))?);
    }
    Ok(spec)
}

fn parse_specifier(text: &str) -> Option<String> {
    let text = text.trim();
    let text = match text.strip_prefix('(') {
        Some(inner) => inner.strip_suffix(')')?,
        None => text,
    };

    let clause = Regex::new(r"^(===|~=|==|!=|<=|>=|<|>)\s*([A-Za-z0-9.*+!_-]+)$").ok()?;
    let mut clauses = Vec::new();
    for part in text.split(',') {
        let caps = clause.captures(part.trim())?;
        clauses.push(format!("{}{}", &caps[1], &caps[2]));
    }
    Some(clauses.join(","))
}

/// Recover `(name, url)` from a VCS requirement such as
/// `-e git+https://host/org/repo.git@ref`.
pub fn name_url_from_repo(line: &str) -> Option<(String, Option<String>)> {
    let name_re = Regex::new(r".*/([^/]+)\.git").ok()?;
    let url_re = Regex::new(r"(?:.* )?([^ ]+\.git.*$)").ok()?;

    let name = match name_re.captures(line) {
        Some(caps) => caps[1].to_string(),
        None => egg_name(line)?,
    };
    let url = url_re
        .captures(line.trim())
        .map(|caps| caps[1].to_string())
        .or_else(|| {
            line.split_whitespace()
                .last()
                .filter(|u| VCS_PREFIXES.iter().any(|p| u.starts_with(p)))
                .map(str::to_string)
        });

    Some((name, url))
}

fn egg_name(line: &str) -> Option<String> {
    let (_, fragment) = line.split_once("#egg=")?;
    let name = fragment.split('&').next()?.trim();
    (!name.is_empty()).then(|| name.to_string())
}

/// What a single requirements-file line turned into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequirementLine {
    Spec(RequirementSpec),
    /// A wheel URL whose metadata must be fetched to learn the name.
    Wheel(String),
    /// Option lines, unparseable lines.
    Skipped,
}

/// Classify one logical requirements-file line (comments already removed).
pub fn classify_line(line: &str) -> RequirementLine {
    let line = line.trim();
    if line.is_empty() {
        return RequirementLine::Skipped;
    }

    let editable = line
        .strip_prefix("--editable")
        .or_else(|| line.strip_prefix("-e"))
        .map(|rest| rest.trim_start_matches('=').trim());

    let candidate = match editable {
        Some(target) => target,
        None if line.starts_with('-') => {
            debug!("Skipping requirements option line: {}", line);
            return RequirementLine::Skipped;
        }
        None => line,
    };

    // A bare wheel file name is also a valid-looking project name.
    let uri = candidate.split_whitespace().next().unwrap_or_default();
    if uri.ends_with(".whl") {
        return RequirementLine::Wheel(uri.to_string());
    }

    if editable.is_none() {
        match parse_requirement(candidate) {
            Ok(spec) => return RequirementLine::Spec(spec),
            Err(e) => debug!("{}; trying URL fallbacks", e),
        }
    }

    if VCS_PREFIXES.iter().any(|p| candidate.starts_with(p)) {
        if let Some((name, url)) = name_url_from_repo(candidate) {
            warn!(
                "Falling back to pattern matching for repository requirement, which may be inaccurate: {} -> {}",
                line, name
            );
            return RequirementLine::Spec(RequirementSpec {
                name,
                url,
                ..Default::default()
            });
        }
    }

    warn!("Could not parse requirement `{}`; it will be skipped", line);
    RequirementLine::Skipped
}

/// Logical lines of a requirements file: comments stripped, continuations joined.
pub fn logical_lines(text: &str) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();

    for raw in text.lines() {
        let without_comment = strip_comment(raw);
        match without_comment.strip_suffix('\\') {
            Some(head) => {
                current.push_str(head.trim());
                current.push(' ');
            }
            None => {
                current.push_str(without_comment.trim());
                let line = current.trim().to_string();
                if !line.is_empty() {
                    lines.push(line);
                }
                current.clear();
            }
        }
    }
    if !current.trim().is_empty() {
        lines.push(current.trim().to_string());
    }
    lines
}

fn strip_comment(line: &str) -> &str {
    let trimmed = line.trim_end();
    if trimmed.trim_start().starts_with('#') {
        return "";
    }
    // `#` only starts a comment after whitespace, so `#egg=` fragments survive.
    match trimmed.find(" #").or_else(|| trimmed.find("\t#")) {
        Some(idx) => &trimmed[..idx],
        None => trimmed,
    }
}

/// Parse requirements text, fetching wheel metadata where needed. Local
/// wheel paths are resolved against `base_dir`.
pub async fn parse_requirements_text(
    text: &str,
    base_dir: &Path,
    client: &reqwest::Client,
) -> Vec<RequirementSpec> {
    let mut specs = Vec::new();
    for line in logical_lines(text) {
        match classify_line(&line) {
            RequirementLine::Spec(spec) => specs.push(spec),
            RequirementLine::Wheel(uri) => {
                if let Some(spec) = wheel::requirement_from_wheel_uri(client, &uri, base_dir).await {
                    specs.push(spec);
                }
            }
            RequirementLine::Skipped => {}
        }
    }
    specs
}

/// Parse a requirements file. A missing or unreadable file yields no requirements.
pub async fn parse_requirements_file(path: &Path, client: &reqwest::Client) -> Vec<RequirementSpec> {
    match std::fs::read_to_string(path) {
        Ok(text) => {
            let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
            parse_requirements_text(&text, base_dir, client).await
        }
        Err(e) => {
            warn!("Failed loading requirements for file {}: {}", path.display(), e);
            Vec::new()
        }
    }
}
