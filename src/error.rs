use std::path::PathBuf;

use thiserror::Error;

/// Exit code when the run finished and no failing problem packages were found.
pub const EXIT_CLEAN: i32 = 0;
/// Exit code when at least one package failed the license policy.
pub const EXIT_PROBLEMS: i32 = 1;
/// Exit code for fatal setup errors (bad config, missing repository, ...).
pub const EXIT_FATAL: i32 = 2;

/// Errors raised by the audit pipeline.
///
/// `Config`, `InvalidPattern` and `RepositoryNotFound` are fatal and only ever
/// produced before resolution starts. The remaining variants describe
/// degrade-and-continue failures: callers log them and carry on with the next
/// candidate, file or package.
#[derive(Debug, Error)]
pub enum AuditError {
    #[error("Failed to load config file: {path}\nDetails: {details}")]
    Config { path: PathBuf, details: String },

    #[error("Invalid license allow-list pattern `{pattern}`: {details}")]
    InvalidPattern { pattern: String, details: String },

    #[error("Repository not found: {path}")]
    RepositoryNotFound { path: PathBuf },

    #[error("Invalid requirement `{line}`: {reason}")]
    RequirementParse { line: String, reason: String },

    #[error("Failed to fetch {url}: {details}")]
    Fetch { url: String, details: String },

    #[error("Isolated install failed for {path}: {details}")]
    InstallFailed { path: PathBuf, details: String },
}
