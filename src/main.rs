//! `license-auditr`: find the pip and apt packages a repository installs,
//! resolve their licenses, and check them against policy.
//!
//! # Flow
//! 1. Parse CLI arguments ([`cli`]) and set up logging.
//! 2. Load policy config and the repository ignore file ([`config`]), compile
//!    it into a [`license::policy::Policy`].
//! 3. Collect source files, explicit or discovered ([`detector`]).
//! 4. Extract install commands from recipes ([`recipe`]) and resolve packages
//!    ([`resolver`], [`registry`]) via [`scan::Auditor`].
//! 5. Extract problem packages ([`problems`]).
//! 6. Render the requested report ([`report`]).
//! 7. Exit `0` (clean), `1` (problems) or `2` (fatal setup error).

mod cli;
mod config;
mod detector;
mod error;
mod license;
mod models;
mod problems;
mod recipe;
mod registry;
mod report;
mod resolver;
mod scan;

use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::Parser;
use colored::Colorize;
use tracing::{debug, info};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use cli::{Cli, ReportFormat};
use config::{apply_ignore_file, load_config};
use error::{AuditError, EXIT_CLEAN, EXIT_FATAL, EXIT_PROBLEMS};
use license::policy::Policy;
use problems::extract_problem_packages;
use registry::apt_index::AptCacheIndex;
use registry::ubuntu::UbuntuChangelogs;
use report::JsonReport;
use resolver::apt::{AptResolver, LicenseCache};
use resolver::installer::IsolatedInstaller;
use resolver::marker::{detect_python_version, MarkerEnvironment};
use scan::{Auditor, ScanPlan};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.log_level());

    let code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {:#}", "error:".red().bold(), e);
            EXIT_FATAL
        }
    };
    std::process::exit(code);
}

fn init_tracing(default_level: &str) {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with(fmt::layer().with_writer(std::io::stderr).without_time())
        .init();
}

async fn run(cli: Cli) -> Result<i32> {
    let repository = cli
        .repository
        .canonicalize()
        .map_err(|_| AuditError::RepositoryNotFound {
            path: cli.repository.clone(),
        })?;

    // Everything fatal happens before the first package is resolved.
    let mut config = load_config(&repository, cli.config.as_deref())?;
    apply_ignore_file(&mut config, &repository);
    let policy = Policy::from_config(&config)?;
    debug!("License allow-list: {:?}", policy.license_patterns());

    let plan = build_plan(&cli, &repository)?;

    let python_version = match config.pip.python_version.clone() {
        Some(version) => Some(version),
        None => detect_python_version().await,
    };
    let marker_env = MarkerEnvironment::current(python_version);

    let client = registry::build_client()?;
    let apt = AptResolver::new(
        Box::new(AptCacheIndex),
        Box::new(UbuntuChangelogs::new(client.clone())),
        LicenseCache::new(config.apt.cache_dir()),
        cli.apt_no_cache,
    )
    .with_progress(!cli.quiet);
    let installer = IsolatedInstaller::new(
        config
            .pip
            .install_script
            .as_ref()
            .map(|script| repository.join(script)),
    );
    let auditor = Auditor::new(policy, client, marker_env, Box::new(installer), apt)?;

    let results = auditor.run(&plan).await;

    let include_transitive = !cli.exclude_transitive_licenses;
    let problems = extract_problem_packages(&results, include_transitive);
    let failed = problems.has_failures(cli.fail_on_transitive);

    match cli.report {
        ReportFormat::Terminal => {
            report::terminal::render(
                &results,
                &problems,
                &repository,
                include_transitive,
                cli.verbose > 0,
                cli.quiet,
            )?;
        }
        ReportFormat::Json => {
            JsonReport {
                repository: &repository,
                all_passed: !failed,
                results: &results,
                problems: &problems,
            }
            .write(cli.output.as_deref())?;
        }
    }

    Ok(if failed { EXIT_PROBLEMS } else { EXIT_CLEAN })
}

fn build_plan(cli: &Cli, repository: &Path) -> Result<ScanPlan> {
    let ignore_paths: Vec<PathBuf> = cli
        .ignore_paths
        .iter()
        .map(|p| {
            let path = if p.is_absolute() { p.clone() } else { repository.join(p) };
            path.canonicalize().unwrap_or(path)
        })
        .collect();

    let pip_snapshots = match (&cli.pip_before_install, &cli.pip_after_install) {
        (Some(before), Some(after)) => Some((before.clone(), after.clone())),
        _ => None,
    };

    let plan = ScanPlan {
        repository: repository.to_path_buf(),
        pip_files: collect_files(
            repository,
            &ignore_paths,
            &cli.pip_requirements_files,
            cli.find_pip_files,
            &cli.find_pip_files_names,
        )?,
        pip_snapshots,
        apt_files: collect_files(
            repository,
            &ignore_paths,
            &cli.apt_requirements_files,
            cli.find_apt_files,
            &cli.find_apt_files_names,
        )?,
        dockerfiles: collect_files(
            repository,
            &ignore_paths,
            &cli.dockerfiles,
            cli.find_dockerfiles,
            &cli.find_dockerfiles_names,
        )?,
        bash_files: collect_files(
            repository,
            &ignore_paths,
            &cli.bash_files,
            cli.find_bash_files,
            &cli.find_bash_files_names,
        )?,
        notebooks: collect_files(
            repository,
            &ignore_paths,
            &cli.notebook_files,
            cli.find_notebooks,
            &cli.find_notebook_names,
        )?,
        follow_docker: cli.follow_docker(),
        follow_bash: cli.follow_bash(),
        follow_notebook: cli.follow_notebook(),
    };
    info!("Scan plan: {:?}", plan);
    Ok(plan)
}

/// Explicit files first, then discovered ones not already listed.
fn collect_files(
    repository: &Path,
    ignore_paths: &[PathBuf],
    explicit: &[PathBuf],
    find: bool,
    names: &[String],
) -> Result<Vec<PathBuf>> {
    let mut all = explicit.to_vec();
    if find {
        for found in detector::find_files(repository, names, ignore_paths)? {
            if !all.contains(&found) {
                all.push(found);
            }
        }
    }
    Ok(all)
}
