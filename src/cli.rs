use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    name = "license-auditr",
    about = "Audit the licenses of pip and apt dependencies installed by a repository",
    version
)]
pub struct Cli {
    /// Repository to scan
    #[arg(long, default_value = ".")]
    pub repository: PathBuf,

    /// Policy config file [default: <repo>/.license-auditr/config.toml, fallback ~/.config/license-auditr/config.toml]
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// pip requirements files, relative to the repository
    #[arg(long, num_args = 1.., value_name = "FILE")]
    pub pip_requirements_files: Vec<PathBuf>,

    /// Search the repository for pip requirements files
    #[arg(long)]
    pub find_pip_files: bool,

    /// File names to search for with --find-pip-files
    #[arg(long, num_args = 1.., default_value = "requirements.txt")]
    pub find_pip_files_names: Vec<String>,

    /// Snapshot of installed packages before install (CSV). Skips the isolated install.
    #[arg(long, value_name = "CSV", requires = "pip_after_install")]
    pub pip_before_install: Option<PathBuf>,

    /// Snapshot of installed packages after install (CSV)
    #[arg(long, value_name = "CSV", requires = "pip_before_install")]
    pub pip_after_install: Option<PathBuf>,

    /// Files listing apt packages, one per line
    #[arg(long, num_args = 1.., value_name = "FILE")]
    pub apt_requirements_files: Vec<PathBuf>,

    /// Search the repository for apt requirements files
    #[arg(long)]
    pub find_apt_files: bool,

    /// File names to search for with --find-apt-files
    #[arg(long, num_args = 1.., default_value = "required_apt_packages.txt")]
    pub find_apt_files_names: Vec<String>,

    /// Refetch apt copyright files instead of reading the local cache
    #[arg(long)]
    pub apt_no_cache: bool,

    /// Dockerfiles, relative to the repository
    #[arg(long, num_args = 1.., value_name = "FILE")]
    pub dockerfiles: Vec<PathBuf>,

    /// Search the repository for Dockerfiles
    #[arg(long)]
    pub find_dockerfiles: bool,

    /// File names to search for with --find-dockerfiles
    #[arg(long, num_args = 1.., default_value = "Dockerfile")]
    pub find_dockerfiles_names: Vec<String>,

    /// Don't resolve requirements files installed by Dockerfiles
    #[arg(long)]
    pub docker_no_follow_requirements_files: bool,

    /// Bash scripts, relative to the repository
    #[arg(long, num_args = 1.., value_name = "FILE")]
    pub bash_files: Vec<PathBuf>,

    /// Search the repository for bash scripts
    #[arg(long)]
    pub find_bash_files: bool,

    /// File names to search for with --find-bash-files
    #[arg(long, num_args = 1.., default_value = "*.sh")]
    pub find_bash_files_names: Vec<String>,

    /// Don't resolve requirements files installed by bash scripts
    #[arg(long)]
    pub bash_no_follow_requirements_files: bool,

    /// Jupyter notebooks, relative to the repository
    #[arg(long, num_args = 1.., value_name = "FILE")]
    pub notebook_files: Vec<PathBuf>,

    /// Search the repository for notebooks
    #[arg(long)]
    pub find_notebooks: bool,

    /// File names to search for with --find-notebooks
    #[arg(long, num_args = 1.., default_value = "*.ipynb")]
    pub find_notebook_names: Vec<String>,

    /// Don't resolve requirements files installed by notebooks
    #[arg(long)]
    pub notebook_no_follow_requirements_files: bool,

    /// Don't resolve requirements files installed by any recipe
    #[arg(long)]
    pub no_follow_requirements_files: bool,

    /// Paths excluded from --find-* searches (repeatable)
    #[arg(long, num_args = 1.., value_name = "PATH")]
    pub ignore_paths: Vec<PathBuf>,

    /// Ignore the bundled-file licenses of apt packages
    #[arg(long)]
    pub exclude_transitive_licenses: bool,

    /// Exit non-zero for problems in transitive pip packages too
    #[arg(long)]
    pub fail_on_transitive: bool,

    /// Report format
    #[arg(long, default_value = "terminal", value_name = "FORMAT")]
    pub report: ReportFormat,

    /// Write the JSON report to this file instead of stdout
    #[arg(long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// More logging: -v for info, -vv for debug
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Only print the summary; hide progress bars
    #[arg(short, long)]
    pub quiet: bool,
}

#[derive(Debug, Clone, clap::ValueEnum)]
pub enum ReportFormat {
    Terminal,
    Json,
}

impl Cli {
    pub fn follow_docker(&self) -> bool {
        !(self.no_follow_requirements_files || self.docker_no_follow_requirements_files)
    }

    pub fn follow_bash(&self) -> bool {
        !(self.no_follow_requirements_files || self.bash_no_follow_requirements_files)
    }

    pub fn follow_notebook(&self) -> bool {
        !(self.no_follow_requirements_files || self.notebook_no_follow_requirements_files)
    }

    /// Default log filter directive for the `-v` count.
    pub fn log_level(&self) -> &'static str {
        match self.verbose {
            0 => "warn",
            1 => "info",
            _ => "debug",
        }
    }
}
