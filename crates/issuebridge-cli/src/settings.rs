//! Merging the configuration file with command-line flags.

use crate::cli::Cli;
use anyhow::{anyhow, Context, Result};
use issuebridge_migrate::{ChangesetMode, FileConfig, MigrationConfig, MigrationOptions};
use std::path::{Path, PathBuf};

/// Everything a run needs apart from secrets.
#[derive(Debug)]
pub struct Settings {
    pub config: MigrationConfig,
    pub options: MigrationOptions,
    pub archive: Option<PathBuf>,
    pub checkpoint: Option<PathBuf>,
    pub source_user: Option<String>,
}

/// Default location of the configuration file.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("issuebridge").join("config.toml"))
}

/// Load the file named on the command line, or the default file if it
/// exists. A missing default file is not an error.
pub fn load_file_config(explicit: Option<&Path>) -> Result<FileConfig> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => match default_config_path() {
            Some(path) if path.exists() => path,
            _ => return Ok(FileConfig::default()),
        },
    };

    tracing::debug!(path = %path.display(), "Loading configuration");
    FileConfig::load(&path).with_context(|| format!("Failed to load {}", path.display()))
}

impl Settings {
    /// Combine file values with flags. Flags win.
    pub fn resolve(cli: &Cli, file: &FileConfig) -> Result<Self> {
        let source = cli
            .source
            .clone()
            .or_else(|| file.source.repo.clone())
            .ok_or_else(|| anyhow!("No source repository given; pass --source OWNER/REPO"))?;
        let target = cli
            .target
            .clone()
            .or_else(|| file.target.repo.clone())
            .ok_or_else(|| anyhow!("No target repository given; pass --target OWNER/REPO"))?;

        let mut config = MigrationConfig::new(source, target);
        if let Some(url) = &file.source.api_url {
            config = config.with_source_api_url(url.clone());
        }
        if let Some(url) = &file.source.web_url {
            config = config.with_source_web_url(url.clone());
        }
        if let Some(url) = &file.target.api_url {
            config = config.with_target_api_url(url.clone());
        }
        if let Some(url) = &file.target.web_url {
            config = config.with_target_web_url(url.clone());
        }
        config.validate()?;

        let mut options = file.options().with_dry_run(cli.dry_run);
        if let Some(skip) = cli.skip {
            options = options.with_skip(skip);
        }
        if cli.link_changesets {
            options = options.with_changeset_mode(ChangesetMode::Link);
        }
        if cli.annotate_changes {
            options = options.with_change_annotations(true);
        }
        if cli.annotate_attachments {
            options = options.with_attachment_annotations(true);
        }
        for (source_user, target_user) in &cli.map_user {
            options = options.with_user_mapping(source_user, target_user);
        }

        Ok(Self {
            config,
            options,
            archive: cli.archive.clone().or_else(|| file.source.archive.clone()),
            checkpoint: cli
                .checkpoint
                .clone()
                .or_else(|| file.options.checkpoint.clone()),
            source_user: cli
                .source_user
                .clone()
                .or_else(|| file.source.username.clone()),
        })
    }
}
