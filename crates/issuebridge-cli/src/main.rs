//! Issuebridge CLI - migrate a Bitbucket issue tracker to GitHub.

mod cli;
mod credentials;
mod settings;

use anyhow::{bail, Context, Result};
use clap::Parser;
use cli::Cli;
use credentials::{CredentialProvider, Explicit, Keyring, Prompt};
use issuebridge_migrate::{
    ArchiveSource, BitbucketSource, ConsoleProgressReporter, IssueSource,
    JsonFileCheckpointStore, MigrationConfig, MigrationDriver, MigrationProgress,
};
use settings::Settings;
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            format!("issuebridge={log_level},issuebridge_migrate={log_level}").into()
        }))
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let file = settings::load_file_config(cli.config.as_deref())?;
    let Settings {
        config,
        options,
        archive,
        checkpoint,
        source_user,
    } = Settings::resolve(&cli, &file)?;
    let dry_run = options.dry_run;

    let config = with_github_token(config, &cli, dry_run)?;

    let (config, source): (MigrationConfig, Box<dyn IssueSource>) = match archive {
        Some(path) => {
            info!(path = %path.display(), "Reading export archive");
            let source = ArchiveSource::open(&path)
                .with_context(|| format!("Failed to read archive {}", path.display()))?;
            (config, Box::new(source))
        }
        None => {
            let config = match source_user {
                Some(user) => with_source_password(config, &cli, user)?,
                None => config,
            };
            let source = BitbucketSource::new(&config)?;
            if config.source_credentials.is_none() && source.probe_auth_required().await? {
                bail!(
                    "The issue tracker of {} requires authentication; pass --source-user",
                    config.source_repo
                );
            }
            (config, Box::new(source))
        }
    };

    let mut driver = MigrationDriver::new(config, options, source)?;
    if let Some(path) = &checkpoint {
        info!(path = %path.display(), "Using checkpoint");
        driver = driver.with_checkpoint(Box::new(JsonFileCheckpointStore::open(path)?));
    }

    // Dry-run payloads go to stdout; keep the bar out of the way.
    let reporter = (!dry_run).then(ConsoleProgressReporter::new);
    if let Some(reporter) = &reporter {
        driver = driver.with_progress(MigrationProgress::with_callback(reporter.callback()));
    }

    let result = driver.run().await;
    if let Some(reporter) = &reporter {
        reporter.finish(if result.is_ok() { "done" } else { "failed" });
    }

    let report = result?;
    report.print_summary();
    Ok(())
}

/// Attach a GitHub token. A live run cannot proceed without one; a dry run
/// only performs read-only lookups and falls back to anonymous access.
fn with_github_token(config: MigrationConfig, cli: &Cli, dry_run: bool) -> Result<MigrationConfig> {
    let account = credentials::github_account(&config.target_api_url);
    let explicit = Explicit::new(cli.github_token.clone());
    let prompt = Prompt::new("GitHub token: ");

    let mut providers: Vec<&dyn CredentialProvider> = Vec::with_capacity(3);
    providers.push(&explicit);
    providers.push(&Keyring);
    if !dry_run {
        providers.push(&prompt);
    }

    match credentials::resolve(&providers, &account)? {
        Some(token) => {
            if cli.save_credentials {
                credentials::store(&account, &token)?;
            }
            Ok(config.with_target_token(token))
        }
        None if dry_run => {
            warn!("No GitHub token found; user lookups are unauthenticated");
            Ok(config)
        }
        None => bail!("A GitHub token is required; pass --github-token or set GITHUB_TOKEN"),
    }
}

fn with_source_password(config: MigrationConfig, cli: &Cli, user: String) -> Result<MigrationConfig> {
    let account = credentials::bitbucket_account(&user);
    let explicit = Explicit::new(cli.source_password.clone());
    let prompt = Prompt::new(format!("Bitbucket password for {user}: "));

    let providers: [&dyn CredentialProvider; 3] = [&explicit, &Keyring, &prompt];
    let Some(password) = credentials::resolve(&providers, &account)? else {
        bail!("No password for Bitbucket user {user}; set BITBUCKET_PASSWORD");
    };
    if cli.save_credentials {
        credentials::store(&account, &password)?;
    }
    Ok(config.with_source_credentials(user, password))
}
