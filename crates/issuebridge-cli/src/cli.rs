//! Command-line arguments.

use clap::Parser;
use issuebridge_migrate::RepoSlug;
use std::path::PathBuf;

/// Migrate a Bitbucket issue tracker into GitHub, keeping issue numbers.
#[derive(Parser, Debug)]
#[command(name = "issuebridge")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Source Bitbucket repository
    #[arg(long, value_name = "OWNER/REPO")]
    pub source: Option<RepoSlug>,

    /// Target GitHub repository; its issue tracker must be empty
    #[arg(long, value_name = "OWNER/REPO")]
    pub target: Option<RepoSlug>,

    /// Read issues from a Bitbucket export (.zip or db-1.0.json)
    #[arg(long, value_name = "PATH")]
    pub archive: Option<PathBuf>,

    /// Print the converted issues instead of importing them
    #[arg(long)]
    pub dry_run: bool,

    /// Skip the first N source issues
    #[arg(long, value_name = "N")]
    pub skip: Option<u64>,

    /// Map a Bitbucket username to a GitHub username
    #[arg(long = "map-user", value_name = "BB=GH", value_parser = parse_user_mapping)]
    pub map_user: Vec<(String, String)>,

    /// Link changeset references to Bitbucket instead of removing them
    #[arg(long)]
    pub link_changesets: bool,

    /// Add a comment for every field change (status, assignee, ...)
    #[arg(long)]
    pub annotate_changes: bool,

    /// List attachment names in the issue body
    #[arg(long)]
    pub annotate_attachments: bool,

    /// Record progress in this file so an interrupted run can resume
    #[arg(long, value_name = "PATH")]
    pub checkpoint: Option<PathBuf>,

    /// Configuration file (default: <config dir>/issuebridge/config.toml)
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Bitbucket username for a private tracker
    #[arg(long, value_name = "NAME")]
    pub source_user: Option<String>,

    /// Bitbucket password or app password
    #[arg(long, env = "BITBUCKET_PASSWORD", hide_env_values = true)]
    pub source_password: Option<String>,

    /// GitHub token with push access to the target
    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    pub github_token: Option<String>,

    /// Store the credentials used by this run in the system keyring
    #[arg(long)]
    pub save_credentials: bool,
}

/// Parse a `bitbucket=github` username pair.
pub fn parse_user_mapping(value: &str) -> Result<(String, String), String> {
    let (source, target) = value
        .split_once('=')
        .ok_or_else(|| format!("expected BB=GH, got '{value}'"))?;
    let (source, target) = (source.trim(), target.trim());
    if source.is_empty() || target.is_empty() {
        return Err(format!("expected BB=GH, got '{value}'"));
    }
    Ok((source.to_string(), target.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_user_mapping() {
        assert_eq!(
            parse_user_mapping("bbuser=ghuser").unwrap(),
            ("bbuser".to_string(), "ghuser".to_string())
        );
        assert_eq!(
            parse_user_mapping(" a = b ").unwrap(),
            ("a".to_string(), "b".to_string())
        );
        assert!(parse_user_mapping("nobody").is_err());
        assert!(parse_user_mapping("=gh").is_err());
        assert!(parse_user_mapping("bb=").is_err());
    }

    #[test]
    fn test_parse_flags() {
        let cli = Cli::try_parse_from([
            "issuebridge",
            "--source",
            "bb/repo",
            "--target",
            "gh/repo",
            "--dry-run",
            "--skip",
            "3",
            "--map-user",
            "a=b",
            "--map-user",
            "c=d",
            "-vv",
        ])
        .unwrap();

        assert_eq!(cli.source.unwrap().to_string(), "bb/repo");
        assert!(cli.dry_run);
        assert_eq!(cli.skip, Some(3));
        assert_eq!(cli.map_user.len(), 2);
        assert_eq!(cli.verbose, 2);
    }

    #[test]
    fn test_rejects_bad_slug() {
        assert!(Cli::try_parse_from(["issuebridge", "--source", "nope"]).is_err());
    }

    #[test]
    fn test_command_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
