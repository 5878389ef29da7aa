use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use octocrab::models::issues::Issue;
use octocrab::models::pulls::PullRequest;
use octocrab::models::{Author, IssueState};
use octocrab::{params, Octocrab};
use std::env;
use std::process::Command;
use tracing::{debug, info, warn};

use crate::config::GitHubConfig;
use crate::error::SourceError;
use crate::models::User;
use crate::source::{
    Direction, ListOptions, RateLimit, RemoteIssue, RemoteLabel, RemotePullRequest,
    RemoteRepository, SortKey, Source, StateFilter,
};

/// [`Source`] backed by the GitHub REST API
pub struct GitHubSource {
    client: Octocrab,
}

/// GitHub authentication strategies
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthStrategy {
    /// Use GitHub CLI authentication
    GitHubCLI,
    /// Use environment variable token
    EnvironmentToken,
}

impl GitHubSource {
    /// Create a client using the configured authentication method
    pub fn new(config: &GitHubConfig) -> Result<Self> {
        let (auth_strategy, token) = Self::detect_authentication(&config.auth_method)?;

        info!("Using authentication strategy: {:?}", auth_strategy);

        let mut builder = Octocrab::builder().personal_token(token);
        if let Some(api_url) = &config.api_url {
            builder = builder
                .base_uri(api_url.as_str())
                .with_context(|| format!("Invalid GitHub API URL: {}", api_url))?;
        }

        let client = builder.build().context("Failed to create GitHub client")?;

        Ok(Self { client })
    }

    /// Unauthenticated client, subject to GitHub's anonymous rate limit
    pub fn anonymous(config: &GitHubConfig) -> Result<Self> {
        let mut builder = Octocrab::builder();
        if let Some(api_url) = &config.api_url {
            builder = builder
                .base_uri(api_url.as_str())
                .with_context(|| format!("Invalid GitHub API URL: {}", api_url))?;
        }

        let client = builder.build().context("Failed to create GitHub client")?;

        Ok(Self { client })
    }

    /// Detect and obtain GitHub authentication
    fn detect_authentication(auth_method: &str) -> Result<(AuthStrategy, String)> {
        match auth_method {
            "auto" => {
                if let Ok(token) = Self::try_github_cli() {
                    Ok((AuthStrategy::GitHubCLI, token))
                } else if let Ok(token) = Self::try_environment_token() {
                    Ok((AuthStrategy::EnvironmentToken, token))
                } else {
                    Err(anyhow!(
                        "No GitHub authentication found. Please either:\n\
                         1. Install and authenticate GitHub CLI: gh auth login\n\
                         2. Set GITHUB_TOKEN environment variable"
                    ))
                }
            }
            "gh_cli" => {
                let token = Self::try_github_cli()
                    .context("GitHub CLI authentication failed. Run: gh auth login")?;
                Ok((AuthStrategy::GitHubCLI, token))
            }
            "token" => {
                let token = Self::try_environment_token()
                    .context("GITHUB_TOKEN environment variable not found or invalid")?;
                Ok((AuthStrategy::EnvironmentToken, token))
            }
            other => Err(anyhow!("Unknown auth method: {}", other)),
        }
    }

    /// Try to get token from GitHub CLI
    fn try_github_cli() -> Result<String> {
        debug!("Attempting GitHub CLI authentication");

        if !Self::is_command_available("gh") {
            return Err(anyhow!("GitHub CLI (gh) is not installed"));
        }

        let auth_status = Command::new("gh")
            .args(["auth", "status"])
            .output()
            .context("Failed to check GitHub CLI auth status")?;

        if !auth_status.status.success() {
            return Err(anyhow!("GitHub CLI is not authenticated. Run: gh auth login"));
        }

        let token_output = Command::new("gh")
            .args(["auth", "token"])
            .output()
            .context("Failed to get GitHub CLI token")?;

        if !token_output.status.success() {
            return Err(anyhow!(
                "Failed to retrieve token from GitHub CLI: {}",
                String::from_utf8_lossy(&token_output.stderr)
            ));
        }

        let token = String::from_utf8(token_output.stdout)
            .context("GitHub CLI token is not valid UTF-8")?
            .trim()
            .to_string();

        if token.is_empty() {
            return Err(anyhow!("GitHub CLI returned empty token"));
        }

        Ok(token)
    }

    /// Try to get token from environment variable
    fn try_environment_token() -> Result<String> {
        debug!("Attempting environment variable authentication");

        let token = env::var("GITHUB_TOKEN").context("GITHUB_TOKEN environment variable not set")?;

        if token.is_empty() {
            return Err(anyhow!("GITHUB_TOKEN is empty"));
        }

        if !["ghp_", "gho_", "ghs_", "github_pat_"]
            .iter()
            .any(|prefix| token.starts_with(prefix))
        {
            warn!("GITHUB_TOKEN doesn't look like a GitHub token");
        }

        Ok(token)
    }

    /// Check if a command is available in PATH
    fn is_command_available(command: &str) -> bool {
        Command::new("which")
            .arg(command)
            .output()
            .map(|output| output.status.success())
            .unwrap_or(false)
    }
}

#[async_trait]
impl Source for GitHubSource {
    async fn get_repository(
        &self,
        owner: &str,
        name: &str,
    ) -> Result<RemoteRepository, SourceError> {
        debug!("Fetching repository {}/{}", owner, name);

        let repo = self
            .client
            .repos(owner, name)
            .get()
            .await
            .map_err(source_error)?;

        let created_at = repo.created_at.unwrap_or_default();
        Ok(RemoteRepository {
            full_name: repo
                .full_name
                .clone()
                .unwrap_or_else(|| format!("{}/{}", owner, name)),
            owner: repo
                .owner
                .as_ref()
                .map(|o| o.login.clone())
                .unwrap_or_else(|| owner.to_string()),
            name: repo.name,
            description: repo.description.unwrap_or_default(),
            url: repo.url.to_string(),
            html_url: repo.html_url.map(|u| u.to_string()).unwrap_or_default(),
            private: repo.private.unwrap_or(false),
            created_at,
            updated_at: repo.updated_at.unwrap_or(created_at),
        })
    }

    async fn list_pull_requests(
        &self,
        owner: &str,
        name: &str,
        options: &ListOptions,
    ) -> Result<Vec<RemotePullRequest>, SourceError> {
        let sort = match options.sort {
            SortKey::Created => params::pulls::Sort::Created,
            SortKey::Updated => params::pulls::Sort::Updated,
        };

        let page = self
            .client
            .pulls(owner, name)
            .list()
            .state(state_param(options.state))
            .sort(sort)
            .direction(direction_param(options.direction))
            .per_page(options.per_page)
            .send()
            .await
            .map_err(source_error)?;

        debug!("Fetched {} pull requests for {}/{}", page.items.len(), owner, name);
        Ok(page.items.into_iter().map(remote_pull_request).collect())
    }

    async fn list_issues(
        &self,
        owner: &str,
        name: &str,
        options: &ListOptions,
    ) -> Result<Vec<RemoteIssue>, SourceError> {
        let sort = match options.sort {
            SortKey::Created => params::issues::Sort::Created,
            SortKey::Updated => params::issues::Sort::Updated,
        };

        let page = self
            .client
            .issues(owner, name)
            .list()
            .state(state_param(options.state))
            .sort(sort)
            .direction(direction_param(options.direction))
            .per_page(options.per_page)
            .send()
            .await
            .map_err(source_error)?;

        debug!("Fetched {} issues for {}/{}", page.items.len(), owner, name);
        Ok(page.items.into_iter().map(remote_issue).collect())
    }

    async fn rate_limit(&self) -> Result<RateLimit, SourceError> {
        let limits = self.client.ratelimit().get().await.map_err(source_error)?;
        let core = limits.resources.core;

        Ok(RateLimit {
            limit: core.limit as u64,
            remaining: core.remaining as u64,
            reset: core.reset as i64,
        })
    }
}

fn state_param(state: StateFilter) -> params::State {
    match state {
        StateFilter::Open => params::State::Open,
        StateFilter::Closed => params::State::Closed,
        StateFilter::All => params::State::All,
    }
}

fn direction_param(direction: Direction) -> params::Direction {
    match direction {
        Direction::Asc => params::Direction::Ascending,
        Direction::Desc => params::Direction::Descending,
    }
}

fn issue_state_name(state: &IssueState) -> String {
    match state {
        IssueState::Open => "open".to_string(),
        IssueState::Closed => "closed".to_string(),
        _ => "unknown".to_string(),
    }
}

fn user_from_author(author: &Author) -> User {
    User {
        login: author.login.clone(),
        avatar_url: author.avatar_url.to_string(),
        url: author.url.to_string(),
        html_url: author.html_url.to_string(),
    }
}

fn remote_label(label: octocrab::models::Label) -> RemoteLabel {
    RemoteLabel {
        name: label.name,
        color: label.color,
        description: label.description.unwrap_or_default(),
    }
}

fn remote_pull_request(pr: PullRequest) -> RemotePullRequest {
    let created_at = pr.created_at.unwrap_or_default();
    RemotePullRequest {
        number: pr.number,
        title: pr.title.unwrap_or_default(),
        body: pr.body.unwrap_or_default(),
        state: pr
            .state
            .as_ref()
            .map(issue_state_name)
            .unwrap_or_else(|| "unknown".to_string()),
        url: pr.url,
        html_url: pr.html_url.map(|u| u.to_string()).unwrap_or_default(),
        user: pr
            .user
            .as_deref()
            .map(user_from_author)
            .unwrap_or_default(),
        created_at,
        updated_at: pr.updated_at.unwrap_or(created_at),
        closed_at: pr.closed_at,
        merged_at: pr.merged_at,
        labels: pr
            .labels
            .unwrap_or_default()
            .into_iter()
            .map(remote_label)
            .collect(),
    }
}

fn remote_issue(issue: Issue) -> RemoteIssue {
    RemoteIssue {
        number: issue.number,
        title: issue.title,
        body: issue.body.unwrap_or_default(),
        state: issue_state_name(&issue.state),
        url: issue.url.to_string(),
        html_url: issue.html_url.to_string(),
        user: user_from_author(&issue.user),
        created_at: issue.created_at,
        updated_at: issue.updated_at,
        closed_at: issue.closed_at,
        labels: issue.labels.into_iter().map(remote_label).collect(),
        is_pull_request: issue.pull_request.is_some(),
    }
}

fn source_error(err: octocrab::Error) -> SourceError {
    match err {
        octocrab::Error::GitHub { source, .. } => {
            classify_status(source.status_code.as_u16(), source.message.clone())
        }
        other => SourceError::Transport(other.to_string()),
    }
}

/// Map an HTTP failure status from the API onto a [`SourceError`]
fn classify_status(status: u16, message: String) -> SourceError {
    match status {
        401 => SourceError::Auth(message),
        404 => SourceError::NotFound(message),
        _ => SourceError::Api { status, message },
    }
}
