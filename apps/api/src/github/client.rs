use std::time::Duration;

use reqwest::{header, Client, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

const USER_AGENT: &str = concat!("renforce/", env!("CARGO_PKG_VERSION"));
const REQUEST_TIMEOUT_SECS: u64 = 30;
const REPOS_PER_PAGE: u32 = 100;

#[derive(Debug, Error)]
pub enum GithubError {
    #[error("no GitHub token stored for this user")]
    TokenMissing,

    #[error("{0} not found")]
    NotFound(String),

    #[error("HTTP error talking to GitHub: {0}")]
    Http(#[from] reqwest::Error),

    #[error("GitHub API error {status}: {message}")]
    Api { status: u16, message: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RepoOwner {
    pub login: String,
}

/// Repository as returned by the GitHub REST API.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all(serialize = "camelCase"))]
pub struct GithubRepo {
    pub id: i64,
    pub name: String,
    pub full_name: String,
    pub owner: RepoOwner,
    #[serde(default)]
    pub private: bool,
    pub default_branch: Option<String>,
    pub html_url: Option<String>,
}

#[derive(Clone)]
pub struct GithubClient {
    client: Client,
    base_url: String,
}

impl GithubClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, GithubError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn get(&self, token: &str, path: &str) -> RequestBuilder {
        self.client
            .get(format!("{}{}", self.base_url, path))
            .bearer_auth(token)
            .header(header::ACCEPT, "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28")
    }

    /// Repositories the token can see, most recently updated first.
    pub async fn list_repos(&self, token: &str) -> Result<Vec<GithubRepo>, GithubError> {
        let path = format!("/user/repos?per_page={REPOS_PER_PAGE}&sort=updated");
        let response = check(self.get(token, &path).send().await?, "repositories").await?;
        Ok(response.json().await?)
    }

    pub async fn get_repo(&self, token: &str, owner: &str, repo: &str) -> Result<GithubRepo, GithubError> {
        let what = format!("repository {owner}/{repo}");
        let response = check(
            self.get(token, &format!("/repos/{owner}/{repo}")).send().await?,
            &what,
        )
        .await?;
        Ok(response.json().await?)
    }

    /// Raw contents of one file at `git_ref`.
    pub async fn file_contents(
        &self,
        token: &str,
        owner: &str,
        repo: &str,
        path: &str,
        git_ref: &str,
    ) -> Result<String, GithubError> {
        debug!(owner, repo, path, git_ref, "Fetching file from GitHub");
        let url_path = format!(
            "/repos/{owner}/{repo}/contents/{}",
            path.trim_start_matches('/')
        );
        let request = self
            .get(token, &url_path)
            .query(&[("ref", git_ref)])
            .header(header::ACCEPT, "application/vnd.github.raw");
        let what = format!("{path} in {owner}/{repo}@{git_ref}");
        let response = check(request.send().await?, &what).await?;
        Ok(response.text().await?)
    }
}

async fn check(response: reqwest::Response, what: &str) -> Result<reqwest::Response, GithubError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::NOT_FOUND {
        return Err(GithubError::NotFound(what.to_string()));
    }
    let message = response.text().await.unwrap_or_default();
    Err(GithubError::Api {
        status: status.as_u16(),
        message,
    })
}
