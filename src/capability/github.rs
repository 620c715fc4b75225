use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;

use super::vcs::{Comment, MergeMethod, MergeOutcome, ReviewComments, VersionControl};
use super::{FileRecord, ReviewRequestRef};
use crate::errors::CapabilityError;
use crate::util::percent_encode;

pub const DEFAULT_API_URL: &str = "https://api.github.com";
const USER_AGENT: &str = "taskforge";

#[derive(Debug, Deserialize)]
struct GitRef {
    object: GitObject,
}

#[derive(Debug, Deserialize)]
struct GitObject {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct GitCommit {
    tree: GitObject,
}

#[derive(Debug, Deserialize)]
struct Created {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct PullRequest {
    number: u64,
    html_url: String,
}

#[derive(Debug, Deserialize)]
struct GitHubUser {
    login: String,
}

/// Comment as returned by both the issue and review comment endpoints.
#[derive(Debug, Deserialize)]
struct GitHubComment {
    id: u64,
    user: Option<GitHubUser>,
    #[serde(default)]
    body: String,
    path: Option<String>,
    line: Option<u64>,
    created_at: Option<String>,
}

impl From<GitHubComment> for Comment {
    fn from(c: GitHubComment) -> Self {
        Comment {
            id: c.id,
            author: c.user.map(|u| u.login).unwrap_or_else(|| "ghost".to_string()),
            body: c.body,
            path: c.path,
            line: c.line,
            created_at: c.created_at,
        }
    }
}

#[derive(Debug, Deserialize)]
struct MergeResponse {
    sha: Option<String>,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

/// `VersionControl` over the GitHub REST API for one repository.
#[derive(Clone)]
pub struct GitHubClient {
    http: reqwest::Client,
    api_url: String,
    repository: String,
    token: Option<String>,
}

impl GitHubClient {
    /// `repository` is the `owner/repo` slug. Without a token only public
    /// reads succeed.
    pub fn new(
        api_url: &str,
        repository: &str,
        token: Option<String>,
    ) -> Result<Self, CapabilityError> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| CapabilityError::Unavailable(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            http,
            api_url: api_url.trim_end_matches('/').to_string(),
            repository: repository.to_string(),
            token: token.filter(|t| !t.is_empty()),
        })
    }

    pub fn repository(&self) -> &str {
        &self.repository
    }

    /// `/git/{kind}/heads/<branch>` with each segment escaped, so `#` or `?`
    /// in a ref name stays in the path.
    fn heads_path(kind: &str, branch: &str) -> String {
        format!("/git/{}/heads/{}", kind, percent_encode(branch, true))
    }

    fn url(&self, path: &str) -> String {
        format!("{}/repos/{}{}", self.api_url, self.repository, path)
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self
            .http
            .request(method, self.url(path))
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28");
        match &self.token {
            Some(token) => builder.header("Authorization", format!("Bearer {}", token)),
            None => builder,
        }
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Response, CapabilityError> {
        builder
            .send()
            .await
            .map_err(|e| CapabilityError::Unavailable(format!("GitHub request failed: {}", e)))
    }

    /// Turn a non-success response into `CapabilityError::Api` with GitHub's message.
    async fn check(response: Response) -> Result<Response, CapabilityError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let text = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&text)
            .map(|b| b.message)
            .unwrap_or(text);
        Err(CapabilityError::Api {
            status: status.as_u16(),
            message,
        })
    }

    async fn json<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T, CapabilityError> {
        let response = Self::check(self.send(builder).await?).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| CapabilityError::Malformed(format!("unexpected GitHub response: {}", e)))
    }

    async fn ref_sha(&self, branch: &str) -> Result<String, CapabilityError> {
        let git_ref: GitRef = self
            .json(self.request(Method::GET, &Self::heads_path("ref", branch)))
            .await?;
        Ok(git_ref.object.sha)
    }

    async fn comments(&self, path: &str) -> Result<Vec<Comment>, CapabilityError> {
        let comments: Vec<GitHubComment> = self
            .json(self.request(Method::GET, path).query(&[("per_page", "100")]))
            .await?;
        Ok(comments.into_iter().map(Comment::from).collect())
    }
}

#[async_trait]
impl VersionControl for GitHubClient {
    async fn branch_exists(&self, name: &str) -> Result<bool, CapabilityError> {
        let response = self
            .send(self.request(Method::GET, &Self::heads_path("ref", name)))
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        Self::check(response).await?;
        Ok(true)
    }

    async fn create_branch(&self, name: &str, base: &str) -> Result<(), CapabilityError> {
        let sha = self.ref_sha(base).await?;
        let body = json!({ "ref": format!("refs/heads/{}", name), "sha": sha });
        let response = self
            .send(self.request(Method::POST, "/git/refs").json(&body))
            .await?;
        Self::check(response).await?;
        tracing::info!(branch = name, base, "Created branch");
        Ok(())
    }

    async fn commit_files(
        &self,
        branch: &str,
        files: &[FileRecord],
        message: &str,
    ) -> Result<String, CapabilityError> {
        let head = self.ref_sha(branch).await?;
        let commit_path = format!("/git/commits/{}", percent_encode(&head, false));
        let base: GitCommit = self.json(self.request(Method::GET, &commit_path)).await?;

        let entries: Vec<_> = files
            .iter()
            .map(|f| json!({ "path": f.path, "mode": "100644", "type": "blob", "content": f.content }))
            .collect();
        let tree: Created = self
            .json(
                self.request(Method::POST, "/git/trees")
                    .json(&json!({ "base_tree": base.tree.sha, "tree": entries })),
            )
            .await?;

        let commit: Created = self
            .json(self.request(Method::POST, "/git/commits").json(&json!({
                "message": message,
                "tree": tree.sha,
                "parents": [head],
            })))
            .await?;

        let response = self
            .send(
                self.request(Method::PATCH, &Self::heads_path("refs", branch))
                    .json(&json!({ "sha": commit.sha, "force": false })),
            )
            .await?;
        Self::check(response).await?;

        tracing::info!(branch, sha = %commit.sha, files = files.len(), "Committed files");
        Ok(commit.sha)
    }

    async fn open_review_request(
        &self,
        title: &str,
        body: &str,
        head: &str,
        base: &str,
    ) -> Result<ReviewRequestRef, CapabilityError> {
        let pr: PullRequest = self
            .json(self.request(Method::POST, "/pulls").json(&json!({
                "title": title,
                "body": body,
                "head": head,
                "base": base,
            })))
            .await?;
        tracing::info!(pr = pr.number, url = %pr.html_url, "Opened pull request");
        Ok(ReviewRequestRef {
            number: pr.number,
            url: pr.html_url,
        })
    }

    async fn list_comments(&self, number: u64) -> Result<ReviewComments, CapabilityError> {
        let issue_comments = self.comments(&format!("/issues/{}/comments", number)).await?;
        let review_comments = self.comments(&format!("/pulls/{}/comments", number)).await?;
        Ok(ReviewComments {
            issue_comments,
            review_comments,
        })
    }

    async fn merge_review_request(
        &self,
        number: u64,
        method: MergeMethod,
    ) -> Result<MergeOutcome, CapabilityError> {
        let merged: MergeResponse = self
            .json(
                self.request(Method::PUT, &format!("/pulls/{}/merge", number))
                    .json(&json!({ "merge_method": method.as_str() })),
            )
            .await?;
        let sha = merged.sha.filter(|s| !s.is_empty()).ok_or_else(|| {
            CapabilityError::Malformed(format!(
                "merge of #{} returned no commit sha: {}",
                number, merged.message
            ))
        })?;
        Ok(MergeOutcome {
            merged_ref: sha,
            message: merged.message,
        })
    }
}
