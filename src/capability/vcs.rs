use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{FileRecord, ReviewRequestRef};
use crate::errors::CapabilityError;

/// A comment on a review request, either issue-style or inline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub id: u64,
    pub author: String,
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewComments {
    pub issue_comments: Vec<Comment>,
    pub review_comments: Vec<Comment>,
}

impl ReviewComments {
    pub fn total(&self) -> usize {
        self.issue_comments.len() + self.review_comments.len()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeMethod {
    #[default]
    Merge,
    Squash,
    Rebase,
}

impl MergeMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Merge => "merge",
            Self::Squash => "squash",
            Self::Rebase => "rebase",
        }
    }
}

impl std::fmt::Display for MergeMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MergeMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "merge" => Ok(Self::Merge),
            "squash" => Ok(Self::Squash),
            "rebase" => Ok(Self::Rebase),
            _ => Err(format!(
                "Invalid merge method '{}': expected merge, squash or rebase",
                s
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeOutcome {
    /// Commit sha the review request was merged as.
    pub merged_ref: String,
    pub message: String,
}

/// Abstraction over the version-control and review backend.
/// Real implementation: `GitHubClient`.
#[async_trait]
pub trait VersionControl: Send + Sync {
    async fn branch_exists(&self, name: &str) -> Result<bool, CapabilityError>;

    async fn create_branch(&self, name: &str, base: &str) -> Result<(), CapabilityError>;

    /// Write `files` to `branch` as a single commit. Returns the commit sha.
    async fn commit_files(
        &self,
        branch: &str,
        files: &[FileRecord],
        message: &str,
    ) -> Result<String, CapabilityError>;

    async fn open_review_request(
        &self,
        title: &str,
        body: &str,
        head: &str,
        base: &str,
    ) -> Result<ReviewRequestRef, CapabilityError>;

    async fn list_comments(&self, number: u64) -> Result<ReviewComments, CapabilityError>;

    async fn merge_review_request(
        &self,
        number: u64,
        method: MergeMethod,
    ) -> Result<MergeOutcome, CapabilityError>;
}
