//! External capabilities the engine depends on but does not implement.
//!
//! | Module      | Responsibility                                                  |
//! |-------------|-----------------------------------------------------------------|
//! | `generator` | `CodeGenerator` trait, `TemplateGenerator`, `FallbackGenerator` |
//! | `claude`    | `ClaudeCliGenerator` (shells out to the Claude CLI)             |
//! | `vcs`       | `VersionControl` trait and review/merge types                   |
//! | `github`    | `GitHubClient` over the GitHub REST API                         |

pub mod claude;
pub mod generator;
pub mod github;
pub mod vcs;

use std::path::{Component, Path};

use serde::{Deserialize, Serialize};

use crate::errors::CapabilityError;

pub use claude::ClaudeCliGenerator;
pub use generator::{
    CodeGenerator, FallbackGenerator, GenerationRequest, PlannedStep, TemplateGenerator,
};
pub use github::GitHubClient;
pub use vcs::{Comment, MergeMethod, MergeOutcome, ReviewComments, VersionControl};

/// A generated or committed file: repository-relative path plus full contents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub path: String,
    pub content: String,
}

impl FileRecord {
    pub fn new(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
        }
    }
}

/// Reference to an opened review request (pull request).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewRequestRef {
    pub number: u64,
    pub url: String,
}

/// Reject empty paths and paths that could escape a workspace root
/// (absolute, or containing `..`).
pub fn check_relative_path(path: &str) -> Result<(), CapabilityError> {
    if path.trim().is_empty() {
        return Err(CapabilityError::Malformed("file with empty path".into()));
    }
    let escapes = Path::new(path).components().any(|c| {
        matches!(
            c,
            Component::ParentDir | Component::RootDir | Component::Prefix(_)
        )
    });
    if escapes {
        return Err(CapabilityError::Malformed(format!("unsafe file path: {}", path)));
    }
    Ok(())
}
