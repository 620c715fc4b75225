//! Hand-written capability fakes shared by unit tests.

use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::capability::{
    CodeGenerator, Comment, FileRecord, GenerationRequest, MergeMethod, MergeOutcome,
    PlannedStep, ReviewComments, ReviewRequestRef, TemplateGenerator, VersionControl,
};
use crate::errors::CapabilityError;

/// Scriptable `CodeGenerator` that records every request it receives.
pub struct FakeGenerator {
    /// Responses for successive `generate_files` calls; the last one repeats.
    files: Mutex<VecDeque<Result<Vec<FileRecord>, String>>>,
    plan: Result<Option<Vec<PlannedStep>>, String>,
    commit_message: Result<String, String>,
    delay: Duration,
    pub requests: Mutex<Vec<GenerationRequest>>,
    pub commit_requests: Mutex<Vec<(String, Vec<String>)>>,
    pub plan_calls: AtomicUsize,
}

impl FakeGenerator {
    pub fn new() -> Self {
        Self {
            files: Mutex::new(VecDeque::from([Ok(vec![FileRecord::new(
                "index.html",
                "<h1>Hello World</h1>",
            )])])),
            plan: Ok(None),
            commit_message: Ok("feat: generated change".to_string()),
            delay: Duration::ZERO,
            requests: Mutex::new(Vec::new()),
            commit_requests: Mutex::new(Vec::new()),
            plan_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_files(self, files: Vec<FileRecord>) -> Self {
        self.with_file_responses(vec![Ok(files)])
    }

    pub fn with_file_responses(self, responses: Vec<Result<Vec<FileRecord>, String>>) -> Self {
        *self.files.lock().unwrap() = responses.into();
        self
    }

    pub fn failing_files(self, message: &str) -> Self {
        self.with_file_responses(vec![Err(message.to_string())])
    }

    pub fn with_plan(mut self, steps: Vec<PlannedStep>) -> Self {
        self.plan = Ok(Some(steps));
        self
    }

    pub fn failing_plan(mut self) -> Self {
        self.plan = Err("planner offline".to_string());
        self
    }

    pub fn with_commit_message(mut self, message: &str) -> Self {
        self.commit_message = Ok(message.to_string());
        self
    }

    pub fn failing_commit_message(mut self) -> Self {
        self.commit_message = Err("commit service offline".to_string());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn file_calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl CodeGenerator for FakeGenerator {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn generate_files(
        &self,
        request: &GenerationRequest,
    ) -> Result<Vec<FileRecord>, CapabilityError> {
        self.requests.lock().unwrap().push(request.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let response = {
            let mut files = self.files.lock().unwrap();
            if files.len() > 1 {
                files.pop_front()
            } else {
                files.front().cloned()
            }
        };
        match response {
            Some(Ok(files)) => Ok(files),
            Some(Err(message)) => Err(CapabilityError::Unavailable(message)),
            None => Err(CapabilityError::Malformed("no scripted response".into())),
        }
    }

    async fn generate_plan(&self, description: &str) -> Result<Vec<PlannedStep>, CapabilityError> {
        self.plan_calls.fetch_add(1, Ordering::SeqCst);
        match &self.plan {
            Ok(Some(steps)) => Ok(steps.clone()),
            Ok(None) => Ok(vec![TemplateGenerator::single_step(description)]),
            Err(message) => Err(CapabilityError::Unavailable(message.clone())),
        }
    }

    async fn generate_commit_message(
        &self,
        description: &str,
        paths: &[String],
    ) -> Result<String, CapabilityError> {
        self.commit_requests
            .lock()
            .unwrap()
            .push((description.to_string(), paths.to_vec()));
        self.commit_message
            .clone()
            .map_err(CapabilityError::Unavailable)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCommit {
    pub branch: String,
    pub paths: Vec<String>,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedReview {
    pub title: String,
    pub body: String,
    pub head: String,
    pub base: String,
}

/// In-memory `VersionControl` that records calls in order.
pub struct FakeVcs {
    branches: Mutex<HashSet<String>>,
    pub created_branches: Mutex<Vec<(String, String)>>,
    pub commits: Mutex<Vec<RecordedCommit>>,
    pub reviews: Mutex<Vec<RecordedReview>>,
    /// Call log such as `create_branch:feature/x`, `commit:feature/x`, `review:feature/x`.
    pub events: Mutex<Vec<String>>,
    fail_commits: bool,
    fail_reviews: bool,
    comments: ReviewComments,
    merge_sha: Option<String>,
}

impl FakeVcs {
    pub fn new() -> Self {
        Self {
            branches: Mutex::new(HashSet::from(["main".to_string()])),
            created_branches: Mutex::new(Vec::new()),
            commits: Mutex::new(Vec::new()),
            reviews: Mutex::new(Vec::new()),
            events: Mutex::new(Vec::new()),
            fail_commits: false,
            fail_reviews: false,
            comments: ReviewComments {
                issue_comments: vec![Comment {
                    id: 1,
                    author: "alice".into(),
                    body: "Looks good".into(),
                    path: None,
                    line: None,
                    created_at: None,
                }],
                review_comments: Vec::new(),
            },
            merge_sha: Some("abc123".to_string()),
        }
    }

    pub fn with_branch(self, name: &str) -> Self {
        self.branches.lock().unwrap().insert(name.to_string());
        self
    }

    pub fn failing_commits(mut self) -> Self {
        self.fail_commits = true;
        self
    }

    pub fn failing_reviews(mut self) -> Self {
        self.fail_reviews = true;
        self
    }

    pub fn without_merge_sha(mut self) -> Self {
        self.merge_sha = None;
        self
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    fn record(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }
}

#[async_trait]
impl VersionControl for FakeVcs {
    async fn branch_exists(&self, name: &str) -> Result<bool, CapabilityError> {
        Ok(self.branches.lock().unwrap().contains(name))
    }

    async fn create_branch(&self, name: &str, base: &str) -> Result<(), CapabilityError> {
        if !self.branches.lock().unwrap().contains(base) {
            return Err(CapabilityError::Api {
                status: 404,
                message: format!("base branch {} not found", base),
            });
        }
        self.branches.lock().unwrap().insert(name.to_string());
        self.created_branches
            .lock()
            .unwrap()
            .push((name.to_string(), base.to_string()));
        self.record(format!("create_branch:{}", name));
        Ok(())
    }

    async fn commit_files(
        &self,
        branch: &str,
        files: &[FileRecord],
        message: &str,
    ) -> Result<String, CapabilityError> {
        if self.fail_commits {
            return Err(CapabilityError::Api {
                status: 422,
                message: "commit rejected".into(),
            });
        }
        if !self.branches.lock().unwrap().contains(branch) {
            return Err(CapabilityError::Api {
                status: 404,
                message: format!("branch {} not found", branch),
            });
        }
        let mut commits = self.commits.lock().unwrap();
        commits.push(RecordedCommit {
            branch: branch.to_string(),
            paths: files.iter().map(|f| f.path.clone()).collect(),
            message: message.to_string(),
        });
        let sha = format!("sha-{}", commits.len());
        drop(commits);
        self.record(format!("commit:{}", branch));
        Ok(sha)
    }

    async fn open_review_request(
        &self,
        title: &str,
        body: &str,
        head: &str,
        base: &str,
    ) -> Result<ReviewRequestRef, CapabilityError> {
        if self.fail_reviews {
            return Err(CapabilityError::Api {
                status: 422,
                message: "review request rejected".into(),
            });
        }
        let mut reviews = self.reviews.lock().unwrap();
        reviews.push(RecordedReview {
            title: title.to_string(),
            body: body.to_string(),
            head: head.to_string(),
            base: base.to_string(),
        });
        let number = 41 + reviews.len() as u64;
        drop(reviews);
        self.record(format!("review:{}", head));
        Ok(ReviewRequestRef {
            number,
            url: format!("https://github.com/acme/site/pull/{}", number),
        })
    }

    async fn list_comments(&self, number: u64) -> Result<ReviewComments, CapabilityError> {
        if number == 0 {
            return Err(CapabilityError::Api {
                status: 404,
                message: "Not Found".into(),
            });
        }
        Ok(self.comments.clone())
    }

    async fn merge_review_request(
        &self,
        number: u64,
        method: MergeMethod,
    ) -> Result<MergeOutcome, CapabilityError> {
        self.record(format!("merge:{}:{}", number, method));
        match &self.merge_sha {
            Some(sha) => Ok(MergeOutcome {
                merged_ref: sha.clone(),
                message: "Pull Request successfully merged".into(),
            }),
            None => Err(CapabilityError::Malformed(format!(
                "merge of #{} returned no commit sha",
                number
            ))),
        }
    }
}
