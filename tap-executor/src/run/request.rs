use tap_config::shared::{ResumeConfig, RunConfig};

use crate::process::TapInvocation;
use crate::types::{Bookmark, TapId};

/// Which bookmark a new run hands to its tap.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum ResumePolicy {
    /// Extract everything from scratch.
    None,
    /// Continue from the most recently committed bookmark of any run of the same tap.
    #[default]
    LatestForTap,
    /// Continue from an explicit bookmark.
    Bookmark(Bookmark),
}

impl From<ResumeConfig> for ResumePolicy {
    fn from(config: ResumeConfig) -> Self {
        match config {
            ResumeConfig::Fresh => ResumePolicy::None,
            ResumeConfig::LatestForTap => ResumePolicy::LatestForTap,
        }
    }
}

/// Everything needed to start a run.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub tap_id: TapId,
    pub invocation: TapInvocation,
    pub config: RunConfig,
    pub resume: ResumePolicy,
}

impl RunRequest {
    pub fn new(tap_id: TapId, invocation: TapInvocation, config: RunConfig) -> Self {
        Self {
            tap_id,
            invocation,
            config,
            resume: ResumePolicy::default(),
        }
    }

    pub fn with_resume(mut self, resume: ResumePolicy) -> Self {
        self.resume = resume;
        self
    }
}
