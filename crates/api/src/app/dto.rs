use serde::Serialize;

use recalc_core::JobState;
use recalc_engine::Progress;
use recalc_infra::TaskStats;

/// Body of every recalculation endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressResponse {
    pub state: JobState,
    pub percent: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ProgressResponse {
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

impl From<Progress> for ProgressResponse {
    fn from(progress: Progress) -> Self {
        Self {
            state: progress.state,
            percent: progress.percent,
            message: None,
        }
    }
}

impl From<JobState> for ProgressResponse {
    fn from(state: JobState) -> Self {
        Progress::from(state).into()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueResponse {
    pub scheduler_available: bool,
    pub tasks: TaskStats,
}
