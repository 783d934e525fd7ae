use serde::{Deserialize, Serialize};

use crate::ids::ResearchJobId;

/// A long-running research job announced from inside a chat turn.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveResearchJob {
    pub job_id: ResearchJobId,
    pub query: String,
}

/// Progress record in the shape older consumers expect.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyResearchProgress {
    pub job_id: ResearchJobId,
    pub status: String,
    pub step: u32,
    pub total_steps: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl LegacyResearchProgress {
    pub fn started(job_id: ResearchJobId) -> Self {
        Self {
            job_id,
            status: "started".into(),
            step: 0,
            total_steps: 0,
            message: None,
        }
    }
}

/// How a research job was detected.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionSource {
    Event,
    ContentMarker,
}
