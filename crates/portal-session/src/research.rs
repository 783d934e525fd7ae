use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, info};

use portal_core::ids::ResearchJobId;
use portal_core::research::{ActiveResearchJob, DetectionSource, LegacyResearchProgress};
use portal_core::stream::{ResearchProgress, ResearchStatus};

/// Start marker some backends still print into the reply text instead of
/// sending a structured event.
static START_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)research job (?:has )?started[^\n]*?\bjob[ _-]?id[:\s]+([A-Za-z0-9_-]+)").unwrap()
});

/// How far back a scan reaches into text already seen. A marker never spans
/// a newline, so the scan also stops at the last line break.
const MARKER_LOOKBACK: usize = 512;

#[derive(Clone, Debug, PartialEq)]
pub enum ResearchUpdate {
    Activated {
        job: ActiveResearchJob,
        progress: LegacyResearchProgress,
        source: DetectionSource,
    },
    Progress(LegacyResearchProgress),
}

/// Tracks the deep-research job started from the current turn.
///
/// Activation happens at most once between resets. A structured
/// `research_progress` event disables the text-marker fallback for the rest
/// of the turn.
#[derive(Debug, Default)]
pub struct ResearchActivator {
    active: Option<ActiveResearchJob>,
    progress: Option<LegacyResearchProgress>,
    structured_seen: bool,
    scanned: usize,
}

impl ResearchActivator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget the job. Called on a new turn or conversation switch only.
    pub fn reset(&mut self) {
        self.active = None;
        self.progress = None;
        self.structured_seen = false;
        self.scanned = 0;
    }

    pub fn active(&self) -> Option<&ActiveResearchJob> {
        self.active.as_ref()
    }

    pub fn progress(&self) -> Option<&LegacyResearchProgress> {
        self.progress.as_ref()
    }

    pub fn observe_event(&mut self, event: &ResearchProgress, query: &str) -> Option<ResearchUpdate> {
        self.structured_seen = true;

        if self.active.is_none() {
            if event.status != ResearchStatus::Started {
                debug!(status = ?event.status, "research progress before start, ignoring");
                return None;
            }
            let job_id = event
                .job_id
                .clone()
                .map(ResearchJobId::from_raw)
                .unwrap_or_default();
            return Some(self.activate(job_id, query, DetectionSource::Event));
        }

        let progress = self.progress.as_mut()?;
        if let Some(job_id) = &event.job_id {
            if job_id != progress.job_id.as_str() {
                debug!(job_id = %job_id, active = %progress.job_id, "progress for another job, ignoring");
                return None;
            }
        }
        if let Some(step) = event.step {
            progress.step = step;
        }
        if let Some(total) = event.total_steps {
            progress.total_steps = total;
        }
        Some(ResearchUpdate::Progress(progress.clone()))
    }

    /// Scan accumulated reply text for the start marker.
    ///
    /// Only the text appended since the previous call is scanned, plus the
    /// unfinished line before it.
    pub fn observe_content(&mut self, content: &str, query: &str) -> Option<ResearchUpdate> {
        if self.structured_seen || self.active.is_some() {
            return None;
        }
        let start = scan_start(content, self.scanned);
        self.scanned = content.len();
        let job_id = START_MARKER.captures(&content[start..])?.get(1)?.as_str();
        Some(self.activate(ResearchJobId::from_raw(job_id), query, DetectionSource::ContentMarker))
    }

    fn activate(&mut self, job_id: ResearchJobId, query: &str, source: DetectionSource) -> ResearchUpdate {
        info!(job_id = %job_id, ?source, "research job activated");
        let job = ActiveResearchJob {
            job_id: job_id.clone(),
            query: query.to_string(),
        };
        let progress = LegacyResearchProgress::started(job_id);
        self.active = Some(job.clone());
        self.progress = Some(progress.clone());
        ResearchUpdate::Activated { job, progress, source }
    }
}

fn scan_start(content: &str, scanned: usize) -> usize {
    if scanned > content.len() || !content.is_char_boundary(scanned) {
        return 0;
    }
    let mut floor = scanned.saturating_sub(MARKER_LOOKBACK);
    while !content.is_char_boundary(floor) {
        floor -= 1;
    }
    match content[floor..scanned].rfind('\n') {
        Some(i) => floor + i + 1,
        None => floor,
    }
}
