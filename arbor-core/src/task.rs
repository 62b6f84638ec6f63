//! Analysis tasks: persisted status records and the per-run phase machine.

use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "processing" => Some(Self::Processing),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// One analysis run over one snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub snapshot_id: String,
    pub origin: String,
    pub status: TaskStatus,
    pub progress: u8,
    pub message: String,
    pub error: Option<String>,
    pub result_id: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl Task {
    pub fn new(id: impl Into<String>, snapshot_id: impl Into<String>, origin: impl Into<String>) -> Self {
        let now = now_rfc3339();
        Self {
            id: id.into(),
            snapshot_id: snapshot_id.into(),
            origin: origin.into(),
            status: TaskStatus::Pending,
            progress: 0,
            message: "Queued".to_string(),
            error: None,
            result_id: None,
            created_at: now.clone(),
            updated_at: now,
        }
    }
}

/// Current UTC time as RFC 3339
pub fn now_rfc3339() -> String {
    let now = OffsetDateTime::now_utc();
    now.format(&Rfc3339)
        .unwrap_or_else(|_| now.unix_timestamp().to_string())
}

/// Phases of one analysis run.
///
/// `Init -> Acquiring -> SummarizingFiles -> SummarizingFolders ->
/// SynthesizingRoot -> Done`; `Failed` and `Cancelled` are reachable from
/// any non-terminal phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisPhase {
    Init,
    Acquiring,
    SummarizingFiles,
    SummarizingFolders,
    SynthesizingRoot,
    Done,
    Failed,
    Cancelled,
}

impl AnalysisPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed | Self::Cancelled)
    }

    pub fn can_transition_to(&self, next: AnalysisPhase) -> bool {
        use AnalysisPhase::*;
        if self.is_terminal() {
            return false;
        }
        if matches!(next, Failed | Cancelled) || *self == next {
            return true;
        }
        matches!(
            (self, next),
            (Init, Acquiring)
                | (Acquiring, SummarizingFiles)
                | (SummarizingFiles, SummarizingFolders)
                | (SummarizingFolders, SynthesizingRoot)
                | (SynthesizingRoot, Done)
        )
    }

    /// Task status shown to pollers while in this phase
    pub fn task_status(&self) -> TaskStatus {
        match self {
            Self::Init => TaskStatus::Pending,
            Self::Done => TaskStatus::Completed,
            Self::Failed => TaskStatus::Failed,
            Self::Cancelled => TaskStatus::Cancelled,
            _ => TaskStatus::Processing,
        }
    }
}

/// Receives progress updates from an analysis run.
pub trait ProgressSink: Send + Sync {
    fn report(&self, phase: AnalysisPhase, progress: u8, message: &str);
}

/// Discards progress updates
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn report(&self, _phase: AnalysisPhase, _progress: u8, _message: &str) {}
}

/// Tracks phase and keeps progress monotonic before forwarding to a sink.
pub struct PhaseTracker<'a> {
    sink: &'a dyn ProgressSink,
    state: Mutex<(AnalysisPhase, u8)>,
}

impl<'a> PhaseTracker<'a> {
    pub fn new(sink: &'a dyn ProgressSink) -> Self {
        Self {
            sink,
            state: Mutex::new((AnalysisPhase::Init, 0)),
        }
    }

    pub fn phase(&self) -> AnalysisPhase {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).0
    }

    /// Record progress; out-of-order phases are logged and ignored.
    pub fn update(&self, phase: AnalysisPhase, progress: u8, message: &str) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let (current, last) = *state;
        if !current.can_transition_to(phase) {
            tracing::warn!(from = ?current, to = ?phase, "ignoring invalid phase transition");
            return;
        }
        let progress = progress.min(100).max(last);
        *state = (phase, progress);
        drop(state);
        self.sink.report(phase, progress, message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Recorder(Mutex<Vec<(AnalysisPhase, u8)>>);

    impl ProgressSink for Recorder {
        fn report(&self, phase: AnalysisPhase, progress: u8, _message: &str) {
            self.0.lock().unwrap().push((phase, progress));
        }
    }

    #[test]
    fn test_phase_transitions() {
        use AnalysisPhase::*;
        assert!(Init.can_transition_to(Acquiring));
        assert!(SummarizingFiles.can_transition_to(SummarizingFolders));
        assert!(SummarizingFolders.can_transition_to(Failed));
        assert!(!SummarizingFiles.can_transition_to(SynthesizingRoot));
        assert!(!Done.can_transition_to(Failed));
        assert!(!Cancelled.can_transition_to(Acquiring));
    }

    #[test]
    fn test_progress_is_monotonic() {
        let recorder = Recorder(Mutex::new(Vec::new()));
        let tracker = PhaseTracker::new(&recorder);
        tracker.update(AnalysisPhase::Acquiring, 0, "acquire");
        tracker.update(AnalysisPhase::SummarizingFiles, 40, "files");
        tracker.update(AnalysisPhase::SummarizingFiles, 20, "late update");
        // Skipping the folder phase is rejected.
        tracker.update(AnalysisPhase::SynthesizingRoot, 95, "root");

        let seen = recorder.0.lock().unwrap().clone();
        assert_eq!(
            seen,
            vec![
                (AnalysisPhase::Acquiring, 0),
                (AnalysisPhase::SummarizingFiles, 40),
                (AnalysisPhase::SummarizingFiles, 40),
            ]
        );
        assert_eq!(tracker.phase(), AnalysisPhase::SummarizingFiles);

        tracker.update(AnalysisPhase::Failed, 40, "boom");
        tracker.update(AnalysisPhase::Acquiring, 50, "after failure");
        assert_eq!(tracker.phase(), AnalysisPhase::Failed);
        assert_eq!(recorder.0.lock().unwrap().len(), 4);
    }

    #[test]
    fn test_status_strings() {
        assert_eq!(TaskStatus::parse("cancelled"), Some(TaskStatus::Cancelled));
        assert!(TaskStatus::Failed.is_terminal());
        assert!(!TaskStatus::Processing.is_terminal());
        assert_eq!(
            AnalysisPhase::SynthesizingRoot.task_status(),
            TaskStatus::Processing
        );
    }
}
