use arbor_core::{AnalysisPhase, ProgressSink};
use colored::Colorize;

/// Prints progress lines to stderr, keeping stdout for results
pub struct ProgressPrinter {
    quiet: bool,
}

impl ProgressPrinter {
    pub fn new(quiet: bool) -> Self {
        Self { quiet }
    }
}

impl ProgressSink for ProgressPrinter {
    fn report(&self, phase: AnalysisPhase, progress: u8, message: &str) {
        if self.quiet {
            return;
        }
        let label = phase_label(phase);
        let label = match phase {
            AnalysisPhase::Done => label.green(),
            AnalysisPhase::Failed => label.red(),
            AnalysisPhase::Cancelled => label.yellow(),
            _ => label.blue(),
        };
        eprintln!("[{:>3}%] {:<10} {}", progress, label, message.dimmed());
    }
}

fn phase_label(phase: AnalysisPhase) -> &'static str {
    match phase {
        AnalysisPhase::Init => "waiting",
        AnalysisPhase::Acquiring => "acquire",
        AnalysisPhase::SummarizingFiles => "files",
        AnalysisPhase::SummarizingFolders => "folders",
        AnalysisPhase::SynthesizingRoot => "overview",
        AnalysisPhase::Done => "done",
        AnalysisPhase::Failed => "failed",
        AnalysisPhase::Cancelled => "cancelled",
    }
}
