use std::fmt;

/// Stages reported while merging.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MergeProgressStage {
    Headers,
    Records,
}

impl MergeProgressStage {
    pub fn describe(self) -> &'static str {
        match self {
            Self::Headers => "header scan",
            Self::Records => "record merge",
        }
    }
}

impl fmt::Display for MergeProgressStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.describe())
    }
}

/// Observer for reporting incremental progress while merging.
///
/// `processed` counts headers read during `Headers` and merged rows during `Records`.
pub trait MergeProgressObserver {
    fn on_stage_start(&mut self, stage: MergeProgressStage, n_inputs: usize) {
        let _ = (stage, n_inputs);
    }
    fn on_stage_advance(&mut self, stage: MergeProgressStage, processed: u64) {
        let _ = (stage, processed);
    }
    fn on_stage_finish(&mut self, stage: MergeProgressStage, processed: u64) {
        let _ = (stage, processed);
    }
}

#[derive(Default)]
pub struct NoopMergeProgress;

impl MergeProgressObserver for NoopMergeProgress {}
