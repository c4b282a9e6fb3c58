use std::fmt;

/// Stages reported while running a calibration experiment.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SimulationStage {
    CopulaSweep,
    UnitFitting,
}

impl SimulationStage {
    pub fn describe(self) -> &'static str {
        match self {
            Self::CopulaSweep => "rank-correlation sweep",
            Self::UnitFitting => "per-unit model fitting",
        }
    }
}

impl fmt::Display for SimulationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.describe())
    }
}

/// Observer for reporting incremental progress while an experiment runs.
///
/// `on_stage_advance` may be called from worker threads, hence `Sync` and `&self`.
pub trait SimulationProgress: Sync {
    fn on_stage_start(&self, stage: SimulationStage, total: usize) {
        let _ = (stage, total);
    }
    fn on_stage_advance(&self, stage: SimulationStage, completed: usize) {
        let _ = (stage, completed);
    }
    fn on_stage_finish(&self, stage: SimulationStage) {
        let _ = stage;
    }
}

#[derive(Default)]
pub struct NoopProgress;

impl SimulationProgress for NoopProgress {}
