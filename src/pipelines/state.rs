use std::fmt;

use anyhow::anyhow;
use log::debug;
use thiserror::Error;

use crate::config::defs::PipelineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Idle,
    Trimming,
    Clustering,
    FeatureExtraction,
    Classification,
    Aggregation,
    Done,
    Failed,
}

impl PipelineStage {
    /// Stage that follows in the linear run, None for terminal states.
    fn successor(&self) -> Option<PipelineStage> {
        match self {
            PipelineStage::Trimming => Some(PipelineStage::Clustering),
            PipelineStage::Clustering => Some(PipelineStage::FeatureExtraction),
            PipelineStage::FeatureExtraction => Some(PipelineStage::Classification),
            PipelineStage::Classification => Some(PipelineStage::Aggregation),
            PipelineStage::Aggregation => Some(PipelineStage::Done),
            PipelineStage::Idle | PipelineStage::Done | PipelineStage::Failed => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineStage::Done | PipelineStage::Failed)
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineStage::Idle => "Startup",
            PipelineStage::Trimming => "Trimming",
            PipelineStage::Clustering => "Clustering",
            PipelineStage::FeatureExtraction => "Feature extraction",
            PipelineStage::Classification => "Classification",
            PipelineStage::Aggregation => "Aggregation",
            PipelineStage::Done => "Done",
            PipelineStage::Failed => "Failed",
        };
        f.write_str(name)
    }
}


/// A pipeline error tagged with the stage that was running when it occurred.
#[derive(Error, Debug)]
#[error("{stage} failed: {source}")]
pub struct StageError {
    pub stage: PipelineStage,
    #[source]
    pub source: PipelineError,
}


/// Tracks one run through the stage sequence and rejects out-of-order transitions.
#[derive(Debug)]
pub struct RunTracker {
    state: PipelineStage,
    entry: PipelineStage,
}

impl RunTracker {
    /// `entry` is the first stage after Idle: Trimming for a full run,
    /// FeatureExtraction when starting from existing OTUs.
    pub fn new(entry: PipelineStage) -> Self {
        RunTracker { state: PipelineStage::Idle, entry }
    }

    pub fn state(&self) -> PipelineStage {
        self.state
    }

    pub fn advance(&mut self, next: PipelineStage) -> Result<(), PipelineError> {
        let allowed = match self.state {
            PipelineStage::Idle => next == self.entry,
            current => current.successor() == Some(next),
        };
        if !allowed {
            return Err(PipelineError::Other(anyhow!(
                "Illegal stage transition {} -> {}",
                self.state,
                next
            )));
        }
        debug!("Stage transition: {} -> {}", self.state, next);
        self.state = next;
        Ok(())
    }

    /// Moves to Failed and tags `error` with the stage it interrupted.
    pub fn fail(&mut self, error: PipelineError) -> StageError {
        let stage = self.state;
        self.state = PipelineStage::Failed;
        StageError { stage, source: error }
    }
}
