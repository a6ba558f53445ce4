//! Recording of raw observations for threshold recalibration.
//!
//! Every metric or latency on which a decision was taken can be logged,
//! together with the verdict, either into a CSV file or into a Vec.
use std::fs::File;
use std::path::Path;

use serde::Serialize;

use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Observation {
    /// Algorithm step, e.g. `round1`, `round2`, `shared`, `phase1`, `bisect`.
    pub phase: String,
    /// Instance (or instance set) holding the lock.
    pub lock: String,
    /// Probed URL.
    pub url: String,
    pub instance_id: String,
    /// Metric or median latency; `inf` when unmeasurable.
    pub value: f64,
    /// Whether the observation passed the threshold.
    pub accepted: bool,
}

/// Log observations either to a .csv file or into a Vec.
pub enum ObservationLog {
    LogFile(csv::Writer<File>),
    LogVec(Vec<Observation>),
}

impl ObservationLog {
    pub fn create<P: AsRef<Path>>(path: P) -> Result<ObservationLog> {
        Ok(ObservationLog::LogFile(csv::Writer::from_path(path)?))
    }

    pub fn in_memory() -> ObservationLog {
        ObservationLog::LogVec(vec![])
    }

    pub fn record(&mut self, observation: Observation) -> Result<()> {
        match self {
            ObservationLog::LogFile(writer) => {
                writer.serialize(&observation)?;
                writer.flush()?;
            },
            ObservationLog::LogVec(v) => v.push(observation),
        }
        Ok(())
    }

    /// Returns the recorded observations, if kept in memory.
    pub fn observations(&self) -> Option<&[Observation]> {
        match self {
            ObservationLog::LogFile(_) => None,
            ObservationLog::LogVec(v) => Some(v),
        }
    }
}

/// Records into `log` if there is one.
pub fn record(log: &mut Option<ObservationLog>, observation: Observation) -> Result<()> {
    match log {
        Some(log) => log.record(observation),
        None => Ok(()),
    }
}
