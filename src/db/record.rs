use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;
use thiserror::Error;

/// Conversion status of one tracked result archive.
///
/// `converted` is permanently terminal; `failed -> submitted` is the only
/// way back out of a terminal state and represents an operator- or
/// policy-triggered retry.
#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum DatasetStatus {
    Pending,
    Submitted,
    Running,
    Converted,
    Failed,
}

impl DatasetStatus {
    /// db column values are all lower case
    pub fn as_str(&self) -> &'static str {
        match self {
            DatasetStatus::Pending => "pending",
            DatasetStatus::Submitted => "submitted",
            DatasetStatus::Running => "running",
            DatasetStatus::Converted => "converted",
            DatasetStatus::Failed => "failed",
        }
    }

    /// The allowed status state machine. `submitted -> failed` covers
    /// cancellation and scheduler failures before the worker ever starts.
    pub fn can_transition(self, to: DatasetStatus) -> bool {
        use DatasetStatus::*;

        matches!(
            (self, to),
            (Pending, Submitted)
                | (Submitted, Running)
                | (Submitted, Failed)
                | (Running, Converted)
                | (Running, Failed)
                | (Failed, Submitted)
        )
    }
}

impl fmt::Display for DatasetStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("unknown dataset status: {0}")]
pub struct ParseStatusError(String);

impl FromStr for DatasetStatus {
    type Err = ParseStatusError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending" => Ok(DatasetStatus::Pending),
            "submitted" => Ok(DatasetStatus::Submitted),
            "running" => Ok(DatasetStatus::Running),
            "converted" => Ok(DatasetStatus::Converted),
            "failed" => Ok(DatasetStatus::Failed),
            other => Err(ParseStatusError(other.to_string())),
        }
    }
}

/// One tracked simulation result archive
#[derive(Debug, Clone)]
pub struct DatasetRecord {
    pub uuid: String,
    pub archive_path: String,
    pub status: DatasetStatus,
    /// Human-readable failure or completion detail for operators
    pub detail: Option<String>,
    pub output_path: Option<String>,
    pub size_bytes: Option<u64>,
    pub slurm_id: Option<String>,
    pub attempts: u32,
    pub cancel_requested: bool,
    pub submitted_at: Option<String>,
    pub updated_at: String,
}

#[cfg(test)]
mod tests {
    use super::DatasetStatus::*;
    use super::*;

    #[test]
    fn exactly_the_allowed_transitions() {
        let all = [Pending, Submitted, Running, Converted, Failed];
        let allowed = [
            (Pending, Submitted),
            (Submitted, Running),
            (Submitted, Failed),
            (Running, Converted),
            (Running, Failed),
            (Failed, Submitted),
        ];

        for from in all {
            for to in all {
                assert_eq!(
                    from.can_transition(to),
                    allowed.contains(&(from, to)),
                    "{from} -> {to}"
                );
            }
        }
    }

    #[test]
    fn converted_is_permanently_terminal() {
        let all = [Pending, Submitted, Running, Converted, Failed];
        assert!(all.iter().all(|to| !Converted.can_transition(*to)));
    }

    #[test]
    fn status_round_trips_through_strings() {
        for status in [Pending, Submitted, Running, Converted, Failed] {
            assert_eq!(status.as_str().parse::<DatasetStatus>().unwrap(), status);
        }
        assert!("cancelled".parse::<DatasetStatus>().is_err());
    }
}
