use serde::{Deserialize, Serialize};

/// Outcome of a finished (or still-running) backup, as recorded in
/// `info.json` and consulted by the `status(in=SET)` expiry operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupStatus {
    Done,
    Failed,
}

impl BackupStatus {
    pub fn from_failed_flag(failed: bool) -> Self {
        if failed {
            BackupStatus::Failed
        } else {
            BackupStatus::Done
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BackupStatus::Done => "done",
            BackupStatus::Failed => "failed",
        }
    }
}

impl std::str::FromStr for BackupStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "done" => Ok(BackupStatus::Done),
            "failed" => Ok(BackupStatus::Failed),
            other => anyhow::bail!("unknown backup status '{other}'"),
        }
    }
}
