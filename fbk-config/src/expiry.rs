//! The composable expiry policy tree (C11). Evaluation lives in the
//! `fruitbak` crate, which has access to the backup list to evaluate
//! against; this only fixes the policy's on-disk/config shape.

use serde::{Deserialize, Serialize};

use fbk_api_types::BackupStatus;

use crate::TimeSpan;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "op")]
pub enum ExpiryPolicy {
    And(Vec<ExpiryPolicy>),
    Or(Vec<ExpiryPolicy>),
    Not(Box<ExpiryPolicy>),
    Age { max: TimeSpan },
    Status { #[serde(rename = "in")] statuses: Vec<BackupStatus> },
    /// `of: None` means "the full candidate set passed to this policy",
    /// i.e. `logarithmic(1)` with no explicit sub-policy.
    Logarithmic {
        keep: u32,
        of: Option<Box<ExpiryPolicy>>,
    },
}

impl ExpiryPolicy {
    /// The policy this crate hands the garbage collector when a host has
    /// none of its own configured: `or(logarithmic(1), and(age(1w), not(status(done))))`.
    pub fn default_policy() -> Self {
        ExpiryPolicy::Or(vec![
            ExpiryPolicy::Logarithmic { keep: 1, of: None },
            ExpiryPolicy::And(vec![
                ExpiryPolicy::Age {
                    max: "1w".parse().unwrap(),
                },
                ExpiryPolicy::Not(Box::new(ExpiryPolicy::Status {
                    statuses: vec![BackupStatus::Done],
                })),
            ]),
        ])
    }
}
