//! Expiry decision tree evaluator (C11): walks the composable policy
//! tree from `fbk_config::ExpiryPolicy` and returns the subset of a
//! host's candidate backup numbers considered expired.
//!
//! The policy tree itself is a plain recursive algebraic data type
//! (§9 "Dynamic policy dispatch"); no runtime reflection is needed, each
//! variant just knows how to turn the candidate list into an expired set.

use std::collections::{HashMap, HashSet};

use fbk_api_types::BackupStatus;
use fbk_config::ExpiryPolicy;

/// One candidate a policy can mark expired or keep. `number` is the
/// on-disk backup number; `start_time`/`status` come from its
/// `info.json`.
#[derive(Debug, Clone, Copy)]
pub struct BackupRecord {
    pub number: u32,
    pub start_time: i64,
    pub status: BackupStatus,
}

/// Evaluates `policy` against `candidates` (always the host's full
/// ordered backup list, per spec) and returns the expired subset.
pub fn evaluate(policy: &ExpiryPolicy, candidates: &[BackupRecord], now: i64) -> HashSet<u32> {
    match policy {
        ExpiryPolicy::And(subs) => {
            let mut sets = subs.iter().map(|p| evaluate(p, candidates, now));
            match sets.next() {
                Some(first) => sets.fold(first, |acc, s| acc.intersection(&s).copied().collect()),
                None => HashSet::new(),
            }
        }
        ExpiryPolicy::Or(subs) => subs.iter().fold(HashSet::new(), |mut acc, p| {
            acc.extend(evaluate(p, candidates, now));
            acc
        }),
        ExpiryPolicy::Not(sub) => {
            let expired = evaluate(sub, candidates, now);
            candidates
                .iter()
                .map(|b| b.number)
                .filter(|n| !expired.contains(n))
                .collect()
        }
        ExpiryPolicy::Age { max } => candidates
            .iter()
            .filter(|b| now - b.start_time >= max.as_secs() as i64)
            .map(|b| b.number)
            .collect(),
        ExpiryPolicy::Status { statuses } => candidates
            .iter()
            .filter(|b| statuses.contains(&b.status))
            .map(|b| b.number)
            .collect(),
        ExpiryPolicy::Logarithmic { keep, of } => logarithmic(*keep, of.as_deref(), candidates, now),
    }
}

/// `logarithmic(keep, of)`: restrict to the survivors of `of` (or the
/// whole candidate list when absent), number them 1-based in ascending
/// order, bucket by the position of the lowest set bit of that number,
/// and expire every bucket member except the most recent `keep`.
fn logarithmic(keep: u32, of: Option<&ExpiryPolicy>, candidates: &[BackupRecord], now: i64) -> HashSet<u32> {
    let mut universe: Vec<&BackupRecord> = match of {
        Some(sub) => {
            let expired_by_of = evaluate(sub, candidates, now);
            candidates.iter().filter(|b| !expired_by_of.contains(&b.number)).collect()
        }
        None => candidates.iter().collect(),
    };
    universe.sort_by_key(|b| b.number);

    let mut generations: HashMap<u32, Vec<u32>> = HashMap::new();
    for (i, backup) in universe.iter().enumerate() {
        let sequence_number = (i + 1) as u32;
        let generation = sequence_number.trailing_zeros();
        generations.entry(generation).or_default().push(backup.number);
    }

    let mut expired = HashSet::new();
    for numbers in generations.into_values() {
        let expire_count = numbers.len().saturating_sub(keep as usize);
        expired.extend(numbers.into_iter().take(expire_count));
    }
    expired
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(number: u32, start_time: i64, status: BackupStatus) -> BackupRecord {
        BackupRecord { number, start_time, status }
    }

    fn done(numbers: impl IntoIterator<Item = u32>) -> Vec<BackupRecord> {
        numbers.into_iter().map(|n| record(n, n as i64, BackupStatus::Done)).collect()
    }

    #[test]
    fn logarithmic_generation_matches_lowest_set_bit_on_seed_sequence() {
        // §9's open question: validate against the seed sequence [1..16].
        let candidates = done(1..=16);
        let policy = ExpiryPolicy::Logarithmic { keep: 1, of: None };
        let expired = evaluate(&policy, &candidates, 0);
        let mut survivors: Vec<u32> = (1..=16).filter(|n| !expired.contains(n)).collect();
        survivors.sort_unstable();
        assert_eq!(survivors, vec![8, 12, 14, 15, 16]);
    }

    #[test]
    fn age_expires_only_backups_older_than_the_threshold() {
        let candidates = vec![record(0, 0, BackupStatus::Done), record(1, 1_000_000, BackupStatus::Done)];
        let policy = ExpiryPolicy::Age {
            max: "1s".parse().unwrap(),
        };
        let expired = evaluate(&policy, &candidates, 1_000_000);
        assert!(expired.contains(&0));
        assert!(!expired.contains(&1));
    }

    #[test]
    fn and_or_not_compose_as_set_operations() {
        let candidates = done(0..=3);
        let age_all = ExpiryPolicy::Age {
            max: "0s".parse().unwrap(),
        };
        let failed_only = ExpiryPolicy::Status {
            statuses: vec![BackupStatus::Failed],
        };
        let and_policy = ExpiryPolicy::And(vec![age_all.clone(), ExpiryPolicy::Not(Box::new(failed_only))]);
        let expired = evaluate(&and_policy, &candidates, 10);
        assert_eq!(expired, HashSet::from([0, 1, 2, 3]));

        let or_policy = ExpiryPolicy::Or(vec![
            ExpiryPolicy::Age {
                max: "1000s".parse().unwrap(),
            },
            ExpiryPolicy::Status {
                statuses: vec![BackupStatus::Failed],
            },
        ]);
        let expired = evaluate(&or_policy, &candidates, 10);
        assert!(expired.is_empty());
    }

    #[test]
    fn default_policy_keeps_the_most_recent_backup() {
        // `or(logarithmic(1), and(age(1w), not(status(done))))` on a
        // single done backup must never expire it.
        let candidates = done(0..=0);
        let expired = evaluate(&ExpiryPolicy::default_policy(), &candidates, 0);
        assert!(expired.is_empty());
    }
}
