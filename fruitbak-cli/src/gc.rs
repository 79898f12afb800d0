//! `gc` and `scrub` subcommands.

use anyhow::Error;
use fbk_api_types::HumanByte;
use fruitbak::Root;

pub fn gc(root: &Root) -> Result<bool, Error> {
    let status = fruitbak::run_gc(root)?;
    log::info!(
        "gc: removed {} chunk(s) ({}), {} surviving ({}), {} missing",
        status.removed_chunks,
        HumanByte::from(status.removed_bytes),
        status.disk_chunks,
        HumanByte::from(status.disk_bytes),
        status.missing_chunks
    );
    Ok(status.missing_chunks == 0)
}

/// Reads every chunk in the pool back through the verify filter (§4.3),
/// the cheapest way to find bit rot without a dedicated walk: `retrieve`
/// already recomputes and checks the digest on every read.
pub fn scrub(root: &Root, numprocs: Option<usize>) -> Result<bool, Error> {
    let _ = numprocs; // single-threaded scrub; concurrency is a future knob, not a current one.
    let mut checked = 0u64;
    let mut checked_bytes = 0u64;
    let mut failed = 0u64;
    for batch in root.pool.iterate()? {
        for digest in batch? {
            match root.pool.retrieve(&digest) {
                Ok(Some(data)) => {
                    checked += 1;
                    checked_bytes += data.len() as u64;
                }
                Ok(None) => {
                    log::error!("scrub: chunk {} vanished mid-scan", hex::encode(digest));
                    failed += 1;
                }
                Err(err) => {
                    log::error!("scrub: chunk {} failed verification: {err:#}", hex::encode(digest));
                    failed += 1;
                }
            }
        }
    }
    log::info!(
        "scrub: checked {checked} chunk(s) ({}), {failed} failed",
        HumanByte::from(checked_bytes)
    );
    Ok(failed == 0)
}
