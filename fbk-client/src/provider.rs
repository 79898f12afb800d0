//! The uniform contract a share transfer provider fulfills, whether it
//! drives the rsync-delta child protocol (`rsync` module) or walks the
//! local filesystem directly (`walker` module). The backup orchestrator
//! drives either one without caring which.

use anyhow::Error;

use fbk_config::ShareConfig;
use fbk_datastore::{Hashset, Pool, ShareReader, ShareWriter};

/// Everything a provider needs to index one share: where new chunks go,
/// where finished dentries go, and what the previous backup looked like.
pub struct TransferContext<'a> {
    pub pool: &'a Pool,
    pub writer: &'a mut ShareWriter,
    pub reference: Option<&'a ShareReader>,
    pub reference_hashset: Option<&'a Hashset>,
    pub share: &'a ShareConfig,
    pub whole_file: bool,
}

pub trait TransferProvider {
    /// Runs the transfer to completion, writing every entry for this
    /// share into `ctx.writer`. Returns an error only for conditions
    /// that should fail the whole share (§4.9's "fatal to the share").
    fn transfer(&mut self, ctx: &mut TransferContext) -> Result<(), Error>;
}
