//! Share transfer providers (§4.9, §4.10): the two concrete ways a
//! backup run can fill in a share's dentries and chunks.
//!
//! [`provider::TransferProvider`] is the contract the backup
//! orchestrator drives; [`rsync::RsyncTransfer`] implements it against
//! an external rsync-delta helper process via the framed RPC in
//! `rpc`/`session`, and [`walker::LocalWalker`] implements it by
//! walking the filesystem directly with no child process at all.

pub mod attrib;
pub mod provider;
pub mod rpc;
pub mod rsync;
pub mod session;
pub mod walker;

pub use provider::{TransferContext, TransferProvider};
pub use rsync::RsyncTransfer;
pub use session::Session;
pub use walker::LocalWalker;
