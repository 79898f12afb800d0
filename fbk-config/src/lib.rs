//! Host, share, pool and expiry-policy configuration types.
//!
//! The file-include config *loader* with its section semantics is
//! explicitly out of scope for the storage engine (§1); this crate only
//! fixes the shapes the engine is handed, plus a small loader good enough
//! to drive the CLI and the test suite from a single TOML file.

mod expiry;
mod host;
mod loader;
mod pool;
mod timespan;

pub use expiry::ExpiryPolicy;
pub use host::{HostConfig, ShareConfig};
pub use loader::{load_config, Config};
pub use pool::{Compression, EncryptionConfig, PoolConfig};
pub use timespan::TimeSpan;
