use serde::{Deserialize, Serialize};

/// How aggressively the chunk store and index writers flush to disk.
///
/// Mirrors the durability knob a filesystem-backed content store generally
/// needs: `None` skips fsync entirely (fast, only safe for scratch stores),
/// `File` fsyncs the written file (and, on rename, its directory) before
/// considering a store complete, `Filesystem` additionally syncs the whole
/// filesystem. The spec asks for this to be made explicit rather than
/// silently deciding at one call site, and to default to `File`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FsyncLevel {
    None,
    #[default]
    File,
    Filesystem,
}
