use std::time::Duration;
#[cfg(feature = "metrics")]
pub mod http;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod patch;

pub(crate) mod colors;

mod error;

pub use error::*;

/// Default resync period: how often a converged job is requeued even
/// without a new cache event, so status stays fresh (§6 `resyncPeriod`).
pub(crate) const PROBE_INTERVAL: Duration = Duration::from_secs(15);

/// Name of the kubernetes resource manager used on server-side apply patches.
pub(crate) const MANAGER_NAME: &str = "trainjob-controller";

pub fn hash_spec<T: serde::Serialize>(spec: &T) -> String {
    use sha2::{Digest, Sha256};
    let spec_bytes = serde_json::to_vec(spec).unwrap();
    let mut hasher = Sha256::new();
    hasher.update(&spec_bytes);
    let result = hasher.finalize();
    hex::encode(result)
}
