//! Platform-assigned identifiers
//!
//! Identifiers are minted once, when the merge first sees a chart name or a
//! chart version, and are never derived from upstream names.

use rand::Rng;
use rand::distr::Alphanumeric;

/// Prefix for application identifiers
pub const APP_ID_PREFIX: &str = "app";

/// Prefix for application version identifiers
pub const VERSION_ID_PREFIX: &str = "appv";

const ID_LEN: usize = 14;

/// Generate a fresh identifier such as `app-k3x9q0m2lz7w1b`
pub fn new_id(prefix: &str) -> String {
    let suffix: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(ID_LEN)
        .map(|b| char::from(b).to_ascii_lowercase())
        .collect();
    format!("{}-{}", prefix, suffix)
}
