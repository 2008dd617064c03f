/* 📖 # Why a checksum of the exposed list?

A caller resolves the API surface once and then calls endpoints by name. If the server is
redeployed with a renamed parameter or a removed API in between, those calls silently
misbehave. Every response carries a short fingerprint of the exposed list, so a caller can
compare it with the one it resolved and notice the drift.

The fingerprint covers only the public projection (group, id, params, path, flags);
descriptions and schemas can change without affecting callers.
*/

use exposer_base::ExposerResult;
use sha2::{Digest, Sha256};

use crate::descriptor::ExposedApi;

/// Response header carrying the checksum.
pub const CHECKSUM_HEADER: &str = "X-Api-Checksum";

/// First 8 bytes of the SHA-256 of the JSON-encoded list, as lowercase hex.
pub fn checksum(exposed: &[ExposedApi]) -> ExposerResult<String> {
    let encoded = serde_json::to_vec(exposed)?;
    let digest = Sha256::digest(&encoded);
    Ok(hex::encode(&digest[..8]))
}
