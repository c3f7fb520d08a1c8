pub mod diff;
pub mod ping;
pub mod serve;
pub mod sign;

use anyhow::{Result, anyhow};
use lsync_host::mac::MacSecret;
use lsync_host::{CollectionKind, HostConfig};

/// Secret configured for `collection`, or an error naming the missing variable.
fn collection_secret(config: &HostConfig, collection: CollectionKind) -> Result<MacSecret> {
    config
        .collection(collection)
        .map(|c| c.secret.clone())
        .ok_or_else(|| {
            anyhow!(
                "no secret configured for '{collection}' (set {}_MAC_SECRET_BASE64)",
                collection.as_str().to_ascii_uppercase()
            )
        })
}
