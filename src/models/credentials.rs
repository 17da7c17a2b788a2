//! Per-venue API credentials (spec §3). Persisted encrypted in the shared KV
//! under `credentials:{venue}`; this struct is the in-memory shape only.

use serde::{Deserialize, Serialize};

#[derive(Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub venue: String,
    pub api_key: String,
    pub secret: String,
    pub passphrase: Option<String>,
    pub testnet: bool,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("venue", &self.venue)
            .field("api_key", &"***redacted***")
            .field("secret", &"***redacted***")
            .field("passphrase", &self.passphrase.as_ref().map(|_| "***redacted***"))
            .field("testnet", &self.testnet)
            .finish()
    }
}
