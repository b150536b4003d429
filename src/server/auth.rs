// src/server/auth.rs

//! Peer authentication for the replication RPC surface.
//!
//! Every peer RPC carries `authorization: Bearer <jwt>` signed with the
//! sender's EdDSA key. Each peer publishes its public key as a JWKS document
//! at `/.well-known/jwks.json` on its HTTPS surface; peers poll each other's
//! documents in the background. Tokens are validated against a fixed issuer
//! and the fixed cluster audience.

use crate::core::ClusterError;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, decode_header, encode};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// The audience claim every cluster token must carry.
pub const JWT_AUDIENCE: &str = "dolt-cluster-remote-api.dolthub.com";

/// Where each peer publishes its signing keys.
pub const JWKS_PATH: &str = "/.well-known/jwks.json";

/// Lifetime of minted tokens.
const TOKEN_TTL: Duration = Duration::from_secs(300);

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    iss: String,
    aud: String,
    sub: String,
    iat: u64,
    exp: u64,
}

fn unix_now() -> Result<u64, ClusterError> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .map_err(|e| ClusterError::Internal(format!("system clock before Unix epoch: {e}")))
}

/// Mints bearer tokens for outbound peer RPCs.
pub trait TokenSource: Send + Sync {
    fn token(&self) -> Result<String, ClusterError>;
}

/// Token source backed by a local Ed25519 signing key.
pub struct EdDsaTokenSource {
    key: EncodingKey,
    issuer: String,
    key_id: String,
}

impl EdDsaTokenSource {
    /// Loads the signing key from a PKCS#8 PEM document.
    pub fn from_pem(pem: &[u8], issuer: String, key_id: String) -> Result<Self, ClusterError> {
        let key = EncodingKey::from_ed_pem(pem)
            .map_err(|e| ClusterError::Config(format!("invalid EdDSA signing key: {e}")))?;
        Ok(Self {
            key,
            issuer,
            key_id,
        })
    }
}

impl TokenSource for EdDsaTokenSource {
    fn token(&self) -> Result<String, ClusterError> {
        let now = unix_now()?;
        let claims = Claims {
            iss: self.issuer.clone(),
            aud: JWT_AUDIENCE.to_string(),
            sub: self.issuer.clone(),
            iat: now,
            exp: now + TOKEN_TTL.as_secs(),
        };
        let mut header = Header::new(Algorithm::EdDSA);
        header.kid = Some(self.key_id.clone());
        encode(&header, &claims, &self.key)
            .map_err(|e| ClusterError::Internal(format!("failed to sign cluster token: {e}")))
    }
}

/// Supplies verification keys, looked up by the token's `kid` header.
pub trait KeyProvider: Send + Sync {
    fn decoding_key(&self, kid: Option<&str>) -> Option<DecodingKey>;
}

/// Fixed in-memory key set.
pub struct StaticKeyProvider {
    keys: HashMap<String, DecodingKey>,
}

impl StaticKeyProvider {
    pub fn new(keys: HashMap<String, DecodingKey>) -> Self {
        Self { keys }
    }

    /// A provider holding a single key under the given id.
    pub fn single(key_id: &str, key: DecodingKey) -> Self {
        let mut keys = HashMap::new();
        keys.insert(key_id.to_string(), key);
        Self { keys }
    }
}

impl KeyProvider for StaticKeyProvider {
    fn decoding_key(&self, kid: Option<&str>) -> Option<DecodingKey> {
        match kid {
            Some(kid) => self.keys.get(kid).cloned(),
            // With no key id in the token, a single-key provider still works.
            None if self.keys.len() == 1 => self.keys.values().next().cloned(),
            None => None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct JwksDocument {
    keys: Vec<Jwk>,
}

#[derive(Debug, Deserialize)]
struct Jwk {
    kty: String,
    #[serde(default)]
    kid: Option<String>,
    #[serde(default)]
    crv: Option<String>,
    #[serde(default)]
    x: Option<String>,
}

/// Key provider that polls a peer's JWKS document.
pub struct JwksKeyProvider {
    url: String,
    http: reqwest::Client,
    keys: RwLock<HashMap<String, DecodingKey>>,
}

impl JwksKeyProvider {
    pub fn new(url: String, http: reqwest::Client) -> Self {
        Self {
            url,
            http,
            keys: RwLock::new(HashMap::new()),
        }
    }

    /// Fetches the JWKS document and replaces the cached key set with its
    /// Ed25519 entries.
    pub async fn refresh(&self) -> Result<(), ClusterError> {
        let doc: JwksDocument = self
            .http
            .get(&self.url)
            .send()
            .await?
            .error_for_status()
            .map_err(|e| ClusterError::HttpClientError(format!("JWKS fetch failed: {e}")))?
            .json()
            .await?;

        let mut fresh = HashMap::new();
        for jwk in doc.keys {
            if jwk.kty != "OKP" || jwk.crv.as_deref() != Some("Ed25519") {
                debug!(kty = %jwk.kty, "skipping non-Ed25519 JWKS entry");
                continue;
            }
            let Some(x) = jwk.x.as_deref() else {
                continue;
            };
            match DecodingKey::from_ed_components(x) {
                Ok(key) => {
                    fresh.insert(jwk.kid.clone().unwrap_or_default(), key);
                }
                Err(e) => {
                    warn!(kid = ?jwk.kid, "unparseable JWKS key: {e}");
                }
            }
        }
        let count = fresh.len();
        *self.keys.write() = fresh;
        debug!(url = %self.url, count, "refreshed peer JWKS");
        Ok(())
    }

    /// Long-running poller refreshing the key set until shutdown.
    pub async fn run_poller(
        self: Arc<Self>,
        interval: Duration,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) {
        info!(url = %self.url, "JWKS poller started");
        let mut tick = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    if let Err(e) = self.refresh().await {
                        warn!(url = %self.url, "JWKS refresh failed: {e}");
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!(url = %self.url, "JWKS poller shutting down");
                    return;
                }
            }
        }
    }
}

impl KeyProvider for JwksKeyProvider {
    fn decoding_key(&self, kid: Option<&str>) -> Option<DecodingKey> {
        let keys = self.keys.read();
        match kid {
            Some(kid) => keys.get(kid).cloned(),
            None if keys.len() == 1 => keys.values().next().cloned(),
            None => None,
        }
    }
}

/// Validates inbound bearer tokens against the expected issuer, the fixed
/// cluster audience, and the peer's published keys.
pub struct JwtVerifier {
    issuer: String,
    provider: Arc<dyn KeyProvider>,
}

impl JwtVerifier {
    pub fn new(issuer: String, provider: Arc<dyn KeyProvider>) -> Self {
        Self { issuer, provider }
    }

    pub fn verify(&self, token: &str) -> Result<(), ClusterError> {
        let header = decode_header(token)?;
        let key = self
            .provider
            .decoding_key(header.kid.as_deref())
            .ok_or_else(|| {
                ClusterError::Unauthenticated(format!(
                    "no verification key for kid {:?}",
                    header.kid
                ))
            })?;
        let mut validation = Validation::new(Algorithm::EdDSA);
        validation.set_issuer(&[self.issuer.as_str()]);
        validation.set_audience(&[JWT_AUDIENCE]);
        decode::<Claims>(token, &key, &validation)?;
        Ok(())
    }
}
