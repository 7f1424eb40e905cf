use std::str::FromStr;

use jsonwebtoken::{Algorithm, DecodingKey};
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{AuthError, AuthResult};
use crate::keyset::KeyEntry;

const RSA_ALGORITHMS: &[Algorithm] = &[
    Algorithm::RS256,
    Algorithm::RS384,
    Algorithm::RS512,
    Algorithm::PS256,
    Algorithm::PS384,
    Algorithm::PS512,
];

#[derive(Clone)]
pub struct JwksFetcher {
    client: Client,
    url: String,
}

impl JwksFetcher {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            url: url.into(),
        }
    }

    pub fn with_client(client: Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn fetch(&self) -> AuthResult<Vec<(String, KeyEntry)>> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|err| AuthError::JwksFetch(err.to_string()))?;

        if !response.status().is_success() {
            return Err(AuthError::JwksFetch(format!(
                "HTTP {} from {}",
                response.status(),
                self.url
            )));
        }

        let body: JwksResponse = response
            .json()
            .await
            .map_err(|err| AuthError::JwksDecode(err.to_string()))?;

        parse_keys(body)
    }
}

/// Malformed entries are logged and skipped; only a set with no usable key fails.
fn parse_keys(body: JwksResponse) -> AuthResult<Vec<(String, KeyEntry)>> {
    let mut keys = Vec::new();
    for key in body.keys.into_iter() {
        if key.use_.as_deref().is_some_and(|usage| usage != "sig") {
            continue;
        }
        match parse_entry(key) {
            Ok(Some(parsed)) => keys.push(parsed),
            Ok(None) => {}
            Err(err) => warn!(error = %err, "skipping malformed JWKS key"),
        }
    }

    if keys.is_empty() {
        return Err(AuthError::JwksEmpty);
    }
    Ok(keys)
}

fn parse_entry(key: JwkEntry) -> AuthResult<Option<(String, KeyEntry)>> {
    let kid = key.kid.clone().ok_or(AuthError::JwksMissingKid)?;
    Ok(parse_key(&kid, key)?.map(|entry| (kid, entry)))
}

fn parse_key(kid: &str, key: JwkEntry) -> AuthResult<Option<KeyEntry>> {
    let kty = key.kty.as_deref().unwrap_or("RSA");
    let (decoding_key, family) = match kty {
        "RSA" => {
            let (Some(n), Some(e)) = (key.n.as_deref(), key.e.as_deref()) else {
                return Err(AuthError::JwksMissingComponents(kid.to_string()));
            };
            let decoding_key = DecodingKey::from_rsa_components(n, e)
                .map_err(|err| AuthError::KeyParse(kid.to_string(), err.to_string()))?;
            (decoding_key, RSA_ALGORITHMS.to_vec())
        }
        "EC" => {
            let algorithm = match key.crv.as_deref() {
                Some("P-256") => Algorithm::ES256,
                Some("P-384") => Algorithm::ES384,
                other => {
                    debug!(kid, crv = ?other, "skipping JWKS key with unsupported curve");
                    return Ok(None);
                }
            };
            let (Some(x), Some(y)) = (key.x.as_deref(), key.y.as_deref()) else {
                return Err(AuthError::JwksMissingComponents(kid.to_string()));
            };
            let decoding_key = DecodingKey::from_ec_components(x, y)
                .map_err(|err| AuthError::KeyParse(kid.to_string(), err.to_string()))?;
            (decoding_key, vec![algorithm])
        }
        other => {
            debug!(kid, kty = other, "skipping JWKS key with unsupported key type");
            return Ok(None);
        }
    };

    let algorithms = match key.alg {
        Some(alg) => {
            let parsed = Algorithm::from_str(&alg).ok().filter(|a| family.contains(a));
            match parsed {
                Some(algorithm) => vec![algorithm],
                None => {
                    return Err(AuthError::JwksUnsupportedAlg {
                        kid: kid.to_string(),
                        alg,
                    })
                }
            }
        }
        None => family,
    };

    Ok(Some(KeyEntry::new(decoding_key, algorithms)))
}

#[derive(Debug, Deserialize)]
struct JwksResponse {
    keys: Vec<JwkEntry>,
}

#[derive(Debug, Deserialize)]
struct JwkEntry {
    kid: Option<String>,
    kty: Option<String>,
    alg: Option<String>,
    #[serde(rename = "use")]
    use_: Option<String>,
    n: Option<String>,
    e: Option<String>,
    crv: Option<String>,
    x: Option<String>,
    y: Option<String>,
}
