use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde_json::Value;
use tracing::{debug, warn};

use crate::claims::Claims;
use crate::config::{EnvironmentContext, JwtConfig, Secret};
use crate::environment::{is_mock_auth_mode, is_production};
use crate::error::{AuthError, AuthResult};
use crate::keyset::RemoteKeySet;
use crate::options::VerificationOptions;

const HMAC_ALGORITHMS: &[Algorithm] = &[Algorithm::HS256, Algorithm::HS384, Algorithm::HS512];

/// Result of a single strategy.
#[derive(Debug)]
pub enum StrategyOutcome {
    /// Token verified; the chain stops here.
    Success(Claims),
    /// Hard failure; the chain stops and the error reaches the caller.
    Fail(AuthError),
    /// Not applicable, or attempted and deliberately abandoned. The chain moves on.
    Skip { discarded: Option<AuthError> },
}

impl StrategyOutcome {
    pub fn skip() -> Self {
        Self::Skip { discarded: None }
    }

    pub fn discard(err: AuthError) -> Self {
        Self::Skip {
            discarded: Some(err),
        }
    }

    fn from_result(result: AuthResult<Claims>) -> Self {
        match result {
            Ok(claims) => Self::Success(claims),
            Err(err) => Self::Fail(err),
        }
    }
}

#[async_trait]
pub trait VerificationStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    async fn attempt(&self, token: &str, options: &VerificationOptions) -> StrategyOutcome;
}

/// Shared-secret verification used whenever mock auth mode is on. Never falls through.
pub struct MockStrategy {
    active: bool,
    secret: Option<Secret>,
    leeway_seconds: u32,
}

impl MockStrategy {
    pub fn new(ctx: &EnvironmentContext) -> Self {
        Self {
            active: is_mock_auth_mode(ctx),
            secret: ctx.mock_secret.clone(),
            leeway_seconds: ctx.jwt.leeway_seconds,
        }
    }
}

#[async_trait]
impl VerificationStrategy for MockStrategy {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn attempt(&self, token: &str, _options: &VerificationOptions) -> StrategyOutcome {
        if !self.active {
            return StrategyOutcome::skip();
        }
        let Some(secret) = &self.secret else {
            return StrategyOutcome::Fail(AuthError::MissingMockSecret);
        };
        let expectations = HmacExpectations {
            issuer: None,
            audience: None,
            leeway_seconds: self.leeway_seconds,
            require_exp: false,
        };
        StrategyOutcome::from_result(verify_hmac(token, secret, &expectations))
    }
}

/// Secondary shared-secret path for tokens minted by the SSO bridge.
/// Every failure is discarded so the key-set strategy still gets its turn.
pub struct SsoFallbackStrategy {
    secret: Option<Secret>,
    issuer: String,
    audience: String,
    leeway_seconds: u32,
    mock_mode: bool,
}

impl SsoFallbackStrategy {
    pub fn new(ctx: &EnvironmentContext) -> Self {
        Self {
            secret: ctx.sso.secret.clone(),
            issuer: ctx.sso.issuer.clone(),
            audience: ctx.sso.audience.clone(),
            leeway_seconds: ctx.jwt.leeway_seconds,
            mock_mode: is_mock_auth_mode(ctx),
        }
    }
}

#[async_trait]
impl VerificationStrategy for SsoFallbackStrategy {
    fn name(&self) -> &'static str {
        "sso_fallback"
    }

    async fn attempt(&self, token: &str, options: &VerificationOptions) -> StrategyOutcome {
        if !options.allows_sso_fallback() || self.mock_mode {
            return StrategyOutcome::skip();
        }
        let Some(secret) = &self.secret else {
            return StrategyOutcome::skip();
        };
        let expectations = HmacExpectations {
            issuer: Some(&self.issuer),
            audience: Some(&self.audience),
            leeway_seconds: self.leeway_seconds,
            require_exp: true,
        };
        match verify_hmac(token, secret, &expectations) {
            Ok(claims) => StrategyOutcome::Success(claims),
            Err(err) => {
                debug!(error = %err, "SSO fallback verification failed; continuing");
                StrategyOutcome::discard(err)
            }
        }
    }
}

/// Asymmetric verification against the remote key set.
pub struct KeySetStrategy {
    keys: Option<Arc<RemoteKeySet>>,
    config: JwtConfig,
}

impl KeySetStrategy {
    pub fn new(keys: Option<Arc<RemoteKeySet>>, config: JwtConfig) -> Self {
        Self { keys, config }
    }

    async fn verify(&self, keys: &RemoteKeySet, token: &str) -> AuthResult<Claims> {
        let header =
            decode_header(token).map_err(|err| AuthError::InvalidHeader(err.to_string()))?;
        let entry = keys.resolve(header.kid.as_deref()).await?;
        if !entry.allows(header.alg) {
            return Err(AuthError::AlgorithmNotAllowed(format!("{:?}", header.alg)));
        }

        let mut validation = Validation::new(header.alg);
        validation.algorithms = vec![header.alg];
        validation.leeway = self.config.leeway_seconds.into();
        expect_claims(
            &mut validation,
            self.config.issuer.as_deref(),
            self.config.audience.as_deref(),
        );

        let token_data = decode::<Value>(token, entry.key(), &validation)?;
        let claims = Claims::try_from(token_data.claims)?;
        debug!(kid = ?header.kid, "verified token against key set");
        Ok(claims)
    }
}

#[async_trait]
impl VerificationStrategy for KeySetStrategy {
    fn name(&self) -> &'static str {
        "key_set"
    }

    async fn attempt(&self, token: &str, _options: &VerificationOptions) -> StrategyOutcome {
        match &self.keys {
            Some(keys) => StrategyOutcome::from_result(self.verify(keys, token).await),
            None => StrategyOutcome::skip(),
        }
    }
}

/// Behaviour when no key-set location is configured: refuse in production,
/// otherwise either decode unsigned (both gates open) or report nothing.
pub struct NoKeySetStrategy {
    key_set_configured: bool,
    production: bool,
    insecure_decode: bool,
}

impl NoKeySetStrategy {
    pub fn new(ctx: &EnvironmentContext, key_set_configured: bool) -> Self {
        Self {
            key_set_configured,
            production: is_production(ctx),
            insecure_decode: ctx.insecure_decode,
        }
    }
}

#[async_trait]
impl VerificationStrategy for NoKeySetStrategy {
    fn name(&self) -> &'static str {
        "no_key_set"
    }

    async fn attempt(&self, token: &str, options: &VerificationOptions) -> StrategyOutcome {
        if self.key_set_configured {
            return StrategyOutcome::skip();
        }
        if self.production {
            return StrategyOutcome::Fail(AuthError::MissingKeySetLocation);
        }
        if !(options.allows_insecure_dev() && self.insecure_decode) {
            return StrategyOutcome::skip();
        }
        match decode_unverified(token) {
            Ok(claims) => {
                warn!(subject = ?claims.subject(), "accepted token without signature verification");
                StrategyOutcome::Success(claims)
            }
            Err(err) => StrategyOutcome::discard(err),
        }
    }
}

struct HmacExpectations<'a> {
    issuer: Option<&'a str>,
    audience: Option<&'a str>,
    leeway_seconds: u32,
    require_exp: bool,
}

fn verify_hmac(token: &str, secret: &Secret, expect: &HmacExpectations<'_>) -> AuthResult<Claims> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.algorithms = HMAC_ALGORITHMS.to_vec();
    validation.leeway = expect.leeway_seconds.into();
    if !expect.require_exp {
        validation.required_spec_claims.clear();
    }
    expect_claims(&mut validation, expect.issuer, expect.audience);

    let key = DecodingKey::from_secret(secret.expose());
    let token_data = decode::<Value>(token, &key, &validation)?;
    Claims::try_from(token_data.claims)
}

/// Expected `iss`/`aud` must be present, not merely equal when present.
fn expect_claims(validation: &mut Validation, issuer: Option<&str>, audience: Option<&str>) {
    if let Some(issuer) = issuer {
        validation.set_issuer(&[issuer]);
        validation.required_spec_claims.insert("iss".to_string());
    }
    match audience {
        Some(audience) => {
            validation.set_audience(&[audience]);
            validation.required_spec_claims.insert("aud".to_string());
        }
        None => validation.validate_aud = false,
    }
}

/// Read the payload segment without looking at the signature.
fn decode_unverified(token: &str) -> AuthResult<Claims> {
    let payload = token
        .split('.')
        .nth(1)
        .filter(|segment| !segment.is_empty())
        .ok_or_else(|| AuthError::InvalidJson("token has no payload segment".to_string()))?;
    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|err| AuthError::InvalidJson(err.to_string()))?;
    let value: Value =
        serde_json::from_slice(&bytes).map_err(|err| AuthError::InvalidJson(err.to_string()))?;
    Claims::try_from(value)
}
