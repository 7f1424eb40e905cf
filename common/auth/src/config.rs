use std::fmt;
use std::time::Duration;

use url::Url;

use crate::environment::DeploymentMode;
use crate::error::{AuthError, AuthResult};

pub const DEFAULT_LEEWAY_SECONDS: u32 = 30;
pub const DEFAULT_SSO_ISSUER: &str = "sso";
pub const DEFAULT_SSO_AUDIENCE: &str = "api";
pub const DEFAULT_JWKS_MAX_AGE: Duration = Duration::from_secs(300);
pub const DEFAULT_JWKS_COOLDOWN: Duration = Duration::from_secs(30);
pub const MIN_JWKS_REFRESH: Duration = Duration::from_secs(60);

/// Shared secret that never shows up in `Debug` output.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

/// Issuer/audience expectations for tokens verified against the remote key set.
#[derive(Debug, Clone)]
pub struct JwtConfig {
    /// Expected issuer claim (iss); not enforced when unset.
    pub issuer: Option<String>,
    /// Expected audience claim (aud); not enforced when unset.
    pub audience: Option<String>,
    /// Allowable clock skew in seconds when validating exp/nbf.
    pub leeway_seconds: u32,
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            issuer: None,
            audience: None,
            leeway_seconds: DEFAULT_LEEWAY_SECONDS,
        }
    }
}

impl JwtConfig {
    /// Construct config with sensible defaults (30 second leeway).
    pub fn new(issuer: impl Into<String>, audience: impl Into<String>) -> Self {
        Self {
            issuer: Some(issuer.into()),
            audience: Some(audience.into()),
            leeway_seconds: DEFAULT_LEEWAY_SECONDS,
        }
    }

    /// Adjust the allowed leeway.
    pub fn with_leeway(mut self, seconds: u32) -> Self {
        self.leeway_seconds = seconds;
        self
    }
}

/// Secondary shared-secret verification used by the SSO bridge.
#[derive(Debug, Clone)]
pub struct SsoConfig {
    pub secret: Option<Secret>,
    pub issuer: String,
    pub audience: String,
}

impl Default for SsoConfig {
    fn default() -> Self {
        Self {
            secret: None,
            issuer: DEFAULT_SSO_ISSUER.to_string(),
            audience: DEFAULT_SSO_AUDIENCE.to_string(),
        }
    }
}

/// Process-wide verification settings, resolved once at startup.
#[derive(Debug, Clone)]
pub struct EnvironmentContext {
    pub deployment: DeploymentMode,
    /// `AUTH_MODE=mock`; only honoured in test deployments.
    pub mock_mode: bool,
    pub mock_secret: Option<Secret>,
    pub jwks_url: Option<String>,
    pub jwt: JwtConfig,
    pub sso: SsoConfig,
    /// Environment half of the two-gate unsigned decode path.
    pub insecure_decode: bool,
    pub jwks_max_age: Duration,
    pub jwks_cooldown: Duration,
}

impl Default for EnvironmentContext {
    fn default() -> Self {
        Self {
            deployment: DeploymentMode::default(),
            mock_mode: false,
            mock_secret: None,
            jwks_url: None,
            jwt: JwtConfig::default(),
            sso: SsoConfig::default(),
            insecure_decode: false,
            jwks_max_age: DEFAULT_JWKS_MAX_AGE,
            jwks_cooldown: DEFAULT_JWKS_COOLDOWN,
        }
    }
}

impl EnvironmentContext {
    pub fn from_env() -> AuthResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Resolve settings through an arbitrary variable source. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> AuthResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).and_then(|value| normalize_optional(&value));

        let deployment = match var("APP_ENV") {
            Some(value) => value
                .parse::<DeploymentMode>()
                .map_err(|err| AuthError::InvalidConfig("APP_ENV", err))?,
            None => DeploymentMode::default(),
        };

        let mock_mode = var("AUTH_MODE")
            .map(|value| value.eq_ignore_ascii_case("mock"))
            .unwrap_or(false);

        let jwks_url = var("JWT_JWKS_URL")
            .map(|value| {
                Url::parse(&value)
                    .map(|_| value)
                    .map_err(|err| AuthError::InvalidConfig("JWT_JWKS_URL", err.to_string()))
            })
            .transpose()?;

        let mut jwt = JwtConfig {
            issuer: var("JWT_ISSUER"),
            audience: var("JWT_AUDIENCE"),
            ..JwtConfig::default()
        };
        if let Some(leeway) = var("JWT_LEEWAY_SECONDS")
            .map(|value| parse_number::<u32>("JWT_LEEWAY_SECONDS", &value))
            .transpose()?
        {
            jwt = jwt.with_leeway(leeway);
        }

        let sso = SsoConfig {
            secret: var("SSO_JWT_SECRET").map(Secret::new),
            issuer: var("SSO_JWT_ISSUER").unwrap_or_else(|| DEFAULT_SSO_ISSUER.to_string()),
            audience: var("SSO_JWT_AUDIENCE").unwrap_or_else(|| DEFAULT_SSO_AUDIENCE.to_string()),
        };

        let jwks_max_age = var("JWKS_REFRESH_SECONDS")
            .map(|value| parse_number::<u64>("JWKS_REFRESH_SECONDS", &value))
            .transpose()?
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_JWKS_MAX_AGE)
            .max(MIN_JWKS_REFRESH);
        let jwks_cooldown = var("JWKS_COOLDOWN_SECONDS")
            .map(|value| parse_number::<u64>("JWKS_COOLDOWN_SECONDS", &value))
            .transpose()?
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_JWKS_COOLDOWN);

        Ok(Self {
            deployment,
            mock_mode,
            mock_secret: var("AUTH_MOCK_SECRET").map(Secret::new),
            jwks_url,
            jwt,
            sso,
            insecure_decode: var("AUTH_ALLOW_INSECURE_DECODE")
                .map(|value| parse_bool(&value))
                .unwrap_or(false),
            jwks_max_age,
            jwks_cooldown,
        })
    }
}

fn parse_number<T>(key: &'static str, value: &str) -> AuthResult<T>
where
    T: std::str::FromStr,
    T::Err: fmt::Display,
{
    value
        .parse::<T>()
        .map_err(|err| AuthError::InvalidConfig(key, format!("'{value}': {err}")))
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn normalize_optional(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn context_from(pairs: &[(&str, &str)]) -> AuthResult<EnvironmentContext> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        EnvironmentContext::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn empty_environment_uses_defaults() {
        let ctx = context_from(&[]).expect("defaults");
        assert_eq!(ctx.deployment, DeploymentMode::Development);
        assert!(!ctx.mock_mode);
        assert!(ctx.jwks_url.is_none());
        assert!(ctx.jwt.issuer.is_none());
        assert_eq!(ctx.jwt.leeway_seconds, DEFAULT_LEEWAY_SECONDS);
        assert_eq!(ctx.sso.issuer, DEFAULT_SSO_ISSUER);
        assert_eq!(ctx.sso.audience, DEFAULT_SSO_AUDIENCE);
        assert!(!ctx.insecure_decode);
    }

    #[test]
    fn reads_full_configuration() {
        let ctx = context_from(&[
            ("APP_ENV", "test"),
            ("AUTH_MODE", "MOCK"),
            ("AUTH_MOCK_SECRET", "s1"),
            ("JWT_JWKS_URL", "https://id.example.com/.well-known/jwks.json"),
            ("JWT_ISSUER", "https://id.example.com/"),
            ("JWT_AUDIENCE", "api"),
            ("JWT_LEEWAY_SECONDS", "5"),
            ("SSO_JWT_SECRET", "bridge"),
            ("SSO_JWT_ISSUER", "portal"),
            ("AUTH_ALLOW_INSECURE_DECODE", "yes"),
            ("JWKS_REFRESH_SECONDS", "600"),
            ("JWKS_COOLDOWN_SECONDS", "10"),
        ])
        .expect("config");

        assert_eq!(ctx.deployment, DeploymentMode::Test);
        assert!(ctx.mock_mode);
        assert_eq!(ctx.mock_secret, Some(Secret::new("s1")));
        assert_eq!(ctx.jwt.issuer.as_deref(), Some("https://id.example.com/"));
        assert_eq!(ctx.jwt.audience.as_deref(), Some("api"));
        assert_eq!(ctx.jwt.leeway_seconds, 5);
        assert_eq!(ctx.sso.secret, Some(Secret::new("bridge")));
        assert_eq!(ctx.sso.issuer, "portal");
        assert_eq!(ctx.sso.audience, DEFAULT_SSO_AUDIENCE);
        assert!(ctx.insecure_decode);
        assert_eq!(ctx.jwks_max_age, Duration::from_secs(600));
        assert_eq!(ctx.jwks_cooldown, Duration::from_secs(10));
    }

    #[test]
    fn blank_values_count_as_unset() {
        let ctx = context_from(&[("AUTH_MOCK_SECRET", "   "), ("SSO_JWT_SECRET", "")])
            .expect("config");
        assert!(ctx.mock_secret.is_none());
        assert!(ctx.sso.secret.is_none());
    }

    #[test]
    fn rejects_unparseable_jwks_url() {
        let err = context_from(&[("JWT_JWKS_URL", "not a url")]).expect_err("invalid url");
        assert!(matches!(err, AuthError::InvalidConfig("JWT_JWKS_URL", _)));
        assert!(err.is_configuration());
    }

    #[test]
    fn rejects_unknown_deployment_mode() {
        let err = context_from(&[("APP_ENV", "staging")]).expect_err("unknown mode");
        assert!(matches!(err, AuthError::InvalidConfig("APP_ENV", _)));
    }

    #[test]
    fn rejects_unparseable_durations() {
        for key in ["JWT_LEEWAY_SECONDS", "JWKS_REFRESH_SECONDS", "JWKS_COOLDOWN_SECONDS"] {
            let err = context_from(&[(key, "soon")]).expect_err("non-numeric value");
            assert!(
                matches!(err, AuthError::InvalidConfig(name, _) if name == key),
                "{key} should be rejected"
            );
        }
        let err = context_from(&[("JWT_LEEWAY_SECONDS", "-5")]).expect_err("negative leeway");
        assert!(err.is_configuration());
    }

    #[test]
    fn refresh_interval_has_a_floor() {
        let ctx = context_from(&[("JWKS_REFRESH_SECONDS", "5")]).expect("config");
        assert_eq!(ctx.jwks_max_age, MIN_JWKS_REFRESH);
    }

    #[test]
    fn secrets_are_redacted_in_debug_output() {
        let ctx = context_from(&[("AUTH_MOCK_SECRET", "hunter2")]).expect("config");
        let rendered = format!("{ctx:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("Secret(***)"));
    }

    #[test]
    fn parse_bool_accepts_common_truthy_values() {
        for value in ["1", "true", "TRUE", "yes", "on"] {
            assert!(parse_bool(value), "{value} should be truthy");
        }
        for value in ["0", "false", "no", "off", "maybe"] {
            assert!(!parse_bool(value), "{value} should be falsy");
        }
    }
}
