/// Which optional verification paths a caller opts into for a single call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VerificationPolicy {
    /// Only mock (test) or key-set verification.
    #[default]
    Strict,
    /// Try the SSO shared secret before the key set.
    AllowSsoFallback,
    /// Permit unsigned decoding outside production when the environment also allows it.
    AllowInsecureDev,
}

/// Per-call options. Chosen explicitly by the caller, never inferred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VerificationOptions {
    pub policy: VerificationPolicy,
    /// Accept a `token` query parameter when the transport cannot send headers.
    pub allow_query_token: bool,
}

impl VerificationOptions {
    pub fn strict() -> Self {
        Self::default()
    }

    pub fn sso_fallback() -> Self {
        Self {
            policy: VerificationPolicy::AllowSsoFallback,
            ..Self::default()
        }
    }

    pub fn insecure_dev() -> Self {
        Self {
            policy: VerificationPolicy::AllowInsecureDev,
            ..Self::default()
        }
    }

    pub fn with_query_token(mut self) -> Self {
        self.allow_query_token = true;
        self
    }

    pub fn allows_sso_fallback(&self) -> bool {
        self.policy == VerificationPolicy::AllowSsoFallback
    }

    pub fn allows_insecure_dev(&self) -> bool {
        self.policy == VerificationPolicy::AllowInsecureDev
    }
}
