use std::sync::Arc;

use crate::chain::{ChainReport, VerificationChain};
use crate::claims::Claims;
use crate::config::EnvironmentContext;
use crate::error::AuthResult;
use crate::extractors::{extract_token, TokenCarrier};
use crate::jwks::JwksFetcher;
use crate::keyset::RemoteKeySet;
use crate::options::VerificationOptions;

/// Verifies presented tokens against the strategy chain built from one `EnvironmentContext`.
pub struct TokenVerifier {
    context: Arc<EnvironmentContext>,
    keys: Option<Arc<RemoteKeySet>>,
    chain: VerificationChain,
    default_options: VerificationOptions,
}

impl TokenVerifier {
    pub fn new(context: EnvironmentContext) -> Self {
        Self::builder(context).build()
    }

    pub fn from_env() -> AuthResult<Self> {
        Ok(Self::new(EnvironmentContext::from_env()?))
    }

    pub fn builder(context: EnvironmentContext) -> TokenVerifierBuilder {
        TokenVerifierBuilder::new(context)
    }

    pub fn context(&self) -> &EnvironmentContext {
        &self.context
    }

    pub fn key_set(&self) -> Option<&Arc<RemoteKeySet>> {
        self.keys.as_ref()
    }

    /// Options applied by the axum extractors.
    pub fn default_options(&self) -> VerificationOptions {
        self.default_options
    }

    /// `Ok(None)` means "not authenticated": no token, or no method applies.
    pub async fn verify_token(
        &self,
        token: Option<&str>,
        options: &VerificationOptions,
    ) -> AuthResult<Option<Claims>> {
        self.verify_token_with_report(token, options)
            .await
            .into_result()
    }

    /// Same as [`verify_token`](Self::verify_token) but keeps the per-strategy trace.
    pub async fn verify_token_with_report(
        &self,
        token: Option<&str>,
        options: &VerificationOptions,
    ) -> ChainReport {
        match token.filter(|token| !token.is_empty()) {
            Some(token) => self.chain.run(token, options).await,
            None => ChainReport::unauthenticated(),
        }
    }

    pub async fn verify_request_token<R>(
        &self,
        request: &R,
        options: &VerificationOptions,
    ) -> AuthResult<Option<Claims>>
    where
        R: TokenCarrier + ?Sized,
    {
        let Some(token) = extract_token(request, options) else {
            return Ok(None);
        };
        self.verify_token(Some(&token), options).await
    }
}

pub struct TokenVerifierBuilder {
    context: EnvironmentContext,
    fetcher: Option<JwksFetcher>,
    default_options: VerificationOptions,
}

impl TokenVerifierBuilder {
    fn new(context: EnvironmentContext) -> Self {
        Self {
            context,
            fetcher: None,
            default_options: VerificationOptions::default(),
        }
    }

    /// Use a specific fetcher (custom client or URL) instead of `jwks_url` from the context.
    pub fn with_jwks_fetcher(mut self, fetcher: JwksFetcher) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn with_default_options(mut self, options: VerificationOptions) -> Self {
        self.default_options = options;
        self
    }

    /// Builds the verifier without touching the network; keys load on first use.
    pub fn build(self) -> TokenVerifier {
        let keys = match self.fetcher {
            Some(fetcher) => Some(Arc::new(RemoteKeySet::new(
                fetcher,
                self.context.jwks_max_age,
                self.context.jwks_cooldown,
            ))),
            None => RemoteKeySet::from_context(&self.context),
        };
        let chain = VerificationChain::standard(&self.context, keys.clone());

        TokenVerifier {
            context: Arc::new(self.context),
            keys,
            chain,
            default_options: self.default_options,
        }
    }
}
