use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::{FromRef, FromRequestParts};
use http::header::{AUTHORIZATION, HOST};
use http::{request::Parts, HeaderMap, Request};
use url::Url;

use crate::claims::Claims;
use crate::error::AuthError;
use crate::options::VerificationOptions;
use crate::verifier::TokenVerifier;

const BEARER_PREFIX: &str = "Bearer ";
const QUERY_TOKEN_PARAM: &str = "token";

/// Anything request-shaped: headers (case-insensitive) and, optionally, the request target.
pub trait TokenCarrier {
    fn headers(&self) -> &HeaderMap;

    /// Absolute URL or origin-form path (`/socket?token=..`).
    fn url(&self) -> Option<String>;
}

impl<B> TokenCarrier for Request<B> {
    fn headers(&self) -> &HeaderMap {
        Request::headers(self)
    }

    fn url(&self) -> Option<String> {
        Some(self.uri().to_string())
    }
}

impl TokenCarrier for Parts {
    fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    fn url(&self) -> Option<String> {
        Some(self.uri.to_string())
    }
}

/// The opening request of a long-lived connection, captured outside an HTTP stack.
#[derive(Debug, Clone, Default)]
pub struct HandshakeRequest {
    pub headers: HeaderMap,
    pub url: Option<String>,
}

impl HandshakeRequest {
    pub fn new(headers: HeaderMap, url: Option<String>) -> Self {
        Self { headers, url }
    }
}

impl TokenCarrier for HandshakeRequest {
    fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    fn url(&self) -> Option<String> {
        self.url.clone()
    }
}

/// Pull the presented token out of a request. The header always wins over the query string.
pub fn extract_token<R>(request: &R, options: &VerificationOptions) -> Option<String>
where
    R: TokenCarrier + ?Sized,
{
    if let Some(token) = parse_bearer(request.headers()) {
        return Some(token);
    }
    if !options.allow_query_token {
        return None;
    }
    let url = request.url()?;
    token_from_url(&url, request.headers())
}

fn parse_bearer(headers: &HeaderMap) -> Option<String> {
    let raw = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let token = raw.strip_prefix(BEARER_PREFIX)?;
    if token.is_empty() {
        return None;
    }
    Some(token.to_owned())
}

fn token_from_url(raw: &str, headers: &HeaderMap) -> Option<String> {
    let url = match Url::parse(raw) {
        Ok(url) => url,
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            let host = headers
                .get(HOST)
                .and_then(|value| value.to_str().ok())
                .unwrap_or("localhost");
            Url::parse(&format!("http://{host}")).ok()?.join(raw).ok()?
        }
        Err(_) => return None,
    };

    url.query_pairs()
        .find(|(key, _)| key == QUERY_TOKEN_PARAM)
        .map(|(_, value)| value.into_owned())
        .filter(|value| !value.is_empty())
}

/// Verified claims for handlers that require an authenticated caller.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub claims: Claims,
    pub token: String,
}

impl AuthContext {
    pub fn subject(&self) -> Option<&str> {
        self.claims.subject()
    }

    pub fn into_claims(self) -> Claims {
        self.claims
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthContext
where
    Arc<TokenVerifier>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let verifier = Arc::<TokenVerifier>::from_ref(state);
        let options = verifier.default_options();

        let token = extract_token(&*parts, &options).ok_or(AuthError::MissingAuthorization)?;
        let claims = verifier
            .verify_token(Some(&token), &options)
            .await?
            .ok_or(AuthError::NotAuthenticated)?;

        Ok(Self { claims, token })
    }
}

/// For endpoints that allow anonymous access: `None` when nothing was presented
/// or no method applies, but verification failures still reject.
#[derive(Debug, Clone)]
pub struct MaybeAuthContext(pub Option<AuthContext>);

#[async_trait]
impl<S> FromRequestParts<S> for MaybeAuthContext
where
    Arc<TokenVerifier>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let verifier = Arc::<TokenVerifier>::from_ref(state);
        let options = verifier.default_options();

        let Some(token) = extract_token(&*parts, &options) else {
            return Ok(Self(None));
        };
        let claims = verifier.verify_token(Some(&token), &options).await?;

        Ok(Self(claims.map(|claims| AuthContext { claims, token })))
    }
}
