use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use jsonwebtoken::errors::ErrorKind;
use serde::Serialize;
use thiserror::Error;

pub type AuthResult<T> = Result<T, AuthError>;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("mock secret required when mock mode is enabled")]
    MissingMockSecret,
    #[error("key-set location required in production")]
    MissingKeySetLocation,
    #[error("invalid configuration for '{0}': {1}")]
    InvalidConfig(&'static str, String),
    #[error("authorization header missing")]
    MissingAuthorization,
    #[error("request is not authenticated")]
    NotAuthenticated,
    #[error("token missing kid header")]
    MissingKeyId,
    #[error("no decoding key registered for kid '{0}'")]
    UnknownKeyId(String),
    #[error("failed to decode token header: {0}")]
    InvalidHeader(String),
    #[error("token algorithm '{0}' is not allowed for this key")]
    AlgorithmNotAllowed(String),
    #[error("token signature is invalid")]
    InvalidSignature,
    #[error("token has expired")]
    Expired,
    #[error("token claim '{0}' does not match the expected value")]
    ClaimMismatch(&'static str),
    #[error("token verification failed: {0}")]
    Verification(String),
    #[error("invalid claim '{0}' with value '{1}'")]
    InvalidClaim(&'static str, String),
    #[error("malformed claim payload: {0}")]
    InvalidJson(String),
    #[error("failed to parse decoding key for kid '{0}': {1}")]
    KeyParse(String, String),
    #[error("failed to fetch JWKS: {0}")]
    JwksFetch(String),
    #[error("failed to parse JWKS response: {0}")]
    JwksDecode(String),
    #[error("JWKS entry missing key id (kid)")]
    JwksMissingKid,
    #[error("JWKS key '{0}' missing required key components")]
    JwksMissingComponents(String),
    #[error("JWKS key '{kid}' uses unsupported alg '{alg}'")]
    JwksUnsupportedAlg { kid: String, alg: String },
    #[error("JWKS response contained no usable keys")]
    JwksEmpty,
}

impl AuthError {
    /// Deployment problems rather than problems with the presented token.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            AuthError::MissingMockSecret
                | AuthError::MissingKeySetLocation
                | AuthError::InvalidConfig(_, _)
        )
    }

    /// Failures of the key material source; the token itself was never judged.
    pub fn is_key_material(&self) -> bool {
        matches!(
            self,
            AuthError::JwksFetch(_)
                | AuthError::JwksDecode(_)
                | AuthError::JwksMissingKid
                | AuthError::JwksMissingComponents(_)
                | AuthError::JwksUnsupportedAlg { .. }
                | AuthError::JwksEmpty
                | AuthError::KeyParse(_, _)
        )
    }

    pub fn status(&self) -> StatusCode {
        self.classify().0
    }

    fn classify(&self) -> (StatusCode, &'static str) {
        match self {
            AuthError::MissingMockSecret
            | AuthError::MissingKeySetLocation
            | AuthError::InvalidConfig(_, _) => (StatusCode::INTERNAL_SERVER_ERROR, "AUTH_CONFIG"),
            AuthError::MissingAuthorization | AuthError::NotAuthenticated => {
                (StatusCode::UNAUTHORIZED, "AUTH_HEADER")
            }
            AuthError::MissingKeyId | AuthError::UnknownKeyId(_) => {
                (StatusCode::UNAUTHORIZED, "AUTH_KEY")
            }
            AuthError::InvalidHeader(_)
            | AuthError::AlgorithmNotAllowed(_)
            | AuthError::InvalidSignature
            | AuthError::Expired
            | AuthError::ClaimMismatch(_)
            | AuthError::Verification(_) => (StatusCode::UNAUTHORIZED, "AUTH_TOKEN"),
            AuthError::InvalidClaim(_, _) | AuthError::InvalidJson(_) => {
                (StatusCode::BAD_REQUEST, "AUTH_CLAIMS")
            }
            AuthError::KeyParse(_, _)
            | AuthError::JwksFetch(_)
            | AuthError::JwksDecode(_)
            | AuthError::JwksMissingKid
            | AuthError::JwksMissingComponents(_)
            | AuthError::JwksUnsupportedAlg { .. }
            | AuthError::JwksEmpty => (StatusCode::INTERNAL_SERVER_ERROR, "AUTH_JWKS"),
        }
    }
}

impl From<jsonwebtoken::errors::Error> for AuthError {
    fn from(value: jsonwebtoken::errors::Error) -> Self {
        match value.kind() {
            ErrorKind::ExpiredSignature => Self::Expired,
            ErrorKind::InvalidSignature => Self::InvalidSignature,
            ErrorKind::InvalidIssuer => Self::ClaimMismatch("iss"),
            ErrorKind::InvalidAudience => Self::ClaimMismatch("aud"),
            ErrorKind::ImmatureSignature => Self::ClaimMismatch("nbf"),
            ErrorKind::MissingRequiredClaim(claim) => {
                Self::InvalidClaim("required", claim.clone())
            }
            ErrorKind::InvalidAlgorithm => Self::AlgorithmNotAllowed("header".to_string()),
            _ => Self::Verification(value.to_string()),
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, code) = self.classify();
        let body = ErrorBody {
            code,
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}
