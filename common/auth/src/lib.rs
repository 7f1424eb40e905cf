pub mod chain;
pub mod claims;
pub mod config;
pub mod environment;
pub mod error;
pub mod extractors;
pub mod jwks;
pub mod keyset;
pub mod options;
pub mod strategy;
pub mod verifier;

pub use chain::{ChainReport, StrategyTrace, TraceStatus, VerificationChain};
pub use claims::Claims;
pub use config::{EnvironmentContext, JwtConfig, Secret, SsoConfig};
pub use environment::{is_mock_auth_mode, is_production, DeploymentMode};
pub use error::{AuthError, AuthResult};
pub use extractors::{extract_token, AuthContext, HandshakeRequest, MaybeAuthContext, TokenCarrier};
pub use jwks::JwksFetcher;
pub use keyset::{spawn_jwks_refresh, InMemoryKeyStore, KeyEntry, RemoteKeySet};
pub use options::{VerificationOptions, VerificationPolicy};
pub use strategy::{StrategyOutcome, VerificationStrategy};
pub use verifier::{TokenVerifier, TokenVerifierBuilder};
