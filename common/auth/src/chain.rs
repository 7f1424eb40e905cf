use std::sync::Arc;

use tracing::debug;

use crate::claims::Claims;
use crate::config::EnvironmentContext;
use crate::error::{AuthError, AuthResult};
use crate::keyset::RemoteKeySet;
use crate::options::VerificationOptions;
use crate::strategy::{
    KeySetStrategy, MockStrategy, NoKeySetStrategy, SsoFallbackStrategy, StrategyOutcome,
    VerificationStrategy,
};

/// What happened to one strategy during a chain run.
#[derive(Debug)]
pub enum TraceStatus {
    Skipped,
    /// Attempted, failed, and the failure was absorbed.
    Discarded(AuthError),
    Succeeded,
    Failed,
}

#[derive(Debug)]
pub struct StrategyTrace {
    pub strategy: &'static str,
    pub status: TraceStatus,
}

/// Result of a chain run plus a per-strategy record of how it got there.
#[derive(Debug)]
pub struct ChainReport {
    pub result: AuthResult<Option<Claims>>,
    pub trace: Vec<StrategyTrace>,
}

impl ChainReport {
    pub(crate) fn unauthenticated() -> Self {
        Self {
            result: Ok(None),
            trace: Vec::new(),
        }
    }

    pub fn into_result(self) -> AuthResult<Option<Claims>> {
        self.result
    }

    /// Errors that strategies swallowed before the chain settled.
    pub fn discarded(&self) -> impl Iterator<Item = (&'static str, &AuthError)> {
        self.trace.iter().filter_map(|entry| match &entry.status {
            TraceStatus::Discarded(err) => Some((entry.strategy, err)),
            _ => None,
        })
    }

    /// True when the strategy did real work (anything but a plain skip).
    pub fn attempted(&self, strategy: &str) -> bool {
        self.trace
            .iter()
            .any(|entry| entry.strategy == strategy && !matches!(entry.status, TraceStatus::Skipped))
    }
}

/// Ordered strategies evaluated until one succeeds or fails outright.
pub struct VerificationChain {
    strategies: Vec<Box<dyn VerificationStrategy>>,
}

impl VerificationChain {
    pub fn new(strategies: Vec<Box<dyn VerificationStrategy>>) -> Self {
        Self { strategies }
    }

    /// mock → SSO fallback → key set → no key set.
    pub fn standard(ctx: &EnvironmentContext, keys: Option<Arc<RemoteKeySet>>) -> Self {
        let key_set_configured = keys.is_some();
        Self::new(vec![
            Box::new(MockStrategy::new(ctx)),
            Box::new(SsoFallbackStrategy::new(ctx)),
            Box::new(KeySetStrategy::new(keys, ctx.jwt.clone())),
            Box::new(NoKeySetStrategy::new(ctx, key_set_configured)),
        ])
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|strategy| strategy.name()).collect()
    }

    pub async fn run(&self, token: &str, options: &VerificationOptions) -> ChainReport {
        let mut trace = Vec::with_capacity(self.strategies.len());

        for strategy in &self.strategies {
            let name = strategy.name();
            match strategy.attempt(token, options).await {
                StrategyOutcome::Success(claims) => {
                    debug!(strategy = name, "token verified");
                    trace.push(StrategyTrace {
                        strategy: name,
                        status: TraceStatus::Succeeded,
                    });
                    return ChainReport {
                        result: Ok(Some(claims)),
                        trace,
                    };
                }
                StrategyOutcome::Fail(err) => {
                    debug!(strategy = name, error = %err, "token verification failed");
                    trace.push(StrategyTrace {
                        strategy: name,
                        status: TraceStatus::Failed,
                    });
                    return ChainReport {
                        result: Err(err),
                        trace,
                    };
                }
                StrategyOutcome::Skip { discarded } => {
                    let status = match discarded {
                        Some(err) => {
                            debug!(strategy = name, error = %err, "strategy outcome discarded");
                            TraceStatus::Discarded(err)
                        }
                        None => TraceStatus::Skipped,
                    };
                    trace.push(StrategyTrace {
                        strategy: name,
                        status,
                    });
                }
            }
        }

        ChainReport {
            result: Ok(None),
            trace,
        }
    }
}
