use std::fmt;
use std::str::FromStr;

use crate::config::EnvironmentContext;

/// Deployment classification read from `APP_ENV`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeploymentMode {
    Test,
    #[default]
    Development,
    Production,
}

impl DeploymentMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentMode::Test => "test",
            DeploymentMode::Development => "development",
            DeploymentMode::Production => "production",
        }
    }
}

impl FromStr for DeploymentMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "test" => Ok(DeploymentMode::Test),
            "development" | "dev" => Ok(DeploymentMode::Development),
            "production" | "prod" => Ok(DeploymentMode::Production),
            other => Err(format!("unknown deployment mode '{other}'")),
        }
    }
}

impl fmt::Display for DeploymentMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mock verification requires both the explicit flag and a test deployment.
pub fn is_mock_auth_mode(ctx: &EnvironmentContext) -> bool {
    ctx.mock_mode && ctx.deployment == DeploymentMode::Test
}

pub fn is_production(ctx: &EnvironmentContext) -> bool {
    ctx.deployment == DeploymentMode::Production
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_aliases_case_insensitively() {
        assert_eq!("PROD".parse::<DeploymentMode>(), Ok(DeploymentMode::Production));
        assert_eq!(" dev ".parse::<DeploymentMode>(), Ok(DeploymentMode::Development));
        assert_eq!("test".parse::<DeploymentMode>(), Ok(DeploymentMode::Test));
        assert!("staging".parse::<DeploymentMode>().is_err());
    }

    #[test]
    fn default_is_non_production() {
        let ctx = EnvironmentContext::default();
        assert_eq!(ctx.deployment, DeploymentMode::Development);
        assert!(!is_production(&ctx));
    }

    #[test]
    fn mock_mode_needs_flag_and_test_deployment() {
        let mut ctx = EnvironmentContext {
            mock_mode: true,
            ..EnvironmentContext::default()
        };
        assert!(!is_mock_auth_mode(&ctx), "flag alone is not enough");

        ctx.deployment = DeploymentMode::Test;
        assert!(is_mock_auth_mode(&ctx));

        ctx.mock_mode = false;
        assert!(!is_mock_auth_mode(&ctx), "test deployment alone is not enough");

        ctx.mock_mode = true;
        ctx.deployment = DeploymentMode::Production;
        assert!(!is_mock_auth_mode(&ctx));
        assert!(is_production(&ctx));
    }
}
