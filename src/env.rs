//! Environment variable names for configuring a project from a service's
//! environment.
//!
//! These are purely helpers; the producer itself never reads the
//! environment.

use crate::config::ProjectConfig;

/// Project name.
pub const LOG_PRODUCER_PROJECT_ENV: &str = "LOG_PRODUCER_PROJECT";

/// Service endpoint, e.g. `cn-hangzhou.log.aliyuncs.com`.
pub const LOG_PRODUCER_ENDPOINT_ENV: &str = "LOG_PRODUCER_ENDPOINT";

pub const LOG_PRODUCER_ACCESS_KEY_ID_ENV: &str = "LOG_PRODUCER_ACCESS_KEY_ID";

pub const LOG_PRODUCER_ACCESS_KEY_SECRET_ENV: &str = "LOG_PRODUCER_ACCESS_KEY_SECRET";

/// Optional STS security token.
pub const LOG_PRODUCER_SECURITY_TOKEN_ENV: &str = "LOG_PRODUCER_SECURITY_TOKEN";

/// Read an environment variable or fall back to a provided default.
pub fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Build a [`ProjectConfig`] from the `LOG_PRODUCER_*` variables.
///
/// Returns `None` unless project, endpoint and both access key parts are set
/// and non-empty.
pub fn project_config_from_env() -> Option<ProjectConfig> {
    let required = |key: &str| std::env::var(key).ok().filter(|v| !v.is_empty());
    let config = ProjectConfig::new(
        required(LOG_PRODUCER_PROJECT_ENV)?,
        required(LOG_PRODUCER_ENDPOINT_ENV)?,
        required(LOG_PRODUCER_ACCESS_KEY_ID_ENV)?,
        required(LOG_PRODUCER_ACCESS_KEY_SECRET_ENV)?,
    );
    Some(match required(LOG_PRODUCER_SECURITY_TOKEN_ENV) {
        Some(token) => config.with_security_token(token),
        None => config,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_or_falls_back() {
        assert_eq!(env_or("LOG_PRODUCER_SURELY_UNSET_VARIABLE", "dflt"), "dflt");
    }
}
