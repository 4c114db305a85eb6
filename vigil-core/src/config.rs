//! Environment-variable helpers used by every service `config.rs`.

use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Read a variable or fall back to a default.
pub fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Read and parse a variable; unset or unparseable values yield the default.
pub fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

/// Boolean flags accept `1/true/yes/on` (case-insensitive).
pub fn env_flag(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(v) => matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

/// Millisecond duration from an integer variable.
pub fn env_duration_ms(key: &str, default_ms: u64) -> Duration {
    Duration::from_millis(env_parse(key, default_ms))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_defaults() {
        assert_eq!(env_or("VIGIL_TEST_UNSET_VAR", "fallback"), "fallback");
        assert_eq!(env_parse::<u16>("VIGIL_TEST_UNSET_VAR", 514), 514);
        assert!(!env_flag("VIGIL_TEST_UNSET_VAR", false));
        assert_eq!(env_duration_ms("VIGIL_TEST_UNSET_VAR", 250), Duration::from_millis(250));
    }

    #[test]
    fn test_env_parse_and_flags() {
        env::set_var("VIGIL_TEST_PORT", "8443");
        env::set_var("VIGIL_TEST_PROMISC", "yes");
        env::set_var("VIGIL_TEST_BAD", "not-a-number");
        assert_eq!(env_parse::<u16>("VIGIL_TEST_PORT", 80), 8443);
        assert!(env_flag("VIGIL_TEST_PROMISC", false));
        assert_eq!(env_parse::<u16>("VIGIL_TEST_BAD", 80), 80);
        env::remove_var("VIGIL_TEST_PORT");
        env::remove_var("VIGIL_TEST_PROMISC");
        env::remove_var("VIGIL_TEST_BAD");
    }
}
