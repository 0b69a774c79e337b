//! Configuration value resolution with fallback logic

use tracing::info;

/// Resolve a string with priority: CLI > config file > ENV > default
///
/// Empty strings count as unset.
pub fn get_string_config(
    cli_value: Option<String>,
    config_value: Option<String>,
    env_var: &str,
    default: &str,
) -> String {
    if let Some(val) = cli_value.filter(|v| !v.is_empty()) {
        info!("Using {} from command line", env_var);
        return val;
    }

    if let Some(val) = config_value.filter(|v| !v.is_empty()) {
        info!("Using {} from configuration file", env_var);
        return val;
    }

    if let Ok(env_val) = std::env::var(env_var) {
        if !env_val.is_empty() {
            info!("Using {} from environment", env_var);
            return env_val;
        }
    }

    info!("Using default value for {}", env_var);
    default.to_string()
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_get_string_config_env_fallback() {
        std::env::set_var("TEST_CL_BIND_B", "127.0.0.1:7000");
        let val = get_string_config(None, Some(String::new()), "TEST_CL_BIND_B", "0.0.0.0:5001");
        assert_eq!(val, "127.0.0.1:7000");
        std::env::remove_var("TEST_CL_BIND_B");

        let val = get_string_config(None, None, "TEST_CL_BIND_B", "0.0.0.0:5001");
        assert_eq!(val, "0.0.0.0:5001");
    }
}
