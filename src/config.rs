use crate::utils::debug_log;

/// Runtime knobs for the engine, sourced from defaults, then environment
/// overrides, then (at the CLI layer) explicit flags — in that precedence order.
#[derive(Debug, Clone)]
pub struct Config {
    pub lock_timeout_secs: u64,
    pub patch_timeout_secs: u64,
    pub status_page_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            lock_timeout_secs: 10,
            patch_timeout_secs: 15,
            status_page_size: 50,
        }
    }
}

impl Config {
    /// Loads defaults, then applies any recognized environment overrides.
    pub fn load() -> Self {
        let mut config = Config::default();

        if let Some(v) = parse_env_var("MCPDIFF_LOCK_TIMEOUT") {
            config.lock_timeout_secs = v;
        }
        if let Some(v) = parse_env_var("MCPDIFF_PATCH_TIMEOUT") {
            config.patch_timeout_secs = v;
        }
        if let Some(v) = parse_env_var("MCPDIFF_STATUS_PAGE_SIZE") {
            config.status_page_size = v;
        }

        config
    }
}

fn parse_env_var<T: std::str::FromStr>(name: &str) -> Option<T> {
    match std::env::var(name) {
        Ok(raw) => match raw.parse::<T>() {
            Ok(v) => Some(v),
            Err(_) => {
                debug_log(&format!("ignoring unparsable {name}={raw}"));
                None
            }
        },
        Err(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let config = Config::default();
        assert_eq!(config.lock_timeout_secs, 10);
        assert_eq!(config.patch_timeout_secs, 15);
        assert_eq!(config.status_page_size, 50);
    }
}
