use super::schema::Config;

macro_rules! define_credentials {
    ($( $name:literal, $env:literal => $($path:ident).+ );* $(;)?) => {
        /// All known credential slot names.
        pub const CREDENTIAL_NAMES: &[&str] = &[$($name),*];

        /// (slot name, env var name) pairs.
        pub const CREDENTIAL_ENV_VARS: &[(&str, &str)] = &[$(($name, $env)),*];

        /// Get the current value of a credential field by slot name.
        pub fn get_credential_value<'a>(config: &'a Config, name: &str) -> Option<&'a str> {
            match name {
                $($name => Some(config.$($path).+.as_str()),)*
                _ => None,
            }
        }

        /// Apply environment variable overrides.
        ///
        /// Any `SWITCHBOARD_*` env var that is set and non-empty will overwrite the
        /// corresponding config field, allowing secrets to be injected without
        /// touching the config file.
        pub fn apply_env_overrides(config: &mut Config) {
            $(
                if let Ok(val) = std::env::var($env) {
                    if !val.is_empty() {
                        config.$($path).+ = val;
                    }
                }
            )*
        }
    };
}

define_credentials! {
    "shared-secret",        "SWITCHBOARD_SHARED_SECRET"        => security.shared_secret;
    "webhook-token",        "SWITCHBOARD_WEBHOOK_TOKEN"        => security.webhook_token;
    "generation-api-key",   "SWITCHBOARD_GENERATION_API_KEY"   => generation.api_key;
    "delivery-token",       "SWITCHBOARD_DELIVERY_TOKEN"       => delivery.bearer_token;
}

/// Slot names whose value is currently empty. Used by `config check`.
pub fn missing_credentials(config: &Config) -> Vec<&'static str> {
    CREDENTIAL_NAMES
        .iter()
        .copied()
        .filter(|name| get_credential_value(config, name).is_some_and(str::is_empty))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_var_names_are_prefixed() {
        for (name, env) in CREDENTIAL_ENV_VARS {
            assert!(env.starts_with("SWITCHBOARD_"), "{name} -> {env}");
        }
        assert_eq!(CREDENTIAL_NAMES.len(), CREDENTIAL_ENV_VARS.len());
    }

    #[test]
    fn test_get_credential_value() {
        let mut config = Config::default();
        config.delivery.bearer_token = "tok".into();
        assert_eq!(get_credential_value(&config, "delivery-token"), Some("tok"));
        assert_eq!(get_credential_value(&config, "unknown"), None);
    }

    #[test]
    fn test_missing_credentials_lists_empty_slots() {
        let mut config = Config::default();
        config.security.shared_secret = "s".into();
        let missing = missing_credentials(&config);
        assert!(!missing.contains(&"shared-secret"));
        assert!(missing.contains(&"generation-api-key"));
        assert!(missing.contains(&"delivery-token"));
    }
}
