use super::*;

fn tenant(domain: &str) -> TenantConfig {
    serde_json::from_value(serde_json::json!({ "domain": domain })).unwrap()
}

#[test]
fn test_default_config_validates() {
    let config = Config::default();
    assert!(config.validate().is_ok());
}

#[test]
fn test_defaults_match_documented_values() {
    let config = Config::default();
    assert_eq!(config.security.timestamp_tolerance_secs, 300);
    assert_eq!(config.gateway.max_body_bytes, 1024 * 1024);
    assert_eq!(config.context.ttl_secs, 600);
    assert_eq!(config.context.max_messages, 5);
    assert_eq!(config.queue.max_attempts, 6);
    assert_eq!(config.queue.retry_schedule_secs, vec![5, 15, 45, 90]);
    assert_eq!(config.breaker.generation.failure_threshold, 5);
    assert_eq!(config.breaker.delivery.cooldown_secs, 300);
    assert!(config.breaker.delivery.per_tenant);
    assert_eq!(config.ingest.default_country_code, "55");
}

#[test]
fn test_invalid_zero_port() {
    let mut config = Config::default();
    config.gateway.port = 0;
    assert!(config.validate().is_err());
}

#[test]
fn test_invalid_zero_quota() {
    let mut config = Config::default();
    config.rate_limit.per_sender = 0;
    let err = config.validate().unwrap_err();
    assert!(matches!(err, SwitchboardError::Config(_)));
}

#[test]
fn test_invalid_empty_retry_schedule() {
    let mut config = Config::default();
    config.queue.retry_schedule_secs.clear();
    assert!(config.validate().is_err());
}

#[test]
fn test_invalid_zero_workers() {
    let mut config = Config::default();
    config.workers.primary = 0;
    assert!(config.validate().is_err());
}

#[test]
fn test_zero_reprocess_workers_allowed() {
    let mut config = Config::default();
    config.workers.reprocess = 0;
    assert!(config.validate().is_ok());
}

#[test]
fn test_invalid_zero_threshold_when_enabled() {
    let mut config = Config::default();
    config.breaker.generation.failure_threshold = 0;
    assert!(config.validate().is_err());

    config.breaker.generation.enabled = false;
    assert!(config.validate().is_ok());
}

#[test]
fn test_invalid_max_cooldown_below_cooldown() {
    let mut config = Config::default();
    config.breaker.delivery.cooldown_secs = 600;
    config.breaker.delivery.max_cooldown_secs = 60;
    assert!(config.validate().is_err());
}

#[test]
fn test_invalid_delivery_url_scheme() {
    let mut config = Config::default();
    config.delivery.api_url = "ftp://example.com".into();
    assert!(config.validate().is_err());
}

#[test]
fn test_duplicate_tenant_domain_rejected() {
    let mut config = Config::default();
    config
        .tenants
        .insert("acme".into(), tenant("https://Acme.example.com/"));
    config
        .tenants
        .insert("acme2".into(), tenant("acme.example.com"));
    let err = config.validate().unwrap_err();
    assert!(err.to_string().contains("more than one tenant"));
}

#[test]
fn test_tenant_id_with_colon_rejected() {
    let mut config = Config::default();
    config.tenants.insert("a:b".into(), tenant("a.example.com"));
    assert!(config.validate().is_err());
}

#[test]
fn test_unknown_default_tenant_rejected() {
    let mut config = Config::default();
    config.gateway.default_tenant = Some("ghost".into());
    assert!(config.validate().is_err());

    config.tenants.insert("ghost".into(), tenant("ghost.example.com"));
    assert!(config.validate().is_ok());
}

#[test]
fn test_camel_case_deserialization() {
    let config: Config = serde_json::from_value(serde_json::json!({
        "security": { "sharedSecret": "s3cret", "timestampToleranceSecs": 120 },
        "rateLimit": { "perAddress": 7 },
        "breaker": { "delivery": { "failureThreshold": 2, "perTenant": false } },
        "tenants": {
            "acme": { "domain": "acme.example.com", "aiEnabled": false, "rateLimitPerSender": 3 }
        }
    }))
    .unwrap();
    assert_eq!(config.security.shared_secret, "s3cret");
    assert_eq!(config.security.timestamp_tolerance_secs, 120);
    assert_eq!(config.rate_limit.per_address, 7);
    assert_eq!(config.rate_limit.per_sender, 20);
    assert_eq!(config.breaker.delivery.failure_threshold, 2);
    assert!(!config.breaker.delivery.per_tenant);
    assert!(config.breaker.generation.per_tenant);
    let acme = &config.tenants["acme"];
    assert!(!acme.ai_enabled);
    assert!(acme.enabled);
    assert_eq!(acme.rate_limit_per_sender, Some(3));
}

#[test]
fn test_debug_redacts_secrets() {
    let mut config = Config::default();
    config.security.shared_secret = "topsecret".into();
    config.generation.api_key = "AIza-key".into();
    config.delivery.bearer_token = "bearer-xyz".into();
    let debug = format!("{:?}", config);
    assert!(!debug.contains("topsecret"));
    assert!(!debug.contains("AIza-key"));
    assert!(!debug.contains("bearer-xyz"));
    assert!(debug.contains("[REDACTED]"));
    assert!(debug.contains("[empty]"));
}

#[test]
fn test_database_path_override() {
    let mut config = Config::default();
    config.storage.path = Some("/tmp/switchboard-test.db".into());
    assert_eq!(
        config.database_path().unwrap(),
        PathBuf::from("/tmp/switchboard-test.db")
    );
}
