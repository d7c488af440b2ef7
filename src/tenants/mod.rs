//! Tenant resolution by request domain.

use crate::config::Config;
use crate::ratelimit::Quotas;
use crate::templates::TemplateSet;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Lowercase host with scheme, path, query, port and trailing dot removed.
///
/// `https://Shop.Example.com:8443/webhook` becomes `shop.example.com`.
pub fn normalize_domain(raw: &str) -> String {
    let trimmed = raw.trim();
    let without_scheme = trimmed
        .split_once("://")
        .map_or(trimmed, |(_, rest)| rest);
    let host = without_scheme
        .split(['/', '?', '#'])
        .next()
        .unwrap_or_default();
    let host = host.rsplit_once('@').map_or(host, |(_, h)| h);
    let host = match host.rsplit_once(':') {
        Some((name, port)) if port.chars().all(|c| c.is_ascii_digit()) => name,
        _ => host,
    };
    host.trim_matches('.').to_ascii_lowercase()
}

/// Resolved, immutable view of one enabled tenant.
#[derive(Debug, Clone)]
pub struct TenantContext {
    pub id: String,
    pub label: String,
    pub domain: String,
    pub ai_enabled: bool,
    pub system_prompt: String,
    pub quotas: Quotas,
    pub templates: Arc<TemplateSet>,
}

pub struct TenantRegistry {
    by_id: HashMap<String, Arc<TenantContext>>,
    by_domain: HashMap<String, String>,
    default_tenant: Option<String>,
}

impl TenantRegistry {
    pub fn from_config(config: &Config) -> Self {
        let mut by_id = HashMap::new();
        let mut by_domain = HashMap::new();

        for (id, tenant) in &config.tenants {
            if !tenant.enabled {
                debug!("tenant {id} is disabled, skipping");
                continue;
            }
            let domain = normalize_domain(&tenant.domain);
            let context = TenantContext {
                id: id.clone(),
                label: tenant.label.clone().unwrap_or_else(|| id.clone()),
                domain: domain.clone(),
                ai_enabled: tenant.ai_enabled,
                system_prompt: tenant
                    .system_prompt
                    .clone()
                    .unwrap_or_else(|| config.generation.system_prompt.clone()),
                quotas: Quotas {
                    per_address: tenant
                        .rate_limit_per_address
                        .unwrap_or(config.rate_limit.per_address),
                    per_sender: tenant
                        .rate_limit_per_sender
                        .unwrap_or(config.rate_limit.per_sender),
                },
                templates: Arc::new(TemplateSet::new(
                    config.templates.clone(),
                    tenant.templates.clone(),
                )),
            };
            by_domain.insert(domain, id.clone());
            by_id.insert(id.clone(), Arc::new(context));
        }

        let default_tenant = config
            .gateway
            .default_tenant
            .clone()
            .filter(|id| by_id.contains_key(id));

        Self {
            by_id,
            by_domain,
            default_tenant,
        }
    }

    /// Match `domain` (header value, unnormalized) against configured tenants,
    /// falling back to `gateway.defaultTenant`.
    pub fn resolve(&self, domain: Option<&str>) -> Option<Arc<TenantContext>> {
        domain
            .map(normalize_domain)
            .and_then(|d| self.by_domain.get(&d))
            .or(self.default_tenant.as_ref())
            .and_then(|id| self.by_id.get(id))
            .cloned()
    }

    pub fn get(&self, id: &str) -> Option<Arc<TenantContext>> {
        self.by_id.get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TenantConfig;

    fn tenant(domain: &str) -> TenantConfig {
        serde_json::from_value(serde_json::json!({ "domain": domain })).unwrap()
    }

    fn config() -> Config {
        let mut config = Config::default();
        config
            .tenants
            .insert("acme".into(), tenant("https://Acme.example.com/"));
        let mut globex = tenant("globex.example.com");
        globex.ai_enabled = false;
        globex.rate_limit_per_sender = Some(3);
        globex.system_prompt = Some("You are Globex support.".into());
        config.tenants.insert("globex".into(), globex);
        let mut off = tenant("off.example.com");
        off.enabled = false;
        config.tenants.insert("off".into(), off);
        config
    }

    #[test]
    fn test_normalize_domain() {
        assert_eq!(normalize_domain("Example.COM"), "example.com");
        assert_eq!(
            normalize_domain("https://shop.example.com:8443/webhook?x=1"),
            "shop.example.com"
        );
        assert_eq!(normalize_domain(" example.com. "), "example.com");
        assert_eq!(normalize_domain("localhost:8080"), "localhost");
        assert_eq!(normalize_domain(""), "");
    }

    #[test]
    fn test_resolve_by_domain_and_host_with_port() {
        let registry = TenantRegistry::from_config(&config());
        assert_eq!(
            registry.resolve(Some("acme.example.com")).unwrap().id,
            "acme"
        );
        assert_eq!(
            registry.resolve(Some("ACME.example.com:443")).unwrap().id,
            "acme"
        );
        assert!(registry.resolve(Some("unknown.example.com")).is_none());
        assert!(registry.resolve(None).is_none());
    }

    #[test]
    fn test_disabled_tenant_is_unknown() {
        let registry = TenantRegistry::from_config(&config());
        assert!(registry.resolve(Some("off.example.com")).is_none());
        assert!(registry.get("off").is_none());
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_default_tenant_fallback() {
        let mut config = config();
        config.gateway.default_tenant = Some("acme".into());
        let registry = TenantRegistry::from_config(&config);
        assert_eq!(registry.resolve(None).unwrap().id, "acme");
        assert_eq!(
            registry.resolve(Some("unknown.example.com")).unwrap().id,
            "acme"
        );
    }

    #[test]
    fn test_overrides_applied() {
        let config = config();
        let registry = TenantRegistry::from_config(&config);
        let acme = registry.get("acme").unwrap();
        assert!(acme.ai_enabled);
        assert_eq!(acme.label, "acme");
        assert_eq!(acme.quotas.per_sender, config.rate_limit.per_sender);
        assert_eq!(acme.system_prompt, config.generation.system_prompt);

        let globex = registry.get("globex").unwrap();
        assert!(!globex.ai_enabled);
        assert_eq!(globex.quotas.per_sender, 3);
        assert_eq!(globex.quotas.per_address, config.rate_limit.per_address);
        assert_eq!(globex.system_prompt, "You are Globex support.");
    }
}
