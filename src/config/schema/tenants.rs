use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::default_true;

/// One tenant, keyed by id in `Config::tenants`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantConfig {
    /// Domain matched against `X-Tenant-Domain` or `Host`.
    pub domain: String,
    /// Human-readable name used in metric labels and templates. Defaults to the id.
    #[serde(default)]
    pub label: Option<String>,
    /// Disabled tenants are treated as unknown (404).
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// When false, replies use the `ai_disabled` template and generation is skipped.
    #[serde(default = "default_true", rename = "aiEnabled")]
    pub ai_enabled: bool,
    #[serde(default, rename = "rateLimitPerAddress")]
    pub rate_limit_per_address: Option<u32>,
    #[serde(default, rename = "rateLimitPerSender")]
    pub rate_limit_per_sender: Option<u32>,
    #[serde(default, rename = "systemPrompt")]
    pub system_prompt: Option<String>,
    /// Per-tenant template overrides, layered over the global ones.
    #[serde(default)]
    pub templates: HashMap<String, String>,
}
