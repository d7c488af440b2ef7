//! Reply templates with `{{var}}` substitution.

use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

pub const DEFAULT: &str = "default";
pub const FALLBACK: &str = "fallback";
pub const TECHNICAL_ISSUE: &str = "technical_issue";
pub const AI_DISABLED: &str = "ai_disabled";
pub const SAFETY_BLOCK: &str = "safety_block";

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*([^{}]+?)\s*\}\}").expect("failed to compile template placeholder regex")
});

fn builtin(name: &str) -> Option<&'static str> {
    match name {
        DEFAULT => Some("{{resposta}}"),
        FALLBACK => Some(
            "Thanks for your message! We could not prepare an answer right now, \
             a member of our team will get back to you shortly.",
        ),
        TECHNICAL_ISSUE => Some(
            "We are experiencing a technical issue. Your message was received \
             and we will reply as soon as possible.",
        ),
        AI_DISABLED => Some(
            "Thanks for reaching out! Automatic replies are turned off, \
             an agent will answer you soon.",
        ),
        SAFETY_BLOCK => Some("Sorry, I can't help with that request."),
        _ => None,
    }
}

/// Variables available to a template.
#[derive(Debug, Default, Clone)]
pub struct TemplateVars<'a> {
    /// Inbound text from the sender (`mensagem_usuario`).
    pub user_message: &'a str,
    /// Generated answer (`resposta`).
    pub reply: &'a str,
    pub tenant: &'a str,
}

impl TemplateVars<'_> {
    fn lookup(&self, name: &str) -> &str {
        match name {
            "mensagem_usuario" => self.user_message,
            "resposta" => self.reply,
            "tenant" => self.tenant,
            _ => "",
        }
    }
}

/// Layered template lookup: tenant overrides, then global overrides, then
/// built-in defaults.
#[derive(Debug, Clone, Default)]
pub struct TemplateSet {
    global: HashMap<String, String>,
    tenant: HashMap<String, String>,
}

impl TemplateSet {
    pub fn new(global: HashMap<String, String>, tenant: HashMap<String, String>) -> Self {
        Self { global, tenant }
    }

    pub fn get(&self, name: &str) -> &str {
        self.tenant
            .get(name)
            .or_else(|| self.global.get(name))
            .map(String::as_str)
            .or_else(|| builtin(name))
            .unwrap_or("")
    }

    pub fn render(&self, name: &str, vars: &TemplateVars<'_>) -> String {
        render_str(self.get(name), vars)
    }
}

/// Substitute `{{name}}` placeholders. Unknown variables render empty.
pub fn render_str(template: &str, vars: &TemplateVars<'_>) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &regex::Captures<'_>| {
            vars.lookup(caps[1].trim()).to_string()
        })
        .trim()
        .to_string()
}
