use crate::errors::SwitchboardError;
use regex::Regex;
use tracing::warn;

/// Category of detected prompt injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectionCategory {
    InstructionOverride,
    RoleSwitch,
    PromptExtraction,
    Jailbreak,
}

impl InjectionCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InstructionOverride => "instruction_override",
            Self::RoleSwitch => "role_switch",
            Self::PromptExtraction => "prompt_extraction",
            Self::Jailbreak => "jailbreak",
        }
    }
}

impl std::fmt::Display for InjectionCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

struct GuardPattern {
    category: InjectionCategory,
    name: &'static str,
    regex: Regex,
}

/// Regex screen applied to inbound text before it reaches the generation provider.
///
/// A hit short-circuits generation: the sender gets the `safety_block`
/// template and the provider is never called.
pub struct PromptGuard {
    patterns: Vec<GuardPattern>,
}

impl Default for PromptGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl PromptGuard {
    pub fn new() -> Self {
        let pattern_defs: [(InjectionCategory, &str, &str); 9] = [
            (
                InjectionCategory::InstructionOverride,
                "ignore_previous",
                r"(?i)\b(?:ignore|disregard|forget)\b.{0,40}\b(?:previous|prior|above|earlier)\b.{0,40}\b(?:instructions?|prompts?|rules?)\b",
            ),
            (
                InjectionCategory::InstructionOverride,
                "ignore_all_prior",
                r"(?i)\bignore all (?:prior|previous)\b",
            ),
            (
                InjectionCategory::InstructionOverride,
                "ignore_previous_pt",
                r"(?i)\b(?:ignore|esque[cç]a|desconsidere)\b.{0,40}\binstru[cç](?:ão|ões|oes|ao)\b.{0,20}\banteriores?\b",
            ),
            (
                InjectionCategory::InstructionOverride,
                "new_instructions",
                r"(?i)(?:^|\n)\s*(?:system|new|updated)\s*(?:prompt|instructions?)\s*:",
            ),
            (
                InjectionCategory::RoleSwitch,
                "you_are_now",
                r"(?i)\b(?:you are now|from now on you are|act as if you were)\b",
            ),
            (
                InjectionCategory::PromptExtraction,
                "reveal_prompt",
                r"(?i)\b(?:repeat|show|print|reveal|tell me)\b.{0,40}\b(?:your|the)\s+(?:system prompt|instructions|initial prompt)\b",
            ),
            (
                InjectionCategory::Jailbreak,
                "dan_mode",
                r"(?i)\b(?:DAN|developer|god)\s*mode\b",
            ),
            (
                InjectionCategory::Jailbreak,
                "jailbreak",
                r"(?i)\bjailbreak\b",
            ),
            (
                InjectionCategory::Jailbreak,
                "do_anything_now",
                r"(?i)\bdo anything now\b",
            ),
        ];

        let patterns = pattern_defs
            .into_iter()
            .filter_map(|(category, name, pattern)| match Regex::new(pattern) {
                Ok(regex) => Some(GuardPattern {
                    category,
                    name,
                    regex,
                }),
                Err(e) => {
                    warn!("failed to compile prompt guard pattern '{}': {}", name, e);
                    None
                }
            })
            .collect();

        Self { patterns }
    }

    /// Drop zero-width and bidi control characters used to split keywords
    /// (e.g. "ig\u{200B}nore").
    fn normalize(text: &str) -> String {
        text.chars()
            .filter(|c| {
                !matches!(
                    *c,
                    '\u{200B}'..='\u{200F}'
                        | '\u{FEFF}'
                        | '\u{00AD}'
                        | '\u{2060}'..='\u{2064}'
                        | '\u{202A}'..='\u{202E}'
                        | '\u{2066}'..='\u{2069}'
                )
            })
            .collect()
    }

    /// First matching category and pattern name, if any.
    pub fn detect(&self, text: &str) -> Option<(InjectionCategory, &'static str)> {
        let normalized = Self::normalize(text);
        self.patterns
            .iter()
            .find(|p| p.regex.is_match(&normalized))
            .map(|p| (p.category, p.name))
    }

    pub fn check(&self, text: &str) -> Result<(), SwitchboardError> {
        match self.detect(text) {
            Some((category, _)) => Err(SwitchboardError::SafetyViolation(category.to_string())),
            None => Ok(()),
        }
    }
}
