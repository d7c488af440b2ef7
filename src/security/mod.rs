pub mod prompt_guard;
pub mod sanitize;
pub mod signature;

pub use prompt_guard::{InjectionCategory, PromptGuard};
pub use sanitize::{mask_phone, preview, sanitize_text};
pub use signature::SignatureVerifier;
