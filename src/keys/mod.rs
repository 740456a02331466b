//! API key discovery, rotation state, and per-request cycle tracking.

mod parser;
mod state;
mod tracker;

pub use parser::parse_provider_keys;
pub use state::{FailureEntry, ProviderRotation, RotationStore};
pub use tracker::KeyCycleTracker;

/// Redacted form of a key for logs: the last four characters, or `****`
/// when the key is too short to reveal anything.
pub(crate) fn key_hint(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() >= 4 {
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("...{}", tail)
    } else {
        "****".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_hint_redacts() {
        assert_eq!(key_hint("sk-abcd1234"), "...1234");
        assert_eq!(key_hint("abc"), "****");
        assert_eq!(key_hint(""), "****");
    }
}
