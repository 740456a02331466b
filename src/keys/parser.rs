//! API key discovery from the process environment.
//!
//! A provider's keys come from the env-var patterns in its configuration,
//! or from the default `{PROVIDER}_API_KEY` / `{PROVIDER}_API_KEY_{INDEX}`
//! pair when none are configured. Indexed matches are ordered by their
//! numeric index, and duplicate values are kept once.

use regex::Regex;

use crate::config::ProviderRegistry;

const INDEX_TOKEN: &str = "{INDEX}";

/// Parse the ordered list of distinct API keys for a provider from the
/// process environment.
pub fn parse_provider_keys(registry: &ProviderRegistry, provider: &str) -> Vec<String> {
    parse_from_vars(registry, provider, std::env::vars())
}

/// Same as [`parse_provider_keys`], but over an explicit variable snapshot.
/// Keeps tests hermetic and parallel-safe.
pub(crate) fn parse_from_vars(
    registry: &ProviderRegistry,
    provider: &str,
    vars: impl IntoIterator<Item = (String, String)>,
) -> Vec<String> {
    let vars: Vec<(String, String)> = vars.into_iter().collect();

    let patterns: Vec<String> = match registry.env_var_patterns(provider) {
        Some(patterns) => patterns.to_vec(),
        None => default_patterns(provider),
    };

    fn add_key(keys: &mut Vec<String>, value: &str) {
        if !value.is_empty() && !keys.iter().any(|k| k == value) {
            keys.push(value.to_string());
        }
    }

    let mut keys: Vec<String> = Vec::new();
    for pattern in &patterns {
        if pattern.contains(INDEX_TOKEN) {
            for (_, value) in collect_indexed(pattern, &vars) {
                add_key(&mut keys, &value);
            }
        } else if let Some((_, value)) = vars.iter().find(|(name, _)| name == pattern) {
            add_key(&mut keys, value);
        }
    }

    keys
}

/// Default patterns when the provider config carries none: the literal
/// variable first, then indexed variants. Hyphens map to underscores.
fn default_patterns(provider: &str) -> Vec<String> {
    let prefix = provider.to_uppercase().replace('-', "_");
    vec![
        format!("{}_API_KEY", prefix),
        format!("{}_API_KEY_{}", prefix, INDEX_TOKEN),
    ]
}

/// Env vars matching an `{INDEX}` pattern, sorted ascending by index.
fn collect_indexed(pattern: &str, vars: &[(String, String)]) -> Vec<(u64, String)> {
    let escaped = regex::escape(pattern).replace(r"\{INDEX\}", r"(\d+)");
    let Ok(re) = Regex::new(&format!("^{}$", escaped)) else {
        tracing::warn!(pattern, "Invalid env var pattern, skipping");
        return Vec::new();
    };

    let mut matches: Vec<(u64, String)> = vars
        .iter()
        .filter_map(|(name, value)| {
            let captures = re.captures(name)?;
            let index: u64 = captures.get(1)?.as_str().parse().ok()?;
            Some((index, value.clone()))
        })
        .collect();
    matches.sort_by_key(|(index, _)| *index);
    matches
}
