use std::collections::HashMap;

/// Governance tokens tracked by the study and their report names.
pub const TOKEN_NAMES: &[(&str, &str)] = &[
    ("uniswap", "Uniswap"),
    ("aave", "Aave"),
    ("balancer", "Balancer"),
    ("yearn-finance", "Yearn Finance"),
    ("yearn.finance", "Yearn Finance"), // snapshot space id
    ("index-cooperative", "Index Cooperative"),
    ("apwine", "Spectra"), // rebranded
];

/// Resolves token identifiers to display names.
#[derive(Debug, Clone, Default)]
pub struct TokenRegistry {
    names: HashMap<String, String>,
}

impl TokenRegistry {
    pub fn new() -> Self {
        let names = TOKEN_NAMES
            .iter()
            .map(|(id, name)| (id.to_string(), name.to_string()))
            .collect();
        Self { names }
    }

    /// Adds or overrides names, e.g. from the combined tokens table.
    pub fn with_names<I>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (id, name) in names {
            if !name.trim().is_empty() {
                self.names.insert(id, name);
            }
        }
        self
    }

    pub fn is_known(&self, token_id: &str) -> bool {
        self.names.contains_key(token_id)
    }

    /// Display name for a token; unknown identifiers are returned as is.
    pub fn display_name(&self, token_id: &str) -> String {
        self.names
            .get(token_id)
            .cloned()
            .unwrap_or_else(|| token_id.to_string())
    }

    /// Unique display names of the study tokens, in declaration order.
    pub fn study_tokens() -> Vec<&'static str> {
        let mut seen = Vec::new();
        for (_, name) in TOKEN_NAMES {
            if !seen.contains(name) {
                seen.push(*name);
            }
        }
        seen
    }

    /// Identifiers that share a display name with `name`.
    pub fn ids_for(&self, name: &str) -> Vec<String> {
        let mut ids: Vec<String> = self
            .names
            .iter()
            .filter(|(_, n)| n.as_str() == name)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yearn_aliases_unify() {
        let registry = TokenRegistry::new();
        assert_eq!(registry.display_name("yearn-finance"), "Yearn Finance");
        assert_eq!(registry.display_name("yearn.finance"), "Yearn Finance");
        assert_eq!(registry.ids_for("Yearn Finance"), vec!["yearn-finance", "yearn.finance"]);
    }

    #[test]
    fn test_unknown_token_passes_through() {
        let registry = TokenRegistry::new();
        assert!(!registry.is_known("compound"));
        assert_eq!(registry.display_name("compound"), "compound");
    }

    #[test]
    fn test_study_tokens_dedup() {
        let tokens = TokenRegistry::study_tokens();
        assert_eq!(tokens.len(), 6);
        assert_eq!(tokens[5], "Spectra");
    }

    #[test]
    fn test_with_names_overrides() {
        let registry = TokenRegistry::new()
            .with_names(vec![("aave".to_string(), "Aave Token".to_string()), ("x".to_string(), " ".to_string())]);
        assert_eq!(registry.display_name("aave"), "Aave Token");
        assert!(!registry.is_known("x"));
    }
}
