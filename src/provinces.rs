// src/provinces.rs

use std::collections::HashMap;

/// Maps a raw province cell to its canonical name.
///
/// Canonicalisation proper belongs to whoever maintains the province
/// gazetteer; the parser only needs this seam.
pub trait ProvinceResolver {
    fn resolve(&self, raw: &str) -> Option<String>;
}

/// Alias table loaded from config. Unknown names pass through trimmed.
#[derive(Debug, Default, Clone)]
pub struct ProvinceAliases {
    aliases: HashMap<String, String>,
}

impl ProvinceAliases {
    pub fn new(aliases: HashMap<String, String>) -> Self {
        Self { aliases }
    }
}

impl ProvinceResolver for ProvinceAliases {
    fn resolve(&self, raw: &str) -> Option<String> {
        let name = raw.trim();
        if name.is_empty() {
            return None;
        }
        Some(
            self.aliases
                .get(name)
                .cloned()
                .unwrap_or_else(|| name.to_string()),
        )
    }
}
