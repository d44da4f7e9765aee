use crate::error::{Policy, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::{fs, path::Path};

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default = "default_documents_dir")]
    pub documents_dir: PathBuf,
    #[serde(default = "default_slides_dir")]
    pub slides_dir: PathBuf,
    #[serde(default = "default_output_path")]
    pub output_path: PathBuf,
    /// 0 = every document found.
    #[serde(default)]
    pub max_documents: usize,
    #[serde(default)]
    pub validation: ValidationSection,
    pub coldchain: Option<ColdchainSection>,
    #[serde(default)]
    pub provinces: ProvincesSection,
}

fn default_documents_dir() -> PathBuf {
    PathBuf::from("inputs/vaccinations")
}

fn default_slides_dir() -> PathBuf {
    PathBuf::from("inputs/vaccination_slides")
}

fn default_output_path() -> PathBuf {
    PathBuf::from("api/vac_timeline.json")
}

#[derive(Debug, Deserialize)]
pub struct ValidationSection {
    #[serde(default = "default_hard_stop")]
    pub hard_stop: bool,
}

fn default_hard_stop() -> bool {
    true
}

impl Default for ValidationSection {
    fn default() -> Self {
        Self {
            hard_stop: default_hard_stop(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ColdchainSection {
    pub url: String,
    #[serde(default = "default_requests_dir")]
    pub requests_dir: PathBuf,
    #[serde(default = "default_cache_path")]
    pub cache_path: PathBuf,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub queries: Vec<QuerySpec>,
}

fn default_requests_dir() -> PathBuf {
    PathBuf::from("inputs/json")
}

fn default_cache_path() -> PathBuf {
    PathBuf::from("inputs/json/responses.db")
}

fn default_timeout_secs() -> u64 {
    120
}

/// One stored request template and how to fold its response.
#[derive(Debug, Clone, Deserialize)]
pub struct QuerySpec {
    /// Request template file name under `requests_dir`, also the cache key.
    pub file: String,
    /// Repeat the request once per province code.
    #[serde(default)]
    pub by_province: bool,
    /// Source field holding the figure, renamed to the series column.
    pub quantity_column: Option<QuantityColumn>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QuantityColumn {
    pub source: String,
    pub target: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProvinceCode {
    pub code: String,
    pub name: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ProvincesSection {
    #[serde(default)]
    pub codes: Vec<ProvinceCode>,
    /// Raw report spelling → canonical name.
    #[serde(default)]
    pub aliases: HashMap<String, String>,
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn policy(&self) -> Policy {
        Policy {
            hard_stop: self.validation.hard_stop,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults() {
        let cfg = Config::parse("").unwrap();
        assert_eq!(cfg.max_documents, 0);
        assert!(cfg.validation.hard_stop);
        assert!(cfg.coldchain.is_none());
        assert_eq!(cfg.output_path, PathBuf::from("api/vac_timeline.json"));
    }

    #[test]
    fn test_full_file() {
        let cfg = Config::parse(
            r#"
            documents_dir = "reports"
            max_documents = 5

            [validation]
            hard_stop = false

            [coldchain]
            url = "https://example.org/batchedDataV2"

            [[coldchain.queries]]
            file = "vac_request_givenprov.json"
            by_province = true

            [[coldchain.queries]]
            file = "vac_request_delivery.json"
            quantity_column = { source = "_quantity_", target = "Vac Delivered" }

            [[provinces.codes]]
            code = "TH-10"
            name = "Bangkok"

            [provinces.aliases]
            "กรุงเทพมหานคร" = "Bangkok"
            "#,
        )
        .unwrap();

        assert!(!cfg.policy().hard_stop);
        let cc = cfg.coldchain.unwrap();
        assert_eq!(cc.timeout_secs, 120);
        assert_eq!(cc.queries.len(), 2);
        assert!(cc.queries[0].by_province);
        assert_eq!(
            cc.queries[1].quantity_column.as_ref().map(|q| q.target.as_str()),
            Some("Vac Delivered")
        );
        assert_eq!(cfg.provinces.codes[0].code, "TH-10");
        assert_eq!(cfg.provinces.aliases["กรุงเทพมหานคร"], "Bangkok");
    }
}
