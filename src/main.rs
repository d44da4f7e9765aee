mod coldchain;
mod config;
mod document;
mod error;
mod frame;
mod heuristics;
mod layout;
mod mapper;
mod pdf_extract;
mod provinces;
mod reconcile;
mod response_store;
mod rules;
mod thai;
mod validate;

use coldchain::{ColdchainAdapter, ColdchainKey};
use document::{Document, DocumentKind};
use frame::Record;
use provinces::ProvinceAliases;
use reconcile::Timeline;
use serde::Serialize;
use std::{fs, path::Path};
use time::OffsetDateTime;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG: &str = "vac_timeline.toml";

#[derive(Serialize)]
struct Export<'a> {
    daily: Vec<Record<'a, time::Date>>,
    provinces: Vec<Record<'a, (time::Date, String)>>,
    manufacturer: Vec<Record<'a, time::Date>>,
    coldchain: Vec<Record<'a, ColdchainKey>>,
}

/// Page dumps (`.json`) and report PDFs found directly under `dir`.
fn load_documents(dir: &Path, kind: DocumentKind) -> error::Result<Vec<Document>> {
    let mut docs = Vec::new();
    if !dir.exists() {
        warn!(dir = %dir.display(), "Document directory missing");
        return Ok(docs);
    }
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let loaded = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Document::load_json(&path).map(Some),
            Some("pdf") => pdf_extract::load_document(&path, kind),
            _ => continue,
        };
        match loaded {
            Ok(Some(mut doc)) => {
                doc.kind = kind;
                docs.push(doc);
            }
            Ok(None) => {}
            Err(e) => error!(file = %path.display(), error = %e, "Failed to load document"),
        }
    }
    info!(dir = %dir.display(), count = docs.len(), "Documents loaded");
    Ok(docs)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_target(true)
        .with_level(true)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG.to_string());
    let cfg = config::Config::load(&config_path)?;
    let policy = cfg.policy();
    let resolver = ProvinceAliases::new(cfg.provinces.aliases.clone());

    let mut docs = load_documents(&cfg.documents_dir, DocumentKind::DailyReport)?;
    docs.extend(load_documents(&cfg.slides_dir, DocumentKind::SlideDeck)?);
    let docs = document::order_for_ingest(docs, cfg.max_documents);

    let mut timeline = Timeline::new();
    timeline.ingest_all(&docs, &resolver, &policy)?;

    if let Some(section) = &cfg.coldchain {
        let today = OffsetDateTime::now_utc().date();
        match ColdchainAdapter::from_config(section, cfg.provinces.codes.clone()) {
            Ok(adapter) => {
                let frame = adapter.run(&section.queries, today).await;
                timeline.merge_coldchain(&frame, &policy)?;
            }
            Err(e) => error!(error = %e, "Coldchain adapter unavailable"),
        }
    }

    let output = Export {
        daily: timeline.daily.records(),
        provinces: timeline.provinces.records(),
        manufacturer: timeline.manufacturer.records(),
        coldchain: timeline.coldchain.records(),
    };
    if let Some(parent) = cfg.output_path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&cfg.output_path, serde_json::to_string_pretty(&output)?)?;

    info!(
        output = %cfg.output_path.display(),
        daily = timeline.daily.len(),
        provinces = timeline.provinces.len(),
        manufacturer = timeline.manufacturer.len(),
        coldchain = timeline.coldchain.len(),
        "DONE"
    );
    Ok(())
}
