//! Load already-fetched relay documents from disk.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use anyhow::{Context, Result};
use fallback_selection::Document;
use serde::de::DeserializeOwned;

/// Where a document came from, for the header of the generated list.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FetchSource {
    /// The document type, e.g. `details` or `uptime`.
    pub what: String,
    pub location: String,
    pub relays_published: String,
    pub version: String,
}

pub fn load<T>(what: &str, path: &Path) -> Result<(Document<T>, FetchSource)>
where
    T: DeserializeOwned,
{
    let file = File::open(path).with_context(|| format!("opening {what} document {path:?}"))?;
    let document: Document<T> = serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("parsing {what} document {path:?}"))?;
    let source = FetchSource {
        what: what.to_string(),
        location: path.display().to_string(),
        relays_published: document.relays_published.clone().unwrap_or_default(),
        version: document.version.clone().unwrap_or_default(),
    };
    tracing::info!(
        what,
        relays = document.relays.len(),
        published = %source.relays_published,
        "loaded document"
    );
    Ok((document, source))
}
