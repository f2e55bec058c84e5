/// Loaders for the bundled default datasets and guidance.
///
/// A missing or malformed default file never aborts startup: the loader
/// returns empty collections and a warning the caller shows to the user.
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use tracing::{info, warn};

use crate::error::AppError;
use crate::model::{DefaultDatasets, GuidanceDocument, GuidanceDomain};

/// Guidance documents per regulatory domain, in file order.
#[derive(Debug, Clone, Default)]
pub struct GuidanceLibrary {
    pub tw: Vec<GuidanceDocument>,
    pub k510: Vec<GuidanceDocument>,
}

impl GuidanceLibrary {
    pub fn domain(&self, domain: GuidanceDomain) -> &[GuidanceDocument] {
        match domain {
            GuidanceDomain::Tw => &self.tw,
            GuidanceDomain::K510 => &self.k510,
        }
    }

    pub fn get(&self, id: &str) -> Option<&GuidanceDocument> {
        let domain = GuidanceDomain::for_id(id)?;
        self.domain(domain).iter().find(|d| d.id == id)
    }

    pub fn require(&self, id: &str) -> Result<&GuidanceDocument, AppError> {
        self.get(id)
            .ok_or_else(|| AppError::UnknownGuidance(id.to_string()))
    }

    /// Adds a document to the domain its id routes to; a repeated id replaces
    /// the earlier document. Returns `false` when the id has no known prefix.
    pub fn insert(&mut self, doc: GuidanceDocument) -> bool {
        let docs = match GuidanceDomain::for_id(&doc.id) {
            Some(GuidanceDomain::Tw) => &mut self.tw,
            Some(GuidanceDomain::K510) => &mut self.k510,
            None => return false,
        };
        match docs.iter_mut().find(|d| d.id == doc.id) {
            Some(existing) => *existing = doc,
            None => docs.push(doc),
        }
        true
    }

    pub fn len(&self) -> usize {
        self.tw.len() + self.k510.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub fn load_datasets(path: &Path) -> (DefaultDatasets, Vec<String>) {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            let msg = format!("default dataset file {} not loaded: {e}", path.display());
            warn!("{msg}");
            return (DefaultDatasets::default(), vec![msg]);
        }
    };

    match serde_json::from_str::<DefaultDatasets>(&content) {
        Ok(datasets) => {
            info!(
                tw_cases = datasets.tw_cases.len(),
                k510_checklists = datasets.k510_checklists.len(),
                "loaded default datasets"
            );
            (datasets, Vec::new())
        }
        Err(e) => {
            let msg = format!("error loading {}: {e}", path.display());
            warn!("{msg}");
            (DefaultDatasets::default(), vec![msg])
        }
    }
}

static SECTION_BLOCK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?s)<!--\s*BEGIN_SECTION:\s*(.*?)\s*\|\s*TITLE:\s*(.*?)\s*-->(.*?)<!--\s*END_SECTION\s*-->",
    )
    .expect("valid regex")
});

/// Split a guidance bundle into documents. Blocks look like
/// `<!-- BEGIN_SECTION: <id> | TITLE: <title> --> body <!-- END_SECTION -->`.
pub fn parse_guidance_bundle(text: &str) -> (GuidanceLibrary, Vec<String>) {
    let mut library = GuidanceLibrary::default();
    let mut warnings = Vec::new();

    for caps in SECTION_BLOCK_RE.captures_iter(text) {
        let id = caps[1].trim();
        let doc = GuidanceDocument::new(id, caps[2].trim(), caps[3].trim());
        if !library.insert(doc) {
            let msg = format!("guidance section {id} has no tw_/k510_ prefix; skipped");
            warn!("{msg}");
            warnings.push(msg);
        }
    }
    (library, warnings)
}

pub fn load_guidance(path: &Path) -> (GuidanceLibrary, Vec<String>) {
    match std::fs::read_to_string(path) {
        Ok(content) => {
            let (library, warnings) = parse_guidance_bundle(&content);
            info!(
                tw = library.tw.len(),
                k510 = library.k510.len(),
                "loaded default guidance"
            );
            (library, warnings)
        }
        Err(e) => {
            let msg = format!("default guidance file {} not loaded: {e}", path.display());
            warn!("{msg}");
            (GuidanceLibrary::default(), vec![msg])
        }
    }
}
