//! Static care advice per predicted label

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::utils::error::{PlantDoctorError, Result, ResultExt};

/// Advice returned for labels missing from the table
pub const NO_ADVICE: &str = "No advice available";

/// Label -> advice lines, keyed by lower-cased label.
///
/// Serializes as a plain JSON object, e.g.
/// `{"healthy": ["Plant appears healthy"]}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    from = "HashMap<String, Vec<String>>",
    into = "HashMap<String, Vec<String>>"
)]
pub struct AdviceTable {
    entries: HashMap<String, Vec<String>>,
}

impl Default for AdviceTable {
    fn default() -> Self {
        Self::from_map(HashMap::from([
            (
                "early_blight".to_string(),
                vec![
                    "Remove infected leaves immediately".to_string(),
                    "Avoid overhead watering".to_string(),
                    "Apply copper-based fungicide".to_string(),
                ],
            ),
            (
                "healthy".to_string(),
                vec![
                    "Plant appears healthy".to_string(),
                    "Continue proper irrigation and monitoring".to_string(),
                ],
            ),
        ]))
    }
}

impl AdviceTable {
    /// Build from any map; keys are lower-cased
    pub fn from_map(map: HashMap<String, Vec<String>>) -> Self {
        let entries = map
            .into_iter()
            .map(|(label, advice)| (label.to_lowercase(), advice))
            .collect();
        Self { entries }
    }

    /// Load a JSON object of label -> list of strings
    pub fn from_file(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context_as(PlantDoctorError::Config, || format!("cannot read {:?}", path))?;
        serde_json::from_str(&json).with_context_as(PlantDoctorError::Config, || {
            format!("advice file {:?} must map labels to lists of strings", path)
        })
    }

    /// Advice for `label` (case-insensitive), or `["No advice available"]`
    pub fn lookup(&self, label: &str) -> Vec<String> {
        self.entries
            .get(&label.to_lowercase())
            .cloned()
            .unwrap_or_else(|| vec![NO_ADVICE.to_string()])
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl From<HashMap<String, Vec<String>>> for AdviceTable {
    fn from(map: HashMap<String, Vec<String>>) -> Self {
        Self::from_map(map)
    }
}

impl From<AdviceTable> for HashMap<String, Vec<String>> {
    fn from(table: AdviceTable) -> Self {
        table.entries
    }
}
