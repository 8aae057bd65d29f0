//! Class-to-index mapping
//!
//! Indices are the positions of the class names in lexicographic order, so
//! the same directory tree always yields the same mapping.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::utils::error::{PlantDoctorError, Result};

/// Bidirectional mapping between class names and output-layer indices.
///
/// Invariant: indices are `0..len()`, contiguous and one-to-one with names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "BTreeMap<String, usize>", into = "BTreeMap<String, usize>")]
pub struct ClassIndex {
    /// Class names ordered by index
    names: Vec<String>,
}

impl ClassIndex {
    /// Build from class names in any order; they are sorted and deduplicated
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut names: Vec<String> = names.into_iter().map(Into::into).collect();
        names.sort();
        names.dedup();
        Self { names }
    }

    /// Build from an explicit name -> index map, validating the invariant
    pub fn from_map(map: BTreeMap<String, usize>) -> Result<Self> {
        let len = map.len();
        let mut names = vec![None; len];

        for (name, idx) in map {
            let slot = names.get_mut(idx).ok_or_else(|| {
                PlantDoctorError::Checkpoint(format!(
                    "class '{}' has index {} outside 0..{}",
                    name, idx, len
                ))
            })?;
            if let Some(existing) = slot.replace(name.clone()) {
                return Err(PlantDoctorError::Checkpoint(format!(
                    "classes '{}' and '{}' share index {}",
                    existing, name, idx
                )));
            }
        }

        // A map with n entries and no out-of-range or duplicate index fills every slot
        let names = names.into_iter().flatten().collect();
        Ok(Self { names })
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Index of a class name
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    /// Class name of an index (the inverse map)
    pub fn name_of(&self, idx: usize) -> Option<&str> {
        self.names.get(idx).map(String::as_str)
    }

    /// Class names ordered by index
    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn to_map(&self) -> BTreeMap<String, usize> {
        self.names
            .iter()
            .enumerate()
            .map(|(idx, name)| (name.clone(), idx))
            .collect()
    }
}

impl TryFrom<BTreeMap<String, usize>> for ClassIndex {
    type Error = PlantDoctorError;

    fn try_from(map: BTreeMap<String, usize>) -> Result<Self> {
        Self::from_map(map)
    }
}

impl From<ClassIndex> for BTreeMap<String, usize> {
    fn from(index: ClassIndex) -> Self {
        index.to_map()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sorted_position_is_index() {
        let classes = ClassIndex::from_names(["healthy", "early_blight"]);
        assert_eq!(classes.index_of("early_blight"), Some(0));
        assert_eq!(classes.index_of("healthy"), Some(1));
        assert_eq!(classes.name_of(1), Some("healthy"));
        assert_eq!(classes.name_of(2), None);
        assert_eq!(classes.index_of("late_blight"), None);
    }

    #[test]
    fn test_from_map_roundtrip() {
        let classes = ClassIndex::from_names(["b", "a", "c"]);
        let rebuilt = ClassIndex::from_map(classes.to_map()).unwrap();
        assert_eq!(rebuilt, classes);
    }

    #[test]
    fn test_from_map_rejects_gap() {
        let map = BTreeMap::from([("a".to_string(), 0), ("b".to_string(), 2)]);
        assert!(ClassIndex::from_map(map).is_err());
    }

    #[test]
    fn test_from_map_rejects_duplicate_index() {
        let map = BTreeMap::from([("a".to_string(), 0), ("b".to_string(), 0)]);
        assert!(ClassIndex::from_map(map).is_err());
    }

    #[test]
    fn test_serde_as_plain_map() {
        let classes = ClassIndex::from_names(["healthy", "early_blight"]);
        let json = serde_json::to_string(&classes).unwrap();
        assert_eq!(json, r#"{"early_blight":0,"healthy":1}"#);

        let bad: std::result::Result<ClassIndex, _> = serde_json::from_str(r#"{"a":1}"#);
        assert!(bad.is_err());
    }
}
