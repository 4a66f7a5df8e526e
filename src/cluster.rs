use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::hamminghash::find_groups;
use crate::media::{Fingerprint, HashKey};

/// Distinct canonical paths judged near-duplicates, sorted, at least two.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DuplicateGroup {
    pub members: Vec<String>,
}

impl DuplicateGroup {
    pub fn len(&self) -> usize { self.members.len() }
}

/// Result of one hashing pass. Replaced wholesale by the next pass.
///
/// Serializes as nested lists of relative paths; the root is not part of the wire form.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DuplicateSet {
    /// Directory the relative member paths are resolved against.
    pub root: PathBuf,
    groups: Vec<DuplicateGroup>,
}

impl DuplicateSet {
    pub fn new(root: impl Into<PathBuf>, groups: Vec<DuplicateGroup>) -> Self {
        Self { root: root.into(), groups }
    }

    pub fn len(&self) -> usize { self.groups.len() }
    pub fn is_empty(&self) -> bool { self.groups.is_empty() }
    pub fn get(&self, idx: usize) -> Option<&DuplicateGroup> { self.groups.get(idx) }
    pub fn iter(&self) -> std::slice::Iter<'_, DuplicateGroup> { self.groups.iter() }

    pub fn absolute(&self, relative: &str) -> PathBuf {
        self.root.join(Path::new(relative))
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

impl Serialize for DuplicateSet {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.groups.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for DuplicateSet {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let groups = Vec::<DuplicateGroup>::deserialize(deserializer)?;
        Ok(Self { root: PathBuf::new(), groups })
    }
}

/// Groups fingerprints whose distance is within `threshold`, transitively,
/// and projects each component onto canonical paths.
///
/// Keys of the same video collapse into one member, so a component made only
/// of one video's frames is dropped.
pub fn cluster(map: &BTreeMap<HashKey, Fingerprint>, threshold: u32, root: &Path) -> DuplicateSet {
    let (keys, hashes): (Vec<&HashKey>, Vec<Fingerprint>) = map.iter().map(|(k, v)| (k, *v)).unzip();

    let components = find_groups(&hashes, threshold);
    log::debug!("{} fingerprints formed {} raw components at threshold {}", hashes.len(), components.len(), threshold);

    let mut groups: Vec<DuplicateGroup> = components
        .into_iter()
        .filter_map(|component| {
            let members: BTreeSet<&str> = component.iter()
                .map(|&idx| keys[idx as usize].canonical_path())
                .collect();
            if members.len() < 2 { return None; }
            Some(DuplicateGroup { members: members.into_iter().map(str::to_string).collect() })
        })
        .collect();

    groups.sort();
    DuplicateSet::new(root, groups)
}
