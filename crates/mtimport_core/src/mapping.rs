use std::collections::BTreeMap;

use serde::Serialize;

/// Where an imported asset ended up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssetMapping {
    pub id: u64,
    pub new_url: Option<String>,
    pub old_url: Option<String>,
}

/// Old Movable Type ids to their WordPress counterparts, built up during one run.
///
/// Entries are only ever added. Later elements in the same run (placements,
/// object tags, comments) resolve their references through this table.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MappingTable {
    pub users: BTreeMap<String, u64>,
    pub posts: BTreeMap<String, u64>,
    pub assets: BTreeMap<String, AssetMapping>,
    pub tags: BTreeMap<String, String>,
    pub categories: BTreeMap<String, u64>,
}

impl MappingTable {
    pub fn user(&self, old_id: &str) -> Option<u64> {
        self.users.get(old_id).copied()
    }

    pub fn post(&self, old_id: &str) -> Option<u64> {
        self.posts.get(old_id).copied()
    }

    pub fn asset(&self, old_id: &str) -> Option<&AssetMapping> {
        self.assets.get(old_id)
    }

    pub fn tag(&self, old_id: &str) -> Option<&str> {
        self.tags.get(old_id).map(String::as_str)
    }

    pub fn category(&self, old_id: &str) -> Option<u64> {
        self.categories.get(old_id).copied()
    }

    pub fn len(&self) -> usize {
        self.users.len()
            + self.posts.len()
            + self.assets.len()
            + self.tags.len()
            + self.categories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookups_resolve_by_old_id() {
        let mut table = MappingTable::default();
        assert!(table.is_empty());
        table.posts.insert("9".to_string(), 140);
        table.tags.insert("3".to_string(), "travel".to_string());
        table.assets.insert(
            "5".to_string(),
            AssetMapping {
                id: 77,
                new_url: Some("https://new.example/uploads/a.jpg".to_string()),
                old_url: Some("http://old.example/a.jpg".to_string()),
            },
        );
        assert_eq!(table.post("9"), Some(140));
        assert_eq!(table.post("10"), None);
        assert_eq!(table.tag("3"), Some("travel"));
        assert_eq!(table.asset("5").map(|asset| asset.id), Some(77));
        assert_eq!(table.len(), 3);
    }
}
