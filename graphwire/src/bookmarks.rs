//! Bookmark tracking (§4.G). A session's current bookmarks are the union of the ones it was
//! opened with and the ones its transactions have since returned; an optional `BookmarkManager`
//! collaborator can inject additional ones before the next transaction starts.

use std::collections::BTreeSet;

#[derive(Debug, Clone, Default)]
pub struct Bookmarks {
    values: BTreeSet<String>,
}

impl Bookmarks {
    pub fn new(initial: impl IntoIterator<Item = String>) -> Self {
        Self {
            values: initial.into_iter().collect(),
        }
    }

    pub fn raw_values(&self) -> Vec<String> {
        self.values.iter().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Folds in a new bookmark from a `COMMIT`/`PULL` success (§4.G).
    pub fn update(&mut self, received: Option<&str>) {
        if let Some(bookmark) = received {
            self.values.insert(bookmark.to_string());
        }
    }

    /// Merges extra bookmarks supplied by an external `BookmarkManager` ahead of a transaction.
    pub fn merge(&mut self, extra: impl IntoIterator<Item = String>) {
        self.values.extend(extra);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_after_commit_contains_exactly_the_returned_bookmark() {
        let mut bookmarks = Bookmarks::new(Vec::new());
        bookmarks.update(Some("bm:1"));
        assert_eq!(bookmarks.raw_values(), vec!["bm:1".to_string()]);
    }

    #[test]
    fn merge_adds_manager_supplied_bookmarks() {
        let mut bookmarks = Bookmarks::new(vec!["bm:1".to_string()]);
        bookmarks.merge(vec!["bm:2".to_string()]);
        let mut values = bookmarks.raw_values();
        values.sort();
        assert_eq!(values, vec!["bm:1".to_string(), "bm:2".to_string()]);
    }
}
