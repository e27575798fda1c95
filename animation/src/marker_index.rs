use std::collections::HashMap;

use indexmap::IndexMap;

/// Named frame positions of a timeline, indexed by name and by frame.
///
/// Names are unique. Both indices preserve insertion order, and a frame without markers has no
/// entry in the frame index.
#[derive(Debug, Default, Clone)]
pub struct MarkerIndex {
    by_name: IndexMap<String, u32>,
    by_frame: HashMap<u32, Vec<String>>,
}

impl MarkerIndex {
    /// Inserts a marker. Returns `false` and leaves the index unchanged if the name is taken.
    pub fn insert(&mut self, name: &str, frame: u32) -> bool {
        if self.by_name.contains_key(name) {
            return false;
        }
        self.by_name.insert(name.to_owned(), frame);
        self.by_frame
            .entry(frame)
            .or_default()
            .push(name.to_owned());
        debug_assert!(self.is_consistent());
        true
    }

    /// Removes a marker and returns its frame.
    pub fn remove(&mut self, name: &str) -> Option<u32> {
        let frame = self.by_name.shift_remove(name)?;
        if let Some(names) = self.by_frame.get_mut(&frame) {
            names.retain(|n| n != name);
            if names.is_empty() {
                self.by_frame.remove(&frame);
            }
        }
        debug_assert!(self.is_consistent());
        Some(frame)
    }

    pub fn frame_of(&self, name: &str) -> Option<u32> {
        self.by_name.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    /// The markers at `frame`, in insertion order.
    pub fn at_frame(&self, frame: u32) -> &[String] {
        self.by_frame.get(&frame).map(Vec::as_slice).unwrap_or_default()
    }

    /// All marker names, in insertion order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.by_name.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    fn is_consistent(&self) -> bool {
        let frame_total: usize = self.by_frame.values().map(Vec::len).sum();
        frame_total == self.by_name.len()
            && self.by_frame.values().all(|names| !names.is_empty())
            && self
                .by_name
                .iter()
                .all(|(name, frame)| self.at_frame(*frame).contains(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_names_are_refused() {
        let mut index = MarkerIndex::default();
        assert!(index.insert("x", 3));
        assert!(!index.insert("x", 7));
        assert_eq!(index.frame_of("x"), Some(3));
        assert_eq!(index.len(), 1);
        assert!(index.at_frame(7).is_empty());
    }

    #[test]
    fn frame_buckets_keep_insertion_order() {
        let mut index = MarkerIndex::default();
        index.insert("foo", 5);
        index.insert("bar", 5);
        index.insert("baz", 5);
        index.insert("first", 1);
        assert_eq!(index.at_frame(5), ["foo", "bar", "baz"]);
        assert_eq!(
            index.names().collect::<Vec<_>>(),
            ["foo", "bar", "baz", "first"]
        );
    }

    #[test]
    fn removing_the_last_marker_drops_the_bucket() {
        let mut index = MarkerIndex::default();
        index.insert("a", 2);
        index.insert("b", 2);
        assert_eq!(index.remove("a"), Some(2));
        assert_eq!(index.at_frame(2), ["b"]);
        assert_eq!(index.remove("b"), Some(2));
        assert!(index.by_frame.is_empty());
        assert!(index.is_empty());
        assert_eq!(index.remove("b"), None);
    }
}
