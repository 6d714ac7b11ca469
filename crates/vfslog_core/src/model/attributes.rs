//! Per-file attribute lists.

/// The attributes of one file, keyed by compressed attribute info.
///
/// Order is insertion order; upserting a key moves it to the end. Indices
/// into the list are what [`crate::AttributeDataRef`] points at.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AttributesMap {
    entries: Vec<(i64, Vec<u8>)>,
}

impl AttributesMap {
    /// Creates an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a map from entries in list order.
    ///
    /// Later duplicates of a key replace earlier ones.
    #[must_use]
    pub fn from_entries(entries: impl IntoIterator<Item = (i64, Vec<u8>)>) -> Self {
        let mut map = Self::new();
        for (key, value) in entries {
            map.upsert(key, value);
        }
        map
    }

    /// Returns the entries in list order.
    #[must_use]
    pub fn entries(&self) -> &[(i64, Vec<u8>)] {
        &self.entries
    }

    /// Returns the number of attributes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the file has no attributes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the list index of `key`.
    #[must_use]
    pub fn index_of(&self, key: i64) -> Option<usize> {
        self.entries.iter().position(|(k, _)| *k == key)
    }

    /// Returns the value of `key`.
    #[must_use]
    pub fn get(&self, key: i64) -> Option<&[u8]> {
        self.index_of(key).map(|i| self.entries[i].1.as_slice())
    }

    /// Returns the value at list index `index`.
    #[must_use]
    pub fn value_at(&self, index: usize) -> Option<&[u8]> {
        self.entries.get(index).map(|(_, v)| v.as_slice())
    }

    /// Removes any existing value of `key`, then appends the new value.
    pub fn upsert(&mut self, key: i64, value: Vec<u8>) {
        self.entries.retain(|(k, _)| *k != key);
        self.entries.push((key, value));
    }

    /// Removes every attribute.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Applies a pending update on top of this map.
    #[must_use]
    pub fn merged(mut self, update: AttributesUpdate<Vec<u8>>) -> Self {
        if update.cleared {
            self.clear();
        }
        for (key, value) in update.upserts {
            self.upsert(key, value);
        }
        self
    }
}

/// Pending change to one file's attributes.
///
/// `V` is the value representation: payload references while the log is
/// replayed, bytes once the payloads have been read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributesUpdate<V> {
    cleared: bool,
    upserts: Vec<(i64, V)>,
}

impl<V> Default for AttributesUpdate<V> {
    fn default() -> Self {
        Self {
            cleared: false,
            upserts: Vec::new(),
        }
    }
}

impl<V> AttributesUpdate<V> {
    /// Creates an empty update.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that every prior attribute is deleted.
    ///
    /// Upserts recorded so far are dropped too.
    pub fn clear(&mut self) {
        self.cleared = true;
        self.upserts.clear();
    }

    /// Records a write of `key`; the newest write of a key wins.
    pub fn upsert(&mut self, key: i64, value: V) {
        self.upserts.retain(|(k, _)| *k != key);
        self.upserts.push((key, value));
    }

    /// Returns true if the prior attributes are discarded.
    #[must_use]
    pub fn is_cleared(&self) -> bool {
        self.cleared
    }

    /// Returns the pending writes in application order.
    #[must_use]
    pub fn upserts(&self) -> &[(i64, V)] {
        &self.upserts
    }

    /// Converts every value, failing on the first error.
    ///
    /// # Errors
    ///
    /// Returns the first error produced by `f`.
    pub fn try_map<U, E>(
        self,
        mut f: impl FnMut(V) -> Result<U, E>,
    ) -> Result<AttributesUpdate<U>, E> {
        let upserts = self
            .upserts
            .into_iter()
            .map(|(key, value)| Ok((key, f(value)?)))
            .collect::<Result<Vec<_>, E>>()?;
        Ok(AttributesUpdate {
            cleared: self.cleared,
            upserts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bytes(s: &str) -> Vec<u8> {
        s.as_bytes().to_vec()
    }

    #[test]
    fn upsert_replaces_and_moves_to_end() {
        let mut map = AttributesMap::new();
        map.upsert(1, bytes("a"));
        map.upsert(2, bytes("b"));
        map.upsert(1, bytes("c"));

        assert_eq!(map.len(), 2);
        assert_eq!(map.get(1), Some(&b"c"[..]));
        assert_eq!(map.index_of(2), Some(0));
        assert_eq!(map.index_of(1), Some(1));
        assert_eq!(map.get(3), None);
    }

    #[test]
    fn merge_without_clear_keeps_prior() {
        let prior = AttributesMap::from_entries([(1, bytes("old")), (2, bytes("keep"))]);
        let mut update = AttributesUpdate::new();
        update.upsert(1, bytes("new"));

        let merged = prior.merged(update);
        assert_eq!(merged.get(1), Some(&b"new"[..]));
        assert_eq!(merged.get(2), Some(&b"keep"[..]));
    }

    #[test]
    fn clear_discards_prior_and_earlier_upserts() {
        let prior = AttributesMap::from_entries([(1, bytes("old"))]);
        let mut update = AttributesUpdate::new();
        update.upsert(2, bytes("lost"));
        update.clear();
        update.upsert(3, bytes("kept"));

        let merged = prior.merged(update);
        assert_eq!(merged.entries(), &[(3, bytes("kept"))]);
    }

    #[test]
    fn last_write_wins_within_update() {
        let mut update = AttributesUpdate::new();
        update.upsert(5, 1u32);
        update.upsert(6, 2u32);
        update.upsert(5, 3u32);
        assert_eq!(update.upserts(), &[(6, 2), (5, 3)]);

        let mapped = update.try_map(|v| Ok::<_, ()>(v * 10)).unwrap();
        assert_eq!(mapped.upserts(), &[(6, 20), (5, 30)]);
    }
}
