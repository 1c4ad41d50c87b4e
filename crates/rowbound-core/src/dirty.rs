//! Per-instance dirty tracking.
//!
//! Each entity embeds a [`DirtySet`] recording which fields changed since the
//! instance was loaded or last persisted. Bit `i` corresponds to
//! `Entity::fields()[i]`. A partial UPDATE writes exactly the marked fields,
//! and a successful insert or update clears the set.

/// Bitset of changed field positions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct DirtySet {
    words: Vec<u64>,
}

impl DirtySet {
    pub const fn new() -> Self {
        Self { words: Vec::new() }
    }

    /// Mark field `index` as changed.
    pub fn mark(&mut self, index: usize) {
        let (word, bit) = (index / 64, index % 64);
        if self.words.len() <= word {
            self.words.resize(word + 1, 0);
        }
        self.words[word] |= 1 << bit;
    }

    pub fn unmark(&mut self, index: usize) {
        if let Some(word) = self.words.get_mut(index / 64) {
            *word &= !(1 << (index % 64));
        }
    }

    pub fn is_marked(&self, index: usize) -> bool {
        self.words
            .get(index / 64)
            .is_some_and(|word| word & (1 << (index % 64)) != 0)
    }

    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|w| *w == 0)
    }

    /// Number of marked fields.
    pub fn len(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    pub fn clear(&mut self) {
        self.words.clear();
    }

    /// Marked positions in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.words.iter().enumerate().flat_map(|(w, word)| {
            (0..64).filter_map(move |bit| (word & (1 << bit) != 0).then_some(w * 64 + bit))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mark_and_query() {
        let mut dirty = DirtySet::new();
        assert!(dirty.is_empty());

        dirty.mark(1);
        dirty.mark(3);
        assert!(dirty.is_marked(1));
        assert!(!dirty.is_marked(2));
        assert_eq!(dirty.len(), 2);
        assert_eq!(dirty.iter().collect::<Vec<_>>(), vec![1, 3]);
    }

    #[test]
    fn test_wide_entities() {
        let mut dirty = DirtySet::new();
        dirty.mark(70);
        dirty.mark(0);
        assert!(dirty.is_marked(70));
        assert!(!dirty.is_marked(6));
        assert_eq!(dirty.iter().collect::<Vec<_>>(), vec![0, 70]);
    }

    #[test]
    fn test_unmark_and_clear() {
        let mut dirty = DirtySet::new();
        dirty.mark(2);
        dirty.mark(5);
        dirty.unmark(2);
        dirty.unmark(400);
        assert_eq!(dirty.iter().collect::<Vec<_>>(), vec![5]);

        dirty.clear();
        assert!(dirty.is_empty());
        assert_eq!(dirty, DirtySet::default());
    }
}
