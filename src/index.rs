//! Ordered index of `(high16 key, container)` entries with copy-on-write
//! sharing.
//!
//! Keys are strictly ascending. Containers sit behind `Arc`: an entry
//! whose `Arc` is shared with another index is copy-on-write marked by
//! that very sharing, and [`RoaringArray::get_writable_container_at`]
//! clones it out before any mutation reaches it.

use std::sync::Arc;

use crate::container::Container;
use crate::kernels;

/// Parallel key/container vectors forming the top level of a bitmap.
#[derive(Debug, Clone, Default)]
pub struct RoaringArray {
    keys: Vec<u16>,
    containers: Vec<Arc<Container>>,
}

impl RoaringArray {
    pub fn new() -> Self {
        RoaringArray {
            keys: Vec::new(),
            containers: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn key_at(&self, i: usize) -> u16 {
        self.keys[i]
    }

    pub fn container_at(&self, i: usize) -> &Container {
        &self.containers[i]
    }

    pub fn arc_at(&self, i: usize) -> &Arc<Container> {
        &self.containers[i]
    }

    /// Binary search for `key`; `Err` carries the insertion index.
    pub fn position_of_key(&self, key: u16) -> Result<usize, usize> {
        self.keys.binary_search(&key)
    }

    /// First index `i >= from` whose key is `>= key`, or `len`.
    pub fn advance_until(&self, key: u16, from: usize) -> usize {
        kernels::advance_until(&self.keys, from, self.keys.len(), key)
    }

    /// A container guaranteed unique to this index: shared entries are
    /// cloned out and the sharing severed before the reference is handed
    /// back.
    pub fn get_writable_container_at(&mut self, i: usize) -> &mut Container {
        Arc::make_mut(&mut self.containers[i])
    }

    /// Splice a new entry in at `i`, preserving key order.
    pub fn insert_at(&mut self, i: usize, key: u16, container: Arc<Container>) {
        debug_assert!(i == 0 || self.keys[i - 1] < key);
        debug_assert!(i == self.keys.len() || key < self.keys[i]);
        self.keys.insert(i, key);
        self.containers.insert(i, container);
    }

    pub fn replace_container_at(&mut self, i: usize, container: Arc<Container>) {
        self.containers[i] = container;
    }

    /// Replace both halves of an entry. The key must preserve ordering
    /// with its neighbors.
    pub fn replace_key_and_container_at(&mut self, i: usize, key: u16, container: Arc<Container>) {
        debug_assert!(i == 0 || self.keys[i - 1] < key);
        debug_assert!(i + 1 >= self.keys.len() || key < self.keys[i + 1]);
        self.keys[i] = key;
        self.containers[i] = container;
    }

    pub fn remove_at(&mut self, i: usize) {
        self.keys.remove(i);
        self.containers.remove(i);
    }

    /// Append an entry whose key is strictly greater than all present keys.
    pub fn append(&mut self, key: u16, container: Arc<Container>) {
        debug_assert!(self.keys.last().map_or(true, |&last| last < key));
        self.keys.push(key);
        self.containers.push(container);
    }

    /// Append, or union into the last entry when the key collides.
    pub fn append_or_merge(&mut self, key: u16, container: Container) {
        if container.is_empty() {
            return;
        }
        match self.keys.last() {
            Some(&last) if last == key => {
                let merged = self.container_at(self.len() - 1).or(&container);
                let i = self.len() - 1;
                self.replace_container_at(i, Arc::new(merged));
            }
            _ => self.append(key, Arc::new(container)),
        }
    }

    /// Consume the index into its entries, in key order.
    pub fn into_entries(self) -> impl Iterator<Item = (u16, Arc<Container>)> {
        self.keys.into_iter().zip(self.containers)
    }

    /// Iterate entries by reference, in key order.
    pub fn entries(&self) -> impl Iterator<Item = (u16, &Container)> {
        self.keys
            .iter()
            .copied()
            .zip(self.containers.iter().map(|c| &**c))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::ArrayContainer;
    use pretty_assertions::assert_eq;

    fn container_of(values: &[u16]) -> Arc<Container> {
        Arc::new(Container::Array(ArrayContainer::from_sorted_vec(
            values.to_vec(),
        )))
    }

    #[test]
    fn test_ordering_operations() {
        let mut ra = RoaringArray::new();
        ra.append(1, container_of(&[5]));
        ra.append(7, container_of(&[6]));
        ra.insert_at(1, 3, container_of(&[7]));
        assert_eq!(ra.len(), 3);
        assert_eq!(ra.key_at(0), 1);
        assert_eq!(ra.key_at(1), 3);
        assert_eq!(ra.key_at(2), 7);
        assert_eq!(ra.position_of_key(3), Ok(1));
        assert_eq!(ra.position_of_key(4), Err(2));
        assert_eq!(ra.advance_until(4, 0), 2);
        assert_eq!(ra.advance_until(8, 0), 3);
        ra.remove_at(1);
        assert_eq!(ra.len(), 2);
        assert_eq!(ra.key_at(1), 7);
    }

    #[test]
    fn test_writable_container_severs_sharing() {
        let mut a = RoaringArray::new();
        a.append(0, container_of(&[1, 2, 3]));
        let mut b = a.clone();

        // Mutating through one index must not reach the other.
        b.get_writable_container_at(0).iadd(4);
        assert_eq!(a.container_at(0).cardinality(), 3);
        assert_eq!(b.container_at(0).cardinality(), 4);
    }

    #[test]
    fn test_append_or_merge() {
        let mut ra = RoaringArray::new();
        ra.append_or_merge(2, Container::Array(ArrayContainer::from_sorted_vec(vec![1])));
        ra.append_or_merge(2, Container::Array(ArrayContainer::from_sorted_vec(vec![9])));
        ra.append_or_merge(3, Container::Array(ArrayContainer::from_sorted_vec(vec![4])));
        assert_eq!(ra.len(), 2);
        assert_eq!(ra.container_at(0).iter().collect::<Vec<_>>(), vec![1, 9]);
    }
}
