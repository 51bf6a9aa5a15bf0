//! A limiter for [`schnellru`] which bounds a cache by the total number of
//! bytes held in its keys and values.

use core::marker::PhantomData;

/// Calculates the number of bytes an entry holds for a [`ByteSize`] limiter.
pub trait EntrySize {
    /// The key type of the map.
    type Key;
    /// The value type of the map.
    type Value;

    /// Calculates the size of an entry.
    fn size_of(key: &Self::Key, value: &Self::Value) -> usize;
}

/// A limiter for a map which is limited by the heap size of its entries.
#[derive(Copy, Clone, Debug)]
pub struct ByteSize<T: EntrySize> {
    /// Current heap usage of all entries.
    heap_size: usize,
    /// Maximum allowed usage.
    max_bytes: usize,
    __: PhantomData<T>,
}

impl<T: EntrySize> ByteSize<T> {
    /// Creates a new limiter with a given limit in bytes.
    pub const fn new(max_bytes: usize) -> Self {
        Self {
            heap_size: 0,
            max_bytes,
            __: PhantomData,
        }
    }

    /// The number of bytes currently used by the entries of the map.
    #[inline]
    pub fn heap_usage(&self) -> usize {
        self.heap_size
    }
}

impl<T: EntrySize> schnellru::Limiter<T::Key, T::Value> for ByteSize<T> {
    type KeyToInsert<'a> = T::Key;
    type LinkType = u32;

    #[inline]
    fn is_over_the_limit(&self, _: usize) -> bool {
        self.heap_size > self.max_bytes
    }

    #[inline]
    fn on_insert(
        &mut self,
        _: usize,
        key: Self::KeyToInsert<'_>,
        value: T::Value,
    ) -> Option<(T::Key, T::Value)> {
        let new_size = T::size_of(&key, &value);
        // Entries larger than the whole budget are never stored
        (new_size <= self.max_bytes).then(|| {
            self.heap_size += new_size;
            (key, value)
        })
    }

    #[inline]
    fn on_replace(
        &mut self,
        _: usize,
        old_key: &mut T::Key,
        _: T::Key,
        old_value: &mut T::Value,
        new_value: &mut T::Value,
    ) -> bool {
        let old_size = T::size_of(old_key, old_value);
        let new_size = T::size_of(old_key, new_value);
        if new_size <= self.max_bytes {
            self.heap_size = self.heap_size - old_size + new_size;
            true
        } else {
            false
        }
    }

    #[inline]
    fn on_removed(&mut self, key: &mut T::Key, value: &mut T::Value) {
        self.heap_size -= T::size_of(key, value);
    }

    #[inline]
    fn on_cleared(&mut self) {
        self.heap_size = 0;
    }

    #[inline]
    fn on_grow(&mut self, new_memory_usage: usize) -> bool {
        new_memory_usage <= self.max_bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use schnellru::LruMap;

    struct Text;
    impl EntrySize for Text {
        type Key = String;
        type Value = String;

        fn size_of(key: &String, value: &String) -> usize {
            key.len() + value.len()
        }
    }

    #[test]
    fn evicts_by_byte_size() {
        let mut map = LruMap::new(ByteSize::<Text>::new(64 * 1024));
        map.insert("a".to_string(), "x".repeat(30 * 1024));
        map.insert("b".to_string(), "y".repeat(30 * 1024));
        assert_eq!(map.len(), 2, "both entries should fit");
        map.insert("c".to_string(), "z".repeat(30 * 1024));
        assert!(map.peek("a").is_none(), "oldest entry should be evicted");
        assert!(map.peek("c").is_some(), "newest entry should be kept");
        assert!(
            map.limiter().heap_usage() <= 64 * 1024,
            "heap usage should stay within the limit"
        );
    }

    #[test]
    fn rejects_oversized_entries() {
        let mut map = LruMap::new(ByteSize::<Text>::new(1024));
        map.insert("a".to_string(), "x".repeat(2048));
        assert!(map.is_empty(), "oversized entry should not be inserted");
        assert_eq!(map.limiter().heap_usage(), 0);
    }
}
