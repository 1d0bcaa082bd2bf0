//! An associative container using hopscotch hashing.
//!
//! Hopscotch hashing keeps every entry within a fixed-size *neighborhood* of
//! its home bucket. Insertion first probes linearly for an empty bucket; if
//! the empty bucket lies beyond the neighborhood, it is repeatedly swapped
//! closer by displacing entries that can move without leaving their own
//! neighborhoods. The payoff is that lookups and removals only ever examine
//! the neighborhood bitmap of a single home bucket, giving constant-time
//! worst-case behavior for those operations as long as the hash function
//! behaves.
//!
//! ## Design
//!
//! The table is a flat array of buckets, each holding one pair plus a 64-bit
//! metadata word: an occupancy flag, an overflow flag, and the neighborhood
//! bitmap of the bucket (bit `i` set means the bucket `i` slots ahead holds
//! an entry homed here). The array carries `N - 1` buckets of tail padding so
//! the last home's neighborhood never wraps; neighborhoods are strictly
//! forward in memory, which keeps the displacement loop free of modular
//! index arithmetic.
//!
//! When the growth ratio is a power-of-two ratio the logical bucket count
//! stays a power of two and home selection is a single mask of the user's
//! hash. Other ratios fall back to a real modulus and pay the division. The
//! hash itself is used as-is; it is never re-mixed.
//!
//! Degenerate hash functions can defeat displacement entirely: more than `N`
//! keys with the same home can never share one neighborhood. Growing the
//! table only helps if the next modulus actually separates the cluster, so
//! insertion checks exactly that before resizing; when a rehash would change
//! nothing, the entry goes to a doubly-linked overflow list hanging off the
//! table and the home bucket is flagged. Lookups only walk that list when
//! the flag says so. Without the spill list, adversarial inputs would force
//! an unbounded resize loop; with it they degrade to a linear scan of the
//! spilled entries.
//!
//! Erasure is exact: clearing the entry's bit in its home bitmap is all the
//! bookkeeping there is. There are no tombstones and nothing cascades.

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::fmt;
use core::hash::BuildHasher;
use core::hash::Hash;
use core::mem;
use core::ops::Index;
use core::ptr::NonNull;

use crate::DefaultHashBuilder;
use crate::bucket::Bucket;
use crate::bucket::MAX_NEIGHBORHOOD;
use crate::overflow::Node;
use crate::overflow::OverflowIter;
use crate::overflow::OverflowIterMut;
use crate::overflow::OverflowList;

/// Logical bucket count of a freshly constructed map.
const DEFAULT_BUCKET_COUNT: usize = 16;

const DEFAULT_MAX_LOAD_FACTOR: f32 = 0.9;

/// Upper bound on the linear probe for an empty bucket before giving up and
/// growing the table.
const PROBE_LIMIT: usize = 4096;

/// An associative container mapping keys to values with hopscotch hashing.
///
/// `HopscotchMap<K, V, S, N, GROWTH_NUM, GROWTH_DEN>` stores key-value pairs
/// where keys implement `Hash + Eq`, hashed by a configurable hasher builder
/// `S`. `N` is the compile-time neighborhood size (`1..=62`) and
/// `GROWTH_NUM / GROWTH_DEN` the compile-time growth ratio applied on every
/// resize (at least 1.1). With the defaults — neighborhood 62, growth 2 —
/// the bucket count stays a power of two and bucket selection is a bitmask.
///
/// Unlike `std::collections::HashMap`, [`insert`](Self::insert) does not
/// overwrite: inserting a key that is already present leaves the stored
/// value untouched and reports it. Use [`entry`](Self::entry) or
/// [`get_mut`](Self::get_mut) to update in place.
///
/// # Examples
///
/// ```rust
/// use hop_map::HopscotchMap;
///
/// let mut map = HopscotchMap::new();
/// map.insert("a", 1);
/// map.insert("b", 2);
///
/// assert_eq!(map.get(&"a"), Some(&1));
/// assert_eq!(map.len(), 2);
/// assert_eq!(map.remove(&"b"), Some(2));
/// assert!(map.get(&"b").is_none());
/// ```
pub struct HopscotchMap<
    K,
    V,
    S = DefaultHashBuilder,
    const N: usize = 62,
    const GROWTH_NUM: usize = 2,
    const GROWTH_DEN: usize = 1,
> {
    /// `bucket_count() + N - 1` buckets; the tail padding lets the last
    /// home's neighborhood extend without wrapping.
    buckets: Box<[Bucket<K, V>]>,
    overflow: OverflowList<K, V>,
    len: usize,
    load_threshold: usize,
    max_load_factor: f32,
    hash_builder: S,
}

impl<K, V> HopscotchMap<K, V, DefaultHashBuilder> {
    /// Creates an empty map with the default bucket count.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use hop_map::HopscotchMap;
    ///
    /// let map: HopscotchMap<u32, &str> = HopscotchMap::new();
    /// assert!(map.is_empty());
    /// ```
    pub fn new() -> Self {
        Self::with_hasher(DefaultHashBuilder::default())
    }

    /// Creates an empty map that can hold at least `capacity` elements
    /// before resizing.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use hop_map::HopscotchMap;
    ///
    /// let map: HopscotchMap<u32, &str> = HopscotchMap::with_capacity(100);
    /// assert!(map.capacity() >= 100);
    /// ```
    pub fn with_capacity(capacity: usize) -> Self {
        Self::with_capacity_and_hasher(capacity, DefaultHashBuilder::default())
    }
}

impl<K, V, S, const N: usize, const GROWTH_NUM: usize, const GROWTH_DEN: usize>
    HopscotchMap<K, V, S, N, GROWTH_NUM, GROWTH_DEN>
{
    /// Rejects impossible configurations when a map is first constructed.
    /// Evaluated at monomorphization time, so a bad `N` or growth ratio is a
    /// compile error rather than a latent panic.
    const CONFIG_OK: () = {
        assert!(N >= 1, "neighborhood size must be at least 1");
        assert!(
            N <= MAX_NEIGHBORHOOD,
            "neighborhood size must leave room for the two flag bits in the 64-bit metadata word",
        );
        assert!(GROWTH_DEN >= 1, "growth ratio denominator must be non-zero");
        assert!(
            10 * GROWTH_NUM >= 11 * GROWTH_DEN,
            "growth ratio must be at least 1.1"
        );
    };

    /// Whether home selection can mask instead of dividing. Holds when the
    /// growth ratio maps powers of two to powers of two.
    const POW2_MOD: bool = GROWTH_NUM.is_power_of_two()
        && GROWTH_DEN.is_power_of_two()
        && GROWTH_NUM % GROWTH_DEN == 0;

    /// Creates an empty map with the default bucket count and the given
    /// hasher builder.
    pub fn with_hasher(hash_builder: S) -> Self {
        Self::with_buckets(DEFAULT_BUCKET_COUNT, hash_builder)
    }

    /// Creates an empty map able to hold at least `capacity` elements before
    /// resizing, using the given hasher builder.
    pub fn with_capacity_and_hasher(capacity: usize, hash_builder: S) -> Self {
        let buckets = Self::buckets_for_capacity(capacity, DEFAULT_MAX_LOAD_FACTOR)
            .max(DEFAULT_BUCKET_COUNT);
        Self::with_buckets(Self::round_bucket_count(buckets), hash_builder)
    }

    /// Creates an empty map with exactly `bucket_count` logical buckets and
    /// the given hasher builder.
    ///
    /// # Panics
    ///
    /// Panics if the growth ratio keeps the bucket count a power of two and
    /// `bucket_count` is not one. A count of zero is treated as one.
    pub fn with_bucket_count_and_hasher(bucket_count: usize, hash_builder: S) -> Self {
        let bucket_count = bucket_count.max(1);
        assert!(
            !Self::POW2_MOD || bucket_count.is_power_of_two(),
            "bucket count must be a power of two under a power-of-two growth ratio",
        );
        Self::with_buckets(bucket_count, hash_builder)
    }

    /// Creates an empty map with exactly `bucket_count` logical buckets.
    ///
    /// See [`with_bucket_count_and_hasher`](Self::with_bucket_count_and_hasher)
    /// for the power-of-two requirement.
    pub fn with_bucket_count(bucket_count: usize) -> Self
    where
        S: Default,
    {
        Self::with_bucket_count_and_hasher(bucket_count, S::default())
    }

    fn with_buckets(bucket_count: usize, hash_builder: S) -> Self {
        let () = Self::CONFIG_OK;

        debug_assert!(bucket_count >= 1);
        let storage = (0..bucket_count + N - 1).map(|_| Bucket::empty()).collect();

        HopscotchMap {
            buckets: storage,
            overflow: OverflowList::new(),
            len: 0,
            load_threshold: Self::threshold(bucket_count, DEFAULT_MAX_LOAD_FACTOR),
            max_load_factor: DEFAULT_MAX_LOAD_FACTOR,
            hash_builder,
        }
    }

    /// Returns the number of elements in the map.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if the map contains no elements.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns the number of logical buckets. The backing array is `N - 1`
    /// buckets longer to give the last bucket a full forward neighborhood.
    pub fn bucket_count(&self) -> usize {
        self.buckets.len() + 1 - N
    }

    /// Returns the number of elements the map can hold before the next
    /// resize.
    pub fn capacity(&self) -> usize {
        self.load_threshold
    }

    /// Returns the current load factor, `len / bucket_count`.
    pub fn load_factor(&self) -> f32 {
        self.len as f32 / self.bucket_count() as f32
    }

    /// Returns the maximum load factor.
    pub fn max_load_factor(&self) -> f32 {
        self.max_load_factor
    }

    /// Returns a reference to the map's hasher builder.
    pub fn hasher(&self) -> &S {
        &self.hash_builder
    }

    /// Removes all elements, keeping the allocated buckets.
    pub fn clear(&mut self) {
        for bucket in self.buckets.iter_mut() {
            bucket.reset();
        }
        self.overflow.clear();
        self.len = 0;
    }

    /// Returns an iterator over the map's key-value pairs in an arbitrary,
    /// unstable order.
    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter {
            buckets: self.buckets.iter(),
            overflow: self.overflow.iter(),
            remaining: self.len,
        }
    }

    /// Returns an iterator over the map's pairs with mutable values.
    pub fn iter_mut(&mut self) -> IterMut<'_, K, V> {
        IterMut {
            buckets: self.buckets.iter_mut(),
            overflow: self.overflow.iter_mut(),
            remaining: self.len,
        }
    }

    /// Returns an iterator over the map's keys.
    pub fn keys(&self) -> Keys<'_, K, V> {
        Keys { inner: self.iter() }
    }

    /// Returns an iterator over the map's values.
    pub fn values(&self) -> Values<'_, K, V> {
        Values { inner: self.iter() }
    }

    /// Returns an iterator over the map's values, mutably.
    pub fn values_mut(&mut self) -> ValuesMut<'_, K, V> {
        ValuesMut {
            inner: self.iter_mut(),
        }
    }

    /// Smallest bucket count whose load threshold admits `capacity`
    /// elements.
    fn buckets_for_capacity(capacity: usize, max_load_factor: f32) -> usize {
        let mut buckets = (capacity as f64 / max_load_factor as f64) as usize;
        while Self::threshold(buckets, max_load_factor) < capacity {
            buckets += 1;
        }
        buckets
    }

    fn threshold(bucket_count: usize, max_load_factor: f32) -> usize {
        (bucket_count as f64 * max_load_factor as f64) as usize
    }

    fn round_bucket_count(bucket_count: usize) -> usize {
        let bucket_count = bucket_count.max(1);
        if Self::POW2_MOD {
            bucket_count.next_power_of_two()
        } else {
            bucket_count
        }
    }

    fn home_for(hash: u64, bucket_count: usize) -> usize {
        if Self::POW2_MOD {
            debug_assert!(bucket_count.is_power_of_two());
            hash as usize & (bucket_count - 1)
        } else {
            hash as usize % bucket_count
        }
    }
}

impl<K, V, S, const N: usize, const GROWTH_NUM: usize, const GROWTH_DEN: usize>
    HopscotchMap<K, V, S, N, GROWTH_NUM, GROWTH_DEN>
where
    K: Hash + Eq,
    S: BuildHasher,
{
    #[inline(always)]
    fn hash_key(&self, key: &K) -> u64 {
        self.hash_builder.hash_one(key)
    }

    #[inline(always)]
    fn home_index(&self, hash: u64) -> usize {
        Self::home_for(hash, self.bucket_count())
    }

    /// Scans the neighborhood bitmap of `home` for `key`, lowest offset
    /// first. Returns the absolute bucket index of the match.
    #[inline]
    fn find_in_buckets(&self, key: &K, home: usize) -> Option<usize> {
        let mut bits = self.buckets[home].neighborhood();
        while bits != 0 {
            let offset = bits.trailing_zeros() as usize;
            bits &= bits - 1;

            let index = home + offset;
            debug_assert!(index < self.buckets.len());
            // SAFETY: A set neighborhood bit always marks a live entry homed
            // at `home`.
            if unsafe { self.buckets[index].pair_ref() }.0 == *key {
                return Some(index);
            }
        }
        None
    }

    /// Walks the overflow list for `key`. Only reached when the home
    /// bucket's overflow flag is set, which degenerate hashing aside never
    /// happens.
    #[cold]
    #[inline(never)]
    fn find_overflow_node(&self, key: &K) -> Option<NonNull<Node<K, V>>> {
        let mut cursor = self.overflow.front();
        while let Some(node) = cursor {
            // SAFETY: Nodes reachable from the list head are live.
            let node_ref = unsafe { node.as_ref() };
            if node_ref.pair.0 == *key {
                return Some(node);
            }
            cursor = node_ref.next();
        }
        None
    }

    /// Returns a reference to the value for `key`, if present.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use hop_map::HopscotchMap;
    ///
    /// let mut map = HopscotchMap::new();
    /// map.insert(1, "a");
    /// assert_eq!(map.get(&1), Some(&"a"));
    /// assert_eq!(map.get(&2), None);
    /// ```
    #[inline]
    pub fn get(&self, key: &K) -> Option<&V> {
        self.get_key_value(key).map(|(_, value)| value)
    }

    /// Returns the stored key-value pair for `key`, if present.
    pub fn get_key_value(&self, key: &K) -> Option<(&K, &V)> {
        let home = self.home_index(self.hash_key(key));

        if let Some(index) = self.find_in_buckets(key, home) {
            // SAFETY: `find_in_buckets` only returns occupied buckets.
            let pair = unsafe { self.buckets[index].pair_ref() };
            return Some((&pair.0, &pair.1));
        }

        if !self.buckets[home].has_overflow() {
            return None;
        }
        self.find_overflow_node(key).map(|node| {
            // SAFETY: The node is live and we hold a shared borrow of the
            // map, so nothing can unlink it while the reference is out.
            let pair = unsafe { &(*node.as_ptr()).pair };
            (&pair.0, &pair.1)
        })
    }

    /// Returns a mutable reference to the value for `key`, if present.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use hop_map::HopscotchMap;
    ///
    /// let mut map = HopscotchMap::new();
    /// map.insert(1, 10);
    /// if let Some(value) = map.get_mut(&1) {
    ///     *value += 1;
    /// }
    /// assert_eq!(map.get(&1), Some(&11));
    /// ```
    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        let home = self.home_index(self.hash_key(key));

        if let Some(index) = self.find_in_buckets(key, home) {
            // SAFETY: `find_in_buckets` only returns occupied buckets.
            return Some(&mut unsafe { self.buckets[index].pair_mut() }.1);
        }

        if !self.buckets[home].has_overflow() {
            return None;
        }
        // SAFETY: The node is live and the map is uniquely borrowed.
        self.find_overflow_node(key)
            .map(|node| unsafe { &mut (*node.as_ptr()).pair.1 })
    }

    /// Returns `true` if the map contains `key`.
    pub fn contains_key(&self, key: &K) -> bool {
        self.get_key_value(key).is_some()
    }

    /// Inserts `key` mapped to `value` if the key is absent.
    ///
    /// Returns a reference to the stored value and `true` if the pair was
    /// newly inserted. If the key was already present the stored value is
    /// left untouched, the supplied `value` is dropped, and the second
    /// element is `false`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use hop_map::HopscotchMap;
    ///
    /// let mut map = HopscotchMap::new();
    /// assert_eq!(map.insert(1, "a"), (&mut "a", true));
    /// // The earlier value wins; use `entry` or `get_mut` to replace it.
    /// assert_eq!(map.insert(1, "b"), (&mut "a", false));
    /// ```
    pub fn insert(&mut self, key: K, value: V) -> (&mut V, bool) {
        let hash = self.hash_key(&key);
        let home = self.home_index(hash);

        if let Some(index) = self.find_in_buckets(&key, home) {
            // SAFETY: `find_in_buckets` only returns occupied buckets.
            return (&mut unsafe { self.buckets[index].pair_mut() }.1, false);
        }
        if self.buckets[home].has_overflow() {
            if let Some(node) = self.find_overflow_node(&key) {
                // SAFETY: The node is live and the map is uniquely borrowed.
                return (unsafe { &mut (*node.as_ptr()).pair.1 }, false);
            }
        }

        (self.insert_vacant(hash, key, value), true)
    }

    /// Gets the entry for `key`, for in-place inspection and insertion.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use hop_map::HopscotchMap;
    ///
    /// let mut map = HopscotchMap::new();
    /// *map.entry("counter").or_insert(0) += 1;
    /// *map.entry("counter").or_insert(0) += 1;
    /// assert_eq!(map.get(&"counter"), Some(&2));
    /// ```
    pub fn entry(&mut self, key: K) -> Entry<'_, K, V, S, N, GROWTH_NUM, GROWTH_DEN> {
        let hash = self.hash_key(&key);
        let home = self.home_index(hash);

        if let Some(index) = self.find_in_buckets(&key, home) {
            return Entry::Occupied(OccupiedEntry {
                map: self,
                home,
                position: EntryPosition::Bucket(index),
            });
        }
        if self.buckets[home].has_overflow() {
            if let Some(node) = self.find_overflow_node(&key) {
                return Entry::Occupied(OccupiedEntry {
                    map: self,
                    home,
                    position: EntryPosition::Spill(node),
                });
            }
        }

        Entry::Vacant(VacantEntry {
            map: self,
            hash,
            key,
        })
    }

    /// Places a pair whose key is known to be absent. The caller supplies
    /// the key's hash.
    fn insert_vacant(&mut self, hash: u64, key: K, value: V) -> &mut V {
        if self.len + 1 > self.load_threshold {
            self.grow();
        }

        let mut home = self.home_index(hash);
        let pair = (key, value);
        loop {
            match self.find_slot(home) {
                SlotSearch::InRange(index) => {
                    // SAFETY: `find_slot` returned an empty bucket within the
                    // neighborhood of `home`.
                    unsafe { self.buckets[index].write_pair(pair) };
                    self.buckets[home].toggle_neighbor(index - home);
                    self.len += 1;
                    // SAFETY: The pair was just written.
                    return &mut unsafe { self.buckets[index].pair_mut() }.1;
                }
                SlotSearch::HopFailed => {
                    // Growing only helps if the next modulus actually splits
                    // this neighborhood apart; a homogeneous cluster spills
                    // instead.
                    if self.rehash_would_move_neighborhood(home) {
                        self.grow();
                        home = self.home_index(hash);
                    } else {
                        let node = self.overflow.push_back(pair);
                        self.buckets[home].set_overflow(true);
                        self.len += 1;
                        // SAFETY: The node was just linked in.
                        return unsafe { &mut (*node.as_ptr()).pair.1 };
                    }
                }
                SlotSearch::ProbeExhausted => {
                    self.grow();
                    home = self.home_index(hash);
                }
            }
        }
    }

    /// Locates an empty bucket serviceable for `home`: probe, then bubble
    /// the empty slot backwards until it lands inside the neighborhood.
    fn find_slot(&mut self, home: usize) -> SlotSearch {
        let Some(mut empty) = self.find_empty_bucket(home) else {
            return SlotSearch::ProbeExhausted;
        };

        while empty - home >= N {
            match self.hop_closer(empty) {
                Some(closer) => empty = closer,
                None => return SlotSearch::HopFailed,
            }
        }
        SlotSearch::InRange(empty)
    }

    fn find_empty_bucket(&self, start: usize) -> Option<usize> {
        let limit = (start + PROBE_LIMIT).min(self.buckets.len());
        (start..limit).find(|&index| self.buckets[index].is_empty())
    }

    /// Moves the empty bucket at `empty` at least one slot backwards by
    /// displacing an entry that stays inside its own neighborhood.
    ///
    /// Candidate homes are scanned ascending from `empty - N + 1`, and
    /// within a home the lowest eligible neighbor offset wins, so the
    /// displacement choice is deterministic.
    fn hop_closer(&mut self, empty: usize) -> Option<usize> {
        debug_assert!(empty >= N);
        debug_assert!(self.buckets[empty].is_empty());

        let start = empty - (N - 1);
        for candidate in start..empty {
            // Offsets whose entry sits below `empty`; anything at or beyond
            // it cannot bring the empty slot closer.
            let movable =
                self.buckets[candidate].neighborhood() & ((1u64 << (empty - candidate)) - 1);
            if movable == 0 {
                continue;
            }

            let offset = movable.trailing_zeros() as usize;
            let from = candidate + offset;

            let (head, tail) = self.buckets.split_at_mut(empty);
            // SAFETY: `from < empty`, the source bucket holds a live entry
            // (its home bit is set) and `empty` was checked empty above.
            unsafe { head[from].move_pair_into(&mut tail[0]) };

            debug_assert!(!self.buckets[candidate].check_neighbor(empty - candidate));
            self.buckets[candidate].toggle_neighbor(offset);
            self.buckets[candidate].toggle_neighbor(empty - candidate);

            return Some(from);
        }
        None
    }

    /// Whether growing to the next capacity would re-home any entry in the
    /// neighborhood of `home`. Only called after a failed hop, at which
    /// point every bucket in the neighborhood is occupied.
    fn rehash_would_move_neighborhood(&self, home: usize) -> bool {
        let current = self.bucket_count();
        let grown = Self::round_bucket_count(self.grown_bucket_count());
        let end = (home + N).min(self.buckets.len());

        for index in home..end {
            debug_assert!(self.buckets[index].is_occupied());
            // SAFETY: A failed hop means the probe saw no empty bucket
            // before the neighborhood's end, so every bucket here is live.
            let pair = unsafe { self.buckets[index].pair_ref() };
            let hash = self.hash_key(&pair.0);
            if Self::home_for(hash, current) != Self::home_for(hash, grown) {
                return true;
            }
        }
        false
    }

    fn grown_bucket_count(&self) -> usize {
        (self.bucket_count() * GROWTH_NUM).div_ceil(GROWTH_DEN)
    }

    #[cold]
    #[inline(never)]
    fn grow(&mut self) {
        self.rehash_to(self.grown_bucket_count());
    }

    /// Rebuilds the table with `bucket_count` logical buckets.
    ///
    /// Bucket entries are moved through the normal placement path — the
    /// fresh table is larger or lightly loaded, so displacement all but
    /// cannot fail; a degenerate cluster falls back to the overflow list
    /// rather than recursing into another resize. The old overflow list is
    /// then spliced in wholesale, node addresses intact, and the overflow
    /// flags of the re-homed entries are re-established.
    fn rehash_to(&mut self, bucket_count: usize) {
        let bucket_count = Self::round_bucket_count(bucket_count);
        let storage: Box<[Bucket<K, V>]> =
            (0..bucket_count + N - 1).map(|_| Bucket::empty()).collect();

        let old_buckets = mem::replace(&mut self.buckets, storage);
        let mut old_overflow = mem::take(&mut self.overflow);
        let old_len = self.len;
        self.len = 0;
        self.load_threshold = Self::threshold(bucket_count, self.max_load_factor);

        for mut bucket in Vec::from(old_buckets) {
            if bucket.is_empty() {
                continue;
            }
            // SAFETY: Occupancy was just checked; taking the pair transfers
            // ownership out of the old array before it is dropped.
            let pair = unsafe { bucket.take_pair() };
            self.place_rehashed(pair);
        }

        if !old_overflow.is_empty() {
            let mut cursor = old_overflow.front();
            while let Some(node) = cursor {
                // SAFETY: Nodes reachable from the list head are live.
                let node_ref = unsafe { node.as_ref() };
                let home = self.home_index(self.hash_key(&node_ref.pair.0));
                self.buckets[home].set_overflow(true);
                cursor = node_ref.next();
            }
            self.len += old_overflow.len();
            self.overflow.append(&mut old_overflow);
        }

        debug_assert_eq!(self.len, old_len);
    }

    fn place_rehashed(&mut self, pair: (K, V)) {
        let hash = self.hash_key(&pair.0);
        let home = self.home_index(hash);

        match self.find_slot(home) {
            SlotSearch::InRange(index) => {
                // SAFETY: `find_slot` returned an empty in-neighborhood
                // bucket.
                unsafe { self.buckets[index].write_pair(pair) };
                self.buckets[home].toggle_neighbor(index - home);
            }
            SlotSearch::HopFailed | SlotSearch::ProbeExhausted => {
                self.overflow.push_back(pair);
                self.buckets[home].set_overflow(true);
            }
        }
        self.len += 1;
    }

    /// Rebuilds the table with at least `bucket_count` logical buckets, or
    /// however many the current population requires, whichever is larger.
    ///
    /// The stored pairs are preserved; their positions generally are not.
    pub fn rehash(&mut self, bucket_count: usize) {
        let required = Self::buckets_for_capacity(self.len, self.max_load_factor);
        self.rehash_to(bucket_count.max(required));
    }

    /// Rebuilds the table so that at least `capacity` elements fit without
    /// another resize. Note that this is a total capacity, not a count of
    /// additional elements.
    pub fn reserve(&mut self, capacity: usize) {
        self.rehash(Self::buckets_for_capacity(capacity, self.max_load_factor));
    }

    /// Sets the maximum load factor, which must be in `(0, 1]`.
    ///
    /// If the map is already loaded beyond the new threshold it is rebuilt
    /// immediately at a capacity that satisfies it.
    ///
    /// # Panics
    ///
    /// Panics if `max_load_factor` is not in `(0, 1]`.
    pub fn set_max_load_factor(&mut self, max_load_factor: f32) {
        assert!(
            max_load_factor > 0.0 && max_load_factor <= 1.0,
            "max load factor must be in (0, 1]",
        );
        self.max_load_factor = max_load_factor;
        self.load_threshold = Self::threshold(self.bucket_count(), max_load_factor);

        if self.len > self.load_threshold {
            self.rehash_to(Self::buckets_for_capacity(self.len, max_load_factor));
        }
    }

    /// Removes `key` from the map, returning its value if it was present.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use hop_map::HopscotchMap;
    ///
    /// let mut map = HopscotchMap::new();
    /// map.insert(1, "a");
    /// assert_eq!(map.remove(&1), Some("a"));
    /// assert_eq!(map.remove(&1), None);
    /// ```
    pub fn remove(&mut self, key: &K) -> Option<V> {
        self.remove_entry(key).map(|(_, value)| value)
    }

    /// Removes `key` from the map, returning the stored pair if it was
    /// present.
    pub fn remove_entry(&mut self, key: &K) -> Option<(K, V)> {
        let home = self.home_index(self.hash_key(key));

        if let Some(index) = self.find_in_buckets(key, home) {
            return Some(self.remove_from_bucket(index, home));
        }
        if !self.buckets[home].has_overflow() {
            return None;
        }
        let node = self.find_overflow_node(key)?;
        Some(self.remove_from_overflow(node, home))
    }

    fn remove_from_bucket(&mut self, index: usize, home: usize) -> (K, V) {
        // SAFETY: The caller located a live entry at `index`.
        let pair = unsafe { self.buckets[index].take_pair() };
        debug_assert!(self.buckets[home].check_neighbor(index - home));
        self.buckets[home].toggle_neighbor(index - home);
        self.len -= 1;
        pair
    }

    fn remove_from_overflow(&mut self, node: NonNull<Node<K, V>>, home: usize) -> (K, V) {
        debug_assert!(self.buckets[home].has_overflow());
        // SAFETY: The caller located `node` in this map's overflow list.
        let pair = unsafe { self.overflow.unlink(node) };
        self.len -= 1;

        if !self.overflow_serves_home(home) {
            self.buckets[home].set_overflow(false);
        }
        pair
    }

    fn overflow_serves_home(&self, home: usize) -> bool {
        self.overflow
            .iter()
            .any(|(key, _)| self.home_index(self.hash_key(key)) == home)
    }

    /// Keeps only the pairs for which `f` returns `true`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use hop_map::HopscotchMap;
    ///
    /// let mut map: HopscotchMap<u32, u32> = (0..8).map(|k| (k, k * 10)).collect();
    /// map.retain(|&k, _| k % 2 == 0);
    /// assert_eq!(map.len(), 4);
    /// ```
    pub fn retain(&mut self, mut f: impl FnMut(&K, &mut V) -> bool) {
        for index in 0..self.buckets.len() {
            if self.buckets[index].is_empty() {
                continue;
            }
            let keep = {
                // SAFETY: Occupancy was just checked.
                let pair = unsafe { self.buckets[index].pair_mut() };
                f(&pair.0, &mut pair.1)
            };
            if keep {
                continue;
            }
            // SAFETY: Still occupied; `f` cannot reach the map.
            let hash = self.hash_key(&unsafe { self.buckets[index].pair_ref() }.0);
            let home = self.home_index(hash);
            drop(self.remove_from_bucket(index, home));
        }

        let mut cursor = self.overflow.front();
        while let Some(node) = cursor {
            // SAFETY: The node is live; the cursor is advanced before any
            // unlink so removal cannot invalidate it.
            let node_ref = unsafe { &mut *node.as_ptr() };
            cursor = node_ref.next();

            if f(&node_ref.pair.0, &mut node_ref.pair.1) {
                continue;
            }
            let home = self.home_index(self.hash_key(&node_ref.pair.0));
            drop(self.remove_from_overflow(node, home));
        }
    }
}

enum SlotSearch {
    /// Empty bucket at this absolute index, within the home's neighborhood.
    InRange(usize),
    /// An empty bucket exists but cannot be bubbled into the neighborhood.
    HopFailed,
    /// No empty bucket within the probe limit.
    ProbeExhausted,
}

enum EntryPosition<K, V> {
    Bucket(usize),
    Spill(NonNull<Node<K, V>>),
}

/// A view into a single entry in the map, which may be vacant or occupied.
///
/// Constructed by the [`entry`](HopscotchMap::entry) method.
pub enum Entry<
    'a,
    K,
    V,
    S = DefaultHashBuilder,
    const N: usize = 62,
    const GROWTH_NUM: usize = 2,
    const GROWTH_DEN: usize = 1,
> {
    /// The key is present in the map.
    Occupied(OccupiedEntry<'a, K, V, S, N, GROWTH_NUM, GROWTH_DEN>),
    /// The key is not present in the map.
    Vacant(VacantEntry<'a, K, V, S, N, GROWTH_NUM, GROWTH_DEN>),
}

impl<'a, K, V, S, const N: usize, const GROWTH_NUM: usize, const GROWTH_DEN: usize>
    Entry<'a, K, V, S, N, GROWTH_NUM, GROWTH_DEN>
where
    K: Hash + Eq,
    S: BuildHasher,
{
    /// Inserts `default` if the entry is vacant; returns a mutable reference
    /// to the stored value either way.
    pub fn or_insert(self, default: V) -> &'a mut V {
        match self {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => entry.insert(default),
        }
    }

    /// Inserts the value computed by `default` if the entry is vacant;
    /// returns a mutable reference to the stored value either way.
    pub fn or_insert_with(self, default: impl FnOnce() -> V) -> &'a mut V {
        match self {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => entry.insert(default()),
        }
    }

    /// Applies `f` to the stored value if the entry is occupied. Returns
    /// `None` without inserting anything if it is vacant.
    pub fn and_modify(self, f: impl FnOnce(&mut V)) -> Option<&'a mut V> {
        match self {
            Entry::Occupied(entry) => {
                let value = entry.into_mut();
                f(value);
                Some(value)
            }
            Entry::Vacant(_) => None,
        }
    }

    /// Inserts `V::default()` if the entry is vacant; returns a mutable
    /// reference to the stored value either way.
    pub fn or_default(self) -> &'a mut V
    where
        V: Default,
    {
        self.or_insert_with(Default::default)
    }
}

/// A view into an occupied entry in the map.
pub struct OccupiedEntry<
    'a,
    K,
    V,
    S = DefaultHashBuilder,
    const N: usize = 62,
    const GROWTH_NUM: usize = 2,
    const GROWTH_DEN: usize = 1,
> {
    map: &'a mut HopscotchMap<K, V, S, N, GROWTH_NUM, GROWTH_DEN>,
    home: usize,
    position: EntryPosition<K, V>,
}

// Safety invariant for OccupiedEntry: the position was produced by a lookup
// on the map the entry mutably borrows, so a bucket index refers to a live
// slot and a spill pointer to a live overflow node for as long as the entry
// exists.
impl<'a, K, V, S, const N: usize, const GROWTH_NUM: usize, const GROWTH_DEN: usize>
    OccupiedEntry<'a, K, V, S, N, GROWTH_NUM, GROWTH_DEN>
where
    K: Hash + Eq,
    S: BuildHasher,
{
    /// Gets a reference to the value.
    pub fn get(&self) -> &V {
        match self.position {
            // SAFETY: See the invariant comment above the impl block.
            EntryPosition::Bucket(index) => &unsafe { self.map.buckets[index].pair_ref() }.1,
            // SAFETY: As above.
            EntryPosition::Spill(node) => unsafe { &(*node.as_ptr()).pair.1 },
        }
    }

    /// Gets a mutable reference to the value.
    pub fn get_mut(&mut self) -> &mut V {
        match self.position {
            // SAFETY: See the invariant comment above the impl block.
            EntryPosition::Bucket(index) => &mut unsafe { self.map.buckets[index].pair_mut() }.1,
            // SAFETY: As above.
            EntryPosition::Spill(node) => unsafe { &mut (*node.as_ptr()).pair.1 },
        }
    }

    /// Converts the entry into a mutable reference to the value, bound to
    /// the map's lifetime.
    pub fn into_mut(self) -> &'a mut V {
        match self.position {
            // SAFETY: See the invariant comment above the impl block.
            EntryPosition::Bucket(index) => &mut unsafe { self.map.buckets[index].pair_mut() }.1,
            // SAFETY: As above.
            EntryPosition::Spill(node) => unsafe { &mut (*node.as_ptr()).pair.1 },
        }
    }

    /// Removes the entry, returning its value.
    pub fn remove(self) -> V {
        self.remove_entry().1
    }

    /// Removes the entry, returning the stored pair.
    pub fn remove_entry(self) -> (K, V) {
        match self.position {
            EntryPosition::Bucket(index) => self.map.remove_from_bucket(index, self.home),
            EntryPosition::Spill(node) => self.map.remove_from_overflow(node, self.home),
        }
    }
}

/// A view into a vacant entry in the map.
pub struct VacantEntry<
    'a,
    K,
    V,
    S = DefaultHashBuilder,
    const N: usize = 62,
    const GROWTH_NUM: usize = 2,
    const GROWTH_DEN: usize = 1,
> {
    map: &'a mut HopscotchMap<K, V, S, N, GROWTH_NUM, GROWTH_DEN>,
    hash: u64,
    key: K,
}

impl<'a, K, V, S, const N: usize, const GROWTH_NUM: usize, const GROWTH_DEN: usize>
    VacantEntry<'a, K, V, S, N, GROWTH_NUM, GROWTH_DEN>
where
    K: Hash + Eq,
    S: BuildHasher,
{
    /// Inserts `value` and returns a mutable reference to it.
    pub fn insert(self, value: V) -> &'a mut V {
        let VacantEntry { map, hash, key } = self;
        map.insert_vacant(hash, key, value)
    }
}

/// An iterator over a map's key-value pairs.
///
/// Created by [`HopscotchMap::iter`]. The order is arbitrary and unstable:
/// any insertion that displaces entries or resizes the table may change it.
pub struct Iter<'a, K, V> {
    buckets: core::slice::Iter<'a, Bucket<K, V>>,
    overflow: OverflowIter<'a, K, V>,
    remaining: usize,
}

impl<'a, K, V> Iterator for Iter<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        for bucket in self.buckets.by_ref() {
            if bucket.is_occupied() {
                self.remaining -= 1;
                // SAFETY: Occupancy was just checked.
                let pair = unsafe { bucket.pair_ref() };
                return Some((&pair.0, &pair.1));
            }
        }
        self.overflow.next().map(|pair| {
            self.remaining -= 1;
            (&pair.0, &pair.1)
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<K, V> ExactSizeIterator for Iter<'_, K, V> {}

/// An iterator over a map's pairs yielding mutable value references.
///
/// Created by [`HopscotchMap::iter_mut`].
pub struct IterMut<'a, K, V> {
    buckets: core::slice::IterMut<'a, Bucket<K, V>>,
    overflow: OverflowIterMut<'a, K, V>,
    remaining: usize,
}

impl<'a, K, V> Iterator for IterMut<'a, K, V> {
    type Item = (&'a K, &'a mut V);

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        for bucket in self.buckets.by_ref() {
            if bucket.is_occupied() {
                self.remaining -= 1;
                // SAFETY: Occupancy was just checked.
                let pair = unsafe { bucket.pair_mut() };
                return Some((&pair.0, &mut pair.1));
            }
        }
        self.overflow.next().map(|pair| {
            self.remaining -= 1;
            (&pair.0, &mut pair.1)
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<K, V> ExactSizeIterator for IterMut<'_, K, V> {}

/// An owning iterator over a map's key-value pairs.
///
/// Created by `into_iter` on a map by value.
pub struct IntoIter<K, V> {
    buckets: alloc::vec::IntoIter<Bucket<K, V>>,
    overflow: OverflowList<K, V>,
    remaining: usize,
}

impl<K, V> Iterator for IntoIter<K, V> {
    type Item = (K, V);

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        for mut bucket in self.buckets.by_ref() {
            if bucket.is_occupied() {
                self.remaining -= 1;
                // SAFETY: Occupancy was just checked; taking the pair leaves
                // the bucket empty for its own drop.
                return Some(unsafe { bucket.take_pair() });
            }
        }
        self.overflow.pop_front().map(|pair| {
            self.remaining -= 1;
            pair
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<K, V> ExactSizeIterator for IntoIter<K, V> {}

/// An iterator over a map's keys. Created by [`HopscotchMap::keys`].
pub struct Keys<'a, K, V> {
    inner: Iter<'a, K, V>,
}

impl<'a, K, V> Iterator for Keys<'a, K, V> {
    type Item = &'a K;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|(key, _)| key)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

/// An iterator over a map's values. Created by [`HopscotchMap::values`].
pub struct Values<'a, K, V> {
    inner: Iter<'a, K, V>,
}

impl<'a, K, V> Iterator for Values<'a, K, V> {
    type Item = &'a V;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|(_, value)| value)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

/// A mutable iterator over a map's values. Created by
/// [`HopscotchMap::values_mut`].
pub struct ValuesMut<'a, K, V> {
    inner: IterMut<'a, K, V>,
}

impl<'a, K, V> Iterator for ValuesMut<'a, K, V> {
    type Item = &'a mut V;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|(_, value)| value)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<K, V, S, const N: usize, const GROWTH_NUM: usize, const GROWTH_DEN: usize> IntoIterator
    for HopscotchMap<K, V, S, N, GROWTH_NUM, GROWTH_DEN>
{
    type Item = (K, V);
    type IntoIter = IntoIter<K, V>;

    fn into_iter(self) -> IntoIter<K, V> {
        let HopscotchMap {
            buckets,
            overflow,
            len,
            ..
        } = self;
        IntoIter {
            buckets: Vec::from(buckets).into_iter(),
            overflow,
            remaining: len,
        }
    }
}

impl<'a, K, V, S, const N: usize, const GROWTH_NUM: usize, const GROWTH_DEN: usize> IntoIterator
    for &'a HopscotchMap<K, V, S, N, GROWTH_NUM, GROWTH_DEN>
{
    type Item = (&'a K, &'a V);
    type IntoIter = Iter<'a, K, V>;

    fn into_iter(self) -> Iter<'a, K, V> {
        self.iter()
    }
}

impl<'a, K, V, S, const N: usize, const GROWTH_NUM: usize, const GROWTH_DEN: usize> IntoIterator
    for &'a mut HopscotchMap<K, V, S, N, GROWTH_NUM, GROWTH_DEN>
{
    type Item = (&'a K, &'a mut V);
    type IntoIter = IterMut<'a, K, V>;

    fn into_iter(self) -> IterMut<'a, K, V> {
        self.iter_mut()
    }
}

impl<K, V, S, const N: usize, const GROWTH_NUM: usize, const GROWTH_DEN: usize> Default
    for HopscotchMap<K, V, S, N, GROWTH_NUM, GROWTH_DEN>
where
    S: Default,
{
    fn default() -> Self {
        Self::with_hasher(S::default())
    }
}

impl<K, V, S, const N: usize, const GROWTH_NUM: usize, const GROWTH_DEN: usize> Clone
    for HopscotchMap<K, V, S, N, GROWTH_NUM, GROWTH_DEN>
where
    K: Clone,
    V: Clone,
    S: Clone,
{
    fn clone(&self) -> Self {
        HopscotchMap {
            buckets: self.buckets.clone(),
            overflow: self.overflow.clone(),
            len: self.len,
            load_threshold: self.load_threshold,
            max_load_factor: self.max_load_factor,
            hash_builder: self.hash_builder.clone(),
        }
    }
}

impl<K, V, S, const N: usize, const GROWTH_NUM: usize, const GROWTH_DEN: usize> fmt::Debug
    for HopscotchMap<K, V, S, N, GROWTH_NUM, GROWTH_DEN>
where
    K: fmt::Debug,
    V: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl<K, V, S, const N: usize, const GROWTH_NUM: usize, const GROWTH_DEN: usize> PartialEq
    for HopscotchMap<K, V, S, N, GROWTH_NUM, GROWTH_DEN>
where
    K: Hash + Eq,
    V: PartialEq,
    S: BuildHasher,
{
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len()
            && self
                .iter()
                .all(|(key, value)| other.get(key).map_or(false, |v| *v == *value))
    }
}

impl<K, V, S, const N: usize, const GROWTH_NUM: usize, const GROWTH_DEN: usize> Eq
    for HopscotchMap<K, V, S, N, GROWTH_NUM, GROWTH_DEN>
where
    K: Hash + Eq,
    V: Eq,
    S: BuildHasher,
{
}

impl<K, V, S, const N: usize, const GROWTH_NUM: usize, const GROWTH_DEN: usize> Index<&K>
    for HopscotchMap<K, V, S, N, GROWTH_NUM, GROWTH_DEN>
where
    K: Hash + Eq,
    S: BuildHasher,
{
    type Output = V;

    /// # Panics
    ///
    /// Panics if the key is not present.
    fn index(&self, key: &K) -> &V {
        self.get(key).expect("no entry found for key")
    }
}

impl<K, V, S, const N: usize, const GROWTH_NUM: usize, const GROWTH_DEN: usize> Extend<(K, V)>
    for HopscotchMap<K, V, S, N, GROWTH_NUM, GROWTH_DEN>
where
    K: Hash + Eq,
    S: BuildHasher,
{
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        for (key, value) in iter {
            self.insert(key, value);
        }
    }
}

impl<K, V, S, const N: usize, const GROWTH_NUM: usize, const GROWTH_DEN: usize> FromIterator<(K, V)>
    for HopscotchMap<K, V, S, N, GROWTH_NUM, GROWTH_DEN>
where
    K: Hash + Eq,
    S: BuildHasher + Default,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let iter = iter.into_iter();
        let mut map = Self::with_capacity_and_hasher(iter.size_hint().0, S::default());
        map.extend(iter);
        map
    }
}

impl<K, V, const M: usize> From<[(K, V); M]> for HopscotchMap<K, V>
where
    K: Hash + Eq,
{
    fn from(pairs: [(K, V); M]) -> Self {
        Self::from_iter(pairs)
    }
}

#[cfg(test)]
impl<K, V, S, const N: usize, const GROWTH_NUM: usize, const GROWTH_DEN: usize>
    HopscotchMap<K, V, S, N, GROWTH_NUM, GROWTH_DEN>
where
    K: Hash + Eq + Ord,
    S: BuildHasher,
{
    /// Asserts every structural invariant of the table at once.
    fn check_invariants(&self) {
        let bucket_count = self.bucket_count();

        // Neighborhood bits mark live, home-matching entries; the tail
        // padding is never a home.
        for home in 0..self.buckets.len() {
            let mut bits = self.buckets[home].neighborhood();
            if home >= bucket_count {
                assert_eq!(bits, 0, "tail bucket {home} has neighborhood bits");
                assert!(!self.buckets[home].has_overflow());
            }
            while bits != 0 {
                let offset = bits.trailing_zeros() as usize;
                bits &= bits - 1;

                assert!(offset < N);
                let index = home + offset;
                assert!(index < self.buckets.len());
                assert!(self.buckets[index].is_occupied());
                let pair = unsafe { self.buckets[index].pair_ref() };
                assert_eq!(self.home_index(self.hash_key(&pair.0)), home);
            }
        }

        // Conversely, every live entry is inside its home's neighborhood and
        // flagged there.
        let mut live = 0;
        for index in 0..self.buckets.len() {
            if self.buckets[index].is_empty() {
                continue;
            }
            live += 1;
            let pair = unsafe { self.buckets[index].pair_ref() };
            let home = self.home_index(self.hash_key(&pair.0));
            assert!(index >= home && index - home < N);
            assert!(self.buckets[home].check_neighbor(index - home));
        }

        // Overflow flags match the overflow list's contents.
        for home in 0..bucket_count {
            assert_eq!(
                self.buckets[home].has_overflow(),
                self.overflow_serves_home(home),
                "overflow flag mismatch at bucket {home}",
            );
        }

        assert_eq!(self.len, live + self.overflow.len());
        assert!(self.len <= self.load_threshold);

        // No duplicate keys across buckets and overflow.
        let mut keys: Vec<&K> = self.iter().map(|(key, _)| key).collect();
        keys.sort();
        for window in keys.windows(2) {
            assert!(window[0] != window[1], "duplicate key stored");
        }
    }
}
