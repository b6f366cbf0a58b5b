use crate::error::IndexError;
use crate::slot::{self, Slot, ValueBuf, MAX_KEY_LEN};

/// Fixed seed so that two processes (or two runs) hash the same key to the
/// same bucket; the table is never exposed to attacker-controlled seeding.
const HASH_SEED: u64 = 0x4b56_5352_5600_0001;

/// Table refuses new inserts once live+tombstone occupancy would cross a
/// 0.7 load factor, rather than growing on its own; growth only happens
/// when the caller calls [`Table::grow`].
const MAX_LOAD_NUM: usize = 7;
const MAX_LOAD_DEN: usize = 10;

const MIN_CAPACITY: usize = 8;

#[inline]
fn hash_key(key: &[u8]) -> u64 {
    xxhash_rust::xxh64::xxh64(key, HASH_SEED)
}

fn next_power_of_two(n: usize) -> usize {
    n.max(MIN_CAPACITY).next_power_of_two()
}

/// Key/value bytes handed back to the caller for disposal after an insert
/// that displaced an existing allocation. The caller owns these and is free
/// to drop them immediately; the table never touches them again.
pub struct Reclaim {
    pub key: Box<[u8]>,
    pub value: ValueBuf,
}

/// Result of [`Table::insert`].
pub enum Outcome {
    /// The key was not present; it now occupies a previously-unused slot.
    Inserted,
    /// The key was present and live; its value and expiry were replaced in
    /// place. The resident key allocation is untouched — `reclaim.key` is
    /// the *new* key the caller passed in (now redundant) and `reclaim.value`
    /// is the value that was just displaced.
    Replaced(Reclaim),
    /// The key landed on a tombstone left behind by a prior [`Table::take`].
    /// No prior allocation exists at this slot, so there is nothing to
    /// reclaim.
    InsertedOverReleased,
    /// The key matched a resident entry that had already passed its expiry
    /// but had not yet been lazily reaped. The stale entry is torn down as
    /// part of this insert and handed back in `reclaim`.
    InsertedOverExpired(Reclaim),
    /// The table has no room for a new key and must be grown by the caller
    /// before the insert can succeed. The key and value are handed back
    /// untouched.
    Full { key: Box<[u8]>, value: ValueBuf },
}

enum Probe {
    /// Index of a live, non-expired slot whose key matches.
    FoundLive(usize),
    /// Index of a live slot whose key matches but has expired.
    FoundExpired(usize),
    /// No matching key; insert at this index (a free slot or a tombstone).
    Vacant(usize),
    /// The table was scanned end to end with no free slot or tombstone.
    Full,
}

/// A cache-line-tuned open-addressing hash index with lazy TTL expiration.
///
/// The table never grows on its own: [`Table::insert`] returns
/// [`Outcome::Full`] once occupancy crosses its load-factor ceiling, and the
/// caller must explicitly call [`Table::grow`] to make more room. This
/// mirrors the "authorized resize" rule the dispatcher enforces against
/// accidental unbounded memory growth from a single oversized batch.
pub struct Table {
    slots: Box<[Slot]>,
    capacity: usize,
    len: usize,
    tombstones: usize,
}

impl Table {
    /// Builds a table whose capacity is the next power of two at or above
    /// `initial_capacity` (with a floor of 8 slots).
    pub fn new(initial_capacity: usize) -> Self {
        let capacity = next_power_of_two(initial_capacity);
        Table {
            slots: vec![Slot::EMPTY; capacity].into_boxed_slice(),
            capacity,
            len: 0,
            tombstones: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of live entries, including ones that have expired but have
    /// not yet been lazily reaped by a `get`/`take`/`touch` call.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    fn mask(&self) -> usize {
        self.capacity - 1
    }

    fn probe(&self, hash: u64, key: &[u8], now: u32) -> Probe {
        let mask = self.mask();
        let start = (hash as usize) & mask;
        let mut first_vacant: Option<usize> = None;
        let mut idx = start;
        for _ in 0..self.capacity {
            let slot = &self.slots[idx];
            if slot.is_free() {
                return Probe::Vacant(first_vacant.unwrap_or(idx));
            }
            if slot.tombstone() {
                if first_vacant.is_none() {
                    first_vacant = Some(idx);
                }
            } else if slot.hash == hash && slot.key_len() == key.len() && slot.key() == key {
                let expires_at = slot.expires_at();
                return if expires_at != 0 && now >= expires_at {
                    Probe::FoundExpired(idx)
                } else {
                    Probe::FoundLive(idx)
                };
            }
            idx = (idx + 1) & mask;
        }
        match first_vacant {
            Some(i) => Probe::Vacant(i),
            None => Probe::Full,
        }
    }

    fn ttl_to_expires_at(ttl: Option<u32>, now: u32) -> u32 {
        match ttl {
            None => 0,
            Some(seconds) => now.saturating_add(seconds).max(1),
        }
    }

    /// Inserts `key`/`value`, expiring after `ttl` seconds from `now` (or
    /// never, if `ttl` is `None`). Takes ownership of both on every outcome
    /// except [`Outcome::Full`], where they are returned untouched.
    pub fn insert(
        &mut self,
        key: Box<[u8]>,
        value: ValueBuf,
        ttl: Option<u32>,
        now: u32,
    ) -> Result<Outcome, IndexError> {
        if key.len() > MAX_KEY_LEN {
            return Err(IndexError::KeyTooLong { len: key.len(), max: MAX_KEY_LEN });
        }
        let hash = hash_key(&key);
        if (self.len + 1) * MAX_LOAD_DEN >= self.capacity * MAX_LOAD_NUM {
            return Ok(Outcome::Full { key, value });
        }
        let expires_at = Self::ttl_to_expires_at(ttl, now);
        match self.probe(hash, &key, now) {
            Probe::Full => Ok(Outcome::Full { key, value }),
            Probe::Vacant(idx) => {
                let was_tombstone = self.slots[idx].tombstone();
                let (key_ptr, key_len) = slot::alloc_key(&key);
                let value_ptr = value.into_raw();
                self.slots[idx].occupy(hash, key_ptr, key_len, value_ptr, expires_at);
                if was_tombstone {
                    self.tombstones -= 1;
                    self.len += 1;
                    Ok(Outcome::InsertedOverReleased)
                } else {
                    self.len += 1;
                    Ok(Outcome::Inserted)
                }
            }
            Probe::FoundLive(idx) => {
                let old_value_ptr = self.slots[idx].value_ptr;
                self.slots[idx].value_ptr = value.into_raw();
                self.slots[idx].set_expires_at(expires_at);
                let old_value = unsafe { ValueBuf::from_raw(old_value_ptr) };
                Ok(Outcome::Replaced(Reclaim { key, value: old_value }))
            }
            Probe::FoundExpired(idx) => {
                let old_key_ptr = self.slots[idx].key_ptr;
                let old_key_len = self.slots[idx].key_len();
                let old_value_ptr = self.slots[idx].value_ptr;
                let (key_ptr, key_len) = slot::alloc_key(&key);
                let value_ptr = value.into_raw();
                self.slots[idx].occupy(hash, key_ptr, key_len, value_ptr, expires_at);
                let old_key = unsafe { slot::free_key(old_key_ptr, old_key_len) };
                let old_value = unsafe { ValueBuf::from_raw(old_value_ptr) };
                Ok(Outcome::InsertedOverExpired(Reclaim { key: old_key, value: old_value }))
            }
        }
    }

    /// Borrows the value for `key`, or `None` if absent or expired.
    /// Expired entries are left in place untouched — reaping only happens
    /// through [`Table::take`] or [`Table::touch`], which have `&mut self`.
    pub fn get(&self, key: &[u8], now: u32) -> Option<&[u8]> {
        let hash = hash_key(key);
        match self.probe(hash, key, now) {
            Probe::FoundLive(idx) => Some(self.slots[idx].value_as_slice()),
            _ => None,
        }
    }

    /// Removes `key` and returns its owned key and value. Returns `None` if
    /// absent; if present but expired, the stale entry is reaped (its
    /// allocations freed) and `None` is returned.
    pub fn take(&mut self, key: &[u8], now: u32) -> Option<(Box<[u8]>, ValueBuf)> {
        let hash = hash_key(key);
        match self.probe(hash, key, now) {
            Probe::FoundLive(idx) => {
                let key_ptr = self.slots[idx].key_ptr;
                let key_len = self.slots[idx].key_len();
                let value_ptr = self.slots[idx].value_ptr;
                self.slots[idx].release();
                self.len -= 1;
                self.tombstones += 1;
                let owned_key = unsafe { slot::free_key(key_ptr, key_len) };
                let owned_value = unsafe { ValueBuf::from_raw(value_ptr) };
                Some((owned_key, owned_value))
            }
            Probe::FoundExpired(idx) => {
                self.reap(idx);
                None
            }
            Probe::Vacant(_) | Probe::Full => None,
        }
    }

    /// Updates the expiry of a live entry without touching its value.
    /// Returns `false` if the key is absent or already expired (in which
    /// case an expired entry is reaped).
    pub fn touch(&mut self, key: &[u8], ttl: Option<u32>, now: u32) -> bool {
        let hash = hash_key(key);
        match self.probe(hash, key, now) {
            Probe::FoundLive(idx) => {
                self.slots[idx].set_expires_at(Self::ttl_to_expires_at(ttl, now));
                true
            }
            Probe::FoundExpired(idx) => {
                self.reap(idx);
                false
            }
            Probe::Vacant(_) | Probe::Full => false,
        }
    }

    /// Frees the key/value of an expired-but-not-yet-removed slot and turns
    /// it into a released tombstone, the same state [`Table::take`] leaves
    /// behind.
    fn reap(&mut self, idx: usize) {
        let key_ptr = self.slots[idx].key_ptr;
        let key_len = self.slots[idx].key_len();
        let value_ptr = self.slots[idx].value_ptr;
        self.slots[idx].release();
        self.len -= 1;
        self.tombstones += 1;
        unsafe {
            drop(slot::free_key(key_ptr, key_len));
            drop(ValueBuf::from_raw(value_ptr));
        }
    }

    /// Rebuilds the table at a new capacity, rehashing every live entry
    /// (expired or not — lazy expiration keeps working afterward) and
    /// dropping tombstones. The caller decides when this runs; the table
    /// never calls it on its own.
    pub fn grow(&mut self, requested_capacity: usize) -> Result<(), IndexError> {
        if requested_capacity < self.len {
            return Err(IndexError::CapacityOverflow { requested: requested_capacity });
        }
        let new_capacity = next_power_of_two(requested_capacity.max(self.capacity + 1));
        let mut new_slots = vec![Slot::EMPTY; new_capacity].into_boxed_slice();
        let new_mask = new_capacity - 1;

        for slot in self.slots.iter() {
            if !slot.is_live() {
                continue;
            }
            let mut idx = (slot.hash as usize) & new_mask;
            loop {
                if new_slots[idx].is_free() {
                    new_slots[idx] = *slot;
                    break;
                }
                idx = (idx + 1) & new_mask;
            }
        }

        self.slots = new_slots;
        self.capacity = new_capacity;
        self.tombstones = 0;
        Ok(())
    }
}

impl Drop for Table {
    fn drop(&mut self) {
        for slot in self.slots.iter() {
            if slot.is_live() {
                unsafe {
                    drop(slot::free_key(slot.key_ptr, slot.key_len()));
                    drop(ValueBuf::from_raw(slot.value_ptr));
                }
            }
        }
    }
}

// SAFETY: Table owns every allocation it points to exclusively, same as a
// HashMap<Box<[u8]>, ValueBuf> would, and holds no interior mutability.
unsafe impl Send for Table {}
