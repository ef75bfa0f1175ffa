//! A single cache bank.

use parking_lot::Mutex;

/// Index value of an unoccupied slot.
pub(crate) const EMPTY: u64 = u64::MAX;

struct Slots {
    index: Box<[u64]>,
    pages: Box<[u8]>,
}

/// A fixed-size shard of the cache address space.
///
/// The bank owns its index array and the matching page buffer and serializes
/// every access to them. A slot is valid only while `index[slot]` holds the
/// id of the page occupying it.
pub(crate) struct CacheBank {
    page_size: usize,
    slots: Mutex<Slots>,
}

impl CacheBank {
    pub(crate) fn new(slot_count: usize, page_size: usize) -> Self {
        Self {
            page_size,
            slots: Mutex::new(Slots {
                index: vec![EMPTY; slot_count].into_boxed_slice(),
                pages: vec![0u8; slot_count * page_size].into_boxed_slice(),
            }),
        }
    }

    pub(crate) fn slot_count(&self) -> usize {
        self.slots.lock().index.len()
    }

    /// Copies the page in `slot` into `dest` if it holds `page_id`.
    pub(crate) fn get(&self, slot: usize, page_id: u64, dest: &mut [u8]) -> bool {
        let slots = self.slots.lock();
        if slots.index[slot] != page_id {
            return false;
        }
        let start = slot * self.page_size;
        dest[..self.page_size].copy_from_slice(&slots.pages[start..start + self.page_size]);
        true
    }

    /// Stores `src` in `slot`, evicting whatever page held it.
    pub(crate) fn put(&self, slot: usize, page_id: u64, src: &[u8]) {
        let mut slots = self.slots.lock();
        let start = slot * self.page_size;
        slots.pages[start..start + self.page_size].copy_from_slice(&src[..self.page_size]);
        slots.index[slot] = page_id;
    }

    /// Empties `slot` if it holds `page_id`.
    pub(crate) fn remove(&self, slot: usize, page_id: u64) -> bool {
        let mut slots = self.slots.lock();
        if slots.index[slot] != page_id {
            return false;
        }
        slots.index[slot] = EMPTY;
        true
    }

    pub(crate) fn clear(&self) {
        self.slots.lock().index.fill(EMPTY);
    }
}
