//! Shared log staging buffer.

/// Fixed-capacity staging area for pages about to be appended to the log.
///
/// The buffer is borrowed through the log's mutex guard, so only the current
/// modify transaction writes into it.
#[derive(Debug)]
pub struct LogBuffer {
    page_size: usize,
    data: Vec<u8>,
}

impl LogBuffer {
    /// Creates a buffer holding `capacity` pages of `page_size` bytes.
    #[must_use]
    pub fn new(page_size: usize, capacity: usize) -> Self {
        Self {
            page_size,
            data: vec![0u8; page_size * capacity],
        }
    }

    /// Returns the page size in bytes.
    #[must_use]
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Returns the capacity in pages.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.data.len() / self.page_size
    }

    /// Returns page slot `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index >= capacity()`.
    #[must_use]
    pub fn page(&self, index: usize) -> &[u8] {
        let start = index * self.page_size;
        &self.data[start..start + self.page_size]
    }

    /// Returns page slot `index` for writing.
    ///
    /// # Panics
    ///
    /// Panics if `index >= capacity()`.
    pub fn page_mut(&mut self, index: usize) -> &mut [u8] {
        let start = index * self.page_size;
        &mut self.data[start..start + self.page_size]
    }

    /// Returns the first `count` pages as one contiguous slice.
    #[must_use]
    pub fn pages(&self, count: usize) -> &[u8] {
        &self.data[..count.min(self.capacity()) * self.page_size]
    }

    /// Returns the first `count` pages for writing.
    pub fn pages_mut(&mut self, count: usize) -> &mut [u8] {
        let len = count.min(self.capacity()) * self.page_size;
        &mut self.data[..len]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_slots() {
        let mut buffer = LogBuffer::new(16, 4);
        assert_eq!(buffer.capacity(), 4);
        buffer.page_mut(2).fill(7);
        assert!(buffer.page(2).iter().all(|b| *b == 7));
        assert!(buffer.page(1).iter().all(|b| *b == 0));
        assert_eq!(buffer.pages(3).len(), 48);
        assert_eq!(buffer.pages(10).len(), 64);
    }
}
