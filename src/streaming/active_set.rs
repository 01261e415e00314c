//! Active set management for streaming sweeps.
//!
//! The ActiveSet holds the right-side rows that could still overlap the
//! current left position of a join. Rows leave the set once the sweep has
//! moved past their end.

/// A buffered row together with the closed position span it covers.
#[derive(Debug, Clone)]
pub struct Span<T> {
    pub start: u64,
    pub end: u64,
    pub item: T,
}

impl<T> Span<T> {
    #[inline]
    pub fn new(start: u64, end: u64, item: T) -> Self {
        Self { start, end, item }
    }

    /// Closed-interval overlap with `[start, end]`.
    #[inline]
    pub fn overlaps(&self, start: u64, end: u64) -> bool {
        self.start <= end && start <= self.end
    }
}

/// Right rows in arrival order.
///
/// # Memory Complexity
///
/// O(k) where k = max number of rows overlapping any left position.
#[derive(Debug)]
pub struct ActiveSet<T> {
    data: Vec<T>,
}

impl<T> Default for ActiveSet<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ActiveSet<T> {
    pub fn new() -> Self {
        Self::with_capacity(64)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
        }
    }

    #[inline]
    pub fn push(&mut self, value: T) {
        self.data.push(value);
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Keep only the elements matching `keep`, preserving their order.
    ///
    /// Returns the number of elements removed.
    pub fn retain<F>(&mut self, mut keep: F) -> usize
    where
        F: FnMut(&T) -> bool,
    {
        let before = self.data.len();
        self.data.retain(|x| keep(x));
        before - self.data.len()
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.data.iter()
    }
}

impl<T> ActiveSet<Span<T>> {
    /// Remove spans ending before the given position.
    ///
    /// Span ends are not sorted, so this is a full pass.
    #[inline]
    pub fn expire_before(&mut self, position: u64) -> usize {
        self.retain(|s| s.end >= position)
    }

    /// Spans that overlap the closed range `[start, end]`, in arrival order.
    pub fn iter_overlapping(&self, start: u64, end: u64) -> impl Iterator<Item = &Span<T>> {
        self.iter().filter(move |s| s.overlaps(start, end))
    }
}
