pub const DEFAULT_VISIBILITY_THRESHOLD: f64 = 0.8;

/// Scroll geometry for a list of equally tall items.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Geometry {
    pub offset: u32,
    pub item_extent: u32,
    pub viewport_extent: u32,
    pub item_count: usize,
}

impl Geometry {
    /// Share of item `index` inside the viewport, in `0.0..=1.0`.
    pub fn visible_fraction(&self, index: usize) -> f64 {
        if self.item_extent == 0 || index >= self.item_count {
            return 0.0;
        }
        let extent = u64::from(self.item_extent);
        let top = index as u64 * extent;
        let bottom = top + extent;
        let view_top = u64::from(self.offset);
        let view_bottom = view_top + u64::from(self.viewport_extent);
        let overlap = bottom.min(view_bottom).saturating_sub(top.max(view_top));
        overlap as f64 / extent as f64
    }

    /// Indices of items overlapping the viewport at all.
    pub fn overlapping(&self) -> std::ops::Range<usize> {
        if self.item_extent == 0 || self.item_count == 0 {
            return 0..0;
        }
        let first = (self.offset / self.item_extent) as usize;
        let last_row = self.offset + self.viewport_extent.max(1) - 1;
        let last = (last_row / self.item_extent) as usize;
        first.min(self.item_count)..(last + 1).min(self.item_count)
    }

    pub fn max_offset(&self) -> u32 {
        let total = self.item_count as u64 * u64::from(self.item_extent);
        total
            .saturating_sub(u64::from(self.viewport_extent))
            .min(u64::from(u32::MAX)) as u32
    }
}

/// Reports which single item satisfies the visibility rule, emitting
/// only when that answer changes.
#[derive(Debug, Clone)]
pub struct ViewportTracker {
    threshold: f64,
    current: Option<usize>,
    primed: bool,
}

impl Default for ViewportTracker {
    fn default() -> Self {
        Self::new(DEFAULT_VISIBILITY_THRESHOLD)
    }
}

impl ViewportTracker {
    pub fn new(threshold: f64) -> Self {
        let threshold = if threshold.is_finite() {
            threshold.clamp(0.01, 1.0)
        } else {
            DEFAULT_VISIBILITY_THRESHOLD
        };
        Self {
            threshold,
            current: None,
            primed: false,
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn current(&self) -> Option<usize> {
        self.current
    }

    pub fn current_for(&self, geometry: &Geometry) -> Option<usize> {
        // A threshold above 0.5 admits at most one item; below it the
        // most visible one wins, earliest first.
        geometry
            .overlapping()
            .map(|index| (index, geometry.visible_fraction(index)))
            .filter(|(_, fraction)| *fraction >= self.threshold)
            .fold(None, |best: Option<(usize, f64)>, candidate| match best {
                Some(kept) if kept.1 >= candidate.1 => Some(kept),
                _ => Some(candidate),
            })
            .map(|(index, _)| index)
    }

    /// Returns `Some(new_current)` when the current item changed.
    pub fn observe(&mut self, geometry: &Geometry) -> Option<Option<usize>> {
        let next = self.current_for(geometry);
        if self.primed && next == self.current {
            return None;
        }
        self.primed = true;
        self.current = next;
        Some(next)
    }

    pub fn reset(&mut self) {
        self.current = None;
        self.primed = false;
    }
}

/// Single-slot mailbox: a newer value replaces an unread older one.
#[derive(Debug, Clone)]
pub struct LatestWins<T> {
    slot: Option<T>,
    superseded: u64,
}

impl<T> Default for LatestWins<T> {
    fn default() -> Self {
        Self {
            slot: None,
            superseded: 0,
        }
    }
}

impl<T> LatestWins<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&mut self, value: T) {
        if self.slot.replace(value).is_some() {
            self.superseded += 1;
        }
    }

    pub fn take(&mut self) -> Option<T> {
        self.slot.take()
    }

    pub fn is_pending(&self) -> bool {
        self.slot.is_some()
    }

    /// Count of values dropped because a newer one arrived first.
    pub fn superseded(&self) -> u64 {
        self.superseded
    }
}
