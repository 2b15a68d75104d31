/// Answers how many history entries a display of a given width can show.
pub trait HistoryCapacity {
    fn capacity(&self, width: u16) -> usize;
}

/// Bar chart with one fixed-width bar per check and a one-column gap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BarChartLayout {
    pub bar_width: u16,
    /// Columns taken by borders on either side
    pub padding: u16,
}

impl Default for BarChartLayout {
    fn default() -> Self {
        Self { bar_width: 3, padding: 2 }
    }
}

impl HistoryCapacity for BarChartLayout {
    fn capacity(&self, width: u16) -> usize {
        // One leading column, then bar + gap per entry.
        let usable = width.saturating_sub(self.padding).saturating_sub(1);
        usize::from(usable) / (usize::from(self.bar_width) + 1)
    }
}
