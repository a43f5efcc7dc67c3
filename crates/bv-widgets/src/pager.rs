//! Shared pager state for grid-style widgets.

use bv_data::paging::{rows_per_page_options, CompositeInfo, PagerDisplay};

/// Footer paging state carried by grids and galleries.
#[derive(Debug, Default)]
pub struct PagerState {
    pub composite: CompositeInfo,
    /// Total carried across populations that supply no fresh count.
    pub last_count: Option<u64>,
    pub display: Option<PagerDisplay>,
    pub rows_per_page: Vec<u64>,
}

impl PagerState {
    pub fn new(source_size: Option<u64>) -> Self {
        PagerState {
            composite: CompositeInfo::new(),
            last_count: None,
            display: None,
            rows_per_page: rows_per_page_options(source_size),
        }
    }

    /// Applies a freshly computed display, keeping the last known
    /// count when the new display could not establish one.
    pub fn apply(&mut self, display: PagerDisplay) {
        if display.total.is_some() {
            self.last_count = display.total;
        }
        self.display = Some(display);
    }

    pub fn showing_text(&self) -> &str {
        self.display.as_ref().map_or("", |d| d.showing.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_count_survives_countless_display() {
        let mut pager = PagerState::new(Some(30));
        pager.apply(PagerDisplay {
            showing: "Showing first 30 of 95".into(),
            prev_enabled: false,
            next_enabled: true,
            buttons_visible: true,
            total: Some(95),
        });
        pager.apply(PagerDisplay {
            showing: "Showing 31 to 60 of unknown".into(),
            prev_enabled: true,
            next_enabled: true,
            buttons_visible: true,
            total: None,
        });
        assert_eq!(pager.last_count, Some(95));
    }
}
