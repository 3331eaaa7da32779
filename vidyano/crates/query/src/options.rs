use std::time::Duration;

use core_types::config::QuerySection;

/// Per-query tuning, usually derived from the `[query]` config section.
#[derive(Debug, Clone)]
pub struct QueryOptions {
    pub page_size: u32,
    pub fetch_debounce: Duration,
    pub coalesce_gap: Option<u32>,
    pub max_selected_items: Option<u32>,
    pub distincts_cap: u32,
    pub request_timeout: Option<Duration>,
    pub throw_exceptions: bool,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self::from(&QuerySection::default())
    }
}

impl From<&QuerySection> for QueryOptions {
    fn from(section: &QuerySection) -> Self {
        Self {
            page_size: section.page_size.max(1),
            fetch_debounce: Duration::from_millis(section.fetch_debounce_ms),
            coalesce_gap: section.coalesce_gap,
            max_selected_items: section.max_selected_items,
            distincts_cap: section.distincts_cap,
            request_timeout: (section.request_timeout_ms > 0)
                .then(|| Duration::from_millis(section.request_timeout_ms)),
            throw_exceptions: section.throw_exceptions,
        }
    }
}

impl QueryOptions {
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn with_fetch_debounce(mut self, debounce: Duration) -> Self {
        self.fetch_debounce = debounce;
        self
    }

    pub fn with_coalesce_gap(mut self, gap: u32) -> Self {
        self.coalesce_gap = Some(gap);
        self
    }

    pub fn with_max_selected_items(mut self, max: Option<u32>) -> Self {
        self.max_selected_items = max;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_throw_exceptions(mut self, throw: bool) -> Self {
        self.throw_exceptions = throw;
        self
    }

    /// Largest gap (in rows) that still merges two queued indices.
    pub(crate) fn gap_for(&self, page_size: u32) -> usize {
        self.coalesce_gap.unwrap_or(page_size) as usize
    }
}
