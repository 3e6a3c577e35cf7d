use std::collections::HashSet;
use std::fmt;

use crate::config::HarvestConfig;
use crate::extract::CandidateItem;

pub const RECENT_WINDOW_SECS: i64 = 30 * 86_400;
/// An end date covers its whole day.
pub const END_OF_DAY_SECS: i64 = 86_399;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    MissingUrl,
    Duplicate,
    OlderThanRecentWindow,
    BeforeStart,
    AfterEnd,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            Rejection::MissingUrl => "no permalink",
            Rejection::Duplicate => "already seen",
            Rejection::OlderThanRecentWindow => "older than 30 days",
            Rejection::BeforeStart => "before start_date",
            Rejection::AfterEnd => "after end_date",
        };
        f.write_str(reason)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    Accept { url: String },
    Reject(Rejection),
}

/// Per-run bookkeeping. One value per run, threaded through by `&mut`.
#[derive(Debug, Clone)]
pub struct CrawlState {
    seen_urls: HashSet<String>,
    total_emitted: usize,
    max_results: usize,
    start_epoch: Option<i64>,
    end_epoch: Option<i64>,
    recent_only: bool,
}

impl CrawlState {
    pub fn new(
        max_results: usize,
        start_epoch: Option<i64>,
        end_epoch: Option<i64>,
        recent_only: bool,
    ) -> Self {
        Self {
            seen_urls: HashSet::new(),
            total_emitted: 0,
            max_results,
            start_epoch,
            end_epoch,
            recent_only,
        }
    }

    pub fn for_config(config: &HarvestConfig) -> Self {
        Self::new(
            config.max_results,
            config.start_epoch,
            config.end_epoch,
            config.recent_only,
        )
    }

    /// Dedup then date window. Items without a timestamp pass every date rule.
    /// An accepted url only counts as seen once [`record_emitted`](Self::record_emitted)
    /// confirms the post reached the sink.
    pub fn admit(&self, item: &CandidateItem, now_epoch: i64) -> Admission {
        let Some(url) = item.url.as_deref() else {
            return Admission::Reject(Rejection::MissingUrl);
        };
        if self.seen_urls.contains(url) {
            return Admission::Reject(Rejection::Duplicate);
        }

        if let Some(ts) = item.timestamp {
            let explicit_window = self.start_epoch.is_some() || self.end_epoch.is_some();
            if self.recent_only
                && !explicit_window
                && ts < now_epoch.saturating_sub(RECENT_WINDOW_SECS)
            {
                return Admission::Reject(Rejection::OlderThanRecentWindow);
            }
            if self.start_epoch.map_or(false, |start| ts < start) {
                return Admission::Reject(Rejection::BeforeStart);
            }
            if self
                .end_epoch
                .map_or(false, |end| ts > end.saturating_add(END_OF_DAY_SECS))
            {
                return Admission::Reject(Rejection::AfterEnd);
            }
        }

        Admission::Accept {
            url: url.to_string(),
        }
    }

    pub fn record_emitted(&mut self, url: &str) {
        self.seen_urls.insert(url.to_string());
        self.total_emitted += 1;
    }

    pub fn target_reached(&self) -> bool {
        self.total_emitted >= self.max_results
    }

    pub fn total_emitted(&self) -> usize {
        self.total_emitted
    }

    pub fn max_results(&self) -> usize {
        self.max_results
    }

    pub fn seen_count(&self) -> usize {
        self.seen_urls.len()
    }
}
