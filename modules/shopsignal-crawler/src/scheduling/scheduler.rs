//! Recrawl priority scheduling.
//!
//! Decides which known pages of a domain are due for re-fetch and in what
//! order: stale-and-popular first, never-crawled pages before everything
//! else. Pure over a page slice, so the formula is testable with in-memory
//! fixtures and independent of the persistence layer.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};

use shopsignal_common::Page;

/// Knobs for the age/popularity formula. All externally supplied.
#[derive(Debug, Clone)]
pub struct RecrawlPolicy {
    /// Each inbound link advances a page's effective age by this many hours.
    pub hours_per_link: f64,
    /// Hard floor between fetches of the same page, against thrashing.
    pub min_interval_minutes: i64,
    /// Ceiling before a page is forced due regardless of popularity.
    pub max_interval_days: i64,
}

impl Default for RecrawlPolicy {
    fn default() -> Self {
        Self {
            hours_per_link: 1.0,
            min_interval_minutes: 20,
            max_interval_days: 20,
        }
    }
}

impl RecrawlPolicy {
    /// Hours since last crawl, credited with the popularity term. A page with
    /// enough inbound links becomes eligible well before the ceiling elapses;
    /// never-crawled pages are infinitely overdue.
    pub fn effective_age_hours(&self, page: &Page, now: DateTime<Utc>) -> f64 {
        match page.last_crawled_at {
            None => f64::INFINITY,
            Some(t) => {
                hours_since(t, now) + page.inbound_links as f64 * self.hours_per_link
            }
        }
    }

    /// Whether a page is due for re-fetch. The min-interval floor always
    /// applies to previously-fetched pages, no matter how popular.
    pub fn is_due(&self, page: &Page, now: DateTime<Utc>) -> bool {
        let t = match page.last_crawled_at {
            None => return true,
            Some(t) => t,
        };
        hours_since(t, now) >= self.min_interval_minutes as f64 / 60.0
            && self.effective_age_hours(page, now) > (self.max_interval_days * 24) as f64
    }
}

fn hours_since(t: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    (now - t).num_seconds() as f64 / 3600.0
}

/// Candidate-selection modes, mirroring the CLI flags.
#[derive(Debug, Clone, Copy, Default)]
pub struct CandidateOpts {
    /// Restrict to never-crawled pages, oldest-discovered first.
    pub new_only: bool,
    /// Ignore the due formula; order everything by effective age.
    pub force: bool,
}

pub struct RecrawlScheduler {
    policy: RecrawlPolicy,
}

impl RecrawlScheduler {
    pub fn new(policy: RecrawlPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RecrawlPolicy {
        &self.policy
    }

    /// Select and order this domain's re-fetch candidates. Never returns more
    /// than `limit` pages.
    pub fn due_candidates(
        &self,
        pages: &[Page],
        limit: usize,
        opts: CandidateOpts,
        now: DateTime<Utc>,
    ) -> Vec<Page> {
        if opts.new_only {
            // Pure frontier expansion: oldest-discovered first, not
            // priority-ordered.
            let mut frontier: Vec<&Page> =
                pages.iter().filter(|p| p.last_crawled_at.is_none()).collect();
            frontier.sort_by_key(|p| p.discovered_at);
            return frontier.into_iter().take(limit).cloned().collect();
        }

        let mut candidates: Vec<&Page> = if opts.force {
            pages.iter().collect()
        } else {
            pages.iter().filter(|p| self.policy.is_due(p, now)).collect()
        };

        candidates.sort_by(|a, b| {
            match (a.last_crawled_at.is_none(), b.last_crawled_at.is_none()) {
                (true, true) => a.discovered_at.cmp(&b.discovered_at),
                (true, false) => Ordering::Less,
                (false, true) => Ordering::Greater,
                (false, false) => {
                    let age_a = self.policy.effective_age_hours(a, now);
                    let age_b = self.policy.effective_age_hours(b, now);
                    age_b.partial_cmp(&age_a).unwrap_or(Ordering::Equal)
                }
            }
        });

        candidates.into_iter().take(limit).cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use uuid::Uuid;

    fn make_page(
        last_crawled: Option<DateTime<Utc>>,
        inbound_links: i32,
        discovered_at: DateTime<Utc>,
    ) -> Page {
        Page {
            id: Uuid::new_v4(),
            domain_id: Uuid::new_v4(),
            url: format!("https://example.com/{}", Uuid::new_v4()),
            url_hash: Uuid::new_v4().to_string(),
            depth: 1,
            last_crawled_at: last_crawled,
            inbound_links,
            raw_content_ref: None,
            discovered_at,
            screenshot_at: None,
            analyzed_at: None,
            embedded_at: None,
            attributes_at: None,
        }
    }

    fn scheduler() -> RecrawlScheduler {
        RecrawlScheduler::new(RecrawlPolicy::default())
    }

    // --- Due formula ---

    #[test]
    fn never_crawled_page_is_always_due() {
        let now = Utc::now();
        let page = make_page(None, 0, now);
        assert!(RecrawlPolicy::default().is_due(&page, now));
    }

    #[test]
    fn zero_inbound_recent_page_is_not_due() {
        let now = Utc::now();
        let page = make_page(Some(now - Duration::hours(1)), 0, now - Duration::days(30));
        assert!(!RecrawlPolicy::default().is_due(&page, now));
    }

    #[test]
    fn zero_inbound_page_due_after_max_interval() {
        let now = Utc::now();
        let page = make_page(Some(now - Duration::days(21)), 0, now - Duration::days(60));
        assert!(RecrawlPolicy::default().is_due(&page, now));
    }

    #[test]
    fn hub_page_due_well_before_max_interval() {
        let now = Utc::now();
        // 200 inbound links credit 200 hours: due once 280 real hours pass,
        // far short of the 480-hour ceiling.
        let page = make_page(Some(now - Duration::hours(290)), 200, now - Duration::days(60));
        assert!(RecrawlPolicy::default().is_due(&page, now));

        let recent = make_page(Some(now - Duration::hours(2)), 200, now - Duration::days(60));
        assert!(!RecrawlPolicy::default().is_due(&recent, now));
    }

    #[test]
    fn heavily_linked_page_due_right_after_floor() {
        let now = Utc::now();
        // Popularity term alone exceeds the ceiling; only the hard floor
        // holds it back.
        let page = make_page(Some(now - Duration::hours(1)), 500, now - Duration::days(60));
        assert!(RecrawlPolicy::default().is_due(&page, now));
    }

    #[test]
    fn min_interval_floor_blocks_thrashing() {
        let now = Utc::now();
        let page = make_page(Some(now - Duration::minutes(10)), 500, now - Duration::days(60));
        assert!(
            !RecrawlPolicy::default().is_due(&page, now),
            "floor applies regardless of popularity"
        );
    }

    // --- Ordering ---

    #[test]
    fn never_crawled_ranks_before_any_stale_page() {
        let now = Utc::now();
        let never = make_page(None, 0, now - Duration::hours(1));
        let very_stale = make_page(Some(now - Duration::days(100)), 50, now - Duration::days(200));

        let candidates = scheduler().due_candidates(
            &[very_stale.clone(), never.clone()],
            10,
            CandidateOpts::default(),
            now,
        );

        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].id, never.id);
        assert_eq!(candidates[1].id, very_stale.id);
    }

    #[test]
    fn stale_pages_ordered_by_effective_age_descending() {
        let now = Utc::now();
        let older = make_page(Some(now - Duration::days(30)), 0, now - Duration::days(90));
        let popular = make_page(Some(now - Duration::days(25)), 300, now - Duration::days(90));
        let newer = make_page(Some(now - Duration::days(21)), 0, now - Duration::days(90));

        let candidates = scheduler().due_candidates(
            &[newer.clone(), older.clone(), popular.clone()],
            10,
            CandidateOpts::default(),
            now,
        );

        // popular: 600h + 300h credit = 900h; older: 720h; newer: 504h
        let ids: Vec<_> = candidates.iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![popular.id, older.id, newer.id]);
    }

    #[test]
    fn limit_bounds_candidates() {
        let now = Utc::now();
        let pages: Vec<Page> = (0..20)
            .map(|i| make_page(Some(now - Duration::days(21 + i)), 0, now - Duration::days(90)))
            .collect();

        let candidates = scheduler().due_candidates(&pages, 5, CandidateOpts::default(), now);
        assert_eq!(candidates.len(), 5);
    }

    // --- new_only mode ---

    #[test]
    fn new_only_returns_frontier_oldest_discovered_first() {
        let now = Utc::now();
        let old_frontier = make_page(None, 0, now - Duration::days(3));
        let new_frontier = make_page(None, 0, now - Duration::hours(1));
        let crawled = make_page(Some(now - Duration::days(50)), 0, now - Duration::days(90));

        let candidates = scheduler().due_candidates(
            &[new_frontier.clone(), crawled, old_frontier.clone()],
            10,
            CandidateOpts { new_only: true, force: false },
            now,
        );

        let ids: Vec<_> = candidates.iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![old_frontier.id, new_frontier.id]);
    }

    // --- force mode ---

    #[test]
    fn force_includes_pages_that_are_not_due() {
        let now = Utc::now();
        let fresh = make_page(Some(now - Duration::hours(1)), 0, now - Duration::days(5));
        let stale = make_page(Some(now - Duration::days(30)), 0, now - Duration::days(90));

        let candidates = scheduler().due_candidates(
            &[fresh.clone(), stale.clone()],
            10,
            CandidateOpts { new_only: false, force: true },
            now,
        );

        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].id, stale.id, "still ordered by effective age");
        assert_eq!(candidates[1].id, fresh.id);
    }

    #[test]
    fn empty_page_set_returns_empty() {
        let candidates =
            scheduler().due_candidates(&[], 10, CandidateOpts::default(), Utc::now());
        assert!(candidates.is_empty());
    }
}
