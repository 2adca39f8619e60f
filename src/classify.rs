use tracing::debug;

use crate::dates::{self, DateResolver, TargetDateSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassifierState {
    /// Nothing accepted yet; pinned or future items may still precede the window.
    Searching,
    InWindow,
    /// Terminal: the listing has scrolled past every target date.
    PastWindow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Accept,
    /// Dated today. The site may still be publishing, so it is never taken.
    SkipToday,
    SkipOutside,
    Stop,
}

/// Keep/drop decisions for one date-descending listing.
///
/// The collector feeds each entry's date in listing order and stops paging
/// once `Stop` comes back. Listings that are not strictly descending (pinned
/// or sponsored entries interleaved) end early and under-collect.
#[derive(Debug, Clone)]
pub struct RecordClassifier {
    targets: TargetDateSet,
    resolver: DateResolver,
    state: ClassifierState,
    accepted: usize,
}

impl RecordClassifier {
    pub fn new(resolver: &DateResolver, targets: TargetDateSet) -> Self {
        Self {
            targets,
            resolver: *resolver,
            state: ClassifierState::Searching,
            accepted: 0,
        }
    }

    pub fn state(&self) -> ClassifierState {
        self.state
    }

    pub fn accepted(&self) -> usize {
        self.accepted
    }

    pub fn is_done(&self) -> bool {
        self.state == ClassifierState::PastWindow
    }

    pub fn targets(&self) -> &TargetDateSet {
        &self.targets
    }

    /// Classify one entry by its scraped date string.
    pub fn observe(&mut self, date_str: &str) -> Verdict {
        if self.is_done() {
            return Verdict::Stop;
        }

        // Unparseable dates fail closed: not accepted, and not proof that
        // the window has been passed either.
        let Some(date) = dates::parse_date(date_str) else {
            debug!(date = date_str, "unparseable date, skipping");
            return Verdict::SkipOutside;
        };

        if self.targets.contains(date) {
            self.state = ClassifierState::InWindow;
            self.accepted += 1;
            return Verdict::Accept;
        }

        if self.resolver.is_today(date_str) {
            debug!(date = date_str, "skipping today's entry");
            return Verdict::SkipToday;
        }

        let older = self.targets.oldest().is_some_and(|oldest| date < oldest);
        if older && self.accepted > 0 {
            debug!(date = date_str, accepted = self.accepted, "reached entries older than the window");
            self.state = ClassifierState::PastWindow;
            return Verdict::Stop;
        }

        Verdict::SkipOutside
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;

    fn monday() -> DateResolver {
        DateResolver::new(NaiveDate::from_ymd_opt(2025, 6, 9).unwrap())
    }

    fn classifier(resolver: &DateResolver) -> RecordClassifier {
        RecordClassifier::new(resolver, resolver.target_dates())
    }

    #[test]
    fn descending_stream() {
        let r = DateResolver::new(NaiveDate::from_ymd_opt(2025, 6, 11).unwrap());
        let mut c = classifier(&r);
        let stream = [
            "Jun 11, 2025",
            "Jun 10, 2025",
            "Jun 10, 2025",
            "Jun 09, 2025",
            "Jun 06, 2025",
        ];
        let verdicts: Vec<_> = stream.iter().map(|d| c.observe(d)).collect();
        assert_eq!(
            verdicts,
            vec![
                Verdict::SkipToday,
                Verdict::Accept,
                Verdict::Accept,
                Verdict::Stop,
                Verdict::Stop,
            ]
        );
        assert_eq!(c.accepted(), 2);
        assert_eq!(c.state(), ClassifierState::PastWindow);
    }

    #[test]
    fn monday_weekend_scenario() {
        let r = monday();
        let mut c = classifier(&r);
        assert_eq!(c.observe("Jun 09, 2025"), Verdict::SkipToday);
        assert_eq!(c.state(), ClassifierState::Searching);
        assert_eq!(c.observe("Jun 08, 2025"), Verdict::Accept);
        assert_eq!(c.observe("Jun 07, 2025"), Verdict::Accept);
        assert_eq!(c.state(), ClassifierState::InWindow);
        assert_eq!(c.observe("Jun 06, 2025"), Verdict::Stop);
        assert!(c.is_done());
    }

    #[test]
    fn today_between_accepts_does_not_stop() {
        let r = monday();
        let mut c = classifier(&r);
        assert_eq!(c.observe("Jun 08, 2025"), Verdict::Accept);
        assert_eq!(c.observe("09 June 2025"), Verdict::SkipToday);
        assert_eq!(c.state(), ClassifierState::InWindow);
        assert_eq!(c.observe("07-06-2025"), Verdict::Accept);
    }

    #[test]
    fn older_before_any_accept_keeps_searching() {
        let r = monday();
        let mut c = classifier(&r);
        // pinned item from last month at the top of the listing
        assert_eq!(c.observe("May 02, 2025"), Verdict::SkipOutside);
        assert_eq!(c.state(), ClassifierState::Searching);
        assert_eq!(c.observe("Jun 08, 2025"), Verdict::Accept);
    }

    #[test]
    fn future_and_unparseable_are_skipped() {
        let r = monday();
        let mut c = classifier(&r);
        assert_eq!(c.observe("Jun 08, 2025"), Verdict::Accept);
        assert_eq!(c.observe("Jun 20, 2025"), Verdict::SkipOutside);
        assert_eq!(c.observe("N/A"), Verdict::SkipOutside);
        assert_eq!(c.observe(""), Verdict::SkipOutside);
        assert_eq!(c.state(), ClassifierState::InWindow);
    }

    #[test]
    fn interleaved_listing_terminates_early() {
        // Known fragility: an out-of-order older entry ends the scan.
        let r = monday();
        let mut c = classifier(&r);
        assert_eq!(c.observe("Jun 08, 2025"), Verdict::Accept);
        assert_eq!(c.observe("Jan 01, 2025"), Verdict::Stop);
        assert_eq!(c.observe("Jun 07, 2025"), Verdict::Stop);
        assert_eq!(c.accepted(), 1);
    }

    #[test]
    fn empty_window_accepts_nothing() {
        let r = DateResolver::new(NaiveDate::from_ymd_opt(2025, 6, 8).unwrap());
        let mut c = classifier(&r);
        assert!(c.targets().is_empty());
        assert_eq!(c.observe("Jun 07, 2025"), Verdict::SkipOutside);
        assert_eq!(c.observe("Jun 01, 2025"), Verdict::SkipOutside);
        assert!(!c.is_done());
    }
}
