//! Repetition-capped fingerprint counters.

use std::collections::BTreeMap;

use traffic_sweep_incident_models::EventRecord;

/// Outcome of offering a fingerprint to the [`DedupLedger`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The fingerprint was below the cap; `count` is the new tally.
    Admitted {
        /// Observations of this fingerprint including this one.
        count: u32,
    },
    /// The fingerprint already reached the cap; nothing changed.
    RejectedDuplicate {
        /// Current tally (equal to the cap).
        count: u32,
    },
}

impl Admission {
    /// Whether the record was admitted.
    #[must_use]
    pub const fn is_admitted(self) -> bool {
        matches!(self, Self::Admitted { .. })
    }
}

/// Counts how often each fingerprint has been admitted and enforces a cap.
///
/// A fingerprint is admitted while its counter is strictly below `cap`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DedupLedger {
    cap: u32,
    counts: BTreeMap<String, u32>,
}

impl DedupLedger {
    /// Creates an empty ledger. A `cap` of zero is raised to one so that
    /// every fingerprint can be admitted at least once.
    #[must_use]
    pub fn new(cap: u32) -> Self {
        Self {
            cap: cap.max(1),
            counts: BTreeMap::new(),
        }
    }

    /// Rebuilds counters by tallying the fingerprints of `records`.
    ///
    /// Records without a fingerprint are ignored. Tallies may exceed the cap
    /// if the list was written under a larger cap; such fingerprints simply
    /// stay rejected.
    #[must_use]
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a EventRecord>, cap: u32) -> Self {
        let mut ledger = Self::new(cap);
        for record in records {
            if record.event_id.is_empty() {
                continue;
            }
            *ledger.counts.entry(record.event_id.clone()).or_insert(0) += 1;
        }
        ledger
    }

    /// Offers `fingerprint`; increments its counter if below the cap.
    pub fn admit(&mut self, fingerprint: &str) -> Admission {
        let count = self.count(fingerprint);
        if count >= self.cap {
            return Admission::RejectedDuplicate { count };
        }
        let count = count + 1;
        self.counts.insert(fingerprint.to_string(), count);
        Admission::Admitted { count }
    }

    /// Whether [`admit`](Self::admit) would accept `fingerprint` right now.
    #[must_use]
    pub fn would_admit(&self, fingerprint: &str) -> bool {
        self.count(fingerprint) < self.cap
    }

    /// Current tally for `fingerprint`.
    #[must_use]
    pub fn count(&self, fingerprint: &str) -> u32 {
        self.counts.get(fingerprint).copied().unwrap_or(0)
    }

    /// The repetition cap.
    #[must_use]
    pub const fn cap(&self) -> u32 {
        self.cap
    }

    /// Number of distinct fingerprints seen.
    #[must_use]
    pub fn unique_fingerprints(&self) -> usize {
        self.counts.len()
    }

    /// All counters, ordered by fingerprint.
    #[must_use]
    pub const fn counts(&self) -> &BTreeMap<String, u32> {
        &self.counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str) -> EventRecord {
        EventRecord {
            event_id: id.to_string(),
            event_type: "t".to_string(),
            address: "a".to_string(),
            report_time: "r".to_string(),
            reporter: "p".to_string(),
            latitude: None,
            longitude: None,
            confidence: None,
        }
    }

    #[test]
    fn cap_plus_one_admissions_reject_exactly_once() {
        let mut ledger = DedupLedger::new(5);
        let outcomes: Vec<Admission> = (0..6).map(|_| ledger.admit("fp")).collect();
        let admitted = outcomes.iter().filter(|a| a.is_admitted()).count();
        assert_eq!(admitted, 5);
        assert_eq!(outcomes[5], Admission::RejectedDuplicate { count: 5 });
        assert_eq!(outcomes[0], Admission::Admitted { count: 1 });
        assert_eq!(ledger.count("fp"), 5);
    }

    #[test]
    fn rejection_does_not_mutate() {
        let mut ledger = DedupLedger::new(1);
        assert!(ledger.admit("x").is_admitted());
        let before = ledger.clone();
        assert!(!ledger.admit("x").is_admitted());
        assert_eq!(ledger, before);
    }

    #[test]
    fn first_occurrence_only_with_cap_one() {
        let mut ledger = DedupLedger::new(1);
        assert!(ledger.admit("a").is_admitted());
        assert!(ledger.admit("b").is_admitted());
        assert!(!ledger.admit("a").is_admitted());
        assert_eq!(ledger.unique_fingerprints(), 2);
    }

    #[test]
    fn zero_cap_is_raised_to_one() {
        let mut ledger = DedupLedger::new(0);
        assert_eq!(ledger.cap(), 1);
        assert!(ledger.admit("a").is_admitted());
    }

    #[test]
    fn rebuild_from_records_matches_live_counters() {
        let mut live = DedupLedger::new(5);
        let mut persisted = Vec::new();
        for id in ["a", "b", "a", "c", "a", "b"] {
            if live.admit(id).is_admitted() {
                persisted.push(record(id));
            }
        }
        let rebuilt = DedupLedger::from_records(&persisted, 5);
        assert_eq!(rebuilt, live);
    }

    #[test]
    fn rebuild_ignores_records_without_fingerprint() {
        let records = vec![record(""), record("a")];
        let ledger = DedupLedger::from_records(&records, 5);
        assert_eq!(ledger.unique_fingerprints(), 1);
        assert!(ledger.would_admit("a"));
    }

    #[test]
    fn over_cap_history_stays_rejected() {
        let records: Vec<EventRecord> = (0..4).map(|_| record("a")).collect();
        let mut ledger = DedupLedger::from_records(&records, 2);
        assert_eq!(ledger.count("a"), 4);
        assert_eq!(ledger.admit("a"), Admission::RejectedDuplicate { count: 4 });
    }
}
