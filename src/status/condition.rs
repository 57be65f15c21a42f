//! Generic condition-log helpers. A condition is "rewritten only when
//! semantics change" (glossary): the CSV log is append-only history, so a
//! repeat of the same `(phase, reason)` updates the existing tail entry's
//! message/timestamp in place rather than growing the log.

use crate::clock::Clock;
use crate::crd::{CsvCondition, CsvPhase, CsvReason};

/// Appends (or updates the tail of) a CSV's condition log. Returns `true`
/// when this is a genuine phase/reason transition (a new entry was pushed),
/// `false` when only the message of the existing tail entry changed.
pub fn record_csv_condition(
    conditions: &mut Vec<CsvCondition>,
    phase: CsvPhase,
    reason: CsvReason,
    message: String,
    clock: &dyn Clock,
) -> bool {
    let now = clock.now();
    if let Some(last) = conditions.last_mut() {
        if last.phase == phase && last.reason == reason {
            last.message = message;
            last.last_update_time = now;
            return false;
        }
    }
    conditions.push(CsvCondition {
        phase,
        reason,
        message,
        last_transition_time: now,
        last_update_time: now,
    });
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;
    use chrono::{TimeZone, Utc};

    fn clock() -> MockClock {
        MockClock::at(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())
    }

    #[test]
    fn repeated_phase_and_reason_update_message_in_place() {
        let clock = clock();
        let mut conditions = Vec::new();

        let changed = record_csv_condition(
            &mut conditions,
            CsvPhase::Pending,
            CsvReason::RequirementsNotMet,
            "widgets.example.com missing".into(),
            &clock,
        );
        assert!(changed);
        assert_eq!(conditions.len(), 1);

        clock.advance(chrono::Duration::seconds(5));
        let changed = record_csv_condition(
            &mut conditions,
            CsvPhase::Pending,
            CsvReason::RequirementsNotMet,
            "widgets.example.com still missing".into(),
            &clock,
        );
        assert!(!changed);
        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0].message, "widgets.example.com still missing");
        assert_eq!(
            conditions[0].last_transition_time,
            clock.now() - chrono::Duration::seconds(5)
        );
    }

    #[test]
    fn new_phase_pushes_a_new_entry() {
        let clock = clock();
        let mut conditions = Vec::new();
        record_csv_condition(
            &mut conditions,
            CsvPhase::Pending,
            CsvReason::RequirementsNotMet,
            "missing".into(),
            &clock,
        );
        record_csv_condition(
            &mut conditions,
            CsvPhase::InstallReady,
            CsvReason::AllRequirementsMet,
            "ready".into(),
            &clock,
        );
        assert_eq!(conditions.len(), 2);
    }
}
