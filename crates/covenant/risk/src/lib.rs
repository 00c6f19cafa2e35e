//! Penalty risk engine.
//!
//! Deterministic, rule-based scoring: the same obligation, contract value,
//! and date always yield the same snapshot, so recomputation is safe to
//! trigger from any mutation path. Snapshots are append-only; callers
//! persist the returned [`PenaltyRisk`] next to its predecessors.

#![deny(unsafe_code)]

use chrono::{NaiveDate, Utc};
use covenant_types::{Obligation, PenaltyRisk, Provenance};

/// Confidence assumed for AI-extracted obligations that carry none.
const DEFAULT_AI_CONFIDENCE: f64 = 0.5;

/// Due-soon window, in days, for the elevated base branch.
const DUE_SOON_WINDOW_DAYS: i64 = 7;

/// Compute a penalty risk snapshot for an obligation.
///
/// `assignment_completed` is true when every assignment on the obligation
/// is complete; a completed obligation always takes the quiet branch.
pub fn compute_risk(
    obligation: &Obligation,
    contract_value_minor: Option<u64>,
    assignment_completed: bool,
    today: NaiveDate,
) -> PenaltyRisk {
    let (base, branch) = base_score(obligation.due_date, assignment_completed, today);

    let (confidence_factor, confidence_note) = match obligation.provenance {
        Provenance::Manual => (1.0, "manual provenance".to_string()),
        Provenance::Ai => {
            let confidence = obligation.confidence.unwrap_or(DEFAULT_AI_CONFIDENCE);
            let factor = confidence.max(DEFAULT_AI_CONFIDENCE);
            (factor, format!("ai confidence {confidence:.2}"))
        }
    };

    let score = (base * confidence_factor).clamp(0.0, 1.0);

    let parsed_percent = obligation
        .penalty_text
        .as_deref()
        .and_then(parse_penalty_percent);
    let amount_minor = match (parsed_percent, contract_value_minor) {
        (Some(percent), Some(value_minor)) => {
            Some((value_minor as f64 * score * percent).round() as u64)
        }
        _ => None,
    };

    let basis = format!(
        "{branch}; base {base:.4}; {confidence_note}; factor {confidence_factor:.2}; score {score:.4}{}",
        match parsed_percent {
            Some(percent) => format!("; penalty {:.2}% of contract value", percent * 100.0),
            None => "; no parsable penalty percentage".to_string(),
        }
    );

    PenaltyRisk {
        obligation_id: obligation.id.clone(),
        computed_at: Utc::now(),
        score,
        basis,
        amount_minor,
    }
}

fn base_score(
    due_date: Option<NaiveDate>,
    assignment_completed: bool,
    today: NaiveDate,
) -> (f64, String) {
    let Some(due) = due_date else {
        return (0.05, "no due date".to_string());
    };
    if assignment_completed {
        return (0.05, "completed".to_string());
    }

    let days_overdue = (today - due).num_days().max(0);
    let days_remaining = (due - today).num_days().max(0);

    if today > due {
        let base = 0.6 + (days_overdue as f64 / 30.0 * 0.4).min(0.4);
        (base, format!("overdue {days_overdue} days"))
    } else if days_remaining <= DUE_SOON_WINDOW_DAYS {
        let base = 0.3 + (DUE_SOON_WINDOW_DAYS - days_remaining) as f64
            / DUE_SOON_WINDOW_DAYS as f64
            * 0.3;
        (base, format!("due in {days_remaining} days"))
    } else {
        (0.05, format!("due in {days_remaining} days"))
    }
}

/// Scan penalty text for the first percentage figure, e.g. "a penalty of
/// 2.5% per week". Returns the fraction (0.025), or `None` when the text
/// carries no parsable percentage.
pub fn parse_penalty_percent(text: &str) -> Option<f64> {
    let bytes = text.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i].is_ascii_digit() {
            let start = i;
            while i < bytes.len() && (bytes[i].is_ascii_digit() || bytes[i] == b'.') {
                i += 1;
            }
            let number_end = i;
            // Allow whitespace between the number and the percent sign.
            let mut j = i;
            while j < bytes.len() && bytes[j] == b' ' {
                j += 1;
            }
            if j < bytes.len() && bytes[j] == b'%' {
                if let Ok(value) = text[start..number_end].parse::<f64>() {
                    if value.is_finite() && value >= 0.0 {
                        return Some(value / 100.0);
                    }
                }
            }
        } else {
            i += 1;
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use covenant_types::{ContractId, Obligation};
    use proptest::prelude::*;

    fn ai_obligation(confidence: Option<f64>) -> Obligation {
        let mut obligation = Obligation::manual(ContractId::new("c1"), "Submit monthly report");
        obligation.provenance = Provenance::Ai;
        obligation.confidence = confidence;
        obligation
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn due_soon_ai_scenario() {
        let today = date(2026, 8, 26);
        let obligation = ai_obligation(Some(0.8)).with_due_date(date(2026, 8, 28));

        let risk = compute_risk(&obligation, None, false, today);
        // base = 0.3 + (7-2)/7 * 0.3 ~= 0.5143, factor = max(0.5, 0.8)
        assert!((risk.score - (0.3 + 5.0 / 7.0 * 0.3) * 0.8).abs() < 1e-9);
        assert!(risk.basis.contains("due in 2 days"));
        assert!(risk.amount_minor.is_none());
    }

    #[test]
    fn overdue_base_saturates() {
        let today = date(2026, 8, 26);
        let obligation = Obligation::manual(ContractId::new("c1"), "Deliver audit")
            .with_due_date(date(2026, 1, 1));

        let risk = compute_risk(&obligation, None, false, today);
        assert!((risk.score - 1.0).abs() < 1e-9);
        assert!(risk.basis.contains("overdue"));
    }

    #[test]
    fn completed_obligation_takes_quiet_branch() {
        let today = date(2026, 8, 26);
        let obligation = Obligation::manual(ContractId::new("c1"), "Deliver audit")
            .with_due_date(date(2026, 1, 1));

        let risk = compute_risk(&obligation, None, true, today);
        assert!((risk.score - 0.05).abs() < 1e-9);
    }

    #[test]
    fn missing_ai_confidence_defaults_to_half() {
        let today = date(2026, 8, 26);
        let obligation = ai_obligation(None).with_due_date(date(2026, 8, 26));

        let risk = compute_risk(&obligation, None, false, today);
        // base = 0.3 + 7/7*0.3 = 0.6, factor 0.5
        assert!((risk.score - 0.3).abs() < 1e-9);
    }

    #[test]
    fn penalty_amount_uses_parsed_percent() {
        let today = date(2026, 8, 27);
        let obligation = Obligation::manual(ContractId::new("c1"), "Deliver audit")
            .with_due_date(date(2026, 8, 26))
            .with_penalty_text("Late delivery incurs a 2.5 % penalty per week");

        let risk = compute_risk(&obligation, Some(1_000_000), false, today);
        let expected = (1_000_000f64 * risk.score * 0.025).round() as u64;
        assert_eq!(risk.amount_minor, Some(expected));
        assert!(risk.basis.contains("2.50%"));
    }

    #[test]
    fn percent_parsing_edge_cases() {
        assert_eq!(parse_penalty_percent("penalty of 10% of value"), Some(0.10));
        assert_eq!(parse_penalty_percent("0.5% per day"), Some(0.005));
        assert_eq!(parse_penalty_percent("no figures here"), None);
        assert_eq!(parse_penalty_percent("pay 500 EUR flat"), None);
        // First percentage wins.
        assert_eq!(parse_penalty_percent("2% then 5%"), Some(0.02));
    }

    proptest! {
        #[test]
        fn score_is_monotonic_in_days_overdue(extra in 0i64..400, confidence in 0.0f64..=1.0) {
            let today = date(2026, 8, 26);
            let near = ai_obligation(Some(confidence)).with_due_date(today - chrono::Duration::days(1));
            let far = ai_obligation(Some(confidence)).with_due_date(today - chrono::Duration::days(1 + extra));

            let near_risk = compute_risk(&near, None, false, today);
            let far_risk = compute_risk(&far, None, false, today);
            prop_assert!(far_risk.score >= near_risk.score - 1e-12);
        }

        #[test]
        fn score_stays_in_unit_interval(
            days_offset in -400i64..400,
            confidence in proptest::option::of(0.0f64..=1.0),
            completed in any::<bool>(),
        ) {
            let today = date(2026, 8, 26);
            let obligation = ai_obligation(confidence)
                .with_due_date(today + chrono::Duration::days(days_offset));
            let risk = compute_risk(&obligation, Some(10_000), completed, today);
            prop_assert!((0.0..=1.0).contains(&risk.score));
        }
    }
}
