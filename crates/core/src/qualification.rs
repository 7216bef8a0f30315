use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::lead::QualificationFlags;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualificationStatus {
    Qualified,
    NotQualified,
    Pending,
}

impl QualificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Qualified => "qualified",
            Self::NotQualified => "not_qualified",
            Self::Pending => "pending",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "qualified" => Some(Self::Qualified),
            "not_qualified" => Some(Self::NotQualified),
            "pending" => Some(Self::Pending),
            _ => None,
        }
    }
}

/// Tri-state conjunction of the five qualification criteria.
///
/// `Qualified` needs every predicate decisively true. A decisive false on
/// any predicate disqualifies even while other answers are still missing.
/// Otherwise the verdict is `Pending`: an unknown is never treated as a
/// failure, so a lead who has not answered yet cannot be disqualified by
/// silence.
pub fn evaluate(flags: &QualificationFlags, min_bill_value: Decimal) -> QualificationStatus {
    let predicates = [
        flags.bill_value.map(|value| value >= min_bill_value),
        flags.is_decision_maker,
        open_to_new_system(flags),
        flags.has_active_competing_contract.map(|active| !active),
        flags.explicit_interest,
    ];

    if predicates.contains(&Some(false)) {
        return QualificationStatus::NotQualified;
    }
    if predicates.contains(&None) {
        return QualificationStatus::Pending;
    }

    QualificationStatus::Qualified
}

/// "No system installed, or wants to replace the one they have", in
/// tri-state logic. Saying yes to a new system settles the predicate even
/// when the existing-system answer is missing, and vice versa.
fn open_to_new_system(flags: &QualificationFlags) -> Option<bool> {
    match (flags.has_existing_system, flags.wants_new_system) {
        (_, Some(true)) => Some(true),
        (Some(false), _) => Some(true),
        (Some(true), Some(false)) => Some(false),
        _ => None,
    }
}

/// Extracts a monetary amount from a free-text answer. Tolerates currency
/// symbols and both separator conventions ("6.000,00" and "6,000.00").
/// Anything unparseable is `None`, an unknown; it must never collapse to
/// zero, which would look like a decisively failing bill.
pub fn parse_bill_value(raw: &str) -> Option<Decimal> {
    let cleaned: String =
        raw.chars().filter(|c| c.is_ascii_digit() || *c == '.' || *c == ',').collect();
    if cleaned.is_empty() || !cleaned.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }

    let last_separator = cleaned.rfind(['.', ',']);
    let normalized = match last_separator {
        Some(position) => {
            let trailing_digits = cleaned.len() - position - 1;
            if (1..=2).contains(&trailing_digits) {
                // Rightmost separator with one or two trailing digits is
                // the decimal mark; everything before it is grouping.
                let (integer_part, fraction) = cleaned.split_at(position);
                let digits: String =
                    integer_part.chars().filter(char::is_ascii_digit).collect();
                format!("{digits}.{}", &fraction[1..])
            } else {
                cleaned.chars().filter(char::is_ascii_digit).collect()
            }
        }
        None => cleaned,
    };

    normalized.parse::<Decimal>().ok()
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use crate::domain::lead::QualificationFlags;

    use super::{evaluate, parse_bill_value, QualificationStatus};

    fn threshold() -> Decimal {
        Decimal::from(2000)
    }

    fn all_true() -> QualificationFlags {
        QualificationFlags {
            bill_value: Some(Decimal::from(6000)),
            is_decision_maker: Some(true),
            has_existing_system: Some(false),
            wants_new_system: None,
            has_active_competing_contract: Some(false),
            explicit_interest: Some(true),
        }
    }

    #[test]
    fn all_criteria_true_qualifies() {
        assert_eq!(evaluate(&all_true(), threshold()), QualificationStatus::Qualified);
    }

    #[test]
    fn bill_exactly_at_threshold_qualifies() {
        let mut flags = all_true();
        flags.bill_value = Some(threshold());
        assert_eq!(evaluate(&flags, threshold()), QualificationStatus::Qualified);
    }

    #[test]
    fn any_single_false_disqualifies() {
        let low_bill = QualificationFlags { bill_value: Some(Decimal::from(500)), ..all_true() };
        let not_decision_maker =
            QualificationFlags { is_decision_maker: Some(false), ..all_true() };
        let keeps_current_system = QualificationFlags {
            has_existing_system: Some(true),
            wants_new_system: Some(false),
            ..all_true()
        };
        let competing_contract =
            QualificationFlags { has_active_competing_contract: Some(true), ..all_true() };
        let no_interest = QualificationFlags { explicit_interest: Some(false), ..all_true() };

        for flags in
            [low_bill, not_decision_maker, keeps_current_system, competing_contract, no_interest]
        {
            assert_eq!(evaluate(&flags, threshold()), QualificationStatus::NotQualified);
        }
    }

    #[test]
    fn any_unknown_keeps_the_verdict_pending() {
        let no_bill = QualificationFlags { bill_value: None, ..all_true() };
        let unknown_decision_maker =
            QualificationFlags { is_decision_maker: None, ..all_true() };
        let unknown_system = QualificationFlags {
            has_existing_system: None,
            wants_new_system: None,
            ..all_true()
        };
        let unknown_contract =
            QualificationFlags { has_active_competing_contract: None, ..all_true() };
        let unknown_interest = QualificationFlags { explicit_interest: None, ..all_true() };

        for flags in
            [no_bill, unknown_decision_maker, unknown_system, unknown_contract, unknown_interest]
        {
            assert_eq!(evaluate(&flags, threshold()), QualificationStatus::Pending);
        }
    }

    #[test]
    fn decisive_false_wins_over_remaining_unknowns() {
        let flags = QualificationFlags {
            bill_value: None,
            is_decision_maker: Some(false),
            has_existing_system: None,
            wants_new_system: None,
            has_active_competing_contract: None,
            explicit_interest: None,
        };

        assert_eq!(evaluate(&flags, threshold()), QualificationStatus::NotQualified);
    }

    #[test]
    fn wanting_a_new_system_outweighs_owning_one() {
        let flags = QualificationFlags {
            has_existing_system: Some(true),
            wants_new_system: Some(true),
            ..all_true()
        };

        assert_eq!(evaluate(&flags, threshold()), QualificationStatus::Qualified);
    }

    #[test]
    fn existing_system_with_unknown_replacement_wish_stays_pending() {
        let flags = QualificationFlags {
            has_existing_system: Some(true),
            wants_new_system: None,
            ..all_true()
        };

        assert_eq!(evaluate(&flags, threshold()), QualificationStatus::Pending);
    }

    #[test]
    fn parses_plain_and_grouped_amounts() {
        assert_eq!(parse_bill_value("6000"), Some(Decimal::from(6000)));
        assert_eq!(parse_bill_value("R$ 6.000,00"), Some(Decimal::new(600_000, 2)));
        assert_eq!(parse_bill_value("$6,000.00"), Some(Decimal::new(600_000, 2)));
        assert_eq!(parse_bill_value("around 1.234.567"), Some(Decimal::from(1_234_567)));
        assert_eq!(parse_bill_value("2500,5"), Some(Decimal::new(25_005, 1)));
    }

    #[test]
    fn unparseable_bill_is_unknown_not_zero() {
        assert_eq!(parse_bill_value(""), None);
        assert_eq!(parse_bill_value("six thousand"), None);
        assert_eq!(parse_bill_value("R$"), None);

        let mut flags = all_true();
        flags.bill_value = parse_bill_value("no idea");
        assert_eq!(evaluate(&flags, threshold()), QualificationStatus::Pending);
    }
}
