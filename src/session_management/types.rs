use serde::Deserialize;

use crate::error_handling::types::ServiceError;
use crate::storage::types::{EndReason, NewRiskEstimation, RoundOutcome};

/// Cards on a board when the client does not say otherwise.
pub const DEFAULT_TOTAL_CARDS: i64 = 16;
/// Largest board a round may report.
pub const MAX_TOTAL_CARDS: i64 = 64;
/// Ceiling for the bonus, penalty and running bonus of a single round.
pub const MAX_ROUND_AMOUNT: i64 = 1_000_000_000;
/// One day, in milliseconds.
pub const MAX_DURATION_MS: i64 = 86_400_000;

/// A round result as reported by the client, before validation.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundReport {
    pub flipped_cards: i64,
    #[serde(default)]
    pub round_bonus: i64,
    pub end_reason: String,
    #[serde(default)]
    pub penalty_amount: i64,
    #[serde(default)]
    pub bomb_count: i64,
    #[serde(default)]
    pub total_bonus_after: i64,
    #[serde(default)]
    pub total_cards: Option<i64>,
    #[serde(default)]
    pub duration_ms: Option<i64>,
}

impl RoundReport {
    /// Check the report and turn it into a ledger outcome.
    ///
    /// The penalty only counts for rounds that ended on a bomb; it is zeroed otherwise.
    pub fn validate(&self) -> Result<RoundOutcome, ServiceError> {
        let end_reason = self
            .end_reason
            .parse::<EndReason>()
            .map_err(ServiceError::Validation)?;
        let total_cards = self.total_cards.unwrap_or(DEFAULT_TOTAL_CARDS);
        let duration_ms = self.duration_ms.unwrap_or(0);

        if total_cards <= 0 || total_cards > MAX_TOTAL_CARDS {
            return Err(ServiceError::Validation(format!(
                "totalCards must be between 1 and {}",
                MAX_TOTAL_CARDS
            )));
        }
        if self.flipped_cards < 0 || self.flipped_cards > total_cards {
            return Err(ServiceError::Validation(format!(
                "flippedCards must be between 0 and {}",
                total_cards
            )));
        }
        if self.bomb_count < 0 || self.bomb_count > total_cards {
            return Err(ServiceError::Validation(format!(
                "bombCount must be between 0 and {}",
                total_cards
            )));
        }
        if !(0..=MAX_ROUND_AMOUNT).contains(&self.penalty_amount) {
            return Err(ServiceError::Validation(format!(
                "penaltyAmount must be between 0 and {}",
                MAX_ROUND_AMOUNT
            )));
        }
        if !(-MAX_ROUND_AMOUNT..=MAX_ROUND_AMOUNT).contains(&self.round_bonus) {
            return Err(ServiceError::Validation(format!(
                "roundBonus must be within {}",
                MAX_ROUND_AMOUNT
            )));
        }
        if !(-MAX_ROUND_AMOUNT..=MAX_ROUND_AMOUNT).contains(&self.total_bonus_after) {
            return Err(ServiceError::Validation(format!(
                "totalBonusAfter must be within {}",
                MAX_ROUND_AMOUNT
            )));
        }
        if !(0..=MAX_DURATION_MS).contains(&duration_ms) {
            return Err(ServiceError::Validation(format!(
                "durationMs must be between 0 and {}",
                MAX_DURATION_MS
            )));
        }

        let penalty_amount = if end_reason == EndReason::Bomb {
            self.penalty_amount
        } else {
            0
        };

        if self.round_bonus.checked_sub(penalty_amount).is_none() {
            return Err(ServiceError::Validation(
                "roundBonus minus penaltyAmount is out of range".to_string(),
            ));
        }

        Ok(RoundOutcome {
            flipped_cards: self.flipped_cards,
            round_bonus: self.round_bonus,
            end_reason,
            penalty_amount,
            bomb_count: self.bomb_count,
            total_bonus_after: self.total_bonus_after,
            total_cards,
            duration_ms,
        })
    }
}

/// A client belief about the bomb probability at some flip count.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskReport {
    #[serde(rename = "sessionId")]
    pub session_key: String,
    #[serde(default)]
    pub round_number: Option<i64>,
    pub actual_bomb_prob: f64,
    pub flipped_count: i64,
}

impl RiskReport {
    pub fn validate(&self) -> Result<NewRiskEstimation, ServiceError> {
        if self.session_key.trim().is_empty() {
            return Err(ServiceError::Validation("sessionId is required".to_string()));
        }
        if !(0.0..=1.0).contains(&self.actual_bomb_prob) {
            return Err(ServiceError::Validation(
                "actualBombProb must be between 0 and 1".to_string(),
            ));
        }
        if self.flipped_count < 0 {
            return Err(ServiceError::Validation(
                "flippedCount cannot be negative".to_string(),
            ));
        }
        if matches!(self.round_number, Some(n) if n < 1) {
            return Err(ServiceError::Validation(
                "roundNumber starts at 1".to_string(),
            ));
        }
        Ok(NewRiskEstimation {
            session_key: self.session_key.trim().to_string(),
            round_number: self.round_number,
            actual_bomb_prob: self.actual_bomb_prob,
            flipped_count: self.flipped_count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(end_reason: &str) -> RoundReport {
        RoundReport {
            flipped_cards: 4,
            round_bonus: 20,
            end_reason: end_reason.to_string(),
            penalty_amount: 50,
            bomb_count: 1,
            total_bonus_after: 120,
            total_cards: None,
            duration_ms: Some(3200),
        }
    }

    #[test]
    fn test_penalty_only_kept_for_bombs() {
        let bomb = report("bomb").validate().unwrap();
        assert_eq!(bomb.penalty_amount, 50);
        assert_eq!(bomb.total_cards, DEFAULT_TOTAL_CARDS);

        let stop = report("stop").validate().unwrap();
        assert_eq!(stop.penalty_amount, 0);
        assert_eq!(stop.end_reason, EndReason::Stop);
    }

    #[test]
    fn test_round_report_rejections() {
        assert!(matches!(
            report("quit").validate(),
            Err(ServiceError::Validation(_))
        ));

        let mut too_many = report("win");
        too_many.flipped_cards = 17;
        assert!(too_many.validate().is_err());

        let mut negative = report("stop");
        negative.flipped_cards = -1;
        assert!(negative.validate().is_err());

        let mut slow = report("stop");
        slow.duration_ms = Some(-5);
        assert!(slow.validate().is_err());
    }

    #[test]
    fn test_round_report_ceilings() {
        let mut huge_board = report("win");
        huge_board.total_cards = Some(i64::MAX);
        huge_board.flipped_cards = i64::MAX;
        assert!(matches!(
            huge_board.validate(),
            Err(ServiceError::Validation(_))
        ));

        let mut max_board = report("win");
        max_board.total_cards = Some(MAX_TOTAL_CARDS);
        max_board.flipped_cards = MAX_TOTAL_CARDS;
        assert!(max_board.validate().is_ok());

        let mut rich = report("stop");
        rich.round_bonus = MAX_ROUND_AMOUNT + 1;
        assert!(rich.validate().is_err());

        let mut fined = report("bomb");
        fined.penalty_amount = i64::MAX;
        assert!(fined.validate().is_err());

        let mut running = report("stop");
        running.total_bonus_after = i64::MIN;
        assert!(running.validate().is_err());

        let mut bombs = report("bomb");
        bombs.bomb_count = 17;
        assert!(bombs.validate().is_err());

        let mut long = report("stop");
        long.duration_ms = Some(MAX_DURATION_MS + 1);
        assert!(long.validate().is_err());
    }

    #[test]
    fn test_minimum_bonus_with_penalty_is_rejected() {
        let mut underflow = report("bomb");
        underflow.round_bonus = i64::MIN;
        underflow.penalty_amount = 1;
        assert!(matches!(
            underflow.validate(),
            Err(ServiceError::Validation(_))
        ));

        let mut floor = report("bomb");
        floor.round_bonus = -MAX_ROUND_AMOUNT;
        floor.penalty_amount = MAX_ROUND_AMOUNT;
        assert_eq!(floor.validate().unwrap().balance_delta(), -2 * MAX_ROUND_AMOUNT);
    }

    #[test]
    fn test_round_report_from_json() {
        let json = r#"{"flippedCards":3,"roundBonus":15,"endReason":"win","totalBonusAfter":15}"#;
        let parsed: RoundReport = serde_json::from_str(json).unwrap();
        let outcome = parsed.validate().unwrap();
        assert_eq!(outcome.flipped_cards, 3);
        assert_eq!(outcome.bomb_count, 0);
        assert_eq!(outcome.duration_ms, 0);
    }

    #[test]
    fn test_risk_report_bounds() {
        let mut risk = RiskReport {
            session_key: "s-1".to_string(),
            round_number: None,
            actual_bomb_prob: 0.4,
            flipped_count: 2,
        };
        assert!(risk.validate().is_ok());

        risk.actual_bomb_prob = 1.2;
        assert!(risk.validate().is_err());
        risk.actual_bomb_prob = f64::NAN;
        assert!(risk.validate().is_err());
        risk.actual_bomb_prob = 0.0;
        risk.flipped_count = -1;
        assert!(risk.validate().is_err());
    }
}
