//! Prediction-vs-observation feedback.
//!
//! The environment compares the agent's prediction with the observed value
//! and answers with a directional intent plus a `<{SELF} --> [good]>`
//! judgment whose frequency is the relative accuracy of the prediction.

use crate::narsese::{encode, intent_judgment, join_message, ActionToken, Judgment, Truth, INTENT_CONFIDENCE};

/// Half-width of the band around the prediction that counts as "good".
pub const DEFAULT_DEADZONE: f64 = 1.0;

/// Relative accuracy of `observed` against `true_val`, clamped at zero.
pub fn confidence(true_val: f64, observed: f64) -> f64 {
    if true_val == 0.0 {
        return if observed == 0.0 { 1.0 } else { 0.0 };
    }
    let error = (observed - true_val).abs() / true_val.abs();
    (1.0 - error).max(0.0)
}

#[derive(Debug, Clone, PartialEq)]
pub struct Feedback {
    pub intent: ActionToken,
    pub judgment: Judgment,
}

impl Feedback {
    /// Wire statements in send order. The intent is omitted on hold.
    pub fn statements(&self) -> Vec<String> {
        let mut out = Vec::with_capacity(2);
        if self.intent != ActionToken::Hold {
            out.push(encode(&intent_judgment(self.intent)));
        }
        out.push(encode(&self.judgment));
        out
    }

    pub fn message(&self) -> String {
        join_message(&self.statements())
    }
}

pub fn evaluate(predicted: f64, observed: f64, deadzone: f64) -> Feedback {
    let (intent, frequency) = if observed > predicted + deadzone {
        (ActionToken::Up, confidence(predicted, observed))
    } else if observed < predicted - deadzone {
        (ActionToken::Down, confidence(predicted, observed))
    } else {
        (ActionToken::Hold, 1.0)
    };
    Feedback {
        intent,
        judgment: Judgment::fixed("SELF", "good", Truth::new(frequency, INTENT_CONFIDENCE)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confidence_at_zero() {
        assert_eq!(confidence(0.0, 0.0), 1.0);
        assert_eq!(confidence(0.0, 5.0), 0.0);
    }

    #[test]
    fn confidence_ratio() {
        assert_eq!(confidence(100.0, 100.0), 1.0);
        assert!((confidence(100.0, 90.0) - 0.9).abs() < 1e-12);
        assert!((confidence(100.0, 150.0) - 0.5).abs() < 1e-12);
        assert_eq!(confidence(100.0, 300.0), 0.0);
        assert!((confidence(-100.0, -90.0) - 0.9).abs() < 1e-12);
    }

    #[test]
    fn within_deadzone_holds_with_single_statement() {
        for (p, o) in [(100.0, 100.0), (100.0, 101.0), (100.0, 99.0), (0.0, 0.5), (50.0, 49.25)] {
            let fb = evaluate(p, o, DEFAULT_DEADZONE);
            assert_eq!(fb.intent, ActionToken::Hold);
            assert_eq!(fb.judgment.truth, Truth::new(1.0, 0.9));
            assert_eq!(fb.statements().len(), 1);
            assert_eq!(fb.message(), "<{SELF} --> [good]>. %1;0.9%");
        }
    }

    #[test]
    fn above_prediction_asks_up() {
        let fb = evaluate(100.0, 105.0, DEFAULT_DEADZONE);
        assert_eq!(fb.intent, ActionToken::Up);
        assert_eq!(
            fb.message(),
            "<{up} --> [on]>. %1;0.9%|<{SELF} --> [good]>. %0.95;0.9%"
        );
    }

    #[test]
    fn below_prediction_asks_down() {
        let fb = evaluate(50.0, 40.0, DEFAULT_DEADZONE);
        assert_eq!(fb.intent, ActionToken::Down);
        assert_eq!(
            fb.message(),
            "<{down} --> [on]>. %1;0.9%|<{SELF} --> [good]>. %0.8;0.9%"
        );
    }

    #[test]
    fn wider_deadzone_absorbs_error() {
        let fb = evaluate(100.0, 105.0, 10.0);
        assert_eq!(fb.intent, ActionToken::Hold);
    }
}
