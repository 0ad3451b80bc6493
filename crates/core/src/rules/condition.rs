use crate::domain::rule::{Comparison, Metric, Predicate};
use crate::errors::RuleDefinitionError;

const OPERATORS: [&str; 6] = ["<=", ">=", "==", "!=", "<", ">"];

/// Binds a condition such as `supplier.quality_rating >= 4.0` to a typed predicate.
pub fn parse_condition(rule_id: &str, condition: &str) -> Result<Predicate, RuleDefinitionError> {
    let invalid = |reason: &str| RuleDefinitionError::InvalidCondition {
        rule_id: rule_id.to_owned(),
        condition: condition.to_owned(),
        reason: reason.to_owned(),
    };

    let trimmed = condition.trim();
    if trimmed.is_empty() {
        return Err(invalid("condition is empty"));
    }

    let (position, operator) = OPERATORS
        .iter()
        .filter_map(|operator| trimmed.find(operator).map(|position| (position, *operator)))
        .min_by_key(|(position, operator)| (*position, std::cmp::Reverse(operator.len())))
        .ok_or_else(|| invalid("missing comparison operator"))?;

    let comparison = match operator {
        "<=" => Comparison::AtMost,
        ">=" => Comparison::AtLeast,
        other => {
            return Err(RuleDefinitionError::UnsupportedComparison {
                rule_id: rule_id.to_owned(),
                operator: other.to_owned(),
            })
        }
    };

    let metric_name = trimmed[..position].trim();
    if metric_name.is_empty() {
        return Err(invalid("missing metric before operator"));
    }
    let metric = Metric::parse(metric_name).ok_or_else(|| RuleDefinitionError::UnknownMetric {
        rule_id: rule_id.to_owned(),
        metric: metric_name.to_owned(),
    })?;

    let raw_threshold = trimmed[position + operator.len()..].trim();
    let raw_threshold = raw_threshold.strip_suffix('%').unwrap_or(raw_threshold).trim();
    if raw_threshold.is_empty() {
        return Err(invalid("missing threshold after operator"));
    }
    let threshold =
        raw_threshold.parse::<f64>().map_err(|_| invalid("threshold is not a number"))?;
    if !threshold.is_finite() {
        return Err(invalid("threshold must be finite"));
    }

    Ok(Predicate { metric, comparison, threshold })
}
