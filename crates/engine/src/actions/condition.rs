//! Conditional branching on run data

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use super::template::lookup_path;
use super::{parse_config, ActionContext, ActionError, ActionHandler, ActionKind, ActionOutcome};

/// Comparison applied to the field value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    Equals,
    NotEquals,
    Contains,
    Exists,
    NotExists,
    GreaterThan,
    LessThan,
}

impl ConditionOperator {
    /// Evaluate against the looked-up `field` value and the expected `value`
    pub fn evaluate(&self, field: Option<&Value>, value: &Value) -> bool {
        match self {
            Self::Exists => field.is_some_and(|f| !f.is_null()),
            Self::NotExists => field.map_or(true, Value::is_null),
            Self::Equals => field.is_some_and(|f| loosely_equal(f, value)),
            Self::NotEquals => !field.is_some_and(|f| loosely_equal(f, value)),
            Self::Contains => match field {
                Some(Value::String(s)) => value.as_str().is_some_and(|v| s.contains(v)),
                Some(Value::Array(items)) => items.iter().any(|i| loosely_equal(i, value)),
                Some(Value::Object(map)) => value.as_str().is_some_and(|k| map.contains_key(k)),
                _ => false,
            },
            Self::GreaterThan => compare(field, value).is_some_and(|(a, b)| a > b),
            Self::LessThan => compare(field, value).is_some_and(|(a, b)| a < b),
        }
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn compare(field: Option<&Value>, value: &Value) -> Option<(f64, f64)> {
    Some((as_number(field?)?, as_number(value)?))
}

/// Equality that treats `"42"` and `42` as equal
fn loosely_equal(a: &Value, b: &Value) -> bool {
    if a == b {
        return true;
    }
    match (as_number(a), as_number(b)) {
        (Some(x), Some(y)) => x == y,
        _ => false,
    }
}

fn default_halt() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct ConditionConfig {
    /// Dotted path into the run scope, e.g. `event.payload.score`
    field: String,
    operator: ConditionOperator,
    #[serde(default)]
    value: Value,
    /// Skip the remaining steps when the condition is false
    #[serde(default = "default_halt")]
    halt_on_false: bool,
}

/// Evaluates a condition; a false result can halt the run
pub struct ConditionAction;

#[async_trait]
impl ActionHandler for ConditionAction {
    fn kind(&self) -> ActionKind {
        ActionKind::EvaluateCondition
    }

    async fn execute(
        &self,
        ctx: &ActionContext<'_>,
        config: &Value,
    ) -> Result<ActionOutcome, ActionError> {
        let config: ConditionConfig = parse_config(config)?;
        if config.field.trim().is_empty() {
            return Err(ActionError::invalid_config("field must not be empty"));
        }

        let actual = lookup_path(ctx.scope, config.field.trim());
        let matched = config.operator.evaluate(actual, &config.value);

        let result = json!({
            "action": ActionKind::EvaluateCondition.as_str(),
            "field": config.field,
            "actual": actual,
            "matched": matched,
        });

        if !matched && config.halt_on_false {
            return Ok(ActionOutcome::Halt(result));
        }
        Ok(ActionOutcome::Completed(result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::testing;
    use crate::persistence::InMemoryAutomationStore;
    use chrono::Utc;

    #[test]
    fn test_operators() {
        let n = json!(42);
        let s = json!("dental clinic");
        let tags = json!(["vip", "new"]);

        assert!(ConditionOperator::Equals.evaluate(Some(&n), &json!("42")));
        assert!(ConditionOperator::NotEquals.evaluate(Some(&n), &json!(41)));
        assert!(ConditionOperator::NotEquals.evaluate(None, &json!(41)));
        assert!(ConditionOperator::Contains.evaluate(Some(&s), &json!("clinic")));
        assert!(ConditionOperator::Contains.evaluate(Some(&tags), &json!("vip")));
        assert!(ConditionOperator::GreaterThan.evaluate(Some(&n), &json!(10)));
        assert!(!ConditionOperator::LessThan.evaluate(Some(&s), &json!(10)));
        assert!(ConditionOperator::Exists.evaluate(Some(&n), &Value::Null));
        assert!(ConditionOperator::NotExists.evaluate(Some(&Value::Null), &Value::Null));
    }

    async fn execute(config: Value) -> ActionOutcome {
        let store = InMemoryAutomationStore::new();
        let run = testing::run(json!({}));
        let job = testing::job(&run, ActionKind::EvaluateCondition);
        let scope = json!({"event": {"payload": {"score": 80}}});
        let ctx = ActionContext {
            store: &store,
            run: &run,
            job: &job,
            scope: &scope,
            now: Utc::now(),
        };
        ConditionAction.execute(&ctx, &config).await.unwrap()
    }

    #[tokio::test]
    async fn test_true_condition_completes() {
        let outcome = execute(json!({
            "field": "event.payload.score",
            "operator": "greater_than",
            "value": 50
        }))
        .await;

        assert!(matches!(outcome, ActionOutcome::Completed(ref r) if r["matched"] == true));
    }

    #[tokio::test]
    async fn test_false_condition_halts_by_default() {
        let outcome = execute(json!({
            "field": "event.payload.score",
            "operator": "less_than",
            "value": 50
        }))
        .await;
        assert!(matches!(outcome, ActionOutcome::Halt(_)));

        let outcome = execute(json!({
            "field": "event.payload.score",
            "operator": "less_than",
            "value": 50,
            "halt_on_false": false
        }))
        .await;
        assert!(matches!(outcome, ActionOutcome::Completed(ref r) if r["matched"] == false));
    }
}
