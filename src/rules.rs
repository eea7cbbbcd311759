//! Rule Engine: declarative `(conditions[], actions[])` rules evaluated
//! against a context dictionary.
//!
//! Per-rule stats and bounded execution history use the same counter/gauge
//! bookkeeping style as the rest of the crate's metrics, generalized to a
//! per-rule map instead of fixed fields.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

use crate::telemetry::ring::BoundedRing;

pub type Context = HashMap<String, Value>;

const DEFAULT_HISTORY_CAPACITY: usize = 1000;

#[derive(Debug, Error, Clone)]
pub enum RuleError {
    #[error("rule {0} has no conditions")]
    NoConditions(String),
    #[error("rule {0} has no actions")]
    NoActions(String),
    #[error("rule {0} not found")]
    NotFound(String),
    #[error("rule {0} has an invalid regex pattern: {1}")]
    InvalidRegex(String, String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NumericOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StringOp {
    Eq,
    Ne,
    Contains,
    StartsWith,
    EndsWith,
    Regex,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BooleanOp {
    Eq,
    Ne,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArrayOp {
    Contains,
    Empty,
    NotEmpty,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Condition {
    Numeric { field: String, op: NumericOp, value: f64 },
    String { field: String, op: StringOp, value: String },
    Boolean { field: String, op: BooleanOp, value: bool },
    Array { field: String, op: ArrayOp, value: Option<Value> },
    /// Extension point: a conformant implementation MAY fail these with
    /// `not_implemented`. No custom predicates are registered
    /// here, so evaluation always fails with a recorded error.
    Custom { name: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Action {
    Log { message: String },
    Notification { message: String },
    Failover { target: String },
    Restore,
    Custom { name: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub id: String,
    pub name: String,
    pub priority: i32,
    pub conditions: Vec<Condition>,
    pub actions: Vec<Action>,
}

#[derive(Debug, Clone)]
pub struct ConditionResult {
    pub matched: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ActionResult {
    pub action: String,
    pub success: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RuleExecution {
    pub rule_id: String,
    pub matched: bool,
    pub condition_results: Vec<ConditionResult>,
    pub action_results: Vec<ActionResult>,
    pub duration: Duration,
    pub timestamp: Instant,
}

#[derive(Debug, Clone, Default)]
pub struct RuleStats {
    pub total: u64,
    pub triggered: u64,
    pub success: u64,
    pub errors: u64,
    pub avg_execution_ms: f64,
    pub last_triggered_at: Option<Instant>,
    pub last_error: Option<String>,
}

fn field_value<'a>(context: &'a Context, field: &str) -> Option<&'a Value> {
    context.get(field)
}

fn evaluate_numeric(context: &Context, field: &str, op: NumericOp, target: f64) -> ConditionResult {
    let Some(actual) = field_value(context, field).and_then(Value::as_f64) else {
        return ConditionResult { matched: false, error: Some(format!("field '{field}' missing or not numeric")) };
    };
    let matched = match op {
        NumericOp::Eq => (actual - target).abs() < f64::EPSILON,
        NumericOp::Ne => (actual - target).abs() >= f64::EPSILON,
        NumericOp::Gt => actual > target,
        NumericOp::Gte => actual >= target,
        NumericOp::Lt => actual < target,
        NumericOp::Lte => actual <= target,
    };
    ConditionResult { matched, error: None }
}

fn evaluate_string(context: &Context, field: &str, op: StringOp, target: &str) -> ConditionResult {
    let Some(actual) = field_value(context, field).and_then(Value::as_str) else {
        return ConditionResult { matched: false, error: Some(format!("field '{field}' missing or not a string")) };
    };
    let matched = match op {
        StringOp::Eq => actual == target,
        StringOp::Ne => actual != target,
        StringOp::Contains => actual.contains(target),
        StringOp::StartsWith => actual.starts_with(target),
        StringOp::EndsWith => actual.ends_with(target),
        StringOp::Regex => match Regex::new(target) {
            Ok(re) => re.is_match(actual),
            Err(e) => {
                return ConditionResult { matched: false, error: Some(format!("invalid regex '{target}': {e}")) };
            }
        },
    };
    ConditionResult { matched, error: None }
}

fn evaluate_boolean(context: &Context, field: &str, op: BooleanOp, target: bool) -> ConditionResult {
    let Some(actual) = field_value(context, field).and_then(Value::as_bool) else {
        return ConditionResult { matched: false, error: Some(format!("field '{field}' missing or not a boolean")) };
    };
    let matched = match op {
        BooleanOp::Eq => actual == target,
        BooleanOp::Ne => actual != target,
    };
    ConditionResult { matched, error: None }
}

fn evaluate_array(context: &Context, field: &str, op: ArrayOp, target: &Option<Value>) -> ConditionResult {
    let Some(actual) = field_value(context, field).and_then(Value::as_array) else {
        return ConditionResult { matched: false, error: Some(format!("field '{field}' missing or not an array")) };
    };
    let matched = match op {
        ArrayOp::Empty => actual.is_empty(),
        ArrayOp::NotEmpty => !actual.is_empty(),
        ArrayOp::Contains => match target {
            Some(v) => actual.contains(v),
            None => false,
        },
    };
    ConditionResult { matched, error: None }
}

fn evaluate_condition(context: &Context, condition: &Condition) -> ConditionResult {
    match condition {
        Condition::Numeric { field, op, value } => evaluate_numeric(context, field, *op, *value),
        Condition::String { field, op, value } => evaluate_string(context, field, *op, value),
        Condition::Boolean { field, op, value } => evaluate_boolean(context, field, *op, *value),
        Condition::Array { field, op, value } => evaluate_array(context, field, *op, value),
        Condition::Custom { name } => ConditionResult {
            matched: false,
            error: Some(format!("custom condition '{name}' not implemented")),
        },
    }
}

/// Execute one action. Actions never observe each other's results within a
/// rule; failures are recorded, not propagated.
fn execute_action(action: &Action) -> ActionResult {
    match action {
        Action::Log { message } => {
            tracing::info!(target: "rules", "{message}");
            ActionResult { action: "log".into(), success: true, error: None }
        }
        Action::Notification { message } => {
            tracing::warn!(target: "rules", "{message}");
            ActionResult { action: "notification".into(), success: true, error: None }
        }
        Action::Failover { target } => {
            // The rule engine records the intent; the Decision Engine owns
            // the actual Controller.switch call.
            ActionResult { action: format!("failover:{target}"), success: true, error: None }
        }
        Action::Restore => ActionResult { action: "restore".into(), success: true, error: None },
        Action::Custom { name } => ActionResult {
            action: format!("custom:{name}"),
            success: false,
            error: Some("not_implemented".into()),
        },
    }
}

pub struct RuleEngine {
    rules: RwLock<Vec<Rule>>,
    stats: RwLock<HashMap<String, RuleStats>>,
    history: RwLock<BoundedRing<RuleExecution>>,
}

impl RuleEngine {
    pub fn new() -> Self {
        Self::with_history_capacity(DEFAULT_HISTORY_CAPACITY)
    }

    pub fn with_history_capacity(capacity: usize) -> Self {
        Self {
            rules: RwLock::new(Vec::new()),
            stats: RwLock::new(HashMap::new()),
            history: RwLock::new(BoundedRing::new(capacity.max(1))),
        }
    }

    fn validate(rule: &Rule) -> Result<(), RuleError> {
        if rule.conditions.is_empty() {
            return Err(RuleError::NoConditions(rule.id.clone()));
        }
        if rule.actions.is_empty() {
            return Err(RuleError::NoActions(rule.id.clone()));
        }
        for condition in &rule.conditions {
            if let Condition::String { op: StringOp::Regex, value, .. } = condition {
                if let Err(e) = Regex::new(value) {
                    return Err(RuleError::InvalidRegex(rule.id.clone(), e.to_string()));
                }
            }
        }
        Ok(())
    }

    pub fn add_rule(&self, rule: Rule) -> Result<(), RuleError> {
        Self::validate(&rule)?;
        let mut rules = self.rules.write();
        rules.push(rule);
        rules.sort_by(|a, b| b.priority.cmp(&a.priority));
        Ok(())
    }

    pub fn remove_rule(&self, id: &str) -> Result<(), RuleError> {
        let mut rules = self.rules.write();
        let before = rules.len();
        rules.retain(|r| r.id != id);
        if rules.len() == before {
            return Err(RuleError::NotFound(id.to_string()));
        }
        Ok(())
    }

    pub fn update_rule(&self, rule: Rule) -> Result<(), RuleError> {
        Self::validate(&rule)?;
        let mut rules = self.rules.write();
        let Some(slot) = rules.iter_mut().find(|r| r.id == rule.id) else {
            return Err(RuleError::NotFound(rule.id));
        };
        *slot = rule;
        rules.sort_by(|a, b| b.priority.cmp(&a.priority));
        Ok(())
    }

    pub fn rule_count(&self) -> usize {
        self.rules.read().len()
    }

    fn run_one(rule: &Rule, context: &Context) -> RuleExecution {
        let started = Instant::now();
        let condition_results: Vec<ConditionResult> = rule.conditions.iter().map(|c| evaluate_condition(context, c)).collect();
        let matched = !condition_results.is_empty() && condition_results.iter().all(|r| r.matched);

        let action_results = if matched {
            rule.actions.iter().map(execute_action).collect()
        } else {
            Vec::new()
        };

        RuleExecution {
            rule_id: rule.id.clone(),
            matched,
            condition_results,
            action_results,
            duration: started.elapsed(),
            timestamp: started,
        }
    }

    fn record(&self, execution: RuleExecution) {
        let mut stats = self.stats.write();
        let entry = stats.entry(execution.rule_id.clone()).or_default();
        entry.total += 1;
        let sample_count = entry.total as f64;
        let elapsed_ms = execution.duration.as_secs_f64() * 1000.0;
        entry.avg_execution_ms += (elapsed_ms - entry.avg_execution_ms) / sample_count;

        if execution.matched {
            entry.triggered += 1;
            entry.last_triggered_at = Some(execution.timestamp);
            let had_error = execution.action_results.iter().any(|a| !a.success);
            if had_error {
                entry.errors += 1;
                entry.last_error = execution
                    .action_results
                    .iter()
                    .find(|a| !a.success)
                    .and_then(|a| a.error.clone());
            } else {
                entry.success += 1;
            }
        }

        self.history.write().push(execution);
    }

    /// Evaluate every rule against `context`, highest priority first.
    /// Sequential; use `execute_bounded` for bounded-parallel
    /// evaluation with a per-execution timeout.
    pub fn execute(&self, context: &Context) -> Vec<RuleExecution> {
        let rules = self.rules.read().clone();
        let mut results = Vec::with_capacity(rules.len());
        for rule in &rules {
            let execution = Self::run_one(rule, context);
            results.push(execution.clone());
            self.record(execution);
        }
        results
    }

    /// Bounded-parallel evaluation (≤ `max_concurrent`), each rule subject
    /// to `timeout`. A timed-out rule is recorded as an execution error but
    /// never aborts sibling rules.
    pub async fn execute_bounded(&self, context: &Context, max_concurrent: usize, timeout: Duration) -> Vec<RuleExecution> {
        use tokio::sync::Semaphore;

        let rules = self.rules.read().clone();
        let semaphore = std::sync::Arc::new(Semaphore::new(max_concurrent.max(1)));
        let context = std::sync::Arc::new(context.clone());

        let mut handles = Vec::with_capacity(rules.len());
        for rule in rules {
            let semaphore = semaphore.clone();
            let context = context.clone();
            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                match tokio::time::timeout(timeout, async { Self::run_one(&rule, &context) }).await {
                    Ok(execution) => execution,
                    Err(_) => RuleExecution {
                        rule_id: rule.id.clone(),
                        matched: false,
                        condition_results: vec![ConditionResult {
                            matched: false,
                            error: Some("rule evaluation timed out".into()),
                        }],
                        action_results: Vec::new(),
                        duration: timeout,
                        timestamp: Instant::now(),
                    },
                }
            }));
        }

        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.await {
                Ok(execution) => {
                    results.push(execution.clone());
                    self.record(execution);
                }
                Err(e) => warn!("rule evaluation task panicked: {e}"),
            }
        }
        results
    }

    pub fn stats(&self) -> HashMap<String, RuleStats> {
        self.stats.read().clone()
    }

    pub fn history(&self, limit: Option<usize>) -> Vec<RuleExecution> {
        let history = self.history.read();
        let mut out: Vec<RuleExecution> = history.iter().map(|e| e.clone()).collect();
        if let Some(limit) = limit {
            if out.len() > limit {
                let drop = out.len() - limit;
                out.drain(0..drop);
            }
        }
        out
    }
}

impl Default for RuleEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule_with_priority(id: &str, priority: i32) -> Rule {
        Rule {
            id: id.to_string(),
            name: id.to_string(),
            priority,
            conditions: vec![Condition::Numeric { field: "score".into(), op: NumericOp::Lt, value: 50.0 }],
            actions: vec![Action::Log { message: "low score".into() }],
        }
    }

    #[test]
    fn add_rule_rejects_empty_conditions() {
        let engine = RuleEngine::new();
        let rule = Rule { id: "r1".into(), name: "r1".into(), priority: 0, conditions: vec![], actions: vec![Action::Restore] };
        assert!(matches!(engine.add_rule(rule), Err(RuleError::NoConditions(_))));
    }

    #[test]
    fn add_rule_rejects_empty_actions() {
        let engine = RuleEngine::new();
        let rule = Rule {
            id: "r1".into(),
            name: "r1".into(),
            priority: 0,
            conditions: vec![Condition::Boolean { field: "ok".into(), op: BooleanOp::Eq, value: true }],
            actions: vec![],
        };
        assert!(matches!(engine.add_rule(rule), Err(RuleError::NoActions(_))));
    }

    #[test]
    fn rules_execute_in_priority_order() {
        let engine = RuleEngine::new();
        engine.add_rule(rule_with_priority("low", 1)).unwrap();
        engine.add_rule(rule_with_priority("high", 10)).unwrap();

        let mut ctx = Context::new();
        ctx.insert("score".into(), Value::from(10));
        let results = engine.execute(&ctx);
        assert_eq!(results[0].rule_id, "high");
        assert_eq!(results[1].rule_id, "low");
    }

    #[test]
    fn missing_field_fails_condition_without_aborting_others() {
        let engine = RuleEngine::new();
        engine.add_rule(rule_with_priority("a", 1)).unwrap();
        engine.add_rule(rule_with_priority("b", 2)).unwrap();

        let ctx = Context::new();
        let results = engine.execute(&ctx);
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| !r.matched));
        assert!(results.iter().all(|r| r.condition_results[0].error.is_some()));
    }

    #[test]
    fn stats_track_triggers_and_averages() {
        let engine = RuleEngine::new();
        engine.add_rule(rule_with_priority("a", 1)).unwrap();

        let mut ctx = Context::new();
        ctx.insert("score".into(), Value::from(10));
        engine.execute(&ctx);
        engine.execute(&ctx);

        let stats = engine.stats();
        let a = stats.get("a").unwrap();
        assert_eq!(a.total, 2);
        assert_eq!(a.triggered, 2);
        assert_eq!(a.success, 2);
    }

    #[test]
    fn regex_condition_matches() {
        let engine = RuleEngine::new();
        let rule = Rule {
            id: "regex-rule".into(),
            name: "regex".into(),
            priority: 0,
            conditions: vec![Condition::String {
                field: "iface".into(),
                op: StringOp::Regex,
                value: "^wwan[0-9]+$".into(),
            }],
            actions: vec![Action::Log { message: "matched".into() }],
        };
        engine.add_rule(rule).unwrap();

        let mut ctx = Context::new();
        ctx.insert("iface".into(), Value::from("wwan0"));
        let results = engine.execute(&ctx);
        assert!(results[0].matched);
    }

    #[test]
    fn invalid_regex_rejected_at_add_time() {
        let engine = RuleEngine::new();
        let rule = Rule {
            id: "bad-regex".into(),
            name: "bad".into(),
            priority: 0,
            conditions: vec![Condition::String { field: "iface".into(), op: StringOp::Regex, value: "(".into() }],
            actions: vec![Action::Log { message: "unreachable".into() }],
        };
        assert!(matches!(engine.add_rule(rule), Err(RuleError::InvalidRegex(_, _))));
    }

    #[test]
    fn custom_condition_fails_with_not_implemented() {
        let engine = RuleEngine::new();
        let rule = Rule {
            id: "custom".into(),
            name: "custom".into(),
            priority: 0,
            conditions: vec![Condition::Custom { name: "geo_fence".into() }],
            actions: vec![Action::Restore],
        };
        engine.add_rule(rule).unwrap();
        let results = engine.execute(&Context::new());
        assert!(!results[0].matched);
        assert!(results[0].condition_results[0].error.as_deref().unwrap().contains("not implemented"));
    }
}
