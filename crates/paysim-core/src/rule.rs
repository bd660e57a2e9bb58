//! Declarative outcome rules and the rule matcher.
//!
//! A rule is a set of `dot.path → expected value` conditions plus the status
//! to apply when every condition holds. Paths are resolved against the
//! payment's JSON tree ([`Payment::match_tree`](crate::payment::Payment::match_tree)),
//! and both sides are compared by their string representation, so
//! `"amount": "150.00"` matches the formatted decimal the API returns.

use std::{cmp::Reverse, collections::BTreeMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
  Error, Result,
  outcome::{ForcedOutcome, parse_status_alias},
  payment::PaymentStatus,
};

/// A stored rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
  pub id:            String,
  pub name:          String,
  /// Outcome to apply. `charged_back` means "approve, then charge back".
  pub status:        PaymentStatus,
  pub status_detail: Option<String>,
  pub conditions:    BTreeMap<String, Value>,
  /// Higher wins; ties go to the earlier rule.
  pub priority:      i64,
  pub active:        bool,
  pub created_at:    DateTime<Utc>,
}

impl Rule {
  pub fn outcome(&self) -> Result<ForcedOutcome> {
    ForcedOutcome::from_status(self.status, self.status_detail.as_deref())
  }
}

/// Body of `POST /api/rules`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RuleRequest {
  pub name:          Option<String>,
  pub status:        Option<String>,
  pub status_detail: Option<String>,
  #[serde(default)]
  pub conditions:    BTreeMap<String, Value>,
  pub priority:      Option<i64>,
  pub active:        Option<bool>,
}

impl RuleRequest {
  pub fn into_rule(self, id: String, now: DateTime<Utc>) -> Result<Rule> {
    let name = self
      .name
      .map(|n| n.trim().to_owned())
      .filter(|n| !n.is_empty())
      .ok_or_else(|| Error::validation("rule name is required"))?;

    let raw_status = self
      .status
      .ok_or_else(|| Error::validation("rule status is required"))?;
    let (status, implied) = parse_status_alias(&raw_status)
      .ok_or_else(|| Error::validation(format!("unknown rule status {raw_status:?}")))?;
    let status_detail = self.status_detail.or(implied.map(str::to_owned));

    if self.conditions.is_empty() {
      return Err(Error::validation("a rule needs at least one condition"));
    }
    if self.conditions.keys().any(|k| k.trim().is_empty()) {
      return Err(Error::validation("condition paths must not be empty"));
    }

    let rule = Rule {
      id,
      name,
      status,
      status_detail,
      conditions: self.conditions,
      priority: self.priority.unwrap_or(0),
      active: self.active.unwrap_or(true),
      created_at: now,
    };
    rule.outcome()?;
    Ok(rule)
  }
}

// ─── Matching ────────────────────────────────────────────────────────────────

/// Resolve a dot-separated path against a JSON tree. Numeric segments index
/// into arrays. A missing segment yields `None`, never an error.
pub fn resolve_path<'v>(tree: &'v Value, path: &str) -> Option<&'v Value> {
  if path.is_empty() {
    return None;
  }
  path.split('.').try_fold(tree, |node, segment| match node {
    Value::Object(map) => map.get(segment),
    Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
    _ => None,
  })
}

/// The string form used for comparisons. `null` has none, so a condition on
/// a null or absent field never matches.
pub fn value_repr(value: &Value) -> Option<String> {
  match value {
    Value::Null => None,
    Value::String(s) => Some(s.clone()),
    Value::Bool(b) => Some(b.to_string()),
    Value::Number(n) => Some(n.to_string()),
    Value::Array(_) | Value::Object(_) => Some(value.to_string()),
  }
}

pub fn condition_holds(tree: &Value, path: &str, expected: &Value) -> bool {
  match (resolve_path(tree, path).and_then(value_repr), value_repr(expected)) {
    (Some(actual), Some(expected)) => actual == expected,
    _ => false,
  }
}

/// Return the winning rule and its outcome.
///
/// Active rules are ordered by priority (descending) then `created_at`
/// (ascending); the sort is stable, so rules created in the same instant
/// keep the order they were passed in. Every rule is evaluated so partial
/// matches can be reported. Rules without conditions, or with an outcome
/// that cannot be applied at creation, are skipped with a warning.
pub fn first_match<'r>(rules: &'r [Rule], tree: &Value) -> Option<(&'r Rule, ForcedOutcome)> {
  let mut ordered: Vec<&Rule> = rules.iter().filter(|r| r.active).collect();
  ordered.sort_by_key(|r| (Reverse(r.priority), r.created_at));

  let mut winner: Option<(&Rule, ForcedOutcome)> = None;
  let mut near_misses = 0usize;

  for rule in ordered {
    if rule.conditions.is_empty() {
      tracing::warn!(rule_id = %rule.id, "rule has no conditions; skipping");
      continue;
    }
    let outcome = match rule.outcome() {
      Ok(o) => o,
      Err(e) => {
        tracing::warn!(rule_id = %rule.id, error = %e, "rule outcome is unusable; skipping");
        continue;
      }
    };

    let held = rule
      .conditions
      .iter()
      .filter(|(path, expected)| condition_holds(tree, path, expected))
      .count();

    if held == rule.conditions.len() {
      if winner.is_none() {
        winner = Some((rule, outcome));
      }
    } else if held > 0 {
      near_misses += 1;
    }
  }

  tracing::debug!(
    matched = ?winner.as_ref().map(|(r, _)| r.id.as_str()),
    near_misses,
    "rules evaluated"
  );
  winner
}
