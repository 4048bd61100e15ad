//! Conflict classification and resolution.

use crate::error::{ModelError, ModelResult};
use crate::similarity::text_similarity;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Below this similarity a text mismatch is graded high.
const TEXT_SIMILARITY_THRESHOLD: f64 = 0.5;

/// How much a field mismatch matters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Cosmetic difference.
    Low,
    /// Noticeable difference.
    Medium,
    /// Likely a real divergence.
    High,
    /// Money or identity at stake.
    Critical,
}

/// Strategy for settling a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResolutionStrategy {
    /// Keep the locally intended value.
    PreferLocal,
    /// Accept the platform's value.
    PreferRemote,
    /// Take the value from the more recently modified side.
    Timestamp,
    /// Combine both values by shape.
    Merge,
    /// Leave it to a human.
    Manual,
}

impl ResolutionStrategy {
    /// Returns the wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionStrategy::PreferLocal => "prefer-local",
            ResolutionStrategy::PreferRemote => "prefer-remote",
            ResolutionStrategy::Timestamp => "timestamp",
            ResolutionStrategy::Merge => "merge",
            ResolutionStrategy::Manual => "manual",
        }
    }

    /// Returns true if this strategy settles conflicts without a human.
    pub fn auto_resolves(&self) -> bool {
        !matches!(self, ResolutionStrategy::Manual)
    }

    /// Computes the resolved value, or `None` for manual resolution.
    ///
    /// `Timestamp` without both timestamps falls back to the local value;
    /// equal timestamps also keep the local value.
    pub fn apply(&self, local: &Value, remote: &Value, timestamps: Timestamps) -> Option<Value> {
        match self {
            ResolutionStrategy::PreferLocal => Some(local.clone()),
            ResolutionStrategy::PreferRemote => Some(remote.clone()),
            ResolutionStrategy::Timestamp => match (timestamps.local_ms, timestamps.remote_ms) {
                (Some(l), Some(r)) if r > l => Some(remote.clone()),
                _ => Some(local.clone()),
            },
            ResolutionStrategy::Merge => Some(merge_values(local, remote)),
            ResolutionStrategy::Manual => None,
        }
    }
}

impl Default for ResolutionStrategy {
    fn default() -> Self {
        ResolutionStrategy::PreferLocal
    }
}

impl fmt::Display for ResolutionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResolutionStrategy {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [
            ResolutionStrategy::PreferLocal,
            ResolutionStrategy::PreferRemote,
            ResolutionStrategy::Timestamp,
            ResolutionStrategy::Merge,
            ResolutionStrategy::Manual,
        ]
        .into_iter()
        .find(|strategy| strategy.as_str() == s)
        .ok_or_else(|| ModelError::UnknownVariant {
            what: "resolution strategy",
            value: s.to_string(),
        })
    }
}

/// Last-modified instants of both sides, in Unix epoch milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Timestamps {
    /// Local modification time.
    pub local_ms: Option<u64>,
    /// Remote modification time.
    pub remote_ms: Option<u64>,
}

/// Shape of a compared field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    /// SKU, handle, barcode and other identifying keys.
    Identifier,
    /// Prices, quantities, weights.
    Numeric,
    /// Titles and descriptions.
    Text,
    /// Tags, image lists.
    List,
}

/// A field the detector compares, with its importance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    /// Payload key.
    pub name: String,
    /// Field shape.
    pub kind: FieldKind,
    /// Severity assigned to a mismatch.
    pub importance: Severity,
}

impl FieldSpec {
    /// Creates a field spec.
    pub fn new(name: impl Into<String>, kind: FieldKind, importance: Severity) -> Self {
        Self {
            name: name.into(),
            kind,
            importance,
        }
    }

    /// Field set compared for catalog products by default.
    pub fn catalog_defaults() -> Vec<FieldSpec> {
        vec![
            FieldSpec::new("price", FieldKind::Numeric, Severity::Critical),
            FieldSpec::new("compare_at_price", FieldKind::Numeric, Severity::High),
            FieldSpec::new("sku", FieldKind::Identifier, Severity::High),
            FieldSpec::new("handle", FieldKind::Identifier, Severity::High),
            FieldSpec::new("barcode", FieldKind::Identifier, Severity::High),
            FieldSpec::new("inventory_quantity", FieldKind::Numeric, Severity::High),
            FieldSpec::new("title", FieldKind::Text, Severity::Medium),
            FieldSpec::new("name", FieldKind::Text, Severity::Medium),
            FieldSpec::new("status", FieldKind::Identifier, Severity::Medium),
            FieldSpec::new("vendor", FieldKind::Text, Severity::Low),
            FieldSpec::new("description", FieldKind::Text, Severity::Low),
            FieldSpec::new("body_html", FieldKind::Text, Severity::Low),
            FieldSpec::new("tags", FieldKind::List, Severity::Low),
            FieldSpec::new("images", FieldKind::List, Severity::Low),
        ]
    }

    /// Grades a mismatch on this field.
    ///
    /// Text fields with strings on both sides are graded by similarity:
    /// high below the threshold, medium otherwise.
    pub fn severity_for(&self, local: &Value, remote: &Value) -> Severity {
        match (self.kind, local, remote) {
            (FieldKind::Text, Value::String(l), Value::String(r)) => {
                if text_similarity(l, r) < TEXT_SIMILARITY_THRESHOLD {
                    Severity::High
                } else {
                    Severity::Medium
                }
            }
            _ => self.importance,
        }
    }
}

/// A disagreement between the local and remote value of one field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictItem {
    /// Entity the field belongs to.
    pub entity_id: i64,
    /// Payload key.
    pub field_name: String,
    /// Value the operation intends to write.
    pub local_value: Value,
    /// Value currently held by the platform.
    pub remote_value: Value,
    /// Graded importance.
    pub severity: Severity,
    /// Strategy assigned to this conflict.
    pub strategy: ResolutionStrategy,
    resolved_value: Option<Value>,
}

impl ConflictItem {
    /// Creates an unresolved conflict.
    pub fn new(
        entity_id: i64,
        field_name: impl Into<String>,
        local_value: Value,
        remote_value: Value,
        severity: Severity,
        strategy: ResolutionStrategy,
    ) -> Self {
        Self {
            entity_id,
            field_name: field_name.into(),
            local_value,
            remote_value,
            severity,
            strategy,
            resolved_value: None,
        }
    }

    /// Value chosen by resolution, if resolved.
    pub fn resolved_value(&self) -> Option<&Value> {
        self.resolved_value.as_ref()
    }

    /// Returns true if the conflict has been resolved.
    pub fn is_resolved(&self) -> bool {
        self.resolved_value.is_some()
    }

    /// Returns true if this conflict holds its operation back.
    pub fn is_blocking(&self) -> bool {
        !self.is_resolved()
    }

    /// Settles the conflict with an explicit value.
    pub fn resolve(&mut self, value: Value) -> ModelResult<()> {
        if self.is_resolved() {
            return Err(ModelError::AlreadyResolved {
                entity_id: self.entity_id,
                field: self.field_name.clone(),
            });
        }
        self.resolved_value = Some(value);
        Ok(())
    }

    /// Settles the conflict with its own strategy.
    ///
    /// Returns false when the strategy is manual and the conflict stays open.
    pub fn auto_resolve(&mut self, timestamps: Timestamps) -> ModelResult<bool> {
        match self
            .strategy
            .apply(&self.local_value, &self.remote_value, timestamps)
        {
            Some(value) => {
                self.resolve(value)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

/// Returns true if two field values should be considered the same.
///
/// Numbers compare numerically so `10` equals `10.0`.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => x == y,
        },
        _ => a == b,
    }
}

/// Merges two values by shape.
///
/// Numbers take the higher value, strings the longer one, arrays are
/// concatenated local-first. Anything else keeps the local value.
pub fn merge_values(local: &Value, remote: &Value) -> Value {
    match (local, remote) {
        (Value::Number(l), Value::Number(r)) => match (l.as_f64(), r.as_f64()) {
            (Some(lf), Some(rf)) if rf > lf => remote.clone(),
            _ => local.clone(),
        },
        (Value::String(l), Value::String(r)) => {
            if r.chars().count() > l.chars().count() {
                remote.clone()
            } else {
                local.clone()
            }
        }
        (Value::Array(l), Value::Array(r)) => {
            let mut merged = l.clone();
            merged.extend(r.iter().cloned());
            Value::Array(merged)
        }
        _ => local.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn price_conflict(strategy: ResolutionStrategy) -> ConflictItem {
        ConflictItem::new(
            7,
            "price",
            json!(10),
            json!(20),
            Severity::Critical,
            strategy,
        )
    }

    #[test]
    fn prefer_local_and_merge_on_price() {
        let mut item = price_conflict(ResolutionStrategy::PreferLocal);
        assert!(item.auto_resolve(Timestamps::default()).unwrap());
        assert_eq!(item.resolved_value(), Some(&json!(10)));

        let mut item = price_conflict(ResolutionStrategy::Merge);
        assert!(item.auto_resolve(Timestamps::default()).unwrap());
        assert_eq!(item.resolved_value(), Some(&json!(20)));

        let mut item = price_conflict(ResolutionStrategy::PreferRemote);
        item.auto_resolve(Timestamps::default()).unwrap();
        assert_eq!(item.resolved_value(), Some(&json!(20)));
    }

    #[test]
    fn timestamp_strategy() {
        let newer_remote = Timestamps {
            local_ms: Some(1_000),
            remote_ms: Some(2_000),
        };
        let newer_local = Timestamps {
            local_ms: Some(3_000),
            remote_ms: Some(2_000),
        };
        let strategy = ResolutionStrategy::Timestamp;
        assert_eq!(
            strategy.apply(&json!("a"), &json!("b"), newer_remote),
            Some(json!("b"))
        );
        assert_eq!(
            strategy.apply(&json!("a"), &json!("b"), newer_local),
            Some(json!("a"))
        );
        assert_eq!(
            strategy.apply(&json!("a"), &json!("b"), Timestamps::default()),
            Some(json!("a"))
        );
    }

    #[test]
    fn manual_stays_open_until_resolved() {
        let mut item = price_conflict(ResolutionStrategy::Manual);
        assert!(!item.auto_resolve(Timestamps::default()).unwrap());
        assert!(item.is_blocking());
        assert!(item.resolved_value().is_none());

        item.resolve(json!(15)).unwrap();
        assert!(!item.is_blocking());
        assert!(matches!(
            item.resolve(json!(16)),
            Err(ModelError::AlreadyResolved { entity_id: 7, .. })
        ));
        assert_eq!(item.resolved_value(), Some(&json!(15)));
    }

    #[test]
    fn merge_rules() {
        assert_eq!(merge_values(&json!(3.5), &json!(2)), json!(3.5));
        assert_eq!(merge_values(&json!("short"), &json!("much longer")), json!("much longer"));
        assert_eq!(merge_values(&json!("same"), &json!("size")), json!("same"));
        assert_eq!(merge_values(&json!(["a"]), &json!(["b", "c"])), json!(["a", "b", "c"]));
        assert_eq!(merge_values(&json!("text"), &json!(4)), json!("text"));
    }

    #[test]
    fn numeric_equality() {
        assert!(values_equal(&json!(10), &json!(10.0)));
        assert!(!values_equal(&json!(10), &json!("10")));
        assert!(values_equal(&json!({"a": 1}), &json!({"a": 1})));
    }

    #[test]
    fn severity_grading() {
        let title = FieldSpec::new("title", FieldKind::Text, Severity::Low);
        assert_eq!(
            title.severity_for(&json!("Blue Shirt"), &json!("Blue Shirts")),
            Severity::Medium
        );
        assert_eq!(
            title.severity_for(&json!("Blue Shirt"), &json!("Garden hose reel")),
            Severity::High
        );
        assert_eq!(title.severity_for(&json!("x"), &json!(null)), Severity::Low);

        let price = FieldSpec::new("price", FieldKind::Numeric, Severity::Critical);
        assert_eq!(price.severity_for(&json!(1), &json!(2)), Severity::Critical);
    }

    #[test]
    fn strategy_names() {
        assert_eq!(
            "prefer-remote".parse::<ResolutionStrategy>().unwrap(),
            ResolutionStrategy::PreferRemote
        );
        assert!("coin-flip".parse::<ResolutionStrategy>().is_err());
        assert!(!ResolutionStrategy::Manual.auto_resolves());
    }
}
