//! Conflict detection against the platform's current state.

use crate::client::{PlatformClient, RemoteEntity};
use crate::config::ConflictConfig;
use crate::error::PlatformError;
use catsync_model::{
    values_equal, ConflictItem, ModelError, ModelResult, Operation, Payload, Timestamps,
};
use std::collections::HashMap;
use tracing::debug;

/// Local payload key carrying the local modification time (epoch millis).
pub const LOCAL_UPDATED_AT_KEY: &str = "updated_at";

/// Compares intended field values with remote ones and resolves mismatches.
pub struct ConflictDetector {
    config: ConflictConfig,
}

impl ConflictDetector {
    /// Creates a detector.
    pub fn new(config: ConflictConfig) -> Self {
        Self { config }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &ConflictConfig {
        &self.config
    }

    /// Lists unresolved conflicts between a local payload and a remote entity.
    ///
    /// Only configured fields present on both sides are compared.
    pub fn detect(&self, entity_id: i64, local: &Payload, remote: &Payload) -> Vec<ConflictItem> {
        self.config
            .fields
            .iter()
            .filter_map(|spec| {
                let local_value = local.get(&spec.name)?;
                let remote_value = remote.get(&spec.name)?;
                if values_equal(local_value, remote_value) {
                    return None;
                }
                Some(ConflictItem::new(
                    entity_id,
                    spec.name.clone(),
                    local_value.clone(),
                    remote_value.clone(),
                    spec.severity_for(local_value, remote_value),
                    self.config.strategy_for(&spec.name),
                ))
            })
            .collect()
    }

    /// Checks an operation against remote state, folding automatic resolutions
    /// into its payload.
    ///
    /// Returns every conflict found; the ones still unresolved are manual and
    /// block the operation. Operations that do not target existing entities,
    /// or whose conflicts a human already settled, are never checked.
    pub fn check<C: PlatformClient + ?Sized>(
        &self,
        op: &mut Operation,
        client: &C,
    ) -> Result<Vec<ConflictItem>, PlatformError> {
        if !self.config.enabled || !op.kind().targets_existing() || op.conflicts_settled() {
            return Ok(Vec::new());
        }

        let targets = targets_of(op).map_err(validation)?;
        let mut remote_cache: HashMap<i64, Option<RemoteEntity>> = HashMap::new();
        let mut conflicts = Vec::new();

        for (entity_ids, payload) in &targets {
            let local_ms = payload.get(LOCAL_UPDATED_AT_KEY).and_then(|v| v.as_u64());
            for entity_id in entity_ids {
                if !remote_cache.contains_key(entity_id) {
                    let fetched = client.fetch_remote(*entity_id)?;
                    remote_cache.insert(*entity_id, fetched);
                }
                let Some(Some(remote)) = remote_cache.get(entity_id) else {
                    continue;
                };

                let timestamps = Timestamps {
                    local_ms,
                    remote_ms: remote.updated_at_ms,
                };
                for mut item in self.detect(*entity_id, payload, &remote.fields) {
                    item.auto_resolve(timestamps).map_err(validation)?;
                    conflicts.push(item);
                }
            }
        }

        if !conflicts.is_empty() {
            debug!(
                operation = %op.id(),
                found = conflicts.len(),
                blocking = conflicts.iter().filter(|c| c.is_blocking()).count(),
                "conflicts detected"
            );
            apply_resolutions(op, &conflicts).map_err(validation)?;
        }
        Ok(conflicts)
    }
}

fn validation(err: ModelError) -> PlatformError {
    PlatformError::Validation(err.to_string())
}

/// (entity ids, payload) pairs the operation writes.
fn targets_of(op: &Operation) -> ModelResult<Vec<(Vec<i64>, Payload)>> {
    if op.kind().is_bulk() {
        Ok(op
            .batch_items()?
            .into_iter()
            .map(|item| (item.entity_ids, item.payload))
            .collect())
    } else {
        Ok(vec![(op.entity_ids().to_vec(), op.payload().clone())])
    }
}

/// Writes every resolved conflict value back into the operation's payload.
///
/// For bulk operations the value lands in each original whose targets
/// include the conflict's entity.
pub fn apply_resolutions(op: &mut Operation, conflicts: &[ConflictItem]) -> ModelResult<()> {
    let resolved: Vec<&ConflictItem> = conflicts.iter().filter(|c| c.is_resolved()).collect();
    if resolved.is_empty() {
        return Ok(());
    }

    if op.kind().is_bulk() {
        let mut items = op.batch_items()?;
        for conflict in &resolved {
            for item in items
                .iter_mut()
                .filter(|item| item.entity_ids.contains(&conflict.entity_id))
            {
                if let Some(value) = conflict.resolved_value() {
                    item.payload
                        .insert(conflict.field_name.clone(), value.clone());
                }
            }
        }
        op.set_batch_items(&items)
    } else {
        let payload = op.payload_mut()?;
        for conflict in resolved {
            if let Some(value) = conflict.resolved_value() {
                payload.insert(conflict.field_name.clone(), value.clone());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MockPlatformClient;
    use catsync_model::{OperationKind, Priority, ResolutionStrategy, Severity};
    use serde_json::{json, Value};

    fn payload(pairs: &[(&str, Value)]) -> Payload {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn update(id: i64, fields: Payload) -> Operation {
        Operation::new(OperationKind::Update, vec![id], Priority::Normal, fields).unwrap()
    }

    #[test]
    fn identical_records_have_no_conflicts() {
        let detector = ConflictDetector::new(ConflictConfig::default());
        let record = payload(&[
            ("title", json!("Blue Shirt")),
            ("price", json!(10)),
            ("tags", json!(["cotton"])),
        ]);
        assert!(detector.detect(1, &record, &record.clone()).is_empty());
    }

    #[test]
    fn price_mismatch_is_critical() {
        let detector = ConflictDetector::new(ConflictConfig::default());
        let conflicts = detector.detect(
            1,
            &payload(&[("price", json!(10))]),
            &payload(&[("price", json!(20))]),
        );
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].severity, Severity::Critical);
        assert_eq!(conflicts[0].strategy, ResolutionStrategy::PreferLocal);
    }

    #[test]
    fn unconfigured_and_one_sided_fields_are_ignored() {
        let detector = ConflictDetector::new(ConflictConfig::default());
        let conflicts = detector.detect(
            1,
            &payload(&[("internal_note", json!("a")), ("price", json!(5))]),
            &payload(&[("internal_note", json!("b"))]),
        );
        assert!(conflicts.is_empty());
    }

    #[test]
    fn check_folds_prefer_local_and_merge() {
        let client = MockPlatformClient::new();
        client.insert_remote(RemoteEntity::new(1, payload(&[("price", json!(20))])));

        let detector = ConflictDetector::new(ConflictConfig::default());
        let mut op = update(1, payload(&[("price", json!(10))]));
        let conflicts = detector.check(&mut op, &client).unwrap();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].resolved_value(), Some(&json!(10)));
        assert_eq!(op.payload()["price"], json!(10));

        let detector = ConflictDetector::new(
            ConflictConfig::default().with_default_strategy(ResolutionStrategy::Merge),
        );
        let mut op = update(1, payload(&[("price", json!(10))]));
        detector.check(&mut op, &client).unwrap();
        assert_eq!(op.payload()["price"], json!(20));
    }

    #[test]
    fn check_uses_timestamps() {
        let client = MockPlatformClient::new();
        client.insert_remote(
            RemoteEntity::new(1, payload(&[("title", json!("Remote title"))]))
                .with_updated_at_ms(2_000),
        );
        let detector = ConflictDetector::new(
            ConflictConfig::default().with_default_strategy(ResolutionStrategy::Timestamp),
        );

        let mut op = update(
            1,
            payload(&[("title", json!("Local title")), ("updated_at", json!(1_000))]),
        );
        detector.check(&mut op, &client).unwrap();
        assert_eq!(op.payload()["title"], json!("Remote title"));
    }

    #[test]
    fn manual_conflicts_stay_open() {
        let client = MockPlatformClient::new();
        client.insert_remote(RemoteEntity::new(
            1,
            payload(&[("price", json!(20)), ("title", json!("Shirt"))]),
        ));
        let detector = ConflictDetector::new(
            ConflictConfig::default().with_field_strategy("price", ResolutionStrategy::Manual),
        );

        let mut op = update(1, payload(&[("price", json!(10)), ("title", json!("Shirts"))]));
        let conflicts = detector.check(&mut op, &client).unwrap();
        assert_eq!(conflicts.len(), 2);
        let blocking: Vec<_> = conflicts.iter().filter(|c| c.is_blocking()).collect();
        assert_eq!(blocking.len(), 1);
        assert_eq!(blocking[0].field_name, "price");

        op.settle_conflicts().unwrap();
        assert!(detector.check(&mut op, &client).unwrap().is_empty());
    }

    #[test]
    fn creates_and_missing_entities_are_not_checked() {
        let client = MockPlatformClient::new();
        client.set_fetch_failure(Some(PlatformError::Timeout));
        let detector = ConflictDetector::new(ConflictConfig::default());

        let mut create = Operation::new(
            OperationKind::Create,
            vec![1],
            Priority::Normal,
            payload(&[("price", json!(1))]),
        )
        .unwrap();
        assert!(detector.check(&mut create, &client).unwrap().is_empty());

        client.set_fetch_failure(None);
        let mut op = update(42, payload(&[("price", json!(1))]));
        assert!(detector.check(&mut op, &client).unwrap().is_empty());
    }

    #[test]
    fn fetch_failure_is_surfaced() {
        let client = MockPlatformClient::new();
        client.set_fetch_failure(Some(PlatformError::Timeout));
        let detector = ConflictDetector::new(ConflictConfig::default());

        let mut op = update(1, payload(&[("price", json!(1))]));
        assert_eq!(detector.check(&mut op, &client), Err(PlatformError::Timeout));
    }

    #[test]
    fn bulk_items_are_checked_individually() {
        let client = MockPlatformClient::new();
        client.insert_remote(RemoteEntity::new(2, payload(&[("price", json!(99))])));
        let detector = ConflictDetector::new(
            ConflictConfig::default().with_default_strategy(ResolutionStrategy::PreferRemote),
        );

        let mut bulk = Operation::merge_batch(vec![
            update(1, payload(&[("price", json!(5))])),
            update(2, payload(&[("price", json!(6))])),
        ])
        .unwrap();
        let conflicts = detector.check(&mut bulk, &client).unwrap();
        assert_eq!(conflicts.len(), 1);

        let items = bulk.batch_items().unwrap();
        assert_eq!(items[0].payload["price"], json!(5));
        assert_eq!(items[1].payload["price"], json!(99));
    }
}
