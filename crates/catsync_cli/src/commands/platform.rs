//! Simulated e-commerce platform for the `simulate` command.

use catsync_engine::{PlatformClient, PlatformError, RemoteEntity};
use catsync_model::{Operation, OperationKind, Payload};
use parking_lot::{Mutex, RwLock};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;
use std::collections::HashMap;
use std::ops::RangeInclusive;
use std::thread;
use std::time::Duration;

/// Failure and latency profile of the simulated platform.
#[derive(Debug, Clone)]
pub struct PlatformProfile {
    /// Chance that a call fails with a transient error.
    pub failure_rate: f64,
    /// Chance that a call is throttled.
    pub rate_limit_rate: f64,
    /// Per-call latency range in milliseconds.
    pub latency_ms: RangeInclusive<u64>,
    /// Whether bulk operations are accepted.
    pub supports_bulk: bool,
}

/// A platform that fails and stalls at random.
pub struct SimulatedPlatform {
    profile: PlatformProfile,
    rng: Mutex<StdRng>,
    remote: RwLock<HashMap<i64, RemoteEntity>>,
}

impl SimulatedPlatform {
    /// Creates a platform seeded for reproducible runs.
    pub fn new(profile: PlatformProfile, seed: u64) -> Self {
        Self {
            profile,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            remote: RwLock::new(HashMap::new()),
        }
    }

    /// Seeds `count` products with IDs `1..=count`.
    pub fn seed_catalog(&self, count: usize) {
        let mut remote = self.remote.write();
        for id in 1..=count as i64 {
            let mut fields = Payload::new();
            fields.insert("title".into(), json!(format!("Product {id}")));
            fields.insert("price".into(), json!(10.0 + (id % 90) as f64));
            fields.insert("inventory_quantity".into(), json!(id % 40));
            remote.insert(id, RemoteEntity::new(id, fields));
        }
    }

    /// Number of products currently on the platform.
    pub fn catalog_size(&self) -> usize {
        self.remote.read().len()
    }

    fn roll(&self) -> (Duration, f64) {
        let mut rng = self.rng.lock();
        let latency = rng.gen_range(self.profile.latency_ms.clone());
        (Duration::from_millis(latency), rng.gen::<f64>())
    }

    fn apply(&self, operation: &Operation) {
        let mut remote = self.remote.write();
        let targets: Vec<(Vec<i64>, Payload)> = match operation.batch_items() {
            Ok(items) if !items.is_empty() => items
                .into_iter()
                .map(|item| (item.entity_ids, item.payload))
                .collect(),
            _ => vec![(operation.entity_ids().to_vec(), operation.payload().clone())],
        };

        for (entity_ids, payload) in targets {
            for id in entity_ids {
                if operation.kind() == OperationKind::Delete {
                    remote.remove(&id);
                    continue;
                }
                let entity = remote
                    .entry(id)
                    .or_insert_with(|| RemoteEntity::new(id, Payload::new()));
                entity.fields.extend(payload.clone());
            }
        }
    }
}

impl PlatformClient for SimulatedPlatform {
    fn execute(&self, operation: &Operation) -> Result<Payload, PlatformError> {
        let (latency, roll) = self.roll();
        thread::sleep(latency);

        if roll < self.profile.rate_limit_rate {
            return Err(PlatformError::RateLimited {
                message: "simulated throttling".into(),
                retry_after: Some(Duration::from_millis(50)),
            });
        }
        if roll < self.profile.rate_limit_rate + self.profile.failure_rate {
            return Err(PlatformError::transient("simulated 503"));
        }

        self.apply(operation);
        let mut result = Payload::new();
        result.insert("applied".into(), json!(operation.entity_ids().len()));
        Ok(result)
    }

    fn fetch_remote(&self, entity_id: i64) -> Result<Option<RemoteEntity>, PlatformError> {
        Ok(self.remote.read().get(&entity_id).cloned())
    }

    fn supports_bulk(&self) -> bool {
        self.profile.supports_bulk
    }
}
