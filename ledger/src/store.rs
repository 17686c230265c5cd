//! Balance ledger storage.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use dealerbooks_common::{Result, VehicleId};

use crate::balance::{MergeOutcome, VehicleBalance};

/// Mutation run against the current (or freshly initialized) ledger row
/// while the store holds that row exclusively. On error the store commits
/// nothing, not even a freshly initialized row.
pub type BalanceMutator = Box<dyn FnOnce(&mut VehicleBalance) -> Result<MergeOutcome> + Send>;

/// Result of an atomic read-modify-write.
#[derive(Debug, Clone)]
pub struct UpsertResult {
    /// Ledger row after the mutation.
    pub balance: VehicleBalance,
    /// Whether the mutation changed the row.
    pub outcome: MergeOutcome,
    /// Whether the row was created by this call.
    pub created: bool,
}

/// Persistent per-vehicle ledger.
///
/// `upsert` must serialize concurrent calls for the same vehicle: the mutator
/// always observes the result of every previously committed mutator.
#[async_trait]
pub trait BalanceStore: Send + Sync {
    /// Store name, for logs.
    fn name(&self) -> &str;

    /// Current ledger row, `None` if no event has been reconciled yet.
    async fn get(&self, vehicle_id: VehicleId) -> Result<Option<VehicleBalance>>;

    /// Ledger rows for the given vehicles. Vehicles without a row are skipped.
    async fn get_many(&self, vehicle_ids: &[VehicleId]) -> Result<Vec<VehicleBalance>>;

    /// Load-or-create the row and apply `mutate` atomically.
    async fn upsert(&self, vehicle_id: VehicleId, mutate: BalanceMutator) -> Result<UpsertResult>;
}

/// In-memory ledger. The map's entry lock is held while the mutator runs.
#[derive(Default)]
pub struct MemoryBalanceStore {
    balances: DashMap<VehicleId, VehicleBalance>,
}

impl MemoryBalanceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of ledger rows.
    pub fn len(&self) -> usize {
        self.balances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.balances.is_empty()
    }

    /// Drop a vehicle's row, as the vehicle owner does on deletion.
    pub fn remove(&self, vehicle_id: &VehicleId) -> Option<VehicleBalance> {
        self.balances.remove(vehicle_id).map(|(_, balance)| balance)
    }
}

#[async_trait]
impl BalanceStore for MemoryBalanceStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn get(&self, vehicle_id: VehicleId) -> Result<Option<VehicleBalance>> {
        Ok(self.balances.get(&vehicle_id).map(|entry| entry.value().clone()))
    }

    async fn get_many(&self, vehicle_ids: &[VehicleId]) -> Result<Vec<VehicleBalance>> {
        Ok(vehicle_ids
            .iter()
            .filter_map(|id| self.balances.get(id).map(|entry| entry.value().clone()))
            .collect())
    }

    async fn upsert(&self, vehicle_id: VehicleId, mutate: BalanceMutator) -> Result<UpsertResult> {
        // No await while the shard lock is held.
        match self.balances.entry(vehicle_id) {
            Entry::Occupied(mut entry) => {
                let outcome = mutate(entry.get_mut())?;
                Ok(UpsertResult {
                    balance: entry.get().clone(),
                    outcome,
                    created: false,
                })
            }
            Entry::Vacant(entry) => {
                let mut balance = VehicleBalance::new(vehicle_id);
                let outcome = mutate(&mut balance)?;
                entry.insert(balance.clone());
                Ok(UpsertResult {
                    balance,
                    outcome,
                    created: true,
                })
            }
        }
    }
}
