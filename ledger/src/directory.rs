//! Read-only view of the inventory module's vehicles.

use async_trait::async_trait;
use dashmap::DashMap;
use dealerbooks_common::{Result, TenantId, VehicleId};
use serde::{Deserialize, Serialize};

/// Vehicle identity shown next to its balance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VehicleRef {
    pub id: VehicleId,
    pub brand: String,
    pub model: String,
    pub year: Option<i32>,
    pub plate: Option<String>,
}

impl VehicleRef {
    pub fn new(id: VehicleId, brand: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            id,
            brand: brand.into(),
            model: model.into(),
            year: None,
            plate: None,
        }
    }
}

/// Tenant-scoped vehicle lookup.
#[async_trait]
pub trait VehicleDirectory: Send + Sync {
    /// The vehicle, if it exists and belongs to the tenant.
    async fn find_vehicle(&self, tenant_id: TenantId, vehicle_id: VehicleId) -> Result<Option<VehicleRef>>;

    /// All vehicles of a tenant.
    async fn list_vehicles(&self, tenant_id: TenantId) -> Result<Vec<VehicleRef>>;
}

/// In-memory directory.
#[derive(Default)]
pub struct InMemoryVehicleDirectory {
    vehicles: DashMap<VehicleId, (TenantId, VehicleRef)>,
}

impl InMemoryVehicleDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a vehicle under a tenant.
    pub fn register(&self, tenant_id: TenantId, vehicle: VehicleRef) {
        self.vehicles.insert(vehicle.id, (tenant_id, vehicle));
    }

    pub fn remove(&self, vehicle_id: &VehicleId) {
        self.vehicles.remove(vehicle_id);
    }
}

#[async_trait]
impl VehicleDirectory for InMemoryVehicleDirectory {
    async fn find_vehicle(&self, tenant_id: TenantId, vehicle_id: VehicleId) -> Result<Option<VehicleRef>> {
        Ok(self
            .vehicles
            .get(&vehicle_id)
            .filter(|entry| entry.0 == tenant_id)
            .map(|entry| entry.1.clone()))
    }

    async fn list_vehicles(&self, tenant_id: TenantId) -> Result<Vec<VehicleRef>> {
        let mut vehicles: Vec<VehicleRef> = self
            .vehicles
            .iter()
            .filter(|entry| entry.0 == tenant_id)
            .map(|entry| entry.1.clone())
            .collect();
        vehicles.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(vehicles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_tenant_scoping() {
        let directory = InMemoryVehicleDirectory::new();
        let tenant_a = TenantId::new();
        let tenant_b = TenantId::new();
        let vehicle = VehicleRef::new(VehicleId::new(), "Toyota", "Corolla");
        directory.register(tenant_a, vehicle.clone());

        assert_eq!(
            directory.find_vehicle(tenant_a, vehicle.id).await.unwrap(),
            Some(vehicle.clone())
        );
        assert_eq!(directory.find_vehicle(tenant_b, vehicle.id).await.unwrap(), None);
        assert_eq!(directory.list_vehicles(tenant_b).await.unwrap().len(), 0);

        directory.remove(&vehicle.id);
        assert!(directory.list_vehicles(tenant_a).await.unwrap().is_empty());
    }
}
