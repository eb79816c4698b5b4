pub mod memory;
pub mod postgres;

pub use memory::MemStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{Agent, District, House, HouseFields, HouseImage, HouseKey, NewAgent, NewDistrict};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Handle to the canonical store. `begin` opens one transaction per imported
/// row; everything inside either commits together or rolls back together.
#[async_trait]
pub trait Store: Send + Sync {
    async fn begin<'a>(&'a self) -> Result<Box<dyn StoreTx + 'a>, StoreError>;
}

/// One open transaction against the canonical store.
///
/// The get-or-create idiom is split into explicit find/create steps; the
/// importer owns the resolution logic, the store only answers lookups.
#[async_trait]
pub trait StoreTx: Send {
    async fn find_district(&mut self, name: &str) -> Result<Option<District>, StoreError>;
    async fn create_district(&mut self, district: NewDistrict) -> Result<District, StoreError>;
    async fn update_district(&mut self, district: &District) -> Result<(), StoreError>;

    async fn find_agent_by_real_name(&mut self, real_name: &str)
        -> Result<Option<Agent>, StoreError>;
    async fn find_agent_by_username(&mut self, username: &str)
        -> Result<Option<Agent>, StoreError>;
    /// Lowest-id agent, used when a row names no agent at all.
    async fn first_agent(&mut self) -> Result<Option<Agent>, StoreError>;
    async fn username_exists(&mut self, username: &str) -> Result<bool, StoreError>;
    async fn phone_exists(&mut self, phone: &str) -> Result<bool, StoreError>;
    async fn create_agent(&mut self, agent: NewAgent) -> Result<Agent, StoreError>;
    async fn update_agent(&mut self, agent: &Agent) -> Result<(), StoreError>;

    async fn find_house(&mut self, key: &HouseKey) -> Result<Option<House>, StoreError>;
    async fn create_house(&mut self, key: HouseKey, fields: HouseFields)
        -> Result<House, StoreError>;
    async fn update_house(&mut self, id: i64, fields: HouseFields) -> Result<(), StoreError>;

    async fn house_image_exists(&mut self, house_id: i64, image: &str)
        -> Result<bool, StoreError>;
    async fn add_house_image(
        &mut self,
        house_id: i64,
        image: &str,
        order: i32,
    ) -> Result<HouseImage, StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}
