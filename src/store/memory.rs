use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::models::{
    Agent, District, House, HouseFields, HouseImage, HouseKey, NewAgent, NewDistrict,
};
use crate::store::{Store, StoreError, StoreTx};

/// In-memory rendition of the canonical store, used as the repository double
/// in tests. `begin` clones the tables; `commit` swaps the clone back in, so
/// a dropped transaction really does roll back.
#[derive(Debug, Default)]
pub struct MemStore {
    data: Mutex<MemData>,
}

#[derive(Debug, Default, Clone)]
struct MemData {
    districts: Vec<District>,
    agents: Vec<Agent>,
    houses: Vec<House>,
    images: Vec<HouseImage>,
    district_seq: i64,
    agent_seq: i64,
    house_seq: i64,
    image_seq: i64,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn districts(&self) -> Vec<District> {
        self.data.lock().await.districts.clone()
    }

    pub async fn agents(&self) -> Vec<Agent> {
        self.data.lock().await.agents.clone()
    }

    pub async fn houses(&self) -> Vec<House> {
        self.data.lock().await.houses.clone()
    }

    pub async fn images(&self) -> Vec<HouseImage> {
        self.data.lock().await.images.clone()
    }
}

#[async_trait]
impl Store for MemStore {
    async fn begin<'a>(&'a self) -> Result<Box<dyn StoreTx + 'a>, StoreError> {
        let work = self.data.lock().await.clone();
        Ok(Box::new(MemTx { store: self, work }))
    }
}

pub struct MemTx<'a> {
    store: &'a MemStore,
    work: MemData,
}

#[async_trait]
impl StoreTx for MemTx<'_> {
    async fn find_district(&mut self, name: &str) -> Result<Option<District>, StoreError> {
        Ok(self
            .work
            .districts
            .iter()
            .find(|d| d.name == name)
            .cloned())
    }

    async fn create_district(&mut self, district: NewDistrict) -> Result<District, StoreError> {
        self.work.district_seq += 1;
        let district = District {
            id: self.work.district_seq,
            name: district.name,
            city: district.city,
            description: district.description,
        };
        self.work.districts.push(district.clone());
        Ok(district)
    }

    async fn update_district(&mut self, district: &District) -> Result<(), StoreError> {
        if let Some(existing) = self.work.districts.iter_mut().find(|d| d.id == district.id) {
            *existing = district.clone();
        }
        Ok(())
    }

    async fn find_agent_by_real_name(
        &mut self,
        real_name: &str,
    ) -> Result<Option<Agent>, StoreError> {
        Ok(self
            .work
            .agents
            .iter()
            .find(|a| a.real_name == real_name)
            .cloned())
    }

    async fn find_agent_by_username(
        &mut self,
        username: &str,
    ) -> Result<Option<Agent>, StoreError> {
        Ok(self
            .work
            .agents
            .iter()
            .find(|a| a.username == username)
            .cloned())
    }

    async fn first_agent(&mut self) -> Result<Option<Agent>, StoreError> {
        Ok(self.work.agents.iter().min_by_key(|a| a.id).cloned())
    }

    async fn username_exists(&mut self, username: &str) -> Result<bool, StoreError> {
        Ok(self.work.agents.iter().any(|a| a.username == username))
    }

    async fn phone_exists(&mut self, phone: &str) -> Result<bool, StoreError> {
        Ok(self.work.agents.iter().any(|a| a.phone == phone))
    }

    async fn create_agent(&mut self, agent: NewAgent) -> Result<Agent, StoreError> {
        self.work.agent_seq += 1;
        let agent = Agent {
            id: self.work.agent_seq,
            username: agent.username,
            phone: agent.phone,
            real_name: agent.real_name,
            company: agent.company,
            is_verified: agent.is_verified,
        };
        self.work.agents.push(agent.clone());
        Ok(agent)
    }

    async fn update_agent(&mut self, agent: &Agent) -> Result<(), StoreError> {
        if let Some(existing) = self.work.agents.iter_mut().find(|a| a.id == agent.id) {
            *existing = agent.clone();
        }
        Ok(())
    }

    async fn find_house(&mut self, key: &HouseKey) -> Result<Option<House>, StoreError> {
        Ok(self
            .work
            .houses
            .iter()
            .find(|h| h.title == key.title && h.district_id == key.district_id && h.address == key.address)
            .cloned())
    }

    async fn create_house(
        &mut self,
        key: HouseKey,
        fields: HouseFields,
    ) -> Result<House, StoreError> {
        self.work.house_seq += 1;
        let house = House {
            id: self.work.house_seq,
            title: key.title,
            district_id: key.district_id,
            address: key.address,
            fields,
        };
        self.work.houses.push(house.clone());
        Ok(house)
    }

    async fn update_house(&mut self, id: i64, fields: HouseFields) -> Result<(), StoreError> {
        if let Some(existing) = self.work.houses.iter_mut().find(|h| h.id == id) {
            existing.fields = fields;
        }
        Ok(())
    }

    async fn house_image_exists(
        &mut self,
        house_id: i64,
        image: &str,
    ) -> Result<bool, StoreError> {
        Ok(self
            .work
            .images
            .iter()
            .any(|i| i.house_id == house_id && i.image == image))
    }

    async fn add_house_image(
        &mut self,
        house_id: i64,
        image: &str,
        order: i32,
    ) -> Result<HouseImage, StoreError> {
        self.work.image_seq += 1;
        let image = HouseImage {
            id: self.work.image_seq,
            house_id,
            image: image.to_string(),
            order,
        };
        self.work.images.push(image.clone());
        Ok(image)
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        *self.store.data.lock().await = self.work;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        Ok(())
    }
}
