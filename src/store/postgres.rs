use async_trait::async_trait;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, Row, Transaction};

use crate::models::{
    Agent, District, House, HouseFields, HouseImage, HouseKey, HouseStatus, NewAgent, NewDistrict,
};
use crate::store::{Store, StoreError, StoreTx};

/// Canonical store over the platform's Postgres schema (`districts`, `users`,
/// `houses`, `house_images`). The schema itself is owned by the surrounding
/// application; this module only reads and upserts.
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl Store for PgStore {
    async fn begin<'a>(&'a self) -> Result<Box<dyn StoreTx + 'a>, StoreError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgTx { tx }))
    }
}

pub struct PgTx {
    tx: Transaction<'static, Postgres>,
}

fn district_from_row(row: &PgRow) -> Result<District, sqlx::Error> {
    Ok(District {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        city: row.try_get("city")?,
        description: row.try_get("description")?,
    })
}

fn agent_from_row(row: &PgRow) -> Result<Agent, sqlx::Error> {
    Ok(Agent {
        id: row.try_get("id")?,
        username: row.try_get("username")?,
        phone: row.try_get("phone")?,
        real_name: row.try_get("real_name")?,
        company: row.try_get("company")?,
        is_verified: row.try_get("is_verified")?,
    })
}

fn house_from_row(row: &PgRow) -> Result<House, sqlx::Error> {
    let status: String = row.try_get("status")?;
    Ok(House {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        district_id: row.try_get("district_id")?,
        address: row.try_get("address")?,
        fields: HouseFields {
            price: row.try_get("price")?,
            unit_price: row.try_get("unit_price")?,
            area: row.try_get("area")?,
            house_type: row.try_get("house_type")?,
            floor: row.try_get("floor")?,
            total_floors: row.try_get("total_floors")?,
            orientation: row.try_get("orientation")?,
            decoration: row.try_get("decoration")?,
            build_year: row.try_get("build_year")?,
            longitude: row.try_get("longitude")?,
            latitude: row.try_get("latitude")?,
            description: row.try_get("description")?,
            cover_image: row.try_get("cover_image")?,
            status: HouseStatus::parse(&status).unwrap_or(HouseStatus::Available),
            agent_id: row.try_get("agent_id")?,
            views: row.try_get("views")?,
        },
    })
}

const HOUSE_COLUMNS: &str = "id, title, district_id, address, price, unit_price, area, \
     house_type, floor, total_floors, orientation, decoration, build_year, longitude, \
     latitude, description, cover_image, status, agent_id, views";

#[async_trait]
impl StoreTx for PgTx {
    async fn find_district(&mut self, name: &str) -> Result<Option<District>, StoreError> {
        let row = sqlx::query("SELECT id, name, city, description FROM districts WHERE name = $1")
            .bind(name)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(row.as_ref().map(district_from_row).transpose()?)
    }

    async fn create_district(&mut self, district: NewDistrict) -> Result<District, StoreError> {
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO districts (name, city, description, created_at, updated_at) \
             VALUES ($1, $2, $3, now(), now()) RETURNING id",
        )
        .bind(&district.name)
        .bind(&district.city)
        .bind(&district.description)
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(District {
            id,
            name: district.name,
            city: district.city,
            description: district.description,
        })
    }

    async fn update_district(&mut self, district: &District) -> Result<(), StoreError> {
        sqlx::query("UPDATE districts SET city = $1, description = $2, updated_at = now() WHERE id = $3")
            .bind(&district.city)
            .bind(&district.description)
            .bind(district.id)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn find_agent_by_real_name(
        &mut self,
        real_name: &str,
    ) -> Result<Option<Agent>, StoreError> {
        let row = sqlx::query(
            "SELECT id, username, phone, real_name, company, is_verified FROM users \
             WHERE role = 'agent' AND real_name = $1 ORDER BY id LIMIT 1",
        )
        .bind(real_name)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row.as_ref().map(agent_from_row).transpose()?)
    }

    async fn find_agent_by_username(
        &mut self,
        username: &str,
    ) -> Result<Option<Agent>, StoreError> {
        let row = sqlx::query(
            "SELECT id, username, phone, real_name, company, is_verified FROM users \
             WHERE role = 'agent' AND username = $1 ORDER BY id LIMIT 1",
        )
        .bind(username)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row.as_ref().map(agent_from_row).transpose()?)
    }

    async fn first_agent(&mut self) -> Result<Option<Agent>, StoreError> {
        let row = sqlx::query(
            "SELECT id, username, phone, real_name, company, is_verified FROM users \
             WHERE role = 'agent' ORDER BY id LIMIT 1",
        )
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row.as_ref().map(agent_from_row).transpose()?)
    }

    async fn username_exists(&mut self, username: &str) -> Result<bool, StoreError> {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM users WHERE username = $1)")
            .bind(username)
            .fetch_one(&mut *self.tx)
            .await?;
        Ok(exists)
    }

    async fn phone_exists(&mut self, phone: &str) -> Result<bool, StoreError> {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM users WHERE phone = $1)")
            .bind(phone)
            .fetch_one(&mut *self.tx)
            .await?;
        Ok(exists)
    }

    async fn create_agent(&mut self, agent: NewAgent) -> Result<Agent, StoreError> {
        // password '!' is the framework's unusable-password marker; scraped
        // placeholder agents never log in.
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO users (username, phone, role, real_name, company, is_verified, \
             password, first_name, last_name, email, is_staff, is_active, is_superuser, \
             date_joined) \
             VALUES ($1, $2, 'agent', $3, $4, $5, '!', '', '', '', false, true, false, now()) \
             RETURNING id",
        )
        .bind(&agent.username)
        .bind(&agent.phone)
        .bind(&agent.real_name)
        .bind(&agent.company)
        .bind(agent.is_verified)
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(Agent {
            id,
            username: agent.username,
            phone: agent.phone,
            real_name: agent.real_name,
            company: agent.company,
            is_verified: agent.is_verified,
        })
    }

    async fn update_agent(&mut self, agent: &Agent) -> Result<(), StoreError> {
        sqlx::query("UPDATE users SET real_name = $1, company = $2, is_verified = $3 WHERE id = $4")
            .bind(&agent.real_name)
            .bind(&agent.company)
            .bind(agent.is_verified)
            .bind(agent.id)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn find_house(&mut self, key: &HouseKey) -> Result<Option<House>, StoreError> {
        let sql = format!(
            "SELECT {HOUSE_COLUMNS} FROM houses \
             WHERE title = $1 AND district_id = $2 AND address = $3 ORDER BY id LIMIT 1"
        );
        let row = sqlx::query(&sql)
            .bind(&key.title)
            .bind(key.district_id)
            .bind(&key.address)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(row.as_ref().map(house_from_row).transpose()?)
    }

    async fn create_house(
        &mut self,
        key: HouseKey,
        fields: HouseFields,
    ) -> Result<House, StoreError> {
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO houses (title, district_id, address, price, unit_price, area, \
             house_type, floor, total_floors, orientation, decoration, build_year, longitude, \
             latitude, description, cover_image, status, agent_id, views, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, \
             $17, $18, $19, now(), now()) RETURNING id",
        )
        .bind(&key.title)
        .bind(key.district_id)
        .bind(&key.address)
        .bind(fields.price)
        .bind(fields.unit_price)
        .bind(fields.area)
        .bind(&fields.house_type)
        .bind(&fields.floor)
        .bind(fields.total_floors)
        .bind(&fields.orientation)
        .bind(&fields.decoration)
        .bind(fields.build_year)
        .bind(fields.longitude)
        .bind(fields.latitude)
        .bind(&fields.description)
        .bind(&fields.cover_image)
        .bind(fields.status.as_str())
        .bind(fields.agent_id)
        .bind(fields.views)
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(House {
            id,
            title: key.title,
            district_id: key.district_id,
            address: key.address,
            fields,
        })
    }

    async fn update_house(&mut self, id: i64, fields: HouseFields) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE houses SET price = $1, unit_price = $2, area = $3, house_type = $4, \
             floor = $5, total_floors = $6, orientation = $7, decoration = $8, build_year = $9, \
             longitude = $10, latitude = $11, description = $12, cover_image = $13, \
             status = $14, agent_id = $15, views = $16, updated_at = now() WHERE id = $17",
        )
        .bind(fields.price)
        .bind(fields.unit_price)
        .bind(fields.area)
        .bind(&fields.house_type)
        .bind(&fields.floor)
        .bind(fields.total_floors)
        .bind(&fields.orientation)
        .bind(&fields.decoration)
        .bind(fields.build_year)
        .bind(fields.longitude)
        .bind(fields.latitude)
        .bind(&fields.description)
        .bind(&fields.cover_image)
        .bind(fields.status.as_str())
        .bind(fields.agent_id)
        .bind(fields.views)
        .bind(id)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn house_image_exists(
        &mut self,
        house_id: i64,
        image: &str,
    ) -> Result<bool, StoreError> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM house_images WHERE house_id = $1 AND image = $2)",
        )
        .bind(house_id)
        .bind(image)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(exists)
    }

    async fn add_house_image(
        &mut self,
        house_id: i64,
        image: &str,
        order: i32,
    ) -> Result<HouseImage, StoreError> {
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO house_images (house_id, image, \"order\", created_at, updated_at) \
             VALUES ($1, $2, $3, now(), now()) RETURNING id",
        )
        .bind(house_id)
        .bind(image)
        .bind(order)
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(HouseImage {
            id,
            house_id,
            image: image.to_string(),
            order,
        })
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.rollback().await?;
        Ok(())
    }
}
