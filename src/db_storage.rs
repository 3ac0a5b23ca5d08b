use crate::cache_validator::SealedPayload;
use crate::errors::{bounded_reason, AppError, ResultExt};
use crate::models::{
    AddressModel, AddressRecord, CepEnrichmentTask, City, GeolocationTask, Neighborhood,
    TaskStatus,
};
use sqlx::PgPool;
use uuid::Uuid;

/// Upper bound on persisted failure text.
const MAX_ERROR_LEN: usize = 500;

/// Storage operations for the task queues and the addresses they reference.
///
/// The address rows belong to the record store; this is the only place the
/// pipeline touches them.
pub struct TaskStorage {
    pool: PgPool,
}

impl TaskStorage {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Snapshot of pending geolocation tasks, oldest first.
    pub async fn pending_geolocation_tasks(&self) -> Result<Vec<GeolocationTask>, AppError> {
        let tasks = sqlx::query_as::<_, GeolocationTask>(
            "SELECT * FROM geo.geolocation_tasks WHERE status = $1 ORDER BY created_at ASC",
        )
        .bind(TaskStatus::Pending.as_str())
        .fetch_all(&self.pool)
        .await
        .context("loading pending geolocation tasks")?;

        Ok(tasks)
    }

    pub async fn get_geolocation_task(
        &self,
        task_id: Uuid,
    ) -> Result<Option<GeolocationTask>, AppError> {
        let task = sqlx::query_as::<_, GeolocationTask>(
            "SELECT * FROM geo.geolocation_tasks WHERE id = $1",
        )
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(task)
    }

    /// Snapshot of pending CEP-enrichment tasks, oldest first.
    pub async fn pending_cep_tasks(&self) -> Result<Vec<CepEnrichmentTask>, AppError> {
        let tasks = sqlx::query_as::<_, CepEnrichmentTask>(
            "SELECT * FROM geo.cep_tasks WHERE status = $1 ORDER BY created_at ASC",
        )
        .bind(TaskStatus::Pending.as_str())
        .fetch_all(&self.pool)
        .await
        .context("loading pending CEP tasks")?;

        Ok(tasks)
    }

    pub async fn get_address(&self, address_id: Uuid) -> Result<Option<AddressRecord>, AppError> {
        let address = sqlx::query_as::<_, AddressRecord>(
            "SELECT id, logradouro, numero, complemento, bairro, cidade, estado, cep
             FROM leads.addresses WHERE id = $1",
        )
        .bind(address_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(address)
    }

    /// Writes a corrected/enriched address back to the record store.
    pub async fn update_address(
        &self,
        address_id: Uuid,
        address: &AddressModel,
    ) -> Result<(), AppError> {
        sqlx::query(
            "UPDATE leads.addresses
             SET logradouro = $2, numero = $3, complemento = $4, bairro = $5,
                 cidade = $6, estado = $7, cep = $8, updated_at = NOW()
             WHERE id = $1",
        )
        .bind(address_id)
        .bind(&address.logradouro)
        .bind(&address.numero)
        .bind(&address.complemento)
        .bind(&address.bairro)
        .bind(&address.cidade)
        .bind(&address.estado)
        .bind(&address.cep)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn mark_geolocation_done(
        &self,
        task_id: Uuid,
        lat: f64,
        lon: f64,
        distance_km: f64,
        address_corrected: bool,
    ) -> Result<(), AppError> {
        sqlx::query(
            "UPDATE geo.geolocation_tasks
             SET status = 'DONE', lat = $2, lon = $3, distance_km = $4,
                 address_corrected = $5, error_message = NULL, updated_at = NOW()
             WHERE id = $1",
        )
        .bind(task_id)
        .bind(lat)
        .bind(lon)
        .bind(distance_km)
        .bind(address_corrected)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn mark_geolocation_error(
        &self,
        task_id: Uuid,
        reason: &str,
    ) -> Result<(), AppError> {
        sqlx::query(
            "UPDATE geo.geolocation_tasks
             SET status = 'ERROR', error_message = $2, updated_at = NOW()
             WHERE id = $1",
        )
        .bind(task_id)
        .bind(bounded_reason(reason, MAX_ERROR_LEN))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn mark_cep_done(&self, task_id: Uuid) -> Result<(), AppError> {
        sqlx::query(
            "UPDATE geo.cep_tasks
             SET status = 'DONE', error_message = NULL, updated_at = NOW()
             WHERE id = $1",
        )
        .bind(task_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn mark_cep_error(&self, task_id: Uuid, reason: &str) -> Result<(), AppError> {
        sqlx::query(
            "UPDATE geo.cep_tasks
             SET status = 'ERROR', error_message = $2, updated_at = NOW()
             WHERE id = $1",
        )
        .bind(task_id)
        .bind(bounded_reason(reason, MAX_ERROR_LEN))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Refreshes the denormalized per-company distance row. Called
    /// synchronously after every successful geolocation; this summary is
    /// allowed to lag the task table but never waits for a reconciliation
    /// job.
    pub async fn refresh_company_distance(
        &self,
        company_id: Uuid,
        distance_km: f64,
    ) -> Result<(), AppError> {
        sqlx::query(
            "INSERT INTO geo.company_summary (company_id, distance_km, updated_at)
             VALUES ($1, $2, NOW())
             ON CONFLICT (company_id)
             DO UPDATE SET distance_km = EXCLUDED.distance_km, updated_at = NOW()",
        )
        .bind(company_id)
        .bind(distance_km)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

/// Persistence for the location catalog consumed by search-term generation.
/// Upserts are idempotent by (name, state).
pub struct LocationCatalog {
    pool: PgPool,
}

impl LocationCatalog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn upsert_city(&self, city: &City) -> Result<(), AppError> {
        sqlx::query(
            "INSERT INTO geo.locations
                 (name, state, kind, ibge_id, population, lat, lon, distance_km, is_base, updated_at)
             VALUES ($1, $2, 'city', $3, $4, $5, $6, $7, $8, NOW())
             ON CONFLICT (name, state)
             DO UPDATE SET ibge_id = EXCLUDED.ibge_id, population = EXCLUDED.population,
                           lat = EXCLUDED.lat, lon = EXCLUDED.lon,
                           distance_km = EXCLUDED.distance_km, is_base = EXCLUDED.is_base,
                           updated_at = NOW()",
        )
        .bind(&city.name)
        .bind(&city.state)
        .bind(city.ibge_id)
        .bind(city.population)
        .bind(city.lat)
        .bind(city.lon)
        .bind(city.distance_km)
        .bind(city.is_base)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn upsert_neighborhood(&self, neighborhood: &Neighborhood) -> Result<(), AppError> {
        sqlx::query(
            "INSERT INTO geo.locations
                 (name, state, kind, city, distance_km, is_base, updated_at)
             VALUES ($1, $2, 'neighborhood', $3, $4, FALSE, NOW())
             ON CONFLICT (name, state)
             DO UPDATE SET city = EXCLUDED.city, distance_km = EXCLUDED.distance_km,
                           updated_at = NOW()",
        )
        .bind(&neighborhood.name)
        .bind(&neighborhood.state)
        .bind(&neighborhood.city)
        .bind(neighborhood.distance_km)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

/// Row persistence for the per-state municipality cache. Payloads are
/// checksum-sealed; verification happens in `cities_cache`.
pub struct CitiesCacheStore {
    pool: PgPool,
}

impl CitiesCacheStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn load(&self, state: &str) -> Result<Option<SealedPayload>, AppError> {
        let row: Option<(String, String)> = sqlx::query_as(
            "SELECT payload, checksum FROM geo.cities_cache WHERE state = $1",
        )
        .bind(state)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(payload, checksum)| SealedPayload { payload, checksum }))
    }

    pub async fn save(&self, state: &str, sealed: &SealedPayload) -> Result<(), AppError> {
        sqlx::query(
            "INSERT INTO geo.cities_cache (state, payload, checksum, updated_at)
             VALUES ($1, $2, $3, NOW())
             ON CONFLICT (state)
             DO UPDATE SET payload = EXCLUDED.payload, checksum = EXCLUDED.checksum,
                           updated_at = NOW()",
        )
        .bind(state)
        .bind(&sealed.payload)
        .bind(&sealed.checksum)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn delete(&self, state: &str) -> Result<(), AppError> {
        sqlx::query("DELETE FROM geo.cities_cache WHERE state = $1")
            .bind(state)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}
