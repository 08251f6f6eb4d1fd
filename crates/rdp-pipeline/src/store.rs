//! Where animals come from and where finished profiles go.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use rdp_core::{Animal, DogProfilerData};
use serde_json::Value as JsonValue;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::debug;

#[async_trait]
pub trait AnimalStore: Send + Sync {
    /// Active animals of an organization that still lack a profile.
    async fn fetch_animals_for_profiling(&self, org_id: i64, limit: Option<i64>) -> Result<Vec<Animal>>;

    async fn save_profile(&self, animal_id: i64, profile: &DogProfilerData) -> Result<()>;
}

const FETCH_ANIMALS_SQL: &str = r#"
SELECT id, name, organization_id, breed, standardized_breed, age_text, sex, size,
       properties, dog_profiler_data
FROM animals
WHERE organization_id = $1
  AND status = 'available'
  AND dog_profiler_data IS NULL
ORDER BY id
LIMIT $2
"#;

const SAVE_PROFILE_SQL: &str =
    "UPDATE animals SET dog_profiler_data = $1, updated_at = NOW() WHERE id = $2";

#[derive(Debug, sqlx::FromRow)]
struct AnimalRow {
    id: i64,
    name: String,
    organization_id: i64,
    breed: Option<String>,
    standardized_breed: Option<String>,
    age_text: Option<String>,
    sex: Option<String>,
    size: Option<String>,
    properties: Option<JsonValue>,
    dog_profiler_data: Option<JsonValue>,
}

impl From<AnimalRow> for Animal {
    fn from(row: AnimalRow) -> Self {
        Animal {
            id: row.id,
            name: row.name,
            organization_id: row.organization_id,
            breed: row.breed,
            standardized_breed: row.standardized_breed,
            age_text: row.age_text,
            sex: row.sex,
            size: row.size,
            properties: row
                .properties
                .unwrap_or_else(|| JsonValue::Object(Default::default())),
            dog_profiler_data: row.dog_profiler_data,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PgAnimalStore {
    pool: PgPool,
}

impl PgAnimalStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .context("connecting to postgres")?;
        Ok(Self::new(pool))
    }
}

#[async_trait]
impl AnimalStore for PgAnimalStore {
    async fn fetch_animals_for_profiling(&self, org_id: i64, limit: Option<i64>) -> Result<Vec<Animal>> {
        let rows: Vec<AnimalRow> = sqlx::query_as(FETCH_ANIMALS_SQL)
            .bind(org_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .with_context(|| format!("fetching animals for organization {org_id}"))?;
        Ok(rows.into_iter().map(Animal::from).collect())
    }

    async fn save_profile(&self, animal_id: i64, profile: &DogProfilerData) -> Result<()> {
        let payload = serde_json::to_value(profile).context("serializing dog_profiler_data")?;
        let mut tx = self.pool.begin().await.context("opening transaction")?;
        let result = sqlx::query(SAVE_PROFILE_SQL)
            .bind(payload)
            .bind(animal_id)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("updating animal {animal_id}"))?;
        if result.rows_affected() == 0 {
            bail!("animal {animal_id} not found");
        }
        tx.commit()
            .await
            .with_context(|| format!("committing profile for animal {animal_id}"))?;
        debug!(animal_id, "persisted dog_profiler_data");
        Ok(())
    }
}

/// Animals loaded from a JSON array file; saved profiles are kept in memory.
#[derive(Debug, Default)]
pub struct FileAnimalStore {
    animals: Vec<Animal>,
    saved: Mutex<BTreeMap<i64, DogProfilerData>>,
}

impl FileAnimalStore {
    pub fn new(animals: Vec<Animal>) -> Self {
        Self {
            animals,
            saved: Mutex::default(),
        }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let animals: Vec<Animal> = serde_json::from_str(&text)
            .with_context(|| format!("parsing animals from {}", path.display()))?;
        Ok(Self::new(animals))
    }

    /// Animals of `org_id`, optionally narrowed to one id, regardless of profile state.
    pub fn select(&self, org_id: i64, animal_id: Option<i64>) -> Vec<&Animal> {
        self.animals
            .iter()
            .filter(|a| a.organization_id == org_id)
            .filter(|a| animal_id.map_or(true, |id| a.id == id))
            .collect()
    }

    pub fn saved_profiles(&self) -> BTreeMap<i64, DogProfilerData> {
        self.saved
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[async_trait]
impl AnimalStore for FileAnimalStore {
    async fn fetch_animals_for_profiling(&self, org_id: i64, limit: Option<i64>) -> Result<Vec<Animal>> {
        let limit = limit.and_then(|l| usize::try_from(l).ok()).unwrap_or(usize::MAX);
        Ok(self
            .animals
            .iter()
            .filter(|a| a.organization_id == org_id && a.dog_profiler_data.is_none())
            .take(limit)
            .cloned()
            .collect())
    }

    async fn save_profile(&self, animal_id: i64, profile: &DogProfilerData) -> Result<()> {
        if !self.animals.iter().any(|a| a.id == animal_id) {
            bail!("animal {animal_id} not found");
        }
        self.saved
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(animal_id, profile.clone());
        Ok(())
    }
}
