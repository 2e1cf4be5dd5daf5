//! Postgres-backed job state for menu documents.
//!
//! The store is the sole authority on document status. Workers never talk to
//! the table directly; they claim work through [`JobStore`], which performs
//! the claim and the status transition in a single `FOR UPDATE SKIP LOCKED`
//! statement so that concurrent workers can never double-process a row.

use sqlx::{PgPool, postgres::PgPoolOptions};
use uuid::Uuid;

use crate::{
    model::{CompetitiveSnapshot, MenuContext, MenuDocument, MenuStatus, ParsedDocument},
    prelude::*,
};

/// Connect to the database named by `database_url`.
pub async fn connect(database_url: &str) -> Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(8)
        .connect(database_url)
        .await
        .context("failed to connect to the database")
}

/// Apply any outstanding schema migrations.
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("failed to run database migrations")
}

/// A document claimed for OCR.
#[derive(Clone, Debug, sqlx::FromRow)]
pub struct ClaimedUpload {
    pub id: Uuid,
    pub source_object_key: String,
    pub original_filename: String,
}

/// A document claimed for structured parsing.
#[derive(Clone, Debug, sqlx::FromRow)]
pub struct ClaimedText {
    pub id: Uuid,
    pub restaurant_id: i64,
    pub raw_text: String,
}

/// State transitions and claims for menu documents.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Atomically claim the oldest `MENU_UPLOADED` document, moving it to
    /// `OCR_PROCESSING`. Returns `None` when nothing is pending.
    async fn claim_next_uploaded(&self) -> Result<Option<ClaimedUpload>>;

    /// Atomically claim the oldest `OCR_DONE` document, moving it to
    /// `PARSING_LLM`. Returns `None` when nothing is pending.
    async fn claim_next_text_ready(&self) -> Result<Option<ClaimedText>>;

    /// Persist extracted text and move the document to `OCR_DONE`.
    async fn save_text(&self, id: Uuid, raw_text: &str) -> Result<()>;

    /// Persist a parsed document and move to `PARSED`, as one statement.
    async fn save_parsed(&self, id: Uuid, document: &ParsedDocument) -> Result<()>;

    /// Record a failure reason and move to the given failure status.
    async fn mark_failed(&self, id: Uuid, status: MenuStatus, reason: &str) -> Result<()>;

    /// Set a document's status directly, without touching its data columns.
    /// Admin tooling escape hatch; the pipeline itself moves documents with
    /// the claim and save operations above.
    async fn set_status(&self, id: Uuid, status: MenuStatus) -> Result<()>;

    /// Re-arm a failed document: reset to `MENU_UPLOADED`, clearing extracted
    /// text, parsed data, and the failure reason. Errors unless the document
    /// is currently in a failure state.
    async fn retry(&self, id: Uuid) -> Result<()>;

    /// The (city, cuisine) of the restaurant owning this document.
    async fn menu_context(&self, id: Uuid) -> Result<MenuContext>;

    /// Read a document row back, for the CLI and for tests.
    async fn get_document(&self, id: Uuid) -> Result<MenuDocument>;
}

/// Reads and writes for competitive pricing snapshots.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Total cost-for-two of every `PARSED` document under a (city, cuisine)
    /// key, in no particular order.
    async fn parsed_totals(&self, city: &str, cuisine_type: &str) -> Result<Vec<f64>>;

    /// Insert or update the snapshot for a (city, cuisine) key.
    async fn upsert_snapshot(
        &self,
        city: &str,
        cuisine_type: &str,
        avg: f64,
        median: f64,
        sample_size: i64,
    ) -> Result<()>;

    /// The current snapshot for a (city, cuisine) key, if any.
    async fn get_snapshot(
        &self,
        city: &str,
        cuisine_type: &str,
    ) -> Result<Option<CompetitiveSnapshot>>;
}

/// The production [`JobStore`] and [`SnapshotStore`] over Postgres.
#[derive(Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct DocumentRow {
    id: Uuid,
    restaurant_id: i64,
    source_object_key: String,
    original_filename: String,
    status: String,
    raw_text: Option<String>,
    parsed_document: Option<Value>,
    failure_reason: Option<String>,
}

impl TryFrom<DocumentRow> for MenuDocument {
    type Error = anyhow::Error;

    fn try_from(row: DocumentRow) -> Result<Self> {
        let parsed_document = row
            .parsed_document
            .map(serde_json::from_value::<ParsedDocument>)
            .transpose()
            .context("stored parsed document is not in the expected shape")?;
        Ok(MenuDocument {
            id: row.id,
            restaurant_id: row.restaurant_id,
            source_object_key: row.source_object_key,
            original_filename: row.original_filename,
            status: row.status.parse()?,
            raw_text: row.raw_text,
            parsed_document,
            failure_reason: row.failure_reason,
        })
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    #[instrument(level = "debug", skip_all)]
    async fn claim_next_uploaded(&self) -> Result<Option<ClaimedUpload>> {
        let claimed = sqlx::query_as::<_, ClaimedUpload>(
            r#"
            WITH next_doc AS (
                SELECT id
                FROM menu_documents
                WHERE status = 'MENU_UPLOADED'
                ORDER BY updated_at
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE menu_documents
            SET status = 'OCR_PROCESSING', updated_at = NOW()
            WHERE id IN (SELECT id FROM next_doc)
            RETURNING id, source_object_key, original_filename
            "#,
        )
        .fetch_optional(&self.pool)
        .await
        .context("failed to claim a document for OCR")?;
        Ok(claimed)
    }

    #[instrument(level = "debug", skip_all)]
    async fn claim_next_text_ready(&self) -> Result<Option<ClaimedText>> {
        let claimed = sqlx::query_as::<_, ClaimedText>(
            r#"
            WITH next_doc AS (
                SELECT id
                FROM menu_documents
                WHERE status = 'OCR_DONE'
                ORDER BY updated_at
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE menu_documents
            SET status = 'PARSING_LLM', updated_at = NOW()
            WHERE id IN (SELECT id FROM next_doc)
            RETURNING id, restaurant_id, raw_text
            "#,
        )
        .fetch_optional(&self.pool)
        .await
        .context("failed to claim a document for parsing")?;
        Ok(claimed)
    }

    #[instrument(level = "debug", skip_all, fields(id = %id))]
    async fn save_text(&self, id: Uuid, raw_text: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE menu_documents
            SET status = 'OCR_DONE', raw_text = $2, failure_reason = NULL,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(raw_text)
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to save extracted text for {id}"))?;
        Ok(())
    }

    #[instrument(level = "debug", skip_all, fields(id = %id))]
    async fn save_parsed(&self, id: Uuid, document: &ParsedDocument) -> Result<()> {
        let payload =
            serde_json::to_value(document).context("failed to serialize parsed document")?;
        // Data and status move together in one statement, so a crash can
        // never leave a parsed payload on a still-claimable row.
        sqlx::query(
            r#"
            UPDATE menu_documents
            SET status = 'PARSED', parsed_document = $2, failure_reason = NULL,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(payload)
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to save parsed document for {id}"))?;
        Ok(())
    }

    #[instrument(level = "debug", skip_all, fields(id = %id, status = %status))]
    async fn mark_failed(&self, id: Uuid, status: MenuStatus, reason: &str) -> Result<()> {
        if !status.is_failure() {
            return Err(anyhow!("{} is not a failure status", status));
        }
        sqlx::query(
            r#"
            UPDATE menu_documents
            SET status = $2, failure_reason = $3, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(status.as_str())
        .bind(reason)
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to mark {id} as {status}"))?;
        Ok(())
    }

    #[instrument(level = "debug", skip_all, fields(id = %id, status = %status))]
    async fn set_status(&self, id: Uuid, status: MenuStatus) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE menu_documents
            SET status = $2, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(status.as_str())
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to set {id} to {status}"))?;
        Ok(())
    }

    #[instrument(level = "debug", skip_all, fields(id = %id))]
    async fn retry(&self, id: Uuid) -> Result<()> {
        let reset: Option<(Uuid,)> = sqlx::query_as(
            r#"
            UPDATE menu_documents
            SET status = 'MENU_UPLOADED', raw_text = NULL, parsed_document = NULL,
                failure_reason = NULL, updated_at = NOW()
            WHERE id = $1 AND status IN ('OCR_FAILED', 'PARSING_FAILED')
            RETURNING id
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("failed to retry {id}"))?;
        if reset.is_none() {
            let current = self.get_document(id).await?;
            return Err(anyhow!(
                "document {} has status {} and cannot be retried",
                id,
                current.status
            ));
        }
        Ok(())
    }

    async fn menu_context(&self, id: Uuid) -> Result<MenuContext> {
        let (city, cuisine_type): (String, String) = sqlx::query_as(
            r#"
            SELECT r.city, r.cuisine_type
            FROM menu_documents d
            JOIN restaurants r ON r.id = d.restaurant_id
            WHERE d.id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("failed to look up the restaurant for {id}"))?
        .ok_or_else(|| anyhow!("no restaurant found for document {id}"))?;
        Ok(MenuContext { city, cuisine_type })
    }

    async fn get_document(&self, id: Uuid) -> Result<MenuDocument> {
        let row = sqlx::query_as::<_, DocumentRow>(
            r#"
            SELECT id, restaurant_id, source_object_key, original_filename,
                   status, raw_text, parsed_document, failure_reason
            FROM menu_documents
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("failed to load document {id}"))?
        .ok_or_else(|| anyhow!("no menu document with id {id}"))?;
        row.try_into()
    }
}

#[async_trait]
impl SnapshotStore for PgJobStore {
    async fn parsed_totals(&self, city: &str, cuisine_type: &str) -> Result<Vec<f64>> {
        let totals: Vec<f64> = sqlx::query_scalar(
            r#"
            SELECT (d.parsed_document #>> '{cost_for_two,calculation,total_cost_for_two}')::DOUBLE PRECISION
            FROM menu_documents d
            JOIN restaurants r ON r.id = d.restaurant_id
            WHERE d.status = 'PARSED'
              AND d.parsed_document IS NOT NULL
              AND r.city = $1
              AND r.cuisine_type = $2
            "#,
        )
        .bind(city)
        .bind(cuisine_type)
        .fetch_all(&self.pool)
        .await
        .with_context(|| format!("failed to load parsed totals for {city}/{cuisine_type}"))?;
        Ok(totals)
    }

    #[instrument(level = "debug", skip_all, fields(city = %city, cuisine_type = %cuisine_type))]
    async fn upsert_snapshot(
        &self,
        city: &str,
        cuisine_type: &str,
        avg: f64,
        median: f64,
        sample_size: i64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO competitive_snapshots
                (city, cuisine_type, avg_cost_for_two, median_cost_for_two, sample_size)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (city, cuisine_type) DO UPDATE
            SET avg_cost_for_two = EXCLUDED.avg_cost_for_two,
                median_cost_for_two = EXCLUDED.median_cost_for_two,
                sample_size = EXCLUDED.sample_size,
                updated_at = NOW()
            "#,
        )
        .bind(city)
        .bind(cuisine_type)
        .bind(avg)
        .bind(median)
        .bind(sample_size)
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to upsert the snapshot for {city}/{cuisine_type}"))?;
        Ok(())
    }

    async fn get_snapshot(
        &self,
        city: &str,
        cuisine_type: &str,
    ) -> Result<Option<CompetitiveSnapshot>> {
        let snapshot = sqlx::query_as::<_, CompetitiveSnapshot>(
            r#"
            SELECT city, cuisine_type, avg_cost_for_two, median_cost_for_two,
                   sample_size, created_at, updated_at
            FROM competitive_snapshots
            WHERE city = $1 AND cuisine_type = $2
            "#,
        )
        .bind(city)
        .bind(cuisine_type)
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("failed to load the snapshot for {city}/{cuisine_type}"))?;
        Ok(snapshot)
    }
}

#[cfg(test)]
pub(crate) mod memory {
    //! An in-memory store with the same claiming contract, for worker tests.

    use std::{
        collections::HashMap,
        sync::{Arc, Mutex},
    };

    use chrono::Utc;

    use super::*;

    #[derive(Default)]
    struct Inner {
        documents: Vec<MenuDocument>,
        restaurants: HashMap<i64, MenuContext>,
        snapshots: HashMap<(String, String), CompetitiveSnapshot>,
    }

    #[derive(Clone, Default)]
    pub(crate) struct MemoryStore {
        inner: Arc<Mutex<Inner>>,
    }

    impl MemoryStore {
        pub(crate) fn new() -> Self {
            Self::default()
        }

        pub(crate) fn seed_restaurant(&self, id: i64, city: &str, cuisine_type: &str) {
            self.inner.lock().unwrap().restaurants.insert(
                id,
                MenuContext {
                    city: city.to_owned(),
                    cuisine_type: cuisine_type.to_owned(),
                },
            );
        }

        pub(crate) fn seed_uploaded(
            &self,
            restaurant_id: i64,
            source_object_key: &str,
            original_filename: &str,
        ) -> Uuid {
            let id = Uuid::new_v4();
            self.inner.lock().unwrap().documents.push(MenuDocument {
                id,
                restaurant_id,
                source_object_key: source_object_key.to_owned(),
                original_filename: original_filename.to_owned(),
                status: MenuStatus::MenuUploaded,
                raw_text: None,
                parsed_document: None,
                failure_reason: None,
            });
            id
        }

        pub(crate) fn seed_text_ready(&self, restaurant_id: i64, raw_text: &str) -> Uuid {
            let id = self.seed_uploaded(restaurant_id, "unused", "unused.png");
            let mut inner = self.inner.lock().unwrap();
            let doc = inner.documents.iter_mut().find(|d| d.id == id).unwrap();
            doc.status = MenuStatus::OcrDone;
            doc.raw_text = Some(raw_text.to_owned());
            id
        }
    }

    #[async_trait]
    impl JobStore for MemoryStore {
        async fn claim_next_uploaded(&self) -> Result<Option<ClaimedUpload>> {
            let mut inner = self.inner.lock().unwrap();
            let doc = inner
                .documents
                .iter_mut()
                .find(|d| d.status == MenuStatus::MenuUploaded);
            Ok(doc.map(|d| {
                d.status = MenuStatus::OcrProcessing;
                ClaimedUpload {
                    id: d.id,
                    source_object_key: d.source_object_key.clone(),
                    original_filename: d.original_filename.clone(),
                }
            }))
        }

        async fn claim_next_text_ready(&self) -> Result<Option<ClaimedText>> {
            let mut inner = self.inner.lock().unwrap();
            let doc = inner
                .documents
                .iter_mut()
                .find(|d| d.status == MenuStatus::OcrDone);
            Ok(doc.map(|d| {
                d.status = MenuStatus::ParsingLlm;
                ClaimedText {
                    id: d.id,
                    restaurant_id: d.restaurant_id,
                    raw_text: d.raw_text.clone().unwrap_or_default(),
                }
            }))
        }

        async fn save_text(&self, id: Uuid, raw_text: &str) -> Result<()> {
            let mut inner = self.inner.lock().unwrap();
            let doc = find_mut(&mut inner, id)?;
            doc.status = MenuStatus::OcrDone;
            doc.raw_text = Some(raw_text.to_owned());
            doc.failure_reason = None;
            Ok(())
        }

        async fn save_parsed(&self, id: Uuid, document: &ParsedDocument) -> Result<()> {
            let mut inner = self.inner.lock().unwrap();
            let doc = find_mut(&mut inner, id)?;
            doc.status = MenuStatus::Parsed;
            doc.parsed_document = Some(document.clone());
            doc.failure_reason = None;
            Ok(())
        }

        async fn mark_failed(&self, id: Uuid, status: MenuStatus, reason: &str) -> Result<()> {
            if !status.is_failure() {
                return Err(anyhow!("{} is not a failure status", status));
            }
            let mut inner = self.inner.lock().unwrap();
            let doc = find_mut(&mut inner, id)?;
            doc.status = status;
            doc.failure_reason = Some(reason.to_owned());
            Ok(())
        }

        async fn set_status(&self, id: Uuid, status: MenuStatus) -> Result<()> {
            let mut inner = self.inner.lock().unwrap();
            find_mut(&mut inner, id)?.status = status;
            Ok(())
        }

        async fn retry(&self, id: Uuid) -> Result<()> {
            let mut inner = self.inner.lock().unwrap();
            let doc = find_mut(&mut inner, id)?;
            if !doc.status.is_failure() {
                return Err(anyhow!(
                    "document {} has status {} and cannot be retried",
                    id,
                    doc.status
                ));
            }
            doc.status = MenuStatus::MenuUploaded;
            doc.raw_text = None;
            doc.parsed_document = None;
            doc.failure_reason = None;
            Ok(())
        }

        async fn menu_context(&self, id: Uuid) -> Result<MenuContext> {
            let inner = self.inner.lock().unwrap();
            let doc = inner
                .documents
                .iter()
                .find(|d| d.id == id)
                .ok_or_else(|| anyhow!("no menu document with id {id}"))?;
            inner
                .restaurants
                .get(&doc.restaurant_id)
                .cloned()
                .ok_or_else(|| anyhow!("no restaurant found for document {id}"))
        }

        async fn get_document(&self, id: Uuid) -> Result<MenuDocument> {
            let inner = self.inner.lock().unwrap();
            inner
                .documents
                .iter()
                .find(|d| d.id == id)
                .cloned()
                .ok_or_else(|| anyhow!("no menu document with id {id}"))
        }
    }

    #[async_trait]
    impl SnapshotStore for MemoryStore {
        async fn parsed_totals(&self, city: &str, cuisine_type: &str) -> Result<Vec<f64>> {
            let inner = self.inner.lock().unwrap();
            Ok(inner
                .documents
                .iter()
                .filter(|d| d.status == MenuStatus::Parsed)
                .filter_map(|d| {
                    let context = inner.restaurants.get(&d.restaurant_id)?;
                    if context.city != city || context.cuisine_type != cuisine_type {
                        return None;
                    }
                    Some(d.parsed_document.as_ref()?.cost_for_two.calculation.total_cost_for_two)
                })
                .collect())
        }

        async fn upsert_snapshot(
            &self,
            city: &str,
            cuisine_type: &str,
            avg: f64,
            median: f64,
            sample_size: i64,
        ) -> Result<()> {
            let now = Utc::now();
            let mut inner = self.inner.lock().unwrap();
            let key = (city.to_owned(), cuisine_type.to_owned());
            inner
                .snapshots
                .entry(key)
                .and_modify(|snapshot| {
                    snapshot.avg_cost_for_two = avg;
                    snapshot.median_cost_for_two = median;
                    snapshot.sample_size = sample_size;
                    snapshot.updated_at = now;
                })
                .or_insert_with(|| CompetitiveSnapshot {
                    city: city.to_owned(),
                    cuisine_type: cuisine_type.to_owned(),
                    avg_cost_for_two: avg,
                    median_cost_for_two: median,
                    sample_size,
                    created_at: now,
                    updated_at: now,
                });
            Ok(())
        }

        async fn get_snapshot(
            &self,
            city: &str,
            cuisine_type: &str,
        ) -> Result<Option<CompetitiveSnapshot>> {
            let inner = self.inner.lock().unwrap();
            Ok(inner
                .snapshots
                .get(&(city.to_owned(), cuisine_type.to_owned()))
                .cloned())
        }
    }

    fn find_mut(inner: &mut Inner, id: Uuid) -> Result<&mut MenuDocument> {
        inner
            .documents
            .iter_mut()
            .find(|d| d.id == id)
            .ok_or_else(|| anyhow!("no menu document with id {id}"))
    }
}
