//! The parsing worker: extracted text in, priced parsed documents out.

use std::time::Duration;

use crate::{
    extract::PageSet,
    llm::LlmClient,
    model::MenuStatus,
    parse::{build_parsed_document, validate_response},
    prelude::*,
    preprocess::{clean_text, looks_multipage},
    snapshot,
    store::{ClaimedText, JobStore, SnapshotStore},
    workers::Worker,
};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

pub struct ParseWorker<S> {
    store: Arc<S>,
    llm: Arc<dyn LlmClient>,
    poll_interval: Duration,
}

impl<S> ParseWorker<S>
where
    S: JobStore + SnapshotStore + 'static,
{
    pub fn new(store: Arc<S>, llm: Arc<dyn LlmClient>, poll_interval: Duration) -> Self {
        Self {
            store,
            llm,
            poll_interval,
        }
    }

    #[instrument(level = "debug", skip_all, fields(id = %claim.id))]
    async fn process(&self, claim: &ClaimedText) -> Result<()> {
        let pages = PageSet::from_raw_text(&claim.raw_text);
        // Multi-page scans carry enough OCR noise to be worth a cleaning
        // pass; short single-page text goes to the model untouched.
        let text = if looks_multipage(&pages) {
            clean_text(&pages)
        } else {
            pages.joined()
        };

        let response = self.llm.parse(&text).await?;
        let menu = validate_response(&response)?;
        let document = build_parsed_document(menu)?;
        self.store.save_parsed(claim.id, &document).await?;
        info!(
            id = %claim.id,
            items = document.items.len(),
            total = document.cost_for_two.calculation.total_cost_for_two,
            "parsed menu"
        );

        // The parse is already committed. Snapshot recomputation is best
        // effort and must not undo it.
        match self.store.menu_context(claim.id).await {
            Ok(context) => {
                if let Err(err) = snapshot::recompute(
                    self.store.as_ref(),
                    &context.city,
                    &context.cuisine_type,
                )
                .await
                {
                    warn!(id = %claim.id, "snapshot recompute failed: {:#}", err);
                }
            }
            Err(err) => {
                warn!(id = %claim.id, "could not resolve the restaurant context: {:#}", err);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl<S> Worker for ParseWorker<S>
where
    S: JobStore + SnapshotStore + 'static,
{
    fn name(&self) -> &'static str {
        "parse"
    }

    fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    async fn tick(&self) -> Result<bool> {
        let Some(claim) = self.store.claim_next_text_ready().await? else {
            return Ok(false);
        };
        info!(id = %claim.id, "claimed document for parsing");
        if let Err(err) = self.process(&claim).await {
            warn!(id = %claim.id, "parsing failed: {:#}", err);
            self.store
                .mark_failed(claim.id, MenuStatus::ParsingFailed, &format!("{err:#}"))
                .await?;
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;

    struct FixedLlm(&'static str);

    #[async_trait]
    impl LlmClient for FixedLlm {
        async fn parse(&self, _text: &str) -> Result<String> {
            Ok(self.0.to_owned())
        }
    }

    const GOOD_RESPONSE: &str = r#"{
        "items": [
            {"name": "Paneer Tikka", "category": "starter", "price": 100},
            {"name": "Thali", "category": "main_course", "price": 300},
            {"name": "Lassi", "category": "drink", "price": 50},
            {"name": "Chai", "category": "drink", "price": 60},
            {"name": "Gulab Jamun", "category": "dessert", "price": 80}
        ],
        "tax_percent": 10
    }"#;

    fn worker_with(store: &MemoryStore, response: &'static str) -> ParseWorker<MemoryStore> {
        ParseWorker::new(
            Arc::new(store.clone()),
            Arc::new(FixedLlm(response)),
            DEFAULT_POLL_INTERVAL,
        )
    }

    #[tokio::test]
    async fn valid_response_transitions_to_parsed() -> Result<()> {
        let store = MemoryStore::new();
        store.seed_restaurant(1, "Pune", "indian");
        let id = store.seed_text_ready(1, "Paneer Tikka 100 ...");

        let worker = worker_with(&store, GOOD_RESPONSE);
        assert!(worker.tick().await?);

        let doc = store.get_document(id).await?;
        assert_eq!(doc.status, MenuStatus::Parsed);
        let parsed = doc.parsed_document.unwrap();
        assert_eq!(parsed.cost_for_two.calculation.total_cost_for_two, 649.0);
        assert_eq!(parsed.version, "1.0");
        Ok(())
    }

    #[tokio::test]
    async fn malformed_response_fails_but_preserves_raw_text() -> Result<()> {
        let store = MemoryStore::new();
        store.seed_restaurant(1, "Pune", "indian");
        let id = store.seed_text_ready(1, "Paneer Tikka 100");

        let worker = worker_with(&store, "not json");
        worker.tick().await?;

        let doc = store.get_document(id).await?;
        assert_eq!(doc.status, MenuStatus::ParsingFailed);
        assert!(doc.failure_reason.unwrap().contains("invalid JSON"));
        assert_eq!(doc.raw_text.as_deref(), Some("Paneer Tikka 100"));
        assert!(doc.parsed_document.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn empty_menu_fails_the_cost_calculation() -> Result<()> {
        let store = MemoryStore::new();
        store.seed_restaurant(1, "Pune", "indian");
        let id = store.seed_text_ready(1, "mostly blank page");

        let worker = worker_with(&store, r#"{"items":[],"tax_percent":0}"#);
        worker.tick().await?;

        let doc = store.get_document(id).await?;
        assert_eq!(doc.status, MenuStatus::ParsingFailed);
        assert!(doc.failure_reason.unwrap().contains("empty parsed menu"));
        Ok(())
    }

    #[tokio::test]
    async fn third_parse_under_a_key_produces_a_snapshot() -> Result<()> {
        let store = MemoryStore::new();
        store.seed_restaurant(1, "Pune", "indian");
        let worker = worker_with(&store, GOOD_RESPONSE);

        for _ in 0..2 {
            store.seed_text_ready(1, "menu text");
            worker.tick().await?;
        }
        assert!(store.get_snapshot("Pune", "indian").await?.is_none());

        store.seed_text_ready(1, "menu text");
        worker.tick().await?;
        let snapshot = store.get_snapshot("Pune", "indian").await?.unwrap();
        assert_eq!(snapshot.sample_size, 3);
        assert_eq!(snapshot.avg_cost_for_two, 649.0);
        assert_eq!(snapshot.median_cost_for_two, 649.0);
        Ok(())
    }

    #[tokio::test]
    async fn empty_queue_is_a_quiet_tick() -> Result<()> {
        let store = MemoryStore::new();
        let worker = worker_with(&store, GOOD_RESPONSE);
        assert!(!worker.tick().await?);
        Ok(())
    }
}
