//! crates/asset_history_core/src/workflow.rs
//!
//! Drives the external `GenerationService` and records its results in the history store.
//!
//! Generation calls can take a long time and may overlap for the same item, so results are
//! written with targeted `ItemCommand`s against the stored copy rather than by replacing
//! the whole item read before the call. A failed call leaves the item untouched.

use std::sync::Arc;

use tracing::{error, info};
use uuid::Uuid;

use crate::domain::HistoryItem;
use crate::ports::{GenerationService, InteractionRequest, PortError, PortResult, ScriptRequest};
use crate::selection::SelectionState;
use crate::session::Session;
use crate::store::{HistoryStore, ItemCommand};

pub struct GenerationWorkflow {
    generator: Arc<dyn GenerationService>,
    store: Arc<HistoryStore>,
}

impl GenerationWorkflow {
    pub fn new(generator: Arc<dyn GenerationService>, store: Arc<HistoryStore>) -> Self {
        Self { generator, store }
    }

    /// Analyzes a product and starts a new history item for it.
    pub async fn analyze_product(&self, session: &Session, pid: &str) -> PortResult<HistoryItem> {
        let pid = pid.trim();
        if pid.is_empty() {
            return Err(PortError::Invalid("product id is empty".to_string()));
        }
        let product = self
            .generator
            .analyze_product(pid)
            .await
            .map_err(|e| {
                error!(pid, error = %e, "Product analysis failed");
                e
            })?;

        let now = self.store.now();
        let suffix = Uuid::new_v4().simple().to_string();
        let id = format!("{}-{}-{}", now.timestamp_millis(), pid, &suffix[..8]);
        let item = self
            .store
            .upsert(session, HistoryItem::new(id, now, product))
            .await?;
        info!(username = session.username(), item_id = %item.id, "Created history item");
        Ok(item)
    }

    pub async fn generate_three_view(&self, session: &Session, id: &str) -> PortResult<HistoryItem> {
        let item = self.live_item(session, id).await?;
        let image = self.generator.generate_three_view(&item.product).await?;
        self.store
            .apply(session, id, ItemCommand::AppendThreeView(image))
            .await
    }

    pub async fn generate_interaction(
        &self,
        session: &Session,
        id: &str,
        request: InteractionRequest,
    ) -> PortResult<HistoryItem> {
        let item = self.live_item(session, id).await?;
        let image = self
            .generator
            .generate_interaction(&item.product, &request)
            .await?;
        self.store
            .apply(session, id, ItemCommand::AppendInteraction(image))
            .await
    }

    pub async fn generate_selling_points(
        &self,
        session: &Session,
        id: &str,
    ) -> PortResult<HistoryItem> {
        let item = self.live_item(session, id).await?;
        let points = self.generator.generate_selling_points(&item.product).await?;
        self.store
            .apply(session, id, ItemCommand::ReplaceSellingPoints(points))
            .await
    }

    /// Writes a script from the item's selected points and, if the selection belongs
    /// to this item, the selected assets.
    pub async fn generate_script(
        &self,
        session: &Session,
        id: &str,
        custom_prompt: Option<String>,
        selection: &SelectionState,
    ) -> PortResult<HistoryItem> {
        let item = self.live_item(session, id).await?;
        if item.selected_points.is_empty() {
            return Err(PortError::Invalid(
                "select at least one selling point before generating a script".to_string(),
            ));
        }
        let request = ScriptRequest {
            points: item.selected_points.clone(),
            assets: selection.assets_for(id).to_vec(),
            custom_prompt,
        };
        let script = self.generator.generate_script(&item.product, &request).await?;
        self.store
            .apply(session, id, ItemCommand::SetScript(script))
            .await
    }

    /// The item, as long as it is not in the trash.
    async fn live_item(&self, session: &Session, id: &str) -> PortResult<HistoryItem> {
        let item = self.store.item(session, id).await?;
        if item.is_trashed() {
            return Err(PortError::NotFound(format!("History item {} is in the trash", id)));
        }
        Ok(item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ProductInfo;
    use crate::memory::{InMemoryAccounts, InMemoryPartitions};
    use crate::session::SessionManager;
    use crate::sync::SyncGateway;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tokio::sync::Barrier;

    /// Generator whose image and point calls wait for each other, so that both
    /// read the item before either result is written.
    struct StubGenerator {
        barrier: Option<Barrier>,
        fail: bool,
        last_script_request: Mutex<Option<ScriptRequest>>,
    }

    impl StubGenerator {
        fn new() -> Self {
            Self {
                barrier: None,
                fail: false,
                last_script_request: Mutex::new(None),
            }
        }

        async fn rendezvous(&self) {
            if let Some(barrier) = &self.barrier {
                barrier.wait().await;
            }
        }

        fn check(&self) -> PortResult<()> {
            if self.fail {
                Err(PortError::Generation("model overloaded".to_string()))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl GenerationService for StubGenerator {
        async fn analyze_product(&self, pid: &str) -> PortResult<ProductInfo> {
            self.check()?;
            Ok(ProductInfo {
                pid: pid.to_string(),
                introduction: "A bottle".to_string(),
                ..ProductInfo::default()
            })
        }

        async fn generate_three_view(&self, _product: &ProductInfo) -> PortResult<String> {
            self.rendezvous().await;
            self.check()?;
            Ok("img1".to_string())
        }

        async fn generate_interaction(
            &self,
            _product: &ProductInfo,
            request: &InteractionRequest,
        ) -> PortResult<String> {
            self.check()?;
            Ok(format!("model:{}", request.custom_prompt.as_deref().unwrap_or("default")))
        }

        async fn generate_selling_points(&self, _product: &ProductInfo) -> PortResult<Vec<String>> {
            self.rendezvous().await;
            self.check()?;
            Ok(vec!["p1".to_string(), "p2".to_string()])
        }

        async fn generate_script(
            &self,
            _product: &ProductInfo,
            request: &ScriptRequest,
        ) -> PortResult<String> {
            self.check()?;
            *self.last_script_request.lock().unwrap() = Some(request.clone());
            Ok(format!("script with {}", request.points.join(", ")))
        }
    }

    async fn setup(
        generator: Arc<StubGenerator>,
    ) -> (GenerationWorkflow, Arc<HistoryStore>, Session) {
        let partitions = Arc::new(InMemoryPartitions::new());
        let sync = Arc::new(SyncGateway::disabled());
        let accounts = Arc::new(InMemoryAccounts::with_accounts([("alice", "pw")]));
        let store = Arc::new(HistoryStore::new(partitions, sync));
        let sessions = SessionManager::new(accounts, store.clone(), None);
        let session = sessions.login("alice", "pw").await.unwrap();
        let workflow = GenerationWorkflow::new(generator, store.clone());
        (workflow, store, session)
    }

    #[tokio::test]
    async fn concurrent_generations_do_not_lose_updates() {
        let generator = Arc::new(StubGenerator {
            barrier: Some(Barrier::new(2)),
            ..StubGenerator::new()
        });
        let (workflow, store, session) = setup(generator).await;
        let x = workflow.analyze_product(&session, "123").await.unwrap();
        assert!(x.three_views.is_empty() && x.selling_points.is_empty());

        let (a, b) = tokio::join!(
            workflow.generate_three_view(&session, &x.id),
            workflow.generate_selling_points(&session, &x.id),
        );
        a.unwrap();
        b.unwrap();

        let x = store.item(&session, &x.id).await.unwrap();
        assert_eq!(x.three_views, vec!["img1"]);
        assert_eq!(x.selling_points, vec!["p1", "p2"]);
    }

    #[tokio::test]
    async fn analyze_product_creates_active_item() {
        let (workflow, store, session) = setup(Arc::new(StubGenerator::new())).await;
        let item = workflow.analyze_product(&session, " 123 ").await.unwrap();
        assert!(item.id.contains("-123-"));
        assert_eq!(item.product.pid, "123");

        let data = store.get_current(&session).await.unwrap().unwrap();
        assert_eq!(data.active_item().map(|i| i.id.clone()), Some(item.id));

        let err = workflow.analyze_product(&session, "  ").await.unwrap_err();
        assert!(matches!(err, PortError::Invalid(_)));
    }

    #[tokio::test]
    async fn failed_generation_leaves_item_unchanged() {
        let (workflow, store, session) = setup(Arc::new(StubGenerator::new())).await;
        let item = workflow.analyze_product(&session, "123").await.unwrap();

        let failing = GenerationWorkflow::new(
            Arc::new(StubGenerator {
                fail: true,
                ..StubGenerator::new()
            }),
            store.clone(),
        );
        let err = failing
            .generate_three_view(&session, &item.id)
            .await
            .unwrap_err();
        assert!(matches!(err, PortError::Generation(_)));
        assert_eq!(store.item(&session, &item.id).await.unwrap(), item);
    }

    #[tokio::test]
    async fn script_uses_selected_points_and_own_assets() {
        let generator = Arc::new(StubGenerator::new());
        let (workflow, store, session) = setup(generator.clone()).await;
        let item = workflow.analyze_product(&session, "123").await.unwrap();

        let mut selection = SelectionState::new();
        let err = workflow
            .generate_script(&session, &item.id, None, &selection)
            .await
            .unwrap_err();
        assert!(matches!(err, PortError::Invalid(_)));

        workflow
            .generate_selling_points(&session, &item.id)
            .await
            .unwrap();
        store
            .apply(&session, &item.id, ItemCommand::TogglePoint("p1".into()))
            .await
            .unwrap();
        let with_model = workflow
            .generate_interaction(
                &session,
                &item.id,
                InteractionRequest {
                    custom_prompt: Some("beach".into()),
                    model_image: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(with_model.interactions, vec!["model:beach"]);

        selection.set_active(Some(item.id.as_str()));
        selection.toggle("model:beach");
        let updated = workflow
            .generate_script(&session, &item.id, Some("funny".into()), &selection)
            .await
            .unwrap();
        assert_eq!(updated.script.as_deref(), Some("script with p2"));

        let request = generator.last_script_request.lock().unwrap().clone().unwrap();
        assert_eq!(request.assets, vec!["model:beach"]);
        assert_eq!(request.custom_prompt.as_deref(), Some("funny"));

        selection.set_active(Some("another-item"));
        workflow
            .generate_script(&session, &item.id, None, &selection)
            .await
            .unwrap();
        let request = generator.last_script_request.lock().unwrap().clone().unwrap();
        assert!(request.assets.is_empty());
    }

    #[tokio::test]
    async fn generation_on_trashed_item_is_rejected() {
        let (workflow, store, session) = setup(Arc::new(StubGenerator::new())).await;
        let item = workflow.analyze_product(&session, "123").await.unwrap();
        store.move_to_trash(&session, &item.id).await.unwrap();

        let err = workflow
            .generate_selling_points(&session, &item.id)
            .await
            .unwrap_err();
        assert!(matches!(err, PortError::NotFound(_)));
    }
}
