//! Intent routing
//!
//! Resolves the workflows an event should start: the business's own
//! event-triggered workflows plus the industry recipes mapped to the intent
//! that the business has not switched off.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::error::EngineError;
use crate::model::{WorkflowDefinition, DEFAULT_INDUSTRY};
use crate::persistence::AutomationStore;

/// Maps `(business_id, intent)` to an ordered list of workflows
#[derive(Clone)]
pub struct IntentRouter {
    store: Arc<dyn AutomationStore>,
}

impl IntentRouter {
    pub fn new(store: Arc<dyn AutomationStore>) -> Self {
        Self { store }
    }

    /// Resolve the workflows for an intent, ordered by ascending priority
    ///
    /// Returns an empty list when automations are disabled for the business.
    /// A candidate that cannot be resolved is logged and skipped.
    #[instrument(skip(self))]
    pub async fn resolve(
        &self,
        business_id: &str,
        intent: &str,
    ) -> Result<Vec<WorkflowDefinition>, EngineError> {
        if !self.automations_enabled(business_id).await? {
            debug!("automations disabled");
            return Ok(vec![]);
        }

        let industry = self.industry(business_id).await?;
        let mut seen = HashSet::<Uuid>::new();
        let mut workflows = vec![];

        match self.store.list_event_workflows(business_id).await {
            Ok(owned) => {
                for workflow in owned {
                    if workflow.trigger.matches_intent(intent) && seen.insert(workflow.id) {
                        workflows.push(workflow);
                    }
                }
            }
            Err(e) => warn!(error = %e, "failed to list business workflows"),
        }

        let recipe_ids = match self.store.list_recipe_ids(intent, &industry).await {
            Ok(ids) => ids,
            Err(e) => {
                warn!(error = %e, %industry, "failed to list recipe mappings");
                vec![]
            }
        };

        for recipe_id in recipe_ids {
            match self.resolve_recipe(business_id, &recipe_id, &industry).await {
                Ok(Some(workflow)) => {
                    if seen.insert(workflow.id) {
                        workflows.push(workflow);
                    }
                }
                Ok(None) => {}
                Err(e) => warn!(%recipe_id, error = %e, "skipping recipe"),
            }
        }

        // Stable: equal priorities keep business workflows ahead of recipes
        workflows.sort_by_key(|w| w.priority);

        debug!(count = workflows.len(), %industry, "resolved workflows");
        Ok(workflows)
    }

    async fn automations_enabled(&self, business_id: &str) -> Result<bool, EngineError> {
        Ok(self
            .store
            .get_settings(business_id)
            .await?
            .map_or(true, |s| s.automations_enabled))
    }

    async fn industry(&self, business_id: &str) -> Result<String, EngineError> {
        match self.store.get_business(business_id).await? {
            Some(business) => Ok(business.industry_or_default().to_string()),
            None => {
                warn!(%business_id, "business not found, using default industry");
                Ok(DEFAULT_INDUSTRY.to_string())
            }
        }
    }

    /// Whether a recipe is enabled for a business
    ///
    /// An explicit recipe toggle wins. Otherwise the recipe is enabled unless
    /// its pack has been explicitly disabled.
    pub async fn recipe_enabled(
        &self,
        business_id: &str,
        recipe_id: &str,
    ) -> Result<bool, EngineError> {
        if let Some(enabled) = self.store.get_recipe_toggle(business_id, recipe_id).await? {
            return Ok(enabled);
        }

        let recipe = self
            .store
            .get_recipe(recipe_id)
            .await?
            .ok_or_else(|| EngineError::lookup("recipe", recipe_id))?;

        match recipe.pack_id {
            Some(pack_id) => Ok(self.store.get_pack_toggle(business_id, &pack_id).await? != Some(false)),
            None => Ok(true),
        }
    }

    async fn resolve_recipe(
        &self,
        business_id: &str,
        recipe_id: &str,
        industry: &str,
    ) -> Result<Option<WorkflowDefinition>, EngineError> {
        if !self.recipe_enabled(business_id, recipe_id).await? {
            debug!(%recipe_id, "recipe disabled");
            return Ok(None);
        }

        let workflow = self
            .store
            .find_recipe_workflow(recipe_id, industry)
            .await?
            .ok_or_else(|| EngineError::lookup("recipe workflow", format!("{recipe_id}/{industry}")))?;

        Ok(workflow.is_active.then_some(workflow))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AutomationSettings, Business, Recipe, WorkflowTrigger};
    use crate::persistence::InMemoryAutomationStore;

    fn store() -> Arc<InMemoryAutomationStore> {
        let store = Arc::new(InMemoryAutomationStore::new());
        store.put_business(Business {
            id: "b1".into(),
            industry: Some("dental".into()),
        });
        store
    }

    async fn recipe(
        store: &InMemoryAutomationStore,
        id: &str,
        pack: Option<&str>,
        priority: i32,
    ) -> Uuid {
        store.put_recipe(Recipe {
            id: id.into(),
            name: id.into(),
            pack_id: pack.map(Into::into),
        });
        store.map_recipe("contact.submit", "dental", id);
        let workflow = WorkflowDefinition::new(id, WorkflowTrigger::event(["contact.submit"]))
            .for_recipe(id, "dental")
            .with_priority(priority);
        let workflow_id = workflow.id;
        store.save_workflow(&workflow).await.unwrap();
        workflow_id
    }

    #[tokio::test]
    async fn test_merges_business_and_recipe_workflows_by_priority() {
        let store = store();
        let owned = WorkflowDefinition::new("Owned", WorkflowTrigger::event(["contact.submit"]))
            .for_business("b1")
            .with_priority(5);
        store.save_workflow(&owned).await.unwrap();
        let recipe_workflow = recipe(&store, "welcome", None, 1).await;

        let router = IntentRouter::new(store);
        let resolved = router.resolve("b1", "contact.submit").await.unwrap();

        let ids: Vec<_> = resolved.iter().map(|w| w.id).collect();
        assert_eq!(ids, vec![recipe_workflow, owned.id]);
    }

    #[tokio::test]
    async fn test_ignores_other_intents_and_inactive() {
        let store = store();
        let other = WorkflowDefinition::new("Other", WorkflowTrigger::event(["order.paid"]))
            .for_business("b1");
        let inactive = WorkflowDefinition::new("Off", WorkflowTrigger::event(["contact.submit"]))
            .for_business("b1")
            .inactive();
        store.save_workflow(&other).await.unwrap();
        store.save_workflow(&inactive).await.unwrap();

        let router = IntentRouter::new(store);
        assert!(router.resolve("b1", "contact.submit").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_disabled_business_resolves_nothing() {
        let store = store();
        recipe(&store, "welcome", None, 0).await;
        let mut settings = AutomationSettings::defaults_for("b1");
        settings.automations_enabled = false;
        store.save_settings(&settings).await.unwrap();

        let router = IntentRouter::new(store);
        assert!(router.resolve("b1", "contact.submit").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_recipe_toggle_overrides_pack() {
        let store = store();
        let in_pack = recipe(&store, "follow-up", Some("nurture"), 0).await;
        recipe(&store, "review-ask", Some("nurture"), 0).await;
        store.set_pack_toggle("b1", "nurture", false);
        store.set_recipe_toggle("b1", "follow-up", true);

        let router = IntentRouter::new(store);
        let resolved = router.resolve("b1", "contact.submit").await.unwrap();

        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].id, in_pack);
    }

    #[tokio::test]
    async fn test_explicitly_disabled_recipe() {
        let store = store();
        recipe(&store, "welcome", None, 0).await;
        store.set_recipe_toggle("b1", "welcome", false);

        let router = IntentRouter::new(store);
        assert!(router.resolve("b1", "contact.submit").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unresolvable_recipe_is_skipped() {
        let store = store();
        // Mapping without a recipe row or workflow
        store.map_recipe("contact.submit", "dental", "ghost");
        let good = recipe(&store, "welcome", None, 0).await;

        let router = IntentRouter::new(store);
        let resolved = router.resolve("b1", "contact.submit").await.unwrap();

        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].id, good);
    }

    #[tokio::test]
    async fn test_missing_business_uses_general_industry() {
        let store = Arc::new(InMemoryAutomationStore::new());
        store.put_recipe(Recipe {
            id: "generic".into(),
            name: "Generic".into(),
            pack_id: None,
        });
        store.map_recipe("contact.submit", DEFAULT_INDUSTRY, "generic");
        let workflow = WorkflowDefinition::new("Generic", WorkflowTrigger::event(["contact.submit"]))
            .for_recipe("generic", DEFAULT_INDUSTRY);
        store.save_workflow(&workflow).await.unwrap();

        let router = IntentRouter::new(store);
        let resolved = router.resolve("unknown", "contact.submit").await.unwrap();
        assert_eq!(resolved.len(), 1);
    }
}
