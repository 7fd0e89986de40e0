//! Enrollment guard
//!
//! Prevents a contact from entering the same workflow again too soon, which
//! would otherwise let workflows that emit events re-trigger themselves.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::error::EngineError;
use crate::model::{Enrollment, EnrollmentCondition, EnrollmentPolicy};
use crate::persistence::AutomationStore;

/// Predicate deciding whether a contact may (re-)enter a workflow
pub trait EligibilityRule: Send + Sync {
    /// Whether a new enrollment at `now` is allowed given the current one
    fn permits(&self, existing: Option<&Enrollment>, now: DateTime<Utc>) -> bool {
        self.condition(now).permits(existing)
    }

    /// The same rule as a condition the store can evaluate atomically
    fn condition(&self, now: DateTime<Utc>) -> EnrollmentCondition;
}

impl EligibilityRule for EnrollmentPolicy {
    fn condition(&self, now: DateTime<Utc>) -> EnrollmentCondition {
        match self {
            Self::Always => EnrollmentCondition::Unconditional,
            Self::Once => EnrollmentCondition::IfAbsent,
            // A cooldown reaching past the representable range never expires
            Self::Cooldown { days } => Duration::try_days(i64::from(*days))
                .and_then(|cooldown| now.checked_sub_signed(cooldown))
                .map_or(EnrollmentCondition::IfAbsent, EnrollmentCondition::IfEnrolledBefore),
        }
    }
}

/// Checks and records enrollments under the business's policy
#[derive(Clone)]
pub struct EnrollmentGuard {
    store: Arc<dyn AutomationStore>,
}

impl EnrollmentGuard {
    pub fn new(store: Arc<dyn AutomationStore>) -> Self {
        Self { store }
    }

    /// Policy of a business, falling back to the default
    pub async fn policy_for(
        &self,
        business_id: Option<&str>,
    ) -> Result<EnrollmentPolicy, EngineError> {
        let Some(business_id) = business_id else {
            return Ok(EnrollmentPolicy::default());
        };

        Ok(self
            .store
            .get_settings(business_id)
            .await?
            .map(|s| s.enrollment_policy)
            .unwrap_or_default())
    }

    /// Whether the contact may enter the workflow at `now`
    ///
    /// Runs without a contact are always eligible.
    #[instrument(skip(self))]
    pub async fn is_eligible(
        &self,
        business_id: Option<&str>,
        contact_id: Option<Uuid>,
        workflow_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<bool, EngineError> {
        let Some(contact_id) = contact_id else {
            return Ok(true);
        };

        let policy = self.policy_for(business_id).await?;
        let existing = self.store.get_enrollment(contact_id, workflow_id).await?;
        Ok(policy.permits(existing.as_ref(), now))
    }

    /// Record that the contact entered the workflow at `now`
    pub async fn record_enrollment(
        &self,
        contact_id: Uuid,
        workflow_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        self.store
            .try_enroll(contact_id, workflow_id, now, EnrollmentCondition::Unconditional)
            .await?;
        Ok(())
    }

    /// Check eligibility and record the enrollment in one conditional write
    ///
    /// Returns whether the contact was enrolled. Concurrent callers for the
    /// same pair cannot both pass a restrictive policy.
    #[instrument(skip(self))]
    pub async fn try_enroll(
        &self,
        business_id: Option<&str>,
        contact_id: Option<Uuid>,
        workflow_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<bool, EngineError> {
        let Some(contact_id) = contact_id else {
            return Ok(true);
        };

        let policy = self.policy_for(business_id).await?;
        let enrolled = self
            .store
            .try_enroll(contact_id, workflow_id, now, policy.condition(now))
            .await?;

        if !enrolled {
            debug!(%contact_id, %workflow_id, ?policy, "contact not eligible");
        }
        Ok(enrolled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::AutomationSettings;
    use crate::persistence::InMemoryAutomationStore;

    async fn guard_with(policy: EnrollmentPolicy) -> EnrollmentGuard {
        let store = Arc::new(InMemoryAutomationStore::new());
        let mut settings = AutomationSettings::defaults_for("b1");
        settings.enrollment_policy = policy;
        store.save_settings(&settings).await.unwrap();
        EnrollmentGuard::new(store)
    }

    #[tokio::test]
    async fn test_no_contact_is_eligible() {
        let guard = guard_with(EnrollmentPolicy::Once).await;
        let workflow = Uuid::now_v7();

        assert!(guard.is_eligible(Some("b1"), None, workflow, Utc::now()).await.unwrap());
        assert!(guard.try_enroll(Some("b1"), None, workflow, Utc::now()).await.unwrap());
    }

    #[tokio::test]
    async fn test_once_policy() {
        let guard = guard_with(EnrollmentPolicy::Once).await;
        let (contact, workflow) = (Uuid::now_v7(), Uuid::now_v7());
        let now = Utc::now();

        assert!(guard.try_enroll(Some("b1"), Some(contact), workflow, now).await.unwrap());
        assert!(!guard
            .try_enroll(Some("b1"), Some(contact), workflow, now + Duration::days(365))
            .await
            .unwrap());
    }

    #[test]
    fn test_unbounded_cooldown_acts_as_once() {
        let policy = EnrollmentPolicy::Cooldown { days: u32::MAX };
        assert_eq!(policy.condition(Utc::now()), EnrollmentCondition::IfAbsent);

        let policy = EnrollmentPolicy::Cooldown { days: 7 };
        let now = Utc::now();
        assert_eq!(
            policy.condition(now),
            EnrollmentCondition::IfEnrolledBefore(now - Duration::days(7))
        );
    }

    #[tokio::test]
    async fn test_unbounded_cooldown_enrolls_once() {
        let guard = guard_with(EnrollmentPolicy::Cooldown { days: u32::MAX }).await;
        let (contact, workflow) = (Uuid::now_v7(), Uuid::now_v7());
        let now = Utc::now();

        assert!(guard.try_enroll(Some("b1"), Some(contact), workflow, now).await.unwrap());
        assert!(!guard.try_enroll(Some("b1"), Some(contact), workflow, now).await.unwrap());
    }

    #[tokio::test]
    async fn test_cooldown_policy() {
        let guard = guard_with(EnrollmentPolicy::Cooldown { days: 1 }).await;
        let (contact, workflow) = (Uuid::now_v7(), Uuid::now_v7());
        let now = Utc::now();

        guard.record_enrollment(contact, workflow, now).await.unwrap();

        let soon = now + Duration::hours(2);
        assert!(!guard.is_eligible(Some("b1"), Some(contact), workflow, soon).await.unwrap());
        assert!(!guard.try_enroll(Some("b1"), Some(contact), workflow, soon).await.unwrap());

        let later = now + Duration::hours(25);
        assert!(guard.is_eligible(Some("b1"), Some(contact), workflow, later).await.unwrap());
        assert!(guard.try_enroll(Some("b1"), Some(contact), workflow, later).await.unwrap());
    }

    #[tokio::test]
    async fn test_always_policy() {
        let guard = guard_with(EnrollmentPolicy::Always).await;
        let (contact, workflow) = (Uuid::now_v7(), Uuid::now_v7());
        let now = Utc::now();

        assert!(guard.try_enroll(Some("b1"), Some(contact), workflow, now).await.unwrap());
        assert!(guard.try_enroll(Some("b1"), Some(contact), workflow, now).await.unwrap());
    }

    #[tokio::test]
    async fn test_concurrent_enrollment_admits_one() {
        let guard = guard_with(EnrollmentPolicy::Once).await;
        let (contact, workflow) = (Uuid::now_v7(), Uuid::now_v7());
        let now = Utc::now();

        let attempts = (0..8).map(|_| {
            let guard = guard.clone();
            tokio::spawn(async move {
                guard
                    .try_enroll(Some("b1"), Some(contact), workflow, now)
                    .await
                    .unwrap()
            })
        });
        let results = futures::future::join_all(attempts).await;

        let admitted = results.into_iter().filter(|r| *r.as_ref().unwrap()).count();
        assert_eq!(admitted, 1);
    }
}
