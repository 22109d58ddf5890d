//! Admission Controller (§4.1): the gatekeeper that reserves a machine slot
//! and a per-user concurrency slot before any sandbox is spawned, and
//! guarantees their release on every exit path.

use crate::error::EngineError;
use crate::model::OwnerId;
use crate::store::QuotaStore;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info};

struct Inner {
    /// Process-local, mutated only inside `acquire`/`release`'s critical
    /// section. Reads outside that section (e.g. `current_instance_count`)
    /// are for observability only, never for an admission decision.
    machine_instances: Mutex<u32>,
    max_machine_instances: u32,
    max_user_concurrent: u32,
    max_user_cpu_ms: i64,
    quota_store: Arc<dyn QuotaStore>,
}

/// Gatekeeper for the two-level (machine, user) admission ceiling.
///
/// Cloning an `AdmissionController` is cheap — clones share the same
/// `machine_instances` counter and quota store through the inner `Arc`.
#[derive(Clone)]
pub struct AdmissionController {
    inner: Arc<Inner>,
}

impl AdmissionController {
    pub fn new(
        quota_store: Arc<dyn QuotaStore>,
        max_machine_instances: u32,
        max_user_concurrent: u32,
        max_user_cpu_ms: i64,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                machine_instances: Mutex::new(0),
                max_machine_instances,
                max_user_concurrent,
                max_user_cpu_ms,
                quota_store,
            }),
        }
    }

    /// Current in-flight instance count, for the Engine API's
    /// `current_instance_count()` (§6.1). Observability only.
    pub async fn current_instance_count(&self) -> u32 {
        *self.inner.machine_instances.lock().await
    }

    pub fn max_instances(&self) -> u32 {
        self.inner.max_machine_instances
    }

    /// Reserve one machine slot and one per-user concurrency slot, per the
    /// six-step algorithm of §4.1. The whole check-and-reserve sequence runs
    /// under a single critical section so two concurrent callers can never
    /// both observe capacity and both succeed when only one slot remains.
    pub async fn acquire(&self, owner_id: OwnerId) -> Result<AdmissionTicket, EngineError> {
        let mut machine_instances = self.inner.machine_instances.lock().await;

        if *machine_instances >= self.inner.max_machine_instances {
            return Err(EngineError::MachineAtCapacity(
                self.inner.max_machine_instances,
            ));
        }
        *machine_instances += 1;

        // From here on, any rejection must roll back the tentative increment
        // before returning.
        let quota = match self.inner.quota_store.get(&owner_id).await {
            Ok(Some(q)) => q,
            Ok(None) => {
                *machine_instances -= 1;
                return Err(EngineError::QuotaNotInitialized);
            }
            Err(e) => {
                *machine_instances -= 1;
                return Err(e);
            }
        };

        if quota.concurrent_count as u32 >= self.inner.max_user_concurrent {
            *machine_instances -= 1;
            return Err(EngineError::UserConcurrencyExceeded(
                self.inner.max_user_concurrent,
            ));
        }

        if quota.cpu_time_used_ms >= self.inner.max_user_cpu_ms {
            *machine_instances -= 1;
            return Err(EngineError::UserCpuExceeded);
        }

        if let Err(e) = self.inner.quota_store.inc_concurrent(&owner_id).await {
            *machine_instances -= 1;
            return Err(e);
        }

        // Lock is dropped at end of scope, releasing the critical section.
        drop(machine_instances);

        info!(owner_id = %owner_id, "admission ticket issued");
        Ok(AdmissionTicket::new(owner_id, self.clone()))
    }

    /// Decrement both the machine counter and the user's `concurrent_count`.
    /// Called exactly once per ticket via `AdmissionTicket::release` — see
    /// the §9 open-question decision recorded in SPEC_FULL.md: this is the
    /// sole site that calls `dec_concurrent`.
    async fn release(&self, owner_id: &OwnerId) {
        let mut machine_instances = self.inner.machine_instances.lock().await;
        *machine_instances = machine_instances.saturating_sub(1);
        drop(machine_instances);

        if let Err(e) = self.inner.quota_store.dec_concurrent(owner_id).await {
            error!(owner_id = %owner_id, error = %e, "failed to release user concurrency slot");
        }
    }
}

/// One reserved (machine slot, user concurrency slot) pair. Exactly one
/// `release()` call has effect; subsequent calls are a no-op. If the ticket
/// is dropped without having been released — most likely because a panic
/// unwound through the Orchestrator — a detached task reclaims the slots as
/// a last resort and logs at `error` level.
pub struct AdmissionTicket {
    owner_id: OwnerId,
    controller: AdmissionController,
    released: Arc<AtomicBool>,
}

impl std::fmt::Debug for AdmissionTicket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionTicket")
            .field("owner_id", &self.owner_id)
            .field("released", &self.released.load(Ordering::Relaxed))
            .finish()
    }
}

impl AdmissionTicket {
    fn new(owner_id: OwnerId, controller: AdmissionController) -> Self {
        Self {
            owner_id,
            controller,
            released: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn owner_id(&self) -> &OwnerId {
        &self.owner_id
    }

    /// Release the reserved slots. Idempotent: the second and later calls
    /// observe `released == true` and return immediately.
    pub async fn release(&self) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }
        self.controller.release(&self.owner_id).await;
    }
}

impl Drop for AdmissionTicket {
    fn drop(&mut self) {
        if self.released.load(Ordering::Acquire) {
            return;
        }
        let released = self.released.clone();
        let controller = self.controller.clone();
        let owner_id = self.owner_id.clone();
        tokio::spawn(async move {
            if released.swap(true, Ordering::AcqRel) {
                return;
            }
            error!(owner_id = %owner_id, "admission ticket dropped without release; reclaiming slot");
            controller.release(&owner_id).await;
        });
    }
}

impl AdmissionController {
    /// Administrative helper used by the `quota-admin` CLI binary.
    pub fn quota_store(&self) -> Arc<dyn QuotaStore> {
        self.inner.quota_store.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryQuotaStore;
    use chrono::Utc;

    fn owner(name: &str) -> OwnerId {
        OwnerId(name.to_string())
    }

    #[tokio::test]
    async fn acquire_reserves_both_a_machine_and_a_user_slot() {
        let store = Arc::new(InMemoryQuotaStore::new());
        let owner_id = owner("alice");
        store.seed(crate::model::Quota::fresh(owner_id.clone(), Utc::now())).await;

        let controller = AdmissionController::new(store.clone(), 5, 2, 60_000);
        let ticket = controller.acquire(owner_id.clone()).await.unwrap();

        assert_eq!(controller.current_instance_count().await, 1);
        let quota = store.get(&owner_id).await.unwrap().unwrap();
        assert_eq!(quota.concurrent_count, 1);

        ticket.release().await;
        assert_eq!(controller.current_instance_count().await, 0);
        let quota = store.get(&owner_id).await.unwrap().unwrap();
        assert_eq!(quota.concurrent_count, 0);
    }

    #[tokio::test]
    async fn release_is_idempotent() {
        let store = Arc::new(InMemoryQuotaStore::new());
        let owner_id = owner("bob");
        store.seed(crate::model::Quota::fresh(owner_id.clone(), Utc::now())).await;

        let controller = AdmissionController::new(store.clone(), 5, 2, 60_000);
        let ticket = controller.acquire(owner_id.clone()).await.unwrap();

        ticket.release().await;
        ticket.release().await;

        let quota = store.get(&owner_id).await.unwrap().unwrap();
        assert_eq!(quota.concurrent_count, 0, "double release must not double-decrement");
    }

    #[tokio::test]
    async fn rejects_at_machine_capacity_without_touching_user_quota() {
        let store = Arc::new(InMemoryQuotaStore::new());
        let owner_id = owner("carol");
        store.seed(crate::model::Quota::fresh(owner_id.clone(), Utc::now())).await;

        let controller = AdmissionController::new(store.clone(), 0, 2, 60_000);
        let err = controller.acquire(owner_id.clone()).await.unwrap_err();

        assert!(matches!(err, EngineError::MachineAtCapacity(0)));
        let quota = store.get(&owner_id).await.unwrap().unwrap();
        assert_eq!(quota.concurrent_count, 0);
    }

    #[tokio::test]
    async fn rejects_at_user_concurrency_ceiling_and_rolls_back_machine_slot() {
        let store = Arc::new(InMemoryQuotaStore::new());
        let owner_id = owner("dave");
        let mut quota = crate::model::Quota::fresh(owner_id.clone(), Utc::now());
        quota.concurrent_count = 2;
        store.seed(quota).await;

        let controller = AdmissionController::new(store.clone(), 5, 2, 60_000);
        let err = controller.acquire(owner_id.clone()).await.unwrap_err();

        assert!(matches!(err, EngineError::UserConcurrencyExceeded(2)));
        assert_eq!(controller.current_instance_count().await, 0);
    }

    #[tokio::test]
    async fn dropping_an_unreleased_ticket_reclaims_the_slots() {
        let store = Arc::new(InMemoryQuotaStore::new());
        let owner_id = owner("erin");
        store.seed(crate::model::Quota::fresh(owner_id.clone(), Utc::now())).await;

        let controller = AdmissionController::new(store.clone(), 5, 2, 60_000);
        {
            let _ticket = controller.acquire(owner_id.clone()).await.unwrap();
            // Deliberately dropped without calling release().
        }

        // The Drop-triggered reclaim task runs on a spawned task; yield so
        // it has a chance to run before asserting.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        assert_eq!(controller.current_instance_count().await, 0);
        let quota = store.get(&owner_id).await.unwrap().unwrap();
        assert_eq!(quota.concurrent_count, 0);
    }
}
