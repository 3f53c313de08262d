//! Inventory reconciliation engine.
//!
//! A run recomputes an item's balances from the per-location ledger and its
//! active reservations, records any variance against what the item row says,
//! and corrects the row. Tenant-wide runs go item by item in batches, either
//! inline or as a background job.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use etchforge_core::{DomainError, ProductId, TenantId, UserId};
use etchforge_events::{EventBus, EventEnvelope};
use etchforge_inventory::{
    ActiveReservationTotals, CorrectBalances, InventoryCommand, InventoryItemId,
    InventoryReconciliation, ReconciliationDecision, ReconciliationId, ReconciliationOutcome,
    ReconciliationRun, ReconciliationSource, ReconciliationStatus, StockVariance, decide,
};

use super::ledger::{load_item, refresh_alerts};
use super::{entity_type, execute};
use crate::config::ReconciliationSettings;
use crate::error::{ServiceError, ServiceResult};
use crate::jobs::{Job, JobExecutor, JobId, JobKind, JobResult, JobStore, JobStoreError};
use crate::store::{InMemoryStore, Transaction};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconciliationMode {
    /// Reconcile every item before returning.
    Sync,
    /// Enqueue a background job and return its id.
    Async,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconciliationReport {
    pub item_id: InventoryItemId,
    pub product_id: Option<ProductId>,
    pub outcome: ReconciliationOutcome,
    pub variance: StockVariance,
    /// The record opened, updated or resolved by the run.
    pub reconciliation_id: Option<ReconciliationId>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TenantReconciliationSummary {
    pub items_checked: usize,
    pub balanced: usize,
    pub opened: usize,
    pub updated: usize,
    pub resolved: usize,
    pub reports: Vec<ReconciliationReport>,
}

impl TenantReconciliationSummary {
    fn push(&mut self, report: ReconciliationReport) {
        self.items_checked += 1;
        match report.outcome {
            ReconciliationOutcome::Balanced => self.balanced += 1,
            ReconciliationOutcome::Opened => self.opened += 1,
            ReconciliationOutcome::Updated => self.updated += 1,
            ReconciliationOutcome::Resolved => self.resolved += 1,
        }
        self.reports.push(report);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TenantReconciliation {
    Completed(TenantReconciliationSummary),
    Queued { job_id: JobId },
}

/// Payload of a queued tenant run.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct TenantRunPayload {
    actor: UserId,
    source: ReconciliationSource,
}

/// Reconcile one item inside an open transaction.
fn reconcile_item(
    tx: &mut Transaction<'_>,
    item_id: InventoryItemId,
    source: ReconciliationSource,
    actor: UserId,
    now: DateTime<Utc>,
) -> ServiceResult<ReconciliationReport> {
    let mut item = load_item(tx, item_id)?;
    let totals =
        ActiveReservationTotals::from_reservations(tx.reservations.iter().filter(|r| r.item_id() == item_id))?;
    let computed = item.compute_true_stock(&totals)?;

    let run = ReconciliationRun {
        tenant_id: tx.tenant_id(),
        item_id,
        recorded: item.recorded_balances(),
        computed: computed.item,
        locations: item.location_drift(&computed),
        unallocated_reserved_variance: computed.unallocated_reserved.delta(item.unallocated_reserved()),
        average_cost: item.average_cost(),
        source,
        actor,
        now,
    };
    let open = tx
        .reconciliations
        .iter()
        .find(|r| r.item_id == item_id && r.is_open())
        .cloned();
    let decision = decide(&run, open.as_ref())?;

    match &decision {
        ReconciliationDecision::Balanced => {}
        ReconciliationDecision::Open(record) => {
            tx.reconciliations.insert(record.clone())?;
        }
        ReconciliationDecision::Update(record) | ReconciliationDecision::Resolve(record) => {
            tx.reconciliations.update(record.clone())?;
        }
    }
    if let (Some(record), Some(event)) = (decision.record(), decision.event(actor, now)) {
        tx.record(entity_type::INVENTORY_RECONCILIATION, *record.id.as_uuid(), &event)?;
    }

    let command = InventoryCommand::CorrectBalances(CorrectBalances {
        tenant_id: tx.tenant_id(),
        item_id,
        reservations: totals,
        actor,
        occurred_at: now,
    });
    let corrected = execute(tx, |t| &mut t.items, entity_type::INVENTORY_ITEM, &mut item, &command)?;
    if !corrected.is_empty() {
        refresh_alerts(tx, &item, actor, now)?;
    }

    Ok(ReconciliationReport {
        item_id,
        product_id: item.product_id(),
        outcome: decision.outcome(),
        variance: run.variance(),
        reconciliation_id: decision.record().map(|r| r.id),
    })
}

pub struct ReconciliationEngine<B, J> {
    store: Arc<InMemoryStore<B>>,
    jobs: J,
    settings: ReconciliationSettings,
}

impl<B, J> ReconciliationEngine<B, J>
where
    B: EventBus<EventEnvelope>,
    J: JobStore,
{
    pub fn new(store: Arc<InMemoryStore<B>>, jobs: J, settings: ReconciliationSettings) -> Self {
        Self { store, jobs, settings }
    }

    /// Reconcile a single item and correct its recorded balances.
    #[instrument(skip(self))]
    pub fn run_for_item(
        &self,
        tenant_id: TenantId,
        actor: UserId,
        item_id: InventoryItemId,
        source: ReconciliationSource,
    ) -> ServiceResult<ReconciliationReport> {
        let report = self
            .store
            .transaction(tenant_id, |tx| reconcile_item(tx, item_id, source, actor, Utc::now()))?;

        if report.outcome != ReconciliationOutcome::Balanced {
            info!(
                %tenant_id,
                %item_id,
                outcome = report.outcome.as_str(),
                variance_on_hand = %report.variance.on_hand,
                "item reconciled"
            );
        }
        Ok(report)
    }

    /// Reconcile every item of the tenant, or queue a job that does.
    #[instrument(skip(self))]
    pub fn run_for_tenant(
        &self,
        tenant_id: TenantId,
        actor: UserId,
        source: ReconciliationSource,
        mode: ReconciliationMode,
    ) -> ServiceResult<TenantReconciliation> {
        match mode {
            ReconciliationMode::Sync => Ok(TenantReconciliation::Completed(self.reconcile_tenant(
                tenant_id, actor, source,
            )?)),
            ReconciliationMode::Async => {
                let payload = serde_json::to_value(TenantRunPayload { actor, source })
                    .map_err(|e| ServiceError::Job(e.to_string()))?;
                let job = Job::new(tenant_id, JobKind::TenantReconciliation, payload)
                    .with_retry_policy(self.settings.retry_policy());
                let job_id = self.jobs.enqueue(job)?;
                info!(%tenant_id, %job_id, "tenant reconciliation queued");
                Ok(TenantReconciliation::Queued { job_id })
            }
        }
    }

    /// Items in creation order, one transaction per batch.
    fn reconcile_tenant(
        &self,
        tenant_id: TenantId,
        actor: UserId,
        source: ReconciliationSource,
    ) -> ServiceResult<TenantReconciliationSummary> {
        let item_ids: Vec<InventoryItemId> =
            self.store.read(tenant_id, |t| t.items.iter().map(|i| i.id_typed()).collect())?;

        let mut summary = TenantReconciliationSummary::default();
        for batch in item_ids.chunks(self.settings.batch_size.max(1)) {
            let reports = self.store.transaction(tenant_id, |tx| {
                let now = Utc::now();
                batch
                    .iter()
                    .map(|item_id| reconcile_item(tx, *item_id, source, actor, now))
                    .collect::<ServiceResult<Vec<_>>>()
            })?;
            reports.into_iter().for_each(|report| summary.push(report));
        }

        info!(
            %tenant_id,
            items = summary.items_checked,
            opened = summary.opened,
            updated = summary.updated,
            resolved = summary.resolved,
            "tenant reconciliation finished"
        );
        Ok(summary)
    }

    pub fn list_reconciliations(
        &self,
        tenant_id: TenantId,
        status: Option<ReconciliationStatus>,
    ) -> ServiceResult<Vec<InventoryReconciliation>> {
        self.store.read(tenant_id, |t| {
            t.reconciliations
                .iter()
                .filter(|r| status.is_none_or(|s| r.status == s))
                .cloned()
                .collect()
        })
    }

    /// A queued run's job record.
    pub fn job_status(&self, tenant_id: TenantId, job_id: JobId) -> ServiceResult<Job> {
        self.jobs.get(tenant_id, job_id).map_err(|e| match e {
            JobStoreError::NotFound(_) => DomainError::not_found().into(),
            other => other.into(),
        })
    }
}

impl<B, J> ReconciliationEngine<B, J>
where
    B: EventBus<EventEnvelope> + 'static,
    J: JobStore + 'static,
{
    /// Route queued tenant runs on `executor` to this engine.
    pub fn register_jobs<S: JobStore + 'static>(self: &Arc<Self>, executor: &mut JobExecutor<S>) {
        let engine = Arc::clone(self);
        executor.register_handler(JobKind::TENANT_RECONCILIATION, move |job: &Job| {
            let payload: TenantRunPayload = match serde_json::from_value(job.payload.clone()) {
                Ok(payload) => payload,
                Err(e) => return JobResult::Fatal(format!("invalid reconciliation payload: {e}")),
            };

            match engine.reconcile_tenant(job.tenant_id, payload.actor, payload.source) {
                Ok(_) => JobResult::Success,
                Err(e) if e.is_retryable() => {
                    warn!(job_id = %job.id, tenant_id = %job.tenant_id, error = %e, "reconciliation job will retry");
                    JobResult::Failure(e.to_string())
                }
                Err(e) => JobResult::Fatal(e.to_string()),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::{Duration, Instant};

    use etchforge_core::{Currency, Money, Quantity};
    use etchforge_events::InMemoryEventBus;
    use rust_decimal_macros::dec;

    use crate::jobs::{InMemoryJobStore, JobStatus};
    use crate::services::ledger::{InventoryLedger, SetStockRequest};

    type Bus = Arc<InMemoryEventBus<EventEnvelope>>;
    type Engine = ReconciliationEngine<Bus, Arc<InMemoryJobStore>>;

    struct Fixture {
        ledger: InventoryLedger<Bus>,
        engine: Arc<Engine>,
        jobs: Arc<InMemoryJobStore>,
        store: Arc<InMemoryStore<Bus>>,
        tenant_id: TenantId,
        actor: UserId,
    }

    impl Fixture {
        fn new(batch_size: usize) -> Self {
            let store = Arc::new(InMemoryStore::new(Arc::new(InMemoryEventBus::new())));
            let jobs = InMemoryJobStore::arc();
            let settings = ReconciliationSettings {
                batch_size,
                base_delay_ms: 0,
                ..ReconciliationSettings::default()
            };
            Self {
                ledger: InventoryLedger::new(store.clone()),
                engine: Arc::new(ReconciliationEngine::new(store.clone(), jobs.clone(), settings)),
                jobs,
                store,
                tenant_id: TenantId::new(),
                actor: UserId::new(),
            }
        }

        /// An item with 150 on hand at one location.
        fn stocked_item(&self, sku: &str) -> InventoryItemId {
            self.costed_item(sku, None)
        }

        fn costed_item(&self, sku: &str, unit_cost: Option<Money>) -> InventoryItemId {
            let product = self
                .store
                .register_costed_product(self.tenant_id, sku, sku, Quantity::ZERO, unit_cost)
                .unwrap();
            let location = self
                .ledger
                .create_location(self.tenant_id, &format!("LOC-{sku}"), "Main")
                .unwrap();
            self.ledger
                .set_stock(
                    self.tenant_id,
                    self.actor,
                    SetStockRequest {
                        product_id: product.id,
                        location_id: location.id_typed(),
                        quantity: dec!(150),
                        reason: None,
                    },
                )
                .unwrap()
                .id_typed()
        }

        /// Make the item's location ledger say 180 while the row still says 150.
        fn drift(&self, item_id: InventoryItemId) {
            let item = self
                .store
                .read(self.tenant_id, |t| t.items.get(&item_id).cloned())
                .unwrap()
                .unwrap();
            let mut snapshot = item.snapshot();
            snapshot.locations[0].stock_on_hand = Quantity::from_units(180);
            snapshot.locations[0].stock_available = Quantity::from_units(180);
            self.ledger.import_item(self.tenant_id, snapshot).unwrap();
        }
    }

    #[test]
    fn variance_opens_record_and_corrects_item() {
        let f = Fixture::new(50);
        let item_id = f.stocked_item("MUG-1");
        f.drift(item_id);

        let report = f
            .engine
            .run_for_item(f.tenant_id, f.actor, item_id, ReconciliationSource::Manual)
            .unwrap();
        assert_eq!(report.outcome, ReconciliationOutcome::Opened);
        assert_eq!(report.variance.on_hand, dec!(30));

        let open = f
            .engine
            .list_reconciliations(f.tenant_id, Some(ReconciliationStatus::Open))
            .unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].metadata.variance.available, dec!(30));

        let item = f.store.read(f.tenant_id, |t| t.items.get(&item_id).cloned()).unwrap().unwrap();
        assert_eq!(item.current_stock(), Quantity::from_units(180));
        assert_eq!(item.available_stock(), Quantity::from_units(180));
    }

    #[test]
    fn consecutive_runs_resolve_then_stay_balanced() {
        let f = Fixture::new(50);
        let item_id = f.stocked_item("MUG-1");
        f.drift(item_id);

        let run = || {
            f.engine
                .run_for_item(f.tenant_id, f.actor, item_id, ReconciliationSource::Scheduled)
                .unwrap()
                .outcome
        };
        assert_eq!(run(), ReconciliationOutcome::Opened);
        assert_eq!(run(), ReconciliationOutcome::Resolved);
        assert_eq!(run(), ReconciliationOutcome::Balanced);

        let records = f.engine.list_reconciliations(f.tenant_id, None).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, ReconciliationStatus::Resolved);
        assert!(records[0].metadata.resolution.is_some());
    }

    #[test]
    fn location_row_drift_is_recorded_even_when_totals_match() {
        let f = Fixture::new(50);
        let item_id = f.stocked_item("MUG-1");
        let item = f.store.read(f.tenant_id, |t| t.items.get(&item_id).cloned()).unwrap().unwrap();
        let mut snapshot = item.snapshot();
        snapshot.locations[0].stock_reserved = Quantity::from_units(5);
        snapshot.locations[0].stock_available = Quantity::from_units(145);
        f.ledger.import_item(f.tenant_id, snapshot).unwrap();

        let report = f
            .engine
            .run_for_item(f.tenant_id, f.actor, item_id, ReconciliationSource::Manual)
            .unwrap();
        assert!(report.variance.is_zero());
        assert_eq!(report.outcome, ReconciliationOutcome::Opened);

        let open = f
            .engine
            .list_reconciliations(f.tenant_id, Some(ReconciliationStatus::Open))
            .unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].metadata.locations.len(), 1);
        assert_eq!(open[0].metadata.locations[0].variance.reserved, dec!(-5));

        let item = f.store.read(f.tenant_id, |t| t.items.get(&item_id).cloned()).unwrap().unwrap();
        assert_eq!(item.snapshot().locations[0].stock_reserved, Quantity::ZERO);

        let again = f
            .engine
            .run_for_item(f.tenant_id, f.actor, item_id, ReconciliationSource::Manual)
            .unwrap();
        assert_eq!(again.outcome, ReconciliationOutcome::Resolved);
    }

    #[test]
    fn variance_is_valued_at_the_product_unit_cost() {
        let f = Fixture::new(50);
        let item_id = f.costed_item("MUG-1", Some(Money::new(1_250, Currency::USD)));
        f.drift(item_id);

        f.engine
            .run_for_item(f.tenant_id, f.actor, item_id, ReconciliationSource::Manual)
            .unwrap();
        let records = f.engine.list_reconciliations(f.tenant_id, None).unwrap();
        assert_eq!(records[0].variance_quantity, dec!(30));
        assert_eq!(records[0].variance_value, Some(Money::new(37_500, Currency::USD)));
    }

    #[test]
    fn unknown_item_is_not_found() {
        let f = Fixture::new(50);
        let err = f
            .engine
            .run_for_item(f.tenant_id, f.actor, InventoryItemId::new(), ReconciliationSource::Api)
            .unwrap_err();
        assert_eq!(err, ServiceError::Domain(DomainError::NotFound));
    }

    #[test]
    fn sync_tenant_run_covers_every_item_across_batches() {
        let f = Fixture::new(2);
        let items: Vec<_> = ["A", "B", "C"].iter().map(|sku| f.stocked_item(sku)).collect();
        f.drift(items[1]);

        let result = f
            .engine
            .run_for_tenant(f.tenant_id, f.actor, ReconciliationSource::Manual, ReconciliationMode::Sync)
            .unwrap();
        let TenantReconciliation::Completed(summary) = result else {
            panic!("expected a completed run");
        };
        assert_eq!(summary.items_checked, 3);
        assert_eq!(summary.opened, 1);
        assert_eq!(summary.balanced, 2);
        let order: Vec<_> = summary.reports.iter().map(|r| r.item_id).collect();
        assert_eq!(order, items);
    }

    #[test]
    fn async_tenant_run_completes_on_the_executor() {
        let f = Fixture::new(50);
        let item_id = f.stocked_item("MUG-1");
        f.drift(item_id);

        let mut executor = JobExecutor::new(f.jobs.clone());
        f.engine.register_jobs(&mut executor);
        let settings = ReconciliationSettings {
            poll_interval_ms: 5,
            ..ReconciliationSettings::default()
        };
        let handle = executor.spawn(settings.executor_config()).unwrap();

        let TenantReconciliation::Queued { job_id } = f
            .engine
            .run_for_tenant(f.tenant_id, f.actor, ReconciliationSource::Api, ReconciliationMode::Async)
            .unwrap()
        else {
            panic!("expected a queued run");
        };

        let deadline = Instant::now() + Duration::from_secs(5);
        while f.engine.job_status(f.tenant_id, job_id).unwrap().status != JobStatus::Completed
            && Instant::now() < deadline
        {
            thread::sleep(Duration::from_millis(5));
        }
        handle.shutdown();

        assert_eq!(f.engine.job_status(f.tenant_id, job_id).unwrap().status, JobStatus::Completed);
        assert_eq!(
            f.engine
                .list_reconciliations(f.tenant_id, Some(ReconciliationStatus::Open))
                .unwrap()
                .len(),
            1
        );
    }

    #[test]
    fn malformed_job_payload_is_dead_lettered() {
        let f = Fixture::new(50);
        let mut executor = JobExecutor::new(f.jobs.clone());
        f.engine.register_jobs(&mut executor);

        f.jobs
            .enqueue(Job::new(f.tenant_id, JobKind::TenantReconciliation, serde_json::json!({"actor": 7})))
            .unwrap();
        let mut job = f.jobs.claim_next(Some(f.tenant_id), Utc::now()).unwrap().unwrap();
        assert!(executor.execute_claimed(&mut job).is_err());
        assert!(matches!(job.status, JobStatus::DeadLettered { attempts: 1, .. }));
    }

    #[test]
    fn unknown_job_is_not_found() {
        let f = Fixture::new(50);
        assert_eq!(
            f.engine.job_status(f.tenant_id, JobId::new()).unwrap_err(),
            ServiceError::Domain(DomainError::NotFound)
        );
    }
}
