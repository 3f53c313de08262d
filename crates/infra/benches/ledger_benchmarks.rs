use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use etchforge_core::{Currency, CustomerId, Money, ProductId, Quantity, TenantId, UserId};
use etchforge_events::{EventEnvelope, InMemoryEventBus};
use etchforge_infra::config::{NegotiationSettings, ReconciliationSettings};
use etchforge_infra::jobs::InMemoryJobStore;
use etchforge_infra::services::{
    InventoryLedger, NegotiationService, NewOrder, NewQuote, OrderStageCoordinator,
    ReconciliationEngine, ReconciliationMode, ReserveRequest, SetStockRequest, TransferRequest,
};
use etchforge_infra::InMemoryStore;
use etchforge_inventory::{LocationId, ReconciliationSource};
use etchforge_orders::OrderStatus;
use rust_decimal::Decimal;
use std::sync::Arc;

type Bus = Arc<InMemoryEventBus<EventEnvelope>>;

fn new_store() -> Arc<InMemoryStore<Bus>> {
    Arc::new(InMemoryStore::new(Arc::new(InMemoryEventBus::new())))
}

struct StockedTenant {
    ledger: InventoryLedger<Bus>,
    tenant_id: TenantId,
    actor: UserId,
    products: Vec<ProductId>,
    a: LocationId,
    b: LocationId,
}

fn stocked_tenant(store: &Arc<InMemoryStore<Bus>>, items: usize) -> StockedTenant {
    let tenant_id = TenantId::new();
    let actor = UserId::new();
    let ledger = InventoryLedger::new(store.clone());
    let a = ledger.create_location(tenant_id, "A", "Main").unwrap().id_typed();
    let b = ledger.create_location(tenant_id, "B", "Overflow").unwrap().id_typed();

    let products = (0..items)
        .map(|i| {
            let product = store
                .register_product(tenant_id, &format!("SKU-{i}"), "Bench item", Quantity::ZERO)
                .unwrap();
            ledger
                .set_stock(
                    tenant_id,
                    actor,
                    SetStockRequest {
                        product_id: product.id,
                        location_id: a,
                        quantity: Decimal::from(1_000_000),
                        reason: None,
                    },
                )
                .unwrap();
            product.id
        })
        .collect();

    StockedTenant {
        ledger,
        tenant_id,
        actor,
        products,
        a,
        b,
    }
}

fn bench_ledger_operation_latency(c: &mut Criterion) {
    let mut group = c.benchmark_group("ledger_operation_latency");
    let store = new_store();
    let t = stocked_tenant(&store, 1);
    let product_id = t.products[0];

    group.bench_function("transfer_round_trip", |b| {
        b.iter(|| {
            for (from, to) in [(t.a, t.b), (t.b, t.a)] {
                t.ledger
                    .transfer(
                        t.tenant_id,
                        t.actor,
                        TransferRequest {
                            product_id,
                            from_location_id: from,
                            to_location_id: to,
                            quantity: Decimal::ONE,
                            reason: None,
                        },
                    )
                    .unwrap();
            }
        });
    });

    group.bench_function("reserve_and_release", |b| {
        b.iter(|| {
            let reservation = t
                .ledger
                .reserve(
                    t.tenant_id,
                    t.actor,
                    ReserveRequest {
                        product_id,
                        quantity: Decimal::ONE,
                        location_id: Some(t.a),
                        reference: None,
                        expires_at: None,
                    },
                )
                .unwrap();
            black_box(
                t.ledger
                    .release(t.tenant_id, t.actor, reservation.id_typed(), None)
                    .unwrap(),
            );
        });
    });

    group.finish();
}

fn bench_quote_acceptance(c: &mut Criterion) {
    let mut group = c.benchmark_group("quote_acceptance");

    for siblings in [1usize, 10, 50].iter() {
        group.throughput(Throughput::Elements(*siblings as u64));
        group.bench_with_input(BenchmarkId::new("accept_with_siblings", siblings), siblings, |b, &siblings| {
            let store = new_store();
            let orders = OrderStageCoordinator::new(store.clone());
            let quotes = NegotiationService::new(store.clone(), NegotiationSettings::default());
            let tenant_id = TenantId::new();
            let actor = UserId::new();
            let vendors: Vec<_> = (0..siblings)
                .map(|i| store.register_vendor(tenant_id, &format!("V-{i}"), "Vendor").unwrap().id)
                .collect();

            b.iter(|| {
                let order = orders
                    .place_order(
                        tenant_id,
                        actor,
                        NewOrder {
                            customer_id: CustomerId::new(),
                            order_number: "ORD-BENCH".to_string(),
                            currency: Currency::USD,
                            status: OrderStatus::VendorNegotiation,
                        },
                    )
                    .unwrap();
                let ids: Vec<_> = vendors
                    .iter()
                    .map(|vendor_id| {
                        quotes
                            .create(
                                tenant_id,
                                actor,
                                NewQuote::new(order.id_typed(), *vendor_id, Money::new(10_000, Currency::USD)),
                            )
                            .unwrap()
                            .id_typed()
                    })
                    .collect();
                black_box(quotes.accept(tenant_id, ids[0], actor).unwrap());
            });
        });
    }

    group.finish();
}

fn bench_tenant_reconciliation(c: &mut Criterion) {
    let mut group = c.benchmark_group("tenant_reconciliation");

    for items in [10usize, 100, 500].iter() {
        group.throughput(Throughput::Elements(*items as u64));
        group.bench_with_input(BenchmarkId::new("sync_run", items), items, |b, &items| {
            let store = new_store();
            let t = stocked_tenant(&store, items);
            let engine = ReconciliationEngine::new(
                store.clone(),
                InMemoryJobStore::arc(),
                ReconciliationSettings::default(),
            );

            b.iter(|| {
                black_box(
                    engine
                        .run_for_tenant(t.tenant_id, t.actor, ReconciliationSource::Scheduled, ReconciliationMode::Sync)
                        .unwrap(),
                )
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_ledger_operation_latency,
    bench_quote_acceptance,
    bench_tenant_reconciliation
);
criterion_main!(benches);
