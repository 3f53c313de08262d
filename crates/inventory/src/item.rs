use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use etchforge_core::{
    Aggregate, AggregateRoot, DomainError, Entity, Money, ProductId, Quantity, TenantId, UserId,
};
use etchforge_events::Event;

use crate::balance::{LocationVariance, StockBalances};
use crate::ids::{InventoryItemId, LocationId, ReservationId};
use crate::reservation::{InventoryReservation, ReservationStatus};

/// Stock of one item at one location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationStock {
    pub location_id: LocationId,
    pub stock_on_hand: Quantity,
    pub stock_reserved: Quantity,
    pub stock_available: Quantity,
}

impl LocationStock {
    pub fn empty(location_id: LocationId) -> Self {
        Self {
            location_id,
            stock_on_hand: Quantity::ZERO,
            stock_reserved: Quantity::ZERO,
            stock_available: Quantity::ZERO,
        }
    }

    pub fn balances(&self) -> StockBalances {
        StockBalances {
            on_hand: self.stock_on_hand,
            reserved: self.stock_reserved,
            available: self.stock_available,
        }
    }

    fn refresh_available(&mut self) {
        self.stock_available = self.stock_on_hand.saturating_sub(self.stock_reserved);
    }
}

/// Quantity drawn from one location when a location-less reservation is consumed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationDraw {
    pub location_id: LocationId,
    pub quantity: Quantity,
}

/// Sums of the item's active reservations, split by location.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveReservationTotals {
    pub by_location: BTreeMap<LocationId, Quantity>,
    pub unallocated: Quantity,
}

impl ActiveReservationTotals {
    /// Totals over the `active` reservations among `reservations`.
    pub fn from_reservations<'a>(
        reservations: impl IntoIterator<Item = &'a InventoryReservation>,
    ) -> Result<Self, DomainError> {
        let mut totals = Self::default();
        for reservation in reservations {
            if reservation.status() != ReservationStatus::Active {
                continue;
            }
            match reservation.location_id() {
                Some(location_id) => {
                    let slot = totals.by_location.entry(location_id).or_default();
                    *slot = slot.checked_add(reservation.quantity())?;
                }
                None => {
                    totals.unallocated = totals.unallocated.checked_add(reservation.quantity())?;
                }
            }
        }
        Ok(totals)
    }

    pub fn total(&self) -> Result<Quantity, DomainError> {
        Quantity::checked_sum(self.by_location.values().copied())?.checked_add(self.unallocated)
    }
}

/// Balances recomputed from the per-location ledger and active reservations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComputedStock {
    pub item: StockBalances,
    pub locations: Vec<LocationStock>,
    pub unallocated_reserved: Quantity,
}

/// Plain, fully public copy of an item's persisted state.
///
/// Used to import balances recorded by another system and to inspect raw rows;
/// nothing validates it, so reconciliation is what brings it back in line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryItemSnapshot {
    pub id: InventoryItemId,
    pub tenant_id: Option<TenantId>,
    pub product_id: Option<ProductId>,
    pub item_code: String,
    pub name: String,
    pub low_stock_threshold: Quantity,
    #[serde(default)]
    pub average_cost: Option<Money>,
    pub locations: Vec<LocationStock>,
    pub unallocated_reserved: Quantity,
    pub current_stock: Quantity,
    pub reserved_stock: Quantity,
    pub available_stock: Quantity,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub version: u64,
}

/// Aggregate root: InventoryItem (one per tenant + product), owning its
/// per-location stock rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InventoryItem {
    id: InventoryItemId,
    tenant_id: Option<TenantId>,
    product_id: Option<ProductId>,
    item_code: String,
    name: String,
    low_stock_threshold: Quantity,
    /// Unit cost used to value reconciliation variances.
    average_cost: Option<Money>,
    locations: BTreeMap<LocationId, LocationStock>,
    /// Reserved quantity not bound to any location.
    unallocated_reserved: Quantity,
    current_stock: Quantity,
    reserved_stock: Quantity,
    available_stock: Quantity,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
    version: u64,
    created: bool,
}

impl InventoryItem {
    /// Create an empty, not-yet-created aggregate instance.
    pub fn empty(id: InventoryItemId) -> Self {
        Self {
            id,
            tenant_id: None,
            product_id: None,
            item_code: String::new(),
            name: String::new(),
            low_stock_threshold: Quantity::ZERO,
            average_cost: None,
            locations: BTreeMap::new(),
            unallocated_reserved: Quantity::ZERO,
            current_stock: Quantity::ZERO,
            reserved_stock: Quantity::ZERO,
            available_stock: Quantity::ZERO,
            created_at: None,
            updated_at: None,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> InventoryItemId {
        self.id
    }

    pub fn product_id(&self) -> Option<ProductId> {
        self.product_id
    }

    pub fn item_code(&self) -> &str {
        &self.item_code
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn low_stock_threshold(&self) -> Quantity {
        self.low_stock_threshold
    }

    pub fn average_cost(&self) -> Option<Money> {
        self.average_cost
    }

    pub fn current_stock(&self) -> Quantity {
        self.current_stock
    }

    pub fn reserved_stock(&self) -> Quantity {
        self.reserved_stock
    }

    pub fn available_stock(&self) -> Quantity {
        self.available_stock
    }

    pub fn unallocated_reserved(&self) -> Quantity {
        self.unallocated_reserved
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    pub fn location(&self, location_id: &LocationId) -> Option<&LocationStock> {
        self.locations.get(location_id)
    }

    pub fn locations(&self) -> impl Iterator<Item = &LocationStock> {
        self.locations.values()
    }

    /// Item-level balances as recorded on the item row.
    pub fn recorded_balances(&self) -> StockBalances {
        StockBalances {
            on_hand: self.current_stock,
            reserved: self.reserved_stock,
            available: self.available_stock,
        }
    }

    /// Item-level balances summed from the location rows.
    pub fn rollup(&self) -> Result<StockBalances, DomainError> {
        let on_hand = Quantity::checked_sum(self.locations.values().map(|l| l.stock_on_hand))?;
        let located = Quantity::checked_sum(self.locations.values().map(|l| l.stock_reserved))?;
        Ok(StockBalances::derive(on_hand, located.checked_add(self.unallocated_reserved)?))
    }

    /// Recompute true balances: on-hand from the location rows, reserved from
    /// the active reservations.
    pub fn compute_true_stock(
        &self,
        totals: &ActiveReservationTotals,
    ) -> Result<ComputedStock, DomainError> {
        let mut locations = self.locations.clone();
        for location_id in totals.by_location.keys() {
            locations
                .entry(*location_id)
                .or_insert_with(|| LocationStock::empty(*location_id));
        }
        for stock in locations.values_mut() {
            stock.stock_reserved = totals
                .by_location
                .get(&stock.location_id)
                .copied()
                .unwrap_or(Quantity::ZERO);
            stock.refresh_available();
        }

        let on_hand = Quantity::checked_sum(locations.values().map(|l| l.stock_on_hand))?;
        Ok(ComputedStock {
            item: StockBalances::derive(on_hand, totals.total()?),
            locations: locations.into_values().collect(),
            unallocated_reserved: totals.unallocated,
        })
    }

    /// Location rows whose recorded balances differ from `computed`.
    pub fn location_drift(&self, computed: &ComputedStock) -> Vec<LocationVariance> {
        computed
            .locations
            .iter()
            .filter_map(|truth| {
                let recorded = self
                    .locations
                    .get(&truth.location_id)
                    .map(LocationStock::balances)
                    .unwrap_or_default();
                let computed = truth.balances();
                (recorded != computed).then(|| LocationVariance {
                    location_id: truth.location_id,
                    recorded,
                    computed,
                    variance: computed.variance_from(&recorded),
                })
            })
            .collect()
    }

    pub fn snapshot(&self) -> InventoryItemSnapshot {
        InventoryItemSnapshot {
            id: self.id,
            tenant_id: self.tenant_id,
            product_id: self.product_id,
            item_code: self.item_code.clone(),
            name: self.name.clone(),
            low_stock_threshold: self.low_stock_threshold,
            average_cost: self.average_cost,
            locations: self.locations.values().cloned().collect(),
            unallocated_reserved: self.unallocated_reserved,
            current_stock: self.current_stock,
            reserved_stock: self.reserved_stock,
            available_stock: self.available_stock,
            created_at: self.created_at,
            updated_at: self.updated_at,
            version: self.version,
        }
    }

    pub fn restore(snapshot: InventoryItemSnapshot) -> Self {
        Self {
            id: snapshot.id,
            tenant_id: snapshot.tenant_id,
            product_id: snapshot.product_id,
            item_code: snapshot.item_code,
            name: snapshot.name,
            low_stock_threshold: snapshot.low_stock_threshold,
            average_cost: snapshot.average_cost,
            locations: snapshot
                .locations
                .into_iter()
                .map(|l| (l.location_id, l))
                .collect(),
            unallocated_reserved: snapshot.unallocated_reserved,
            current_stock: snapshot.current_stock,
            reserved_stock: snapshot.reserved_stock,
            available_stock: snapshot.available_stock,
            created_at: snapshot.created_at,
            updated_at: snapshot.updated_at,
            version: snapshot.version,
            created: snapshot.tenant_id.is_some(),
        }
    }
}

impl AggregateRoot for InventoryItem {
    type Id = InventoryItemId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

impl Entity for InventoryItem {
    type Id = InventoryItemId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }
}

/// Command: CreateItem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateItem {
    pub tenant_id: TenantId,
    pub item_id: InventoryItemId,
    pub product_id: ProductId,
    pub item_code: String,
    pub name: String,
    pub low_stock_threshold: Quantity,
    pub average_cost: Option<Money>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: SetStock (absolute on-hand at one location).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetStock {
    pub tenant_id: TenantId,
    pub item_id: InventoryItemId,
    pub location_id: LocationId,
    pub quantity: Decimal,
    pub reason: Option<String>,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AdjustStock (relative change at one location).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjustStock {
    pub tenant_id: TenantId,
    pub item_id: InventoryItemId,
    pub location_id: LocationId,
    pub delta: Decimal,
    pub reason: Option<String>,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: TransferStock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferStock {
    pub tenant_id: TenantId,
    pub item_id: InventoryItemId,
    pub from_location_id: LocationId,
    pub to_location_id: LocationId,
    pub quantity: Decimal,
    pub reason: Option<String>,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ReserveStock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReserveStock {
    pub tenant_id: TenantId,
    pub item_id: InventoryItemId,
    pub reservation_id: ReservationId,
    pub location_id: Option<LocationId>,
    pub quantity: Decimal,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ReleaseReservedStock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseReservedStock {
    pub tenant_id: TenantId,
    pub item_id: InventoryItemId,
    pub reservation_id: ReservationId,
    pub location_id: Option<LocationId>,
    pub quantity: Quantity,
    pub reason: Option<String>,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ConsumeReservedStock (reserved goods leave the warehouse).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumeReservedStock {
    pub tenant_id: TenantId,
    pub item_id: InventoryItemId,
    pub reservation_id: ReservationId,
    pub location_id: Option<LocationId>,
    pub quantity: Quantity,
    pub reason: Option<String>,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CorrectBalances (reconciliation).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrectBalances {
    pub tenant_id: TenantId,
    pub item_id: InventoryItemId,
    pub reservations: ActiveReservationTotals,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InventoryCommand {
    CreateItem(CreateItem),
    SetStock(SetStock),
    AdjustStock(AdjustStock),
    TransferStock(TransferStock),
    ReserveStock(ReserveStock),
    ReleaseReservedStock(ReleaseReservedStock),
    ConsumeReservedStock(ConsumeReservedStock),
    CorrectBalances(CorrectBalances),
}

/// Event: ItemCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemCreated {
    pub tenant_id: TenantId,
    pub item_id: InventoryItemId,
    pub product_id: ProductId,
    pub item_code: String,
    pub name: String,
    pub low_stock_threshold: Quantity,
    #[serde(default)]
    pub average_cost: Option<Money>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: StockSet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockSet {
    pub tenant_id: TenantId,
    pub item_id: InventoryItemId,
    pub location_id: LocationId,
    pub previous_on_hand: Quantity,
    pub on_hand: Quantity,
    pub reason: Option<String>,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: StockAdjusted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockAdjusted {
    pub tenant_id: TenantId,
    pub item_id: InventoryItemId,
    pub location_id: LocationId,
    pub delta: Decimal,
    pub previous_on_hand: Quantity,
    pub on_hand: Quantity,
    pub reason: Option<String>,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: StockTransferred.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockTransferred {
    pub tenant_id: TenantId,
    pub item_id: InventoryItemId,
    pub from_location_id: LocationId,
    pub to_location_id: LocationId,
    pub quantity: Quantity,
    pub reason: Option<String>,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: StockReserved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockReserved {
    pub tenant_id: TenantId,
    pub item_id: InventoryItemId,
    pub reservation_id: ReservationId,
    pub location_id: Option<LocationId>,
    pub quantity: Quantity,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ReservationReleased.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationReleased {
    pub tenant_id: TenantId,
    pub item_id: InventoryItemId,
    pub reservation_id: ReservationId,
    pub location_id: Option<LocationId>,
    pub quantity: Quantity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ReservationConsumed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationConsumed {
    pub tenant_id: TenantId,
    pub item_id: InventoryItemId,
    pub reservation_id: ReservationId,
    pub location_id: Option<LocationId>,
    pub quantity: Quantity,
    /// Where the on-hand stock was taken from.
    pub draws: Vec<LocationDraw>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: BalancesCorrected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalancesCorrected {
    pub tenant_id: TenantId,
    pub item_id: InventoryItemId,
    pub previous: StockBalances,
    pub corrected: StockBalances,
    pub locations: Vec<LocationStock>,
    pub unallocated_reserved: Quantity,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InventoryEvent {
    ItemCreated(ItemCreated),
    StockSet(StockSet),
    StockAdjusted(StockAdjusted),
    StockTransferred(StockTransferred),
    StockReserved(StockReserved),
    ReservationReleased(ReservationReleased),
    ReservationConsumed(ReservationConsumed),
    BalancesCorrected(BalancesCorrected),
}

impl Event for InventoryEvent {
    fn event_type(&self) -> &'static str {
        match self {
            InventoryEvent::ItemCreated(_) => "inventory.item.created",
            InventoryEvent::StockSet(_) => "inventory.stock.set",
            InventoryEvent::StockAdjusted(_) => "inventory.stock.adjusted",
            InventoryEvent::StockTransferred(_) => "inventory.stock.transferred",
            InventoryEvent::StockReserved(_) => "inventory.stock.reserved",
            InventoryEvent::ReservationReleased(_) => "inventory.reservation.released",
            InventoryEvent::ReservationConsumed(_) => "inventory.reservation.consumed",
            InventoryEvent::BalancesCorrected(_) => "inventory.item.balances_corrected",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            InventoryEvent::ItemCreated(e) => e.occurred_at,
            InventoryEvent::StockSet(e) => e.occurred_at,
            InventoryEvent::StockAdjusted(e) => e.occurred_at,
            InventoryEvent::StockTransferred(e) => e.occurred_at,
            InventoryEvent::StockReserved(e) => e.occurred_at,
            InventoryEvent::ReservationReleased(e) => e.occurred_at,
            InventoryEvent::ReservationConsumed(e) => e.occurred_at,
            InventoryEvent::BalancesCorrected(e) => e.occurred_at,
        }
    }
}

impl Aggregate for InventoryItem {
    type Command = InventoryCommand;
    type Event = InventoryEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            InventoryEvent::ItemCreated(e) => {
                self.id = e.item_id;
                self.tenant_id = Some(e.tenant_id);
                self.product_id = Some(e.product_id);
                self.item_code = e.item_code.clone();
                self.name = e.name.clone();
                self.low_stock_threshold = e.low_stock_threshold;
                self.average_cost = e.average_cost;
                self.created_at = Some(e.occurred_at);
                self.created = true;
            }
            InventoryEvent::StockSet(e) => {
                let stock = self.location_mut(e.location_id);
                stock.stock_on_hand = e.on_hand;
                stock.refresh_available();
            }
            InventoryEvent::StockAdjusted(e) => {
                let stock = self.location_mut(e.location_id);
                stock.stock_on_hand = e.on_hand;
                stock.refresh_available();
            }
            InventoryEvent::StockTransferred(e) => {
                let from = self.location_mut(e.from_location_id);
                from.stock_on_hand = from.stock_on_hand.saturating_sub(e.quantity);
                from.refresh_available();
                let to = self.location_mut(e.to_location_id);
                to.stock_on_hand = to.stock_on_hand.saturating_add(e.quantity);
                to.refresh_available();
            }
            InventoryEvent::StockReserved(e) => match e.location_id {
                Some(location_id) => {
                    let stock = self.location_mut(location_id);
                    stock.stock_reserved = stock.stock_reserved.saturating_add(e.quantity);
                    stock.refresh_available();
                }
                None => {
                    self.unallocated_reserved = self.unallocated_reserved.saturating_add(e.quantity);
                }
            },
            InventoryEvent::ReservationReleased(e) => match e.location_id {
                Some(location_id) => {
                    let stock = self.location_mut(location_id);
                    stock.stock_reserved = stock.stock_reserved.saturating_sub(e.quantity);
                    stock.refresh_available();
                }
                None => {
                    self.unallocated_reserved = self.unallocated_reserved.saturating_sub(e.quantity);
                }
            },
            InventoryEvent::ReservationConsumed(e) => {
                match e.location_id {
                    Some(location_id) => {
                        let stock = self.location_mut(location_id);
                        stock.stock_reserved = stock.stock_reserved.saturating_sub(e.quantity);
                    }
                    None => {
                        self.unallocated_reserved =
                            self.unallocated_reserved.saturating_sub(e.quantity);
                    }
                }
                for draw in &e.draws {
                    let stock = self.location_mut(draw.location_id);
                    stock.stock_on_hand = stock.stock_on_hand.saturating_sub(draw.quantity);
                    stock.refresh_available();
                }
            }
            InventoryEvent::BalancesCorrected(e) => {
                self.locations = e
                    .locations
                    .iter()
                    .map(|l| (l.location_id, l.clone()))
                    .collect();
                self.unallocated_reserved = e.unallocated_reserved;
            }
        }

        // Item-level totals are always the rollup of the location rows. Handlers
        // reject any command whose rollup would leave the decimal range.
        if !matches!(event, InventoryEvent::ItemCreated(_)) {
            if let Ok(totals) = self.rollup() {
                self.current_stock = totals.on_hand;
                self.reserved_stock = totals.reserved;
                self.available_stock = totals.available;
            }
        }

        self.updated_at = Some(Event::occurred_at(event));
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            InventoryCommand::CreateItem(cmd) => self.handle_create(cmd),
            InventoryCommand::SetStock(cmd) => self.handle_set(cmd),
            InventoryCommand::AdjustStock(cmd) => self.handle_adjust(cmd),
            InventoryCommand::TransferStock(cmd) => self.handle_transfer(cmd),
            InventoryCommand::ReserveStock(cmd) => self.handle_reserve(cmd),
            InventoryCommand::ReleaseReservedStock(cmd) => self.handle_release(cmd),
            InventoryCommand::ConsumeReservedStock(cmd) => self.handle_consume(cmd),
            InventoryCommand::CorrectBalances(cmd) => self.handle_correct(cmd),
        }
    }
}

impl InventoryItem {
    fn location_mut(&mut self, location_id: LocationId) -> &mut LocationStock {
        self.locations
            .entry(location_id)
            .or_insert_with(|| LocationStock::empty(location_id))
    }

    fn location_or_empty(&self, location_id: LocationId) -> LocationStock {
        self.locations
            .get(&location_id)
            .cloned()
            .unwrap_or_else(|| LocationStock::empty(location_id))
    }

    fn ensure_live(&self, tenant_id: TenantId, item_id: InventoryItemId) -> Result<(), DomainError> {
        if !self.created || self.tenant_id != Some(tenant_id) {
            return Err(DomainError::not_found());
        }
        if self.id != item_id {
            return Err(DomainError::invariant("item_id mismatch"));
        }
        Ok(())
    }

    /// A location's on-hand may be replaced by `new_on_hand` without dropping
    /// below what is reserved there or item-wide.
    fn ensure_on_hand_covers_reserved(
        &self,
        location: &LocationStock,
        new_on_hand: Quantity,
    ) -> Result<(), DomainError> {
        if new_on_hand < location.stock_reserved {
            return Err(DomainError::insufficient_stock(location.stock_reserved, new_on_hand));
        }
        let rollup = self.rollup()?;
        let new_total = rollup
            .on_hand
            .saturating_sub(location.stock_on_hand)
            .checked_add(new_on_hand)?;
        if new_total < rollup.reserved {
            return Err(DomainError::insufficient_stock(rollup.reserved, new_total));
        }
        Ok(())
    }

    fn handle_create(&self, cmd: &CreateItem) -> Result<Vec<InventoryEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("inventory item already exists"));
        }
        if self.id != cmd.item_id {
            return Err(DomainError::invariant("item_id mismatch"));
        }
        let average_cost = cmd
            .average_cost
            .map(|cost| cost.ensure_non_negative("average_cost"))
            .transpose()?;

        Ok(vec![InventoryEvent::ItemCreated(ItemCreated {
            tenant_id: cmd.tenant_id,
            item_id: cmd.item_id,
            product_id: cmd.product_id,
            item_code: cmd.item_code.clone(),
            name: cmd.name.clone(),
            low_stock_threshold: cmd.low_stock_threshold,
            average_cost,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_set(&self, cmd: &SetStock) -> Result<Vec<InventoryEvent>, DomainError> {
        self.ensure_live(cmd.tenant_id, cmd.item_id)?;
        let quantity = Quantity::new(cmd.quantity)?;

        let location = self.location_or_empty(cmd.location_id);
        self.ensure_on_hand_covers_reserved(&location, quantity)?;

        Ok(vec![InventoryEvent::StockSet(StockSet {
            tenant_id: cmd.tenant_id,
            item_id: cmd.item_id,
            location_id: cmd.location_id,
            previous_on_hand: location.stock_on_hand,
            on_hand: quantity,
            reason: cmd.reason.clone(),
            actor: cmd.actor,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_adjust(&self, cmd: &AdjustStock) -> Result<Vec<InventoryEvent>, DomainError> {
        self.ensure_live(cmd.tenant_id, cmd.item_id)?;
        if cmd.delta.is_zero() {
            return Err(DomainError::validation("delta", "adjustment must not be zero"));
        }

        let location = self.location_or_empty(cmd.location_id);
        let on_hand = location.stock_on_hand.apply_delta(cmd.delta)?;
        self.ensure_on_hand_covers_reserved(&location, on_hand)?;

        Ok(vec![InventoryEvent::StockAdjusted(StockAdjusted {
            tenant_id: cmd.tenant_id,
            item_id: cmd.item_id,
            location_id: cmd.location_id,
            delta: cmd.delta,
            previous_on_hand: location.stock_on_hand,
            on_hand,
            reason: cmd.reason.clone(),
            actor: cmd.actor,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_transfer(&self, cmd: &TransferStock) -> Result<Vec<InventoryEvent>, DomainError> {
        self.ensure_live(cmd.tenant_id, cmd.item_id)?;
        let quantity = Quantity::new(cmd.quantity)?.ensure_positive("quantity")?;
        if cmd.from_location_id == cmd.to_location_id {
            return Err(DomainError::validation(
                "to_location_id",
                "source and destination locations must differ",
            ));
        }

        let from = self.location_or_empty(cmd.from_location_id);
        if from.stock_available < quantity {
            return Err(DomainError::insufficient_stock(quantity, from.stock_available));
        }

        Ok(vec![InventoryEvent::StockTransferred(StockTransferred {
            tenant_id: cmd.tenant_id,
            item_id: cmd.item_id,
            from_location_id: cmd.from_location_id,
            to_location_id: cmd.to_location_id,
            quantity,
            reason: cmd.reason.clone(),
            actor: cmd.actor,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_reserve(&self, cmd: &ReserveStock) -> Result<Vec<InventoryEvent>, DomainError> {
        self.ensure_live(cmd.tenant_id, cmd.item_id)?;
        let quantity = Quantity::new(cmd.quantity)?.ensure_positive("quantity")?;

        if let Some(location_id) = cmd.location_id {
            let location = self.location_or_empty(location_id);
            if location.stock_available < quantity {
                return Err(DomainError::insufficient_stock(quantity, location.stock_available));
            }
        }
        let rollup = self.rollup()?;
        if rollup.available < quantity {
            return Err(DomainError::insufficient_stock(quantity, rollup.available));
        }

        Ok(vec![InventoryEvent::StockReserved(StockReserved {
            tenant_id: cmd.tenant_id,
            item_id: cmd.item_id,
            reservation_id: cmd.reservation_id,
            location_id: cmd.location_id,
            quantity,
            actor: cmd.actor,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn reserved_at(&self, location_id: Option<LocationId>) -> Quantity {
        match location_id {
            Some(id) => self
                .locations
                .get(&id)
                .map(|l| l.stock_reserved)
                .unwrap_or(Quantity::ZERO),
            None => self.unallocated_reserved,
        }
    }

    fn handle_release(&self, cmd: &ReleaseReservedStock) -> Result<Vec<InventoryEvent>, DomainError> {
        self.ensure_live(cmd.tenant_id, cmd.item_id)?;
        if self.reserved_at(cmd.location_id) < cmd.quantity {
            return Err(DomainError::invariant(
                "released quantity exceeds the recorded reservation",
            ));
        }

        Ok(vec![InventoryEvent::ReservationReleased(ReservationReleased {
            tenant_id: cmd.tenant_id,
            item_id: cmd.item_id,
            reservation_id: cmd.reservation_id,
            location_id: cmd.location_id,
            quantity: cmd.quantity,
            reason: cmd.reason.clone(),
            actor: cmd.actor,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_consume(&self, cmd: &ConsumeReservedStock) -> Result<Vec<InventoryEvent>, DomainError> {
        self.ensure_live(cmd.tenant_id, cmd.item_id)?;
        if self.reserved_at(cmd.location_id) < cmd.quantity {
            return Err(DomainError::invariant(
                "consumed quantity exceeds the recorded reservation",
            ));
        }

        let draws = match cmd.location_id {
            Some(location_id) => {
                let location = self.location_or_empty(location_id);
                if location.stock_on_hand < cmd.quantity {
                    return Err(DomainError::insufficient_stock(cmd.quantity, location.stock_on_hand));
                }
                vec![LocationDraw {
                    location_id,
                    quantity: cmd.quantity,
                }]
            }
            None => self.plan_unallocated_draws(cmd.quantity)?,
        };

        Ok(vec![InventoryEvent::ReservationConsumed(ReservationConsumed {
            tenant_id: cmd.tenant_id,
            item_id: cmd.item_id,
            reservation_id: cmd.reservation_id,
            location_id: cmd.location_id,
            quantity: cmd.quantity,
            draws,
            reason: cmd.reason.clone(),
            actor: cmd.actor,
            occurred_at: cmd.occurred_at,
        })])
    }

    /// Take a location-less reservation's stock from the free stock of each
    /// location, in location order.
    fn plan_unallocated_draws(&self, quantity: Quantity) -> Result<Vec<LocationDraw>, DomainError> {
        let mut remaining = quantity;
        let mut draws = Vec::new();
        for stock in self.locations.values() {
            if remaining.is_zero() {
                break;
            }
            let take = remaining.min(stock.stock_available);
            if take.is_zero() {
                continue;
            }
            draws.push(LocationDraw {
                location_id: stock.location_id,
                quantity: take,
            });
            remaining = remaining.saturating_sub(take);
        }
        if !remaining.is_zero() {
            let free = Quantity::checked_sum(self.locations.values().map(|l| l.stock_available))?;
            return Err(DomainError::insufficient_stock(quantity, free));
        }
        Ok(draws)
    }

    fn handle_correct(&self, cmd: &CorrectBalances) -> Result<Vec<InventoryEvent>, DomainError> {
        self.ensure_live(cmd.tenant_id, cmd.item_id)?;

        let computed = self.compute_true_stock(&cmd.reservations)?;
        let previous = self.recorded_balances();
        let locations_match = computed
            .locations
            .iter()
            .all(|l| self.locations.get(&l.location_id) == Some(l))
            && computed.locations.len() == self.locations.len();
        if computed.item == previous
            && locations_match
            && computed.unallocated_reserved == self.unallocated_reserved
        {
            return Ok(Vec::new());
        }

        Ok(vec![InventoryEvent::BalancesCorrected(BalancesCorrected {
            tenant_id: cmd.tenant_id,
            item_id: cmd.item_id,
            previous,
            corrected: computed.item,
            locations: computed.locations,
            unallocated_reserved: computed.unallocated_reserved,
            actor: cmd.actor,
            occurred_at: cmd.occurred_at,
        })])
    }
}
