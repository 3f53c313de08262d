//! Low-stock and out-of-stock alerts.
//!
//! Alerts are re-evaluated after every change to an item's on-hand stock:
//! conditions that cleared resolve their open alert, and a condition that
//! holds raises an alert unless one of that type is already open.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use etchforge_core::{Entity, Quantity, TenantId, UserId};
use etchforge_events::Event;

use crate::ids::{AlertId, InventoryItemId};
use crate::item::InventoryItem;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    LowStock,
    OutOfStock,
}

impl AlertType {
    pub fn as_str(self) -> &'static str {
        match self {
            AlertType::LowStock => "low_stock",
            AlertType::OutOfStock => "out_of_stock",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Warning,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockAlert {
    pub id: AlertId,
    pub tenant_id: TenantId,
    pub item_id: InventoryItemId,
    pub alert_type: AlertType,
    pub severity: AlertSeverity,
    pub message: String,
    pub triggered_quantity: Quantity,
    pub threshold_quantity: Quantity,
    pub resolved: bool,
    pub raised_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolved_by: Option<UserId>,
}

impl Entity for StockAlert {
    type Id = AlertId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn tenant_id(&self) -> Option<TenantId> {
        Some(self.tenant_id)
    }
}

impl StockAlert {
    pub fn resolve(&mut self, actor: UserId, at: DateTime<Utc>) {
        self.resolved = true;
        self.resolved_at = Some(at);
        self.resolved_by = Some(actor);
    }

    fn condition_holds(&self, current: Quantity, threshold: Quantity) -> bool {
        match self.alert_type {
            AlertType::LowStock => current <= threshold,
            AlertType::OutOfStock => current.is_zero(),
        }
    }
}

/// Event: StockAlertRaised.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockAlertRaised {
    pub tenant_id: TenantId,
    pub alert_id: AlertId,
    pub item_id: InventoryItemId,
    pub alert_type: AlertType,
    pub severity: AlertSeverity,
    pub message: String,
    pub triggered_quantity: Quantity,
    pub occurred_at: DateTime<Utc>,
}

/// Event: StockAlertResolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockAlertResolved {
    pub tenant_id: TenantId,
    pub alert_id: AlertId,
    pub item_id: InventoryItemId,
    pub alert_type: AlertType,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlertEvent {
    Raised(StockAlertRaised),
    Resolved(StockAlertResolved),
}

impl Event for AlertEvent {
    fn event_type(&self) -> &'static str {
        match self {
            AlertEvent::Raised(_) => "inventory.alert.raised",
            AlertEvent::Resolved(_) => "inventory.alert.resolved",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            AlertEvent::Raised(e) => e.occurred_at,
            AlertEvent::Resolved(e) => e.occurred_at,
        }
    }
}

impl StockAlert {
    pub fn raised_event(&self) -> AlertEvent {
        AlertEvent::Raised(StockAlertRaised {
            tenant_id: self.tenant_id,
            alert_id: self.id,
            item_id: self.item_id,
            alert_type: self.alert_type,
            severity: self.severity,
            message: self.message.clone(),
            triggered_quantity: self.triggered_quantity,
            occurred_at: self.raised_at,
        })
    }

    pub fn resolved_event(&self, at: DateTime<Utc>) -> AlertEvent {
        AlertEvent::Resolved(StockAlertResolved {
            tenant_id: self.tenant_id,
            alert_id: self.id,
            item_id: self.item_id,
            alert_type: self.alert_type,
            occurred_at: at,
        })
    }
}

/// Result of evaluating an item against its open alerts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AlertChanges {
    pub resolved: Vec<AlertId>,
    pub raised: Vec<StockAlert>,
}

impl AlertChanges {
    pub fn is_empty(&self) -> bool {
        self.resolved.is_empty() && self.raised.is_empty()
    }
}

/// Decide which of `open_alerts` (the item's unresolved alerts) to resolve
/// and which new alerts to raise.
pub fn evaluate_alerts(
    item: &InventoryItem,
    tenant_id: TenantId,
    open_alerts: &[&StockAlert],
    now: DateTime<Utc>,
) -> AlertChanges {
    let current = item.current_stock();
    let threshold = item.low_stock_threshold();
    let mut changes = AlertChanges::default();

    for alert in open_alerts {
        if !alert.condition_holds(current, threshold) {
            changes.resolved.push(alert.id);
        }
    }

    let still_open = |alert_type: AlertType| {
        open_alerts
            .iter()
            .any(|a| a.alert_type == alert_type && !changes.resolved.contains(&a.id))
    };

    let mut wanted = Vec::new();
    if current <= threshold {
        let severity = if current.is_zero() {
            AlertSeverity::Critical
        } else {
            AlertSeverity::Warning
        };
        wanted.push((AlertType::LowStock, severity));
    }
    if current.is_zero() {
        wanted.push((AlertType::OutOfStock, AlertSeverity::Critical));
    }

    for (alert_type, severity) in wanted {
        if still_open(alert_type) {
            continue;
        }
        changes.raised.push(StockAlert {
            id: AlertId::new(),
            tenant_id,
            item_id: item.id_typed(),
            alert_type,
            severity,
            message: alert_message(item.item_code(), alert_type),
            triggered_quantity: current,
            threshold_quantity: threshold,
            resolved: false,
            raised_at: now,
            resolved_at: None,
            resolved_by: None,
        });
    }

    changes
}

fn alert_message(item_code: &str, alert_type: AlertType) -> String {
    match alert_type {
        AlertType::OutOfStock => format!("Item {item_code} is out of stock"),
        AlertType::LowStock => format!("Item {item_code} reached low stock threshold"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::LocationId;
    use crate::item::{CreateItem, InventoryCommand, SetStock};
    use etchforge_core::{Aggregate, ProductId};
    use rust_decimal::Decimal;

    fn item_with_stock(tenant_id: TenantId, units: i64) -> InventoryItem {
        let item_id = InventoryItemId::new();
        let mut item = InventoryItem::empty(item_id);
        item.execute(&InventoryCommand::CreateItem(CreateItem {
            tenant_id,
            item_id,
            product_id: ProductId::new(),
            item_code: "PLAQUE-A5".to_string(),
            name: "Brass plaque".to_string(),
            low_stock_threshold: Quantity::from_units(10),
            average_cost: None,
            occurred_at: Utc::now(),
        }))
        .unwrap();
        item.execute(&InventoryCommand::SetStock(SetStock {
            tenant_id,
            item_id,
            location_id: LocationId::new(),
            quantity: Decimal::from(units),
            reason: None,
            actor: UserId::new(),
            occurred_at: Utc::now(),
        }))
        .unwrap();
        item
    }

    #[test]
    fn empty_item_raises_both_alerts() {
        let tenant_id = TenantId::new();
        let item = item_with_stock(tenant_id, 0);
        let changes = evaluate_alerts(&item, tenant_id, &[], Utc::now());

        assert_eq!(changes.raised.len(), 2);
        assert!(changes.raised.iter().all(|a| a.severity == AlertSeverity::Critical));
        assert_eq!(changes.raised[1].message, "Item PLAQUE-A5 is out of stock");
    }

    #[test]
    fn open_alert_is_not_duplicated_and_clears_on_restock() {
        let tenant_id = TenantId::new();
        let low = item_with_stock(tenant_id, 4);
        let first = evaluate_alerts(&low, tenant_id, &[], Utc::now());
        assert_eq!(first.raised.len(), 1);
        assert_eq!(first.raised[0].severity, AlertSeverity::Warning);
        assert_eq!(first.raised[0].message, "Item PLAQUE-A5 reached low stock threshold");

        let open = first.raised[0].clone();
        let again = evaluate_alerts(&low, tenant_id, &[&open], Utc::now());
        assert!(again.is_empty());

        let restocked = item_with_stock(tenant_id, 50);
        let cleared = evaluate_alerts(&restocked, tenant_id, &[&open], Utc::now());
        assert_eq!(cleared.resolved, vec![open.id]);
        assert!(cleared.raised.is_empty());
    }
}
