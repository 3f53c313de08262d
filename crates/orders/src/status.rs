//! Order status machine.

use core::str::FromStr;

use serde::{Deserialize, Serialize};

use etchforge_core::DomainError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    New,
    Draft,
    Pending,
    VendorSourcing,
    VendorNegotiation,
    CustomerQuote,
    AwaitingPayment,
    PartialPayment,
    FullPayment,
    InProduction,
    QualityControl,
    Shipping,
    Delivered,
    Completed,
    Cancelled,
    Refunded,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 16] = [
        OrderStatus::New,
        OrderStatus::Draft,
        OrderStatus::Pending,
        OrderStatus::VendorSourcing,
        OrderStatus::VendorNegotiation,
        OrderStatus::CustomerQuote,
        OrderStatus::AwaitingPayment,
        OrderStatus::PartialPayment,
        OrderStatus::FullPayment,
        OrderStatus::InProduction,
        OrderStatus::QualityControl,
        OrderStatus::Shipping,
        OrderStatus::Delivered,
        OrderStatus::Completed,
        OrderStatus::Cancelled,
        OrderStatus::Refunded,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::New => "new",
            OrderStatus::Draft => "draft",
            OrderStatus::Pending => "pending",
            OrderStatus::VendorSourcing => "vendor_sourcing",
            OrderStatus::VendorNegotiation => "vendor_negotiation",
            OrderStatus::CustomerQuote => "customer_quote",
            OrderStatus::AwaitingPayment => "awaiting_payment",
            OrderStatus::PartialPayment => "partial_payment",
            OrderStatus::FullPayment => "full_payment",
            OrderStatus::InProduction => "in_production",
            OrderStatus::QualityControl => "quality_control",
            OrderStatus::Shipping => "shipping",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Completed => "completed",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Refunded => "refunded",
        }
    }

    /// Statuses reachable from `self` through a manual stage advance.
    pub fn allowed_transitions(self) -> &'static [OrderStatus] {
        use OrderStatus::*;
        match self {
            New | Draft => &[Pending],
            Pending => &[VendorSourcing, Cancelled],
            VendorSourcing => &[VendorNegotiation, Cancelled],
            VendorNegotiation => &[CustomerQuote, VendorSourcing],
            CustomerQuote => &[AwaitingPayment, Cancelled],
            AwaitingPayment => &[PartialPayment, FullPayment],
            PartialPayment => &[FullPayment, InProduction, Refunded],
            FullPayment => &[InProduction, Refunded],
            InProduction => &[QualityControl],
            QualityControl => &[Shipping, InProduction],
            Shipping => &[Delivered],
            Delivered => &[Completed],
            Completed => &[Refunded],
            Cancelled | Refunded => &[],
        }
    }

    pub fn can_transition_to(self, target: OrderStatus) -> bool {
        self.allowed_transitions().contains(&target)
    }

    /// The order still accepts vendor quotes (nothing has been synced yet).
    pub fn is_sourcing(self) -> bool {
        matches!(
            self,
            OrderStatus::New
                | OrderStatus::Draft
                | OrderStatus::Pending
                | OrderStatus::VendorSourcing
                | OrderStatus::VendorNegotiation
        )
    }
}

impl core::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OrderStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| DomainError::validation("status", format!("unsupported status '{s}'")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_status_name() {
        for status in OrderStatus::ALL {
            assert_eq!(status.as_str().parse::<OrderStatus>().unwrap(), status);
        }
        match "shipped".parse::<OrderStatus>().unwrap_err() {
            DomainError::Validation { field, .. } if field == "status" => {}
            _ => panic!("Expected Validation error"),
        }
    }

    #[test]
    fn negotiation_can_fall_back_to_sourcing() {
        assert!(OrderStatus::VendorNegotiation.can_transition_to(OrderStatus::CustomerQuote));
        assert!(OrderStatus::VendorNegotiation.can_transition_to(OrderStatus::VendorSourcing));
        assert!(!OrderStatus::VendorNegotiation.can_transition_to(OrderStatus::Shipping));
    }

    #[test]
    fn no_status_transitions_to_itself() {
        for status in OrderStatus::ALL {
            assert!(!status.can_transition_to(status), "{status} loops to itself");
        }
        assert!(OrderStatus::Refunded.allowed_transitions().is_empty());
    }
}
