//! Append-only audit trail of a quote.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use etchforge_core::{Money, UserId};

use crate::quote::QuoteId;

/// One entry of a quote's history. Entries are only ever appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    #[serde(flatten)]
    pub action: HistoryAction,
    pub at: DateTime<Utc>,
    /// `None` for system-driven transitions (lazy expiry, sweeps).
    pub actor: Option<UserId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum HistoryAction {
    Created {
        initial_offer: Money,
        lead_time_days: Option<u32>,
    },
    CounterOffered {
        previous_offer: Money,
        new_offer: Money,
        notes: Option<String>,
    },
    Accepted {
        offer: Money,
    },
    Rejected {
        reason: String,
    },
    AutoRejected {
        reason: String,
        accepted_quote_id: QuoteId,
    },
    Expired {
        expires_at: DateTime<Utc>,
    },
}

impl HistoryAction {
    /// Name of the action as written into the serialised entry.
    pub fn name(&self) -> &'static str {
        match self {
            HistoryAction::Created { .. } => "created",
            HistoryAction::CounterOffered { .. } => "counter_offered",
            HistoryAction::Accepted { .. } => "accepted",
            HistoryAction::Rejected { .. } => "rejected",
            HistoryAction::AutoRejected { .. } => "auto_rejected",
            HistoryAction::Expired { .. } => "expired",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use etchforge_core::Currency;

    #[test]
    fn entries_serialise_with_action_tag() {
        let entry = HistoryEntry {
            action: HistoryAction::CounterOffered {
                previous_offer: Money::new(500_000, Currency::USD),
                new_offer: Money::new(450_000, Currency::USD),
                notes: Some("volume discount".to_string()),
            },
            at: Utc::now(),
            actor: Some(UserId::new()),
        };

        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["action"], "counter_offered");
        assert_eq!(json["new_offer"]["amount"], 450_000);
        assert_eq!(entry.action.name(), "counter_offered");

        let back: HistoryEntry = serde_json::from_value(json).unwrap();
        assert_eq!(back, entry);
    }
}
