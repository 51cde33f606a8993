// ── Rule events ──
//
// Published after a state change is committed. Subscribers that lag
// behind lose the oldest events (broadcast semantics).

use std::net::Ipv4Addr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::Purpose;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RuleEvent {
    /// A rule was programmed for the first time.
    RuleActivated {
        rule: Uuid,
        purpose: Purpose,
        at: DateTime<Utc>,
    },
    /// A revoked rule was removed from the routers and the store.
    RuleRemoved {
        rule: Uuid,
        purpose: Purpose,
        at: DateTime<Utc>,
    },
    StaticNatEnabled {
        ip: Ipv4Addr,
        vm: Uuid,
        at: DateTime<Utc>,
    },
    StaticNatDisabled {
        ip: Ipv4Addr,
        at: DateTime<Utc>,
    },
}

impl RuleEvent {
    pub fn rule_activated(rule: Uuid, purpose: Purpose) -> Self {
        Self::RuleActivated {
            rule,
            purpose,
            at: Utc::now(),
        }
    }

    pub fn rule_removed(rule: Uuid, purpose: Purpose) -> Self {
        Self::RuleRemoved {
            rule,
            purpose,
            at: Utc::now(),
        }
    }
}
