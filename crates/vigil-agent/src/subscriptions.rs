//! Subscription-to-transport binding rules.
//!
//! A plain subscription name fans out: every agent process binds its own
//! funnel so each receives an independent copy of every check request.
//! Subscriptions prefixed `direct:` or `roundrobin:` instead share one
//! funnel named after the subscription, so the server can target a single
//! consumer or spread requests across a pool.

use vigil_transport::DeliveryMode;

/// The computed transport binding for one subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionBinding {
    pub mode: DeliveryMode,
    pub pipe: String,
    pub funnel: String,
}

/// Compute the binding for a subscription string.
///
/// The fanout funnel name is stable for the lifetime of one process but
/// unique per process (`<client>-<version>-<start-epoch>`), so several
/// agents on one host receive independent copies.
pub fn binding_for(
    subscription: &str,
    client_name: &str,
    version: &str,
    start_epoch: i64,
) -> SubscriptionBinding {
    if subscription.starts_with("direct:") || subscription.starts_with("roundrobin:") {
        SubscriptionBinding {
            mode: DeliveryMode::Direct,
            pipe: subscription.to_string(),
            funnel: subscription.to_string(),
        }
    } else {
        SubscriptionBinding {
            mode: DeliveryMode::Fanout,
            pipe: subscription.to_string(),
            funnel: format!("{client_name}-{version}-{start_epoch}"),
        }
    }
}
