//! Check result publishing.
//!
//! Results are fire-and-forget: a publish failure is logged with the full
//! payload for operator forensics and never retried.

use tracing::{error, info};

use vigil_transport::{DeliveryMode, Transport};
use vigil_types::{CheckRequest, ClientSpec, ResultEnvelope};

/// Pipe check results are published to, always with direct delivery.
pub const RESULTS_PIPE: &str = "results";

/// Build the result envelope and publish it.
pub async fn publish_result(transport: &dyn Transport, client: &ClientSpec, check: CheckRequest) {
    let envelope = ResultEnvelope {
        client: client.name.clone(),
        check,
        signature: client.signature.clone(),
    };

    let payload = match serde_json::to_vec(&envelope) {
        Ok(payload) => payload,
        Err(e) => {
            error!(check = %envelope.check.name, error = %e, "failed to serialize check result");
            return;
        }
    };

    info!(check = %envelope.check.name, "publishing check result");
    if let Err(e) = transport
        .publish(DeliveryMode::Direct, RESULTS_PIPE, payload.clone())
        .await
    {
        error!(
            payload = %String::from_utf8_lossy(&payload),
            error = %e,
            "failed to publish check result"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use vigil_transport::MemoryTransport;
    use vigil_types::Settings;

    fn client(value: serde_json::Value) -> ClientSpec {
        ClientSpec::from_settings(&Settings::new(value)).unwrap()
    }

    #[tokio::test]
    async fn publishes_envelope_to_results_pipe() {
        let transport = MemoryTransport::new();
        let client = client(json!({
            "client": {"name": "host1", "subscriptions": ["all"]}
        }));

        let mut check = CheckRequest::named("disk");
        check.output = Some("ok\n".into());
        check.status = Some(0);

        publish_result(&transport, &client, check).await;

        let published = transport.published_to(RESULTS_PIPE);
        assert_eq!(published.len(), 1);
        let envelope: ResultEnvelope = serde_json::from_slice(&published[0]).unwrap();
        assert_eq!(envelope.client, "host1");
        assert_eq!(envelope.check.name, "disk");
        assert_eq!(envelope.check.status, Some(0));
        assert!(envelope.signature.is_none());
    }

    #[tokio::test]
    async fn signature_is_attached_when_configured() {
        let transport = MemoryTransport::new();
        let client = client(json!({
            "client": {"name": "host1", "subscriptions": ["all"], "signature": "sig"}
        }));

        publish_result(&transport, &client, CheckRequest::named("disk")).await;

        let published = transport.published_to(RESULTS_PIPE);
        let envelope: ResultEnvelope = serde_json::from_slice(&published[0]).unwrap();
        assert_eq!(envelope.signature.as_deref(), Some("sig"));
    }

    #[tokio::test]
    async fn publish_error_does_not_propagate() {
        let transport = MemoryTransport::new();
        transport.disconnect();
        let client = client(json!({
            "client": {"name": "host1", "subscriptions": ["all"]}
        }));

        // Logged, not raised.
        publish_result(&transport, &client, CheckRequest::named("disk")).await;
    }
}
