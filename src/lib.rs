pub mod bus;
pub mod component;
pub mod component_id;
pub mod component_map;
pub mod config;
pub mod emulation;
pub mod model;
pub mod port;
pub mod shutdown;
pub mod state_machine;
pub mod trace;

use anyhow::Result;
use moq_lite::{Client, Origin, Session};
use url::Url;
use web_transport_quinn::ClientBuilder;

/// Broadcast path for events a client publishes on `topic`.
pub fn event_broadcast_path(topic: &str, client_id: &str) -> String {
    format!("events/{topic}/{client_id}")
}

/// Broadcast path announcing a client and carrying its last will.
pub fn presence_broadcast_path(client_id: &str) -> String {
    format!("presence/{client_id}")
}

pub const EVENT_TRACK: &str = "events";
pub const PRESENCE_TRACK: &str = "presence";

/// Open a relay session that both publishes and consumes.
///
/// Returns the session with the producer for local broadcasts and the consumer for remote ones.
pub async fn connect_bidirectional(
    relay_url: &str,
) -> Result<(Session, moq_lite::OriginProducer, moq_lite::OriginConsumer)> {
    let pub_origin = Origin::produce();
    let sub_origin = Origin::produce();

    let wt_client = ClientBuilder::new()
        .dangerous()
        .with_no_certificate_verification()?;
    let wt_session = wt_client.connect(relay_url.parse::<Url>()?).await?;

    let client = Client::new()
        .with_publish(pub_origin.consumer)
        .with_consume(sub_origin.producer);
    let session = client.connect(wt_session).await?;

    Ok((session, pub_origin.producer, sub_origin.consumer))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broadcast_paths() {
        assert_eq!(event_broadcast_path("sensor/go", "c1"), "events/sensor/go/c1");
        assert_eq!(presence_broadcast_path("c1"), "presence/c1");
    }
}
