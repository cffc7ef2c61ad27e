use tracing::debug;

use crate::registry::Registry;

/// Queues `message` for every member except `excluded`.
///
/// A recipient whose connection is already gone is skipped; its own session
/// notices the disconnect on its next read. Returns how many recipients
/// accepted the message.
pub async fn broadcast_except(registry: &Registry, message: &str, excluded: &str) -> usize {
    let mut delivered = 0;
    registry
        .for_each_except(excluded, |recipient, outbound| {
            match outbound.send(message.to_string()) {
                Ok(()) => delivered += 1,
                Err(_) => debug!(%recipient, "dropping message for disconnected member"),
            }
        })
        .await;
    delivered
}
