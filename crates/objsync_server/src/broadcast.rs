//! Broadcast fan-out to every connection of an object.

use crate::error::SyncResult;
use crate::registry::ConnectionRegistry;
use crate::transport::{push_message, PushTransport};
use objsync_protocol::{ChangeEvent, PushMessage};
use std::sync::Arc;
use tracing::{debug, warn};

/// Outcome of one broadcast.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Pushes accepted by the transport.
    pub delivered: usize,
    /// Pushes that failed for any reason.
    pub failed: usize,
    /// Sockets the transport reported gone, in encounter order.
    pub gone_sockets: Vec<String>,
    /// Connection pages read.
    pub pages: usize,
}

/// Pushes change events to every subscriber of an object.
///
/// A failed push is logged and counted; it never stops the fan-out. All
/// pages are drained before returning.
pub struct Broadcaster {
    registry: Arc<ConnectionRegistry>,
    transport: Arc<dyn PushTransport>,
    page_size: usize,
}

impl Broadcaster {
    /// Creates a broadcaster.
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        transport: Arc<dyn PushTransport>,
        page_size: usize,
    ) -> Self {
        Self {
            registry,
            transport,
            page_size: page_size.max(1),
        }
    }

    /// Sends `events` at `change_index` to every connection of `obj_id`.
    ///
    /// Each recipient gets a message carrying its own client id. Connections
    /// on `exclude_socket_id` are skipped. Only a failure to read a page of
    /// connections is returned as an error.
    pub fn broadcast(
        &self,
        obj_id: &str,
        change_index: u64,
        events: &[ChangeEvent],
        exclude_socket_id: Option<&str>,
    ) -> SyncResult<BroadcastReport> {
        let mut report = BroadcastReport::default();

        for page in self.registry.list_for_object(obj_id, self.page_size) {
            let page = page?;
            report.pages += 1;

            for connection in page {
                if exclude_socket_id == Some(connection.socket_id.as_str()) {
                    continue;
                }

                let message = PushMessage::evt(
                    connection.client_id.as_str(),
                    obj_id,
                    change_index,
                    events.to_vec(),
                );
                match push_message(self.transport.as_ref(), &connection.socket_id, &message) {
                    Ok(()) => report.delivered += 1,
                    Err(err) => {
                        report.failed += 1;
                        if err.is_gone_socket() {
                            report.gone_sockets.push(connection.socket_id.clone());
                        }
                        warn!(
                            obj_id,
                            client_id = %connection.client_id,
                            socket_id = %connection.socket_id,
                            change_index,
                            error = %err,
                            "broadcast push failed"
                        );
                    }
                }
            }
        }

        debug!(
            obj_id,
            change_index,
            delivered = report.delivered,
            failed = report.failed,
            pages = report.pages,
            "broadcast complete"
        );
        Ok(report)
    }
}
