use rmcp::model::{
    ClientJsonRpcMessage, ClientNotification, JsonRpcMessage, JsonRpcNotification, RequestId,
    ServerJsonRpcMessage,
};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, warn};

#[derive(Debug, Default)]
struct Pending {
    open: HashSet<RequestId>,
    cancelled: HashSet<RequestId>,
}

/// Per-session bookkeeping that drops the reply to a request the client
/// cancelled. Only ids still awaiting a reply can be marked cancelled.
#[derive(Debug, Clone, Default)]
pub(crate) struct ReplyFilter {
    pending: Arc<Mutex<Pending>>,
}

impl ReplyFilter {
    fn lock(&self) -> MutexGuard<'_, Pending> {
        self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Records a message arriving from the client.
    pub(crate) fn inbound(&self, message: &ClientJsonRpcMessage) {
        match message {
            JsonRpcMessage::Request(request) => {
                self.lock().open.insert(request.id.clone());
            }
            JsonRpcMessage::Notification(JsonRpcNotification {
                notification: ClientNotification::CancelledNotification(cancelled),
                ..
            }) => {
                let id = &cancelled.params.request_id;
                let mut pending = self.lock();
                if pending.open.contains(id) {
                    pending.cancelled.insert(id.clone());
                }
            }
            _ => {}
        }
    }

    /// Whether an outgoing message should reach the client.
    pub(crate) fn admit(&self, message: &ServerJsonRpcMessage) -> bool {
        let id = match message {
            JsonRpcMessage::Response(response) => &response.id,
            JsonRpcMessage::Error(error) => &error.id,
            _ => return true,
        };
        let mut pending = self.lock();
        pending.open.remove(id);
        if pending.cancelled.remove(id) {
            debug!(id = %id, "request cancelled by client, dropping reply");
            return false;
        }
        true
    }
}

/// Parses one client message, recording it with `filter`. Blank input and
/// unparseable input yield `None`.
pub(crate) fn decode(raw: &str, filter: &ReplyFilter) -> Option<ClientJsonRpcMessage> {
    if raw.trim().is_empty() {
        return None;
    }
    match serde_json::from_str::<ClientJsonRpcMessage>(raw) {
        Ok(message) => {
            filter.inbound(&message);
            Some(message)
        }
        Err(err) => {
            warn!(error = %err, "dropping unparseable message");
            None
        }
    }
}
