use crate::dispatch::McpService;
use crate::endpoint::McpEndpoint;
use crate::transport::session::{decode, ReplyFilter};
use crate::{EndpointError, Result};
use futures::channel::mpsc;
use futures::{future, SinkExt, StreamExt};
use rmcp::model::ServerJsonRpcMessage;
use rmcp::service::ServerInitializeError;
use rmcp::ServiceExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec, LinesCodecError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const MAX_LINE_LENGTH: usize = 16 * 1024 * 1024;
const RESPONSE_BUFFER: usize = 64;
// Queued replies get this long to reach the writer after the session ends.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Serves newline-delimited JSON-RPC over `reader`/`writer` until the input
/// ends or `cancel` fires.
///
/// Requests are dispatched concurrently by rmcp, so responses may be written
/// out of order. All output goes through one writer task.
pub async fn serve_stdio<R, W>(
    endpoint: Arc<McpEndpoint>,
    reader: R,
    writer: W,
    cancel: CancellationToken,
) -> Result<()>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let filter = ReplyFilter::default();
    let inbound_filter = filter.clone();
    let inbound = FramedRead::new(reader, LinesCodec::new_with_max_length(MAX_LINE_LENGTH))
        .filter_map(move |line| future::ready(read_line(line, &inbound_filter)));

    let (tx, rx) = mpsc::channel::<ServerJsonRpcMessage>(RESPONSE_BUFFER);
    let mut writer_task = tokio::spawn(write_responses(writer, rx, filter));

    info!("serving on stdio");
    let served = match McpService::new(endpoint)
        .serve_with_ct((tx, inbound), cancel.child_token())
        .await
    {
        Ok(running) => match running.waiting().await {
            Ok(reason) => {
                debug!(reason = ?reason, "stdio session ended");
                Ok(())
            }
            Err(err) => Err(EndpointError::Transport(format!("session task failed: {err}"))),
        },
        Err(ServerInitializeError::ConnectionClosed(context)) => {
            debug!(context = %context, "stdin closed before initialization");
            Ok(())
        }
        Err(ServerInitializeError::Cancelled) => {
            debug!("stdio transport cancelled during initialization");
            Ok(())
        }
        Err(err) => Err(EndpointError::Transport(err.to_string())),
    };

    // The writer ends once the session has dropped its sender.
    let written = match tokio::time::timeout(DRAIN_TIMEOUT, &mut writer_task).await {
        Ok(joined) => joined
            .map_err(|e| EndpointError::Transport(format!("writer task failed: {e}")))?,
        Err(_) => {
            warn!("reply writer did not finish, abandoning it");
            writer_task.abort();
            Ok(())
        }
    };

    info!("stdio transport stopped");
    served.and(written)
}

fn read_line(
    line: std::result::Result<String, LinesCodecError>,
    filter: &ReplyFilter,
) -> Option<rmcp::model::ClientJsonRpcMessage> {
    match line {
        Ok(line) => decode(&line, filter),
        Err(LinesCodecError::MaxLineLengthExceeded) => {
            warn!(limit = MAX_LINE_LENGTH, "dropping oversized message");
            None
        }
        Err(LinesCodecError::Io(err)) => {
            warn!(error = %err, "stdin read failed");
            None
        }
    }
}

async fn write_responses<W>(
    writer: W,
    rx: mpsc::Receiver<ServerJsonRpcMessage>,
    filter: ReplyFilter,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut sink = FramedWrite::new(writer, LinesCodec::new());
    let mut replies = rx.filter(move |message| future::ready(filter.admit(message)));
    while let Some(message) = replies.next().await {
        let line = serde_json::to_string(&message)?;
        sink.send(line).await?;
    }
    Ok(())
}
