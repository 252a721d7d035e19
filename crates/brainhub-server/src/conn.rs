//! Per-connection protocol.
//!
//! Framing is a 4-byte big-endian length prefix followed by one JSON
//! document, both directions. The first inbound frame must be
//! `{"type":"join","client":<descriptor>}`; a rejected join is answered
//! with a `join-error` frame and the connection closes. After that,
//! inbound `{"type":"command","command":"<text>"}` frames are routed
//! through the hub and answered with `command-result` frames. All outbound
//! traffic — hub pushes and command results alike — goes through the
//! session channel, which keeps the single-writer FIFO guarantee.

use std::net::SocketAddr;
use std::sync::Arc;

use serde_json::{Value, json};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use brainhub_hub::Hub;

/// Frames above this size are rejected and the connection dropped.
const MAX_FRAME_BYTES: usize = 10 * 1024 * 1024;

pub(crate) async fn serve(hub: Arc<Hub>, stream: TcpStream, peer: SocketAddr) {
    debug!(%peer, "Connection accepted");
    let (mut reader, mut writer) = stream.into_split();

    let join = match read_frame(&mut reader).await {
        Ok(Some(frame)) => frame,
        Ok(None) => {
            debug!(%peer, "Connection closed before join");
            return;
        },
        Err(e) => {
            warn!(%peer, error = %e, "Bad first frame");
            return;
        },
    };
    if join.get("type").and_then(Value::as_str) != Some("join") {
        let _ = write_frame(
            &mut writer,
            &json!({"type": "join-error", "error": "expected a join frame"}),
        )
        .await;
        return;
    }
    let descriptor = join.get("client").cloned().unwrap_or(Value::Null);

    let (session, mut outbound) = hub.open_session();
    if let Err(e) = hub.join(Arc::clone(&session), &descriptor).await {
        warn!(%peer, error = %e, "Join rejected");
        let _ = write_frame(
            &mut writer,
            &json!({"type": "join-error", "error": e.to_string()}),
        )
        .await;
        return;
    }
    let client_id = descriptor
        .get("id")
        .and_then(Value::as_str)
        .map(str::to_string);
    info!(%peer, client = client_id.as_deref().unwrap_or("?"), "Worker joined");

    // Session channel → wire.
    let write_task = tokio::spawn(async move {
        while let Some(message) = outbound.recv().await {
            if let Err(e) = write_frame(&mut writer, &message).await {
                debug!(error = %e, "Writer stopped");
                break;
            }
        }
    });

    // Wire → command router. Responses go back through the session so they
    // interleave with hub pushes in dispatch order.
    loop {
        let frame = match read_frame(&mut reader).await {
            Ok(Some(frame)) => frame,
            Ok(None) => break,
            Err(e) => {
                warn!(%peer, error = %e, "Dropping connection after bad frame");
                break;
            },
        };
        let result = match frame.get("type").and_then(Value::as_str) {
            Some("command") => {
                let command = frame.get("command").and_then(Value::as_str).unwrap_or("");
                hub.handle_command(command, client_id.as_deref()).await
            },
            other => json!({"error": format!("Unexpected frame type: {}", other.unwrap_or("none"))}),
        };
        let response = json!({"type": "command-result", "result": result});
        if session.deliver(response).await.is_dead() {
            break;
        }
    }

    info!(%peer, client = client_id.as_deref().unwrap_or("?"), "Connection closed");
    hub.disconnect(session.id()).await;
    write_task.abort();
}

async fn read_frame<R>(reader: &mut R) -> std::io::Result<Option<Value>>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {},
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_BYTES {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "frame too large",
        ));
    }
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    let value = serde_json::from_slice(&payload)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    Ok(Some(value))
}

async fn write_frame<W>(writer: &mut W, message: &Value) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let bytes = serde_json::to_vec(message)?;
    let len = u32::try_from(bytes.len())
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidData, "frame too large"))?;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(&bytes).await?;
    Ok(())
}
