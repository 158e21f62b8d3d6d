use std::fmt::Display;
use std::time::Duration;

use axum::extract::ws::Message;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tracing::{debug, info, instrument, warn};

use super::{ConnectionSession, DisconnectReason};
use crate::broker::OutboundQueue;

const FLUSH_GRACE: Duration = Duration::from_secs(1);

/// Returns once the peer is gone and the session has disconnected. Any
/// inbound frame, pongs included, resets `idle_timeout`.
#[instrument(skip_all, fields(session_id = %session.id(), room = %session.context().room.slug))]
pub async fn drive<S, R, E>(
    session: ConnectionSession,
    mut outbound: OutboundQueue,
    mut sink: S,
    mut stream: R,
    idle_timeout: Duration,
) -> DisconnectReason
where
    S: Sink<Message> + Unpin + Send + 'static,
    R: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    let ping_every = (idle_timeout / 2).max(Duration::from_millis(10));
    let mut writer = tokio::spawn(async move {
        let mut ping = tokio::time::interval(ping_every);
        let _ = ping.tick().await;

        loop {
            tokio::select! {
                frame = outbound.recv() => {
                    let Some(frame) = frame else { break };
                    if sink.send(Message::Text(frame.to_string().into())).await.is_err() {
                        break;
                    }
                }
                _ = ping.tick() => {
                    if sink.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
            }
        }
        let _ = sink.close().await;
    });

    let mut writer_done = false;
    let reason = loop {
        let next = tokio::select! {
            next = tokio::time::timeout(idle_timeout, stream.next()) => next,
            _ = &mut writer => {
                writer_done = true;
                break DisconnectReason::WriterStopped;
            }
        };

        let message = match next {
            Err(_) => break DisconnectReason::IdleTimeout,
            Ok(None) => break DisconnectReason::StreamEnded,
            Ok(Some(Err(e))) => {
                debug!(error = %e, "receive failed");
                break DisconnectReason::TransportError;
            }
            Ok(Some(Ok(message))) => message,
        };

        match message {
            Message::Text(text) => {
                let _ = session.handle_frame(text.as_str()).await;
            }
            Message::Binary(data) => match std::str::from_utf8(&data) {
                Ok(text) => {
                    let _ = session.handle_frame(text).await;
                }
                Err(_) => warn!(len = data.len(), "ignoring non-UTF-8 binary frame"),
            },
            Message::Close(_) => break DisconnectReason::ClientClosed,
            Message::Ping(_) | Message::Pong(_) => {}
        }
    };

    session.disconnect(reason).await;
    // Dropping the session drops its handle, which ends the writer once the
    // queue is drained.
    drop(session);

    if !writer_done && tokio::time::timeout(FLUSH_GRACE, &mut writer).await.is_err() {
        writer.abort();
    }
    info!(?reason, "connection finished");
    reason
}
