//! WebSocket connection lifecycle: outbound writer, control task, read loop.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use speechlink_core::error::SpeechError;
use speechlink_core::protocol::{ControlMessage, ServerEvent};
use speechlink_media::SpeechPipeline;
use speechlink_media::events::{EventSink, Outbound};

use crate::state::GatewayState;

/// Handle a new WebSocket connection.
pub async fn handle_ws_connection(state: Arc<GatewayState>, ws: WebSocket, user_id: String) {
    let conn_id = Uuid::new_v4().to_string();
    info!(%conn_id, %user_id, "New WebSocket connection");
    #[cfg(feature = "metrics")]
    crate::metrics::record_ws_connect();

    let (mut ws_tx, mut ws_rx) = ws.split();
    let (sink, mut outbound_rx) = EventSink::channel(&conn_id);
    state
        .pipeline
        .register_connection(&conn_id, sink.clone())
        .await;

    // Outbound writer: JSON events as text frames, audio as binary frames.
    let send_task = tokio::spawn(async move {
        while let Some(outbound) = outbound_rx.recv().await {
            let frame = match outbound {
                Outbound::Event(event) => match event.to_json() {
                    Ok(json) => Message::Text(json.into()),
                    Err(e) => {
                        warn!(%e, "Failed to serialize event");
                        continue;
                    }
                },
                Outbound::Audio(audio) => Message::Binary(audio.into()),
            };
            if ws_tx.send(frame).await.is_err() {
                break;
            }
        }
    });

    // Control messages are applied one at a time, in arrival order, off the
    // read loop so slow provider handshakes never stall audio ingestion.
    let (control_tx, control_rx) = mpsc::unbounded_channel::<ControlMessage>();
    let control_task = tokio::spawn(run_control(
        Arc::clone(&state.pipeline),
        sink.clone(),
        conn_id.clone(),
        user_id.clone(),
        control_rx,
    ));

    let idle_timeout = state.config.idle_timeout();
    let max_frame_bytes = state.config.max_frame_bytes();

    loop {
        let next = match idle_timeout {
            Some(limit) => match tokio::time::timeout(limit, ws_rx.next()).await {
                Ok(next) => next,
                Err(_) => {
                    info!(%conn_id, idle_secs = limit.as_secs(), "Idle timeout, closing connection");
                    break;
                }
            },
            None => ws_rx.next().await,
        };
        let Some(msg_result) = next else { break };

        match msg_result {
            Ok(Message::Text(text)) => match ControlMessage::parse(text.as_str()) {
                Ok(control) => {
                    if control_tx.send(control).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    debug!(%conn_id, %e, "Rejected control message");
                    report(&sink, &e);
                }
            },
            Ok(Message::Binary(audio)) => {
                if audio.len() > max_frame_bytes {
                    report(
                        &sink,
                        &SpeechError::InvalidInput(format!(
                            "audio frame of {} bytes exceeds the {max_frame_bytes} byte limit",
                            audio.len()
                        )),
                    );
                    continue;
                }
                if let Err(e) = state.pipeline.push_audio(&conn_id, &audio).await {
                    report(&sink, &e);
                }
            }
            Ok(Message::Close(_)) => {
                debug!(%conn_id, "Client requested close");
                break;
            }
            Err(e) => {
                error!(%conn_id, %e, "WebSocket error");
                break;
            }
            _ => {}
        }
    }

    // Cleanup. The control task is stopped before teardown so a start in
    // flight cannot re-create the session afterwards.
    drop(control_tx);
    control_task.abort();
    let _ = control_task.await;
    state.pipeline.disconnect(&conn_id).await;
    send_task.abort();
    #[cfg(feature = "metrics")]
    crate::metrics::record_ws_disconnect();
    info!(%conn_id, "WebSocket connection closed");
}

async fn run_control(
    pipeline: Arc<SpeechPipeline>,
    sink: EventSink,
    conn_id: String,
    user_id: String,
    mut control_rx: mpsc::UnboundedReceiver<ControlMessage>,
) {
    while let Some(control) = control_rx.recv().await {
        #[cfg(feature = "metrics")]
        crate::metrics::record_action(action_name(&control));
        debug!(%conn_id, action = action_name(&control), "Control message");

        match control {
            ControlMessage::Start {
                model,
                voice_gender,
            } => match pipeline
                .start_session(&conn_id, &user_id, model, voice_gender)
                .await
            {
                Ok(_provider) => {
                    #[cfg(feature = "metrics")]
                    crate::metrics::record_provider_selected("asr", _provider.as_str());
                }
                Err(e) => {
                    warn!(%conn_id, error = %e, "Failed to start session");
                    report(&sink, &e);
                }
            },
            ControlMessage::AudioControl {
                model,
                voice_gender,
            } => {
                if let Err(e) = pipeline
                    .update_session(&conn_id, &user_id, model, voice_gender)
                    .await
                {
                    report(&sink, &e);
                }
            }
            ControlMessage::End => {
                let (status, message) = pipeline.end_session(&conn_id).await;
                debug!(%conn_id, %status, %message, "End handled");
            }
            ControlMessage::Cancel => {
                let (status, message) = pipeline.cancel_session(&conn_id).await;
                debug!(%conn_id, %status, %message, "Cancel handled");
            }
            ControlMessage::Synthesize {
                text,
                voice_gender,
                streaming,
                request_id,
            } => {
                #[cfg(feature = "metrics")]
                crate::metrics::record_synthesis_requested(streaming);
                match pipeline
                    .request_synthesis(&conn_id, &text, voice_gender, streaming, request_id)
                    .await
                {
                    Ok(request_id) => debug!(%conn_id, %request_id, "Synthesis scheduled"),
                    Err(e) => report(&sink, &e),
                }
            }
        }
    }
}

/// Turn a synchronous rejection into exactly one error event.
fn report(sink: &EventSink, err: &SpeechError) {
    #[cfg(feature = "metrics")]
    crate::metrics::record_error(err.kind());
    sink.send(ServerEvent::error(err.to_string()));
}

fn action_name(control: &ControlMessage) -> &'static str {
    match control {
        ControlMessage::Start { .. } => "start",
        ControlMessage::AudioControl { .. } => "audio-control",
        ControlMessage::End => "end",
        ControlMessage::Cancel => "cancel",
        ControlMessage::Synthesize { .. } => "synthesize",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_names_match_wire_tags() {
        for raw in [
            r#"{"action":"start"}"#,
            r#"{"action":"audio-control"}"#,
            r#"{"action":"end"}"#,
            r#"{"action":"cancel"}"#,
            r#"{"action":"synthesize","text":"hi"}"#,
        ] {
            let msg = ControlMessage::parse(raw).unwrap();
            let tag: serde_json::Value = serde_json::from_str(raw).unwrap();
            assert_eq!(tag["action"], action_name(&msg));
        }
    }

    #[tokio::test]
    async fn test_report_emits_one_error_event() {
        let (sink, mut rx) = EventSink::channel("c1");
        report(&sink, &SpeechError::InvalidInput("bad".into()));
        assert_eq!(
            rx.recv().await,
            Some(Outbound::Event(ServerEvent::error("Invalid input: bad")))
        );
        assert!(rx.try_recv().is_err());
    }
}
