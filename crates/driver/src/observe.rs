//! Passive observation taps for one page: console messages, network
//! requests and JavaScript dialogs.
//!
//! Listener tasks accumulate records into shared sinks that the driver
//! drains into the execution result. Dialogs are answered immediately:
//! alerts are accepted, everything else is dismissed, so a stray
//! `confirm()` can never wedge a run.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chromiumoxide::cdp::browser_protocol::network::{
    EventRequestWillBeSent, EventResponseReceived,
};
use chromiumoxide::cdp::browser_protocol::page::{
    DialogType, EventJavascriptDialogOpening, HandleJavaScriptDialogParams,
};
use chromiumoxide::cdp::js_protocol::runtime::{ConsoleApiCalledType, EventConsoleApiCalled};
use chromiumoxide::page::Page;
use chrono::Utc;
use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use testpilot_core_types::{ConsoleEntry, ConsoleLevel, NetworkCall};

/// Shared sinks written by listener tasks and drained by the driver.
#[derive(Clone, Default)]
pub struct ObservationSink {
    console: Arc<Mutex<Vec<ConsoleEntry>>>,
    network: Arc<Mutex<Vec<NetworkCall>>>,
    inflight: Arc<Mutex<HashMap<String, usize>>>,
}

impl ObservationSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn drain_console(&self) -> Vec<ConsoleEntry> {
        std::mem::take(&mut *self.console.lock().unwrap_or_else(|e| e.into_inner()))
    }

    pub fn drain_network(&self) -> Vec<NetworkCall> {
        self.inflight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        std::mem::take(&mut *self.network.lock().unwrap_or_else(|e| e.into_inner()))
    }

    fn push_console(&self, entry: ConsoleEntry) {
        self.console
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(entry);
    }

    fn push_request(&self, request_id: String, call: NetworkCall) {
        let mut calls = self.network.lock().unwrap_or_else(|e| e.into_inner());
        let index = calls.len();
        calls.push(call);
        self.inflight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(request_id, index);
    }

    fn record_status(&self, request_id: &str, status: u16) {
        let index = self
            .inflight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(request_id);
        if let Some(index) = index {
            let mut calls = self.network.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(call) = calls.get_mut(index) {
                call.status = Some(status);
            }
        }
    }
}

/// Spawn all observation listeners for `page`. Returned handles are
/// aborted when the session closes.
pub async fn spawn_taps(page: &Page, sink: ObservationSink) -> Vec<JoinHandle<()>> {
    let mut handles = Vec::new();

    match page.event_listener::<EventConsoleApiCalled>().await {
        Ok(mut events) => {
            let sink = sink.clone();
            handles.push(tokio::spawn(async move {
                while let Some(event) = events.next().await {
                    let level = match event.r#type {
                        ConsoleApiCalledType::Error => ConsoleLevel::Error,
                        ConsoleApiCalledType::Warning => ConsoleLevel::Warning,
                        ConsoleApiCalledType::Info => ConsoleLevel::Info,
                        _ => ConsoleLevel::Log,
                    };
                    let text = event
                        .args
                        .iter()
                        .filter_map(|arg| arg.value.as_ref())
                        .map(|value| match value {
                            serde_json::Value::String(s) => s.clone(),
                            other => other.to_string(),
                        })
                        .collect::<Vec<_>>()
                        .join(" ");
                    sink.push_console(ConsoleEntry {
                        level,
                        text,
                        timestamp: Utc::now(),
                    });
                }
            }));
        }
        Err(err) => warn!("console tap unavailable: {err}"),
    }

    match page.event_listener::<EventRequestWillBeSent>().await {
        Ok(mut events) => {
            let sink = sink.clone();
            handles.push(tokio::spawn(async move {
                while let Some(event) = events.next().await {
                    sink.push_request(
                        event.request_id.inner().to_string(),
                        NetworkCall {
                            url: event.request.url.clone(),
                            method: event.request.method.clone(),
                            status: None,
                            timestamp: Utc::now(),
                        },
                    );
                }
            }));
        }
        Err(err) => warn!("network request tap unavailable: {err}"),
    }

    match page.event_listener::<EventResponseReceived>().await {
        Ok(mut events) => {
            let sink = sink.clone();
            handles.push(tokio::spawn(async move {
                while let Some(event) = events.next().await {
                    sink.record_status(
                        event.request_id.inner(),
                        event.response.status.max(0) as u16,
                    );
                }
            }));
        }
        Err(err) => warn!("network response tap unavailable: {err}"),
    }

    match page.event_listener::<EventJavascriptDialogOpening>().await {
        Ok(mut events) => {
            let page = page.clone();
            handles.push(tokio::spawn(async move {
                while let Some(event) = events.next().await {
                    let accept = event.r#type == DialogType::Alert;
                    debug!(
                        kind = ?event.r#type,
                        message = %event.message,
                        accept,
                        "answering javascript dialog"
                    );
                    let params = match HandleJavaScriptDialogParams::builder()
                        .accept(accept)
                        .build()
                    {
                        Ok(params) => params,
                        Err(err) => {
                            warn!("dialog handler params invalid: {err}");
                            continue;
                        }
                    };
                    if let Err(err) = page.execute(params).await {
                        debug!("dialog dismissal failed: {err}");
                    }
                }
            }));
        }
        Err(err) => warn!("dialog tap unavailable: {err}"),
    }

    handles
}
