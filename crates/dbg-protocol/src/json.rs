//! JSON-framed adapter, grounded in `original_source/src/protocols/
//! vscodeprotocol.cpp`'s `Content-Length`-prefixed request/response/event
//! envelope. Command bodies are plain JSON objects rather than a full
//! reimplementation of the original wire schema: only the handful of
//! requests [`dbg_engine::Controller`]'s public API can actually answer.

use std::sync::Arc;

use anyhow::{anyhow, Context, Result as AnyResult};
use dbg_config::LaunchRequest;
use dbg_engine::controller::{Controller, DisconnectAction, PROCESS_WIDE_THREAD};
use dbg_engine::ids::ThreadId;
use dbg_engine::protocol_events::ProtocolEvent;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, Mutex};

use crate::adapter::ProtocolAdapter;

#[derive(Debug, Deserialize)]
struct Request {
    seq: u64,
    command: String,
    #[serde(default)]
    arguments: Value,
}

#[derive(Debug, Serialize)]
struct Response {
    seq: u64,
    #[serde(rename = "type")]
    kind: &'static str,
    request_seq: u64,
    success: bool,
    command: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    body: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

#[derive(Debug, Serialize)]
struct EventEnvelope {
    seq: u64,
    #[serde(rename = "type")]
    kind: &'static str,
    event: &'static str,
    body: Value,
}

pub struct JsonAdapter;

impl JsonAdapter {
    pub fn new() -> Self {
        Self
    }
}

impl Default for JsonAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl ProtocolAdapter for JsonAdapter {
    async fn run<R, W>(&self, controller: Arc<Controller>, input: R, output: W) -> AnyResult<()>
    where
        R: AsyncBufRead + Unpin + Send,
        W: AsyncWrite + Unpin + Send,
    {
        let mut reader = BufReader::new(input);
        let output = Arc::new(Mutex::new(output));
        let (events_tx, mut events_rx) = mpsc::unbounded_channel::<ProtocolEvent>();
        let seq = Arc::new(std::sync::atomic::AtomicU64::new(1));
        let mut dispatch_task: Option<tokio::task::JoinHandle<()>> = None;

        let writer_task = {
            let output = output.clone();
            let seq = seq.clone();
            tokio::spawn(async move {
                while let Some(event) = events_rx.recv().await {
                    let envelope = render_event(&event, seq.fetch_add(1, std::sync::atomic::Ordering::Relaxed));
                    let mut out = output.lock().await;
                    let _ = write_frame(&mut *out, &envelope).await;
                }
            })
        };

        loop {
            let request = match read_request(&mut reader).await? {
                Some(r) => r,
                None => break,
            };
            let command = request.command.clone();
            let request_seq = request.seq;
            let is_disconnect = command == "disconnect";

            let result = handle_request(&controller, request, &events_tx, &mut dispatch_task).await;
            let response = match result {
                Ok(body) => Response {
                    seq: seq.fetch_add(1, std::sync::atomic::Ordering::Relaxed),
                    kind: "response",
                    request_seq,
                    success: true,
                    command,
                    body,
                    message: None,
                },
                Err(err) => Response {
                    seq: seq.fetch_add(1, std::sync::atomic::Ordering::Relaxed),
                    kind: "response",
                    request_seq,
                    success: false,
                    command,
                    body: None,
                    message: Some(err.to_string()),
                },
            };
            let payload = serde_json::to_value(&response)?;
            let mut out = output.lock().await;
            write_frame(&mut *out, &payload).await?;
            drop(out);

            if is_disconnect {
                break;
            }
        }

        drop(events_tx);
        if let Some(task) = dispatch_task.take() {
            task.abort();
        }
        writer_task.abort();
        Ok(())
    }
}

async fn handle_request(
    controller: &Arc<Controller>,
    request: Request,
    events_tx: &mpsc::UnboundedSender<ProtocolEvent>,
    dispatch_task: &mut Option<tokio::task::JoinHandle<()>>,
) -> AnyResult<Option<Value>> {
    match request.command.as_str() {
        "launch" | "attach" => {
            let launch_request: LaunchRequest =
                serde_json::from_value(request.arguments).context("invalid launch/attach body")?;
            let callbacks = controller.start(launch_request)?;
            let controller = controller.clone();
            let events_tx = events_tx.clone();
            *dispatch_task = Some(tokio::spawn(async move {
                controller.run_dispatch_loop(callbacks, &events_tx).await;
            }));
            Ok(None)
        }
        "configurationDone" => {
            controller.configuration_done(events_tx)?;
            Ok(None)
        }
        "setBreakpoints" => {
            let file = request
                .arguments
                .get("source")
                .and_then(|s| s.get("path"))
                .and_then(Value::as_str)
                .ok_or_else(|| anyhow!("missing source.path"))?;
            let requests: Vec<(u32, Option<String>)> = request
                .arguments
                .get("breakpoints")
                .and_then(Value::as_array)
                .ok_or_else(|| anyhow!("missing breakpoints array"))?
                .iter()
                .map(|b| {
                    let line = b.get("line").and_then(Value::as_u64).unwrap_or(0) as u32;
                    let condition = b.get("condition").and_then(Value::as_str).map(str::to_string);
                    (line, condition)
                })
                .collect();
            let created = controller.breakpoints().set_line_breakpoints(controller.modules(), file, requests);
            let body: Vec<Value> = created
                .iter()
                .map(|bp| json!({ "id": bp.id, "verified": bp.verified, "line": bp.line }))
                .collect();
            Ok(Some(json!({ "breakpoints": body })))
        }
        "continue" => {
            let thread = thread_arg(&request.arguments).unwrap_or(PROCESS_WIDE_THREAD);
            controller.continue_thread(thread, events_tx)?;
            Ok(Some(json!({ "allThreadsContinued": true })))
        }
        "pause" => {
            controller.pause()?;
            Ok(None)
        }
        "stepIn" => {
            let thread = thread_arg(&request.arguments).ok_or_else(|| anyhow!("missing threadId"))?;
            controller.step(thread, dbg_engine::engine_api::StepKind::In, events_tx)?;
            Ok(None)
        }
        "next" => {
            let thread = thread_arg(&request.arguments).ok_or_else(|| anyhow!("missing threadId"))?;
            controller.step(thread, dbg_engine::engine_api::StepKind::Over, events_tx)?;
            Ok(None)
        }
        "stepOut" => {
            let thread = thread_arg(&request.arguments).ok_or_else(|| anyhow!("missing threadId"))?;
            controller.step(thread, dbg_engine::engine_api::StepKind::Out, events_tx)?;
            Ok(None)
        }
        "stackTrace" => {
            let thread = thread_arg(&request.arguments).ok_or_else(|| anyhow!("missing threadId"))?;
            let frames = controller.stack_trace(thread)?;
            let body: Vec<Value> = frames
                .iter()
                .enumerate()
                .map(|(i, f)| json!({ "id": i, "name": f.function_name.clone().unwrap_or_else(|| "??".to_string()) }))
                .collect();
            Ok(Some(json!({ "stackFrames": body, "totalFrames": body.len() })))
        }
        "variables" => {
            let handle = request
                .arguments
                .get("variablesReference")
                .and_then(Value::as_u64)
                .ok_or_else(|| anyhow!("missing variablesReference"))?;
            let start = request.arguments.get("start").and_then(Value::as_u64).unwrap_or(0) as u32;
            let count = request.arguments.get("count").and_then(Value::as_u64).unwrap_or(0) as u32;
            let thread = thread_arg(&request.arguments)
                .or_else(|| controller.last_stopped_thread())
                .ok_or_else(|| anyhow!("process is not stopped"))?;
            let children = controller.variable_children(
                thread,
                handle,
                dbg_engine::variables::VariableFilter::Both,
                start,
                count,
            )?;
            let body: Vec<Value> = children
                .iter()
                .map(|c| {
                    json!({
                        "name": c.name,
                        "value": c.value_preview,
                        "type": c.type_name,
                        "variablesReference": c.variables_reference,
                    })
                })
                .collect();
            Ok(Some(json!({ "variables": body })))
        }
        "evaluate" => {
            let expression = request
                .arguments
                .get("expression")
                .and_then(Value::as_str)
                .ok_or_else(|| anyhow!("missing expression"))?;
            let thread = thread_arg(&request.arguments)
                .or_else(|| controller.last_stopped_thread())
                .ok_or_else(|| anyhow!("process is not stopped"))?;
            let handle = controller.evaluate_expression(thread, expression)?;
            Ok(Some(json!({ "result": format!("var{handle}"), "variablesReference": handle })))
        }
        "disconnect" => {
            let terminate = request
                .arguments
                .get("terminateDebuggee")
                .and_then(Value::as_bool)
                .unwrap_or(false);
            let action = if terminate { DisconnectAction::Terminate } else { DisconnectAction::Detach };
            controller.disconnect(action)?;
            Ok(None)
        }
        other => Err(anyhow!("unsupported command: {other}")),
    }
}

fn thread_arg(arguments: &Value) -> Option<ThreadId> {
    arguments.get("threadId").and_then(Value::as_u64).map(|id| ThreadId(id as u32))
}

fn render_event(event: &ProtocolEvent, seq: u64) -> Value {
    let (name, body) = match event {
        ProtocolEvent::Initialized => ("initialized", json!({})),
        ProtocolEvent::Stopped { thread, reason, location, breakpoint } => (
            "stopped",
            json!({
                "threadId": thread.0,
                "reason": format!("{reason:?}").to_lowercase(),
                "location": location.as_ref().map(|l| json!({ "file": l.file, "line": l.line, "column": l.column })),
                "hitBreakpointIds": breakpoint.map(|b| vec![b]).unwrap_or_default(),
            }),
        ),
        ProtocolEvent::Continued { thread } => ("continued", json!({ "threadId": thread.0 })),
        ProtocolEvent::Thread { thread, started } => (
            "thread",
            json!({ "threadId": thread.0, "reason": if *started { "started" } else { "exited" } }),
        ),
        ProtocolEvent::Module { module, path, reason } => (
            "module",
            json!({ "moduleId": module.0, "path": path, "reason": format!("{reason:?}").to_lowercase() }),
        ),
        ProtocolEvent::Output { category, text } => ("output", json!({ "category": category, "output": text })),
        ProtocolEvent::Breakpoint { id, verified } => ("breakpoint", json!({ "breakpointId": id, "verified": verified })),
        ProtocolEvent::Exited { exit_code } => ("exited", json!({ "exitCode": exit_code })),
        ProtocolEvent::Terminated => ("terminated", json!({})),
    };
    serde_json::to_value(EventEnvelope { seq, kind: "event", event: name, body }).expect("event envelope serializes")
}

async fn read_request<R: AsyncBufRead + Unpin>(reader: &mut R) -> AnyResult<Option<Request>> {
    let mut content_length: Option<usize> = None;
    loop {
        let mut header = String::new();
        let n = reader.read_line(&mut header).await?;
        if n == 0 {
            return Ok(None);
        }
        let header = header.trim_end();
        if header.is_empty() {
            break;
        }
        if let Some(value) = header.strip_prefix("Content-Length:") {
            content_length = Some(value.trim().parse().context("invalid Content-Length")?);
        }
    }
    let content_length = content_length.ok_or_else(|| anyhow!("missing Content-Length header"))?;
    let mut buf = vec![0u8; content_length];
    tokio::io::AsyncReadExt::read_exact(reader, &mut buf).await?;
    let request: Request = serde_json::from_slice(&buf).context("invalid request JSON")?;
    Ok(Some(request))
}

async fn write_frame<W: AsyncWrite + Unpin>(output: &mut W, value: &Value) -> AnyResult<()> {
    let body = serde_json::to_vec(value)?;
    output.write_all(format!("Content-Length: {}\r\n\r\n", body.len()).as_bytes()).await?;
    output.write_all(&body).await?;
    output.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbg_engine::ids::ModuleId;
    use dbg_engine::protocol_events::{EventLocation, ModuleChangeReason, StopReason};

    #[test]
    fn render_event_names_a_stopped_event() {
        let event = ProtocolEvent::Stopped {
            thread: ThreadId(1),
            reason: StopReason::Breakpoint,
            location: Some(EventLocation { file: "Program.cs".into(), line: 4, column: 1 }),
            breakpoint: Some(9),
        };
        let value = render_event(&event, 1);
        assert_eq!(value["event"], "stopped");
        assert_eq!(value["body"]["threadId"], 1);
        assert_eq!(value["body"]["hitBreakpointIds"][0], 9);
    }

    #[test]
    fn render_event_names_a_module_event() {
        let event = ProtocolEvent::Module {
            module: ModuleId(2),
            path: "/app/Program.dll".into(),
            reason: ModuleChangeReason::New,
        };
        let value = render_event(&event, 1);
        assert_eq!(value["event"], "module");
        assert_eq!(value["body"]["reason"], "new");
    }

    #[tokio::test]
    async fn read_request_parses_a_content_length_framed_body() {
        let body = br#"{"seq":1,"command":"pause"}"#;
        let framed = format!("Content-Length: {}\r\n\r\n", body.len());
        let mut bytes = framed.into_bytes();
        bytes.extend_from_slice(body);
        let mut reader = BufReader::new(&bytes[..]);
        let request = read_request(&mut reader).await.unwrap().unwrap();
        assert_eq!(request.command, "pause");
        assert_eq!(request.seq, 1);
    }

    #[tokio::test]
    async fn read_request_returns_none_at_eof() {
        let mut reader = BufReader::new(&b""[..]);
        assert!(read_request(&mut reader).await.unwrap().is_none());
    }
}
