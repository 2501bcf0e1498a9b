//! Task runner: drives a single [`TaskHandle`] through the lifecycle in `spec.md`
//! §4.1 — input validation, cache consult, streaming-vs-direct dispatch, producer-side
//! accumulation, and status/event-bus bookkeeping.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use serde_json::{Map, Value};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::cancel::CancelToken;
use crate::error::{GraphError, Result};
use crate::events::TaskEvent;
use crate::registry::ServiceRegistry;
use crate::schema::CompiledSchemaCache;
use crate::stream::{StreamEvent, DEFAULT_TEE_BUFFER};
use crate::task::{OwnCallback, ProgressReporter, TaskContext, TaskHandle, TaskStatus};
use taskgraph_store::TaskOutputCache;

/// Default rate limit between non-terminal progress reports (§4.1 "Progress").
pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_millis(200);

/// Everything the scheduler decides on this task's behalf before dispatch.
pub struct RunContext {
    pub services: Arc<ServiceRegistry>,
    pub cancel: CancelToken,
    pub own: OwnCallback,
    pub input_streams: HashMap<String, mpsc::Receiver<StreamEvent>>,
    /// Set by the scheduler per §4.2's accumulation decision.
    pub should_accumulate: bool,
    pub cache: Option<Arc<dyn TaskOutputCache>>,
    pub schema_cache: Arc<CompiledSchemaCache>,
    /// Number of eager downstream consumers waiting on this task's live stream.
    /// Zero means nobody reads live events; the runner then skips creating the
    /// live-event channel entirely rather than risk blocking on an unread send.
    pub eager_consumer_count: usize,
}

/// Handle to an in-flight (or already-finished) task run.
pub struct RunHandle {
    /// Live stream events, present only when the task actually executed the
    /// streaming path and at least one eager consumer is waiting on it.
    pub live_events: Option<mpsc::Receiver<StreamEvent>>,
    pub result: oneshot::Receiver<Result<Value>>,
}

/// Run `handle` to completion under `ctx`, per the §4.1 algorithm.
///
/// Resolves immediately with `live_events: None` for the cache-hit and
/// non-streaming paths; for the streaming path, returns as soon as the live event
/// channel exists so the scheduler can fan it out to eager consumers while the task
/// is still producing.
pub async fn run(handle: Arc<TaskHandle>, mut ctx: RunContext) -> Result<RunHandle> {
    handle.events.emit(TaskEvent::Start);
    handle.set_status(TaskStatus::Processing)?;

    let input = handle.current_input();
    let task = handle.task().clone();
    let compiled = ctx.schema_cache.get_or_compile(task.type_name(), task.input_schema());
    if let Err(reason) = compiled.validate(&input) {
        let err = GraphError::InvalidInput {
            task: handle.id().to_string(),
            reason,
        };
        handle.set_error(err.to_string());
        let _ = handle.set_status(TaskStatus::Failed);
        handle.events.emit(TaskEvent::Error(err.to_string()));
        return Err(err);
    }

    if task.cacheable() {
        if let Some(cache) = &ctx.cache {
            if let Some(cached_output) = cache.get(task.type_name(), &input).await {
                debug!(task = handle.id(), "task output cache hit");
                return replay_cache_hit(handle, ctx, input, cached_output).await;
            }
        }
    }

    let task_context = Arc::new(build_task_context(&handle, &mut ctx));

    if task.supports_streaming() {
        run_streaming(handle, ctx, task, input, task_context).await
    } else {
        run_direct(handle, ctx, task, input, task_context).await
    }
}

fn build_task_context(handle: &Arc<TaskHandle>, ctx: &mut RunContext) -> TaskContext {
    TaskContext {
        cancel: ctx.cancel.clone(),
        services: ctx.services.clone(),
        own: ctx.own.clone(),
        progress: Arc::new(ProgressReporter::new(
            handle.id().to_string(),
            handle.events.clone(),
            DEFAULT_PROGRESS_INTERVAL,
        )),
        input_streams: std::sync::RwLock::new(std::mem::take(&mut ctx.input_streams)),
    }
}

/// §4.1 step 4, hit branch: replay a synthetic `finish` event to preserve the
/// stream-event contract, then run `executeReactive` for a live-preview-consistent
/// final value.
async fn replay_cache_hit(handle: Arc<TaskHandle>, mut ctx: RunContext, input: Value, cached_output: Value) -> Result<RunHandle> {
    handle.set_status(TaskStatus::Streaming)?;
    handle.events.emit(TaskEvent::StreamStart);
    handle.events.emit(TaskEvent::StreamChunk(StreamEvent::Finish {
        data: cached_output.clone(),
    }));
    handle.events.emit(TaskEvent::StreamEnd);

    let task_context = build_task_context(&handle, &mut ctx);
    let output = handle
        .task()
        .execute_reactive(input, Some(&cached_output), &task_context)
        .await?;

    handle.set_output(output.clone());
    handle.set_status(TaskStatus::Completed)?;
    handle.events.emit(TaskEvent::Complete(output.clone()));

    let (tx, rx) = oneshot::channel();
    let _ = tx.send(Ok(output));
    Ok(RunHandle { live_events: None, result: rx })
}

async fn run_direct(
    handle: Arc<TaskHandle>,
    ctx: RunContext,
    task: Arc<dyn crate::task::Task>,
    input: Value,
    task_context: Arc<TaskContext>,
) -> Result<RunHandle> {
    let (tx, rx) = oneshot::channel();
    tokio::spawn(async move {
        let outcome = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => Err(GraphError::Aborted(handle.id().to_string())),
            result = task.execute(input.clone(), &task_context) => result,
        };

        let final_result = match outcome {
            Ok(output) => {
                if task.cacheable() {
                    if let Some(cache) = &ctx.cache {
                        if let Err(err) = cache.put(task.type_name(), &input, output.clone()).await {
                            warn!(task = handle.id(), %err, "task output cache write failed");
                        }
                    }
                }
                handle.set_output(output.clone());
                let _ = handle.set_status(TaskStatus::Completed);
                handle.events.emit(TaskEvent::Complete(output.clone()));
                Ok(output)
            }
            Err(err) => {
                handle.set_error(err.to_string());
                if err.is_aborted() {
                    let _ = handle.set_status(TaskStatus::Aborting);
                }
                let _ = handle.set_status(TaskStatus::Failed);
                handle.events.emit(TaskEvent::Error(err.to_string()));
                Err(err)
            }
        };
        let _ = tx.send(final_result);
    });

    Ok(RunHandle { live_events: None, result: rx })
}

async fn run_streaming(
    handle: Arc<TaskHandle>,
    ctx: RunContext,
    task: Arc<dyn crate::task::Task>,
    input: Value,
    task_context: Arc<TaskContext>,
) -> Result<RunHandle> {
    let should_accumulate = ctx.should_accumulate;
    let eager_consumer_count = ctx.eager_consumer_count;
    let cache = ctx.cache.clone();
    let cancel = ctx.cancel.clone();

    let mut events = task.execute_stream(input.clone(), &task_context).await?;
    handle.set_status(TaskStatus::Streaming)?;
    handle.events.emit(TaskEvent::StreamStart);

    let (live_tx, live_rx) = if eager_consumer_count > 0 {
        let (tx, rx) = mpsc::channel(DEFAULT_TEE_BUFFER);
        (Some(tx), Some(rx))
    } else {
        (None, None)
    };

    let (result_tx, result_rx) = oneshot::channel();
    tokio::spawn(async move {
        let mut accumulators: HashMap<String, String> = HashMap::new();
        let mut final_result: Option<Result<Value>> = None;

        loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    final_result = Some(Err(GraphError::Aborted(handle.id().to_string())));
                    break;
                }
                next = events.next() => match next {
                    Some(event) => event,
                    None => {
                        if final_result.is_none() {
                            final_result = Some(Err(GraphError::Failed {
                                task: handle.id().to_string(),
                                source: anyhow::anyhow!("stream ended without a finish or error event"),
                            }));
                        }
                        break;
                    }
                },
            };

            let forwarded = match &event {
                StreamEvent::TextDelta { port, text_delta } if should_accumulate => {
                    accumulators.entry(port.clone()).or_default().push_str(text_delta);
                    event.clone()
                }
                StreamEvent::Finish { data } if should_accumulate => {
                    let enriched = enrich_finish(data.clone(), &accumulators);
                    final_result = Some(Ok(enriched.clone()));
                    StreamEvent::Finish { data: enriched }
                }
                StreamEvent::Finish { data } => {
                    final_result = Some(Ok(data.clone()));
                    event.clone()
                }
                StreamEvent::Error { err } => {
                    final_result = Some(Err(GraphError::Failed {
                        task: handle.id().to_string(),
                        source: anyhow::anyhow!(err.clone()),
                    }));
                    event.clone()
                }
                _ => event.clone(),
            };

            handle.events.emit(TaskEvent::StreamChunk(forwarded.clone()));
            if let Some(tx) = &live_tx {
                let _ = tx.send(forwarded.clone()).await;
            }

            if forwarded.is_terminal() {
                break;
            }
        }

        handle.events.emit(TaskEvent::StreamEnd);
        let final_result = final_result.unwrap_or_else(|| {
            Err(GraphError::Failed {
                task: handle.id().to_string(),
                source: anyhow::anyhow!("stream produced no terminal event"),
            })
        });

        match &final_result {
            Ok(output) => {
                if task.cacheable() {
                    if let Some(cache) = &cache {
                        if let Err(err) = cache.put(task.type_name(), &input, output.clone()).await {
                            warn!(task = handle.id(), %err, "task output cache write failed");
                        }
                    }
                }
                handle.set_output(output.clone());
                let _ = handle.set_status(TaskStatus::Completed);
                handle.events.emit(TaskEvent::Complete(output.clone()));
            }
            Err(err) => {
                handle.set_error(err.to_string());
                if err.is_aborted() {
                    let _ = handle.set_status(TaskStatus::Aborting);
                }
                let _ = handle.set_status(TaskStatus::Failed);
                handle.events.emit(TaskEvent::Error(err.to_string()));
            }
        }

        let _ = result_tx.send(final_result);
    });

    Ok(RunHandle {
        live_events: live_rx,
        result: result_rx,
    })
}

/// Merge `{port: accumulator}` into `finish.data` for every port that accumulated
/// text deltas (§4.1 "Streaming accumulation").
fn enrich_finish(data: Value, accumulators: &HashMap<String, String>) -> Value {
    if accumulators.is_empty() {
        return data;
    }
    let mut obj = match data {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        other => {
            let mut map = Map::new();
            map.insert("value".to_string(), other);
            map
        }
    };
    for (port, text) in accumulators {
        obj.insert(port.clone(), Value::String(text.clone()));
    }
    Value::Object(obj)
}
