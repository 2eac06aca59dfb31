use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        Json,
    },
    routing::{get, post},
    Router,
};
use futures::stream::{self, Stream};
use promptopt_core::progress::{ProgressRecord, RunStatus};

use crate::{
    dto::Result as ApiResult,
    service::{OptimizerService, StartError},
};

/// Interval between progress snapshots on the SSE stream.
const STREAM_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Create optimization router
pub fn create_router() -> Router {
    Router::new()
        .route("/configs/:config_id/run", post(start_run))
        .route("/configs/:config_id/progress", get(get_progress))
        .route("/configs/:config_id/progress/stream", get(stream_progress))
}

/// Start a background optimization run for a config
async fn start_run(
    Extension(service): Extension<Arc<OptimizerService>>,
    Path(config_id): Path<i64>,
) -> Result<(StatusCode, Json<ApiResult>), StatusCode> {
    match service.start_optimization(config_id).await {
        Ok(()) => Ok((
            StatusCode::ACCEPTED,
            Json(ApiResult {
                message: format!("Optimization started for config {}", config_id),
                success: true,
            }),
        )),
        Err(StartError::NotFound(_)) => Err(StatusCode::NOT_FOUND),
        Err(StartError::AlreadyRunning(_)) => Err(StatusCode::CONFLICT),
        Err(StartError::Internal(_)) => Err(StatusCode::INTERNAL_SERVER_ERROR),
    }
}

/// Get the current progress snapshot for a config
async fn get_progress(
    Extension(service): Extension<Arc<OptimizerService>>,
    Path(config_id): Path<i64>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    match service.get_progress(config_id) {
        Some(record) => {
            let record = serde_json::to_value(&record)
                .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
            Ok(Json(record))
        }
        None => Err(StatusCode::NOT_FOUND),
    }
}

struct StreamState {
    service: Arc<OptimizerService>,
    config_id: i64,
    last_payload: Option<String>,
    finished: bool,
}

/// What one poll of the progress tracker means for the stream.
#[derive(Debug, PartialEq)]
enum StreamStep {
    /// The snapshot changed since the last emission.
    Emit { payload: String, terminal: bool },
    /// Nothing new; poll again after the interval.
    Idle,
    /// The terminal snapshot was already emitted; end the stream.
    Close,
}

fn progress_step(record: Option<ProgressRecord>, last_payload: Option<&str>) -> StreamStep {
    let Some(record) = record else {
        return StreamStep::Idle;
    };
    let terminal = matches!(record.status, RunStatus::Completed | RunStatus::Error);
    match serde_json::to_string(&record) {
        Ok(payload) if last_payload != Some(payload.as_str()) => {
            StreamStep::Emit { payload, terminal }
        }
        _ if terminal => StreamStep::Close,
        _ => StreamStep::Idle,
    }
}

/// Stream progress snapshots over SSE until the run reaches a terminal
/// status. Each event carries the full progress record so late joiners
/// never need a separate catch-up request.
async fn stream_progress(
    Extension(service): Extension<Arc<OptimizerService>>,
    Path(config_id): Path<i64>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let state = StreamState {
        service,
        config_id,
        last_payload: None,
        finished: false,
    };

    let stream = stream::unfold(state, |mut state| async move {
        loop {
            if state.finished {
                return None;
            }

            let record = state.service.get_progress(state.config_id);
            match progress_step(record, state.last_payload.as_deref()) {
                StreamStep::Emit { payload, terminal } => {
                    state.last_payload = Some(payload.clone());
                    state.finished = terminal;
                    return Some((Ok(Event::default().data(payload)), state));
                }
                StreamStep::Close => return None,
                StreamStep::Idle => tokio::time::sleep(STREAM_POLL_INTERVAL).await,
            }
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn record(status: RunStatus, message: &str) -> ProgressRecord {
        let now = Utc::now();
        ProgressRecord {
            status,
            current_iteration: 0,
            max_iterations: 10,
            current_score: None,
            best_score: None,
            message: message.to_string(),
            new_prompt_id: None,
            started_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_stream_idles_until_a_record_exists() {
        assert_eq!(progress_step(None, None), StreamStep::Idle);
    }

    #[test]
    fn test_stream_suppresses_unchanged_snapshots() {
        let running = record(RunStatus::Running, "working");

        let StreamStep::Emit { payload, terminal } =
            progress_step(Some(running.clone()), None)
        else {
            panic!("first snapshot must be emitted");
        };
        assert!(!terminal);

        // Same snapshot again: nothing to send.
        assert_eq!(
            progress_step(Some(running.clone()), Some(&payload)),
            StreamStep::Idle
        );

        // A changed snapshot is emitted again.
        let progressed = record(RunStatus::Running, "further along");
        assert!(matches!(
            progress_step(Some(progressed), Some(&payload)),
            StreamStep::Emit { terminal: false, .. }
        ));
    }

    #[test]
    fn test_terminal_snapshot_emitted_once_then_stream_closes() {
        let running = record(RunStatus::Running, "working");
        let StreamStep::Emit { payload, .. } = progress_step(Some(running), None) else {
            panic!("first snapshot must be emitted");
        };

        let done = record(RunStatus::Completed, "done");
        let StreamStep::Emit { payload, terminal } =
            progress_step(Some(done.clone()), Some(&payload))
        else {
            panic!("terminal snapshot must be emitted");
        };
        assert!(terminal);

        // Terminal snapshot already delivered: the stream ends.
        assert_eq!(
            progress_step(Some(done), Some(&payload)),
            StreamStep::Close
        );
    }

    #[test]
    fn test_already_terminal_on_connect_still_gets_one_event() {
        let failed = record(RunStatus::Error, "boom");
        assert!(matches!(
            progress_step(Some(failed), None),
            StreamStep::Emit { terminal: true, .. }
        ));
    }
}
