//! Completion handling: retry, classification and callback delivery.

use std::sync::Arc;

use chrono::Utc;
use netkit_core::{
    ArtifactSummary, DiagnosticsSink, RequestError, RequestState, ResponseMeta,
    TransactionOutcome, TransactionRecord, TransportFailure,
};
use netkit_events::{Event, EventBus};
use tracing::{debug, info, warn};

use crate::container::{Artifact, RequestContainer, announce_state};
use crate::dispatcher::Dispatcher;
use crate::settings::RetrySettings;

/// What happened to a completed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinalizeOutcome {
    /// The request was requeued.
    Retrying {
        /// Delay before re-dispatch.
        delay_ms: u64,
        /// Retries left.
        remaining: u32,
    },
    /// A cancelled download was parked with its resume token.
    Paused,
    /// The success callback ran.
    Succeeded,
    /// The failure callback ran with this kind.
    Failed(RequestError),
}

/// Turns finished transport operations into retries or callbacks.
#[derive(Clone)]
pub struct Finalizer {
    dispatcher: Dispatcher,
    retry: RetrySettings,
    events: EventBus,
    diagnostics: Arc<dyn DiagnosticsSink>,
}

impl Finalizer {
    /// Build a finalizer that requeues through `dispatcher`.
    #[must_use]
    pub fn new(
        dispatcher: Dispatcher,
        retry: RetrySettings,
        events: EventBus,
        diagnostics: Arc<dyn DiagnosticsSink>,
    ) -> Self {
        Self {
            dispatcher,
            retry,
            events,
            diagnostics,
        }
    }

    /// Finalize an attempt. `state` is the state written by
    /// [`RequestContainer::record_completion`]; a control landing after that
    /// write does not change how the attempt is classified.
    pub fn finalize(
        &self,
        container: &Arc<RequestContainer>,
        state: RequestState,
        error: Option<&TransportFailure>,
    ) -> FinalizeOutcome {
        let response = container.response();
        let error_code = error.map(|failure| failure.code);
        let candidate =
            error_code.or_else(|| response.as_ref().map(|meta| i64::from(meta.status.as_u16())));

        if let Some(code) = candidate
            && self.retry.is_retryable(code)
            && let Some(ticket) = container.try_consume_retry(self.retry.backoff_step)
        {
            let delay_ms = u64::try_from(ticket.delay.as_millis()).unwrap_or(u64::MAX);
            self.record(container, response, error_code, TransactionOutcome::Retrying, None);
            if let Some(path) = ticket.discarded {
                tokio::spawn(async move {
                    if let Err(error) = tokio::fs::remove_file(&path).await {
                        debug!(path = %path.display(), error = %error, "stale download not removed");
                    }
                });
            }
            info!(
                request_id = %container.request_id(),
                code,
                remaining = ticket.remaining,
                delay_ms,
                "retry scheduled"
            );
            self.events.publish(Event::RetryScheduled {
                request_id: container.request_id(),
                remaining: ticket.remaining,
                delay_ms,
            });
            self.dispatcher
                .schedule_retry(Arc::clone(container), ticket.delay);
            return FinalizeOutcome::Retrying {
                delay_ms,
                remaining: ticket.remaining,
            };
        }

        let result = match state {
            RequestState::Finished => match &response {
                Some(meta) if meta.is_success() => {
                    container.take_artifact().ok_or(RequestError::Unknown)
                }
                Some(meta) => Err(RequestError::from_status(meta.status)),
                None => Err(RequestError::Unknown),
            },
            RequestState::Failed => {
                if let Some(failure) = error
                    && failure.is_cancelled()
                    && container.park_paused(failure.resume_data.clone())
                {
                    info!(request_id = %container.request_id(), "download parked with resume token");
                    announce_state(&self.events, container);
                    self.events.publish(Event::Paused {
                        request_id: container.request_id(),
                    });
                    return FinalizeOutcome::Paused;
                }
                Err(error.map_or(RequestError::Unknown, TransportFailure::kind))
            }
            _ => Err(RequestError::ClientError),
        };
        self.deliver(container, response, error_code, result)
    }

    /// Deliver a synthesized transport failure without retrying.
    pub fn finalize_paused_task(
        &self,
        container: &Arc<RequestContainer>,
        failure: &TransportFailure,
    ) -> FinalizeOutcome {
        self.deliver(
            container,
            container.response(),
            Some(failure.code),
            Err(failure.kind()),
        )
    }

    /// Deliver `error` for a request that never reached the transport.
    pub fn abort(&self, container: &Arc<RequestContainer>, error: RequestError) -> FinalizeOutcome {
        self.deliver(container, container.response(), None, Err(error))
    }

    fn deliver(
        &self,
        container: &Arc<RequestContainer>,
        response: Option<ResponseMeta>,
        error_code: Option<i64>,
        result: Result<Artifact, RequestError>,
    ) -> FinalizeOutcome {
        let request_id = container.request_id();
        let finalized = match &result {
            Ok(_) => FinalizeOutcome::Succeeded,
            Err(kind) => FinalizeOutcome::Failed(*kind),
        };
        let Some(completion) = container.take_completion() else {
            debug!(request_id = %request_id, "completion already delivered");
            self.dispatcher.remove(request_id);
            return finalized;
        };

        let (outcome, artifact) = match &result {
            Ok(artifact) => (
                TransactionOutcome::Succeeded,
                Some(match artifact {
                    Artifact::Bytes(bytes) => ArtifactSummary::Bytes(bytes.len()),
                    Artifact::File(path) => ArtifactSummary::File(path.clone()),
                }),
            ),
            Err(kind) => (TransactionOutcome::Failed(*kind), None),
        };
        self.record(container, response.clone(), error_code, outcome, artifact);

        let status = response.as_ref().map(|meta| meta.status.as_u16());
        match &result {
            Ok(_) => {
                info!(request_id = %request_id, status = ?status, "request completed");
                self.events.publish(Event::Completed {
                    request_id,
                    status: status.unwrap_or_default(),
                });
            }
            Err(kind) => {
                warn!(request_id = %request_id, kind = kind.as_str(), status = ?status, "request failed");
                self.events.publish(Event::Failed {
                    request_id,
                    kind: kind.as_str().to_string(),
                    status,
                });
            }
        }

        completion.deliver(response, result);
        self.dispatcher.remove(request_id);
        finalized
    }

    fn record(
        &self,
        container: &RequestContainer,
        response: Option<ResponseMeta>,
        error_code: Option<i64>,
        outcome: TransactionOutcome,
        artifact: Option<ArtifactSummary>,
    ) {
        let request = container.request();
        self.diagnostics.record(TransactionRecord {
            request_id: container.request_id(),
            request_type: container.request_type(),
            timestamp: Utc::now(),
            method: request.method.clone(),
            url: request.url.clone(),
            request_headers: request.headers.clone(),
            response,
            error_code,
            outcome,
            artifact,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::tests::{data_container, download_container, wire};
    use crate::container::{Completion, RequestContainer};
    use anyhow::{Result, anyhow};
    use http::StatusCode;
    use netkit_core::{TaskId, transport_code};
    use std::path::PathBuf;
    use std::sync::{Mutex, PoisonError};
    use std::time::Duration;

    #[derive(Default)]
    struct CollectingSink {
        records: Mutex<Vec<TransactionRecord>>,
    }

    impl DiagnosticsSink for CollectingSink {
        fn record(&self, record: TransactionRecord) {
            self.records
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(record);
        }
    }

    impl CollectingSink {
        fn outcomes(&self) -> Vec<TransactionOutcome> {
            self.records
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .iter()
                .map(|record| record.outcome)
                .collect()
        }
    }

    struct Harness {
        finalizer: Finalizer,
        dispatcher: Dispatcher,
        sink: Arc<CollectingSink>,
        events: EventBus,
        _queue: tokio::sync::mpsc::Receiver<Arc<RequestContainer>>,
    }

    fn harness(codes: &[i64]) -> Harness {
        let (dispatcher, queue) = Dispatcher::new(8);
        let sink = Arc::new(CollectingSink::default());
        let events = EventBus::with_capacity(32);
        let retry = RetrySettings {
            codes: codes.iter().copied().collect(),
            max_retry: 2,
            backoff_step: Duration::from_secs(2),
            initial_backoff: Duration::ZERO,
        };
        let diagnostics: Arc<dyn DiagnosticsSink> = sink.clone();
        Harness {
            finalizer: Finalizer::new(dispatcher.clone(), retry, events.clone(), diagnostics),
            dispatcher,
            sink,
            events,
            _queue: queue,
        }
    }

    type Seen<T> = Arc<Mutex<Vec<(Option<ResponseMeta>, Result<T, RequestError>)>>>;

    fn recording_data(url: &str, budget: u32) -> Result<(Arc<RequestContainer>, Seen<Vec<u8>>)> {
        let seen: Seen<Vec<u8>> = Arc::default();
        let sink = Arc::clone(&seen);
        let container = RequestContainer::new(
            wire(url)?,
            Completion::Data(Box::new(move |response, result| {
                sink.lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push((response, result));
            })),
            budget,
            Duration::ZERO,
        );
        Ok((Arc::new(container), seen))
    }

    fn seen_results<T: Clone>(seen: &Seen<T>) -> Vec<Result<T, RequestError>> {
        seen.lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, result)| result.clone())
            .collect()
    }

    #[tokio::test]
    async fn success_delivers_body_and_removes() -> Result<()> {
        let harness = harness(&[]);
        let (container, seen) = recording_data("https://example.test/a", 0)?;
        harness.dispatcher.admit(Arc::clone(&container))?;
        container.mark_started(TaskId(1));
        container.append_received(b"payload");
        let state = container.record_completion(Some(ResponseMeta::new(StatusCode::OK)), false);

        let outcome = harness.finalizer.finalize(&container, state, None);
        assert_eq!(outcome, FinalizeOutcome::Succeeded);
        assert_eq!(seen_results(&seen), vec![Ok(b"payload".to_vec())]);
        assert!(harness.dispatcher.is_empty());
        assert_eq!(harness.sink.outcomes(), vec![TransactionOutcome::Succeeded]);
        Ok(())
    }

    #[tokio::test]
    async fn status_codes_map_to_kinds() -> Result<()> {
        for (status, kind) in [
            (StatusCode::MOVED_PERMANENTLY, RequestError::Redirection),
            (StatusCode::NOT_FOUND, RequestError::ClientError),
            (StatusCode::BAD_GATEWAY, RequestError::ServerError),
        ] {
            let harness = harness(&[]);
            let (container, seen) = recording_data("https://example.test/a", 0)?;
            let state = container.record_completion(Some(ResponseMeta::new(status)), false);
            assert_eq!(
                harness.finalizer.finalize(&container, state, None),
                FinalizeOutcome::Failed(kind)
            );
            assert_eq!(seen_results(&seen), vec![Err(kind)]);
        }
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn retryable_status_requeues_until_budget_is_spent() -> Result<()> {
        let harness = harness(&[503]);
        let mut events = harness.events.subscribe(None);
        let (container, seen) = recording_data("https://example.test/a", 2)?;
        harness.dispatcher.admit(Arc::clone(&container))?;

        let mut delays = Vec::new();
        for _ in 0..2 {
            let state = container.record_completion(Some(ResponseMeta::new(StatusCode::SERVICE_UNAVAILABLE)), false);
            match harness.finalizer.finalize(&container, state, None) {
                FinalizeOutcome::Retrying { delay_ms, .. } => delays.push(delay_ms),
                other => return Err(anyhow!("expected retry, got {other:?}")),
            }
            assert_eq!(container.state(), RequestState::Submitted);
        }
        assert_eq!(delays, vec![0, 2_000]);
        assert!(seen_results(&seen).is_empty());

        let state = container.record_completion(Some(ResponseMeta::new(StatusCode::SERVICE_UNAVAILABLE)), false);
        assert_eq!(
            harness.finalizer.finalize(&container, state, None),
            FinalizeOutcome::Failed(RequestError::ServerError)
        );
        assert_eq!(seen_results(&seen), vec![Err(RequestError::ServerError)]);
        assert_eq!(
            harness.sink.outcomes(),
            vec![
                TransactionOutcome::Retrying,
                TransactionOutcome::Retrying,
                TransactionOutcome::Failed(RequestError::ServerError)
            ]
        );

        let first = events.next().await.ok_or_else(|| anyhow!("no event"))?;
        assert!(matches!(
            first.event,
            Event::RetryScheduled {
                remaining: 1,
                delay_ms: 0,
                ..
            }
        ));
        Ok(())
    }

    #[tokio::test]
    async fn transport_code_wins_over_status_for_retry() -> Result<()> {
        let harness = harness(&[transport_code::TIMED_OUT]);
        let (container, _seen) = recording_data("https://example.test/a", 1)?;
        harness.dispatcher.admit(Arc::clone(&container))?;
        let state = container.record_completion(Some(ResponseMeta::new(StatusCode::OK)), true);
        let failure = TransportFailure::new(transport_code::TIMED_OUT, "timed out");
        assert!(matches!(
            harness.finalizer.finalize(&container, state, Some(&failure)),
            FinalizeOutcome::Retrying { remaining: 0, .. }
        ));
        Ok(())
    }

    #[tokio::test]
    async fn transport_failures_map_to_kinds() -> Result<()> {
        let harness = harness(&[]);
        let (container, seen) = recording_data("https://example.test/a", 0)?;
        let state = container.record_completion(None, true);
        let failure = TransportFailure::new(transport_code::NOT_CONNECTED_TO_INTERNET, "offline");
        harness.finalizer.finalize(&container, state, Some(&failure));
        assert_eq!(
            seen_results(&seen),
            vec![Err(RequestError::NotConnectedToInternet)]
        );
        Ok(())
    }

    #[tokio::test]
    async fn cancelled_download_with_token_parks_without_callback() -> Result<()> {
        let harness = harness(&[]);
        let container = Arc::new(download_container("https://example.test/file", 0)?);
        harness.dispatcher.admit(Arc::clone(&container))?;
        container.mark_started(TaskId(4));
        let state = container.record_completion(None, true);
        let failure = TransportFailure::cancelled().with_resume_data(b"token".to_vec());

        assert_eq!(
            harness.finalizer.finalize(&container, state, Some(&failure)),
            FinalizeOutcome::Paused
        );
        assert!(harness.dispatcher.contains(container.request_id()));
        assert!(container.snapshot().has_resume_data);
        assert!(container.take_completion().is_some());
        assert!(harness.sink.outcomes().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn cancelled_data_request_is_user_cancelled() -> Result<()> {
        let harness = harness(&[]);
        let (container, seen) = recording_data("https://example.test/a", 0)?;
        let state = container.record_completion(None, true);
        let failure = TransportFailure::cancelled().with_resume_data(b"ignored".to_vec());
        harness.finalizer.finalize(&container, state, Some(&failure));
        assert_eq!(seen_results(&seen), vec![Err(RequestError::UserCancelled)]);
        Ok(())
    }

    #[tokio::test]
    async fn download_without_file_is_unknown() -> Result<()> {
        let harness = harness(&[]);
        let seen: Seen<PathBuf> = Arc::default();
        let sink = Arc::clone(&seen);
        let container = Arc::new(RequestContainer::new(
            wire("https://example.test/file")?,
            Completion::Download(Box::new(move |response, result| {
                sink.lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push((response, result));
            })),
            0,
            Duration::ZERO,
        ));
        let state = container.record_completion(Some(ResponseMeta::new(StatusCode::OK)), false);
        harness.finalizer.finalize(&container, state, None);
        assert_eq!(seen_results(&seen), vec![Err(RequestError::Unknown)]);
        Ok(())
    }

    #[tokio::test]
    async fn unexpected_state_is_client_error() -> Result<()> {
        let harness = harness(&[]);
        let (container, seen) = recording_data("https://example.test/a", 0)?;
        harness
            .finalizer
            .finalize(&container, RequestState::Running, None);
        assert_eq!(seen_results(&seen), vec![Err(RequestError::ClientError)]);
        Ok(())
    }

    #[tokio::test]
    async fn cancel_after_completion_keeps_the_recorded_outcome() -> Result<()> {
        let harness = harness(&[]);
        let (container, seen) = recording_data("https://example.test/a", 0)?;
        harness.dispatcher.admit(Arc::clone(&container))?;
        container.mark_started(TaskId(2));
        container.append_received(b"done");
        let state = container.record_completion(Some(ResponseMeta::new(StatusCode::OK)), false);
        container.set_state(RequestState::Cancelled);

        assert_eq!(
            harness.finalizer.finalize(&container, state, None),
            FinalizeOutcome::Succeeded
        );
        assert_eq!(seen_results(&seen), vec![Ok(b"done".to_vec())]);
        assert!(harness.dispatcher.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn callbacks_fire_at_most_once() -> Result<()> {
        let harness = harness(&[]);
        let (container, seen) = recording_data("https://example.test/a", 0)?;
        let state = container.record_completion(Some(ResponseMeta::new(StatusCode::OK)), false);
        harness.finalizer.finalize(&container, state, None);
        harness.finalizer.abort(&container, RequestError::UserCancelled);
        assert_eq!(seen_results(&seen).len(), 1);
        assert_eq!(harness.sink.outcomes(), vec![TransactionOutcome::Succeeded]);
        Ok(())
    }

    #[tokio::test]
    async fn paused_task_finalization_delivers_code_kind() -> Result<()> {
        let harness = harness(&[]);
        let container = Arc::new(data_container("https://example.test/a", 0)?);
        harness.dispatcher.admit(Arc::clone(&container))?;
        assert_eq!(
            harness
                .finalizer
                .finalize_paused_task(&container, &TransportFailure::cancelled()),
            FinalizeOutcome::Failed(RequestError::UserCancelled)
        );
        assert!(harness.dispatcher.is_empty());
        let records = harness.sink.records.lock().unwrap_or_else(PoisonError::into_inner);
        assert_eq!(records[0].error_code, Some(transport_code::CANCELLED));
        Ok(())
    }
}
