//! Dispatcher behaviour against the in-memory store with fake blob storage
//! and a recording worker invoker.

mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use common::{
    dispatch_until_blocked, dispatcher, fast_config, status_of, FlakyGenerator, MemoryBlobs,
    RecordingInvoker, YieldingStore,
};
use photogen_tasks::blob::{BlobError, BlobPayload, BlobStore};
use photogen_tasks::handler::HandlerRegistry;
use photogen_tasks::worker::{
    GenerationWorker, InvokeError, QueueTrigger, WorkerInvoker, WorkerOutcome, WorkerSnapshot,
};
use photogen_tasks::{
    DispatchOutcome, Dispatcher, ImageRef, InMemoryTaskStore, StatePatch, TaskParams, TaskStatus,
    TaskStore,
};

const PIXEL: &[u8] = b"\x89PNG fake pixel";

fn params(refs: &[&str]) -> TaskParams {
    TaskParams::new(refs.iter().map(|r| ImageRef::from(*r)))
}

/// Delays every download so concurrent dispatches overlap.
struct SlowBlobs {
    inner: MemoryBlobs,
    delay: Duration,
}

#[async_trait]
impl BlobStore for SlowBlobs {
    async fn download(&self, reference: &ImageRef) -> Result<BlobPayload, BlobError> {
        tokio::time::sleep(self.delay).await;
        self.inner.download(reference).await
    }

    async fn upload(&self, key: &str, bytes: Vec<u8>, mime: &str) -> Result<String, BlobError> {
        self.inner.upload(key, bytes, mime).await
    }
}

struct BrokenInvoker;

#[async_trait]
impl WorkerInvoker for BrokenInvoker {
    async fn invoke(&self, _snapshot: WorkerSnapshot) -> Result<(), InvokeError> {
        Err(InvokeError("worker pool unavailable".to_string()))
    }
}

// ─── Created / Downloading ──────────────────────────────────────────────────

mod downloading {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn created_advances_to_downloading() {
        let store = Arc::new(InMemoryTaskStore::new());
        let blobs = Arc::new(MemoryBlobs::new());
        let invoker = Arc::new(RecordingInvoker::default());
        let dispatcher = dispatcher(Arc::clone(&store), blobs, invoker, &fast_config(3));

        let task = store.create(params(&["a.png"])).await.unwrap();
        let outcome = dispatcher.dispatch(&task.id).await.unwrap();

        assert_eq!(
            outcome,
            DispatchOutcome::Advanced {
                from: TaskStatus::Created,
                to: TaskStatus::Downloading,
            }
        );
        assert_eq!(status_of(&store, &task.id).await, TaskStatus::Downloading);
    }

    #[tokio::test]
    async fn every_reference_becomes_one_downloaded_image() {
        let store = Arc::new(InMemoryTaskStore::new());
        let blobs = Arc::new(
            MemoryBlobs::new()
                .with_bytes("a.png", PIXEL)
                .with_bytes("b.png", PIXEL)
                .with_bytes("c.png", PIXEL),
        );
        let invoker = Arc::new(RecordingInvoker::default());
        let dispatcher = dispatcher(
            Arc::clone(&store),
            Arc::clone(&blobs),
            invoker,
            &fast_config(3),
        );

        let task = store
            .create(params(&["a.png", "b.png", "c.png"]))
            .await
            .unwrap();
        dispatch_until_blocked(&dispatcher, &task.id).await;

        let record = store.get(&task.id).await.unwrap();
        let ids: Vec<_> = record
            .state_data
            .downloaded()
            .iter()
            .map(|d| d.file_id.as_str())
            .collect();
        assert_eq!(ids, vec!["a.png", "b.png", "c.png"]);
        assert_eq!(blobs.download_count(), 3);
    }

    #[tokio::test]
    async fn empty_input_list_downloads_nothing() {
        let store = Arc::new(InMemoryTaskStore::new());
        let blobs = Arc::new(MemoryBlobs::new());
        let invoker = Arc::new(RecordingInvoker::default());
        let dispatcher = dispatcher(
            Arc::clone(&store),
            Arc::clone(&blobs),
            Arc::clone(&invoker) as Arc<dyn WorkerInvoker>,
            &fast_config(3),
        );

        let task = store.create(params(&[])).await.unwrap();
        dispatcher.dispatch(&task.id).await.unwrap();
        let outcome = dispatcher.dispatch(&task.id).await.unwrap();

        assert_eq!(
            outcome,
            DispatchOutcome::Advanced {
                from: TaskStatus::Downloading,
                to: TaskStatus::Downloaded,
            }
        );
        let record = store.get(&task.id).await.unwrap();
        assert_eq!(record.state_data.downloaded_images, Some(vec![]));
        assert_eq!(blobs.download_count(), 0);
    }

    #[tokio::test]
    async fn partial_failures_are_skipped() {
        let store = Arc::new(InMemoryTaskStore::new());
        let blobs = Arc::new(MemoryBlobs::new().with_bytes("good.png", PIXEL));
        let invoker = Arc::new(RecordingInvoker::default());
        let dispatcher = dispatcher(Arc::clone(&store), blobs, invoker, &fast_config(3));

        let task = store
            .create(params(&["missing.png", "good.png"]))
            .await
            .unwrap();
        dispatch_until_blocked(&dispatcher, &task.id).await;

        let record = store.get(&task.id).await.unwrap();
        assert_eq!(record.state_data.downloaded().len(), 1);
        assert_eq!(record.state_data.downloaded()[0].file_id, "good.png");
    }

    #[tokio::test]
    async fn data_uri_and_raw_inputs_normalise_identically() {
        use base64::engine::general_purpose::STANDARD;
        use base64::Engine as _;

        let encoded = STANDARD.encode(PIXEL);
        let store = Arc::new(InMemoryTaskStore::new());
        let blobs = Arc::new(
            MemoryBlobs::new()
                .with_bytes("raw", PIXEL)
                .with_data_uri("uri", &format!("data:image/jpeg;base64,{encoded}")),
        );
        let invoker = Arc::new(RecordingInvoker::default());
        let dispatcher = dispatcher(Arc::clone(&store), blobs, invoker, &fast_config(3));

        let task = store.create(params(&["raw", "uri"])).await.unwrap();
        dispatch_until_blocked(&dispatcher, &task.id).await;

        let record = store.get(&task.id).await.unwrap();
        let [raw, uri] = record.state_data.downloaded() else {
            panic!("expected two downloads");
        };
        assert_eq!(raw.base64_data, encoded);
        assert_eq!(raw.base64_data, uri.base64_data);
        assert_eq!(raw.mime_type, "image/jpeg");
        assert_eq!(uri.mime_type, "image/jpeg");
    }

    #[tokio::test]
    async fn all_downloads_failing_retries_then_fails() {
        let store = Arc::new(InMemoryTaskStore::new());
        let blobs = Arc::new(MemoryBlobs::new());
        let invoker = Arc::new(RecordingInvoker::default());
        let dispatcher = dispatcher(
            Arc::clone(&store),
            Arc::clone(&blobs),
            invoker,
            &fast_config(3),
        );

        let task = store
            .create(params(&["gone-1.png", "gone-2.png"]))
            .await
            .unwrap();
        dispatcher.dispatch(&task.id).await.unwrap();

        for attempt in 1..3 {
            let outcome = dispatcher.dispatch(&task.id).await.unwrap();
            assert!(
                matches!(outcome, DispatchOutcome::RetryScheduled { attempt: a, .. } if a == attempt),
                "attempt {attempt}: {outcome:?}"
            );
            assert_eq!(status_of(&store, &task.id).await, TaskStatus::Downloading);
        }

        let outcome = dispatcher.dispatch(&task.id).await.unwrap();
        let DispatchOutcome::Failed { error } = outcome else {
            panic!("expected Failed, got {outcome:?}");
        };
        assert!(error.contains("all 2 items failed during downloading"));
        assert_eq!(status_of(&store, &task.id).await, TaskStatus::Failed);
        assert_eq!(blobs.download_count(), 6);

        assert_eq!(
            dispatcher.dispatch(&task.id).await.unwrap(),
            DispatchOutcome::Finished {
                status: TaskStatus::Failed
            }
        );
    }

    #[tokio::test]
    async fn retry_hint_grows_with_each_attempt() {
        let store = Arc::new(InMemoryTaskStore::new());
        let blobs = Arc::new(MemoryBlobs::new());
        let invoker = Arc::new(RecordingInvoker::default());
        let mut config = fast_config(5);
        config.retry.backoff_base_ms = 100;
        config.retry.backoff_max_ms = 300;
        let dispatcher = dispatcher(Arc::clone(&store), blobs, invoker, &config);

        let task = store.create(params(&["gone.png"])).await.unwrap();
        dispatcher.dispatch(&task.id).await.unwrap();

        let mut hints = Vec::new();
        for _ in 0..3 {
            if let DispatchOutcome::RetryScheduled { retry_after, .. } =
                dispatcher.dispatch(&task.id).await.unwrap()
            {
                hints.push(retry_after.as_millis());
            }
        }
        assert_eq!(hints, vec![100, 200, 300]);
    }

    #[tokio::test]
    async fn slow_downloads_time_out_and_consume_a_retry() {
        let store = Arc::new(InMemoryTaskStore::new());
        let blobs = Arc::new(SlowBlobs {
            inner: MemoryBlobs::new().with_bytes("a.png", PIXEL),
            delay: Duration::from_millis(500),
        });
        let mut config = fast_config(3);
        config.budgets.downloading_ms = 20;
        let dispatcher = Dispatcher::new(
            Arc::clone(&store) as Arc<dyn TaskStore>,
            HandlerRegistry::standard(blobs, &config),
            Arc::new(RecordingInvoker::default()),
            &config,
        );

        let task = store.create(params(&["a.png"])).await.unwrap();
        dispatcher.dispatch(&task.id).await.unwrap();
        let outcome = dispatcher.dispatch(&task.id).await.unwrap();

        assert!(matches!(outcome, DispatchOutcome::RetryScheduled { attempt: 1, .. }));
        let record = store.get(&task.id).await.unwrap();
        assert_eq!(record.status, TaskStatus::Downloading);
        assert_eq!(record.retry_count, 1);
        assert!(record.state_data.downloaded_images.is_none());
    }

    #[tokio::test]
    async fn invalid_params_never_reach_the_dispatcher() {
        let store = InMemoryTaskStore::new();
        let err = store
            .create(params(&["a.png"]).with_count(0))
            .await
            .unwrap_err();
        assert!(matches!(err, photogen_tasks::TaskError::InvalidParams { .. }));
        assert!(store.list().await.unwrap().is_empty());
    }
}

// ─── Concurrency ────────────────────────────────────────────────────────────

mod concurrency {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn overlapping_dispatches_commit_once() {
        let store = Arc::new(InMemoryTaskStore::new());
        let blobs = Arc::new(SlowBlobs {
            inner: MemoryBlobs::new().with_bytes("a.png", PIXEL),
            delay: Duration::from_millis(10),
        });
        let config = fast_config(3);
        let dispatcher = Dispatcher::new(
            Arc::clone(&store) as Arc<dyn TaskStore>,
            HandlerRegistry::standard(blobs, &config),
            Arc::new(RecordingInvoker::default()),
            &config,
        );

        let task = store.create(params(&["a.png"])).await.unwrap();
        dispatcher.dispatch(&task.id).await.unwrap();

        let (first, second) = tokio::join!(
            dispatcher.dispatch(&task.id),
            dispatcher.dispatch(&task.id)
        );
        let mut outcomes = vec![first.unwrap(), second.unwrap()];
        outcomes.sort_by_key(|o| matches!(o, DispatchOutcome::Superseded));

        assert_eq!(
            outcomes,
            vec![
                DispatchOutcome::Advanced {
                    from: TaskStatus::Downloading,
                    to: TaskStatus::Downloaded,
                },
                DispatchOutcome::Superseded,
            ]
        );
        let record = store.get(&task.id).await.unwrap();
        assert_eq!(record.state_data.downloaded().len(), 1);
        assert_eq!(record.version, 3);
    }

    #[tokio::test]
    async fn stale_dispatch_after_advance_is_harmless() {
        let store = Arc::new(InMemoryTaskStore::new());
        let blobs = Arc::new(MemoryBlobs::new().with_bytes("a.png", PIXEL));
        let invoker = Arc::new(RecordingInvoker::default());
        let dispatcher = dispatcher(Arc::clone(&store), blobs, invoker, &fast_config(3));

        let task = store.create(params(&["a.png"])).await.unwrap();
        dispatcher.dispatch(&task.id).await.unwrap();
        dispatcher.dispatch(&task.id).await.unwrap();
        let before = store.get(&task.id).await.unwrap();

        // a trigger that observed `downloading` arrives late
        let late = store
            .commit_transition(
                &task.id,
                TaskStatus::Downloading,
                TaskStatus::Downloaded,
                StatePatch::Downloaded(vec![]),
            )
            .await;
        assert!(late.unwrap_err().is_conflict());
        assert_eq!(store.get(&task.id).await.unwrap(), before);
    }

    /// Dispatcher over a store whose reads yield, with the task walked to
    /// `downloaded`.
    async fn racing_dispatcher(
        invoker: Arc<RecordingInvoker>,
    ) -> (Arc<InMemoryTaskStore>, Arc<dyn TaskStore>, Dispatcher, String) {
        let inner = Arc::new(InMemoryTaskStore::new());
        let store: Arc<dyn TaskStore> = Arc::new(YieldingStore::new(
            Arc::clone(&inner),
            Duration::from_millis(5),
        ));
        let config = fast_config(3);
        let blobs = Arc::new(MemoryBlobs::new().with_bytes("a.png", PIXEL));
        let dispatcher = Dispatcher::new(
            Arc::clone(&store),
            HandlerRegistry::standard(blobs, &config),
            invoker,
            &config,
        );

        let task = inner
            .create(params(&["a.png"]).with_count(2))
            .await
            .unwrap();
        dispatcher.dispatch(&task.id).await.unwrap();
        dispatcher.dispatch(&task.id).await.unwrap();
        assert_eq!(status_of(&inner, &task.id).await, TaskStatus::Downloaded);
        (inner, store, dispatcher, task.id)
    }

    #[tokio::test]
    async fn overlapping_handoffs_launch_one_worker() {
        let invoker = Arc::new(RecordingInvoker::default());
        let (inner, _store, dispatcher, id) = racing_dispatcher(Arc::clone(&invoker)).await;

        let (first, second) = tokio::join!(dispatcher.dispatch(&id), dispatcher.dispatch(&id));
        let mut outcomes = vec![first.unwrap(), second.unwrap()];
        outcomes.sort_by_key(|o| matches!(o, DispatchOutcome::Superseded));

        assert_eq!(
            outcomes,
            vec![
                DispatchOutcome::HandedOff {
                    stage: TaskStatus::Downloaded,
                    dispatch_count: 1,
                },
                DispatchOutcome::Superseded,
            ]
        );
        assert_eq!(invoker.launches().len(), 1);
        let record = inner.get(&id).await.unwrap();
        assert_eq!(record.state_data.handoff.unwrap().dispatch_count, 1);
    }

    #[tokio::test]
    async fn overlapping_relaunches_generate_once() {
        let invoker = Arc::new(RecordingInvoker::default());
        let (inner, store, dispatcher, id) = racing_dispatcher(Arc::clone(&invoker)).await;
        let generator = Arc::new(FlakyGenerator::new(1));
        let (trigger, _queue) = QueueTrigger::channel();
        let worker = GenerationWorker::new(
            Arc::clone(&store),
            Arc::clone(&generator) as _,
            Arc::new(trigger),
            &fast_config(3),
        );

        dispatcher.dispatch(&id).await.unwrap();
        let first_launch = invoker.launches().remove(0);
        assert_eq!(
            worker.run(first_launch).await.unwrap(),
            WorkerOutcome::RetryPending { attempt: 1 }
        );

        let (a, b) = tokio::join!(dispatcher.dispatch(&id), dispatcher.dispatch(&id));
        let mut outcomes = vec![a.unwrap(), b.unwrap()];
        outcomes.sort_by_key(|o| matches!(o, DispatchOutcome::Superseded));
        assert_eq!(
            outcomes,
            vec![
                DispatchOutcome::HandedOff {
                    stage: TaskStatus::Generating,
                    dispatch_count: 2,
                },
                DispatchOutcome::Superseded,
            ]
        );

        let launches = invoker.launches();
        assert_eq!(launches.len(), 2);
        let relaunch = launches[1].clone();
        assert_eq!(relaunch.attempt, 1);

        // a redelivered launch must not generate twice
        let (a, b) = tokio::join!(worker.run(relaunch.clone()), worker.run(relaunch));
        let mut runs = vec![a.unwrap(), b.unwrap()];
        runs.sort_by_key(|o| matches!(o, WorkerOutcome::Superseded));
        assert_eq!(
            runs,
            vec![
                WorkerOutcome::Generated { artifacts: 2 },
                WorkerOutcome::Superseded,
            ]
        );
        assert_eq!(generator.call_count(), 2);
        assert_eq!(status_of(&inner, &id).await, TaskStatus::Generated);
    }
}

// ─── Worker hand-off ────────────────────────────────────────────────────────

mod handoff {
    use super::*;
    use pretty_assertions::assert_eq;

    async fn downloaded_task(
        store: &Arc<InMemoryTaskStore>,
        invoker: Arc<dyn WorkerInvoker>,
    ) -> (Dispatcher, String) {
        let blobs = Arc::new(MemoryBlobs::new().with_bytes("a.png", PIXEL));
        let dispatcher = dispatcher(Arc::clone(store), blobs, invoker, &fast_config(3));
        let task = store
            .create(params(&["a.png"]).with_count(2))
            .await
            .unwrap();
        dispatcher.dispatch(&task.id).await.unwrap();
        dispatcher.dispatch(&task.id).await.unwrap();
        (dispatcher, task.id)
    }

    #[tokio::test]
    async fn downloaded_launches_a_worker_without_changing_status() {
        let store = Arc::new(InMemoryTaskStore::new());
        let invoker = Arc::new(RecordingInvoker::default());
        let (dispatcher, id) =
            downloaded_task(&store, Arc::clone(&invoker) as Arc<dyn WorkerInvoker>).await;

        let outcome = dispatcher.dispatch(&id).await.unwrap();
        assert_eq!(
            outcome,
            DispatchOutcome::HandedOff {
                stage: TaskStatus::Downloaded,
                dispatch_count: 1,
            }
        );

        let record = store.get(&id).await.unwrap();
        assert_eq!(record.status, TaskStatus::Downloaded);
        assert_eq!(record.state_data.handoff.as_ref().unwrap().dispatch_count, 1);

        let launches = invoker.launches();
        assert_eq!(launches.len(), 1);
        assert_eq!(launches[0].task_id, id);
        assert_eq!(launches[0].stage, TaskStatus::Downloaded);
        assert_eq!(launches[0].params.count, 2);
        assert_eq!(launches[0].downloaded_images, record.state_data.downloaded());
    }

    #[tokio::test]
    async fn generating_waits_for_the_in_flight_worker() {
        let store = Arc::new(InMemoryTaskStore::new());
        let invoker = Arc::new(RecordingInvoker::default());
        let (dispatcher, id) =
            downloaded_task(&store, Arc::clone(&invoker) as Arc<dyn WorkerInvoker>).await;
        dispatcher.dispatch(&id).await.unwrap();

        // the worker claims the task
        store
            .commit_transition(&id, TaskStatus::Downloaded, TaskStatus::Generating, StatePatch::Empty)
            .await
            .unwrap();

        let outcome = dispatcher.dispatch(&id).await.unwrap();
        assert_eq!(
            outcome,
            DispatchOutcome::AwaitingWorker {
                status: TaskStatus::Generating
            }
        );
        assert_eq!(invoker.launches().len(), 1);
    }

    #[tokio::test]
    async fn generating_relaunches_after_a_recorded_worker_failure() {
        let store = Arc::new(InMemoryTaskStore::new());
        let invoker = Arc::new(RecordingInvoker::default());
        let (dispatcher, id) =
            downloaded_task(&store, Arc::clone(&invoker) as Arc<dyn WorkerInvoker>).await;
        dispatcher.dispatch(&id).await.unwrap();
        store
            .commit_transition(&id, TaskStatus::Downloaded, TaskStatus::Generating, StatePatch::Empty)
            .await
            .unwrap();
        store
            .record_failure(&id, TaskStatus::Generating, "model overloaded", 3)
            .await
            .unwrap();

        let outcome = dispatcher.dispatch(&id).await.unwrap();
        assert_eq!(
            outcome,
            DispatchOutcome::HandedOff {
                stage: TaskStatus::Generating,
                dispatch_count: 2,
            }
        );
        let launches = invoker.launches();
        assert_eq!(launches.len(), 2);
        assert_eq!(launches[1].stage, TaskStatus::Generating);
        assert_eq!(launches[1].attempt, 1);

        // the relaunched worker is in flight again
        assert_eq!(
            dispatcher.dispatch(&id).await.unwrap(),
            DispatchOutcome::AwaitingWorker {
                status: TaskStatus::Generating
            }
        );
    }

    #[tokio::test]
    async fn launch_failure_consumes_a_retry() {
        let store = Arc::new(InMemoryTaskStore::new());
        let (dispatcher, id) = downloaded_task(&store, Arc::new(BrokenInvoker)).await;

        let outcome = dispatcher.dispatch(&id).await.unwrap();
        assert!(matches!(outcome, DispatchOutcome::RetryScheduled { attempt: 1, .. }));

        let record = store.get(&id).await.unwrap();
        assert_eq!(record.status, TaskStatus::Downloaded);
        assert_eq!(record.retry_count, 1);

        dispatcher.dispatch(&id).await.unwrap();
        let outcome = dispatcher.dispatch(&id).await.unwrap();
        let DispatchOutcome::Failed { error } = outcome else {
            panic!("expected Failed, got {outcome:?}");
        };
        assert!(error.contains("worker pool unavailable"));
    }

    #[tokio::test]
    async fn generated_without_artifacts_is_invalid() {
        let store = Arc::new(InMemoryTaskStore::new());
        let invoker = Arc::new(RecordingInvoker::default());
        let (dispatcher, id) =
            downloaded_task(&store, Arc::clone(&invoker) as Arc<dyn WorkerInvoker>).await;
        store
            .commit_transition(&id, TaskStatus::Downloaded, TaskStatus::Generating, StatePatch::Empty)
            .await
            .unwrap();
        store
            .commit_transition(&id, TaskStatus::Generating, TaskStatus::Generated, StatePatch::Empty)
            .await
            .unwrap();

        let outcome = dispatcher.dispatch(&id).await.unwrap();
        let DispatchOutcome::Failed { error } = outcome else {
            panic!("expected Failed, got {outcome:?}");
        };
        assert!(error.starts_with("invalid task:"));
        let record = store.get(&id).await.unwrap();
        assert_eq!(record.status, TaskStatus::Failed);
        assert_eq!(record.retry_count, 0);
    }
}

// ─── Uploading ──────────────────────────────────────────────────────────────

mod uploading {
    use super::*;
    use pretty_assertions::assert_eq;
    use photogen_tasks::GeneratedImage;

    fn artifact(id: &str) -> GeneratedImage {
        GeneratedImage {
            artifact_id: id.to_string(),
            base64_data: "iVBORw0KGgo=".to_string(),
            mime_type: "image/png".to_string(),
        }
    }

    async fn generated_task(store: &InMemoryTaskStore, artifacts: Vec<GeneratedImage>) -> String {
        let task = store.create(params(&[])).await.unwrap();
        let steps = [
            (TaskStatus::Created, TaskStatus::Downloading, StatePatch::Empty),
            (TaskStatus::Downloading, TaskStatus::Downloaded, StatePatch::Downloaded(vec![])),
            (TaskStatus::Downloaded, TaskStatus::Generating, StatePatch::Empty),
            (TaskStatus::Generating, TaskStatus::Generated, StatePatch::Generated(artifacts)),
        ];
        for (from, to, patch) in steps {
            store
                .commit_transition(&task.id, from, to, patch)
                .await
                .unwrap();
        }
        task.id
    }

    #[tokio::test]
    async fn generated_artifacts_are_uploaded_and_completed() {
        let store = Arc::new(InMemoryTaskStore::new());
        let blobs = Arc::new(MemoryBlobs::new());
        let invoker = Arc::new(RecordingInvoker::default());
        let dispatcher = dispatcher(
            Arc::clone(&store),
            Arc::clone(&blobs),
            invoker,
            &fast_config(3),
        );
        let id = generated_task(&store, vec![artifact("g1"), artifact("g2")]).await;

        let outcome = dispatch_until_blocked(&dispatcher, &id).await;
        assert_eq!(
            outcome,
            DispatchOutcome::Finished {
                status: TaskStatus::Completed
            }
        );

        let record = store.get(&id).await.unwrap();
        let urls: Vec<_> = record
            .state_data
            .uploaded()
            .iter()
            .map(|u| u.url.as_str())
            .collect();
        assert_eq!(
            urls,
            vec![
                "https://blobs.test/results/g1.png",
                "https://blobs.test/results/g2.png"
            ]
        );
        assert_eq!(blobs.upload_count(), 2);
        assert_eq!(record.state_data.generated().len(), 2);
    }

    #[tokio::test]
    async fn rejected_uploads_are_skipped_unless_all_fail() {
        let store = Arc::new(InMemoryTaskStore::new());
        let blobs = Arc::new(MemoryBlobs::new().with_failing_upload("bad"));
        let invoker = Arc::new(RecordingInvoker::default());
        let dispatcher = dispatcher(
            Arc::clone(&store),
            Arc::clone(&blobs),
            invoker,
            &fast_config(1),
        );

        let mixed = generated_task(&store, vec![artifact("bad-1"), artifact("ok-1")]).await;
        dispatch_until_blocked(&dispatcher, &mixed).await;
        let record = store.get(&mixed).await.unwrap();
        assert_eq!(record.status, TaskStatus::Completed);
        assert_eq!(record.state_data.uploaded().len(), 1);

        let doomed = generated_task(&store, vec![artifact("bad-2")]).await;
        let outcome = dispatch_until_blocked(&dispatcher, &doomed).await;
        assert!(matches!(outcome, DispatchOutcome::Failed { .. }));
        assert_eq!(status_of(&store, &doomed).await, TaskStatus::Failed);
    }
}
