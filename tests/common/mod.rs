//! Shared fakes for integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};

use photogen_tasks::blob::{extension_for, BlobError, BlobPayload, BlobStore};
use photogen_tasks::config::PipelineConfig;
use photogen_tasks::generation::{GeneratedArtifact, GenerationApi, GenerationError};
use photogen_tasks::handler::HandlerRegistry;
use photogen_tasks::store::FailureOutcome;
use photogen_tasks::worker::{InvokeError, WorkerInvoker, WorkerSnapshot};
use photogen_tasks::{
    DispatchOutcome, Dispatcher, DownloadedImage, InMemoryTaskStore, StatePatch, TaskError,
    TaskParams, TaskRecord, TaskStatus, TaskStore,
};

// ─── Blob store ─────────────────────────────────────────────────────────────

/// In-memory blob store that counts calls.
#[derive(Default)]
pub struct MemoryBlobs {
    inputs: HashMap<String, BlobPayload>,
    failing_uploads: HashSet<String>,
    pub downloads: AtomicUsize,
    pub uploads: Mutex<Vec<(String, Vec<u8>, String)>>,
}

impl MemoryBlobs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bytes(mut self, reference: &str, bytes: &[u8]) -> Self {
        self.inputs
            .insert(reference.to_string(), BlobPayload::Bytes(bytes.to_vec()));
        self
    }

    pub fn with_data_uri(mut self, reference: &str, uri: &str) -> Self {
        self.inputs
            .insert(reference.to_string(), BlobPayload::DataUri(uri.to_string()));
        self
    }

    pub fn with_failing_upload(mut self, key_prefix: &str) -> Self {
        self.failing_uploads.insert(key_prefix.to_string());
        self
    }

    pub fn download_count(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }

    pub fn upload_count(&self) -> usize {
        self.uploads.lock().unwrap().len()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobs {
    async fn download(
        &self,
        reference: &photogen_tasks::ImageRef,
    ) -> Result<BlobPayload, BlobError> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        self.inputs
            .get(reference.as_str())
            .cloned()
            .ok_or_else(|| BlobError::NotFound {
                reference: reference.to_string(),
            })
    }

    async fn upload(
        &self,
        key: &str,
        bytes: Vec<u8>,
        mime_type: &str,
    ) -> Result<String, BlobError> {
        if self.failing_uploads.iter().any(|p| key.starts_with(p.as_str())) {
            return Err(BlobError::Invalid {
                reference: key.to_string(),
                message: "upload rejected".to_string(),
            });
        }
        self.uploads
            .lock()
            .unwrap()
            .push((key.to_string(), bytes, mime_type.to_string()));
        Ok(format!(
            "https://blobs.test/results/{key}.{}",
            extension_for(mime_type)
        ))
    }
}

// ─── Task store ─────────────────────────────────────────────────────────────

/// Sleeps before every read so that concurrent callers read the same
/// version before either writes.
pub struct YieldingStore {
    pub inner: Arc<InMemoryTaskStore>,
    pub delay: Duration,
}

impl YieldingStore {
    pub fn new(inner: Arc<InMemoryTaskStore>, delay: Duration) -> Self {
        Self { inner, delay }
    }
}

#[async_trait]
impl TaskStore for YieldingStore {
    async fn create(&self, params: TaskParams) -> Result<TaskRecord, TaskError> {
        self.inner.create(params).await
    }

    async fn get(&self, task_id: &str) -> Result<TaskRecord, TaskError> {
        let record = self.inner.get(task_id).await;
        tokio::time::sleep(self.delay).await;
        record
    }

    async fn commit_transition(
        &self,
        task_id: &str,
        expected_status: TaskStatus,
        new_status: TaskStatus,
        patch: StatePatch,
    ) -> Result<TaskRecord, TaskError> {
        self.inner
            .commit_transition(task_id, expected_status, new_status, patch)
            .await
    }

    async fn record_handoff(
        &self,
        task_id: &str,
        expected_status: TaskStatus,
        expected_version: u64,
    ) -> Result<TaskRecord, TaskError> {
        self.inner
            .record_handoff(task_id, expected_status, expected_version)
            .await
    }

    async fn claim_handoff(&self, task_id: &str, attempt: u32) -> Result<TaskRecord, TaskError> {
        self.inner.claim_handoff(task_id, attempt).await
    }

    async fn record_failure(
        &self,
        task_id: &str,
        expected_status: TaskStatus,
        error: &str,
        max_retries: u32,
    ) -> Result<FailureOutcome, TaskError> {
        self.inner
            .record_failure(task_id, expected_status, error, max_retries)
            .await
    }

    async fn fail(
        &self,
        task_id: &str,
        expected_status: TaskStatus,
        error: &str,
    ) -> Result<TaskRecord, TaskError> {
        self.inner.fail(task_id, expected_status, error).await
    }

    async fn list(&self) -> Result<Vec<TaskRecord>, TaskError> {
        self.inner.list().await
    }
}

// ─── Worker invoker ─────────────────────────────────────────────────────────

/// Records snapshots instead of running a worker.
#[derive(Default)]
pub struct RecordingInvoker {
    pub launched: Mutex<Vec<WorkerSnapshot>>,
}

impl RecordingInvoker {
    pub fn launches(&self) -> Vec<WorkerSnapshot> {
        self.launched.lock().unwrap().clone()
    }
}

#[async_trait]
impl WorkerInvoker for RecordingInvoker {
    async fn invoke(&self, snapshot: WorkerSnapshot) -> Result<(), InvokeError> {
        self.launched.lock().unwrap().push(snapshot);
        Ok(())
    }
}

// ─── Generation API ─────────────────────────────────────────────────────────

/// Fails the first `failures` calls, then echoes the inputs.
pub struct FlakyGenerator {
    failures: usize,
    pub calls: AtomicUsize,
}

impl FlakyGenerator {
    pub fn new(failures: usize) -> Self {
        Self {
            failures,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GenerationApi for FlakyGenerator {
    async fn generate(
        &self,
        images: &[DownloadedImage],
        _params: &Map<String, Value>,
        count: u32,
    ) -> Result<Vec<GeneratedArtifact>, GenerationError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            return Err(GenerationError::Http {
                status: 503,
                body: "model overloaded".to_string(),
            });
        }
        Ok(images
            .iter()
            .cycle()
            .take(count as usize)
            .map(|image| GeneratedArtifact {
                base64_data: image.base64_data.clone(),
                mime_type: image.mime_type.clone(),
            })
            .collect())
    }
}

// ─── Pipeline assembly ──────────────────────────────────────────────────────

/// Config with millisecond backoff so retry loops finish quickly.
pub fn fast_config(max_retries: u32) -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.retry.max_retries = max_retries;
    config.retry.backoff_base_ms = 1;
    config.retry.backoff_max_ms = 5;
    config
}

pub fn dispatcher(
    store: Arc<InMemoryTaskStore>,
    blobs: Arc<MemoryBlobs>,
    invoker: Arc<dyn WorkerInvoker>,
    config: &PipelineConfig,
) -> Dispatcher {
    Dispatcher::new(
        store,
        HandlerRegistry::standard(blobs, config),
        invoker,
        config,
    )
}

/// Dispatches until the outcome is not a plain advance.
pub async fn dispatch_until_blocked(dispatcher: &Dispatcher, task_id: &str) -> DispatchOutcome {
    loop {
        let outcome = dispatcher.dispatch(task_id).await.unwrap();
        if !matches!(outcome, DispatchOutcome::Advanced { .. }) {
            return outcome;
        }
    }
}

pub async fn status_of(store: &InMemoryTaskStore, task_id: &str) -> photogen_tasks::TaskStatus {
    store.get(task_id).await.unwrap().status
}
