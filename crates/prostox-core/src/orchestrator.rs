//! Batch orchestrator: drives eligible items through the model adapter.
//!
//! Eligible items are split into consecutive groups of `batch_size`. Groups
//! run strictly one after another with a fixed pacing delay in between;
//! inside a group every item is a separate tokio task. Each task writes its
//! own result back to the registry by id, so one item's failure never
//! touches its siblings.

use crate::config::BatchConfig;
use crate::credentials::CredentialStore;
use crate::error::{BatchError, ProcessError, ProcessResult};
use crate::parser;
use crate::provider::{resolve_env_var, AdapterRegistry, ImageInput, ModelAdapter, VisionRequest};
use crate::registry::{ItemRegistry, SourceRef};
use crate::types::{Metadata, ModelId, StateKind};
use futures_util::future::join_all;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Default number of items dispatched together.
pub const DEFAULT_BATCH_SIZE: usize = 5;

/// Default wait between groups.
pub const DEFAULT_PACING_DELAY: Duration = Duration::from_millis(1000);

/// Tuning for a batch run.
#[derive(Debug, Clone)]
pub struct BatchOptions {
    /// Items in flight per group
    pub batch_size: usize,
    /// Wait between consecutive groups
    pub pacing_delay: Duration,
    /// Upper bound for one provider call
    pub request_timeout: Duration,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            pacing_delay: DEFAULT_PACING_DELAY,
            request_timeout: Duration::from_secs(60),
        }
    }
}

impl From<&BatchConfig> for BatchOptions {
    fn from(config: &BatchConfig) -> Self {
        Self {
            batch_size: config.batch_size.max(1),
            pacing_delay: Duration::from_millis(config.pacing_delay_ms),
            request_timeout: Duration::from_millis(config.request_timeout_ms),
        }
    }
}

/// How one item settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOutcome {
    Done { id: Uuid, metadata: Metadata },
    Failed { id: Uuid, message: String },
}

impl ItemOutcome {
    pub fn id(&self) -> Uuid {
        match self {
            ItemOutcome::Done { id, .. } | ItemOutcome::Failed { id, .. } => *id,
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, ItemOutcome::Done { .. })
    }
}

/// Totals for one orchestrator call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub groups: usize,
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub elapsed: Duration,
}

/// Everything a task needs to process one item, resolved once per call.
#[derive(Clone)]
struct Dispatch {
    model: ModelId,
    adapter: Arc<dyn ModelAdapter>,
    credential_id: Uuid,
    secret: Arc<str>,
    timeout: Duration,
}

/// Concurrency-bounded batch runner over the item and credential stores.
pub struct Orchestrator {
    registry: Arc<ItemRegistry>,
    credentials: Arc<CredentialStore>,
    adapters: Arc<AdapterRegistry>,
    options: BatchOptions,
}

impl Orchestrator {
    pub fn new(
        registry: Arc<ItemRegistry>,
        credentials: Arc<CredentialStore>,
        adapters: Arc<AdapterRegistry>,
        options: BatchOptions,
    ) -> Self {
        Self {
            registry,
            credentials,
            adapters,
            options,
        }
    }

    pub fn options(&self) -> &BatchOptions {
        &self.options
    }

    /// Process every `Pending` or `Error` item with `model`.
    pub async fn process_all(&self, model: ModelId) -> Result<BatchSummary, BatchError> {
        self.process_all_with(model, |_| {}).await
    }

    /// Like [`Orchestrator::process_all`], calling `on_result` as each item
    /// settles.
    pub async fn process_all_with<F>(
        &self,
        model: ModelId,
        on_result: F,
    ) -> Result<BatchSummary, BatchError>
    where
        F: Fn(ItemOutcome) + Send + Sync + 'static,
    {
        self.run(model, &[StateKind::Pending, StateKind::Error], on_result)
            .await
    }

    /// Re-run only the items currently in `Error`.
    pub async fn retry_failed(&self, model: ModelId) -> Result<BatchSummary, BatchError> {
        self.retry_failed_with(model, |_| {}).await
    }

    pub async fn retry_failed_with<F>(
        &self,
        model: ModelId,
        on_result: F,
    ) -> Result<BatchSummary, BatchError>
    where
        F: Fn(ItemOutcome) + Send + Sync + 'static,
    {
        self.run(model, &[StateKind::Error], on_result).await
    }

    /// Process a single item outside of batch context.
    ///
    /// Works on any item that is not already processing, including `Done`
    /// items the user explicitly asks to regenerate.
    pub async fn retry_one(&self, id: Uuid, model: ModelId) -> Result<ItemOutcome, BatchError> {
        if self.registry.get(id).is_none() {
            return Err(BatchError::ItemNotFound(id));
        }
        let dispatch = self.prepare(model)?;
        let source = self.registry.begin(id)?;
        tracing::debug!("Retrying {id} with {model}");
        Ok(settle(&self.registry, &self.credentials, &dispatch, id, source).await)
    }

    /// Check preconditions and resolve adapter + credential.
    fn prepare(&self, model: ModelId) -> Result<Dispatch, BatchError> {
        let credential = self
            .credentials
            .select(model)
            .ok_or(BatchError::CredentialRequired(model))?;
        let secret = resolve_env_var(&credential.secret).ok_or_else(|| {
            tracing::warn!(
                "Credential {} for {model} references an unset environment variable",
                credential.label()
            );
            BatchError::CredentialRequired(model)
        })?;
        let adapter = self
            .adapters
            .get(model)
            .ok_or(BatchError::AdapterMissing(model))?;

        Ok(Dispatch {
            model,
            adapter,
            credential_id: credential.id,
            secret: Arc::from(secret),
            timeout: self.options.request_timeout,
        })
    }

    async fn run<F>(
        &self,
        model: ModelId,
        kinds: &[StateKind],
        on_result: F,
    ) -> Result<BatchSummary, BatchError>
    where
        F: Fn(ItemOutcome) + Send + Sync + 'static,
    {
        let dispatch = self.prepare(model)?;
        let eligible = self.registry.ids_in(kinds);
        if eligible.is_empty() {
            return Err(BatchError::NoWorkItems);
        }

        let batch_size = self.options.batch_size.max(1);
        let group_count = eligible.len().div_ceil(batch_size);
        tracing::info!(
            "Processing {} image(s) with {model} in {group_count} group(s) of up to {batch_size}",
            eligible.len()
        );

        let on_result = Arc::new(on_result);
        let start = Instant::now();
        let mut summary = BatchSummary::default();

        for (index, group) in eligible.chunks(batch_size).enumerate() {
            if index > 0 && !self.options.pacing_delay.is_zero() {
                tokio::time::sleep(self.options.pacing_delay).await;
            }

            // Claim the whole group before any task starts.
            let claimed = self.registry.begin_group(group, kinds);
            tracing::debug!(
                "Group {}/{group_count}: dispatching {} item(s)",
                index + 1,
                claimed.len()
            );

            let (succeeded, failed) = self.run_group(claimed, &dispatch, &on_result).await;
            summary.groups += 1;
            summary.attempted += succeeded + failed;
            summary.succeeded += succeeded;
            summary.failed += failed;
        }

        summary.elapsed = start.elapsed();
        if summary.failed > 0 {
            tracing::warn!(
                "{model}: {} succeeded, {} failed in {:.1}s",
                summary.succeeded,
                summary.failed,
                summary.elapsed.as_secs_f64()
            );
        } else {
            tracing::info!(
                "{model}: {} succeeded in {:.1}s",
                summary.succeeded,
                summary.elapsed.as_secs_f64()
            );
        }
        Ok(summary)
    }

    /// Spawn one task per claimed item and wait for all of them.
    ///
    /// Returns `(succeeded, failed)` counts.
    async fn run_group<F>(
        &self,
        claimed: Vec<(Uuid, SourceRef)>,
        dispatch: &Dispatch,
        on_result: &Arc<F>,
    ) -> (usize, usize)
    where
        F: Fn(ItemOutcome) + Send + Sync + 'static,
    {
        let handles: Vec<_> = claimed
            .into_iter()
            .map(|(id, source)| {
                let registry = self.registry.clone();
                let credentials = self.credentials.clone();
                let dispatch = dispatch.clone();
                let on_result = on_result.clone();
                let delivered = Arc::new(AtomicBool::new(false));
                let task_delivered = delivered.clone();

                let handle = tokio::spawn(async move {
                    let outcome = settle(&registry, &credentials, &dispatch, id, source).await;
                    let success = outcome.is_done();
                    task_delivered.store(true, Ordering::SeqCst);
                    on_result(outcome);
                    success
                });
                async move { (id, delivered, handle.await) }
            })
            .collect();

        let mut succeeded = 0usize;
        let mut failed = 0usize;
        for (id, delivered, joined) in join_all(handles).await {
            match joined {
                Ok(true) => succeeded += 1,
                Ok(false) => failed += 1,
                Err(e) => {
                    tracing::error!("Processing task for {id} panicked: {e}");
                    // The registry, not the task, says how the item settled.
                    match self.registry.get(id).map(|item| item.kind()) {
                        Some(StateKind::Done) => {
                            succeeded += 1;
                            continue;
                        }
                        Some(StateKind::Processing) => {
                            let message = format!("Processing task failed: {e}");
                            if let Err(write_err) = self.registry.fail(id, message.clone()) {
                                tracing::warn!("Could not record failure for {id}: {write_err}");
                            }
                            if !delivered.load(Ordering::SeqCst) {
                                on_result(ItemOutcome::Failed { id, message });
                            }
                        }
                        _ => {}
                    }
                    failed += 1;
                }
            }
        }
        (succeeded, failed)
    }
}

/// Process one claimed item and write the result back.
async fn settle(
    registry: &ItemRegistry,
    credentials: &Arc<CredentialStore>,
    dispatch: &Dispatch,
    id: Uuid,
    source: SourceRef,
) -> ItemOutcome {
    match process_item(dispatch, &source).await {
        Ok(metadata) => {
            if let Err(e) = registry.complete(id, metadata.clone()) {
                tracing::warn!("Dropping result for {id}: {e}");
                return ItemOutcome::Failed {
                    id,
                    message: e.to_string(),
                };
            }
            // Usage is persisted with blocking file IO.
            let store = credentials.clone();
            let credential_id = dispatch.credential_id;
            match tokio::task::spawn_blocking(move || store.record_usage(credential_id)).await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => tracing::warn!("Failed to record credential usage: {e}"),
                Err(e) => tracing::warn!("Credential usage task failed: {e}"),
            }
            ItemOutcome::Done { id, metadata }
        }
        Err(e) => {
            let message = e.to_string();
            tracing::warn!("{} failed for {id}: {message}", dispatch.model);
            if let Err(write_err) = registry.fail(id, message.clone()) {
                tracing::warn!("Could not record failure for {id}: {write_err}");
            }
            ItemOutcome::Failed { id, message }
        }
    }
}

/// Read, encode, invoke and parse. Every failure is scoped to this item.
async fn process_item(dispatch: &Dispatch, source: &SourceRef) -> ProcessResult<Metadata> {
    let bytes = source.read().await?;
    let image = ImageInput::from_bytes(&bytes, &source.format());
    let request = VisionRequest::stock_metadata(image, dispatch.model.api_model());

    let raw = match tokio::time::timeout(
        dispatch.timeout,
        dispatch.adapter.invoke(&request, &dispatch.secret),
    )
    .await
    {
        Ok(result) => result?,
        Err(_) => {
            return Err(ProcessError::Timeout {
                timeout_ms: dispatch.timeout.as_millis() as u64,
            })
        }
    };

    Ok(parser::parse(&raw)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ActivationPolicy;
    use crate::error::ParseError;
    use async_trait::async_trait;
    use std::path::PathBuf;
    use std::sync::atomic::AtomicU32;
    use std::sync::Mutex;

    const GOOD_REPLY: &str = r#"Here you go: {"title": "Red Barn", "keywords": ["barn", " farm "], "category": "Nature"}"#;

    #[derive(Debug, Clone, PartialEq)]
    enum Event {
        Start(String),
        End(String),
    }

    type ResponseFn = Box<dyn Fn(&VisionRequest) -> ProcessResult<String> + Send + Sync>;

    /// A configurable mock adapter.
    ///
    /// The response factory sees the request, so tests can fail specific
    /// images by matching on their encoded bytes.
    struct MockAdapter {
        response_fn: ResponseFn,
        call_count: Arc<AtomicU32>,
        delay: Option<Duration>,
        /// (in_flight, max_concurrent)
        in_flight: (Arc<AtomicU32>, Arc<AtomicU32>),
        events: Arc<Mutex<Vec<Event>>>,
        secrets: Arc<Mutex<Vec<String>>>,
    }

    impl MockAdapter {
        fn with_fn(response_fn: ResponseFn) -> Self {
            Self {
                response_fn,
                call_count: Arc::new(AtomicU32::new(0)),
                delay: None,
                in_flight: (Arc::new(AtomicU32::new(0)), Arc::new(AtomicU32::new(0))),
                events: Arc::new(Mutex::new(Vec::new())),
                secrets: Arc::new(Mutex::new(Vec::new())),
            }
        }

        fn replying(text: &str) -> Self {
            let text = text.to_string();
            Self::with_fn(Box::new(move |_: &VisionRequest| Ok(text.clone())))
        }

        /// Fails for images whose single byte is in `bad`, succeeds otherwise.
        fn failing_for(bad: &[u8]) -> Self {
            let bad: Vec<String> = bad.iter().map(|b| encoded(*b)).collect();
            Self::with_fn(Box::new(move |request: &VisionRequest| {
                if bad.contains(&request.image.data) {
                    Err(ProcessError::Transport {
                        message: "OpenAI API Error: server exploded".to_string(),
                        status_code: Some(500),
                    })
                } else {
                    Ok(GOOD_REPLY.to_string())
                }
            }))
        }

        fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }
    }

    #[async_trait]
    impl ModelAdapter for MockAdapter {
        fn name(&self) -> &str {
            "mock"
        }

        async fn invoke(&self, request: &VisionRequest, secret: &str) -> ProcessResult<String> {
            self.call_count.fetch_add(1, Ordering::SeqCst);
            self.secrets.lock().unwrap().push(secret.to_string());
            self.events
                .lock()
                .unwrap()
                .push(Event::Start(request.image.data.clone()));
            let (in_flight, max_concurrent) = &self.in_flight;
            let current = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            max_concurrent.fetch_max(current, Ordering::SeqCst);

            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            let result = (self.response_fn)(request);

            in_flight.fetch_sub(1, Ordering::SeqCst);
            self.events
                .lock()
                .unwrap()
                .push(Event::End(request.image.data.clone()));
            result
        }
    }

    fn encoded(byte: u8) -> String {
        ImageInput::from_bytes(&[byte], "jpeg").data
    }

    fn memory_source(byte: u8) -> SourceRef {
        SourceRef::Memory {
            bytes: Arc::from(vec![byte].into_boxed_slice()),
            format: "jpeg".to_string(),
        }
    }

    struct Harness {
        registry: Arc<ItemRegistry>,
        credentials: Arc<CredentialStore>,
        orchestrator: Arc<Orchestrator>,
        call_count: Arc<AtomicU32>,
        max_concurrent: Arc<AtomicU32>,
        events: Arc<Mutex<Vec<Event>>>,
        secrets: Arc<Mutex<Vec<String>>>,
    }

    fn fast_options(batch_size: usize) -> BatchOptions {
        BatchOptions {
            batch_size,
            pacing_delay: Duration::ZERO,
            request_timeout: Duration::from_secs(5),
        }
    }

    fn harness(adapter: MockAdapter, model: ModelId, options: BatchOptions) -> Harness {
        let call_count = adapter.call_count.clone();
        let max_concurrent = adapter.in_flight.1.clone();
        let events = adapter.events.clone();
        let secrets = adapter.secrets.clone();

        let mut adapters = AdapterRegistry::new();
        adapters.register(model, Arc::new(adapter));

        let registry = Arc::new(ItemRegistry::new());
        let credentials = Arc::new(CredentialStore::in_memory(ActivationPolicy::Single));
        let orchestrator = Arc::new(Orchestrator::new(
            registry.clone(),
            credentials.clone(),
            Arc::new(adapters),
            options,
        ));
        Harness {
            registry,
            credentials,
            orchestrator,
            call_count,
            max_concurrent,
            events,
            secrets,
        }
    }

    fn add_items(registry: &ItemRegistry, count: u8) -> Vec<Uuid> {
        (0..count)
            .map(|i| registry.add(format!("img{i}.jpg"), memory_source(i)))
            .collect()
    }

    /// Metadata is present exactly when done; a message exactly when failed.
    fn assert_state_invariants(registry: &ItemRegistry) {
        for item in registry.snapshot() {
            assert_eq!(item.kind() == StateKind::Done, item.metadata().is_some());
            assert_eq!(item.kind() == StateKind::Error, item.error_message().is_some());
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_process_all_success() {
        let model = ModelId::Gpt4o;
        let h = harness(MockAdapter::replying(GOOD_REPLY), model, fast_options(5));
        let added = h.credentials.add(model, "sk-test", None).unwrap();
        let ids = add_items(&h.registry, 3);

        let summary = h.orchestrator.process_all(model).await.unwrap();

        assert_eq!(summary.groups, 1);
        assert_eq!(summary.attempted, 3);
        assert_eq!(summary.succeeded, 3);
        assert_eq!(summary.failed, 0);
        for id in ids {
            let item = h.registry.get(id).unwrap();
            let metadata = item.metadata().unwrap();
            assert_eq!(metadata.title, "Red Barn");
            assert_eq!(metadata.keywords, vec!["barn", "farm"]);
        }
        let cred = h.credentials.select(model).unwrap();
        assert_eq!(cred.requests_made, 3);
        assert!(cred.last_used_at.is_some());
        assert!(h.secrets.lock().unwrap().iter().all(|s| s == "sk-test"));
        assert_eq!(cred.id, added.id);
        assert_state_invariants(&h.registry);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_credential_required_touches_nothing() {
        let model = ModelId::Claude35Sonnet;
        let h = harness(MockAdapter::replying(GOOD_REPLY), model, fast_options(5));
        let ids = add_items(&h.registry, 2);
        // A key for a different model does not count
        h.credentials.add(ModelId::Gpt4o, "sk", None).unwrap();

        let err = h.orchestrator.process_all(model).await.unwrap_err();
        assert!(matches!(err, BatchError::CredentialRequired(m) if m == model));
        assert_eq!(h.call_count.load(Ordering::SeqCst), 0);
        for id in ids {
            assert_eq!(h.registry.get(id).unwrap().kind(), StateKind::Pending);
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_unset_env_secret_is_credential_required() {
        let model = ModelId::Gpt4o;
        let h = harness(MockAdapter::replying(GOOD_REPLY), model, fast_options(5));
        h.credentials
            .add(model, "${PROSTOX_TEST_KEY_THAT_IS_NEVER_SET}", None)
            .unwrap();
        add_items(&h.registry, 1);

        let err = h.orchestrator.process_all(model).await.unwrap_err();
        assert!(matches!(err, BatchError::CredentialRequired(_)));
        assert_eq!(h.call_count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_no_work_items() {
        let model = ModelId::Gpt4o;
        let h = harness(MockAdapter::replying(GOOD_REPLY), model, fast_options(5));
        h.credentials.add(model, "sk", None).unwrap();

        let err = h.orchestrator.process_all(model).await.unwrap_err();
        assert!(matches!(err, BatchError::NoWorkItems));

        // Only done items left
        add_items(&h.registry, 2);
        h.orchestrator.process_all(model).await.unwrap();
        let err = h.orchestrator.process_all(model).await.unwrap_err();
        assert!(matches!(err, BatchError::NoWorkItems));
        assert_eq!(h.call_count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_adapter_missing() {
        let h = harness(
            MockAdapter::replying(GOOD_REPLY),
            ModelId::Gpt4o,
            fast_options(5),
        );
        h.credentials.add(ModelId::Gpt4oMini, "sk", None).unwrap();
        add_items(&h.registry, 1);

        let err = h.orchestrator.process_all(ModelId::Gpt4oMini).await.unwrap_err();
        assert!(matches!(err, BatchError::AdapterMissing(ModelId::Gpt4oMini)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_failure_isolated_within_group() {
        let model = ModelId::Gpt4o;
        let h = harness(MockAdapter::failing_for(&[1]), model, fast_options(5));
        h.credentials.add(model, "sk", None).unwrap();
        let ids = add_items(&h.registry, 3);

        let summary = h.orchestrator.process_all(model).await.unwrap();

        assert_eq!(summary.succeeded, 2);
        assert_eq!(summary.failed, 1);
        let x = h.registry.get(ids[1]).unwrap();
        assert_eq!(x.kind(), StateKind::Error);
        assert!(x.error_message().unwrap().contains("server exploded"));
        assert_eq!(h.registry.get(ids[0]).unwrap().kind(), StateKind::Done);
        assert_eq!(h.registry.get(ids[2]).unwrap().kind(), StateKind::Done);
        // Usage counts only successes
        assert_eq!(h.credentials.select(model).unwrap().requests_made, 2);
        assert_state_invariants(&h.registry);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_groups_run_in_sequence() {
        let model = ModelId::Gemini20Flash;
        let adapter = MockAdapter::replying(GOOD_REPLY).with_delay(Duration::from_millis(30));
        let h = harness(adapter, model, fast_options(5));
        h.credentials.add(model, "g-key", None).unwrap();
        add_items(&h.registry, 12);

        let summary = h.orchestrator.process_all(model).await.unwrap();

        assert_eq!(summary.groups, 3);
        assert_eq!(h.call_count.load(Ordering::SeqCst), 12);
        assert!(h.max_concurrent.load(Ordering::SeqCst) <= 5);

        // When the (k*5+1)-th call starts, all k*5 earlier calls have ended.
        let events = h.events.lock().unwrap();
        let mut started = 0usize;
        let mut ended = 0usize;
        for event in events.iter() {
            match event {
                Event::Start(_) => {
                    if started % 5 == 0 {
                        assert_eq!(ended, started, "group started before previous settled");
                    }
                    started += 1;
                }
                Event::End(_) => ended += 1,
            }
        }
        assert_eq!((started, ended), (12, 12));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_groups_preserve_insertion_order() {
        let model = ModelId::Gpt4o;
        let adapter = MockAdapter::replying(GOOD_REPLY);
        let h = harness(adapter, model, fast_options(2));
        h.credentials.add(model, "sk", None).unwrap();
        add_items(&h.registry, 6);

        h.orchestrator.process_all(model).await.unwrap();

        // Each group holds the next two items in insertion order.
        let events = h.events.lock().unwrap();
        let starts: Vec<&String> = events
            .iter()
            .filter_map(|e| match e {
                Event::Start(data) => Some(data),
                Event::End(_) => None,
            })
            .collect();
        for (group, pair) in starts.chunks(2).enumerate() {
            let mut got: Vec<String> = pair.iter().map(|s| s.to_string()).collect();
            got.sort();
            let mut want = vec![encoded(group as u8 * 2), encoded(group as u8 * 2 + 1)];
            want.sort();
            assert_eq!(got, want);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_pacing_only_between_groups() {
        let model = ModelId::Gpt4o;
        let options = BatchOptions {
            batch_size: 5,
            pacing_delay: Duration::from_millis(1000),
            request_timeout: Duration::from_secs(5),
        };
        let h = harness(MockAdapter::replying(GOOD_REPLY), model, options);
        h.credentials.add(model, "sk", None).unwrap();
        add_items(&h.registry, 11);

        let start = tokio::time::Instant::now();
        let summary = h.orchestrator.process_all(model).await.unwrap();
        let elapsed = start.elapsed();

        assert_eq!(summary.groups, 3);
        // Two gaps, no trailing wait
        assert!(elapsed >= Duration::from_millis(2000), "{elapsed:?}");
        assert!(elapsed < Duration::from_millis(3000), "{elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_undersized_single_group_has_no_pacing() {
        let model = ModelId::Gpt4o;
        let options = BatchOptions {
            batch_size: 10,
            pacing_delay: Duration::from_millis(1000),
            request_timeout: Duration::from_secs(5),
        };
        let h = harness(MockAdapter::replying(GOOD_REPLY), model, options);
        h.credentials.add(model, "sk", None).unwrap();
        add_items(&h.registry, 3);

        let start = tokio::time::Instant::now();
        let summary = h.orchestrator.process_all(model).await.unwrap();

        assert_eq!(summary.groups, 1);
        assert_eq!(summary.succeeded, 3);
        assert!(start.elapsed() < Duration::from_millis(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_marks_item_failed() {
        let model = ModelId::Gpt4o;
        let adapter = MockAdapter::replying(GOOD_REPLY).with_delay(Duration::from_secs(5));
        let options = BatchOptions {
            request_timeout: Duration::from_millis(50),
            ..fast_options(5)
        };
        let h = harness(adapter, model, options);
        h.credentials.add(model, "sk", None).unwrap();
        let ids = add_items(&h.registry, 1);

        h.orchestrator.process_all(model).await.unwrap();

        let item = h.registry.get(ids[0]).unwrap();
        assert!(item.error_message().unwrap().contains("timed out after 50ms"));
        assert_eq!(h.credentials.select(model).unwrap().requests_made, 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_malformed_reply_marks_item_failed() {
        let model = ModelId::Claude35Sonnet;
        let h = harness(
            MockAdapter::replying("Sorry, I can't help with that."),
            model,
            fast_options(5),
        );
        h.credentials.add(model, "sk-ant", None).unwrap();
        let ids = add_items(&h.registry, 1);

        let summary = h.orchestrator.process_all(model).await.unwrap();

        assert_eq!(summary.failed, 1);
        let message = h.registry.get(ids[0]).unwrap().error_message().unwrap().to_string();
        assert!(message.contains("Failed to parse AI response"), "{message}");
        assert!(message.contains("No JSON found"), "{message}");
        assert_eq!(h.credentials.select(model).unwrap().requests_made, 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_empty_content_is_malformed() {
        let model = ModelId::Gpt4o;
        let adapter =
            MockAdapter::with_fn(Box::new(|_: &VisionRequest| {
            Err(ParseError::EmptyResponse.into())
        }));
        let h = harness(adapter, model, fast_options(5));
        h.credentials.add(model, "sk", None).unwrap();
        let ids = add_items(&h.registry, 1);

        h.orchestrator.process_all(model).await.unwrap();

        let message = h.registry.get(ids[0]).unwrap().error_message().unwrap().to_string();
        assert_eq!(message, "Failed to parse AI response: Empty response");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_unreadable_source_never_reaches_adapter() {
        let model = ModelId::Gpt4o;
        let h = harness(MockAdapter::replying(GOOD_REPLY), model, fast_options(5));
        h.credentials.add(model, "sk", None).unwrap();
        let good = h.registry.add("ok.jpg", memory_source(7));
        let ghost = h
            .registry
            .add_path(&PathBuf::from("/nonexistent/path/ghost.jpg"));

        let summary = h.orchestrator.process_all(model).await.unwrap();

        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(h.call_count.load(Ordering::SeqCst), 1);
        assert_eq!(h.registry.get(good).unwrap().kind(), StateKind::Done);
        let message = h.registry.get(ghost).unwrap().error_message().unwrap().to_string();
        assert!(message.contains("Failed to read image"), "{message}");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_retry_failed_only_touches_errors() {
        let model = ModelId::Gpt4o;
        let h = harness(MockAdapter::failing_for(&[0]), model, fast_options(5));
        h.credentials.add(model, "sk", None).unwrap();
        let ids = add_items(&h.registry, 2);
        h.orchestrator.process_all(model).await.unwrap();
        let late = h.registry.add("late.jpg", memory_source(9));
        let calls_before = h.call_count.load(Ordering::SeqCst);

        let summary = h.orchestrator.retry_failed(model).await.unwrap();

        // Only the failed item was retried (and failed again)
        assert_eq!(summary.attempted, 1);
        assert_eq!(h.call_count.load(Ordering::SeqCst), calls_before + 1);
        assert_eq!(h.registry.get(ids[0]).unwrap().kind(), StateKind::Error);
        assert_eq!(h.registry.get(ids[1]).unwrap().kind(), StateKind::Done);
        assert_eq!(h.registry.get(late).unwrap().kind(), StateKind::Pending);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_retry_failed_without_errors() {
        let model = ModelId::Gpt4o;
        let h = harness(MockAdapter::replying(GOOD_REPLY), model, fast_options(5));
        h.credentials.add(model, "sk", None).unwrap();
        add_items(&h.registry, 2);

        let err = h.orchestrator.retry_failed(model).await.unwrap_err();
        assert!(matches!(err, BatchError::NoWorkItems));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_retry_one_recovers_failed_item() {
        let model = ModelId::Gpt4o;
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();
        let adapter = MockAdapter::with_fn(Box::new(move |_: &VisionRequest| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(ProcessError::Transport {
                    message: "rate limited".to_string(),
                    status_code: Some(429),
                })
            } else {
                Ok(GOOD_REPLY.to_string())
            }
        }));
        let h = harness(adapter, model, fast_options(5));
        h.credentials.add(model, "sk", None).unwrap();
        let ids = add_items(&h.registry, 1);
        h.orchestrator.process_all(model).await.unwrap();
        assert_eq!(h.registry.get(ids[0]).unwrap().kind(), StateKind::Error);

        let outcome = h.orchestrator.retry_one(ids[0], model).await.unwrap();

        assert!(outcome.is_done());
        let item = h.registry.get(ids[0]).unwrap();
        assert_eq!(item.kind(), StateKind::Done);
        assert!(item.error_message().is_none());
        assert_eq!(item.metadata().unwrap().category, "Nature");
        assert_eq!(h.credentials.select(model).unwrap().requests_made, 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_retry_one_rejects_busy_and_unknown() {
        let model = ModelId::Gpt4o;
        let h = harness(MockAdapter::replying(GOOD_REPLY), model, fast_options(5));
        h.credentials.add(model, "sk", None).unwrap();
        let ids = add_items(&h.registry, 1);
        h.registry.begin(ids[0]).unwrap();

        let err = h.orchestrator.retry_one(ids[0], model).await.unwrap_err();
        assert!(matches!(err, BatchError::ItemBusy(_)));

        let err = h
            .orchestrator
            .retry_one(Uuid::new_v4(), model)
            .await
            .unwrap_err();
        assert!(matches!(err, BatchError::ItemNotFound(_)));
        assert_eq!(h.call_count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_retry_one_requires_credential() {
        let model = ModelId::Gpt4o;
        let h = harness(MockAdapter::replying(GOOD_REPLY), model, fast_options(5));
        let ids = add_items(&h.registry, 1);

        let err = h.orchestrator.retry_one(ids[0], model).await.unwrap_err();
        assert!(matches!(err, BatchError::CredentialRequired(_)));
        assert_eq!(h.registry.get(ids[0]).unwrap().kind(), StateKind::Pending);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_observer_sees_every_outcome() {
        let model = ModelId::Gpt4o;
        let h = harness(MockAdapter::failing_for(&[3]), model, fast_options(2));
        h.credentials.add(model, "sk", None).unwrap();
        let ids = add_items(&h.registry, 5);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        h.orchestrator
            .process_all_with(model, move |outcome| sink.lock().unwrap().push(outcome))
            .await
            .unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 5);
        let failed: Vec<Uuid> = seen.iter().filter(|o| !o.is_done()).map(|o| o.id()).collect();
        assert_eq!(failed, vec![ids[3]]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_running_batch_skips_item_retried_during_pacing() {
        let model = ModelId::Gpt4o;
        let options = BatchOptions {
            batch_size: 1,
            pacing_delay: Duration::from_millis(1000),
            request_timeout: Duration::from_secs(5),
        };
        let h = harness(MockAdapter::replying(GOOD_REPLY), model, options);
        h.credentials.add(model, "sk", None).unwrap();
        let ids = add_items(&h.registry, 2);

        let orchestrator = h.orchestrator.clone();
        let batch = tokio::spawn(async move { orchestrator.process_all(model).await });

        // First group is done; the batch is waiting out the pacing gap.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(h.registry.get(ids[0]).unwrap().kind(), StateKind::Done);
        let outcome = h.orchestrator.retry_one(ids[1], model).await.unwrap();
        assert!(outcome.is_done());

        let summary = batch.await.unwrap().unwrap();
        assert_eq!(summary.groups, 2);
        assert_eq!(summary.attempted, 1);
        assert_eq!(summary.succeeded, 1);
        assert_eq!(h.call_count.load(Ordering::SeqCst), 2);
        assert_eq!(h.credentials.select(model).unwrap().requests_made, 2);
        assert_eq!(h.registry.get(ids[1]).unwrap().kind(), StateKind::Done);
        assert_state_invariants(&h.registry);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_panicking_observer_keeps_settled_results() {
        let model = ModelId::Gpt4o;
        let h = harness(MockAdapter::failing_for(&[1]), model, fast_options(5));
        h.credentials.add(model, "sk", None).unwrap();
        let ids = add_items(&h.registry, 3);

        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let summary = h
            .orchestrator
            .process_all_with(model, move |outcome| {
                counter.fetch_add(1, Ordering::SeqCst);
                panic!("observer rejected {}", outcome.id());
            })
            .await
            .unwrap();

        assert_eq!(summary.attempted, 3);
        assert_eq!(summary.succeeded, 2);
        assert_eq!(summary.failed, 1);
        // Each outcome reaches the observer once, even though every call panicked.
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(h.registry.get(ids[0]).unwrap().kind(), StateKind::Done);
        assert_eq!(h.registry.get(ids[2]).unwrap().kind(), StateKind::Done);
        let failed = h.registry.get(ids[1]).unwrap();
        assert_eq!(failed.error_message(), Some("OpenAI API Error: server exploded"));
        assert_eq!(h.credentials.select(model).unwrap().requests_made, 2);
        assert_state_invariants(&h.registry);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_usage_persisted_to_file_store() {
        use crate::credentials::FileStore;

        let model = ModelId::Claude35Sonnet;
        let dir = tempfile::tempdir().unwrap();
        let open = || {
            CredentialStore::open(
                Box::new(FileStore::new(dir.path())),
                ActivationPolicy::Single,
            )
            .unwrap()
        };
        let credentials = Arc::new(open());
        let added = credentials.add(model, "sk-ant", None).unwrap();

        let mut adapters = AdapterRegistry::new();
        adapters.register(model, Arc::new(MockAdapter::replying(GOOD_REPLY)));
        let registry = Arc::new(ItemRegistry::new());
        add_items(&registry, 4);
        let orchestrator = Orchestrator::new(
            registry.clone(),
            credentials.clone(),
            Arc::new(adapters),
            fast_options(4),
        );

        let summary = orchestrator.process_all(model).await.unwrap();
        assert_eq!(summary.succeeded, 4);
        assert_eq!(credentials.select(model).unwrap().requests_made, 4);

        let reopened = open();
        let stored = reopened.select(model).unwrap();
        assert_eq!(stored.id, added.id);
        assert_eq!(stored.requests_made, 4);
        assert!(stored.last_used_at.is_some());
    }

    #[test]
    fn test_options_from_config() {
        let config = BatchConfig {
            batch_size: 8,
            pacing_delay_ms: 250,
            request_timeout_ms: 10_000,
        };
        let options = BatchOptions::from(&config);
        assert_eq!(options.batch_size, 8);
        assert_eq!(options.pacing_delay, Duration::from_millis(250));
        assert_eq!(options.request_timeout, Duration::from_secs(10));
    }
}
