//! Service context: everything the HTTP surface and background tasks share.
//!
//! Built once at startup in a fixed order: dataset, models, explainability
//! collaborators, then the stream engine and its feed. A missing dataset or
//! model leaves the process running with the affected endpoints unavailable.

use crate::config::AppConfig;
use crate::dataset::Dataset;
use crate::error::{Result, ServiceError};
use crate::explain::attribution::{AttributionReport, Explainer, HttpExplainer};
use crate::explain::narrative::{GeminiNarrator, NarrativeGenerator, RuleBasedNarrator};
use crate::metrics::{FeedMetrics, MetricsReporter};
use crate::models::combiner::ScoreCombiner;
use crate::models::loader::ModelLoader;
use crate::producer::StreamPublisher;
use crate::stats_cache::{CachedStats, StatsCache};
use crate::stream::engine::StreamEngine;
use crate::stream::feed::{Cadence, Feed, FeedProducer};
use crate::stream::pool::{DemoPool, PoolOptions};
use crate::types::score::ScoreResult;
use crate::types::transaction::TransactionRecord;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

pub struct ServiceContext {
    config: AppConfig,
    dataset: Option<Arc<Dataset>>,
    combiner: Arc<ScoreCombiner>,
    explainer: Option<Arc<dyn Explainer>>,
    narrator: Arc<dyn NarrativeGenerator>,
    feed: Option<Feed>,
    stats_cache: StatsCache,
    metrics: Arc<FeedMetrics>,
}

impl ServiceContext {
    /// Load artifacts named by `config`. Load failures are logged, not returned.
    pub fn init(config: AppConfig) -> Self {
        let dataset = match Dataset::load(&config.data.dataset_path) {
            Ok(dataset) => Some(Arc::new(dataset)),
            Err(e) => {
                error!(
                    path = %config.data.dataset_path,
                    error = %format!("{:#}", e),
                    "Dataset not loaded"
                );
                None
            }
        };

        let combiner = match load_models(&config) {
            Ok(combiner) => combiner,
            Err(e) => {
                error!(
                    models_dir = %config.models.models_dir,
                    error = %format!("{:#}", e),
                    "Models not loaded"
                );
                ScoreCombiner::unloaded()
            }
        };

        let explainer = build_explainer(&config);
        let narrator = build_narrator(&config);

        Self::from_parts(config, dataset, combiner, explainer, narrator)
    }

    /// Assemble a context from already loaded parts
    pub fn from_parts(
        config: AppConfig,
        dataset: Option<Arc<Dataset>>,
        combiner: ScoreCombiner,
        explainer: Option<Arc<dyn Explainer>>,
        narrator: Arc<dyn NarrativeGenerator>,
    ) -> Self {
        let combiner = Arc::new(combiner);
        let metrics = Arc::new(FeedMetrics::new());

        let feed = match &dataset {
            Some(dataset) if combiner.is_ready() => {
                build_feed(&config, dataset.clone(), combiner.clone(), metrics.clone())
            }
            _ => {
                warn!("Live feed disabled until both the dataset and the models are loaded");
                None
            }
        };

        let stats_cache = StatsCache::new(config.stats.sample_size, config.stats.seed);

        Self {
            config,
            dataset,
            combiner,
            explainer,
            narrator,
            feed,
            stats_cache,
            metrics,
        }
    }

    pub fn models_loaded(&self) -> bool {
        self.combiner.is_ready()
    }

    pub fn data_loaded(&self) -> bool {
        self.dataset.is_some()
    }

    pub fn dataset(&self) -> Result<&Arc<Dataset>> {
        self.dataset.as_ref().ok_or(ServiceError::DatasetNotLoaded)
    }

    pub fn feed(&self) -> Result<&Feed> {
        match &self.feed {
            Some(feed) => Ok(feed),
            None if !self.data_loaded() => Err(ServiceError::DatasetNotLoaded),
            None => Err(ServiceError::ModelsNotReady),
        }
    }

    pub fn narrator(&self) -> Arc<dyn NarrativeGenerator> {
        self.narrator.clone()
    }

    pub fn metrics(&self) -> &Arc<FeedMetrics> {
        &self.metrics
    }

    /// Row `index` and its score, scored on the blocking pool
    pub async fn score_row(&self, index: i64) -> Result<(TransactionRecord, ScoreResult)> {
        let dataset = self.dataset()?.clone();
        if !self.combiner.is_ready() {
            return Err(ServiceError::ModelsNotReady);
        }
        let record = dataset.record(index)?.clone();
        let combiner = self.combiner.clone();

        tokio::task::spawn_blocking(move || -> Result<(TransactionRecord, ScoreResult)> {
            let score = combiner.score(&record.features)?;
            Ok((record, score))
        })
        .await
        .map_err(|e| ServiceError::inference(format!("scoring task failed: {}", e)))?
    }

    /// Score a page of rows in dataset order
    pub async fn score_page(
        &self,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<(usize, TransactionRecord, ScoreResult)>> {
        let dataset = self.dataset()?.clone();
        if !self.combiner.is_ready() {
            return Err(ServiceError::ModelsNotReady);
        }
        let combiner = self.combiner.clone();

        tokio::task::spawn_blocking(move || -> Result<Vec<(usize, TransactionRecord, ScoreResult)>> {
            let end = offset.saturating_add(limit).min(dataset.len());
            (offset.min(end)..end)
                .filter_map(|index| dataset.get(index).map(|record| (index, record)))
                .map(|(index, record)| {
                    let score = combiner.score(&record.features)?;
                    Ok((index, record.clone(), score))
                })
                .collect()
        })
        .await
        .map_err(|e| ServiceError::inference(format!("scoring task failed: {}", e)))?
    }

    /// Ranked attributions for row `index`; an empty report when no provider
    /// is configured or the provider fails.
    pub async fn attributions(&self, index: i64) -> Result<AttributionReport> {
        let dataset = self.dataset()?;
        let record = dataset.record(index)?;

        let Some(explainer) = &self.explainer else {
            return Ok(AttributionReport::default());
        };

        match explainer.explain(&record.features, dataset.feature_names()).await {
            Ok(report) => Ok(report),
            Err(e) => {
                warn!(
                    transaction_id = index,
                    explainer = explainer.name(),
                    error = %e,
                    "Attribution provider failed"
                );
                Ok(AttributionReport::default())
            }
        }
    }

    pub async fn cached_stats(&self) -> Result<CachedStats> {
        let dataset = self.dataset()?.clone();
        self.stats_cache
            .get_or_compute(dataset, self.combiner.clone())
            .await
    }

    /// Start the feed producer, the metrics reporter and the NATS mirror
    pub async fn spawn_background(&self) -> BackgroundTasks {
        let mut tasks = BackgroundTasks::new();

        let Some(feed) = &self.feed else {
            return tasks;
        };

        let (min, max) = self.config.stream.delay_bounds();
        let producer = FeedProducer::new(feed.clone(), Cadence::new(min, max));
        tasks.handles.push(tokio::spawn(producer.run()));
        info!(
            min_delay_ms = min.as_millis() as u64,
            max_delay_ms = max.as_millis() as u64,
            "Feed producer started"
        );

        if self.config.stream.report_interval_secs > 0 {
            let reporter =
                MetricsReporter::new(self.metrics.clone(), self.config.stream.report_interval_secs);
            tasks.handles.push(tokio::spawn(reporter.start()));
        }

        if self.config.nats.enabled {
            match StreamPublisher::connect(&self.config.nats.url, &self.config.nats.stream_subject)
                .await
            {
                Ok(publisher) => {
                    info!(subject = publisher.subject(), "NATS mirror started");
                    let shutdown = tasks.shutdown_signal();
                    tasks
                        .draining
                        .push(tokio::spawn(publisher.mirror(feed.clone(), shutdown)));
                }
                Err(e) => warn!(
                    url = %self.config.nats.url,
                    error = %e,
                    "NATS mirror disabled"
                ),
            }
        }

        tasks
    }
}

/// Longest wait for a signalled task to finish before it is aborted
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Handles of the tasks started by [`ServiceContext::spawn_background`]
pub struct BackgroundTasks {
    /// Aborted on shutdown
    handles: Vec<JoinHandle<()>>,
    /// Signalled on shutdown and given a chance to finish (flush)
    draining: Vec<JoinHandle<()>>,
    shutdown: watch::Sender<bool>,
}

impl BackgroundTasks {
    fn new() -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            handles: Vec::new(),
            draining: Vec::new(),
            shutdown,
        }
    }

    fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    pub fn len(&self) -> usize {
        self.handles.len() + self.draining.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Abort the producer and reporter, then let the draining tasks finish
    pub async fn shutdown(self) {
        for handle in &self.handles {
            handle.abort();
        }
        for handle in self.handles {
            let _ = handle.await;
        }

        // Receivers may already be gone
        let _ = self.shutdown.send(true);
        for handle in self.draining {
            let abort = handle.abort_handle();
            if tokio::time::timeout(DRAIN_TIMEOUT, handle).await.is_err() {
                warn!("Background task did not drain in time, aborting");
                abort.abort();
            }
        }
        info!("Background tasks stopped");
    }
}

fn load_models(config: &AppConfig) -> anyhow::Result<ScoreCombiner> {
    let loader = ModelLoader::with_threads(config.models.onnx_threads)?;
    let detector = loader.load_detector(&config.models)?;
    let autoencoder = loader.load_autoencoder(&config.models)?;
    let combiner = ScoreCombiner::new(Arc::new(detector), Arc::new(autoencoder));

    info!(models = ?combiner.model_names(), "Anomaly models loaded");
    Ok(combiner)
}

fn build_explainer(config: &AppConfig) -> Option<Arc<dyn Explainer>> {
    let endpoint = config.explainer.endpoint.as_deref()?;
    match HttpExplainer::new(endpoint, Duration::from_millis(config.explainer.timeout_ms)) {
        Ok(explainer) => {
            info!(endpoint = %endpoint, "Attribution provider configured");
            Some(Arc::new(explainer))
        }
        Err(e) => {
            warn!(endpoint = %endpoint, error = %e, "Attribution provider disabled");
            None
        }
    }
}

fn build_narrator(config: &AppConfig) -> Arc<dyn NarrativeGenerator> {
    let api_key = config
        .narrative
        .api_key
        .as_deref()
        .filter(|key| !key.is_empty());

    match api_key.map(|key| GeminiNarrator::new(key, &config.narrative)) {
        Some(Ok(narrator)) => {
            info!(model = %config.narrative.model, "Narrative generator configured");
            Arc::new(narrator)
        }
        Some(Err(e)) => {
            warn!(error = %e, "Narrative generator disabled, using rule-based analysis");
            Arc::new(RuleBasedNarrator)
        }
        None => {
            info!("No narrative API key, using rule-based analysis");
            Arc::new(RuleBasedNarrator)
        }
    }
}

fn build_feed(
    config: &AppConfig,
    dataset: Arc<Dataset>,
    combiner: Arc<ScoreCombiner>,
    metrics: Arc<FeedMetrics>,
) -> Option<Feed> {
    let options = PoolOptions {
        fraud_multiplier: config.stream.fraud_multiplier,
        legit_cap: config.stream.legit_cap,
        seed: config.stream.seed,
    };
    let pool = DemoPool::build(&dataset.labels(), &options);

    match StreamEngine::new(dataset, combiner, pool, config.stream.buffer_capacity) {
        Ok(engine) => Some(Feed::new(
            Arc::new(engine),
            config.stream.channel_capacity,
            metrics,
        )),
        Err(e) => {
            error!(error = %e, "Stream engine not started");
            None
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::explain::attribution::testing::FailingExplainer;
    use crate::models::combiner::testing::stub_combiner;

    #[test]
    fn test_feed_requires_data_and_models() {
        assert!(ready_context().feed().is_ok());
        assert_eq!(
            context_without_models().feed().err(),
            Some(ServiceError::ModelsNotReady)
        );
        assert_eq!(
            context_without_data().feed().err(),
            Some(ServiceError::DatasetNotLoaded)
        );
    }

    #[test]
    fn test_feed_pool_oversamples_fraud() {
        let context = ready_context();
        // 3 legit + 1 fraud x 3
        assert_eq!(context.feed().unwrap().engine().pool_len(), 6);
    }

    #[test]
    fn test_init_with_missing_artifacts_stays_up() {
        let mut config = test_config();
        config.data.dataset_path = "does/not/exist.csv".to_string();
        config.models.models_dir = "does/not/exist".to_string();

        let context = ServiceContext::init(config);
        assert!(!context.data_loaded());
        assert!(!context.models_loaded());
        assert!(context.feed().is_err());
    }

    #[tokio::test]
    async fn test_score_row() {
        let context = ready_context();

        let (record, score) = context.score_row(2).await.unwrap();
        assert_eq!(record.amount, 900.0);
        assert!(score.is_flagged());

        assert!(matches!(
            context.score_row(4).await.unwrap_err(),
            ServiceError::IndexOutOfRange { index: 4, len: 4 }
        ));
        assert!(matches!(
            context.score_row(-1).await.unwrap_err(),
            ServiceError::IndexOutOfRange { .. }
        ));
        assert_eq!(
            context_without_models().score_row(0).await.unwrap_err(),
            ServiceError::ModelsNotReady
        );
        assert_eq!(
            context_without_data().score_row(0).await.unwrap_err(),
            ServiceError::DatasetNotLoaded
        );
    }

    #[tokio::test]
    async fn test_score_page_bounds() {
        let context = ready_context();

        let page = context.score_page(2, 10).await.unwrap();
        let ids: Vec<usize> = page.iter().map(|(index, _, _)| *index).collect();
        assert_eq!(ids, vec![2, 3]);

        assert!(context.score_page(10, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_attributions_fall_back_to_empty() {
        let report = ready_context().attributions(0).await.unwrap();
        assert_eq!(report.shap_values.len(), 3);

        let failing = ServiceContext::from_parts(
            test_config(),
            Some(Arc::new(Dataset::from_records(records()))),
            stub_combiner(),
            Some(Arc::new(FailingExplainer)),
            Arc::new(RuleBasedNarrator),
        );
        assert_eq!(
            failing.attributions(0).await.unwrap(),
            AttributionReport::default()
        );
        assert!(failing.attributions(9).await.is_err());
    }

    #[tokio::test]
    async fn test_background_tasks_drive_the_feed() {
        let mut config = test_config();
        config.stream.min_delay_ms = 5;
        config.stream.max_delay_ms = 5;
        let context = ServiceContext::from_parts(
            config,
            Some(Arc::new(Dataset::from_records(records()))),
            stub_combiner(),
            None,
            Arc::new(RuleBasedNarrator),
        );
        let mut subscription = context.feed().unwrap().subscribe();

        let tasks = context.spawn_background().await;
        assert_eq!(tasks.len(), 1);

        let item = subscription.next().await.unwrap();
        assert_eq!(item.id, 0);

        tasks.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_lets_draining_tasks_finish() {
        let context = ready_context();
        let feed = context.feed().unwrap().clone();
        let mut tasks = BackgroundTasks::new();

        let mut subscription = feed.subscribe();
        let mut shutdown = tasks.shutdown_signal();
        let (done_tx, done_rx) = tokio::sync::oneshot::channel();
        tasks.draining.push(tokio::spawn(async move {
            let mut forwarded = 0;
            loop {
                tokio::select! {
                    Some(_) = subscription.next() => forwarded += 1,
                    _ = shutdown.changed() => break,
                }
            }
            let _ = done_tx.send(forwarded);
        }));

        feed.advance().await.unwrap();
        tokio::task::yield_now().await;
        tasks.shutdown().await;

        // the task ran its exit path instead of being aborted mid-wait
        assert!(done_rx.await.is_ok());
    }

    #[tokio::test]
    async fn test_no_background_tasks_without_feed() {
        let tasks = context_without_models().spawn_background().await;
        assert!(tasks.is_empty());
    }
}
