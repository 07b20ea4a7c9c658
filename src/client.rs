//! The tiered cache coordinator: one `resolve` entry point over L1 → L2 → L3.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Mutex;

use crate::cache::{
    self, CacheStatsReport, CachedEntry, L1Cache, SemanticCache, SemanticMatch, StatsTracker,
};
use crate::config::Config;
use crate::db::{self, Driver, SchemaInfo};
use crate::error::{Error, Result};
use crate::intent::{Intent, IntentParser};
use crate::llm::{self, Embedder, Generator};
use crate::models::{CacheLayer, Explanation, ResolveMeta, ResolveOptions, ResolveOutcome, Row};
use crate::sqlgen::{infer_result_schema, SqlGenerator, DEFAULT_MAX_ATTEMPTS};

/// Per-resolve timing breakdown, logged once per completed call.
#[derive(Debug, Default)]
struct ResolveTimings {
    parse_ms: f64,
    lookup_ms: f64,
    generate_ms: f64,
    execute_ms: f64,
}

impl ResolveTimings {
    fn log(&self, layer: CacheLayer, fingerprint: &str, total_ms: f64) {
        log::info!(
            "resolve {fingerprint} - layer {}, total {total_ms:.3}ms \
             (parse {:.3}ms, lookup {:.3}ms, generate {:.3}ms, execute {:.3}ms)",
            layer.as_number(),
            self.parse_ms,
            self.lookup_ms,
            self.generate_ms,
            self.execute_ms,
        );
    }
}

fn elapsed_ms(since: Instant) -> f64 {
    since.elapsed().as_secs_f64() * 1000.0
}

/// How the generative path should populate the L2 cache afterwards.
enum L2Populate {
    /// Reuse the embedding the L2 miss already computed.
    Reuse(Vec<f32>),
    /// No embedding yet (L2 reads were bypassed); compute one on insert.
    Compute,
    /// The embedder is failing; skip L2 population for this call.
    Skip,
}

/// Natural-language → SQL resolver with a three-tier semantic cache.
///
/// Safe to share across tasks: every `resolve` is an independent call, cache
/// mutations happen in non-yielding critical sections, and statistics are
/// atomic counters.
pub struct Nttp {
    config: Config,
    driver: Arc<dyn Driver>,
    schema: SchemaInfo,
    schema_description: String,
    parser: IntentParser,
    sqlgen: SqlGenerator,
    l1: Option<Arc<dyn L1Cache>>,
    l2: Option<Arc<SemanticCache>>,
    stats: StatsTracker,
    /// Per-fingerprint single-flight barriers for the generative path.
    inflight: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

/// Constructor-time composition of the pipeline. Capabilities not supplied
/// explicitly are built from the configuration.
pub struct NttpBuilder {
    config: Config,
    generator: Option<Arc<dyn Generator>>,
    embedder: Option<Arc<dyn Embedder>>,
    driver: Option<Arc<dyn Driver>>,
    l1: Option<Arc<dyn L1Cache>>,
}

impl NttpBuilder {
    pub fn new(config: Config) -> Self {
        NttpBuilder {
            config,
            generator: None,
            embedder: None,
            driver: None,
            l1: None,
        }
    }

    /// Use a custom generation provider instead of the configured one.
    pub fn generator(mut self, generator: Arc<dyn Generator>) -> Self {
        self.generator = Some(generator);
        self
    }

    /// Use a custom embedding provider for the L2 cache.
    pub fn embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    /// Use a pre-built database driver instead of connecting from config.
    pub fn driver(mut self, driver: Arc<dyn Driver>) -> Self {
        self.driver = Some(driver);
        self
    }

    /// Use a custom L1 store.
    pub fn l1_cache(mut self, l1: Arc<dyn L1Cache>) -> Self {
        self.l1 = Some(l1);
        self
    }

    pub async fn build(self) -> Result<Nttp> {
        let config = self.config;
        config.validate().map_err(Error::Config)?;

        let driver = match self.driver {
            Some(driver) => driver,
            None => db::connect(&config.database).await?,
        };

        let schema = SchemaInfo::introspect(driver.as_ref()).await?;
        let schema_description = schema.description();

        let generator = match self.generator {
            Some(generator) => generator,
            None => llm::build_generator(&config.llm).map_err(Error::Config)?,
        };

        let parser = IntentParser::new(generator.clone(), &config.limits);
        let sqlgen = SqlGenerator::new(
            generator,
            DEFAULT_MAX_ATTEMPTS,
            config.limits.default_limit,
        );

        let l1 = match self.l1 {
            Some(l1) => Some(l1),
            None => cache::build_l1(&config.cache.l1).await?,
        };

        let l2 = if config.cache.l2.enabled {
            let l2_cfg = &config.cache.l2;
            let embedder = match self.embedder {
                Some(embedder) => embedder,
                None => {
                    let provider = l2_cfg
                        .provider
                        .ok_or(crate::config::ConfigError::Missing("cache.l2.provider"))?;
                    let model = l2_cfg
                        .model
                        .as_deref()
                        .ok_or(crate::config::ConfigError::Missing("cache.l2.model"))?;
                    let api_key = l2_cfg.api_key.as_deref().unwrap_or(&config.llm.api_key);
                    llm::build_embedder(provider, model, api_key, None).map_err(Error::Config)?
                }
            };
            log::info!(
                "L2 cache: enabled (max {} entries, threshold {})",
                l2_cfg.max_size,
                l2_cfg.threshold
            );
            Some(Arc::new(SemanticCache::new(
                embedder,
                l2_cfg.threshold,
                l2_cfg.max_size,
            )))
        } else {
            None
        };

        Ok(Nttp {
            config,
            driver,
            schema,
            schema_description,
            parser,
            sqlgen,
            l1,
            l2,
            stats: StatsTracker::new(),
            inflight: Mutex::new(HashMap::new()),
        })
    }
}

impl Nttp {
    /// Connect with the providers and stores named by the configuration.
    pub async fn connect(config: Config) -> Result<Self> {
        NttpBuilder::new(config).build().await
    }

    /// Start a builder for custom capability composition.
    pub fn builder(config: Config) -> NttpBuilder {
        NttpBuilder::new(config)
    }

    /// Resolve a natural-language query into executed rows, answering from
    /// the cheapest cache layer able to serve it.
    pub async fn resolve(&self, query: &str, options: ResolveOptions) -> Result<ResolveOutcome> {
        let timeout = self.config.limits.request_timeout();
        match tokio::time::timeout(timeout, self.resolve_inner(query, options)).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(timeout)),
        }
    }

    async fn resolve_inner(&self, query: &str, options: ResolveOptions) -> Result<ResolveOutcome> {
        let started = Instant::now();
        let mut timings = ResolveTimings::default();

        let intent = self.parser.parse(query, &self.schema).await?;
        timings.parse_ms = elapsed_ms(started);
        let fingerprint = intent.fingerprint();
        let cache_reads = options.use_cache && !options.force_new_schema;
        log::debug!("resolving {fingerprint} (cache_reads={cache_reads}): {query}");

        // L1: exact fingerprint match.
        if cache_reads {
            if let Some(l1) = &self.l1 {
                let lookup_started = Instant::now();
                let found = l1.get(&fingerprint).await?;
                timings.lookup_ms += elapsed_ms(lookup_started);
                if let Some(entry) = found {
                    let execute_started = Instant::now();
                    let rows = self.execute_entry(&entry).await?;
                    timings.execute_ms = elapsed_ms(execute_started);
                    l1.add_example(&fingerprint, query).await?;
                    self.stats.record_l1_hit();
                    log::debug!("L1 hit for {fingerprint}");
                    return Ok(self.outcome(
                        query,
                        intent,
                        fingerprint,
                        entry.sql,
                        entry.params,
                        rows,
                        CacheLayer::L1,
                        None,
                        started,
                        timings,
                    ));
                }
                self.stats.record_l1_miss();
            }
        }

        // L2: semantic match. The embedding is computed at most once per
        // resolve; a miss hands it to the L3 populate path. An embedder
        // outage downgrades L2 to a miss rather than failing the call.
        let mut l2_populate = L2Populate::Compute;
        if cache_reads {
            if let Some(l2) = &self.l2 {
                let lookup_started = Instant::now();
                let found = l2.find(query).await;
                timings.lookup_ms += elapsed_ms(lookup_started);
                match found {
                    Ok(found) => match found.matched {
                        Some(matched) => {
                            let outcome = self
                                .serve_l2_hit(query, intent, &fingerprint, matched, started, timings)
                                .await?;
                            return Ok(outcome);
                        }
                        None => {
                            self.stats.record_l2_miss();
                            l2_populate = L2Populate::Reuse(found.embedding);
                        }
                    },
                    Err(Error::Llm(e)) => {
                        log::warn!("L2 lookup failed ({e}); continuing without semantic cache");
                        self.stats.record_l2_miss();
                        l2_populate = L2Populate::Skip;
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        // L3: generate. A per-fingerprint barrier lets concurrent duplicates
        // share one LLM+DB execution; after waiting, the cache is re-checked.
        let barrier = {
            let mut inflight = self.inflight.lock().await;
            inflight
                .entry(fingerprint.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };

        let result = {
            let _guard = barrier.lock().await;
            self.run_l3(query, intent, &fingerprint, cache_reads, l2_populate, started, timings)
                .await
        };

        self.inflight.lock().await.remove(&fingerprint);
        result
    }

    async fn serve_l2_hit(
        &self,
        query: &str,
        intent: Intent,
        fingerprint: &str,
        matched: SemanticMatch,
        started: Instant,
        mut timings: ResolveTimings,
    ) -> Result<ResolveOutcome> {
        // An execution failure of cached SQL is terminal, not a fall-through
        // to regeneration.
        let execute_started = Instant::now();
        let rows = self.execute_entry(&matched.entry).await?;
        timings.execute_ms = elapsed_ms(execute_started);

        if let Some(l1) = &self.l1 {
            // Promote under the *current* fingerprint so exact re-phrasings
            // of this query short-circuit at L1 from now on.
            let mut promoted = matched.entry.rekeyed(fingerprint);
            promoted.record_hit();
            promoted.add_example(query);
            l1.set(promoted).await?;

            // Resurrect the matched entry's own fingerprint if L1 lost it.
            if l1.peek(&matched.entry.fingerprint).await?.is_none() {
                l1.set(matched.entry.clone()).await?;
            }
        }

        if let Some(l2) = &self.l2 {
            l2.record_hit(&matched.entry.fingerprint);
        }
        self.stats.record_l2_hit();
        log::debug!(
            "L2 hit for {fingerprint} via {} (similarity {:.4})",
            matched.entry.fingerprint,
            matched.similarity
        );

        Ok(self.outcome(
            query,
            intent,
            fingerprint.to_string(),
            matched.entry.sql,
            matched.entry.params,
            rows,
            CacheLayer::L2,
            Some(matched.similarity),
            started,
            timings,
        ))
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_l3(
        &self,
        query: &str,
        intent: Intent,
        fingerprint: &str,
        cache_reads: bool,
        l2_populate: L2Populate,
        started: Instant,
        mut timings: ResolveTimings,
    ) -> Result<ResolveOutcome> {
        // Another in-flight resolve for this fingerprint may have populated
        // L1 while we waited on the barrier.
        if cache_reads {
            if let Some(l1) = &self.l1 {
                if let Some(entry) = l1.get(fingerprint).await? {
                    let execute_started = Instant::now();
                    let rows = self.execute_entry(&entry).await?;
                    timings.execute_ms = elapsed_ms(execute_started);
                    l1.add_example(fingerprint, query).await?;
                    self.stats.record_l1_hit();
                    return Ok(self.outcome(
                        query,
                        intent,
                        fingerprint.to_string(),
                        entry.sql,
                        entry.params,
                        rows,
                        CacheLayer::L1,
                        None,
                        started,
                        timings,
                    ));
                }
            }
        }

        let generate_started = Instant::now();
        let executed = self
            .sqlgen
            .generate_and_execute(
                &intent,
                &self.schema_description,
                self.driver.dialect(),
                self.driver.as_ref(),
            )
            .await?;
        timings.generate_ms = elapsed_ms(generate_started);
        self.stats.record_l3_call();
        log::debug!(
            "L3 generated SQL for {fingerprint} in {} attempt(s)",
            executed.attempts
        );

        let mut entry = CachedEntry::new(
            fingerprint,
            &executed.sql,
            executed.params.clone(),
            &intent.normalized_text,
        );
        entry.add_example(query);
        entry.result_schema = infer_result_schema(&executed.rows);

        if let Some(l1) = &self.l1 {
            l1.set(entry.clone()).await?;
        }
        if let Some(l2) = &self.l2 {
            match l2_populate {
                L2Populate::Reuse(embedding) => l2.add_with_embedding(embedding, entry)?,
                L2Populate::Compute => l2.add(query, entry).await?,
                L2Populate::Skip => {}
            }
        }

        Ok(self.outcome(
            query,
            intent,
            fingerprint.to_string(),
            executed.sql,
            executed.params,
            executed.rows,
            CacheLayer::L3,
            None,
            started,
            timings,
        ))
    }

    async fn execute_entry(&self, entry: &CachedEntry) -> Result<Vec<Row>> {
        self.driver
            .query(&entry.sql, &entry.params)
            .await
            .map_err(Error::SqlExecution)
    }

    #[allow(clippy::too_many_arguments)]
    fn outcome(
        &self,
        query: &str,
        intent: Intent,
        fingerprint: String,
        sql: String,
        params: Vec<crate::models::JsonValue>,
        data: Vec<Row>,
        layer: CacheLayer,
        similarity: Option<f32>,
        started: Instant,
        timings: ResolveTimings,
    ) -> ResolveOutcome {
        // A query only counts once it completed; failed resolves would
        // otherwise break the hits + generations = total identity.
        self.stats.record_query();
        let total_ms = elapsed_ms(started);
        timings.log(layer, &fingerprint, total_ms);
        let cost = match layer {
            CacheLayer::L1 => self.config.costs.l1_hit,
            CacheLayer::L2 => self.config.costs.embed,
            CacheLayer::L3 => self.config.costs.generate,
        };
        ResolveOutcome {
            query: query.to_string(),
            data,
            fingerprint,
            cache_hit: layer != CacheLayer::L3,
            sql,
            params,
            intent,
            meta: ResolveMeta {
                layer,
                cost,
                latency_ms: total_ms,
                similarity,
            },
        }
    }

    /// Parse and plan a query without executing anything. Cached SQL is
    /// returned when the fingerprint is already in L1.
    pub async fn explain(&self, query: &str) -> Result<Explanation> {
        let intent = self.parser.parse(query, &self.schema).await?;
        let fingerprint = intent.fingerprint();

        if let Some(l1) = &self.l1 {
            if let Some(entry) = l1.peek(&fingerprint).await? {
                return Ok(Explanation {
                    intent,
                    sql: entry.sql.clone(),
                    params: entry.params.clone(),
                    fingerprint,
                    cached_entry: Some(entry),
                });
            }
        }

        let generated = self
            .sqlgen
            .generate(&intent, &self.schema_description, self.driver.dialect())
            .await?;
        Ok(Explanation {
            intent,
            sql: generated.sql,
            params: generated.params,
            fingerprint,
            cached_entry: None,
        })
    }

    /// All cached query schemas, least recently used first.
    pub async fn list_schemas(&self) -> Result<Vec<CachedEntry>> {
        match &self.l1 {
            Some(l1) => Ok(l1.list().await?),
            None => Ok(Vec::new()),
        }
    }

    pub async fn get_schema(&self, fingerprint: &str) -> Result<Option<CachedEntry>> {
        match &self.l1 {
            Some(l1) => Ok(l1.peek(fingerprint).await?),
            None => Ok(None),
        }
    }

    /// Delete a cached schema. Fails with a cache error when pinned.
    pub async fn delete_schema(&self, fingerprint: &str) -> Result<bool> {
        match &self.l1 {
            Some(l1) => Ok(l1.delete(fingerprint).await?),
            None => Ok(false),
        }
    }

    pub async fn pin_schema(&self, fingerprint: &str) -> Result<bool> {
        match &self.l1 {
            Some(l1) => Ok(l1.set_pinned(fingerprint, true).await?),
            None => Ok(false),
        }
    }

    pub async fn unpin_schema(&self, fingerprint: &str) -> Result<bool> {
        match &self.l1 {
            Some(l1) => Ok(l1.set_pinned(fingerprint, false).await?),
            None => Ok(false),
        }
    }

    /// Remove all unpinned L1 entries and every L2 entry.
    pub async fn clear_cache(&self) -> Result<()> {
        if let Some(l1) = &self.l1 {
            l1.clear().await?;
        }
        if let Some(l2) = &self.l2 {
            l2.clear();
        }
        Ok(())
    }

    pub async fn cache_stats(&self) -> CacheStatsReport {
        let l1_size = match &self.l1 {
            Some(l1) => l1.len().await,
            None => 0,
        };
        let l2_size = self.l2.as_ref().map(|l2| l2.len()).unwrap_or(0);
        self.stats.report(l1_size, l2_size, &self.config.costs)
    }

    /// The schema snapshot taken at startup.
    pub fn schema(&self) -> &SchemaInfo {
        &self.schema
    }

    pub fn schema_description(&self) -> &str {
        &self.schema_description
    }

    /// Drain and close the database pool. In-memory caches are lost; the
    /// external KV keeps whatever its TTLs allow.
    pub async fn close(&self) {
        self.driver.close().await;
        log::info!("nttp closed");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use std::result::Result;

    use async_trait::async_trait;
    use serde_json::json;

    use crate::config::{DatabaseConfig, LlmConfig, LlmProvider};
    use crate::db::{ColumnDef, DbError, Dialect, ForeignKeyDef};
    use crate::llm::LlmError;
    use crate::models::JsonValue;

    use super::*;

    /// Driver with a fixed single-table schema returning one canned row.
    struct FixedDriver {
        queries: AtomicUsize,
    }

    #[async_trait]
    impl Driver for FixedDriver {
        fn dialect(&self) -> Dialect {
            Dialect::Sqlite
        }

        async fn query(&self, _sql: &str, _params: &[JsonValue]) -> Result<Vec<Row>, DbError> {
            self.queries.fetch_add(1, Ordering::SeqCst);
            let mut row = Row::new();
            row.insert("id".to_string(), json!(1));
            row.insert("name".to_string(), json!("Ada"));
            Ok(vec![row])
        }

        async fn tables(&self) -> Result<Vec<String>, DbError> {
            Ok(vec!["users".to_string()])
        }

        async fn columns(&self, _table: &str) -> Result<Vec<ColumnDef>, DbError> {
            Ok(vec![
                ColumnDef {
                    name: "id".to_string(),
                    data_type: "integer".to_string(),
                    nullable: false,
                },
                ColumnDef {
                    name: "name".to_string(),
                    data_type: "text".to_string(),
                    nullable: true,
                },
            ])
        }

        async fn foreign_keys(&self, _table: &str) -> Result<Vec<ForeignKeyDef>, DbError> {
            Ok(Vec::new())
        }

        async fn close(&self) {}
    }

    /// Generator answering every intent request with a list-users intent and
    /// every SQL request with a fixed SELECT.
    struct FixedGenerator;

    #[async_trait]
    impl Generator for FixedGenerator {
        async fn generate_structured(
            &self,
            _system: &str,
            _user: &str,
            response_schema: &JsonValue,
        ) -> Result<JsonValue, LlmError> {
            if response_schema.pointer("/properties/entity").is_some() {
                Ok(json!({ "entity": "users", "operation": "list" }))
            } else {
                Ok(json!({ "sql": "SELECT id, name FROM users", "params": [] }))
            }
        }
    }

    fn no_cache_config() -> Config {
        let mut config = Config::new(
            DatabaseConfig {
                driver: Dialect::Sqlite,
                url: "unused".to_string(),
            },
            LlmConfig {
                provider: LlmProvider::OpenAi,
                model: "fixed".to_string(),
                api_key: "key".to_string(),
                ..LlmConfig::default()
            },
        );
        config.cache.l1.enabled = false;
        config
    }

    async fn cacheless_nttp() -> (Nttp, Arc<FixedDriver>) {
        let driver = Arc::new(FixedDriver {
            queries: AtomicUsize::new(0),
        });
        let nttp = Nttp::builder(no_cache_config())
            .generator(Arc::new(FixedGenerator))
            .driver(driver.clone())
            .build()
            .await
            .unwrap();
        (nttp, driver)
    }

    #[tokio::test]
    async fn test_disabled_caches_behave_as_pure_generation() {
        let (nttp, driver) = cacheless_nttp().await;

        for _ in 0..3 {
            let outcome = nttp
                .resolve("list users", ResolveOptions::default())
                .await
                .unwrap();
            assert_eq!(outcome.meta.layer, CacheLayer::L3);
            assert!(!outcome.cache_hit);
        }

        assert_eq!(driver.queries.load(Ordering::SeqCst), 3);
        let stats = nttp.cache_stats().await;
        assert_eq!(stats.total_queries, 3);
        assert_eq!(stats.l3.calls, 3);
        assert_eq!(stats.l1.hits, 0);
        assert_eq!(stats.l1.misses, 0, "a disabled layer is never probed");
    }

    #[tokio::test]
    async fn test_management_calls_on_a_disabled_cache_report_absence() {
        let (nttp, _driver) = cacheless_nttp().await;
        nttp.resolve("list users", ResolveOptions::default())
            .await
            .unwrap();

        assert!(nttp.list_schemas().await.unwrap().is_empty());
        assert!(nttp.get_schema("anything").await.unwrap().is_none());
        assert!(!nttp.delete_schema("anything").await.unwrap());
        assert!(!nttp.pin_schema("anything").await.unwrap());
        assert!(!nttp.unpin_schema("anything").await.unwrap());
        nttp.clear_cache().await.unwrap();
    }

    #[tokio::test]
    async fn test_resolve_reports_the_schema_snapshot() {
        let (nttp, _driver) = cacheless_nttp().await;
        assert!(nttp.schema().has_table("users"));
        assert!(nttp.schema_description().contains("Table users:"));

        let outcome = nttp
            .resolve("list users", ResolveOptions::default())
            .await
            .unwrap();
        assert_eq!(outcome.intent.entity, "users");
        assert_eq!(outcome.fingerprint.len(), 16);
        assert_eq!(outcome.data[0]["name"], json!("Ada"));
    }
}
