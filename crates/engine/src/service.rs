use crate::{
    cache::{self, CompiledQueryCache},
    config::EngineConfig,
    error::{SelectorError, StoreError},
    executor::QueryExecutor,
    shape::shape_rows,
    store::SelectorStore,
};
use compiler::{
    CompileError, CompileOptions, CompiledQuery, RequestContext, SelectorCompiler,
    include::{include_ids, resolve_includes},
    parse::parse_selector,
    variables::{substitute_json_text, substitute_selector},
};
use model::selector::Selector;
use planner::query::dialect::MySql;
use serde::Serialize;
use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
};
use tracing::{debug, error, info, warn};

/// Where the selector of a request comes from.
#[derive(Debug, Clone)]
pub enum SelectorSource {
    /// A row of `wiser_data_selector`.
    Stored(i64),
    /// Raw selector JSON, substituted before parsing.
    Json(String),
    /// An already parsed selector; only condition values are substituted.
    Parsed(Selector),
}

#[derive(Debug, Clone)]
pub struct SelectorRequest {
    pub source: SelectorSource,
    pub context: RequestContext,
    pub for_filter_items: bool,
    /// Overrides the configured substitution policy.
    pub remove_unknown_variables: Option<bool>,
}

impl SelectorRequest {
    pub fn new(source: SelectorSource) -> Self {
        SelectorRequest {
            source,
            context: RequestContext::default(),
            for_filter_items: false,
            remove_unknown_variables: None,
        }
    }

    pub fn with_context(mut self, context: RequestContext) -> Self {
        self.context = context;
        self
    }

    pub fn for_filter_items(mut self, for_filter_items: bool) -> Self {
        self.for_filter_items = for_filter_items;
        self
    }

    pub fn remove_unknown_variables(mut self, remove: bool) -> Self {
        self.remove_unknown_variables = Some(remove);
        self
    }
}

/// What the caller gets back; errors are already mapped to a status and a
/// public message.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SelectorResponse {
    pub status: u16,
    pub body: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A selector after substitution, include resolution and the security
/// check, together with the options it compiles with.
#[derive(Debug, Clone)]
pub struct PreparedSelector {
    pub selector: Selector,
    pub options: CompileOptions,
}

pub struct SelectorService {
    executor: Arc<dyn QueryExecutor>,
    store: Arc<dyn SelectorStore>,
    cache: Arc<dyn CompiledQueryCache>,
    config: EngineConfig,
}

impl SelectorService {
    pub fn new(
        executor: Arc<dyn QueryExecutor>,
        store: Arc<dyn SelectorStore>,
        config: EngineConfig,
    ) -> Self {
        SelectorService {
            executor,
            store,
            cache: cache::for_ttl(config.cache_ttl),
            config,
        }
    }

    pub fn with_cache(mut self, cache: Arc<dyn CompiledQueryCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Runs a request end to end. Never fails: every error becomes a
    /// status code and a public message.
    pub async fn run(&self, request: &SelectorRequest) -> SelectorResponse {
        match self.execute(request).await {
            Ok(body) => {
                let count = body.as_array().map(Vec::len).unwrap_or(0);
                info!("Data selector returned {} item(s)", count);
                SelectorResponse {
                    status: 200,
                    body,
                    error: None,
                }
            }
            Err(err) => {
                let status = err.status_code();
                if status >= 500 {
                    error!("Data selector failed with status {}: {}", status, err);
                } else {
                    warn!("Data selector rejected with status {}: {}", status, err);
                }
                SelectorResponse {
                    status,
                    body: serde_json::Value::Null,
                    error: Some(err.public_message()),
                }
            }
        }
    }

    /// Runs a request and returns the shaped JSON array.
    pub async fn execute(&self, request: &SelectorRequest) -> Result<serde_json::Value, SelectorError> {
        let query = self.compile(request).await?;
        let rows = self
            .executor
            .query(&query.sql, &query.params)
            .await
            .map_err(|err| {
                error!("Data selector query failed: {}; SQL: {}", err, query.sql);
                SelectorError::Database(err)
            })?;
        debug!("Shaping {} row(s)", rows.len());
        Ok(shape_rows(&query, &rows))
    }

    /// Prepares and compiles a request without executing it.
    pub async fn compile(&self, request: &SelectorRequest) -> Result<Arc<CompiledQuery>, SelectorError> {
        let prepared = self.prepare(request).await?;
        let key = cache::cache_key(&prepared.selector, &prepared.options)?;
        let compiler = SelectorCompiler::new(&MySql).with_max_depth(self.config.max_depth);
        let query = self.cache.get_or_compile(&key, &mut || {
            compiler.compile(&prepared.selector, &prepared.options)
        })?;
        Ok(query)
    }

    /// Loads, substitutes and resolves the selector, then applies the
    /// security rules.
    pub async fn prepare(&self, request: &SelectorRequest) -> Result<PreparedSelector, SelectorError> {
        let remove_unknown = request
            .remove_unknown_variables
            .unwrap_or(self.config.remove_unknown_variables);

        let (mut selector, root_id) = match &request.source {
            SelectorSource::Stored(id) => {
                let raw = self.store.load(*id).await?;
                let text = substitute_json_text(&raw, &request.context, remove_unknown);
                (parse_selector(&text)?, Some(*id))
            }
            SelectorSource::Json(raw) => {
                let text = substitute_json_text(raw, &request.context, remove_unknown);
                (parse_selector(&text)?, None)
            }
            SelectorSource::Parsed(selector) => {
                let mut selector = selector.clone();
                substitute_selector(&mut selector, &request.context, remove_unknown);
                (selector, None)
            }
        };

        let library = self
            .load_includes(&selector, &request.context, remove_unknown)
            .await?;
        resolve_includes(&mut selector, &library, root_id)?;

        if !selector.insecure && !request.context.is_authenticated() {
            return Err(SelectorError::Forbidden(
                "this data selector requires a logged-in user".to_string(),
            ));
        }

        let options = CompileOptions {
            for_filter_items: request.for_filter_items,
            environment: (!selector.insecure).then_some(self.config.environment),
        };
        Ok(PreparedSelector { selector, options })
    }

    /// Loads every stored selector reachable through includes, breadth
    /// first. Each is substituted as raw text, once.
    async fn load_includes(
        &self,
        selector: &Selector,
        context: &RequestContext,
        remove_unknown: bool,
    ) -> Result<HashMap<i64, Selector>, SelectorError> {
        let mut library = HashMap::new();
        let mut queue: VecDeque<i64> = include_ids(selector).into();

        while let Some(id) = queue.pop_front() {
            if library.contains_key(&id) {
                continue;
            }
            let raw = match self.store.load(id).await {
                Ok(raw) => raw,
                Err(StoreError::NotFound(_)) => return Err(CompileError::MissingInclude(id).into()),
                Err(err) => return Err(err.into()),
            };
            let text = substitute_json_text(&raw, context, remove_unknown);
            let included = parse_selector(&text)?;
            queue.extend(include_ids(&included));
            debug!("Loaded included selector {}", id);
            library.insert(id, included);
        }
        Ok(library)
    }
}
