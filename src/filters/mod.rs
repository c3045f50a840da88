//! Response filter infrastructure for linkhub.
//!
//! A response filter is registered under a name following the storage
//! convention `<method>_<path-segments>__<filter-name>`.  The part before the
//! last `__` (plus one `_`) is the signature prefix; a filter runs for every
//! request whose key (see [`crate::util::request_key`]) starts with that
//! prefix.  All matching filters run, most specific prefix first, each one
//! mutating the JSON payload in place.  The first failing filter aborts the
//! chain.

use std::sync::Arc;

use serde_json::{Map, Value};

use crate::error::AppError;
use crate::metrics::{self, Metrics};
use crate::util::request_key;

pub mod request_log;
pub mod video_embed;
pub mod view_counter;

use self::request_log::RequestLogFilter;
use self::video_embed::VideoEmbedFilter;
use self::view_counter::ViewCounterFilter;

/// Registration table of the built-in filters, in registration order.
pub const REGISTERED: &[&str] = &[
    "get__request_log",
    "get_links__view_counter",
    "get_links__video_embed",
];

/// Parsed form of a filter registration name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FilterSpec {
    /// Lower-cased `<method>_<path-segments>_` prefix.
    pub signature_prefix: String,
    /// Registration name this entry was parsed from.
    pub source: String,
    /// Human-readable identifier after the last `__`.
    pub declared_name: String,
}

/// Recover prefix and declared name from `<method>_<segments>__<name>`.
/// Returns `None` for names that do not follow the convention.
pub fn parse_signature(name: &str) -> Option<FilterSpec> {
    let split = name.rfind("__")?;
    let declared_name = &name[split + 2..];
    let signature_prefix = name[..split + 1].to_ascii_lowercase();
    let method = signature_prefix.split('_').next().unwrap_or_default();
    if declared_name.is_empty()
        || method.is_empty()
        || !method.chars().all(|c| c.is_ascii_alphabetic())
    {
        return None;
    }
    Some(FilterSpec {
        signature_prefix,
        source: name.to_string(),
        declared_name: declared_name.to_string(),
    })
}

/// Trait implemented by all response filters.  `data` is the complete
/// response payload; filters mutate it in place.  Returning an error aborts
/// the remaining chain and fails the request.
#[async_trait::async_trait]
pub trait ResponseFilter: Send + Sync {
    fn name(&self) -> &str;
    async fn apply(
        &self,
        path: &str,
        args: &Map<String, Value>,
        data: &mut Value,
    ) -> Result<(), AppError>;
}

struct Registration {
    spec: FilterSpec,
    filter: Arc<dyn ResponseFilter>,
}

/// Ordered registration table of response filters.
#[derive(Clone, Default)]
pub struct FilterRegistry {
    entries: Vec<Arc<Registration>>,
}

impl FilterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the registry from the enabled built-in names.  Unknown or
    /// unparsable names are skipped with a warning.
    pub fn standard(enabled: &[String], metrics: Arc<Metrics>) -> Self {
        let mut registry = Self::new();
        for name in enabled {
            let filter: Arc<dyn ResponseFilter> = match name.as_str() {
                "get__request_log" => Arc::new(RequestLogFilter::new(metrics.clone())),
                "get_links__view_counter" => Arc::new(ViewCounterFilter::default()),
                "get_links__video_embed" => Arc::new(VideoEmbedFilter),
                _ => {
                    tracing::warn!(filter = %name, "unknown response filter name, skipping");
                    continue;
                }
            };
            registry.register(name, filter);
        }
        registry
    }

    /// Register `filter` under a storage-convention name.  Returns false
    /// (and registers nothing) when the name cannot be parsed.
    pub fn register(&mut self, name: &str, filter: Arc<dyn ResponseFilter>) -> bool {
        match parse_signature(name) {
            Some(spec) => {
                tracing::debug!(filter = %spec.declared_name, prefix = %spec.signature_prefix, "registered response filter");
                self.entries.push(Arc::new(Registration { spec, filter }));
                true
            }
            None => {
                tracing::warn!(filter = %name, "unparsable response filter name, ignoring");
                false
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Names the registered filters report for themselves, in registration
    /// order.
    pub fn filter_names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.filter.name()).collect()
    }

    fn matching_entries(&self, method: &str, path: &str) -> Vec<&Arc<Registration>> {
        let key = request_key(method, path);
        let mut hits: Vec<&Arc<Registration>> = self
            .entries
            .iter()
            .filter(|e| key.starts_with(&e.spec.signature_prefix))
            .collect();
        // stable: equal prefixes keep registration order
        hits.sort_by(|a, b| {
            b.spec
                .signature_prefix
                .len()
                .cmp(&a.spec.signature_prefix.len())
        });
        hits
    }

    /// Filters matching the request, most specific prefix first.
    pub fn matching(&self, method: &str, path: &str) -> Vec<&FilterSpec> {
        self.matching_entries(method, path)
            .into_iter()
            .map(|e| &e.spec)
            .collect()
    }

    /// Run every matching filter over `data`.  Returns the declared names of
    /// the filters that ran.
    pub async fn run(
        &self,
        method: &str,
        path: &str,
        args: &Map<String, Value>,
        data: &mut Value,
        metrics: &Metrics,
    ) -> Result<Vec<String>, AppError> {
        let mut ran = Vec::new();
        for entry in self.matching_entries(method, path) {
            let name = entry.spec.declared_name.as_str();
            let kind = entry.filter.name();
            tracing::trace!(filter = %name, kind, path, "running response filter");
            if let Err(err) = entry.filter.apply(path, args, data).await {
                tracing::warn!(filter = %name, kind, path, error = %err, "response filter failed, aborting chain");
                return Err(err);
            }
            metrics::incr(&metrics.filter_runs_total);
            ran.push(name.to_string());
        }
        Ok(ran)
    }
}

/// Parse the enabled filter names from `LINKHUB_RESPONSE_FILTERS`.  When
/// unset every registered filter is enabled.  Names are trimmed and
/// lower-cased.
pub fn parse_filter_names(raw: Option<&str>) -> Vec<String> {
    match raw {
        Some(var) => var
            .split(',')
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .collect(),
        None => REGISTERED.iter().map(|s| s.to_string()).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Tagger(&'static str);

    #[async_trait::async_trait]
    impl ResponseFilter for Tagger {
        fn name(&self) -> &str {
            self.0
        }

        async fn apply(
            &self,
            _path: &str,
            _args: &Map<String, Value>,
            data: &mut Value,
        ) -> Result<(), AppError> {
            if let Some(arr) = data.get_mut("ran").and_then(Value::as_array_mut) {
                arr.push(json!(self.0));
            }
            Ok(())
        }
    }

    struct Failing;

    #[async_trait::async_trait]
    impl ResponseFilter for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        async fn apply(
            &self,
            _path: &str,
            _args: &Map<String, Value>,
            _data: &mut Value,
        ) -> Result<(), AppError> {
            Err(AppError::Filter {
                name: "failing".into(),
                message: "boom".into(),
            })
        }
    }

    fn registry(names: &[&'static str]) -> FilterRegistry {
        let mut r = FilterRegistry::new();
        for &n in names {
            r.register(n, Arc::new(Tagger(n)));
        }
        r
    }

    #[test]
    fn parses_storage_names() {
        let spec = parse_signature("get_links__video_embed").unwrap();
        assert_eq!(spec.signature_prefix, "get_links_");
        assert_eq!(spec.declared_name, "video_embed");
        assert_eq!(parse_signature("GET__log").unwrap().signature_prefix, "get_");
        assert!(parse_signature("get_links_video").is_none());
        assert!(parse_signature("get_links__").is_none());
        assert!(parse_signature("__name").is_none());
        assert!(parse_signature("g3t_links__x").is_none());
    }

    #[test]
    fn filter_names_come_from_the_filters() {
        let r = FilterRegistry::standard(&parse_filter_names(None), Arc::new(Metrics::default()));
        assert_eq!(r.filter_names(), vec!["request_log", "view_counter", "video_embed"]);

        let mut r = FilterRegistry::new();
        r.register("get_links__renamed", Arc::new(Failing));
        assert_eq!(r.filter_names(), vec!["failing"]);
    }

    #[test]
    fn unparsable_names_are_not_registered() {
        let mut r = FilterRegistry::new();
        assert!(!r.register("nonsense", Arc::new(Tagger("x"))));
        assert!(r.is_empty());
    }

    #[test]
    fn orders_by_specificity_then_registration() {
        let r = registry(&["get__all", "get_links__a", "post_links__p", "get_links__b", "get_links_5__five"]);
        let names: Vec<_> = r
            .matching("GET", "/links/5")
            .into_iter()
            .map(|s| s.declared_name.as_str())
            .collect();
        assert_eq!(names, vec!["five", "a", "b", "all"]);

        let names: Vec<_> = r
            .matching("get", "/channels")
            .into_iter()
            .map(|s| s.declared_name.as_str())
            .collect();
        assert_eq!(names, vec!["all"]);
    }

    #[test]
    fn prefix_does_not_match_longer_segment() {
        let r = registry(&["get_links__a"]);
        assert!(r.matching("GET", "/linksearch").is_empty());
        assert_eq!(r.matching("GET", "/links").len(), 1);
        assert!(r.matching("POST", "/links").is_empty());
    }

    #[tokio::test]
    async fn run_mutates_payload_in_order() {
        let r = registry(&["get__all", "get_links__specific"]);
        let mut data = json!({"ran": []});
        let metrics = Metrics::default();
        let ran = r
            .run("GET", "/links", &Map::new(), &mut data, &metrics)
            .await
            .unwrap();
        assert_eq!(ran, vec!["specific", "all"]);
        assert_eq!(data["ran"], json!(["get_links__specific", "get__all"]));
    }

    #[tokio::test]
    async fn failure_aborts_remaining_filters() {
        let mut r = FilterRegistry::new();
        r.register("get_links__failing", Arc::new(Failing));
        r.register("get__all", Arc::new(Tagger("get__all")));
        let mut data = json!({"ran": []});
        let err = r
            .run("GET", "/links", &Map::new(), &mut data, &Metrics::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Filter { .. }));
        assert_eq!(data["ran"], json!([]));
    }

    #[test]
    fn filter_names_default_to_registration_table() {
        assert_eq!(parse_filter_names(None).len(), REGISTERED.len());
        assert_eq!(
            parse_filter_names(Some(" GET__request_log, ,get_links__video_embed")),
            vec!["get__request_log", "get_links__video_embed"]
        );
    }
}
