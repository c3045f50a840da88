use std::sync::Arc;

use serde_json::{Map, Value};

use super::ResponseFilter;
use crate::error::AppError;
use crate::metrics::{self, Metrics};

/// Logs every GET response and counts it.  Payload is left untouched.
pub struct RequestLogFilter {
    metrics: Arc<Metrics>,
}

impl RequestLogFilter {
    pub fn new(metrics: Arc<Metrics>) -> Self {
        Self { metrics }
    }
}

#[async_trait::async_trait]
impl ResponseFilter for RequestLogFilter {
    fn name(&self) -> &str {
        "request_log"
    }

    async fn apply(
        &self,
        path: &str,
        args: &Map<String, Value>,
        data: &mut Value,
    ) -> Result<(), AppError> {
        let items = match data {
            Value::Object(obj) => obj
                .get("links")
                .and_then(Value::as_array)
                .map(|a| a.len())
                .unwrap_or(1),
            Value::Array(arr) => arr.len(),
            _ => 1,
        };
        tracing::debug!(path, args = ?args.keys().collect::<Vec<_>>(), items, "served GET");
        metrics::incr(&self.metrics.get_responses_total);
        Ok(())
    }
}
