use dashmap::DashMap;
use serde_json::{Map, Value};

use super::ResponseFilter;
use crate::error::AppError;

/// Counts views of single links (`GET /links/{id}`) and reports the running
/// total in the payload's `views` field.
#[derive(Default)]
pub struct ViewCounterFilter {
    views: DashMap<u64, u64>,
}

impl ViewCounterFilter {
    pub fn views(&self, id: u64) -> u64 {
        self.views.get(&id).map(|v| *v).unwrap_or(0)
    }
}

fn link_id(path: &str) -> Option<u64> {
    let mut segments = path.trim_matches('/').split('/');
    match (segments.next(), segments.next(), segments.next()) {
        (Some("links"), Some(id), None) => id.parse().ok(),
        _ => None,
    }
}

#[async_trait::async_trait]
impl ResponseFilter for ViewCounterFilter {
    fn name(&self) -> &str {
        "view_counter"
    }

    async fn apply(
        &self,
        path: &str,
        _args: &Map<String, Value>,
        data: &mut Value,
    ) -> Result<(), AppError> {
        let Some(id) = link_id(path) else {
            return Ok(());
        };
        let count = {
            let mut entry = self.views.entry(id).or_insert(0);
            *entry += 1;
            *entry
        };
        if let Value::Object(obj) = data {
            obj.insert("views".into(), Value::from(count));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn counts_single_link_views_only() {
        let filter = ViewCounterFilter::default();
        let mut data = json!({"id": 4});
        filter.apply("/links/4", &Map::new(), &mut data).await.unwrap();
        filter.apply("/links/4", &Map::new(), &mut data).await.unwrap();
        assert_eq!(data["views"], json!(2));

        let mut list = json!({"links": []});
        filter.apply("/links", &Map::new(), &mut list).await.unwrap();
        assert!(list.get("views").is_none());
        assert_eq!(filter.views(4), 2);
    }

    #[test]
    fn parses_link_paths() {
        assert_eq!(link_id("/links/17"), Some(17));
        assert_eq!(link_id("/links/17/"), Some(17));
        assert_eq!(link_id("/links/abc"), None);
        assert_eq!(link_id("/links/1/extra"), None);
    }
}
