use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;

use crate::error::{GraphError, Result};

/// Key/value store shared by the tasks of one session.
///
/// Values are kept as JSON so tasks only agree on keys and serde shapes,
/// never on concrete Rust types. Cloning is cheap; clones share storage.
#[derive(Clone, Debug, Default)]
pub struct Context {
    data: Arc<DashMap<String, Value>>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set(&self, key: impl Into<String>, value: impl serde::Serialize) -> Result<()> {
        self.set_sync(key, value)
    }

    pub fn set_sync(&self, key: impl Into<String>, value: impl serde::Serialize) -> Result<()> {
        let key = key.into();
        let value = serde_json::to_value(value)
            .map_err(|e| GraphError::ContextError(format!("cannot store '{key}': {e}")))?;
        self.data.insert(key, value);
        Ok(())
    }

    pub async fn get<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.get_sync(key)
    }

    pub fn get_sync<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.data
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Like [`Context::get`] but reports a missing or mistyped key as an error.
    pub async fn require<T: serde::de::DeserializeOwned>(&self, key: &str) -> Result<T> {
        self.get_sync(key)
            .ok_or_else(|| GraphError::ContextError(format!("'{key}' not found in context")))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.data.get(key).is_some_and(|v| !v.is_null())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn clones_share_storage() {
        let context = Context::new();
        let other = context.clone();
        context.set("name", "paracetamol").await.unwrap();

        let name: String = other.get("name").await.unwrap();
        assert_eq!(name, "paracetamol");
    }

    #[tokio::test]
    async fn require_reports_missing_keys() {
        let context = Context::new();
        let err = context.require::<String>("url").await.unwrap_err();
        assert!(matches!(err, GraphError::ContextError(msg) if msg.contains("url")));
    }

    #[test]
    fn null_values_do_not_count_as_present() {
        let context = Context::new();
        context.set_sync("url", Option::<String>::None).unwrap();
        assert!(!context.contains("url"));
        context.set_sync("url", Some("https://1mg.com/x")).unwrap();
        assert!(context.contains("url"));
    }
}
