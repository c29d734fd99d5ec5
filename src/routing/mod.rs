// Query routing
// Picks the collection a free-text query is searched against

#[cfg(test)]
mod tests;

use async_trait::async_trait;
use std::collections::HashMap;
use tracing::debug;

use crate::models::Collection;
use crate::{KnowledgeError, Result};

/// Selects one collection title for a query
#[async_trait]
pub trait Router: Send + Sync {
    async fn find_route(&self, query: &str, collections: &HashMap<String, Collection>)
    -> Result<String>;
}

/// Routes every query to a fixed collection.
///
/// Without a configured target it falls back to the only known collection, if
/// there is exactly one.
#[derive(Debug, Clone, Default)]
pub struct StaticRouter {
    target: Option<String>,
}

impl StaticRouter {
    #[inline]
    pub fn new(target: Option<String>) -> Self {
        Self { target }
    }

    #[inline]
    pub fn target(&self) -> Option<&str> {
        self.target.as_deref()
    }
}

#[async_trait]
impl Router for StaticRouter {
    async fn find_route(
        &self,
        query: &str,
        collections: &HashMap<String, Collection>,
    ) -> Result<String> {
        if let Some(target) = &self.target {
            debug!("Routing query {:?} to configured collection {}", query, target);
            return Ok(target.clone());
        }

        let mut titles = collections.keys();
        match (titles.next(), titles.next()) {
            (Some(only), None) => {
                debug!("Routing query {:?} to sole collection {}", query, only);
                Ok(only.clone())
            }
            (None, _) => Err(KnowledgeError::Config(
                "No collections exist to route the query to".to_string(),
            )),
            (Some(_), Some(_)) => Err(KnowledgeError::Config(format!(
                "{} collections exist and no default collection is configured",
                collections.len()
            ))),
        }
    }
}
