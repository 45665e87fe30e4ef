//! Turning a syntactically valid location into a writable target
//!
//! Experiment existence comes from an [`ExperimentCatalog`], write access from
//! an [`Authorizer`]. Positive experiment lookups are cached with a TTL, so an
//! experiment that disappears is noticed once its entry expires.

use async_trait::async_trait;
use moka::sync::Cache;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use super::error::{bounded, IngestError};
use crate::data::TraceLocation;
use crate::validate::Violation;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CollaboratorError {
    #[error("{0} unavailable")]
    Unavailable(String),

    #[error("{0}")]
    Failed(String),
}

/// Knows which experiments exist
#[async_trait]
pub trait ExperimentCatalog: Send + Sync {
    async fn experiment_exists(&self, experiment_id: &str) -> Result<bool, CollaboratorError>;
}

/// Decides who may write traces where
#[async_trait]
pub trait Authorizer: Send + Sync {
    async fn can_write(
        &self,
        location: &TraceLocation,
        principal: Option<&str>,
    ) -> Result<bool, CollaboratorError>;
}

/// Catalog that accepts every experiment id
#[derive(Debug, Default, Clone, Copy)]
pub struct AnyExperiment;

#[async_trait]
impl ExperimentCatalog for AnyExperiment {
    async fn experiment_exists(&self, _experiment_id: &str) -> Result<bool, CollaboratorError> {
        Ok(true)
    }
}

/// Catalog backed by a fixed set of experiment ids
#[derive(Debug, Default, Clone)]
pub struct StaticExperimentCatalog {
    experiments: HashSet<String>,
}

impl StaticExperimentCatalog {
    pub fn new<I, S>(experiment_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            experiments: experiment_ids.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl ExperimentCatalog for StaticExperimentCatalog {
    async fn experiment_exists(&self, experiment_id: &str) -> Result<bool, CollaboratorError> {
        Ok(self.experiments.contains(experiment_id))
    }
}

/// Authorizer that lets everyone write everywhere
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

#[async_trait]
impl Authorizer for AllowAll {
    async fn can_write(
        &self,
        _location: &TraceLocation,
        _principal: Option<&str>,
    ) -> Result<bool, CollaboratorError> {
        Ok(true)
    }
}

/// Concrete destination of a resolved location
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocationTarget {
    Experiment {
        experiment_id: String,
    },
    Table {
        catalog: String,
        schema: String,
        table: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedLocation {
    pub location: TraceLocation,
    pub target: LocationTarget,
}

/// Experiment ids recently confirmed to exist
pub struct ExperimentCache {
    cache: Cache<String, ()>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ExperimentCache {
    pub fn with_config(max_entries: u64, ttl: Duration) -> Self {
        Self {
            cache: Cache::builder()
                .max_capacity(max_entries)
                .time_to_live(ttl)
                .build(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn contains(&self, experiment_id: &str) -> bool {
        if self.cache.contains_key(experiment_id) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            true
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    pub fn insert(&self, experiment_id: &str) {
        self.cache.insert(experiment_id.to_string(), ());
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
}

pub struct LocationResolver {
    catalog: Arc<dyn ExperimentCatalog>,
    authorizer: Arc<dyn Authorizer>,
    known_experiments: ExperimentCache,
}

impl LocationResolver {
    pub fn new(
        catalog: Arc<dyn ExperimentCatalog>,
        authorizer: Arc<dyn Authorizer>,
        cache_ttl: Duration,
    ) -> Self {
        Self {
            catalog,
            authorizer,
            known_experiments: ExperimentCache::with_config(10_000, cache_ttl),
        }
    }

    pub fn cache(&self) -> &ExperimentCache {
        &self.known_experiments
    }

    /// Check that the location exists and that `principal` may write to it
    pub async fn resolve(
        &self,
        location: &TraceLocation,
        principal: Option<&str>,
        deadline: Instant,
    ) -> Result<ResolvedLocation, IngestError> {
        let target = match location {
            TraceLocation::MlflowExperiment(loc) => {
                let experiment_id = &loc.experiment_id;
                if !self.known_experiments.contains(experiment_id) {
                    let exists = bounded(
                        deadline,
                        "look up experiment",
                        self.catalog.experiment_exists(experiment_id),
                    )
                    .await?;
                    if !exists {
                        return Err(IngestError::violation(Violation::invalid_location(
                            format!("experiment '{experiment_id}' does not exist"),
                        )));
                    }
                    self.known_experiments.insert(experiment_id);
                }
                LocationTarget::Experiment {
                    experiment_id: experiment_id.clone(),
                }
            }
            TraceLocation::InferenceTable(loc) => {
                let (catalog, schema, table) = loc.parts().ok_or_else(|| {
                    IngestError::violation(Violation::invalid_location(format!(
                        "full_table_name '{}' must be catalog.schema.table",
                        loc.full_table_name
                    )))
                })?;
                LocationTarget::Table {
                    catalog: catalog.to_string(),
                    schema: schema.to_string(),
                    table: table.to_string(),
                }
            }
        };

        self.authorize(location, principal, deadline).await?;

        Ok(ResolvedLocation {
            location: location.clone(),
            target,
        })
    }

    /// Write check alone, for changes to traces whose location is already known
    pub async fn authorize(
        &self,
        location: &TraceLocation,
        principal: Option<&str>,
        deadline: Instant,
    ) -> Result<(), IngestError> {
        let allowed = bounded(
            deadline,
            "authorize write",
            self.authorizer.can_write(location, principal),
        )
        .await?;
        if !allowed {
            return Err(IngestError::PermissionDenied {
                principal: principal.unwrap_or("anonymous").to_string(),
                location: location.to_string(),
            });
        }
        Ok(())
    }
}
