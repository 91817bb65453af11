//! Repository Module
//!
//! Data access layer for the orchestrator.
//!
//! Every resource is stored as a JSON body keyed by `(namespace, name)` with a
//! resource version used for optimistic concurrency. [`Store`] is the raw seam
//! (Postgres in production, in memory in tests); the typed helpers in this
//! module convert between records and domain objects.

pub mod postgres;

#[cfg(test)]
pub mod memory;

pub use postgres::PgStore;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt;
use thiserror::Error;
use weir_core::domain::execution::PipelineExecution;
use weir_core::domain::meta::ObjectMeta;
use weir_core::domain::pipeline::Pipeline;
use weir_core::domain::secret::Secret;
use weir_core::domain::source_code::{SourceCodeCredential, SourceCodeRepository};

/// Resource kinds the orchestrator persists
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    Pipeline,
    PipelineExecution,
    SourceCodeCredential,
    SourceCodeRepository,
    Secret,
}

impl Kind {
    pub const ALL: [Kind; 5] = [
        Kind::Pipeline,
        Kind::PipelineExecution,
        Kind::SourceCodeCredential,
        Kind::SourceCodeRepository,
        Kind::Secret,
    ];

    pub fn table(self) -> &'static str {
        match self {
            Kind::Pipeline => "pipelines",
            Kind::PipelineExecution => "pipeline_executions",
            Kind::SourceCodeCredential => "source_code_credentials",
            Kind::SourceCodeRepository => "source_code_repositories",
            Kind::Secret => "secrets",
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Kind::Pipeline => "pipeline",
            Kind::PipelineExecution => "pipeline execution",
            Kind::SourceCodeCredential => "source code credential",
            Kind::SourceCodeRepository => "source code repository",
            Kind::Secret => "secret",
        };
        f.write_str(name)
    }
}

/// One stored object
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub namespace: String,
    pub name: String,
    pub resource_version: i64,
    pub body: serde_json::Value,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{kind} {namespace}:{name} not found")]
    NotFound {
        kind: Kind,
        namespace: String,
        name: String,
    },

    #[error("{kind} {namespace}:{name} already exists")]
    AlreadyExists {
        kind: Kind,
        namespace: String,
        name: String,
    },

    #[error("{kind} {namespace}:{name} was modified concurrently")]
    Conflict {
        kind: Kind,
        namespace: String,
        name: String,
    },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    pub fn not_found(kind: Kind, namespace: &str, name: &str) -> Self {
        StoreError::NotFound {
            kind,
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }

    pub fn already_exists(kind: Kind, namespace: &str, name: &str) -> Self {
        StoreError::AlreadyExists {
            kind,
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }

    pub fn conflict(kind: Kind, namespace: &str, name: &str) -> Self {
        StoreError::Conflict {
            kind,
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, StoreError::AlreadyExists { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Raw resource store
#[async_trait]
pub trait Store: Send + Sync {
    /// Returns `StoreError::NotFound` when the object does not exist
    async fn get(&self, kind: Kind, namespace: &str, name: &str) -> Result<Record>;

    /// All objects of `kind`, optionally restricted to one namespace
    async fn list(&self, kind: Kind, namespace: Option<&str>) -> Result<Vec<Record>>;

    /// Returns `StoreError::AlreadyExists` when the key is taken
    async fn create(&self, kind: Kind, record: Record) -> Result<()>;

    /// Replace the object if it is still at `expected_version`
    ///
    /// Returns `StoreError::Conflict` on a stale version.
    async fn update(&self, kind: Kind, record: Record, expected_version: i64) -> Result<()>;

    async fn delete(&self, kind: Kind, namespace: &str, name: &str) -> Result<()>;
}

/// A domain object the store can hold
pub trait Resource: Serialize + DeserializeOwned + Clone + Send + Sync {
    const KIND: Kind;

    fn meta(&self) -> &ObjectMeta;

    fn meta_mut(&mut self) -> &mut ObjectMeta;
}

macro_rules! impl_resource {
    ($ty:ty, $kind:expr) => {
        impl Resource for $ty {
            const KIND: Kind = $kind;

            fn meta(&self) -> &ObjectMeta {
                &self.meta
            }

            fn meta_mut(&mut self) -> &mut ObjectMeta {
                &mut self.meta
            }
        }
    };
}

impl_resource!(Pipeline, Kind::Pipeline);
impl_resource!(PipelineExecution, Kind::PipelineExecution);
impl_resource!(SourceCodeCredential, Kind::SourceCodeCredential);
impl_resource!(SourceCodeRepository, Kind::SourceCodeRepository);
impl_resource!(Secret, Kind::Secret);

// =============================================================================
// Typed access
// =============================================================================

fn encode<T: Resource>(object: &T) -> Result<Record> {
    let meta = object.meta();
    Ok(Record {
        namespace: meta.namespace.clone(),
        name: meta.name.clone(),
        resource_version: meta.resource_version,
        body: serde_json::to_value(object)?,
    })
}

fn decode<T: Resource>(record: Record) -> Result<T> {
    let mut object: T = serde_json::from_value(record.body)?;
    object.meta_mut().resource_version = record.resource_version;
    Ok(object)
}

pub async fn get<T: Resource>(store: &dyn Store, namespace: &str, name: &str) -> Result<T> {
    decode(store.get(T::KIND, namespace, name).await?)
}

/// Like [`get`], but `None` when the object does not exist
pub async fn find<T: Resource>(store: &dyn Store, namespace: &str, name: &str) -> Result<Option<T>> {
    match get(store, namespace, name).await {
        Ok(object) => Ok(Some(object)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}

pub async fn list<T: Resource>(store: &dyn Store, namespace: Option<&str>) -> Result<Vec<T>> {
    store
        .list(T::KIND, namespace)
        .await?
        .into_iter()
        .map(decode)
        .collect()
}

/// Store a new object and return it at its first version
pub async fn create<T: Resource>(store: &dyn Store, object: &T) -> Result<T> {
    let mut object = object.clone();
    object.meta_mut().resource_version = 1;
    store.create(T::KIND, encode(&object)?).await?;
    Ok(object)
}

/// Replace an object read earlier and return it at its new version
pub async fn update<T: Resource>(store: &dyn Store, object: &T) -> Result<T> {
    let expected = object.meta().resource_version;
    let mut object = object.clone();
    object.meta_mut().resource_version = expected + 1;
    store.update(T::KIND, encode(&object)?, expected).await?;
    Ok(object)
}

pub async fn delete<T: Resource>(store: &dyn Store, namespace: &str, name: &str) -> Result<()> {
    store.delete(T::KIND, namespace, name).await
}
