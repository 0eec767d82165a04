//! Host collaborators a script reaches through its accessors.
//!
//! The sandbox never talks to a database or a result store itself. The
//! embedding application implements these traits; `InMemoryHost` is a
//! complete implementation for tests and the CLI.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use scriptbox_core::id::{DataSourceId, DataSourceRef, QueryId};
use scriptbox_core::schema::SourceSchema;
use scriptbox_core::wire::WireTable;

/// Who a run executes on behalf of. Exposed to scripts by `get_current_user()`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub groups: Vec<String>,
}

impl Identity {
    pub fn new(id: i64, name: impl Into<String>) -> Self {
        Self {
            id: Some(id),
            name: name.into(),
            email: None,
            groups: Vec::new(),
        }
    }

    pub fn anonymous() -> Self {
        Self {
            name: "anonymous".into(),
            ..Self::default()
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn with_groups(mut self, groups: Vec<String>) -> Self {
        self.groups = groups;
        self
    }
}

/// Runs query text against one data source.
pub trait QueryRunner: Send + Sync {
    fn schema(&self) -> Result<SourceSchema, String>;

    /// Error text is reported to the script verbatim.
    fn run_query(&self, query: &str, user: &Identity) -> Result<WireTable, String>;
}

pub trait DataSourceRegistry: Send + Sync {
    fn lookup(&self, source: &DataSourceRef) -> Option<Arc<dyn QueryRunner>>;
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("Query id {0} does not exist.")]
    UnknownQuery(QueryId),

    #[error("query store unavailable: {0}")]
    Unavailable(String),
}

pub trait QueryStore: Send + Sync {
    /// `Ok(None)` when the query exists but has no materialized result.
    fn latest_result(&self, query: QueryId) -> Result<Option<WireTable>, StoreError>;
}

/// Everything a sandbox needs from its host.
pub trait HostServices: DataSourceRegistry + QueryStore {}

impl<T: DataSourceRegistry + QueryStore> HostServices for T {}

/// Query runner answering from a fixed map of query text to result.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StaticSource {
    #[serde(default)]
    pub schema: SourceSchema,
    #[serde(default)]
    pub queries: HashMap<String, WireTable>,
}

impl StaticSource {
    pub fn new(schema: SourceSchema) -> Self {
        Self {
            schema,
            queries: HashMap::new(),
        }
    }

    pub fn with_query(mut self, text: impl Into<String>, result: WireTable) -> Self {
        self.queries.insert(text.into(), result);
        self
    }
}

impl QueryRunner for StaticSource {
    fn schema(&self) -> Result<SourceSchema, String> {
        Ok(self.schema.clone())
    }

    fn run_query(&self, query: &str, _user: &Identity) -> Result<WireTable, String> {
        self.queries
            .get(query.trim())
            .cloned()
            .ok_or_else(|| format!("no canned result for query: {}", query.trim()))
    }
}

struct RegisteredSource {
    id: DataSourceId,
    name: String,
    runner: Arc<dyn QueryRunner>,
}

/// In-process registry and query store.
#[derive(Default)]
pub struct InMemoryHost {
    sources: Vec<RegisteredSource>,
    results: RwLock<HashMap<QueryId, Option<WireTable>>>,
}

impl InMemoryHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_source(
        mut self,
        id: DataSourceId,
        name: impl Into<String>,
        runner: Arc<dyn QueryRunner>,
    ) -> Self {
        self.sources.push(RegisteredSource {
            id,
            name: name.into(),
            runner,
        });
        self
    }

    /// Register a query; `None` means it exists without results.
    pub fn with_query(self, id: QueryId, result: Option<WireTable>) -> Self {
        self.results.write().insert(id, result);
        self
    }

    /// Store a fresh result for a query, registering it if needed.
    pub fn store_result(&self, id: QueryId, result: WireTable) {
        self.results.write().insert(id, Some(result));
    }

    /// Build from a fixture document, see [`HostFixture`].
    pub fn from_fixture(fixture: HostFixture) -> Self {
        let mut host = Self::new();
        for source in fixture.sources {
            let runner = Arc::new(StaticSource {
                schema: source.schema,
                queries: source.queries,
            });
            host = host.with_source(DataSourceId::new(source.id), source.name, runner);
        }
        {
            let mut results = host.results.write();
            for (id, result) in fixture.query_results {
                results.insert(QueryId::new(id), result);
            }
        }
        host
    }

    pub fn from_fixture_json(text: &str) -> Result<Self, serde_json::Error> {
        let fixture: HostFixture = serde_json::from_str(text)?;
        Ok(Self::from_fixture(fixture))
    }
}

impl DataSourceRegistry for InMemoryHost {
    fn lookup(&self, source: &DataSourceRef) -> Option<Arc<dyn QueryRunner>> {
        self.sources
            .iter()
            .find(|s| match source {
                DataSourceRef::Id(id) => s.id == *id,
                DataSourceRef::Name(name) => s.name == *name,
            })
            .map(|s| s.runner.clone())
    }
}

impl QueryStore for InMemoryHost {
    fn latest_result(&self, query: QueryId) -> Result<Option<WireTable>, StoreError> {
        match self.results.read().get(&query) {
            Some(result) => Ok(result.clone()),
            None => Err(StoreError::UnknownQuery(query)),
        }
    }
}

/// JSON document describing an in-memory host.
///
/// ```json
/// {
///   "sources": [{"id": 1, "name": "warehouse", "schema": [], "queries": {"select 1": {"columns": [], "rows": []}}}],
///   "query_results": {"12": {"columns": [], "rows": []}, "13": null}
/// }
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HostFixture {
    #[serde(default)]
    pub sources: Vec<SourceFixture>,
    #[serde(default)]
    pub query_results: HashMap<i64, Option<WireTable>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceFixture {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub schema: SourceSchema,
    #[serde(default)]
    pub queries: HashMap<String, WireTable>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use scriptbox_core::schema::SchemaTable;

    fn host() -> InMemoryHost {
        let source = StaticSource::new(SourceSchema::new(vec![SchemaTable {
            name: "events".into(),
            columns: vec!["id".into()],
        }]))
        .with_query("select 1", WireTable::default());
        InMemoryHost::new()
            .with_source(DataSourceId::new(3), "warehouse", Arc::new(source))
            .with_query(QueryId::new(7), None)
    }

    #[test]
    fn lookup_by_name_or_id() {
        let h = host();
        assert!(h.lookup(&DataSourceRef::Id(DataSourceId::new(3))).is_some());
        assert!(h.lookup(&DataSourceRef::Name("warehouse".into())).is_some());
        assert!(h.lookup(&DataSourceRef::Name("nope".into())).is_none());
    }

    #[test]
    fn store_distinguishes_unknown_from_pending() {
        let h = host();
        assert_eq!(h.latest_result(QueryId::new(7)), Ok(None));
        assert_eq!(
            h.latest_result(QueryId::new(8)),
            Err(StoreError::UnknownQuery(QueryId::new(8)))
        );
        h.store_result(QueryId::new(7), WireTable::default());
        assert_eq!(h.latest_result(QueryId::new(7)), Ok(Some(WireTable::default())));
    }

    #[test]
    fn static_source_reports_missing_queries() {
        let h = host();
        let runner = h.lookup(&DataSourceRef::Id(DataSourceId::new(3))).unwrap();
        assert!(runner.run_query(" select 1 ", &Identity::anonymous()).is_ok());
        let err = runner.run_query("select 2", &Identity::anonymous()).unwrap_err();
        assert!(err.contains("select 2"));
    }

    #[test]
    fn fixture_document_loads() {
        let text = r#"{
            "sources": [{"id": 1, "name": "db", "queries": {"q": {"columns": [{"name": "a", "type": "integer"}], "rows": [{"a": 1}]}}}],
            "query_results": {"5": null}
        }"#;
        let h = InMemoryHost::from_fixture_json(text).unwrap();
        let runner = h.lookup(&DataSourceRef::Name("db".into())).unwrap();
        assert_eq!(runner.run_query("q", &Identity::anonymous()).unwrap().rows.len(), 1);
        assert_eq!(h.latest_result(QueryId::new(5)), Ok(None));
    }
}
