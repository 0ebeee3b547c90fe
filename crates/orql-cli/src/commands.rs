//! Command implementations.

use std::path::{Path, PathBuf};

use orql_core::metamodel::{Metamodel, MetamodelDef};
use orql_core::{AnsiDialect, Dialect, SessionFactory, SqliteConnection, SqliteDialect};
use orql_proto::{LoadQueryInfluencers, QueryOptions, QueryParameterBindings, QueryTree, TreeStatement};
use tracing::{debug, info};

use crate::formatter::{format_rows, parse_value, OutputFormat};
use crate::DialectKind;

/// Errors reported by the command-line tool.
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid query tree in {path}: {source}")]
    QueryTree {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("invalid parameter '{0}', expected name=value")]
    Parameter(String),

    #[error(transparent)]
    Orql(#[from] orql_core::Error),
}

/// Inputs of the `query` command.
#[derive(Debug, Clone)]
pub struct QueryRequest {
    pub model: PathBuf,
    pub query: PathBuf,
    pub database: PathBuf,
    pub params: Vec<String>,
    pub first: Option<u32>,
    pub max: Option<u32>,
}

fn read(path: &Path) -> Result<String, CliError> {
    std::fs::read_to_string(path).map_err(|source| CliError::Read {
        path: path.to_path_buf(),
        source,
    })
}

fn load_model(path: &Path) -> Result<Metamodel, CliError> {
    let def = MetamodelDef::from_json(&read(path)?)?;
    let model = Metamodel::build(def)?;
    debug!(path = %path.display(), entities = model.entities().count(), "Metamodel loaded");
    Ok(model)
}

fn load_tree(path: &Path) -> Result<QueryTree, CliError> {
    serde_json::from_str(&read(path)?).map_err(|source| CliError::QueryTree {
        path: path.to_path_buf(),
        source,
    })
}

fn dialect(kind: DialectKind) -> Box<dyn Dialect> {
    match kind {
        DialectKind::Ansi => Box::new(AnsiDialect),
        DialectKind::Sqlite => Box::new(SqliteDialect),
    }
}

fn parse_bindings(params: &[String]) -> Result<QueryParameterBindings, CliError> {
    let mut bindings = QueryParameterBindings::new();
    for param in params {
        let (name, raw) = param
            .split_once('=')
            .filter(|(name, _)| !name.is_empty())
            .ok_or_else(|| CliError::Parameter(param.clone()))?;
        bindings = match name.parse::<u32>() {
            Ok(position) => bindings.with_positional(position, parse_value(raw)),
            Err(_) => bindings.with_named(name, parse_value(raw)),
        };
    }
    Ok(bindings)
}

/// Rendered SQL of every statement the query tree runs.
pub fn explain(model: &Path, query: &Path, kind: DialectKind) -> Result<Vec<String>, CliError> {
    let factory = SessionFactory::builder(load_model(model)?)
        .dialect(dialect(kind))
        .build()?;
    let tree = load_tree(query)?;
    let sql = factory.explain(&tree, &QueryOptions::new(), &LoadQueryInfluencers::new())?;
    info!(statements = sql.len(), "Query explained");
    Ok(sql)
}

/// Run the query against a SQLite database and format its rows. Update and
/// delete trees report the affected row count.
pub fn query(request: &QueryRequest, format: OutputFormat) -> Result<String, CliError> {
    let factory = SessionFactory::builder(load_model(&request.model)?)
        .dialect(Box::new(SqliteDialect))
        .build()?;
    let tree = load_tree(&request.query)?;
    let bindings = parse_bindings(&request.params)?;

    let mut options = QueryOptions::new();
    if let Some(first) = request.first {
        options = options.with_first_result(first);
    }
    if let Some(max) = request.max {
        options = options.with_max_results(max);
    }

    let connection = SqliteConnection::open(&request.database)?;
    let mut session = factory.open_session(Box::new(connection))?;
    let output = if matches!(tree.statement, TreeStatement::Select(_)) {
        let rows = session.list(&tree, &bindings, &options)?;
        info!(rows = rows.len(), "Query executed");
        format_rows(factory.model(), &rows, format)
    } else {
        let affected = session.execute_update(&tree, &bindings, &options)?;
        info!(affected, "Update executed");
        match format {
            OutputFormat::Json => serde_json::json!({ "affected": affected }).to_string(),
            OutputFormat::Text => format!("{} rows affected", affected),
        }
    };
    drop(session);
    factory.close();
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use orql_core::metamodel::{AttributeDef, EntityDef, IdentifierDef, ScalarType};
    use orql_proto::{SelectTree, SortSpec, TreeExpr, TreePredicate};

    struct TestContext {
        dir: tempfile::TempDir,
    }

    impl TestContext {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let model = MetamodelDef::new().with_entity(
                EntityDef::new("Book", "book", IdentifierDef::new("id", "id", ScalarType::Int64))
                    .with_attribute(AttributeDef::basic("title", "title", ScalarType::String))
                    .with_attribute(AttributeDef::basic("pages", "pages", ScalarType::Int32)),
            );
            std::fs::write(dir.path().join("model.json"), model.to_json().unwrap()).unwrap();

            SqliteConnection::open(dir.path().join("books.db"))
                .unwrap()
                .execute_batch(
                    "create table book (id integer primary key, title text, pages integer);
                     insert into book values (1, 'Dune', 412);
                     insert into book values (2, 'Emma', 474);
                     insert into book values (3, 'Ubik', 202);",
                )
                .unwrap();
            Self { dir }
        }

        fn path(&self, name: &str) -> PathBuf {
            self.dir.path().join(name)
        }

        fn write_tree(&self, name: &str, tree: &QueryTree) -> PathBuf {
            let path = self.path(name);
            std::fs::write(&path, serde_json::to_string(tree).unwrap()).unwrap();
            path
        }

        fn request(&self, query: PathBuf, params: &[&str]) -> QueryRequest {
            QueryRequest {
                model: self.path("model.json"),
                query,
                database: self.path("books.db"),
                params: params.iter().map(|p| p.to_string()).collect(),
                first: None,
                max: None,
            }
        }
    }

    fn long_books() -> QueryTree {
        let mut builder = QueryTree::builder();
        let b = builder.root("Book");
        builder.select(
            SelectTree::new(vec![b])
                .with_selection(TreeExpr::path(b, ["title"]))
                .with_predicate(TreePredicate::gt(TreeExpr::path(b, ["pages"]), TreeExpr::named_param("min")))
                .with_order(SortSpec::asc(TreeExpr::path(b, ["title"]))),
        )
    }

    #[test]
    fn test_explain_renders_sql() {
        let ctx = TestContext::new();
        let query = ctx.write_tree("long.json", &long_books());
        let sql = explain(&ctx.path("model.json"), &query, DialectKind::Sqlite).unwrap();
        assert_eq!(sql.len(), 1);
        assert!(sql[0].starts_with("select "));
        assert!(sql[0].contains(" from book "));
    }

    #[test]
    fn test_query_binds_parameters() {
        let ctx = TestContext::new();
        let query = ctx.write_tree("long.json", &long_books());
        let output = query_cmd(&ctx.request(query, &["min=300"]), OutputFormat::Json);
        let rows: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(rows, serde_json::json!(["Dune", "Emma"]));
    }

    #[test]
    fn test_query_pages_and_prints_text() {
        let ctx = TestContext::new();
        let query = ctx.write_tree("long.json", &long_books());
        let mut request = ctx.request(query, &["min=0"]);
        request.first = Some(1);
        request.max = Some(1);
        assert_eq!(query_cmd(&request, OutputFormat::Text), "\"Emma\"\n(1 rows)");
    }

    #[test]
    fn test_entity_rows_carry_attributes() {
        let ctx = TestContext::new();
        let mut builder = QueryTree::builder();
        let b = builder.root("Book");
        let tree = builder.select(
            SelectTree::new(vec![b])
                .with_predicate(TreePredicate::eq(TreeExpr::path(b, ["id"]), TreeExpr::positional_param(1))),
        );
        let query = ctx.write_tree("by-id.json", &tree);
        let output = query_cmd(&ctx.request(query, &["1=3"]), OutputFormat::Json);
        let rows: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(rows[0]["$entity"], "Book");
        assert_eq!(rows[0]["title"], "Ubik");
        assert_eq!(rows[0]["pages"], 202);
    }

    #[test]
    fn test_rejects_malformed_parameter() {
        assert!(matches!(parse_bindings(&["=1".to_string()]), Err(CliError::Parameter(_))));
        assert!(matches!(parse_bindings(&["min".to_string()]), Err(CliError::Parameter(_))));
    }

    #[test]
    fn test_missing_model_file() {
        let ctx = TestContext::new();
        let err = explain(&ctx.path("absent.json"), &ctx.path("absent.json"), DialectKind::Ansi).unwrap_err();
        assert!(matches!(err, CliError::Read { .. }));
    }

    fn query_cmd(request: &QueryRequest, format: OutputFormat) -> String {
        query(request, format).unwrap()
    }
}
