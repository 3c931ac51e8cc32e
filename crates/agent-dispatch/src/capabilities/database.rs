//! Text-to-SQL question answering over a read-only SQLite file.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context};
use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags};
use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};

use super::{AgentType, Capability, CapabilityInput};
use crate::gateway::{CompletionGateway, CompletionRequest, SamplingOptions};

pub const NOT_CONFIGURED: &str =
    "Database QA is not configured. Set QA_DATABASE_PATH to a SQLite database file.";

/// Row limit the generated query is asked to respect.
const TOP_K: usize = 10;
/// Hard cap on rows read back, whatever the query says.
const MAX_ROWS: usize = 200;
const SAMPLE_ROWS: usize = 3;

lazy_static! {
    static ref SQL_FENCE: Regex = Regex::new(r"(?s)```(?:sql|sqlite)?[ \t]*\n?(.*?)```").unwrap();
    static ref SQL_PREFIX: Regex = Regex::new(r"(?i)^\s*(?:sql\s*query|sqlquery|query|sql)\s*:\s*").unwrap();
    static ref READ_STATEMENT: Regex = Regex::new(r"(?i)^\s*(select|with)\b").unwrap();
}

/// Pull the statement out of a model reply: fenced block first, then the
/// bare text, minus any "SQLQuery:"-style label and trailing semicolon.
pub fn extract_sql(reply: &str) -> String {
    let body = SQL_FENCE
        .captures(reply)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .unwrap_or(reply);
    let body = SQL_PREFIX.replace(body.trim(), "");
    body.trim().trim_end_matches(';').trim().to_string()
}

/// Only a single SELECT (or CTE) statement is allowed through.
pub fn ensure_read_only(sql: &str) -> anyhow::Result<()> {
    if !READ_STATEMENT.is_match(sql) {
        bail!("only SELECT statements are allowed, got: {}", sql);
    }
    if sql.contains(';') {
        bail!("multiple statements are not allowed");
    }
    Ok(())
}

fn open_read_only(path: &Path) -> anyhow::Result<Connection> {
    Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .with_context(|| format!("failed to open {}", path.display()))
}

fn to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::String(format!("<blob {} bytes>", b.len())),
    }
}

fn query_rows(conn: &Connection, sql: &str, max_rows: usize) -> anyhow::Result<Vec<Map<String, Value>>> {
    let mut stmt = conn.prepare(sql)?;
    let names: Vec<String> = stmt.column_names().iter().map(|n| n.to_string()).collect();
    let mut rows = stmt.query([])?;

    let mut records = Vec::new();
    while let Some(row) = rows.next()? {
        if records.len() >= max_rows {
            break;
        }
        let mut record = Map::new();
        for (i, name) in names.iter().enumerate() {
            record.insert(name.clone(), to_json(row.get_ref(i)?));
        }
        records.push(record);
    }
    Ok(records)
}

/// CREATE statements for every user table, each followed by a few sample rows.
pub fn table_info(path: &Path) -> anyhow::Result<String> {
    let conn = open_read_only(path)?;
    let mut stmt = conn.prepare(
        "SELECT name, sql FROM sqlite_master
         WHERE type = 'table' AND name NOT LIKE 'sqlite_%'
         ORDER BY name",
    )?;
    let tables: Vec<(String, String)> = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get::<_, Option<String>>(1)?.unwrap_or_default())))?
        .collect::<Result<_, _>>()?;

    let mut sections = Vec::with_capacity(tables.len());
    for (name, ddl) in tables {
        let sample_sql = format!("SELECT * FROM \"{}\" LIMIT {}", name.replace('"', "\"\""), SAMPLE_ROWS);
        let sample = query_rows(&conn, &sample_sql, SAMPLE_ROWS)?;
        let lines: Vec<String> = sample
            .iter()
            .map(|record| {
                record
                    .values()
                    .map(|v| match v {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .collect::<Vec<_>>()
                    .join("\t")
            })
            .collect();
        let header = sample
            .first()
            .map(|r| r.keys().cloned().collect::<Vec<_>>().join("\t"))
            .unwrap_or_default();

        sections.push(format!(
            "{}\n\n/*\n{} rows from {} table:\n{}\n{}\n*/",
            ddl.trim(),
            lines.len(),
            name,
            header,
            lines.join("\n")
        ));
    }
    Ok(sections.join("\n\n"))
}

/// Run one validated read-only statement, returning the rows as pretty JSON.
pub fn run_select(path: &Path, sql: &str) -> anyhow::Result<String> {
    ensure_read_only(sql)?;
    let conn = open_read_only(path)?;
    let records = query_rows(&conn, sql, MAX_ROWS)?;
    Ok(serde_json::to_string_pretty(&records)?)
}

pub struct DatabaseCapability {
    gateway: Arc<dyn CompletionGateway>,
    database: Option<PathBuf>,
}

impl DatabaseCapability {
    pub fn new(gateway: Arc<dyn CompletionGateway>, database: Option<PathBuf>) -> Self {
        Self { gateway, database }
    }

    async fn blocking<T, F>(&self, path: &Path, f: F) -> anyhow::Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Path) -> anyhow::Result<T> + Send + 'static,
    {
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || f(&path))
            .await
            .map_err(|e| anyhow!("database task failed: {}", e))?
    }

    async fn write_query(&self, path: &Path, question: &str) -> String {
        let schema = match self.blocking(path, table_info).await {
            Ok(schema) => schema,
            Err(e) => return format!("-- ERROR generating query: {}", e),
        };

        let system = format!(
            "Given an input question, create a syntactically correct sqlite query to run to help find the answer.\n\
             Only use the following tables and columns:\n{}\n\
             Always limit to {} results unless otherwise specified.\n\
             Reply with the SQL query only.",
            schema, TOP_K
        );
        let request = CompletionRequest::with_system(
            system,
            format!("Question: {}", question),
            SamplingOptions {
                temperature: 0.1,
                max_tokens: 400,
                top_p: 1.0,
            },
        );

        match self.gateway.generate(request).await {
            Ok(reply) => extract_sql(&reply),
            Err(e) => {
                error!("SQL generation failed: {}", e);
                format!("-- ERROR generating query: {}", e)
            }
        }
    }
}

#[async_trait]
impl Capability for DatabaseCapability {
    fn agent_type(&self) -> AgentType {
        AgentType::Database
    }

    async fn run(&self, input: CapabilityInput) -> anyhow::Result<String> {
        let Some(path) = self.database.as_deref() else {
            return Ok(NOT_CONFIGURED.to_string());
        };

        let query = self.write_query(path, &input.prompt).await;
        debug!("Generated SQL: {}", query);

        let sql = query.clone();
        let result = match self.blocking(path, move |p| run_select(p, &sql)).await {
            Ok(rows) => rows,
            Err(e) => {
                warn!("SQL execution failed: {}", e);
                return Ok(format!("Failed to run SQL query: {}", e));
            }
        };
        info!("🗄️ SQL query returned {} bytes of rows", result.len());

        let prompt = format!(
            "Given the question:\n{}\n\nThe SQL query used:\n{}\n\nAnd the SQL result:\n{}\n\nProvide a helpful answer. {}",
            input.prompt,
            query,
            result,
            input.answer_mode.tone_instruction()
        );
        match self
            .gateway
            .generate(CompletionRequest::from_prompt(prompt, SamplingOptions::creative()))
            .await
        {
            Ok(answer) => Ok(answer.trim().to_string()),
            Err(e) => Ok(format!("Failed to generate final answer: {}", e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::ScriptedGateway;
    use tempfile::TempDir;

    fn cars_db(dir: &TempDir) -> PathBuf {
        let path = dir.path().join("qa.db");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(
            "CREATE TABLE cars (brand TEXT NOT NULL, price INTEGER, rating REAL);
             INSERT INTO cars VALUES ('Maruti', 400000, 4.1), ('Honda', 900000, 4.5), ('Tata', 650000, NULL);",
        )
        .unwrap();
        path
    }

    // ===== Extraction =====

    #[test]
    fn test_extract_sql_variants() {
        assert_eq!(extract_sql("```sql\nSELECT 1;\n```"), "SELECT 1");
        assert_eq!(extract_sql("SQLQuery: SELECT brand FROM cars;"), "SELECT brand FROM cars");
        assert_eq!(extract_sql("  select * from cars  "), "select * from cars");
    }

    #[test]
    fn test_ensure_read_only() {
        assert!(ensure_read_only("SELECT * FROM cars").is_ok());
        assert!(ensure_read_only("with t as (select 1) select * from t").is_ok());
        assert!(ensure_read_only("DELETE FROM cars").is_err());
        assert!(ensure_read_only("SELECT 1; DROP TABLE cars").is_err());
        assert!(ensure_read_only("-- ERROR generating query: boom").is_err());
    }

    // ===== SQLite Access =====

    #[test]
    fn test_table_info_lists_schema_and_samples() {
        let dir = TempDir::new().unwrap();
        let path = cars_db(&dir);
        let info = table_info(&path).unwrap();
        assert!(info.contains("CREATE TABLE cars"));
        assert!(info.contains("3 rows from cars table"));
        assert!(info.contains("Maruti"));
    }

    #[test]
    fn test_run_select_renders_json_rows() {
        let dir = TempDir::new().unwrap();
        let path = cars_db(&dir);
        let json = run_select(&path, "SELECT brand, rating FROM cars ORDER BY price DESC").unwrap();
        let rows: Vec<Value> = serde_json::from_str(&json).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0]["brand"], "Honda");
        assert_eq!(rows[1]["rating"], Value::Null);
    }

    // ===== Capability =====

    #[tokio::test]
    async fn test_question_answered_from_rows() {
        let dir = TempDir::new().unwrap();
        let path = cars_db(&dir);
        let gateway = Arc::new(
            ScriptedGateway::new()
                .reply("```sql\nSELECT brand, price FROM cars ORDER BY price DESC LIMIT 1;\n```")
                .reply("Honda is the most expensive brand."),
        );
        let capability = DatabaseCapability::new(gateway.clone(), Some(path));

        let reply = capability
            .run(CapabilityInput::new("Which brand is most expensive?"))
            .await
            .unwrap();
        assert_eq!(reply, "Honda is the most expensive brand.");

        let requests = gateway.requests();
        assert!(requests[0].messages[0].content.contains("Always limit to 10 results"));
        let answer_prompt = &requests[1].messages[0].content;
        assert!(answer_prompt.contains("\"brand\": \"Honda\""));
        assert!(answer_prompt.contains("SELECT brand, price FROM cars"));
    }

    #[tokio::test]
    async fn test_write_statement_is_refused() {
        let dir = TempDir::new().unwrap();
        let path = cars_db(&dir);
        let gateway = Arc::new(ScriptedGateway::new().reply("DELETE FROM cars"));
        let capability = DatabaseCapability::new(gateway.clone(), Some(path.clone()));

        let reply = capability.run(CapabilityInput::new("remove cars")).await.unwrap();
        assert!(reply.starts_with("Failed to run SQL query:"));
        assert_eq!(gateway.call_count(), 1);

        let conn = Connection::open(&path).unwrap();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM cars", [], |r| r.get(0)).unwrap();
        assert_eq!(count, 3);
    }

    #[tokio::test]
    async fn test_generation_failure_reported_as_run_failure() {
        let dir = TempDir::new().unwrap();
        let capability = DatabaseCapability::new(
            Arc::new(ScriptedGateway::new().fail("model offline")),
            Some(cars_db(&dir)),
        );
        let reply = capability.run(CapabilityInput::new("count cars")).await.unwrap();
        assert!(reply.starts_with("Failed to run SQL query:"));
        assert!(reply.contains("-- ERROR generating query: model offline"));
    }

    #[tokio::test]
    async fn test_answer_failure_text() {
        let dir = TempDir::new().unwrap();
        let capability = DatabaseCapability::new(
            Arc::new(ScriptedGateway::new().reply("SELECT COUNT(*) AS n FROM cars").fail("timeout")),
            Some(cars_db(&dir)),
        );
        let reply = capability.run(CapabilityInput::new("how many cars?")).await.unwrap();
        assert_eq!(reply, "Failed to generate final answer: timeout");
    }

    #[tokio::test]
    async fn test_unconfigured_database() {
        let capability = DatabaseCapability::new(Arc::new(ScriptedGateway::new()), None);
        assert_eq!(capability.run(CapabilityInput::new("q")).await.unwrap(), NOT_CONFIGURED);
    }
}
