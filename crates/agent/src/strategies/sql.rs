//! Sandboxed query tools.
//!
//! The template is vetted before every run: named `:param` placeholders become bound
//! positional parameters, referenced tables must be on the tool's allow-list, and
//! read-only tools must be a single `SELECT`. These checks are string-level guards that
//! back up database permissions; they are not a SQL parser.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use shopkeep_core::{ExecutionKind, ToolRegistryEntry};
use shopkeep_db::QueryRunner;

use super::{parse_config, ExecutionStrategy, ToolCallContext};
use crate::error::ToolError;

const TABLE_KEYWORDS: &[&str] = &["FROM", "JOIN", "INTO", "UPDATE"];
const CLAUSE_KEYWORDS: &[&str] = &[
    "WHERE", "ON", "USING", "JOIN", "INNER", "LEFT", "RIGHT", "FULL", "CROSS", "OUTER",
    "NATURAL", "GROUP", "ORDER", "LIMIT", "OFFSET", "HAVING", "UNION", "INTERSECT", "EXCEPT",
    "WINDOW", "SET", "VALUES", "SELECT", "RETURNING", "DEFAULT",
];

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SqlToolConfig {
    query: String,
    allowed_tables: Vec<String>,
}

#[derive(Debug, PartialEq, Eq)]
struct CompiledQuery {
    sql: String,
    params: Vec<String>,
}

pub struct SqlStrategy {
    runner: Arc<dyn QueryRunner>,
}

impl SqlStrategy {
    pub fn new(runner: Arc<dyn QueryRunner>) -> Self {
        Self { runner }
    }
}

#[async_trait]
impl ExecutionStrategy for SqlStrategy {
    fn kind(&self) -> ExecutionKind {
        ExecutionKind::Sql
    }

    async fn execute(
        &self,
        entry: &ToolRegistryEntry,
        args: Value,
        _context: &ToolCallContext,
    ) -> Result<Value, ToolError> {
        let config: SqlToolConfig = parse_config(entry)?;
        vet_statement(&config.query, &config.allowed_tables, entry.is_read_only)?;

        let compiled = compile_placeholders(&config.query);
        let params = compiled
            .params
            .iter()
            .map(|name| {
                args.get(name).cloned().ok_or_else(|| {
                    ToolError::Validation(format!("query parameter `{name}` was not provided"))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        if returns_rows(&config.query) {
            let rows = self.runner.fetch(&compiled.sql, &params).await?;
            Ok(json!({"row_count": rows.len(), "rows": rows}))
        } else {
            let rows_affected = self.runner.execute(&compiled.sql, &params).await?;
            Ok(json!({"rows_affected": rows_affected}))
        }
    }
}

fn vet_statement(sql: &str, allowed_tables: &[String], read_only: bool) -> Result<(), ToolError> {
    if allowed_tables.is_empty() {
        return Err(ToolError::Configuration("sql tool has an empty table allow-list".to_string()));
    }

    let masked = mask_literals(sql);
    let statement = masked.trim().trim_end_matches(';');
    if statement.contains(';') {
        return Err(ToolError::Configuration("sql tool must contain a single statement".to_string()));
    }

    if read_only && !starts_with_keyword(sql, "SELECT") {
        return Err(ToolError::Configuration("read-only sql tool must be a SELECT".to_string()));
    }

    let allowed: BTreeSet<String> =
        allowed_tables.iter().map(|table| table.trim().to_ascii_lowercase()).collect();
    for table in referenced_tables(statement) {
        if !allowed.contains(&table) {
            return Err(ToolError::Configuration(format!(
                "table `{table}` is not on the allow-list"
            )));
        }
    }
    Ok(())
}

fn starts_with_keyword(sql: &str, keyword: &str) -> bool {
    sql.trim_start()
        .get(..keyword.len())
        .map(|head| head.eq_ignore_ascii_case(keyword))
        .unwrap_or(false)
}

fn returns_rows(sql: &str) -> bool {
    starts_with_keyword(sql, "SELECT") || starts_with_keyword(sql, "WITH")
}

/// Replaces string literal contents with spaces so keyword scans ignore them. Quoted
/// identifiers stay visible to the table scan.
fn mask_literals(sql: &str) -> String {
    let mut masked = String::with_capacity(sql.len());
    let mut in_literal = false;
    for ch in sql.chars() {
        if ch == '\'' {
            in_literal = !in_literal;
            masked.push(ch);
        } else if in_literal {
            masked.push(' ');
        } else {
            masked.push(ch);
        }
    }
    masked
}

fn referenced_tables(statement: &str) -> Vec<String> {
    let spaced = statement.replace(',', " , ");
    let tokens: Vec<&str> = spaced
        .split(|ch: char| ch.is_whitespace() || ch == ')')
        .filter(|token| !token.is_empty())
        .collect();

    let mut tables = Vec::new();
    for (index, token) in tokens.iter().enumerate() {
        if !is_keyword(token, TABLE_KEYWORDS) {
            continue;
        }
        // `FROM a x, b AS y`: every comma-separated source is a table.
        let mut cursor = index + 1;
        while let Some(&name) = tokens.get(cursor) {
            if name.starts_with('(') || name == "," {
                break;
            }
            if let Some(table) = table_name(name) {
                tables.push(table);
            }
            if name.contains('(') {
                break;
            }
            cursor += 1;
            if tokens.get(cursor).is_some_and(|next| next.eq_ignore_ascii_case("AS")) {
                cursor += 1;
            }
            if tokens.get(cursor).is_some_and(|next| is_alias(next)) {
                cursor += 1;
            }
            if tokens.get(cursor) != Some(&",") {
                break;
            }
            cursor += 1;
        }
    }
    tables
}

fn is_keyword(token: &str, keywords: &[&str]) -> bool {
    keywords.iter().any(|keyword| token.eq_ignore_ascii_case(keyword))
}

fn is_alias(token: &str) -> bool {
    token != "," && !token.starts_with('(') && !is_keyword(token, CLAUSE_KEYWORDS)
}

fn table_name(token: &str) -> Option<String> {
    let name = token.split('(').next().unwrap_or(token);
    let name = name.rsplit('.').next().unwrap_or(name);
    let name = name.trim_matches(|ch| matches!(ch, '"' | '`' | '[' | ']'));
    (!name.is_empty()).then(|| name.to_ascii_lowercase())
}

/// Rewrites `:name` placeholders outside string literals to `?`, recording names in order.
fn compile_placeholders(sql: &str) -> CompiledQuery {
    let mut compiled = String::with_capacity(sql.len());
    let mut params = Vec::new();
    let mut quote: Option<char> = None;
    let mut chars = sql.chars().peekable();

    while let Some(ch) = chars.next() {
        if let Some(open) = quote {
            if ch == open {
                quote = None;
            }
            compiled.push(ch);
            continue;
        }

        match ch {
            '\'' | '"' => {
                quote = Some(ch);
                compiled.push(ch);
            }
            ':' if chars.peek() == Some(&':') => {
                compiled.push_str("::");
                chars.next();
            }
            ':' if chars.peek().is_some_and(|next| next.is_ascii_alphabetic() || *next == '_') => {
                let mut name = String::new();
                while let Some(next) = chars.peek().copied() {
                    if next.is_ascii_alphanumeric() || next == '_' {
                        name.push(next);
                        chars.next();
                    } else {
                        break;
                    }
                }
                params.push(name);
                compiled.push('?');
            }
            _ => compiled.push(ch),
        }
    }

    CompiledQuery { sql: compiled, params }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use shopkeep_core::ExecutionKind;
    use shopkeep_db::fixtures::DemoSeedDataset;
    use shopkeep_db::{connect_with_settings, migrations, SqlQueryRunner};

    use super::{compile_placeholders, vet_statement, SqlStrategy};
    use crate::error::ToolError;
    use crate::strategies::test_support::{context, entry};
    use crate::strategies::ExecutionStrategy;

    fn allow(tables: &[&str]) -> Vec<String> {
        tables.iter().map(|table| table.to_string()).collect()
    }

    #[test]
    fn placeholders_skip_literals_and_casts() {
        let compiled = compile_placeholders(
            "SELECT sku, ':not_a_param' AS label FROM inventory_item WHERE tenant_id = :tenant_id AND quantity <= :threshold AND x::text = 'a'",
        );
        assert_eq!(compiled.params, vec!["tenant_id", "threshold"]);
        assert!(compiled.sql.contains("tenant_id = ? AND quantity <= ?"));
        assert!(compiled.sql.contains("':not_a_param'"));
        assert!(compiled.sql.contains("x::text"));
    }

    #[test]
    fn read_only_guard_and_allow_list() {
        let tables = allow(&["inventory_item"]);
        vet_statement("  select * from inventory_item", &tables, true).expect("lowercase select");

        let cases = [
            ("DELETE FROM inventory_item", &tables, "read-only sql tool must be a SELECT"),
            ("SELECT * FROM customer", &tables, "table `customer` is not on the allow-list"),
            (
                "SELECT * FROM inventory_item i JOIN sales_order o ON o.id = i.sku",
                &tables,
                "table `sales_order` is not on the allow-list",
            ),
            ("SELECT * FROM inventory_item, customer", &tables, "table `customer` is not on the allow-list"),
            (
                "SELECT c.* FROM inventory_item AS i, customer c WHERE c.id = i.sku",
                &tables,
                "table `customer` is not on the allow-list",
            ),
            ("SELECT * FROM \"customer\"", &tables, "table `customer` is not on the allow-list"),
            (
                "SELECT 1 FROM inventory_item; DROP TABLE customer",
                &tables,
                "sql tool must contain a single statement",
            ),
        ];
        for (sql, tables, message) in cases {
            assert_eq!(
                vet_statement(sql, tables, true),
                Err(ToolError::Configuration(message.to_string())),
                "{sql}"
            );
        }

        assert_eq!(
            vet_statement("SELECT 1", &[], true),
            Err(ToolError::Configuration("sql tool has an empty table allow-list".to_string()))
        );
        vet_statement("SELECT ';' FROM inventory_item;", &tables, true)
            .expect("semicolons inside literals and a trailing one are fine");

        let both = allow(&["inventory_item", "sales_order"]);
        vet_statement(
            "SELECT i.sku, o.id FROM inventory_item AS i, sales_order o WHERE o.id IN (1, 2) LIMIT 5, 10",
            &both,
            true,
        )
        .expect("every listed table is allowed");
        vet_statement(
            "INSERT INTO inventory_item (sku, quantity) VALUES (:sku, :quantity)",
            &tables,
            false,
        )
        .expect("column list is not a table");
        vet_statement("SELECT 'FROM customer, orders' FROM inventory_item", &tables, true)
            .expect("literal text is ignored");
    }

    #[tokio::test]
    async fn runs_bound_query_against_seeded_store() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrate");
        DemoSeedDataset::load(&pool).await.expect("seed");

        let strategy = SqlStrategy::new(Arc::new(SqlQueryRunner::new(pool.clone())));
        let tool = entry(
            "stock_below",
            ExecutionKind::Sql,
            json!({
                "query": "SELECT sku, location, quantity FROM inventory_item WHERE tenant_id = :tenant_id AND quantity < :threshold ORDER BY sku, location",
                "allowed_tables": ["inventory_item"]
            }),
        );

        let output = strategy
            .execute(&tool, json!({"tenant_id": "tenant-demo", "threshold": 5}), &context())
            .await
            .expect("query");
        assert_eq!(output["row_count"], json!(2));
        assert_eq!(output["rows"][0], json!({"sku": "SKU-BAG-04", "location": "main", "quantity": 0}));
        assert_eq!(output["rows"][1]["sku"], json!("SKU-TEE-02"));

        let missing = strategy
            .execute(&tool, json!({"tenant_id": "tenant-demo"}), &context())
            .await
            .expect_err("threshold missing");
        assert_eq!(
            missing,
            ToolError::Validation("query parameter `threshold` was not provided".to_string())
        );

        pool.close().await;
    }
}
