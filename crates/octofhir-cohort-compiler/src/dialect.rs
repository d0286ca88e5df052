//! SQL dialects
//!
//! Every dialect-specific token the compiler emits goes through [`Dialect`]: temp-table
//! syntax, date arithmetic, integer casts, year extraction, date literals, string
//! literals, LIKE escaping and column types.

use chrono::{Datelike, NaiveDate};
use octofhir_cohort_diagnostics::{COH0402, CohortError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Target SQL dialect
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Dialect {
    /// Circe-native tokens (`#temp`, `DATEADD`, `DATEDIFF`)
    #[default]
    #[serde(rename = "sql-server", alias = "sqlserver", alias = "mssql")]
    SqlServer,
    #[serde(rename = "postgresql", alias = "postgres")]
    Postgresql,
    #[serde(rename = "clickhouse")]
    ClickHouse,
}

/// Column types used by staging tables
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnType {
    BigInt,
    Integer,
    Date,
}

impl Dialect {
    /// All supported dialects
    pub const ALL: [Dialect; 3] = [Dialect::SqlServer, Dialect::Postgresql, Dialect::ClickHouse];

    /// Wire and CLI name
    pub const fn name(self) -> &'static str {
        match self {
            Dialect::SqlServer => "sql-server",
            Dialect::Postgresql => "postgresql",
            Dialect::ClickHouse => "clickhouse",
        }
    }

    pub const fn description(self) -> &'static str {
        match self {
            Dialect::SqlServer => "Microsoft SQL Server (#temp tables, DATEADD/DATEDIFF)",
            Dialect::Postgresql => "PostgreSQL (TEMP tables, interval arithmetic, ILIKE)",
            Dialect::ClickHouse => "ClickHouse (Memory temporary tables, addDays/dateDiff)",
        }
    }

    // ------------------------------------------------------------------------
    // Temp tables
    // ------------------------------------------------------------------------

    /// Session-scoped name of a staging table
    pub fn temp_table_name(self, base: &str, session_id: &str) -> String {
        match self {
            Dialect::SqlServer => format!("#{base}_{session_id}"),
            Dialect::Postgresql | Dialect::ClickHouse => format!("{base}_{session_id}"),
        }
    }

    pub fn create_temp_table(self, name: &str, columns: &[(&str, ColumnType)]) -> String {
        let columns = columns
            .iter()
            .map(|(column, ty)| format!("{column} {}", self.column_type(*ty)))
            .collect::<Vec<_>>()
            .join(", ");
        match self {
            Dialect::SqlServer => format!("CREATE TABLE {name} ({columns})"),
            Dialect::Postgresql => format!("CREATE TEMP TABLE {name} ({columns})"),
            Dialect::ClickHouse => {
                format!("CREATE TEMPORARY TABLE {name} ({columns}) ENGINE = Memory")
            }
        }
    }

    pub fn drop_temp_table(self, name: &str) -> String {
        match self {
            Dialect::SqlServer | Dialect::Postgresql => format!("DROP TABLE IF EXISTS {name}"),
            Dialect::ClickHouse => format!("DROP TEMPORARY TABLE IF EXISTS {name}"),
        }
    }

    /// Statements run once before any staging table is created
    pub fn session_setup(self) -> Vec<String> {
        match self {
            // Outer joins must produce NULL for missing rows
            Dialect::ClickHouse => vec!["SET join_use_nulls = 1".to_string()],
            Dialect::SqlServer | Dialect::Postgresql => Vec::new(),
        }
    }

    pub const fn column_type(self, ty: ColumnType) -> &'static str {
        match (self, ty) {
            (Dialect::SqlServer, ColumnType::BigInt) => "BIGINT",
            (Dialect::SqlServer, ColumnType::Integer) => "INT",
            (Dialect::SqlServer, ColumnType::Date) => "DATE",
            (Dialect::Postgresql, ColumnType::BigInt) => "BIGINT",
            (Dialect::Postgresql, ColumnType::Integer) => "INTEGER",
            (Dialect::Postgresql, ColumnType::Date) => "DATE",
            (Dialect::ClickHouse, ColumnType::BigInt) => "Nullable(Int64)",
            (Dialect::ClickHouse, ColumnType::Integer) => "Nullable(Int32)",
            (Dialect::ClickHouse, ColumnType::Date) => "Nullable(Date)",
        }
    }

    // ------------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------------

    /// `expr` shifted by `days` (an integer literal or column expression)
    pub fn date_add(self, expr: &str, days: impl fmt::Display) -> String {
        match self {
            Dialect::SqlServer => format!("DATEADD(day, {days}, {expr})"),
            Dialect::Postgresql => {
                format!("CAST(({expr} + {days} * INTERVAL '1 day') AS DATE)")
            }
            Dialect::ClickHouse => format!("addDays({expr}, {days})"),
        }
    }

    /// Whole days from `start` to `end`
    pub fn date_diff(self, start: &str, end: &str) -> String {
        match self {
            Dialect::SqlServer => format!("DATEDIFF(day, {start}, {end})"),
            Dialect::Postgresql => format!("(CAST({end} AS DATE) - CAST({start} AS DATE))"),
            Dialect::ClickHouse => format!("dateDiff('day', {start}, {end})"),
        }
    }

    pub fn year(self, expr: &str) -> String {
        match self {
            Dialect::SqlServer => format!("YEAR({expr})"),
            Dialect::Postgresql => format!("EXTRACT(YEAR FROM {expr})"),
            Dialect::ClickHouse => format!("toYear({expr})"),
        }
    }

    pub fn int_cast(self, expr: impl fmt::Display) -> String {
        match self {
            Dialect::SqlServer | Dialect::Postgresql => format!("CAST({expr} AS BIGINT)"),
            Dialect::ClickHouse => format!("toInt64({expr})"),
        }
    }

    pub fn date_literal(self, date: NaiveDate) -> String {
        match self {
            Dialect::SqlServer => format!(
                "DATEFROMPARTS({}, {}, {})",
                date.year(),
                date.month(),
                date.day()
            ),
            Dialect::Postgresql => format!("DATE '{}'", date.format("%Y-%m-%d")),
            Dialect::ClickHouse => format!("toDate('{}')", date.format("%Y-%m-%d")),
        }
    }

    /// A quoted string literal
    pub fn string_literal(self, value: &str) -> String {
        match self {
            Dialect::SqlServer | Dialect::Postgresql => format!("'{}'", value.replace('\'', "''")),
            Dialect::ClickHouse => format!(
                "'{}'",
                value.replace('\\', "\\\\").replace('\'', "\\'")
            ),
        }
    }

    /// `column [NOT ]LIKE pattern` where `pattern` is already LIKE-escaped
    pub fn like(self, column: &str, pattern: &str, negated: bool) -> String {
        let not = if negated { "NOT " } else { "" };
        let literal = self.string_literal(pattern);
        match self {
            Dialect::SqlServer | Dialect::Postgresql => {
                format!("{column} {not}LIKE {literal} ESCAPE '\\'")
            }
            // Backslash is the built-in escape character
            Dialect::ClickHouse => format!("{column} {not}LIKE {literal}"),
        }
    }

    /// Keyword for a de-duplicating union
    pub const fn union_distinct(self) -> &'static str {
        match self {
            Dialect::SqlServer | Dialect::Postgresql => "UNION",
            Dialect::ClickHouse => "UNION DISTINCT",
        }
    }

    /// Keyword for set difference
    pub const fn except(self) -> &'static str {
        match self {
            Dialect::SqlServer | Dialect::Postgresql => "EXCEPT",
            Dialect::ClickHouse => "EXCEPT DISTINCT",
        }
    }
}

/// Escape `%`, `_` and the escape character itself for a LIKE pattern
pub fn escape_like(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        if matches!(ch, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Dialect {
    type Err = CohortError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "sql-server" | "sqlserver" | "mssql" => Ok(Dialect::SqlServer),
            "postgresql" | "postgres" => Ok(Dialect::Postgresql),
            "clickhouse" => Ok(Dialect::ClickHouse),
            _ => Err(CohortError::options(
                COH0402,
                format!("unknown dialect '{s}', expected sql-server, postgresql or clickhouse"),
            )),
        }
    }
}
