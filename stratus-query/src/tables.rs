//! Table dependency extraction from SQL text.
//!
//! Pattern-based, not a full parser. The extraction rules capture the
//! identifier following table-introducing keywords (FROM, JOIN, INTO,
//! UPDATE, TABLE) and union everything they find. Unrecognized syntax
//! yields a partial or empty set rather than an error: invalidating a
//! table we merely suspect is touched is harmless, while missing one
//! leaves stale entries behind, so ambiguity resolves toward broader
//! matching.

use std::collections::BTreeSet;

use once_cell::sync::Lazy;
use regex::Regex;

// === STATEMENT CLASSIFICATION ===

/// Verb class of a SQL statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    Select,
    Insert,
    Update,
    Delete,
    Ddl,
}

impl StatementKind {
    /// Whether statements of this kind mutate table contents or schema.
    pub fn is_write(&self) -> bool {
        !matches!(self, StatementKind::Select)
    }
}

/// Classify a statement by its first recognized verb keyword.
///
/// Scans tokens in order so that a leading `WITH ... AS (...)` wrapper
/// does not hide the verb. Anything unrecognized defaults to the
/// SELECT class, which is the broadest-matching extraction set.
pub fn classify_statement(sql: &str) -> StatementKind {
    for token in normalize_sql(sql).split_whitespace() {
        match token {
            "select" => return StatementKind::Select,
            "insert" | "replace" => return StatementKind::Insert,
            "update" => return StatementKind::Update,
            "delete" => return StatementKind::Delete,
            "create" | "alter" | "drop" | "truncate" => return StatementKind::Ddl,
            _ => continue,
        }
    }
    StatementKind::Select
}

/// Collapse whitespace runs to single spaces and lowercase the text.
pub fn normalize_sql(sql: &str) -> String {
    sql.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

// === EXTRACTION RULES ===

// Identifiers may be schema-qualified (`public.users`) and each segment
// may be wrapped in double quotes or backticks. The capture takes the
// whole dotted chain; [`canonical_table`] reduces it to the bare table
// name so `public.users` and `users` tag and invalidate identically.
const IDENT: &str = r#"((?:["`]?[a-z_][a-z0-9_$]*["`]?\.)*["`]?[a-z_][a-z0-9_$]*["`]?)"#;

/// Canonical table name for a captured identifier: last dotted segment,
/// quoting stripped.
fn canonical_table(raw: &str) -> String {
    raw.rsplit('.')
        .next()
        .unwrap_or(raw)
        .trim_matches(|c| c == '"' || c == '`')
        .to_string()
}

fn rule(keyword_pattern: &str) -> Regex {
    Regex::new(&format!(r"\b{keyword_pattern}\s+{IDENT}")).expect("extraction rule is valid regex")
}

// SELECT-class rules run for every statement kind: a write can embed
// joins and subselects whose source tables also need invalidating.
static SELECT_RULES: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        rule("from"),
        rule(r"(?:inner\s+|left\s+(?:outer\s+)?|right\s+(?:outer\s+)?|full\s+(?:outer\s+)?|cross\s+)?join"),
    ]
});

static INSERT_RULES: Lazy<Vec<Regex>> = Lazy::new(|| vec![rule("into")]);

static UPDATE_RULES: Lazy<Vec<Regex>> = Lazy::new(|| vec![rule(r"update(?:\s+only)?")]);

static DELETE_RULES: Lazy<Vec<Regex>> = Lazy::new(|| vec![rule("using")]);

static DDL_RULES: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        rule(r"table(?:\s+if\s+(?:not\s+)?exists)?"),
        rule(r"truncate(?:\s+table)?"),
        // CREATE INDEX ... ON table
        rule("on"),
    ]
});

// WITH aliases introduce temporary result sets, not physical tables.
static CTE_RULES: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(&format!(r"\bwith\s+(?:recursive\s+)?{IDENT}\s+as\b"))
            .expect("CTE rule is valid regex"),
        Regex::new(&format!(r",\s*{IDENT}\s+as\s*\(")).expect("CTE rule is valid regex"),
    ]
});

fn kind_rules(kind: StatementKind) -> &'static [Regex] {
    match kind {
        StatementKind::Select => &[],
        StatementKind::Insert => &INSERT_RULES,
        StatementKind::Update => &UPDATE_RULES,
        StatementKind::Delete => &DELETE_RULES,
        StatementKind::Ddl => &DDL_RULES,
    }
}

/// Extract the set of physical tables a statement reads or writes.
///
/// Never fails: exotic syntax degrades to a partial or empty set.
pub fn extract_affected_tables(sql: &str) -> BTreeSet<String> {
    let normalized = normalize_sql(sql);
    let kind = classify_statement(&normalized);

    let mut tables = BTreeSet::new();
    for pattern in kind_rules(kind).iter().chain(SELECT_RULES.iter()) {
        for captures in pattern.captures_iter(&normalized) {
            if let Some(name) = captures.get(1) {
                tables.insert(canonical_table(name.as_str()));
            }
        }
    }

    for pattern in CTE_RULES.iter() {
        for captures in pattern.captures_iter(&normalized) {
            if let Some(alias) = captures.get(1) {
                tables.remove(&canonical_table(alias.as_str()));
            }
        }
    }

    tables
}

// === TESTS ===
