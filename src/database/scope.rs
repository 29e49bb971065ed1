use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use sqlx::postgres::PgArguments;
use uuid::Uuid;

/// A typed SQL bind parameter. Predicates never interpolate values; every
/// comparison value travels through one of these.
#[derive(Debug, Clone)]
pub enum Bind {
    Uuid(Uuid),
    Text(String),
    Int(i64),
    Bool(bool),
    Timestamp(DateTime<Utc>),
    Date(NaiveDate),
    Decimal(Decimal),
    Json(Value),
}

pub fn bind_query_as<'q, O>(
    q: sqlx::query::QueryAs<'q, sqlx::Postgres, O, PgArguments>,
    v: &'q Bind,
) -> sqlx::query::QueryAs<'q, sqlx::Postgres, O, PgArguments>
where
    O: for<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow>,
{
    match v {
        Bind::Uuid(u) => q.bind(*u),
        Bind::Text(s) => q.bind(s),
        Bind::Int(i) => q.bind(*i),
        Bind::Bool(b) => q.bind(*b),
        Bind::Timestamp(t) => q.bind(*t),
        Bind::Date(d) => q.bind(*d),
        Bind::Decimal(d) => q.bind(*d),
        Bind::Json(j) => q.bind(j),
    }
}

/// Comparison operators supported by scoped predicates. Ranges are half-open
/// (`Gte` lower bound, `Lt` upper bound), matching how schedules slice time.
#[derive(Debug, Clone, Copy)]
pub enum Op {
    Eq,
    Lt,
    Gte,
    ILikePrefix,
    IsNull,
    IsNotNull,
}

#[derive(Debug, Clone)]
struct Condition {
    column: &'static str,
    op: Op,
    // None for IS NULL / IS NOT NULL
    bind_index: Option<usize>,
}

/// SELECT builder that composes the tenant predicate into every query.
///
/// `clinic_id = $1` is rendered unconditionally; for soft-deletable tables
/// `deleted_at IS NULL` is appended unless the caller opts into deleted rows.
/// Column names are static strings chosen by resource code, never request
/// input, so identifier quoting is the only escaping needed.
pub struct ScopedQuery {
    table: &'static str,
    conditions: Vec<Condition>,
    binds: Vec<Bind>,
    order_by: Option<(&'static str, bool)>, // (column, descending)
    limit: Option<i64>,
    offset: Option<i64>,
}

impl ScopedQuery {
    pub fn new(table: &'static str, clinic_id: Uuid) -> Self {
        let mut sq = Self {
            table,
            conditions: vec![],
            binds: vec![],
            order_by: None,
            limit: None,
            offset: None,
        };
        sq.push(Condition {
            column: "clinic_id",
            op: Op::Eq,
            bind_index: Some(0),
        });
        sq.binds.push(Bind::Uuid(clinic_id));
        sq
    }

    /// Scope for a soft-deletable table: excludes deleted rows by default
    pub fn active(table: &'static str, clinic_id: Uuid) -> Self {
        let mut sq = Self::new(table, clinic_id);
        sq.push(Condition {
            column: "deleted_at",
            op: Op::IsNull,
            bind_index: None,
        });
        sq
    }

    fn push(&mut self, c: Condition) {
        self.conditions.push(c);
    }

    fn add(&mut self, column: &'static str, op: Op, bind: Bind) {
        self.binds.push(bind);
        self.push(Condition {
            column,
            op,
            bind_index: Some(self.binds.len() - 1),
        });
    }

    pub fn and_eq(mut self, column: &'static str, bind: Bind) -> Self {
        self.add(column, Op::Eq, bind);
        self
    }

    pub fn and_cmp(mut self, column: &'static str, op: Op, bind: Bind) -> Self {
        self.add(column, op, bind);
        self
    }

    /// Case-insensitive prefix match, e.g. last-name search
    pub fn and_prefix(mut self, column: &'static str, prefix: &str) -> Self {
        let escaped = prefix.replace('%', "\\%").replace('_', "\\_");
        self.add(column, Op::ILikePrefix, Bind::Text(format!("{}%", escaped)));
        self
    }

    pub fn and_not_null(mut self, column: &'static str) -> Self {
        self.push(Condition { column, op: Op::IsNotNull, bind_index: None });
        self
    }

    pub fn order_by(mut self, column: &'static str, descending: bool) -> Self {
        self.order_by = Some((column, descending));
        self
    }

    pub fn paginate(mut self, query: &crate::api::PageQuery) -> Self {
        self.limit = Some(query.limit());
        self.offset = Some(query.offset());
        self
    }

    fn where_clause(&self) -> String {
        let parts: Vec<String> = self
            .conditions
            .iter()
            .map(|c| {
                let col = format!("\"{}\"", c.column);
                match (c.op, c.bind_index) {
                    (Op::IsNull, _) => format!("{} IS NULL", col),
                    (Op::IsNotNull, _) => format!("{} IS NOT NULL", col),
                    (op, Some(i)) => {
                        let p = format!("${}", i + 1);
                        match op {
                            Op::Eq => format!("{} = {}", col, p),
                            Op::Lt => format!("{} < {}", col, p),
                            Op::Gte => format!("{} >= {}", col, p),
                            Op::ILikePrefix => format!("{} ILIKE {}", col, p),
                            Op::IsNull | Op::IsNotNull => unreachable!(),
                        }
                    }
                    // A bound operator without a bind is a construction bug
                    (_, None) => "1=0".to_string(),
                }
            })
            .collect();
        parts.join(" AND ")
    }

    pub fn to_select_sql(&self) -> String {
        let mut sql = format!(
            "SELECT * FROM \"{}\" WHERE {}",
            self.table,
            self.where_clause()
        );
        if let Some((col, desc)) = self.order_by {
            sql.push_str(&format!(
                " ORDER BY \"{}\" {}",
                col,
                if desc { "DESC" } else { "ASC" }
            ));
        }
        if let Some(limit) = self.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }
        if let Some(offset) = self.offset {
            sql.push_str(&format!(" OFFSET {}", offset));
        }
        sql
    }

    pub fn to_count_sql(&self) -> String {
        format!(
            "SELECT COUNT(*) FROM \"{}\" WHERE {}",
            self.table,
            self.where_clause()
        )
    }

    pub fn binds(&self) -> &[Bind] {
        &self.binds
    }

    pub async fn fetch_all<T>(&self, pool: &sqlx::PgPool) -> Result<Vec<T>, sqlx::Error>
    where
        T: for<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> + Send + Unpin,
    {
        let sql = self.to_select_sql();
        let mut q = sqlx::query_as::<_, T>(&sql);
        for b in &self.binds {
            q = bind_query_as(q, b);
        }
        q.fetch_all(pool).await
    }

    pub async fn fetch_optional<T>(&self, pool: &sqlx::PgPool) -> Result<Option<T>, sqlx::Error>
    where
        T: for<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> + Send + Unpin,
    {
        let sql = self.to_select_sql();
        let mut q = sqlx::query_as::<_, T>(&sql);
        for b in &self.binds {
            q = bind_query_as(q, b);
        }
        q.fetch_optional(pool).await
    }

    pub async fn count(&self, pool: &sqlx::PgPool) -> Result<i64, sqlx::Error> {
        let sql = self.to_count_sql();
        let mut q = sqlx::query_scalar::<_, i64>(&sql);
        for b in &self.binds {
            q = match b {
                Bind::Uuid(u) => q.bind(*u),
                Bind::Text(s) => q.bind(s.clone()),
                Bind::Int(i) => q.bind(*i),
                Bind::Bool(v) => q.bind(*v),
                Bind::Timestamp(t) => q.bind(*t),
                Bind::Date(d) => q.bind(*d),
                Bind::Decimal(d) => q.bind(*d),
                Bind::Json(j) => q.bind(j.clone()),
            };
        }
        q.fetch_one(pool).await
    }
}
