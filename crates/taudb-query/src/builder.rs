//! The fluent statement builder.
//!
//! A `Query` accumulates a declarative description of one SELECT (or other
//! DML) through `&mut self` chained calls and compiles it to a single SQL
//! string on demand. Orthogonal clauses compile the same regardless of the
//! order they were added; WHERE nodes keep their insertion order, and
//! AND/OR precedence is purely left-to-right text with parentheses only
//! around nested groups.
//!
//! A builder is consumed by exactly one terminal call (`fetch`, `first`,
//! `value`, `insert`, ...) which resets the SELECT-relevant state; the
//! table name and id column persist so the same builder can run a
//! follow-up query against the same table.

use crate::clause::{
    Column, Connective, Group, Join, JoinKind, JoinOn, Operand, OrderBy, WhereNode, WherePart,
    infer_operator,
};
use crate::db::{Db, Where};
use taudb_core::dialect::split_alias;
use taudb_core::{Error, FromRow, Result, Row, SqlExpr, Value};

/// Result of `pluck`: a plain column when no key applies, key/value pairs
/// otherwise.
#[derive(Debug, Clone, PartialEq)]
pub enum Plucked {
    Column(Vec<Value>),
    Pairs(Vec<(String, Value)>),
}

pub struct Query<'db> {
    db: &'db Db,
    table: Option<String>,
    columns: Vec<Column>,
    joins: Vec<Join>,
    wheres: Vec<WhereNode>,
    group_by: Vec<String>,
    order_by: Vec<OrderBy>,
    limit: Option<u64>,
    offset: Option<u64>,
    raw_sql: Option<String>,
    id_column: String,
    ttl: u64,
}

impl Db {
    /// Start a fluent query against a table. The name may carry an alias
    /// (`"users as u"`).
    pub fn table(&self, name: &str) -> Query<'_> {
        let mut q = Query::new(self);
        q.table(name);
        q
    }
}

impl<'db> Query<'db> {
    pub fn new(db: &'db Db) -> Self {
        Self {
            db,
            table: None,
            columns: Vec::new(),
            joins: Vec::new(),
            wheres: Vec::new(),
            group_by: Vec::new(),
            order_by: Vec::new(),
            limit: None,
            offset: None,
            raw_sql: None,
            id_column: String::new(),
            ttl: 0,
        }
    }

    // ---- mutators ----

    pub fn table(&mut self, name: &str) -> &mut Self {
        self.table = Some(name.to_string());
        self
    }

    /// Add one column to the selection.
    pub fn select(&mut self, column: &str) -> &mut Self {
        self.columns.push(Column {
            name: column.to_string(),
            alias: None,
            aggregate: None,
            raw: false,
        });
        self
    }

    pub fn select_many(&mut self, columns: &[&str]) -> &mut Self {
        for column in columns {
            self.select(column);
        }
        self
    }

    pub fn select_as(&mut self, column: &str, alias: &str) -> &mut Self {
        self.columns.push(Column {
            name: column.to_string(),
            alias: Some(alias.to_string()),
            aggregate: None,
            raw: false,
        });
        self
    }

    /// A verbatim selection, e.g. an expression the quoter must not touch.
    pub fn select_expr(&mut self, expr: impl Into<SqlExpr>) -> &mut Self {
        self.columns.push(Column {
            name: expr.into().into_string(),
            alias: None,
            aggregate: None,
            raw: true,
        });
        self
    }

    /// An aggregate-wrapped column, e.g. `aggregate("count", "*", Some("n"))`.
    pub fn aggregate(&mut self, func: &str, column: &str, alias: Option<&str>) -> &mut Self {
        self.columns.push(Column {
            name: column.to_string(),
            alias: alias.map(String::from),
            aggregate: Some(func.to_string()),
            raw: false,
        });
        self
    }

    fn join_kind(&mut self, kind: JoinKind, table: &str, left: &str, op: &str, right: &str) -> &mut Self {
        self.joins.push(Join {
            kind,
            table: table.to_string(),
            on: vec![JoinOn {
                left: left.to_string(),
                op: op.to_string(),
                right: right.to_string(),
                or: false,
            }],
        });
        self
    }

    pub fn join(&mut self, table: &str, left: &str, op: &str, right: &str) -> &mut Self {
        self.join_kind(JoinKind::Inner, table, left, op, right)
    }

    pub fn left_join(&mut self, table: &str, left: &str, op: &str, right: &str) -> &mut Self {
        self.join_kind(JoinKind::Left, table, left, op, right)
    }

    pub fn right_join(&mut self, table: &str, left: &str, op: &str, right: &str) -> &mut Self {
        self.join_kind(JoinKind::Right, table, left, op, right)
    }

    /// Add an AND condition to the most recent join.
    pub fn on(&mut self, left: &str, op: &str, right: &str) -> &mut Self {
        self.push_on(left, op, right, false)
    }

    /// Add an OR condition to the most recent join.
    pub fn or_on(&mut self, left: &str, op: &str, right: &str) -> &mut Self {
        self.push_on(left, op, right, true)
    }

    fn push_on(&mut self, left: &str, op: &str, right: &str, or: bool) -> &mut Self {
        if let Some(join) = self.joins.last_mut() {
            join.on.push(JoinOn {
                left: left.to_string(),
                op: op.to_string(),
                right: right.to_string(),
                or,
            });
        }
        self
    }

    fn push_where(&mut self, connective: Connective, part: WherePart) -> &mut Self {
        let connective = if self.wheres.is_empty() {
            Connective::Root
        } else {
            connective
        };
        self.wheres.push(WhereNode { connective, part });
        self
    }

    /// Two-argument predicate with operator inference: `Null` compares
    /// with `IS`, a list with `IN`, anything else with `=`.
    pub fn where_(&mut self, field: &str, operand: impl Into<Operand>) -> &mut Self {
        let (op, operand) = infer_operator(operand.into());
        self.push_where(
            Connective::And,
            WherePart::Leaf {
                field: field.to_string(),
                op,
                operand,
            },
        )
    }

    /// Explicit-operator predicate. The operator is emitted as given.
    pub fn where_op(&mut self, field: &str, op: &str, operand: impl Into<Operand>) -> &mut Self {
        self.push_where(
            Connective::And,
            WherePart::Leaf {
                field: field.to_string(),
                op: op.trim().to_string(),
                operand: operand.into(),
            },
        )
    }

    pub fn or_where(&mut self, field: &str, operand: impl Into<Operand>) -> &mut Self {
        let (op, operand) = infer_operator(operand.into());
        self.push_where(
            Connective::Or,
            WherePart::Leaf {
                field: field.to_string(),
                op,
                operand,
            },
        )
    }

    pub fn or_where_op(&mut self, field: &str, op: &str, operand: impl Into<Operand>) -> &mut Self {
        self.push_where(
            Connective::Or,
            WherePart::Leaf {
                field: field.to_string(),
                op: op.trim().to_string(),
                operand: operand.into(),
            },
        )
    }

    /// A mapping becomes one `=` predicate per key, ANDed, as a single
    /// parenthesized group.
    pub fn where_map(&mut self, pairs: &[(&str, Value)]) -> &mut Self {
        if pairs.is_empty() {
            return self;
        }
        let mut group = Group::default();
        for (field, value) in pairs {
            group.where_op(field, "=", Operand::One(value.clone()));
        }
        self.push_where(Connective::And, WherePart::Group(group.nodes))
    }

    /// The closure fills a fresh nested group, attached with AND.
    pub fn where_group(&mut self, f: impl FnOnce(&mut Group)) -> &mut Self {
        let mut group = Group::default();
        f(&mut group);
        if group.nodes.is_empty() {
            return self;
        }
        self.push_where(Connective::And, WherePart::Group(group.nodes))
    }

    /// The closure fills a fresh nested group, attached with OR.
    pub fn or_where_group(&mut self, f: impl FnOnce(&mut Group)) -> &mut Self {
        let mut group = Group::default();
        f(&mut group);
        if group.nodes.is_empty() {
            return self;
        }
        self.push_where(Connective::Or, WherePart::Group(group.nodes))
    }

    pub fn group_by(&mut self, field: &str) -> &mut Self {
        self.group_by.push(field.to_string());
        self
    }

    pub fn order_by(&mut self, field: &str) -> &mut Self {
        self.order_by.push(OrderBy {
            field: field.to_string(),
            desc: false,
        });
        self
    }

    pub fn order_by_desc(&mut self, field: &str) -> &mut Self {
        self.order_by.push(OrderBy {
            field: field.to_string(),
            desc: true,
        });
        self
    }

    pub fn limit(&mut self, limit: u64) -> &mut Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(&mut self, offset: u64) -> &mut Self {
        self.offset = Some(offset);
        self
    }

    /// Bypass compilation entirely: the raw SQL is used as-is and every
    /// other clause is ignored.
    pub fn raw_sql(&mut self, sql: &str) -> &mut Self {
        self.raw_sql = Some(sql.to_string());
        self
    }

    /// Name the column keyed fetches index rows by.
    pub fn with_id(&mut self, column: &str) -> &mut Self {
        self.id_column = column.to_string();
        self
    }

    /// Route terminal SELECTs through the result cache with this TTL.
    pub fn cached(&mut self, ttl_secs: u64) -> &mut Self {
        self.ttl = ttl_secs;
        self
    }

    // ---- compilation ----

    fn resolved_table(&self) -> Result<(String, Option<String>)> {
        let Some(raw) = &self.table else {
            return Err(Error::builder("no table set"));
        };
        match split_alias(raw) {
            Some((name, alias)) => Ok((name.to_string(), Some(alias.to_string()))),
            None => Ok((raw.trim().to_string(), None)),
        }
    }

    /// Compile the accumulated state into one SELECT statement. Does not
    /// reset.
    pub fn build_select(&self) -> Result<String> {
        if let Some(raw) = &self.raw_sql {
            return Ok(raw.clone());
        }
        let (table, alias) = self.resolved_table()?;

        let mut sql = String::from("SELECT ");
        if self.columns.is_empty() {
            sql.push('*');
        } else {
            let cols: Vec<String> = self
                .columns
                .iter()
                .map(|c| render_column(self.db, c))
                .collect();
            sql.push_str(&cols.join(", "));
        }

        sql.push_str(" FROM ");
        sql.push_str(&self.db.field_name(&table));
        if let Some(alias) = alias {
            sql.push_str(" AS ");
            sql.push_str(&self.db.field_name(&alias));
        }

        for join in &self.joins {
            sql.push(' ');
            sql.push_str(&render_join(self.db, join));
        }

        let where_sql = render_where(self.db, &self.wheres, true);
        if !where_sql.is_empty() {
            sql.push(' ');
            sql.push_str(&where_sql);
        }

        if !self.group_by.is_empty() {
            sql.push_str(" GROUP BY ");
            let cols: Vec<String> = self
                .group_by
                .iter()
                .map(|f| self.db.field_name(f))
                .collect();
            sql.push_str(&cols.join(", "));
        }

        if !self.order_by.is_empty() {
            sql.push_str(" ORDER BY ");
            let cols: Vec<String> = self
                .order_by
                .iter()
                .map(|o| {
                    if o.desc {
                        format!("{} DESC", self.db.field_name(&o.field))
                    } else {
                        self.db.field_name(&o.field)
                    }
                })
                .collect();
            sql.push_str(&cols.join(", "));
        }

        if let Some(limit) = self.limit {
            sql.push(' ');
            sql.push_str(&self.db.dialect().limit_clause(limit, self.offset));
        }

        Ok(sql)
    }

    /// The compiled WHERE fragment alone (with its leading keyword).
    fn where_fragment(&self) -> String {
        render_where(self.db, &self.wheres, true)
    }

    /// Clear SELECT-relevant state. Table, id column, and TTL persist.
    fn reset(&mut self) {
        self.columns.clear();
        self.joins.clear();
        self.wheres.clear();
        self.group_by.clear();
        self.order_by.clear();
        self.limit = None;
        self.offset = None;
        self.raw_sql = None;
    }

    /// Compile, then reset for the next use of this builder.
    fn take_select(&mut self) -> Result<String> {
        let sql = self.build_select();
        self.reset();
        sql
    }

    // ---- terminal operations ----

    /// First matching row.
    pub fn first(&mut self) -> Result<Option<Row>> {
        self.limit = Some(1);
        let sql = self.take_select()?;
        self.db.fetch_one(&sql, self.ttl)
    }

    /// All matching rows.
    pub fn fetch(&mut self) -> Result<Vec<Row>> {
        let sql = self.take_select()?;
        self.db.fetch_all(&sql, self.ttl)
    }

    /// All matching rows keyed by the registered id column, falling back
    /// to the first column.
    pub fn fetch_keyed(&mut self) -> Result<Vec<(String, Row)>> {
        let id_column = self.id_column.clone();
        let sql = self.take_select()?;
        self.db.fetch_all_with_id(&sql, &id_column, self.ttl)
    }

    /// First column of every row.
    pub fn column(&mut self) -> Result<Vec<Value>> {
        let sql = self.take_select()?;
        self.db.fetch_column(&sql, self.ttl)
    }

    /// First two selected columns as key/value pairs.
    pub fn pairs(&mut self) -> Result<Vec<(String, Value)>> {
        let sql = self.take_select()?;
        self.db.fetch_pairs(&sql, self.ttl)
    }

    /// `pluck(column, Some(key))` selects key/column pairs; with no key an
    /// id column stands in as the key if registered, else a plain column
    /// comes back.
    pub fn pluck(&mut self, column: &str, key: Option<&str>) -> Result<Plucked> {
        let key = match key {
            Some(k) => Some(k.to_string()),
            None if !self.id_column.is_empty() => Some(self.id_column.clone()),
            None => None,
        };
        self.columns.clear();
        match key {
            Some(k) => {
                self.select(&k).select(column);
                Ok(Plucked::Pairs(self.pairs()?))
            }
            None => {
                self.select(column);
                Ok(Plucked::Column(self.column()?))
            }
        }
    }

    /// First column of the first row.
    pub fn value(&mut self) -> Result<Option<Value>> {
        self.limit = Some(1);
        let sql = self.take_select()?;
        self.db.fetch_value(&sql, self.ttl)
    }

    /// Look one row up by id. Discards previously chained predicates: find
    /// starts fresh by contract.
    pub fn find(&mut self, id: impl Into<Value>) -> Result<Option<Row>> {
        let column = if self.id_column.is_empty() {
            "id".to_string()
        } else {
            self.id_column.clone()
        };
        self.wheres.clear();
        self.where_(&column, Operand::One(id.into()));
        self.first()
    }

    /// All rows of the table, discarding previously chained predicates.
    pub fn find_all(&mut self) -> Result<Vec<Row>> {
        self.wheres.clear();
        self.fetch()
    }

    /// First matching row mapped into `T`. A missing table falls back to
    /// the target type's declared table, when it has one.
    pub fn first_as<T: FromRow>(&mut self) -> Result<Option<T>> {
        self.default_table_from::<T>();
        match self.first()? {
            Some(row) => Ok(Some(T::from_row(&row)?)),
            None => Ok(None),
        }
    }

    /// All matching rows mapped into `T`.
    pub fn fetch_as<T: FromRow>(&mut self) -> Result<Vec<T>> {
        self.default_table_from::<T>();
        self.fetch()?.iter().map(T::from_row).collect()
    }

    fn default_table_from<T: FromRow>(&mut self) {
        if self.table.is_none() {
            self.table = T::TABLE.map(String::from);
        }
    }

    /// Insert into the builder's table. Resets like every terminal.
    pub fn insert(&mut self, values: &[(&str, Value)]) -> Result<u64> {
        let (table, _) = self.resolved_table()?;
        self.reset();
        self.db.insert(&table, values)
    }

    /// Update rows matching the accumulated predicates.
    pub fn update(&mut self, values: &[(&str, Value)]) -> Result<u64> {
        let (table, _) = self.resolved_table()?;
        let predicate = Where::Raw(self.where_fragment());
        self.reset();
        self.db.update(&table, values, predicate)
    }

    /// Insert-or-update through the driver's upsert primitive.
    pub fn upsert(
        &mut self,
        insert: &[(&str, Value)],
        update: &[(&str, Value)],
        conflict: &[&str],
    ) -> Result<u64> {
        let (table, _) = self.resolved_table()?;
        self.reset();
        let conflict: Vec<String> = conflict.iter().map(|c| (*c).to_string()).collect();
        self.db.upsert(&table, insert, update, &conflict)
    }

    /// Delete rows matching the accumulated predicates.
    pub fn delete(&mut self) -> Result<u64> {
        let (table, _) = self.resolved_table()?;
        let predicate = Where::Raw(self.where_fragment());
        self.reset();
        self.db.delete(&table, predicate)
    }
}

// ---- rendering ----

fn render_column(db: &Db, col: &Column) -> String {
    let base = if col.raw {
        col.name.clone()
    } else {
        db.field_name(&col.name)
    };
    let base = match &col.aggregate {
        Some(func) => format!("{}({})", func.to_uppercase(), base),
        None => base,
    };
    match &col.alias {
        Some(alias) => format!("{} AS {}", base, db.field_name(alias)),
        None => base,
    }
}

fn render_join(db: &Db, join: &Join) -> String {
    let mut out = format!("{} {}", join.kind.keyword(), db.field_name(&join.table));
    for (i, cond) in join.on.iter().enumerate() {
        let connective = if i == 0 {
            "ON"
        } else if cond.or {
            "OR"
        } else {
            "AND"
        };
        out.push_str(&format!(
            " {} {} {} {}",
            connective,
            db.field_name(&cond.left),
            cond.op,
            db.field_name(&cond.right)
        ));
    }
    out
}

fn render_where(db: &Db, nodes: &[WhereNode], top: bool) -> String {
    let mut parts: Vec<String> = Vec::with_capacity(nodes.len());
    for (i, node) in nodes.iter().enumerate() {
        let mut piece = String::new();
        if i == 0 {
            if top {
                piece.push_str("WHERE ");
            }
        } else {
            piece.push_str(match node.connective {
                Connective::Or => "OR ",
                _ => "AND ",
            });
        }
        match &node.part {
            WherePart::Leaf { field, op, operand } => {
                piece.push_str(&render_leaf(db, field, op, operand));
            }
            WherePart::Group(children) => {
                piece.push('(');
                piece.push_str(&render_where(db, children, false));
                piece.push(')');
            }
        }
        parts.push(piece);
    }
    parts.join(" ")
}

fn render_leaf(db: &Db, field: &str, op: &str, operand: &Operand) -> String {
    let field = db.field_name(field);
    match operand {
        Operand::One(value) => format!("{} {} {}", field, op, db.escape(value)),
        Operand::Many(values) => {
            let list: Vec<String> = values.iter().map(|v| db.escape(v)).collect();
            format!("{} {} ({})", field, op, list.join(", "))
        }
    }
}
