//! Type definitions for the relational model.
//!
//! These types describe tables the way the schema declared them: ordered
//! columns over a fixed primitive type set, foreign-key edges, indexes and
//! verbatim CHECK clauses. They serialize with [`serde`] so a parsed model can
//! be dumped as JSON or YAML for inspection.

use serde::{Deserialize, Serialize};

/// Primitive column type.
///
/// Every declared SQL type is mapped onto one of these. The mapping is
/// deliberately small; unknown types are rejected by the parser.
///
/// # Examples
///
/// ```
/// use schemarepo_core::ColumnType;
///
/// assert_eq!(ColumnType::from_sql("DECIMAL(10, 2)"), Some(ColumnType::Real));
/// assert_eq!(ColumnType::from_sql("varchar(255)"), Some(ColumnType::Text));
/// assert_eq!(ColumnType::from_sql("GEOMETRY"), None);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Integer,
    Text,
    Real,
    Binary,
    Boolean,
    Timestamp,
}

impl ColumnType {
    /// Maps a declared SQL type onto a primitive type.
    ///
    /// Size arguments are ignored and only the first word counts, so
    /// `DOUBLE PRECISION` and `VARCHAR(255)` are both accepted.
    pub fn from_sql(declared: &str) -> Option<Self> {
        let upper = declared.to_ascii_uppercase();
        let base = upper
            .split('(')
            .next()
            .and_then(|s| s.split_whitespace().next())
            .unwrap_or("");

        match base {
            "INT" | "INTEGER" | "BIGINT" | "SMALLINT" | "TINYINT" | "MEDIUMINT" => {
                Some(Self::Integer)
            }
            "TEXT" | "VARCHAR" | "CHAR" | "CHARACTER" | "NVARCHAR" | "NCHAR" | "CLOB" => {
                Some(Self::Text)
            }
            "REAL" | "FLOAT" | "DOUBLE" | "DECIMAL" | "NUMERIC" => Some(Self::Real),
            "BLOB" | "BINARY" | "VARBINARY" => Some(Self::Binary),
            "BOOLEAN" | "BOOL" => Some(Self::Boolean),
            "TIMESTAMP" | "DATETIME" | "DATE" => Some(Self::Timestamp),
            _ => None,
        }
    }

    /// Type name emitted in generated DDL.
    ///
    /// `INTEGER` must stay exactly `INTEGER` so that an `INTEGER PRIMARY KEY`
    /// column aliases the rowid.
    pub fn sql_name(self) -> &'static str {
        match self {
            Self::Integer => "INTEGER",
            Self::Text => "TEXT",
            Self::Real => "REAL",
            Self::Binary => "BLOB",
            Self::Boolean => "BOOLEAN",
            Self::Timestamp => "TIMESTAMP",
        }
    }
}

/// Default value declared on a column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum DefaultValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Boolean(bool),
    CurrentTimestamp,
    CurrentDate,
    CurrentTime,
    /// Parenthesized expression, stored without the outer parentheses.
    Expression(String),
}

impl DefaultValue {
    /// Renders the default as a DDL fragment (without the `DEFAULT` keyword).
    ///
    /// # Examples
    ///
    /// ```
    /// use schemarepo_core::DefaultValue;
    ///
    /// assert_eq!(DefaultValue::Text("it's".into()).to_sql(), "'it''s'");
    /// assert_eq!(DefaultValue::Boolean(true).to_sql(), "1");
    /// assert_eq!(DefaultValue::Expression("datetime('now')".into()).to_sql(), "(datetime('now'))");
    /// ```
    pub fn to_sql(&self) -> String {
        match self {
            Self::Null => "NULL".to_string(),
            Self::Integer(i) => i.to_string(),
            Self::Real(r) => format!("{r:?}"),
            Self::Text(s) => format!("'{}'", s.replace('\'', "''")),
            Self::Boolean(b) => if *b { "1" } else { "0" }.to_string(),
            Self::CurrentTimestamp => "CURRENT_TIMESTAMP".to_string(),
            Self::CurrentDate => "CURRENT_DATE".to_string(),
            Self::CurrentTime => "CURRENT_TIME".to_string(),
            Self::Expression(expr) => format!("({expr})"),
        }
    }
}

/// Column definition.
///
/// Use [`Column::new`] and the chained builder methods to declare columns in
/// code; the parser produces the same values from DDL.
///
/// # Examples
///
/// ```
/// use schemarepo_core::{Column, ColumnType};
///
/// let id = Column::new("id", ColumnType::Integer).primary_key().autoincrement();
/// assert!(id.primary_key && id.autoincrement);
/// assert!(id.nullable);
///
/// let email = Column::new("email", ColumnType::Text).not_null().unique();
/// assert!(!email.nullable && email.unique);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
    pub nullable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<DefaultValue>,
    #[serde(default)]
    pub primary_key: bool,
    #[serde(default)]
    pub unique: bool,
    #[serde(default)]
    pub autoincrement: bool,
    /// Column-level CHECK expression, verbatim, without outer parentheses.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check: Option<String>,
}

impl Column {
    /// Creates a nullable column with no constraints.
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            nullable: true,
            default: None,
            primary_key: false,
            unique: false,
            autoincrement: false,
            check: None,
        }
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    pub fn autoincrement(mut self) -> Self {
        self.autoincrement = true;
        self
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn with_default(mut self, default: DefaultValue) -> Self {
        self.default = Some(default);
        self
    }

    pub fn with_check(mut self, check: impl Into<String>) -> Self {
        self.check = Some(check.into());
        self
    }

    /// Returns `true` if the engine fills this column when it is left out of an
    /// INSERT: it declares a default or it aliases the rowid.
    pub fn engine_assigned(&self) -> bool {
        self.default.is_some() || (self.primary_key && self.column_type == ColumnType::Integer)
    }
}

/// Referential action on delete/update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForeignKeyAction {
    #[default]
    NoAction,
    Restrict,
    SetNull,
    SetDefault,
    Cascade,
}

impl ForeignKeyAction {
    pub fn sql(self) -> &'static str {
        match self {
            Self::NoAction => "NO ACTION",
            Self::Restrict => "RESTRICT",
            Self::SetNull => "SET NULL",
            Self::SetDefault => "SET DEFAULT",
            Self::Cascade => "CASCADE",
        }
    }
}

/// Foreign-key edge owned by `table`.
///
/// Single-column keys are the common case; composite keys pair
/// `columns[i]` with `referenced_columns[i]`. An empty `referenced_columns`
/// means "the referenced table's primary key" and is resolved when the
/// [`RelationalModel`](crate::RelationalModel) is built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKey {
    pub table: String,
    pub columns: Vec<String>,
    pub referenced_table: String,
    #[serde(default)]
    pub referenced_columns: Vec<String>,
    #[serde(default)]
    pub on_delete: ForeignKeyAction,
    #[serde(default)]
    pub on_update: ForeignKeyAction,
}

impl ForeignKey {
    /// Creates a single-column foreign key.
    ///
    /// # Examples
    ///
    /// ```
    /// use schemarepo_core::ForeignKey;
    ///
    /// let fk = ForeignKey::single("orders", "customer_id", "customers", "id");
    /// assert_eq!(fk.columns, vec!["customer_id"]);
    /// assert!(!fk.is_self_reference());
    /// ```
    pub fn single(
        table: impl Into<String>,
        column: impl Into<String>,
        referenced_table: impl Into<String>,
        referenced_column: impl Into<String>,
    ) -> Self {
        Self {
            table: table.into(),
            columns: vec![column.into()],
            referenced_table: referenced_table.into(),
            referenced_columns: vec![referenced_column.into()],
            on_delete: ForeignKeyAction::NoAction,
            on_update: ForeignKeyAction::NoAction,
        }
    }

    pub fn on_delete(mut self, action: ForeignKeyAction) -> Self {
        self.on_delete = action;
        self
    }

    pub fn is_self_reference(&self) -> bool {
        self.table == self.referenced_table
    }

    /// Pairs of `(owning column, referenced column)`.
    pub fn column_pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.columns
            .iter()
            .map(String::as_str)
            .zip(self.referenced_columns.iter().map(String::as_str))
    }
}

/// Index materialized on a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Index {
    pub name: String,
    pub table: String,
    pub columns: Vec<String>,
    #[serde(default)]
    pub unique: bool,
}

impl Index {
    /// Conventional name: `idx_<table>_<col1>_<col2>`.
    pub fn default_name(table: &str, columns: &[String]) -> String {
        format!("idx_{}_{}", table, columns.join("_"))
    }
}

/// Index request supplied at construction time.
///
/// When `table` is `None` the index is created on every table that has all of
/// the listed columns.
///
/// # Examples
///
/// ```
/// use schemarepo_core::IndexSpec;
///
/// let spec: IndexSpec = serde_json::from_str(r#"{"columns": ["user_id"]}"#).unwrap();
/// assert!(spec.table.is_none());
/// assert!(!spec.unique);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
    pub columns: Vec<String>,
    #[serde(default)]
    pub unique: bool,
}

impl IndexSpec {
    /// Index on `column` in every table that has it.
    pub fn column(column: impl Into<String>) -> Self {
        Self {
            columns: vec![column.into()],
            ..Self::default()
        }
    }

    /// Index on `columns` of a specific table.
    pub fn on(table: impl Into<String>, columns: &[&str]) -> Self {
        Self {
            table: Some(table.into()),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
}

/// Table definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub name: String,
    /// Declaration order is significant: it is the generated record's field order.
    pub columns: Vec<Column>,
    #[serde(default)]
    pub foreign_keys: Vec<ForeignKey>,
    #[serde(default)]
    pub indexes: Vec<Index>,
    /// Table-level UNIQUE column sets.
    #[serde(default)]
    pub unique_constraints: Vec<Vec<String>>,
    /// Table-level CHECK expressions, verbatim.
    #[serde(default)]
    pub checks: Vec<String>,
}

impl Table {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            foreign_keys: Vec::new(),
            indexes: Vec::new(),
            unique_constraints: Vec::new(),
            checks: Vec::new(),
        }
    }

    /// Appends a column.
    pub fn with_column(mut self, column: Column) -> Self {
        self.columns.push(column);
        self
    }

    /// Appends a single-column foreign key owned by this table.
    pub fn with_reference(
        mut self,
        column: &str,
        referenced_table: &str,
        referenced_column: &str,
    ) -> Self {
        let fk = ForeignKey::single(self.name.clone(), column, referenced_table, referenced_column);
        self.foreign_keys.push(fk);
        self
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    /// Position of a column in declaration order.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    /// Primary-key columns in declaration order (empty when none is declared).
    pub fn primary_key(&self) -> Vec<&Column> {
        self.columns.iter().filter(|c| c.primary_key).collect()
    }

    pub fn autoincrement_column(&self) -> Option<&Column> {
        self.columns.iter().find(|c| c.autoincrement)
    }
}
