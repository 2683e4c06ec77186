use anyhow::{bail, Context, Result};
use rusqlite::{params, types::Type, Connection};

#[macro_export]
macro_rules! sqlite_column {
    ($name:expr, $sql_type:expr $(, $field:ident = $value:expr)*) => {
        {
            // Only mutated when optional field assignments are passed
            #[allow(unused_mut)]
            let mut column = Column {
                name: $name,
                sql_type: $sql_type,
                is_primary_key: false,
                non_null: false,
                is_unique: false,
                default_value: None,
                foreign_key: None,
            };
            $(
                column.$field = $value;
            )*
            column
        }
    };
}

#[derive(Debug, PartialEq, Eq)]
pub enum SqlType {
    Text,
    Integer,
    Real,
}

impl SqlType {
    fn as_sql(&self) -> &'static str {
        match self {
            SqlType::Text => "TEXT",
            SqlType::Integer => "INTEGER",
            SqlType::Real => "REAL",
        }
    }

    fn from_sql(s: &str) -> Option<&'static SqlType> {
        match s {
            "TEXT" => Some(&SqlType::Text),
            "INTEGER" => Some(&SqlType::Integer),
            "REAL" => Some(&SqlType::Real),
            _ => None,
        }
    }
}

#[allow(unused)]
pub enum ForeignKeyOnChange {
    NoAction,
    Restrict,
    SetNull,
    Cascade,
}

impl ForeignKeyOnChange {
    fn as_sql(&self) -> &'static str {
        match self {
            ForeignKeyOnChange::NoAction => "NO ACTION",
            ForeignKeyOnChange::Restrict => "RESTRICT",
            ForeignKeyOnChange::SetNull => "SET NULL",
            ForeignKeyOnChange::Cascade => "CASCADE",
        }
    }
}

pub struct ForeignKey {
    pub foreign_table: &'static str,
    pub foreign_column: &'static str,
    pub on_delete: ForeignKeyOnChange,
}

pub struct Column<'a, S: AsRef<str>> {
    pub name: S,
    pub sql_type: &'a SqlType,
    pub is_primary_key: bool,
    pub non_null: bool,
    pub is_unique: bool,
    pub default_value: Option<S>,
    pub foreign_key: Option<&'a ForeignKey>,
}

pub struct Table {
    pub name: &'static str,
    pub columns: &'static [Column<'static, &'static str>],
    pub indices: &'static [(&'static str, &'static str)],
    pub unique_constraints: &'static [&'static [&'static str]],
}

impl Table {
    fn create_statement(&self) -> String {
        let mut parts: Vec<String> = self
            .columns
            .iter()
            .map(|column| {
                let mut def = format!("{} {}", column.name, column.sql_type.as_sql());
                if column.is_primary_key {
                    def.push_str(" PRIMARY KEY");
                }
                if column.non_null {
                    def.push_str(" NOT NULL");
                }
                if column.is_unique {
                    def.push_str(" UNIQUE");
                }
                if let Some(default_value) = column.default_value {
                    def.push_str(&format!(" DEFAULT {}", default_value));
                }
                if let Some(fk) = column.foreign_key {
                    def.push_str(&format!(
                        " REFERENCES {}({}) ON DELETE {}",
                        fk.foreign_table,
                        fk.foreign_column,
                        fk.on_delete.as_sql()
                    ));
                }
                def
            })
            .collect();
        for unique_constraint in self.unique_constraints {
            parts.push(format!("UNIQUE ({})", unique_constraint.join(", ")));
        }
        format!("CREATE TABLE {} ({});", self.name, parts.join(", "))
    }

    pub fn create(&self, conn: &Connection) -> Result<()> {
        conn.execute(&self.create_statement(), params![])?;
        for (index_name, columns) in self.indices {
            conn.execute(
                &format!("CREATE INDEX {} ON {}({});", index_name, self.name, columns),
                params![],
            )?;
        }
        Ok(())
    }

    pub fn validate(&self, conn: &Connection) -> Result<()> {
        self.validate_columns(conn)?;
        self.validate_indices(conn)?;
        self.validate_unique_constraints(conn)?;
        self.validate_foreign_keys(conn)
    }

    fn validate_columns(&self, conn: &Connection) -> Result<()> {
        let mut stmt = conn.prepare(&format!("PRAGMA table_info({});", self.name))?;
        let actual: Vec<Column<'static, String>> = stmt
            .query_map(params![], |row| {
                let sql_type = SqlType::from_sql(&row.get::<_, String>(2)?).ok_or_else(|| {
                    rusqlite::Error::InvalidColumnType(2, "type".to_string(), Type::Text)
                })?;
                Ok(Column {
                    name: row.get(1)?,
                    sql_type,
                    non_null: row.get::<_, i32>(3)? == 1,
                    default_value: row.get(4)?,
                    is_primary_key: row.get::<_, i32>(5)? == 1,
                    is_unique: false,
                    foreign_key: None,
                })
            })?
            .collect::<rusqlite::Result<_>>()
            .with_context(|| format!("Failed to read columns of table {}", self.name))?;

        if actual.len() != self.columns.len() {
            bail!(
                "Table {} has columns [{}], expected [{}]",
                self.name,
                actual.iter().map(|c| c.name.as_str()).collect::<Vec<_>>().join(", "),
                self.columns.iter().map(|c| c.name).collect::<Vec<_>>().join(", ")
            );
        }

        for (actual, expected) in actual.iter().zip(self.columns.iter()) {
            if actual.name != expected.name {
                bail!(
                    "Table {} column name mismatch: expected {}, got {}",
                    self.name,
                    expected.name,
                    actual.name
                );
            }
            if actual.sql_type != expected.sql_type
                || actual.non_null != expected.non_null
                || actual.is_primary_key != expected.is_primary_key
            {
                bail!(
                    "Table {} column {} definition mismatch: expected {:?} non_null={} pk={}, got {:?} non_null={} pk={}",
                    self.name,
                    expected.name,
                    expected.sql_type,
                    expected.non_null,
                    expected.is_primary_key,
                    actual.sql_type,
                    actual.non_null,
                    actual.is_primary_key
                );
            }
            // SQLite may report defaults wrapped in parentheses
            let actual_default = actual.default_value.as_deref().map(strip_parentheses);
            let expected_default = expected.default_value.map(strip_parentheses);
            if actual_default != expected_default {
                bail!(
                    "Table {} column {} default mismatch: expected {:?}, got {:?}",
                    self.name,
                    expected.name,
                    expected.default_value,
                    actual.default_value
                );
            }
        }
        Ok(())
    }

    fn validate_indices(&self, conn: &Connection) -> Result<()> {
        for (index_name, _) in self.indices {
            let exists: bool = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='index' AND name=?1 AND tbl_name=?2)",
                params![index_name, self.name],
                |row| row.get(0),
            )?;
            if !exists {
                bail!("Table {} is missing index '{}'", self.name, index_name);
            }
        }
        Ok(())
    }

    fn validate_unique_constraints(&self, conn: &Connection) -> Result<()> {
        if self.unique_constraints.is_empty() {
            return Ok(());
        }
        let mut list_stmt = conn.prepare(&format!("PRAGMA index_list({})", self.name))?;
        let unique_indices: Vec<String> = list_stmt
            .query_map([], |row| Ok((row.get::<_, String>(1)?, row.get::<_, i32>(2)?)))?
            .filter_map(|r| r.ok())
            .filter(|(_, unique)| *unique == 1)
            .map(|(name, _)| name)
            .collect();

        let mut column_sets: Vec<Vec<String>> = Vec::with_capacity(unique_indices.len());
        for index_name in &unique_indices {
            let mut info_stmt = conn.prepare(&format!("PRAGMA index_info({})", index_name))?;
            let mut columns: Vec<String> = info_stmt
                .query_map([], |row| row.get::<_, String>(2))?
                .filter_map(|r| r.ok())
                .collect();
            columns.sort();
            column_sets.push(columns);
        }

        for expected in self.unique_constraints {
            let mut expected_sorted: Vec<&str> = expected.to_vec();
            expected_sorted.sort();
            let found = column_sets
                .iter()
                .any(|set| set.iter().map(String::as_str).eq(expected_sorted.iter().copied()));
            if !found {
                bail!(
                    "Table {} is missing unique constraint on ({})",
                    self.name,
                    expected.join(", ")
                );
            }
        }
        Ok(())
    }

    fn validate_foreign_keys(&self, conn: &Connection) -> Result<()> {
        // Rows: id, seq, table, from, to, on_update, on_delete, match
        let mut stmt = conn.prepare(&format!("PRAGMA foreign_key_list({})", self.name))?;
        let actual: Vec<(String, String, String, String)> = stmt
            .query_map([], |row| Ok((row.get(3)?, row.get(2)?, row.get(4)?, row.get(6)?)))?
            .filter_map(|r| r.ok())
            .collect();

        for column in self.columns {
            let Some(fk) = column.foreign_key else {
                continue;
            };
            let found = actual.iter().any(|(from, table, to, on_delete)| {
                from == column.name
                    && table == fk.foreign_table
                    && to == fk.foreign_column
                    && on_delete == fk.on_delete.as_sql()
            });
            if !found {
                bail!(
                    "Table {} column {} is missing foreign key REFERENCES {}({}) ON DELETE {}",
                    self.name,
                    column.name,
                    fk.foreign_table,
                    fk.foreign_column,
                    fk.on_delete.as_sql()
                );
            }
        }
        Ok(())
    }
}

fn strip_parentheses(s: &str) -> String {
    s.strip_prefix('(')
        .and_then(|s| s.strip_suffix(')'))
        .unwrap_or(s)
        .to_string()
}

pub struct VersionedSchema {
    pub version: usize,
    pub tables: &'static [Table],
    pub migration: Option<fn(&Connection) -> Result<()>>,
}

impl VersionedSchema {
    pub fn create(&self, conn: &Connection) -> Result<()> {
        conn.execute("PRAGMA foreign_keys = ON;", params![])?;
        for table in self.tables {
            table.create(conn)?;
        }
        set_user_version(conn, self.version)
    }

    pub fn validate(&self, conn: &Connection) -> Result<()> {
        for table in self.tables {
            table.validate(conn)?;
        }
        Ok(())
    }
}

pub const BASE_DB_VERSION: usize = 99999;

fn set_user_version(conn: &Connection, version: usize) -> Result<()> {
    conn.execute(
        &format!("PRAGMA user_version = {}", BASE_DB_VERSION + version),
        [],
    )?;
    Ok(())
}

/// Reads the schema version stored in `PRAGMA user_version`, offset by
/// [`BASE_DB_VERSION`]. Returns `None` for a database never created by us.
pub fn read_schema_version(conn: &Connection) -> Result<Option<usize>> {
    let raw: i64 = conn
        .query_row("PRAGMA user_version;", [], |row| row.get(0))
        .context("Failed to read database version")?;
    let version = raw - BASE_DB_VERSION as i64;
    Ok((version >= 0).then_some(version as usize))
}

/// Brings `conn` up to the latest of `schemas`.
///
/// An empty database gets the latest schema created. An existing one is
/// validated against its recorded version and then migrated forward.
pub fn ensure_schema(conn: &Connection, schemas: &[VersionedSchema], label: &str) -> Result<()> {
    let latest = schemas.last().context("No schemas defined")?;

    let table_count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type='table'",
        [],
        |row| row.get(0),
    )?;
    if table_count == 0 {
        latest.create(conn)?;
        tracing::info!("Created {} database at schema version {}", label, latest.version);
        return Ok(());
    }

    let Some(version) = read_schema_version(conn)? else {
        bail!(
            "{} database does not carry base version {}, refusing to touch it",
            label,
            BASE_DB_VERSION
        );
    };
    let schema = schemas.get(version).with_context(|| {
        format!(
            "{} database version {} is too new (max supported: {})",
            label, version, latest.version
        )
    })?;
    schema.validate(conn)?;

    if version < latest.version {
        tracing::info!(
            "Migrating {} database from version {} to {}",
            label,
            version,
            latest.version
        );
        for schema in schemas.iter().skip(version + 1) {
            if let Some(migration) = schema.migration {
                migration(conn)?;
            }
        }
        set_user_version(conn, latest.version)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite_column;

    const PARENT: Table = Table {
        name: "parent",
        columns: &[
            sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
            sqlite_column!("code", &SqlType::Text, non_null = true, is_unique = true),
        ],
        indices: &[],
        unique_constraints: &[],
    };

    const CHILD: Table = Table {
        name: "child",
        columns: &[
            sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
            sqlite_column!(
                "parent_id",
                &SqlType::Integer,
                non_null = true,
                foreign_key = Some(&ForeignKey {
                    foreign_table: "parent",
                    foreign_column: "id",
                    on_delete: ForeignKeyOnChange::Cascade,
                })
            ),
            sqlite_column!("name", &SqlType::Text, non_null = true),
            sqlite_column!("score", &SqlType::Real, default_value = Some("0")),
        ],
        indices: &[("idx_child_name", "name")],
        unique_constraints: &[&["parent_id", "name"]],
    };

    const SCHEMAS_V0: &[VersionedSchema] = &[VersionedSchema {
        version: 0,
        tables: &[PARENT, CHILD],
        migration: None,
    }];

    #[test]
    fn created_schema_validates() {
        let conn = Connection::open_in_memory().unwrap();
        SCHEMAS_V0[0].create(&conn).unwrap();
        SCHEMAS_V0[0].validate(&conn).unwrap();
        assert_eq!(read_schema_version(&conn).unwrap(), Some(0));
    }

    #[test]
    fn validate_detects_missing_index() {
        let conn = Connection::open_in_memory().unwrap();
        SCHEMAS_V0[0].create(&conn).unwrap();
        conn.execute("DROP INDEX idx_child_name", []).unwrap();

        let err = SCHEMAS_V0[0].validate(&conn).unwrap_err();
        assert!(err.to_string().contains("idx_child_name"));
    }

    #[test]
    fn validate_detects_missing_unique_constraint() {
        let conn = Connection::open_in_memory().unwrap();
        PARENT.create(&conn).unwrap();
        conn.execute(
            "CREATE TABLE child (id INTEGER PRIMARY KEY, parent_id INTEGER NOT NULL REFERENCES parent(id) ON DELETE CASCADE, name TEXT NOT NULL, score REAL DEFAULT 0)",
            [],
        )
        .unwrap();
        conn.execute("CREATE INDEX idx_child_name ON child(name)", [])
            .unwrap();

        let err = CHILD.validate(&conn).unwrap_err();
        assert!(err.to_string().contains("unique constraint"));
    }

    #[test]
    fn validate_detects_missing_foreign_key() {
        let conn = Connection::open_in_memory().unwrap();
        PARENT.create(&conn).unwrap();
        conn.execute(
            "CREATE TABLE child (id INTEGER PRIMARY KEY, parent_id INTEGER NOT NULL, name TEXT NOT NULL, score REAL DEFAULT 0, UNIQUE (parent_id, name))",
            [],
        )
        .unwrap();
        conn.execute("CREATE INDEX idx_child_name ON child(name)", [])
            .unwrap();

        let err = CHILD.validate(&conn).unwrap_err();
        assert!(err.to_string().contains("foreign key"));
    }

    #[test]
    fn ensure_schema_creates_then_accepts_existing() {
        let conn = Connection::open_in_memory().unwrap();
        ensure_schema(&conn, SCHEMAS_V0, "test").unwrap();
        ensure_schema(&conn, SCHEMAS_V0, "test").unwrap();
        assert_eq!(read_schema_version(&conn).unwrap(), Some(0));
    }

    #[test]
    fn ensure_schema_refuses_foreign_database() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute("CREATE TABLE unrelated (x INTEGER)", []).unwrap();

        let err = ensure_schema(&conn, SCHEMAS_V0, "test").unwrap_err();
        assert!(err.to_string().contains("base version"));
    }

    fn add_note_column(conn: &Connection) -> Result<()> {
        conn.execute("ALTER TABLE parent ADD COLUMN note TEXT", [])?;
        Ok(())
    }

    const PARENT_V1: Table = Table {
        name: "parent",
        columns: &[
            sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
            sqlite_column!("code", &SqlType::Text, non_null = true, is_unique = true),
            sqlite_column!("note", &SqlType::Text),
        ],
        indices: &[],
        unique_constraints: &[],
    };

    const SCHEMAS_V1: &[VersionedSchema] = &[
        VersionedSchema {
            version: 0,
            tables: &[PARENT, CHILD],
            migration: None,
        },
        VersionedSchema {
            version: 1,
            tables: &[PARENT_V1, CHILD],
            migration: Some(add_note_column),
        },
    ];

    #[test]
    fn ensure_schema_migrates_forward() {
        let conn = Connection::open_in_memory().unwrap();
        ensure_schema(&conn, SCHEMAS_V0, "test").unwrap();
        ensure_schema(&conn, SCHEMAS_V1, "test").unwrap();

        assert_eq!(read_schema_version(&conn).unwrap(), Some(1));
        SCHEMAS_V1[1].validate(&conn).unwrap();
    }
}
