//! Table reflection.
//!
//! [`TableReflector`] reads a table's column metadata from the live catalog and
//! produces a [`TableDescriptor`] with canonical field types.
//!
//! # Architecture
//!
//! SQL queries are organized in the `queries` submodule with constants for each
//! database type. Database-specific readers are in their respective submodules
//! (postgres, mysql, sqlite), each returning the same [`CatalogColumn`] rows.
//! Every call opens one dedicated connection and closes it on every path.

use crate::db::connection_string::ConnectionStringFactories;
use crate::db::pool::DirectConnection;
use crate::db::types::TypeNameMapper;
use crate::error::{DbError, DbResult};
use crate::models::{ColumnDescriptor, DatabaseEndpoint, DatabaseType, TableDescriptor};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// One catalog row, before type translation.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogColumn {
    pub name: String,
    pub type_name: String,
    pub length: i64,
    pub precision: i64,
    pub scale: i64,
    pub nullable: bool,
    pub is_identity: bool,
    pub is_primary_key: bool,
}

impl CatalogColumn {
    fn into_descriptor(
        self,
        mapper: &TypeNameMapper,
        db_type: DatabaseType,
    ) -> DbResult<ColumnDescriptor> {
        let ty = mapper.resolve(db_type, &self.type_name, self.length, self.nullable)?;
        Ok(ColumnDescriptor::new(self.name, ty)
            .with_raw_type(self.type_name)
            .with_length(self.length)
            .with_precision(self.precision, self.scale)
            .with_nullable(self.nullable)
            .with_identity(self.is_identity)
            .with_primary_key(self.is_primary_key))
    }
}

/// Reads table definitions from the database catalog.
#[derive(Debug, Clone)]
pub struct TableReflector {
    factories: Arc<ConnectionStringFactories>,
    mapper: Arc<TypeNameMapper>,
    connect_timeout: Duration,
    query_timeout: Duration,
}

impl TableReflector {
    pub fn new(
        factories: Arc<ConnectionStringFactories>,
        mapper: Arc<TypeNameMapper>,
        connect_timeout: Duration,
        query_timeout: Duration,
    ) -> Self {
        Self {
            factories,
            mapper,
            connect_timeout,
            query_timeout,
        }
    }

    /// Whether a catalog reader exists for the vendor.
    pub fn supports(db_type: DatabaseType) -> bool {
        !matches!(db_type, DatabaseType::SqlServer)
    }

    /// Describe `table` on `endpoint`.
    ///
    /// Columns come back in ordinal order. A table with no visible columns is
    /// reported as not found.
    pub async fn get_table_definition(
        &self,
        endpoint: &DatabaseEndpoint,
        table: &str,
    ) -> DbResult<TableDescriptor> {
        if table.trim().is_empty() {
            return Err(DbError::invalid_argument(format!(
                "'{}' is not a valid table name.",
                table
            )));
        }

        let db_type = endpoint.db_type();
        if !Self::supports(db_type) {
            return Err(DbError::configuration(format!(
                "No table reflector defined for database type '{}'.",
                db_type
            )));
        }

        let connection_string = self.factories.create(endpoint)?;
        let mut conn =
            DirectConnection::open(db_type, &connection_string, self.connect_timeout).await?;

        debug!(endpoint = %endpoint, table = %table, "Reading column metadata");
        let fetched = tokio::time::timeout(
            self.query_timeout,
            fetch_columns(&mut conn, endpoint.database(), table),
        )
        .await;
        conn.close().await;

        let rows = match fetched {
            Ok(rows) => rows?,
            Err(_) => {
                return Err(DbError::timeout(
                    format!("reflect table '{}'", table),
                    self.query_timeout,
                ));
            }
        };

        if rows.is_empty() {
            return Err(DbError::table_not_found(
                table,
                endpoint.database(),
                endpoint.server(),
            ));
        }

        let columns = rows
            .into_iter()
            .map(|row| row.into_descriptor(&self.mapper, db_type))
            .collect::<DbResult<Vec<_>>>()?;

        info!(
            endpoint = %endpoint,
            table = %table,
            columns = columns.len(),
            "Reflected table"
        );
        Ok(TableDescriptor::new(table, columns))
    }
}

async fn fetch_columns(
    conn: &mut DirectConnection,
    database: &str,
    table: &str,
) -> DbResult<Vec<CatalogColumn>> {
    match conn {
        DirectConnection::Postgres(c) => postgres::fetch_columns(c, database, table).await,
        DirectConnection::MySql(c) => mysql::fetch_columns(c, database, table).await,
        DirectConnection::SQLite(c) => sqlite::fetch_columns(c, table).await,
    }
}

// =============================================================================
// SQL Query Templates
// =============================================================================

mod queries {
    pub mod postgres {
        pub const TABLE_COLUMNS: &str = r#"
        SELECT
            c.column_name::text AS column_name,
            c.udt_name::text AS type_name,
            COALESCE(c.character_maximum_length, 0)::int8 AS max_length,
            COALESCE(c.numeric_precision, 0)::int8 AS numeric_precision,
            COALESCE(c.numeric_scale, 0)::int8 AS numeric_scale,
            (c.is_nullable = 'YES') AS is_nullable,
            (c.is_identity = 'YES' OR COALESCE(c.column_default, '') LIKE 'nextval(%') AS is_identity,
            EXISTS (
                SELECT 1
                FROM information_schema.table_constraints tc
                JOIN information_schema.key_column_usage kcu
                    ON tc.constraint_name = kcu.constraint_name
                    AND tc.table_schema = kcu.table_schema
                    AND tc.table_name = kcu.table_name
                WHERE tc.constraint_type = 'PRIMARY KEY'
                    AND tc.table_schema = c.table_schema
                    AND tc.table_name = c.table_name
                    AND kcu.column_name = c.column_name
            ) AS is_primary_key
        FROM information_schema.columns c
        WHERE c.table_name = $1
            AND c.table_catalog = $2
            AND c.table_schema = current_schema()
        ORDER BY c.ordinal_position
        "#;
    }

    pub mod mysql {
        pub const TABLE_COLUMNS: &str = r#"
        SELECT
            c.COLUMN_NAME AS column_name,
            c.DATA_TYPE AS type_name,
            CAST(IFNULL(c.CHARACTER_MAXIMUM_LENGTH, 0) AS SIGNED) AS max_length,
            CAST(IFNULL(c.NUMERIC_PRECISION, 0) AS SIGNED) AS numeric_precision,
            CAST(IFNULL(c.NUMERIC_SCALE, 0) AS SIGNED) AS numeric_scale,
            CAST(c.IS_NULLABLE = 'YES' AS SIGNED) AS is_nullable,
            CAST(c.EXTRA LIKE '%auto_increment%' AS SIGNED) AS is_identity,
            CAST(kcu.COLUMN_NAME IS NOT NULL AS SIGNED) AS is_primary_key
        FROM INFORMATION_SCHEMA.COLUMNS c
        LEFT JOIN INFORMATION_SCHEMA.TABLE_CONSTRAINTS tc
            ON tc.TABLE_SCHEMA = c.TABLE_SCHEMA
            AND tc.TABLE_NAME = c.TABLE_NAME
            AND tc.CONSTRAINT_TYPE = 'PRIMARY KEY'
        LEFT JOIN INFORMATION_SCHEMA.KEY_COLUMN_USAGE kcu
            ON kcu.CONSTRAINT_SCHEMA = tc.CONSTRAINT_SCHEMA
            AND kcu.CONSTRAINT_NAME = tc.CONSTRAINT_NAME
            AND kcu.TABLE_NAME = c.TABLE_NAME
            AND kcu.COLUMN_NAME = c.COLUMN_NAME
        WHERE c.TABLE_NAME = ?
            AND c.TABLE_SCHEMA = ?
        ORDER BY c.ORDINAL_POSITION
        "#;
    }

    pub mod sqlite {
        pub const TABLE_COLUMNS: &str =
            r#"SELECT name, type, "notnull", pk FROM pragma_table_info(?1) ORDER BY cid"#;
    }
}

// =============================================================================
// Database-Specific Readers
// =============================================================================

mod postgres {
    use super::*;
    use sqlx::{PgConnection, Row};

    pub async fn fetch_columns(
        conn: &mut PgConnection,
        database: &str,
        table: &str,
    ) -> DbResult<Vec<CatalogColumn>> {
        let rows = sqlx::query(queries::postgres::TABLE_COLUMNS)
            .bind(table)
            .bind(database)
            .fetch_all(&mut *conn)
            .await?;

        rows.iter()
            .map(|row| -> DbResult<CatalogColumn> {
                Ok(CatalogColumn {
                    name: row.try_get("column_name")?,
                    type_name: row.try_get("type_name")?,
                    length: row.try_get("max_length")?,
                    precision: row.try_get("numeric_precision")?,
                    scale: row.try_get("numeric_scale")?,
                    nullable: row.try_get("is_nullable")?,
                    is_identity: row.try_get("is_identity")?,
                    is_primary_key: row.try_get("is_primary_key")?,
                })
            })
            .collect()
    }
}

mod mysql {
    use super::*;
    use sqlx::mysql::MySqlRow;
    use sqlx::{MySqlConnection, Row};

    /// MySQL may return VARBINARY instead of VARCHAR depending on charset configuration.
    fn get_string(row: &MySqlRow, column: &str) -> DbResult<String> {
        if let Ok(s) = row.try_get::<String, _>(column) {
            return Ok(s);
        }
        let bytes: Vec<u8> = row.try_get(column)?;
        String::from_utf8(bytes)
            .map_err(|e| DbError::internal(format!("Catalog column '{}' is not UTF-8: {}", column, e)))
    }

    fn get_flag(row: &MySqlRow, column: &str) -> DbResult<bool> {
        Ok(row.try_get::<Option<i64>, _>(column)?.unwrap_or(0) != 0)
    }

    pub async fn fetch_columns(
        conn: &mut MySqlConnection,
        database: &str,
        table: &str,
    ) -> DbResult<Vec<CatalogColumn>> {
        let rows = sqlx::query(queries::mysql::TABLE_COLUMNS)
            .bind(table)
            .bind(database)
            .fetch_all(&mut *conn)
            .await?;

        rows.iter()
            .map(|row| -> DbResult<CatalogColumn> {
                Ok(CatalogColumn {
                    name: get_string(row, "column_name")?,
                    type_name: get_string(row, "type_name")?,
                    length: row.try_get("max_length")?,
                    precision: row.try_get("numeric_precision")?,
                    scale: row.try_get("numeric_scale")?,
                    nullable: get_flag(row, "is_nullable")?,
                    is_identity: get_flag(row, "is_identity")?,
                    is_primary_key: get_flag(row, "is_primary_key")?,
                })
            })
            .collect()
    }
}

mod sqlite {
    use super::*;
    use sqlx::{Row, SqliteConnection};

    /// Declared SQLite type split into base name and numeric arguments.
    #[derive(Debug, PartialEq)]
    pub struct DeclaredType {
        pub base: String,
        pub length: i64,
        pub precision: i64,
        pub scale: i64,
    }

    /// Parse declarations such as `VARCHAR(40)` or `DECIMAL(10, 2)`.
    ///
    /// An empty declaration has BLOB affinity.
    pub fn parse_declared_type(declared: &str) -> DeclaredType {
        let (name, args) = match declared.split_once('(') {
            Some((name, rest)) => (name, rest.trim_end().trim_end_matches(')')),
            None => (declared, ""),
        };

        let base = name.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase();
        let base = if base.is_empty() { "blob".to_string() } else { base };

        let numbers: Vec<i64> = args
            .split(',')
            .filter_map(|arg| arg.trim().parse().ok())
            .collect();
        let first = numbers.first().copied().unwrap_or(0);

        if base.contains("char") || base.contains("text") || base.contains("clob") {
            DeclaredType {
                base,
                length: first,
                precision: 0,
                scale: 0,
            }
        } else {
            DeclaredType {
                base,
                length: 0,
                precision: first,
                scale: numbers.get(1).copied().unwrap_or(0),
            }
        }
    }

    pub async fn fetch_columns(
        conn: &mut SqliteConnection,
        table: &str,
    ) -> DbResult<Vec<CatalogColumn>> {
        let rows = sqlx::query(queries::sqlite::TABLE_COLUMNS)
            .bind(table)
            .fetch_all(&mut *conn)
            .await?;

        let key_count = rows
            .iter()
            .filter(|row| row.try_get::<i64, _>("pk").unwrap_or(0) > 0)
            .count();

        rows.iter()
            .map(|row| -> DbResult<CatalogColumn> {
                let name: String = row.try_get("name")?;
                let declared: String = row.try_get("type")?;
                let not_null: i64 = row.try_get("notnull")?;
                let pk: i64 = row.try_get("pk")?;
                let parsed = parse_declared_type(&declared);

                // A lone INTEGER primary key aliases the rowid
                let is_identity = pk > 0 && key_count == 1 && parsed.base == "integer";

                Ok(CatalogColumn {
                    name,
                    type_name: parsed.base,
                    length: parsed.length,
                    precision: parsed.precision,
                    scale: parsed.scale,
                    nullable: not_null == 0 && pk == 0,
                    is_identity,
                    is_primary_key: pk > 0,
                })
            })
            .collect()
    }
}
