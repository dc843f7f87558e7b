//! Postgres-backed store.
//!
//! The reconciliation core is synchronous, so this store owns a private tokio
//! runtime and drives every SQLx call with `block_on`. Methods must therefore
//! not be called from inside another async runtime.
//!
//! Every transaction runs at `SERIALIZABLE` isolation: two writers that read
//! the same ledger key and both write it cannot both commit.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError | Scenario |
//! |------------|----------------------|------------|----------|
//! | Database (unique violation) | `23505` | `UniqueViolation` | Number already issued, duplicate movement id |
//! | Database (serialization failure) | `40001` | `Conflict` | Concurrent transaction touched the same rows |
//! | Database (deadlock detected) | `40P01` | `Conflict` | Lock cycle between writers |
//! | Database (lock not available) | `55P03` | `Conflict` | Lock timeout |
//! | Database (other) | Any other | `Backend` | Schema mismatch, check constraints, ... |
//! | RowNotFound | N/A | `NotFound` | Unexpected empty result |
//! | Decode / ColumnNotFound | N/A | `Corrupt` | Stored value cannot be mapped back |
//! | Other | N/A | `Backend` | Network errors, closed pool, ... |

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgConnection, PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, Row, Transaction};
use tokio::runtime::Runtime;
use tracing::instrument;
use uuid::Uuid;

use stockbook_core::{
    ArticleId, DocumentId, ExpectedVersion, LineId, MovementId, UserId, WarehouseId,
};
use stockbook_documents::{Document, DocumentLine, DocumentLink, DocumentStatus, DocumentType};
use stockbook_inventory::{
    ArticleTotal, BalanceKey, MovementType, StockBalance, StockMovement, StockReservation,
};

use super::{Store, StoreError, StoreTx};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS articles (
    id BIGINT PRIMARY KEY
);

CREATE TABLE IF NOT EXISTS warehouses (
    id BIGINT PRIMARY KEY
);

CREATE TABLE IF NOT EXISTS documents (
    id BIGINT PRIMARY KEY,
    document_type TEXT NOT NULL,
    number TEXT,
    document_date DATE NOT NULL,
    warehouse_id BIGINT,
    original_document_id BIGINT,
    status TEXT NOT NULL,
    version BIGINT NOT NULL,
    created_by BIGINT,
    updated_by BIGINT
);

CREATE INDEX IF NOT EXISTS documents_type_number_idx ON documents (document_type, number);

CREATE TABLE IF NOT EXISTS document_lines (
    document_id BIGINT NOT NULL REFERENCES documents (id) ON DELETE CASCADE,
    id BIGINT NOT NULL,
    position INTEGER NOT NULL,
    line_number BIGINT NOT NULL,
    article_id BIGINT,
    quantity NUMERIC NOT NULL,
    descriptive_only BOOLEAN NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    PRIMARY KEY (document_id, id)
);

CREATE TABLE IF NOT EXISTS document_links (
    target_id BIGINT NOT NULL,
    source_id BIGINT NOT NULL,
    PRIMARY KEY (target_id, source_id)
);

CREATE INDEX IF NOT EXISTS document_links_source_idx ON document_links (source_id);

CREATE TABLE IF NOT EXISTS issued_numbers (
    document_type TEXT NOT NULL,
    number TEXT NOT NULL,
    document_id BIGINT NOT NULL,
    PRIMARY KEY (document_type, number)
);

CREATE TABLE IF NOT EXISTS stock_movements (
    id UUID PRIMARY KEY,
    article_id BIGINT NOT NULL,
    warehouse_id BIGINT NOT NULL,
    destination_warehouse_id BIGINT,
    movement_type TEXT NOT NULL,
    quantity NUMERIC NOT NULL CHECK (quantity > 0),
    movement_date DATE NOT NULL,
    source_document_id BIGINT,
    source_document_line_id BIGINT,
    created_by BIGINT,
    created_at TIMESTAMPTZ NOT NULL,
    retracted_at TIMESTAMPTZ
);

CREATE INDEX IF NOT EXISTS stock_movements_document_idx ON stock_movements (source_document_id);
CREATE INDEX IF NOT EXISTS stock_movements_line_idx ON stock_movements (source_document_line_id);
CREATE INDEX IF NOT EXISTS stock_movements_key_idx ON stock_movements (article_id, warehouse_id);
CREATE INDEX IF NOT EXISTS stock_movements_dest_idx ON stock_movements (article_id, destination_warehouse_id);

CREATE TABLE IF NOT EXISTS stock_reservations (
    id UUID PRIMARY KEY,
    article_id BIGINT NOT NULL,
    warehouse_id BIGINT NOT NULL,
    quantity NUMERIC NOT NULL CHECK (quantity > 0),
    source_document_id BIGINT NOT NULL,
    source_document_line_id BIGINT NOT NULL,
    created_at TIMESTAMPTZ NOT NULL,
    released_at TIMESTAMPTZ
);

CREATE INDEX IF NOT EXISTS stock_reservations_document_idx ON stock_reservations (source_document_id);
CREATE INDEX IF NOT EXISTS stock_reservations_key_idx ON stock_reservations (article_id, warehouse_id);

CREATE TABLE IF NOT EXISTS stock_balances (
    article_id BIGINT NOT NULL,
    warehouse_id BIGINT NOT NULL,
    on_hand NUMERIC NOT NULL,
    committed NUMERIC NOT NULL,
    PRIMARY KEY (article_id, warehouse_id)
);

CREATE TABLE IF NOT EXISTS article_totals (
    article_id BIGINT PRIMARY KEY,
    total_on_hand NUMERIC NOT NULL
);
"#;

const MOVEMENT_COLUMNS: &str = "id, article_id, warehouse_id, destination_warehouse_id, \
     movement_type, quantity, movement_date, source_document_id, source_document_line_id, \
     created_by, created_at, retracted_at";

const RESERVATION_COLUMNS: &str = "id, article_id, warehouse_id, quantity, source_document_id, \
     source_document_line_id, created_at, released_at";

/// Store persisting documents, ledgers and caches in PostgreSQL.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    // Dropped before the runtime it was created on.
    pool: PgPool,
    runtime: Arc<Runtime>,
}

impl PostgresStore {
    /// Connect to `database_url` with a pool of at most `max_connections`.
    #[instrument(skip(database_url), err(Display))]
    pub fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("stockbook-pg")
            .enable_all()
            .build()
            .map_err(|e| StoreError::Backend(format!("failed to start runtime: {e}")))?;

        let pool = runtime
            .block_on(
                PgPoolOptions::new()
                    .max_connections(max_connections)
                    .connect(database_url),
            )
            .map_err(|e| map_sqlx_error("connect", e))?;

        tracing::info!(max_connections, "connected to postgres");
        Ok(Self {
            pool,
            runtime: Arc::new(runtime),
        })
    }

    /// Create missing tables and indexes. Safe to run on every start.
    #[instrument(skip(self), err(Display))]
    pub fn migrate(&self) -> Result<(), StoreError> {
        self.runtime
            .block_on(sqlx::raw_sql(SCHEMA).execute(&self.pool))
            .map_err(|e| map_sqlx_error("migrate", e))?;
        Ok(())
    }
}

impl Store for PostgresStore {
    type Tx<'a> = PgTx<'a>;

    fn begin(&self) -> Result<Self::Tx<'_>, StoreError> {
        let tx = self.runtime.block_on(async {
            let mut tx = self
                .pool
                .begin()
                .await
                .map_err(|e| map_sqlx_error("begin_transaction", e))?;
            sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
                .execute(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("set_isolation", e))?;
            Ok::<_, StoreError>(tx)
        })?;

        Ok(PgTx {
            runtime: &self.runtime,
            tx: Some(tx),
        })
    }
}

/// Database transaction. Rolled back on drop unless committed.
#[derive(Debug)]
pub struct PgTx<'a> {
    runtime: &'a Runtime,
    tx: Option<Transaction<'static, Postgres>>,
}

impl PgTx<'_> {
    fn parts(&mut self) -> Result<(&Runtime, &mut PgConnection), StoreError> {
        let runtime = self.runtime;
        let tx = self
            .tx
            .as_mut()
            .ok_or_else(|| StoreError::Backend("transaction already finished".to_string()))?;
        Ok((runtime, &mut **tx))
    }

    fn fetch_all(&mut self, operation: &str, query: SqlQuery<'_>) -> Result<Vec<PgRow>, StoreError> {
        let (rt, conn) = self.parts()?;
        rt.block_on(query.fetch_all(conn))
            .map_err(|e| map_sqlx_error(operation, e))
    }

    fn fetch_optional(
        &mut self,
        operation: &str,
        query: SqlQuery<'_>,
    ) -> Result<Option<PgRow>, StoreError> {
        let (rt, conn) = self.parts()?;
        rt.block_on(query.fetch_optional(conn))
            .map_err(|e| map_sqlx_error(operation, e))
    }

    fn execute(&mut self, operation: &str, query: SqlQuery<'_>) -> Result<u64, StoreError> {
        let (rt, conn) = self.parts()?;
        rt.block_on(query.execute(conn))
            .map(|done| done.rows_affected())
            .map_err(|e| map_sqlx_error(operation, e))
    }

    fn exists(&mut self, operation: &str, query: SqlQuery<'_>) -> Result<bool, StoreError> {
        Ok(self.fetch_optional(operation, query)?.is_some())
    }

    fn document_lines(&mut self, id: DocumentId) -> Result<Vec<DocumentLine>, StoreError> {
        let rows = self.fetch_all(
            "load_document_lines",
            sqlx::query(
                r#"
                SELECT id, line_number, article_id, quantity, descriptive_only, description
                FROM document_lines
                WHERE document_id = $1
                ORDER BY position ASC
                "#,
            )
            .bind(id.get()),
        )?;
        rows.iter().map(line_from_row).collect()
    }
}

type SqlQuery<'q> = sqlx::query::Query<'q, Postgres, sqlx::postgres::PgArguments>;

impl Drop for PgTx<'_> {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            if let Err(err) = self.runtime.block_on(tx.rollback()) {
                tracing::warn!(error = %err, "rollback failed");
            }
        }
    }
}

impl StoreTx for PgTx<'_> {
    fn article_exists(&mut self, id: ArticleId) -> Result<bool, StoreError> {
        self.exists(
            "article_exists",
            sqlx::query("SELECT 1 FROM articles WHERE id = $1").bind(id.get()),
        )
    }

    fn warehouse_exists(&mut self, id: WarehouseId) -> Result<bool, StoreError> {
        self.exists(
            "warehouse_exists",
            sqlx::query("SELECT 1 FROM warehouses WHERE id = $1").bind(id.get()),
        )
    }

    fn document(&mut self, id: DocumentId) -> Result<Option<Document>, StoreError> {
        let Some(row) = self.fetch_optional(
            "load_document",
            sqlx::query(
                r#"
                SELECT id, document_type, number, document_date, warehouse_id,
                       original_document_id, status, version, created_by, updated_by
                FROM documents
                WHERE id = $1
                "#,
            )
            .bind(id.get()),
        )?
        else {
            return Ok(None);
        };

        let mut document = document_from_row(&row)?;
        document.lines = self.document_lines(id)?;
        Ok(Some(document))
    }

    #[instrument(skip(self, document), fields(document_id = %document.id), err(Display))]
    fn save_document(
        &mut self,
        document: &Document,
        expected: ExpectedVersion,
    ) -> Result<u64, StoreError> {
        let current = self
            .fetch_optional(
                "check_document_version",
                sqlx::query("SELECT version FROM documents WHERE id = $1 FOR UPDATE")
                    .bind(document.id.get()),
            )?
            .map(|row| get::<i64>(&row, "version").and_then(to_u64))
            .transpose()?;

        expected
            .check(current)
            .map_err(|e| StoreError::Conflict(format!("document {}: {e}", document.id)))?;
        let next = current.map_or(1, |v| v + 1);
        let next_db = i64::try_from(next)
            .map_err(|_| StoreError::Backend(format!("document version {next} out of range")))?;

        self.execute(
            "upsert_document",
            sqlx::query(
                r#"
                INSERT INTO documents (
                    id, document_type, number, document_date, warehouse_id,
                    original_document_id, status, version, created_by, updated_by
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                ON CONFLICT (id) DO UPDATE SET
                    document_type = EXCLUDED.document_type,
                    number = EXCLUDED.number,
                    document_date = EXCLUDED.document_date,
                    warehouse_id = EXCLUDED.warehouse_id,
                    original_document_id = EXCLUDED.original_document_id,
                    status = EXCLUDED.status,
                    version = EXCLUDED.version,
                    created_by = EXCLUDED.created_by,
                    updated_by = EXCLUDED.updated_by
                "#,
            )
            .bind(document.id.get())
            .bind(document.document_type.code())
            .bind(document.number.as_deref())
            .bind(document.date)
            .bind(document.warehouse_id.map(WarehouseId::get))
            .bind(document.original_document_id.map(DocumentId::get))
            .bind(document.status.code())
            .bind(next_db)
            .bind(document.created_by.map(UserId::get))
            .bind(document.updated_by.map(UserId::get)),
        )?;

        self.execute(
            "clear_document_lines",
            sqlx::query("DELETE FROM document_lines WHERE document_id = $1")
                .bind(document.id.get()),
        )?;
        for (position, line) in document.lines.iter().enumerate() {
            let position = i32::try_from(position)
                .map_err(|_| StoreError::Backend(format!("document {} has too many lines", document.id)))?;
            self.execute(
                "insert_document_line",
                sqlx::query(
                    r#"
                    INSERT INTO document_lines (
                        document_id, id, position, line_number, article_id,
                        quantity, descriptive_only, description
                    )
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                    "#,
                )
                .bind(document.id.get())
                .bind(line.id.get())
                .bind(position)
                .bind(i64::from(line.line_number))
                .bind(line.article_id.map(ArticleId::get))
                .bind(line.quantity)
                .bind(line.descriptive_only)
                .bind(line.description.as_str()),
            )?;
        }

        Ok(next)
    }

    fn remove_document(&mut self, id: DocumentId) -> Result<(), StoreError> {
        self.execute(
            "remove_document_links",
            sqlx::query("DELETE FROM document_links WHERE target_id = $1 OR source_id = $1")
                .bind(id.get()),
        )?;
        let removed = self.execute(
            "remove_document",
            sqlx::query("DELETE FROM documents WHERE id = $1").bind(id.get()),
        )?;
        if removed == 0 {
            return Err(StoreError::NotFound(format!("document {id}")));
        }
        Ok(())
    }

    fn observed_numbers(
        &mut self,
        document_type: DocumentType,
        prefix: &str,
    ) -> Result<Vec<String>, StoreError> {
        let pattern = format!("{}%", escape_like(prefix));
        let rows = self.fetch_all(
            "observed_numbers",
            sqlx::query(
                r#"
                SELECT number FROM documents
                WHERE document_type = $1 AND btrim(number) LIKE $2 ESCAPE '\'
                UNION ALL
                SELECT number FROM issued_numbers
                WHERE document_type = $1 AND number LIKE $2 ESCAPE '\'
                "#,
            )
            .bind(document_type.code())
            .bind(pattern),
        )?;
        rows.iter().map(|row| get::<String>(row, "number")).collect()
    }

    fn claim_number(
        &mut self,
        document_type: DocumentType,
        number: &str,
        document_id: DocumentId,
    ) -> Result<(), StoreError> {
        self.execute(
            "claim_number",
            sqlx::query(
                "INSERT INTO issued_numbers (document_type, number, document_id) VALUES ($1, $2, $3)",
            )
            .bind(document_type.code())
            .bind(number)
            .bind(document_id.get()),
        )
        .map(|_| ())
        .map_err(|e| match e {
            StoreError::UniqueViolation(_) => StoreError::UniqueViolation(format!(
                "{document_type} number {number} already issued"
            )),
            other => other,
        })
    }

    fn add_link(&mut self, link: DocumentLink) -> Result<bool, StoreError> {
        let inserted = self.execute(
            "add_link",
            sqlx::query(
                r#"
                INSERT INTO document_links (target_id, source_id)
                VALUES ($1, $2)
                ON CONFLICT DO NOTHING
                "#,
            )
            .bind(link.target.get())
            .bind(link.source.get()),
        )?;
        Ok(inserted == 1)
    }

    fn links_for(&mut self, target: DocumentId) -> Result<Vec<DocumentId>, StoreError> {
        let rows = self.fetch_all(
            "links_for",
            sqlx::query(
                "SELECT source_id FROM document_links WHERE target_id = $1 ORDER BY source_id",
            )
            .bind(target.get()),
        )?;
        rows.iter()
            .map(|row| get::<i64>(row, "source_id").map(DocumentId::new))
            .collect()
    }

    fn links_from(&mut self, source: DocumentId) -> Result<Vec<DocumentId>, StoreError> {
        let rows = self.fetch_all(
            "links_from",
            sqlx::query(
                "SELECT target_id FROM document_links WHERE source_id = $1 ORDER BY target_id",
            )
            .bind(source.get()),
        )?;
        rows.iter()
            .map(|row| get::<i64>(row, "target_id").map(DocumentId::new))
            .collect()
    }

    fn insert_movement(&mut self, m: &StockMovement) -> Result<(), StoreError> {
        self.execute(
            "insert_movement",
            sqlx::query(
                r#"
                INSERT INTO stock_movements (
                    id, article_id, warehouse_id, destination_warehouse_id, movement_type,
                    quantity, movement_date, source_document_id, source_document_line_id,
                    created_by, created_at, retracted_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
                "#,
            )
            .bind(*m.id.as_uuid())
            .bind(m.article_id.get())
            .bind(m.warehouse_id.get())
            .bind(m.destination_warehouse_id.map(WarehouseId::get))
            .bind(m.movement_type.code())
            .bind(m.quantity)
            .bind(m.movement_date)
            .bind(m.source_document_id.map(DocumentId::get))
            .bind(m.source_document_line_id.map(LineId::get))
            .bind(m.created_by.map(UserId::get))
            .bind(m.created_at)
            .bind(m.retracted_at),
        )
        .map(|_| ())
    }

    fn retract_movement(&mut self, id: MovementId, at: DateTime<Utc>) -> Result<(), StoreError> {
        let updated = self.execute(
            "retract_movement",
            sqlx::query(
                "UPDATE stock_movements SET retracted_at = $2 WHERE id = $1 AND retracted_at IS NULL",
            )
            .bind(*id.as_uuid())
            .bind(at),
        )?;
        if updated == 1 {
            return Ok(());
        }
        let known = self.exists(
            "find_movement",
            sqlx::query("SELECT 1 FROM stock_movements WHERE id = $1").bind(*id.as_uuid()),
        )?;
        Err(if known {
            StoreError::Conflict(format!("movement {id} already retracted"))
        } else {
            StoreError::NotFound(format!("movement {id}"))
        })
    }

    fn movements_for_document(
        &mut self,
        document_id: DocumentId,
    ) -> Result<Vec<StockMovement>, StoreError> {
        let sql = format!(
            "SELECT {MOVEMENT_COLUMNS} FROM stock_movements \
             WHERE source_document_id = $1 AND retracted_at IS NULL ORDER BY id"
        );
        let rows = self.fetch_all(
            "movements_for_document",
            sqlx::query(&sql).bind(document_id.get()),
        )?;
        rows.iter().map(movement_from_row).collect()
    }

    fn movements_for_line(&mut self, line_id: LineId) -> Result<Vec<StockMovement>, StoreError> {
        let sql = format!(
            "SELECT {MOVEMENT_COLUMNS} FROM stock_movements \
             WHERE source_document_line_id = $1 AND retracted_at IS NULL ORDER BY id"
        );
        let rows = self.fetch_all("movements_for_line", sqlx::query(&sql).bind(line_id.get()))?;
        rows.iter().map(movement_from_row).collect()
    }

    fn movements_for_key(&mut self, key: BalanceKey) -> Result<Vec<StockMovement>, StoreError> {
        let sql = format!(
            "SELECT {MOVEMENT_COLUMNS} FROM stock_movements \
             WHERE article_id = $1 AND (warehouse_id = $2 OR destination_warehouse_id = $2) \
             AND retracted_at IS NULL ORDER BY id"
        );
        let rows = self.fetch_all(
            "movements_for_key",
            sqlx::query(&sql)
                .bind(key.article_id.get())
                .bind(key.warehouse_id.get()),
        )?;
        rows.iter().map(movement_from_row).collect()
    }

    fn insert_reservation(&mut self, r: &StockReservation) -> Result<(), StoreError> {
        self.execute(
            "insert_reservation",
            sqlx::query(
                r#"
                INSERT INTO stock_reservations (
                    id, article_id, warehouse_id, quantity, source_document_id,
                    source_document_line_id, created_at, released_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(*r.id.as_uuid())
            .bind(r.article_id.get())
            .bind(r.warehouse_id.get())
            .bind(r.quantity)
            .bind(r.source_document_id.get())
            .bind(r.source_document_line_id.get())
            .bind(r.created_at)
            .bind(r.released_at),
        )
        .map(|_| ())
    }

    fn release_reservation(
        &mut self,
        id: MovementId,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let updated = self.execute(
            "release_reservation",
            sqlx::query(
                "UPDATE stock_reservations SET released_at = $2 WHERE id = $1 AND released_at IS NULL",
            )
            .bind(*id.as_uuid())
            .bind(at),
        )?;
        if updated == 1 {
            return Ok(());
        }
        let known = self.exists(
            "find_reservation",
            sqlx::query("SELECT 1 FROM stock_reservations WHERE id = $1").bind(*id.as_uuid()),
        )?;
        Err(if known {
            StoreError::Conflict(format!("reservation {id} already released"))
        } else {
            StoreError::NotFound(format!("reservation {id}"))
        })
    }

    fn reservations_for_document(
        &mut self,
        document_id: DocumentId,
    ) -> Result<Vec<StockReservation>, StoreError> {
        let sql = format!(
            "SELECT {RESERVATION_COLUMNS} FROM stock_reservations \
             WHERE source_document_id = $1 AND released_at IS NULL ORDER BY id"
        );
        let rows = self.fetch_all(
            "reservations_for_document",
            sqlx::query(&sql).bind(document_id.get()),
        )?;
        rows.iter().map(reservation_from_row).collect()
    }

    fn reservations_for_key(
        &mut self,
        key: BalanceKey,
    ) -> Result<Vec<StockReservation>, StoreError> {
        let sql = format!(
            "SELECT {RESERVATION_COLUMNS} FROM stock_reservations \
             WHERE article_id = $1 AND warehouse_id = $2 AND released_at IS NULL ORDER BY id"
        );
        let rows = self.fetch_all(
            "reservations_for_key",
            sqlx::query(&sql)
                .bind(key.article_id.get())
                .bind(key.warehouse_id.get()),
        )?;
        rows.iter().map(reservation_from_row).collect()
    }

    fn balance(&mut self, key: BalanceKey) -> Result<Option<StockBalance>, StoreError> {
        self.fetch_optional(
            "load_balance",
            sqlx::query(
                r#"
                SELECT article_id, warehouse_id, on_hand, committed
                FROM stock_balances
                WHERE article_id = $1 AND warehouse_id = $2
                "#,
            )
            .bind(key.article_id.get())
            .bind(key.warehouse_id.get()),
        )?
        .as_ref()
        .map(balance_from_row)
        .transpose()
    }

    fn balances_for_article(
        &mut self,
        article_id: ArticleId,
    ) -> Result<Vec<StockBalance>, StoreError> {
        let rows = self.fetch_all(
            "balances_for_article",
            sqlx::query(
                r#"
                SELECT article_id, warehouse_id, on_hand, committed
                FROM stock_balances
                WHERE article_id = $1
                ORDER BY warehouse_id
                "#,
            )
            .bind(article_id.get()),
        )?;
        rows.iter().map(balance_from_row).collect()
    }

    fn known_balance_keys(&mut self) -> Result<Vec<BalanceKey>, StoreError> {
        let rows = self.fetch_all(
            "known_balance_keys",
            sqlx::query(
                r#"
                SELECT article_id, warehouse_id FROM stock_balances
                UNION
                SELECT article_id, warehouse_id FROM stock_movements
                UNION
                SELECT article_id, destination_warehouse_id FROM stock_movements
                WHERE destination_warehouse_id IS NOT NULL
                UNION
                SELECT article_id, warehouse_id FROM stock_reservations
                ORDER BY 1, 2
                "#,
            ),
        )?;
        rows.iter()
            .map(|row| {
                Ok(BalanceKey::new(
                    ArticleId::new(get(row, "article_id")?),
                    WarehouseId::new(get(row, "warehouse_id")?),
                ))
            })
            .collect()
    }

    fn put_balance(&mut self, balance: &StockBalance) -> Result<(), StoreError> {
        self.execute(
            "put_balance",
            sqlx::query(
                r#"
                INSERT INTO stock_balances (article_id, warehouse_id, on_hand, committed)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (article_id, warehouse_id) DO UPDATE SET
                    on_hand = EXCLUDED.on_hand,
                    committed = EXCLUDED.committed
                "#,
            )
            .bind(balance.article_id.get())
            .bind(balance.warehouse_id.get())
            .bind(balance.on_hand)
            .bind(balance.committed),
        )
        .map(|_| ())
    }

    fn article_total(
        &mut self,
        article_id: ArticleId,
    ) -> Result<Option<ArticleTotal>, StoreError> {
        let row = self.fetch_optional(
            "load_article_total",
            sqlx::query("SELECT total_on_hand FROM article_totals WHERE article_id = $1")
                .bind(article_id.get()),
        )?;
        row.map(|row| {
            Ok(ArticleTotal {
                article_id,
                total_on_hand: get(&row, "total_on_hand")?,
            })
        })
        .transpose()
    }

    fn put_article_total(&mut self, total: &ArticleTotal) -> Result<(), StoreError> {
        self.execute(
            "put_article_total",
            sqlx::query(
                r#"
                INSERT INTO article_totals (article_id, total_on_hand)
                VALUES ($1, $2)
                ON CONFLICT (article_id) DO UPDATE SET total_on_hand = EXCLUDED.total_on_hand
                "#,
            )
            .bind(total.article_id.get())
            .bind(total.total_on_hand),
        )
        .map(|_| ())
    }

    fn commit(mut self) -> Result<(), StoreError> {
        let tx = self
            .tx
            .take()
            .ok_or_else(|| StoreError::Backend("transaction already finished".to_string()))?;
        self.runtime
            .block_on(tx.commit())
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }
}

fn get<'r, T>(row: &'r PgRow, column: &str) -> Result<T, StoreError>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get(column)
        .map_err(|e| StoreError::Corrupt(format!("failed to read {column}: {e}")))
}

fn to_u64(value: i64) -> Result<u64, StoreError> {
    u64::try_from(value).map_err(|_| StoreError::Corrupt(format!("negative counter {value}")))
}

fn document_from_row(row: &PgRow) -> Result<Document, StoreError> {
    let id = DocumentId::new(get(row, "id")?);
    let type_code: String = get(row, "document_type")?;
    let document_type = type_code
        .parse::<DocumentType>()
        .map_err(|e| StoreError::Corrupt(format!("document {id}: {e}")))?;
    let status_code: String = get(row, "status")?;
    let status = DocumentStatus::from_code(&status_code)
        .ok_or_else(|| StoreError::Corrupt(format!("document {id}: unknown status {status_code}")))?;

    Ok(Document {
        id,
        document_type,
        number: get(row, "number")?,
        date: get::<NaiveDate>(row, "document_date")?,
        warehouse_id: get::<Option<i64>>(row, "warehouse_id")?.map(WarehouseId::new),
        original_document_id: get::<Option<i64>>(row, "original_document_id")?
            .map(DocumentId::new),
        status,
        version: to_u64(get(row, "version")?)?,
        created_by: get::<Option<i64>>(row, "created_by")?.map(UserId::new),
        updated_by: get::<Option<i64>>(row, "updated_by")?.map(UserId::new),
        lines: Vec::new(),
    })
}

fn line_from_row(row: &PgRow) -> Result<DocumentLine, StoreError> {
    let line_number: i64 = get(row, "line_number")?;
    Ok(DocumentLine {
        id: LineId::new(get(row, "id")?),
        line_number: u32::try_from(line_number)
            .map_err(|_| StoreError::Corrupt(format!("line number {line_number} out of range")))?,
        article_id: get::<Option<i64>>(row, "article_id")?.map(ArticleId::new),
        quantity: get::<Decimal>(row, "quantity")?,
        descriptive_only: get(row, "descriptive_only")?,
        description: get(row, "description")?,
    })
}

fn movement_from_row(row: &PgRow) -> Result<StockMovement, StoreError> {
    let id = MovementId::from_uuid(get::<Uuid>(row, "id")?);
    let type_code: String = get(row, "movement_type")?;
    let movement_type = MovementType::from_code(&type_code)
        .ok_or_else(|| StoreError::Corrupt(format!("movement {id}: unknown type {type_code}")))?;

    Ok(StockMovement {
        id,
        article_id: ArticleId::new(get(row, "article_id")?),
        warehouse_id: WarehouseId::new(get(row, "warehouse_id")?),
        destination_warehouse_id: get::<Option<i64>>(row, "destination_warehouse_id")?
            .map(WarehouseId::new),
        movement_type,
        quantity: get(row, "quantity")?,
        movement_date: get(row, "movement_date")?,
        source_document_id: get::<Option<i64>>(row, "source_document_id")?.map(DocumentId::new),
        source_document_line_id: get::<Option<i64>>(row, "source_document_line_id")?
            .map(LineId::new),
        created_by: get::<Option<i64>>(row, "created_by")?.map(UserId::new),
        created_at: get(row, "created_at")?,
        retracted_at: get(row, "retracted_at")?,
    })
}

fn reservation_from_row(row: &PgRow) -> Result<StockReservation, StoreError> {
    Ok(StockReservation {
        id: MovementId::from_uuid(get::<Uuid>(row, "id")?),
        article_id: ArticleId::new(get(row, "article_id")?),
        warehouse_id: WarehouseId::new(get(row, "warehouse_id")?),
        quantity: get(row, "quantity")?,
        source_document_id: DocumentId::new(get(row, "source_document_id")?),
        source_document_line_id: LineId::new(get(row, "source_document_line_id")?),
        created_at: get(row, "created_at")?,
        released_at: get(row, "released_at")?,
    })
}

fn balance_from_row(row: &PgRow) -> Result<StockBalance, StoreError> {
    Ok(StockBalance {
        article_id: ArticleId::new(get(row, "article_id")?),
        warehouse_id: WarehouseId::new(get(row, "warehouse_id")?),
        on_hand: get(row, "on_hand")?,
        committed: get(row, "committed")?,
    })
}

/// Escape `LIKE` metacharacters so a prefix matches literally.
fn escape_like(prefix: &str) -> String {
    let mut out = String::with_capacity(prefix.len());
    for c in prefix.chars() {
        if matches!(c, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn classify_code(code: &str) -> Option<fn(String) -> StoreError> {
    match code {
        "23505" => Some(StoreError::UniqueViolation),
        // serialization_failure, deadlock_detected, lock_not_available
        "40001" | "40P01" | "55P03" => Some(StoreError::Conflict),
        _ => None,
    }
}

/// Map SQLx errors to StoreError.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref().and_then(classify_code) {
                Some(variant) => variant(msg),
                None => StoreError::Backend(msg),
            }
        }
        sqlx::Error::RowNotFound => {
            StoreError::NotFound(format!("unexpected row not found in {operation}"))
        }
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::ColumnNotFound(_) | sqlx::Error::Decode(_) => {
            StoreError::Corrupt(format!("failed to decode row in {operation}: {err}"))
        }
        sqlx::Error::PoolClosed => {
            StoreError::Backend(format!("connection pool closed in {operation}"))
        }
        _ => StoreError::Backend(format!("sqlx error in {operation}: {err}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn like_metacharacters_are_escaped() {
        assert_eq!(escape_like("FAT2025"), "FAT2025");
        assert_eq!(escape_like("A_B%C\\"), "A\\_B\\%C\\\\");
    }

    #[test]
    fn sqlstate_codes_map_to_store_errors() {
        let variant = |code| classify_code(code).map(|f| f("x".to_string()));
        assert!(matches!(variant("23505"), Some(StoreError::UniqueViolation(_))));
        assert!(matches!(variant("40001"), Some(StoreError::Conflict(_))));
        assert!(matches!(variant("40P01"), Some(StoreError::Conflict(_))));
        assert!(matches!(variant("55P03"), Some(StoreError::Conflict(_))));
        assert!(variant("23503").is_none());
    }

    #[test]
    fn row_not_found_maps_to_not_found() {
        assert!(matches!(
            map_sqlx_error("load", sqlx::Error::RowNotFound),
            StoreError::NotFound(_)
        ));
        assert!(matches!(
            map_sqlx_error("load", sqlx::Error::PoolClosed),
            StoreError::Backend(_)
        ));
    }
}
