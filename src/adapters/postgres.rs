//! PostgreSQL-backed [`NoticeStore`].
//!
//! The schema is created on boot with `IF NOT EXISTS`, so `init_schema` is
//! safe to run on every start.

use crate::domain::model::{
    ChainConfirmation, NoticePayload, NoticeStatus, NoticeView, ProcessServer, ServedNotice,
    StagedNotice, SyncCursor, TransactionRecord, TxStatus,
};
use crate::domain::ports::{NoticeStore, ProcessServerUpsert, UNASSIGNED_AGENCY};
use crate::utils::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use std::time::Duration;

const CURSOR_NAME: &str = "notice_contract";

const SCHEMA: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS process_servers (
        wallet_address TEXT PRIMARY KEY,
        agency TEXT NOT NULL,
        display_name TEXT,
        active BOOLEAN NOT NULL DEFAULT TRUE,
        registered_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )"#,
    r#"CREATE TABLE IF NOT EXISTS staged_notices (
        id BIGSERIAL PRIMARY KEY,
        server_address TEXT NOT NULL,
        recipient_address TEXT NOT NULL,
        case_number TEXT NOT NULL,
        agency TEXT NOT NULL,
        notice_type TEXT NOT NULL,
        public_text TEXT NOT NULL,
        ipfs_hash TEXT,
        jurisdiction TEXT,
        batch_id TEXT,
        status TEXT NOT NULL DEFAULT 'pending',
        transaction_hash TEXT,
        alert_id TEXT,
        document_id TEXT,
        block_number BIGINT,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        confirmed_at TIMESTAMPTZ
    )"#,
    r#"CREATE INDEX IF NOT EXISTS idx_staged_pending_pair
        ON staged_notices (server_address, recipient_address)
        WHERE status = 'pending'"#,
    r#"CREATE UNIQUE INDEX IF NOT EXISTS idx_staged_tx
        ON staged_notices (transaction_hash)
        WHERE transaction_hash IS NOT NULL"#,
    r#"CREATE TABLE IF NOT EXISTS served_notices (
        alert_id TEXT PRIMARY KEY,
        document_id TEXT,
        server_address TEXT NOT NULL,
        recipient_address TEXT NOT NULL,
        staged_id BIGINT,
        case_number TEXT,
        transaction_hash TEXT NOT NULL,
        block_number BIGINT,
        acknowledged BOOLEAN NOT NULL DEFAULT FALSE,
        served_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )"#,
    r#"CREATE INDEX IF NOT EXISTS idx_served_at ON served_notices (served_at DESC)"#,
    r#"CREATE TABLE IF NOT EXISTS notice_views (
        id BIGSERIAL PRIMARY KEY,
        alert_id TEXT NOT NULL,
        viewer_address TEXT NOT NULL,
        acknowledged BOOLEAN NOT NULL DEFAULT FALSE,
        transaction_hash TEXT,
        viewed_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        UNIQUE (alert_id, viewer_address, transaction_hash)
    )"#,
    r#"CREATE TABLE IF NOT EXISTS transaction_hashes (
        tx_hash TEXT PRIMARY KEY,
        staged_id BIGINT,
        kind TEXT NOT NULL,
        status TEXT NOT NULL,
        block_number BIGINT,
        recorded_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )"#,
    r#"CREATE TABLE IF NOT EXISTS sync_cursor (
        name TEXT PRIMARY KEY,
        block_number BIGINT NOT NULL,
        block_timestamp_ms BIGINT NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )"#,
];

const STAGED_COLUMNS: &str = "id, server_address, recipient_address, case_number, agency, \
    notice_type, public_text, ipfs_hash, jurisdiction, batch_id, status, transaction_hash, \
    alert_id, document_id, block_number, created_at, confirmed_at";

const SERVED_COLUMNS: &str = "alert_id, document_id, server_address, recipient_address, \
    staged_id, case_number, transaction_hash, block_number, acknowledged, served_at";

#[derive(Clone)]
pub struct PgNoticeStore {
    pool: PgPool,
}

impl PgNoticeStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect(database_url)
            .await?;
        tracing::debug!("Connected to PostgreSQL (max {} connections)", max_connections);
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn decode_error(message: String) -> sqlx::Error {
    sqlx::Error::Decode(message.into())
}

fn server_from_row(row: &PgRow) -> std::result::Result<ProcessServer, sqlx::Error> {
    Ok(ProcessServer {
        wallet_address: row.try_get("wallet_address")?,
        agency: row.try_get("agency")?,
        display_name: row.try_get("display_name")?,
        active: row.try_get("active")?,
        registered_at: row.try_get("registered_at")?,
    })
}

fn staged_from_row(row: &PgRow) -> std::result::Result<StagedNotice, sqlx::Error> {
    let status: String = row.try_get("status")?;
    Ok(StagedNotice {
        id: row.try_get("id")?,
        payload: NoticePayload {
            server_address: row.try_get("server_address")?,
            recipient_address: row.try_get("recipient_address")?,
            case_number: row.try_get("case_number")?,
            agency: row.try_get("agency")?,
            notice_type: row.try_get("notice_type")?,
            public_text: row.try_get("public_text")?,
            ipfs_hash: row.try_get("ipfs_hash")?,
            jurisdiction: row.try_get("jurisdiction")?,
            batch_id: row.try_get("batch_id")?,
        },
        status: status.parse().map_err(decode_error)?,
        transaction_hash: row.try_get("transaction_hash")?,
        alert_id: row.try_get("alert_id")?,
        document_id: row.try_get("document_id")?,
        block_number: row.try_get("block_number")?,
        created_at: row.try_get("created_at")?,
        confirmed_at: row.try_get("confirmed_at")?,
    })
}

fn served_from_row(row: &PgRow) -> std::result::Result<ServedNotice, sqlx::Error> {
    Ok(ServedNotice {
        alert_id: row.try_get("alert_id")?,
        document_id: row.try_get("document_id")?,
        server_address: row.try_get("server_address")?,
        recipient_address: row.try_get("recipient_address")?,
        staged_id: row.try_get("staged_id")?,
        case_number: row.try_get("case_number")?,
        transaction_hash: row.try_get("transaction_hash")?,
        block_number: row.try_get("block_number")?,
        acknowledged: row.try_get("acknowledged")?,
        served_at: row.try_get("served_at")?,
    })
}

fn view_from_row(row: &PgRow) -> std::result::Result<NoticeView, sqlx::Error> {
    Ok(NoticeView {
        id: row.try_get("id")?,
        alert_id: row.try_get("alert_id")?,
        viewer_address: row.try_get("viewer_address")?,
        acknowledged: row.try_get("acknowledged")?,
        transaction_hash: row.try_get("transaction_hash")?,
        viewed_at: row.try_get("viewed_at")?,
    })
}

fn transaction_from_row(row: &PgRow) -> std::result::Result<TransactionRecord, sqlx::Error> {
    let status: String = row.try_get("status")?;
    Ok(TransactionRecord {
        tx_hash: row.try_get("tx_hash")?,
        staged_id: row.try_get("staged_id")?,
        kind: row.try_get("kind")?,
        status: status.parse::<TxStatus>().map_err(decode_error)?,
        block_number: row.try_get("block_number")?,
        recorded_at: row.try_get("recorded_at")?,
    })
}

#[async_trait]
impl NoticeStore for PgNoticeStore {
    async fn init_schema(&self) -> Result<()> {
        for statement in SCHEMA.iter().copied() {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        tracing::info!("Database schema ready ({} statements)", SCHEMA.len());
        Ok(())
    }

    async fn upsert_process_server(&self, server: &ProcessServerUpsert) -> Result<ProcessServer> {
        let row = sqlx::query(
            r#"INSERT INTO process_servers (wallet_address, agency, display_name, active)
               VALUES ($1, COALESCE($2, $5), $3, $4)
               ON CONFLICT (wallet_address) DO UPDATE SET
                   agency = COALESCE($2, process_servers.agency),
                   display_name = COALESCE($3, process_servers.display_name),
                   active = EXCLUDED.active
               RETURNING wallet_address, agency, display_name, active, registered_at"#,
        )
        .bind(&server.wallet_address)
        .bind(server.agency.as_deref())
        .bind(server.display_name.as_deref())
        .bind(server.active)
        .bind(UNASSIGNED_AGENCY)
        .fetch_one(&self.pool)
        .await?;
        Ok(server_from_row(&row)?)
    }

    async fn get_process_server(&self, wallet_address: &str) -> Result<Option<ProcessServer>> {
        let row = sqlx::query(
            "SELECT wallet_address, agency, display_name, active, registered_at \
             FROM process_servers WHERE wallet_address = $1",
        )
        .bind(wallet_address)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(server_from_row).transpose()?)
    }

    async fn insert_staged(&self, payload: &NoticePayload) -> Result<StagedNotice> {
        let sql = format!(
            "INSERT INTO staged_notices (server_address, recipient_address, case_number, agency, \
             notice_type, public_text, ipfs_hash, jurisdiction, batch_id, status) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, 'pending') RETURNING {}",
            STAGED_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(&payload.server_address)
            .bind(&payload.recipient_address)
            .bind(&payload.case_number)
            .bind(&payload.agency)
            .bind(&payload.notice_type)
            .bind(&payload.public_text)
            .bind(payload.ipfs_hash.as_deref())
            .bind(payload.jurisdiction.as_deref())
            .bind(payload.batch_id.as_deref())
            .fetch_one(&self.pool)
            .await?;
        Ok(staged_from_row(&row)?)
    }

    async fn get_staged(&self, id: i64) -> Result<Option<StagedNotice>> {
        let sql = format!("SELECT {} FROM staged_notices WHERE id = $1", STAGED_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(staged_from_row).transpose()?)
    }

    async fn find_staged_by_tx(&self, tx_hash: &str) -> Result<Option<StagedNotice>> {
        let sql = format!(
            "SELECT {} FROM staged_notices WHERE transaction_hash = $1",
            STAGED_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(tx_hash)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(staged_from_row).transpose()?)
    }

    async fn find_pending_unsubmitted(
        &self,
        server_address: &str,
        recipient_address: &str,
    ) -> Result<Vec<StagedNotice>> {
        let sql = format!(
            "SELECT {} FROM staged_notices \
             WHERE server_address = $1 AND recipient_address = $2 \
               AND status = 'pending' AND transaction_hash IS NULL \
             ORDER BY created_at",
            STAGED_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(server_address)
            .bind(recipient_address)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .iter()
            .map(staged_from_row)
            .collect::<std::result::Result<_, _>>()?)
    }

    async fn list_pending_with_tx(&self) -> Result<Vec<StagedNotice>> {
        let sql = format!(
            "SELECT {} FROM staged_notices \
             WHERE status = 'pending' AND transaction_hash IS NOT NULL ORDER BY id",
            STAGED_COLUMNS
        );
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        Ok(rows
            .iter()
            .map(staged_from_row)
            .collect::<std::result::Result<_, _>>()?)
    }

    async fn attach_transaction(&self, id: i64, tx_hash: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE staged_notices SET transaction_hash = $2 \
             WHERE id = $1 AND status = 'pending' \
               AND (transaction_hash IS NULL OR transaction_hash = $2) \
               AND NOT EXISTS ( \
                   SELECT 1 FROM staged_notices other \
                   WHERE other.transaction_hash = $2 AND other.id <> $1)",
        )
        .bind(id)
        .bind(tx_hash)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn mark_confirmed(&self, id: i64, confirmation: &ChainConfirmation) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE staged_notices SET \
                 status = 'confirmed', \
                 transaction_hash = $2, \
                 alert_id = COALESCE($3, alert_id), \
                 document_id = COALESCE($4, document_id), \
                 block_number = COALESCE($5, block_number), \
                 confirmed_at = COALESCE(confirmed_at, NOW()) \
             WHERE id = $1 AND ( \
                 (status = 'pending' AND (transaction_hash IS NULL OR transaction_hash = $2)) \
                 OR (status = 'confirmed' AND transaction_hash = $2))",
        )
        .bind(id)
        .bind(&confirmation.transaction_hash)
        .bind(confirmation.alert_id.as_deref())
        .bind(confirmation.document_id.as_deref())
        .bind(confirmation.block_number)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn transition_status(
        &self,
        id: i64,
        from: NoticeStatus,
        to: NoticeStatus,
    ) -> Result<bool> {
        let result =
            sqlx::query("UPDATE staged_notices SET status = $3 WHERE id = $1 AND status = $2")
                .bind(id)
                .bind(from.as_str())
                .bind(to.as_str())
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn expire_stale(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE staged_notices SET status = 'expired' \
             WHERE status = 'pending' AND transaction_hash IS NULL AND created_at < $1",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn upsert_served(&self, served: &ServedNotice) -> Result<bool> {
        let row = sqlx::query(
            r#"INSERT INTO served_notices (alert_id, document_id, server_address,
                   recipient_address, staged_id, case_number, transaction_hash, block_number,
                   acknowledged, served_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
               ON CONFLICT (alert_id) DO UPDATE SET
                   document_id = COALESCE(served_notices.document_id, EXCLUDED.document_id),
                   staged_id = COALESCE(served_notices.staged_id, EXCLUDED.staged_id),
                   case_number = COALESCE(served_notices.case_number, EXCLUDED.case_number),
                   block_number = COALESCE(served_notices.block_number, EXCLUDED.block_number)
               RETURNING (xmax = 0) AS inserted"#,
        )
        .bind(&served.alert_id)
        .bind(served.document_id.as_deref())
        .bind(&served.server_address)
        .bind(&served.recipient_address)
        .bind(served.staged_id)
        .bind(served.case_number.as_deref())
        .bind(&served.transaction_hash)
        .bind(served.block_number)
        .bind(served.acknowledged)
        .bind(served.served_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get::<bool, _>("inserted")?)
    }

    async fn get_served(&self, alert_id: &str) -> Result<Option<ServedNotice>> {
        let sql = format!(
            "SELECT {} FROM served_notices WHERE alert_id = $1",
            SERVED_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(alert_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(served_from_row).transpose()?)
    }

    async fn recent_served(
        &self,
        limit: usize,
        server_address: Option<&str>,
    ) -> Result<Vec<ServedNotice>> {
        let sql = format!(
            "SELECT {} FROM served_notices \
             WHERE ($1::TEXT IS NULL OR server_address = $1) \
             ORDER BY served_at DESC, alert_id DESC LIMIT $2",
            SERVED_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(server_address)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .iter()
            .map(served_from_row)
            .collect::<std::result::Result<_, _>>()?)
    }

    async fn mark_acknowledged(&self, alert_id: &str) -> Result<bool> {
        let result =
            sqlx::query("UPDATE served_notices SET acknowledged = TRUE WHERE alert_id = $1")
                .bind(alert_id)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn record_view(
        &self,
        alert_id: &str,
        viewer_address: &str,
        acknowledged: bool,
        tx_hash: Option<&str>,
    ) -> Result<Option<NoticeView>> {
        let row = sqlx::query(
            "INSERT INTO notice_views (alert_id, viewer_address, acknowledged, transaction_hash) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT (alert_id, viewer_address, transaction_hash) DO NOTHING \
             RETURNING id, alert_id, viewer_address, acknowledged, transaction_hash, viewed_at",
        )
        .bind(alert_id)
        .bind(viewer_address)
        .bind(acknowledged)
        .bind(tx_hash)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(view_from_row).transpose()?)
    }

    async fn upsert_transaction(&self, record: &TransactionRecord) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO transaction_hashes
                   (tx_hash, staged_id, kind, status, block_number, recorded_at)
               VALUES ($1, $2, $3, $4, $5, $6)
               ON CONFLICT (tx_hash) DO UPDATE SET
                   status = EXCLUDED.status,
                   block_number = COALESCE(EXCLUDED.block_number, transaction_hashes.block_number),
                   staged_id = COALESCE(transaction_hashes.staged_id, EXCLUDED.staged_id)"#,
        )
        .bind(&record.tx_hash)
        .bind(record.staged_id)
        .bind(&record.kind)
        .bind(record.status.as_str())
        .bind(record.block_number)
        .bind(record.recorded_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_transaction(&self, tx_hash: &str) -> Result<Option<TransactionRecord>> {
        let row = sqlx::query(
            "SELECT tx_hash, staged_id, kind, status, block_number, recorded_at \
             FROM transaction_hashes WHERE tx_hash = $1",
        )
        .bind(tx_hash)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(transaction_from_row).transpose()?)
    }

    async fn load_cursor(&self) -> Result<Option<SyncCursor>> {
        let row = sqlx::query(
            "SELECT block_number, block_timestamp_ms FROM sync_cursor WHERE name = $1",
        )
        .bind(CURSOR_NAME)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let block_number: i64 = row.try_get("block_number")?;
                Ok(Some(SyncCursor {
                    block_number: block_number.max(0) as u64,
                    block_timestamp_ms: row.try_get("block_timestamp_ms")?,
                }))
            }
            None => Ok(None),
        }
    }

    async fn save_cursor(&self, cursor: &SyncCursor) -> Result<()> {
        sqlx::query(
            "INSERT INTO sync_cursor (name, block_number, block_timestamp_ms, updated_at) \
             VALUES ($1, $2, $3, NOW()) \
             ON CONFLICT (name) DO UPDATE SET \
                 block_number = EXCLUDED.block_number, \
                 block_timestamp_ms = EXCLUDED.block_timestamp_ms, \
                 updated_at = NOW()",
        )
        .bind(CURSOR_NAME)
        .bind(cursor.block_number as i64)
        .bind(cursor.block_timestamp_ms)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
