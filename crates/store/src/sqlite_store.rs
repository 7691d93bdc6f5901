use async_trait::async_trait;
use escrow_automation_types::{
    DisputeStatus, Escrow, EscrowStatus, Event, EventKind, ExternalTransaction, Lease, NewEvent,
    Payment, PaymentId, PaymentStatus, RailTransactionKind, RailTransactionStatus,
};
use rust_decimal::Decimal;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

use crate::store::{EventLedger, PaymentStore, ScanCursor, StoreError};

const MIGRATIONS: [(&str, &str); 4] = [
    (
        "001_create_payments",
        include_str!("../migrations/001_create_payments.sql"),
    ),
    (
        "002_create_escrows",
        include_str!("../migrations/002_create_escrows.sql"),
    ),
    (
        "003_create_payment_events",
        include_str!("../migrations/003_create_payment_events.sql"),
    ),
    (
        "004_create_external_transactions",
        include_str!("../migrations/004_create_external_transactions.sql"),
    ),
];

// ═══════════════════════════════════════════════════════════════════════════
// SQLITE STORE IMPLEMENTATION
// ═══════════════════════════════════════════════════════════════════════════

/// SQLite-backed store shared by every orchestrator instance pointed at the same file
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `url`, e.g. `sqlite://escrow.db`
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| StoreError::ConnectionError(e.to_string()))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .connect_with(options)
            .await
            .map_err(|e| StoreError::ConnectionError(e.to_string()))?;

        let store = Self { pool };
        store.run_migrations().await?;

        Ok(store)
    }

    /// Open the database file at `db_path`
    pub async fn new<P: AsRef<Path>>(db_path: P) -> Result<Self, StoreError> {
        Self::connect(&format!("sqlite://{}", db_path.as_ref().display())).await
    }

    /// Create an in-memory SQLite database (for testing)
    pub async fn in_memory() -> Result<Self, StoreError> {
        // Every connection to :memory: is its own database, so keep exactly one
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| StoreError::ConnectionError(e.to_string()))?;

        let store = Self { pool };
        store.run_migrations().await?;

        Ok(store)
    }

    /// Run database migrations
    async fn run_migrations(&self) -> Result<(), StoreError> {
        for (name, sql) in MIGRATIONS {
            for statement in sql.split(';').map(str::trim).filter(|s| !s.is_empty()) {
                sqlx::query(statement)
                    .execute(&self.pool)
                    .await
                    .map_err(|e| StoreError::DatabaseError(format!("{name}: {e}")))?;
            }
            debug!(migration = name, "migration applied");
        }
        Ok(())
    }

    fn row_to_payment(row: &SqliteRow) -> Result<Payment, StoreError> {
        let lease_owner: Option<String> = get(row, "lease_owner")?;
        let lease_expires_at: Option<i64> = get(row, "lease_expires_at")?;
        let lease = match (lease_owner, lease_expires_at) {
            (Some(owner), Some(expires_at)) => Some(Lease {
                owner,
                expires_at: expires_at as u64,
            }),
            _ => None,
        };

        Ok(Payment {
            id: PaymentId(get::<i64>(row, "id")? as u64),
            amount: decimal(row, "amount")?,
            status: parse(row, "status")?,
            deposit_account: get(row, "deposit_account")?,
            payout_account: get(row, "payout_account")?,
            external_reference: get(row, "external_reference")?,
            custody_percent: decimal(row, "custody_percent")?,
            custody_period_secs: get(row, "custody_period_secs")?,
            lease,
            created_at: get::<i64>(row, "created_at")? as u64,
            updated_at: get::<i64>(row, "updated_at")? as u64,
        })
    }

    fn row_to_escrow(row: &SqliteRow) -> Result<Escrow, StoreError> {
        Ok(Escrow {
            id: get(row, "id")?,
            payment_id: PaymentId(get::<i64>(row, "payment_id")? as u64),
            status: parse::<EscrowStatus>(row, "status")?,
            custody_amount: decimal(row, "custody_amount")?,
            custody_percent: decimal(row, "custody_percent")?,
            release_amount: decimal(row, "release_amount")?,
            custody_period_secs: get(row, "custody_period_secs")?,
            custody_end: get::<Option<i64>>(row, "custody_end")?.map(|v| v as u64),
            onchain_escrow_id: get(row, "onchain_escrow_id")?,
            blockchain_tx_hash: get(row, "blockchain_tx_hash")?,
            release_tx_hash: get(row, "release_tx_hash")?,
            dispute_status: parse::<DisputeStatus>(row, "dispute_status")?,
            created_at: get::<i64>(row, "created_at")? as u64,
            updated_at: get::<i64>(row, "updated_at")? as u64,
        })
    }

    fn row_to_event(row: &SqliteRow) -> Result<Event, StoreError> {
        Ok(Event {
            sequence: get::<i64>(row, "sequence")? as u64,
            payment_id: PaymentId(get::<i64>(row, "payment_id")? as u64),
            kind: parse::<EventKind>(row, "kind")?,
            description: get(row, "description")?,
            reference: get(row, "reference")?,
            created_at: get::<i64>(row, "created_at")? as u64,
        })
    }

    fn row_to_transaction(row: &SqliteRow) -> Result<ExternalTransaction, StoreError> {
        Ok(ExternalTransaction {
            external_ref: get(row, "external_ref")?,
            kind: parse::<RailTransactionKind>(row, "kind")?,
            payment_id: get::<Option<i64>>(row, "payment_id")?.map(|v| PaymentId(v as u64)),
            amount: decimal(row, "amount")?,
            status: parse::<RailTransactionStatus>(row, "status")?,
            tx_hash: get(row, "tx_hash")?,
            created_at: get::<i64>(row, "created_at")? as u64,
            updated_at: get::<i64>(row, "updated_at")? as u64,
        })
    }
}

fn get<'r, T>(row: &'r SqliteRow, column: &str) -> Result<T, StoreError>
where
    T: sqlx::Decode<'r, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite>,
{
    row.try_get(column)
        .map_err(|e| StoreError::SerializationError(format!("{column}: {e}")))
}

fn decimal(row: &SqliteRow, column: &str) -> Result<Decimal, StoreError> {
    let raw: String = get(row, column)?;
    Decimal::from_str(&raw).map_err(|e| StoreError::SerializationError(format!("{column}: {e}")))
}

fn parse<T>(row: &SqliteRow, column: &str) -> Result<T, StoreError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw: String = get(row, column)?;
    raw.parse::<T>()
        .map_err(|e| StoreError::SerializationError(format!("{column}: {e}")))
}

fn db_error(e: sqlx::Error) -> StoreError {
    StoreError::DatabaseError(e.to_string())
}

#[async_trait]
impl PaymentStore for SqliteStore {
    async fn insert_payment(&self, payment: &Payment) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO payments (
                id, amount, status, deposit_account, payout_account, external_reference,
                custody_percent, custody_period_secs, lease_owner, lease_expires_at,
                created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(payment.id.value() as i64)
        .bind(payment.amount.to_string())
        .bind(payment.status.as_str())
        .bind(&payment.deposit_account)
        .bind(&payment.payout_account)
        .bind(&payment.external_reference)
        .bind(payment.custody_percent.to_string())
        .bind(payment.custody_period_secs)
        .bind(payment.lease.as_ref().map(|l| l.owner.clone()))
        .bind(payment.lease.as_ref().map(|l| l.expires_at as i64))
        .bind(payment.created_at as i64)
        .bind(payment.updated_at as i64)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                Err(StoreError::DuplicateId(payment.id.to_string()))
            }
            Err(e) => Err(db_error(e)),
        }
    }

    async fn get_payment(&self, id: PaymentId) -> Result<Option<Payment>, StoreError> {
        let row = sqlx::query("SELECT * FROM payments WHERE id = ?")
            .bind(id.value() as i64)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;

        row.as_ref().map(Self::row_to_payment).transpose()
    }

    async fn update_payment(&self, payment: &Payment) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE payments
            SET amount = ?, deposit_account = ?, payout_account = ?, external_reference = ?,
                custody_percent = ?, custody_period_secs = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(payment.amount.to_string())
        .bind(&payment.deposit_account)
        .bind(&payment.payout_account)
        .bind(&payment.external_reference)
        .bind(payment.custody_percent.to_string())
        .bind(payment.custody_period_secs)
        .bind(payment.updated_at as i64)
        .bind(payment.id.value() as i64)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(payment.id.to_string()));
        }
        Ok(())
    }

    async fn compare_and_set_status(
        &self,
        id: PaymentId,
        expected: PaymentStatus,
        next: PaymentStatus,
        now: u64,
    ) -> Result<bool, StoreError> {
        let result =
            sqlx::query("UPDATE payments SET status = ?, updated_at = ? WHERE id = ? AND status = ?")
                .bind(next.as_str())
                .bind(now as i64)
                .bind(id.value() as i64)
                .bind(expected.as_str())
                .execute(&self.pool)
                .await
                .map_err(db_error)?;

        if result.rows_affected() == 1 {
            return Ok(true);
        }
        if self.get_payment(id).await?.is_none() {
            return Err(StoreError::NotFound(id.to_string()));
        }
        Ok(false)
    }

    async fn list_by_status_after(
        &self,
        status: PaymentStatus,
        after: Option<ScanCursor>,
        limit: usize,
    ) -> Result<Vec<Payment>, StoreError> {
        let query = match after {
            None => sqlx::query(
                "SELECT * FROM payments WHERE status = ? ORDER BY created_at, id LIMIT ?",
            )
            .bind(status.as_str())
            .bind(limit as i64),
            Some(cursor) => sqlx::query(
                r#"
                SELECT * FROM payments
                WHERE status = ? AND (created_at > ? OR (created_at = ? AND id > ?))
                ORDER BY created_at, id
                LIMIT ?
                "#,
            )
            .bind(status.as_str())
            .bind(cursor.created_at as i64)
            .bind(cursor.created_at as i64)
            .bind(cursor.id.0 as i64)
            .bind(limit as i64),
        };
        let rows = query.fetch_all(&self.pool).await.map_err(db_error)?;

        rows.iter().map(Self::row_to_payment).collect()
    }

    async fn insert_escrow(&self, escrow: &Escrow) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO escrows (
                id, payment_id, status, custody_amount, custody_percent, release_amount,
                custody_period_secs, custody_end, onchain_escrow_id, blockchain_tx_hash,
                release_tx_hash, dispute_status, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&escrow.id)
        .bind(escrow.payment_id.value() as i64)
        .bind(escrow.status.as_str())
        .bind(escrow.custody_amount.to_string())
        .bind(escrow.custody_percent.to_string())
        .bind(escrow.release_amount.to_string())
        .bind(escrow.custody_period_secs)
        .bind(escrow.custody_end.map(|v| v as i64))
        .bind(&escrow.onchain_escrow_id)
        .bind(&escrow.blockchain_tx_hash)
        .bind(&escrow.release_tx_hash)
        .bind(escrow.dispute_status.as_str())
        .bind(escrow.created_at as i64)
        .bind(escrow.updated_at as i64)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                Err(StoreError::DuplicateId(escrow.id.clone()))
            }
            Err(e) => Err(db_error(e)),
        }
    }

    async fn get_escrow(&self, payment_id: PaymentId) -> Result<Option<Escrow>, StoreError> {
        let row = sqlx::query("SELECT * FROM escrows WHERE payment_id = ?")
            .bind(payment_id.value() as i64)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;

        row.as_ref().map(Self::row_to_escrow).transpose()
    }

    async fn update_escrow(&self, escrow: &Escrow) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE escrows
            SET status = ?, custody_amount = ?, custody_percent = ?, release_amount = ?,
                custody_period_secs = ?, custody_end = ?, onchain_escrow_id = ?,
                blockchain_tx_hash = ?, release_tx_hash = ?, dispute_status = ?, updated_at = ?
            WHERE id = ? AND payment_id = ?
            "#,
        )
        .bind(escrow.status.as_str())
        .bind(escrow.custody_amount.to_string())
        .bind(escrow.custody_percent.to_string())
        .bind(escrow.release_amount.to_string())
        .bind(escrow.custody_period_secs)
        .bind(escrow.custody_end.map(|v| v as i64))
        .bind(&escrow.onchain_escrow_id)
        .bind(&escrow.blockchain_tx_hash)
        .bind(&escrow.release_tx_hash)
        .bind(escrow.dispute_status.as_str())
        .bind(escrow.updated_at as i64)
        .bind(&escrow.id)
        .bind(escrow.payment_id.value() as i64)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(escrow.id.clone()));
        }
        Ok(())
    }

    async fn try_claim(
        &self,
        id: PaymentId,
        owner: &str,
        now: u64,
        ttl_secs: u64,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE payments
            SET lease_owner = ?, lease_expires_at = ?
            WHERE id = ?
              AND (lease_owner IS NULL OR lease_owner = ? OR lease_expires_at <= ?)
            "#,
        )
        .bind(owner)
        .bind(now.saturating_add(ttl_secs) as i64)
        .bind(id.value() as i64)
        .bind(owner)
        .bind(now as i64)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        if result.rows_affected() == 1 {
            return Ok(true);
        }
        if self.get_payment(id).await?.is_none() {
            return Err(StoreError::NotFound(id.to_string()));
        }
        Ok(false)
    }

    async fn release_claim(&self, id: PaymentId, owner: &str) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE payments SET lease_owner = NULL, lease_expires_at = NULL WHERE id = ? AND lease_owner = ?",
        )
        .bind(id.value() as i64)
        .bind(owner)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    async fn upsert_external_transaction(
        &self,
        transaction: &ExternalTransaction,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO external_transactions (
                external_ref, kind, payment_id, amount, status, tx_hash, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(external_ref) DO UPDATE SET
                kind = excluded.kind,
                payment_id = excluded.payment_id,
                amount = excluded.amount,
                status = excluded.status,
                tx_hash = excluded.tx_hash,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&transaction.external_ref)
        .bind(transaction.kind.as_str())
        .bind(transaction.payment_id.map(|id| id.value() as i64))
        .bind(transaction.amount.to_string())
        .bind(transaction.status.as_str())
        .bind(&transaction.tx_hash)
        .bind(transaction.created_at as i64)
        .bind(transaction.updated_at as i64)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    async fn get_external_transaction(
        &self,
        external_ref: &str,
    ) -> Result<Option<ExternalTransaction>, StoreError> {
        let row = sqlx::query("SELECT * FROM external_transactions WHERE external_ref = ?")
            .bind(external_ref)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;

        row.as_ref().map(Self::row_to_transaction).transpose()
    }
}

#[async_trait]
impl EventLedger for SqliteStore {
    async fn append(&self, event: NewEvent) -> Result<Event, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO payment_events (payment_id, kind, description, reference, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(event.payment_id.value() as i64)
        .bind(event.kind.as_str())
        .bind(&event.description)
        .bind(&event.reference)
        .bind(event.created_at as i64)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(event.into_event(result.last_insert_rowid() as u64))
    }

    async fn events_for(&self, payment_id: PaymentId) -> Result<Vec<Event>, StoreError> {
        let rows = sqlx::query("SELECT * FROM payment_events WHERE payment_id = ? ORDER BY sequence")
            .bind(payment_id.value() as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;

        rows.iter().map(Self::row_to_event).collect()
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_payment(id: u64) -> Payment {
        let mut payment = Payment::new(
            PaymentId(id),
            Decimal::from_str("1250.50").unwrap(),
            "646180157000000004",
            Decimal::from(40),
            100 + id,
        )
        .unwrap()
        .with_custody_period(7_200);
        payment.deposit_account = Some(format!("6461801570000{id:05}"));
        payment
    }

    #[tokio::test]
    async fn test_sqlite_payment_round_trip() {
        let store = SqliteStore::in_memory().await.unwrap();
        let payment = create_test_payment(1);

        store.insert_payment(&payment).await.unwrap();

        let retrieved = store.get_payment(PaymentId(1)).await.unwrap();
        assert_eq!(retrieved, Some(payment));
        assert!(store.get_payment(PaymentId(2)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_sqlite_duplicate_payment_error() {
        let store = SqliteStore::in_memory().await.unwrap();
        let payment = create_test_payment(1);

        store.insert_payment(&payment).await.unwrap();
        let result = store.insert_payment(&payment).await;

        assert!(matches!(result, Err(StoreError::DuplicateId(_))));
    }

    #[tokio::test]
    async fn test_sqlite_compare_and_set_status() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.insert_payment(&create_test_payment(1)).await.unwrap();

        assert!(store
            .compare_and_set_status(PaymentId(1), PaymentStatus::Pending, PaymentStatus::Funded, 300)
            .await
            .unwrap());
        assert!(!store
            .compare_and_set_status(PaymentId(1), PaymentStatus::Pending, PaymentStatus::Funded, 301)
            .await
            .unwrap());

        let missing = store
            .compare_and_set_status(PaymentId(9), PaymentStatus::Pending, PaymentStatus::Funded, 301)
            .await;
        assert!(matches!(missing, Err(StoreError::NotFound(_))));

        let funded = store
            .list_by_status(PaymentStatus::Funded, 10)
            .await
            .unwrap();
        assert_eq!(funded.len(), 1);
        assert_eq!(funded[0].updated_at, 300);
    }

    #[tokio::test]
    async fn test_sqlite_status_scan_pages() {
        let store = SqliteStore::in_memory().await.unwrap();
        for id in 1..=5 {
            store.insert_payment(&create_test_payment(id)).await.unwrap();
        }

        let mut seen = Vec::new();
        let mut after = None;
        loop {
            let page = store
                .list_by_status_after(PaymentStatus::Pending, after, 2)
                .await
                .unwrap();
            if page.is_empty() {
                break;
            }
            after = page.last().map(ScanCursor::after);
            seen.extend(page.into_iter().map(|p| p.id.0));
        }
        assert_eq!(seen, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn test_sqlite_lease() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.insert_payment(&create_test_payment(1)).await.unwrap();

        assert!(store.try_claim(PaymentId(1), "worker-a", 1000, 300).await.unwrap());
        assert!(!store.try_claim(PaymentId(1), "worker-b", 1299, 300).await.unwrap());
        assert!(store.try_claim(PaymentId(1), "worker-b", 1300, 300).await.unwrap());

        let payment = store.get_payment(PaymentId(1)).await.unwrap().unwrap();
        assert_eq!(
            payment.lease,
            Some(Lease {
                owner: "worker-b".to_string(),
                expires_at: 1600,
            })
        );

        store.release_claim(PaymentId(1), "worker-b").await.unwrap();
        let payment = store.get_payment(PaymentId(1)).await.unwrap().unwrap();
        assert!(payment.lease.is_none());
    }

    #[tokio::test]
    async fn test_sqlite_escrow_round_trip() {
        let store = SqliteStore::in_memory().await.unwrap();
        let payment = create_test_payment(1);
        store.insert_payment(&payment).await.unwrap();

        let mut escrow = Escrow::pending_for(&payment, 7_200, 200);
        store.insert_escrow(&escrow).await.unwrap();

        escrow.status = EscrowStatus::Active;
        escrow.custody_end = Some(7_400);
        escrow.onchain_escrow_id = Some("42".to_string());
        escrow.blockchain_tx_hash = Some("0xabc".to_string());
        escrow.updated_at = 210;
        store.update_escrow(&escrow).await.unwrap();

        let stored = store.get_escrow(PaymentId(1)).await.unwrap().unwrap();
        assert_eq!(stored, escrow);
        assert_eq!(stored.custody_amount, Decimal::from_str("500.20").unwrap());

        let mut duplicate = escrow.clone();
        duplicate.id = "esc-duplicate".to_string();
        let result = store.insert_escrow(&duplicate).await;
        assert!(matches!(result, Err(StoreError::DuplicateId(_))));
    }

    #[tokio::test]
    async fn test_sqlite_ledger() {
        let store = SqliteStore::in_memory().await.unwrap();

        let first = store
            .append(
                NewEvent::new(PaymentId(1), EventKind::BridgeWithdrawalInitiated, "withdrawal", 10)
                    .with_reference("wd-1"),
            )
            .await
            .unwrap();
        let second = store
            .append(NewEvent::new(PaymentId(1), EventKind::BridgeWithdrawalConfirmed, "confirmed", 10))
            .await
            .unwrap();

        assert!(second.sequence > first.sequence);

        let events = store.events_for(PaymentId(1)).await.unwrap();
        assert_eq!(events, vec![first, second]);
    }

    #[tokio::test]
    async fn test_sqlite_external_transaction_upsert() {
        let store = SqliteStore::in_memory().await.unwrap();
        let mut tx = ExternalTransaction::new(
            "dep-7",
            RailTransactionKind::Deposit,
            None,
            Decimal::from(1000),
            RailTransactionStatus::Pending,
            50,
        );
        store.upsert_external_transaction(&tx).await.unwrap();

        tx.payment_id = Some(PaymentId(7));
        tx.status = RailTransactionStatus::Completed;
        tx.updated_at = 60;
        store.upsert_external_transaction(&tx).await.unwrap();

        let stored = store.get_external_transaction("dep-7").await.unwrap().unwrap();
        assert_eq!(stored, tx);
    }
}
