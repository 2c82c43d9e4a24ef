use super::{BucketStore, SqliteStore, TotalDecision};
use crate::{
    derived::DerivedFields,
    error::{VolumeError, VolumeResult},
    period::{PeriodKey, PeriodScope},
    record::{BucketRecord, RawMetrics},
    types::{RecordId, SizeBucket},
};
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};

const COLUMNS: &str = "id, period_type, period_year, period_date, size,
     abp, master_plan, actual_received, w_requirements, advance_prod, safekeep,
     excess, comp_to_master_plan";

fn map_row(row: &Row<'_>) -> rusqlite::Result<BucketRecord> {
    Ok(BucketRecord {
        id: Some(row.get(0)?),
        key: PeriodKey {
            period_type: row.get(1)?,
            period_year: row.get(2)?,
            period_date: row.get(3)?,
        },
        size: row.get(4)?,
        metrics: RawMetrics {
            abp:             row.get(5)?,
            master_plan:     row.get(6)?,
            actual_received: row.get(7)?,
            w_requirements:  row.get(8)?,
            advance_prod:    row.get(9)?,
            safekeep:        row.get(10)?,
        },
        derived: DerivedFields {
            excess:              row.get(11)?,
            comp_to_master_plan: row.get(12)?,
        },
    })
}

fn query_records(
    conn: &Connection,
    sql: &str,
    args: impl rusqlite::Params,
) -> VolumeResult<Vec<BucketRecord>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(args, map_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

// Statements shared by the plain trait methods and `write_total`, which
// runs them on its transaction.

fn select_siblings(conn: &Connection, key: &PeriodKey) -> VolumeResult<Vec<BucketRecord>> {
    query_records(
        conn,
        &format!(
            "SELECT {COLUMNS} FROM bucket_record
             WHERE period_type = ?1 AND period_year = ?2 AND period_date = ?3
               AND size <> ?4
             ORDER BY id ASC"
        ),
        params![
            key.period_type,
            key.period_year,
            key.period_date,
            SizeBucket::TotalVolume,
        ],
    )
}

fn select_total(conn: &Connection, key: &PeriodKey) -> VolumeResult<Option<BucketRecord>> {
    let record = conn
        .query_row(
            &format!(
                "SELECT {COLUMNS} FROM bucket_record
                 WHERE period_type = ?1 AND period_year = ?2 AND period_date = ?3
                   AND size = ?4"
            ),
            params![
                key.period_type,
                key.period_year,
                key.period_date,
                SizeBucket::TotalVolume,
            ],
            map_row,
        )
        .optional()?;
    Ok(record)
}

fn upsert_record(conn: &Connection, record: &BucketRecord) -> VolumeResult<BucketRecord> {
    let id: RecordId = conn.query_row(
        "INSERT INTO bucket_record (
            period_type, period_year, period_date, size,
            abp, master_plan, actual_received, w_requirements, advance_prod, safekeep,
            excess, comp_to_master_plan
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
        ON CONFLICT(period_type, period_year, period_date, size) DO UPDATE SET
            abp                 = excluded.abp,
            master_plan         = excluded.master_plan,
            actual_received     = excluded.actual_received,
            w_requirements      = excluded.w_requirements,
            advance_prod        = excluded.advance_prod,
            safekeep            = excluded.safekeep,
            excess              = excluded.excess,
            comp_to_master_plan = excluded.comp_to_master_plan
        RETURNING id",
        params![
            record.key.period_type,
            record.key.period_year,
            record.key.period_date,
            record.size,
            record.metrics.abp,
            record.metrics.master_plan,
            record.metrics.actual_received,
            record.metrics.w_requirements,
            record.metrics.advance_prod,
            record.metrics.safekeep,
            record.derived.excess,
            record.derived.comp_to_master_plan,
        ],
        |row| row.get(0),
    )?;
    Ok(BucketRecord {
        id: Some(id),
        ..record.clone()
    })
}

impl BucketStore for SqliteStore {
    // ── Reads by period key ────────────────────────────────────

    fn read_siblings(&self, key: &PeriodKey) -> VolumeResult<Vec<BucketRecord>> {
        select_siblings(&self.conn(), key)
    }

    fn read_total(&self, key: &PeriodKey) -> VolumeResult<Option<BucketRecord>> {
        select_total(&self.conn(), key)
    }

    // ── Writes ─────────────────────────────────────────────────

    fn upsert(&self, record: &BucketRecord) -> VolumeResult<BucketRecord> {
        upsert_record(&self.conn(), record)
    }

    fn write_total<T, F>(&self, key: &PeriodKey, decide: F) -> VolumeResult<TotalDecision<T>>
    where
        F: FnOnce(&[BucketRecord], Option<&BucketRecord>) -> TotalDecision<T>,
    {
        let mut conn = self.conn();
        // IMMEDIATE takes the write lock up front; other connections queue
        // on the busy timeout instead of writing between our read and upsert.
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let siblings = select_siblings(&tx, key)?;
        let existing = select_total(&tx, key)?;
        let decision = match decide(&siblings, existing.as_ref()) {
            TotalDecision::Write(record) => TotalDecision::Write(upsert_record(&tx, &record)?),
            keep @ TotalDecision::Keep(_) => keep,
        };
        tx.commit()?;
        Ok(decision)
    }

    fn insert(&self, record: &BucketRecord) -> VolumeResult<BucketRecord> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO bucket_record (
                period_type, period_year, period_date, size,
                abp, master_plan, actual_received, w_requirements, advance_prod, safekeep,
                excess, comp_to_master_plan
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                record.key.period_type,
                record.key.period_year,
                record.key.period_date,
                record.size,
                record.metrics.abp,
                record.metrics.master_plan,
                record.metrics.actual_received,
                record.metrics.w_requirements,
                record.metrics.advance_prod,
                record.metrics.safekeep,
                record.derived.excess,
                record.derived.comp_to_master_plan,
            ],
        )?;
        Ok(BucketRecord {
            id: Some(conn.last_insert_rowid()),
            ..record.clone()
        })
    }

    fn update_metrics(&self, record: &BucketRecord) -> VolumeResult<()> {
        let id = record
            .id
            .ok_or_else(|| VolumeError::validation("id", "record has not been stored yet"))?;
        let changed = self.conn().execute(
            "UPDATE bucket_record SET
                abp = ?2, master_plan = ?3, actual_received = ?4,
                w_requirements = ?5, advance_prod = ?6, safekeep = ?7,
                excess = ?8, comp_to_master_plan = ?9
             WHERE id = ?1",
            params![
                id,
                record.metrics.abp,
                record.metrics.master_plan,
                record.metrics.actual_received,
                record.metrics.w_requirements,
                record.metrics.advance_prod,
                record.metrics.safekeep,
                record.derived.excess,
                record.derived.comp_to_master_plan,
            ],
        )?;
        if changed == 0 {
            return Err(VolumeError::NotFound { id });
        }
        Ok(())
    }

    // ── Scope queries ──────────────────────────────────────────

    fn count_rows(&self, size: SizeBucket, scope: &PeriodScope) -> VolumeResult<i64> {
        let n: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM bucket_record
             WHERE size = ?1 AND period_type = ?2 AND period_year = ?3",
            params![size, scope.period_type, scope.period_year],
            |row| row.get(0),
        )?;
        Ok(n)
    }

    fn get(&self, id: RecordId) -> VolumeResult<Option<BucketRecord>> {
        let record = self
            .conn()
            .query_row(
                &format!("SELECT {COLUMNS} FROM bucket_record WHERE id = ?1"),
                params![id],
                map_row,
            )
            .optional()?;
        Ok(record)
    }

    fn period_keys(&self, scope: &PeriodScope) -> VolumeResult<Vec<PeriodKey>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT DISTINCT period_date FROM bucket_record
             WHERE period_type = ?1 AND period_year = ?2 AND size <> ?3
             ORDER BY period_date ASC",
        )?;
        let keys = stmt
            .query_map(
                params![scope.period_type, scope.period_year, SizeBucket::TotalVolume],
                |row| Ok(scope.key(row.get(0)?)),
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(keys)
    }

    fn totals(&self, scope: &PeriodScope) -> VolumeResult<Vec<BucketRecord>> {
        self.rows_for_size(SizeBucket::TotalVolume, scope)
    }

    fn rows_for_size(&self, size: SizeBucket, scope: &PeriodScope) -> VolumeResult<Vec<BucketRecord>> {
        query_records(
            &self.conn(),
            &format!(
                "SELECT {COLUMNS} FROM bucket_record
                 WHERE size = ?1 AND period_type = ?2 AND period_year = ?3
                 ORDER BY period_date ASC"
            ),
            params![size, scope.period_type, scope.period_year],
        )
    }

    fn fork(&self) -> VolumeResult<Option<Self>> {
        if self.path.is_none() {
            return Ok(None);
        }
        let fork = self.reopen()?;
        fork.migrate()?;
        Ok(Some(fork))
    }
}
