use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use tokio::sync::Mutex;
use utoipa::ToSchema;

use super::error::StorageError;
use crate::visibility::{EcefPosition, ObjectKind, VisibilityReport, VisibleObject};

const MIGRATION_SQL: &str = include_str!("../../migrations/001_init.sql");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
pub struct SnapshotSummary {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
}

/// A stored visibility report. Serializes with the same fields as a live
/// report plus its id.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct Snapshot {
    pub id: i64,
    #[serde(flatten)]
    pub report: VisibilityReport,
}

/// Append-only archive of visibility snapshots.
///
/// Writes are serialized through an async mutex and each save runs in a single
/// transaction, so readers only ever see complete snapshots. Running two
/// processes against the same database file is not supported.
pub struct SnapshotStore {
    pool: SqlitePool,
    write_lock: Mutex<()>,
}

impl SnapshotStore {
    /// Open (creating if needed) the database at `path`. `":memory:"` gives a
    /// private in-memory store.
    pub async fn open(path: &str) -> Result<Self, StorageError> {
        let in_memory = path == ":memory:";
        if !in_memory {
            if let Some(parent) = Path::new(path).parent() {
                if !parent.as_os_str().is_empty() {
                    tokio::fs::create_dir_all(parent).await?;
                }
            }
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true);

        log::info!("Opening snapshot database: {}", path);

        let pool = if in_memory {
            // every connection to :memory: is a separate database
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await?
        } else {
            SqlitePoolOptions::new()
                .max_connections(4)
                .connect_with(options)
                .await?
        };

        run_migrations(&pool).await?;

        Ok(Self {
            pool,
            write_lock: Mutex::new(()),
        })
    }

    /// Persist `report`, returning its newly assigned id. The snapshot takes
    /// the report's computation timestamp.
    pub async fn save(&self, report: &VisibilityReport) -> Result<i64, StorageError> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;

        let id = sqlx::query("INSERT INTO snapshots (taken_at_ms) VALUES (?1)")
            .bind(report.timestamp.timestamp_millis())
            .execute(&mut *tx)
            .await?
            .last_insert_rowid();

        for (ordinal, object) in report.objects().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO snapshot_objects
                    (snapshot_id, ordinal, kind, name, grp, azimuth_deg, altitude_deg,
                     distance_m, x_km, y_km, z_km)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                "#,
            )
            .bind(id)
            .bind(ordinal as i64)
            .bind(object.kind.as_str())
            .bind(&object.name)
            .bind(&object.group)
            .bind(object.azimuth_deg)
            .bind(object.altitude_deg)
            .bind(object.distance_m)
            .bind(object.position.x_km)
            .bind(object.position.y_km)
            .bind(object.position.z_km)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(id)
    }

    /// All snapshots, oldest first.
    pub async fn list(&self) -> Result<Vec<SnapshotSummary>, StorageError> {
        let rows = sqlx::query("SELECT id, taken_at_ms FROM snapshots ORDER BY id ASC")
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter()
            .map(|row| {
                let id: i64 = row.try_get("id")?;
                let millis: i64 = row.try_get("taken_at_ms")?;
                Ok(SnapshotSummary {
                    id,
                    timestamp: from_millis(millis)?,
                })
            })
            .collect()
    }

    pub async fn get(&self, id: i64) -> Result<Snapshot, StorageError> {
        // read both tables from one transaction so a concurrent purge can't
        // split them
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query("SELECT taken_at_ms FROM snapshots WHERE id = ?1")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(StorageError::NotFound(id))?;
        let timestamp = from_millis(row.try_get("taken_at_ms")?)?;

        let rows = sqlx::query(
            r#"
            SELECT kind, name, grp, azimuth_deg, altitude_deg, distance_m, x_km, y_km, z_km
            FROM snapshot_objects
            WHERE snapshot_id = ?1
            ORDER BY ordinal ASC
            "#,
        )
        .bind(id)
        .fetch_all(&mut *tx)
        .await?;
        tx.commit().await?;

        let mut objects = Vec::with_capacity(rows.len());
        for row in rows {
            let kind: String = row.try_get("kind")?;
            let kind = ObjectKind::parse(&kind)
                .ok_or_else(|| StorageError::Serialization(format!("unknown kind '{}'", kind)))?;
            objects.push(VisibleObject {
                kind,
                name: row.try_get("name")?,
                azimuth_deg: row.try_get("azimuth_deg")?,
                altitude_deg: row.try_get("altitude_deg")?,
                distance_m: row.try_get("distance_m")?,
                group: row.try_get("grp")?,
                position: EcefPosition {
                    x_km: row.try_get("x_km")?,
                    y_km: row.try_get("y_km")?,
                    z_km: row.try_get("z_km")?,
                },
            });
        }

        Ok(Snapshot {
            id,
            report: VisibilityReport::from_objects(timestamp, objects),
        })
    }

    /// Delete snapshots taken more than `retention_days` before `now`.
    /// Returns the number of snapshots removed.
    pub async fn purge_older_than(
        &self,
        retention_days: u32,
        now: DateTime<Utc>,
    ) -> Result<u64, StorageError> {
        let cutoff = now - Duration::days(i64::from(retention_days));

        let _guard = self.write_lock.lock().await;
        let result = sqlx::query("DELETE FROM snapshots WHERE taken_at_ms < ?1")
            .bind(cutoff.timestamp_millis())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}

fn from_millis(millis: i64) -> Result<DateTime<Utc>, StorageError> {
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| StorageError::Serialization(format!("timestamp {} out of range", millis)))
}

async fn run_migrations(pool: &SqlitePool) -> Result<(), StorageError> {
    for statement in MIGRATION_SQL.split(';') {
        let statement: String = statement
            .lines()
            .filter(|line| !line.trim().starts_with("--"))
            .collect::<Vec<_>>()
            .join("\n");
        let statement = statement.trim();
        if statement.is_empty() {
            continue;
        }
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}

#[cfg(test)]
impl SnapshotStore {
    /// Make every later save fail inside its transaction until lifted.
    pub(crate) async fn reject_saves(&self, reject: bool) {
        let sql = if reject {
            "CREATE TRIGGER IF NOT EXISTS reject_saves BEFORE INSERT ON snapshots \
             BEGIN SELECT RAISE(ABORT, 'snapshots are read-only'); END"
        } else {
            "DROP TRIGGER IF EXISTS reject_saves"
        };
        sqlx::query(sql).execute(&self.pool).await.unwrap();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    async fn store() -> SnapshotStore {
        SnapshotStore::open(":memory:").await.unwrap()
    }

    fn object(kind: ObjectKind, name: &str, group: Option<&str>) -> VisibleObject {
        VisibleObject {
            kind,
            name: name.into(),
            azimuth_deg: 123.5,
            altitude_deg: 42.25,
            distance_m: match kind {
                ObjectKind::Aircraft => Some(12_345.0),
                ObjectKind::Satellite => None,
            },
            group: group.map(Into::into),
            position: EcefPosition {
                x_km: -2_400.0,
                y_km: -4_600.0,
                z_km: 3_800.0,
            },
        }
    }

    fn report(timestamp: DateTime<Utc>) -> VisibilityReport {
        let mut satellites = BTreeMap::new();
        satellites.insert(
            "STARLINK".to_string(),
            vec![
                object(ObjectKind::Satellite, "STARLINK-1007", Some("STARLINK")),
                object(ObjectKind::Satellite, "STARLINK-1008", Some("STARLINK")),
            ],
        );
        satellites.insert(
            "ISS".to_string(),
            vec![object(ObjectKind::Satellite, "ISS (ZARYA)", Some("ISS"))],
        );
        VisibilityReport {
            timestamp,
            satellites,
            aircraft: vec![object(ObjectKind::Aircraft, "UAL123", None)],
        }
    }

    fn at_millis(millis: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(millis).unwrap()
    }

    #[tokio::test]
    async fn saved_snapshot_reads_back_identically() {
        let store = store().await;
        let original = report(at_millis(1_700_000_000_123));

        let id = store.save(&original).await.unwrap();
        let snapshot = store.get(id).await.unwrap();

        assert_eq!(snapshot.id, id);
        assert_eq!(snapshot.report, original);
    }

    #[tokio::test]
    async fn empty_report_is_still_a_snapshot() {
        let store = store().await;
        let id = store
            .save(&VisibilityReport::empty(at_millis(1_000)))
            .await
            .unwrap();
        let snapshot = store.get(id).await.unwrap();
        assert_eq!(snapshot.report.satellite_count(), 0);
        assert!(snapshot.report.aircraft.is_empty());
    }

    #[tokio::test]
    async fn ids_increase_and_list_is_oldest_first() {
        let store = store().await;
        let mut ids = Vec::new();
        for i in 0..3 {
            ids.push(store.save(&report(at_millis(1_000 * i))).await.unwrap());
        }
        assert!(ids.windows(2).all(|w| w[0] < w[1]));

        let listed: Vec<i64> = store.list().await.unwrap().iter().map(|s| s.id).collect();
        assert_eq!(listed, ids);
    }

    #[tokio::test]
    async fn failed_save_leaves_no_gap() {
        let store = store().await;
        let first = store.save(&report(at_millis(1_000))).await.unwrap();

        // NaN binds as NULL and trips the NOT NULL constraint mid-transaction
        let mut broken = report(at_millis(2_000));
        broken.aircraft[0].azimuth_deg = f64::NAN;
        assert!(matches!(
            store.save(&broken).await,
            Err(StorageError::Database(_))
        ));

        let second = store.save(&report(at_millis(3_000))).await.unwrap();
        assert_eq!(second, first + 1);

        let listed: Vec<i64> = store.list().await.unwrap().iter().map(|s| s.id).collect();
        assert_eq!(listed, vec![first, second]);
    }

    #[tokio::test]
    async fn unknown_id_is_not_found() {
        let store = store().await;
        assert!(matches!(
            store.get(42).await,
            Err(StorageError::NotFound(42))
        ));
    }

    #[tokio::test]
    async fn retention_purges_old_and_keeps_recent() {
        let store = store().await;
        let now = Utc::now();
        let old = store.save(&report(now - Duration::days(8))).await.unwrap();
        let recent = store.save(&report(now - Duration::days(6))).await.unwrap();

        let removed = store.purge_older_than(7, now).await.unwrap();
        assert_eq!(removed, 1);

        assert!(matches!(
            store.get(old).await,
            Err(StorageError::NotFound(_))
        ));
        assert_eq!(store.get(recent).await.unwrap().id, recent);
        let listed: Vec<i64> = store.list().await.unwrap().iter().map(|s| s.id).collect();
        assert_eq!(listed, vec![recent]);
    }

    #[tokio::test]
    async fn purge_cascades_to_objects() {
        let store = store().await;
        let now = Utc::now();
        store.save(&report(now - Duration::days(30))).await.unwrap();
        store.purge_older_than(7, now).await.unwrap();

        let remaining: i64 = sqlx::query("SELECT COUNT(*) AS n FROM snapshot_objects")
            .fetch_one(&store.pool)
            .await
            .unwrap()
            .try_get("n")
            .unwrap();
        assert_eq!(remaining, 0);
    }

    #[tokio::test]
    async fn snapshot_serializes_like_a_live_report() {
        let snapshot = Snapshot {
            id: 7,
            report: report(at_millis(0)),
        };
        let value = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(value["id"], 7);
        assert!(value["satellites"]["ISS"].is_array());
        assert_eq!(value["aircraft"][0]["name"], "UAL123");
        assert!(value["timestamp"].is_string());
    }

    #[tokio::test]
    async fn file_backed_store_survives_reopen() {
        let dir = std::env::temp_dir().join(format!(
            "sky-monitor-store-{}-{}",
            std::process::id(),
            Utc::now().timestamp_nanos_opt().unwrap_or_default()
        ));
        let path = dir.join("nested").join("snapshots.db");
        let path_str = path.to_string_lossy().to_string();

        let id = {
            let store = SnapshotStore::open(&path_str).await.unwrap();
            let id = store.save(&report(at_millis(5_000))).await.unwrap();
            store.pool.close().await;
            id
        };

        assert!(path.exists());
        let reopened = SnapshotStore::open(&path_str).await.unwrap();
        assert_eq!(reopened.get(id).await.unwrap().id, id);
        reopened.pool.close().await;
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn rejected_save_stores_nothing() {
        let store = store().await;
        let first = store.save(&report(at_millis(1_000))).await.unwrap();

        store.reject_saves(true).await;
        assert!(matches!(
            store.save(&report(at_millis(2_000))).await,
            Err(StorageError::Database(_))
        ));
        assert_eq!(store.list().await.unwrap().len(), 1);

        store.reject_saves(false).await;
        let next = store.save(&report(at_millis(3_000))).await.unwrap();
        assert_eq!(next, first + 1);
    }
}
