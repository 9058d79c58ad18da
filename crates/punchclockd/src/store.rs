use chrono::{DateTime, Datelike, FixedOffset, NaiveDate};
use punchclock_core::attendance::{self, AttendanceError, AttendanceRecord, AttendanceStatus, PunchEvent, Transition};
use punchclock_core::settings::{time_of_day, SettingsError};
use punchclock_core::{Coordinates, FaceDescriptor, IdentityTemplate, VerificationSettings};
use rusqlite::types::Type;
use rusqlite::{OptionalExtension, TransactionBehavior};
use serde::Serialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tokio_rusqlite::Connection;

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Key, Nonce,
};
use rand::rngs::OsRng;
use rand::RngCore;

/// Records per history page.
pub const PAGE_SIZE: u32 = 20;

const NONCE_LEN: usize = 12;
const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Db(#[from] tokio_rusqlite::Error),
    #[error("rusqlite error: {0}")]
    Rusqlite(#[from] rusqlite::Error),
    #[error("verification settings are not configured")]
    SettingsMissing,
    #[error("invalid verification settings: {0}")]
    InvalidSettings(#[from] SettingsError),
    #[error("attendance transition rejected: {0}")]
    Attendance(#[from] AttendanceError),
    #[error("descriptor encryption failed")]
    EncryptionFailed,
    #[error("descriptor decryption failed: key mismatch or corrupted data")]
    DecryptionFailed,
    #[error("invalid descriptor blob size: {0} bytes")]
    InvalidBlob(usize),
    #[error("invalid descriptor (empty or NaN/Inf)")]
    InvalidDescriptor,
    #[error("encryption key I/O error: {0}")]
    KeyIo(#[source] std::io::Error),
}

/// Result of committing a confirmed verification.
#[derive(Debug, Clone, PartialEq)]
pub enum CommitOutcome {
    Committed(Transition),
    /// The day was already complete; the stored record is unchanged.
    AlreadyCompleted(AttendanceRecord),
}

/// History window, counted back from today.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryPeriod {
    Week,
    Month,
    Year,
}

impl HistoryPeriod {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "week" => Some(HistoryPeriod::Week),
            "month" => Some(HistoryPeriod::Month),
            "year" => Some(HistoryPeriod::Year),
            _ => None,
        }
    }

    pub fn days(&self) -> i64 {
        match self {
            HistoryPeriod::Week => 7,
            HistoryPeriod::Month => 30,
            HistoryPeriod::Year => 365,
        }
    }
}

/// Attendance summary for one calendar month.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonthlyStats {
    /// `YYYY-MM`.
    pub month: String,
    pub recorded_days: u32,
    pub present_days: u32,
    pub late_days: u32,
    pub overtime_hours: f64,
    /// Present over recorded days, percent, one decimal.
    pub attendance_rate: f64,
}

/// SQLite-backed identity, settings and attendance storage.
///
/// Descriptors are encrypted with AES-256-GCM before storage. A
/// per-installation 32-byte key is generated at first use and stored at
/// `{db_dir}/.key` (mode 0600).
#[derive(Clone)]
pub struct AttendanceStore {
    conn: Connection,
    enc_key: [u8; 32],
}

impl AttendanceStore {
    /// Open (or create) the database at the given path and run migrations.
    pub async fn open(db_path: &Path) -> Result<Self, StoreError> {
        let in_memory = db_path == Path::new(":memory:");
        if !in_memory {
            if let Some(parent) = db_path.parent() {
                std::fs::create_dir_all(parent).ok();
            }
        }

        let enc_key = if in_memory {
            [0u8; 32]
        } else {
            let key_path = db_path
                .parent()
                .unwrap_or(Path::new("/var/lib/punchclock"))
                .join(".key");
            load_or_generate_key(&key_path)?
        };

        let conn = Connection::open(db_path).await?;

        conn.call(|conn| {
            conn.busy_timeout(Duration::from_secs(5))?;
            conn.execute_batch(
                "PRAGMA journal_mode = WAL;
                 CREATE TABLE IF NOT EXISTS identities (
                     identity_key TEXT PRIMARY KEY,
                     display_name TEXT NOT NULL,
                     descriptor BLOB NOT NULL,
                     created_at TEXT NOT NULL
                 );
                 CREATE TABLE IF NOT EXISTS settings (
                     id INTEGER PRIMARY KEY CHECK (id = 1),
                     office_lat REAL NOT NULL,
                     office_lng REAL NOT NULL,
                     radius_m REAL NOT NULL,
                     late_cutoff TEXT NOT NULL,
                     mandatory_hours REAL NOT NULL,
                     match_threshold REAL NOT NULL,
                     blink_threshold REAL NOT NULL,
                     blink_consecutive_frames INTEGER NOT NULL,
                     updated_at TEXT NOT NULL
                 );
                 CREATE TABLE IF NOT EXISTS attendance (
                     identity_key TEXT NOT NULL,
                     date TEXT NOT NULL,
                     punch_in_at TEXT NOT NULL,
                     punch_in_lat REAL NOT NULL,
                     punch_in_lng REAL NOT NULL,
                     punch_out_at TEXT,
                     punch_out_lat REAL,
                     punch_out_lng REAL,
                     is_late INTEGER NOT NULL,
                     status TEXT NOT NULL,
                     working_hours REAL NOT NULL DEFAULT 0.0,
                     overtime_hours REAL NOT NULL DEFAULT 0.0,
                     UNIQUE (identity_key, date)
                 );",
            )?;
            Ok(())
        })
        .await?;

        Ok(Self { conn, enc_key })
    }

    // ── Identities ────────────────────────────────────────────────────────────

    /// Store the identity's template, replacing any previous one.
    pub async fn enroll(
        &self,
        identity_key: &str,
        display_name: &str,
        descriptor: &FaceDescriptor,
    ) -> Result<(), StoreError> {
        let blob = self.encrypt_descriptor(&descriptor.values)?;
        let created_at = chrono::Local::now().to_rfc3339();
        let key = identity_key.to_string();
        let name = display_name.to_string();

        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO identities (identity_key, display_name, descriptor, created_at)
                     VALUES (?1, ?2, ?3, ?4)
                     ON CONFLICT(identity_key) DO UPDATE SET
                         display_name = excluded.display_name,
                         descriptor = excluded.descriptor,
                         created_at = excluded.created_at",
                    rusqlite::params![key, name, blob, created_at],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// The stored template, or `None` when the identity is not enrolled.
    pub async fn load_identity(&self, identity_key: &str) -> Result<Option<IdentityTemplate>, StoreError> {
        let key = identity_key.to_string();
        let row: Option<(String, String, Vec<u8>)> = self
            .conn
            .call(move |conn| {
                Ok(conn
                    .query_row(
                        "SELECT identity_key, display_name, descriptor FROM identities WHERE identity_key = ?1",
                        [&key],
                        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                    )
                    .optional()?)
            })
            .await?;

        // Decrypt outside the blocking closure
        row.map(|(identity_key, display_name, blob)| -> Result<IdentityTemplate, StoreError> {
            Ok(IdentityTemplate {
                identity_key,
                display_name,
                descriptor: FaceDescriptor::new(self.decrypt_descriptor(&blob)?),
            })
        })
        .transpose()
    }

    pub async fn count_identities(&self) -> Result<u64, StoreError> {
        self.conn
            .call(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM identities", [], |row| row.get(0))?))
            .await
            .map_err(StoreError::from)
    }

    // ── Settings ──────────────────────────────────────────────────────────────

    /// Current verification settings. A missing row is an error, never a default.
    pub async fn load_settings(&self) -> Result<VerificationSettings, StoreError> {
        let settings = self
            .conn
            .call(|conn| {
                Ok(conn
                    .query_row(
                        "SELECT office_lat, office_lng, radius_m, late_cutoff, mandatory_hours,
                                match_threshold, blink_threshold, blink_consecutive_frames
                         FROM settings WHERE id = 1",
                        [],
                        |row| {
                            let cutoff: String = row.get(3)?;
                            let late_cutoff = time_of_day::parse(&cutoff)
                                .ok_or_else(|| rusqlite::Error::InvalidColumnType(3, "late_cutoff".into(), Type::Text))?;
                            Ok(VerificationSettings {
                                office: Coordinates::new(row.get(0)?, row.get(1)?),
                                radius_m: row.get(2)?,
                                late_cutoff,
                                mandatory_hours: row.get(4)?,
                                match_threshold: row.get::<_, f64>(5)? as f32,
                                blink_threshold: row.get::<_, f64>(6)? as f32,
                                blink_consecutive_frames: row.get(7)?,
                            })
                        },
                    )
                    .optional()?)
            })
            .await?
            .ok_or(StoreError::SettingsMissing)?;

        settings.validate()?;
        Ok(settings)
    }

    pub async fn save_settings(&self, settings: &VerificationSettings) -> Result<(), StoreError> {
        settings.validate()?;
        let s = settings.clone();
        let updated_at = chrono::Local::now().to_rfc3339();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO settings (id, office_lat, office_lng, radius_m, late_cutoff, mandatory_hours,
                                           match_threshold, blink_threshold, blink_consecutive_frames, updated_at)
                     VALUES (1, ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                     ON CONFLICT(id) DO UPDATE SET
                         office_lat = excluded.office_lat,
                         office_lng = excluded.office_lng,
                         radius_m = excluded.radius_m,
                         late_cutoff = excluded.late_cutoff,
                         mandatory_hours = excluded.mandatory_hours,
                         match_threshold = excluded.match_threshold,
                         blink_threshold = excluded.blink_threshold,
                         blink_consecutive_frames = excluded.blink_consecutive_frames,
                         updated_at = excluded.updated_at",
                    rusqlite::params![
                        s.office.lat,
                        s.office.lng,
                        s.radius_m,
                        s.late_cutoff.format("%H:%M:%S").to_string(),
                        s.mandatory_hours,
                        s.match_threshold as f64,
                        s.blink_threshold as f64,
                        s.blink_consecutive_frames,
                        updated_at,
                    ],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    // ── Attendance ────────────────────────────────────────────────────────────

    /// Apply a confirmed verification to the identity's record for the local
    /// date of `at`.
    ///
    /// Read, decision and write run in one `BEGIN IMMEDIATE` transaction, so
    /// concurrent commits for the same identity and date serialise.
    pub async fn commit_punch(
        &self,
        identity_key: &str,
        at: DateTime<FixedOffset>,
        location: Coordinates,
        settings: &VerificationSettings,
    ) -> Result<CommitOutcome, StoreError> {
        let key = identity_key.to_string();
        let settings = settings.clone();

        let outcome = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let date = at.date_naive();
                let existing = select_record(&tx, &key, date)?;

                let transition = match attendance::apply_punch(&key, existing.as_ref(), at, location, &settings) {
                    Ok(t) => t,
                    Err(AttendanceError::AlreadyCompleted) => {
                        return Ok(existing.map(CommitOutcome::AlreadyCompleted).ok_or(AttendanceError::AlreadyCompleted));
                    }
                    Err(e) => return Ok(Err(e)),
                };

                write_record(&tx, &transition.record, existing.is_some())?;
                tx.commit()?;
                Ok(Ok(CommitOutcome::Committed(transition)))
            })
            .await??;

        match &outcome {
            CommitOutcome::Committed(t) => tracing::info!(
                user = identity_key,
                kind = ?t.kind,
                date = %t.record.date,
                is_late = t.record.is_late,
                working_hours = t.record.working_hours,
                "attendance committed"
            ),
            CommitOutcome::AlreadyCompleted(r) => {
                tracing::info!(user = identity_key, date = %r.date, "day already completed")
            }
        }
        Ok(outcome)
    }

    /// The identity's record for `date`, if any.
    pub async fn record_for(&self, identity_key: &str, date: NaiveDate) -> Result<Option<AttendanceRecord>, StoreError> {
        let key = identity_key.to_string();
        Ok(self.conn.call(move |conn| Ok(select_record(conn, &key, date)?)).await?)
    }

    /// Records within `period` of `today`, newest first. Pages start at 1.
    pub async fn history(
        &self,
        identity_key: &str,
        period: HistoryPeriod,
        page: u32,
        today: NaiveDate,
    ) -> Result<Vec<AttendanceRecord>, StoreError> {
        let key = identity_key.to_string();
        let from = (today - chrono::Duration::days(period.days())).format(DATE_FORMAT).to_string();
        let to = today.format(DATE_FORMAT).to_string();
        let offset = page.max(1).saturating_sub(1).saturating_mul(PAGE_SIZE);

        Ok(self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {RECORD_COLUMNS} FROM attendance
                     WHERE identity_key = ?1 AND date >= ?2 AND date <= ?3
                     ORDER BY date DESC LIMIT ?4 OFFSET ?5"
                ))?;
                let rows = stmt.query_map(rusqlite::params![key, from, to, PAGE_SIZE, offset], row_to_record)?;
                Ok(rows.collect::<Result<Vec<_>, _>>()?)
            })
            .await?)
    }

    /// Summary of the calendar month containing `today`.
    pub async fn monthly_stats(&self, identity_key: &str, today: NaiveDate) -> Result<MonthlyStats, StoreError> {
        let key = identity_key.to_string();
        let month = format!("{:04}-{:02}", today.year(), today.month());
        let pattern = format!("{month}-%");

        let (recorded, present, late, overtime): (u32, u32, u32, f64) = self
            .conn
            .call(move |conn| {
                Ok(conn.query_row(
                    "SELECT COUNT(*),
                            COALESCE(SUM(status = 'present'), 0),
                            COALESCE(SUM(is_late), 0),
                            COALESCE(SUM(overtime_hours), 0.0)
                     FROM attendance WHERE identity_key = ?1 AND date LIKE ?2",
                    rusqlite::params![key, pattern],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
                )?)
            })
            .await?;

        let attendance_rate = if recorded == 0 {
            0.0
        } else {
            (present as f64 / recorded as f64 * 1000.0).round() / 10.0
        };
        Ok(MonthlyStats {
            month,
            recorded_days: recorded,
            present_days: present,
            late_days: late,
            overtime_hours: (overtime * 100.0).round() / 100.0,
            attendance_rate,
        })
    }

    // ── Encryption helpers ────────────────────────────────────────────────────

    /// Output: 12-byte random nonce || ciphertext || 16-byte GCM tag.
    fn encrypt_descriptor(&self, values: &[f32]) -> Result<Vec<u8>, StoreError> {
        validate_descriptor_values(values)?;
        let plaintext = descriptor_to_bytes(values);

        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let key = Key::<Aes256Gcm>::from_slice(&self.enc_key);
        let cipher = Aes256Gcm::new(key);

        let ciphertext = cipher
            .encrypt(nonce, plaintext.as_slice())
            .map_err(|_| StoreError::EncryptionFailed)?;

        let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        blob.extend_from_slice(&nonce_bytes);
        blob.extend_from_slice(&ciphertext);
        Ok(blob)
    }

    fn decrypt_descriptor(&self, blob: &[u8]) -> Result<Vec<f32>, StoreError> {
        if blob.len() <= NONCE_LEN {
            return Err(StoreError::InvalidBlob(blob.len()));
        }

        let (nonce_bytes, ciphertext) = blob.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);
        let key = Key::<Aes256Gcm>::from_slice(&self.enc_key);
        let cipher = Aes256Gcm::new(key);

        let plaintext = cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| StoreError::DecryptionFailed)?;

        bytes_to_descriptor(&plaintext)
    }
}

// ── Row mapping ───────────────────────────────────────────────────────────────

const RECORD_COLUMNS: &str = "identity_key, date, punch_in_at, punch_in_lat, punch_in_lng,
     punch_out_at, punch_out_lat, punch_out_lng, is_late, status, working_hours, overtime_hours";

fn select_record(
    conn: &rusqlite::Connection,
    identity_key: &str,
    date: NaiveDate,
) -> rusqlite::Result<Option<AttendanceRecord>> {
    conn.query_row(
        &format!("SELECT {RECORD_COLUMNS} FROM attendance WHERE identity_key = ?1 AND date = ?2"),
        rusqlite::params![identity_key, date.format(DATE_FORMAT).to_string()],
        row_to_record,
    )
    .optional()
}

fn write_record(conn: &rusqlite::Connection, r: &AttendanceRecord, exists: bool) -> rusqlite::Result<()> {
    let date = r.date.format(DATE_FORMAT).to_string();
    if exists {
        let out = r.punch_out.as_ref();
        conn.execute(
            "UPDATE attendance SET punch_out_at = ?3, punch_out_lat = ?4, punch_out_lng = ?5,
                                   working_hours = ?6, overtime_hours = ?7
             WHERE identity_key = ?1 AND date = ?2",
            rusqlite::params![
                r.identity_key,
                date,
                out.map(|e| e.at.to_rfc3339()),
                out.map(|e| e.location.lat),
                out.map(|e| e.location.lng),
                r.working_hours,
                r.overtime_hours,
            ],
        )?;
    } else {
        conn.execute(
            "INSERT INTO attendance (identity_key, date, punch_in_at, punch_in_lat, punch_in_lng,
                                     is_late, status, working_hours, overtime_hours)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            rusqlite::params![
                r.identity_key,
                date,
                r.punch_in.at.to_rfc3339(),
                r.punch_in.location.lat,
                r.punch_in.location.lng,
                r.is_late,
                r.status.as_str(),
                r.working_hours,
                r.overtime_hours,
            ],
        )?;
    }
    Ok(())
}

fn conversion_error<E>(idx: usize, e: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
}

fn parse_timestamp(idx: usize, raw: &str) -> rusqlite::Result<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc3339(raw).map_err(|e| conversion_error(idx, e))
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<AttendanceRecord> {
    let date: String = row.get(1)?;
    let date = NaiveDate::parse_from_str(&date, DATE_FORMAT).map_err(|e| conversion_error(1, e))?;
    let punch_in_at: String = row.get(2)?;

    let punch_out = match row.get::<_, Option<String>>(5)? {
        Some(raw) => Some(PunchEvent {
            at: parse_timestamp(5, &raw)?,
            location: Coordinates::new(
                row.get::<_, Option<f64>>(6)?.unwrap_or(f64::NAN),
                row.get::<_, Option<f64>>(7)?.unwrap_or(f64::NAN),
            ),
        }),
        None => None,
    };

    let status: String = row.get(9)?;
    let status = AttendanceStatus::parse(&status)
        .ok_or_else(|| rusqlite::Error::InvalidColumnType(9, "status".into(), Type::Text))?;

    Ok(AttendanceRecord {
        identity_key: row.get(0)?,
        date,
        punch_in: PunchEvent {
            at: parse_timestamp(2, &punch_in_at)?,
            location: Coordinates::new(row.get(3)?, row.get(4)?),
        },
        punch_out,
        is_late: row.get(8)?,
        status,
        working_hours: row.get(10)?,
        overtime_hours: row.get(11)?,
    })
}

// ── Key management ────────────────────────────────────────────────────────────

/// Load the encryption key from disk, or generate and persist a new one.
/// Written with mode 0600 (owner-readable only).
fn load_or_generate_key(key_path: &Path) -> Result<[u8; 32], StoreError> {
    if key_path.exists() {
        let bytes = std::fs::read(key_path).map_err(StoreError::KeyIo)?;
        let key: [u8; 32] = bytes.as_slice().try_into().map_err(|_| {
            StoreError::KeyIo(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("encryption key file has wrong length ({} bytes, expected 32)", bytes.len()),
            ))
        })?;
        tracing::debug!(path = %key_path.display(), "loaded encryption key");
        Ok(key)
    } else {
        let mut key = [0u8; 32];
        OsRng.fill_bytes(&mut key);

        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;
        let mut f = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(0o600)
            .open(key_path)
            .map_err(StoreError::KeyIo)?;
        f.write_all(&key).map_err(StoreError::KeyIo)?;

        tracing::info!(path = %key_path.display(), "generated new AES-256 encryption key");
        Ok(key)
    }
}

// ── Serialization helpers ─────────────────────────────────────────────────────

fn descriptor_to_bytes(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn bytes_to_descriptor(bytes: &[u8]) -> Result<Vec<f32>, StoreError> {
    if bytes.is_empty() || bytes.len() % 4 != 0 {
        return Err(StoreError::InvalidBlob(bytes.len()));
    }
    let values: Vec<f32> = bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    validate_descriptor_values(&values)?;
    Ok(values)
}

fn validate_descriptor_values(values: &[f32]) -> Result<(), StoreError> {
    if values.is_empty() || values.iter().any(|v| !v.is_finite()) {
        return Err(StoreError::InvalidDescriptor);
    }
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveTime, TimeZone};
    use punchclock_core::attendance::PunchKind;

    fn settings() -> VerificationSettings {
        VerificationSettings {
            office: Coordinates::new(28.7041, 77.1025),
            radius_m: 200.0,
            late_cutoff: NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
            mandatory_hours: 8.0,
            match_threshold: 0.45,
            blink_threshold: 0.21,
            blink_consecutive_frames: 2,
        }
    }

    fn at(day: u32, h: u32, m: u32) -> DateTime<FixedOffset> {
        FixedOffset::east_opt(19800)
            .unwrap()
            .with_ymd_and_hms(2026, 3, day, h, m, 0)
            .unwrap()
    }

    fn here() -> Coordinates {
        Coordinates::new(28.7041, 77.1025)
    }

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, day).unwrap()
    }

    async fn memory_store() -> AttendanceStore {
        AttendanceStore::open(Path::new(":memory:")).await.unwrap()
    }

    #[tokio::test]
    async fn test_enroll_and_load_identity() {
        let store = memory_store().await;
        let descriptor = FaceDescriptor::new((0..128).map(|i| i as f32 / 128.0).collect());
        store.enroll("emp-7", "Asha", &descriptor).await.unwrap();

        let t = store.load_identity("emp-7").await.unwrap().unwrap();
        assert_eq!(t.display_name, "Asha");
        assert_eq!(t.descriptor, descriptor);
        assert!(store.load_identity("emp-8").await.unwrap().is_none());
        assert_eq!(store.count_identities().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_reenroll_replaces_template() {
        let store = memory_store().await;
        store.enroll("emp-7", "Asha", &FaceDescriptor::new(vec![1.0; 4])).await.unwrap();
        store.enroll("emp-7", "Asha K", &FaceDescriptor::new(vec![2.0; 4])).await.unwrap();

        let t = store.load_identity("emp-7").await.unwrap().unwrap();
        assert_eq!(t.display_name, "Asha K");
        assert_eq!(t.descriptor.values, vec![2.0; 4]);
        assert_eq!(store.count_identities().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_enroll_rejects_invalid_descriptor() {
        let store = memory_store().await;
        let err = store.enroll("emp-7", "Asha", &FaceDescriptor::new(vec![0.1, f32::NAN])).await;
        assert!(matches!(err, Err(StoreError::InvalidDescriptor)));
        let err = store.enroll("emp-7", "Asha", &FaceDescriptor::new(vec![])).await;
        assert!(matches!(err, Err(StoreError::InvalidDescriptor)));
    }

    #[tokio::test]
    async fn test_descriptor_blob_is_encrypted() {
        let store = memory_store().await;
        let values = vec![0.25f32; 8];
        let blob = store.encrypt_descriptor(&values).unwrap();
        assert_eq!(blob.len(), NONCE_LEN + values.len() * 4 + 16);
        assert_ne!(&blob[NONCE_LEN..NONCE_LEN + 32], descriptor_to_bytes(&values).as_slice());
        assert_eq!(store.decrypt_descriptor(&blob).unwrap(), values);

        let mut tampered = blob.clone();
        tampered[NONCE_LEN] ^= 0xff;
        assert!(matches!(store.decrypt_descriptor(&tampered), Err(StoreError::DecryptionFailed)));
        assert!(matches!(store.decrypt_descriptor(&blob[..4]), Err(StoreError::InvalidBlob(4))));
    }

    #[tokio::test]
    async fn test_missing_settings_is_error() {
        let store = memory_store().await;
        assert!(matches!(store.load_settings().await, Err(StoreError::SettingsMissing)));
    }

    #[tokio::test]
    async fn test_settings_roundtrip_and_update() {
        let store = memory_store().await;
        store.save_settings(&settings()).await.unwrap();
        assert_eq!(store.load_settings().await.unwrap(), settings());

        let mut changed = settings();
        changed.radius_m = 350.0;
        changed.late_cutoff = NaiveTime::from_hms_opt(9, 30, 0).unwrap();
        store.save_settings(&changed).await.unwrap();
        assert_eq!(store.load_settings().await.unwrap(), changed);
    }

    #[tokio::test]
    async fn test_invalid_settings_not_saved() {
        let store = memory_store().await;
        let mut bad = settings();
        bad.match_threshold = -1.0;
        assert!(matches!(store.save_settings(&bad).await, Err(StoreError::InvalidSettings(_))));
        assert!(matches!(store.load_settings().await, Err(StoreError::SettingsMissing)));
    }

    #[tokio::test]
    async fn test_punch_in_out_then_already_completed() {
        let store = memory_store().await;
        let s = settings();

        let first = store.commit_punch("emp-7", at(9, 10, 15), here(), &s).await.unwrap();
        let CommitOutcome::Committed(t) = first else { panic!("expected punch-in") };
        assert_eq!(t.kind, PunchKind::PunchIn);
        assert!(t.record.is_late);

        let second = store.commit_punch("emp-7", at(9, 19, 15), here(), &s).await.unwrap();
        let CommitOutcome::Committed(t) = second else { panic!("expected punch-out") };
        assert_eq!(t.kind, PunchKind::PunchOut);
        assert_eq!(t.record.working_hours, 9.0);
        assert_eq!(t.record.overtime_hours, 1.0);

        let stored = store.record_for("emp-7", date(9)).await.unwrap().unwrap();
        assert_eq!(stored, t.record);

        let third = store.commit_punch("emp-7", at(9, 20, 0), here(), &s).await.unwrap();
        assert_eq!(third, CommitOutcome::AlreadyCompleted(stored.clone()));
        assert_eq!(store.record_for("emp-7", date(9)).await.unwrap().unwrap(), stored);
    }

    #[tokio::test]
    async fn test_non_monotonic_punch_out_not_written() {
        let store = memory_store().await;
        let s = settings();
        store.commit_punch("emp-7", at(9, 12, 0), here(), &s).await.unwrap();
        let err = store.commit_punch("emp-7", at(9, 11, 0), here(), &s).await.unwrap_err();
        assert!(matches!(err, StoreError::Attendance(AttendanceError::NonMonotonicClock { .. })));
        let stored = store.record_for("emp-7", date(9)).await.unwrap().unwrap();
        assert!(stored.punch_out.is_none());
    }

    #[tokio::test]
    async fn test_concurrent_commits_create_one_punch_in() {
        let store = memory_store().await;
        let s = settings();

        let mut handles = Vec::new();
        for minute in 0..8 {
            let store = store.clone();
            let s = s.clone();
            handles.push(tokio::spawn(async move {
                store.commit_punch("emp-7", at(9, 9, minute), here(), &s).await
            }));
        }

        let mut punch_ins = 0;
        for h in handles {
            if let Ok(CommitOutcome::Committed(t)) = h.await.unwrap() {
                if t.kind == PunchKind::PunchIn {
                    punch_ins += 1;
                }
            }
        }
        assert_eq!(punch_ins, 1);
        let rows = store.history("emp-7", HistoryPeriod::Week, 1, date(9)).await.unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_commits_across_connections() {
        let dir = std::env::temp_dir().join(format!("punchclock-test-{}", uuid::Uuid::new_v4()));
        let path = dir.join("attendance.db");
        let a = AttendanceStore::open(&path).await.unwrap();
        let b = AttendanceStore::open(&path).await.unwrap();
        let s = settings();

        let (ra, rb) = tokio::join!(
            a.commit_punch("emp-7", at(9, 9, 0), here(), &s),
            b.commit_punch("emp-7", at(9, 9, 0), here(), &s),
        );
        let results = [ra, rb];
        let punch_ins = results
            .iter()
            .filter(|r| matches!(r, Ok(CommitOutcome::Committed(t)) if t.kind == PunchKind::PunchIn))
            .count();
        assert_eq!(punch_ins, 1);
        // Same instant twice: the loser sees the punch-in and cannot punch out.
        assert_eq!(
            results
                .iter()
                .filter(|r| matches!(r, Err(StoreError::Attendance(AttendanceError::NonMonotonicClock { .. }))))
                .count(),
            1
        );

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_history_period_and_paging() {
        let store = memory_store().await;
        let s = settings();
        for day in 1..=25 {
            store.commit_punch("emp-7", at(day, 9, 0), here(), &s).await.unwrap();
        }
        store.commit_punch("emp-8", at(25, 9, 0), here(), &s).await.unwrap();

        let week = store.history("emp-7", HistoryPeriod::Week, 1, date(25)).await.unwrap();
        assert_eq!(week.len(), 8);
        assert_eq!(week[0].date, date(25));
        assert_eq!(week[7].date, date(18));

        let month_p1 = store.history("emp-7", HistoryPeriod::Month, 1, date(25)).await.unwrap();
        let month_p2 = store.history("emp-7", HistoryPeriod::Month, 2, date(25)).await.unwrap();
        assert_eq!(month_p1.len(), PAGE_SIZE as usize);
        assert_eq!(month_p2.len(), 5);
        assert_eq!(month_p2[4].date, date(1));

        // Page 0 is treated as the first page.
        let page0 = store.history("emp-7", HistoryPeriod::Month, 0, date(25)).await.unwrap();
        assert_eq!(page0, month_p1);
    }

    #[tokio::test]
    async fn test_monthly_stats() {
        let store = memory_store().await;
        let s = settings();
        // 9.5 h and 8.5 h days (2.0 h overtime in total), then a late punch-in.
        store.commit_punch("emp-7", at(2, 9, 0), here(), &s).await.unwrap();
        store.commit_punch("emp-7", at(2, 18, 30), here(), &s).await.unwrap();
        store.commit_punch("emp-7", at(3, 9, 30), here(), &s).await.unwrap();
        store.commit_punch("emp-7", at(3, 18, 0), here(), &s).await.unwrap();
        store.commit_punch("emp-7", at(4, 11, 0), here(), &s).await.unwrap();

        let stats = store.monthly_stats("emp-7", date(20)).await.unwrap();
        assert_eq!(stats.month, "2026-03");
        assert_eq!(stats.recorded_days, 3);
        assert_eq!(stats.present_days, 3);
        assert_eq!(stats.late_days, 1);
        assert!((stats.overtime_hours - 2.0).abs() < 1e-9);
        assert_eq!(stats.attendance_rate, 100.0);

        let empty = store.monthly_stats("emp-9", date(20)).await.unwrap();
        assert_eq!(empty.recorded_days, 0);
        assert_eq!(empty.attendance_rate, 0.0);
    }

    #[test]
    fn test_history_period_parse() {
        assert_eq!(HistoryPeriod::parse("Week"), Some(HistoryPeriod::Week));
        assert_eq!(HistoryPeriod::parse("year").map(|p| p.days()), Some(365));
        assert_eq!(HistoryPeriod::parse("decade"), None);
    }
}
