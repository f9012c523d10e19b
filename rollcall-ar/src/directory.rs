//! Student directory lookups
//!
//! The directory is reference data owned by the administration side. The
//! engine only reads it: to resolve device identifiers (biometric match ids,
//! RFID card UIDs) to registration numbers, and to fetch section/branch
//! references when writing the ledger.

use async_trait::async_trait;
use rollcall_common::db::models::StudentRecord;
use rollcall_common::Result;
use sqlx::SqlitePool;

#[async_trait]
pub trait StudentDirectory: Send + Sync {
    /// Active student by registration number
    async fn resolve_student(&self, registration_number: &str) -> Result<Option<StudentRecord>>;

    /// Registration number enrolled under a fingerprint match id
    async fn resolve_biometric(&self, match_id: i64) -> Result<Option<String>>;

    /// Registration number holding an active RFID card
    async fn resolve_card(&self, card_uid: &str) -> Result<Option<String>>;
}

/// Directory backed by the `students`, `biometric_templates` and `rfid_cards` tables
#[derive(Clone)]
pub struct SqliteDirectory {
    db: SqlitePool,
}

impl SqliteDirectory {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl StudentDirectory for SqliteDirectory {
    async fn resolve_student(&self, registration_number: &str) -> Result<Option<StudentRecord>> {
        let student = sqlx::query_as::<_, StudentRecord>(
            r#"
            SELECT id, registration_number, name, section_id, branch
            FROM students
            WHERE registration_number = ? AND active = 1
            "#,
        )
        .bind(registration_number)
        .fetch_optional(&self.db)
        .await?;

        Ok(student)
    }

    async fn resolve_biometric(&self, match_id: i64) -> Result<Option<String>> {
        let registration: Option<String> = sqlx::query_scalar(
            r#"
            SELECT t.registration_number
            FROM biometric_templates t
            JOIN students s ON s.registration_number = t.registration_number
            WHERE t.match_id = ? AND t.active = 1 AND s.active = 1
            "#,
        )
        .bind(match_id)
        .fetch_optional(&self.db)
        .await?;

        Ok(registration)
    }

    async fn resolve_card(&self, card_uid: &str) -> Result<Option<String>> {
        let registration: Option<String> = sqlx::query_scalar(
            r#"
            SELECT c.registration_number
            FROM rfid_cards c
            JOIN students s ON s.registration_number = c.registration_number
            WHERE c.card_uid = ? AND c.active = 1 AND s.active = 1
            "#,
        )
        .bind(card_uid)
        .fetch_optional(&self.db)
        .await?;

        Ok(registration)
    }
}
