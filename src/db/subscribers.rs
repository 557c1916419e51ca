use chrono::Utc;
use rusqlite::{params, params_from_iter, OptionalExtension, Row};

use super::*;
use crate::types::Subscriber;

const SUBSCRIBER_COLUMNS: &str = "id, external_record_id, last_name, first_name, \
    contract_reference, company_name, installer_name, crm_link, email, phone";

/// SQLite's default host-parameter limit is 999; stay well under it.
const DELETE_CHUNK: usize = 500;

fn map_subscriber(row: &Row<'_>) -> rusqlite::Result<Subscriber> {
    Ok(Subscriber {
        id: row.get(0)?,
        external_record_id: row.get(1)?,
        last_name: row.get(2)?,
        first_name: row.get(3)?,
        contract_reference: row.get(4)?,
        company_name: row.get(5)?,
        installer_name: row.get(6)?,
        crm_link: row.get(7)?,
        email: row.get(8)?,
        phone: row.get(9)?,
    })
}

impl SupportDb {
    // =========================================================================
    // Subscriber replica
    // =========================================================================

    /// All replica rows ordered by surname.
    pub fn list_subscribers(&self) -> Result<Vec<Subscriber>, DbError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {SUBSCRIBER_COLUMNS} FROM subscribers
             ORDER BY last_name COLLATE NOCASE, first_name COLLATE NOCASE"
        ))?;
        let rows = stmt.query_map([], map_subscriber)?;
        let mut subscribers = Vec::new();
        for row in rows {
            subscribers.push(row?);
        }
        Ok(subscribers)
    }

    pub fn count_subscribers(&self) -> Result<usize, DbError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM subscribers", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Look up by replica id or by external record id.
    pub fn get_subscriber(&self, id: &str) -> Result<Option<Subscriber>, DbError> {
        let found = self
            .conn
            .query_row(
                &format!(
                    "SELECT {SUBSCRIBER_COLUMNS} FROM subscribers
                     WHERE id = ?1 OR external_record_id = ?1
                     LIMIT 1"
                ),
                params![id],
                map_subscriber,
            )
            .optional()?;
        Ok(found)
    }

    /// Identity projection used to plan a mirror run.
    pub fn replica_keys(&self) -> Result<Vec<ReplicaKey>, DbError> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, external_record_id, contract_reference FROM subscribers")?;
        let rows = stmt.query_map([], |row| {
            Ok(ReplicaKey {
                id: row.get(0)?,
                external_record_id: row.get(1)?,
                contract_reference: row.get(2)?,
            })
        })?;
        let mut keys = Vec::new();
        for row in rows {
            keys.push(row?);
        }
        Ok(keys)
    }

    /// Insert a batch of source subscribers as new replica rows, all or nothing.
    /// Each row gets a fresh replica id; the source id is kept as
    /// `external_record_id`.
    pub fn insert_subscribers(&self, batch: &[Subscriber]) -> Result<usize, DbError> {
        if batch.is_empty() {
            return Ok(0);
        }
        let now = Utc::now().to_rfc3339();
        self.with_transaction(|db| {
            let mut stmt = db.conn.prepare(
                "INSERT INTO subscribers (
                    id, external_record_id, last_name, first_name, contract_reference,
                    company_name, installer_name, crm_link, email, phone,
                    created_at, updated_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11)",
            )?;
            for s in batch {
                stmt.execute(params![
                    uuid::Uuid::new_v4().to_string(),
                    s.external_record_id.as_deref().unwrap_or(&s.id),
                    s.last_name,
                    s.first_name,
                    s.contract_reference,
                    s.company_name,
                    s.installer_name,
                    s.crm_link,
                    s.email,
                    s.phone,
                    now,
                ])?;
            }
            Ok(batch.len())
        })
    }

    /// Overwrite the replica row mirrored from `subscriber`'s external record.
    /// Returns false when no row carries that external id.
    pub fn update_subscriber_by_external_id(&self, subscriber: &Subscriber) -> Result<bool, DbError> {
        let external_id = subscriber
            .external_record_id
            .as_deref()
            .unwrap_or(&subscriber.id);
        let changed = self.conn.execute(
            "UPDATE subscribers SET
                last_name = ?2, first_name = ?3, contract_reference = ?4,
                company_name = ?5, installer_name = ?6, crm_link = ?7,
                email = ?8, phone = ?9, updated_at = ?10
             WHERE external_record_id = ?1",
            params![
                external_id,
                subscriber.last_name,
                subscriber.first_name,
                subscriber.contract_reference,
                subscriber.company_name,
                subscriber.installer_name,
                subscriber.crm_link,
                subscriber.email,
                subscriber.phone,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(changed > 0)
    }

    /// Delete replica rows by external record id. Rows without an external id
    /// cannot match.
    pub fn delete_subscribers_by_external_ids(&self, external_ids: &[String]) -> Result<usize, DbError> {
        if external_ids.is_empty() {
            return Ok(0);
        }
        self.with_transaction(|db| {
            let mut deleted = 0;
            for chunk in external_ids.chunks(DELETE_CHUNK) {
                let placeholders = vec!["?"; chunk.len()].join(", ");
                deleted += db.conn.execute(
                    &format!("DELETE FROM subscribers WHERE external_record_id IN ({placeholders})"),
                    params_from_iter(chunk.iter()),
                )?;
            }
            Ok(deleted)
        })
    }
}
