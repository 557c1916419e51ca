use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use super::*;
use crate::types::{
    identity_label, Attachment, Channel, Comment, Origin, Priority, Ticket, TicketPatch,
    TicketStatus, TicketType,
};

/// Raw ticket row plus the joined subscriber columns, before vocabulary and
/// timestamp parsing.
struct TicketRow {
    id: String,
    title: String,
    description: String,
    priority: String,
    status: String,
    ticket_type: String,
    origin: String,
    channel: String,
    assigned_to: Option<String>,
    subscriber_id: Option<String>,
    subscriber_label: String,
    subscriber_email: Option<String>,
    installer_id: Option<String>,
    external_record_id: Option<String>,
    created_by: Option<String>,
    created_at: String,
    updated_at: String,
    live_first_name: Option<String>,
    live_last_name: Option<String>,
    live_contract_reference: Option<String>,
    live_email: Option<String>,
}

const TICKET_SELECT: &str = "SELECT t.id, t.title, t.description, t.priority, t.status,
        t.ticket_type, t.origin, t.channel, t.assigned_to, t.subscriber_id,
        t.subscriber_label, t.subscriber_email, t.installer_id, t.external_record_id,
        t.created_by, t.created_at, t.updated_at,
        s.first_name, s.last_name, s.contract_reference, s.email
     FROM tickets t
     LEFT JOIN subscribers s ON s.id = t.subscriber_id";

fn map_ticket_row(row: &Row<'_>) -> rusqlite::Result<TicketRow> {
    Ok(TicketRow {
        id: row.get(0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        priority: row.get(3)?,
        status: row.get(4)?,
        ticket_type: row.get(5)?,
        origin: row.get(6)?,
        channel: row.get(7)?,
        assigned_to: row.get(8)?,
        subscriber_id: row.get(9)?,
        subscriber_label: row.get(10)?,
        subscriber_email: row.get(11)?,
        installer_id: row.get(12)?,
        external_record_id: row.get(13)?,
        created_by: row.get(14)?,
        created_at: row.get(15)?,
        updated_at: row.get(16)?,
        live_first_name: row.get(17)?,
        live_last_name: row.get(18)?,
        live_contract_reference: row.get(19)?,
        live_email: row.get(20)?,
    })
}

impl TicketRow {
    /// Identity comes from the live subscriber row when the link resolves,
    /// otherwise from the snapshot taken at creation.
    fn into_ticket(self) -> Result<Ticket, DbError> {
        let (subscriber_identity, subscriber_email) = match (
            &self.live_first_name,
            &self.live_last_name,
            &self.live_contract_reference,
        ) {
            (Some(first), Some(last), Some(reference)) => (
                identity_label(first, last, reference),
                self.live_email.or(self.subscriber_email),
            ),
            _ => (self.subscriber_label, self.subscriber_email),
        };

        Ok(Ticket {
            id: self.id,
            title: self.title,
            description: self.description,
            priority: Priority::parse_label(&self.priority)?,
            status: TicketStatus::parse_label(&self.status)?,
            ticket_type: TicketType::parse_label(&self.ticket_type)?,
            origin: Origin::parse_label(&self.origin)?,
            channel: Channel::parse_label(&self.channel)?,
            assigned_to: self.assigned_to,
            subscriber_id: self.subscriber_id,
            subscriber_identity,
            subscriber_email,
            installer_id: self.installer_id,
            external_record_id: self.external_record_id,
            comments: Vec::new(),
            attachments: Vec::new(),
            created_at: parse_timestamp(&self.created_at)?,
            updated_at: parse_timestamp(&self.updated_at)?,
            created_by: self.created_by,
        })
    }
}

impl SupportDb {
    // =========================================================================
    // Tickets (primary store)
    // =========================================================================

    /// Insert a new ticket. `subscriber_identity` is stored as the label
    /// snapshot.
    pub fn insert_ticket(&self, ticket: &Ticket) -> Result<(), DbError> {
        self.conn.execute(
            "INSERT INTO tickets (
                id, title, description, priority, status, ticket_type, origin, channel,
                assigned_to, subscriber_id, subscriber_label, subscriber_email,
                installer_id, external_record_id, created_by, created_at, updated_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
            params![
                ticket.id,
                ticket.title,
                ticket.description,
                ticket.priority.as_str(),
                ticket.status.as_str(),
                ticket.ticket_type.as_str(),
                ticket.origin.as_str(),
                ticket.channel.as_str(),
                ticket.assigned_to,
                ticket.subscriber_id,
                ticket.subscriber_identity,
                ticket.subscriber_email,
                ticket.installer_id,
                ticket.external_record_id,
                ticket.created_by,
                ticket.created_at.to_rfc3339(),
                ticket.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Fetch a ticket with its comments and attachments.
    pub fn get_ticket(&self, id: &str) -> Result<Option<Ticket>, DbError> {
        let row = self
            .conn
            .query_row(&format!("{TICKET_SELECT} WHERE t.id = ?1"), params![id], map_ticket_row)
            .optional()?;
        let Some(row) = row else {
            return Ok(None);
        };
        let mut ticket = row.into_ticket()?;
        ticket.comments = self.list_comments(&ticket.id)?;
        ticket.attachments = self.list_attachments(&ticket.id)?;
        Ok(Some(ticket))
    }

    /// Newest first, without comments or attachments.
    pub fn list_tickets(&self) -> Result<Vec<Ticket>, DbError> {
        let mut stmt = self
            .conn
            .prepare(&format!("{TICKET_SELECT} ORDER BY t.created_at DESC"))?;
        let rows = stmt.query_map([], map_ticket_row)?;
        let mut tickets = Vec::new();
        for row in rows {
            tickets.push(row?.into_ticket()?);
        }
        Ok(tickets)
    }

    /// Apply a partial update. Returns false when the ticket does not exist.
    pub fn update_ticket(
        &self,
        id: &str,
        patch: &TicketPatch,
        now: DateTime<Utc>,
    ) -> Result<bool, DbError> {
        let changed = self.conn.execute(
            "UPDATE tickets SET
                title = COALESCE(?2, title),
                description = COALESCE(?3, description),
                priority = COALESCE(?4, priority),
                status = COALESCE(?5, status),
                ticket_type = COALESCE(?6, ticket_type),
                assigned_to = CASE WHEN ?7 THEN ?8 ELSE assigned_to END,
                updated_at = ?9
             WHERE id = ?1",
            params![
                id,
                patch.title,
                patch.description,
                patch.priority.map(|p| p.as_str()),
                patch.status.map(|s| s.as_str()),
                patch.ticket_type.map(|t| t.as_str()),
                patch.assigned_to.is_some(),
                patch.assigned_to.clone().flatten(),
                now.to_rfc3339(),
            ],
        )?;
        Ok(changed > 0)
    }

    /// Remember the mirrored record id once the tabular write succeeded.
    pub fn set_ticket_external_id(&self, id: &str, external_record_id: &str) -> Result<bool, DbError> {
        let changed = self.conn.execute(
            "UPDATE tickets SET external_record_id = ?2 WHERE id = ?1",
            params![id, external_record_id],
        )?;
        Ok(changed > 0)
    }

    // =========================================================================
    // Comments and attachments
    // =========================================================================

    pub fn insert_comment(&self, comment: &Comment) -> Result<(), DbError> {
        self.conn.execute(
            "INSERT INTO ticket_comments (id, ticket_id, author, body, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                comment.id,
                comment.ticket_id,
                comment.author,
                comment.body,
                comment.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Oldest first.
    pub fn list_comments(&self, ticket_id: &str) -> Result<Vec<Comment>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, ticket_id, author, body, created_at FROM ticket_comments
             WHERE ticket_id = ?1 ORDER BY created_at ASC",
        )?;
        let rows = stmt.query_map(params![ticket_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?;
        let mut comments = Vec::new();
        for row in rows {
            let (id, ticket_id, author, body, created_at) = row?;
            comments.push(Comment {
                id,
                ticket_id,
                author,
                body,
                created_at: parse_timestamp(&created_at)?,
            });
        }
        Ok(comments)
    }

    pub fn insert_attachment(&self, attachment: &Attachment) -> Result<(), DbError> {
        self.conn.execute(
            "INSERT INTO ticket_attachments (id, ticket_id, file_name, url, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                attachment.id,
                attachment.ticket_id,
                attachment.file_name,
                attachment.url,
                attachment.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn list_attachments(&self, ticket_id: &str) -> Result<Vec<Attachment>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, ticket_id, file_name, url, created_at FROM ticket_attachments
             WHERE ticket_id = ?1 ORDER BY created_at ASC",
        )?;
        let rows = stmt.query_map(params![ticket_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?;
        let mut attachments = Vec::new();
        for row in rows {
            let (id, ticket_id, file_name, url, created_at) = row?;
            attachments.push(Attachment {
                id,
                ticket_id,
                file_name,
                url,
                created_at: parse_timestamp(&created_at)?,
            });
        }
        Ok(attachments)
    }
}
