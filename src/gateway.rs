//! Ticket mutation gateway.
//!
//! Every mutation is validated first, then written to the relational store,
//! whose outcome is what the caller gets. A mirrored write to the tabular
//! store follows; its outcome is captured as a `MirroredWrite`, logged, and
//! dropped. It can never fail or roll back the primary write.

use std::sync::Arc;

use chrono::Utc;

use crate::cache::SubscriberCache;
use crate::db::SharedDb;
use crate::error::{FieldError, SupportError};
use crate::resolver::extract_email;
use crate::tabular::{TabularSource, TicketRecordFields};
use crate::types::{Attachment, Comment, NewTicket, SubscriberRef, Ticket, TicketPatch};

const REQUIRED: &str = "is required";

/// Outcome of the best-effort tabular write.
#[derive(Debug)]
pub enum MirroredWrite {
    Written { record_id: String },
    Skipped { reason: &'static str },
    Failed(SupportError),
}

impl MirroredWrite {
    fn log(&self, ticket_id: &str, op: &'static str) {
        match self {
            MirroredWrite::Written { record_id } => {
                log::info!("Ticket {}: mirrored {} ok (record {})", ticket_id, op, record_id);
            }
            MirroredWrite::Skipped { reason } => {
                log::debug!("Ticket {}: mirrored {} skipped: {}", ticket_id, op, reason);
            }
            MirroredWrite::Failed(e) => {
                log::warn!("Ticket {}: mirrored {} failed, primary write kept: {}", ticket_id, op, e);
            }
        }
    }
}

/// Identity resolved for a new ticket.
struct SubscriberLink {
    subscriber_id: Option<String>,
    label: String,
    email: Option<String>,
}

pub struct TicketMutationGateway {
    db: SharedDb,
    tabular: Option<Arc<dyn TabularSource>>,
    subscribers: Option<Arc<SubscriberCache>>,
}

impl TicketMutationGateway {
    pub fn new(
        db: SharedDb,
        tabular: Option<Arc<dyn TabularSource>>,
        subscribers: Option<Arc<SubscriberCache>>,
    ) -> Self {
        Self {
            db,
            tabular,
            subscribers,
        }
    }

    /// Required-field checks, run before any I/O.
    pub fn validate_new(ticket: &NewTicket) -> Result<(), SupportError> {
        let mut errors = Vec::new();
        if ticket.title.trim().is_empty() {
            errors.push(FieldError {
                field: "title",
                message: REQUIRED,
            });
        }
        if ticket.description.trim().is_empty() {
            errors.push(FieldError {
                field: "description",
                message: REQUIRED,
            });
        }
        let subscriber = match &ticket.subscriber {
            SubscriberRef::Known(id) => id,
            SubscriberRef::Manual(label) => label,
        };
        if subscriber.trim().is_empty() {
            errors.push(FieldError {
                field: "subscriber",
                message: REQUIRED,
            });
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(SupportError::Validation(errors))
        }
    }

    pub fn validate_patch(patch: &TicketPatch) -> Result<(), SupportError> {
        let mut errors = Vec::new();
        if patch.title.as_deref().is_some_and(|t| t.trim().is_empty()) {
            errors.push(FieldError {
                field: "title",
                message: "cannot be empty",
            });
        }
        if patch
            .description
            .as_deref()
            .is_some_and(|d| d.trim().is_empty())
        {
            errors.push(FieldError {
                field: "description",
                message: "cannot be empty",
            });
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(SupportError::Validation(errors))
        }
    }

    fn link_subscriber(&self, subscriber: &SubscriberRef) -> Result<SubscriberLink, SupportError> {
        match subscriber {
            SubscriberRef::Manual(label) => Ok(SubscriberLink {
                subscriber_id: None,
                label: label.trim().to_string(),
                email: extract_email(label),
            }),
            SubscriberRef::Known(id) => {
                let id = id.trim();
                let replica_row = self.db.lock().get_subscriber(id)?;
                if let Some(s) = replica_row {
                    return Ok(SubscriberLink {
                        subscriber_id: Some(s.id.clone()),
                        label: s.display_identity(),
                        email: s.email,
                    });
                }
                // Tabular-backed picker before the first mirror run: keep the
                // identity as a snapshot without a replica link
                let cached = self.subscribers.as_ref().and_then(|c| c.find(id));
                match cached {
                    Some(s) => {
                        log::debug!("Subscriber {} not in replica yet, storing label only", id);
                        Ok(SubscriberLink {
                            subscriber_id: None,
                            label: s.display_identity(),
                            email: s.email,
                        })
                    }
                    None => Err(SupportError::NotFound(format!("Subscriber {id}"))),
                }
            }
        }
    }

    pub fn get(&self, id: &str) -> Result<Ticket, SupportError> {
        let found = self.db.lock().get_ticket(id)?;
        found.ok_or_else(|| SupportError::NotFound(format!("Ticket {id}")))
    }

    pub fn list(&self) -> Result<Vec<Ticket>, SupportError> {
        Ok(self.db.lock().list_tickets()?)
    }

    /// Create a ticket. Fails only on validation, subscriber lookup, or the
    /// primary write.
    pub async fn create(&self, new: NewTicket) -> Result<Ticket, SupportError> {
        Self::validate_new(&new)?;
        let link = self.link_subscriber(&new.subscriber)?;

        let now = Utc::now();
        let mut ticket = Ticket {
            id: uuid::Uuid::new_v4().to_string(),
            title: new.title.trim().to_string(),
            description: new.description.trim().to_string(),
            priority: new.priority,
            status: new.status,
            ticket_type: new.ticket_type,
            origin: new.origin,
            channel: new.channel,
            assigned_to: new.assigned_to.filter(|a| !a.trim().is_empty()),
            subscriber_id: link.subscriber_id,
            subscriber_identity: link.label,
            subscriber_email: link.email,
            installer_id: new.installer_id,
            external_record_id: None,
            comments: Vec::new(),
            attachments: Vec::new(),
            created_at: now,
            updated_at: now,
            created_by: new.created_by,
        };

        self.db.lock().insert_ticket(&ticket)?;
        log::info!("Ticket {} created", ticket.id);

        // Committed: from here on nothing may turn this into an error.
        let mirrored = self.mirror_create(&ticket).await;
        mirrored.log(&ticket.id, "create");
        if let MirroredWrite::Written { record_id } = mirrored {
            ticket.external_record_id = Some(record_id);
        }
        Ok(ticket)
    }

    /// Apply a partial update. Fails only on validation, a missing ticket,
    /// or the primary write.
    pub async fn update(&self, id: &str, patch: TicketPatch) -> Result<Ticket, SupportError> {
        Self::validate_patch(&patch)?;
        if patch.is_empty() {
            return self.get(id);
        }

        let changed = self.db.lock().update_ticket(id, &patch, Utc::now())?;
        if !changed {
            return Err(SupportError::NotFound(format!("Ticket {id}")));
        }
        let ticket = self.get(id)?;
        log::info!("Ticket {} updated", ticket.id);

        let mirrored = self.mirror_update(&ticket).await;
        mirrored.log(&ticket.id, "update");

        Ok(ticket)
    }

    /// Append a comment. Comments live in the relational store only.
    pub fn add_comment(&self, ticket_id: &str, author: &str, body: &str) -> Result<Comment, SupportError> {
        let mut errors = Vec::new();
        if author.trim().is_empty() {
            errors.push(FieldError {
                field: "author",
                message: REQUIRED,
            });
        }
        if body.trim().is_empty() {
            errors.push(FieldError {
                field: "body",
                message: REQUIRED,
            });
        }
        if !errors.is_empty() {
            return Err(SupportError::Validation(errors));
        }

        let comment = Comment {
            id: uuid::Uuid::new_v4().to_string(),
            ticket_id: ticket_id.to_string(),
            author: author.trim().to_string(),
            body: body.trim().to_string(),
            created_at: Utc::now(),
        };

        let db = self.db.lock();
        if db.get_ticket(ticket_id)?.is_none() {
            return Err(SupportError::NotFound(format!("Ticket {ticket_id}")));
        }
        db.insert_comment(&comment)?;
        Ok(comment)
    }

    /// Record an uploaded file against a ticket. The file itself lives at
    /// `url`; only the reference is stored, and it is not mirrored.
    pub fn add_attachment(&self, ticket_id: &str, file_name: &str, url: &str) -> Result<Attachment, SupportError> {
        let mut errors = Vec::new();
        if file_name.trim().is_empty() {
            errors.push(FieldError {
                field: "fileName",
                message: REQUIRED,
            });
        }
        if url.trim().is_empty() {
            errors.push(FieldError {
                field: "url",
                message: REQUIRED,
            });
        }
        if !errors.is_empty() {
            return Err(SupportError::Validation(errors));
        }

        let attachment = Attachment {
            id: uuid::Uuid::new_v4().to_string(),
            ticket_id: ticket_id.to_string(),
            file_name: file_name.trim().to_string(),
            url: url.trim().to_string(),
            created_at: Utc::now(),
        };

        let db = self.db.lock();
        if db.get_ticket(ticket_id)?.is_none() {
            return Err(SupportError::NotFound(format!("Ticket {ticket_id}")));
        }
        db.insert_attachment(&attachment)?;
        log::info!("Ticket {}: attachment {} added", ticket_id, attachment.file_name);
        Ok(attachment)
    }

    async fn mirror_create(&self, ticket: &Ticket) -> MirroredWrite {
        let Some(tabular) = &self.tabular else {
            return MirroredWrite::Skipped {
                reason: "tabular store not configured",
            };
        };
        let fields = TicketRecordFields::from_ticket(ticket);
        let record = match tabular.create_ticket_record(&fields).await {
            Ok(record) => record,
            Err(e) => return MirroredWrite::Failed(e.into()),
        };
        let stored = self.db.lock().set_ticket_external_id(&ticket.id, &record.id);
        match stored {
            Ok(_) => MirroredWrite::Written {
                record_id: record.id,
            },
            Err(e) => MirroredWrite::Failed(e.into()),
        }
    }

    async fn mirror_update(&self, ticket: &Ticket) -> MirroredWrite {
        let Some(tabular) = &self.tabular else {
            return MirroredWrite::Skipped {
                reason: "tabular store not configured",
            };
        };
        let Some(record_id) = ticket.external_record_id.as_deref() else {
            return MirroredWrite::Skipped {
                reason: "ticket has no tabular record",
            };
        };
        let fields = TicketRecordFields::from_ticket(ticket);
        match tabular.update_ticket_record(record_id, &fields).await {
            Ok(record) => MirroredWrite::Written {
                record_id: record.id,
            },
            Err(e) => MirroredWrite::Failed(e.into()),
        }
    }
}
