use std::convert::TryFrom;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use crate::audit::AuditLogEntry;
use crate::error::{Error, Result};
use crate::field::StoredValue;
use crate::models::{
    Actor, Document, DocumentStatus, Field, FieldType, FileRef, OrderMode, Position, Recipient, RecipientRole,
    RecipientStatus, SignerType, Size,
};
use crate::schema::{audit_log, documents, fields, recipients};
use crate::store::{Store, Transaction};
use crate::token::AccessToken;
use crate::{DocumentId, RecipientId};

embed_migrations!("./migrations");

pub type DbPool = r2d2::Pool<diesel::r2d2::ConnectionManager<diesel::PgConnection>>;

pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn connect(database_url: &str) -> Result<Self> {
        let manager = diesel::r2d2::ConnectionManager::<diesel::PgConnection>::new(database_url);
        let pool = r2d2::Pool::builder().build(manager)?;
        Ok(Self::new(pool))
    }

    pub fn from_config(config: &crate::Config) -> Result<Self> {
        match &config.database_url {
            Some(url) => Self::connect(url),
            None => Err(Error::Config("database_url must be set".to_string())),
        }
    }

    pub fn run_migrations(&self) -> Result<()> {
        let c = self.pool.get()?;
        embedded_migrations::run_with_output(&c, &mut std::io::stdout())
            .map_err(|err| Error::Storage(format!("Unable to run migrations: {}", err)))
    }
}

impl Store for PgStore {
    fn transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut dyn Transaction) -> Result<T>,
    {
        let c = self.pool.get()?;
        c.transaction::<T, Error, _>(|| f(&mut PgTransaction { c: &*c }))
    }
}

struct PgTransaction<'a> {
    c: &'a diesel::PgConnection,
}

#[derive(Insertable, Queryable, Identifiable, AsChangeset, Clone, Debug)]
#[table_name = "documents"]
#[changeset_options(treat_none_as_null = "true")]
struct DocumentRow {
    id: uuid::Uuid,
    title: String,
    description: Option<String>,
    owner_email: String,
    owner_name: String,
    status: DocumentStatus,
    order_mode: OrderMode,
    original_file_url: String,
    original_file_name: String,
    original_file_mime_type: String,
    original_file_sha512: String,
    signed_file_url: Option<String>,
    total_signers: i32,
    signed_count: i32,
    created_at: DateTime<Utc>,
    sent_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    voided_at: Option<DateTime<Utc>>,
    void_reason: Option<String>,
    declined_at: Option<DateTime<Utc>>,
    render_claimed_at: Option<DateTime<Utc>>,
}

impl From<&Document> for DocumentRow {
    fn from(d: &Document) -> Self {
        DocumentRow {
            id: d.id.uuid,
            title: d.title.clone(),
            description: d.description.clone(),
            owner_email: d.owner.email.clone(),
            owner_name: d.owner.name.clone(),
            status: d.status,
            order_mode: d.order_mode,
            original_file_url: d.original_file.url.clone(),
            original_file_name: d.original_file.name.clone(),
            original_file_mime_type: d.original_file.mime_type.clone(),
            original_file_sha512: d.original_file.sha512.clone(),
            signed_file_url: d.signed_file_url.clone(),
            total_signers: d.total_signers as i32,
            signed_count: d.signed_count as i32,
            created_at: d.created_at,
            sent_at: d.sent_at,
            completed_at: d.completed_at,
            voided_at: d.voided_at,
            void_reason: d.void_reason.clone(),
            declined_at: d.declined_at,
            render_claimed_at: d.render_claimed_at,
        }
    }
}

impl From<DocumentRow> for Document {
    fn from(r: DocumentRow) -> Self {
        Document {
            id: r.id.into(),
            title: r.title,
            description: r.description,
            owner: Actor {
                email: r.owner_email,
                name: r.owner_name,
            },
            status: r.status,
            order_mode: r.order_mode,
            original_file: FileRef {
                url: r.original_file_url,
                name: r.original_file_name,
                mime_type: r.original_file_mime_type,
                sha512: r.original_file_sha512,
            },
            signed_file_url: r.signed_file_url,
            total_signers: r.total_signers.max(0) as u32,
            signed_count: r.signed_count.max(0) as u32,
            created_at: r.created_at,
            sent_at: r.sent_at,
            completed_at: r.completed_at,
            voided_at: r.voided_at,
            void_reason: r.void_reason,
            declined_at: r.declined_at,
            render_claimed_at: r.render_claimed_at,
        }
    }
}

#[derive(Insertable, Queryable, Identifiable, AsChangeset, Clone, Debug)]
#[table_name = "recipients"]
#[changeset_options(treat_none_as_null = "true")]
struct RecipientRow {
    id: uuid::Uuid,
    document_id: uuid::Uuid,
    name: String,
    email: String,
    role: RecipientRole,
    signer_type: Option<SignerType>,
    signing_order: i32,
    status: RecipientStatus,
    token: Option<String>,
    token_issued_at: Option<DateTime<Utc>>,
    token_expires_at: Option<DateTime<Utc>>,
    decline_reason: Option<String>,
    ip_address: Option<String>,
    user_agent: Option<String>,
    sent_at: Option<DateTime<Utc>>,
    viewed_at: Option<DateTime<Utc>>,
    signed_at: Option<DateTime<Utc>>,
    declined_at: Option<DateTime<Utc>>,
}

impl From<&Recipient> for RecipientRow {
    fn from(r: &Recipient) -> Self {
        RecipientRow {
            id: r.id.uuid,
            document_id: r.document_id.uuid,
            name: r.name.clone(),
            email: r.email.clone(),
            role: r.role,
            signer_type: r.signer_type,
            signing_order: r.signing_order,
            status: r.status,
            token: r.token.as_ref().map(|t| t.value.clone()),
            token_issued_at: r.token.as_ref().map(|t| t.issued_at),
            token_expires_at: r.token.as_ref().map(|t| t.expires_at),
            decline_reason: r.decline_reason.clone(),
            ip_address: r.ip_address.clone(),
            user_agent: r.user_agent.clone(),
            sent_at: r.sent_at,
            viewed_at: r.viewed_at,
            signed_at: r.signed_at,
            declined_at: r.declined_at,
        }
    }
}

impl From<RecipientRow> for Recipient {
    fn from(r: RecipientRow) -> Self {
        let token = match (r.token, r.token_issued_at, r.token_expires_at) {
            (Some(value), Some(issued_at), Some(expires_at)) => Some(AccessToken {
                value,
                issued_at,
                expires_at,
            }),
            _ => None,
        };
        Recipient {
            id: r.id.into(),
            document_id: r.document_id.into(),
            name: r.name,
            email: r.email,
            role: r.role,
            signer_type: r.signer_type,
            signing_order: r.signing_order,
            status: r.status,
            token,
            decline_reason: r.decline_reason,
            ip_address: r.ip_address,
            user_agent: r.user_agent,
            sent_at: r.sent_at,
            viewed_at: r.viewed_at,
            signed_at: r.signed_at,
            declined_at: r.declined_at,
        }
    }
}

#[derive(Insertable, Queryable, Identifiable, AsChangeset, Clone, Debug)]
#[table_name = "fields"]
#[changeset_options(treat_none_as_null = "true")]
struct FieldRow {
    id: uuid::Uuid,
    document_id: uuid::Uuid,
    recipient_id: uuid::Uuid,
    field_type: FieldType,
    label: Option<String>,
    placeholder: Option<String>,
    options: Vec<String>,
    required: bool,
    page: i32,
    pos_x: f64,
    pos_y: f64,
    width: f64,
    height: f64,
    value: Option<serde_json::Value>,
    filled_at: Option<DateTime<Utc>>,
}

impl TryFrom<&Field> for FieldRow {
    type Error = Error;

    fn try_from(f: &Field) -> Result<Self> {
        Ok(FieldRow {
            id: f.id.uuid,
            document_id: f.document_id.uuid,
            recipient_id: f.recipient_id.uuid,
            field_type: f.field_type,
            label: f.label.clone(),
            placeholder: f.placeholder.clone(),
            options: f.options.clone(),
            required: f.required,
            page: f.page as i32,
            pos_x: f.position.x,
            pos_y: f.position.y,
            width: f.size.width,
            height: f.size.height,
            value: f.value.as_ref().map(serde_json::to_value).transpose()?,
            filled_at: f.filled_at,
        })
    }
}

impl TryFrom<FieldRow> for Field {
    type Error = Error;

    fn try_from(r: FieldRow) -> Result<Self> {
        let value = match r.value {
            Some(v) => Some(serde_json::from_value::<StoredValue>(v)?),
            None => None,
        };
        Ok(Field {
            id: r.id.into(),
            document_id: r.document_id.into(),
            recipient_id: r.recipient_id.into(),
            field_type: r.field_type,
            label: r.label,
            placeholder: r.placeholder,
            options: r.options,
            required: r.required,
            page: r.page.max(0) as u32,
            position: Position { x: r.pos_x, y: r.pos_y },
            size: Size {
                width: r.width,
                height: r.height,
            },
            value,
            filled_at: r.filled_at,
        })
    }
}

#[derive(Insertable, Queryable, Clone, Debug)]
#[table_name = "audit_log"]
struct AuditRow {
    id: uuid::Uuid,
    document_id: uuid::Uuid,
    recipient_id: Option<uuid::Uuid>,
    sequence: i64,
    timestamp: DateTime<Utc>,
    action: String,
    details: serde_json::Value,
    actor_email: String,
    actor_name: String,
    ip_address: Option<String>,
    user_agent: Option<String>,
    geolocation: Option<String>,
    previous_hash: Option<String>,
    hash: String,
}

impl From<&AuditLogEntry> for AuditRow {
    fn from(e: &AuditLogEntry) -> Self {
        AuditRow {
            id: e.id.uuid,
            document_id: e.document_id.uuid,
            recipient_id: e.recipient_id.map(|r| r.uuid),
            sequence: e.sequence as i64,
            timestamp: e.timestamp,
            action: e.action.as_str().to_string(),
            details: e.details.clone(),
            actor_email: e.actor_email.clone(),
            actor_name: e.actor_name.clone(),
            ip_address: e.ip_address.clone(),
            user_agent: e.user_agent.clone(),
            geolocation: e.geolocation.clone(),
            previous_hash: e.previous_hash.clone(),
            hash: e.hash.clone(),
        }
    }
}

impl TryFrom<AuditRow> for AuditLogEntry {
    type Error = Error;

    fn try_from(r: AuditRow) -> Result<Self> {
        Ok(AuditLogEntry {
            id: r.id.into(),
            document_id: r.document_id.into(),
            recipient_id: r.recipient_id.map(Into::into),
            sequence: r.sequence.max(0) as u64,
            timestamp: r.timestamp,
            action: r.action.parse()?,
            details: r.details,
            actor_email: r.actor_email,
            actor_name: r.actor_name,
            ip_address: r.ip_address,
            user_agent: r.user_agent,
            geolocation: r.geolocation,
            previous_hash: r.previous_hash,
            hash: r.hash,
        })
    }
}

fn expect_one(updated: usize, what: &str) -> Result<()> {
    match updated {
        1 => Ok(()),
        0 => Err(Error::NotFound(what.to_string())),
        n => Err(Error::Storage(format!("{} rows updated for one {}", n, what))),
    }
}

impl Transaction for PgTransaction<'_> {
    fn document(&mut self, id: DocumentId) -> Result<Option<Document>> {
        let row = documents::dsl::documents
            .find(id.uuid)
            .for_update()
            .first::<DocumentRow>(self.c)
            .optional()?;
        Ok(row.map(Into::into))
    }

    fn insert_document(&mut self, document: &Document) -> Result<()> {
        diesel::insert_into(documents::dsl::documents)
            .values(&DocumentRow::from(document))
            .execute(self.c)?;
        Ok(())
    }

    fn update_document(&mut self, document: &Document) -> Result<()> {
        let updated = diesel::update(documents::dsl::documents.find(document.id.uuid))
            .set(&DocumentRow::from(document))
            .execute(self.c)?;
        expect_one(updated, "document")
    }

    fn delete_document(&mut self, id: DocumentId) -> Result<()> {
        diesel::delete(fields::dsl::fields.filter(fields::dsl::document_id.eq(id.uuid))).execute(self.c)?;
        diesel::delete(recipients::dsl::recipients.filter(recipients::dsl::document_id.eq(id.uuid)))
            .execute(self.c)?;
        diesel::delete(documents::dsl::documents.find(id.uuid)).execute(self.c)?;
        Ok(())
    }

    fn recipients(&mut self, document_id: DocumentId) -> Result<Vec<Recipient>> {
        let rows = recipients::dsl::recipients
            .filter(recipients::dsl::document_id.eq(document_id.uuid))
            .order_by((recipients::dsl::signing_order.asc(), recipients::dsl::id.asc()))
            .load::<RecipientRow>(self.c)?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    fn insert_recipient(&mut self, recipient: &Recipient) -> Result<()> {
        diesel::insert_into(recipients::dsl::recipients)
            .values(&RecipientRow::from(recipient))
            .execute(self.c)?;
        Ok(())
    }

    fn update_recipient(&mut self, recipient: &Recipient) -> Result<()> {
        let updated = diesel::update(recipients::dsl::recipients.find(recipient.id.uuid))
            .set(&RecipientRow::from(recipient))
            .execute(self.c)?;
        expect_one(updated, "recipient")
    }

    fn delete_recipient(&mut self, id: RecipientId) -> Result<()> {
        diesel::delete(fields::dsl::fields.filter(fields::dsl::recipient_id.eq(id.uuid))).execute(self.c)?;
        diesel::delete(recipients::dsl::recipients.find(id.uuid)).execute(self.c)?;
        Ok(())
    }

    fn fields(&mut self, document_id: DocumentId) -> Result<Vec<Field>> {
        let rows = fields::dsl::fields
            .filter(fields::dsl::document_id.eq(document_id.uuid))
            .order_by((fields::dsl::page.asc(), fields::dsl::id.asc()))
            .load::<FieldRow>(self.c)?;
        rows.into_iter().map(Field::try_from).collect()
    }

    fn insert_field(&mut self, field: &Field) -> Result<()> {
        diesel::insert_into(fields::dsl::fields)
            .values(&FieldRow::try_from(field)?)
            .execute(self.c)?;
        Ok(())
    }

    fn update_field(&mut self, field: &Field) -> Result<()> {
        let updated = diesel::update(fields::dsl::fields.find(field.id.uuid))
            .set(&FieldRow::try_from(field)?)
            .execute(self.c)?;
        expect_one(updated, "field")
    }

    fn append_audit(&mut self, entry: &AuditLogEntry) -> Result<()> {
        diesel::insert_into(audit_log::dsl::audit_log)
            .values(&AuditRow::from(entry))
            .execute(self.c)?;
        Ok(())
    }

    fn last_audit_entry(&mut self, document_id: DocumentId) -> Result<Option<AuditLogEntry>> {
        let row = audit_log::dsl::audit_log
            .filter(audit_log::dsl::document_id.eq(document_id.uuid))
            .order_by(audit_log::dsl::sequence.desc())
            .first::<AuditRow>(self.c)
            .optional()?;
        row.map(AuditLogEntry::try_from).transpose()
    }

    fn audit_log(&mut self, document_id: DocumentId) -> Result<Vec<AuditLogEntry>> {
        let rows = audit_log::dsl::audit_log
            .filter(audit_log::dsl::document_id.eq(document_id.uuid))
            .order_by(audit_log::dsl::sequence.asc())
            .load::<AuditRow>(self.c)?;
        rows.into_iter().map(AuditLogEntry::try_from).collect()
    }
}
