use crate::audit::AuditLogEntry;
use crate::error::{Error, Result};
use crate::models::{Document, Field, Recipient};
use crate::{DocumentId, RecipientId};

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

/// `document` locks the row until the transaction ends.
pub trait Transaction {
    fn document(&mut self, id: DocumentId) -> Result<Option<Document>>;
    fn insert_document(&mut self, document: &Document) -> Result<()>;
    fn update_document(&mut self, document: &Document) -> Result<()>;
    fn delete_document(&mut self, id: DocumentId) -> Result<()>;

    /// Ordered by `(signing_order, id)`.
    fn recipients(&mut self, document_id: DocumentId) -> Result<Vec<Recipient>>;
    fn insert_recipient(&mut self, recipient: &Recipient) -> Result<()>;
    fn update_recipient(&mut self, recipient: &Recipient) -> Result<()>;
    fn delete_recipient(&mut self, id: RecipientId) -> Result<()>;

    fn fields(&mut self, document_id: DocumentId) -> Result<Vec<Field>>;
    fn insert_field(&mut self, field: &Field) -> Result<()>;
    fn update_field(&mut self, field: &Field) -> Result<()>;

    fn append_audit(&mut self, entry: &AuditLogEntry) -> Result<()>;
    fn last_audit_entry(&mut self, document_id: DocumentId) -> Result<Option<AuditLogEntry>>;
    /// Ordered by sequence.
    fn audit_log(&mut self, document_id: DocumentId) -> Result<Vec<AuditLogEntry>>;
}

pub trait Store: Send + Sync {
    fn transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut dyn Transaction) -> Result<T>;
}

pub fn load_document(tx: &mut dyn Transaction, id: DocumentId) -> Result<Document> {
    match tx.document(id)? {
        Some(d) => Ok(d),
        None => Err(Error::NotFound(format!("document {}", id))),
    }
}

pub fn recipient_index(recipients: &[Recipient], id: RecipientId) -> Result<usize> {
    match recipients.iter().position(|r| r.id == id) {
        Some(i) => Ok(i),
        None => Err(Error::NotFound(format!("recipient {}", id))),
    }
}
