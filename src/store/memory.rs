use std::sync::Mutex;
use crate::audit::AuditLogEntry;
use crate::error::{Error, Result};
use crate::models::{Document, Field, Recipient};
use crate::store::{Store, Transaction};
use crate::{DocumentId, RecipientId};

#[derive(Default, Clone)]
struct Tables {
    documents: Vec<Document>,
    recipients: Vec<Recipient>,
    fields: Vec<Field>,
    audit: Vec<AuditLogEntry>,
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Store for MemoryStore {
    fn transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut dyn Transaction) -> Result<T>,
    {
        let mut committed = self
            .tables
            .lock()
            .map_err(|_| Error::Storage("store lock poisoned".to_string()))?;
        let mut working = committed.clone();
        let out = f(&mut MemoryTransaction { tables: &mut working })?;
        *committed = working;
        Ok(out)
    }
}

struct MemoryTransaction<'a> {
    tables: &'a mut Tables,
}

fn replace<T, F: Fn(&T) -> bool>(rows: &mut [T], row: &T, matches: F, what: &str) -> Result<()>
where
    T: Clone,
{
    match rows.iter_mut().find(|r| matches(r)) {
        Some(slot) => {
            *slot = row.clone();
            Ok(())
        }
        None => Err(Error::NotFound(what.to_string())),
    }
}

impl Transaction for MemoryTransaction<'_> {
    fn document(&mut self, id: DocumentId) -> Result<Option<Document>> {
        Ok(self.tables.documents.iter().find(|d| d.id == id).cloned())
    }

    fn insert_document(&mut self, document: &Document) -> Result<()> {
        if self.tables.documents.iter().any(|d| d.id == document.id) {
            return Err(Error::Storage(format!("duplicate document {}", document.id)));
        }
        self.tables.documents.push(document.clone());
        Ok(())
    }

    fn update_document(&mut self, document: &Document) -> Result<()> {
        replace(&mut self.tables.documents, document, |d| d.id == document.id, "document")
    }

    fn delete_document(&mut self, id: DocumentId) -> Result<()> {
        self.tables.fields.retain(|f| f.document_id != id);
        self.tables.recipients.retain(|r| r.document_id != id);
        self.tables.documents.retain(|d| d.id != id);
        Ok(())
    }

    fn recipients(&mut self, document_id: DocumentId) -> Result<Vec<Recipient>> {
        let mut out: Vec<Recipient> = self
            .tables
            .recipients
            .iter()
            .filter(|r| r.document_id == document_id)
            .cloned()
            .collect();
        out.sort_by_key(|r| (r.signing_order, r.id));
        Ok(out)
    }

    fn insert_recipient(&mut self, recipient: &Recipient) -> Result<()> {
        if self.tables.recipients.iter().any(|r| r.id == recipient.id) {
            return Err(Error::Storage(format!("duplicate recipient {}", recipient.id)));
        }
        self.tables.recipients.push(recipient.clone());
        Ok(())
    }

    fn update_recipient(&mut self, recipient: &Recipient) -> Result<()> {
        replace(&mut self.tables.recipients, recipient, |r| r.id == recipient.id, "recipient")
    }

    fn delete_recipient(&mut self, id: RecipientId) -> Result<()> {
        self.tables.fields.retain(|f| f.recipient_id != id);
        self.tables.recipients.retain(|r| r.id != id);
        Ok(())
    }

    fn fields(&mut self, document_id: DocumentId) -> Result<Vec<Field>> {
        Ok(self
            .tables
            .fields
            .iter()
            .filter(|f| f.document_id == document_id)
            .cloned()
            .collect())
    }

    fn insert_field(&mut self, field: &Field) -> Result<()> {
        if self.tables.fields.iter().any(|f| f.id == field.id) {
            return Err(Error::Storage(format!("duplicate field {}", field.id)));
        }
        self.tables.fields.push(field.clone());
        Ok(())
    }

    fn update_field(&mut self, field: &Field) -> Result<()> {
        replace(&mut self.tables.fields, field, |f| f.id == field.id, "field")
    }

    fn append_audit(&mut self, entry: &AuditLogEntry) -> Result<()> {
        if self
            .tables
            .audit
            .iter()
            .any(|e| e.document_id == entry.document_id && e.sequence == entry.sequence)
        {
            return Err(Error::Storage(format!(
                "audit entry {} already exists for {}", entry.sequence, entry.document_id
            )));
        }
        self.tables.audit.push(entry.clone());
        Ok(())
    }

    fn last_audit_entry(&mut self, document_id: DocumentId) -> Result<Option<AuditLogEntry>> {
        Ok(self
            .tables
            .audit
            .iter()
            .filter(|e| e.document_id == document_id)
            .max_by_key(|e| e.sequence)
            .cloned())
    }

    fn audit_log(&mut self, document_id: DocumentId) -> Result<Vec<AuditLogEntry>> {
        let mut out: Vec<AuditLogEntry> = self
            .tables
            .audit
            .iter()
            .filter(|e| e.document_id == document_id)
            .cloned()
            .collect();
        out.sort_by_key(|e| e.sequence);
        Ok(out)
    }
}
