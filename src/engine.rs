use std::sync::Arc;
use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use crate::audit::{self, AuditAction, AuditEvent, AuditLogEntry, ClientMeta, SigningLog};
use crate::clock::{Clock, SystemClock};
use crate::config::EngineSettings;
use crate::error::{Error, Result};
use crate::files::BlobStore;
use crate::models::{
    Actor, Document, DocumentStatus, Field, FieldPlacement, FileRef, NewDocument, NewRecipient, Recipient,
    RecipientStatus,
};
use crate::notify::{NotificationEvent, NotificationPayload, Notifier};
use crate::render::Renderer;
use crate::store::{load_document, recipient_index, Store, Transaction};
use crate::token::AccessToken;
use crate::{order, DocumentId, FieldId, RecipientId};

/// What a recipient presents to act on a document: the ids from their link
/// and the token from its `key` parameter.
#[derive(Debug, Clone, Deserialize)]
pub struct RecipientAccess {
    pub document_id: DocumentId,
    pub recipient_id: RecipientId,
    pub token: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SigningView {
    pub document: Document,
    pub recipient: Recipient,
    pub fields: Vec<Field>,
}

#[derive(Debug)]
pub enum Completion {
    NotReady,
    /// Another caller is producing the signed copy.
    Rendering,
    Completed,
    /// Every signer has signed but the signed copy couldn't be produced.
    /// Retry with [`Engine::check_completion`].
    Deferred(Error),
}

#[derive(Debug)]
pub struct SignOutcome {
    pub recipient: Recipient,
    pub document: Document,
    pub completion: Completion,
}

struct Outgoing {
    email: String,
    event: NotificationEvent,
    payload: NotificationPayload,
}

enum Finished {
    NotReady,
    Rendering,
    Completed(Document),
}

fn render_claim_timeout() -> Duration {
    Duration::minutes(10)
}

pub struct Engine<S: Store> {
    settings: EngineSettings,
    store: S,
    blobs: Arc<dyn BlobStore>,
    renderer: Arc<dyn Renderer>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
}

fn rejected<T>(operation: &str, res: Result<T>) -> Result<T> {
    if let Err(err) = &res {
        debug!("Rejected {}: {}", operation, err);
    }
    res
}

impl<S: Store> Engine<S> {
    pub fn new(
        settings: EngineSettings, store: S, blobs: Arc<dyn BlobStore>, renderer: Arc<dyn Renderer>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            settings,
            store,
            blobs,
            renderer,
            notifier,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    fn new_token(&self, now: DateTime<Utc>) -> AccessToken {
        AccessToken::generate(now, self.settings.token_validity)
    }

    pub fn signing_link(&self, document_id: DocumentId, recipient_id: RecipientId, token: &AccessToken) -> String {
        format!(
            "{}/document/{}/sign/{}?key={}",
            self.settings.external_uri, document_id, recipient_id, token.value
        )
    }

    fn payload(&self, document: &Document, recipient_name: &str) -> NotificationPayload {
        NotificationPayload {
            document_id: document.id,
            document_title: document.title.clone(),
            recipient_name: recipient_name.to_string(),
            signing_link: None,
            view_only: false,
            reason: None,
            signed_file_url: document.signed_file_url.clone(),
        }
    }

    fn access_notice(&self, document: &Document, recipient: &Recipient) -> Option<Outgoing> {
        let token = recipient.token.as_ref()?;
        let mut payload = self.payload(document, &recipient.name);
        payload.signing_link = Some(self.signing_link(document.id, recipient.id, token));
        payload.view_only = !recipient.is_signer();
        Some(Outgoing {
            email: recipient.email.clone(),
            event: NotificationEvent::Sent,
            payload,
        })
    }

    async fn dispatch(&self, outgoing: Vec<Outgoing>) {
        for n in outgoing {
            if let Err(err) = self.notifier.notify(&n.email, n.event, &n.payload).await {
                warn!("Unable to notify {} of {:?} on {}: {}", n.email, n.event, n.payload.document_id, err);
            }
        }
    }

    /// The token is checked before anything about the recipient's status is
    /// revealed.
    fn authorize(
        &self, recipients: &[Recipient], access: &RecipientAccess, now: DateTime<Utc>,
    ) -> Result<usize> {
        let idx = recipient_index(recipients, access.recipient_id)?;
        let recipient = &recipients[idx];
        recipient.authenticate(&access.token, now)?;
        if recipient.is_signer() && recipient.status == RecipientStatus::Pending {
            return Err(Error::PreconditionFailed("recipient has not been activated yet".to_string()));
        }
        Ok(idx)
    }

    pub async fn create_document(&self, new: NewDocument) -> Result<Document> {
        rejected("create_document", self.create_document_inner(new).await)
    }

    async fn create_document_inner(&self, new: NewDocument) -> Result<Document> {
        if new.title.trim().is_empty() {
            return Err(Error::Validation("document title must not be empty".to_string()));
        }
        if new.file_bytes.is_empty() {
            return Err(Error::Validation("document file is empty".to_string()));
        }
        // check recipients before anything is uploaded
        let placeholder = DocumentId::new();
        for r in &new.recipients {
            Recipient::new(placeholder, r)?;
        }

        let sha512 = hex::encode(crate::hash_slice(&new.file_bytes));
        let url = self.blobs.upload(new.file_bytes, &new.file_name, &new.mime_type).await?;
        let now = self.now();
        let mut document = Document::new(
            &new.title,
            new.description,
            new.owner,
            new.order_mode,
            FileRef {
                url,
                name: new.file_name,
                mime_type: new.mime_type,
                sha512,
            },
            now,
        )?;
        let recipients = new
            .recipients
            .iter()
            .map(|r| Recipient::new(document.id, r))
            .collect::<Result<Vec<_>>>()?;
        document.recount(&recipients);

        let document = self.store.transaction(|tx| {
            tx.insert_document(&document)?;
            audit::append(
                tx,
                document.id,
                AuditEvent::new(AuditAction::DocumentCreated, &document.owner).details(json!({
                    "title": document.title,
                    "order_mode": document.order_mode,
                    "sha512": document.original_file.sha512,
                })),
                now,
            )?;
            for r in &recipients {
                tx.insert_recipient(r)?;
                audit::append(tx, document.id, recipient_added(&document.owner, r), now)?;
            }
            Ok(document)
        })?;
        info!("Created document {} with {} recipients", document.id, recipients.len());
        Ok(document)
    }

    pub fn add_recipient(&self, document_id: DocumentId, new: NewRecipient) -> Result<Recipient> {
        let now = self.now();
        let res = self.store.transaction(|tx| {
            let mut document = load_document(tx, document_id)?;
            document.ensure_draft()?;
            let recipient = Recipient::new(document_id, &new)?;
            tx.insert_recipient(&recipient)?;
            document.recount(&tx.recipients(document_id)?);
            tx.update_document(&document)?;
            audit::append(tx, document_id, recipient_added(&document.owner, &recipient), now)?;
            Ok(recipient)
        });
        let recipient = rejected("add_recipient", res)?;
        info!("Added recipient {} to {}", recipient.id, document_id);
        Ok(recipient)
    }

    pub fn remove_recipient(&self, document_id: DocumentId, recipient_id: RecipientId) -> Result<()> {
        let now = self.now();
        let res = self.store.transaction(|tx| {
            let mut document = load_document(tx, document_id)?;
            document.ensure_draft()?;
            let recipients = tx.recipients(document_id)?;
            let idx = recipient_index(&recipients, recipient_id)?;
            let removed_fields = tx.fields(document_id)?.iter().filter(|f| f.recipient_id == recipient_id).count();
            tx.delete_recipient(recipient_id)?;
            document.recount(&tx.recipients(document_id)?);
            tx.update_document(&document)?;
            audit::append(
                tx,
                document_id,
                AuditEvent::new(AuditAction::RecipientRemoved, &document.owner)
                    .recipient(recipient_id)
                    .details(json!({
                        "email": recipients[idx].email,
                        "removed_fields": removed_fields,
                    })),
                now,
            )?;
            Ok(())
        });
        rejected("remove_recipient", res)?;
        info!("Removed recipient {} from {}", recipient_id, document_id);
        Ok(())
    }

    pub fn place_field(&self, document_id: DocumentId, placement: FieldPlacement) -> Result<Field> {
        let now = self.now();
        let res = self.store.transaction(|tx| {
            let document = load_document(tx, document_id)?;
            document.ensure_draft()?;
            let recipients = tx.recipients(document_id)?;
            let owner = match recipients.iter().find(|r| r.id == placement.recipient_id) {
                Some(r) => r,
                None => return Err(Error::Validation("recipient does not belong to this document".to_string())),
            };
            let field = Field::place(document_id, &placement, owner)?;
            tx.insert_field(&field)?;
            audit::append(
                tx,
                document_id,
                AuditEvent::new(AuditAction::FieldPlaced, &document.owner)
                    .recipient(owner.id)
                    .details(json!({
                        "field_id": field.id,
                        "field_type": field.field_type,
                        "page": field.page,
                        "required": field.required,
                    })),
                now,
            )?;
            Ok(field)
        });
        let field = rejected("place_field", res)?;
        debug!("Placed {} field {} on {}", field.field_type, field.id, document_id);
        Ok(field)
    }

    /// Every signer gets a token; only those the order mode lets start are
    /// moved to `sent` and notified.
    pub async fn send_document(&self, document_id: DocumentId) -> Result<Document> {
        let now = self.now();
        let res = self.store.transaction(|tx| {
            let mut document = load_document(tx, document_id)?;
            let mut recipients = tx.recipients(document_id)?;
            let fields = tx.fields(document_id)?;
            document.validate_send(&recipients, &fields)?;
            document.mark_sent(now)?;
            audit::append(
                tx,
                document_id,
                AuditEvent::new(AuditAction::DocumentSent, &document.owner).details(json!({
                    "order_mode": document.order_mode,
                    "total_signers": document.total_signers,
                })),
                now,
            )?;

            let mut outgoing = vec![];
            let activate = order::initial_activation(document.order_mode, &recipients);
            for recipient in recipients.iter_mut() {
                let view_only = !recipient.is_signer();
                if view_only {
                    recipient.grant_view_access(self.new_token(now), now)?;
                } else if activate.contains(&recipient.id) {
                    recipient.activate(self.new_token(now), now)?;
                } else {
                    recipient.reserve_token(self.new_token(now))?;
                    tx.update_recipient(recipient)?;
                    continue;
                }
                tx.update_recipient(recipient)?;
                audit::append(tx, document_id, recipient_sent(&document.owner, recipient, view_only), now)?;
                outgoing.extend(self.access_notice(&document, recipient));
            }

            document.recount(&recipients);
            tx.update_document(&document)?;
            debug_assert!(document.is_consistent());
            Ok((document, outgoing))
        });
        let (document, outgoing) = rejected("send_document", res)?;
        info!("Sent document {} ({} notifications)", document_id, outgoing.len());
        self.dispatch(outgoing).await;
        Ok(document)
    }

    pub fn view(&self, access: &RecipientAccess, meta: &ClientMeta) -> Result<SigningView> {
        let now = self.now();
        let res = self.store.transaction(|tx| {
            let mut document = load_document(tx, access.document_id)?;
            ensure_not_closed(&document)?;
            let mut recipients = tx.recipients(document.id)?;
            let idx = self.authorize(&recipients, access, now)?;
            if !order::may_view(&document, &recipients[idx]) {
                return Err(Error::PreconditionFailed("document is not available yet".to_string()));
            }

            let recipient = &mut recipients[idx];
            let transitioned = recipient.mark_viewed(now, meta)?;
            tx.update_recipient(recipient)?;
            audit::append(
                tx,
                document.id,
                AuditEvent::new(AuditAction::RecipientViewed, &actor_of(recipient))
                    .recipient(recipient.id)
                    .client(meta)
                    .details(json!({ "first_view": transitioned })),
                now,
            )?;
            if transitioned {
                info!("Recipient {} viewed {}", recipient.id, document.id);
            }
            let recipient = recipient.clone();

            if transitioned && recipient.is_signer() && document.mark_in_progress() {
                tx.update_document(&document)?;
                audit::append(
                    tx,
                    document.id,
                    AuditEvent::new(AuditAction::DocumentInProgress, &audit::system_actor()).recipient(recipient.id),
                    now,
                )?;
                info!("Document {} in progress", document.id);
            }

            let fields = own_fields(tx.fields(document.id)?, recipient.id);
            Ok(SigningView {
                document,
                recipient,
                fields,
            })
        });
        rejected("view", res)
    }

    pub fn fields_for_recipient(&self, access: &RecipientAccess) -> Result<Vec<Field>> {
        let now = self.now();
        let res = self.store.transaction(|tx| {
            let document = load_document(tx, access.document_id)?;
            ensure_not_closed(&document)?;
            let recipients = tx.recipients(document.id)?;
            let idx = self.authorize(&recipients, access, now)?;
            Ok(own_fields(tx.fields(document.id)?, recipients[idx].id))
        });
        rejected("fields_for_recipient", res)
    }

    pub fn set_field_value(
        &self, access: &RecipientAccess, field_id: FieldId, raw_value: &str, meta: &ClientMeta,
    ) -> Result<Field> {
        let now = self.now();
        let res = self.store.transaction(|tx| {
            let document = load_document(tx, access.document_id)?;
            document.ensure_open()?;
            let recipients = tx.recipients(document.id)?;
            let idx = self.authorize(&recipients, access, now)?;
            let recipient = &recipients[idx];

            let mut field = match tx.fields(document.id)?.into_iter().find(|f| f.id == field_id) {
                Some(f) => f,
                None => return Err(Error::NotFound(format!("field {}", field_id))),
            };
            field.check_writable_by(recipient)?;
            let refill = field.is_filled();
            field.fill(raw_value, now)?;
            tx.update_field(&field)?;
            audit::append(
                tx,
                document.id,
                AuditEvent::new(AuditAction::FieldFilled, &actor_of(recipient))
                    .recipient(recipient.id)
                    .client(meta)
                    .details(json!({
                        "field_id": field.id,
                        "field_type": field.field_type,
                        "refill": refill,
                    })),
                now,
            )?;
            Ok(field)
        });
        let field = rejected("set_field_value", res)?;
        debug!("Field {} filled by {}", field.id, access.recipient_id);
        Ok(field)
    }

    pub fn is_recipient_complete(&self, document_id: DocumentId, recipient_id: RecipientId) -> Result<bool> {
        self.store.transaction(|tx| {
            load_document(tx, document_id)?;
            recipient_index(&tx.recipients(document_id)?, recipient_id)?;
            Ok(crate::field::is_recipient_complete(recipient_id, &tx.fields(document_id)?))
        })
    }

    pub async fn finish_signing(&self, access: &RecipientAccess, meta: &ClientMeta) -> Result<SignOutcome> {
        let now = self.now();
        let res = self.store.transaction(|tx| {
            let mut document = load_document(tx, access.document_id)?;
            document.ensure_open()?;
            let mut recipients = tx.recipients(document.id)?;
            let idx = self.authorize(&recipients, access, now)?;
            let complete = crate::field::is_recipient_complete(access.recipient_id, &tx.fields(document.id)?);

            let recipient = &mut recipients[idx];
            recipient.mark_signed(complete, now, meta)?;
            tx.update_recipient(recipient)?;
            audit::append(
                tx,
                document.id,
                AuditEvent::new(AuditAction::RecipientSigned, &actor_of(recipient))
                    .recipient(recipient.id)
                    .client(meta),
                now,
            )?;
            let signed = recipient.clone();

            if document.mark_in_progress() {
                audit::append(
                    tx,
                    document.id,
                    AuditEvent::new(AuditAction::DocumentInProgress, &audit::system_actor()).recipient(signed.id),
                    now,
                )?;
            }

            let mut outgoing = vec![];
            if let Some(next_id) = order::next_to_activate(document.order_mode, &recipients) {
                let next_idx = recipient_index(&recipients, next_id)?;
                let next = &mut recipients[next_idx];
                next.activate(self.new_token(now), now)?;
                tx.update_recipient(next)?;
                audit::append(
                    tx,
                    document.id,
                    recipient_sent(&audit::system_actor(), next, false)
                        .details(json!({ "view_only": false, "after": signed.id })),
                    now,
                )?;
                info!("Activated next signer {} on {}", next.id, document.id);
                outgoing.extend(self.access_notice(&document, next));
            }

            document.recount(&recipients);
            tx.update_document(&document)?;
            debug_assert!(document.is_consistent());
            Ok((signed, document, outgoing))
        });
        let (recipient, document, outgoing) = rejected("finish_signing", res)?;
        info!(
            "Recipient {} signed {} ({}/{})",
            recipient.id, document.id, document.signed_count, document.total_signers
        );
        self.dispatch(outgoing).await;

        if !document.ready_to_complete() {
            return Ok(SignOutcome {
                recipient,
                document,
                completion: Completion::NotReady,
            });
        }
        let (document, completion) = match self.complete(document.id).await {
            Ok(Finished::Completed(completed)) => (completed, Completion::Completed),
            Ok(Finished::Rendering) => (document, Completion::Rendering),
            Ok(Finished::NotReady) => (document, Completion::NotReady),
            Err(err) => {
                warn!("Completion of {} deferred: {}", document.id, err);
                (document, Completion::Deferred(err))
            }
        };
        Ok(SignOutcome {
            recipient,
            document,
            completion,
        })
    }

    /// Safe to call repeatedly and concurrently; the renderer runs for at
    /// most one caller at a time.
    pub async fn check_completion(&self, document_id: DocumentId) -> Result<Completion> {
        match self.complete(document_id).await {
            Ok(Finished::Completed(_)) => Ok(Completion::Completed),
            Ok(Finished::Rendering) => Ok(Completion::Rendering),
            Ok(Finished::NotReady) => Ok(Completion::NotReady),
            Err(err) => {
                warn!("Completion of {} failed: {}", document_id, err);
                Err(err)
            }
        }
    }

    async fn complete(&self, document_id: DocumentId) -> Result<Finished> {
        let claimed_at = self.now();
        let claimed = self.store.transaction(|tx| {
            let mut document = load_document(tx, document_id)?;
            if !document.ready_to_complete() {
                return Ok(Err(Finished::NotReady));
            }
            if !document.claim_render(claimed_at, render_claim_timeout()) {
                return Ok(Err(Finished::Rendering));
            }
            tx.update_document(&document)?;
            let fields = tx.fields(document_id)?;
            Ok(Ok((document, fields)))
        })?;
        let (document, fields) = match claimed {
            Ok(c) => c,
            Err(skipped) => return Ok(skipped),
        };
        debug!("Rendering signed copy of {}", document_id);

        let (signed_url, signed_hash) = match self.render_signed(&document, &fields).await {
            Ok(r) => r,
            Err(err) => {
                self.release_render(document_id, claimed_at);
                return Err(err);
            }
        };

        let now = self.now();
        let res = self.store.transaction(|tx| {
            let mut document = load_document(tx, document_id)?;
            // closed or taken over while rendering
            if !document.holds_render_claim(claimed_at) || !document.ready_to_complete() {
                return Ok(None);
            }
            document.mark_completed(signed_url.clone(), now)?;
            tx.update_document(&document)?;
            audit::append(
                tx,
                document_id,
                AuditEvent::new(AuditAction::DocumentCompleted, &audit::system_actor()).details(json!({
                    "signed_file_url": signed_url,
                    "sha512": signed_hash,
                    "signers": document.total_signers,
                })),
                now,
            )?;
            debug_assert!(document.is_consistent());

            let mut outgoing = vec![Outgoing {
                email: document.owner.email.clone(),
                event: NotificationEvent::Completed,
                payload: self.payload(&document, &document.owner.name),
            }];
            for r in tx.recipients(document_id)? {
                outgoing.push(Outgoing {
                    email: r.email.clone(),
                    event: NotificationEvent::Completed,
                    payload: self.payload(&document, &r.name),
                });
            }
            Ok(Some((document, outgoing)))
        })?;

        match res {
            Some((document, outgoing)) => {
                info!("Completed document {}", document_id);
                self.dispatch(outgoing).await;
                Ok(Finished::Completed(document))
            }
            None => {
                debug!("Discarding render of {}, document changed while rendering", document_id);
                Ok(Finished::NotReady)
            }
        }
    }

    async fn render_signed(&self, document: &Document, fields: &[Field]) -> Result<(String, String)> {
        let pages = crate::render::plan(fields);
        let signed_url = match self.renderer.render(&document.original_file.url, &pages).await {
            Ok(u) => u,
            Err(Error::RenderFailure(e)) => return Err(Error::RenderFailure(e)),
            Err(err) => return Err(Error::RenderFailure(err.to_string())),
        };
        let signed_bytes = match self.blobs.read(&signed_url).await {
            Ok(b) => b,
            Err(err) => return Err(Error::RenderFailure(format!("unable to read rendered output: {}", err))),
        };
        Ok((signed_url, hex::encode(crate::hash_slice(&signed_bytes))))
    }

    fn release_render(&self, document_id: DocumentId, claimed_at: DateTime<Utc>) {
        let res = self.store.transaction(|tx| {
            let mut document = load_document(tx, document_id)?;
            if document.release_render(claimed_at) {
                tx.update_document(&document)?;
            }
            Ok(())
        });
        if let Err(err) = res {
            // the claim lapses on its own after the timeout
            warn!("Unable to release render claim on {}: {}", document_id, err);
        }
    }

    pub async fn decline(&self, access: &RecipientAccess, reason: &str, meta: &ClientMeta) -> Result<Document> {
        let now = self.now();
        let res = self.store.transaction(|tx| {
            let mut document = load_document(tx, access.document_id)?;
            document.ensure_open()?;
            let mut recipients = tx.recipients(document.id)?;
            let idx = self.authorize(&recipients, access, now)?;

            let recipient = &mut recipients[idx];
            recipient.mark_declined(reason, now, meta)?;
            tx.update_recipient(recipient)?;
            audit::append(
                tx,
                document.id,
                AuditEvent::new(AuditAction::RecipientDeclined, &actor_of(recipient))
                    .recipient(recipient.id)
                    .client(meta)
                    .details(json!({ "reason": recipient.decline_reason })),
                now,
            )?;
            let decliner = recipient.clone();

            document.mark_declined(now)?;
            let revoked = revoke_tokens(tx, &mut recipients)?;
            document.recount(&recipients);
            tx.update_document(&document)?;
            audit::append(
                tx,
                document.id,
                AuditEvent::new(AuditAction::DocumentDeclined, &audit::system_actor())
                    .recipient(decliner.id)
                    .details(json!({ "reason": decliner.decline_reason, "revoked_tokens": revoked })),
                now,
            )?;
            debug_assert!(document.is_consistent());

            let mut payload = self.payload(&document, &document.owner.name);
            payload.reason = decliner.decline_reason.clone();
            let mut outgoing = vec![Outgoing {
                email: document.owner.email.clone(),
                event: NotificationEvent::Declined,
                payload: payload.clone(),
            }];
            for r in recipients.iter().filter(|r| r.id != decliner.id && r.sent_at.is_some()) {
                outgoing.push(Outgoing {
                    email: r.email.clone(),
                    event: NotificationEvent::Declined,
                    payload: NotificationPayload {
                        recipient_name: r.name.clone(),
                        ..payload.clone()
                    },
                });
            }
            Ok((document, outgoing))
        });
        let (document, outgoing) = rejected("decline", res)?;
        info!("Recipient {} declined {}", access.recipient_id, document.id);
        self.dispatch(outgoing).await;
        Ok(document)
    }

    pub fn void_document(&self, document_id: DocumentId, actor: &Actor, reason: &str) -> Result<Document> {
        let now = self.now();
        let res = self.store.transaction(|tx| {
            let mut document = load_document(tx, document_id)?;
            document.mark_voided(reason, now)?;
            let mut recipients = tx.recipients(document_id)?;
            let revoked = revoke_tokens(tx, &mut recipients)?;
            tx.update_document(&document)?;
            audit::append(
                tx,
                document_id,
                AuditEvent::new(AuditAction::DocumentVoided, actor).details(json!({
                    "reason": document.void_reason,
                    "revoked_tokens": revoked,
                })),
                now,
            )?;
            debug_assert!(document.is_consistent());
            Ok(document)
        });
        let document = rejected("void_document", res)?;
        info!("Voided document {}", document_id);
        Ok(document)
    }

    pub async fn resend(&self, document_id: DocumentId, recipient_id: RecipientId) -> Result<Recipient> {
        let now = self.now();
        let res = self.store.transaction(|tx| {
            let document = load_document(tx, document_id)?;
            document.ensure_open()?;
            if document.status == DocumentStatus::Draft {
                return Err(Error::PreconditionFailed("document has not been sent".to_string()));
            }
            let mut recipients = tx.recipients(document_id)?;
            let idx = recipient_index(&recipients, recipient_id)?;
            let recipient = &mut recipients[idx];
            let holds_access = if recipient.is_signer() {
                recipient.status.is_active()
            } else {
                recipient.sent_at.is_some()
            };
            if !holds_access {
                return Err(Error::PreconditionFailed(format!(
                    "a {} recipient can't be sent a new link", recipient.status
                )));
            }

            let token = self.new_token(now);
            let expires_at = token.expires_at;
            let previous = recipient.reissue_token(token);
            tx.update_recipient(recipient)?;
            audit::append(
                tx,
                document_id,
                AuditEvent::new(AuditAction::TokenReissued, &document.owner)
                    .recipient(recipient_id)
                    .details(json!({
                        "previous_expires_at": previous.map(|t| t.expires_at),
                        "expires_at": expires_at,
                    })),
                now,
            )?;
            let recipient = recipient.clone();
            let outgoing = self.access_notice(&document, &recipient);
            Ok((recipient, outgoing))
        });
        let (recipient, outgoing) = rejected("resend", res)?;
        info!("Reissued token for {} on {}", recipient_id, document_id);
        self.dispatch(outgoing.into_iter().collect()).await;
        Ok(recipient)
    }

    /// The audit log outlives the document.
    pub fn delete_document(&self, document_id: DocumentId) -> Result<()> {
        let now = self.now();
        let res = self.store.transaction(|tx| {
            load_document(tx, document_id)?;
            if tx.recipients(document_id)?.iter().any(|r| r.has_live_token(now)) {
                return Err(Error::PreconditionFailed(
                    "recipients still hold live links to this document".to_string(),
                ));
            }
            tx.delete_document(document_id)
        });
        rejected("delete_document", res)?;
        info!("Deleted document {}", document_id);
        Ok(())
    }

    pub fn document(&self, document_id: DocumentId) -> Result<Document> {
        self.store.transaction(|tx| load_document(tx, document_id))
    }

    pub fn recipients(&self, document_id: DocumentId) -> Result<Vec<Recipient>> {
        self.store.transaction(|tx| {
            load_document(tx, document_id)?;
            tx.recipients(document_id)
        })
    }

    pub fn eligible_recipients(&self, document_id: DocumentId) -> Result<Vec<Recipient>> {
        self.store.transaction(|tx| {
            let document = load_document(tx, document_id)?;
            let recipients = tx.recipients(document_id)?;
            Ok(order::eligible(&document, &recipients).into_iter().cloned().collect())
        })
    }

    pub fn audit_log(&self, document_id: DocumentId) -> Result<Vec<AuditLogEntry>> {
        self.store.transaction(|tx| tx.audit_log(document_id))
    }

    pub fn signing_log(&self, document_id: DocumentId) -> Result<SigningLog> {
        let (document, entries) = self.store.transaction(|tx| {
            let document = load_document(tx, document_id)?;
            Ok((document, tx.audit_log(document_id)?))
        })?;
        if let Err(err) = audit::verify_chain(document_id, &entries) {
            error!("Audit log for {} failed verification: {}", document_id, err);
            return Err(Error::Storage(format!("audit log failed verification: {}", err)));
        }
        audit::signing_log(document_id, &document.title, &entries)
    }
}

fn ensure_not_closed(document: &Document) -> Result<()> {
    match document.status {
        DocumentStatus::Voided | DocumentStatus::Declined => Err(Error::DocumentClosed(document.status)),
        _ => Ok(()),
    }
}

fn actor_of(recipient: &Recipient) -> Actor {
    Actor {
        email: recipient.email.clone(),
        name: recipient.name.clone(),
    }
}

fn own_fields(fields: Vec<Field>, recipient_id: RecipientId) -> Vec<Field> {
    fields.into_iter().filter(|f| f.recipient_id == recipient_id).collect()
}

fn recipient_added(owner: &Actor, recipient: &Recipient) -> AuditEvent {
    AuditEvent::new(AuditAction::RecipientAdded, owner)
        .recipient(recipient.id)
        .details(json!({
            "name": recipient.name,
            "email": recipient.email,
            "role": recipient.role,
            "signing_order": recipient.signing_order,
        }))
}

fn recipient_sent(actor: &Actor, recipient: &Recipient, view_only: bool) -> AuditEvent {
    AuditEvent::new(AuditAction::RecipientSent, actor)
        .recipient(recipient.id)
        .details(json!({ "view_only": view_only }))
}

fn revoke_tokens(tx: &mut dyn Transaction, recipients: &mut [Recipient]) -> Result<usize> {
    let mut revoked = 0;
    for r in recipients.iter_mut() {
        if r.revoke_token().is_some() {
            tx.update_recipient(r)?;
            revoked += 1;
        }
    }
    Ok(revoked)
}
