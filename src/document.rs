use chrono::{DateTime, Duration, Utc};
use crate::error::{Error, Result};
use crate::models::{
    Actor, Document, DocumentStatus, Field, FileRef, OrderMode, Recipient, RecipientStatus,
};
use crate::DocumentId;

impl Document {
    pub fn new(
        title: &str, description: Option<String>, owner: Actor, order_mode: OrderMode,
        original_file: FileRef, now: DateTime<Utc>,
    ) -> Result<Self> {
        let title = title.trim();
        if title.is_empty() {
            return Err(Error::Validation("document title must not be empty".to_string()));
        }
        Ok(Document {
            id: DocumentId::new(),
            title: title.to_string(),
            description: description.filter(|d| !d.trim().is_empty()),
            owner,
            status: DocumentStatus::Draft,
            order_mode,
            original_file,
            signed_file_url: None,
            total_signers: 0,
            signed_count: 0,
            created_at: now,
            sent_at: None,
            completed_at: None,
            voided_at: None,
            void_reason: None,
            declined_at: None,
            render_claimed_at: None,
        })
    }

    pub fn ensure_open(&self) -> Result<()> {
        if self.status.is_terminal() {
            return Err(Error::DocumentClosed(self.status));
        }
        Ok(())
    }

    pub fn ensure_draft(&self) -> Result<()> {
        self.ensure_open()?;
        if self.status != DocumentStatus::Draft {
            return Err(Error::PreconditionFailed(format!(
                "document is {}; recipients and fields are fixed once sent", self.status
            )));
        }
        Ok(())
    }

    pub fn recount(&mut self, recipients: &[Recipient]) {
        let signers = recipients.iter().filter(|r| r.is_signer());
        let (total, signed) = signers.fold((0u32, 0u32), |(t, s), r| {
            (t + 1, s + u32::from(r.status == RecipientStatus::Signed))
        });
        self.total_signers = total;
        self.signed_count = signed;
    }

    pub fn validate_send(&self, recipients: &[Recipient], fields: &[Field]) -> Result<()> {
        self.ensure_draft()?;
        if !recipients.iter().any(Recipient::is_signer) {
            return Err(Error::Validation("a document needs at least one signer".to_string()));
        }
        for field in fields {
            match recipients.iter().find(|r| r.id == field.recipient_id) {
                Some(r) if r.is_signer() => {}
                Some(_) => {
                    return Err(Error::Validation(format!("field {} is assigned to a non-signer", field.id)))
                }
                None => {
                    return Err(Error::Validation(format!(
                        "field {} references a recipient outside this document", field.id
                    )))
                }
            }
        }
        Ok(())
    }

    pub fn mark_sent(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.ensure_draft()?;
        self.status = DocumentStatus::Pending;
        self.sent_at = Some(now);
        Ok(())
    }

    /// Returns true when the transition happened.
    pub fn mark_in_progress(&mut self) -> bool {
        if self.status == DocumentStatus::Pending {
            self.status = DocumentStatus::InProgress;
            return true;
        }
        false
    }

    pub fn ready_to_complete(&self) -> bool {
        self.status == DocumentStatus::InProgress
            && self.total_signers > 0
            && self.signed_count == self.total_signers
    }

    /// Takes the right to render the signed copy. Fails while another claim
    /// younger than `stale_after` is held.
    pub fn claim_render(&mut self, now: DateTime<Utc>, stale_after: Duration) -> bool {
        if !self.ready_to_complete() {
            return false;
        }
        if let Some(claimed) = self.render_claimed_at {
            if now < claimed + stale_after {
                return false;
            }
        }
        self.render_claimed_at = Some(now);
        true
    }

    pub fn holds_render_claim(&self, claimed_at: DateTime<Utc>) -> bool {
        self.render_claimed_at == Some(claimed_at)
    }

    pub fn release_render(&mut self, claimed_at: DateTime<Utc>) -> bool {
        if !self.holds_render_claim(claimed_at) {
            return false;
        }
        self.render_claimed_at = None;
        true
    }

    pub fn mark_completed(&mut self, signed_file_url: String, now: DateTime<Utc>) -> Result<()> {
        self.ensure_open()?;
        if !self.ready_to_complete() {
            return Err(Error::PreconditionFailed(format!(
                "{} of {} signers have signed", self.signed_count, self.total_signers
            )));
        }
        self.status = DocumentStatus::Completed;
        self.signed_file_url = Some(signed_file_url);
        self.completed_at = Some(now);
        self.render_claimed_at = None;
        Ok(())
    }

    pub fn mark_voided(&mut self, reason: &str, now: DateTime<Utc>) -> Result<()> {
        self.ensure_open()?;
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(Error::Validation("a reason is required to void a document".to_string()));
        }
        self.status = DocumentStatus::Voided;
        self.voided_at = Some(now);
        self.void_reason = Some(reason.to_string());
        Ok(())
    }

    pub fn mark_declined(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.ensure_open()?;
        if self.status == DocumentStatus::Draft {
            return Err(Error::PreconditionFailed("a draft can't be declined".to_string()));
        }
        self.status = DocumentStatus::Declined;
        self.declined_at = Some(now);
        Ok(())
    }

    pub fn is_consistent(&self) -> bool {
        self.signed_count <= self.total_signers
            && self.completed_at.is_some() == (self.status == DocumentStatus::Completed)
            && self.voided_at.is_some() == (self.status == DocumentStatus::Voided)
            && self.void_reason.is_some() == (self.status == DocumentStatus::Voided)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewRecipient, RecipientRole};

    fn draft() -> Document {
        Document::new(
            "Purchase agreement - 12 Elm St",
            None,
            Actor {
                email: "agent@brokerage.example".to_string(),
                name: "Agent".to_string(),
            },
            OrderMode::Parallel,
            FileRef {
                url: "files/a.pdf".to_string(),
                name: "agreement.pdf".to_string(),
                mime_type: "application/pdf".to_string(),
                sha512: String::new(),
            },
            Utc::now(),
        )
        .unwrap()
    }

    fn recipient(doc: &Document, role: RecipientRole) -> Recipient {
        Recipient::new(
            doc.id,
            &NewRecipient {
                name: "R".to_string(),
                email: "r@example.com".to_string(),
                role,
                signer_type: None,
                signing_order: 0,
            },
        )
        .unwrap()
    }

    #[test]
    fn send_requires_a_signer() {
        let doc = draft();
        let cc = recipient(&doc, RecipientRole::Cc);
        assert!(matches!(doc.validate_send(&[cc], &[]), Err(Error::Validation(_))));
    }

    #[test]
    fn counters_follow_signer_statuses() {
        let mut doc = draft();
        let mut a = recipient(&doc, RecipientRole::Signer);
        let b = recipient(&doc, RecipientRole::Signer);
        let cc = recipient(&doc, RecipientRole::Viewer);
        a.status = RecipientStatus::Signed;
        doc.recount(&[a, b, cc]);
        assert_eq!((doc.signed_count, doc.total_signers), (1, 2));
        assert!(doc.is_consistent());
    }

    #[test]
    fn lifecycle_to_completion() {
        let mut doc = draft();
        let now = Utc::now();
        let mut a = recipient(&doc, RecipientRole::Signer);
        doc.recount(std::slice::from_ref(&a));
        doc.mark_sent(now).unwrap();
        assert_eq!(doc.status, DocumentStatus::Pending);
        assert!(doc.mark_in_progress());
        assert!(!doc.mark_in_progress());
        assert!(matches!(doc.mark_completed("s".to_string(), now), Err(Error::PreconditionFailed(_))));
        a.status = RecipientStatus::Signed;
        doc.recount(&[a]);
        doc.mark_completed("files/signed.pdf".to_string(), now).unwrap();
        assert_eq!(doc.status, DocumentStatus::Completed);
        assert!(doc.is_consistent());
        assert!(matches!(doc.mark_voided("late", now), Err(Error::DocumentClosed(DocumentStatus::Completed))));
    }

    #[test]
    fn void_needs_reason_and_is_terminal() {
        let mut doc = draft();
        let now = Utc::now();
        assert!(matches!(doc.mark_voided(" ", now), Err(Error::Validation(_))));
        doc.mark_voided("wrong property", now).unwrap();
        assert!(doc.is_consistent());
        assert!(matches!(doc.mark_sent(now), Err(Error::DocumentClosed(DocumentStatus::Voided))));
        assert!(matches!(doc.mark_declined(now), Err(Error::DocumentClosed(_))));
    }

    #[test]
    fn only_one_render_claim_until_it_goes_stale() {
        let mut doc = draft();
        let now = Utc::now();
        let mut a = recipient(&doc, RecipientRole::Signer);
        doc.recount(std::slice::from_ref(&a));
        doc.mark_sent(now).unwrap();
        doc.mark_in_progress();
        assert!(!doc.claim_render(now, Duration::minutes(10)));

        a.status = RecipientStatus::Signed;
        doc.recount(&[a]);
        assert!(doc.claim_render(now, Duration::minutes(10)));
        assert!(!doc.claim_render(now + Duration::minutes(9), Duration::minutes(10)));
        assert!(!doc.release_render(now + Duration::minutes(1)));

        let takeover = now + Duration::minutes(11);
        assert!(doc.claim_render(takeover, Duration::minutes(10)));
        assert!(!doc.holds_render_claim(now));
        assert!(doc.release_render(takeover));
        assert!(doc.claim_render(takeover, Duration::minutes(10)));
        doc.mark_completed("files/signed.pdf".to_string(), takeover).unwrap();
        assert!(doc.render_claimed_at.is_none());
    }

    #[test]
    fn draft_edits_rejected_after_send() {
        let mut doc = draft();
        doc.mark_sent(Utc::now()).unwrap();
        assert!(matches!(doc.ensure_draft(), Err(Error::PreconditionFailed(_))));
    }
}
