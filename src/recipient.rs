use chrono::{DateTime, Utc};
use crate::audit::ClientMeta;
use crate::error::{Error, Result};
use crate::models::{NewRecipient, Recipient, RecipientRole, RecipientStatus};
use crate::token::AccessToken;
use crate::{DocumentId, RecipientId};

impl Recipient {
    pub fn new(document_id: DocumentId, new: &NewRecipient) -> Result<Self> {
        let name = new.name.trim();
        if name.is_empty() {
            return Err(Error::Validation("recipient name must not be empty".to_string()));
        }
        let email = match new.email.trim().parse::<lettre::Address>() {
            Ok(e) => e,
            Err(_) => return Err(Error::Validation(format!("'{}' is not an email address", new.email))),
        };

        Ok(Recipient {
            id: RecipientId::new(),
            document_id,
            name: name.to_string(),
            email: email.to_string(),
            role: new.role,
            signer_type: if new.role == RecipientRole::Signer { new.signer_type } else { None },
            signing_order: new.signing_order,
            status: RecipientStatus::Pending,
            token: None,
            decline_reason: None,
            ip_address: None,
            user_agent: None,
            sent_at: None,
            viewed_at: None,
            signed_at: None,
            declined_at: None,
        })
    }

    pub fn is_signer(&self) -> bool {
        self.role == RecipientRole::Signer
    }

    /// Expiry only blocks recipients who can still act. It never changes
    /// their status.
    pub fn authenticate(&self, presented: &str, now: DateTime<Utc>) -> Result<()> {
        let token = match &self.token {
            Some(t) => t,
            None => return Err(Error::TokenInvalid),
        };
        if !token.matches(presented) {
            return Err(Error::TokenInvalid);
        }
        if (!self.is_signer() || self.status.is_active()) && token.is_expired(now) {
            return Err(Error::TokenExpired);
        }
        Ok(())
    }

    pub fn has_live_token(&self, now: DateTime<Utc>) -> bool {
        self.token.as_ref().map_or(false, |t| !t.is_expired(now))
    }

    /// Replaces the token, returning the one it supersedes.
    pub fn reissue_token(&mut self, token: AccessToken) -> Option<AccessToken> {
        self.token.replace(token)
    }

    pub fn revoke_token(&mut self) -> Option<AccessToken> {
        self.token.take()
    }

    /// For signers still waiting their turn. Status is unchanged.
    pub fn reserve_token(&mut self, token: AccessToken) -> Result<()> {
        if !self.is_signer() || self.status != RecipientStatus::Pending {
            return Err(Error::PreconditionFailed("only waiting signers hold a reserved token".to_string()));
        }
        self.token = Some(token);
        Ok(())
    }

    /// `pending → sent`, with a fresh token.
    pub fn activate(&mut self, token: AccessToken, now: DateTime<Utc>) -> Result<()> {
        if !self.is_signer() {
            return Err(Error::PreconditionFailed("only signers are activated".to_string()));
        }
        if self.status != RecipientStatus::Pending {
            return Err(Error::PreconditionFailed(format!("recipient is already {}", self.status)));
        }
        self.token = Some(token);
        self.status = RecipientStatus::Sent;
        self.sent_at = Some(now);
        Ok(())
    }

    pub fn grant_view_access(&mut self, token: AccessToken, now: DateTime<Utc>) -> Result<()> {
        if self.is_signer() {
            return Err(Error::PreconditionFailed("signers are activated, not granted view access".to_string()));
        }
        self.token = Some(token);
        self.sent_at = Some(now);
        Ok(())
    }

    /// True only on the `sent → viewed` transition.
    pub fn mark_viewed(&mut self, now: DateTime<Utc>, meta: &ClientMeta) -> Result<bool> {
        if self.is_signer() && self.status == RecipientStatus::Pending {
            return Err(Error::PreconditionFailed("recipient has not been sent the document yet".to_string()));
        }
        if self.viewed_at.is_none() {
            self.viewed_at = Some(now);
            self.record_client(meta);
        }
        if self.status == RecipientStatus::Sent {
            self.status = RecipientStatus::Viewed;
            return Ok(true);
        }
        Ok(false)
    }

    pub fn mark_signed(&mut self, complete: bool, now: DateTime<Utc>, meta: &ClientMeta) -> Result<()> {
        match self.status {
            RecipientStatus::Signed => return Err(Error::AlreadySigned),
            RecipientStatus::Viewed => {}
            RecipientStatus::Sent => {
                return Err(Error::PreconditionFailed("recipient must view the document before signing".to_string()))
            }
            RecipientStatus::Pending if self.is_signer() => {
                return Err(Error::PreconditionFailed("recipient has not been sent the document yet".to_string()))
            }
            RecipientStatus::Pending => {
                return Err(Error::PreconditionFailed("only signers can sign".to_string()))
            }
            RecipientStatus::Declined => {
                return Err(Error::PreconditionFailed("recipient has declined".to_string()))
            }
        }
        if !complete {
            return Err(Error::PreconditionFailed("required fields are not filled".to_string()));
        }
        self.status = RecipientStatus::Signed;
        self.signed_at = Some(now);
        self.record_client(meta);
        Ok(())
    }

    pub fn mark_declined(&mut self, reason: &str, now: DateTime<Utc>, meta: &ClientMeta) -> Result<()> {
        if !self.is_signer() {
            return Err(Error::PreconditionFailed("only signers can decline".to_string()));
        }
        if !self.status.is_active() {
            return Err(Error::PreconditionFailed(format!("a {} recipient can't decline", self.status)));
        }
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(Error::Validation("a reason is required to decline".to_string()));
        }
        self.status = RecipientStatus::Declined;
        self.decline_reason = Some(reason.to_string());
        self.declined_at = Some(now);
        self.record_client(meta);
        Ok(())
    }

    fn record_client(&mut self, meta: &ClientMeta) {
        self.ip_address = Some(meta.ip.to_string());
        self.user_agent = Some(meta.user_agent.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn meta() -> ClientMeta {
        ClientMeta::new("203.0.113.7".parse().unwrap(), "Mozilla/5.0")
    }

    fn new_recipient(role: RecipientRole) -> Recipient {
        Recipient::new(
            DocumentId::new(),
            &NewRecipient {
                name: " Alice Buyer ".to_string(),
                email: "alice@example.com".to_string(),
                role,
                signer_type: None,
                signing_order: 1,
            },
        )
        .unwrap()
    }

    #[test]
    fn new_validates_email_and_name() {
        let doc = DocumentId::new();
        let bad = NewRecipient {
            name: "Bob".to_string(),
            email: "not-an-email".to_string(),
            role: RecipientRole::Signer,
            signer_type: None,
            signing_order: 0,
        };
        assert!(matches!(Recipient::new(doc, &bad), Err(Error::Validation(_))));
        assert_eq!(new_recipient(RecipientRole::Signer).name, "Alice Buyer");
    }

    #[test]
    fn full_signer_path() {
        let now = Utc::now();
        let mut r = new_recipient(RecipientRole::Signer);
        let token = AccessToken::generate(now, Duration::days(1));
        let key = token.value.clone();
        r.activate(token, now).unwrap();
        assert_eq!(r.status, RecipientStatus::Sent);
        r.authenticate(&key, now).unwrap();

        assert!(matches!(r.mark_signed(true, now, &meta()), Err(Error::PreconditionFailed(_))));
        assert!(r.mark_viewed(now, &meta()).unwrap());
        assert!(!r.mark_viewed(now + Duration::minutes(5), &meta()).unwrap());
        assert_eq!(r.viewed_at, Some(now));

        assert!(matches!(r.mark_signed(false, now, &meta()), Err(Error::PreconditionFailed(_))));
        r.mark_signed(true, now, &meta()).unwrap();
        assert_eq!(r.status, RecipientStatus::Signed);
        assert_eq!(r.ip_address.as_deref(), Some("203.0.113.7"));
        assert!(matches!(r.mark_signed(true, now, &meta()), Err(Error::AlreadySigned)));
    }

    #[test]
    fn expired_token_blocks_active_signer_only() {
        let now = Utc::now();
        let mut r = new_recipient(RecipientRole::Signer);
        let token = AccessToken::generate(now, Duration::hours(1));
        let key = token.value.clone();
        r.activate(token, now).unwrap();
        let later = now + Duration::hours(2);
        assert!(matches!(r.authenticate(&key, later), Err(Error::TokenExpired)));
        assert_eq!(r.status, RecipientStatus::Sent);

        r.status = RecipientStatus::Signed;
        assert!(r.authenticate(&key, later).is_ok());
        assert!(matches!(r.authenticate("wrong", now), Err(Error::TokenInvalid)));
    }

    #[test]
    fn revoked_token_is_invalid() {
        let now = Utc::now();
        let mut r = new_recipient(RecipientRole::Signer);
        let token = AccessToken::generate(now, Duration::hours(1));
        let key = token.value.clone();
        r.activate(token, now).unwrap();
        assert!(r.revoke_token().is_some());
        assert!(matches!(r.authenticate(&key, now), Err(Error::TokenInvalid)));
        assert!(!r.has_live_token(now));
    }

    #[test]
    fn decline_needs_reason_and_active_status() {
        let now = Utc::now();
        let mut r = new_recipient(RecipientRole::Signer);
        assert!(matches!(r.mark_declined("no", now, &meta()), Err(Error::PreconditionFailed(_))));
        r.activate(AccessToken::generate(now, Duration::hours(1)), now).unwrap();
        assert!(matches!(r.mark_declined("  ", now, &meta()), Err(Error::Validation(_))));
        r.mark_declined("price changed", now, &meta()).unwrap();
        assert_eq!(r.status, RecipientStatus::Declined);
        assert_eq!(r.decline_reason.as_deref(), Some("price changed"));
    }

    #[test]
    fn cc_never_moves_through_signer_states() {
        let now = Utc::now();
        let mut cc = new_recipient(RecipientRole::Cc);
        assert!(cc.activate(AccessToken::generate(now, Duration::hours(1)), now).is_err());
        cc.grant_view_access(AccessToken::generate(now, Duration::hours(1)), now).unwrap();
        assert!(!cc.mark_viewed(now, &meta()).unwrap());
        assert_eq!(cc.status, RecipientStatus::Pending);
        assert_eq!(cc.viewed_at, Some(now));
        assert!(matches!(cc.mark_signed(true, now, &meta()), Err(Error::PreconditionFailed(_))));
        assert!(matches!(cc.mark_declined("x", now, &meta()), Err(Error::PreconditionFailed(_))));
    }

    #[test]
    fn reserved_token_authenticates_without_activating() {
        let now = Utc::now();
        let mut r = new_recipient(RecipientRole::Signer);
        let token = AccessToken::generate(now, Duration::hours(1));
        let key = token.value.clone();
        r.reserve_token(token).unwrap();
        assert_eq!(r.status, RecipientStatus::Pending);
        r.authenticate(&key, now).unwrap();
        assert!(matches!(r.authenticate("forged", now), Err(Error::TokenInvalid)));

        r.activate(AccessToken::generate(now, Duration::hours(1)), now).unwrap();
        assert!(matches!(r.authenticate(&key, now), Err(Error::TokenInvalid)));
        assert!(r.reserve_token(AccessToken::generate(now, Duration::hours(1))).is_err());
    }

    #[test]
    fn reissue_returns_previous_token() {
        let now = Utc::now();
        let mut r = new_recipient(RecipientRole::Signer);
        let first = AccessToken::generate(now, Duration::hours(1));
        r.activate(first.clone(), now).unwrap();
        let old = r.reissue_token(AccessToken::generate(now, Duration::hours(2))).unwrap();
        assert_eq!(old, first);
        assert_eq!(r.status, RecipientStatus::Sent);
    }
}
