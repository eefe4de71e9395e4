use itertools::Itertools;
use crate::models::{Document, DocumentStatus, OrderMode, Recipient, RecipientStatus};
use crate::RecipientId;

pub fn signers_in_order(recipients: &[Recipient]) -> Vec<&Recipient> {
    recipients
        .iter()
        .filter(|r| r.is_signer())
        .sorted_by_key(|r| (r.signing_order, r.id))
        .collect()
}

pub fn initial_activation(mode: OrderMode, recipients: &[Recipient]) -> Vec<RecipientId> {
    let pending = signers_in_order(recipients)
        .into_iter()
        .filter(|r| r.status == RecipientStatus::Pending);
    match mode {
        OrderMode::Parallel => pending.map(|r| r.id).collect(),
        OrderMode::Sequential => pending.take(1).map(|r| r.id).collect(),
    }
}

/// Always `None` in parallel mode.
pub fn next_to_activate(mode: OrderMode, recipients: &[Recipient]) -> Option<RecipientId> {
    if mode == OrderMode::Parallel {
        return None;
    }
    let signers = signers_in_order(recipients);
    if signers.iter().any(|r| r.status.is_active()) {
        return None;
    }
    signers
        .into_iter()
        .find(|r| r.status == RecipientStatus::Pending)
        .map(|r| r.id)
}

pub fn eligible<'a>(document: &Document, recipients: &'a [Recipient]) -> Vec<&'a Recipient> {
    if !matches!(document.status, DocumentStatus::Pending | DocumentStatus::InProgress) {
        return vec![];
    }
    signers_in_order(recipients)
        .into_iter()
        .filter(|r| r.status.is_active())
        .collect()
}

pub fn may_view(document: &Document, recipient: &Recipient) -> bool {
    if document.status == DocumentStatus::Draft {
        return false;
    }
    !recipient.is_signer() || recipient.status != RecipientStatus::Pending
}
