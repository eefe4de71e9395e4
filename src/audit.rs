use chrono::{DateTime, SubsecRound, Utc};
use crate::error::{Error, Result};
use crate::models::Actor;
use crate::store::Transaction;
use crate::{AuditEntryId, DocumentId, RecipientId};

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ClientMeta {
    pub ip: std::net::IpAddr,
    pub user_agent: String,
    #[serde(default)]
    pub geolocation: Option<String>,
}

impl ClientMeta {
    pub fn new(ip: std::net::IpAddr, user_agent: &str) -> Self {
        Self {
            ip,
            user_agent: user_agent.to_string(),
            geolocation: None,
        }
    }

    /// NAT64 and IPv4-mapped addresses are recorded as the IPv4 behind them.
    pub fn from_request(
        ip: std::net::IpAddr, user_agent: &str, nat64_net: Option<&ipnet::Ipv6Net>,
    ) -> Self {
        let mut ip = ip;
        if let std::net::IpAddr::V6(v6_ip) = ip {
            if let Some(v4_ip) = v6_ip.to_ipv4() {
                ip = std::net::IpAddr::V4(v4_ip);
            } else if let Some(nat64_net) = nat64_net {
                if nat64_net.contains(&v6_ip) {
                    let [_, _, _, _, _, _, ab, cd] = v6_ip.segments();
                    let [a, b] = ab.to_be_bytes();
                    let [c, d] = cd.to_be_bytes();
                    ip = std::net::IpAddr::V4(std::net::Ipv4Addr::new(a, b, c, d));
                }
            }
        }
        Self::new(ip, user_agent)
    }

    pub fn with_geolocation(mut self, geolocation: &str) -> Self {
        self.geolocation = Some(geolocation.to_string());
        self
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    DocumentCreated,
    RecipientAdded,
    RecipientRemoved,
    FieldPlaced,
    DocumentSent,
    RecipientSent,
    DocumentInProgress,
    RecipientViewed,
    FieldFilled,
    RecipientSigned,
    RecipientDeclined,
    DocumentDeclined,
    DocumentVoided,
    DocumentCompleted,
    TokenReissued,
}

const ACTIONS: [AuditAction; 15] = [
    AuditAction::DocumentCreated,
    AuditAction::RecipientAdded,
    AuditAction::RecipientRemoved,
    AuditAction::FieldPlaced,
    AuditAction::DocumentSent,
    AuditAction::RecipientSent,
    AuditAction::DocumentInProgress,
    AuditAction::RecipientViewed,
    AuditAction::FieldFilled,
    AuditAction::RecipientSigned,
    AuditAction::RecipientDeclined,
    AuditAction::DocumentDeclined,
    AuditAction::DocumentVoided,
    AuditAction::DocumentCompleted,
    AuditAction::TokenReissued,
];

impl AuditAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DocumentCreated => "document_created",
            Self::RecipientAdded => "recipient_added",
            Self::RecipientRemoved => "recipient_removed",
            Self::FieldPlaced => "field_placed",
            Self::DocumentSent => "document_sent",
            Self::RecipientSent => "recipient_sent",
            Self::DocumentInProgress => "document_in_progress",
            Self::RecipientViewed => "recipient_viewed",
            Self::FieldFilled => "field_filled",
            Self::RecipientSigned => "recipient_signed",
            Self::RecipientDeclined => "recipient_declined",
            Self::DocumentDeclined => "document_declined",
            Self::DocumentVoided => "document_voided",
            Self::DocumentCompleted => "document_completed",
            Self::TokenReissued => "token_reissued",
        }
    }

    pub fn is_transition(self) -> bool {
        matches!(
            self,
            Self::DocumentSent
                | Self::RecipientSent
                | Self::DocumentInProgress
                | Self::RecipientViewed
                | Self::RecipientSigned
                | Self::RecipientDeclined
                | Self::DocumentDeclined
                | Self::DocumentVoided
                | Self::DocumentCompleted
        )
    }
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AuditAction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        ACTIONS
            .iter()
            .copied()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| Error::Storage(format!("unknown audit action '{}'", s)))
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct AuditLogEntry {
    pub id: AuditEntryId,
    pub document_id: DocumentId,
    pub recipient_id: Option<RecipientId>,
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub action: AuditAction,
    pub details: serde_json::Value,
    pub actor_email: String,
    pub actor_name: String,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub geolocation: Option<String>,
    pub previous_hash: Option<String>,
    pub hash: String,
}

#[derive(Serialize)]
struct HashedBody<'a> {
    id: &'a AuditEntryId,
    document_id: &'a DocumentId,
    recipient_id: &'a Option<RecipientId>,
    sequence: u64,
    timestamp: &'a DateTime<Utc>,
    action: AuditAction,
    details: &'a serde_json::Value,
    actor_email: &'a str,
    actor_name: &'a str,
    ip_address: &'a Option<String>,
    user_agent: &'a Option<String>,
    geolocation: &'a Option<String>,
}

impl AuditLogEntry {
    pub fn compute_hash(&self) -> Result<String> {
        let body = serde_json::to_vec(&HashedBody {
            id: &self.id,
            document_id: &self.document_id,
            recipient_id: &self.recipient_id,
            sequence: self.sequence,
            timestamp: &self.timestamp,
            action: self.action,
            details: &self.details,
            actor_email: &self.actor_email,
            actor_name: &self.actor_name,
            ip_address: &self.ip_address,
            user_agent: &self.user_agent,
            geolocation: &self.geolocation,
        })?;
        let mut input = self.previous_hash.clone().unwrap_or_default().into_bytes();
        input.extend_from_slice(&body);
        Ok(hex::encode(crate::hash_slice(&input)))
    }
}

pub fn system_actor() -> Actor {
    Actor {
        email: "system".to_string(),
        name: "eSignature".to_string(),
    }
}

#[derive(Clone, Debug)]
pub struct AuditEvent {
    action: AuditAction,
    recipient_id: Option<RecipientId>,
    details: serde_json::Value,
    actor: Actor,
    client: Option<ClientMeta>,
}

impl AuditEvent {
    pub fn new(action: AuditAction, actor: &Actor) -> Self {
        Self {
            action,
            recipient_id: None,
            details: serde_json::Value::Object(Default::default()),
            actor: actor.clone(),
            client: None,
        }
    }

    pub fn recipient(mut self, recipient_id: RecipientId) -> Self {
        self.recipient_id = Some(recipient_id);
        self
    }

    pub fn details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }

    pub fn client(mut self, meta: &ClientMeta) -> Self {
        self.client = Some(meta.clone());
        self
    }
}

pub fn append(
    tx: &mut dyn Transaction, document_id: DocumentId, event: AuditEvent, now: DateTime<Utc>,
) -> Result<AuditLogEntry> {
    let last = tx.last_audit_entry(document_id)?;
    let (sequence, previous_hash) = match last {
        Some(e) => (e.sequence + 1, Some(e.hash)),
        None => (1, None),
    };
    let client = event.client;
    let mut entry = AuditLogEntry {
        id: AuditEntryId::new(),
        document_id,
        recipient_id: event.recipient_id,
        sequence,
        // stores keep microseconds; hash what will be read back
        timestamp: now.trunc_subsecs(6),
        action: event.action,
        details: event.details,
        actor_email: event.actor.email,
        actor_name: event.actor.name,
        ip_address: client.as_ref().map(|c| c.ip.to_string()),
        user_agent: client.as_ref().map(|c| c.user_agent.clone()),
        geolocation: client.and_then(|c| c.geolocation),
        previous_hash,
        hash: String::new(),
    };
    entry.hash = entry.compute_hash()?;
    tx.append_audit(&entry)?;
    trace!("Audit {} #{} for {}", entry.action, entry.sequence, document_id);
    Ok(entry)
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChainError {
    #[error("entry {found} found where {expected} was expected")]
    SequenceGap { expected: u64, found: u64 },
    #[error("entry {0} belongs to another document")]
    ForeignEntry(u64),
    #[error("entry {0} does not link to its predecessor")]
    BrokenLink(u64),
    #[error("entry {0} has been altered")]
    HashMismatch(u64),
}

/// `entries` must be the document's whole log in sequence order.
pub fn verify_chain(document_id: DocumentId, entries: &[AuditLogEntry]) -> std::result::Result<(), ChainError> {
    let mut previous: Option<&str> = None;
    for (i, entry) in entries.iter().enumerate() {
        let expected = i as u64 + 1;
        if entry.sequence != expected {
            return Err(ChainError::SequenceGap { expected, found: entry.sequence });
        }
        if entry.document_id != document_id {
            return Err(ChainError::ForeignEntry(entry.sequence));
        }
        if entry.previous_hash.as_deref() != previous {
            return Err(ChainError::BrokenLink(entry.sequence));
        }
        match entry.compute_hash() {
            Ok(h) if h == entry.hash => {}
            _ => return Err(ChainError::HashMismatch(entry.sequence)),
        }
        previous = Some(&entry.hash);
    }
    Ok(())
}

#[derive(Serialize, Clone, Debug)]
struct SigningLogBody<'a> {
    document_id: DocumentId,
    document_title: &'a str,
    entries: &'a [AuditLogEntry],
}

/// The evidentiary log handed to parties: pretty JSON plus its SHA-512.
#[derive(Serialize, Clone, Debug)]
pub struct SigningLog {
    pub json: String,
    pub sha512: String,
}

pub fn signing_log(document_id: DocumentId, title: &str, entries: &[AuditLogEntry]) -> Result<SigningLog> {
    let json = serde_json::to_string_pretty(&SigningLogBody {
        document_id,
        document_title: title,
        entries,
    })?;
    let sha512 = hex::encode(crate::hash_slice(json.as_bytes()));
    Ok(SigningLog { json, sha512 })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use crate::store::Store;

    fn owner() -> Actor {
        Actor {
            email: "owner@brokerage.example".to_string(),
            name: "Owner".to_string(),
        }
    }

    fn write_log(store: &MemoryStore, doc: DocumentId, n: usize) -> Vec<AuditLogEntry> {
        store
            .transaction(|tx| {
                for i in 0..n {
                    append(
                        tx,
                        doc,
                        AuditEvent::new(AuditAction::RecipientViewed, &owner())
                            .details(serde_json::json!({ "n": i })),
                        Utc::now(),
                    )?;
                }
                tx.audit_log(doc)
            })
            .unwrap()
    }

    #[test]
    fn sequence_and_links() {
        let store = MemoryStore::new();
        let doc = DocumentId::new();
        let log = write_log(&store, doc, 3);
        assert_eq!(log.iter().map(|e| e.sequence).collect::<Vec<_>>(), vec![1, 2, 3]);
        assert_eq!(log[0].previous_hash, None);
        assert_eq!(log[1].previous_hash.as_deref(), Some(log[0].hash.as_str()));
        assert_eq!(verify_chain(doc, &log), Ok(()));
    }

    #[test]
    fn tampering_is_detected() {
        let store = MemoryStore::new();
        let doc = DocumentId::new();
        let log = write_log(&store, doc, 3);

        let mut edited = log.clone();
        edited[1].actor_email = "someone-else@example.com".to_string();
        assert_eq!(verify_chain(doc, &edited), Err(ChainError::HashMismatch(2)));

        let mut dropped = log.clone();
        dropped.remove(1);
        assert_eq!(verify_chain(doc, &dropped), Err(ChainError::SequenceGap { expected: 2, found: 3 }));

        assert_eq!(verify_chain(DocumentId::new(), &log), Err(ChainError::ForeignEntry(1)));
    }

    #[test]
    fn nat64_addresses_unmap() {
        let net: ipnet::Ipv6Net = "64:ff9b::/96".parse().unwrap();
        let meta = ClientMeta::from_request("64:ff9b::c000:0221".parse().unwrap(), "ua", Some(&net));
        assert_eq!(meta.ip, "192.0.2.33".parse::<std::net::IpAddr>().unwrap());

        let mapped = ClientMeta::from_request("::ffff:198.51.100.4".parse().unwrap(), "ua", None);
        assert_eq!(mapped.ip, "198.51.100.4".parse::<std::net::IpAddr>().unwrap());

        let plain = ClientMeta::from_request("2001:db8::1".parse().unwrap(), "ua", Some(&net));
        assert_eq!(plain.ip, "2001:db8::1".parse::<std::net::IpAddr>().unwrap());
    }

    #[test]
    fn action_names_round_trip_through_str() {
        for action in ACTIONS.iter() {
            assert_eq!(action.as_str().parse::<AuditAction>().unwrap(), *action);
            assert_eq!(serde_json::to_value(action).unwrap(), serde_json::json!(action.as_str()));
        }
    }

    #[test]
    fn signing_log_digest_matches_json() {
        let store = MemoryStore::new();
        let doc = DocumentId::new();
        let log = write_log(&store, doc, 2);
        let export = signing_log(doc, "Lease", &log).unwrap();
        assert_eq!(export.sha512, hex::encode(crate::hash_slice(export.json.as_bytes())));
        assert!(export.json.contains("recipient_viewed"));
    }
}
