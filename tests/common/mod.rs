#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use chrono::TimeZone;
use esign_workflow::audit::ClientMeta;
use esign_workflow::clock::ManualClock;
use esign_workflow::config::EngineSettings;
use esign_workflow::files::BlobStore;
use esign_workflow::models::{
    Actor, Document, FieldPlacement, FieldType, NewDocument, NewRecipient, OrderMode, Position, RecipientRole,
    Size,
};
use esign_workflow::notify::{NotificationEvent, NotificationPayload, Notifier};
use esign_workflow::render::{RenderPage, Renderer};
use esign_workflow::store::memory::MemoryStore;
use esign_workflow::{DocumentId, Engine, Error, RecipientAccess, RecipientId, Result};

pub const SIGNATURE: &str = "data:image/png;base64,iVBORw0KGgo=";

#[derive(Default)]
pub struct MemoryBlobs {
    files: Mutex<HashMap<String, Vec<u8>>>,
}

#[async_trait::async_trait]
impl BlobStore for MemoryBlobs {
    async fn upload(&self, bytes: Vec<u8>, file_name: &str, _content_type: &str) -> Result<String> {
        let url = format!("mem://{}/{}", uuid::Uuid::new_v4(), file_name);
        self.files.lock().unwrap().insert(url.clone(), bytes);
        Ok(url)
    }

    async fn read(&self, url: &str) -> Result<Vec<u8>> {
        match self.files.lock().unwrap().get(url) {
            Some(b) => Ok(b.clone()),
            None => Err(Error::Blob(format!("no such file {}", url))),
        }
    }
}

pub struct RecordingRenderer {
    blobs: Arc<MemoryBlobs>,
    pub calls: AtomicUsize,
    pub fail: AtomicBool,
    pub last_pages: Mutex<Vec<RenderPage>>,
}

impl RecordingRenderer {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl Renderer for RecordingRenderer {
    async fn render(&self, document_url: &str, pages: &[RenderPage]) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::RenderFailure("renderer unavailable".to_string()));
        }
        *self.last_pages.lock().unwrap() = pages.to_vec();
        let signed = format!("signed:{}:{}", document_url, pages.len()).into_bytes();
        self.blobs.upload(signed, "signed.pdf", "application/pdf").await
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<(String, NotificationEvent, NotificationPayload)>>,
    pub fail: AtomicBool,
}

impl RecordingNotifier {
    pub fn events(&self) -> Vec<(String, NotificationEvent, NotificationPayload)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn to(&self, email: &str, event: NotificationEvent) -> Vec<NotificationPayload> {
        self.events()
            .into_iter()
            .filter(|(e, ev, _)| e == email && *ev == event)
            .map(|(_, _, p)| p)
            .collect()
    }
}

#[async_trait::async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, email: &str, event: NotificationEvent, payload: &NotificationPayload) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::NotifyFailure("smtp down".to_string()));
        }
        self.sent.lock().unwrap().push((email.to_string(), event, payload.clone()));
        Ok(())
    }
}

pub struct Harness {
    pub engine: Engine<MemoryStore>,
    pub blobs: Arc<MemoryBlobs>,
    pub renderer: Arc<RecordingRenderer>,
    pub notifier: Arc<RecordingNotifier>,
    pub clock: Arc<ManualClock>,
}

pub fn harness() -> Harness {
    let settings = EngineSettings {
        external_uri: "https://sign.brokerage.example".to_string(),
        token_validity: chrono::Duration::days(14),
    };
    let blobs = Arc::new(MemoryBlobs::default());
    let renderer = Arc::new(RecordingRenderer {
        blobs: blobs.clone(),
        calls: AtomicUsize::new(0),
        fail: AtomicBool::new(false),
        last_pages: Mutex::new(vec![]),
    });
    let notifier = Arc::new(RecordingNotifier::default());
    let clock = Arc::new(ManualClock::new(chrono::Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()));
    let engine = Engine::new(settings, MemoryStore::new(), blobs.clone(), renderer.clone(), notifier.clone())
        .with_clock(clock.clone());
    Harness {
        engine,
        blobs,
        renderer,
        notifier,
        clock,
    }
}

pub fn owner() -> Actor {
    Actor {
        email: "agent@brokerage.example".to_string(),
        name: "Listing Agent".to_string(),
    }
}

pub fn meta() -> ClientMeta {
    ClientMeta::new("203.0.113.7".parse().unwrap(), "Mozilla/5.0 (X11; Linux x86_64)")
}

pub fn signer(name: &str, order: i32) -> NewRecipient {
    NewRecipient {
        name: name.to_string(),
        email: format!("{}@example.com", name.to_lowercase()),
        role: RecipientRole::Signer,
        signer_type: None,
        signing_order: order,
    }
}

pub fn cc(name: &str) -> NewRecipient {
    NewRecipient {
        role: RecipientRole::Cc,
        ..signer(name, 0)
    }
}

pub fn new_document(mode: OrderMode, recipients: Vec<NewRecipient>) -> NewDocument {
    NewDocument {
        title: "Purchase agreement - 12 Elm St".to_string(),
        description: Some("Offer and counter-offer".to_string()),
        owner: owner(),
        order_mode: mode,
        file_name: "agreement.pdf".to_string(),
        mime_type: "application/pdf".to_string(),
        file_bytes: b"%PDF-1.7 agreement".to_vec(),
        recipients,
    }
}

pub fn signature_field(recipient_id: RecipientId, page: u32) -> FieldPlacement {
    FieldPlacement {
        recipient_id,
        field_type: FieldType::Signature,
        page,
        position: Position { x: 0.1, y: 0.8 },
        size: Size { width: 0.3, height: 0.05 },
        required: true,
        label: Some("Buyer signature".to_string()),
        placeholder: None,
        options: None,
    }
}

/// Creates a document, gives every signer one required signature field, and
/// returns it with the recipient ids in `(signing_order, id)` order.
pub async fn prepared(h: &Harness, mode: OrderMode, recipients: Vec<NewRecipient>) -> (Document, Vec<RecipientId>) {
    let document = h.engine.create_document(new_document(mode, recipients)).await.unwrap();
    let ids = h.engine.recipients(document.id).unwrap().into_iter().map(|r| (r.id, r.is_signer())).collect::<Vec<_>>();
    for (id, is_signer) in &ids {
        if *is_signer {
            h.engine.place_field(document.id, signature_field(*id, 1)).unwrap();
        }
    }
    let ids = ids.into_iter().map(|(id, _)| id).collect();
    (document, ids)
}

pub fn recipient_id_by_name(h: &Harness, document_id: DocumentId, name: &str) -> RecipientId {
    h.engine
        .recipients(document_id)
        .unwrap()
        .into_iter()
        .find(|r| r.name == name)
        .unwrap()
        .id
}

/// The access a recipient would have from their link, empty token if none.
pub fn access(h: &Harness, document_id: DocumentId, recipient_id: RecipientId) -> RecipientAccess {
    let recipient = h
        .engine
        .recipients(document_id)
        .unwrap()
        .into_iter()
        .find(|r| r.id == recipient_id)
        .unwrap();
    RecipientAccess {
        document_id,
        recipient_id,
        token: recipient.token.map(|t| t.value).unwrap_or_default(),
    }
}

pub fn only_field(h: &Harness, access: &RecipientAccess) -> esign_workflow::FieldId {
    let fields = h.engine.fields_for_recipient(access).unwrap();
    assert_eq!(fields.len(), 1);
    fields[0].id
}

/// View, fill the single signature field, and finish.
pub async fn sign(h: &Harness, document_id: DocumentId, recipient_id: RecipientId) -> esign_workflow::SignOutcome {
    let a = access(h, document_id, recipient_id);
    h.engine.view(&a, &meta()).unwrap();
    let field_id = only_field(h, &a);
    h.engine.set_field_value(&a, field_id, SIGNATURE, &meta()).unwrap();
    h.engine.finish_signing(&a, &meta()).await.unwrap()
}
