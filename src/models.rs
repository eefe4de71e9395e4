use chrono::{DateTime, Utc};
use crate::{DocumentId, FieldId, RecipientId};
use crate::field::StoredValue;
use crate::token::AccessToken;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "postgres", derive(DbEnum))]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Draft,
    Pending,
    InProgress,
    Completed,
    Voided,
    Declined,
}

impl DocumentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Voided => "voided",
            Self::Declined => "declined",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Voided | Self::Declined)
    }
}

impl std::fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "postgres", derive(DbEnum))]
#[serde(rename_all = "snake_case")]
pub enum RecipientStatus {
    Pending,
    Sent,
    Viewed,
    Signed,
    Declined,
}

impl RecipientStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sent => "sent",
            Self::Viewed => "viewed",
            Self::Signed => "signed",
            Self::Declined => "declined",
        }
    }

    /// Sent or viewed: the only states in which a signer may act.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Sent | Self::Viewed)
    }
}

impl std::fmt::Display for RecipientStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "postgres", derive(DbEnum))]
#[serde(rename_all = "snake_case")]
pub enum RecipientRole {
    Signer,
    Cc,
    Viewer,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "postgres", derive(DbEnum))]
#[serde(rename_all = "snake_case")]
pub enum SignerType {
    Buyer,
    Seller,
    Agent,
    Attorney,
    Broker,
    Other,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "postgres", derive(DbEnum))]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Signature,
    Initials,
    Date,
    Text,
    Checkbox,
    Dropdown,
}

impl FieldType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Signature => "signature",
            Self::Initials => "initials",
            Self::Date => "date",
            Self::Text => "text",
            Self::Checkbox => "checkbox",
            Self::Dropdown => "dropdown",
        }
    }
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "postgres", derive(DbEnum))]
#[serde(rename_all = "snake_case")]
pub enum OrderMode {
    Parallel,
    Sequential,
}

impl Default for OrderMode {
    fn default() -> Self {
        Self::Parallel
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Actor {
    pub email: String,
    pub name: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct FileRef {
    pub url: String,
    pub name: String,
    pub mime_type: String,
    /// Hex SHA-512 of the uploaded bytes.
    pub sha512: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Document {
    pub id: DocumentId,
    pub title: String,
    pub description: Option<String>,
    pub owner: Actor,
    pub status: DocumentStatus,
    pub order_mode: OrderMode,
    pub original_file: FileRef,
    pub signed_file_url: Option<String>,
    pub total_signers: u32,
    pub signed_count: u32,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub voided_at: Option<DateTime<Utc>>,
    pub void_reason: Option<String>,
    pub declined_at: Option<DateTime<Utc>>,
    /// Set while one caller is producing the signed copy.
    pub render_claimed_at: Option<DateTime<Utc>>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Recipient {
    pub id: RecipientId,
    pub document_id: DocumentId,
    pub name: String,
    pub email: String,
    pub role: RecipientRole,
    pub signer_type: Option<SignerType>,
    pub signing_order: i32,
    pub status: RecipientStatus,
    pub token: Option<AccessToken>,
    pub decline_reason: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
    pub viewed_at: Option<DateTime<Utc>>,
    pub signed_at: Option<DateTime<Utc>>,
    pub declined_at: Option<DateTime<Utc>>,
}

/// Fractions of the page.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
pub struct Size {
    pub width: f64,
    pub height: f64,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Field {
    pub id: FieldId,
    pub document_id: DocumentId,
    pub recipient_id: RecipientId,
    pub field_type: FieldType,
    pub label: Option<String>,
    pub placeholder: Option<String>,
    pub options: Vec<String>,
    pub required: bool,
    pub page: u32,
    pub position: Position,
    pub size: Size,
    pub value: Option<StoredValue>,
    pub filled_at: Option<DateTime<Utc>>,
}

#[derive(Deserialize, Clone, Debug)]
pub struct NewRecipient {
    pub name: String,
    pub email: String,
    pub role: RecipientRole,
    #[serde(default)]
    pub signer_type: Option<SignerType>,
    #[serde(default)]
    pub signing_order: i32,
}

#[derive(Clone, Debug)]
pub struct NewDocument {
    pub title: String,
    pub description: Option<String>,
    pub owner: Actor,
    pub order_mode: OrderMode,
    pub file_name: String,
    pub mime_type: String,
    pub file_bytes: Vec<u8>,
    pub recipients: Vec<NewRecipient>,
}

#[derive(Deserialize, Clone, Debug)]
pub struct FieldPlacement {
    pub recipient_id: RecipientId,
    pub field_type: FieldType,
    pub page: u32,
    pub position: Position,
    pub size: Size,
    pub required: bool,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub placeholder: Option<String>,
    #[serde(default)]
    pub options: Option<Vec<String>>,
}
