use chrono::{DateTime, NaiveDate, Utc};
use crate::error::{Error, Result};
use crate::models::{Field, FieldPlacement, FieldType, Recipient, RecipientRole};
use crate::{DocumentId, FieldId, RecipientId};

const MAX_TEXT_LEN: usize = 10_000;
const MAX_PAGE: u32 = 10_000;
// slack for UI rounding at the page edge
const EDGE_EPSILON: f64 = 1e-6;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    Signature(String),
    Initials(String),
    Date(NaiveDate),
    Text(String),
    Checkbox(bool),
    Dropdown(String),
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct StoredValue {
    pub value: FieldValue,
    pub raw: String,
}

impl FieldValue {
    pub fn parse(field_type: FieldType, raw: &str, options: &[String]) -> Result<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(Error::Validation(format!("{} value must not be empty", field_type)));
        }

        Ok(match field_type {
            FieldType::Signature => FieldValue::Signature(parse_image_ref(trimmed)?),
            FieldType::Initials => FieldValue::Initials(parse_image_ref(trimmed)?),
            FieldType::Date => FieldValue::Date(parse_date(trimmed)?),
            FieldType::Checkbox => FieldValue::Checkbox(parse_checkbox(trimmed)?),
            FieldType::Dropdown => match options.iter().find(|o| o.as_str() == trimmed) {
                Some(o) => FieldValue::Dropdown(o.clone()),
                None => return Err(Error::Validation(format!("'{}' is not one of the field's options", trimmed))),
            },
            FieldType::Text => {
                if raw.chars().count() > MAX_TEXT_LEN {
                    return Err(Error::Validation(format!("text value longer than {} characters", MAX_TEXT_LEN)));
                }
                FieldValue::Text(raw.to_string())
            }
        })
    }

    pub fn field_type(&self) -> FieldType {
        match self {
            FieldValue::Signature(_) => FieldType::Signature,
            FieldValue::Initials(_) => FieldType::Initials,
            FieldValue::Date(_) => FieldType::Date,
            FieldValue::Text(_) => FieldType::Text,
            FieldValue::Checkbox(_) => FieldType::Checkbox,
            FieldValue::Dropdown(_) => FieldType::Dropdown,
        }
    }

    /// Text stamped onto the rendered page; image references pass through.
    pub fn display(&self) -> String {
        match self {
            FieldValue::Signature(r) | FieldValue::Initials(r) => r.clone(),
            FieldValue::Date(d) => d.format("%Y-%m-%d").to_string(),
            FieldValue::Text(t) => t.clone(),
            FieldValue::Checkbox(true) => "X".to_string(),
            FieldValue::Checkbox(false) => String::new(),
            FieldValue::Dropdown(o) => o.clone(),
        }
    }
}

fn parse_checkbox(raw: &str) -> Result<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" => Ok(false),
        _ => Err(Error::Validation(format!("'{}' is not a checkbox value", raw))),
    }
}

fn parse_date(raw: &str) -> Result<NaiveDate> {
    if let Ok(d) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Ok(d);
    }
    if let Ok(d) = NaiveDate::parse_from_str(raw, "%m/%d/%Y") {
        return Ok(d);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.naive_utc().date());
    }
    Err(Error::Validation(format!("'{}' is not a calendar date", raw)))
}

fn parse_image_ref(raw: &str) -> Result<String> {
    if let Some(rest) = raw.strip_prefix("data:image/") {
        let (header, payload) = match rest.split_once(',') {
            Some(parts) => parts,
            None => return Err(Error::Validation("malformed image data URL".to_string())),
        };
        if !header.ends_with(";base64") {
            return Err(Error::Validation("image data URL must be base64 encoded".to_string()));
        }
        match base64::decode_config(payload, base64::STANDARD) {
            Ok(bytes) if !bytes.is_empty() => {}
            Ok(_) => return Err(Error::Validation("image data URL is empty".to_string())),
            Err(err) => return Err(Error::Validation(format!("error decoding base64: {}", err))),
        }
        return Ok(raw.to_string());
    }
    if raw.starts_with("https://") || raw.starts_with("http://") {
        return Ok(raw.to_string());
    }
    Err(Error::Validation("signature must be an image data URL or an image link".to_string()))
}

fn check_geometry(placement: &FieldPlacement) -> Result<()> {
    let p = placement.position;
    let s = placement.size;
    if placement.page == 0 || placement.page > MAX_PAGE {
        return Err(Error::Validation(format!("page {} is out of range", placement.page)));
    }
    if ![p.x, p.y, s.width, s.height].iter().all(|v| v.is_finite()) {
        return Err(Error::Validation("field geometry must be finite".to_string()));
    }
    if p.x < 0.0 || p.y < 0.0 || s.width <= 0.0 || s.height <= 0.0 {
        return Err(Error::Validation("field must have a non-negative position and a positive size".to_string()));
    }
    if p.x + s.width > 1.0 + EDGE_EPSILON || p.y + s.height > 1.0 + EDGE_EPSILON {
        return Err(Error::Validation("field extends past the edge of the page".to_string()));
    }
    Ok(())
}

fn normalise_options(field_type: FieldType, options: Option<&[String]>) -> Result<Vec<String>> {
    match (field_type, options) {
        (FieldType::Dropdown, Some(options)) => {
            let mut out: Vec<String> = Vec::with_capacity(options.len());
            for option in options {
                let option = option.trim();
                if option.is_empty() {
                    return Err(Error::Validation("dropdown options must not be blank".to_string()));
                }
                if out.iter().any(|o| o == option) {
                    return Err(Error::Validation(format!("duplicate dropdown option '{}'", option)));
                }
                out.push(option.to_string());
            }
            if out.is_empty() {
                return Err(Error::Validation("dropdown fields need at least one option".to_string()));
            }
            Ok(out)
        }
        (FieldType::Dropdown, None) => Err(Error::Validation("dropdown fields need at least one option".to_string())),
        (_, Some(options)) if !options.is_empty() => {
            Err(Error::Validation(format!("{} fields don't take options", field_type)))
        }
        _ => Ok(vec![]),
    }
}

impl Field {
    /// The caller checks the document is still a draft.
    pub fn place(document_id: DocumentId, placement: &FieldPlacement, owner: &Recipient) -> Result<Self> {
        if owner.id != placement.recipient_id || owner.document_id != document_id {
            return Err(Error::Validation("recipient does not belong to this document".to_string()));
        }
        if owner.role != RecipientRole::Signer {
            return Err(Error::Validation("only signers can be assigned fields".to_string()));
        }
        check_geometry(placement)?;
        let options = normalise_options(placement.field_type, placement.options.as_deref())?;

        Ok(Field {
            id: FieldId::new(),
            document_id,
            recipient_id: owner.id,
            field_type: placement.field_type,
            label: placement.label.clone(),
            placeholder: placement.placeholder.clone(),
            options,
            required: placement.required,
            page: placement.page,
            position: placement.position,
            size: placement.size,
            value: None,
            filled_at: None,
        })
    }

    /// Only the owning recipient, while sent or viewed, may write.
    pub fn check_writable_by(&self, recipient: &Recipient) -> Result<()> {
        if self.recipient_id != recipient.id {
            return Err(Error::Validation("field belongs to another recipient".to_string()));
        }
        if !recipient.status.is_active() {
            return Err(Error::PreconditionFailed(format!(
                "fields can't be filled while the recipient is {}", recipient.status
            )));
        }
        Ok(())
    }

    pub fn fill(&mut self, raw: &str, now: DateTime<Utc>) -> Result<()> {
        let value = FieldValue::parse(self.field_type, raw, &self.options)?;
        self.value = Some(StoredValue {
            value,
            raw: raw.to_string(),
        });
        self.filled_at = Some(now);
        Ok(())
    }

    pub fn is_filled(&self) -> bool {
        self.value.is_some()
    }
}

pub fn is_recipient_complete(recipient_id: RecipientId, fields: &[Field]) -> bool {
    fields
        .iter()
        .filter(|f| f.recipient_id == recipient_id && f.required)
        .all(Field::is_filled)
}
