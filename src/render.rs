use itertools::Itertools;
use crate::error::Result;
use crate::models::{Field, FieldType, Position, Size};
use crate::{FieldId, RecipientId};

#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct RenderField {
    pub field_id: FieldId,
    pub recipient_id: RecipientId,
    pub field_type: FieldType,
    pub position: Position,
    pub size: Size,
    pub value: String,
}

#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct RenderPage {
    pub page: u32,
    pub fields: Vec<RenderField>,
}

#[async_trait::async_trait]
pub trait Renderer: Send + Sync {
    async fn render(&self, document_url: &str, pages: &[RenderPage]) -> Result<String>;
}

/// Unfilled optional fields are left off.
pub fn plan(fields: &[Field]) -> Vec<RenderPage> {
    let mut filled = fields
        .iter()
        .filter_map(|f| {
            f.value.as_ref().map(|v| {
                (f.page, RenderField {
                    field_id: f.id,
                    recipient_id: f.recipient_id,
                    field_type: f.field_type,
                    position: f.position,
                    size: f.size,
                    value: v.value.display(),
                })
            })
        })
        .collect::<Vec<_>>();
    filled.sort_by_key(|(page, _)| *page);

    filled
        .into_iter()
        .group_by(|(page, _)| *page)
        .into_iter()
        .map(|(page, fields)| RenderPage {
            page,
            fields: fields.map(|(_, f)| f).collect(),
        })
        .collect()
}
