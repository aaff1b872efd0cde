use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{Result, RiceError};

/// UI element kinds an end user fills in.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, strum::AsRefStr, strum::EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ElementType {
    ImageUpload,
    MaskImageUpload,
    MaskUpload,
    Text,
    Choice,
    NumberInt,
    NumberFloat,
    Switch,
}

impl ElementType {
    /// Prompt input field that receives the user value for this element.
    pub fn prompt_field(&self) -> &'static str {
        match self {
            ElementType::Text => "text_info",
            ElementType::ImageUpload | ElementType::MaskImageUpload => "image_url",
            ElementType::MaskUpload => "mask_url",
            ElementType::NumberInt | ElementType::NumberFloat | ElementType::Switch => "str",
            ElementType::Choice => "default",
        }
    }
}

/// One boundary input's UI contract.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Element {
    /// ordinal position on the decrypt node
    pub id: String,
    #[serde(rename = "type")]
    pub element_type: ElementType,
    pub describe: String,
    pub node_id: String,
    #[serde(default)]
    pub settings: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub addition: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Template {
    pub template_id: String,
    #[serde(default)]
    pub elements: Vec<Element>,
}

impl Template {
    pub fn from_json(s: &str) -> Result<Self> {
        serde_json::from_str::<Template>(s).map_err(|e| RiceError::Validation(format!("invalid template: {}", e)))
    }

    /// Looks up an element by its ordinal id.
    pub fn element(
        &self,
        id: &str,
    ) -> Option<&Element> {
        self.elements.iter().find(|e| e.id == id)
    }
}
