//! Closed tables of boundary node types.

use std::{collections::HashSet, str::FromStr};

use crate::model::ElementType;

pub const SIMPLE_CHOICE_NODE: &str = "RiceRoundSimpleChoiceNode";
pub const ADVANCED_CHOICE_NODE: &str = "RiceRoundAdvancedChoiceNode";
pub const DECRYPT_NODE: &str = "RiceRoundDecryptNode";
pub const ENCRYPT_NODE: &str = "RiceRoundEncryptNode";
pub const OUTPUT_IMAGE_NODE: &str = "RiceRoundOutputImageNode";
pub const RANDOM_SEED_NODE: &str = "RiceRoundRandomSeedNode";

/// Node types an author uses to expose a parameter of the packaged workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, strum::AsRefStr, strum::EnumString, strum::EnumIter)]
pub enum BoundaryKind {
    #[strum(serialize = "RiceRoundSimpleChoiceNode")]
    SimpleChoice,
    #[strum(serialize = "RiceRoundAdvancedChoiceNode")]
    AdvancedChoice,
    #[strum(serialize = "RiceRoundSimpleImageNode")]
    SimpleImage,
    #[strum(serialize = "RiceRoundImageNode")]
    Image,
    #[strum(serialize = "RiceRoundDownloadImageNode")]
    DownloadImage,
    #[strum(serialize = "RiceRoundImageBridgeNode")]
    ImageBridge,
    #[strum(serialize = "RiceRoundInputTextNode")]
    InputText,
    #[strum(serialize = "RiceRoundMaskBridgeNode")]
    MaskBridge,
    #[strum(serialize = "RiceRoundDownloadMaskNode")]
    DownloadMask,
    #[strum(serialize = "RiceRoundIntNode")]
    Int,
    #[strum(serialize = "RiceRoundFloatNode")]
    Float,
    #[strum(serialize = "RiceRoundStrToIntNode")]
    StrToInt,
    #[strum(serialize = "RiceRoundStrToFloatNode")]
    StrToFloat,
    #[strum(serialize = "RiceRoundBooleanNode")]
    Boolean,
    #[strum(serialize = "RiceRoundStrToBooleanNode")]
    StrToBoolean,
}

/// Replacement applied to a boundary node of the published workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkflowReplacement {
    pub node_type: &'static str,
    pub name: &'static str,
}

/// Replacement applied to a boundary node of the job record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PromptReplacement {
    pub class_type: &'static str,
    /// the only input kept, set to an empty string
    pub field: &'static str,
}

impl BoundaryKind {
    pub fn from_type(node_type: &str) -> Option<Self> {
        BoundaryKind::from_str(node_type).ok()
    }

    pub fn is_boundary(node_type: &str) -> bool {
        Self::from_type(node_type).is_some()
    }

    pub fn element_type(&self) -> ElementType {
        match self {
            BoundaryKind::SimpleImage | BoundaryKind::DownloadImage | BoundaryKind::ImageBridge => ElementType::ImageUpload,
            BoundaryKind::Image => ElementType::MaskImageUpload,
            BoundaryKind::MaskBridge | BoundaryKind::DownloadMask => ElementType::MaskUpload,
            BoundaryKind::InputText => ElementType::Text,
            BoundaryKind::SimpleChoice | BoundaryKind::AdvancedChoice => ElementType::Choice,
            BoundaryKind::Int | BoundaryKind::StrToInt => ElementType::NumberInt,
            BoundaryKind::Float | BoundaryKind::StrToFloat => ElementType::NumberFloat,
            BoundaryKind::Boolean | BoundaryKind::StrToBoolean => ElementType::Switch,
        }
    }

    pub fn workflow_replacement(&self) -> Option<WorkflowReplacement> {
        let (node_type, name) = match self {
            BoundaryKind::ImageBridge => ("RiceRoundOutputImageBridgeNode", None),
            BoundaryKind::SimpleImage => ("RiceRoundUploadImageNode", None),
            BoundaryKind::Image => ("RiceRoundUploadImageNode", Some("Image&Mask")),
            BoundaryKind::DownloadImage => ("RiceRoundImageUrlNode", None),
            BoundaryKind::MaskBridge => ("RiceRoundOutputMaskBridgeNode", None),
            BoundaryKind::DownloadMask => ("RiceRoundMaskUrlNode", None),
            BoundaryKind::Int => ("RiceRoundOutputIntNode", None),
            BoundaryKind::Float => ("RiceRoundOutputFloatNode", None),
            BoundaryKind::Boolean => ("RiceRoundOutputBooleanNode", None),
            BoundaryKind::StrToBoolean | BoundaryKind::StrToInt | BoundaryKind::StrToFloat => ("RiceRoundOutputTextNode", None),
            BoundaryKind::SimpleChoice | BoundaryKind::AdvancedChoice | BoundaryKind::InputText => return None,
        };
        Some(WorkflowReplacement {
            node_type,
            name: name.unwrap_or(node_type),
        })
    }

    pub fn prompt_replacement(&self) -> Option<PromptReplacement> {
        let (class_type, field) = match self {
            BoundaryKind::ImageBridge | BoundaryKind::SimpleImage => ("RiceRoundDownloadImageNode", "image_url"),
            BoundaryKind::Image => ("RiceRoundDownloadImageAndMaskNode", "image_url"),
            BoundaryKind::MaskBridge => ("RiceRoundDownloadMaskNode", "mask_url"),
            BoundaryKind::Int => ("RiceRoundStrToIntNode", "str"),
            BoundaryKind::Float => ("RiceRoundStrToFloatNode", "str"),
            BoundaryKind::Boolean => ("RiceRoundStrToBooleanNode", "str"),
            _ => return None,
        };
        Some(PromptReplacement { class_type, field })
    }
}

/// Node type names of the plugin and the titles the host shows for them.
pub const NODE_DISPLAY_NAMES: [(&str, &str); 28] = [
    (SIMPLE_CHOICE_NODE, "Simple Choice"),
    (ADVANCED_CHOICE_NODE, "Advanced Choice"),
    ("RiceRoundImageBridgeNode", "Image Bridge"),
    ("RiceRoundSimpleImageNode", "Simple Image"),
    ("RiceRoundImageNode", "Image & Mask"),
    ("RiceRoundDownloadImageAndMaskNode", "Download Image&Mask"),
    ("RiceRoundDownloadImageNode", "Download Image"),
    (RANDOM_SEED_NODE, "Random Seed"),
    ("RiceRoundInputTextNode", "Input Text"),
    ("RiceRoundMaskBridgeNode", "Mask Bridge"),
    ("RiceRoundDownloadMaskNode", "Download Mask"),
    ("RiceRoundIntNode", "RiceRound Int"),
    ("RiceRoundFloatNode", "RiceRound Float"),
    ("RiceRoundBooleanNode", "RiceRound Boolean"),
    ("RiceRoundStrToIntNode", "RiceRound Str To Int"),
    ("RiceRoundStrToFloatNode", "RiceRound Str To Float"),
    ("RiceRoundStrToBooleanNode", "RiceRound Str To Boolean"),
    (DECRYPT_NODE, "Decrypt"),
    ("RiceRoundOutputImageBridgeNode", "Output Image Bridge"),
    ("RiceRoundImageUrlNode", "Image URL"),
    ("RiceRoundUploadImageNode", "Upload Image"),
    ("RiceRoundOutputMaskBridgeNode", "Output Mask Bridge"),
    ("RiceRoundOutputIntNode", "Output Int"),
    ("RiceRoundOutputFloatNode", "Output Float"),
    ("RiceRoundOutputBooleanNode", "Output Boolean"),
    ("RiceRoundOutputTextNode", "Output Text"),
    (ENCRYPT_NODE, "Encrypt"),
    (OUTPUT_IMAGE_NODE, "Output Image"),
];

/// Labels that never override an element's default description.
pub fn reserved_titles<I: IntoIterator<Item = String>>(extra: I) -> HashSet<String> {
    NODE_DISPLAY_NAMES
        .iter()
        .flat_map(|(k, v)| [k.to_string(), v.to_string()])
        .chain(extra)
        .collect()
}
