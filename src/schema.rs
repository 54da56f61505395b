//! Schema-related types for the CMDB store
//!
//! Includes Classification, Model, Attribute, AttributeGroup and their request types.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{AttributeType, fields};

/// Name of the attribute group every model starts with
pub const DEFAULT_GROUP: &str = "default";

/// Current time as stamped on records
pub(crate) fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

fn default_true() -> bool {
    true
}

fn default_group() -> String {
    DEFAULT_GROUP.to_string()
}

fn default_id_field() -> String {
    fields::DEFAULT_ID.to_string()
}

// ============================================================================
// Classification
// ============================================================================

/// Folder grouping models
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Classification {
    pub classification_id: String,
    pub name: String,
    #[serde(default)]
    pub icon: String,
    pub owner_id: String,
    pub create_time: String,
    pub last_time: String,
}

/// Request to create a classification
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateClassificationRequest {
    pub classification_id: String,
    pub name: String,
    #[serde(default)]
    pub icon: String,
}

impl CreateClassificationRequest {
    pub fn new(classification_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            classification_id: classification_id.into(),
            name: name.into(),
            icon: String::new(),
        }
    }

    pub fn with_icon(mut self, icon: impl Into<String>) -> Self {
        self.icon = icon.into();
        self
    }
}

/// Request to update a classification
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateClassificationRequest {
    pub name: Option<String>,
    pub icon: Option<String>,
}

impl UpdateClassificationRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_icon(mut self, icon: impl Into<String>) -> Self {
        self.icon = Some(icon.into());
        self
    }
}

// ============================================================================
// Model
// ============================================================================

/// Model metadata; identity is `(ownerId, objectId)`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Model {
    pub object_id: String,
    pub classification_id: String,
    pub name: String,
    #[serde(default)]
    pub icon: String,
    pub owner_id: String,
    #[serde(default)]
    pub is_preset: bool,
    /// Field holding the instance id
    #[serde(default = "default_id_field")]
    pub id_field: String,
    /// Dedicated instance collection; `None` stores instances in the shared collection
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection: Option<String>,
    pub create_time: String,
    pub last_time: String,
}

/// Request to create a model
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateModelRequest {
    pub object_id: String,
    pub classification_id: String,
    pub name: String,
    #[serde(default)]
    pub icon: String,
    #[serde(default)]
    pub is_preset: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_field: Option<String>,
    /// Store instances in `{objectId}` rather than the shared collection
    #[serde(default)]
    pub dedicated_collection: bool,
}

impl CreateModelRequest {
    pub fn new(
        object_id: impl Into<String>,
        classification_id: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            object_id: object_id.into(),
            classification_id: classification_id.into(),
            name: name.into(),
            icon: String::new(),
            is_preset: false,
            id_field: None,
            dedicated_collection: false,
        }
    }

    pub fn with_icon(mut self, icon: impl Into<String>) -> Self {
        self.icon = icon.into();
        self
    }

    pub fn preset(mut self) -> Self {
        self.is_preset = true;
        self
    }

    pub fn with_id_field(mut self, field: impl Into<String>) -> Self {
        self.id_field = Some(field.into());
        self
    }

    pub fn with_dedicated_collection(mut self) -> Self {
        self.dedicated_collection = true;
        self
    }
}

/// Request to update a model
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateModelRequest {
    pub name: Option<String>,
    pub icon: Option<String>,
    pub classification_id: Option<String>,
}

impl UpdateModelRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_icon(mut self, icon: impl Into<String>) -> Self {
        self.icon = Some(icon.into());
        self
    }

    pub fn with_classification(mut self, classification_id: impl Into<String>) -> Self {
        self.classification_id = Some(classification_id.into());
        self
    }
}

// ============================================================================
// Attribute
// ============================================================================

/// Attribute declaration; identity is `(objectId, propertyId)`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Attribute {
    /// Numeric id, referenced by unique constraints
    pub id: u64,
    pub object_id: String,
    pub property_id: String,
    pub name: String,
    #[serde(flatten)]
    pub attr_type: AttributeType,
    #[serde(default)]
    pub required: bool,
    #[serde(default = "default_true")]
    pub editable: bool,
    #[serde(default = "default_group")]
    pub group_id: String,
    #[serde(default)]
    pub index: i64,
    #[serde(default)]
    pub is_preset: bool,
    /// Value filled on create when the payload omits the field
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    /// Business scope; `None` applies to every scope
    #[serde(default)]
    pub biz_id: Option<i64>,
    pub owner_id: String,
    pub create_time: String,
    pub last_time: String,
}

/// Request to create an attribute
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAttributeRequest {
    pub property_id: String,
    pub name: String,
    #[serde(flatten)]
    pub attr_type: AttributeType,
    #[serde(default)]
    pub required: bool,
    #[serde(default = "default_true")]
    pub editable: bool,
    #[serde(default = "default_group")]
    pub group_id: String,
    #[serde(default)]
    pub index: i64,
    #[serde(default)]
    pub is_preset: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default)]
    pub biz_id: Option<i64>,
}

impl CreateAttributeRequest {
    pub fn new(
        property_id: impl Into<String>,
        name: impl Into<String>,
        attr_type: AttributeType,
    ) -> Self {
        Self {
            property_id: property_id.into(),
            name: name.into(),
            attr_type,
            required: false,
            editable: true,
            group_id: default_group(),
            index: 0,
            is_preset: false,
            default: None,
            biz_id: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn read_only(mut self) -> Self {
        self.editable = false;
        self
    }

    pub fn preset(mut self) -> Self {
        self.is_preset = true;
        self
    }

    pub fn in_group(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = group_id.into();
        self
    }

    pub fn with_index(mut self, index: i64) -> Self {
        self.index = index;
        self
    }

    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn with_biz(mut self, biz_id: i64) -> Self {
        self.biz_id = Some(biz_id);
        self
    }
}

/// Request to update an attribute
///
/// `attr_type` may change options but never the type variant.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateAttributeRequest {
    pub name: Option<String>,
    pub attr_type: Option<AttributeType>,
    pub required: Option<bool>,
    pub editable: Option<bool>,
    pub group_id: Option<String>,
    pub index: Option<i64>,
    /// `Some(Value::Null)` clears the default
    pub default: Option<Value>,
}

impl UpdateAttributeRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_type(mut self, attr_type: AttributeType) -> Self {
        self.attr_type = Some(attr_type);
        self
    }

    pub fn with_required(mut self, required: bool) -> Self {
        self.required = Some(required);
        self
    }

    pub fn with_editable(mut self, editable: bool) -> Self {
        self.editable = Some(editable);
        self
    }

    pub fn with_group(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = Some(group_id.into());
        self
    }

    pub fn with_index(mut self, index: i64) -> Self {
        self.index = Some(index);
        self
    }

    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    /// True when only fields a preset attribute may change are set
    pub fn is_layout_only(&self) -> bool {
        self.attr_type.is_none()
            && self.required.is_none()
            && self.editable.is_none()
            && self.default.is_none()
    }
}

// ============================================================================
// Attribute group
// ============================================================================

/// Grouping and ordering metadata; identity is `(objectId, groupId)`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AttributeGroup {
    pub object_id: String,
    pub group_id: String,
    pub name: String,
    #[serde(default)]
    pub index: i64,
    #[serde(default)]
    pub is_default: bool,
    pub owner_id: String,
    #[serde(default)]
    pub biz_id: Option<i64>,
}

/// Request to create an attribute group
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateGroupRequest {
    pub group_id: String,
    pub name: String,
    #[serde(default)]
    pub index: i64,
    #[serde(default)]
    pub biz_id: Option<i64>,
}

impl CreateGroupRequest {
    pub fn new(group_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            group_id: group_id.into(),
            name: name.into(),
            index: 0,
            biz_id: None,
        }
    }

    pub fn with_index(mut self, index: i64) -> Self {
        self.index = index;
        self
    }
}

/// Request to update an attribute group
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateGroupRequest {
    pub name: Option<String>,
    pub index: Option<i64>,
}

impl UpdateGroupRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_index(mut self, index: i64) -> Self {
        self.index = Some(index);
        self
    }
}

// ============================================================================
// Record construction
// ============================================================================

impl Classification {
    pub(crate) fn from_request(request: CreateClassificationRequest, owner_id: &str) -> Self {
        let now = now();
        Self {
            classification_id: request.classification_id,
            name: request.name,
            icon: request.icon,
            owner_id: owner_id.to_string(),
            create_time: now.clone(),
            last_time: now,
        }
    }
}

impl Model {
    pub(crate) fn from_request(request: CreateModelRequest, owner_id: &str) -> Self {
        let now = now();
        let collection = request
            .dedicated_collection
            .then(|| request.object_id.clone());
        Self {
            object_id: request.object_id,
            classification_id: request.classification_id,
            name: request.name,
            icon: request.icon,
            owner_id: owner_id.to_string(),
            is_preset: request.is_preset,
            id_field: request.id_field.unwrap_or_else(default_id_field),
            collection,
            create_time: now.clone(),
            last_time: now,
        }
    }
}

impl Attribute {
    pub(crate) fn from_request(
        id: u64,
        object_id: &str,
        request: CreateAttributeRequest,
        owner_id: &str,
    ) -> Self {
        let now = now();
        Self {
            id,
            object_id: object_id.to_string(),
            property_id: request.property_id,
            name: request.name,
            attr_type: request.attr_type,
            required: request.required,
            editable: request.editable,
            group_id: request.group_id,
            index: request.index,
            is_preset: request.is_preset,
            default: request.default,
            biz_id: request.biz_id,
            owner_id: owner_id.to_string(),
            create_time: now.clone(),
            last_time: now,
        }
    }
}

impl AttributeGroup {
    pub(crate) fn default_for(object_id: &str, owner_id: &str) -> Self {
        Self {
            object_id: object_id.to_string(),
            group_id: DEFAULT_GROUP.to_string(),
            name: "Default".to_string(),
            index: -1,
            is_default: true,
            owner_id: owner_id.to_string(),
            biz_id: None,
        }
    }

    pub(crate) fn from_request(object_id: &str, request: CreateGroupRequest, owner_id: &str) -> Self {
        Self {
            object_id: object_id.to_string(),
            group_id: request.group_id,
            name: request.name,
            index: request.index,
            is_default: false,
            owner_id: owner_id.to_string(),
            biz_id: request.biz_id,
        }
    }
}
