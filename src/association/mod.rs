//! Association kinds, model-level association declarations and instance edges

mod engine;

pub use engine::AssociationEngine;

use serde::{Deserialize, Serialize};

/// Preset association kinds seeded by `CmdbStore::init`
pub const PRESET_KINDS: &[(&str, &str, &str, &str)] = &[
    ("belong", "Belong", "belongs to", "has"),
    ("group", "Group", "groups", "is grouped by"),
    ("run", "Run", "runs", "runs on"),
    ("connect", "Connect", "connects to", "is connected by"),
    ("default", "Default", "relates to", "is related by"),
];

/// Which way an association kind reads
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    #[default]
    None,
    SrcToDest,
    Bidirectional,
}

/// Cardinality of a model association
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Mapping {
    #[serde(rename = "1:1")]
    OneToOne,
    #[serde(rename = "1:n")]
    OneToMany,
    #[serde(rename = "n:n")]
    ManyToMany,
}

/// What removing one side of an edge should do to the other (metadata only)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum OnDelete {
    #[default]
    None,
    DeleteSrc,
    DeleteDest,
}

/// The type of a relationship, e.g. "belong"
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AssociationKind {
    pub kind_id: String,
    pub name: String,
    /// Reading from the source side
    #[serde(default)]
    pub src_des: String,
    /// Reading from the destination side
    #[serde(default)]
    pub dest_des: String,
    #[serde(default)]
    pub direction: Direction,
    #[serde(default)]
    pub is_preset: bool,
    pub owner_id: String,
    pub create_time: String,
    pub last_time: String,
}

/// Request to create an association kind
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateKindRequest {
    pub kind_id: String,
    pub name: String,
    #[serde(default)]
    pub src_des: String,
    #[serde(default)]
    pub dest_des: String,
    #[serde(default)]
    pub direction: Direction,
}

impl CreateKindRequest {
    pub fn new(kind_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind_id: kind_id.into(),
            name: name.into(),
            src_des: String::new(),
            dest_des: String::new(),
            direction: Direction::default(),
        }
    }

    pub fn with_descriptions(mut self, src_des: impl Into<String>, dest_des: impl Into<String>) -> Self {
        self.src_des = src_des.into();
        self.dest_des = dest_des.into();
        self
    }

    pub fn with_direction(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self
    }
}

/// Request to update an association kind
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateKindRequest {
    pub name: Option<String>,
    pub src_des: Option<String>,
    pub dest_des: Option<String>,
    pub direction: Option<Direction>,
}

impl UpdateKindRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_direction(mut self, direction: Direction) -> Self {
        self.direction = Some(direction);
        self
    }
}

/// Declares that instances of `object_id` may link to instances of `asst_object_id`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ModelAssociation {
    /// `{objectId}_{kindId}_{asstObjectId}`
    #[serde(rename = "objAsstId")]
    pub id: String,
    pub object_id: String,
    pub asst_object_id: String,
    pub kind_id: String,
    pub mapping: Mapping,
    #[serde(default)]
    pub on_delete: OnDelete,
    #[serde(default)]
    pub alias_name: String,
    #[serde(default)]
    pub is_preset: bool,
    pub owner_id: String,
    pub create_time: String,
    pub last_time: String,
}

impl ModelAssociation {
    pub fn make_id(object_id: &str, kind_id: &str, asst_object_id: &str) -> String {
        format!("{}_{}_{}", object_id, kind_id, asst_object_id)
    }
}

/// Request to declare a model association
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateModelAssociationRequest {
    pub object_id: String,
    pub asst_object_id: String,
    pub kind_id: String,
    pub mapping: Mapping,
    #[serde(default)]
    pub on_delete: OnDelete,
    #[serde(default)]
    pub alias_name: String,
    #[serde(default)]
    pub is_preset: bool,
}

impl CreateModelAssociationRequest {
    pub fn new(
        object_id: impl Into<String>,
        kind_id: impl Into<String>,
        asst_object_id: impl Into<String>,
        mapping: Mapping,
    ) -> Self {
        Self {
            object_id: object_id.into(),
            asst_object_id: asst_object_id.into(),
            kind_id: kind_id.into(),
            mapping,
            on_delete: OnDelete::default(),
            alias_name: String::new(),
            is_preset: false,
        }
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias_name = alias.into();
        self
    }

    pub fn with_on_delete(mut self, on_delete: OnDelete) -> Self {
        self.on_delete = on_delete;
        self
    }

    pub fn preset(mut self) -> Self {
        self.is_preset = true;
        self
    }
}

/// A concrete edge between two instances
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InstanceAssociation {
    pub id: u64,
    pub obj_asst_id: String,
    pub kind_id: String,
    pub object_id: String,
    pub inst_id: u64,
    pub asst_object_id: String,
    pub asst_inst_id: u64,
    pub owner_id: String,
    pub create_time: String,
}

/// Request to link two instances under a model association
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CreateInstanceAssociationRequest {
    pub obj_asst_id: String,
    pub inst_id: u64,
    pub asst_inst_id: u64,
}

impl CreateInstanceAssociationRequest {
    pub fn new(obj_asst_id: impl Into<String>, inst_id: u64, asst_inst_id: u64) -> Self {
        Self {
            obj_asst_id: obj_asst_id.into(),
            inst_id,
            asst_inst_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wire_names() {
        assert_eq!(serde_json::to_value(Mapping::OneToOne).unwrap(), json!("1:1"));
        assert_eq!(serde_json::to_value(Mapping::OneToMany).unwrap(), json!("1:n"));
        assert_eq!(serde_json::to_value(Direction::SrcToDest).unwrap(), json!("src_to_dest"));
        assert_eq!(serde_json::to_value(OnDelete::DeleteDest).unwrap(), json!("delete_dest"));
        let mapping: Mapping = serde_json::from_value(json!("n:n")).unwrap();
        assert_eq!(mapping, Mapping::ManyToMany);
    }

    #[test]
    fn test_model_association_id() {
        assert_eq!(
            ModelAssociation::make_id("switch", "connect", "router"),
            "switch_connect_router"
        );
    }

    #[test]
    fn test_model_association_serializes_obj_asst_id() {
        let assoc = ModelAssociation {
            id: "a_run_b".into(),
            object_id: "a".into(),
            asst_object_id: "b".into(),
            kind_id: "run".into(),
            mapping: Mapping::OneToMany,
            on_delete: OnDelete::None,
            alias_name: String::new(),
            is_preset: false,
            owner_id: "0".into(),
            create_time: "t".into(),
            last_time: "t".into(),
        };
        let value = serde_json::to_value(&assoc).unwrap();
        assert_eq!(value["objAsstId"], json!("a_run_b"));
        assert_eq!(value["mapping"], json!("1:n"));
        assert_eq!(value["onDelete"], json!("none"));
    }
}
