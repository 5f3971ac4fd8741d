use serde::{Deserialize, Serialize};

/// Closed set of slot types. Used for authoring-time validation only — the
/// executor checks structural presence, not types, at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotType {
    String,
    Number,
    Boolean,
    Object,
    Array,
    /// The ambient run context itself.
    Context,
    /// Output of a skill/tool invocation: `{success, output, error}`.
    SkillResult,
    /// Output of a model call: `{content}`.
    LlmResponse,
    /// Compatible with everything.
    Any,
}

impl SlotType {
    /// Whether a value produced as `other` may feed a slot of this type.
    pub fn accepts(self, other: SlotType) -> bool {
        self == SlotType::Any || other == SlotType::Any || self == other
    }
}

/// A named, typed input or output slot on a node definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotSpec {
    pub name: String,
    pub slot_type: SlotType,
    #[serde(default)]
    pub required: bool,
}

impl SlotSpec {
    pub fn required(name: impl Into<String>, slot_type: SlotType) -> Self {
        Self {
            name: name.into(),
            slot_type,
            required: true,
        }
    }

    pub fn optional(name: impl Into<String>, slot_type: SlotType) -> Self {
        Self {
            name: name.into(),
            slot_type,
            required: false,
        }
    }
}
