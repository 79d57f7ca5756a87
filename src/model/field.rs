use uuid::Uuid;

/// The type given to a template field. At most one non-deleted `Image` field
/// may exist per template.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Text,
    Numeric,
    Image,
}

impl FieldType {
    /// Stable wire names, shared with the database column.
    pub fn wire_name(self) -> &'static str {
        match self {
            Self::Text => "1000-CHAR",
            Self::Numeric => "INT",
            Self::Image => "IMAGE",
        }
    }

    pub fn from_wire(raw: &str) -> Option<Self> {
        match raw {
            "1000-CHAR" => Some(Self::Text),
            "INT" => Some(Self::Numeric),
            "IMAGE" => Some(Self::Image),
            _ => None,
        }
    }

    /// The keyword table used when editing an existing field's type.
    ///
    /// Image is intentionally absent: it is a one-shot choice at field
    /// creation and cannot be reached through the edit path.
    pub fn from_keyword(raw: &str) -> Option<Self> {
        match raw.to_lowercase().as_str() {
            "text" | "string" | "str" => Some(Self::Text),
            "number" | "numbers" | "int" | "integer" => Some(Self::Numeric),
            _ => None,
        }
    }
}

/// The editable attributes of an existing field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldAttr {
    Name,
    Prompt,
    Optional,
    Type,
}

impl FieldAttr {
    pub fn column(self) -> &'static str {
        match self {
            Self::Name => "name",
            Self::Prompt => "prompt",
            Self::Optional => "optional",
            Self::Type => "field_type",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Name => "name",
            Self::Prompt => "prompt",
            Self::Optional => "optional",
            Self::Type => "type",
        }
    }

    /// Custom prompt for the value question, if the default "what do you
    /// want to set the X to" does not fit.
    pub fn prompt_text(self) -> Option<&'static str> {
        match self {
            Self::Optional => {
                Some("Do you want this field to be optional? Type **yes** or **no**.")
            }
            Self::Type => {
                Some("What type do you want this field to have? Type **text**, or **number**.")
            }
            Self::Name | Self::Prompt => None,
        }
    }

    /// Validate and convert a free-text answer for this attribute. Returns
    /// the value to persist or a human-readable rejection forcing a re-ask.
    pub fn accept(self, raw: &str) -> Result<FieldValue, &'static str> {
        match self {
            Self::Name => {
                if raw.is_empty() || raw.len() > Field::NAME_MAX_LEN {
                    Err("Your given field name is too long. Please provide another.")
                } else {
                    Ok(FieldValue::Text(raw.to_string()))
                }
            }
            Self::Prompt => {
                if raw.is_empty() {
                    Err("Your given field prompt is too short. Please provide another.")
                } else {
                    Ok(FieldValue::Text(raw.to_string()))
                }
            }
            Self::Optional => match raw.to_lowercase().as_str() {
                "yes" | "true" => Ok(FieldValue::Flag(true)),
                "no" | "false" => Ok(FieldValue::Flag(false)),
                _ => Err("You need to say either **yes** or **no** for this field."),
            },
            Self::Type => FieldType::from_keyword(raw)
                .map(FieldValue::Type)
                .ok_or("You need to say either **text** or **number** for this field."),
        }
    }
}

/// A validated value ready to be persisted for a field attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Text(String),
    Flag(bool),
    Type(FieldType),
}

/// One named, typed, optionally-required slot within a template.
///
/// `index` is assigned monotonically (count of all rows ever created for the
/// template, deleted included) and never reused; deletion is a soft flag.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub id: String,
    pub template_id: String,
    pub name: String,
    pub prompt: String,
    pub timeout_secs: i64,
    pub field_type: FieldType,
    pub optional: bool,
    pub index: i64,
    pub deleted: bool,
}

impl Field {
    pub const NAME_MAX_LEN: usize = 256;
    pub const TIMEOUT_MIN_SECS: i64 = 30;
    pub const TIMEOUT_MAX_SECS: i64 = 600;
    /// Timeout applied to fields whose prompt is an embedded command
    /// expression (the user never actually answers those).
    pub const COMMAND_PROMPT_TIMEOUT_SECS: i64 = 15;

    pub fn new(
        template_id: &str,
        index: i64,
        name: impl Into<String>,
        prompt: impl Into<String>,
        timeout_secs: i64,
        field_type: FieldType,
        optional: bool,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            template_id: template_id.to_string(),
            name: name.into(),
            prompt: prompt.into(),
            timeout_secs,
            field_type,
            optional,
            index,
            deleted: false,
        }
    }
}
