use crate::chat::{Embed, EmbedField};
use crate::model::field::Field;
use uuid::Uuid;

/// A reference-valued template attribute: cleared, a resolved snowflake id,
/// or a deferred embedded-command expression stored verbatim.
///
/// All three states live in one nullable TEXT column; command text is
/// recognizable by its `{{` prefix.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum RefValue {
    #[default]
    None,
    Id(String),
    Command(String),
}

impl RefValue {
    pub fn as_column(&self) -> Option<&str> {
        match self {
            Self::None => None,
            Self::Id(id) | Self::Command(id) => Some(id),
        }
    }

    pub fn from_column(raw: Option<String>) -> Self {
        match raw {
            None => Self::None,
            Some(text) if text.starts_with("{{") => Self::Command(text),
            Some(id) => Self::Id(id),
        }
    }

    /// Render for the summary embed: a channel mention, or the stored
    /// command text, or "N/A".
    pub fn display_channel(&self) -> String {
        match self {
            Self::None => "N/A".into(),
            Self::Id(id) => format!("<#{id}>"),
            Self::Command(text) => text.clone(),
        }
    }

    pub fn display_role(&self) -> String {
        match self {
            Self::None => "N/A".into(),
            Self::Id(id) => format!("<@&{id}>"),
            Self::Command(text) => text.clone(),
        }
    }
}

/// The editable template attributes offered on the top-level menu.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateAttr {
    Name,
    VerificationChannel,
    ArchiveChannel,
    GrantRole,
    MaxProfileCount,
    MaxFieldCount,
}

impl TemplateAttr {
    pub fn column(self) -> &'static str {
        match self {
            Self::Name => "name",
            Self::VerificationChannel => "verification_channel",
            Self::ArchiveChannel => "archive_channel",
            Self::GrantRole => "grant_role",
            Self::MaxProfileCount => "max_profile_count",
            Self::MaxFieldCount => "max_field_count",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Name => "name",
            Self::VerificationChannel => "verification channel",
            Self::ArchiveChannel => "archive channel",
            Self::GrantRole => "role",
            Self::MaxProfileCount => "max profile count",
            Self::MaxFieldCount => "max field count",
        }
    }

    pub fn is_reference(self) -> bool {
        matches!(
            self,
            Self::VerificationChannel | Self::ArchiveChannel | Self::GrantRole
        )
    }

    /// The prompt shown when asking for this attribute's new value.
    pub fn prompt_text(self) -> String {
        if self.is_reference() {
            let mut text = format!(
                "What do you want to set the template's **{}** to? \
                 You can give a name, a ping, or an ID, or say `continue` to set the value to null.",
                self.label()
            );
            if self == Self::VerificationChannel {
                text.push_str(
                    " Note that any current pending profiles will _not_ be able to be \
                     approved after moving the channel.",
                );
            }
            text
        } else {
            format!(
                "What do you want to set the template's **{}** to?",
                self.label()
            )
        }
    }
}

/// A validated value ready to be persisted for a template attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttrValue {
    Name(String),
    Reference(RefValue),
    Count(i64),
}

/// A named, guild-owned record type definition with an ordered field list.
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    pub id: String,
    pub guild_id: i64,
    pub name: String,
    pub verification_channel: RefValue,
    pub archive_channel: RefValue,
    pub grant_role: RefValue,
    pub max_profile_count: i64,
    pub max_field_count: i64,
    pub colour: u32,
}

impl Template {
    pub const NAME_MAX_LEN: usize = 30;
    pub const DEFAULT_MAX_PROFILE_COUNT: i64 = 1;
    pub const DEFAULT_MAX_FIELD_COUNT: i64 = 10;

    pub fn new(guild_id: i64, name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            guild_id,
            name: name.into(),
            verification_channel: RefValue::None,
            archive_channel: RefValue::None,
            grant_role: RefValue::None,
            max_profile_count: Self::DEFAULT_MAX_PROFILE_COUNT,
            max_field_count: Self::DEFAULT_MAX_FIELD_COUNT,
            colour: 0,
        }
    }

    /// Creation-time name rule: ASCII letters and digits only. Renames are
    /// exempt (they only check length and uniqueness).
    pub fn is_valid_name(name: &str) -> bool {
        !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric())
    }

    pub fn name_length_ok(name: &str) -> bool {
        (1..=Self::NAME_MAX_LEN).contains(&name.len())
    }

    /// The user-facing command names generated from the template name.
    pub fn command_names(&self) -> (String, String, String) {
        let lower = self.name.to_lowercase();
        (
            format!("set{lower}"),
            format!("edit{lower}"),
            format!("get{lower}"),
        )
    }

    /// Apply a validated attribute value to the in-memory snapshot.
    pub fn apply(&mut self, attr: TemplateAttr, value: &AttrValue) {
        match (attr, value) {
            (TemplateAttr::Name, AttrValue::Name(name)) => self.name.clone_from(name),
            (TemplateAttr::VerificationChannel, AttrValue::Reference(r)) => {
                self.verification_channel = r.clone();
            }
            (TemplateAttr::ArchiveChannel, AttrValue::Reference(r)) => {
                self.archive_channel = r.clone();
            }
            (TemplateAttr::GrantRole, AttrValue::Reference(r)) => self.grant_role = r.clone(),
            (TemplateAttr::MaxProfileCount, AttrValue::Count(n)) => self.max_profile_count = *n,
            (TemplateAttr::MaxFieldCount, AttrValue::Count(n)) => self.max_field_count = *n,
            _ => debug_assert!(false, "attribute/value kind mismatch"),
        }
    }

    /// Build the brief summary embed shown and re-rendered during an edit
    /// session.
    pub fn summary_embed(&self, fields: &[Field]) -> Embed {
        let mut embed = Embed {
            title: Some(self.name.clone()),
            description: format!(
                "Verification channel: {}\nArchive channel: {}\nGiven role: {}\n\
                 Max profiles per user: {}",
                self.verification_channel.display_channel(),
                self.archive_channel.display_channel(),
                self.grant_role.display_role(),
                self.max_profile_count,
            ),
            colour: self.colour,
            fields: Vec::new(),
        };
        let mut live: Vec<&Field> = fields.iter().filter(|f| !f.deleted).collect();
        live.sort_by_key(|f| f.index);
        for field in live {
            let marker = if field.optional { " (optional)" } else { "" };
            embed.fields.push(EmbedField {
                name: format!("(#{}) {}{marker}", field.index, field.name),
                value: field.prompt.clone(),
                inline: false,
            });
        }
        embed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::field::FieldType;

    #[test]
    fn new_template_has_documented_defaults() {
        let t = Template::new(123, "hero");
        assert_eq!(t.max_profile_count, 1);
        assert_eq!(t.max_field_count, 10);
        assert_eq!(t.colour, 0);
        assert_eq!(t.verification_channel, RefValue::None);
    }

    #[test]
    fn name_charset_is_ascii_alphanumeric() {
        assert!(Template::is_valid_name("hero"));
        assert!(Template::is_valid_name("Hero2"));
        assert!(!Template::is_valid_name("hero!"));
        assert!(!Template::is_valid_name("her o"));
        assert!(!Template::is_valid_name("héro"));
        assert!(!Template::is_valid_name(""));
    }

    #[test]
    fn name_length_bounds() {
        assert!(Template::name_length_ok("a"));
        assert!(Template::name_length_ok(&"a".repeat(30)));
        assert!(!Template::name_length_ok(&"a".repeat(31)));
        assert!(!Template::name_length_ok(""));
    }

    #[test]
    fn command_names_lowercase_the_template_name() {
        let t = Template::new(1, "Hero");
        let (set, edit, get) = t.command_names();
        assert_eq!(set, "sethero");
        assert_eq!(edit, "edithero");
        assert_eq!(get, "gethero");
    }

    #[test]
    fn ref_value_column_round_trip() {
        assert_eq!(RefValue::from_column(None), RefValue::None);
        assert_eq!(
            RefValue::from_column(Some("123456".into())),
            RefValue::Id("123456".into())
        );
        let cmd = "{{DEFAULT \"x\" HASROLE(1234567890123456) SAYS \"y\"}}";
        assert_eq!(
            RefValue::from_column(Some(cmd.into())),
            RefValue::Command(cmd.into())
        );
        assert_eq!(RefValue::Command(cmd.into()).as_column(), Some(cmd));
        assert_eq!(RefValue::None.as_column(), None);
    }

    #[test]
    fn apply_updates_the_snapshot() {
        let mut t = Template::new(1, "hero");
        t.apply(TemplateAttr::Name, &AttrValue::Name("villain".into()));
        assert_eq!(t.name, "villain");
        t.apply(TemplateAttr::MaxProfileCount, &AttrValue::Count(3));
        assert_eq!(t.max_profile_count, 3);
        t.apply(
            TemplateAttr::GrantRole,
            &AttrValue::Reference(RefValue::Id("42".into())),
        );
        assert_eq!(t.grant_role, RefValue::Id("42".into()));
    }

    #[test]
    fn summary_embed_skips_deleted_fields_and_sorts_by_index() {
        let t = Template::new(1, "hero");
        let a = Field::new(&t.id, 1, "Age", "How old?", 120, FieldType::Numeric, false);
        let b = Field::new(&t.id, 0, "Name", "Who?", 120, FieldType::Text, true);
        let mut c = Field::new(&t.id, 2, "Gone", "?", 120, FieldType::Text, false);
        c.deleted = true;
        let embed = t.summary_embed(&[a, b, c]);
        assert_eq!(embed.fields.len(), 2);
        assert!(embed.fields[0].name.contains("(#0) Name"));
        assert!(embed.fields[0].name.contains("(optional)"));
        assert!(embed.fields[1].name.contains("(#1) Age"));
    }
}
