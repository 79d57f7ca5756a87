pub mod sqlite;

pub use sqlite::SqliteTemplateStore;

use crate::error::StoreError;
use crate::model::{AttrValue, Field, FieldAttr, FieldValue, Template, TemplateAttr};
use async_trait::async_trait;

/// Per-guild limits, with a global default row (`guild_id = 0`) as fallback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuildSettings {
    pub guild_id: i64,
    pub max_template_count: i64,
    pub max_template_field_count: i64,
    pub max_template_profile_count: i64,
}

/// One line of the template listing: name, id, created profile count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateOverview {
    pub id: String,
    pub name: String,
    pub profile_count: i64,
}

/// Async persistence contract for templates, fields, and guild settings.
///
/// Every method is a single atomic statement; the editor deliberately does
/// not wrap a session in a cross-step transaction.
#[async_trait]
pub trait TemplateStore: Send + Sync {
    async fn insert_template(&self, template: &Template) -> Result<(), StoreError>;

    async fn get_template(&self, id: &str) -> Result<Option<Template>, StoreError>;

    async fn find_template_by_name(
        &self,
        guild_id: i64,
        name: &str,
    ) -> Result<Option<Template>, StoreError>;

    /// Case-insensitive name collision check, optionally excluding one
    /// template id (so a rename to the template's own name is a no-op).
    async fn name_in_use(
        &self,
        guild_id: i64,
        name: &str,
        exclude_id: Option<&str>,
    ) -> Result<bool, StoreError>;

    async fn count_templates(&self, guild_id: i64) -> Result<i64, StoreError>;

    async fn list_overviews(&self, guild_id: i64) -> Result<Vec<TemplateOverview>, StoreError>;

    async fn update_template_attr(
        &self,
        template_id: &str,
        attr: TemplateAttr,
        value: &AttrValue,
    ) -> Result<(), StoreError>;

    /// Hard delete; cascades to fields and created profiles.
    async fn delete_template(&self, template_id: &str) -> Result<(), StoreError>;

    /// Insert a field row. Returns `StoreError::TemplateVanished` when the
    /// owning template was deleted mid-session.
    async fn insert_field(&self, field: &Field) -> Result<(), StoreError>;

    async fn update_field_attr(
        &self,
        field_id: &str,
        attr: FieldAttr,
        value: &FieldValue,
    ) -> Result<(), StoreError>;

    async fn soft_delete_field(&self, field_id: &str) -> Result<(), StoreError>;

    /// Non-deleted fields of a template, ordered by index.
    async fn list_fields(&self, template_id: &str) -> Result<Vec<Field>, StoreError>;

    /// Count of every field row ever created for the template, deleted
    /// included — the source of the next monotonic index.
    async fn count_all_fields(&self, template_id: &str) -> Result<i64, StoreError>;

    async fn guild_settings(&self, guild_id: i64) -> Result<GuildSettings, StoreError>;

    async fn count_profiles(&self, template_id: &str) -> Result<i64, StoreError>;
}
