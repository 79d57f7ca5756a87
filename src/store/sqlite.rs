use super::{GuildSettings, TemplateOverview, TemplateStore};
use crate::error::StoreError;
use crate::model::{AttrValue, Field, FieldAttr, FieldType, FieldValue, RefValue, Template, TemplateAttr};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::Row;
use sqlx::sqlite::{SqlitePool, SqliteRow};

/// Global-default settings row, seeded once at schema creation.
const DEFAULT_SETTINGS: GuildSettings = GuildSettings {
    guild_id: 0,
    max_template_count: 5,
    max_template_field_count: 10,
    max_template_profile_count: 5,
};

/// SQLite-backed template store using an sqlx async pool.
pub struct SqliteTemplateStore {
    pool: SqlitePool,
}

impl SqliteTemplateStore {
    /// Create a new store with an existing pool and run migrations.
    pub async fn new(pool: SqlitePool) -> Result<Self, StoreError> {
        sqlx::query("PRAGMA foreign_keys = ON;")
            .execute(&pool)
            .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS templates (
                 id TEXT PRIMARY KEY,
                 guild_id INTEGER NOT NULL,
                 name TEXT NOT NULL,
                 colour INTEGER NOT NULL DEFAULT 0,
                 verification_channel TEXT,
                 archive_channel TEXT,
                 grant_role TEXT,
                 max_profile_count INTEGER NOT NULL DEFAULT 1,
                 max_field_count INTEGER NOT NULL DEFAULT 10,
                 created_at TEXT NOT NULL
             )",
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_templates_guild_name
                 ON templates(guild_id, name COLLATE NOCASE)",
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS fields (
                 id TEXT PRIMARY KEY,
                 template_id TEXT NOT NULL REFERENCES templates(id) ON DELETE CASCADE,
                 name TEXT NOT NULL,
                 prompt TEXT NOT NULL,
                 timeout_secs INTEGER NOT NULL,
                 field_type TEXT NOT NULL,
                 optional INTEGER NOT NULL DEFAULT 0,
                 field_index INTEGER NOT NULL,
                 deleted INTEGER NOT NULL DEFAULT 0,
                 created_at TEXT NOT NULL
             )",
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_fields_template
                 ON fields(template_id, field_index)",
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS profiles (
                 id TEXT PRIMARY KEY,
                 template_id TEXT NOT NULL REFERENCES templates(id) ON DELETE CASCADE,
                 user_id TEXT NOT NULL,
                 created_at TEXT NOT NULL
             )",
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS guild_settings (
                 guild_id INTEGER PRIMARY KEY,
                 max_template_count INTEGER NOT NULL,
                 max_template_field_count INTEGER NOT NULL,
                 max_template_profile_count INTEGER NOT NULL
             )",
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            "INSERT OR IGNORE INTO guild_settings
                 (guild_id, max_template_count, max_template_field_count, max_template_profile_count)
                 VALUES ($1, $2, $3, $4)",
        )
        .bind(DEFAULT_SETTINGS.guild_id)
        .bind(DEFAULT_SETTINGS.max_template_count)
        .bind(DEFAULT_SETTINGS.max_template_field_count)
        .bind(DEFAULT_SETTINGS.max_template_profile_count)
        .execute(&pool)
        .await?;

        Ok(Self { pool })
    }

    /// Access the underlying pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn map_template_row(row: &SqliteRow) -> Result<Template, sqlx::Error> {
    let colour: i64 = row.try_get("colour")?;
    Ok(Template {
        id: row.try_get("id")?,
        guild_id: row.try_get("guild_id")?,
        name: row.try_get("name")?,
        verification_channel: RefValue::from_column(row.try_get("verification_channel")?),
        archive_channel: RefValue::from_column(row.try_get("archive_channel")?),
        grant_role: RefValue::from_column(row.try_get("grant_role")?),
        max_profile_count: row.try_get("max_profile_count")?,
        max_field_count: row.try_get("max_field_count")?,
        colour: u32::try_from(colour).unwrap_or_default(),
    })
}

fn map_field_row(row: &SqliteRow) -> Result<Field, StoreError> {
    let wire: String = row.try_get("field_type")?;
    let field_type = FieldType::from_wire(&wire)
        .ok_or_else(|| StoreError::Database(sqlx::Error::Decode(
            format!("unknown field type: {wire}").into(),
        )))?;
    Ok(Field {
        id: row.try_get("id")?,
        template_id: row.try_get("template_id")?,
        name: row.try_get("name")?,
        prompt: row.try_get("prompt")?,
        timeout_secs: row.try_get("timeout_secs")?,
        field_type,
        optional: row.try_get("optional")?,
        index: row.try_get("field_index")?,
        deleted: row.try_get("deleted")?,
    })
}

fn is_foreign_key_violation(error: &sqlx::Error) -> bool {
    matches!(
        error,
        sqlx::Error::Database(db)
            if db.kind() == sqlx::error::ErrorKind::ForeignKeyViolation
    )
}

#[async_trait]
impl TemplateStore for SqliteTemplateStore {
    async fn insert_template(&self, template: &Template) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO templates
                 (id, guild_id, name, colour, verification_channel, archive_channel,
                  grant_role, max_profile_count, max_field_count, created_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(&template.id)
        .bind(template.guild_id)
        .bind(&template.name)
        .bind(i64::from(template.colour))
        .bind(template.verification_channel.as_column())
        .bind(template.archive_channel.as_column())
        .bind(template.grant_role.as_column())
        .bind(template.max_profile_count)
        .bind(template.max_field_count)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_template(&self, id: &str) -> Result<Option<Template>, StoreError> {
        let row = sqlx::query("SELECT * FROM templates WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| map_template_row(&r)).transpose().map_err(Into::into)
    }

    async fn find_template_by_name(
        &self,
        guild_id: i64,
        name: &str,
    ) -> Result<Option<Template>, StoreError> {
        let row = sqlx::query(
            "SELECT * FROM templates WHERE guild_id = $1 AND LOWER(name) = LOWER($2)",
        )
        .bind(guild_id)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|r| map_template_row(&r)).transpose().map_err(Into::into)
    }

    async fn name_in_use(
        &self,
        guild_id: i64,
        name: &str,
        exclude_id: Option<&str>,
    ) -> Result<bool, StoreError> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM templates
                 WHERE guild_id = $1 AND LOWER(name) = LOWER($2)
                 AND ($3 IS NULL OR id <> $3)",
        )
        .bind(guild_id)
        .bind(name)
        .bind(exclude_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count > 0)
    }

    async fn count_templates(&self, guild_id: i64) -> Result<i64, StoreError> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM templates WHERE guild_id = $1")
                .bind(guild_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    async fn list_overviews(&self, guild_id: i64) -> Result<Vec<TemplateOverview>, StoreError> {
        let rows = sqlx::query(
            "SELECT t.id, t.name, COUNT(p.id) AS profile_count
                 FROM templates t
                 LEFT JOIN profiles p ON p.template_id = t.id
                 WHERE t.guild_id = $1
                 GROUP BY t.id
                 ORDER BY t.name COLLATE NOCASE",
        )
        .bind(guild_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| {
                Ok(TemplateOverview {
                    id: row.try_get("id")?,
                    name: row.try_get("name")?,
                    profile_count: row.try_get("profile_count")?,
                })
            })
            .collect()
    }

    async fn update_template_attr(
        &self,
        template_id: &str,
        attr: TemplateAttr,
        value: &AttrValue,
    ) -> Result<(), StoreError> {
        let sql = format!("UPDATE templates SET {} = $1 WHERE id = $2", attr.column());
        let query = match value {
            AttrValue::Name(name) => sqlx::query(&sql).bind(name.clone()),
            AttrValue::Reference(reference) => {
                sqlx::query(&sql).bind(reference.as_column().map(String::from))
            }
            AttrValue::Count(count) => sqlx::query(&sql).bind(*count),
        };
        query.bind(template_id).execute(&self.pool).await?;
        Ok(())
    }

    async fn delete_template(&self, template_id: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM templates WHERE id = $1")
            .bind(template_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn insert_field(&self, field: &Field) -> Result<(), StoreError> {
        let result = sqlx::query(
            "INSERT INTO fields
                 (id, template_id, name, prompt, timeout_secs, field_type,
                  optional, field_index, deleted, created_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(&field.id)
        .bind(&field.template_id)
        .bind(&field.name)
        .bind(&field.prompt)
        .bind(field.timeout_secs)
        .bind(field.field_type.wire_name())
        .bind(field.optional)
        .bind(field.index)
        .bind(field.deleted)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await;
        match result {
            Ok(_) => Ok(()),
            Err(error) if is_foreign_key_violation(&error) => Err(StoreError::TemplateVanished),
            Err(error) => Err(error.into()),
        }
    }

    async fn update_field_attr(
        &self,
        field_id: &str,
        attr: FieldAttr,
        value: &FieldValue,
    ) -> Result<(), StoreError> {
        let sql = format!("UPDATE fields SET {} = $1 WHERE id = $2", attr.column());
        let query = match value {
            FieldValue::Text(text) => sqlx::query(&sql).bind(text.clone()),
            FieldValue::Flag(flag) => sqlx::query(&sql).bind(*flag),
            FieldValue::Type(ty) => sqlx::query(&sql).bind(ty.wire_name()),
        };
        query.bind(field_id).execute(&self.pool).await?;
        Ok(())
    }

    async fn soft_delete_field(&self, field_id: &str) -> Result<(), StoreError> {
        sqlx::query("UPDATE fields SET deleted = 1 WHERE id = $1")
            .bind(field_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_fields(&self, template_id: &str) -> Result<Vec<Field>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM fields WHERE template_id = $1 AND deleted = 0
                 ORDER BY field_index",
        )
        .bind(template_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(map_field_row).collect()
    }

    async fn count_all_fields(&self, template_id: &str) -> Result<i64, StoreError> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM fields WHERE template_id = $1")
                .bind(template_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    async fn guild_settings(&self, guild_id: i64) -> Result<GuildSettings, StoreError> {
        let row = sqlx::query(
            "SELECT * FROM guild_settings WHERE guild_id = $1 OR guild_id = 0
                 ORDER BY guild_id DESC LIMIT 1",
        )
        .bind(guild_id)
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(row) => Ok(GuildSettings {
                guild_id: row.try_get("guild_id")?,
                max_template_count: row.try_get("max_template_count")?,
                max_template_field_count: row.try_get("max_template_field_count")?,
                max_template_profile_count: row.try_get("max_template_profile_count")?,
            }),
            None => Ok(DEFAULT_SETTINGS),
        }
    }

    async fn count_profiles(&self, template_id: &str) -> Result<i64, StoreError> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM profiles WHERE template_id = $1")
                .bind(template_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn store() -> SqliteTemplateStore {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        SqliteTemplateStore::new(pool).await.unwrap()
    }

    #[tokio::test]
    async fn template_round_trip() {
        let store = store().await;
        let mut template = Template::new(42, "hero");
        template.verification_channel = RefValue::Id("1234".into());
        template.grant_role =
            RefValue::Command("{{DEFAULT \"x\" HASROLE(123456789012345678) SAYS \"y\"}}".into());
        store.insert_template(&template).await.unwrap();

        let loaded = store.get_template(&template.id).await.unwrap().unwrap();
        assert_eq!(loaded, template);
    }

    #[tokio::test]
    async fn find_by_name_is_case_insensitive() {
        let store = store().await;
        let template = Template::new(42, "Hero");
        store.insert_template(&template).await.unwrap();

        let found = store.find_template_by_name(42, "hero").await.unwrap();
        assert_eq!(found.unwrap().id, template.id);
        assert!(store.find_template_by_name(43, "hero").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn name_in_use_excludes_own_id() {
        let store = store().await;
        let template = Template::new(42, "hero");
        store.insert_template(&template).await.unwrap();

        assert!(store.name_in_use(42, "HERO", None).await.unwrap());
        assert!(
            !store
                .name_in_use(42, "HERO", Some(&template.id))
                .await
                .unwrap()
        );
        assert!(!store.name_in_use(42, "other", None).await.unwrap());
    }

    #[tokio::test]
    async fn update_attr_persists_each_value_kind() {
        let store = store().await;
        let template = Template::new(42, "hero");
        store.insert_template(&template).await.unwrap();

        store
            .update_template_attr(&template.id, TemplateAttr::Name, &AttrValue::Name("villain".into()))
            .await
            .unwrap();
        store
            .update_template_attr(
                &template.id,
                TemplateAttr::ArchiveChannel,
                &AttrValue::Reference(RefValue::Id("999".into())),
            )
            .await
            .unwrap();
        store
            .update_template_attr(&template.id, TemplateAttr::MaxProfileCount, &AttrValue::Count(3))
            .await
            .unwrap();

        let loaded = store.get_template(&template.id).await.unwrap().unwrap();
        assert_eq!(loaded.name, "villain");
        assert_eq!(loaded.archive_channel, RefValue::Id("999".into()));
        assert_eq!(loaded.max_profile_count, 3);
    }

    #[tokio::test]
    async fn soft_deleted_fields_keep_their_index() {
        let store = store().await;
        let template = Template::new(42, "hero");
        store.insert_template(&template).await.unwrap();

        for i in 0..3 {
            let field = Field::new(
                &template.id,
                i,
                format!("f{i}"),
                "prompt",
                120,
                FieldType::Text,
                false,
            );
            store.insert_field(&field).await.unwrap();
        }
        let fields = store.list_fields(&template.id).await.unwrap();
        store.soft_delete_field(&fields[1].id).await.unwrap();

        let live = store.list_fields(&template.id).await.unwrap();
        assert_eq!(live.len(), 2);
        assert_eq!(live.iter().map(|f| f.index).collect::<Vec<_>>(), vec![0, 2]);
        // Deleted rows still count towards the next monotonic index.
        assert_eq!(store.count_all_fields(&template.id).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn field_insert_reports_vanished_template() {
        let store = store().await;
        let field = Field::new("missing-template", 0, "f", "p", 120, FieldType::Text, false);
        let err = store.insert_field(&field).await.unwrap_err();
        assert!(matches!(err, StoreError::TemplateVanished));
    }

    #[tokio::test]
    async fn delete_template_cascades_to_fields_and_profiles() {
        let store = store().await;
        let template = Template::new(42, "hero");
        store.insert_template(&template).await.unwrap();
        let field = Field::new(&template.id, 0, "f", "p", 120, FieldType::Text, false);
        store.insert_field(&field).await.unwrap();
        sqlx::query("INSERT INTO profiles (id, template_id, user_id, created_at) VALUES ('p1', $1, 'u1', 'now')")
            .bind(&template.id)
            .execute(store.pool())
            .await
            .unwrap();

        store.delete_template(&template.id).await.unwrap();

        assert!(store.get_template(&template.id).await.unwrap().is_none());
        assert_eq!(store.count_all_fields(&template.id).await.unwrap(), 0);
        assert_eq!(store.count_profiles(&template.id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn guild_settings_fall_back_to_global_default() {
        let store = store().await;
        let defaults = store.guild_settings(42).await.unwrap();
        assert_eq!(defaults.guild_id, 0);
        assert_eq!(defaults.max_template_count, 5);

        sqlx::query(
            "INSERT INTO guild_settings VALUES (42, 2, 4, 1)",
        )
        .execute(store.pool())
        .await
        .unwrap();
        let custom = store.guild_settings(42).await.unwrap();
        assert_eq!(custom.guild_id, 42);
        assert_eq!(custom.max_template_field_count, 4);
    }

    #[tokio::test]
    async fn overviews_include_profile_counts() {
        let store = store().await;
        let template = Template::new(42, "hero");
        store.insert_template(&template).await.unwrap();
        for n in 0..2 {
            sqlx::query("INSERT INTO profiles (id, template_id, user_id, created_at) VALUES ($1, $2, 'u', 'now')")
                .bind(format!("p{n}"))
                .bind(&template.id)
                .execute(store.pool())
                .await
                .unwrap();
        }

        let overviews = store.list_overviews(42).await.unwrap();
        assert_eq!(overviews.len(), 1);
        assert_eq!(overviews[0].name, "hero");
        assert_eq!(overviews[0].profile_count, 2);
    }
}
