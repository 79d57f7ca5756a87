use super::Abort;
use super::resolver::RefResolver;
use super::session::Caller;
use crate::error::ResolveError;
use crate::model::{AttrValue, RefValue, Template, TemplateAttr, command_text};
use crate::store::{GuildSettings, TemplateStore};

/// Result of running one attribute's parse/validate/normalize triple.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseResult {
    /// A validated value, plus an optional notice (e.g. that a requested
    /// count was clamped, showing both values).
    Ok {
        value: AttrValue,
        notice: Option<String>,
    },
    /// Rejected. `notice: None` means the silent re-loop path: transient
    /// messages are cleaned up and the menu simply comes back around.
    Invalid { notice: Option<String> },
    /// The raw text could not be resolved but is a recognized embedded
    /// command expression; it is stored verbatim for deferred evaluation.
    Deferred(String),
}

/// Parse and validate a raw reply for one template attribute.
///
/// An attribute is only ever persisted after this returns `Ok`; rejection
/// never leaves partially-applied state behind.
pub(crate) async fn parse_attribute(
    attr: TemplateAttr,
    raw: &str,
    template: &Template,
    settings: &GuildSettings,
    caller: &Caller,
    store: &dyn TemplateStore,
    resolver: &dyn RefResolver,
) -> Result<ParseResult, Abort> {
    match attr {
        TemplateAttr::Name => parse_name(raw, template, store).await,
        TemplateAttr::VerificationChannel | TemplateAttr::ArchiveChannel | TemplateAttr::GrantRole => {
            parse_reference(attr, raw, template.guild_id, resolver).await
        }
        TemplateAttr::MaxProfileCount | TemplateAttr::MaxFieldCount => {
            Ok(parse_count(attr, raw, settings, caller))
        }
    }
}

async fn parse_name(
    raw: &str,
    template: &Template,
    store: &dyn TemplateStore,
) -> Result<ParseResult, Abort> {
    // Renaming to the template's own current name is a no-op exemption;
    // only collisions with *other* templates are rejected.
    if store
        .name_in_use(template.guild_id, raw, Some(&template.id))
        .await?
    {
        return Ok(ParseResult::Invalid {
            notice: Some("That template name is already in use.".into()),
        });
    }
    if !Template::name_length_ok(raw) {
        return Ok(ParseResult::Invalid {
            notice: Some(
                "That template name is invalid - not within 1 and 30 characters in length.".into(),
            ),
        });
    }
    Ok(ParseResult::Ok {
        value: AttrValue::Name(raw.to_string()),
        notice: None,
    })
}

async fn parse_reference(
    attr: TemplateAttr,
    raw: &str,
    guild_id: i64,
    resolver: &dyn RefResolver,
) -> Result<ParseResult, Abort> {
    // Sentinel: clear the reference without consulting the resolver.
    if raw == "continue" {
        return Ok(ParseResult::Ok {
            value: AttrValue::Reference(RefValue::None),
            notice: None,
        });
    }
    let resolved = if attr == TemplateAttr::GrantRole {
        resolver.resolve_role(guild_id, raw).await
    } else {
        resolver.resolve_channel(guild_id, raw).await
    };
    match resolved {
        Ok(id) => Ok(ParseResult::Ok {
            value: AttrValue::Reference(RefValue::Id(id)),
            notice: None,
        }),
        Err(ResolveError::NotFound(_)) => {
            if command_text::is_recognized(raw) {
                Ok(ParseResult::Deferred(raw.to_string()))
            } else {
                Ok(ParseResult::Invalid { notice: None })
            }
        }
        Err(ResolveError::Transport(error)) => Err(Abort::Transport(error)),
    }
}

fn parse_count(
    attr: TemplateAttr,
    raw: &str,
    settings: &GuildSettings,
    caller: &Caller,
) -> ParseResult {
    let Ok(requested) = raw.trim().parse::<i64>() else {
        return ParseResult::Invalid { notice: None };
    };
    if caller.privileged {
        return ParseResult::Ok {
            value: AttrValue::Count(requested),
            notice: None,
        };
    }
    let limit = match attr {
        TemplateAttr::MaxProfileCount => settings.max_template_profile_count,
        _ => settings.max_template_field_count,
    };
    let applied = requested.min(limit).max(0);
    let notice = (requested > applied).then(|| {
        format!(
            "Your {} has been set to **{applied}** instead of **{requested}**.",
            attr.label()
        )
    });
    ParseResult::Ok {
        value: AttrValue::Count(applied),
        notice,
    }
}
