use super::Abort;
use super::collect::{WAIT_STEP_TIMEOUT, WaitError};
use super::menu::{CROSS, DIGITS, LETTERS, Menu, MenuOption, MenuOutcome, NUMBERS, PICTURE, TICK};
use super::session::{SessionCtx, TemplateEditor};
use crate::error::StoreError;
use crate::model::{Field, FieldAttr, FieldType, Template, command_text};
use crate::store::GuildSettings;

#[derive(Debug, Clone, Copy)]
enum FieldMenuAction {
    Attr(FieldAttr),
    Delete,
}

enum EntryChoice {
    Create,
    Edit(Field),
}

impl TemplateEditor {
    /// Talk the caller through creating a new field or editing/deleting an
    /// existing one. Returns whether the field list changed.
    pub(crate) async fn run_field_wizard(
        &self,
        ctx: &mut SessionCtx,
        template: &Template,
        settings: &GuildSettings,
    ) -> Result<bool, Abort> {
        let live = self.store.list_fields(&template.id).await?;
        let field_cap = settings
            .max_template_field_count
            .max(template.max_field_count);
        let at_cap = live.len() as i64 >= field_cap && !ctx.caller.privileged;

        let intro = if live.is_empty() {
            "Now talking you through creating a new field."
        } else if at_cap {
            "What is the index of the field you want to edit?"
        } else {
            "What is the index of the field you want to edit? If you want to add a *new* field, \
             type **new**."
        };
        self.say(ctx, intro).await?;

        // Even with an empty field list we must keep awaiting replies once
        // creation has been refused, or a zero field cap would spin.
        let mut must_await = !live.is_empty();
        let choice = loop {
            let wants_new = if must_await {
                let reply = self.await_user_message(ctx).await?;
                let content = reply.content.trim().to_string();
                if !content.eq_ignore_ascii_case("new") {
                    if let Ok(index) = content.trim_start_matches('#').parse::<i64>()
                        && let Some(field) = live.iter().find(|f| f.index == index)
                    {
                        break EntryChoice::Edit(field.clone());
                    }
                    // An unparsable reply counts as asking for a new field
                    // only while the list is empty.
                    if !live.is_empty() {
                        self.say(ctx, "That isn't a valid index number - please provide another.")
                            .await?;
                        continue;
                    }
                }
                true
            } else {
                true
            };

            if wants_new {
                if (live.len() as i64) < field_cap || ctx.caller.privileged {
                    break EntryChoice::Create;
                }
                self.say(
                    ctx,
                    "You're already at the maximum number of fields for this template - \
                     please provide a field index to edit.",
                )
                .await?;
                must_await = true;
            }
        };

        match choice {
            EntryChoice::Create => {
                let image_set = live.iter().any(|f| f.field_type == FieldType::Image);
                let index = self.store.count_all_fields(&template.id).await?;
                self.flush_trash(ctx);
                let field = self.create_new_field(ctx, template, index, image_set).await?;
                self.flush_trash(ctx);
                match self.store.insert_field(&field).await {
                    Ok(()) => Ok(true),
                    // The template was deleted while it was being edited;
                    // the enclosing session is already invalid, so report a
                    // harmless no-op change instead of an error.
                    Err(StoreError::TemplateVanished) => {
                        tracing::warn!(
                            template_id = %template.id,
                            "template vanished during field creation"
                        );
                        Ok(true)
                    }
                    Err(error) => Err(error.into()),
                }
            }
            EntryChoice::Edit(field) => self.edit_existing_field(ctx, &field).await,
        }
    }

    /// The five-step creation flow. Command-expression prompts skip the
    /// optional/timeout/type steps entirely.
    async fn create_new_field(
        &self,
        ctx: &mut SessionCtx,
        template: &Template,
        index: i64,
        image_set: bool,
    ) -> Result<Field, Abort> {
        self.say(
            ctx,
            "What name should this field have? This is the name shown on the embed, so it \
             should be something like 'Name', 'Age', 'Gender', etc.",
        )
        .await?;
        let name = loop {
            let reply = self.await_user_message(ctx).await?;
            if (1..=Field::NAME_MAX_LEN).contains(&reply.content.len()) {
                break reply.content;
            }
            self.say(
                ctx,
                "The maximum length of a field name is 256 characters. Please provide another \
                 name.",
            )
            .await?;
        };

        self.say(
            ctx,
            "What message should I send when I'm asking people to fill out this field? This \
             should be a question or prompt, eg 'What is your name/age/gender/etc'.",
        )
        .await?;
        let prompt = loop {
            let reply = self.await_user_message(ctx).await?;
            if !reply.content.is_empty() {
                break reply.content;
            }
            self.say(ctx, "You need to actually give text for the prompt :/")
                .await?;
        };

        let (optional, timeout_secs, field_type) = if command_text::is_recognized(&prompt) {
            // Command prompts are filled in automatically, so the remaining
            // questions would be meaningless.
            (false, Field::COMMAND_PROMPT_TIMEOUT_SECS, FieldType::Text)
        } else {
            let optional = self.ask_yes_no(ctx, "Is this field optional?").await?;

            self.say(
                ctx,
                "How many seconds should I wait for people to fill out this field (I recommend \
                 120 - that's 2 minutes)? The minimum is 30, and the maximum is 600.",
            )
            .await?;
            let timeout_secs = loop {
                let reply = self.await_user_message(ctx).await?;
                match reply.content.trim().parse::<i64>() {
                    Ok(timeout) if timeout >= Field::TIMEOUT_MIN_SECS => {
                        break timeout.min(Field::TIMEOUT_MAX_SECS);
                    }
                    _ => {
                        self.say(
                            ctx,
                            "I couldn't convert your message into a valid number - the minimum \
                             is 30 seconds. Please try again.",
                        )
                        .await?;
                    }
                }
            };

            let field_type = self.ask_field_type(ctx, image_set).await?;
            (optional, timeout_secs, field_type)
        };

        Ok(Field::new(
            &template.id,
            index,
            name,
            prompt,
            timeout_secs,
            field_type,
            optional,
        ))
    }

    /// Attribute menu for an existing field: name, prompt, optional, type,
    /// delete - or cancel.
    async fn edit_existing_field(
        &self,
        ctx: &mut SessionCtx,
        field: &Field,
    ) -> Result<bool, Abort> {
        let handle = self
            .say(
                ctx,
                &format!(
                    "Editing the field **{}**. Which part would you like to edit?\n\
                     1\u{20e3} Field name\n\
                     2\u{20e3} Field prompt\n\
                     3\u{20e3} Whether or not the field is optional\n\
                     4\u{20e3} Field type\n\
                     5\u{20e3} Delete field entirely\n",
                    field.name
                ),
            )
            .await?;

        let menu = Menu::new(vec![
            MenuOption {
                symbol: DIGITS[0],
                action: FieldMenuAction::Attr(FieldAttr::Name),
            },
            MenuOption {
                symbol: DIGITS[1],
                action: FieldMenuAction::Attr(FieldAttr::Prompt),
            },
            MenuOption {
                symbol: DIGITS[2],
                action: FieldMenuAction::Attr(FieldAttr::Optional),
            },
            MenuOption {
                symbol: DIGITS[3],
                action: FieldMenuAction::Attr(FieldAttr::Type),
            },
            MenuOption {
                symbol: DIGITS[4],
                action: FieldMenuAction::Delete,
            },
        ])
        .with_cancel(CROSS);
        menu.seed(self.chat.as_ref(), &handle).await?;

        let user_id = ctx.caller.user_id.clone();
        let outcome = menu
            .await_selection(self.chat.as_ref(), &mut ctx.collector, &handle, &user_id)
            .await?;
        let action = match outcome {
            MenuOutcome::TimedOut => return Err(Abort::TimedOut),
            MenuOutcome::Cancelled | MenuOutcome::Confirmed => {
                self.flush_trash(ctx);
                return Ok(false);
            }
            MenuOutcome::Selected(action) => action,
        };

        match action {
            FieldMenuAction::Delete => {
                // Soft delete: the row and its index stay behind.
                self.store.soft_delete_field(&field.id).await?;
                self.flush_trash(ctx);
                Ok(true)
            }
            FieldMenuAction::Attr(attr) => {
                loop {
                    let prompt = attr.prompt_text().map_or_else(
                        || format!("What do you want to set the {} to?", attr.label()),
                        str::to_string,
                    );
                    self.say(ctx, &prompt).await?;
                    let reply = self.await_user_message(ctx).await?;
                    match attr.accept(&reply.content) {
                        Ok(value) => {
                            self.store.update_field_attr(&field.id, attr, &value).await?;
                            break;
                        }
                        Err(message) => {
                            self.say(ctx, message).await?;
                        }
                    }
                }
                self.flush_trash(ctx);
                Ok(true)
            }
        }
    }

    /// Tick/cross selector; a selector timeout defaults to "no".
    async fn ask_yes_no(&self, ctx: &mut SessionCtx, prompt: &str) -> Result<bool, Abort> {
        let handle = self.say(ctx, prompt).await?;
        for symbol in [TICK, CROSS] {
            self.chat.add_reaction(&handle, symbol).await?;
        }
        let user_id = ctx.caller.user_id.clone();
        match ctx
            .collector
            .await_reaction(
                |r| {
                    r.user_id == user_id
                        && r.message_id == handle.message_id
                        && (r.symbol == TICK || r.symbol == CROSS)
                },
                WAIT_STEP_TIMEOUT,
            )
            .await
        {
            Ok(reaction) => Ok(reaction.symbol == TICK),
            Err(WaitError::TimedOut) => Ok(false),
            Err(error @ WaitError::Disconnected) => Err(error.into()),
        }
    }

    /// Type selector. The image option is only offered (and only admitted by
    /// the wait predicate) while the template has no live image field; a
    /// selector timeout defaults to text.
    async fn ask_field_type(
        &self,
        ctx: &mut SessionCtx,
        image_set: bool,
    ) -> Result<FieldType, Abort> {
        let text = if image_set {
            format!(
                "What type is this field? Will you be getting numbers ({NUMBERS}), or any \
                 text ({LETTERS})?"
            )
        } else {
            format!(
                "What type is this field? Will you be getting numbers ({NUMBERS}), any text \
                 ({LETTERS}), or an image ({PICTURE})?"
            )
        };
        let handle = self.say(ctx, &text).await?;

        self.chat.add_reaction(&handle, NUMBERS).await?;
        self.chat.add_reaction(&handle, LETTERS).await?;
        if !image_set {
            self.chat.add_reaction(&handle, PICTURE).await?;
        }

        let offered: &[&str] = if image_set {
            &[NUMBERS, LETTERS]
        } else {
            &[NUMBERS, LETTERS, PICTURE]
        };
        let user_id = ctx.caller.user_id.clone();
        let reaction = match ctx
            .collector
            .await_reaction(
                |r| {
                    r.user_id == user_id
                        && r.message_id == handle.message_id
                        && offered.iter().any(|s| *s == r.symbol)
                },
                WAIT_STEP_TIMEOUT,
            )
            .await
        {
            Ok(reaction) => reaction,
            Err(WaitError::TimedOut) => {
                if let Err(error) = self
                    .chat
                    .send(
                        &ctx.caller.channel_id,
                        "Picking a field type has timed out - defaulting to text.",
                    )
                    .await
                {
                    tracing::debug!(%error, "failed to send type-default notice");
                }
                return Ok(FieldType::Text);
            }
            Err(error @ WaitError::Disconnected) => return Err(error.into()),
        };

        let field_type = match reaction.symbol.as_str() {
            NUMBERS => FieldType::Numeric,
            LETTERS => FieldType::Text,
            PICTURE => FieldType::Image,
            _ => unreachable!("reaction outside the offered symbol set"),
        };
        if field_type == FieldType::Image && image_set {
            // Cannot be reached through the UI: the selector above never
            // offers the image option once one exists.
            return Err(Abort::Internal("image field type offered twice"));
        }
        Ok(field_type)
    }
}
