use super::cleanup::Janitor;
use super::collect::{InputCollector, WAIT_STEP_TIMEOUT};
use super::locks::ScopeLocks;
use super::menu::{DIGITS, Menu, MenuOption, MenuOutcome, TICK};
use super::parse::{ParseResult, parse_attribute};
use super::resolver::RefResolver;
use super::{Abort, menu};
use crate::chat::{ChatEvents, ChatTransport, Embed, IncomingMessage, MessageHandle};
use crate::error::{ChatError, StoreError};
use crate::model::{AttrValue, RefValue, Template, TemplateAttr};
use crate::store::{GuildSettings, TemplateOverview, TemplateStore};
use std::mem;
use std::sync::Arc;

/// The user driving a session, as established at the command boundary.
/// Privileged callers bypass the guild count clamps and see extra menu
/// options.
#[derive(Debug, Clone)]
pub struct Caller {
    pub user_id: String,
    pub channel_id: String,
    pub guild_id: i64,
    pub privileged: bool,
}

/// How a session ended. Produced for callers and tests; user-facing notices
/// have already been sent (best-effort) by the time this is returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    Finished,
    TimedOut,
    Cancelled,
    /// Another session already holds this guild's lock.
    AlreadyEditing,
    /// Rejected before a session started (limit reached, bad or duplicate
    /// name).
    Rejected,
    /// The transport failed underneath the session (typically missing
    /// permissions).
    TransportFailed,
}

/// Ephemeral per-session state: one event subscription, the caller, and the
/// transient messages accumulated for cleanup.
pub(crate) struct SessionCtx {
    pub collector: InputCollector,
    pub caller: Caller,
    pub trash: Vec<MessageHandle>,
}

impl SessionCtx {
    fn new(collector: InputCollector, caller: Caller) -> Self {
        Self {
            collector,
            caller,
            trash: Vec::new(),
        }
    }
}

/// Top-level menu dispatch: an attribute edit, or delegation into the field
/// wizard. The terminal confirm selector surfaces as `MenuOutcome::Confirmed`.
#[derive(Debug, Clone, Copy)]
enum MenuAction {
    Attribute(TemplateAttr),
    Fields,
}

fn top_menu(privileged: bool) -> Menu<MenuAction> {
    let mut options = vec![
        MenuOption {
            symbol: DIGITS[0],
            action: MenuAction::Attribute(TemplateAttr::Name),
        },
        MenuOption {
            symbol: DIGITS[1],
            action: MenuAction::Attribute(TemplateAttr::VerificationChannel),
        },
        MenuOption {
            symbol: DIGITS[2],
            action: MenuAction::Attribute(TemplateAttr::ArchiveChannel),
        },
        MenuOption {
            symbol: DIGITS[3],
            action: MenuAction::Attribute(TemplateAttr::GrantRole),
        },
        MenuOption {
            symbol: DIGITS[4],
            action: MenuAction::Fields,
        },
        MenuOption {
            symbol: DIGITS[5],
            action: MenuAction::Attribute(TemplateAttr::MaxProfileCount),
        },
    ];
    if privileged {
        options.push(MenuOption {
            symbol: DIGITS[6],
            action: MenuAction::Attribute(TemplateAttr::MaxFieldCount),
        });
    }
    Menu::new(options).with_confirm(TICK)
}

fn top_menu_text(privileged: bool) -> String {
    let mut text = String::from(
        "**Select the emoji next to the item you want to edit:**\n\
         1\u{20e3} Template name\n\
         2\u{20e3} Verification channel (where profiles are sent to be verified by staff)\n\
         3\u{20e3} Archive channel (where profiles are sent once verified)\n\
         4\u{20e3} Set a role to be given to users upon completing a profile\n\
         5\u{20e3} Template fields/questions\n\
         6\u{20e3} Maximum profile count per user\n",
    );
    if privileged {
        text.push_str("7\u{20e3} Maximum field count\n");
    }
    text
}

/// The conversational template editor: wires the lock manager, input
/// collector, menus, wizard, and store together into whole sessions.
pub struct TemplateEditor {
    pub(crate) chat: Arc<dyn ChatTransport>,
    pub(crate) events: ChatEvents,
    pub(crate) store: Arc<dyn TemplateStore>,
    pub(crate) resolver: Arc<dyn RefResolver>,
    pub(crate) locks: ScopeLocks,
    pub(crate) janitor: Janitor,
}

impl TemplateEditor {
    pub fn new(
        chat: Arc<dyn ChatTransport>,
        events: ChatEvents,
        store: Arc<dyn TemplateStore>,
        resolver: Arc<dyn RefResolver>,
    ) -> Self {
        let janitor = Janitor::spawn(chat.clone());
        Self {
            chat,
            events,
            store,
            resolver,
            locks: ScopeLocks::new(),
            janitor,
        }
    }

    pub fn locks(&self) -> &ScopeLocks {
        &self.locks
    }

    // ── Session entry points ─────────────────────────────────────────────

    /// Walk the caller through editing an existing template.
    pub async fn run_edit_session(
        &self,
        caller: &Caller,
        template: Template,
    ) -> anyhow::Result<SessionEnd> {
        let Some(_guard) = self.locks.try_acquire(caller.guild_id) else {
            self.best_effort_send(&caller.channel_id, "You're already editing a template.")
                .await;
            return Ok(SessionEnd::AlreadyEditing);
        };

        let mut ctx = SessionCtx::new(
            InputCollector::new(self.events.subscribe()),
            caller.clone(),
        );
        let mut template = template;
        let result = self.edit_loop(&mut ctx, &mut template).await;
        self.flush_trash(&mut ctx);
        match result {
            Ok(()) => {
                let (set, edit, get) = template.command_names();
                self.best_effort_send(
                    &caller.channel_id,
                    &format!(
                        "Finished editing template. Users can create profiles with `{set}`, \
                         edit with `{edit}`, and show them with `{get}`."
                    ),
                )
                .await;
                Ok(SessionEnd::Finished)
            }
            Err(abort) => self.conclude_abort(caller, abort).await,
        }
    }

    /// Allocate a new template (after the guild limit and name checks) and
    /// delegate into the edit session.
    pub async fn run_create_session(
        &self,
        caller: &Caller,
        requested_name: Option<String>,
    ) -> anyhow::Result<SessionEnd> {
        let guild_id = caller.guild_id;
        let settings = self.store.guild_settings(guild_id).await?;
        let count = self.store.count_templates(guild_id).await?;
        if count >= settings.max_template_count {
            self.best_effort_send(
                &caller.channel_id,
                &format!(
                    "You already have {} templates set for this server, which is the maximum \
                     number allowed.",
                    settings.max_template_count
                ),
            )
            .await;
            return Ok(SessionEnd::Rejected);
        }

        // With a name argument, validity and the duplicate check run before
        // any lock is taken.
        if let Some(name) = &requested_name {
            if let Some(end) = self.reject_bad_name(caller, name, false).await? {
                return Ok(end);
            }
        }

        let template = {
            let Some(_guard) = self.locks.try_acquire(guild_id) else {
                self.best_effort_send(&caller.channel_id, "You're already creating a template.")
                    .await;
                return Ok(SessionEnd::AlreadyEditing);
            };

            let name = match requested_name {
                Some(name) => name,
                None => match self.prompt_for_name(caller).await? {
                    Ok(name) => name,
                    Err(end) => return Ok(end),
                },
            };

            let template = Template::new(guild_id, name);
            self.store.insert_template(&template).await?;
            tracing::info!(guild_id, name = %template.name, "new template created");
            template
        };

        // The creation lock is released here; the edit session re-acquires.
        self.run_edit_session(caller, template).await
    }

    /// Two-step confirm/cancel deletion of a template and everything under
    /// it.
    pub async fn run_delete_session(
        &self,
        caller: &Caller,
        template: &Template,
    ) -> anyhow::Result<SessionEnd> {
        let Some(_guard) = self.locks.try_acquire(caller.guild_id) else {
            self.best_effort_send(&caller.channel_id, "You're already editing a template.")
                .await;
            return Ok(SessionEnd::AlreadyEditing);
        };

        let mut collector = InputCollector::new(self.events.subscribe());
        let confirm = self
            .chat
            .send(
                &caller.channel_id,
                "By doing this, you'll delete all of the created profiles under this template \
                 as well. Would you like to proceed?",
            )
            .await?;
        for symbol in [TICK, menu::CROSS] {
            if let Err(error) = self.chat.add_reaction(&confirm, symbol).await {
                tracing::warn!(%error, "cannot seed delete confirmation reactions");
                if let Err(error) = self
                    .chat
                    .edit_message(
                        &confirm,
                        Some("I'm unable to add reactions to my messages."),
                        None,
                    )
                    .await
                {
                    tracing::debug!(%error, "failed to edit delete confirmation message");
                }
                return Ok(SessionEnd::TransportFailed);
            }
        }

        let user_id = caller.user_id.clone();
        let reaction = match collector
            .await_reaction(
                |r| {
                    r.user_id == user_id
                        && r.message_id == confirm.message_id
                        && (r.symbol == TICK || r.symbol == menu::CROSS)
                },
                WAIT_STEP_TIMEOUT,
            )
            .await
        {
            Ok(reaction) => reaction,
            Err(super::WaitError::TimedOut) => {
                self.best_effort_send(
                    &caller.channel_id,
                    "Template delete timed out - please try again later.",
                )
                .await;
                return Ok(SessionEnd::TimedOut);
            }
            Err(super::WaitError::Disconnected) => {
                anyhow::bail!("chat event stream closed mid-session");
            }
        };

        if reaction.symbol == menu::CROSS {
            self.best_effort_send(&caller.channel_id, "Got it, cancelling template delete.")
                .await;
            return Ok(SessionEnd::Cancelled);
        }

        self.store.delete_template(&template.id).await?;
        tracing::info!(
            guild_id = template.guild_id,
            name = %template.name,
            "template deleted"
        );
        self.best_effort_send(
            &caller.channel_id,
            &format!(
                "All relevant data for template **{}** (`{}`) has been deleted.",
                template.name, template.id
            ),
        )
        .await;
        Ok(SessionEnd::Finished)
    }

    // ── Read-only operations ─────────────────────────────────────────────

    /// The template listing for a guild (name, id, created profile count).
    pub async fn list_templates(&self, guild_id: i64) -> Result<Vec<TemplateOverview>, StoreError> {
        self.store.list_overviews(guild_id).await
    }

    /// Case-insensitive template lookup by name within a guild.
    pub async fn find_template(
        &self,
        guild_id: i64,
        name: &str,
    ) -> Result<Option<Template>, StoreError> {
        self.store.find_template_by_name(guild_id, name).await
    }

    /// Summary embed for a template, including its created profile count.
    pub async fn describe_template(&self, template: &Template) -> Result<Embed, StoreError> {
        let fields = self.store.list_fields(&template.id).await?;
        let profile_count = self.store.count_profiles(&template.id).await?;
        let mut embed = template.summary_embed(&fields);
        embed.description.push_str(&format!(
            "\nCurrently there are **{profile_count}** created profiles for this template."
        ));
        Ok(embed)
    }

    // ── Edit loop ────────────────────────────────────────────────────────

    async fn edit_loop(
        &self,
        ctx: &mut SessionCtx,
        template: &mut Template,
    ) -> Result<(), Abort> {
        let mut fields = self.store.list_fields(&template.id).await?;
        let settings = self.store.guild_settings(template.guild_id).await?;

        let display = self
            .chat
            .send(&ctx.caller.channel_id, "Loading template...")
            .await?;
        let menu_handle = self
            .chat
            .send(
                &ctx.caller.channel_id,
                &top_menu_text(ctx.caller.privileged),
            )
            .await?;
        let menu = top_menu(ctx.caller.privileged);

        // Re-render the summary only after a mutation; seed the selector
        // reactions only once.
        let mut dirty = true;
        let mut reactions_seeded = false;

        loop {
            if dirty {
                self.chat
                    .edit_message(&display, None, Some(&template.summary_embed(&fields)))
                    .await?;
                dirty = false;
            }

            if !reactions_seeded {
                if let Err(error) = menu.seed(self.chat.as_ref(), &menu_handle).await {
                    if let Err(error) = self.chat.delete_message(&display).await {
                        tracing::debug!(%error, "failed to delete display message");
                    }
                    if let Err(error) = self
                        .chat
                        .edit_message(
                            &menu_handle,
                            Some("I'm unable to add reactions to my messages."),
                            None,
                        )
                        .await
                    {
                        tracing::debug!(%error, "failed to edit menu message");
                    }
                    return Err(Abort::Transport(error));
                }
                reactions_seeded = true;
            }

            let user_id = ctx.caller.user_id.clone();
            let outcome = menu
                .await_selection(
                    self.chat.as_ref(),
                    &mut ctx.collector,
                    &menu_handle,
                    &user_id,
                )
                .await?;
            match outcome {
                MenuOutcome::TimedOut => return Err(Abort::TimedOut),
                MenuOutcome::Confirmed | MenuOutcome::Cancelled => break,
                MenuOutcome::Selected(MenuAction::Fields) => {
                    if self.run_field_wizard(ctx, template, &settings).await? {
                        fields = self.store.list_fields(&template.id).await?;
                        dirty = true;
                    }
                }
                MenuOutcome::Selected(MenuAction::Attribute(attr)) => {
                    if self.edit_attribute(ctx, template, attr, &settings).await? {
                        dirty = true;
                    }
                }
            }
        }

        // Drop the menu; the final summary display stays behind.
        if let Err(error) = self.chat.delete_message(&menu_handle).await {
            tracing::debug!(%error, "failed to delete menu message");
        }
        Ok(())
    }

    /// One collect → parse/validate → persist round for a template
    /// attribute. Returns whether the summary needs a redraw.
    async fn edit_attribute(
        &self,
        ctx: &mut SessionCtx,
        template: &mut Template,
        attr: TemplateAttr,
        settings: &GuildSettings,
    ) -> Result<bool, Abort> {
        self.say(ctx, &attr.prompt_text()).await?;
        let reply = self.await_user_message(ctx).await?;

        let parsed = parse_attribute(
            attr,
            &reply.content,
            template,
            settings,
            &ctx.caller,
            self.store.as_ref(),
            self.resolver.as_ref(),
        )
        .await?;

        let (value, notice) = match parsed {
            ParseResult::Invalid { notice } => {
                self.flush_trash(ctx);
                if let Some(notice) = notice {
                    self.transient_notice(ctx, &notice).await?;
                }
                return Ok(false);
            }
            ParseResult::Deferred(raw) => {
                (AttrValue::Reference(RefValue::Command(raw)), None)
            }
            ParseResult::Ok { value, notice } => (value, notice),
        };

        self.flush_trash(ctx);
        self.store
            .update_template_attr(&template.id, attr, &value)
            .await?;
        template.apply(attr, &value);
        if let Some(notice) = notice {
            self.transient_notice(ctx, &notice).await?;
        }
        Ok(true)
    }

    // ── Create-session helpers ───────────────────────────────────────────

    /// Interactive name prompt for `createtemplate` without an argument.
    /// Outer `Err` is a session abort; inner `Err` is a clean rejection end.
    async fn prompt_for_name(
        &self,
        caller: &Caller,
    ) -> anyhow::Result<Result<String, SessionEnd>> {
        let mut collector = InputCollector::new(self.events.subscribe());
        self.chat
            .send(
                &caller.channel_id,
                "What name do you want to give this template? This will be used for the set \
                 and get commands; eg if the name of your template is `test`, the commands \
                 generated will be `settest` to set a profile, `gettest` to get a profile, \
                 and `deletetest` to delete a profile. A profile name is case insensitive \
                 when used in commands.",
            )
            .await
            .map_err(anyhow::Error::from)?;

        loop {
            let user_id = caller.user_id.clone();
            let channel_id = caller.channel_id.clone();
            let reply = match collector
                .await_message(
                    |m| m.author_id == user_id && m.channel_id == channel_id,
                    WAIT_STEP_TIMEOUT,
                )
                .await
            {
                Ok(reply) => reply,
                Err(super::WaitError::TimedOut) => {
                    self.best_effort_send(
                        &caller.channel_id,
                        "Your template creation has timed out after 2 minutes of inactivity.",
                    )
                    .await;
                    return Ok(Err(SessionEnd::TimedOut));
                }
                Err(super::WaitError::Disconnected) => {
                    anyhow::bail!("chat event stream closed mid-session");
                }
            };

            match self.reject_bad_name(caller, &reply.content, true).await? {
                // Over-length names re-prompt; charset and duplicate
                // problems end the attempt, as does a clean name.
                Some(SessionEnd::Rejected) if !Template::name_length_ok(&reply.content) => {}
                Some(end) => return Ok(Err(end)),
                None => return Ok(Ok(reply.content)),
            }
        }
    }

    /// Shared name gate for template creation. Returns `Some(end)` when the
    /// name was rejected (after sending the notice), `None` when it is fine.
    async fn reject_bad_name(
        &self,
        caller: &Caller,
        name: &str,
        interactive: bool,
    ) -> anyhow::Result<Option<SessionEnd>> {
        if !Template::is_valid_name(name) {
            self.best_effort_send(
                &caller.channel_id,
                "You can only use normal lettering and digits in your command name. \
                 Please run this command again to set a new one.",
            )
            .await;
            return Ok(Some(SessionEnd::Rejected));
        }
        if !Template::name_length_ok(name) {
            self.best_effort_send(
                &caller.channel_id,
                "The maximum length of a profile name is 30 characters. Please give another name.",
            )
            .await;
            return Ok(Some(SessionEnd::Rejected));
        }
        if self
            .store
            .name_in_use(caller.guild_id, name, None)
            .await?
        {
            let text = if interactive {
                format!(
                    "This server already has a template with name **{name}**. \
                     Please run this command again to provide another one."
                )
            } else {
                format!("This server already has a template with name **{name}**.")
            };
            self.best_effort_send(&caller.channel_id, &text).await;
            return Ok(Some(SessionEnd::Rejected));
        }
        Ok(None)
    }

    // ── Shared session plumbing ──────────────────────────────────────────

    /// Send a transient prompt, tracked for cleanup.
    pub(crate) async fn say(
        &self,
        ctx: &mut SessionCtx,
        text: &str,
    ) -> Result<MessageHandle, Abort> {
        let handle = self.chat.send(&ctx.caller.channel_id, text).await?;
        ctx.trash.push(handle.clone());
        Ok(handle)
    }

    /// Wait for the caller's next message in the session channel, tracked
    /// for cleanup.
    pub(crate) async fn await_user_message(
        &self,
        ctx: &mut SessionCtx,
    ) -> Result<IncomingMessage, Abort> {
        let message = {
            let caller = &ctx.caller;
            ctx.collector
                .await_message(
                    |m| m.author_id == caller.user_id && m.channel_id == caller.channel_id,
                    WAIT_STEP_TIMEOUT,
                )
                .await?
        };
        ctx.trash.push(message.handle());
        Ok(message)
    }

    /// Hand the accumulated transient messages to the janitor. Never blocks
    /// the session flow.
    pub(crate) fn flush_trash(&self, ctx: &mut SessionCtx) {
        if ctx.trash.is_empty() {
            return;
        }
        let handles = mem::take(&mut ctx.trash);
        self.janitor.discard(&ctx.caller.channel_id, handles);
    }

    /// An ephemeral confirmation: delivered now, cleaned up with the next
    /// batch of transient messages.
    pub(crate) async fn transient_notice(
        &self,
        ctx: &mut SessionCtx,
        text: &str,
    ) -> Result<(), Abort> {
        let handle = self.chat.send(&ctx.caller.channel_id, text).await?;
        ctx.trash.push(handle);
        Ok(())
    }

    /// Deliver a notice where failure to send must not mask the session
    /// outcome.
    async fn best_effort_send(&self, channel_id: &str, text: &str) {
        if let Err(error) = self.chat.send(channel_id, text).await {
            tracing::debug!(%error, "failed to send session notice");
        }
    }

    /// Map an internal abort to a session end, emitting the matching notice
    /// where one can still be delivered.
    async fn conclude_abort(&self, caller: &Caller, abort: Abort) -> anyhow::Result<SessionEnd> {
        match abort {
            Abort::TimedOut => {
                self.best_effort_send(&caller.channel_id, "Timed out waiting for edit response.")
                    .await;
                Ok(SessionEnd::TimedOut)
            }
            Abort::Transport(ChatError::PermissionDenied(detail)) => {
                tracing::warn!(%detail, "session aborted: missing permissions");
                self.best_effort_send(
                    &caller.channel_id,
                    "I'm missing the permissions I need to keep editing - please update them \
                     and try again.",
                )
                .await;
                Ok(SessionEnd::TransportFailed)
            }
            Abort::Transport(error) => {
                tracing::warn!(%error, "session aborted: transport failure");
                Ok(SessionEnd::TransportFailed)
            }
            Abort::Disconnected => anyhow::bail!("chat event stream closed mid-session"),
            Abort::Store(error) => Err(error.into()),
            Abort::Internal(detail) => {
                anyhow::bail!("internal invariant violated: {detail}")
            }
        }
    }
}
