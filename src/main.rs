use anyhow::{Context, Result};
use clap::Parser;
use proforma::chat::{ChatEvent, ChatEvents, DiscordChat};
use proforma::editor::{Caller, TemplateEditor};
use proforma::store::SqliteTemplateStore;
use proforma::{ProformaConfig, chat::ChatTransport};
use sqlx::sqlite::SqlitePoolOptions;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

#[derive(Debug, Parser)]
#[command(name = "proforma", about = "Community record templates for Discord")]
struct Cli {
    /// Path to the config file.
    #[arg(long, default_value = "proforma.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("set tracing subscriber")?;

    let cli = Cli::parse();
    let config = ProformaConfig::load_or_init(&cli.config)?;
    anyhow::ensure!(
        !config.bot_token.is_empty(),
        "bot_token is not set; fill it in at {}",
        cli.config.display()
    );

    let pool = SqlitePoolOptions::new()
        .max_connections(4)
        .connect(&config.database_url)
        .await
        .with_context(|| format!("open database {}", config.database_url))?;
    let store = Arc::new(SqliteTemplateStore::new(pool).await?);

    let chat = Arc::new(DiscordChat::new(config.bot_token.clone()));
    let events = ChatEvents::default();
    let editor = Arc::new(TemplateEditor::new(
        chat.clone(),
        events.clone(),
        store,
        chat.clone(),
    ));

    // Gateway listener with simple reconnect-on-drop.
    {
        let chat = chat.clone();
        let events = events.clone();
        tokio::spawn(async move {
            loop {
                if let Err(error) = chat.listen(events.clone()).await {
                    tracing::warn!(%error, "gateway connection failed");
                }
                tokio::time::sleep(std::time::Duration::from_secs(5)).await;
            }
        });
    }

    tracing::info!("proforma is online");
    dispatch_commands(&config, &events, &editor, chat.as_ref()).await
}

/// Thin keyword dispatcher at the command boundary: recognizes the template
/// commands and spawns a session per invocation. Everything conversational
/// happens inside the editor.
async fn dispatch_commands(
    config: &ProformaConfig,
    events: &ChatEvents,
    editor: &Arc<TemplateEditor>,
    chat: &dyn ChatTransport,
) -> Result<()> {
    let mut rx = events.subscribe();
    loop {
        let event = match rx.recv().await {
            Ok(event) => event,
            Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "command dispatcher lagged behind the event bus");
                continue;
            }
            Err(tokio::sync::broadcast::error::RecvError::Closed) => return Ok(()),
        };
        let ChatEvent::Message(message) = event else {
            continue;
        };
        let Some(rest) = message.content.strip_prefix(&config.command_prefix) else {
            continue;
        };
        // Template commands are guild-only.
        let Some(guild_id) = message.guild_id else {
            continue;
        };

        let (command, argument) = match rest.split_once(char::is_whitespace) {
            Some((command, argument)) => (command, argument.trim()),
            None => (rest, ""),
        };
        let command = command.to_lowercase();
        if !matches!(
            command.as_str(),
            "templates" | "describetemplate" | "createtemplate" | "edittemplate"
                | "deletetemplate"
        ) {
            continue;
        }

        let caller = Caller {
            user_id: message.author_id.clone(),
            channel_id: message.channel_id.clone(),
            guild_id,
            privileged: config.is_support_user(&message.author_id),
        };

        match command.as_str() {
            "templates" => {
                let overviews = editor.list_templates(guild_id).await?;
                let text = if overviews.is_empty() {
                    "There are no created templates for this guild.".to_string()
                } else {
                    overviews
                        .iter()
                        .map(|o| {
                            format!(
                                "**{}** (`{}`, `{}` created profiles)",
                                o.name, o.id, o.profile_count
                            )
                        })
                        .collect::<Vec<_>>()
                        .join("\n")
                };
                if let Err(error) = chat.send(&caller.channel_id, &text).await {
                    tracing::warn!(%error, "failed to send template list");
                }
            }
            "describetemplate" => {
                if let Some(template) = lookup_template(editor, chat, &caller, argument).await? {
                    let embed = editor.describe_template(&template).await?;
                    if let Err(error) = chat.send_embed(&caller.channel_id, &embed).await {
                        tracing::warn!(%error, "failed to send template description");
                    }
                }
            }
            "createtemplate" => {
                let editor = editor.clone();
                let requested = (!argument.is_empty()).then(|| argument.to_string());
                tokio::spawn(async move {
                    if let Err(error) = editor.run_create_session(&caller, requested).await {
                        tracing::error!(%error, "create session failed");
                    }
                });
            }
            "edittemplate" => {
                if let Some(template) = lookup_template(editor, chat, &caller, argument).await? {
                    let editor = editor.clone();
                    tokio::spawn(async move {
                        if let Err(error) = editor.run_edit_session(&caller, template).await {
                            tracing::error!(%error, "edit session failed");
                        }
                    });
                }
            }
            "deletetemplate" => {
                if let Some(template) = lookup_template(editor, chat, &caller, argument).await? {
                    let editor = editor.clone();
                    tokio::spawn(async move {
                        if let Err(error) = editor.run_delete_session(&caller, &template).await {
                            tracing::error!(%error, "delete session failed");
                        }
                    });
                }
            }
            _ => {}
        }
    }
}

async fn lookup_template(
    editor: &Arc<TemplateEditor>,
    chat: &dyn ChatTransport,
    caller: &Caller,
    name: &str,
) -> Result<Option<proforma::model::Template>> {
    if name.is_empty() {
        if let Err(error) = chat
            .send(&caller.channel_id, "You need to give a template name.")
            .await
        {
            tracing::warn!(%error, "failed to send usage notice");
        }
        return Ok(None);
    }
    let template = editor.find_template(caller.guild_id, name).await?;
    if template.is_none()
        && let Err(error) = chat
            .send(
                &caller.channel_id,
                &format!("There's no template with the name **{name}** on this server."),
            )
            .await
    {
        tracing::warn!(%error, "failed to send missing-template notice");
    }
    Ok(template)
}
