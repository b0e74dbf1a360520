use std::sync::Arc;

use anyhow::Result;
use teloxide::prelude::*;
use teloxide::types::ChatKind;
use teloxide::utils::command::BotCommands;
use tracing::{error, info, warn};

use crate::commands::{self, Commands, Destination};
use crate::config::Config;

#[derive(BotCommands, Clone, Debug)]
#[command(rename_rule = "lowercase", description = "Form responses bot commands:")]
pub enum Command {
    #[command(description = "greeting and setup hints")]
    Start,
    #[command(description = "how to use the bot")]
    Help,
    #[command(description = "bind a form: /connect <form url or id> [destination chat id]")]
    Connect(String),
    #[command(description = "unbind a form: /delete <form url or id>")]
    Delete(String),
    #[command(description = "unbind every form of this chat")]
    Reset,
    #[command(description = "list bound forms")]
    List,
}

/// Shared application state
pub struct AppState {
    pub config: Config,
    pub commands: Commands,
}

impl AppState {
    pub fn new(config: Config, commands: Commands) -> Self {
        Self { config, commands }
    }
}

const HELP_TEXT: &str = "1. Add the bot to a group and make sure the form is shared with its Google account.\n\n\
     2. In the group, send /connect <form url> (the link ending in /edit).\n\
     From a private chat, send /connect <form url> <group chat id> instead; you must be a member of that group.\n\n\
     3. New responses will be posted to the group. Use /list, /delete and /reset to manage bindings.";

/// Start the Telegram bot
pub async fn run(state: Arc<AppState>, bot: Bot) -> Result<()> {
    info!("Starting Telegram bot...");

    if let Err(e) = bot.set_my_commands(Command::bot_commands()).await {
        warn!("Failed to register bot commands: {}", e);
    }

    let allowed = Arc::clone(&state);
    let handler = Update::filter_message()
        .filter_map(move |msg: Message| {
            let user = msg.from.as_ref()?;
            if allowed.config.is_user_allowed(user.id.0) {
                Some(msg)
            } else {
                None
            }
        })
        .filter_command::<Command>()
        .endpoint(handle_command);

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .default_handler(|upd| async move {
            warn!("Unhandled update: {:?}", upd.id);
        })
        .error_handler(LoggingErrorHandler::with_custom_text("bot"))
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    Ok(())
}

fn is_group(msg: &Message) -> bool {
    !matches!(msg.chat.kind, ChatKind::Private(_))
}

async fn handle_command(
    bot: Bot,
    msg: Message,
    cmd: Command,
    state: Arc<AppState>,
) -> ResponseResult<()> {
    let chat_id = msg.chat.id.0;
    info!("Command from chat {}: {:?}", chat_id, cmd);

    let reply = match cmd {
        Command::Start => {
            if is_group(&msg) {
                "Hi! Send the form link as /connect <url> (the link should end with /edit).".to_string()
            } else {
                "Hi! I forward Google Forms responses to Telegram chats. \
                 Add me to a group and send /connect there, or see /help."
                    .to_string()
            }
        }
        Command::Help => HELP_TEXT.to_string(),
        Command::Connect(args) => connect(&bot, &msg, &state, &args).await?,
        Command::Delete(args) => match commands::parse_delete_args(&args) {
            Err(usage) => usage.to_string(),
            Ok(form_id) => match state.commands.unbind(chat_id, &form_id).await {
                Ok(outcome) => commands::describe_unbind(&form_id, &outcome),
                Err(e) => internal_error(&e),
            },
        },
        Command::Reset => match state.commands.reset(chat_id).await {
            Ok(0) => commands::NOTHING_BOUND.to_string(),
            Ok(n) => format!("Removed {} form binding(s).", n),
            Err(e) => internal_error(&e),
        },
        Command::List => match state.commands.list(chat_id).await {
            Ok(subs) => commands::describe_list(&subs),
            Err(e) => internal_error(&e),
        },
    };

    bot.send_message(msg.chat.id, reply).await?;
    Ok(())
}

async fn connect(
    bot: &Bot,
    msg: &Message,
    state: &AppState,
    args: &str,
) -> ResponseResult<String> {
    let request = match commands::parse_connect_args(args) {
        Ok(request) => request,
        Err(usage) => return Ok(usage.to_string()),
    };

    let destination_id = match request.destination {
        Destination::CurrentChat => {
            if !is_group(msg) {
                return Ok(commands::CONNECT_USAGE.to_string());
            }
            msg.chat.id.0
        }
        Destination::Explicit(dest) => {
            let Some(user) = msg.from.as_ref() else {
                return Ok(commands::CONNECT_USAGE.to_string());
            };
            match bot.get_chat_member(ChatId(dest), user.id).await {
                Ok(member) if member.is_present() => dest,
                Ok(_) => {
                    return Ok(format!("You are not a member of chat {}.", dest));
                }
                Err(e) => {
                    warn!("Membership check in chat {} failed: {}", dest, e);
                    return Ok(format!(
                        "Could not check chat {}. Make sure the bot was added to it.",
                        dest
                    ));
                }
            }
        }
    };

    let reply = match state
        .commands
        .bind(msg.chat.id.0, destination_id, &request.form_id)
        .await
    {
        Ok(outcome) => commands::describe_bind(&request.form_id, destination_id, &outcome),
        Err(e) => internal_error(&e),
    };
    Ok(reply)
}

fn internal_error(e: &anyhow::Error) -> String {
    error!("Command failed: {:#}", e);
    "Something went wrong, please try again later.".to_string()
}
