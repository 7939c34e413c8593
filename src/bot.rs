use crate::{
    cli::Cli,
    db::Database,
    engine::{
        CreateOutcome, DeleteOutcome, Engine, JoinOutcome, LeaveOutcome, MembersOutcome,
        StoreFailed,
    },
    entity::{mention_group, user},
    mention::{escape, extract_candidate_names, render_member_quietly, MentionOutcome},
    reply::Reply,
};
use anyhow::Context;
use std::collections::BTreeSet;
use teloxide::{
    dispatching::UpdateHandler,
    prelude::*,
    types::{
        InlineKeyboardButton, InlineKeyboardMarkup, KeyboardButton, KeyboardMarkup, UpdateKind,
        User,
    },
    utils::command::BotCommands,
};
use tracing::{debug, info, Level};

type HandlerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

const GENERIC_FAILURE: &str = "Something went wrong, please try again later.";
const CALLBACK_DATA_LIMIT: usize = 64;

#[derive(BotCommands, Clone, Debug)]
#[command(
    rename_rule = "lowercase",
    description = "Mention groups let you ping a set of people at once. Commands:"
)]
pub enum Command {
    #[command(description = "display this text")]
    Help,
    #[command(description = "create a mention group: /new <name>")]
    New(String),
    #[command(description = "join a group: /join [name]")]
    Join(String),
    #[command(description = "leave a group: /leave [name]")]
    Leave(String),
    #[command(description = "mention every member of a group: /mention <name>")]
    Mention(String),
    #[command(description = "short for /mention")]
    M(String),
    #[command(description = "same as /mention")]
    Call(String),
    #[command(description = "show the members of a group without mentioning them: /show [name]")]
    Show(String),
    #[command(description = "delete a group that has no members: /del [name]")]
    Del(String),
    #[command(description = "list all groups in this chat")]
    List,
    #[command(description = "list the groups you belong to")]
    My,
}

/// Chat id change reported by Telegram, e.g. after a group became a supergroup.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChatMigration {
    pub from: i64,
    pub to: i64,
}

/// Group names found in a free-form message.
#[derive(Clone, Debug)]
pub struct MentionRequest(pub BTreeSet<String>);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallbackAction {
    Join,
    Leave,
    Del,
    Show,
}

impl CallbackAction {
    fn as_str(self) -> &'static str {
        match self {
            Self::Join => "join",
            Self::Leave => "leave",
            Self::Del => "del",
            Self::Show => "show",
        }
    }
}

/// Parses `action:group` callback data.
pub fn parse_callback(data: &str) -> Option<(CallbackAction, &str)> {
    let (action, group) = data.split_once(':')?;
    let action = match action {
        "join" => CallbackAction::Join,
        "leave" => CallbackAction::Leave,
        "del" => CallbackAction::Del,
        "show" => CallbackAction::Show,
        _ => return None,
    };
    (!group.is_empty()).then_some((action, group))
}

pub fn callback_data(action: CallbackAction, group: &str) -> String {
    format!("{}:{group}", action.as_str())
}

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    info!("Starting mention bot...");
    let db = Database::new(&cli.database)
        .await
        .with_context(|| format!("Failed to open database {:?}", cli.database))?;
    db.apply_migrations()
        .await
        .context("Failed to apply database migrations")?;
    let engine = Engine::new(db);

    let bot = Bot::new(&cli.token);
    let me = bot.get_me().await.context("Failed to get bot information")?;
    info!(
        id = me.id.0,
        username = %me.username(),
        can_join_groups = me.can_join_groups,
        can_read_all_group_messages = me.can_read_all_group_messages,
        "Bot identified"
    );
    bot.set_my_commands(Command::bot_commands()).await?;

    info!("Ready for listening commands and messages...");
    Dispatcher::builder(bot, schema())
        .dependencies(dptree::deps![engine])
        .default_handler(|_| async {})
        .error_handler(LoggingErrorHandler::with_custom_text(
            "An error has occurred in the dispatcher",
        ))
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    Ok(())
}

/// Handlers in the order they are tried. `inspect` steps always pass the
/// update on; the first matching endpoint ends the chain.
pub fn schema() -> UpdateHandler<Box<dyn std::error::Error + Send + Sync + 'static>> {
    use dptree::case;

    let command_handler = teloxide::filter_command::<Command, _>()
        .branch(case![Command::Help].endpoint(help))
        .branch(case![Command::New(name)].endpoint(new_group))
        .branch(case![Command::Join(name)].endpoint(join))
        .branch(case![Command::Leave(name)].endpoint(leave))
        .branch(case![Command::Mention(name)].endpoint(mention))
        .branch(case![Command::M(name)].endpoint(mention))
        .branch(case![Command::Call(name)].endpoint(mention))
        .branch(case![Command::Show(name)].endpoint(show))
        .branch(case![Command::Del(name)].endpoint(delete))
        .branch(case![Command::List].endpoint(list))
        .branch(case![Command::My].endpoint(my_groups));

    let message_handler = Update::filter_message()
        .inspect_async(sync_sender)
        .branch(dptree::filter_map(chat_migration).endpoint(migrate_chat))
        .branch(command_handler)
        .branch(dptree::filter_map(mention_request).endpoint(mention_from_text));

    let callback_handler = Update::filter_callback_query().endpoint(handle_callback);

    dptree::entry()
        .inspect(log_update)
        .branch(message_handler)
        .branch(callback_handler)
}

// ----- Middleware

/// Masks message text unless debug logging is on. Commands stay readable,
/// and in messages with `@` only the `@` words are kept.
pub fn redact(text: &str, reveal: bool) -> String {
    if reveal || text.is_empty() || text.starts_with('/') {
        return text.to_owned();
    }
    if text.contains('@') {
        return text
            .split_whitespace()
            .map(|word| {
                if word.starts_with('@') {
                    word.to_owned()
                } else {
                    "*".repeat(word.chars().count())
                }
            })
            .collect::<Vec<String>>()
            .join(" ");
    }
    "[redacted]".to_owned()
}

fn log_update(update: Update) {
    let reveal = tracing::enabled!(Level::DEBUG);
    match &update.kind {
        UpdateKind::Message(msg) => info!(
            update_id = ?update.id,
            kind = "message",
            chat_id = msg.chat.id.0,
            from = ?msg.from().map(|user| user.id.0),
            text = %redact(msg.text().unwrap_or_default(), reveal),
            "Incoming update"
        ),
        UpdateKind::CallbackQuery(q) => info!(
            update_id = ?update.id,
            kind = "callback_query",
            from = q.from.id.0,
            data = ?q.data,
            "Incoming update"
        ),
        _ => debug!(update_id = ?update.id, "Incoming update of an unhandled kind"),
    }
}

fn profile(user: &User) -> user::Model {
    user::Model {
        id: user.id.0 as i64,
        handle: user.username.clone(),
        first_name: user.first_name.clone(),
        last_name: user.last_name.clone(),
    }
}

/// Keeps the sender's profile fresh and enrolls them in the chat's `all`
/// group. Only group chats are tracked.
async fn sync_sender(msg: Message, engine: Engine) {
    if !(msg.chat.is_group() || msg.chat.is_supergroup()) {
        return;
    }
    let Some(from) = msg.from().filter(|user| !user.is_bot) else {
        return;
    };

    debug!(user_id = from.id.0, chat_id = msg.chat.id.0, "Updating user data");
    if engine.observe_user(profile(from)).await.is_ok() {
        let _ = engine
            .enroll_in_all_group(msg.chat.id.0, from.id.0 as i64)
            .await;
    }
}

fn chat_migration(msg: Message) -> Option<ChatMigration> {
    msg.migrate_to_chat_id().map(|to| ChatMigration {
        from: msg.chat.id.0,
        to: to.0,
    })
}

async fn migrate_chat(migration: ChatMigration, engine: Engine) -> HandlerResult {
    info!(from_chat_id = migration.from, to_chat_id = migration.to, "Chat migration detected");
    engine.on_chat_migration(migration.from, migration.to).await;
    Ok(())
}

fn mention_request(msg: Message) -> Option<MentionRequest> {
    let text = msg.text().or_else(|| msg.caption())?;
    if text.starts_with('/') {
        return None;
    }
    let names = extract_candidate_names(text);
    (!names.is_empty()).then_some(MentionRequest(names))
}

// ----- Replies

#[derive(Debug, PartialEq, Eq)]
enum Arg<'a> {
    Missing,
    One(&'a str),
    TooMany,
}

fn parse_arg(raw: &str) -> Arg<'_> {
    let mut words = raw.split_whitespace();
    match (words.next(), words.next()) {
        (None, _) => Arg::Missing,
        (Some(word), None) => Arg::One(word),
        _ => Arg::TooMany,
    }
}

fn usage(command: &str) -> String {
    format!("Usage: /{command} <group_name>")
}

pub fn create_text(outcome: &CreateOutcome, name: &str) -> String {
    match outcome {
        CreateOutcome::Created(group) => format!(
            "Group '{0}' created successfully!\nTo join this group, use: /join {0}",
            group.name
        ),
        CreateOutcome::InvalidName => format!(
            "Invalid group name '{name}'. Use lowercase letters, digits and dashes only.\n{}",
            usage("new")
        ),
        CreateOutcome::AlreadyExists => format!("Group '{name}' already exists in this chat."),
        CreateOutcome::StoreError => GENERIC_FAILURE.to_owned(),
    }
}

pub fn join_text(outcome: &JoinOutcome, name: &str) -> String {
    match outcome {
        JoinOutcome::Joined(group) => format!("Successfully joined group '{}'!", group.name),
        JoinOutcome::AlreadyMember => format!("You are already a member of group '{name}'!"),
        JoinOutcome::GroupNotFound => format!("Group '{name}' not found."),
        JoinOutcome::StoreError => GENERIC_FAILURE.to_owned(),
    }
}

pub fn leave_text(outcome: &LeaveOutcome, name: &str) -> String {
    match outcome {
        LeaveOutcome::Left(group) => format!("Successfully left group '{}'!", group.name),
        LeaveOutcome::NotAMember => format!("You are not a member of group '{name}'!"),
        LeaveOutcome::GroupNotFound => format!("Group '{name}' not found."),
        LeaveOutcome::StoreError => GENERIC_FAILURE.to_owned(),
    }
}

pub fn delete_text(outcome: &DeleteOutcome, name: &str) -> String {
    match outcome {
        DeleteOutcome::Deleted => format!("Group '{name}' deleted successfully!"),
        DeleteOutcome::HasMembers(count) => format!(
            "Cannot delete group '{name}': it has {count} member(s). Ask members to /leave first."
        ),
        DeleteOutcome::GroupNotFound => format!("Group '{name}' not found."),
        DeleteOutcome::StoreError => GENERIC_FAILURE.to_owned(),
    }
}

/// Already escaped: member lines are rendered by [`render_member_quietly`].
pub fn members_text(outcome: &MembersOutcome, name: &str) -> String {
    match outcome {
        MembersOutcome::Members(group, members) if members.is_empty() => {
            escape(&format!("Group '{}' has no members.", group.name))
        }
        MembersOutcome::Members(group, members) => {
            let lines = members
                .iter()
                .map(render_member_quietly)
                .collect::<Vec<String>>()
                .join("\n");
            format!("{}\n{}", escape(&format!("Members of '{}':", group.name)), lines)
        }
        MembersOutcome::GroupNotFound => escape(&format!("Group '{name}' not found.")),
        MembersOutcome::StoreError => escape(GENERIC_FAILURE),
    }
}

/// Already escaped, see [`MentionOutcome::Formatted`].
pub fn mention_text(outcome: MentionOutcome, name: &str) -> String {
    match outcome {
        MentionOutcome::Formatted(text) => text,
        MentionOutcome::NoGroupsFound => escape(&format!("Group '{name}' not found.")),
        MentionOutcome::NoMembers => escape("No members in this group!"),
        MentionOutcome::StoreError => escape(GENERIC_FAILURE),
    }
}

fn bullet_list(header: &str, groups: &[mention_group::Model]) -> String {
    let items: String = groups
        .iter()
        .map(|group| format!("• {}\n", group.name))
        .collect();
    format!("{header}\n{items}")
}

fn selection_keyboard(command: &str, groups: &[mention_group::Model]) -> KeyboardMarkup {
    let rows: Vec<Vec<KeyboardButton>> = groups
        .chunks(2)
        .map(|pair| {
            pair.iter()
                .map(|group| KeyboardButton::new(format!("/{command} {}", group.name)))
                .collect()
        })
        .collect();

    KeyboardMarkup::new(rows)
        .resize_keyboard(true)
        .one_time_keyboard(true)
        .selective(true)
        .input_field_placeholder("Select group".to_owned())
}

fn inline_buttons(buttons: &[(&str, CallbackAction, &str)]) -> InlineKeyboardMarkup {
    let row: Vec<InlineKeyboardButton> = buttons
        .iter()
        .map(|(label, action, group)| (label, callback_data(*action, group)))
        .filter(|(_, data)| data.len() <= CALLBACK_DATA_LIMIT)
        .map(|(label, data)| InlineKeyboardButton::callback(label.to_string(), data))
        .collect();
    InlineKeyboardMarkup::new(vec![row])
}

fn show_buttons(groups: &[mention_group::Model]) -> InlineKeyboardMarkup {
    let rows: Vec<Vec<InlineKeyboardButton>> = groups
        .chunks(2)
        .map(|pair| {
            pair.iter()
                .map(|group| (group, callback_data(CallbackAction::Show, &group.name)))
                .filter(|(_, data)| data.len() <= CALLBACK_DATA_LIMIT)
                .map(|(group, data)| InlineKeyboardButton::callback(group.name.clone(), data))
                .collect()
        })
        .collect();
    InlineKeyboardMarkup::new(rows)
}

fn members_buttons(outcome: &MembersOutcome) -> Option<InlineKeyboardMarkup> {
    match outcome {
        MembersOutcome::Members(group, members) if members.is_empty() => Some(inline_buttons(&[
            ("Join", CallbackAction::Join, group.name.as_str()),
            ("Delete", CallbackAction::Del, group.name.as_str()),
        ])),
        MembersOutcome::Members(group, _) => Some(inline_buttons(&[
            ("Join", CallbackAction::Join, group.name.as_str()),
            ("Leave", CallbackAction::Leave, group.name.as_str()),
        ])),
        _ => None,
    }
}

/// Sends a one-time keyboard with a `/<command> <group>` button per group.
async fn offer_selection(
    bot: &Bot,
    msg: &Message,
    command: &str,
    groups: Result<Vec<mention_group::Model>, StoreFailed>,
    prompt: &str,
    nothing_to_offer: &str,
) {
    let reply = match groups {
        Ok(groups) if groups.is_empty() => Reply::to_message(msg, escape(nothing_to_offer)),
        Ok(groups) => Reply::to_message(msg, escape(prompt))
            .markup(selection_keyboard(command, &groups)),
        Err(StoreFailed) => Reply::to_message(msg, escape(GENERIC_FAILURE)),
    };
    reply.send(bot).await;
}

// ----- Commands

async fn help(bot: Bot, msg: Message) -> HandlerResult {
    Reply::new(msg.chat.id, escape(&Command::descriptions().to_string()))
        .send(&bot)
        .await;
    Ok(())
}

async fn new_group(bot: Bot, msg: Message, engine: Engine, name: String) -> HandlerResult {
    let reply = match parse_arg(&name) {
        Arg::One(name) => {
            let outcome = engine.create(name, msg.chat.id.0).await;
            let reply = Reply::to_message(&msg, escape(&create_text(&outcome, name)));
            match &outcome {
                CreateOutcome::Created(group) => reply.markup(inline_buttons(&[(
                    "Join",
                    CallbackAction::Join,
                    group.name.as_str(),
                )])),
                _ => reply,
            }
        }
        _ => Reply::to_message(&msg, escape(&usage("new"))),
    };
    reply.send(&bot).await;
    Ok(())
}

async fn join(bot: Bot, msg: Message, engine: Engine, name: String) -> HandlerResult {
    let Some(from) = msg.from() else {
        return Ok(());
    };
    let chat_id = msg.chat.id.0;

    match parse_arg(&name) {
        Arg::Missing => {
            let groups = engine.list_joinable(chat_id, from.id.0 as i64).await;
            offer_selection(
                &bot,
                &msg,
                "join",
                groups,
                "Choose a group to join:",
                "There are no groups you can join in this chat.",
            )
            .await;
        }
        Arg::One(name) => {
            let outcome = engine.join(name, chat_id, profile(from)).await;
            Reply::to_message(&msg, escape(&join_text(&outcome, name)))
                .send(&bot)
                .await;
        }
        Arg::TooMany => {
            Reply::to_message(&msg, escape(&usage("join")))
                .send(&bot)
                .await;
        }
    }
    Ok(())
}

async fn leave(bot: Bot, msg: Message, engine: Engine, name: String) -> HandlerResult {
    let Some(from) = msg.from() else {
        return Ok(());
    };
    let chat_id = msg.chat.id.0;
    let user_id = from.id.0 as i64;

    match parse_arg(&name) {
        Arg::Missing => {
            let groups = engine.list_leavable(chat_id, user_id).await;
            offer_selection(
                &bot,
                &msg,
                "leave",
                groups,
                "Choose a group to leave:",
                "You are not a member of any group in this chat.",
            )
            .await;
        }
        Arg::One(name) => {
            let outcome = engine.leave(name, chat_id, user_id).await;
            Reply::to_message(&msg, escape(&leave_text(&outcome, name)))
                .send(&bot)
                .await;
        }
        Arg::TooMany => {
            Reply::to_message(&msg, escape(&usage("leave")))
                .send(&bot)
                .await;
        }
    }
    Ok(())
}

async fn mention(bot: Bot, msg: Message, engine: Engine, name: String) -> HandlerResult {
    let text = match parse_arg(&name) {
        Arg::One(name) => mention_text(engine.mention_group(name, msg.chat.id.0).await, name),
        _ => escape(&usage("mention")),
    };
    Reply::to_message(&msg, text).send(&bot).await;
    Ok(())
}

async fn show(bot: Bot, msg: Message, engine: Engine, name: String) -> HandlerResult {
    let chat_id = msg.chat.id.0;
    match parse_arg(&name) {
        Arg::Missing => {
            let groups = engine.list_groups(chat_id).await;
            offer_selection(
                &bot,
                &msg,
                "show",
                groups,
                "Choose a group to show:",
                "No groups found in this chat.",
            )
            .await;
        }
        Arg::One(name) => {
            let outcome = engine.list_members(name, chat_id).await;
            let reply = Reply::to_message(&msg, members_text(&outcome, name));
            match members_buttons(&outcome) {
                Some(buttons) => reply.markup(buttons),
                None => reply,
            }
            .send(&bot)
            .await;
        }
        Arg::TooMany => {
            Reply::to_message(&msg, escape(&usage("show")))
                .send(&bot)
                .await;
        }
    }
    Ok(())
}

async fn delete(bot: Bot, msg: Message, engine: Engine, name: String) -> HandlerResult {
    let chat_id = msg.chat.id.0;
    match parse_arg(&name) {
        Arg::Missing => {
            let groups = engine.list_groups(chat_id).await;
            offer_selection(
                &bot,
                &msg,
                "del",
                groups,
                "Choose a group to delete:",
                "No groups found in this chat.",
            )
            .await;
        }
        Arg::One(name) => {
            let outcome = engine.delete(name, chat_id).await;
            Reply::to_message(&msg, escape(&delete_text(&outcome, name)))
                .send(&bot)
                .await;
        }
        Arg::TooMany => {
            Reply::to_message(&msg, escape(&usage("del")))
                .send(&bot)
                .await;
        }
    }
    Ok(())
}

async fn list(bot: Bot, msg: Message, engine: Engine) -> HandlerResult {
    let reply = match engine.list_groups(msg.chat.id.0).await {
        Ok(groups) if groups.is_empty() => {
            Reply::to_message(&msg, escape("No groups found in this chat."))
        }
        Ok(groups) => Reply::to_message(&msg, escape(&bullet_list("Groups in this chat:", &groups)))
            .markup(show_buttons(&groups)),
        Err(StoreFailed) => Reply::to_message(&msg, escape(GENERIC_FAILURE)),
    };
    reply.send(&bot).await;
    Ok(())
}

async fn my_groups(bot: Bot, msg: Message, engine: Engine) -> HandlerResult {
    let Some(from) = msg.from() else {
        return Ok(());
    };
    let text = match engine.list_user_groups(msg.chat.id.0, from.id.0 as i64).await {
        Ok(groups) if groups.is_empty() => "You are not a member of any group in this chat.".to_owned(),
        Ok(groups) => bullet_list("Your groups in this chat:", &groups),
        Err(StoreFailed) => GENERIC_FAILURE.to_owned(),
    };
    Reply::to_message(&msg, escape(&text)).send(&bot).await;
    Ok(())
}

async fn mention_from_text(
    bot: Bot,
    msg: Message,
    engine: Engine,
    request: MentionRequest,
) -> HandlerResult {
    match engine.mention(msg.chat.id.0, &request.0).await {
        MentionOutcome::Formatted(text) => Reply::to_message(&msg, text).send(&bot).await,
        MentionOutcome::StoreError => {
            Reply::to_message(&msg, escape(GENERIC_FAILURE))
                .send(&bot)
                .await
        }
        MentionOutcome::NoGroupsFound | MentionOutcome::NoMembers => {
            debug!(chat_id = msg.chat.id.0, names = ?request.0, "Nothing to mention");
            false
        }
    };
    Ok(())
}

// ----- Buttons

async fn handle_callback(bot: Bot, q: CallbackQuery, engine: Engine) -> HandlerResult {
    let parsed = q.data.as_deref().and_then(parse_callback);
    let chat_id = q.message.as_ref().map(|msg| msg.chat.id);

    let (Some((action, name)), Some(chat_id)) = (parsed, chat_id) else {
        bot.answer_callback_query(q.id.clone())
            .text("This button is no longer valid.")
            .await?;
        return Ok(());
    };

    let toast = match action {
        CallbackAction::Join => join_text(&engine.join(name, chat_id.0, profile(&q.from)).await, name),
        CallbackAction::Leave => {
            leave_text(&engine.leave(name, chat_id.0, q.from.id.0 as i64).await, name)
        }
        CallbackAction::Del => delete_text(&engine.delete(name, chat_id.0).await, name),
        CallbackAction::Show => {
            let outcome = engine.list_members(name, chat_id.0).await;
            let reply = Reply::new(chat_id, members_text(&outcome, name));
            match members_buttons(&outcome) {
                Some(buttons) => reply.markup(buttons),
                None => reply,
            }
            .send(&bot)
            .await;
            String::new()
        }
    };

    let answer = bot.answer_callback_query(q.id.clone());
    if toast.is_empty() {
        answer.await?;
    } else {
        answer.text(toast).await?;
    }
    Ok(())
}
