//! Group names, `@group` extraction and MarkdownV2 mention rendering.

use sea_orm::ConnectionTrait;
use std::collections::BTreeSet;
use teloxide::utils::markdown;
use tracing::error;

use crate::{
    db::{self, groups::GroupWithMembers},
    entity::{mention_group, user},
};

/// The one predicate deciding what a group name may look like. Used both when
/// a group is created and when free text is scanned for `@name`.
pub fn is_valid_group_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

pub fn normalize_group_name(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Collects the `@name` tokens of `text` that could name a group.
pub fn extract_candidate_names(text: &str) -> BTreeSet<String> {
    if !text.contains('@') {
        return BTreeSet::new();
    }

    text.split(|c: char| c.is_whitespace() || c == ',')
        .map(|token| token.trim_end_matches(|c| c == '.' || c == ','))
        .filter_map(|token| token.strip_prefix('@'))
        .map(normalize_group_name)
        .filter(|name| is_valid_group_name(name))
        .collect()
}

/// Escapes every MarkdownV2 reserved character in `text`.
pub fn escape(text: &str) -> String {
    markdown::escape(text)
}

/// `@handle` when the user has one, otherwise a `tg://user` deep link
/// labelled with their name.
pub fn render_member(member: &user::Model) -> String {
    match member.handle.as_deref() {
        Some(handle) if !handle.is_empty() => escape(&format!("@{handle}")),
        _ => markdown::user_mention(member.id, &escape(&member.display_name())),
    }
}

/// Member line for listings that must not notify anyone.
pub fn render_member_quietly(member: &user::Model) -> String {
    match member.handle.as_deref() {
        Some(handle) if !handle.is_empty() => {
            escape(&format!("{} ({handle})", member.display_name()))
        }
        _ => escape(&member.display_name()),
    }
}

pub fn render_group_block(group: &mention_group::Model, members: &[user::Model]) -> String {
    let mentions = members
        .iter()
        .map(render_member)
        .collect::<Vec<String>>()
        .join(", ");
    format!(
        "Mentioning {} group members:\n{}",
        escape(&group.name),
        mentions
    )
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MentionOutcome {
    Formatted(String),
    NoGroupsFound,
    NoMembers,
    StoreError,
}

/// Renders one block per group that has members, blank-line separated.
pub fn format_mentions(groups: &[GroupWithMembers]) -> MentionOutcome {
    if groups.is_empty() {
        return MentionOutcome::NoGroupsFound;
    }

    let blocks: Vec<String> = groups
        .iter()
        .filter(|(_, members)| !members.is_empty())
        .map(|(group, members)| render_group_block(group, members))
        .collect();

    if blocks.is_empty() {
        MentionOutcome::NoMembers
    } else {
        MentionOutcome::Formatted(blocks.join("\n\n"))
    }
}

pub async fn resolve_and_format<C: ConnectionTrait>(
    conn: &C,
    chat_id: i64,
    names: &BTreeSet<String>,
) -> MentionOutcome {
    let names: Vec<String> = names.iter().cloned().collect();
    match db::groups::find_groups_by_names_with_members(conn, chat_id, &names).await {
        Ok(groups) => format_mentions(&groups),
        Err(err) => {
            error!(%err, chat_id, ?names, "Resolving mention groups failed");
            MentionOutcome::StoreError
        }
    }
}
