//! Membership rules on top of the store.
//!
//! Each operation returns an outcome enum instead of a store error: expected
//! conflicts (already a member, group not empty, ...) are ordinary variants,
//! and store failures are logged here and collapsed into `StoreError`.

use std::collections::BTreeSet;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::{
    db::{self, groups, users, Database},
    entity::{mention_group, user},
    mention::{self, is_valid_group_name, normalize_group_name, MentionOutcome},
};

/// Name of the group every active chat member is enrolled into, if it exists.
pub const ALL_GROUP: &str = "all";

const MIGRATION_ATTEMPTS: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateOutcome {
    Created(mention_group::Model),
    InvalidName,
    AlreadyExists,
    StoreError,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinOutcome {
    Joined(mention_group::Model),
    AlreadyMember,
    GroupNotFound,
    StoreError,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaveOutcome {
    Left(mention_group::Model),
    NotAMember,
    GroupNotFound,
    StoreError,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    HasMembers(u64),
    GroupNotFound,
    StoreError,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MembersOutcome {
    Members(mention_group::Model, Vec<user::Model>),
    GroupNotFound,
    StoreError,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationOutcome {
    Migrated(u64),
    Failed,
}

/// A store failure that has already been logged by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("storage is unavailable")]
pub struct StoreFailed;

fn optional<T>(result: Result<T, db::Error>) -> Result<Option<T>, db::Error> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(err) if err.is_not_found() => Ok(None),
        Err(err) => Err(err),
    }
}

#[derive(Clone, Debug)]
pub struct Engine {
    db: Database,
}

impl Engine {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub async fn create(&self, group_name: &str, chat_id: i64) -> CreateOutcome {
        let name = normalize_group_name(group_name);
        if !is_valid_group_name(&name) {
            return CreateOutcome::InvalidName;
        }

        match groups::create_group(self.db.conn(), &name, chat_id).await {
            Ok(group) => {
                info!(group_name = %name, chat_id, "Group created");
                CreateOutcome::Created(group)
            }
            Err(err) if err.is_already_exists() => CreateOutcome::AlreadyExists,
            Err(db::Error::InvalidName(_)) => CreateOutcome::InvalidName,
            Err(err) => {
                error!(%err, group_name = %name, chat_id, "Creating group failed");
                CreateOutcome::StoreError
            }
        }
    }

    pub async fn join(&self, group_name: &str, chat_id: i64, user: user::Model) -> JoinOutcome {
        let name = normalize_group_name(group_name);
        let user_id = user.id;
        match self.try_join(&name, chat_id, user).await {
            Ok(outcome) => outcome,
            Err(err) => {
                error!(%err, group_name = %name, chat_id, user_id, "Joining group failed");
                JoinOutcome::StoreError
            }
        }
    }

    async fn try_join(
        &self,
        name: &str,
        chat_id: i64,
        user: user::Model,
    ) -> Result<JoinOutcome, db::Error> {
        let txn = self.db.begin().await?;
        let Some(group) = optional(groups::get_group(&txn, name, chat_id).await)? else {
            return Ok(JoinOutcome::GroupNotFound);
        };

        if groups::is_member(&txn, group.id, user.id).await? {
            return Ok(JoinOutcome::AlreadyMember);
        }

        let user = users::upsert_user(&txn, user).await?;
        match groups::add_member(&txn, group.id, user.id).await {
            Ok(()) => {}
            Err(err) if err.is_already_exists() => return Ok(JoinOutcome::AlreadyMember),
            Err(err) => return Err(err),
        }
        db::commit(txn, "join").await?;

        info!(group_name = %group.name, chat_id, user_id = user.id, handle = ?user.handle, "User joined group");
        Ok(JoinOutcome::Joined(group))
    }

    pub async fn leave(&self, group_name: &str, chat_id: i64, user_id: i64) -> LeaveOutcome {
        let name = normalize_group_name(group_name);
        match self.try_leave(&name, chat_id, user_id).await {
            Ok(outcome) => outcome,
            Err(err) => {
                error!(%err, group_name = %name, chat_id, user_id, "Leaving group failed");
                LeaveOutcome::StoreError
            }
        }
    }

    async fn try_leave(
        &self,
        name: &str,
        chat_id: i64,
        user_id: i64,
    ) -> Result<LeaveOutcome, db::Error> {
        let txn = self.db.begin().await?;
        let Some(group) = optional(groups::get_group(&txn, name, chat_id).await)? else {
            return Ok(LeaveOutcome::GroupNotFound);
        };

        if optional(groups::remove_member(&txn, group.id, user_id).await)?.is_none() {
            return Ok(LeaveOutcome::NotAMember);
        }
        db::commit(txn, "leave").await?;

        info!(group_name = %group.name, chat_id, user_id, "User left group");
        Ok(LeaveOutcome::Left(group))
    }

    pub async fn delete(&self, group_name: &str, chat_id: i64) -> DeleteOutcome {
        let name = normalize_group_name(group_name);
        match self.try_delete(&name, chat_id).await {
            Ok(outcome) => outcome,
            Err(err) => {
                error!(%err, group_name = %name, chat_id, "Deleting group failed");
                DeleteOutcome::StoreError
            }
        }
    }

    async fn try_delete(&self, name: &str, chat_id: i64) -> Result<DeleteOutcome, db::Error> {
        let txn = self.db.begin().await?;
        let Some(group) = optional(groups::get_group(&txn, name, chat_id).await)? else {
            return Ok(DeleteOutcome::GroupNotFound);
        };

        let members = groups::count_members(&txn, group.id).await?;
        if members > 0 {
            return Ok(DeleteOutcome::HasMembers(members));
        }

        groups::delete_group(&txn, group.id).await?;
        db::commit(txn, "delete").await?;

        info!(group_name = %group.name, chat_id, "Group deleted");
        Ok(DeleteOutcome::Deleted)
    }

    pub async fn list_members(&self, group_name: &str, chat_id: i64) -> MembersOutcome {
        let name = normalize_group_name(group_name);
        self.try_list_members(&name, chat_id)
            .await
            .unwrap_or_else(|err| {
                error!(%err, group_name = %name, chat_id, "Listing group members failed");
                MembersOutcome::StoreError
            })
    }

    async fn try_list_members(&self, name: &str, chat_id: i64) -> Result<MembersOutcome, db::Error> {
        let conn = self.db.conn();
        let Some(group) = optional(groups::get_group(conn, name, chat_id).await)? else {
            return Ok(MembersOutcome::GroupNotFound);
        };
        let members = groups::list_members(conn, group.id).await?;
        Ok(MembersOutcome::Members(group, members))
    }

    pub async fn list_groups(&self, chat_id: i64) -> Result<Vec<mention_group::Model>, StoreFailed> {
        groups::list_groups_by_chat(self.db.conn(), chat_id)
            .await
            .map_err(|err| {
                error!(%err, chat_id, "Listing groups failed");
                StoreFailed
            })
    }

    pub async fn list_user_groups(
        &self,
        chat_id: i64,
        user_id: i64,
    ) -> Result<Vec<mention_group::Model>, StoreFailed> {
        groups::list_groups_user_belongs_to(self.db.conn(), chat_id, user_id)
            .await
            .map_err(|err| {
                error!(%err, chat_id, user_id, "Listing user groups failed");
                StoreFailed
            })
    }

    pub async fn list_joinable(
        &self,
        chat_id: i64,
        user_id: i64,
    ) -> Result<Vec<mention_group::Model>, StoreFailed> {
        groups::list_groups_user_can_join(self.db.conn(), chat_id, user_id)
            .await
            .map_err(|err| {
                error!(%err, chat_id, user_id, "Listing joinable groups failed");
                StoreFailed
            })
    }

    pub async fn list_leavable(
        &self,
        chat_id: i64,
        user_id: i64,
    ) -> Result<Vec<mention_group::Model>, StoreFailed> {
        groups::list_groups_user_can_leave(self.db.conn(), chat_id, user_id)
            .await
            .map_err(|err| {
                error!(%err, chat_id, user_id, "Listing leavable groups failed");
                StoreFailed
            })
    }

    /// Mentions the members of the named groups of a chat.
    pub async fn mention(&self, chat_id: i64, names: &BTreeSet<String>) -> MentionOutcome {
        mention::resolve_and_format(self.db.conn(), chat_id, names).await
    }

    pub async fn mention_group(&self, group_name: &str, chat_id: i64) -> MentionOutcome {
        let names = BTreeSet::from([normalize_group_name(group_name)]);
        self.mention(chat_id, &names).await
    }

    /// Records the latest profile of a user seen in a chat.
    pub async fn observe_user(&self, user: user::Model) -> Result<(), StoreFailed> {
        let user_id = user.id;
        users::upsert_user(self.db.conn(), user)
            .await
            .map(|_| ())
            .map_err(|err| {
                error!(%err, user_id, "Updating user data failed");
                StoreFailed
            })
    }

    /// Adds the user to the chat's [`ALL_GROUP`] when such a group exists.
    /// Returns whether a membership was created. The user must already be
    /// known to the store.
    pub async fn enroll_in_all_group(&self, chat_id: i64, user_id: i64) -> Result<bool, StoreFailed> {
        match self.try_enroll_in_all_group(chat_id, user_id).await {
            Ok(true) => {
                info!(chat_id, user_id, "Added user to the all group");
                Ok(true)
            }
            Ok(false) => Ok(false),
            Err(err) => {
                error!(%err, chat_id, user_id, "Adding user to the all group failed");
                Err(StoreFailed)
            }
        }
    }

    async fn try_enroll_in_all_group(&self, chat_id: i64, user_id: i64) -> Result<bool, db::Error> {
        let conn = self.db.conn();
        let Some(group) = optional(groups::get_group(conn, ALL_GROUP, chat_id).await)? else {
            return Ok(false);
        };
        match groups::add_member(conn, group.id, user_id).await {
            Ok(()) => Ok(true),
            Err(err) if err.is_already_exists() => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Moves the chat's groups to the id Telegram assigned after an upgrade.
    pub async fn on_chat_migration(&self, old_chat_id: i64, new_chat_id: i64) -> MigrationOutcome {
        for attempt in 1..=MIGRATION_ATTEMPTS {
            match groups::remap_chat(self.db.conn(), old_chat_id, new_chat_id).await {
                Ok(moved) => {
                    info!(old_chat_id, new_chat_id, moved, "Chat groups migrated");
                    return MigrationOutcome::Migrated(moved);
                }
                Err(err) => {
                    warn!(%err, attempt, old_chat_id, new_chat_id, "Chat migration attempt failed");
                }
            }
        }

        error!(
            old_chat_id,
            new_chat_id, "Chat migration failed; groups remain under the old chat id"
        );
        MigrationOutcome::Failed
    }
}
