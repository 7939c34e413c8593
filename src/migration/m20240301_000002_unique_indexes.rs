use sea_orm_migration::prelude::*;

use super::{Membership, MentionGroup};

const GROUP_NAME_INDEX: &str = "idx-mention_group-chat_id-name";
const MEMBERSHIP_INDEX: &str = "idx-membership-group_id-user_id";

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_index(
                Index::create()
                    .name(GROUP_NAME_INDEX)
                    .table(MentionGroup::Table)
                    .col(MentionGroup::ChatId)
                    .col(MentionGroup::Name)
                    .unique()
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name(MEMBERSHIP_INDEX)
                    .table(Membership::Table)
                    .col(Membership::GroupId)
                    .col(Membership::UserId)
                    .unique()
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name(MEMBERSHIP_INDEX)
                    .table(Membership::Table)
                    .to_owned(),
            )
            .await?;
        manager
            .drop_index(
                Index::drop()
                    .name(GROUP_NAME_INDEX)
                    .table(MentionGroup::Table)
                    .to_owned(),
            )
            .await?;
        Ok(())
    }
}
