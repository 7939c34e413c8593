//! Group store: chat-scoped mention groups and their membership edges.

use sea_orm::{
    sea_query::{Expr, Query},
    ActiveModelTrait,
    ActiveValue::NotSet,
    ColumnTrait, ConnectionTrait, EntityTrait, ModelTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use std::collections::HashMap;

use super::{commit, Error, OpContext};
use crate::{
    entity::{membership, mention_group, user},
    mention::is_valid_group_name,
};

pub type GroupWithMembers = (mention_group::Model, Vec<user::Model>);

pub async fn create_group<C: ConnectionTrait>(
    conn: &C,
    name: &str,
    chat_id: i64,
) -> Result<mention_group::Model, Error> {
    if !is_valid_group_name(name) {
        return Err(Error::InvalidName(name.to_owned()));
    }

    let group = mention_group::ActiveModel {
        id: NotSet,
        name: Set(name.to_owned()),
        chat_id: Set(chat_id),
    };
    group.insert(conn).await.op("create_group")
}

pub async fn get_group<C: ConnectionTrait>(
    conn: &C,
    name: &str,
    chat_id: i64,
) -> Result<mention_group::Model, Error> {
    mention_group::Entity::find()
        .filter(mention_group::Column::ChatId.eq(chat_id))
        .filter(mention_group::Column::Name.eq(name))
        .one(conn)
        .await
        .op("get_group")?
        .ok_or(Error::NotFound("get_group"))
}

pub async fn list_groups_by_chat<C: ConnectionTrait>(
    conn: &C,
    chat_id: i64,
) -> Result<Vec<mention_group::Model>, Error> {
    mention_group::Entity::find()
        .filter(mention_group::Column::ChatId.eq(chat_id))
        .order_by_asc(mention_group::Column::Id)
        .all(conn)
        .await
        .op("list_groups_by_chat")
}

fn groups_of_user(user_id: i64) -> sea_orm::sea_query::SelectStatement {
    Query::select()
        .column(membership::Column::GroupId)
        .from(membership::Entity)
        .and_where(membership::Column::UserId.eq(user_id))
        .to_owned()
}

pub async fn list_groups_user_belongs_to<C: ConnectionTrait>(
    conn: &C,
    chat_id: i64,
    user_id: i64,
) -> Result<Vec<mention_group::Model>, Error> {
    mention_group::Entity::find()
        .filter(mention_group::Column::ChatId.eq(chat_id))
        .filter(mention_group::Column::Id.in_subquery(groups_of_user(user_id)))
        .order_by_asc(mention_group::Column::Id)
        .all(conn)
        .await
        .op("list_groups_user_belongs_to")
}

pub async fn list_groups_user_can_join<C: ConnectionTrait>(
    conn: &C,
    chat_id: i64,
    user_id: i64,
) -> Result<Vec<mention_group::Model>, Error> {
    mention_group::Entity::find()
        .filter(mention_group::Column::ChatId.eq(chat_id))
        .filter(mention_group::Column::Id.not_in_subquery(groups_of_user(user_id)))
        .order_by_asc(mention_group::Column::Id)
        .all(conn)
        .await
        .op("list_groups_user_can_join")
}

/// Groups the user can leave: the ones they belong to.
pub async fn list_groups_user_can_leave<C: ConnectionTrait>(
    conn: &C,
    chat_id: i64,
    user_id: i64,
) -> Result<Vec<mention_group::Model>, Error> {
    list_groups_user_belongs_to(conn, chat_id, user_id).await
}

/// Resolves `names` in one chat. Names without a group are left out.
pub async fn find_groups_by_names_with_members<C: ConnectionTrait>(
    conn: &C,
    chat_id: i64,
    names: &[String],
) -> Result<Vec<GroupWithMembers>, Error> {
    if names.is_empty() {
        return Ok(Vec::new());
    }

    let groups = mention_group::Entity::find()
        .filter(mention_group::Column::ChatId.eq(chat_id))
        .filter(mention_group::Column::Name.is_in(names.iter().cloned()))
        .order_by_asc(mention_group::Column::Id)
        .all(conn)
        .await
        .op("find_groups_by_names_with_members")?;

    let group_ids: Vec<i64> = groups.iter().map(|g| g.id).collect();
    let memberships = membership::Entity::find()
        .filter(membership::Column::GroupId.is_in(group_ids))
        .order_by_asc(membership::Column::Id)
        .find_also_related(user::Entity)
        .all(conn)
        .await
        .op("find_groups_by_names_with_members")?;

    let mut members: HashMap<i64, Vec<user::Model>> = HashMap::new();
    for (edge, user) in memberships {
        if let Some(user) = user {
            members.entry(edge.group_id).or_default().push(user);
        }
    }

    Ok(groups
        .into_iter()
        .map(|group| {
            let users = members.remove(&group.id).unwrap_or_default();
            (group, users)
        })
        .collect())
}

/// Members of a group, in the order they joined.
pub async fn list_members<C: ConnectionTrait>(
    conn: &C,
    group_id: i64,
) -> Result<Vec<user::Model>, Error> {
    Ok(membership::Entity::find()
        .filter(membership::Column::GroupId.eq(group_id))
        .order_by_asc(membership::Column::Id)
        .find_also_related(user::Entity)
        .all(conn)
        .await
        .op("list_members")?
        .into_iter()
        .filter_map(|(_, user)| user)
        .collect())
}

pub async fn count_members<C: ConnectionTrait>(conn: &C, group_id: i64) -> Result<u64, Error> {
    membership::Entity::find()
        .filter(membership::Column::GroupId.eq(group_id))
        .count(conn)
        .await
        .op("count_members")
}

pub async fn is_member<C: ConnectionTrait>(
    conn: &C,
    group_id: i64,
    user_id: i64,
) -> Result<bool, Error> {
    let found = membership::Entity::find()
        .filter(membership::Column::GroupId.eq(group_id))
        .filter(membership::Column::UserId.eq(user_id))
        .one(conn)
        .await
        .op("is_member")?;
    Ok(found.is_some())
}

/// Fails with [`Error::AlreadyExists`] when the edge is already present,
/// including when a concurrent insert won the race.
pub async fn add_member<C: ConnectionTrait>(
    conn: &C,
    group_id: i64,
    user_id: i64,
) -> Result<(), Error> {
    let edge = membership::ActiveModel {
        id: NotSet,
        group_id: Set(group_id),
        user_id: Set(user_id),
    };
    edge.insert(conn).await.op("add_member").map(|_| ())
}

pub async fn remove_member<C: ConnectionTrait>(
    conn: &C,
    group_id: i64,
    user_id: i64,
) -> Result<(), Error> {
    let result = membership::Entity::delete_many()
        .filter(membership::Column::GroupId.eq(group_id))
        .filter(membership::Column::UserId.eq(user_id))
        .exec(conn)
        .await
        .op("remove_member")?;

    match result.rows_affected {
        0 => Err(Error::NotFound("remove_member")),
        _ => Ok(()),
    }
}

/// Deletes the group and, through the foreign key, its memberships.
pub async fn delete_group<C: ConnectionTrait>(conn: &C, group_id: i64) -> Result<(), Error> {
    let group = mention_group::Entity::find_by_id(group_id)
        .one(conn)
        .await
        .op("delete_group")?
        .ok_or(Error::NotFound("delete_group"))?;
    group.delete(conn).await.op("delete_group").map(|_| ())
}

/// Moves every group of `old_chat_id` to `new_chat_id`, all or nothing.
/// Returns the number of groups moved.
pub async fn remap_chat<C: ConnectionTrait + TransactionTrait>(
    conn: &C,
    old_chat_id: i64,
    new_chat_id: i64,
) -> Result<u64, Error> {
    let txn = conn.begin().await.op("remap_chat")?;

    let expected = mention_group::Entity::find()
        .filter(mention_group::Column::ChatId.eq(old_chat_id))
        .count(&txn)
        .await
        .op("remap_chat")?;

    let result = mention_group::Entity::update_many()
        .col_expr(mention_group::Column::ChatId, Expr::value(new_chat_id))
        .filter(mention_group::Column::ChatId.eq(old_chat_id))
        .exec(&txn)
        .await
        .op("remap_chat")?;

    if result.rows_affected != expected {
        // dropping txn rolls back
        return Err(Error::Database {
            op: "remap_chat",
            source: sea_orm::DbErr::Custom(format!(
                "expected to move {expected} groups, moved {}",
                result.rows_affected
            )),
        });
    }

    commit(txn, "remap_chat").await?;
    Ok(expected)
}
