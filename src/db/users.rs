//! Identity store: users as last seen by the bot.

use sea_orm::{sea_query::OnConflict, ConnectionTrait, EntityTrait, Set};

use super::{Error, OpContext};
use crate::entity::user;

/// Inserts the user or overwrites the display fields of an existing row.
pub async fn upsert_user<C: ConnectionTrait>(
    conn: &C,
    user: user::Model,
) -> Result<user::Model, Error> {
    let row = user::ActiveModel {
        id: Set(user.id),
        handle: Set(user.handle.clone()),
        first_name: Set(user.first_name.clone()),
        last_name: Set(user.last_name.clone()),
    };

    user::Entity::insert(row)
        .on_conflict(
            OnConflict::column(user::Column::Id)
                .update_columns([
                    user::Column::Handle,
                    user::Column::FirstName,
                    user::Column::LastName,
                ])
                .to_owned(),
        )
        .exec_without_returning(conn)
        .await
        .op("upsert_user")?;

    Ok(user)
}

pub async fn get_user<C: ConnectionTrait>(conn: &C, user_id: i64) -> Result<user::Model, Error> {
    user::Entity::find_by_id(user_id)
        .one(conn)
        .await
        .op("get_user")?
        .ok_or(Error::NotFound("get_user"))
}
