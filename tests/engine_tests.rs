use rust_mention_bot::{
    db::{groups, users, Database},
    engine::*,
    entity::user,
    mention::{extract_candidate_names, MentionOutcome},
};

async fn engine() -> Engine {
    let db = Database::open_in_memory()
        .await
        .expect("in-memory database");
    Engine::new(db)
}

fn member(id: i64, handle: Option<&str>, first_name: &str) -> user::Model {
    user::Model {
        id,
        handle: handle.map(str::to_owned),
        first_name: first_name.to_owned(),
        last_name: None,
    }
}

fn alice() -> user::Model {
    member(1, Some("alice"), "Alice")
}

fn names(groups: &[rust_mention_bot::entity::mention_group::Model]) -> Vec<&str> {
    groups.iter().map(|g| g.name.as_str()).collect()
}

async fn group_id(engine: &Engine, name: &str, chat_id: i64) -> i64 {
    groups::get_group(engine.db().conn(), name, chat_id)
        .await
        .unwrap()
        .id
}

#[tokio::test]
async fn group_names_are_unique_per_chat() {
    let engine = engine().await;

    assert!(matches!(engine.create("team", 1).await, CreateOutcome::Created(_)));
    assert_eq!(engine.create("team", 1).await, CreateOutcome::AlreadyExists);
    assert_eq!(engine.create("Team", 1).await, CreateOutcome::AlreadyExists);
    assert!(matches!(engine.create("team", 2).await, CreateOutcome::Created(_)));
}

#[tokio::test]
async fn invalid_names_are_rejected() {
    let engine = engine().await;

    assert_eq!(engine.create("", 1).await, CreateOutcome::InvalidName);
    assert_eq!(engine.create("big_team", 1).await, CreateOutcome::InvalidName);
    assert_eq!(engine.create("a b", 1).await, CreateOutcome::InvalidName);
    assert!(engine.list_groups(1).await.unwrap().is_empty());
}

#[tokio::test]
async fn created_groups_can_be_mentioned_by_name() {
    let engine = engine().await;

    for name in ["ops", "on-call-2", "Qa"] {
        let CreateOutcome::Created(group) = engine.create(name, 7).await else {
            panic!("{name} was not created");
        };
        let found = extract_candidate_names(&format!("hey @{}, look", group.name));
        assert!(found.contains(&group.name), "{} not extracted", group.name);
    }
}

#[tokio::test]
async fn join_and_leave_are_idempotent() {
    let engine = engine().await;
    engine.create("team", 10).await;
    let team = group_id(&engine, "team", 10).await;
    let conn = engine.db().conn();

    assert!(matches!(engine.join("team", 10, alice()).await, JoinOutcome::Joined(_)));
    assert_eq!(engine.join("team", 10, alice()).await, JoinOutcome::AlreadyMember);
    assert_eq!(groups::count_members(conn, team).await.unwrap(), 1);

    assert!(matches!(engine.leave("team", 10, 1).await, LeaveOutcome::Left(_)));
    assert_eq!(engine.leave("team", 10, 1).await, LeaveOutcome::NotAMember);
    assert_eq!(groups::count_members(conn, team).await.unwrap(), 0);
}

#[tokio::test]
async fn unknown_groups_are_reported() {
    let engine = engine().await;
    engine.create("team", 10).await;

    assert_eq!(engine.join("nope", 10, alice()).await, JoinOutcome::GroupNotFound);
    assert_eq!(engine.leave("nope", 10, 1).await, LeaveOutcome::GroupNotFound);
    assert_eq!(engine.delete("nope", 10).await, DeleteOutcome::GroupNotFound);
    assert_eq!(engine.list_members("nope", 10).await, MembersOutcome::GroupNotFound);
    // same name, other chat
    assert_eq!(engine.join("team", 11, alice()).await, JoinOutcome::GroupNotFound);
}

#[tokio::test]
async fn interleaved_joins_create_one_membership() {
    let engine = engine().await;
    engine.create("team", 10).await;

    let (first, second) = tokio::join!(
        engine.join("team", 10, alice()),
        engine.join("team", 10, alice())
    );
    let joined = [&first, &second]
        .iter()
        .filter(|outcome| matches!(outcome, JoinOutcome::Joined(_)))
        .count();
    assert_eq!(joined, 1);
    assert!(first == JoinOutcome::AlreadyMember || second == JoinOutcome::AlreadyMember);

    let team = group_id(&engine, "team", 10).await;
    assert_eq!(groups::count_members(engine.db().conn(), team).await.unwrap(), 1);
}

#[tokio::test]
async fn joining_records_the_profile() {
    let engine = engine().await;
    engine.create("team", 10).await;
    engine.join("team", 10, alice()).await;

    let stored = users::get_user(engine.db().conn(), 1).await.unwrap();
    assert_eq!(stored, alice());
}

#[tokio::test]
async fn only_empty_groups_can_be_deleted() {
    let engine = engine().await;
    engine.create("team", 10).await;
    engine.join("team", 10, alice()).await;
    engine.join("team", 10, member(2, None, "Bob")).await;

    assert_eq!(engine.delete("team", 10).await, DeleteOutcome::HasMembers(2));
    assert!(groups::get_group(engine.db().conn(), "team", 10).await.is_ok());

    engine.leave("team", 10, 1).await;
    engine.leave("team", 10, 2).await;
    assert_eq!(engine.delete("team", 10).await, DeleteOutcome::Deleted);

    let err = groups::get_group(engine.db().conn(), "team", 10)
        .await
        .unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(engine.delete("team", 10).await, DeleteOutcome::GroupNotFound);
}

#[tokio::test]
async fn listings_follow_membership() {
    let engine = engine().await;
    for name in ["a", "b", "c"] {
        engine.create(name, 10).await;
    }
    engine.create("a", 20).await;
    engine.join("a", 10, alice()).await;
    engine.join("a", 20, alice()).await;

    assert_eq!(names(&engine.list_groups(10).await.unwrap()), ["a", "b", "c"]);
    assert_eq!(names(&engine.list_user_groups(10, 1).await.unwrap()), ["a"]);
    assert_eq!(names(&engine.list_leavable(10, 1).await.unwrap()), ["a"]);
    assert_eq!(names(&engine.list_joinable(10, 1).await.unwrap()), ["b", "c"]);
    assert_eq!(names(&engine.list_joinable(10, 2).await.unwrap()), ["a", "b", "c"]);
    assert!(engine.list_user_groups(30, 1).await.unwrap().is_empty());
}

#[tokio::test]
async fn members_are_listed_in_join_order() {
    let engine = engine().await;
    engine.create("team", 10).await;
    engine.join("team", 10, member(5, None, "Eve")).await;
    engine.join("team", 10, alice()).await;

    let MembersOutcome::Members(group, members) = engine.list_members("team", 10).await else {
        panic!("team not found");
    };
    assert_eq!(group.name, "team");
    assert_eq!(members.iter().map(|m| m.id).collect::<Vec<_>>(), [5, 1]);
}

#[tokio::test]
async fn migration_moves_every_group() {
    let engine = engine().await;
    engine.create("a", 100).await;
    engine.create("b", 100).await;
    engine.create("a", 200).await;
    engine.join("a", 100, alice()).await;

    assert_eq!(engine.on_chat_migration(100, 9000).await, MigrationOutcome::Migrated(2));

    assert!(engine.list_groups(100).await.unwrap().is_empty());
    assert_eq!(names(&engine.list_groups(9000).await.unwrap()), ["a", "b"]);
    assert_eq!(names(&engine.list_groups(200).await.unwrap()), ["a"]);
    assert!(matches!(
        engine.mention_group("a", 9000).await,
        MentionOutcome::Formatted(_)
    ));
}

#[tokio::test]
async fn failed_migration_moves_nothing() {
    let engine = engine().await;
    engine.create("a", 100).await;
    engine.create("b", 100).await;
    // "b" already exists under the target id, so the move must abort as a whole
    engine.create("b", 9000).await;

    assert_eq!(engine.on_chat_migration(100, 9000).await, MigrationOutcome::Failed);

    assert_eq!(names(&engine.list_groups(100).await.unwrap()), ["a", "b"]);
    assert_eq!(names(&engine.list_groups(9000).await.unwrap()), ["b"]);
}

#[tokio::test]
async fn migrating_a_chat_without_groups() {
    let engine = engine().await;
    assert_eq!(engine.on_chat_migration(100, 9000).await, MigrationOutcome::Migrated(0));
}

#[tokio::test]
async fn users_are_enrolled_into_the_all_group() {
    let engine = engine().await;
    engine.observe_user(alice()).await.unwrap();

    assert_eq!(engine.enroll_in_all_group(10, 1).await, Ok(false));

    engine.create(ALL_GROUP, 10).await;
    assert_eq!(engine.enroll_in_all_group(10, 1).await, Ok(true));
    assert_eq!(engine.enroll_in_all_group(10, 1).await, Ok(false));
    assert_eq!(names(&engine.list_user_groups(10, 1).await.unwrap()), [ALL_GROUP]);
}

#[tokio::test]
async fn observing_a_user_overwrites_the_profile() {
    let engine = engine().await;
    engine.observe_user(alice()).await.unwrap();

    let renamed = user::Model {
        id: 1,
        handle: None,
        first_name: "Alicia".to_owned(),
        last_name: Some("Wong".to_owned()),
    };
    engine.observe_user(renamed.clone()).await.unwrap();

    let stored = users::get_user(engine.db().conn(), 1).await.unwrap();
    assert_eq!(stored, renamed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_joins_on_a_shared_pool_create_one_membership() {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::new(&dir.path().join("race.sqlite")).await.unwrap();
    db.apply_migrations().await.unwrap();
    let engine = Engine::new(db);

    for round in 0..10 {
        let name = format!("team-{round}");
        assert!(matches!(engine.create(&name, 10).await, CreateOutcome::Created(_)));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let engine = engine.clone();
                let name = name.clone();
                tokio::spawn(async move { engine.join(&name, 10, alice()).await })
            })
            .collect();

        let (mut joined, mut already) = (0, 0);
        for handle in handles {
            match handle.await.unwrap() {
                JoinOutcome::Joined(_) => joined += 1,
                JoinOutcome::AlreadyMember => already += 1,
                other => panic!("round {round}: unexpected {other:?}"),
            }
        }
        assert_eq!((joined, already), (1, 7), "round {round}");

        let team = group_id(&engine, &name, 10).await;
        assert_eq!(groups::count_members(engine.db().conn(), team).await.unwrap(), 1);
    }
}
