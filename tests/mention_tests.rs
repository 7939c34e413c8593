use rust_mention_bot::{
    db::Database,
    engine::Engine,
    entity::user,
    mention::{extract_candidate_names, MentionOutcome},
};

const CHAT: i64 = 42;

fn alice() -> user::Model {
    user::Model {
        id: 1,
        handle: Some("alice".to_owned()),
        first_name: "Alice".to_owned(),
        last_name: None,
    }
}

fn bob() -> user::Model {
    user::Model {
        id: 555,
        handle: None,
        first_name: "Bob".to_owned(),
        last_name: Some("X".to_owned()),
    }
}

/// Chat 42 with a `team` group holding alice and Bob.
async fn team_chat() -> Engine {
    let engine = Engine::new(Database::open_in_memory().await.unwrap());
    engine.create("team", CHAT).await;
    engine.join("team", CHAT, alice()).await;
    engine.join("team", CHAT, bob()).await;
    engine
}

fn formatted(outcome: MentionOutcome) -> String {
    match outcome {
        MentionOutcome::Formatted(text) => text,
        other => panic!("expected formatted mentions, got {other:?}"),
    }
}

#[tokio::test]
async fn mentions_handles_and_links_users_without_one() {
    let engine = team_chat().await;

    let text = formatted(engine.mention_group("team", CHAT).await);
    assert!(text.starts_with("Mentioning team group members:\n@alice, "));
    assert!(text.contains("[Bob X]"));
    assert!(text.contains("tg://user?id=555"));
}

#[tokio::test]
async fn empty_and_missing_groups_are_distinguished() {
    let engine = team_chat().await;
    engine.create("empty", CHAT).await;

    assert_eq!(engine.mention_group("empty", CHAT).await, MentionOutcome::NoMembers);
    assert_eq!(engine.mention_group("nobody", CHAT).await, MentionOutcome::NoGroupsFound);
    assert_eq!(engine.mention_group("team", CHAT + 1).await, MentionOutcome::NoGroupsFound);
}

#[tokio::test]
async fn free_text_mentions_every_resolvable_group() {
    let engine = team_chat().await;
    engine.create("ops", CHAT).await;
    engine
        .join(
            "ops",
            CHAT,
            user::Model {
                id: 7,
                handle: Some("carol".to_owned()),
                first_name: "Carol".to_owned(),
                last_name: None,
            },
        )
        .await;

    let names = extract_candidate_names("deploy done @ops, thanks @team. cc @ghosts");
    let text = formatted(engine.mention(CHAT, &names).await);

    let blocks: Vec<&str> = text.split("\n\n").collect();
    assert_eq!(blocks.len(), 2);
    assert!(blocks[0].starts_with("Mentioning team group members:\n"));
    assert_eq!(blocks[1], "Mentioning ops group members:\n@carol");
}

#[tokio::test]
async fn free_text_is_case_insensitive() {
    let engine = team_chat().await;

    let names = extract_candidate_names("@TEAM standup");
    assert!(matches!(
        engine.mention(CHAT, &names).await,
        MentionOutcome::Formatted(_)
    ));
}

#[tokio::test]
async fn empty_groups_are_left_out_of_free_text_mentions() {
    let engine = team_chat().await;
    engine.create("empty", CHAT).await;

    let names = extract_candidate_names("@empty @team");
    let text = formatted(engine.mention(CHAT, &names).await);
    assert!(!text.contains("empty"));

    let names = extract_candidate_names("just @empty");
    assert_eq!(engine.mention(CHAT, &names).await, MentionOutcome::NoMembers);
}

#[tokio::test]
async fn text_without_group_names_mentions_nobody() {
    let engine = team_chat().await;

    let names = extract_candidate_names("mail me@example.com");
    assert!(names.is_empty());
    assert_eq!(engine.mention(CHAT, &names).await, MentionOutcome::NoGroupsFound);
}

#[tokio::test]
async fn profile_changes_show_up_in_mentions() {
    let engine = team_chat().await;
    engine
        .observe_user(user::Model {
            handle: Some("bobx".to_owned()),
            ..bob()
        })
        .await
        .unwrap();

    let text = formatted(engine.mention_group("team", CHAT).await);
    assert!(text.ends_with("@alice, @bobx"));
}

#[tokio::test]
async fn reserved_characters_in_names_are_escaped() {
    let engine = Engine::new(Database::open_in_memory().await.unwrap());
    engine.create("dev-ops", CHAT).await;
    engine
        .join(
            "dev-ops",
            CHAT,
            user::Model {
                id: 9,
                handle: None,
                first_name: "J.R.".to_owned(),
                last_name: Some("Smith-Jones (ops)".to_owned()),
            },
        )
        .await;

    let text = formatted(engine.mention_group("dev-ops", CHAT).await);
    assert!(text.starts_with("Mentioning dev\\-ops group members:\n"));
    assert!(text.contains(r"[J\.R\. Smith\-Jones \(ops\)]"));
    assert!(text.contains("tg://user?id=9"));
}
