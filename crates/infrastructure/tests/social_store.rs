use std::time::Duration;

use application::{
    ApplicationError, ChatRepository, FriendshipRepository, SettingsRepository, UserRepository,
};
use chrono::Utc;
use domain::{
    ChatRecordId, DomainError, FriendshipStatus, MarkReadMode, NewChatMessage, NewUser,
    PasswordHash, ProfileUpdate, Setting, User, UserId, UserRole,
};
use infrastructure::{
    create_sqlite_pool, run_migrations, seed_super_admin, BcryptPasswordHasher, QueryCatalog,
    SqliteChatRepository, SqliteFriendshipRepository, SqliteSettingsRepository,
    SqliteUserRepository,
};
use serde_json::json;

struct Store {
    catalog: QueryCatalog,
    users: SqliteUserRepository,
    friendships: SqliteFriendshipRepository,
    chats: SqliteChatRepository,
}

async fn setup_store() -> Store {
    let pool = create_sqlite_pool("sqlite::memory:", 1).await.expect("pool");
    run_migrations(&pool).await.expect("migrations");
    let catalog = QueryCatalog::new(pool, Duration::from_secs(5));
    Store {
        users: SqliteUserRepository::new(catalog.clone()),
        friendships: SqliteFriendshipRepository::new(catalog.clone()),
        chats: SqliteChatRepository::new(catalog.clone()),
        catalog,
    }
}

async fn create_guest(store: &Store, name: &str, ip: &str) -> User {
    store
        .users
        .create(NewUser {
            name: name.into(),
            nick_name: format!("{name}-nick"),
            password: PasswordHash::new("hashed").unwrap(),
            role: UserRole::Guest,
            ip: ip.into(),
            created_at: Utc::now(),
        })
        .await
        .expect("create guest")
}

fn text(from: &User, to: &User, body: &str, sent_at: i64) -> NewChatMessage {
    NewChatMessage {
        from_id: from.id,
        to_id: to.id,
        kind: "text".into(),
        message: body.into(),
        files: json!([]),
        sent_at,
    }
}

async fn befriend(store: &Store, a: &User, b: &User) {
    let request = store
        .friendships
        .create_request(a.id, b.id, 1)
        .await
        .expect("request");
    store
        .friendships
        .respond(request.f_id, b.id, FriendshipStatus::Accept, 2)
        .await
        .expect("accept");
}

#[tokio::test]
async fn guests_are_counted_per_ip() {
    let store = setup_store().await;
    create_guest(&store, "alpha001", "10.0.0.2").await;
    create_guest(&store, "alpha002", "10.0.0.2").await;
    create_guest(&store, "alpha003", "10.0.0.3").await;

    assert_eq!(store.users.count_guests_by_ip("10.0.0.2").await.unwrap(), 2);
    let listed = store.users.list_guests_by_ip("10.0.0.2").await.unwrap();
    assert_eq!(
        listed.iter().map(|u| u.name.as_str()).collect::<Vec<_>>(),
        vec!["alpha001", "alpha002"]
    );

    let updated = store
        .users
        .update_profile(
            listed[0].id,
            &ProfileUpdate {
                nick_name: Some("阿尔法".into()),
                avatar: None,
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.nick_name, "阿尔法");
    assert_eq!(updated.avatar, "");
}

#[tokio::test]
async fn duplicate_handle_is_a_conflict() {
    let store = setup_store().await;
    create_guest(&store, "same0001", "10.0.0.2").await;
    let err = store
        .users
        .create(NewUser {
            name: "same0001".into(),
            nick_name: "dup".into(),
            password: PasswordHash::new("hashed").unwrap(),
            role: UserRole::Guest,
            ip: "10.0.0.2".into(),
            created_at: Utc::now(),
        })
        .await
        .unwrap_err();
    assert_eq!(err, domain::RepositoryError::Conflict);
}

#[tokio::test]
async fn super_admin_is_seeded_once_and_never_discovered() {
    let store = setup_store().await;
    let hasher = BcryptPasswordHasher::new(Some(4));

    assert!(seed_super_admin(&store.catalog, &hasher).await.unwrap());
    assert!(!seed_super_admin(&store.catalog, &hasher).await.unwrap());

    let admin = store.users.find_by_id(UserId::SUPER_ADMIN).await.unwrap().unwrap();
    assert_eq!(admin.role, UserRole::SuperAdmin);
    assert_eq!(admin.name, "admin");

    let guest = create_guest(&store, "gamma001", "10.0.0.2").await;
    let peers = store.users.list_discoverable(guest.id).await.unwrap();
    assert!(peers.is_empty());
}

#[tokio::test]
async fn accepted_request_creates_symmetric_friendship() {
    let store = setup_store().await;
    let a = create_guest(&store, "userA001", "10.0.0.2").await;
    let b = create_guest(&store, "userB001", "10.0.0.3").await;

    let discovered = store.users.list_discoverable(a.id).await.unwrap();
    assert_eq!(discovered.len(), 1);

    let request = store.friendships.create_request(a.id, b.id, 100).await.unwrap();
    assert_eq!(request.status, FriendshipStatus::Pending);
    assert_eq!(request.from_name, "userA001");
    assert_eq!(request.to_nick_name, "userB001-nick");

    // pending 期间双方都不再出现在对方的发现列表里
    assert!(store.users.list_discoverable(a.id).await.unwrap().is_empty());
    assert!(store.users.list_discoverable(b.id).await.unwrap().is_empty());

    let inbox = store.friendships.pending_requests_for(b.id).await.unwrap();
    assert_eq!(inbox.len(), 1);
    assert!(store.friendships.pending_requests_for(a.id).await.unwrap().is_empty());

    let accepted = store
        .friendships
        .respond(request.f_id, b.id, FriendshipStatus::Accept, 200)
        .await
        .unwrap();
    assert_eq!(accepted.status, FriendshipStatus::Accept);
    assert_eq!(accepted.user_id, a.id);

    let forward = store.friendships.find_between(a.id, b.id).await.unwrap();
    let backward = store.friendships.find_between(b.id, a.id).await.unwrap();
    assert_eq!(forward.len(), 1);
    assert_eq!(backward.len(), 1);
    assert_eq!(backward[0].status, FriendshipStatus::Accept);

    let a_friends = store.friendships.list_friends(a.id).await.unwrap();
    let b_friends = store.friendships.list_friends(b.id).await.unwrap();
    assert_eq!(a_friends[0].friend_id, b.id);
    assert_eq!(b_friends[0].friend_id, a.id);
    assert!(store.friendships.pending_requests_for(b.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn second_decision_on_the_same_request_is_refused() {
    let store = setup_store().await;
    let a = create_guest(&store, "userA002", "10.0.0.2").await;
    let b = create_guest(&store, "userB002", "10.0.0.3").await;
    let request = store.friendships.create_request(a.id, b.id, 100).await.unwrap();

    store
        .friendships
        .respond(request.f_id, b.id, FriendshipStatus::Accept, 200)
        .await
        .unwrap();

    let again = store
        .friendships
        .respond(request.f_id, b.id, FriendshipStatus::Accept, 300)
        .await;
    assert!(matches!(
        again,
        Err(ApplicationError::Domain(DomainError::FriendRequestNotFound))
    ));
    assert_eq!(store.friendships.find_between(b.id, a.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn only_the_target_may_decide() {
    let store = setup_store().await;
    let a = create_guest(&store, "userA003", "10.0.0.2").await;
    let b = create_guest(&store, "userB003", "10.0.0.3").await;
    let request = store.friendships.create_request(a.id, b.id, 100).await.unwrap();

    let by_requester = store
        .friendships
        .respond(request.f_id, a.id, FriendshipStatus::Accept, 200)
        .await;
    assert!(matches!(
        by_requester,
        Err(ApplicationError::Domain(DomainError::FriendRequestNotFound))
    ));
    assert!(store.friendships.find_between(b.id, a.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn rejected_pair_can_discover_each_other_again() {
    let store = setup_store().await;
    let a = create_guest(&store, "userA004", "10.0.0.2").await;
    let b = create_guest(&store, "userB004", "10.0.0.3").await;
    let request = store.friendships.create_request(a.id, b.id, 100).await.unwrap();

    let rejected = store
        .friendships
        .respond(request.f_id, b.id, FriendshipStatus::Reject, 200)
        .await
        .unwrap();
    assert_eq!(rejected.status, FriendshipStatus::Reject);
    assert!(store.friendships.find_between(b.id, a.id).await.unwrap().is_empty());
    assert_eq!(store.users.list_discoverable(a.id).await.unwrap().len(), 1);
    assert!(store.friendships.list_friends(a.id).await.unwrap().is_empty());

    // 被拒绝后可以再次申请，旧行保持原样
    let before = store.friendships.find_between(a.id, b.id).await.unwrap();
    assert_eq!(before.len(), 1);
    let retry = store.friendships.create_request(a.id, b.id, 300).await.unwrap();
    assert_ne!(retry.f_id, request.f_id);

    let rows = store.friendships.find_between(a.id, b.id).await.unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0], before[0]);
    assert_eq!(rows[0].status, FriendshipStatus::Reject);
    assert_eq!(rows[0].create_time, 100);
    assert_eq!(rows[1].status, FriendshipStatus::Pending);
    assert_eq!(rows[1].create_time, 300);

    let pending = store.friendships.pending_requests_for(b.id).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].f_id, retry.f_id);
}

#[tokio::test]
async fn duplicate_request_in_one_direction_is_a_conflict() {
    let store = setup_store().await;
    let a = create_guest(&store, "userA010", "10.0.0.2").await;
    let b = create_guest(&store, "userB010", "10.0.0.3").await;
    let request = store.friendships.create_request(a.id, b.id, 100).await.unwrap();

    let again = store.friendships.create_request(a.id, b.id, 101).await;
    assert!(matches!(
        again,
        Err(ApplicationError::Domain(DomainError::FriendshipExists { .. }))
    ));
    assert_eq!(store.friendships.find_between(a.id, b.id).await.unwrap().len(), 1);

    store
        .friendships
        .respond(request.f_id, b.id, FriendshipStatus::Accept, 200)
        .await
        .unwrap();
    let after_accept = store.friendships.create_request(b.id, a.id, 400).await;
    assert!(matches!(
        after_accept,
        Err(ApplicationError::Domain(DomainError::FriendshipExists { .. }))
    ));
}

#[tokio::test]
async fn crossing_requests_collapse_into_one_row_per_direction() {
    let store = setup_store().await;
    let a = create_guest(&store, "userA005", "10.0.0.2").await;
    let b = create_guest(&store, "userB005", "10.0.0.3").await;
    let from_a = store.friendships.create_request(a.id, b.id, 100).await.unwrap();
    store.friendships.create_request(b.id, a.id, 101).await.unwrap();

    store
        .friendships
        .respond(from_a.f_id, b.id, FriendshipStatus::Accept, 200)
        .await
        .unwrap();

    let backward = store.friendships.find_between(b.id, a.id).await.unwrap();
    assert_eq!(backward.len(), 1);
    assert_eq!(backward[0].status, FriendshipStatus::Accept);
    assert!(store.friendships.pending_requests_for(a.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn chatting_requires_an_accepted_friendship() {
    let store = setup_store().await;
    let a = create_guest(&store, "userA006", "10.0.0.2").await;
    let b = create_guest(&store, "userB006", "10.0.0.3").await;
    store.friendships.create_request(a.id, b.id, 100).await.unwrap();

    let refused = store.chats.send(text(&a, &b, "hello", 1_000)).await;
    assert!(matches!(
        refused,
        Err(ApplicationError::Domain(DomainError::NotFriends { .. }))
    ));
    assert!(store.chats.history(a.id, b.id, 0).await.unwrap().is_empty());
}

#[tokio::test]
async fn sent_message_updates_both_friend_rows_and_unread_count() {
    let store = setup_store().await;
    let a = create_guest(&store, "userA007", "10.0.0.2").await;
    let b = create_guest(&store, "userB007", "10.0.0.3").await;
    befriend(&store, &a, &b).await;

    let record = store
        .chats
        .send(NewChatMessage {
            files: json!([{ "fileCode": "f-1", "fileName": "a.txt" }]),
            ..text(&a, &b, "你好", 5_000)
        })
        .await
        .unwrap();
    assert_eq!(record.is_read, "n");
    assert_eq!(record.from_name, "userA007");
    assert_eq!(record.to_name, "userB007");
    assert_eq!(record.files[0]["fileCode"], "f-1");
    assert_eq!(record.time, 5_000);

    let a_view = store.friendships.list_friends(a.id).await.unwrap();
    let b_view = store.friendships.list_friends(b.id).await.unwrap();
    assert_eq!(a_view[0].last_chat_id, Some(record.c_id));
    assert_eq!(b_view[0].last_chat_id, Some(record.c_id));
    assert_eq!(b_view[0].last_msg.as_deref(), Some("你好"));
    assert_eq!(b_view[0].unread_count, 1);
    assert_eq!(a_view[0].unread_count, 0);

    // 发送者不能替接收者标记已读
    let by_sender = store
        .chats
        .mark_read(a.id, MarkReadMode::One(record.c_id))
        .await
        .unwrap();
    assert_eq!(by_sender, 0);

    let by_reader = store
        .chats
        .mark_read(b.id, MarkReadMode::AllFrom(a.id))
        .await
        .unwrap();
    assert_eq!(by_reader, 1);
    let b_view = store.friendships.list_friends(b.id).await.unwrap();
    assert_eq!(b_view[0].unread_count, 0);

    let missing = store
        .chats
        .mark_read(b.id, MarkReadMode::One(ChatRecordId(987_654)))
        .await
        .unwrap();
    assert_eq!(missing, 0);
}

#[tokio::test]
async fn history_is_the_union_of_latest_window_and_recent_period() {
    let store = setup_store().await;
    let a = create_guest(&store, "userA008", "10.0.0.2").await;
    let b = create_guest(&store, "userB008", "10.0.0.3").await;
    befriend(&store, &a, &b).await;

    // 502 条旧消息：只有最近 500 条会被返回
    for i in 1..=502 {
        let (from, to) = if i % 2 == 0 { (&a, &b) } else { (&b, &a) };
        store
            .chats
            .send(text(from, to, &format!("m{i}"), i))
            .await
            .unwrap();
    }

    let history = store.chats.history(a.id, b.id, 1_000_000).await.unwrap();
    assert_eq!(history.len(), 500);
    assert_eq!(history.first().unwrap().message, "m3");
    assert_eq!(history.last().unwrap().message, "m502");
    assert!(history.windows(2).all(|w| w[0].time <= w[1].time));

    // 时间窗口覆盖全部消息时，超过 500 条也全部返回
    let everything = store.chats.history(b.id, a.id, 0).await.unwrap();
    assert_eq!(everything.len(), 502);
}

#[tokio::test]
async fn deleting_a_user_removes_their_conversations() {
    let store = setup_store().await;
    let a = create_guest(&store, "userA009", "10.0.0.2").await;
    let b = create_guest(&store, "userB009", "10.0.0.3").await;
    befriend(&store, &a, &b).await;
    store.chats.send(text(&a, &b, "bye", 10)).await.unwrap();

    let removed = store.users.delete_cascade(a.id).await.unwrap();
    assert_eq!(removed, 4, "1 条消息 + 2 行好友关系 + 1 个用户");
    assert!(store.users.find_by_id(a.id).await.unwrap().is_none());
    assert!(store.friendships.list_friends(b.id).await.unwrap().is_empty());

    assert_eq!(store.users.delete_cascade(a.id).await.unwrap(), 0);
}

#[tokio::test]
async fn default_settings_are_inserted_once() {
    let store = setup_store().await;
    let settings = SqliteSettingsRepository::new(store.catalog.clone());
    assert!(settings.load().await.unwrap().is_none());

    let now = Utc::now();
    let stored = settings
        .insert_default(&Setting::defaults("/srv/shared", now))
        .await
        .unwrap();
    assert_eq!(stored.port, 4321);

    let again = settings
        .insert_default(&Setting::defaults("/elsewhere", now))
        .await
        .unwrap();
    assert_eq!(again.shared_dir, "/srv/shared");

    let mut changed = again.clone();
    changed.app_name = "Office Drop".into();
    let saved = settings.save(&changed).await.unwrap();
    assert_eq!(saved.app_name, "Office Drop");
    assert_eq!(settings.load().await.unwrap().unwrap().app_name, "Office Drop");
}
