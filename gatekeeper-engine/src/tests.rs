// SPDX-License-Identifier: MIT OR Apache-2.0

use std::time::Duration;

use assert_matches::assert_matches;
use gatekeeper_core::{Holder, HolderError, HolderId, Node, Timestamp, Tristate};
use gatekeeper_messenger::{MemoryHub, MessageKind};
use gatekeeper_store::test_utils::InstrumentedStorage;
use gatekeeper_store::{MemoryStorage, Storage};
use mock_instant::thread_local::MockClock;
use uuid::Uuid;

use crate::config::DEFAULT_HOUSEKEEPER_TIMEOUT;
use crate::events::Event;
use crate::test_utils::{
    EventRecorder, context, eventually, node, setup_logging, spawn_engine, test_config,
};
use crate::{EngineError, ErrorKind, TrackMove, provider};

#[tokio::test]
async fn online_users_are_never_evicted() {
    setup_logging();
    let engine = spawn_engine(MemoryStorage::new(), &MemoryHub::default(), test_config("a")).await;
    let online = Uuid::new_v4();
    let idle = Uuid::new_v4();

    engine.login(online, "online").await.unwrap();
    engine.load_user(idle, Some("idle")).await.unwrap();

    MockClock::advance(DEFAULT_HOUSEKEEPER_TIMEOUT + Duration::from_secs(1));
    engine.tick().await;
    assert!(engine.users().is_loaded(online));
    assert!(!engine.users().is_loaded(idle));

    engine.logout(online);
    engine.tick().await;
    assert!(engine.users().is_loaded(online));

    MockClock::advance(DEFAULT_HOUSEKEEPER_TIMEOUT);
    engine.tick().await;
    assert!(!engine.users().is_loaded(online));
}

#[tokio::test]
async fn expired_nodes_are_shed_within_one_tick() {
    setup_logging();
    let storage = MemoryStorage::new();
    let mut config = test_config("a");
    config.expiry_audit = false;
    let engine = spawn_engine(storage.clone(), &MemoryHub::default(), config).await;
    let recorder = EventRecorder::attach(engine.events());

    let uuid = Uuid::new_v4();
    let target = HolderId::User(uuid);
    engine.login(uuid, "vip").await.unwrap();
    let vip = Node::builder("vip")
        .expiry(Timestamp::now() - 1)
        .build()
        .unwrap();
    engine.set_node(&target, vip.clone()).unwrap();
    engine.save(&target).await.unwrap();

    // Resolving notices the expired node and queues the user for the next sweep.
    assert_eq!(
        engine.check_permission(uuid, "vip", &context(&[])),
        Tristate::Undefined
    );
    engine.tick().await;

    let cell = engine.users().get_if_loaded(uuid).unwrap();
    assert!(!cell.read().permissions().nodes().any(|node| node == &vip));
    assert_eq!(
        recorder.count(|event| matches!(
            event,
            Event::NodeRemove { node, .. } if node == &vip
        )),
        1
    );

    let stored = storage.load_user(uuid, None).await.unwrap().unwrap();
    assert!(!stored.nodes.contains(&vip));
}

#[tokio::test]
async fn duplicate_update_triggers_one_sync() {
    setup_logging();
    let engine = spawn_engine(MemoryStorage::new(), &MemoryHub::default(), test_config("a")).await;
    let recorder = EventRecorder::attach(engine.events());
    let messenger = engine.messenger().unwrap();

    let raw = "LPX|abc123|peer1|UPDATE";
    assert!(messenger.consume_incoming(raw).unwrap().is_some());
    assert!(messenger.consume_incoming(raw).unwrap().is_none());

    eventually(|| recorder.count(|event| matches!(event, Event::PostSync)) == 1).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(recorder.count(|event| matches!(event, Event::PreSync)), 1);
    assert_eq!(
        recorder.count(|event| matches!(
            event,
            Event::MessageReceive {
                kind: MessageKind::Update,
                ..
            }
        )),
        1
    );
}

#[tokio::test]
async fn cached_views_follow_mutations() {
    let engine = spawn_engine(MemoryStorage::new(), &MemoryHub::default(), test_config("a")).await;
    let uuid = Uuid::new_v4();
    engine.login(uuid, "alice").await.unwrap();
    let empty = context(&[]);

    let first = engine.user_data(uuid, &empty).unwrap();
    let second = engine.user_data(uuid, &empty).unwrap();
    assert!(std::sync::Arc::ptr_eq(&first, &second));

    engine
        .set_node(&HolderId::User(uuid), node("essentials.fly", true))
        .unwrap();
    let third = engine.user_data(uuid, &empty).unwrap();
    assert!(!std::sync::Arc::ptr_eq(&second, &third));
    assert_eq!(third.check("essentials.fly"), Tristate::True);

    // A change to an inherited group invalidates the user's view as well.
    engine
        .set_node(&HolderId::Group("default".into()), node("chat.color", true))
        .unwrap();
    let fourth = engine.user_data(uuid, &empty).unwrap();
    assert_eq!(fourth.check("chat.color"), Tristate::True);

    engine
        .batch(&HolderId::User(uuid), |holder| {
            holder.set_node(node("essentials.fly", false));
            holder.set_node(node("essentials.kick", true));
        })
        .unwrap();
    let fifth = engine.user_data(uuid, &empty).unwrap();
    assert_eq!(fifth.check("essentials.fly"), Tristate::False);
    assert_eq!(fifth.check("essentials.kick"), Tristate::True);
}

#[tokio::test]
async fn strict_insertion_reports_conflicts() {
    let mut config = test_config("a");
    config.strict_insertion = true;
    let engine = spawn_engine(MemoryStorage::new(), &MemoryHub::default(), config).await;
    let target = HolderId::Group("default".into());

    engine.set_node(&target, node("build", true)).unwrap();
    let result = engine.set_node(&target, node("build", false));
    assert_matches!(&result, Err(EngineError::Holder(HolderError::Conflict(_))));
    assert_eq!(result.unwrap_err().kind(), ErrorKind::Conflict);

    assert_matches!(
        engine.set_node(&HolderId::Track("staff".into()), node("build", true)),
        Err(EngineError::NotAPermissionHolder(_))
    );
    assert_matches!(
        engine.set_node(&HolderId::User(Uuid::new_v4()), node("build", true)),
        Err(EngineError::UserNotLoaded(_))
    );
}

#[tokio::test]
async fn promote_and_demote_along_track() {
    let engine = spawn_engine(MemoryStorage::new(), &MemoryHub::default(), test_config("a")).await;
    let recorder = EventRecorder::attach(engine.events());
    engine.create_group("mod").await.unwrap();
    engine.create_group("admin").await.unwrap();
    engine.create_track("staff").await.unwrap();
    for group in ["default", "mod", "admin"] {
        engine.track_append("staff", group).unwrap();
    }

    let uuid = Uuid::new_v4();
    engine.login(uuid, "alice").await.unwrap();
    let empty = context(&[]);

    let step = engine.promote(uuid, "staff", &empty).await.unwrap();
    assert_eq!(
        step,
        TrackMove {
            from: Some("default".into()),
            to: Some("mod".into()),
        }
    );
    let cell = engine.users().get_if_loaded(uuid).unwrap();
    assert_eq!(cell.read().primary_group(), "mod");
    assert!(!cell.read().inherits_default());

    engine.promote(uuid, "staff", &empty).await.unwrap();
    assert_matches!(
        engine.promote(uuid, "staff", &empty).await,
        Err(EngineError::EndOfTrack { .. })
    );

    // Being on two groups of the track at once is ambiguous.
    engine
        .set_node(&HolderId::User(uuid), Node::inheritance("mod").build().unwrap())
        .unwrap();
    assert_matches!(
        engine.demote(uuid, "staff", &empty).await,
        Err(EngineError::AmbiguousTrackPosition { .. })
    );
    engine
        .unset_node(&HolderId::User(uuid), &Node::inheritance("mod").build().unwrap())
        .unwrap();

    engine.demote(uuid, "staff", &empty).await.unwrap();
    engine.demote(uuid, "staff", &empty).await.unwrap();
    let step = engine.demote(uuid, "staff", &empty).await.unwrap();
    assert_eq!(
        step,
        TrackMove {
            from: Some("default".into()),
            to: None,
        }
    );
    assert_matches!(
        engine.demote(uuid, "staff", &empty).await,
        Err(EngineError::NotOnTrack { .. })
    );

    assert_eq!(
        recorder.count(|event| matches!(event, Event::UserPromote { .. })),
        2
    );
    assert_eq!(
        recorder.count(|event| matches!(event, Event::UserDemote { .. })),
        3
    );
}

#[tokio::test]
async fn tracks_with_unknown_groups_are_rejected() {
    let engine = spawn_engine(MemoryStorage::new(), &MemoryHub::default(), test_config("a")).await;
    engine.create_track("ladder").await.unwrap();
    assert_matches!(
        engine.track_append("ladder", "ghost"),
        Err(EngineError::GroupNotFound(_))
    );

    // Deleting a group leaves the reference behind.
    engine.create_group("ghost").await.unwrap();
    engine.track_append("ladder", "ghost").unwrap();
    engine.delete_group("ghost").await.unwrap();

    let result = engine.track("ladder");
    assert_matches!(
        &result,
        Err(EngineError::DanglingReference { track, group }) if track == "ladder" && group == "ghost"
    );
    assert_eq!(result.unwrap_err().kind(), ErrorKind::DanglingReference);

    let uuid = Uuid::new_v4();
    engine.login(uuid, "alice").await.unwrap();
    assert_matches!(
        engine.promote(uuid, "ladder", &context(&[])).await,
        Err(EngineError::DanglingReference { .. })
    );
}

#[tokio::test]
async fn failed_login_is_reported() {
    let storage = InstrumentedStorage::new(MemoryStorage::new());
    let engine = spawn_engine(storage.clone(), &MemoryHub::default(), test_config("a")).await;
    let recorder = EventRecorder::attach(engine.events());
    let uuid = Uuid::new_v4();

    storage.set_failing(true);
    let result = engine.login(uuid, "alice").await;
    assert_matches!(&result, Err(err) if err.kind() == ErrorKind::StorageIo);
    assert!(!engine.users().is_loaded(uuid));
    assert_eq!(
        engine.check_permission(uuid, "anything", &context(&[])),
        Tristate::Undefined
    );

    storage.set_failing(false);
    engine.login(uuid, "alice").await.unwrap();
    assert_eq!(
        recorder.events(),
        vec![
            Event::UserLoginProcess {
                uuid,
                username: "alice".into(),
                loaded: false,
            },
            Event::UserLoad { uuid },
            Event::UserLoginProcess {
                uuid,
                username: "alice".into(),
                loaded: true,
            },
        ]
    );
}

#[tokio::test]
async fn provider_hands_out_registered_engine() {
    let engine = spawn_engine(MemoryStorage::new(), &MemoryHub::default(), test_config("a")).await;

    provider::register(engine.clone());
    let provided = provider::get::<MemoryStorage, gatekeeper_messenger::MemoryTransport>().unwrap();
    assert!(provided.ptr_eq(&engine));
    assert_eq!(
        provider::get::<InstrumentedStorage, gatekeeper_messenger::MemoryTransport>().unwrap_err(),
        provider::ProviderError::TypeMismatch
    );

    assert!(provider::unregister());
    assert!(provider::get_safe::<MemoryStorage, gatekeeper_messenger::MemoryTransport>().is_none());
    assert_eq!(
        provider::get::<MemoryStorage, gatekeeper_messenger::MemoryTransport>().unwrap_err(),
        provider::ProviderError::NotRegistered
    );

    engine.shutdown().await;
    assert!(engine.is_shutdown());
    assert!(engine.messenger().unwrap().is_closed());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn group_queries_survive_concurrent_reloads() {
    let engine = spawn_engine(MemoryStorage::new(), &MemoryHub::default(), test_config("a")).await;
    engine.create_group("b").await.unwrap();
    engine.create_group("c").await.unwrap();
    let default = HolderId::Group("default".into());
    for parent in ["b", "c"] {
        engine
            .set_node(&default, Node::inheritance(parent).build().unwrap())
            .unwrap();
    }
    engine
        .set_node(&HolderId::Group("c".into()), node("build", true))
        .unwrap();
    // Edges back to the group being resolved.
    engine
        .set_node(&HolderId::Group("b".into()), Node::inheritance("default").build().unwrap())
        .unwrap();
    engine
        .set_node(&default, Node::inheritance("default").build().unwrap())
        .unwrap();
    for name in ["default", "b", "c"] {
        engine.save(&HolderId::Group(name.into())).await.unwrap();
    }

    let reader = {
        let engine = engine.clone();
        tokio::task::spawn_blocking(move || {
            for i in 0..2_000 {
                // A fresh context on every query misses the cache and walks the groups.
                let server = format!("s{i}");
                let data = engine
                    .group_data("default", &context(&[("server", server.as_str())]))
                    .unwrap();
                assert_eq!(data.check("build"), Tristate::True);
            }
        })
    };
    let reloader = {
        let engine = engine.clone();
        tokio::spawn(async move {
            for _ in 0..200 {
                engine.groups().load_all().await.unwrap();
                tokio::task::yield_now().await;
            }
        })
    };

    let finished = tokio::time::timeout(Duration::from_secs(30), async {
        reader.await.unwrap();
        reloader.await.unwrap();
    })
    .await;
    assert!(finished.is_ok(), "queries and reloads did not finish");

    engine.shutdown().await;
}
