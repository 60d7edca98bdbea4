// SPDX-License-Identifier: MIT OR Apache-2.0

use gatekeeper_core::{Holder, HolderId, Node, Timestamp, Tristate};
use gatekeeper_engine::test_utils::{
    EventRecorder, MemoryEngine, context, eventually, node, setup_logging, spawn_engine,
    test_config,
};
use gatekeeper_engine::{Event, Exporter, Importer};
use gatekeeper_messenger::MemoryHub;
use gatekeeper_store::{LogEntry, LogTarget, MemoryStorage, Storage};
use uuid::Uuid;

const ALICE: Uuid = Uuid::from_u128(1);
const BOB: Uuid = Uuid::from_u128(2);

async fn engine() -> MemoryEngine<MemoryStorage> {
    setup_logging();
    spawn_engine(MemoryStorage::new(), &MemoryHub::default(), test_config("test")).await
}

fn group(name: &str) -> HolderId {
    HolderId::Group(name.to_string())
}

#[tokio::test]
async fn inherited_permissions() {
    let engine = engine().await;
    engine.create_group("admin").await.unwrap();
    engine
        .set_node(&group("admin"), node("essentials.fly", true))
        .unwrap();
    engine
        .set_node(&group("admin"), Node::inheritance("default").build().unwrap())
        .unwrap();
    engine
        .set_node(&group("default"), node("chat.color", true))
        .unwrap();

    let uuid = Uuid::new_v4();
    engine.login(uuid, "u").await.unwrap();
    engine
        .set_node(&HolderId::User(uuid), Node::inheritance("admin").build().unwrap())
        .unwrap();

    let empty = context(&[]);
    assert_eq!(engine.check_permission(uuid, "essentials.fly", &empty), Tristate::True);
    assert_eq!(engine.check_permission(uuid, "chat.color", &empty), Tristate::True);
    assert_eq!(engine.check_permission(uuid, "op", &empty), Tristate::Undefined);
}

#[tokio::test]
async fn explicit_deny_beats_wildcard() {
    let engine = engine().await;
    engine.create_group("mod").await.unwrap();
    engine
        .set_node(&group("mod"), node("essentials.*", true))
        .unwrap();
    engine
        .set_node(&group("mod"), node("essentials.ban", false))
        .unwrap();

    let empty = context(&[]);
    let data = engine.group_data("mod", &empty).unwrap();
    assert_eq!(data.check("essentials.ban"), Tristate::False);
    assert_eq!(data.check("essentials.kick"), Tristate::True);

    let uuid = Uuid::new_v4();
    engine.login(uuid, "u").await.unwrap();
    engine
        .set_node(&HolderId::User(uuid), Node::inheritance("mod").build().unwrap())
        .unwrap();
    assert_eq!(engine.check_permission(uuid, "essentials.ban", &empty), Tristate::False);
    assert_eq!(engine.check_permission(uuid, "essentials.kick", &empty), Tristate::True);
}

#[tokio::test]
async fn specific_context_outranks_global() {
    let engine = engine().await;
    let uuid = Uuid::new_v4();
    let target = HolderId::User(uuid);
    engine.login(uuid, "u").await.unwrap();

    let hub = context(&[("server", "hub")]);
    engine
        .set_node(
            &target,
            Node::builder("member").context(hub.clone()).build().unwrap(),
        )
        .unwrap();
    engine.set_node(&target, node("member", false)).unwrap();

    assert_eq!(engine.check_permission(uuid, "member", &hub), Tristate::True);
    assert_eq!(
        engine.check_permission(uuid, "member", &context(&[("server", "pvp")])),
        Tristate::False
    );

    // Adding qualifiers to the query never loses a match.
    let wider = context(&[("server", "hub"), ("world", "nether")]);
    assert_eq!(engine.check_permission(uuid, "member", &wider), Tristate::True);
}

async fn populate(engine: &MemoryEngine<MemoryStorage>) {
    engine.create_group("mod").await.unwrap();
    engine.create_group("admin").await.unwrap();

    engine
        .set_node(&group("admin"), node("essentials.fly", true))
        .unwrap();
    engine
        .set_node(&group("admin"), node("weight.20", true))
        .unwrap();
    engine
        .set_node(&group("admin"), Node::inheritance("mod").build().unwrap())
        .unwrap();
    engine
        .set_node(&group("default"), node("chat.color", true))
        .unwrap();
    engine
        .set_node(&group("mod"), node("essentials.kick", true))
        .unwrap();
    engine
        .set_node(&group("mod"), Node::inheritance("default").build().unwrap())
        .unwrap();
    engine
        .set_node(&group("mod"), Node::prefix(50, "[Staff Mod]").build().unwrap())
        .unwrap();
    for name in ["admin", "default", "mod"] {
        engine.save(&group(name)).await.unwrap();
    }

    engine.create_track("staff").await.unwrap();
    for name in ["default", "mod", "admin"] {
        engine.track_append("staff", name).unwrap();
    }
    engine.save(&HolderId::Track("staff".into())).await.unwrap();

    engine.login(ALICE, "alice").await.unwrap();
    engine
        .set_node(&HolderId::User(ALICE), Node::inheritance("mod").build().unwrap())
        .unwrap();
    engine.set_primary_group(ALICE, "mod").unwrap();
    engine.save(&HolderId::User(ALICE)).await.unwrap();

    engine.login(BOB, "bob").await.unwrap();
    engine
        .set_node(
            &HolderId::User(BOB),
            Node::builder("fly")
                .expiry(Timestamp::new(4102444800))
                .context(context(&[("server", "hub")]))
                .build()
                .unwrap(),
        )
        .unwrap();
    engine.save(&HolderId::User(BOB)).await.unwrap();
}

#[tokio::test]
async fn canonical_export() {
    let engine = engine().await;
    populate(&engine).await;

    let mut output = Vec::new();
    let summary = Exporter::new(&engine).export(&mut output).await.unwrap();
    assert_eq!(summary.groups, 3);
    assert_eq!(summary.tracks, 1);
    assert_eq!(summary.users, 2);
    assert_eq!(summary.shards, 1);
    assert_eq!(summary.skipped_lines, 0);

    let output = String::from_utf8(output).unwrap();
    assert!(output.ends_with('\n'));
    let lines: Vec<&str> = output.lines().collect();
    let generated_at = lines[1]
        .strip_prefix("# Generated by test at ")
        .and_then(|rest| rest.strip_suffix(" UTC"))
        .unwrap();
    assert!(chrono::NaiveDateTime::parse_from_str(generated_at, "%Y-%m-%d %H:%M:%S").is_ok());

    let expected = [
        "# LuckPerms Export File",
        "",
        "# Create groups",
        "/luckperms creategroup admin",
        "/luckperms creategroup default",
        "/luckperms creategroup mod",
        "",
        "# Export group: admin",
        "/luckperms group admin permission set essentials.fly true",
        "/luckperms group admin permission set weight.20 true",
        "/luckperms group admin parent add mod",
        "",
        "# Export group: default",
        "/luckperms group default permission set chat.color true",
        "",
        "# Export group: mod",
        "/luckperms group mod permission set essentials.kick true",
        "/luckperms group mod parent add default",
        "/luckperms group mod meta addprefix 50 \"[Staff Mod]\"",
        "",
        "",
        "",
        "# Create tracks",
        "/luckperms createtrack staff",
        "",
        "# Export track: staff",
        "/luckperms track staff append default",
        "/luckperms track staff append mod",
        "/luckperms track staff append admin",
        "",
        "",
        "",
        "# Export users",
        "# Export user: 00000000-0000-0000-0000-000000000001 - alice",
        "/luckperms user 00000000-0000-0000-0000-000000000001 parent add mod",
        "/luckperms user 00000000-0000-0000-0000-000000000001 switchprimarygroup mod",
        "# Export user: 00000000-0000-0000-0000-000000000002 - bob",
        "/luckperms user 00000000-0000-0000-0000-000000000002 permission settemp fly true 4102444800 server=hub",
    ];
    let without_date: Vec<&str> = lines
        .iter()
        .enumerate()
        .filter(|(index, _)| *index != 1)
        .map(|(_, line)| *line)
        .collect();
    assert_eq!(without_date, expected);
}

#[tokio::test]
async fn export_replays_into_equal_state() {
    let original = engine().await;
    populate(&original).await;

    let mut output = Vec::new();
    Exporter::new(&original).export(&mut output).await.unwrap();

    let storage = MemoryStorage::new();
    let replica = spawn_engine(storage.clone(), &MemoryHub::default(), test_config("replica")).await;
    let summary = Importer::new(&replica).import(&output[..]).await.unwrap();
    assert!(summary.failed.is_empty(), "{:?}", summary.failed);
    assert_eq!(summary.executed, 17);

    assert_eq!(original.groups().names(), replica.groups().names());
    for name in original.groups().names() {
        let expected = original.groups().get(&name).unwrap();
        let actual = replica.groups().get(&name).unwrap();
        let expected: Vec<Node> = expected.read().permissions().nodes().cloned().collect();
        let actual: Vec<Node> = actual.read().permissions().nodes().cloned().collect();
        assert_eq!(expected, actual, "group {name}");
    }
    assert_eq!(
        original.track("staff").unwrap(),
        replica.track("staff").unwrap()
    );

    for uuid in [ALICE, BOB] {
        let expected = original.storage().load_user(uuid, None).await.unwrap();
        let actual = storage.load_user(uuid, None).await.unwrap();
        assert!(actual.is_some());
        assert_eq!(expected, actual);
    }
    assert_eq!(
        storage.load_track("staff").await.unwrap().unwrap().groups,
        vec!["default", "mod", "admin"]
    );
}

#[tokio::test]
async fn peers_pick_up_changes() {
    setup_logging();
    let storage = MemoryStorage::new();
    let hub = MemoryHub::default();
    let a = spawn_engine(storage.clone(), &hub, test_config("a")).await;
    let b = spawn_engine(storage, &hub, test_config("b")).await;
    let recorder = EventRecorder::attach(b.events());

    a.create_group("builder").await.unwrap();
    eventually(|| b.groups().contains("builder")).await;

    a.set_node(&group("builder"), node("worldedit.*", true))
        .unwrap();
    a.save(&group("builder")).await.unwrap();
    let empty = context(&[]);
    eventually(|| {
        b.group_data("builder", &empty)
            .is_ok_and(|data| data.check("worldedit.wand") == Tristate::True)
    })
    .await;

    let uuid = Uuid::new_v4();
    b.login(uuid, "carol").await.unwrap();
    a.load_user(uuid, Some("carol")).await.unwrap();
    a.set_node(&HolderId::User(uuid), node("fly", true)).unwrap();
    a.save(&HolderId::User(uuid)).await.unwrap();
    eventually(|| b.check_permission(uuid, "fly", &empty) == Tristate::True).await;
    assert!(recorder.count(|event| matches!(event, Event::UserDataRecalculate { .. })) >= 1);

    let entry = LogEntry::new(
        Uuid::nil(),
        "console",
        LogTarget::Group {
            name: "builder".into(),
        },
        "permission set worldedit.* true",
    );
    a.log_action(entry.clone()).await.unwrap();
    eventually(|| {
        recorder.count(|event| matches!(event, Event::LogReceive { entry: received, .. } if received == &entry))
            == 1
    })
    .await;
    assert_eq!(b.action_log().await.unwrap(), vec![entry]);

    a.shutdown().await;
    b.shutdown().await;
}

/// Exports `original` and replays the file into an engine on fresh storage.
async fn replay(original: &MemoryEngine<MemoryStorage>) -> (Vec<u8>, MemoryStorage) {
    let mut output = Vec::new();
    Exporter::new(original).export(&mut output).await.unwrap();

    let storage = MemoryStorage::new();
    let replica = spawn_engine(storage.clone(), &MemoryHub::default(), test_config("replica")).await;
    let summary = Importer::new(&replica).import(&output[..]).await.unwrap();
    assert!(summary.failed.is_empty(), "{:?}", summary.failed);
    replica.shutdown().await;
    (output, storage)
}

#[tokio::test]
async fn default_edges_survive_replay() {
    let original = engine().await;
    let negated = Uuid::from_u128(3);
    let temporary = Uuid::from_u128(4);

    original.login(negated, "negated").await.unwrap();
    original
        .set_node(
            &HolderId::User(negated),
            Node::inheritance("default").value(false).build().unwrap(),
        )
        .unwrap();
    original.save(&HolderId::User(negated)).await.unwrap();

    original.login(temporary, "temporary").await.unwrap();
    original
        .set_node(
            &HolderId::User(temporary),
            Node::inheritance("default")
                .expiry(Timestamp::new(4102444800))
                .build()
                .unwrap(),
        )
        .unwrap();
    original.save(&HolderId::User(temporary)).await.unwrap();

    let (output, storage) = replay(&original).await;
    let output = String::from_utf8(output).unwrap();
    let lines: Vec<&str> = output.lines().collect();
    let remove = format!("/luckperms user {negated} parent remove default");
    let set = format!("/luckperms user {negated} permission set group.default false");
    let remove_at = lines.iter().position(|line| *line == remove).unwrap();
    let set_at = lines.iter().position(|line| *line == set).unwrap();
    assert!(remove_at < set_at);

    for uuid in [negated, temporary] {
        let expected = original.storage().load_user(uuid, None).await.unwrap();
        let actual = storage.load_user(uuid, None).await.unwrap();
        assert!(actual.is_some());
        assert_eq!(expected, actual);
    }
    let stored = storage.load_user(negated, None).await.unwrap().unwrap();
    assert_eq!(
        stored.nodes,
        vec![Node::inheritance("default").value(false).build().unwrap()]
    );
}

#[tokio::test]
async fn sharded_export_keeps_user_blocks_together() {
    setup_logging();
    let storage = MemoryStorage::new();
    let mut config = test_config("test");
    config.export_shard_size = 2;
    let original = spawn_engine(storage.clone(), &MemoryHub::default(), config).await;

    let uuids: Vec<Uuid> = (10..19).map(Uuid::from_u128).collect();
    for (index, uuid) in uuids.iter().enumerate() {
        let target = HolderId::User(*uuid);
        let name = format!("user{index}");
        original.load_user(*uuid, Some(name.as_str())).await.unwrap();
        original
            .set_node(&target, node(&format!("perk.{index}"), true))
            .unwrap();
        original
            .set_node(&target, node(&format!("perk.{index}.extra"), index % 2 == 0))
            .unwrap();
        original.save(&target).await.unwrap();
    }

    // Nine users in shards of two, capped at the default of fifteen shards, run as three
    // chunks of three users.
    let (output, replica) = replay(&original).await;
    let mut check = Vec::new();
    let summary = Exporter::new(&original).export(&mut check).await.unwrap();
    assert_eq!(summary.users, 9);
    assert_eq!(summary.shards, 3);

    let output = String::from_utf8(output).unwrap();
    let users_at = output.find("# Export users").unwrap();
    let mut current: Option<String> = None;
    let mut seen = Vec::new();
    for line in output[users_at..].lines().skip(1) {
        if let Some(header) = line.strip_prefix("# Export user: ") {
            let (uuid, _) = header.split_once(" - ").unwrap();
            assert!(!seen.contains(&uuid.to_string()), "user {uuid} exported twice");
            seen.push(uuid.to_string());
            current = Some(uuid.to_string());
            continue;
        }
        let uuid = line
            .strip_prefix("/luckperms user ")
            .and_then(|rest| rest.split_whitespace().next())
            .unwrap();
        assert_eq!(current.as_deref(), Some(uuid), "line outside its user block: {line}");
    }
    assert_eq!(seen.len(), 9);

    for uuid in &uuids {
        let expected = storage.load_user(*uuid, None).await.unwrap();
        let actual = replica.load_user(*uuid, None).await.unwrap();
        assert!(actual.is_some());
        assert_eq!(expected, actual);
    }

    // The shard cap wins over the shard size.
    let mut config = test_config("capped");
    config.export_shard_size = 2;
    config.export_max_shards = 2;
    let capped = spawn_engine(storage, &MemoryHub::default(), config).await;
    let summary = Exporter::new(&capped).export(&mut Vec::new()).await.unwrap();
    assert_eq!(summary.users, 9);
    assert_eq!(summary.shards, 2);

    original.shutdown().await;
    capped.shutdown().await;
}
