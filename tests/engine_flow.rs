//! End-to-end engine flows against the in-memory repository.

use std::path::Path;
use std::sync::Arc;

use quest_engine::quest::events::{ITEM_PICKUP, NPC_DEATH, PLAYER_LEVELUP, ROOM_ENTER};
use quest_engine::quest::{
    CatalogHandle, EventPayload, GameEvent, QuestCatalog, QuestDefinition, QuestEngine,
    QuestNotification, StartOptions,
};
use quest_engine::{EngineConfig, InMemoryProgressRepository, PlayerSnapshot, QuestError};

fn quest(toml_src: &str) -> QuestDefinition {
    let quest: QuestDefinition = toml::from_str(toml_src).unwrap();
    quest.validate().unwrap();
    quest
}

/// Step A needs X three times, step B needs Y once
fn two_step_quest() -> QuestDefinition {
    quest(
        r#"
        id = "q"
        name = "Two steps"

        [[steps]]
        id = "A"
        name = "A"

        [[steps.objectives]]
        id = "x"
        type = "kill_mob"
        npc_template_id = "X"
        count = 3

        [[steps]]
        id = "B"
        name = "B"

        [[steps.objectives]]
        id = "y"
        type = "kill_mob"
        npc_template_id = "Y"

        [rewards]
        experience = 10
        "#,
    )
}

fn repeatable_quest() -> QuestDefinition {
    quest(
        r#"
        id = "again"
        name = "Again"
        repeatable = true

        [[steps]]
        id = "only"
        name = "Only"

        [[steps.objectives]]
        id = "room"
        type = "enter_room"
        room_id = "arena"
        "#,
    )
}

fn setup(quests: Vec<QuestDefinition>) -> (Arc<QuestEngine>, Arc<InMemoryProgressRepository>) {
    let repo = Arc::new(InMemoryProgressRepository::new());
    let catalog = Arc::new(CatalogHandle::new(QuestCatalog::from_quests(quests)));
    let engine = Arc::new(QuestEngine::new(catalog, repo.clone(), &EngineConfig::default()));
    (engine, repo)
}

fn kill(npc: &str) -> EventPayload {
    EventPayload::new().with("npcTemplateId", npc)
}

#[tokio::test]
async fn step_advancement_runs_to_completion() {
    let (engine, _) = setup(vec![two_step_quest()]);
    let player = PlayerSnapshot::new("ana", 1);
    engine.start_quest(&player, "q", StartOptions::default()).await.unwrap();

    for expected in 1..=2 {
        let results = engine.update_objective("ana", NPC_DEATH, &kill("X")).await.unwrap();
        assert_eq!(results[0].objectives[0].current, expected);
        assert!(!results[0].step_completed);
    }

    let results = engine.update_objective("ana", NPC_DEATH, &kill("X")).await.unwrap();
    assert!(results[0].objective_completed);
    assert!(results[0].step_completed);
    assert!(!results[0].quest_completed);
    assert_eq!(results[0].next_step_id.as_deref(), Some("B"));

    let results = engine.update_objective("ana", NPC_DEATH, &kill("Y")).await.unwrap();
    assert!(results[0].step_completed);
    assert!(results[0].quest_completed);
    assert_eq!(results[0].rewards.as_ref().unwrap().experience, 10);

    let progress = engine.get_progress("ana").await.unwrap();
    assert!(progress.active_quests.is_empty());
    assert_eq!(progress.completed_record("q").unwrap().completion_count, 1);
}

#[tokio::test]
async fn non_matching_event_changes_nothing() {
    let (engine, repo) = setup(vec![two_step_quest()]);
    let player = PlayerSnapshot::new("ben", 1);
    engine.start_quest(&player, "q", StartOptions::default()).await.unwrap();
    let saves = repo.save_count();

    let results = engine.update_objective("ben", NPC_DEATH, &kill("Y")).await.unwrap();
    assert!(results.is_empty());
    let results = engine
        .update_objective("ben", ROOM_ENTER, &EventPayload::new().with("roomId", "X"))
        .await
        .unwrap();
    assert!(results.is_empty());

    assert_eq!(repo.save_count(), saves);
}

#[tokio::test]
async fn repeat_completion_keeps_one_record() {
    let (engine, _) = setup(vec![repeatable_quest()]);
    let player = PlayerSnapshot::new("cal", 1);
    let arena = EventPayload::new().with("roomId", "arena");

    for _ in 0..2 {
        engine.start_quest(&player, "again", StartOptions::default()).await.unwrap();
        let results = engine.update_objective("cal", ROOM_ENTER, &arena).await.unwrap();
        assert!(results[0].quest_completed);
    }

    let progress = engine.get_progress("cal").await.unwrap();
    assert_eq!(progress.completed_quests.len(), 1);
    assert_eq!(progress.completed_quests[0].completion_count, 2);
}

#[tokio::test]
async fn concurrent_starts_yield_one_instance() {
    let (engine, repo) = setup(vec![two_step_quest()]);

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let engine = engine.clone();
            tokio::spawn(async move {
                let player = PlayerSnapshot::new("dan", 1);
                engine.start_quest(&player, "q", StartOptions::default()).await
            })
        })
        .collect();

    let mut started = 0;
    for result in futures::future::join_all(tasks).await {
        match result.unwrap() {
            Ok(_) => started += 1,
            Err(e) => assert!(matches!(e, QuestError::AlreadyActive)),
        }
    }

    assert_eq!(started, 1);
    assert_eq!(repo.load_count(), 1);
    assert_eq!(engine.get_progress("dan").await.unwrap().active_quests.len(), 1);
}

#[tokio::test]
async fn completion_is_idempotent() {
    let (engine, _) = setup(vec![two_step_quest()]);
    let player = PlayerSnapshot::new("eli", 1);
    engine.start_quest(&player, "q", StartOptions::default()).await.unwrap();

    assert!(engine.complete_quest("eli", "q").await.unwrap().is_some());
    assert!(engine.complete_quest("eli", "q").await.unwrap().is_none());

    let progress = engine.get_progress("eli").await.unwrap();
    assert_eq!(progress.completed_record("q").unwrap().completion_count, 1);
}

#[tokio::test]
async fn persistence_failure_surfaces_but_keeps_progress() {
    let (engine, repo) = setup(vec![two_step_quest()]);
    let player = PlayerSnapshot::new("fay", 1);
    engine.start_quest(&player, "q", StartOptions::default()).await.unwrap();

    repo.set_fail_saves(true);
    let err = engine.update_objective("fay", NPC_DEATH, &kill("X")).await.unwrap_err();
    assert!(err.is_persistence());

    let progress = engine.get_progress("fay").await.unwrap();
    assert_eq!(progress.active("q").unwrap().objective("A", "x").unwrap().current, 1);

    // The next successful write carries the earlier progress along
    repo.set_fail_saves(false);
    engine.update_objective("fay", NPC_DEATH, &kill("X")).await.unwrap();
    let stored = repo.stored("fay").unwrap();
    assert_eq!(stored.active("q").unwrap().objective("A", "x").unwrap().current, 2);
}

#[tokio::test]
async fn concurrent_kills_complete_the_step_once() {
    const KILLS: u32 = 12;
    let (engine, _) = setup(vec![quest(&format!(
        r#"
        id = "swarm"
        name = "Swarm"

        [[steps]]
        id = "cull"
        name = "Cull"

        [[steps.objectives]]
        id = "rats"
        type = "kill_mob"
        npc_template_id = "rat"
        count = {KILLS}

        [[steps]]
        id = "report"
        name = "Report"

        [[steps.objectives]]
        id = "talk"
        type = "talk_to_npc"
        npc_template_id = "captain"
        "#
    ))]);
    let player = PlayerSnapshot::new("max", 1);
    engine.start_quest(&player, "swarm", StartOptions::default()).await.unwrap();

    let tasks: Vec<_> = (0..KILLS)
        .map(|_| {
            let engine = engine.clone();
            tokio::spawn(async move {
                engine.update_objective("max", NPC_DEATH, &kill("rat")).await
            })
        })
        .collect();

    let mut step_completions = 0;
    for result in futures::future::join_all(tasks).await {
        let results = result.unwrap().unwrap();
        assert_eq!(results.len(), 1);
        step_completions += results.iter().filter(|r| r.step_completed).count();
    }
    assert_eq!(step_completions, 1);

    let progress = engine.get_progress("max").await.unwrap();
    let active = progress.active("swarm").unwrap();
    assert_eq!(active.current_step_id, "report");
    let rats = active.objective("cull", "rats").unwrap();
    assert_eq!((rats.current, rats.completed), (KILLS, true));
}

#[tokio::test]
async fn logout_after_failed_write_keeps_progress() {
    let (engine, repo) = setup(vec![two_step_quest()]);
    let player = PlayerSnapshot::new("nia", 1);
    engine
        .start_quest(&player, "q", StartOptions { force: false, starting_step: Some("B".into()) })
        .await
        .unwrap();

    repo.set_fail_saves(true);
    let err = engine.update_objective("nia", NPC_DEATH, &kill("Y")).await.unwrap_err();
    assert!(err.is_persistence());

    // The unsaved completion cannot be dropped while writes fail
    assert!(engine.evict("nia").await.unwrap_err().is_persistence());

    repo.set_fail_saves(false);
    assert!(engine.evict("nia").await.unwrap());

    let progress = engine.get_progress("nia").await.unwrap();
    assert!(progress.active_quests.is_empty());
    assert_eq!(progress.completed_record("q").unwrap().completion_count, 1);
}

#[tokio::test]
async fn logout_writes_progress_left_by_a_failed_save() {
    let (engine, repo) = setup(vec![two_step_quest()]);
    let player = PlayerSnapshot::new("ola", 1);
    engine.start_quest(&player, "q", StartOptions::default()).await.unwrap();

    repo.set_fail_saves(true);
    assert!(engine.update_objective("ola", NPC_DEATH, &kill("X")).await.is_err());
    assert!(engine.evict("ola").await.is_err());
    repo.set_fail_saves(false);

    let progress = engine.get_progress("ola").await.unwrap();
    assert_eq!(progress.active("q").unwrap().objective("A", "x").unwrap().current, 1);

    // A later logout carries the progress to storage before dropping it
    assert!(engine.evict("ola").await.unwrap());
    let stored = repo.stored("ola").unwrap();
    assert_eq!(stored.active("q").unwrap().objective("A", "x").unwrap().current, 1);
    let progress = engine.get_progress("ola").await.unwrap();
    assert_eq!(progress.active("q").unwrap().objective("A", "x").unwrap().current, 1);
    assert_eq!(repo.load_count(), 2);
}

#[tokio::test]
async fn poll_completes_inventory_and_flag_objectives() {
    let (engine, _) = setup(vec![quest(
        r#"
        id = "gather"
        name = "Gather"

        [[steps]]
        id = "collect"
        name = "Collect"

        [[steps.objectives]]
        id = "herbs"
        type = "have_item"
        item_id = "silverleaf"
        count = 5

        [[steps.objectives]]
        id = "blessed"
        type = "have_flag"
        flag = "blessing"
        "#,
    )]);
    let player = PlayerSnapshot::new("gil", 1);
    engine.start_quest(&player, "gather", StartOptions::default()).await.unwrap();

    // Pickup events never count toward have_item
    let pickup = EventPayload::new().with("itemId", "silverleaf");
    assert!(engine.update_objective("gil", ITEM_PICKUP, &pickup).await.unwrap().is_empty());

    let results = engine
        .poll_objectives(&player.clone().with_item("silverleaf", 3))
        .await
        .unwrap();
    assert_eq!(results[0].objectives[0].current, 3);

    // Dropping items later never lowers recorded progress
    let results = engine
        .poll_objectives(&player.clone().with_item("silverleaf", 1))
        .await
        .unwrap();
    assert!(results.is_empty());

    let ready = player.with_item("silverleaf", 6).with_flag("blessing");
    let results = engine.poll_objectives(&ready).await.unwrap();
    assert!(results[0].quest_completed);
}

#[tokio::test]
async fn level_objective_completes_on_reaching_level() {
    let (engine, _) = setup(vec![quest(
        r#"
        id = "grow"
        name = "Grow"

        [[steps]]
        id = "train"
        name = "Train"

        [[steps.objectives]]
        id = "lvl"
        type = "reach_level"
        level = 5
        "#,
    )]);
    let player = PlayerSnapshot::new("hana", 3);
    engine.start_quest(&player, "grow", StartOptions::default()).await.unwrap();

    let results = engine
        .ingest("hana", &GameEvent::PlayerLevelUp { level: 4, previous_level: 3 })
        .await
        .unwrap();
    assert!(results.is_empty());

    let results = engine
        .update_objective(
            "hana",
            PLAYER_LEVELUP,
            &EventPayload::new().with("level", 6).with("previousLevel", 4),
        )
        .await
        .unwrap();
    assert_eq!(results[0].objectives[0].current, 5);
    assert!(results[0].quest_completed);
}

#[tokio::test]
async fn notifications_follow_the_lifecycle() {
    let (engine, _) = setup(vec![repeatable_quest()]);
    let mut rx = engine.subscribe();
    let player = PlayerSnapshot::new("ida", 1);

    engine.start_quest(&player, "again", StartOptions::default()).await.unwrap();
    engine
        .ingest(
            "ida",
            &GameEvent::RoomEnter { room_id: "arena".to_string(), previous_room_id: None },
        )
        .await
        .unwrap();

    let mut names = Vec::new();
    while let Ok(n) = rx.try_recv() {
        if let QuestNotification::Completed { completion_count, .. } = &n {
            assert_eq!(*completion_count, 1);
        }
        names.push(n.name());
    }
    assert_eq!(
        names,
        vec![
            "quest:started",
            "quest:objective_updated",
            "quest:step_completed",
            "quest:completed",
        ]
    );
}

#[tokio::test]
async fn catalog_reload_swaps_definitions() {
    let (engine, _) = setup(vec![two_step_quest()]);
    let player = PlayerSnapshot::new("jo", 1);
    assert!(engine.can_start_quest(&player, "again").await.unwrap().reason.is_some());

    engine
        .reload_catalog(QuestCatalog::from_quests([two_step_quest(), repeatable_quest()]))
        .await;

    assert!(engine.can_start_quest(&player, "again").await.unwrap().eligible);
    let ids: Vec<String> = engine
        .get_available_quests(&player)
        .await
        .unwrap()
        .iter()
        .map(|q| q.id.clone())
        .collect();
    assert_eq!(ids, vec!["again", "q"]);
}

#[tokio::test]
async fn bundled_quest_data_loads_and_chains() {
    let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("data/quests");
    let catalog = QuestCatalog::load_dir(&dir).unwrap();
    assert!(catalog.contains("cellar_rats"));
    assert!(catalog.contains("lost_ring"));

    let repo = Arc::new(InMemoryProgressRepository::new());
    let engine = QuestEngine::new(
        Arc::new(CatalogHandle::new(catalog)),
        repo,
        &EngineConfig::default(),
    );
    let player = PlayerSnapshot::new("kai", 2);

    let verdict = engine.can_start_quest(&player, "lost_ring").await.unwrap();
    assert!(!verdict.eligible);
    assert_eq!(verdict.reason.as_deref(), Some("Prerequisites not met."));

    engine.start_quest(&player, "cellar_rats", StartOptions::default()).await.unwrap();
    for _ in 0..3 {
        engine.update_objective("kai", NPC_DEATH, &kill("cellar_rat")).await.unwrap();
    }
    let results = engine
        .ingest(
            "kai",
            &GameEvent::NpcTalked {
                npc_template_id: "innkeeper".to_string(),
                dialogue_option: None,
            },
        )
        .await
        .unwrap();
    assert!(results[0].quest_completed);

    assert!(engine.can_start_quest(&player, "lost_ring").await.unwrap().eligible);
}
