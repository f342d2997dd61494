//! Behavior tests for the session runtime, driven by scripted narrators.

use std::sync::Arc;

use crate::error::EngineError;
use crate::parser::Step;
use crate::session::test_support::*;
use crate::session::{ProcessMode, SessionManager};
use crate::store::DocKind;
use crate::world::{MissionStatus, Player, SceneMap};

const STORY_MISSION_JSON: &str = r#"{"type":"story","title":"The Summons","description":"Answer the call at the forge.","paths":[{"id":"p1","name":"Be present","requirements":{"location":"village"},"rewards":{"currency":10}}]}"#;

const SIDE_MISSION_JSON: &str = r#"{"type":"side","title":"Gather Gold","description":"Collect coins.","paths":[{"id":"p1","name":"Rich enough","requirements":{"currency":1000},"rewards":{}}]}"#;

async fn create_session(manager: &SessionManager) {
    manager
        .create("s1", "f1", Some("Alice".to_string()), None)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_create_returns_uninitialized_snapshot() {
    let (_dir, manager, _sink) = manager_with(Vec::<String>::new()).await;
    let snapshot = manager
        .create("s1", "f1", Some("Alice".to_string()), None)
        .await
        .unwrap();
    assert!(!snapshot.conversation.game_state.is_initialized);
    assert_eq!(snapshot.character_status.profile.name, "Alice");
    assert!(manager.store().exists_session("s1").await);
}

#[tokio::test]
async fn test_create_unknown_template_fails() {
    let (_dir, manager, _sink) = manager_with(Vec::<String>::new()).await;
    let result = manager.create("s1", "missing", None, None).await;
    assert!(matches!(result, Err(EngineError::NotFound { .. })));
}

#[tokio::test]
async fn test_first_action_initializes_and_orders_events() {
    let (_dir, manager, sink) =
        manager_with(["[MISSION: false]\n[NARRATION: The village wakes.]"]).await;
    create_session(&manager).await;

    let outcome = manager
        .process_action("s1", "look around", ProcessMode::Buffered)
        .await
        .unwrap();

    assert!(outcome.game_state.is_initialized);
    assert!(outcome
        .steps
        .iter()
        .any(|s| matches!(s, Step::Narration { .. })));

    // Fixed per-action order; create() itself publishes nothing.
    let types = sink.types_for("s1");
    assert_eq!(
        types,
        vec![
            "action_received",
            "processing",
            "response_chunk",
            "state_update",
            "complete"
        ]
    );
}

#[tokio::test]
async fn test_history_grows_by_action_plus_steps() {
    let reply = "[NARRATION: One.]\n[DIALOGUE: npc_bob, \"Two.\"]\n[HINT: Three]\n[CHANGE: 玩家, stamina, -1]";
    let (_dir, manager, _sink) = manager_with([reply]).await;
    create_session(&manager).await;

    let before = manager.get("s1").await.unwrap().history.len();
    let outcome = manager
        .process_action("s1", "talk to bob", ProcessMode::Buffered)
        .await
        .unwrap();
    let after = manager.get("s1").await.unwrap().history.len();

    assert_eq!(after, before + 1 + outcome.steps.len());
}

#[tokio::test]
async fn test_turn_count_strictly_increases() {
    let (_dir, manager, _sink) = manager_with(Vec::<String>::new()).await;
    create_session(&manager).await;

    for expected in 1..=3 {
        manager
            .process_action("s1", "wait", ProcessMode::Buffered)
            .await
            .unwrap();
        assert_eq!(manager.get("s1").await.unwrap().turn_count, expected);
    }
}

#[tokio::test]
async fn test_item_acquisition_merges_into_inventory() {
    let reply = "[HINT: You find gold]\n[CHANGE: gold, 获得, 5]";
    let (_dir, manager, _sink) = manager_with([reply]).await;
    create_session(&manager).await;

    manager
        .process_action("s1", "search the chest", ProcessMode::Buffered)
        .await
        .unwrap();

    let player: Player = manager
        .store()
        .load_session(DocKind::Player, "s1", "f1")
        .await
        .unwrap();
    // Pre-existing stack of 3 merged with the new 5.
    assert_eq!(player.find_item("gold").unwrap().quantity, 8);
}

#[tokio::test]
async fn test_relationship_clamps_and_mirrors_into_scenes() {
    let reply = "[HINT: Bob likes you more]\n[CHANGE: RELATIONSHIP, Bob, 10]";
    let (_dir, manager, _sink) = manager_with([reply]).await;
    create_session(&manager).await;

    manager
        .process_action("s1", "help bob", ProcessMode::Buffered)
        .await
        .unwrap();

    let player: Player = manager
        .store()
        .load_session(DocKind::Player, "s1", "f1")
        .await
        .unwrap();
    assert_eq!(player.network["Bob"], 100);

    let scenes: SceneMap = manager
        .store()
        .load_session(DocKind::Scenes, "s1", "f1")
        .await
        .unwrap();
    for scene in scenes.scenes.values() {
        for npc in scene.npcs.iter().filter(|n| n.name == "Bob") {
            assert_eq!(npc.relationship, Some(100));
        }
    }
}

#[tokio::test]
async fn test_game_time_advances_one_hour_per_action() {
    let (_dir, manager, _sink) = manager_with(Vec::<String>::new()).await;
    create_session(&manager).await;

    manager
        .process_action("s1", "wait", ProcessMode::Buffered)
        .await
        .unwrap();
    let lore: crate::world::Lore = manager
        .store()
        .load_session(DocKind::Lore, "s1", "f1")
        .await
        .unwrap();
    assert_eq!(lore.game_time.hour_index, 1);
    assert_eq!(lore.current_era_index, 0); // never auto-advances
}

#[tokio::test]
async fn test_live_mode_emits_stream_events() {
    let (_dir, manager, sink) =
        manager_with(["[NARRATION: A long narration that streams in parts.]"]).await;
    create_session(&manager).await;

    let outcome = manager
        .process_action("s1", "look", ProcessMode::Live)
        .await
        .unwrap();

    let types = sink.types_for("s1");
    assert!(types.contains(&"stream".to_string()));
    assert!(!types.contains(&"response_chunk".to_string()));
    assert_eq!(
        outcome.response,
        "[NARRATION: A long narration that streams in parts.]"
    );
}

#[tokio::test]
async fn test_llm_failure_rolls_back_and_publishes_error() {
    let (_dir, manager, sink) = manager_with_model(Arc::new(FailingModel)).await;
    create_session(&manager).await;

    let before = manager.get("s1").await.unwrap();
    let result = manager
        .process_action("s1", "look", ProcessMode::Buffered)
        .await;
    assert!(matches!(result, Err(EngineError::Llm(_))));

    let after = manager.get("s1").await.unwrap();
    assert_eq!(after.history.len(), before.history.len());
    assert_eq!(after.conversation_history.len(), 0);
    assert_eq!(after.turn_count, 0);
    assert!(sink.types_for("s1").contains(&"error".to_string()));
}

#[tokio::test]
async fn test_change_scene_locked_and_missing() {
    let (_dir, manager, _sink) = manager_with(Vec::<String>::new()).await;
    create_session(&manager).await;

    let locked = manager.change_scene("s1", "forest").await;
    assert!(matches!(locked, Err(EngineError::SceneLocked { .. })));

    let missing = manager.change_scene("s1", "moon").await;
    assert!(matches!(missing, Err(EngineError::NotFound { .. })));

    // No state mutation on failure.
    let player: Player = manager
        .store()
        .load_session(DocKind::Player, "s1", "f1")
        .await
        .unwrap();
    assert_eq!(player.location, "village");
}

#[tokio::test]
async fn test_change_scene_success_writes_history() {
    let reply = "[HINT: The path opens]\n[CHANGE: RELATIONSHIP, Bob, 1]";
    let (_dir, manager, _sink) = manager_with([reply]).await;
    create_session(&manager).await;

    // Unlock the forest by hand, as a mission reward would.
    let mut player: Player = manager
        .store()
        .load_session(DocKind::Player, "s1", "f1")
        .await
        .unwrap();
    player.unlock_scene("forest");
    manager
        .store()
        .save_session(DocKind::Player, "s1", &player)
        .await
        .unwrap();

    let report = manager.change_scene("s1", "forest").await.unwrap();
    assert_eq!(report.previous_location, "village");
    assert_eq!(report.current_location, "forest");

    let state = manager.get("s1").await.unwrap();
    assert_eq!(state.game_state.current_location, "forest");
    let last = state.history.last().unwrap();
    assert_eq!(last.text, "Scene changed: village → forest");
}

#[tokio::test]
async fn test_use_item_submits_synthesized_action() {
    let (_dir, manager, _sink) = manager_with(Vec::<String>::new()).await;
    create_session(&manager).await;

    manager
        .use_item("s1", "gold", ProcessMode::Buffered)
        .await
        .unwrap();
    let state = manager.get("s1").await.unwrap();
    assert_eq!(state.game_state.last_action.as_deref(), Some("我使用了Gold"));

    let missing = manager
        .use_item("s1", "no_such_item", ProcessMode::Buffered)
        .await;
    assert!(matches!(missing, Err(EngineError::NotFound { .. })));
}

#[tokio::test]
async fn test_skip_to_next_era_applies_growth() {
    let (_dir, manager, _sink) = manager_with(Vec::<String>::new()).await;
    create_session(&manager).await;

    let report = manager.skip_to_next_era("s1").await.unwrap();
    assert_eq!(report.previous_era, "Age of Ash");
    assert_eq!(report.current_era, "Age of Iron");
    assert_eq!(report.time_change.years_passed, 20);
    assert_eq!(report.player_changes.currency_bonus, 50);

    let player: Player = manager
        .store()
        .load_session(DocKind::Player, "s1", "f1")
        .await
        .unwrap();
    assert_eq!(player.profile.age, 40);
    assert_eq!(player.attributes["strength"], 15);
    assert_eq!(player.currency, 150);

    // Already at the final era now.
    let again = manager.skip_to_next_era("s1").await;
    assert!(matches!(again, Err(EngineError::AlreadyAtLastEra)));
}

#[tokio::test]
async fn test_mission_flag_triggers_generation() {
    let (_dir, manager, sink) = manager_with([
        "[MISSION: true]\n[NARRATION: A stranger arrives.]".to_string(),
        SIDE_MISSION_JSON.to_string(),
    ])
    .await;
    create_session(&manager).await;

    let outcome = manager
        .process_action("s1", "greet the stranger", ProcessMode::Buffered)
        .await
        .unwrap();
    let mission = outcome.new_mission.expect("mission should be generated");
    assert_eq!(mission.title, "Gather Gold");
    assert_eq!(mission.status, MissionStatus::Active);

    let state = manager.get("s1").await.unwrap();
    assert_eq!(state.last_mission_turn, 1);
    assert!(state.blocked_by_mission_id.is_none()); // side mission

    assert!(sink.types_for("s1").contains(&"new_mission".to_string()));
}

#[tokio::test]
async fn test_mission_cadence_after_five_turns() {
    let mut replies: Vec<String> = (0..5)
        .map(|i| format!("[NARRATION: Beat {i}.]"))
        .collect();
    replies.push(SIDE_MISSION_JSON.to_string());
    let (_dir, manager, _sink) = manager_with(replies).await;
    create_session(&manager).await;

    for _ in 0..4 {
        let outcome = manager
            .process_action("s1", "wander", ProcessMode::Buffered)
            .await
            .unwrap();
        assert!(outcome.new_mission.is_none());
    }
    let outcome = manager
        .process_action("s1", "wander", ProcessMode::Buffered)
        .await
        .unwrap();
    assert!(outcome.new_mission.is_some());
}

#[tokio::test]
async fn test_mission_generation_failure_degrades_to_warning() {
    let (_dir, manager, _sink) = manager_with([
        "[MISSION: true]\n[NARRATION: A stranger arrives.]".to_string(),
        "this is not json".to_string(),
    ])
    .await;
    create_session(&manager).await;

    let outcome = manager
        .process_action("s1", "greet", ProcessMode::Buffered)
        .await
        .unwrap();
    assert!(outcome.new_mission.is_none());
    assert_eq!(outcome.warnings.len(), 1);
    assert!(outcome.warnings[0].contains("mission generation failed"));
}

#[tokio::test]
async fn test_story_mission_blocks_storyline() {
    let (_dir, manager, sink) = manager_with([
        "[MISSION: true]\n[NARRATION: A summons arrives.]".to_string(),
        STORY_MISSION_JSON.to_string(),
    ])
    .await;
    create_session(&manager).await;

    manager
        .process_action("s1", "read the letter", ProcessMode::Buffered)
        .await
        .unwrap();

    let status = manager.storyline_status("s1").await.unwrap();
    assert!(status.blocked);

    // The next action is answered by the canned narrative, no model call
    // (the script is exhausted; a model call would return the fallback
    // narration, not the mission title).
    let turn_before = manager.get("s1").await.unwrap().turn_count;
    let outcome = manager
        .process_action("s1", "travel to the capital", ProcessMode::Buffered)
        .await
        .unwrap();
    assert!(outcome.storyline_blocked);
    assert!(outcome.response.contains("The Summons"));
    assert_eq!(manager.get("s1").await.unwrap().turn_count, turn_before);

    let types = sink.types_for("s1");
    let tail = &types[types.len() - 5..];
    assert_eq!(
        tail,
        ["action_received", "processing", "response_chunk", "state_update", "complete"]
    );
}

#[tokio::test]
async fn test_submit_mission_completes_and_resumes_storyline() {
    let (_dir, manager, sink) = manager_with([
        "[MISSION: true]\n[NARRATION: A summons arrives.]".to_string(),
        STORY_MISSION_JSON.to_string(),
        "[NARRATION: The story moves on.]".to_string(),
    ])
    .await;
    create_session(&manager).await;

    manager
        .process_action("s1", "read the letter", ProcessMode::Buffered)
        .await
        .unwrap();
    let mission_id = manager.get("s1").await.unwrap().missions[0].id;
    let currency_before = {
        let player: Player = manager
            .store()
            .load_session(DocKind::Player, "s1", "f1")
            .await
            .unwrap();
        player.currency
    };

    let report = manager
        .submit_mission("s1", mission_id, ProcessMode::Buffered)
        .await
        .unwrap();
    assert!(report.completed);
    assert_eq!(report.completed_path.as_deref(), Some("p1"));
    let continuation = report.continuation.expect("storyline should resume");
    assert!(continuation.response.contains("The story moves on"));

    // Rewards applied once.
    let player: Player = manager
        .store()
        .load_session(DocKind::Player, "s1", "f1")
        .await
        .unwrap();
    assert_eq!(player.currency, currency_before + 10);

    let status = manager.storyline_status("s1").await.unwrap();
    assert!(!status.blocked);

    let types = sink.types_for("s1");
    let completed_at = types.iter().position(|t| t == "mission_completed").unwrap();
    let final_complete = types.iter().rposition(|t| t == "complete").unwrap();
    assert!(completed_at < final_complete);

    // Idempotent re-submit: same result, no further rewards.
    let again = manager
        .submit_mission("s1", mission_id, ProcessMode::Buffered)
        .await
        .unwrap();
    assert!(again.completed);
    assert_eq!(again.completed_path.as_deref(), Some("p1"));
    assert!(again.continuation.is_none());
    let player: Player = manager
        .store()
        .load_session(DocKind::Player, "s1", "f1")
        .await
        .unwrap();
    assert_eq!(player.currency, currency_before + 10);
}

#[tokio::test]
async fn test_submit_unsatisfied_mission_reports_missing() {
    let (_dir, manager, _sink) = manager_with([
        "[MISSION: true]\n[NARRATION: A stranger arrives.]".to_string(),
        SIDE_MISSION_JSON.to_string(),
    ])
    .await;
    create_session(&manager).await;

    manager
        .process_action("s1", "greet", ProcessMode::Buffered)
        .await
        .unwrap();
    let mission_id = manager.get("s1").await.unwrap().missions[0].id;

    let report = manager
        .submit_mission("s1", mission_id, ProcessMode::Buffered)
        .await
        .unwrap();
    assert!(!report.completed);
    assert_eq!(report.path_results.len(), 1);
    assert!(!report.path_results[0].missing_requirements.is_empty());
    // Mission stays active.
    let state = manager.get("s1").await.unwrap();
    assert_eq!(state.missions[0].status, MissionStatus::Active);
}

#[tokio::test]
async fn test_abandon_mission_unblocks_and_streams_continuation() {
    let (_dir, manager, sink) = manager_with([
        "[MISSION: true]\n[NARRATION: A summons arrives.]".to_string(),
        STORY_MISSION_JSON.to_string(),
        "[NARRATION: Freed of obligation, you move on.]".to_string(),
    ])
    .await;
    create_session(&manager).await;

    manager
        .process_action("s1", "read the letter", ProcessMode::Buffered)
        .await
        .unwrap();
    let mission_id = manager.get("s1").await.unwrap().missions[0].id;

    let report = manager
        .abandon_mission("s1", mission_id, ProcessMode::Live)
        .await
        .unwrap();
    assert!(report.storyline_unblocked);
    assert_eq!(report.mission.status, MissionStatus::Abandoned);
    let continuation = report.continuation.expect("continuation should run");
    assert!(continuation.response.contains("Freed of obligation"));

    let types = sink.types_for("s1");
    assert!(types.contains(&"mission_abandoned".to_string()));
    assert!(types.contains(&"stream".to_string())); // continuation streamed live

    // Abandoning again: no longer active.
    let again = manager
        .abandon_mission("s1", mission_id, ProcessMode::Buffered)
        .await;
    assert!(matches!(again, Err(EngineError::MissionNotActive { .. })));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_concurrent_actions_serialize_per_session() {
    let (_dir, manager, _sink) = manager_with(Vec::<String>::new()).await;
    create_session(&manager).await;
    let manager = Arc::new(manager);

    let a = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move {
            manager
                .process_action("s1", "first", ProcessMode::Buffered)
                .await
        })
    };
    let b = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move {
            manager
                .process_action("s1", "second", ProcessMode::Buffered)
                .await
        })
    };
    a.await.unwrap().unwrap();
    b.await.unwrap().unwrap();

    let state = manager.get("s1").await.unwrap();
    assert_eq!(state.turn_count, 2);
    // Each action appended exactly its own entries; a fallback narration
    // reply yields 2 history entries per action.
    assert_eq!(state.history.len(), 4);
}

#[tokio::test]
async fn test_recover_session_from_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let store = crate::store::GameStore::new(dir.path());
    seed_template(&store, "f1").await;
    let sink = Arc::new(CollectingSink::default());
    {
        let manager = SessionManager::new(
            store.clone(),
            Arc::new(ScriptedModel::new(["[NARRATION: Beat one.]"])),
            sink.clone(),
        );
        manager
            .create("s1", "f1", Some("Alice".to_string()), None)
            .await
            .unwrap();
        manager
            .process_action("s1", "look", ProcessMode::Buffered)
            .await
            .unwrap();
    }

    // A fresh manager over the same store: nothing in memory...
    let manager = SessionManager::new(
        store,
        Arc::new(ScriptedModel::new(Vec::<String>::new())),
        sink,
    );
    assert!(manager.get("s1").await.is_none());

    // ...until the snapshot is rehydrated.
    let recovered = manager.recover_session("s1").await.unwrap().unwrap();
    assert_eq!(recovered.turn_count, 1);
    assert!(recovered.game_state.is_initialized);

    // Missing sessions recover to None.
    assert!(manager.recover_session("ghost").await.unwrap().is_none());
}

#[tokio::test]
async fn test_disconnect_semantics_state_still_committed() {
    // Event delivery is fire-and-forget: even with no live subscriber the
    // pipeline commits state, and get_session_state reflects it.
    let reply = "[HINT: You find gold]\n[CHANGE: gold, 获得, 2]";
    let (_dir, manager, _sink) = manager_with([reply]).await;
    create_session(&manager).await;

    manager
        .process_action("s1", "dig", ProcessMode::Buffered)
        .await
        .unwrap();
    let snapshot = manager.get_session_state("s1").await.unwrap();
    assert_eq!(
        snapshot
            .character_status
            .find_item("gold")
            .unwrap()
            .quantity,
        5
    );
    assert_eq!(snapshot.conversation.turn_count, 1);
}

#[tokio::test]
async fn test_npc_chat_keeps_transcript() {
    let (_dir, manager, _sink) = manager_with([
        "Well met, Alice.".to_string(),
        "The forge is hot today.".to_string(),
    ])
    .await;
    create_session(&manager).await;

    let first = manager.npc_chat("s1", "npc_bob", "hello").await.unwrap();
    assert_eq!(first.npc_name, "Bob");
    assert_eq!(first.reply, "Well met, Alice.");

    manager
        .npc_chat("s1", "npc_bob", "how is work?")
        .await
        .unwrap();

    let transcript: Option<Vec<crate::session::ChatTurn>> = manager
        .store()
        .load_aux("npc_chat_s1_npc_bob")
        .await
        .unwrap();
    assert_eq!(transcript.unwrap().len(), 4);

    let missing = manager.npc_chat("s1", "npc_ghost", "hello").await;
    assert!(matches!(missing, Err(EngineError::NotFound { .. })));
}

#[tokio::test]
async fn test_missions_of_unknown_session_fail() {
    let (_dir, manager, _sink) = manager_with(Vec::<String>::new()).await;
    let result = manager
        .process_action("ghost", "look", ProcessMode::Buffered)
        .await;
    assert!(matches!(result, Err(EngineError::NotFound { .. })));
}
