mod common;

use arborist::domain::models::{EnvState, Program, TokenUsage};
use arborist::domain::ports::{ProgramStore, ProgramUpdate, StoreError};
use std::collections::BTreeMap;

use common::{evaluated_program, root_conversation, setup_test_store};

#[tokio::test]
async fn test_create_and_fetch_round_trip() {
    let test = setup_test_store();
    let store = &test.store;

    let mut program = evaluated_program("place_entity('drill')", 1, 12.5, Some(0.75));
    program.holdout_value = Some(11.0);
    program.model = Some("gpt-4o".to_string());
    program.response = Some("```python\nplace_entity('drill')\n```".to_string());
    program.token_usage = Some(TokenUsage::new(120, 30));
    program.set_meta("text_response", "Placing a drill.");
    program.achievements = BTreeMap::from([("iron-ore".to_string(), 3.0)]);

    let created = store.create_program(program.clone()).await.expect("failed to create");
    let id = created.id.expect("store assigns an id");
    assert!(created.created_at.is_some());

    let fetched = store
        .get_by_id(id)
        .await
        .expect("failed to fetch")
        .expect("program exists");

    assert_eq!(fetched.code, program.code);
    assert_eq!(fetched.parent_id, None);
    assert_eq!(fetched.version, 1);
    assert_eq!(fetched.depth, 0);
    assert_eq!(fetched.value, Some(12.5));
    assert_eq!(fetched.holdout_value, Some(11.0));
    assert_eq!(fetched.raw_reward, Some(12.5));
    assert_eq!(fetched.advantage, Some(0.75));
    assert_eq!(fetched.state, program.state);
    assert_eq!(fetched.conversation, program.conversation);
    assert_eq!(fetched.model.as_deref(), Some("gpt-4o"));
    assert_eq!(fetched.response, program.response);
    assert_eq!(fetched.token_usage, Some(TokenUsage::new(120, 30)));
    assert_eq!(fetched.meta["text_response"], "Placing a drill.");
    assert_eq!(fetched.achievements.get("iron-ore"), Some(&3.0));

    assert!(store.get_by_id(id + 100).await.unwrap().is_none());
    test.close().await;
}

#[tokio::test]
async fn test_writes_are_visible_as_soon_as_they_return() {
    for round in 0..10 {
        let test = setup_test_store();
        let store = &test.store;
        let mut parent: Option<Program> = None;

        for i in 0..20 {
            let mut program = evaluated_program(&format!("step_{round}_{i}()"), 1, f64::from(i), None);
            program.attach_parent(parent.as_ref());
            let created = store.create_program(program).await.unwrap();
            let id = created.id.unwrap();

            let fetched = store.get_by_id(id).await.unwrap();
            assert_eq!(
                fetched.as_ref().map(|p| p.depth),
                Some(created.depth),
                "round {round}: program {id} not visible after create"
            );

            let newest = store.recent_evaluated(1, 3).await.unwrap();
            assert_eq!(newest.first().and_then(|p| p.id), Some(id), "round {round}");

            let updated = store
                .update_program(
                    id,
                    ProgramUpdate {
                        advantage: Some(0.5),
                        ..ProgramUpdate::default()
                    },
                )
                .await
                .unwrap();
            let refetched = store.get_by_id(id).await.unwrap().unwrap();
            assert_eq!(refetched.advantage, updated.advantage, "round {round}");

            parent = Some(created);
        }
        assert_eq!(store.count_with_advantage(1).await.unwrap(), 20);
        test.close().await;
    }
}

#[tokio::test]
async fn test_depth_is_derived_from_parent() {
    let test = setup_test_store();
    let store = &test.store;

    let root = store
        .create_program(evaluated_program("root()", 1, 1.0, None))
        .await
        .unwrap();
    assert_eq!(root.depth, 0);

    let mut child = evaluated_program("child()", 1, 2.0, None);
    child.attach_parent(Some(&root));
    child.depth = 9;
    let child = store.create_program(child).await.unwrap();
    assert_eq!(child.parent_id, root.id);
    assert_eq!(child.depth, 1);

    let mut grandchild = evaluated_program("grandchild()", 1, 3.0, None);
    grandchild.attach_parent(Some(&child));
    let grandchild = store.create_program(grandchild).await.unwrap();
    assert_eq!(grandchild.depth, 2);

    assert_eq!(store.get_largest_depth(1).await.unwrap(), Some(2));
    assert_eq!(store.get_largest_depth(2).await.unwrap(), None);
    test.close().await;
}

#[tokio::test]
async fn test_parent_must_exist_in_same_version() {
    let test = setup_test_store();
    let store = &test.store;

    let parent = store
        .create_program(evaluated_program("v1()", 1, 1.0, None))
        .await
        .unwrap();

    let mut cross_version = evaluated_program("v2()", 2, 1.0, None);
    cross_version.attach_parent(Some(&parent));
    let err = store.create_program(cross_version).await.unwrap_err();
    assert!(matches!(err, StoreError::ParentNotFound { version: 2, .. }));

    let mut orphan = evaluated_program("orphan()", 1, 1.0, None);
    orphan.parent_id = Some(9999);
    let err = store.create_program(orphan).await.unwrap_err();
    assert!(matches!(err, StoreError::ParentNotFound { parent_id: 9999, .. }));

    assert!(!store.version_exists(2).await.unwrap());
    test.close().await;
}

#[tokio::test]
async fn test_value_without_state_is_rejected() {
    let test = setup_test_store();
    let store = &test.store;

    let mut program = Program::new("x = 1", root_conversation(), 1, "v1");
    program.value = Some(4.0);
    let err = store.create_program(program).await.unwrap_err();
    assert!(matches!(err, StoreError::ConstraintViolation(_)));

    let mut unevaluated = Program::new("x = 2", root_conversation(), 1, "v1");
    unevaluated.state = None;
    let stored = store.create_program(unevaluated).await.unwrap();
    assert!(stored.state.is_none());
    assert!(stored.value.is_none());

    let mut no_value = Program::new("x = 3", root_conversation(), 1, "v1");
    no_value.state = Some(EnvState::new("{}"));
    assert!(store.create_program(no_value).await.is_ok());
    test.close().await;
}

#[tokio::test]
async fn test_update_program() {
    let test = setup_test_store();
    let store = &test.store;

    let unevaluated = store
        .create_program(Program::new("x = 1", root_conversation(), 1, "v1"))
        .await
        .unwrap();
    let id = unevaluated.id.unwrap();

    let err = store
        .update_program(
            id,
            ProgramUpdate {
                value: Some(2.0),
                ..ProgramUpdate::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::ConstraintViolation(_)));

    let updated = store
        .update_program(
            id,
            ProgramUpdate {
                state: Some(EnvState::new("{\"tick\": 5}")),
                value: Some(2.0),
                advantage: Some(0.1),
                ..ProgramUpdate::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.value, Some(2.0));
    assert_eq!(updated.advantage, Some(0.1));
    assert_eq!(updated.code, "x = 1");
    assert_eq!(updated.depth, 0);

    let unchanged = store.update_program(id, ProgramUpdate::default()).await.unwrap();
    assert_eq!(unchanged, updated);

    let err = store
        .update_program(id + 1, ProgramUpdate::default())
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::ProgramNotFound(_)));
    test.close().await;
}

#[tokio::test]
async fn test_beam_heads_are_sorted_and_depth_diverse() {
    let test = setup_test_store();
    let store = &test.store;

    // A deep chain of weak programs next to several strong roots.
    let mut parent: Option<Program> = None;
    for (depth, value) in [1.0, 1.5, 2.0].into_iter().enumerate() {
        let mut program = evaluated_program(&format!("chain_{depth}()"), 1, value, None);
        program.attach_parent(parent.as_ref());
        parent = Some(store.create_program(program).await.unwrap());
    }
    for value in [50.0, 40.0, 30.0, 20.0] {
        store
            .create_program(evaluated_program(&format!("root_{value}()"), 1, value, None))
            .await
            .unwrap();
    }
    // Another version and an unevaluated program never show up.
    store
        .create_program(evaluated_program("elsewhere()", 2, 1000.0, None))
        .await
        .unwrap();
    store
        .create_program(Program::new("pending()", root_conversation(), 1, "v1"))
        .await
        .unwrap();

    let heads = store.get_beam_heads(1, 3).await.unwrap();
    assert_eq!(heads.len(), 3);
    let values: Vec<f64> = heads.iter().map(|p| p.value.unwrap()).collect();
    assert_eq!(values, vec![50.0, 40.0, 30.0]);

    let wide = store.get_beam_heads(1, 10).await.unwrap();
    assert_eq!(wide.len(), 7);
    assert!(wide.windows(2).all(|w| w[0].value >= w[1].value));
    assert!(wide.iter().any(|p| p.depth == 2));
    assert!(wide.iter().all(|p| p.version == 1));

    assert!(store.get_beam_heads(1, 0).await.unwrap().is_empty());
    assert!(store.get_beam_heads(3, 5).await.unwrap().is_empty());
    test.close().await;
}

#[tokio::test]
async fn test_best_of_each_depth_fills_remaining_beam() {
    let test = setup_test_store();
    let store = &test.store;

    let root = store
        .create_program(evaluated_program("root()", 1, 1.0, None))
        .await
        .unwrap();
    let mut deep = evaluated_program("deep()", 1, 0.5, None);
    deep.attach_parent(Some(&root));
    store.create_program(deep).await.unwrap();
    for value in [9.0, 8.0] {
        store
            .create_program(evaluated_program(&format!("strong_{value}()"), 1, value, None))
            .await
            .unwrap();
    }

    let heads = store.get_beam_heads(1, 4).await.unwrap();
    assert_eq!(heads.len(), 4);
    assert!(heads.iter().any(|p| p.depth == 1));
    test.close().await;
}

#[tokio::test]
async fn test_version_metadata_and_rewards() {
    let test = setup_test_store();
    let store = &test.store;

    assert_eq!(store.get_largest_version().await.unwrap(), None);
    assert!(store.get_version_metadata(1).await.unwrap().is_none());

    let mut first = evaluated_program("a()", 1, 1.0, Some(0.1));
    first.version_description = "baseline".to_string();
    first.model = Some("gpt-4o".to_string());
    store.create_program(first).await.unwrap();
    store
        .create_program(evaluated_program("b()", 1, 3.0, None))
        .await
        .unwrap();
    store
        .create_program(evaluated_program("c()", 4, 5.0, Some(0.2)))
        .await
        .unwrap();
    store
        .create_program(Program::new("d()", root_conversation(), 4, "v4"))
        .await
        .unwrap();

    assert_eq!(store.get_largest_version().await.unwrap(), Some(4));
    assert!(store.version_exists(1).await.unwrap());

    let metadata = store.get_version_metadata(1).await.unwrap().unwrap();
    assert_eq!(metadata.version_description, "baseline");
    assert_eq!(metadata.model.as_deref(), Some("gpt-4o"));

    assert_eq!(store.get_all_rewards(Some(1)).await.unwrap(), vec![1.0, 3.0]);
    assert_eq!(store.get_all_rewards(Some(4)).await.unwrap(), vec![5.0]);
    assert_eq!(store.get_all_rewards(None).await.unwrap(), vec![1.0, 3.0, 5.0]);

    assert_eq!(store.count_with_advantage(1).await.unwrap(), 1);
    assert_eq!(store.count_with_advantage(4).await.unwrap(), 1);
    test.close().await;
}

#[tokio::test]
async fn test_recent_with_advantage_respects_conversation_length() {
    let test = setup_test_store();
    let store = &test.store;

    let short = store
        .create_program(evaluated_program("short()", 1, 1.0, Some(0.5)))
        .await
        .unwrap();
    let mut long = evaluated_program("long()", 1, 2.0, Some(0.7));
    long.conversation = long
        .conversation
        .with_turn("step_1()", "ok")
        .with_turn("step_2()", "ok");
    let long = store.create_program(long).await.unwrap();
    store
        .create_program(evaluated_program("no_advantage()", 1, 3.0, None))
        .await
        .unwrap();

    let all = store.sample_recent_with_advantage(1, 10, None).await.unwrap();
    let ids: Vec<_> = all.iter().map(|s| Some(s.id)).collect();
    assert_eq!(ids, vec![long.id, short.id]);

    let limited = store
        .sample_recent_with_advantage(1, 10, Some(3))
        .await
        .unwrap();
    assert_eq!(limited.len(), 1);
    assert_eq!(Some(limited[0].id), short.id);
    assert_eq!(limited[0].advantage, 0.5);

    let newest = store.sample_recent_with_advantage(1, 1, None).await.unwrap();
    assert_eq!(newest.len(), 1);
    assert_eq!(Some(newest[0].id), long.id);
    test.close().await;
}

#[tokio::test]
async fn test_recent_evaluated_is_newest_first() {
    let test = setup_test_store();
    let store = &test.store;

    let mut ids = Vec::new();
    for i in 0..5 {
        let program = store
            .create_program(evaluated_program(&format!("p{i}()"), 1, f64::from(i), None))
            .await
            .unwrap();
        ids.push(program.id);
    }
    store
        .create_program(Program::new("pending()", root_conversation(), 1, "v1"))
        .await
        .unwrap();

    let recent = store.recent_evaluated(1, 3).await.unwrap();
    let recent_ids: Vec<_> = recent.iter().map(|p| p.id).collect();
    assert_eq!(recent_ids, vec![ids[4], ids[3], ids[2]]);
    test.close().await;
}

#[tokio::test]
async fn test_concurrent_inserts_share_the_pool() {
    let test = setup_test_store();
    let store = test.store.clone();

    let root = store
        .create_program(evaluated_program("root()", 1, 1.0, None))
        .await
        .unwrap();

    let writes = (0..8).map(|i| {
        let store = store.clone();
        let mut child = evaluated_program(&format!("child_{i}()"), 1, f64::from(i), Some(0.0));
        child.attach_parent(Some(&root));
        async move { store.create_program(child).await }
    });
    let children = futures::future::try_join_all(writes).await.unwrap();

    assert_eq!(children.len(), 8);
    assert!(children.iter().all(|c| c.depth == 1 && c.parent_id == root.id));
    assert_eq!(store.count_with_advantage(1).await.unwrap(), 8);
    test.close().await;
}
