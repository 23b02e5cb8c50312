mod common;

use arborist::domain::models::{SamplerConfig, SamplerKind};
use arborist::domain::ports::{ParentSampler, ProgramStore, SamplerError};
use arborist::services::samplers::weighting::{adaptive_strength, compressed_weights, normalize};
use arborist::services::{build_sampler, DiversitySampler, RewardWeightedSampler};
use std::collections::HashSet;

use common::{evaluated_program, setup_test_store};

#[tokio::test]
async fn test_reward_weighted_returns_none_without_candidates() {
    let test = setup_test_store();
    let sampler = RewardWeightedSampler::new(test.store.clone(), &SamplerConfig::default()).unwrap();

    assert!(sampler.sample_parent(1).await.unwrap().is_none());

    // Evaluated but without an advantage: still not a candidate.
    test.store
        .create_program(evaluated_program("x = 1", 1, 3.0, None))
        .await
        .unwrap();
    assert!(sampler.sample_parent(1).await.unwrap().is_none());
    test.close().await;
}

#[tokio::test]
async fn test_reward_weighted_samples_within_version() {
    let test = setup_test_store();
    let store = &test.store;

    let mut version_one = HashSet::new();
    for i in 0..4 {
        let created = store
            .create_program(evaluated_program(&format!("p{i}()"), 1, f64::from(i), Some(f64::from(i))))
            .await
            .unwrap();
        version_one.insert(created.id);
    }
    store
        .create_program(evaluated_program("other()", 2, 100.0, Some(100.0)))
        .await
        .unwrap();

    let config = SamplerConfig {
        compression_strength: Some(0.5),
        ..SamplerConfig::default()
    };
    let sampler = RewardWeightedSampler::new(store.clone(), &config).unwrap();
    for _ in 0..20 {
        let parent = sampler.sample_parent(1).await.unwrap().expect("a parent");
        assert!(version_one.contains(&parent.id));
        assert_eq!(parent.version, 1);
        assert!(parent.state.is_some());
    }
    test.close().await;
}

#[tokio::test]
async fn test_reward_weighted_skips_long_conversations() {
    let test = setup_test_store();
    let store = &test.store;

    let short = store
        .create_program(evaluated_program("short()", 1, 1.0, Some(0.0)))
        .await
        .unwrap();
    let mut long = evaluated_program("long()", 1, 9.0, Some(5.0));
    long.conversation = long.conversation.with_turn("a()", "ok").with_turn("b()", "ok");
    store.create_program(long).await.unwrap();

    let config = SamplerConfig {
        compression_strength: Some(1.0),
        max_conversation_length: Some(1),
        ..SamplerConfig::default()
    };
    let sampler = RewardWeightedSampler::new(store.clone(), &config).unwrap();
    assert_eq!(sampler.max_messages(), Some(3));

    for _ in 0..10 {
        let parent = sampler.sample_parent(1).await.unwrap().unwrap();
        assert_eq!(parent.id, short.id);
    }
    test.close().await;
}

#[test]
fn test_equal_rewards_give_equal_weights() {
    let weights = normalize(&compressed_weights(&[5.0, 5.0, 5.0, 5.0], 0.8)).unwrap();
    assert_eq!(weights.len(), 4);
    for w in &weights {
        assert!((w - 0.25).abs() < 1e-12);
    }
}

#[test]
fn test_adaptive_strength_cycle() {
    assert!((adaptive_strength(0, 200) - 0.5).abs() < 1e-12);
    assert!((adaptive_strength(50, 200) - 1.0).abs() < 1e-12);
    assert!((adaptive_strength(150, 200)).abs() < 1e-12);
}

#[test]
fn test_invalid_parameters_are_rejected() {
    let test = setup_test_store();

    let bad_strength = SamplerConfig {
        compression_strength: Some(1.5),
        ..SamplerConfig::default()
    };
    assert!(matches!(
        RewardWeightedSampler::new(test.store.clone(), &bad_strength),
        Err(SamplerError::InvalidParameter(_))
    ));

    let bad_period = SamplerConfig {
        adaptive_period: 0,
        ..SamplerConfig::default()
    };
    assert!(RewardWeightedSampler::new(test.store.clone(), &bad_period).is_err());

    let bad_window = SamplerConfig {
        kind: SamplerKind::Diversity,
        window_size: 0,
        ..SamplerConfig::default()
    };
    assert!(build_sampler(&bad_window, test.store.clone()).is_err());

    let bad_temperature = SamplerConfig {
        temperature: -1.0,
        ..SamplerConfig::default()
    };
    assert!(DiversitySampler::new(test.store.clone(), &bad_temperature).is_err());
}

#[tokio::test]
async fn test_diversity_sampler_greedy_picks_rare_outcome() {
    let test = setup_test_store();
    let store = &test.store;

    for i in 0..3 {
        let mut common_outcome = evaluated_program(&format!("iron_{i}()"), 1, 2.0, None);
        common_outcome.achievements.insert("iron-plate".to_string(), 1.0);
        store.create_program(common_outcome).await.unwrap();
    }
    let mut rare = evaluated_program("steel()", 1, 2.0, None);
    rare.achievements.insert("steel-plate".to_string(), 1.0);
    let rare = store.create_program(rare).await.unwrap();
    assert_eq!(store.recent_evaluated(1, 10).await.unwrap().len(), 4);

    let config = SamplerConfig {
        kind: SamplerKind::Diversity,
        temperature: 0.0,
        window_size: 10,
        ..SamplerConfig::default()
    };
    let sampler = build_sampler(&config, store.clone()).unwrap();
    for _ in 0..5 {
        let parent = sampler.sample_parent(1).await.unwrap().unwrap();
        assert_eq!(parent.id, rare.id);
    }

    assert!(sampler.sample_parent(7).await.unwrap().is_none());
    test.close().await;
}

#[tokio::test]
async fn test_diversity_sampler_window_limits_candidates() {
    let test = setup_test_store();
    let store = &test.store;

    store
        .create_program(evaluated_program("old_best()", 1, 100.0, None))
        .await
        .unwrap();
    let mut newest = Vec::new();
    for (i, value) in [1.0, 3.0, 2.0].into_iter().enumerate() {
        let created = store
            .create_program(evaluated_program(&format!("new_{i}()"), 1, value, None))
            .await
            .unwrap();
        newest.push(created.id);
    }

    let window: Vec<_> = store
        .recent_evaluated(1, 3)
        .await
        .unwrap()
        .iter()
        .map(|p| p.id)
        .collect();
    assert_eq!(window, vec![newest[2], newest[1], newest[0]]);

    let config = SamplerConfig {
        kind: SamplerKind::Diversity,
        temperature: 0.0,
        window_size: 3,
        ..SamplerConfig::default()
    };
    let sampler = DiversitySampler::new(store.clone(), &config).unwrap();
    for _ in 0..5 {
        let parent = sampler.sample_parent(1).await.unwrap().unwrap();
        assert_eq!(parent.id, newest[1]);
    }
    test.close().await;
}
