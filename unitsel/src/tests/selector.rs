use std::sync::Arc;

use crate::cart::{DecisionTree, LeafPayload, Node, Test};
use crate::cost::{JoinCost, JoinCostFeatures, TargetCost, WeightedTargetCost};
use crate::database::UnitDatabase;
use crate::features::{FeatureDef, FeatureSchema};
use crate::index::StopPolicy;
use crate::selector::config::{CandidateSourceConfig, SelectorConfig, TargetCostConfig};
use crate::selector::worker::{FallbackEvent, FallbackKind, SelectorState};
use crate::selector::UnitSelector;
use crate::tests::{test_database, TREE_JSON};
use crate::voice::Voice;

const KASA: [[&str; 6]; 4] = [
    ["k", "no", "a", "kasa", "110", "600"],
    ["a", "yes", "s", "kasa", "130", "900"],
    ["s", "no", "a", "kasa", "120", "700"],
    ["a", "no", "_", "kasa", "100", "800"],
];

fn phone_tree(db: &UnitDatabase, splits: &[(&str, Vec<u32>)], rest: Vec<u32>) -> DecisionTree {
    let schema = db.schema();
    let mut nodes = vec![];
    for (i, (label, units)) in splits.iter().enumerate() {
        let base = (2 * i) as u32;
        nodes.push(Node::Decision {
            feature: 0,
            test: Test::Equals(schema.value_index(0, label).unwrap()),
            yes: base + 1,
            no: base + 2,
        });
        nodes.push(Node::Leaf(LeafPayload::Units(units.clone())));
    }
    nodes.push(Node::Leaf(LeafPayload::Units(rest)));
    DecisionTree::new(schema, nodes).unwrap()
}

fn test_voice() -> Voice {
    let db = test_database();
    let units = phone_tree(&db, &[("a", vec![2, 4, 6]), ("u", vec![])], vec![0, 5]);
    let dead = phone_tree(&db, &[("i", vec![12])], vec![7, 11]);
    let gap = phone_tree(&db, &[("i", vec![12]), ("u", vec![])], vec![0, 5]);
    let model = DecisionTree::from_external(TREE_JSON.as_bytes(), db.schema()).unwrap();
    let mut voice = Voice::new(db);
    voice.add_tree("units", units).unwrap();
    voice.add_tree("dead", dead).unwrap();
    voice.add_tree("gap", gap).unwrap();
    voice.add_tree("phone_model", model).unwrap();
    voice
}

fn selector(config: SelectorConfig) -> UnitSelector {
    UnitSelector::new(Arc::new(test_voice()), config).unwrap()
}

fn phone_level() -> SelectorConfig {
    SelectorConfig {
        candidates: CandidateSourceConfig::Index {
            policy: StopPolicy::MaxLevel(1),
        },
        ..Default::default()
    }
}

/// 元の録音で連続するターゲット列が、そのまま選ばれることのテスト
#[test]
fn test_contiguous_selection() {
    let selector = selector(SelectorConfig::default());
    let mut worker = selector.new_worker();
    for t in &KASA {
        worker.push_target_raw(t).unwrap();
    }
    assert_eq!(worker.select().unwrap(), SelectorState::Done);

    let units: Vec<u32> = worker.selected().iter().map(|s| s.unit).collect();
    assert_eq!(units, vec![1, 2, 3, 4]);
    for (i, s) in worker.selected().iter().enumerate() {
        assert_eq!(s.target_index, i);
        assert!(!s.is_filler);
    }
    assert_eq!(worker.total_cost(), 0.0);
    assert!(worker.fallbacks().is_empty());

    let stats = worker.stats().unwrap();
    assert_eq!(stats.num_targets, 4);
    assert_eq!(stats.num_fillers, 0);
    assert_eq!(stats.avg_stretch_len, 4.0);
    assert_eq!(stats.avg_join_cost, 0.0);
    assert_eq!(stats.total_cost, 0.0);
}

/// 3ターゲット×2候補のラティスで、全8経路の総当たりと結果が一致することのテスト
#[test]
fn test_viterbi_optimality() {
    let selector = selector(phone_level());
    let targets = [
        ["u", "no", "_", "uki", "110", "640"],
        ["_", "no", "u", "0", "0", "1000"],
        ["u", "yes", "k", "uki", "130", "600"],
    ];
    let mut worker = selector.new_worker();
    for t in &targets {
        worker.push_target_raw(t).unwrap();
    }
    worker.gather_candidates().unwrap();
    let cands: Vec<Vec<u32>> = (0..3).map(|i| worker.candidates(i).to_vec()).collect();
    // Within a phone, units are ordered by the next split feature.
    assert_eq!(cands, vec![vec![9, 10], vec![5, 0], vec![9, 10]]);
    worker.forward().unwrap();
    worker.backtrace().unwrap();
    worker.finish().unwrap();

    let db = selector.voice().database();
    let schema = db.schema();
    let tc = WeightedTargetCost::new(schema, db.vectors(), None).unwrap();
    let jc = JoinCostFeatures::new(db.join_features(), db.units(), 1.0);
    let vectors: Vec<_> = targets
        .iter()
        .enumerate()
        .map(|(i, t)| schema.encode(t, i as u32).unwrap())
        .collect();
    let t = |i: usize, u: u32| 0.5 * tc.cost(&vectors[i], &db.vectors()[u as usize]);
    let j = |a: u32, b: u32| 0.5 * jc.cost(a, b);

    let mut best = f64::INFINITY;
    let mut path_costs = vec![];
    for &a in &cands[0] {
        for &b in &cands[1] {
            for &c in &cands[2] {
                let cost = t(0, a) + j(a, b) + t(1, b) + j(b, c) + t(2, c);
                best = best.min(cost);
                path_costs.push(((a, b, c), cost));
            }
        }
    }
    assert_eq!(path_costs.len(), 8);
    assert!((worker.total_cost() - best).abs() < 1e-9);

    let s = worker.selected();
    let chosen = (s[0].unit, s[1].unit, s[2].unit);
    let (_, chosen_cost) = path_costs.iter().find(|(p, _)| *p == chosen).unwrap();
    assert!((chosen_cost - best).abs() < 1e-9);
}

/// ビーム幅を広げても総コストが増えないことのテスト
#[test]
fn test_beam_width() {
    let targets = [
        ["k", "no", "a", "aki", "120", "550"],
        ["a", "yes", "s", "kasa", "135", "880"],
        ["s", "no", "a", "kasa", "118", "700"],
        ["a", "no", "_", "kasa", "102", "820"],
        ["_", "no", "0", "0", "0", "1000"],
    ];
    let run = |beam: Option<usize>| {
        let selector = selector(SelectorConfig {
            beam_width: beam,
            ..phone_level()
        });
        let mut worker = selector.new_worker();
        for t in &targets {
            worker.push_target_raw(t).unwrap();
        }
        assert_eq!(worker.select().unwrap(), SelectorState::Done);
        assert_eq!(worker.num_selected(), targets.len());
        worker.total_cost()
    };
    let exact = run(None);
    let costs: Vec<f64> = [1, 2, 3].into_iter().map(|b| run(Some(b))).collect();
    for &c in &costs {
        assert!(c >= exact - 1e-12);
    }
    // No column holds more than three candidates.
    assert_eq!(costs[2], exact);
}

/// 候補がないターゲットで、緩和した検索による回復が一度だけ記録されることのテスト
#[test]
fn test_relaxed_fallback() {
    let selector = selector(SelectorConfig {
        candidates: CandidateSourceConfig::Cart {
            tree: "units".to_string(),
        },
        relaxation: vec![StopPolicy::FullDepth],
        ..Default::default()
    });
    let mut worker = selector.new_worker();
    worker.push_target_raw(&["a", "yes", "u", "kasa", "130", "900"]).unwrap();
    worker.push_target_raw(&["u", "no", "_", "uki", "105", "650"]).unwrap();
    worker.push_target_raw(&["_", "no", "0", "0", "0", "1000"]).unwrap();
    assert_eq!(worker.select().unwrap(), SelectorState::Done);

    assert_eq!(worker.num_selected(), 3);
    assert_eq!(
        worker.fallbacks(),
        &[FallbackEvent {
            target_index: 1,
            kind: FallbackKind::Relaxed {
                policy: StopPolicy::FullDepth,
                candidates: 1,
            },
        }]
    );
    assert_eq!(worker.candidates(1), &[9]);
    assert_eq!(worker.selected()[1].unit, 9);
    assert!(!worker.selected()[1].is_filler);
}

/// 緩和しても候補がない場合にフィラーユニットが使われることのテスト
#[test]
fn test_filler_fallback() {
    let selector = selector(SelectorConfig {
        candidates: CandidateSourceConfig::Cart {
            tree: "units".to_string(),
        },
        ..Default::default()
    });
    assert_eq!(selector.filler(), 0);

    let mut worker = selector.new_worker();
    worker.push_target_raw(&["a", "yes", "u", "kasa", "130", "900"]).unwrap();
    worker.push_target_raw(&["u", "no", "_", "uki", "105", "650"]).unwrap();
    worker.push_target_raw(&["_", "no", "0", "0", "0", "1000"]).unwrap();
    assert_eq!(worker.select().unwrap(), SelectorState::Done);

    assert_eq!(worker.num_selected(), 3);
    assert_eq!(
        worker.fallbacks(),
        &[FallbackEvent {
            target_index: 1,
            kind: FallbackKind::Filler,
        }]
    );
    let s = worker.selected()[1];
    assert_eq!(s.unit, 0);
    assert_eq!(s.target_index, 1);
    assert!(s.is_filler);
    assert_eq!(worker.stats().unwrap().num_fillers, 1);
}

/// 有限のコストの経路がない列がフィラーで置き換えられることのテスト
#[test]
fn test_dead_end() {
    let selector = selector(SelectorConfig {
        candidates: CandidateSourceConfig::Cart {
            tree: "dead".to_string(),
        },
        ..Default::default()
    });
    let mut worker = selector.new_worker();
    worker.push_target_raw(&["k", "no", "i", "uki", "120", "550"]).unwrap();
    worker.push_target_raw(&["i", "no", "_", "uki", "100", "300"]).unwrap();
    assert_eq!(worker.select().unwrap(), SelectorState::Done);

    assert_eq!(
        worker.fallbacks(),
        &[FallbackEvent {
            target_index: 1,
            kind: FallbackKind::DeadEnd,
        }]
    );
    let s = worker.selected();
    assert_eq!(s.len(), 2);
    assert!(s[0].unit == 7 || s[0].unit == 11);
    assert_eq!(s[1].unit, 0);
    assert!(s[1].is_filler);
    assert!(worker.total_cost().is_finite());
}

/// キャンセルされた選択が`Aborted`で終わり、リセット後に再実行できることのテスト
#[test]
fn test_cancel() {
    let selector = selector(SelectorConfig::default());
    let mut worker = selector.new_worker();
    for t in &KASA {
        worker.push_target_raw(t).unwrap();
    }

    let handle = worker.cancel_handle();
    std::thread::spawn(move || handle.cancel()).join().unwrap();
    assert_eq!(worker.select().unwrap(), SelectorState::Aborted);
    assert_eq!(worker.state(), SelectorState::Aborted);
    assert!(worker.selected().is_empty());
    assert!(worker.forward().is_err());

    worker.reset_targets();
    assert_eq!(worker.state(), SelectorState::Idle);
    for t in &KASA {
        worker.push_target_raw(t).unwrap();
    }
    assert_eq!(worker.select().unwrap(), SelectorState::Done);
    assert_eq!(worker.num_selected(), 4);
}

/// 状態の順序に反する呼び出しがエラーになることのテスト
#[test]
fn test_state_machine() {
    let selector = selector(SelectorConfig::default());
    let mut worker = selector.new_worker();
    assert_eq!(worker.state(), SelectorState::Idle);
    assert!(worker.forward().is_err());
    assert!(worker.backtrace().is_err());
    assert!(worker.finish().is_err());

    worker.push_target_raw(&KASA[0]).unwrap();
    assert_eq!(worker.gather_candidates().unwrap(), SelectorState::CandidatesGathered);
    assert!(worker.push_target_raw(&KASA[1]).is_err());
    assert!(worker.gather_candidates().is_err());
    assert_eq!(worker.forward().unwrap(), SelectorState::DPForward);
    assert_eq!(worker.backtrace().unwrap(), SelectorState::Backtraced);
    assert_eq!(worker.num_selected(), 1);
    assert!(worker.stats().is_none());
    assert_eq!(worker.finish().unwrap(), SelectorState::Done);
    assert!(worker.select().is_err());
}

/// ターゲットがない場合に空の結果で終わることのテスト
#[test]
fn test_empty_utterance() {
    let selector = selector(SelectorConfig::default());
    let mut worker = selector.new_worker();
    assert_eq!(worker.select().unwrap(), SelectorState::Done);
    assert!(worker.selected().is_empty());
    assert_eq!(worker.total_cost(), 0.0);
}

/// 未知の値を含むターゲットが選択を失敗させないことのテスト
#[test]
fn test_unseen_target_value() {
    let selector = selector(SelectorConfig::default());
    let mut worker = selector.new_worker();
    worker.push_target_raw(&["o", "yes", "x", "sora", "?", "900"]).unwrap();
    worker.push_target_raw(&KASA[0]).unwrap();
    assert!(worker.push_target_raw(&["a"]).is_err());
    assert_eq!(worker.select().unwrap(), SelectorState::Done);
    assert_eq!(worker.num_selected(), 2);
}

/// 決定木によるターゲットコストを使った選択のテスト
#[test]
fn test_tree_target_cost() {
    let selector = selector(SelectorConfig {
        target_cost: TargetCostConfig::Cart {
            tree: "phone_model".to_string(),
            feature: "phone".to_string(),
            weight: 1.0,
        },
        ..Default::default()
    });
    let mut worker = selector.new_worker();
    for t in &KASA {
        worker.push_target_raw(t).unwrap();
    }
    assert_eq!(worker.select().unwrap(), SelectorState::Done);
    let units: Vec<u32> = worker.selected().iter().map(|s| s.unit).collect();
    assert_eq!(units, vec![1, 2, 3, 4]);
    assert!(worker.total_cost() > 0.0);
}

/// 音声に対する設定の検証のテスト
#[test]
fn test_invalid_config() {
    let voice = Arc::new(test_voice());
    let new = |config| UnitSelector::new(voice.clone(), config);

    assert!(new(SelectorConfig {
        candidates: CandidateSourceConfig::Cart {
            tree: "missing".to_string()
        },
        ..Default::default()
    })
    .is_err());
    assert!(new(SelectorConfig {
        candidates: CandidateSourceConfig::Cart {
            tree: "phone_model".to_string()
        },
        ..Default::default()
    })
    .is_err());
    assert!(new(SelectorConfig {
        target_cost: TargetCostConfig::Cart {
            tree: "units".to_string(),
            feature: "phone".to_string(),
            weight: 1.0,
        },
        ..Default::default()
    })
    .is_err());
    assert!(new(SelectorConfig {
        feature_weights: Some(vec![1.0; 5]),
        ..Default::default()
    })
    .is_err());
    assert!(new(SelectorConfig {
        filler_phone: "pau".to_string(),
        ..Default::default()
    })
    .is_err());
    assert!(new(SelectorConfig {
        beam_width: Some(0),
        ..Default::default()
    })
    .is_err());
    assert!(new(SelectorConfig {
        feature_weights: Some(vec![1.0, 0.0, 0.0, 0.0, 0.0, 0.0]),
        ..Default::default()
    })
    .is_ok());
}

/// 選択器とワーカーがスレッド間で共有・移動できることのテスト
#[test]
fn test_shared_selector() {
    fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<UnitSelector>();

    let selector = selector(SelectorConfig::default());
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let selector = selector.clone();
            std::thread::spawn(move || {
                let mut worker = selector.new_worker();
                for t in &KASA {
                    worker.push_target_raw(t).unwrap();
                }
                worker.select().unwrap();
                worker.selected().iter().map(|s| s.unit).collect::<Vec<_>>()
            })
        })
        .collect();
    for h in handles {
        assert_eq!(h.join().unwrap(), vec![1, 2, 3, 4]);
    }
}

/// 重み0の接続コストでは無限大の接続も経路を妨げないことのテスト
#[test]
fn test_zero_join_weight() {
    let selector = selector(SelectorConfig {
        join_weight: 0.0,
        candidates: CandidateSourceConfig::Cart {
            tree: "dead".to_string(),
        },
        ..Default::default()
    });
    let mut worker = selector.new_worker();
    worker.push_target_raw(&["k", "no", "i", "uki", "120", "550"]).unwrap();
    worker.push_target_raw(&["i", "no", "_", "uki", "100", "0"]).unwrap();
    assert_eq!(worker.select().unwrap(), SelectorState::Done);
    assert!(worker.fallbacks().is_empty());
    assert_eq!(worker.selected()[1].unit, 12);
}

/// 候補の収集で回復したターゲットが行き止まりになっても、記録が一つだけであることのテスト
#[test]
fn test_single_event_per_target() {
    let targets = [
        ["i", "no", "u", "uki", "100", "300"],
        ["u", "no", "_", "uki", "105", "650"],
    ];
    let run = |relaxation: Vec<StopPolicy>| {
        let selector = selector(SelectorConfig {
            candidates: CandidateSourceConfig::Cart {
                tree: "gap".to_string(),
            },
            relaxation,
            ..Default::default()
        });
        let mut worker = selector.new_worker();
        for t in &targets {
            worker.push_target_raw(t).unwrap();
        }
        assert_eq!(worker.select().unwrap(), SelectorState::Done);
        assert_eq!(worker.num_selected(), 2);
        assert_eq!(worker.selected()[0].unit, 12);
        assert_eq!(worker.selected()[1].unit, 0);
        assert!(worker.selected()[1].is_filler);
        worker.fallbacks().to_vec()
    };
    let expected = vec![FallbackEvent {
        target_index: 1,
        kind: FallbackKind::DeadEnd,
    }];

    // The filler follows the zero-duration unit 12.
    assert_eq!(run(vec![]), expected);
    // Relaxed retrieval gives unit 9, which cannot follow unit 12 either.
    assert_eq!(run(vec![StopPolicy::FullDepth]), expected);
}

/// 音声のスキーマに適合しない決定木が追加できないことのテスト
#[test]
fn test_tree_from_other_schema() {
    let mut voice = test_voice();
    let schema = voice.database().schema();
    let mut defs = schema.defs().to_vec();
    defs.push(FeatureDef::continuous("energy"));
    let wider = FeatureSchema::from_defs(defs).unwrap();

    let tree = DecisionTree::new(
        &wider,
        vec![
            Node::Decision {
                feature: 6,
                test: Test::LessEq(0.5),
                yes: 1,
                no: 2,
            },
            Node::Leaf(LeafPayload::Units(vec![0])),
            Node::Leaf(LeafPayload::Units(vec![1])),
        ],
    )
    .unwrap();
    assert!(voice.add_tree("energy", tree).is_err());
    assert!(voice.tree("energy").is_none());

    let other = FeatureSchema::from_defs(vec![FeatureDef::enum8(
        "phone",
        ["0", "_", "a", "i", "u", "k", "s", "o", "e"],
    )])
    .unwrap();
    let tree = DecisionTree::new(
        &other,
        vec![
            Node::Decision {
                feature: 0,
                test: Test::Equals(8),
                yes: 1,
                no: 2,
            },
            Node::Leaf(LeafPayload::Units(vec![])),
            Node::Leaf(LeafPayload::Units(vec![0])),
        ],
    )
    .unwrap();
    assert!(voice.add_tree("vowels", tree).is_err());
}
