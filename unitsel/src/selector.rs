//! Viterbi探索によるユニット選択器
//!
//! ターゲット列ごとに候補ユニットを集め、重み付きのターゲットコストと接続コストの
//! 和が最小となるユニット列を動的計画法で求めます。
//!
//! # 例
//!
//! ```no_run
//! use std::sync::Arc;
//! use unitsel::{SelectorConfig, UnitDatabase, UnitSelector, Voice};
//!
//! let db = UnitDatabase::from_path("path/to/voice.db")?;
//! let voice = Arc::new(Voice::new(db));
//! let selector = UnitSelector::new(voice, SelectorConfig::default())?;
//! let mut worker = selector.new_worker();
//!
//! worker.push_target_raw(&["a", "1", "120.0"])?;
//! worker.push_target_raw(&["i", "0", "110.0"])?;
//! worker.select()?;
//!
//! for u in worker.selected() {
//!     println!("{} -> {}", u.target_index, u.unit);
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
pub mod config;
pub(crate) mod lattice;
pub mod worker;

use std::sync::Arc;

use crate::cart::{DecisionTree, LeafPayload};
use crate::cost::{JoinCostFeatures, TargetCostWrapper, TreeTargetCost, WeightedTargetCost};
use crate::errors::{Result, UnitSelError};
use crate::features::FeatureVector;
use crate::index::StopPolicy;
use crate::selector::config::{CandidateSourceConfig, SelectorConfig, TargetCostConfig};
use crate::selector::worker::Worker;
use crate::voice::Voice;

/// 解決済みの候補の取得方法
#[derive(Debug, Clone)]
pub(crate) enum CandidateSource {
    Index(StopPolicy),
    Tree(Arc<DecisionTree>),
}

/// ユニット選択器。
///
/// 音声と解決済みのコスト関数を保持します。複製は安価で、スレッド間で共有できます。
/// 実際の探索はリクエストごとに[`Worker`]で行います。
#[derive(Clone)]
pub struct UnitSelector {
    voice: Arc<Voice>,
    config: Arc<SelectorConfig>,
    source: CandidateSource,
    target_cost: Arc<TargetCostWrapper>,
    filler: u32,
}

impl UnitSelector {
    /// 新しい選択器を作成します。
    ///
    /// 設定はここで一度だけ音声に対して検証され、名前で指定された決定木と
    /// コスト関数が解決されます。
    ///
    /// # 引数
    ///
    /// * `voice` - 共有される音声
    /// * `config` - 選択器の設定
    ///
    /// # エラー
    ///
    /// 以下の場合にエラーを返します:
    /// - 設定の値が不正な場合
    /// - 名前の決定木や特徴量が音声に存在しない場合
    /// - 特徴量の重みの数がスキーマと異なる場合
    /// - 候補用の決定木にユニット葉以外の葉や範囲外のユニットがある場合
    /// - フィラーの音素を持つユニットがない場合
    pub fn new(voice: Arc<Voice>, config: SelectorConfig) -> Result<Self> {
        config.validate()?;
        let db = voice.database();

        let source = match &config.candidates {
            CandidateSourceConfig::Index { policy } => CandidateSource::Index(*policy),
            CandidateSourceConfig::Cart { tree } => {
                let tree = Self::lookup_tree(&voice, tree)?;
                if tree
                    .leaves()
                    .any(|(_, p)| !matches!(p, LeafPayload::Units(_)))
                {
                    return Err(UnitSelError::invalid_argument(
                        "candidates",
                        "candidate tree must have unit leaves only",
                    ));
                }
                if !tree.verify_units(db.num_units()) {
                    return Err(UnitSelError::invalid_argument(
                        "candidates",
                        "candidate tree refers to units outside the inventory",
                    ));
                }
                CandidateSource::Tree(tree)
            }
        };

        let base = WeightedTargetCost::new(
            db.schema(),
            db.vectors(),
            config.feature_weights.as_deref(),
        )?;
        let target_cost = match &config.target_cost {
            TargetCostConfig::Weighted => TargetCostWrapper::Weighted(base),
            TargetCostConfig::Cart {
                tree,
                feature,
                weight,
            } => {
                let tree = Self::lookup_tree(&voice, tree)?;
                TargetCostWrapper::Tree(TreeTargetCost::new(
                    base,
                    tree,
                    db.schema(),
                    feature,
                    *weight,
                )?)
            }
        };

        let filler = db.find_phone(&config.filler_phone).ok_or_else(|| {
            UnitSelError::invalid_argument(
                "filler_phone",
                format!("no unit has phone '{}'", config.filler_phone),
            )
        })?;

        Ok(Self {
            voice,
            config: Arc::new(config),
            source,
            target_cost: Arc::new(target_cost),
            filler,
        })
    }

    fn lookup_tree(voice: &Voice, name: &str) -> Result<Arc<DecisionTree>> {
        voice.tree(name).cloned().ok_or_else(|| {
            UnitSelError::invalid_argument("config", format!("unknown tree: {name}"))
        })
    }

    /// 新しいワーカーを作成します。
    pub fn new_worker(&self) -> Worker {
        Worker::new(self.clone())
    }

    /// 共有された音声
    #[inline(always)]
    pub fn voice(&self) -> &Voice {
        &self.voice
    }

    /// 設定
    #[inline(always)]
    pub fn config(&self) -> &SelectorConfig {
        &self.config
    }

    /// フィラーユニットの番号
    #[inline(always)]
    pub fn filler(&self) -> u32 {
        self.filler
    }

    #[inline(always)]
    pub(crate) fn source(&self) -> &CandidateSource {
        &self.source
    }

    #[inline(always)]
    pub(crate) fn target_cost(&self) -> &TargetCostWrapper {
        &self.target_cost
    }

    pub(crate) fn join_cost(&self) -> JoinCostFeatures<'_> {
        let db = self.voice.database();
        JoinCostFeatures::new(db.join_features(), db.units(), self.config.join_base_penalty)
    }

    /// ターゲットの特徴量を`name=value`の形で並べます。ログ用。
    pub(crate) fn describe(&self, target: &FeatureVector) -> String {
        let schema = self.voice.database().schema();
        let mut out = String::new();
        for (i, def) in schema.defs().iter().enumerate() {
            if i != 0 {
                out.push(' ');
            }
            out.push_str(def.name());
            out.push('=');
            if def.kind().is_enum() {
                let v = usize::from(target.enum_value(i));
                out.push_str(def.values().get(v).map_or("?", String::as_str));
            } else {
                out.push_str(&target.continuous(i).to_string());
            }
        }
        out
    }
}
