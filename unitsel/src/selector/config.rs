//! 選択器の設定
//!
//! 設定は名前付きフィールドを持つJSONレコードで、全てのフィールドに既定値があります。
//! 候補の取得方法とターゲットコストは`kind`タグで選ぶ列挙型で、選択器の構築時に
//! 一度だけ解決されます。
//!
//! ```json
//! {
//!   "target_weight": 0.5,
//!   "join_weight": 0.5,
//!   "beam_width": 20,
//!   "candidates": { "kind": "index", "policy": "full_depth" },
//!   "min_candidates": 3,
//!   "relaxation": [{ "min_units": 5 }, { "max_level": 1 }],
//!   "target_cost": { "kind": "weighted" }
//! }
//! ```

use std::io::Read;

use serde::Deserialize;

use crate::errors::{Result, UnitSelError};
use crate::index::StopPolicy;

/// 候補の取得方法。
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case", deny_unknown_fields)]
pub enum CandidateSourceConfig {
    /// 特徴量インデックスを指定の停止方針で検索する
    Index {
        #[serde(default)]
        policy: StopPolicy,
    },
    /// 名前付き決定木のユニット葉を使う
    Cart { tree: String },
}

impl Default for CandidateSourceConfig {
    fn default() -> Self {
        Self::Index {
            policy: StopPolicy::FullDepth,
        }
    }
}

/// ターゲットコストの種類。
#[derive(Deserialize, Debug, Default, Clone, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case", deny_unknown_fields)]
pub enum TargetCostConfig {
    /// 特徴量ごとの重み付き不一致
    #[default]
    Weighted,
    /// 重み付き不一致に、決定木が予測する`feature`の確率項を加える
    Cart {
        tree: String,
        feature: String,
        #[serde(default = "default_tree_weight")]
        weight: f64,
    },
}

fn default_tree_weight() -> f64 {
    1.0
}

/// 選択器の設定。
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct SelectorConfig {
    /// ターゲットコストの重み
    pub target_weight: f64,
    /// 接続コストの重み
    pub join_weight: f64,
    /// ビーム幅。`None`なら枝刈りしない
    pub beam_width: Option<usize>,
    /// 候補の取得方法
    pub candidates: CandidateSourceConfig,
    /// これより候補が少なければ緩和した検索を試みる
    pub min_candidates: usize,
    /// 順に試す緩和した停止方針
    pub relaxation: Vec<StopPolicy>,
    /// ターゲットコストの種類
    pub target_cost: TargetCostConfig,
    /// 特徴量ごとの重み。`None`ならスキーマの重みを使う
    pub feature_weights: Option<Vec<f32>>,
    /// 連続しない接続に加える基本ペナルティ
    pub join_base_penalty: f64,
    /// 候補がない場合に使うフィラーユニットの音素
    pub filler_phone: String,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            target_weight: 0.5,
            join_weight: 0.5,
            beam_width: None,
            candidates: CandidateSourceConfig::default(),
            min_candidates: 1,
            relaxation: vec![],
            target_cost: TargetCostConfig::default(),
            feature_weights: None,
            join_base_penalty: 1.0,
            filler_phone: "_".to_string(),
        }
    }
}

impl SelectorConfig {
    /// JSON形式の設定を読み込みます。
    ///
    /// # エラー
    ///
    /// JSONとして不正な場合、未知のフィールドがある場合、
    /// または[`Self::validate`]に失敗した場合にエラーを返します。
    pub fn from_reader<R: Read>(rdr: R) -> Result<Self> {
        let config: Self = serde_json::from_reader(rdr)?;
        config.validate()?;
        Ok(config)
    }

    /// 音声に依存しない値を検証します。
    ///
    /// # エラー
    ///
    /// 重みやペナルティが負または有限でない場合、ビーム幅が0の場合にエラーを返します。
    pub fn validate(&self) -> Result<()> {
        for (name, w) in [
            ("target_weight", self.target_weight),
            ("join_weight", self.join_weight),
            ("join_base_penalty", self.join_base_penalty),
        ] {
            if !(w.is_finite() && w >= 0.0) {
                return Err(UnitSelError::invalid_argument(
                    name,
                    format!("must be finite and non-negative: {w}"),
                ));
            }
        }
        if self.beam_width == Some(0) {
            return Err(UnitSelError::invalid_argument(
                "beam_width",
                "must be positive; omit it for exact search",
            ));
        }
        if let TargetCostConfig::Cart { weight, .. } = self.target_cost {
            if !(weight.is_finite() && weight >= 0.0) {
                return Err(UnitSelError::invalid_argument(
                    "target_cost",
                    format!("weight must be finite and non-negative: {weight}"),
                ));
            }
        }
        Ok(())
    }
}
