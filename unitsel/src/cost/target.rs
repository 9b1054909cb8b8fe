//! ターゲットコスト関数

use std::sync::Arc;

use crate::cart::{DecisionTree, LeafPayload};
use crate::cost::TargetCost;
use crate::errors::{Result, UnitSelError};
use crate::features::{FeatureKind, FeatureSchema, FeatureVector, WeightFunction};

/// 特徴量ごとの重み付き不一致の和。
///
/// - 列挙型: 類似度行列があればその値、なければ一致0・不一致1
/// - 連続値: 重み関数の値。`linear`はインベントリ上の値域で正規化される。
///   どちらかがNaNの特徴量は無視される。
#[derive(Debug, Clone)]
pub struct WeightedTargetCost {
    weights: Vec<f32>,
    kinds: Vec<FeatureKind>,
    weight_fns: Vec<WeightFunction>,
    similarity: Vec<Option<(usize, Vec<f32>)>>,
    scales: Vec<f32>,
}

impl WeightedTargetCost {
    /// 新しいインスタンスを作成します。
    ///
    /// # 引数
    ///
    /// * `schema` - スキーマ
    /// * `vectors` - インベントリの特徴ベクトル（連続値の正規化に使用）
    /// * `weights` - 特徴量ごとの重み。`None`の場合はスキーマの重みを使う
    ///
    /// # エラー
    ///
    /// 重みの数がスキーマの特徴量数と異なる場合、または重みが負の場合にエラーを返します。
    pub fn new(schema: &FeatureSchema, vectors: &[FeatureVector], weights: Option<&[f32]>) -> Result<Self> {
        let weights = match weights {
            Some(w) => {
                if w.len() != schema.len() {
                    return Err(UnitSelError::invalid_argument(
                        "feature_weights",
                        format!("expected {} weights, got {}", schema.len(), w.len()),
                    ));
                }
                if w.iter().any(|x| !(x.is_finite() && *x >= 0.0)) {
                    return Err(UnitSelError::invalid_argument(
                        "feature_weights",
                        "weights must be finite and non-negative",
                    ));
                }
                w.to_vec()
            }
            None => schema.defs().iter().map(|d| d.weight()).collect(),
        };

        let mut scales = vec![1.0; schema.len()];
        for (i, def) in schema.defs().iter().enumerate() {
            if def.kind() != FeatureKind::Continuous {
                continue;
            }
            let (min, max) = vectors
                .iter()
                .map(|v| v.continuous(i))
                .filter(|x| !x.is_nan())
                .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), x| (lo.min(x), hi.max(x)));
            if max > min {
                scales[i] = max - min;
            }
        }

        Ok(Self {
            weights,
            kinds: schema.defs().iter().map(|d| d.kind()).collect(),
            weight_fns: schema.defs().iter().map(|d| d.weight_fn()).collect(),
            similarity: schema
                .defs()
                .iter()
                .map(|d| d.similarity_matrix().map(|m| (d.values().len(), m.to_vec())))
                .collect(),
            scales,
        })
    }

    /// 特徴量ごとの重みを返します。
    pub fn weights(&self) -> &[f32] {
        &self.weights
    }
}

impl TargetCost for WeightedTargetCost {
    fn cost(&self, target: &FeatureVector, candidate: &FeatureVector) -> f64 {
        let mut cost = 0.0;
        for (i, &w) in self.weights.iter().enumerate() {
            if w == 0.0 {
                continue;
            }
            let d = match self.kinds[i] {
                FeatureKind::Enum8 | FeatureKind::Enum16 => {
                    let (t, c) = (target.enum_value(i), candidate.enum_value(i));
                    match &self.similarity[i] {
                        Some((n, m)) => f64::from(m[usize::from(t) * n + usize::from(c)]),
                        None => f64::from(u8::from(t != c)),
                    }
                }
                FeatureKind::Continuous => {
                    let (t, c) = (target.continuous(i), candidate.continuous(i));
                    if t.is_nan() || c.is_nan() {
                        continue;
                    }
                    match self.weight_fns[i] {
                        WeightFunction::Linear => {
                            WeightFunction::Linear.cost(t, c) / f64::from(self.scales[i])
                        }
                        f => f.cost(t, c),
                    }
                }
            };
            cost += f64::from(w) * d;
        }
        cost
    }
}

/// 決定木の予測分布を加味したターゲットコスト。
///
/// ターゲットが到達する分布葉から、候補の出力特徴量の値の確率`P`を引き、
/// 重み付き特徴量コストに `weight * (1 - P)` を加えます。
#[derive(Debug, Clone)]
pub struct TreeTargetCost {
    base: WeightedTargetCost,
    tree: Arc<DecisionTree>,
    feature: usize,
    weight: f64,
}

impl TreeTargetCost {
    /// 新しいインスタンスを作成します。
    ///
    /// # 引数
    ///
    /// * `base` - 加算の基になる重み付き特徴量コスト
    /// * `tree` - 分布葉だけを持つ決定木
    /// * `schema` - スキーマ
    /// * `feature` - 予測される列挙型特徴量の名前
    /// * `weight` - 予測項の重み
    ///
    /// # エラー
    ///
    /// 特徴量が存在しないか連続値の場合、木にユニット葉がある場合、
    /// または重みが負の場合にエラーを返します。
    pub fn new(
        base: WeightedTargetCost,
        tree: Arc<DecisionTree>,
        schema: &FeatureSchema,
        feature: &str,
        weight: f64,
    ) -> Result<Self> {
        let idx = schema.feature_index(feature).ok_or_else(|| {
            UnitSelError::invalid_argument("target_cost", format!("unknown feature: {feature}"))
        })?;
        if !schema.feature(idx).kind().is_enum() {
            return Err(UnitSelError::invalid_argument(
                "target_cost",
                format!("predicted feature must be enumerated: {feature}"),
            ));
        }
        if tree
            .leaves()
            .any(|(_, p)| !matches!(p, LeafPayload::Distribution(_)))
        {
            return Err(UnitSelError::invalid_argument(
                "target_cost",
                "tree must have distribution leaves only",
            ));
        }
        if !(weight.is_finite() && weight >= 0.0) {
            return Err(UnitSelError::invalid_argument(
                "target_cost",
                format!("weight must be finite and non-negative: {weight}"),
            ));
        }
        Ok(Self {
            base,
            tree,
            feature: idx,
            weight,
        })
    }
}

impl TreeTargetCost {
    /// ターゲットが到達する葉を返します。
    #[inline(always)]
    pub fn leaf(&self, target: &FeatureVector) -> &LeafPayload {
        self.tree.evaluate(target)
    }

    /// [`Self::leaf`]で求めた葉を使ってコストを計算します。
    ///
    /// 同じターゲットに対する多数の候補を評価する場合、木の探索は一度で済みます。
    pub fn cost_at_leaf(&self, target: &FeatureVector, leaf: &LeafPayload, candidate: &FeatureVector) -> f64 {
        let value = candidate.enum_value(self.feature);
        let p = match leaf {
            LeafPayload::Distribution(dist) => dist
                .iter()
                .find(|(v, _)| *v == value)
                .map_or(0.0, |(_, p)| f64::from(*p)),
            LeafPayload::Units(_) => 0.0,
        };
        self.base.cost(target, candidate) + self.weight * (1.0 - p)
    }
}

impl TargetCost for TreeTargetCost {
    fn cost(&self, target: &FeatureVector, candidate: &FeatureVector) -> f64 {
        self.cost_at_leaf(target, self.leaf(target), candidate)
    }
}
