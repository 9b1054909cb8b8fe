//! ターゲットコストと接続コスト
//!
//! どちらのコスト関数も純粋で決定的であり、副作用を持ちません。
//! 選択器はこのモジュールのトレイトを通してコストを計算します。
pub(crate) mod join;
pub(crate) mod target;

use crate::cart::LeafPayload;
use crate::features::FeatureVector;

pub use crate::cost::join::{JoinCostFeatures, JoinFeatures};
pub use crate::cost::target::{TreeTargetCost, WeightedTargetCost};

/// ターゲットと候補の不一致を計算するトレイト
pub trait TargetCost {
    /// ターゲットコストを返します。
    ///
    /// # 引数
    ///
    /// * `target` - ターゲットの特徴ベクトル
    /// * `candidate` - 候補ユニットの特徴ベクトル
    ///
    /// # 戻り値
    ///
    /// 0以上のコスト
    fn cost(&self, target: &FeatureVector, candidate: &FeatureVector) -> f64;
}

/// 連続する2ユニットの接続の不一致を計算するトレイト
pub trait JoinCost {
    /// 接続コストを返します。
    ///
    /// # 引数
    ///
    /// * `left` - 左側のユニット番号
    /// * `right` - 右側のユニット番号
    ///
    /// # 戻り値
    ///
    /// 0以上のコスト。接続できない場合は正の無限大
    fn cost(&self, left: u32, right: u32) -> f64;
}

/// 設定で名前により選ばれるターゲットコストのラッパー列挙型
#[derive(Debug, Clone)]
pub enum TargetCostWrapper {
    Weighted(WeightedTargetCost),
    Tree(TreeTargetCost),
}

impl TargetCost for TargetCostWrapper {
    #[inline(always)]
    fn cost(&self, target: &FeatureVector, candidate: &FeatureVector) -> f64 {
        match self {
            Self::Weighted(c) => c.cost(target, candidate),
            Self::Tree(c) => c.cost(target, candidate),
        }
    }
}

impl TargetCostWrapper {
    /// 一つのターゲットに固定したコスト関数を返します。
    ///
    /// 決定木を使うコストでは、ターゲットが到達する葉をここで一度だけ求めます。
    pub(crate) fn for_target<'a>(&'a self, target: &'a FeatureVector) -> PreparedTargetCost<'a> {
        match self {
            Self::Weighted(c) => PreparedTargetCost::Weighted(c, target),
            Self::Tree(c) => PreparedTargetCost::Tree(c, target, c.leaf(target)),
        }
    }
}

/// 一つのターゲットに固定されたターゲットコスト
pub(crate) enum PreparedTargetCost<'a> {
    Weighted(&'a WeightedTargetCost, &'a FeatureVector),
    Tree(&'a TreeTargetCost, &'a FeatureVector, &'a LeafPayload),
}

impl PreparedTargetCost<'_> {
    /// 候補`candidate`のターゲットコストを返します。
    #[inline(always)]
    pub(crate) fn cost(&self, candidate: &FeatureVector) -> f64 {
        match *self {
            Self::Weighted(c, target) => c.cost(target, candidate),
            Self::Tree(c, target, leaf) => c.cost_at_leaf(target, leaf, candidate),
        }
    }
}
