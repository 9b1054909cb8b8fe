//! 決定木（CART）
//!
//! 特徴ベクトルに対する二分木です。内部ノードは列挙型特徴量の等値テスト、
//! または連続値特徴量の閾値テスト（`<=`）を持ち、葉は出力値の分布か
//! ユニット番号のリストを持ちます。
//!
//! 木は外部で学習されたものを読み込むだけで、ここでは構築しません。
//! 永続化形式は[`DecisionTree::read`]を、外部分類器からの変換は
//! [`DecisionTree::from_external`]を参照してください。
mod import;
mod io;

use crate::errors::{Result, UnitSelError};
use crate::features::{FeatureKind, FeatureSchema, FeatureVector};
use crate::utils::FromU32;

pub use crate::cart::import::ExternalTree;

/// 内部ノードのテスト。
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Test {
    /// 値が等しければ真
    Equals(u16),
    /// 値が閾値以下なら真
    LessEq(f32),
}

/// 葉のペイロード。
#[derive(Debug, Clone, PartialEq)]
pub enum LeafPayload {
    /// (出力値, 確率)の組。確率0の出力は含まれない。
    Distribution(Vec<(u16, f32)>),
    /// インベントリのユニット番号。空でもよい。
    Units(Vec<u32>),
}

/// 木のノード。
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    /// 内部ノード
    Decision {
        /// テストする特徴量の位置
        feature: u32,
        /// テスト内容
        test: Test,
        /// テストが真のときの子
        yes: u32,
        /// テストが偽のときの子
        no: u32,
    },
    /// 葉
    Leaf(LeafPayload),
}

/// 読み込み後に不変な決定木。ノード0が根です。
#[derive(Debug, Clone, PartialEq)]
pub struct DecisionTree {
    nodes: Vec<Node>,
    depth: usize,
}

/// 内部ノードのテストがスキーマの特徴量と値の範囲に合うことを確認します。
fn check_test(schema: &FeatureSchema, i: usize, feature: u32, test: &Test) -> Result<()> {
    let f = usize::from_u32(feature);
    if f >= schema.len() {
        return Err(UnitSelError::invalid_format(
            "tree",
            format!("node {i}: unknown feature index {feature}"),
        ));
    }
    let def = schema.feature(f);
    match (test, def.kind()) {
        (Test::Equals(v), FeatureKind::Enum8 | FeatureKind::Enum16) => {
            if usize::from(*v) >= def.values().len() {
                return Err(UnitSelError::invalid_format(
                    "tree",
                    format!("node {i}: value {v} out of range for '{}'", def.name()),
                ));
            }
        }
        (Test::LessEq(t), FeatureKind::Continuous) => {
            if !t.is_finite() {
                return Err(UnitSelError::invalid_format(
                    "tree",
                    format!("node {i}: threshold must be finite"),
                ));
            }
        }
        _ => {
            return Err(UnitSelError::invalid_format(
                "tree",
                format!("node {i}: test does not match the kind of '{}'", def.name()),
            ));
        }
    }
    Ok(())
}

impl DecisionTree {
    /// ノードの配列から決定木を構築します。
    ///
    /// # 引数
    ///
    /// * `schema` - テストが参照するスキーマ
    /// * `nodes` - ノード配列（ノード0が根）
    ///
    /// # エラー
    ///
    /// 以下の場合にエラーを返します:
    /// - 特徴量の位置やテスト値がスキーマの範囲外の場合
    /// - 等値テストが連続値特徴量に、閾値テストが列挙型特徴量に使われている場合
    /// - ノード配列が木を成さない場合（共有された子、閉路、到達不能なノード）
    /// - 分布の確率が有限の正数でない場合
    pub fn new(schema: &FeatureSchema, nodes: Vec<Node>) -> Result<Self> {
        if nodes.is_empty() {
            return Err(UnitSelError::invalid_format("tree", "tree has no nodes"));
        }
        let mut parents = vec![0u32; nodes.len()];
        for (i, node) in nodes.iter().enumerate() {
            match node {
                Node::Decision {
                    feature,
                    test,
                    yes,
                    no,
                } => {
                    check_test(schema, i, *feature, test)?;
                    for &child in [yes, no] {
                        let c = usize::from_u32(child);
                        if c == 0 || c >= nodes.len() {
                            return Err(UnitSelError::invalid_format(
                                "tree",
                                format!("node {i}: invalid child index {child}"),
                            ));
                        }
                        parents[c] += 1;
                    }
                }
                Node::Leaf(LeafPayload::Distribution(dist)) => {
                    if let Some((_, p)) = dist.iter().find(|(_, p)| !(p.is_finite() && *p > 0.0)) {
                        return Err(UnitSelError::invalid_format(
                            "tree",
                            format!("node {i}: invalid probability {p}"),
                        ));
                    }
                }
                Node::Leaf(LeafPayload::Units(_)) => {}
            }
        }
        if let Some(i) = parents.iter().skip(1).position(|&p| p != 1) {
            return Err(UnitSelError::invalid_format(
                "tree",
                format!("node {} must have exactly one parent", i + 1),
            ));
        }

        // Every non-root node has one parent; a full walk from the root
        // rules out detached cycles.
        let mut visited = 0;
        let mut depth = 0;
        let mut stack = vec![(0u32, 0usize)];
        while let Some((idx, d)) = stack.pop() {
            visited += 1;
            depth = depth.max(d);
            if let Node::Decision { yes, no, .. } = &nodes[usize::from_u32(idx)] {
                stack.push((*no, d + 1));
                stack.push((*yes, d + 1));
            }
            if visited > nodes.len() {
                break;
            }
        }
        if visited != nodes.len() {
            return Err(UnitSelError::invalid_format(
                "tree",
                "some nodes are unreachable from the root",
            ));
        }

        Ok(Self { nodes, depth })
    }

    /// ベクトルが到達する葉のノード番号を返します。
    ///
    /// 走査は反復的で、木の深さで抑えられます。
    pub fn leaf_index(&self, vector: &FeatureVector) -> usize {
        let mut idx = 0;
        loop {
            match &self.nodes[idx] {
                Node::Leaf(_) => return idx,
                Node::Decision {
                    feature,
                    test,
                    yes,
                    no,
                } => {
                    let f = usize::from_u32(*feature);
                    let pass = match test {
                        Test::Equals(v) => vector.enum_value(f) == *v,
                        Test::LessEq(t) => vector.continuous(f) <= *t,
                    };
                    idx = usize::from_u32(if pass { *yes } else { *no });
                }
            }
        }
    }

    /// ベクトルを評価し、到達した葉のペイロードを返します。
    #[inline]
    pub fn evaluate(&self, vector: &FeatureVector) -> &LeafPayload {
        match &self.nodes[self.leaf_index(vector)] {
            Node::Leaf(payload) => payload,
            Node::Decision { .. } => unreachable!(),
        }
    }

    /// 全ての葉を`(ノード番号, ペイロード)`として返します。
    pub fn leaves(&self) -> impl Iterator<Item = (usize, &LeafPayload)> {
        self.nodes.iter().enumerate().filter_map(|(i, n)| match n {
            Node::Leaf(p) => Some((i, p)),
            Node::Decision { .. } => None,
        })
    }

    /// ノード配列を返します。
    #[inline(always)]
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// 木の深さを返します。
    #[inline(always)]
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// ユニット葉の全ての番号が`num_units`未満であることを確認します。
    pub fn verify_units(&self, num_units: usize) -> bool {
        self.leaves().all(|(_, p)| match p {
            LeafPayload::Units(units) => units.iter().all(|&u| usize::from_u32(u) < num_units),
            LeafPayload::Distribution(_) => true,
        })
    }

    /// 全ての内部ノードのテストが`schema`に適合することを確認します。
    ///
    /// 別のスキーマで構築された木を音声に追加する前に使います。
    ///
    /// # エラー
    ///
    /// 特徴量の位置やテスト値が範囲外の場合、またはテストが特徴量の種類と
    /// 合わない場合にエラーを返します。
    pub fn verify_schema(&self, schema: &FeatureSchema) -> Result<()> {
        for (i, node) in self.nodes.iter().enumerate() {
            if let Node::Decision { feature, test, .. } = node {
                check_test(schema, i, *feature, test)?;
            }
        }
        Ok(())
    }
}
