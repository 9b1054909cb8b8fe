//! 外部で学習された分類木の変換
//!
//! 外部の木は、scikit-learnと同様の並列配列としてJSONで与えられます。
//! この変換は機械的なもので、再学習は行いません。
//!
//! - `feature_names[k]` は外部の列`k`の意味です。`name=value` は列挙型特徴量の
//!   指示列（値が等しければ1）、`name` のみは連続値特徴量を表します。
//! - `features[i]` はノード`i`がテストする列、葉では負の値です。
//! - `children_left[i]` は `x <= thresholds[i]` のときの子、`children_right[i]` はそれ以外の子で、
//!   葉では共に`-1`です。
//! - `values[i]` はノード`i`のクラスごとの重み（件数または確率）です。
//! - `classes` と `output_feature` が与えられた場合、クラスラベルはその特徴量の値番号に
//!   写像されます。それ以外はクラス番号がそのまま出力値になります。
use std::io::Read;

use serde::Deserialize;

use crate::cart::{DecisionTree, LeafPayload, Node, Test};
use crate::errors::{Result, UnitSelError};
use crate::features::{FeatureKind, FeatureSchema};

/// JSONから読み込まれる外部の分類木。
#[derive(Deserialize, Debug, Clone)]
pub struct ExternalTree {
    /// 外部の列名
    pub feature_names: Vec<String>,
    /// ノードごとのテスト列。葉では負。
    pub features: Vec<i64>,
    /// ノードごとの閾値
    pub thresholds: Vec<f64>,
    /// `x <= threshold` のときの子。葉では-1。
    pub children_left: Vec<i64>,
    /// `x > threshold` のときの子。葉では-1。
    pub children_right: Vec<i64>,
    /// ノードごとのクラス重み
    pub values: Vec<Vec<f64>>,
    /// クラスラベル
    #[serde(default)]
    pub classes: Vec<String>,
    /// クラスラベルを値番号に写像する列挙型特徴量
    #[serde(default)]
    pub output_feature: Option<String>,
}

/// 外部の列が表すスキーマ上のテスト。
#[derive(Debug, Clone, Copy)]
enum Column {
    Indicator { feature: u32, value: u16 },
    Continuous { feature: u32 },
}

impl DecisionTree {
    /// JSON形式の外部分類木を読み込み、決定木に変換します。
    ///
    /// # 引数
    ///
    /// * `rdr` - JSONのリーダー
    /// * `schema` - 対応付けに使うスキーマ
    ///
    /// # エラー
    ///
    /// JSONが不正な場合、または[`DecisionTree::from_external_tree`]が失敗した場合に
    /// エラーを返します。
    pub fn from_external<R: Read>(rdr: R, schema: &FeatureSchema) -> Result<Self> {
        let ext: ExternalTree = serde_json::from_reader(rdr)?;
        Self::from_external_tree(&ext, schema)
    }

    /// 外部分類木を決定木に変換します。
    ///
    /// 各ノードのテストはスキーマの特徴量と値の組に写像され、葉のクラス重みは
    /// 確率に正規化された上で0でないものだけが分布として保持されます。
    ///
    /// # エラー
    ///
    /// 以下の場合にエラーを返します:
    /// - 配列の長さが揃っていない場合
    /// - 列名がスキーマの特徴量や値に対応しない場合
    /// - 列挙型特徴量を値なしでテストするなど、二分の等値テストに写像できない分割の場合
    /// - 子の番号が範囲外、または片方だけが-1の場合
    /// - クラスラベルが出力特徴量の値に含まれない場合
    pub fn from_external_tree(ext: &ExternalTree, schema: &FeatureSchema) -> Result<Self> {
        let n = ext.features.len();
        if ext.thresholds.len() != n
            || ext.children_left.len() != n
            || ext.children_right.len() != n
            || ext.values.len() != n
        {
            return Err(UnitSelError::invalid_format(
                "external tree",
                "Inconsistent lengths of the node arrays.",
            ));
        }

        let columns = ext
            .feature_names
            .iter()
            .map(|name| resolve_column(name, schema))
            .collect::<Result<Vec<_>>>()?;
        let outputs = resolve_outputs(ext, schema)?;

        let child = |i: usize, c: i64| -> Result<u32> {
            usize::try_from(c)
                .ok()
                .filter(|&c| c < n)
                .and_then(|c| u32::try_from(c).ok())
                .ok_or_else(|| {
                    UnitSelError::invalid_format(
                        "external tree",
                        format!("node {i}: child index {c} out of range"),
                    )
                })
        };

        let mut nodes = Vec::with_capacity(n);
        for i in 0..n {
            let (left, right) = (ext.children_left[i], ext.children_right[i]);
            if left == -1 && right == -1 {
                nodes.push(Node::Leaf(LeafPayload::Distribution(leaf_distribution(
                    i,
                    &ext.values[i],
                    &outputs,
                )?)));
                continue;
            }
            let column = usize::try_from(ext.features[i])
                .ok()
                .and_then(|k| columns.get(k))
                .ok_or_else(|| {
                    UnitSelError::invalid_format(
                        "external tree",
                        format!("node {i}: unknown column {}", ext.features[i]),
                    )
                })?;
            let (left, right) = (child(i, left)?, child(i, right)?);
            let threshold = ext.thresholds[i];
            let node = match *column {
                Column::Indicator { feature, value } => {
                    // An indicator is 0 or 1, so only thresholds in [0, 1) split it.
                    if !(0.0..1.0).contains(&threshold) {
                        return Err(UnitSelError::invalid_format(
                            "external tree",
                            format!("node {i}: threshold {threshold} does not split an indicator"),
                        ));
                    }
                    Node::Decision {
                        feature,
                        test: Test::Equals(value),
                        yes: right,
                        no: left,
                    }
                }
                Column::Continuous { feature } => Node::Decision {
                    feature,
                    test: Test::LessEq(threshold as f32),
                    yes: left,
                    no: right,
                },
            };
            nodes.push(node);
        }

        Self::new(schema, nodes)
    }
}

fn resolve_column(name: &str, schema: &FeatureSchema) -> Result<Column> {
    let (feature_name, value) = match name.split_once('=') {
        Some((f, v)) => (f, Some(v)),
        None => (name, None),
    };
    let idx = schema.feature_index(feature_name).ok_or_else(|| {
        UnitSelError::invalid_format("external tree", format!("unknown feature: {feature_name}"))
    })?;
    let feature = u32::try_from(idx)?;
    match (schema.feature(idx).kind(), value) {
        (FeatureKind::Continuous, None) => Ok(Column::Continuous { feature }),
        (FeatureKind::Enum8 | FeatureKind::Enum16, Some(v)) => {
            let value = schema.value_index(idx, v).ok_or_else(|| {
                UnitSelError::invalid_format(
                    "external tree",
                    format!("feature '{feature_name}' has no value '{v}'"),
                )
            })?;
            Ok(Column::Indicator { feature, value })
        }
        (FeatureKind::Enum8 | FeatureKind::Enum16, None) => Err(UnitSelError::invalid_format(
            "external tree",
            format!("column '{name}' is a non-binary split over an enumerated feature"),
        )),
        (FeatureKind::Continuous, Some(_)) => Err(UnitSelError::invalid_format(
            "external tree",
            format!("column '{name}' tests a value of a continuous feature"),
        )),
    }
}

fn resolve_outputs(ext: &ExternalTree, schema: &FeatureSchema) -> Result<Option<Vec<u16>>> {
    let Some(name) = &ext.output_feature else {
        return Ok(None);
    };
    let idx = schema.feature_index(name).ok_or_else(|| {
        UnitSelError::invalid_format("external tree", format!("unknown output feature: {name}"))
    })?;
    ext.classes
        .iter()
        .map(|label| {
            schema.value_index(idx, label).ok_or_else(|| {
                UnitSelError::invalid_format(
                    "external tree",
                    format!("output feature '{name}' has no value '{label}'"),
                )
            })
        })
        .collect::<Result<Vec<_>>>()
        .map(Some)
}

fn leaf_distribution(i: usize, weights: &[f64], outputs: &Option<Vec<u16>>) -> Result<Vec<(u16, f32)>> {
    if let Some(w) = weights.iter().find(|w| !(w.is_finite() && **w >= 0.0)) {
        return Err(UnitSelError::invalid_format(
            "external tree",
            format!("node {i}: invalid class weight {w}"),
        ));
    }
    let total: f64 = weights.iter().sum();
    let mut dist = vec![];
    for (k, &w) in weights.iter().enumerate() {
        if w == 0.0 {
            continue;
        }
        let out = match outputs {
            Some(map) => *map.get(k).ok_or_else(|| {
                UnitSelError::invalid_format(
                    "external tree",
                    format!("node {i}: class {k} has no label"),
                )
            })?,
            None => u16::try_from(k)?,
        };
        let p = (w / total) as f32;
        if p > 0.0 {
            dist.push((out, p));
        }
    }
    Ok(dist)
}
