//! 接続コスト関数と接続記述子
//!
//! 各ユニットは左端と右端の音響記述子を持ちます。2ユニットの接続コストは、
//! 左ユニットの右端記述子と右ユニットの左端記述子の重み付き距離に、
//! 基本ペナルティを加えたものです。

use std::io::{BufRead, BufReader, Read};

use rkyv::{Archive, Deserialize, Serialize};

use crate::cost::JoinCost;
use crate::errors::{Result, UnitSelError};
use crate::features::weight::normalize_weights;
use crate::features::WeightFunction;
use crate::unit::Unit;
use crate::utils::{parse_csv_row, FromU32};

/// 全ユニットの接続記述子と、次元ごとの重み。
#[derive(Archive, Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct JoinFeatures {
    dim: u32,
    weights: Vec<f32>,
    functions: Vec<WeightFunction>,
    left: Vec<f32>,
    right: Vec<f32>,
}

impl JoinFeatures {
    /// 重み定義と記述子のCSVから接続記述子を読み込みます。
    ///
    /// 重み定義は次元ごとに `weight function [param]` の1行で、
    /// 記述子CSVはユニットごとに `left_1..left_d,right_1..right_d` の1行です。
    /// 値 `NaN` は欠損として扱われます。
    ///
    /// # 引数
    ///
    /// * `weights_rdr` - 重み定義のリーダー
    /// * `descriptors_rdr` - 記述子CSVのリーダー
    /// * `num_units` - インベントリのユニット数
    ///
    /// # エラー
    ///
    /// 形式が不正な場合、または行数がユニット数と異なる場合にエラーを返します。
    pub fn from_readers<W, D>(weights_rdr: W, descriptors_rdr: D, num_units: usize) -> Result<Self>
    where
        W: Read,
        D: Read,
    {
        let mut weights = vec![];
        let mut functions = vec![];
        for line in BufReader::new(weights_rdr).lines() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut spl = line.split_whitespace();
            let (Some(w), Some(f)) = (spl.next(), spl.next()) else {
                return Err(UnitSelError::invalid_format(
                    "join weights",
                    format!("expected 'weight function [param]': {line}"),
                ));
            };
            let param = spl.next();
            if spl.next().is_some() {
                return Err(UnitSelError::invalid_format(
                    "join weights",
                    format!("too many fields: {line}"),
                ));
            }
            weights.push(w.parse::<f32>()?);
            functions.push(WeightFunction::from_name(f, param)?);
        }
        normalize_weights(&mut weights, "join weights")?;
        let dim = weights.len();

        let mut left = Vec::with_capacity(dim * num_units);
        let mut right = Vec::with_capacity(dim * num_units);
        let mut rows = 0;
        for line in BufReader::new(descriptors_rdr).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let fields = parse_csv_row(&line, "join descriptors")?;
            if fields.len() != 2 * dim {
                return Err(UnitSelError::invalid_format(
                    "join descriptors",
                    format!("row {rows}: expected {} fields, got {}", 2 * dim, fields.len()),
                ));
            }
            for (k, field) in fields.iter().enumerate() {
                let x: f32 = field.trim().parse()?;
                if k < dim {
                    left.push(x);
                } else {
                    right.push(x);
                }
            }
            rows += 1;
        }
        if rows != num_units {
            return Err(UnitSelError::invalid_format(
                "join descriptors",
                format!("expected {num_units} rows, got {rows}"),
            ));
        }

        Ok(Self {
            dim: u32::try_from(dim)?,
            weights,
            functions,
            left,
            right,
        })
    }

    /// 記述子を持たない（次元0の）接続記述子を作成します。
    pub fn empty() -> Self {
        Self {
            dim: 0,
            weights: vec![],
            functions: vec![],
            left: vec![],
            right: vec![],
        }
    }

    /// 記述子の次元数
    #[inline(always)]
    pub fn dim(&self) -> usize {
        usize::from_u32(self.dim)
    }

    /// ユニット`u`の左端記述子
    #[inline(always)]
    pub fn left(&self, u: u32) -> &[f32] {
        let d = self.dim();
        let s = usize::from_u32(u) * d;
        &self.left[s..s + d]
    }

    /// ユニット`u`の右端記述子
    #[inline(always)]
    pub fn right(&self, u: u32) -> &[f32] {
        let d = self.dim();
        let s = usize::from_u32(u) * d;
        &self.right[s..s + d]
    }

    /// 読み込んだ接続記述子の大きさを検証します。
    ///
    /// # エラー
    ///
    /// 重み、重み関数、左右の記述子の長さが次元数とユニット数に合わない場合にエラーを返します。
    pub(crate) fn validate(&self, num_units: usize) -> Result<()> {
        let dim = self.dim();
        let expected = if dim == 0 { 0 } else { dim * num_units };
        if self.weights.len() != dim
            || self.functions.len() != dim
            || self.left.len() != expected
            || self.right.len() != expected
        {
            return Err(UnitSelError::invalid_format(
                "join descriptors",
                format!("sizes do not agree with {dim} dimensions and {num_units} units"),
            ));
        }
        Ok(())
    }

    /// 記述子を持つユニットの数。次元0の場合は常に0です。
    pub fn num_units(&self) -> usize {
        if self.dim == 0 {
            0
        } else {
            self.left.len() / self.dim()
        }
    }
}

/// 接続記述子に基づく接続コスト。
///
/// - どちらかのユニットの長さが0なら正の無限大
/// - 元の録音で連続していれば0
/// - それ以外は `base_penalty + Σ weight_k * f_k(right(left)_k, left(right)_k)`。
///   どちらかがNaNの次元は無視される。
pub struct JoinCostFeatures<'a> {
    features: &'a JoinFeatures,
    units: &'a [Unit],
    base_penalty: f64,
}

impl<'a> JoinCostFeatures<'a> {
    /// 新しいインスタンスを作成します。
    pub fn new(features: &'a JoinFeatures, units: &'a [Unit], base_penalty: f64) -> Self {
        Self {
            features,
            units,
            base_penalty,
        }
    }
}

impl JoinCost for JoinCostFeatures<'_> {
    fn cost(&self, left: u32, right: u32) -> f64 {
        let (lu, ru) = (&self.units[usize::from_u32(left)], &self.units[usize::from_u32(right)]);
        if lu.duration() == 0 || ru.duration() == 0 {
            return f64::INFINITY;
        }
        if lu.precedes(ru) {
            return 0.0;
        }
        let mut cost = self.base_penalty;
        if self.features.dim() == 0 {
            return cost;
        }
        let a = self.features.right(left);
        let b = self.features.left(right);
        for k in 0..a.len() {
            if a[k].is_nan() || b[k].is_nan() {
                continue;
            }
            cost += f64::from(self.features.weights[k]) * self.features.functions[k].cost(a[k], b[k]);
        }
        cost
    }
}
