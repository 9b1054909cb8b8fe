//! 特徴量スキーマ
//!
//! スキーマは、名前付き特徴量の固定順序のカタログです。各特徴量は種類
//! （Enum8、Enum16、連続値）を持ち、列挙型の場合は正当な値ラベルの順序付きリストを持ちます。
//! ラベルの位置がそのままエンコード値になるため、読み込み時に順序は厳密に保存されます。
//!
//! # テキスト形式
//!
//! ```text
//! ByteValuedFeatureProcessors
//! 0.5 | phone 0 _ a i u
//! stressed 0 1
//! ShortValuedFeatureProcessors
//! word 0 hello world
//! ContinuousFeatureProcessors
//! 0.5 linear | f0 float
//! FeatureSimilarity
//! phone
//! 0 1 1 1 1
//! ...
//! ```
//!
//! 行頭の `weight |` は省略可能な重みで、読み込み時に合計1へ正規化されます。
//! 列挙型の値0は「未定義」スロットとして予約されており、実行時ターゲットの
//! 未知の値はこのスロットに写像されます。このスロットのラベルは常に `0` で、
//! 先頭が `0` でない列挙型特徴量は読み込み時にエラーになります。

use std::fmt::Write as _;
use std::io::{BufRead, BufReader, Read};

use hashbrown::HashMap;
use rkyv::{Archive, Deserialize, Serialize};

use crate::errors::{Result, UnitSelError};
use crate::features::vector::{FeatureVector, Value};
use crate::features::weight::{normalize_weights, WeightFunction};

const BYTE_HEADER: &str = "ByteValuedFeatureProcessors";
const SHORT_HEADER: &str = "ShortValuedFeatureProcessors";
const CONTINUOUS_HEADER: &str = "ContinuousFeatureProcessors";
const SIMILARITY_HEADER: &str = "FeatureSimilarity";

/// 列挙型特徴量の未定義スロットの値番号。
pub const UNDEFINED_VALUE: u16 = 0;

/// 未定義スロットのラベル。全ての列挙型特徴量の先頭の値でなければなりません。
pub const UNDEFINED_LABEL: &str = "0";

const MAX_ENUM8_VALUES: usize = 1 << 8;
const MAX_ENUM16_VALUES: usize = 1 << 16;

/// 特徴量の種類。
#[derive(Archive, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureKind {
    /// 最大256値の列挙型
    Enum8,
    /// 最大65536値の列挙型
    Enum16,
    /// 浮動小数点数
    Continuous,
}

impl FeatureKind {
    /// 列挙型であれば`true`を返します。
    #[inline(always)]
    pub fn is_enum(self) -> bool {
        !matches!(self, Self::Continuous)
    }

    fn header(self) -> &'static str {
        match self {
            Self::Enum8 => BYTE_HEADER,
            Self::Enum16 => SHORT_HEADER,
            Self::Continuous => CONTINUOUS_HEADER,
        }
    }
}

/// 単一の特徴量の定義。
#[derive(Archive, Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct FeatureDef {
    name: String,
    kind: FeatureKind,
    values: Vec<String>,
    weight: f32,
    weight_fn: WeightFunction,
    similarity: Option<Vec<f32>>,
}

impl FeatureDef {
    fn new(name: &str, kind: FeatureKind, values: Vec<String>) -> Self {
        Self {
            name: name.to_string(),
            kind,
            values,
            weight: 0.0,
            weight_fn: WeightFunction::Linear,
            similarity: None,
        }
    }

    /// Enum8特徴量を定義します。
    pub fn enum8<I, S>(name: &str, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(name, FeatureKind::Enum8, values.into_iter().map(Into::into).collect())
    }

    /// Enum16特徴量を定義します。
    pub fn enum16<I, S>(name: &str, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(name, FeatureKind::Enum16, values.into_iter().map(Into::into).collect())
    }

    /// 連続値特徴量を定義します。
    pub fn continuous(name: &str) -> Self {
        Self::new(name, FeatureKind::Continuous, vec![])
    }

    /// 正規化前の重みを設定します。
    pub fn with_weight(mut self, weight: f32) -> Self {
        self.weight = weight;
        self
    }

    /// 連続値特徴量の重み関数を設定します。
    pub fn with_weight_fn(mut self, weight_fn: WeightFunction) -> Self {
        self.weight_fn = weight_fn;
        self
    }

    /// Enum8特徴量の類似度行列（行優先、`n * n`）を設定します。
    pub fn with_similarity(mut self, matrix: Vec<f32>) -> Self {
        self.similarity = Some(matrix);
        self
    }

    /// 特徴量名
    pub fn name(&self) -> &str {
        &self.name
    }

    /// 特徴量の種類
    pub fn kind(&self) -> FeatureKind {
        self.kind
    }

    /// 正当な値ラベル（連続値の場合は空）
    pub fn values(&self) -> &[String] {
        &self.values
    }

    /// 正規化済みの重み
    pub fn weight(&self) -> f32 {
        self.weight
    }

    /// 重み関数
    pub fn weight_fn(&self) -> WeightFunction {
        self.weight_fn
    }

    /// 類似度行列（行優先、`n * n`）
    pub fn similarity_matrix(&self) -> Option<&[f32]> {
        self.similarity.as_deref()
    }

    /// ターゲット値`t`と候補値`c`の類似度コスト
    #[inline(always)]
    pub fn similarity(&self, t: u16, c: u16) -> Option<f32> {
        let n = self.values.len();
        self.similarity
            .as_ref()
            .map(|m| m[usize::from(t) * n + usize::from(c)])
    }
}

/// デコードされた特徴量値。
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Decoded<'a> {
    /// 列挙型特徴量のラベル
    Label(&'a str),
    /// 連続値特徴量の値
    Continuous(f32),
}

/// 特徴量スキーマ。
///
/// 一度構築された後は不変で、音声の読み込み中ずっと同じ順序を保ちます。
#[derive(Debug, Clone)]
pub struct FeatureSchema {
    defs: Vec<FeatureDef>,
    num_enum8: usize,
    num_enum16: usize,
    by_name: HashMap<String, usize>,
    value_maps: Vec<HashMap<String, u16>>,
}

impl PartialEq for FeatureSchema {
    fn eq(&self, other: &Self) -> bool {
        self.defs == other.defs
    }
}

impl FeatureSchema {
    /// 特徴量定義のリストからスキーマを構築します。
    ///
    /// 定義はEnum8、Enum16、連続値の順にまとまっている必要があります。
    /// 重みは合計1に正規化されます。
    ///
    /// # エラー
    ///
    /// 以下の場合にエラーを返します:
    /// - 特徴量名が重複している場合
    /// - 種類の順序が崩れている場合
    /// - 列挙型の値が空、上限超過、または重複している場合
    /// - 列挙型の先頭の値が[`UNDEFINED_LABEL`]でない場合
    /// - 類似度行列の大きさが値の数と合わない場合
    /// - 重みが負の場合
    pub fn from_defs(mut defs: Vec<FeatureDef>) -> Result<Self> {
        let mut by_name = HashMap::with_capacity(defs.len());
        let mut value_maps = Vec::with_capacity(defs.len());
        let mut prev_kind = FeatureKind::Enum8;
        let mut num_enum8 = 0;
        let mut num_enum16 = 0;

        for (i, def) in defs.iter().enumerate() {
            if kind_rank(def.kind) < kind_rank(prev_kind) {
                return Err(UnitSelError::invalid_format(
                    "schema",
                    format!("feature '{}' is out of kind order", def.name),
                ));
            }
            prev_kind = def.kind;
            if by_name.insert(def.name.clone(), i).is_some() {
                return Err(UnitSelError::invalid_format(
                    "schema",
                    format!("duplicate feature name: {}", def.name),
                ));
            }

            let limit = match def.kind {
                FeatureKind::Enum8 => {
                    num_enum8 += 1;
                    MAX_ENUM8_VALUES
                }
                FeatureKind::Enum16 => {
                    num_enum16 += 1;
                    MAX_ENUM16_VALUES
                }
                FeatureKind::Continuous => {
                    if def.similarity.is_some() {
                        return Err(UnitSelError::invalid_format(
                            "schema",
                            format!("continuous feature '{}' cannot have a similarity matrix", def.name),
                        ));
                    }
                    value_maps.push(HashMap::new());
                    continue;
                }
            };
            if def.values.is_empty() || def.values.len() > limit {
                return Err(UnitSelError::invalid_format(
                    "schema",
                    format!(
                        "feature '{}' must have between 1 and {} values, got {}",
                        def.name,
                        limit,
                        def.values.len()
                    ),
                ));
            }
            if def.values[0] != UNDEFINED_LABEL {
                return Err(UnitSelError::invalid_format(
                    "schema",
                    format!(
                        "feature '{}' must start with the undefined value '{}', got '{}'",
                        def.name, UNDEFINED_LABEL, def.values[0]
                    ),
                ));
            }
            let mut map = HashMap::with_capacity(def.values.len());
            for (v, label) in def.values.iter().enumerate() {
                if map.insert(label.clone(), u16::try_from(v)?).is_some() {
                    return Err(UnitSelError::invalid_format(
                        "schema",
                        format!("feature '{}' has duplicate value '{}'", def.name, label),
                    ));
                }
            }
            if let Some(matrix) = &def.similarity {
                if def.kind != FeatureKind::Enum8 || matrix.len() != def.values.len().pow(2) {
                    return Err(UnitSelError::invalid_format(
                        "schema",
                        format!("invalid similarity matrix for feature '{}'", def.name),
                    ));
                }
            }
            value_maps.push(map);
        }

        let mut weights: Vec<f32> = defs.iter().map(|d| d.weight).collect();
        normalize_weights(&mut weights, "schema")?;
        for (def, w) in defs.iter_mut().zip(weights) {
            def.weight = w;
        }

        Ok(Self {
            defs,
            num_enum8,
            num_enum16,
            by_name,
            value_maps,
        })
    }

    /// 正規化済みの定義からスキーマを復元します。
    ///
    /// [`Self::from_defs`]と同じ検証を行い、保存された重みをそのまま保ちます。
    pub(crate) fn from_normalized_defs(defs: Vec<FeatureDef>) -> Result<Self> {
        let weights: Vec<f32> = defs.iter().map(|d| d.weight).collect();
        let mut schema = Self::from_defs(defs)?;
        for (def, w) in schema.defs.iter_mut().zip(weights) {
            def.weight = w;
        }
        Ok(schema)
    }

    /// テキスト形式のスキーマを読み込みます。
    ///
    /// # 引数
    ///
    /// * `rdr` - スキーマファイルのリーダー
    ///
    /// # エラー
    ///
    /// 形式が不正な場合、または[`Self::from_defs`]の検証に失敗した場合にエラーを返します。
    pub fn from_reader<R>(rdr: R) -> Result<Self>
    where
        R: Read,
    {
        let reader = BufReader::new(rdr);
        let mut section: Option<&'static str> = None;
        let mut defs: Vec<FeatureDef> = vec![];
        let mut similarity_target: Option<(usize, Vec<f32>)> = None;

        for line in reader.lines() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let next_header = match (section, line) {
                (None, BYTE_HEADER) => Some(BYTE_HEADER),
                (Some(BYTE_HEADER), SHORT_HEADER) => Some(SHORT_HEADER),
                (Some(SHORT_HEADER), CONTINUOUS_HEADER) => Some(CONTINUOUS_HEADER),
                (Some(CONTINUOUS_HEADER), SIMILARITY_HEADER) => Some(SIMILARITY_HEADER),
                _ => None,
            };
            if let Some(header) = next_header {
                section = Some(header);
                continue;
            }

            match section {
                None => {
                    return Err(UnitSelError::invalid_format(
                        "schema",
                        format!("expected '{BYTE_HEADER}', got '{line}'"),
                    ));
                }
                Some(BYTE_HEADER) => defs.push(parse_enum_line(line, FeatureKind::Enum8)?),
                Some(SHORT_HEADER) => defs.push(parse_enum_line(line, FeatureKind::Enum16)?),
                Some(CONTINUOUS_HEADER) => defs.push(parse_continuous_line(line)?),
                Some(_) => {
                    if let Some((idx, rows)) = similarity_target.as_mut() {
                        let n = defs[*idx].values.len();
                        let row = line
                            .split_whitespace()
                            .map(str::parse::<f32>)
                            .collect::<Result<Vec<_>, _>>()?;
                        if row.len() != n {
                            return Err(UnitSelError::invalid_format(
                                "schema",
                                format!("similarity row for '{}' must have {} entries", defs[*idx].name, n),
                            ));
                        }
                        rows.extend(row);
                        if rows.len() == n * n {
                            let (idx, rows) = similarity_target.take().unwrap_or_default();
                            defs[idx].similarity = Some(rows);
                        }
                    } else {
                        let idx = defs
                            .iter()
                            .position(|d| d.name == line && d.kind == FeatureKind::Enum8)
                            .ok_or_else(|| {
                                UnitSelError::invalid_format(
                                    "schema",
                                    format!("similarity block for unknown Enum8 feature '{line}'"),
                                )
                            })?;
                        similarity_target = Some((idx, vec![]));
                    }
                }
            }
        }

        if section.is_none() || section == Some(BYTE_HEADER) || section == Some(SHORT_HEADER) {
            return Err(UnitSelError::invalid_format(
                "schema",
                "missing one of the feature sections",
            ));
        }
        if let Some((idx, _)) = similarity_target {
            return Err(UnitSelError::invalid_format(
                "schema",
                format!("incomplete similarity matrix for '{}'", defs[idx].name),
            ));
        }

        Self::from_defs(defs)
    }

    /// スキーマをテキスト形式に書き出します。
    ///
    /// 出力は[`Self::from_reader`]で再び読み込むことができます。
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        let mut kinds = [FeatureKind::Enum8, FeatureKind::Enum16, FeatureKind::Continuous].into_iter();
        let mut current = kinds.next();
        if let Some(kind) = current {
            out.push_str(kind.header());
            out.push('\n');
        }
        for def in &self.defs {
            while current != Some(def.kind) {
                current = kinds.next();
                let Some(kind) = current else {
                    break;
                };
                out.push_str(kind.header());
                out.push('\n');
            }
            if def.kind.is_enum() {
                let _ = write!(out, "{} | {}", def.weight, def.name);
                for v in &def.values {
                    out.push(' ');
                    out.push_str(v);
                }
                out.push('\n');
            } else {
                let _ = writeln!(out, "{} {} | {}", def.weight, def.weight_fn, def.name);
            }
        }
        for kind in kinds {
            out.push_str(kind.header());
            out.push('\n');
        }

        let similar: Vec<_> = self.defs.iter().filter(|d| d.similarity.is_some()).collect();
        if !similar.is_empty() {
            out.push_str(SIMILARITY_HEADER);
            out.push('\n');
            for def in similar {
                out.push_str(&def.name);
                out.push('\n');
                let n = def.values.len();
                if let Some(m) = &def.similarity {
                    for row in m.chunks(n) {
                        let row: Vec<String> = row.iter().map(f32::to_string).collect();
                        out.push_str(&row.join(" "));
                        out.push('\n');
                    }
                }
            }
        }
        out
    }

    /// 特徴量の数を返します。
    #[inline(always)]
    pub fn len(&self) -> usize {
        self.defs.len()
    }

    /// 特徴量を一つも持たない場合に`true`を返します。
    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }

    /// 全ての特徴量定義を返します。
    #[inline(always)]
    pub fn defs(&self) -> &[FeatureDef] {
        &self.defs
    }

    /// `i`番目の特徴量定義を返します。
    #[inline(always)]
    pub fn feature(&self, i: usize) -> &FeatureDef {
        &self.defs[i]
    }

    /// 特徴量名から位置を返します。
    pub fn feature_index(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    /// `i`番目の列挙型特徴量におけるラベルの値番号を返します。
    pub fn value_index(&self, i: usize, label: &str) -> Option<u16> {
        self.value_maps.get(i)?.get(label).copied()
    }

    /// 列挙型特徴量の正当な値の数を返します。連続値の場合は0です。
    #[inline(always)]
    pub fn num_values(&self, i: usize) -> usize {
        self.defs[i].values.len()
    }

    /// 生の特徴量値をエンコードします。
    ///
    /// インベントリ由来のベクトルに使用します。未知の値は致命的なエラーです。
    ///
    /// # 引数
    ///
    /// * `raw` - スキーマ順の生の値
    /// * `origin` - ベクトルの由来（ユニット番号）
    ///
    /// # エラー
    ///
    /// 値の数がスキーマと異なる場合、または値が正当な値集合に含まれない場合に
    /// エラーを返します。
    pub fn encode<S>(&self, raw: &[S], origin: u32) -> Result<FeatureVector>
    where
        S: AsRef<str>,
    {
        self.encode_inner(raw, origin, |def, value| {
            Err(UnitSelError::unknown_value(def.name.as_str(), value))
        })
    }

    /// 実行時ターゲットの生の特徴量値をエンコードします。
    ///
    /// 未知の列挙値は[`UNDEFINED_VALUE`]に、解釈できない連続値はNaNに写像され、
    /// ターゲット番号と値を含む警告がログに出力されます。
    ///
    /// # エラー
    ///
    /// 値の数がスキーマと異なる場合にのみエラーを返します。
    pub fn encode_lenient<S>(&self, raw: &[S], origin: u32) -> Result<FeatureVector>
    where
        S: AsRef<str>,
    {
        self.encode_inner(raw, origin, |def, value| {
            log::warn!(
                "[unitsel] target {}: feature '{}' has unseen value '{}'; using the undefined slot",
                origin,
                def.name,
                value
            );
            Ok(match def.kind {
                FeatureKind::Continuous => Value::Continuous(f32::NAN),
                _ => Value::Enum(UNDEFINED_VALUE),
            })
        })
    }

    fn encode_inner<S, F>(&self, raw: &[S], origin: u32, mut on_unknown: F) -> Result<FeatureVector>
    where
        S: AsRef<str>,
        F: FnMut(&FeatureDef, &str) -> Result<Value>,
    {
        if raw.len() != self.defs.len() {
            return Err(UnitSelError::invalid_argument(
                "raw",
                format!("expected {} values, got {}", self.defs.len(), raw.len()),
            ));
        }
        let mut bytes = Vec::with_capacity(self.num_enum8);
        let mut shorts = Vec::with_capacity(self.num_enum16);
        let mut floats = Vec::with_capacity(self.defs.len() - self.num_enum8 - self.num_enum16);

        for (i, (def, value)) in self.defs.iter().zip(raw).enumerate() {
            let value = value.as_ref();
            let encoded = match def.kind {
                FeatureKind::Continuous => match value.parse::<f32>() {
                    Ok(x) => Value::Continuous(x),
                    Err(_) => on_unknown(def, value)?,
                },
                _ => match self.value_maps[i].get(value) {
                    Some(&v) => Value::Enum(v),
                    None => on_unknown(def, value)?,
                },
            };
            match (def.kind, encoded) {
                // Enum8 labels never exceed 256 entries, so the narrowing is lossless.
                (FeatureKind::Enum8, Value::Enum(v)) => bytes.push(v as u8),
                (FeatureKind::Enum16, Value::Enum(v)) => shorts.push(v),
                (_, Value::Continuous(x)) => floats.push(x),
                (FeatureKind::Continuous, Value::Enum(_)) => unreachable!(),
            }
        }
        Ok(FeatureVector::new(origin, bytes, shorts, floats))
    }

    /// ベクトルから名前付き特徴量の値をデコードします。
    ///
    /// # エラー
    ///
    /// 特徴量名が存在しない場合、または値が範囲外の場合にエラーを返します。
    pub fn decode<'a>(&'a self, vector: &FeatureVector, name: &str) -> Result<Decoded<'a>> {
        let i = self
            .feature_index(name)
            .ok_or_else(|| UnitSelError::invalid_argument("name", format!("unknown feature: {name}")))?;
        if vector.len() != self.defs.len() {
            return Err(UnitSelError::invalid_argument(
                "vector",
                "vector length does not match the schema",
            ));
        }
        match vector.value(i) {
            Value::Continuous(x) => Ok(Decoded::Continuous(x)),
            Value::Enum(v) => self.defs[i]
                .values
                .get(usize::from(v))
                .map(|s| Decoded::Label(s.as_str()))
                .ok_or_else(|| {
                    UnitSelError::invalid_argument("vector", format!("value {v} out of range for {name}"))
                }),
        }
    }

    /// ベクトルがこのスキーマに適合するかどうかを判定します。
    pub fn conforms(&self, vector: &FeatureVector) -> bool {
        vector.bytes.len() == self.num_enum8
            && vector.shorts.len() == self.num_enum16
            && vector.len() == self.defs.len()
            && (0..self.num_enum8 + self.num_enum16)
                .all(|i| usize::from(vector.enum_value(i)) < self.defs[i].values.len())
    }
}

fn kind_rank(kind: FeatureKind) -> u8 {
    match kind {
        FeatureKind::Enum8 => 0,
        FeatureKind::Enum16 => 1,
        FeatureKind::Continuous => 2,
    }
}

/// `weight [fn [param]] | rest` の形式を分割します。
fn split_weight(line: &str) -> Result<(Option<(f32, Option<WeightFunction>)>, &str)> {
    let Some((head, rest)) = line.split_once('|') else {
        return Ok((None, line));
    };
    let mut spl = head.split_whitespace();
    let weight: f32 = spl
        .next()
        .ok_or_else(|| UnitSelError::invalid_format("schema", format!("missing weight: {line}")))?
        .parse()?;
    if weight < 0.0 {
        return Err(UnitSelError::invalid_format(
            "schema",
            format!("negative weight: {line}"),
        ));
    }
    let weight_fn = match spl.next() {
        Some(name) => Some(WeightFunction::from_name(name, spl.next())?),
        None => None,
    };
    if spl.next().is_some() {
        return Err(UnitSelError::invalid_format(
            "schema",
            format!("invalid weight prefix: {line}"),
        ));
    }
    Ok((Some((weight, weight_fn)), rest.trim()))
}

fn parse_enum_line(line: &str, kind: FeatureKind) -> Result<FeatureDef> {
    let (weight, rest) = split_weight(line)?;
    let mut spl = rest.split_whitespace();
    let name = spl
        .next()
        .ok_or_else(|| UnitSelError::invalid_format("schema", format!("missing feature name: {line}")))?;
    let mut def = FeatureDef::new(name, kind, spl.map(str::to_string).collect());
    if let Some((w, weight_fn)) = weight {
        if weight_fn.is_some() {
            return Err(UnitSelError::invalid_format(
                "schema",
                format!("weight functions are only allowed on continuous features: {line}"),
            ));
        }
        def.weight = w;
    }
    Ok(def)
}

fn parse_continuous_line(line: &str) -> Result<FeatureDef> {
    let (weight, rest) = split_weight(line)?;
    let tokens: Vec<&str> = rest.split_whitespace().collect();
    let name = match tokens.as_slice() {
        [name] | [name, _] => *name,
        _ => {
            return Err(UnitSelError::invalid_format(
                "schema",
                format!("invalid continuous feature line: {line}"),
            ))
        }
    };
    let mut def = FeatureDef::continuous(name);
    if let Some((w, weight_fn)) = weight {
        def.weight = w;
        if let Some(f) = weight_fn {
            def.weight_fn = f;
        }
    }
    Ok(def)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCHEMA: &str = "\
ByteValuedFeatureProcessors
2 | phone 0 _ a i
stressed 0 1
ShortValuedFeatureProcessors
ContinuousFeatureProcessors
1 step 0.5 | f0 float
1 | dur
";

    #[test]
    fn test_parse() {
        let schema = FeatureSchema::from_reader(SCHEMA.as_bytes()).unwrap();
        assert_eq!(schema.len(), 4);
        assert_eq!(schema.feature_index("stressed"), Some(1));
        assert_eq!(schema.feature(0).values(), &["0", "_", "a", "i"]);
        assert_eq!(schema.feature(0).weight(), 0.5);
        assert_eq!(schema.feature(1).weight(), 0.0);
        assert_eq!(schema.feature(2).weight_fn(), WeightFunction::Step(0.5));
        assert_eq!(schema.feature(3).kind(), FeatureKind::Continuous);
        assert_eq!(schema.value_index(0, "i"), Some(3));
    }

    #[test]
    fn test_duplicate_name() {
        let text = "ByteValuedFeatureProcessors\np 0 a\np 0 b\nShortValuedFeatureProcessors\nContinuousFeatureProcessors\n";
        assert!(FeatureSchema::from_reader(text.as_bytes()).is_err());
    }

    #[test]
    fn test_missing_section() {
        let text = "ByteValuedFeatureProcessors\np 0 a\n";
        assert!(FeatureSchema::from_reader(text.as_bytes()).is_err());
    }

    #[test]
    fn test_negative_weight() {
        let text = "ByteValuedFeatureProcessors\n-1 | p 0 a\nShortValuedFeatureProcessors\nContinuousFeatureProcessors\n";
        assert!(FeatureSchema::from_reader(text.as_bytes()).is_err());
    }

    #[test]
    fn test_similarity_block() {
        let text = "\
ByteValuedFeatureProcessors
p 0 a
ShortValuedFeatureProcessors
ContinuousFeatureProcessors
FeatureSimilarity
p
0 1
0.5 0
";
        let schema = FeatureSchema::from_reader(text.as_bytes()).unwrap();
        assert_eq!(schema.feature(0).similarity(1, 0), Some(0.5));
        assert_eq!(schema.feature(0).similarity(0, 1), Some(1.0));
    }

    #[test]
    fn test_too_many_enum8_values() {
        let values: Vec<String> = (0..300).map(|i| i.to_string()).collect();
        let defs = vec![FeatureDef::enum8("p", values.clone())];
        assert!(FeatureSchema::from_defs(defs).is_err());
        let defs = vec![FeatureDef::enum16("p", values)];
        assert!(FeatureSchema::from_defs(defs).is_ok());
    }

    #[test]
    fn test_undefined_label_first() {
        let text = "ByteValuedFeatureProcessors\np a b c\nShortValuedFeatureProcessors\nContinuousFeatureProcessors\n";
        assert!(FeatureSchema::from_reader(text.as_bytes()).is_err());
        let defs = vec![FeatureDef::enum16("w", ["aki", "0", "kasa"])];
        assert!(FeatureSchema::from_defs(defs).is_err());

        // Unseen values never alias a real label.
        let schema = FeatureSchema::from_defs(vec![FeatureDef::enum8("p", ["0", "a", "b", "c"])]).unwrap();
        let v = schema.encode_lenient(&["zzz"], 0).unwrap();
        assert_eq!(schema.decode(&v, "p").unwrap(), Decoded::Label(UNDEFINED_LABEL));
    }

    #[test]
    fn test_kind_order() {
        let defs = vec![FeatureDef::continuous("f0"), FeatureDef::enum8("p", ["0", "a"])];
        assert!(FeatureSchema::from_defs(defs).is_err());
    }

    #[test]
    fn test_encode_strict() {
        let schema = FeatureSchema::from_reader(SCHEMA.as_bytes()).unwrap();
        let v = schema.encode(&["a", "1", "120.5", "0.08"], 3).unwrap();
        assert_eq!(v.origin(), 3);
        assert_eq!(v.enum_value(0), 2);
        assert_eq!(v.enum_value(1), 1);
        assert_eq!(v.continuous(2), 120.5);

        let err = schema.encode(&["o", "1", "120.5", "0.08"], 3).unwrap_err();
        match err {
            UnitSelError::UnknownValue(e) => {
                assert_eq!(e.feature(), "phone");
                assert_eq!(e.value(), "o");
            }
            e => panic!("unexpected error: {e}"),
        }
        assert!(schema.encode(&["a", "1"], 3).is_err());
    }

    #[test]
    fn test_encode_lenient() {
        let schema = FeatureSchema::from_reader(SCHEMA.as_bytes()).unwrap();
        let v = schema.encode_lenient(&["o", "1", "high", "0.08"], 0).unwrap();
        assert_eq!(v.enum_value(0), UNDEFINED_VALUE);
        assert!(v.continuous(2).is_nan());
        assert!(schema.conforms(&v));
    }

    #[test]
    fn test_decode() {
        let schema = FeatureSchema::from_reader(SCHEMA.as_bytes()).unwrap();
        let v = schema.encode(&["i", "0", "1.5", "0.1"], 0).unwrap();
        assert_eq!(schema.decode(&v, "phone").unwrap(), Decoded::Label("i"));
        assert_eq!(schema.decode(&v, "f0").unwrap(), Decoded::Continuous(1.5));
        assert!(schema.decode(&v, "nope").is_err());
    }
}
