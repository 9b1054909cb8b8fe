//! テキストファイルからユニットデータベースを構築するビルダー

use std::io::{BufRead, BufReader, Read};

use crate::cost::JoinFeatures;
use crate::database::UnitDatabase;
use crate::errors::{Result, UnitSelError};
use crate::features::FeatureSchema;
use crate::index::FeatureIndex;
use crate::unit::Unit;
use crate::utils::parse_csv_row;

const NUM_UNIT_COLUMNS: usize = 4;

/// スキーマ、インベントリ、接続記述子から[`UnitDatabase`]を構築するビルダー
pub struct UnitDatabaseBuilder {}

impl UnitDatabaseBuilder {
    /// テキスト形式のファイルからデータベースを構築します。
    ///
    /// インベントリは1行1ユニットのCSVで、`phone,file_id,start,duration`の後に
    /// スキーマ順の特徴量の値が続きます。`#`で始まる行と空行は無視されます。
    /// 構築はインデックスのソートを含むため、リクエスト処理の外で行ってください。
    ///
    /// # 引数
    ///
    /// * `schema_rdr` - スキーマ定義のリーダー
    /// * `units_rdr` - インベントリCSVのリーダー
    /// * `join_weights_rdr` - 接続記述子の重み定義のリーダー
    /// * `join_rdr` - 接続記述子CSVのリーダー
    /// * `sequence` - インデックスの分割に使う特徴量名の列
    ///
    /// # エラー
    ///
    /// いずれかのファイルの形式が不正な場合、インベントリに未知の値がある場合、
    /// または特徴量列が不正な場合にエラーを返します。
    pub fn from_readers<S, U, W, J, N>(
        schema_rdr: S,
        units_rdr: U,
        join_weights_rdr: W,
        join_rdr: J,
        sequence: &[N],
    ) -> Result<UnitDatabase>
    where
        S: Read,
        U: Read,
        W: Read,
        J: Read,
        N: AsRef<str>,
    {
        let schema = FeatureSchema::from_reader(schema_rdr)?;
        let (units, vectors) = Self::parse_units(&schema, units_rdr)?;
        let join = JoinFeatures::from_readers(join_weights_rdr, join_rdr, units.len())?;
        Self::build(schema, units, vectors, join, sequence)
    }

    /// 接続記述子を持たないデータベースを構築します。
    ///
    /// 接続コストは基本ペナルティと連続性だけで決まります。
    pub fn from_readers_without_join<S, U, N>(
        schema_rdr: S,
        units_rdr: U,
        sequence: &[N],
    ) -> Result<UnitDatabase>
    where
        S: Read,
        U: Read,
        N: AsRef<str>,
    {
        let schema = FeatureSchema::from_reader(schema_rdr)?;
        let (units, vectors) = Self::parse_units(&schema, units_rdr)?;
        Self::build(schema, units, vectors, JoinFeatures::empty(), sequence)
    }

    fn build<N>(
        schema: FeatureSchema,
        units: Vec<Unit>,
        vectors: Vec<crate::features::FeatureVector>,
        join: JoinFeatures,
        sequence: &[N],
    ) -> Result<UnitDatabase>
    where
        N: AsRef<str>,
    {
        if units.is_empty() {
            return Err(UnitSelError::invalid_argument(
                "units_rdr",
                "the unit inventory is empty",
            ));
        }
        let index = FeatureIndex::build(&schema, &vectors, sequence)?;
        Ok(UnitDatabase::new(schema, units, vectors, join, index))
    }

    fn parse_units<U>(
        schema: &FeatureSchema,
        rdr: U,
    ) -> Result<(Vec<Unit>, Vec<crate::features::FeatureVector>)>
    where
        U: Read,
    {
        let mut units = vec![];
        let mut vectors = vec![];
        for (i, line) in BufReader::new(rdr).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() || line.starts_with('#') {
                continue;
            }
            let fields = parse_csv_row(&line, "units")?;
            if fields.len() != NUM_UNIT_COLUMNS + schema.len() {
                return Err(UnitSelError::invalid_format(
                    "units",
                    format!(
                        "line {}: expected {} fields, got {}",
                        i + 1,
                        NUM_UNIT_COLUMNS + schema.len(),
                        fields.len()
                    ),
                ));
            }
            let id = u32::try_from(units.len())?;
            let unit = Unit::new(
                &fields[0],
                fields[1].parse()?,
                fields[2].parse()?,
                fields[3].parse()?,
            );
            let vector = schema.encode(&fields[NUM_UNIT_COLUMNS..], id)?;
            units.push(unit);
            vectors.push(vector);
        }
        Ok((units, vectors))
    }
}
