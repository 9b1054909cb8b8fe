//! ユニットデータベース
//!
//! スキーマ定義、ユニット、ユニットの特徴ベクトル、接続記述子、特徴量インデックスを
//! 一つにまとめたものです。構築済みのデータベースは`rkyv`アーカイブとして保存でき、
//! 起動時にインデックスを作り直す必要がありません。
mod builder;

use std::fs::File;
use std::io::{Read, Write};

use memmap2::Mmap;
use rkyv::rancor::Error;
use rkyv::util::AlignedVec;
use rkyv::{
    access, api::serialize_using, ser::allocator::Arena, ser::sharing::Share,
    ser::writer::IoWriter, ser::Serializer, util::with_arena, Archive, Deserialize,
    Serialize,
};

use crate::cost::JoinFeatures;
use crate::errors::{Result, UnitSelError};
use crate::features::{FeatureDef, FeatureSchema, FeatureVector};
use crate::index::FeatureIndex;
use crate::unit::Unit;

pub use crate::database::builder::UnitDatabaseBuilder;

/// ユニットデータベースを識別するマジックバイト。
///
/// バージョンはアーカイブ形式のもので、クレートのバージョンとは独立しています。
pub const DATABASE_MAGIC: &[u8] = b"UnitSelDatabase 0.1\n";

const DATABASE_MAGIC_LEN: usize = DATABASE_MAGIC.len();
const RKYV_ALIGNMENT: usize = 16;
const PADDING_LEN: usize =
    (RKYV_ALIGNMENT - (DATABASE_MAGIC_LEN % RKYV_ALIGNMENT)) % RKYV_ALIGNMENT;
const DATA_START: usize = DATABASE_MAGIC_LEN + PADDING_LEN;

/// アーカイブされるデータベースの中身。
#[derive(Archive, Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct UnitDatabaseInner {
    defs: Vec<FeatureDef>,
    units: Vec<Unit>,
    vectors: Vec<FeatureVector>,
    join: JoinFeatures,
    index: FeatureIndex,
}

/// ユニットデータベース。
///
/// 読み込み後は不変で、[`Voice`](crate::Voice)を通じて複数のリクエストから共有されます。
#[derive(Debug, Clone)]
pub struct UnitDatabase {
    schema: FeatureSchema,
    inner: UnitDatabaseInner,
}

impl UnitDatabase {
    pub(crate) fn new(
        schema: FeatureSchema,
        units: Vec<Unit>,
        vectors: Vec<FeatureVector>,
        join: JoinFeatures,
        index: FeatureIndex,
    ) -> Self {
        Self {
            inner: UnitDatabaseInner {
                defs: schema.defs().to_vec(),
                units,
                vectors,
                join,
                index,
            },
            schema,
        }
    }

    fn from_inner(inner: UnitDatabaseInner) -> Result<Self> {
        let schema = FeatureSchema::from_normalized_defs(inner.defs.clone())?;
        let n = inner.units.len();
        if inner.vectors.len() != n {
            return Err(UnitSelError::invalid_format(
                "database",
                format!("expected {n} vectors, got {}", inner.vectors.len()),
            ));
        }
        inner.index.validate(&schema, n)?;
        inner.join.validate(n)?;
        if let Some(v) = inner.vectors.iter().find(|v| !schema.conforms(v)) {
            return Err(UnitSelError::invalid_format(
                "database",
                format!("vector of unit {} does not conform to the schema", v.origin()),
            ));
        }
        Ok(Self { schema, inner })
    }

    /// 特徴量スキーマ
    #[inline(always)]
    pub fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    /// インベントリのユニット
    #[inline(always)]
    pub fn units(&self) -> &[Unit] {
        &self.inner.units
    }

    /// ユニットの特徴ベクトル。`i`番目はユニット`i`のもの
    #[inline(always)]
    pub fn vectors(&self) -> &[FeatureVector] {
        &self.inner.vectors
    }

    /// 特徴量インデックス
    #[inline(always)]
    pub fn index(&self) -> &FeatureIndex {
        &self.inner.index
    }

    /// 接続記述子
    #[inline(always)]
    pub fn join_features(&self) -> &JoinFeatures {
        &self.inner.join
    }

    /// ユニット数
    #[inline(always)]
    pub fn num_units(&self) -> usize {
        self.inner.units.len()
    }

    /// 音素`phone`を持つ最初のユニットの番号を返します。
    pub fn find_phone(&self, phone: &str) -> Option<u32> {
        self.inner
            .units
            .iter()
            .position(|u| u.phone() == phone)
            .and_then(|i| u32::try_from(i).ok())
    }

    /// データベースをシリアライズしてライターに書き込みます。
    ///
    /// # エラー
    ///
    /// 書き込みに失敗した場合、または`rkyv`のシリアライズに失敗した場合にエラーを返します。
    pub fn write<W>(&self, mut wtr: W) -> Result<()>
    where
        W: Write,
    {
        wtr.write_all(DATABASE_MAGIC)?;

        let padding_bytes = vec![0xFF; PADDING_LEN];
        wtr.write_all(&padding_bytes)?;

        with_arena(|arena: &mut Arena| {
            let writer = IoWriter::new(&mut wtr);
            let mut serializer = Serializer::new(writer, arena.acquire(), Share::new());
            serialize_using::<_, rkyv::rancor::Error>(&self.inner, &mut serializer)
        })
        .map_err(|e| {
            UnitSelError::invalid_state("rkyv serialization failed".to_string(), e.to_string())
        })?;

        Ok(())
    }

    /// リーダーからデータベースを読み込みます。
    ///
    /// # エラー
    ///
    /// マジックバイトが一致しない場合、アーカイブの検証に失敗した場合、
    /// または中身が整合しない場合にエラーを返します。
    pub fn read<R: Read>(mut rdr: R) -> Result<Self> {
        let mut magic = [0; DATABASE_MAGIC_LEN];
        rdr.read_exact(&mut magic)?;
        if magic != DATABASE_MAGIC {
            return Err(UnitSelError::invalid_argument(
                "rdr",
                "The magic number of the input database mismatches.",
            ));
        }

        let mut padding_buf = vec![0; PADDING_LEN];
        rdr.read_exact(&mut padding_buf)?;

        let mut buffer = Vec::new();
        rdr.read_to_end(&mut buffer)?;

        let mut aligned_bytes = AlignedVec::<RKYV_ALIGNMENT>::with_capacity(buffer.len());
        aligned_bytes.extend_from_slice(&buffer);

        Self::from_archive_bytes(&aligned_bytes)
    }

    /// メモリマッピングを使用してファイルパスからデータベースを読み込みます。
    ///
    /// # エラー
    ///
    /// ファイルを開けない場合、または[`Self::read`]と同じ条件でエラーを返します。
    pub fn from_path<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let mut file = File::open(path.as_ref()).map_err(|e| {
            UnitSelError::invalid_argument("path", format!("Failed to open database file: {}", e))
        })?;
        let mut magic = [0u8; DATABASE_MAGIC_LEN];
        file.read_exact(&mut magic)?;
        if magic != DATABASE_MAGIC {
            return Err(UnitSelError::invalid_argument(
                "path",
                "The magic number of the input database mismatches.",
            ));
        }

        // SAFETY: the mapping is read-only and dropped before this function returns.
        let mmap = unsafe { Mmap::map(&file)? };
        let Some(data_bytes) = mmap.get(DATA_START..) else {
            return Err(UnitSelError::invalid_argument(
                "path",
                "Database file too small or corrupted.",
            ));
        };

        // The mapping is page aligned, so this only copies when DATA_START is misaligned.
        if (data_bytes.as_ptr() as usize) % RKYV_ALIGNMENT == 0 {
            Self::from_archive_bytes(data_bytes)
        } else {
            let mut aligned_bytes = AlignedVec::<RKYV_ALIGNMENT>::with_capacity(data_bytes.len());
            aligned_bytes.extend_from_slice(data_bytes);
            Self::from_archive_bytes(&aligned_bytes)
        }
    }

    fn from_archive_bytes(bytes: &[u8]) -> Result<Self> {
        let archived = access::<ArchivedUnitDatabaseInner, Error>(bytes).map_err(|e| {
            UnitSelError::invalid_state(
                "rkyv validation failed. The database file may be corrupted or incompatible."
                    .to_string(),
                e.to_string(),
            )
        })?;
        let inner = rkyv::deserialize::<UnitDatabaseInner, Error>(archived).map_err(|e| {
            UnitSelError::invalid_state("rkyv deserialization failed".to_string(), e.to_string())
        })?;
        Self::from_inner(inner)
    }
}
