//! エンコード済み特徴ベクトル

use rkyv::{Archive, Deserialize, Serialize};

/// エンコード済みの特徴量値。
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    /// 列挙型特徴量の値番号
    Enum(u16),
    /// 連続値特徴量の値
    Continuous(f32),
}

/// [`FeatureSchema`](super::FeatureSchema)に従ってエンコードされた不変の特徴ベクトル。
///
/// 値はスキーマと同じ順序で、Enum8、Enum16、連続値のブロックに分かれて格納されます。
/// `origin` はベクトルの由来（インベントリのユニット番号、またはターゲット番号）です。
#[derive(Archive, Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct FeatureVector {
    pub(crate) origin: u32,
    pub(crate) bytes: Vec<u8>,
    pub(crate) shorts: Vec<u16>,
    pub(crate) floats: Vec<f32>,
}

impl FeatureVector {
    pub(crate) fn new(origin: u32, bytes: Vec<u8>, shorts: Vec<u16>, floats: Vec<f32>) -> Self {
        Self {
            origin,
            bytes,
            shorts,
            floats,
        }
    }

    /// このベクトルの由来を返します。
    #[inline(always)]
    pub fn origin(&self) -> u32 {
        self.origin
    }

    /// 特徴量の数を返します。
    #[inline(always)]
    pub fn len(&self) -> usize {
        self.bytes.len() + self.shorts.len() + self.floats.len()
    }

    /// 特徴量を一つも持たない場合に`true`を返します。
    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `i`番目の列挙型特徴量の値番号を返します。
    ///
    /// # パニック
    ///
    /// `i`が列挙型特徴量を指していない場合にパニックします。
    #[inline(always)]
    pub fn enum_value(&self, i: usize) -> u16 {
        if i < self.bytes.len() {
            u16::from(self.bytes[i])
        } else {
            self.shorts[i - self.bytes.len()]
        }
    }

    /// `i`番目の連続値特徴量の値を返します。
    ///
    /// # パニック
    ///
    /// `i`が連続値特徴量を指していない場合にパニックします。
    #[inline(always)]
    pub fn continuous(&self, i: usize) -> f32 {
        self.floats[i - self.bytes.len() - self.shorts.len()]
    }

    /// `i`番目の特徴量の値を返します。
    pub fn value(&self, i: usize) -> Value {
        if i < self.bytes.len() + self.shorts.len() {
            Value::Enum(self.enum_value(i))
        } else {
            Value::Continuous(self.continuous(i))
        }
    }

    /// ビット単位で同一かどうかを判定します。
    ///
    /// `PartialEq`と異なり、NaNを含む連続値も比較できます。
    pub fn bit_eq(&self, other: &Self) -> bool {
        self.origin == other.origin
            && self.bytes == other.bytes
            && self.shorts == other.shorts
            && self.floats.len() == other.floats.len()
            && self
                .floats
                .iter()
                .zip(&other.floats)
                .all(|(a, b)| a.to_bits() == b.to_bits())
    }
}
