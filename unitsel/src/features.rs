//! 特徴量スキーマと特徴ベクトル
//!
//! インベントリのユニットと合成ターゲットは、どちらも同じ[`FeatureSchema`]に従って
//! [`FeatureVector`]へエンコードされます。
pub(crate) mod schema;
pub(crate) mod vector;
pub(crate) mod weight;

pub use crate::features::schema::{
    Decoded, FeatureDef, FeatureKind, FeatureSchema, UNDEFINED_LABEL, UNDEFINED_VALUE,
};
pub use crate::features::vector::{FeatureVector, Value};
pub use crate::features::weight::WeightFunction;
