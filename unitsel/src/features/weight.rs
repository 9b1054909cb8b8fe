//! 連続値の距離を計算する重み関数

use std::fmt;

use rkyv::{Archive, Deserialize, Serialize};

use crate::errors::{Result, UnitSelError};

/// 名前で解決される重み関数。
///
/// 連続値特徴量と接続記述子の各次元に対して、2値間の距離を与えます。
#[derive(Archive, Serialize, Deserialize, Debug, Default, Clone, Copy, PartialEq)]
pub enum WeightFunction {
    /// `|a - b|`
    #[default]
    Linear,
    /// `|a - b| <= t` なら0、それ以外は1
    Step(f32),
}

impl WeightFunction {
    /// 関数名と任意のパラメータから重み関数を解決します。
    ///
    /// # 引数
    ///
    /// * `name` - `linear` または `step`
    /// * `param` - `step` の閾値
    ///
    /// # エラー
    ///
    /// 未知の関数名、または `step` に閾値がない場合にエラーを返します。
    pub fn from_name(name: &str, param: Option<&str>) -> Result<Self> {
        match (name, param) {
            ("linear", None) => Ok(Self::Linear),
            ("step", Some(t)) => {
                let t: f32 = t.parse()?;
                if !(t >= 0.0) {
                    return Err(UnitSelError::invalid_format(
                        "weight function",
                        format!("step threshold must be non-negative: {t}"),
                    ));
                }
                Ok(Self::Step(t))
            }
            _ => Err(UnitSelError::invalid_format(
                "weight function",
                format!("unknown weight function: {name} {}", param.unwrap_or("")),
            )),
        }
    }

    /// 2値間の距離を返します。
    #[inline(always)]
    pub fn cost(&self, a: f32, b: f32) -> f64 {
        let d = (f64::from(a) - f64::from(b)).abs();
        match self {
            Self::Linear => d,
            Self::Step(t) => {
                if d <= f64::from(*t) {
                    0.0
                } else {
                    1.0
                }
            }
        }
    }
}

impl fmt::Display for WeightFunction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Linear => write!(f, "linear"),
            Self::Step(t) => write!(f, "step {t}"),
        }
    }
}

/// 非負の重みを合計1に正規化します。
///
/// 全ての重みが0の場合は一様な重みにします。
pub(crate) fn normalize_weights(weights: &mut [f32], name: &'static str) -> Result<()> {
    if let Some(w) = weights.iter().find(|w| !(**w >= 0.0) || !w.is_finite()) {
        return Err(UnitSelError::invalid_format(
            name,
            format!("weights must be finite and non-negative: {w}"),
        ));
    }
    let sum: f32 = weights.iter().sum();
    if sum == 0.0 {
        let n = weights.len() as f32;
        weights.iter_mut().for_each(|w| *w = 1.0 / n);
    } else {
        weights.iter_mut().for_each(|w| *w /= sum);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_name() {
        assert_eq!(WeightFunction::from_name("linear", None).unwrap(), WeightFunction::Linear);
        assert_eq!(
            WeightFunction::from_name("step", Some("0.25")).unwrap(),
            WeightFunction::Step(0.25)
        );
        assert!(WeightFunction::from_name("step", None).is_err());
        assert!(WeightFunction::from_name("cubic", None).is_err());
    }

    #[test]
    fn test_cost() {
        assert_eq!(WeightFunction::Linear.cost(1.0, 3.5), 2.5);
        assert_eq!(WeightFunction::Step(1.0).cost(1.0, 1.5), 0.0);
        assert_eq!(WeightFunction::Step(1.0).cost(1.0, 2.5), 1.0);
    }

    #[test]
    fn test_normalize() {
        let mut w = [1.0, 3.0];
        normalize_weights(&mut w, "test").unwrap();
        assert_eq!(w, [0.25, 0.75]);

        let mut w = [0.0, 0.0];
        normalize_weights(&mut w, "test").unwrap();
        assert_eq!(w, [0.5, 0.5]);

        let mut w = [1.0, -1.0];
        assert!(normalize_weights(&mut w, "test").is_err());
    }
}
