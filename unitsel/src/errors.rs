//! エラー型の定義
//!
//! このモジュールは、unitselライブラリで使用されるすべてのエラー型を定義します。
//! 音声の読み込み時に発生するエラー（スキーマやツリーの不正など）は致命的ですが、
//! 合成時のエラー（未知の特徴量値、候補の欠如など）はライブラリ内部で回復されます。

use std::error::Error;
use std::fmt::{self, Debug};

/// unitsel専用のResult型
///
/// エラー型としてデフォルトで[`UnitSelError`]を使用します。
pub type Result<T, E = UnitSelError> = std::result::Result<T, E>;

/// unitselのエラー型
///
/// このライブラリで発生する可能性のあるすべてのエラーを表現します。
#[derive(Debug, thiserror::Error)]
pub enum UnitSelError {
    /// 無効な引数エラー
    ///
    /// [`InvalidArgumentError`]のエラーバリアント。
    #[error(transparent)]
    InvalidArgument(InvalidArgumentError),

    /// 無効なフォーマットエラー
    ///
    /// [`InvalidFormatError`]のエラーバリアント。
    #[error(transparent)]
    InvalidFormat(InvalidFormatError),

    /// 無効な状態エラー
    ///
    /// [`InvalidStateError`]のエラーバリアント。
    #[error(transparent)]
    InvalidState(InvalidStateError),

    /// 未知の特徴量値エラー
    ///
    /// [`UnknownValueError`]のエラーバリアント。
    #[error(transparent)]
    UnknownValue(UnknownValueError),

    /// 整数変換エラー
    #[error(transparent)]
    TryFromInt(std::num::TryFromIntError),

    /// 浮動小数点数パースエラー
    #[error(transparent)]
    ParseFloat(std::num::ParseFloatError),

    /// 整数パースエラー
    #[error(transparent)]
    ParseInt(std::num::ParseIntError),

    /// UTF-8エンコーディングエラー
    #[error(transparent)]
    Utf8(std::str::Utf8Error),

    /// I/Oエラー
    #[error(transparent)]
    IoError(#[from] std::io::Error),

    /// rkyvシリアライゼーションエラー
    #[error(transparent)]
    RkyvError(#[from] rkyv::rancor::Error),

    /// JSONデシリアライゼーションエラー
    ///
    /// 設定レコードや外部ツリーの読み込み時に発生します。
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl UnitSelError {
    /// 無効な引数エラーを生成します
    ///
    /// # 引数
    ///
    /// * `arg` - 引数の名前
    /// * `msg` - エラーメッセージ
    pub(crate) fn invalid_argument<S>(arg: &'static str, msg: S) -> Self
    where
        S: Into<String>,
    {
        Self::InvalidArgument(InvalidArgumentError {
            arg,
            msg: msg.into(),
        })
    }

    /// 無効なフォーマットエラーを生成します
    ///
    /// # 引数
    ///
    /// * `arg` - フォーマット名
    /// * `msg` - エラーメッセージ
    pub(crate) fn invalid_format<S>(arg: &'static str, msg: S) -> Self
    where
        S: Into<String>,
    {
        Self::InvalidFormat(InvalidFormatError {
            arg,
            msg: msg.into(),
        })
    }

    /// 無効な状態エラーを生成します
    ///
    /// # 引数
    ///
    /// * `msg` - エラーメッセージ
    /// * `cause` - エラーの原因
    pub(crate) fn invalid_state<S, M>(msg: S, cause: M) -> Self
    where
        S: Into<String>,
        M: Into<String>,
    {
        Self::InvalidState(InvalidStateError {
            msg: msg.into(),
            cause: cause.into(),
        })
    }

    /// 未知の特徴量値エラーを生成します
    ///
    /// # 引数
    ///
    /// * `feature` - 特徴量名
    /// * `value` - 正当な値集合に含まれない生の値
    pub(crate) fn unknown_value<F, V>(feature: F, value: V) -> Self
    where
        F: Into<String>,
        V: Into<String>,
    {
        Self::UnknownValue(UnknownValueError {
            feature: feature.into(),
            value: value.into(),
        })
    }
}

/// 引数が無効な場合に使用されるエラー
#[derive(Debug)]
pub struct InvalidArgumentError {
    /// 引数の名前
    pub(crate) arg: &'static str,

    /// エラーメッセージ
    pub(crate) msg: String,
}

impl fmt::Display for InvalidArgumentError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "InvalidArgumentError: {}: {}", self.arg, self.msg)
    }
}

impl Error for InvalidArgumentError {}

/// 入力フォーマットが無効な場合に使用されるエラー
#[derive(Debug)]
pub struct InvalidFormatError {
    /// フォーマットの名前
    pub(crate) arg: &'static str,

    /// エラーメッセージ
    pub(crate) msg: String,
}

impl fmt::Display for InvalidFormatError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "InvalidFormatError: {}: {}", self.arg, self.msg)
    }
}

impl Error for InvalidFormatError {}

/// 状態が無効な場合に使用されるエラー
#[derive(Debug)]
pub struct InvalidStateError {
    /// エラーメッセージ
    pub(crate) msg: String,

    /// エラーの根本原因
    pub(crate) cause: String,
}

impl fmt::Display for InvalidStateError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "InvalidStateError: {}: {}", self.msg, self.cause)
    }
}

impl Error for InvalidStateError {}

/// 特徴量の値が正当な値集合に含まれない場合に使用されるエラー
#[derive(Debug)]
pub struct UnknownValueError {
    /// 特徴量名
    pub(crate) feature: String,

    /// 生の値
    pub(crate) value: String,
}

impl UnknownValueError {
    /// 特徴量名を返します。
    pub fn feature(&self) -> &str {
        &self.feature
    }

    /// 拒否された生の値を返します。
    pub fn value(&self) -> &str {
        &self.value
    }
}

impl fmt::Display for UnknownValueError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "UnknownValueError: feature '{}' has no legal value '{}'",
            self.feature, self.value
        )
    }
}

impl Error for UnknownValueError {}

impl From<std::num::TryFromIntError> for UnitSelError {
    fn from(error: std::num::TryFromIntError) -> Self {
        Self::TryFromInt(error)
    }
}

impl From<std::num::ParseFloatError> for UnitSelError {
    fn from(error: std::num::ParseFloatError) -> Self {
        Self::ParseFloat(error)
    }
}

impl From<std::num::ParseIntError> for UnitSelError {
    fn from(error: std::num::ParseIntError) -> Self {
        Self::ParseInt(error)
    }
}

impl From<std::str::Utf8Error> for UnitSelError {
    fn from(error: std::str::Utf8Error) -> Self {
        Self::Utf8(error)
    }
}
