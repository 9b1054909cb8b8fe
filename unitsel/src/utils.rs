//! ユーティリティ関数と型変換トレイトを提供するモジュール
//!
//! - `FromU32`: u32からの型変換トレイト
//! - CSV行の解析と引用符処理
//! - ビッグエンディアンの整数・浮動小数点数の読み書き

use std::io::{Read, Write};

use csv_core::ReadFieldResult;

use crate::errors::{Result, UnitSelError};

/// u32から他の型への変換を提供するトレイト
pub trait FromU32 {
    /// u32値から実装型を生成する
    fn from_u32(src: u32) -> Self;
}

#[cfg(any(target_pointer_width = "32", target_pointer_width = "64"))]
impl FromU32 for usize {
    #[inline(always)]
    fn from_u32(src: u32) -> Self {
        // Since the pointer width is guaranteed to be 32 or 64,
        // the following process always succeeds.
        unsafe { Self::try_from(src).unwrap_unchecked() }
    }
}

/// CSV形式の行を解析してフィールドのベクターに分割する
///
/// ダブルクォートで囲まれたフィールドや、フィールド内のカンマも正しく処理します。
///
/// # 引数
///
/// * `row` - 解析するCSV形式の文字列
/// * `name` - エラーメッセージに使うファイル名
///
/// # エラー
///
/// フィールドが大きすぎる場合、またはUTF-8として不正な場合にエラーを返します。
///
/// # 例
///
/// ```
/// # use unitsel::utils::parse_csv_row;
/// let fields = parse_csv_row("a,\"1,2\"", "units").unwrap();
/// assert_eq!(fields, vec!["a", "1,2"]);
/// ```
pub fn parse_csv_row(row: &str, name: &'static str) -> Result<Vec<String>> {
    let mut fields = vec![];
    let mut rdr = csv_core::Reader::new();
    let mut bytes = row.as_bytes();
    let mut output = [0; 4096];
    loop {
        let (result, nin, nout) = rdr.read_field(bytes, &mut output);
        let end = match result {
            ReadFieldResult::InputEmpty => true,
            ReadFieldResult::Field { .. } => false,
            ReadFieldResult::End => true,
            ReadFieldResult::OutputFull => {
                return Err(UnitSelError::invalid_format(name, "Field too large"))
            }
        };
        fields.push(std::str::from_utf8(&output[..nout])?.to_string());
        if end {
            break;
        }
        bytes = &bytes[nin..];
    }
    Ok(fields)
}

pub(crate) fn read_u8<R: Read>(rdr: &mut R) -> Result<u8> {
    let mut buf = [0; 1];
    rdr.read_exact(&mut buf)?;
    Ok(buf[0])
}

pub(crate) fn read_u32<R: Read>(rdr: &mut R) -> Result<u32> {
    let mut buf = [0; 4];
    rdr.read_exact(&mut buf)?;
    Ok(u32::from_be_bytes(buf))
}

pub(crate) fn read_f32<R: Read>(rdr: &mut R) -> Result<f32> {
    let mut buf = [0; 4];
    rdr.read_exact(&mut buf)?;
    Ok(f32::from_be_bytes(buf))
}

pub(crate) fn write_u8<W: Write>(wtr: &mut W, v: u8) -> Result<()> {
    wtr.write_all(&[v])?;
    Ok(())
}

pub(crate) fn write_u32<W: Write>(wtr: &mut W, v: u32) -> Result<()> {
    wtr.write_all(&v.to_be_bytes())?;
    Ok(())
}

pub(crate) fn write_f32<W: Write>(wtr: &mut W, v: f32) -> Result<()> {
    wtr.write_all(&v.to_be_bytes())?;
    Ok(())
}
