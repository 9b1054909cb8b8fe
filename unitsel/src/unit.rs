//! 録音インベントリのユニット

use rkyv::{Archive, Deserialize, Serialize};

/// 録音インベントリ内の区間への参照。
///
/// インベントリの読み込み後は不変です。
#[derive(Archive, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Unit {
    pub(crate) phone: String,
    pub(crate) file_id: u32,
    pub(crate) start: u64,
    pub(crate) duration: u32,
}

impl Unit {
    /// 新しいユニットを作成します。
    ///
    /// # 引数
    ///
    /// * `phone` - 音素の識別子
    /// * `file_id` - 録音ファイルの番号
    /// * `start` - ファイル内の開始位置（サンプル）
    /// * `duration` - 長さ（サンプル）
    pub fn new(phone: &str, file_id: u32, start: u64, duration: u32) -> Self {
        Self {
            phone: phone.to_string(),
            file_id,
            start,
            duration,
        }
    }

    /// 音素の識別子
    #[inline(always)]
    pub fn phone(&self) -> &str {
        &self.phone
    }

    /// 録音ファイルの番号
    #[inline(always)]
    pub fn file_id(&self) -> u32 {
        self.file_id
    }

    /// ファイル内の開始位置
    #[inline(always)]
    pub fn start(&self) -> u64 {
        self.start
    }

    /// 長さ
    #[inline(always)]
    pub fn duration(&self) -> u32 {
        self.duration
    }

    /// 元の録音で`next`がこのユニットの直後に続く場合に`true`を返します。
    #[inline(always)]
    pub fn precedes(&self, next: &Unit) -> bool {
        self.file_id == next.file_id
            && self.start.checked_add(u64::from(self.duration)) == Some(next.start)
    }
}

/// 選択結果の一要素。外部の連結処理に渡されます。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectedUnit {
    /// インベントリのユニット番号
    pub unit: u32,
    /// 対応するターゲットの番号
    pub target_index: usize,
    /// フィラー（無音）ユニットで置き換えられた場合に`true`
    pub is_filler: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_precedes() {
        let a = Unit::new("a", 1, 100, 50);
        assert!(a.precedes(&Unit::new("b", 1, 150, 10)));
        assert!(!a.precedes(&Unit::new("b", 1, 151, 10)));
        assert!(!a.precedes(&Unit::new("b", 2, 150, 10)));
    }

    #[test]
    fn test_precedes_at_end_of_range() {
        let a = Unit::new("a", 1, u64::MAX, 50);
        assert!(!a.precedes(&Unit::new("b", 1, 49, 10)));
        assert!(!a.precedes(&Unit::new("b", 1, u64::MAX, 10)));
        let b = Unit::new("b", 1, u64::MAX - 50, 50);
        assert!(b.precedes(&Unit::new("c", 1, u64::MAX, 10)));
    }
}
