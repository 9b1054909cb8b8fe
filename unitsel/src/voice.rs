//! 読み込み済みの音声
//!
//! ユニットデータベースと名前付きの決定木を保持するコンテキストです。
//! 選択器はこのコンテキストを共有して構築され、グローバルな登録表は使いません。

use std::sync::Arc;

use hashbrown::HashMap;

use crate::cart::DecisionTree;
use crate::database::UnitDatabase;
use crate::errors::{Result, UnitSelError};

/// ユニットデータベースと名前付き決定木の組。
///
/// 読み込みが終わった後は不変で、[`Arc`]で包んで複数の選択器から共有します。
#[derive(Debug, Clone)]
pub struct Voice {
    database: UnitDatabase,
    trees: HashMap<String, Arc<DecisionTree>>,
}

impl Voice {
    /// 決定木を持たない音声を作成します。
    pub fn new(database: UnitDatabase) -> Self {
        Self {
            database,
            trees: HashMap::new(),
        }
    }

    /// 名前付きの決定木を追加します。
    ///
    /// # 引数
    ///
    /// * `name` - 設定から参照される名前
    /// * `tree` - 音声のスキーマに従う決定木
    ///
    /// # エラー
    ///
    /// 同じ名前の決定木が既にある場合、または木のテストが音声のスキーマに
    /// 適合しない場合にエラーを返します。
    pub fn add_tree<S>(&mut self, name: S, tree: DecisionTree) -> Result<()>
    where
        S: Into<String>,
    {
        let name = name.into();
        if self.trees.contains_key(&name) {
            return Err(UnitSelError::invalid_argument(
                "name",
                format!("duplicate tree name: {name}"),
            ));
        }
        tree.verify_schema(self.database.schema())?;
        self.trees.insert(name, Arc::new(tree));
        Ok(())
    }

    /// 名前で決定木を取得します。
    #[inline]
    pub fn tree(&self, name: &str) -> Option<&Arc<DecisionTree>> {
        self.trees.get(name)
    }

    /// ユニットデータベース
    #[inline(always)]
    pub fn database(&self) -> &UnitDatabase {
        &self.database
    }
}
