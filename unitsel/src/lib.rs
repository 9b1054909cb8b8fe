//! # unitsel
//!
//! 波形接続型音声合成のためのユニット選択エンジンです。
//!
//! ## 概要
//!
//! 合成するターゲット（音素ごとの言語・韻律特徴量）の列に対して、録音済みの
//! ユニットインベントリから、ターゲットとの不一致（ターゲットコスト）と
//! 接続の不自然さ（接続コスト）の重み付き和が最小となるユニット列を選びます。
//!
//! ## 主な機能
//!
//! - **特徴量スキーマ**: 列挙型と連続値の特徴量をコンパクトなベクトルにエンコード
//! - **決定木（CART）**: 外部で学習された木の読み込みと評価
//! - **特徴量インデックス**: 多段ソートによる高速な候補検索
//! - **Viterbi探索**: ビーム枝刈り、回復処理、協調的なキャンセルに対応
//! - **rkyvによる永続化**: 構築済みのデータベースをメモリマップで読み込み
//!
//! ## 使用例
//!
//! ```
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! use std::sync::Arc;
//! use unitsel::{SelectorConfig, UnitDatabaseBuilder, UnitSelector, Voice};
//!
//! let schema = "ByteValuedFeatureProcessors
//! 1 | phone 0 _ a i
//! ShortValuedFeatureProcessors
//! ContinuousFeatureProcessors";
//! let units = "_,0,0,100,_
//! a,0,100,80,a
//! i,0,180,90,i
//! a,1,0,70,a";
//!
//! let db = UnitDatabaseBuilder::from_readers_without_join(
//!     schema.as_bytes(),
//!     units.as_bytes(),
//!     &["phone"],
//! )?;
//! let voice = Arc::new(Voice::new(db));
//! let selector = UnitSelector::new(voice, SelectorConfig::default())?;
//! let mut worker = selector.new_worker();
//!
//! worker.push_target_raw(&["a"])?;
//! worker.push_target_raw(&["i"])?;
//! worker.select()?;
//!
//! let units: Vec<u32> = worker.selected().iter().map(|u| u.unit).collect();
//! assert_eq!(units, vec![1, 2]);
//! assert_eq!(worker.total_cost(), 0.0);
//! # Ok(())
//! # }
//! ```
#![cfg_attr(docsrs, feature(doc_cfg))]

#[cfg(not(any(target_pointer_width = "32", target_pointer_width = "64")))]
compile_error!("`target_pointer_width` must be 32 or 64");

/// 決定木（CART）
pub mod cart;

/// ターゲットコストと接続コスト
pub mod cost;

/// ユニットデータベースとビルダー
pub mod database;

/// エラー型の定義
pub mod errors;

/// 特徴量スキーマと特徴ベクトル
pub mod features;

/// 多段ソート済み特徴量インデックス
pub mod index;

/// Viterbi探索によるユニット選択
pub mod selector;

/// ユニットの型定義
pub mod unit;

/// 内部ユーティリティ関数
pub mod utils;

/// 読み込み済みの音声
pub mod voice;


// Re-exports
pub use cart::DecisionTree;
pub use database::{UnitDatabase, UnitDatabaseBuilder};
pub use errors::{Result, UnitSelError};
pub use features::{FeatureSchema, FeatureVector};
pub use index::{FeatureIndex, StopPolicy};
pub use selector::config::SelectorConfig;
pub use selector::worker::{CancelHandle, SelectorState, Worker};
pub use selector::UnitSelector;
pub use unit::{SelectedUnit, Unit};
pub use voice::Voice;

/// このライブラリのバージョン番号
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
