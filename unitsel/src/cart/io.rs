//! 決定木のバイナリ形式
//!
//! 全ての数値はビッグエンディアンです。
//!
//! ```text
//! magic         "UnitSelCART 1\n"
//! u32           スキーマの特徴量数
//! u32           ノード数
//! nodes         前順（深さ優先）に並んだノード
//! ```
//!
//! 各ノードは1バイトのタグで始まります。
//!
//! - `0` 内部ノード: `u32` 特徴量位置、`u8` テスト種別（0: 等値, 1: `<=`）、
//!   `u32` テスト値（等値は値番号、閾値は`f32`のビット列）、`u8` 子の数（常に2）、
//!   続いて真の子、偽の子がインラインで並ぶ
//! - `1` 分布葉: `u32` 個数、続いて個数分の(`u32` 出力値, `f32` 確率)
//! - `2` ユニット葉: `u32` 個数、続いて個数分の`u32` ユニット番号
use std::io::{Read, Write};

use crate::cart::{DecisionTree, LeafPayload, Node, Test};
use crate::errors::{Result, UnitSelError};
use crate::features::FeatureSchema;
use crate::utils::{self, FromU32};

/// 決定木ファイルを識別するマジックバイト。
pub const CART_MAGIC: &[u8] = b"UnitSelCART 1\n";

const TAG_DECISION: u8 = 0;
const TAG_DISTRIBUTION: u8 = 1;
const TAG_UNITS: u8 = 2;

const TEST_EQUALS: u8 = 0;
const TEST_LESS_EQ: u8 = 1;

const UNSET: u32 = u32::MAX;

impl DecisionTree {
    /// バイナリ形式の決定木を読み込みます。
    ///
    /// 読み込みは明示的なスタックで行われ、木の深さに依存しません。
    ///
    /// # 引数
    ///
    /// * `rdr` - 決定木ファイルのリーダー
    /// * `schema` - テストが参照するスキーマ
    ///
    /// # エラー
    ///
    /// マジックバイトや特徴量数が一致しない場合、二分でない内部ノードがある場合、
    /// ノード数が宣言と異なる場合、または[`DecisionTree::new`]の検証に失敗した場合に
    /// エラーを返します。
    pub fn read<R: Read>(mut rdr: R, schema: &FeatureSchema) -> Result<Self> {
        let mut magic = [0; CART_MAGIC.len()];
        rdr.read_exact(&mut magic)?;
        if magic != CART_MAGIC {
            return Err(UnitSelError::invalid_format(
                "tree",
                "The magic number of the input tree mismatches.",
            ));
        }
        let num_features = usize::from_u32(utils::read_u32(&mut rdr)?);
        if num_features != schema.len() {
            return Err(UnitSelError::invalid_format(
                "tree",
                format!(
                    "tree was built for {num_features} features, but the schema has {}",
                    schema.len()
                ),
            ));
        }
        let num_nodes = usize::from_u32(utils::read_u32(&mut rdr)?);

        let mut nodes: Vec<Node> = Vec::with_capacity(num_nodes.min(1 << 16));
        // (decision node, number of children attached so far)
        let mut pending: Vec<(usize, u8)> = vec![];
        loop {
            if nodes.len() == num_nodes {
                return Err(UnitSelError::invalid_format(
                    "tree",
                    format!("more than {num_nodes} nodes in the stream"),
                ));
            }
            let idx = u32::try_from(nodes.len())?;
            let node = read_node(&mut rdr, idx)?;
            let is_decision = matches!(node, Node::Decision { .. });
            nodes.push(node);

            if let Some((parent, filled)) = pending.last_mut() {
                if let Node::Decision { yes, no, .. } = &mut nodes[*parent] {
                    if *filled == 0 {
                        *yes = idx;
                    } else {
                        *no = idx;
                    }
                }
                *filled += 1;
                if *filled == 2 {
                    pending.pop();
                }
            }
            if is_decision {
                pending.push((usize::from_u32(idx), 0));
            }
            if pending.is_empty() {
                break;
            }
        }
        if nodes.len() != num_nodes {
            return Err(UnitSelError::invalid_format(
                "tree",
                format!("expected {num_nodes} nodes, got {}", nodes.len()),
            ));
        }

        Self::new(schema, nodes)
    }

    /// 決定木をバイナリ形式で書き出します。
    ///
    /// # エラー
    ///
    /// 書き込みに失敗した場合にエラーを返します。
    pub fn write<W: Write>(&self, mut wtr: W, schema: &FeatureSchema) -> Result<()> {
        wtr.write_all(CART_MAGIC)?;
        utils::write_u32(&mut wtr, u32::try_from(schema.len())?)?;
        utils::write_u32(&mut wtr, u32::try_from(self.nodes.len())?)?;

        let mut stack = vec![0u32];
        while let Some(idx) = stack.pop() {
            match &self.nodes[usize::from_u32(idx)] {
                Node::Decision {
                    feature,
                    test,
                    yes,
                    no,
                } => {
                    utils::write_u8(&mut wtr, TAG_DECISION)?;
                    utils::write_u32(&mut wtr, *feature)?;
                    match test {
                        Test::Equals(v) => {
                            utils::write_u8(&mut wtr, TEST_EQUALS)?;
                            utils::write_u32(&mut wtr, u32::from(*v))?;
                        }
                        Test::LessEq(t) => {
                            utils::write_u8(&mut wtr, TEST_LESS_EQ)?;
                            utils::write_f32(&mut wtr, *t)?;
                        }
                    }
                    utils::write_u8(&mut wtr, 2)?;
                    stack.push(*no);
                    stack.push(*yes);
                }
                Node::Leaf(LeafPayload::Distribution(dist)) => {
                    utils::write_u8(&mut wtr, TAG_DISTRIBUTION)?;
                    utils::write_u32(&mut wtr, u32::try_from(dist.len())?)?;
                    for &(v, p) in dist {
                        utils::write_u32(&mut wtr, u32::from(v))?;
                        utils::write_f32(&mut wtr, p)?;
                    }
                }
                Node::Leaf(LeafPayload::Units(units)) => {
                    utils::write_u8(&mut wtr, TAG_UNITS)?;
                    utils::write_u32(&mut wtr, u32::try_from(units.len())?)?;
                    for &u in units {
                        utils::write_u32(&mut wtr, u)?;
                    }
                }
            }
        }
        Ok(())
    }
}

fn read_node<R: Read>(rdr: &mut R, idx: u32) -> Result<Node> {
    match utils::read_u8(rdr)? {
        TAG_DECISION => {
            let feature = utils::read_u32(rdr)?;
            let test = match utils::read_u8(rdr)? {
                TEST_EQUALS => {
                    let v = utils::read_u32(rdr)?;
                    Test::Equals(u16::try_from(v).map_err(|_| {
                        UnitSelError::invalid_format(
                            "tree",
                            format!("node {idx}: test value {v} out of range"),
                        )
                    })?)
                }
                TEST_LESS_EQ => Test::LessEq(utils::read_f32(rdr)?),
                t => {
                    return Err(UnitSelError::invalid_format(
                        "tree",
                        format!("node {idx}: unknown test kind {t}"),
                    ))
                }
            };
            let num_children = utils::read_u8(rdr)?;
            if num_children != 2 {
                return Err(UnitSelError::invalid_format(
                    "tree",
                    format!("node {idx}: non-binary split with {num_children} children"),
                ));
            }
            Ok(Node::Decision {
                feature,
                test,
                yes: UNSET,
                no: UNSET,
            })
        }
        TAG_DISTRIBUTION => {
            let len = utils::read_u32(rdr)?;
            let mut dist = Vec::with_capacity(usize::from_u32(len.min(1 << 16)));
            for _ in 0..len {
                let v = utils::read_u32(rdr)?;
                let v = u16::try_from(v).map_err(|_| {
                    UnitSelError::invalid_format(
                        "tree",
                        format!("node {idx}: output value {v} out of range"),
                    )
                })?;
                dist.push((v, utils::read_f32(rdr)?));
            }
            Ok(Node::Leaf(LeafPayload::Distribution(dist)))
        }
        TAG_UNITS => {
            let len = utils::read_u32(rdr)?;
            let mut units = Vec::with_capacity(usize::from_u32(len.min(1 << 16)));
            for _ in 0..len {
                units.push(utils::read_u32(rdr)?);
            }
            Ok(Node::Leaf(LeafPayload::Units(units)))
        }
        tag => Err(UnitSelError::invalid_format(
            "tree",
            format!("node {idx}: unknown node tag {tag}"),
        )),
    }
}
