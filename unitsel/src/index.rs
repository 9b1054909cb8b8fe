//! 多段ソート済み特徴量インデックス
//!
//! インベントリのユニットを、設定された特徴量列に沿って一段ずつ安定ソートし、
//! 値ごとの連続区間に分割したトライ状の木です。各ノードはユニット配列上の
//! `[from, to)` 区間を持ち、内部ノードは分割に使った特徴量と、ユニットが存在する
//! 値ごとの子を持ちます。どのユニットも持たない値の子は存在しません（死んだ枝）。
//!
//! 構築は明示的なスタックで行われ、深さは特徴量列の長さで抑えられます。
use rkyv::{Archive, Deserialize, Serialize};

use crate::errors::{Result, UnitSelError};
use crate::features::{FeatureSchema, FeatureVector};
use crate::utils::FromU32;

const LEAF: u32 = u32::MAX;

/// 検索の停止方針。
#[derive(serde::Deserialize, Debug, Default, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StopPolicy {
    /// 葉か死んだ枝に達するまで降りる
    #[default]
    FullDepth,
    /// 最大`n`回の分割で止まる
    MaxLevel(usize),
    /// さらに降りるとユニット数が`k`未満になる時点で止まる
    MinUnits(usize),
}

#[derive(Archive, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
struct IndexNode {
    from: u32,
    to: u32,
    /// Feature split on, or `LEAF`.
    feature: u32,
    edges_start: u32,
    edges_end: u32,
}

#[derive(Archive, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
struct IndexEdge {
    value: u16,
    node: u32,
}

/// 検索結果。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Retrieval<'a> {
    /// 一致したユニット番号の区間
    pub units: &'a [u32],
    /// 降りた分割の数
    pub depth: usize,
}

/// 多段ソート済み特徴量インデックス。
///
/// 一度構築された後は読み取り専用で、複数のリクエストから共有できます。
#[derive(Archive, Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct FeatureIndex {
    sequence: Vec<u32>,
    units: Vec<u32>,
    nodes: Vec<IndexNode>,
    edges: Vec<IndexEdge>,
}

impl FeatureIndex {
    /// ユニットの特徴ベクトルからインデックスを構築します。
    ///
    /// # 引数
    ///
    /// * `schema` - ベクトルが従うスキーマ
    /// * `vectors` - ユニットの特徴ベクトル。`i`番目のベクトルはユニット`i`のもの
    /// * `sequence` - 分割に使う列挙型特徴量の名前の列
    ///
    /// # エラー
    ///
    /// 特徴量名が存在しない場合、連続値特徴量や重複した特徴量が含まれる場合、
    /// またはベクトルがスキーマに適合しない場合にエラーを返します。
    pub fn build<S>(schema: &FeatureSchema, vectors: &[FeatureVector], sequence: &[S]) -> Result<Self>
    where
        S: AsRef<str>,
    {
        let mut seq = Vec::with_capacity(sequence.len());
        for name in sequence {
            let name = name.as_ref();
            let i = schema.feature_index(name).ok_or_else(|| {
                UnitSelError::invalid_argument("sequence", format!("unknown feature: {name}"))
            })?;
            if !schema.feature(i).kind().is_enum() {
                return Err(UnitSelError::invalid_argument(
                    "sequence",
                    format!("cannot index a continuous feature: {name}"),
                ));
            }
            let i = u32::try_from(i)?;
            if seq.contains(&i) {
                return Err(UnitSelError::invalid_argument(
                    "sequence",
                    format!("duplicate feature: {name}"),
                ));
            }
            seq.push(i);
        }
        if let Some(v) = vectors.iter().find(|v| !schema.conforms(v)) {
            return Err(UnitSelError::invalid_argument(
                "vectors",
                format!("vector of unit {} does not conform to the schema", v.origin()),
            ));
        }

        let mut units: Vec<u32> = (0..u32::try_from(vectors.len())?).collect();
        let mut nodes = vec![IndexNode {
            from: 0,
            to: u32::try_from(vectors.len())?,
            feature: LEAF,
            edges_start: 0,
            edges_end: 0,
        }];
        let mut edges = vec![];

        // (node, depth)
        let mut stack = vec![(0usize, 0usize)];
        while let Some((idx, depth)) = stack.pop() {
            let (from, to) = (usize::from_u32(nodes[idx].from), usize::from_u32(nodes[idx].to));
            let slice = &mut units[from..to];
            let Some(&feature) = seq.get(depth) else {
                slice.sort_unstable();
                continue;
            };
            let f = usize::from_u32(feature);
            slice.sort_by_key(|&u| vectors[usize::from_u32(u)].enum_value(f));

            let edges_start = u32::try_from(edges.len())?;
            let mut run_start = 0;
            while run_start < slice.len() {
                let value = vectors[usize::from_u32(slice[run_start])].enum_value(f);
                let run_len = slice[run_start..]
                    .iter()
                    .take_while(|&&u| vectors[usize::from_u32(u)].enum_value(f) == value)
                    .count();
                let child = u32::try_from(nodes.len())?;
                nodes.push(IndexNode {
                    from: u32::try_from(from + run_start)?,
                    to: u32::try_from(from + run_start + run_len)?,
                    feature: LEAF,
                    edges_start: 0,
                    edges_end: 0,
                });
                edges.push(IndexEdge { value, node: child });
                run_start += run_len;
            }
            let edges_end = u32::try_from(edges.len())?;
            nodes[idx].feature = feature;
            nodes[idx].edges_start = edges_start;
            nodes[idx].edges_end = edges_end;

            // Children are visited in ascending value order.
            for e in edges[usize::from_u32(edges_start)..usize::from_u32(edges_end)].iter().rev() {
                stack.push((usize::from_u32(e.node), depth + 1));
            }
        }

        log::debug!(
            "[unitsel] built feature index over {} units: {} nodes, {} levels",
            units.len(),
            nodes.len(),
            seq.len()
        );

        Ok(Self {
            sequence: seq,
            units,
            nodes,
            edges,
        })
    }

    /// クエリベクトルに一致するユニットを検索します。
    ///
    /// 根から、各内部ノードの特徴量についてクエリの値の子へ降ります。子が存在しない
    /// （死んだ枝の）場合は現在のノードで止まります。インデックスが空でなければ、
    /// 戻り値の区間は空になりません。
    ///
    /// # 引数
    ///
    /// * `query` - ターゲットの特徴ベクトル
    /// * `policy` - 停止方針
    pub fn retrieve(&self, query: &FeatureVector, policy: StopPolicy) -> Retrieval<'_> {
        let mut node = &self.nodes[0];
        let mut depth = 0;
        while node.feature != LEAF {
            if let StopPolicy::MaxLevel(n) = policy {
                if depth >= n {
                    break;
                }
            }
            let value = query.enum_value(usize::from_u32(node.feature));
            let Some(child) = self.child(node, value) else {
                break;
            };
            if let StopPolicy::MinUnits(k) = policy {
                if usize::from_u32(child.to - child.from) < k {
                    break;
                }
            }
            node = child;
            depth += 1;
        }
        Retrieval {
            units: &self.units[usize::from_u32(node.from)..usize::from_u32(node.to)],
            depth,
        }
    }

    fn child(&self, node: &IndexNode, value: u16) -> Option<&IndexNode> {
        let edges = &self.edges[usize::from_u32(node.edges_start)..usize::from_u32(node.edges_end)];
        edges
            .binary_search_by_key(&value, |e| e.value)
            .ok()
            .map(|i| &self.nodes[usize::from_u32(edges[i].node)])
    }

    /// 木の順序で全ての葉の区間を返します。
    ///
    /// 区間を連結すると、インデックス内のユニット配列全体になります。
    pub fn leaves(&self) -> Vec<&[u32]> {
        let mut out = vec![];
        let mut stack = vec![0usize];
        while let Some(idx) = stack.pop() {
            let node = &self.nodes[idx];
            if node.feature == LEAF {
                out.push(&self.units[usize::from_u32(node.from)..usize::from_u32(node.to)]);
                continue;
            }
            for e in self.edges[usize::from_u32(node.edges_start)..usize::from_u32(node.edges_end)]
                .iter()
                .rev()
            {
                stack.push(usize::from_u32(e.node));
            }
        }
        out
    }

    /// 読み込んだインデックスの構造を検証します。
    ///
    /// ユニット配列が`0..num_units`の順列であること、各ノードの区間と辺が範囲内にあること、
    /// 子が親より後ろに置かれ親の区間に収まること、分割の特徴量が列挙型であることを確かめます。
    ///
    /// # エラー
    ///
    /// いずれかの条件を満たさない場合にエラーを返します。
    pub(crate) fn validate(&self, schema: &FeatureSchema, num_units: usize) -> Result<()> {
        let invalid = |msg: String| Err(UnitSelError::invalid_format("index", msg));
        let is_enum = |f: u32| {
            let f = usize::from_u32(f);
            f < schema.len() && schema.feature(f).kind().is_enum()
        };

        if let Some(&f) = self.sequence.iter().find(|&&f| !is_enum(f)) {
            return invalid(format!("sequence refers to a non-enum feature {f}"));
        }
        if self.units.len() != num_units {
            return invalid(format!("expected {num_units} units, got {}", self.units.len()));
        }
        let mut seen = vec![false; num_units];
        for &u in &self.units {
            match seen.get_mut(usize::from_u32(u)) {
                Some(s) if !*s => *s = true,
                _ => return invalid(format!("unit {u} is out of range or repeated")),
            }
        }

        let Some(root) = self.nodes.first() else {
            return invalid("no root node".to_string());
        };
        if usize::from_u32(root.from) != 0 || usize::from_u32(root.to) != num_units {
            return invalid("root does not span all units".to_string());
        }
        for (i, node) in self.nodes.iter().enumerate() {
            if node.from > node.to || usize::from_u32(node.to) > num_units {
                return invalid(format!("node {i} has an invalid unit range"));
            }
            if node.feature == LEAF {
                continue;
            }
            if !is_enum(node.feature) {
                return invalid(format!("node {i} splits on a non-enum feature"));
            }
            let (start, end) = (usize::from_u32(node.edges_start), usize::from_u32(node.edges_end));
            let Some(edges) = self.edges.get(start..end) else {
                return invalid(format!("node {i} has an invalid edge range"));
            };
            for (k, e) in edges.iter().enumerate() {
                let child = usize::from_u32(e.node);
                let in_order = k == 0 || edges[k - 1].value < e.value;
                match self.nodes.get(child) {
                    Some(c) if child > i && in_order && c.from >= node.from && c.to <= node.to => {}
                    _ => return invalid(format!("node {i} has an invalid edge to node {child}")),
                }
            }
        }
        Ok(())
    }

    /// インデックス内のユニット数を返します。
    #[inline(always)]
    pub fn num_units(&self) -> usize {
        self.units.len()
    }

    /// 分割に使う特徴量の位置の列を返します。
    #[inline(always)]
    pub fn sequence(&self) -> &[u32] {
        &self.sequence
    }

    /// ノード数を返します。
    #[inline(always)]
    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }
}
