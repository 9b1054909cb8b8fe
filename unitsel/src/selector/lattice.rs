//! 動的計画法のためのラティス
//!
//! 列`i`の状態はターゲット`i`の候補です。各状態は根からの最小スコアと、
//! そのスコアを与える前の列の状態を持ちます。バッファはリクエスト間で再利用されます。
use crate::cost::JoinCost;

pub(crate) const NO_PRED: u32 = u32::MAX;

#[derive(Default)]
pub(crate) struct Lattice {
    scores: Vec<Vec<f64>>,
    preds: Vec<Vec<u32>>,
    // States eligible as predecessors after beam pruning.
    alive: Vec<Vec<bool>>,
    order: Vec<usize>,
    len: usize,
}

/// 重み0の項は無限大のコストでも0として扱う。
#[inline(always)]
pub(crate) fn weighted(weight: f64, cost: f64) -> f64 {
    if weight == 0.0 {
        0.0
    } else {
        weight * cost
    }
}

impl Lattice {
    /// `len`列のためにラティスをリセットします。
    pub fn reset(&mut self, len: usize) {
        Self::reset_vec(&mut self.scores, len);
        Self::reset_vec(&mut self.preds, len);
        Self::reset_vec(&mut self.alive, len);
        self.len = len;
    }

    pub(crate) fn reset_vec<T>(data: &mut Vec<Vec<T>>, new_len: usize) {
        for v in data.iter_mut() {
            v.clear();
        }
        let cur_len = data.len();
        if cur_len <= new_len {
            data.reserve(new_len - cur_len);
            for _ in cur_len..new_len {
                data.push(Vec::with_capacity(16))
            }
        }
    }

    /// 列`i`を計算します。
    ///
    /// `target_costs`は重み付け済みのターゲットコスト、`prev`と`cands`は
    /// 前の列とこの列の候補ユニットです。同じスコアの前状態は番号の小さい方が選ばれます。
    ///
    /// # 戻り値
    ///
    /// 有限のスコアを持つ状態があれば`true`
    #[allow(clippy::too_many_arguments)]
    pub fn forward_step<J>(
        &mut self,
        i: usize,
        prev: &[u32],
        cands: &[u32],
        target_costs: &[f64],
        join: &J,
        join_weight: f64,
        beam: Option<usize>,
    ) -> bool
    where
        J: JoinCost + ?Sized,
    {
        debug_assert_eq!(cands.len(), target_costs.len());
        let (done, rest) = self.scores.split_at_mut(i);
        let scores = &mut rest[0];
        let preds = &mut self.preds[i];
        scores.clear();
        preds.clear();

        if i == 0 {
            scores.extend_from_slice(target_costs);
            preds.resize(cands.len(), NO_PRED);
        } else {
            let prev_scores = &done[i - 1];
            let prev_alive = &self.alive[i - 1];
            for (&c, &tc) in cands.iter().zip(target_costs) {
                let mut best = f64::INFINITY;
                let mut best_idx = NO_PRED;
                for (k, &p) in prev.iter().enumerate() {
                    let ps = prev_scores[k];
                    if !prev_alive[k] || ps.is_infinite() {
                        continue;
                    }
                    let s = ps + weighted(join_weight, join.cost(p, c));
                    if s < best {
                        best = s;
                        best_idx = k as u32;
                    }
                }
                scores.push(best + tc);
                preds.push(best_idx);
            }
        }

        self.prune(i, beam);
        self.scores[i].iter().any(|s| s.is_finite())
    }

    /// 列`i`を単一の状態で置き換えます。
    ///
    /// 前の列で最小スコアの状態を前状態とし、そのスコアに`target_cost`を加えます。
    /// 列0では前状態を持たず、スコアは`target_cost`です。
    pub fn force_single(&mut self, i: usize, target_cost: f64) {
        let (pred, base) = if i == 0 { (NO_PRED, 0.0) } else { self.best_state(i - 1) };
        self.scores[i].clear();
        self.scores[i].push(base + target_cost);
        self.preds[i].clear();
        self.preds[i].push(pred);
        self.alive[i].clear();
        self.alive[i].push(true);
    }

    fn best_state(&self, i: usize) -> (u32, f64) {
        let mut best = f64::INFINITY;
        let mut best_idx = NO_PRED;
        for (k, &s) in self.scores[i].iter().enumerate() {
            if self.alive[i][k] && s < best {
                best = s;
                best_idx = k as u32;
            }
        }
        if best_idx == NO_PRED {
            (NO_PRED, 0.0)
        } else {
            (best_idx, best)
        }
    }

    fn prune(&mut self, i: usize, beam: Option<usize>) {
        let scores = &self.scores[i];
        let alive = &mut self.alive[i];
        alive.clear();
        alive.extend(scores.iter().map(|s| s.is_finite()));
        let Some(width) = beam else {
            return;
        };
        if scores.len() <= width {
            return;
        }
        self.order.clear();
        self.order.extend(0..scores.len());
        self.order
            .sort_unstable_by(|&a, &b| scores[a].total_cmp(&scores[b]).then(a.cmp(&b)));
        for &k in &self.order[width..] {
            alive[k] = false;
        }
    }

    /// 最後の列で最小スコアの状態から前状態をたどります。
    ///
    /// # 戻り値
    ///
    /// 経路の総スコア。`path`には列ごとの状態番号が格納されます。
    pub fn backtrace(&self, path: &mut Vec<usize>) -> f64 {
        path.clear();
        if self.len == 0 {
            return 0.0;
        }
        let (mut idx, total) = self.best_state(self.len - 1);
        path.resize(self.len, 0);
        for i in (0..self.len).rev() {
            // A column always holds a finite state after forward_step or force_single.
            let k = if idx == NO_PRED { 0 } else { idx as usize };
            path[i] = k;
            idx = self.preds[i][k];
        }
        total
    }

    #[cfg(test)]
    pub fn score(&self, i: usize, k: usize) -> f64 {
        self.scores[i][k]
    }
}
