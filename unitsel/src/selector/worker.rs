//! リクエストごとの選択処理
//!
//! ワーカーはターゲット列、候補リスト、ラティスを保持し、それらを再利用することで
//! 不要なメモリ再割り当てを避けます。処理は次の状態を順に進みます。
//!
//! `Idle → CandidatesGathered → DPForward → Backtraced → Done`
//!
//! キャンセルされた場合はどの段階からでも`Aborted`に移ります。
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::cart::LeafPayload;
use crate::cost::{JoinCost, TargetCost};
use crate::errors::{Result, UnitSelError};
use crate::features::FeatureVector;
use crate::index::StopPolicy;
use crate::selector::lattice::{weighted, Lattice};
use crate::selector::{CandidateSource, UnitSelector};
use crate::unit::SelectedUnit;
use crate::utils::FromU32;

/// ワーカーの状態。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectorState {
    /// ターゲットを受け付けている
    Idle,
    /// 全ターゲットの候補が集まった
    CandidatesGathered,
    /// 前向き計算が終わった
    DPForward,
    /// 最良経路が求まった
    Backtraced,
    /// 統計が計算され、結果が確定した
    Done,
    /// キャンセルされた
    Aborted,
}

/// 選択中に行われた回復処理の種類。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackKind {
    /// 緩和した停止方針で特徴量インデックスを検索し直した
    Relaxed {
        /// 採用した停止方針
        policy: StopPolicy,
        /// 得られた候補数
        candidates: usize,
    },
    /// 候補が得られず、フィラーユニットで置き換えた
    Filler,
    /// 有限のコストの経路がなく、フィラーユニットで置き換えた。
    ///
    /// 候補の収集時に既に回復処理が記録されたターゲットでは、その記録がこの種類に
    /// 置き換えられます。
    DeadEnd,
}

/// ターゲットごとの回復処理の記録。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FallbackEvent {
    /// ターゲットの番号
    pub target_index: usize,
    /// 回復処理の種類
    pub kind: FallbackKind,
}

/// 確定した選択結果の統計。
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SelectionStats {
    /// ターゲット数
    pub num_targets: usize,
    /// フィラーで置き換えられたターゲット数
    pub num_fillers: usize,
    /// 元の録音で連続する区間の平均の長さ（ユニット数）
    pub avg_stretch_len: f64,
    /// 選ばれたユニットの平均ターゲットコスト
    pub avg_target_cost: f64,
    /// 最良経路上の平均接続コスト（有限のもののみ）
    pub avg_join_cost: f64,
    /// 経路の総スコア
    pub total_cost: f64,
}

/// 協調的なキャンセルのためのハンドル。
///
/// 複製したハンドルを別スレッドに渡し、[`CancelHandle::cancel`]を呼ぶと、
/// ワーカーは次のターゲットの処理の前に`Aborted`へ移ります。
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    /// キャンセルを要求します。
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// キャンセルが要求されていれば`true`を返します。
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    fn clear(&self) {
        self.0.store(false, Ordering::Relaxed);
    }
}

/// ユニット選択を行うワーカー。
///
/// # 例
///
/// ```ignore
/// let mut worker = selector.new_worker();
/// worker.push_target(vector)?;
/// worker.select()?;
/// for u in worker.selected() {
///     println!("{}", u.unit);
/// }
/// ```
pub struct Worker {
    selector: UnitSelector,
    state: SelectorState,
    cancel: CancelHandle,
    targets: Vec<FeatureVector>,
    candidates: Vec<Vec<u32>>,
    fillers: Vec<bool>,
    costs: Vec<f64>,
    lattice: Lattice,
    path: Vec<usize>,
    selected: Vec<SelectedUnit>,
    fallbacks: Vec<FallbackEvent>,
    total_cost: f64,
    stats: Option<SelectionStats>,
}

impl Worker {
    pub(crate) fn new(selector: UnitSelector) -> Self {
        Self {
            selector,
            state: SelectorState::Idle,
            cancel: CancelHandle::default(),
            targets: vec![],
            candidates: vec![],
            fillers: vec![],
            costs: vec![],
            lattice: Lattice::default(),
            path: vec![],
            selected: vec![],
            fallbacks: vec![],
            total_cost: 0.0,
            stats: None,
        }
    }

    /// このワーカーのキャンセルハンドルを返します。
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// ターゲットと結果を消去し、`Idle`に戻ります。
    ///
    /// キャンセルの要求もここで取り消されます。
    pub fn reset_targets(&mut self) {
        self.state = SelectorState::Idle;
        self.cancel.clear();
        self.targets.clear();
        self.fillers.clear();
        self.path.clear();
        self.selected.clear();
        self.fallbacks.clear();
        self.total_cost = 0.0;
        self.stats = None;
    }

    /// エンコード済みのターゲットを追加します。
    ///
    /// # エラー
    ///
    /// `Idle`でない場合、またはベクトルが音声のスキーマに適合しない場合にエラーを返します。
    pub fn push_target(&mut self, target: FeatureVector) -> Result<()> {
        self.expect_state(SelectorState::Idle, "push_target")?;
        if !self.selector.voice().database().schema().conforms(&target) {
            return Err(UnitSelError::invalid_argument(
                "target",
                format!("target {} does not conform to the schema", self.targets.len()),
            ));
        }
        self.targets.push(target);
        Ok(())
    }

    /// 生の特徴量値からターゲットを追加します。
    ///
    /// 未知の値は未定義の値に写像され、警告がログに出力されます。
    ///
    /// # エラー
    ///
    /// `Idle`でない場合、または値の数がスキーマと異なる場合にエラーを返します。
    pub fn push_target_raw<S>(&mut self, raw: &[S]) -> Result<()>
    where
        S: AsRef<str>,
    {
        self.expect_state(SelectorState::Idle, "push_target_raw")?;
        let origin = u32::try_from(self.targets.len())?;
        let target = self
            .selector
            .voice()
            .database()
            .schema()
            .encode_lenient(raw, origin)?;
        self.targets.push(target);
        Ok(())
    }

    /// ターゲット数
    #[inline(always)]
    pub fn num_targets(&self) -> usize {
        self.targets.len()
    }

    fn expect_state(&self, expected: SelectorState, op: &'static str) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(UnitSelError::invalid_state(
                format!("{op} requires state {expected:?}"),
                format!("current state is {:?}", self.state),
            ))
        }
    }

    fn check_cancel(&mut self) -> bool {
        if self.cancel.is_cancelled() {
            log::debug!("[unitsel] selection cancelled in state {:?}", self.state);
            self.state = SelectorState::Aborted;
            true
        } else {
            false
        }
    }

    /// 全ターゲットの候補を集めます。
    ///
    /// 主な取得方法の候補数が`min_candidates`未満の場合、設定された緩和方針を順に
    /// 試し、基準を満たす最初の結果、なければ最大の空でない結果を採用します。
    /// それでも候補がなければフィラーユニットを使います。
    ///
    /// # 戻り値
    ///
    /// 遷移後の状態（`CandidatesGathered`または`Aborted`）
    pub fn gather_candidates(&mut self) -> Result<SelectorState> {
        self.expect_state(SelectorState::Idle, "gather_candidates")?;
        Lattice::reset_vec(&mut self.candidates, self.targets.len());
        self.fillers.clear();
        self.fillers.resize(self.targets.len(), false);

        for i in 0..self.targets.len() {
            if self.check_cancel() {
                return Ok(self.state);
            }
            let fallback = self.candidates_for(i);
            if let Some(kind) = fallback {
                if kind == FallbackKind::Filler {
                    self.fillers[i] = true;
                }
                self.fallbacks.push(FallbackEvent {
                    target_index: i,
                    kind,
                });
            }
        }
        self.state = SelectorState::CandidatesGathered;
        Ok(self.state)
    }

    fn candidates_for(&mut self, i: usize) -> Option<FallbackKind> {
        let selector = &self.selector;
        let config = selector.config();
        let db = selector.voice().database();
        let target = &self.targets[i];
        let out = &mut self.candidates[i];

        let primary: &[u32] = match selector.source() {
            CandidateSource::Index(policy) => db.index().retrieve(target, *policy).units,
            CandidateSource::Tree(tree) => match tree.evaluate(target) {
                LeafPayload::Units(units) => units.as_slice(),
                LeafPayload::Distribution(_) => &[][..],
            },
        };
        if primary.len() >= config.min_candidates && !primary.is_empty() {
            out.extend_from_slice(primary);
            return None;
        }

        let mut best: Option<(StopPolicy, &[u32])> = None;
        let mut chosen = None;
        for &policy in &config.relaxation {
            let units = db.index().retrieve(target, policy).units;
            if units.len() >= config.min_candidates && !units.is_empty() {
                chosen = Some((policy, units));
                break;
            }
            if units.len() > best.map_or(primary.len(), |(_, u)| u.len()) {
                best = Some((policy, units));
            }
        }
        let chosen = chosen.or(best);

        match chosen {
            Some((policy, units)) => {
                log::warn!(
                    "[unitsel] target {} ({}): {} candidates from the primary source, below {}; \
                     relaxed retrieval with {:?} gave {}",
                    i,
                    selector.describe(target),
                    primary.len(),
                    config.min_candidates,
                    policy,
                    units.len()
                );
                out.extend_from_slice(units);
                Some(FallbackKind::Relaxed {
                    policy,
                    candidates: units.len(),
                })
            }
            None if !primary.is_empty() => {
                out.extend_from_slice(primary);
                None
            }
            None => {
                log::warn!(
                    "[unitsel] target {} ({}): no candidates after relaxation; using filler unit {}",
                    i,
                    selector.describe(target),
                    selector.filler()
                );
                out.push(selector.filler());
                Some(FallbackKind::Filler)
            }
        }
    }

    /// 前向き計算を行います。
    ///
    /// キャンセルはターゲットごとに一度確認されます。ある列の全ての状態が
    /// 無限大のコストになった場合、その列はフィラーユニットで置き換えられます。
    ///
    /// # 戻り値
    ///
    /// 遷移後の状態（`DPForward`または`Aborted`）
    pub fn forward(&mut self) -> Result<SelectorState> {
        self.expect_state(SelectorState::CandidatesGathered, "forward")?;
        let n = self.targets.len();
        self.lattice.reset(n);
        let config = self.selector.config();
        let (wt, wj, beam) = (config.target_weight, config.join_weight, config.beam_width);

        for i in 0..n {
            if self.check_cancel() {
                return Ok(self.state);
            }
            let selector = &self.selector;
            let db = selector.voice().database();
            let vectors = db.vectors();
            let target = &self.targets[i];
            let target_cost = selector.target_cost().for_target(target);

            self.costs.clear();
            self.costs.extend(
                self.candidates[i]
                    .iter()
                    .map(|&u| weighted(wt, target_cost.cost(&vectors[usize::from_u32(u)]))),
            );

            let prev: &[u32] = if i == 0 { &[] } else { &self.candidates[i - 1] };
            let join = selector.join_cost();
            let ok = self.lattice.forward_step(
                i,
                prev,
                &self.candidates[i],
                &self.costs,
                &join,
                wj,
                beam,
            );
            if ok {
                continue;
            }

            let filler = selector.filler();
            let tc = weighted(wt, target_cost.cost(&vectors[usize::from_u32(filler)]));
            // A target already recovered while gathering keeps its single event and log line.
            if let Some(event) = self.fallbacks.iter_mut().rfind(|e| e.target_index == i) {
                log::debug!(
                    "[unitsel] target {}: {:?} fallback ended in a dead end; using filler unit {}",
                    i,
                    event.kind,
                    filler
                );
                event.kind = FallbackKind::DeadEnd;
            } else {
                log::warn!(
                    "[unitsel] target {} ({}): no finite-cost path through {} candidates; using filler unit {}",
                    i,
                    selector.describe(target),
                    self.candidates[i].len(),
                    filler
                );
                self.fallbacks.push(FallbackEvent {
                    target_index: i,
                    kind: FallbackKind::DeadEnd,
                });
            }
            self.lattice.force_single(i, tc);
            self.candidates[i].clear();
            self.candidates[i].push(filler);
            self.fillers[i] = true;
        }
        self.state = SelectorState::DPForward;
        Ok(self.state)
    }

    /// 最小スコアの経路をたどり、選択結果を確定します。
    ///
    /// # 戻り値
    ///
    /// 遷移後の状態（`Backtraced`または`Aborted`）
    pub fn backtrace(&mut self) -> Result<SelectorState> {
        self.expect_state(SelectorState::DPForward, "backtrace")?;
        if self.check_cancel() {
            return Ok(self.state);
        }
        self.total_cost = self.lattice.backtrace(&mut self.path);
        self.selected.clear();
        for (i, &k) in self.path.iter().enumerate() {
            self.selected.push(SelectedUnit {
                unit: self.candidates[i][k],
                target_index: i,
                is_filler: self.fillers[i],
            });
        }
        self.state = SelectorState::Backtraced;
        Ok(self.state)
    }

    /// 選択結果の統計を計算し、`Done`に移ります。
    pub fn finish(&mut self) -> Result<SelectorState> {
        self.expect_state(SelectorState::Backtraced, "finish")?;
        let selector = &self.selector;
        let db = selector.voice().database();
        let units = db.units();
        let vectors = db.vectors();
        let join = selector.join_cost();
        let n = self.selected.len();

        let mut stats = SelectionStats {
            num_targets: n,
            num_fillers: self.selected.iter().filter(|s| s.is_filler).count(),
            total_cost: self.total_cost,
            ..Default::default()
        };
        if n != 0 {
            let mut stretches = 1;
            let mut target_sum = 0.0;
            let mut join_sum = 0.0;
            let mut num_joins = 0;
            for (k, s) in self.selected.iter().enumerate() {
                target_sum += selector
                    .target_cost()
                    .cost(&self.targets[k], &vectors[usize::from_u32(s.unit)]);
                if k == 0 {
                    continue;
                }
                let prev = self.selected[k - 1].unit;
                if !units[usize::from_u32(prev)].precedes(&units[usize::from_u32(s.unit)]) {
                    stretches += 1;
                }
                let j = join.cost(prev, s.unit);
                if j.is_finite() {
                    join_sum += j;
                    num_joins += 1;
                }
            }
            stats.avg_stretch_len = n as f64 / f64::from(stretches);
            stats.avg_target_cost = target_sum / n as f64;
            if num_joins != 0 {
                stats.avg_join_cost = join_sum / f64::from(num_joins);
            }
        }
        log::debug!(
            "[unitsel] selected {} units ({} fillers): avg stretch {:.2}, avg target cost {:.4}, \
             avg join cost {:.4}, total {:.4}",
            stats.num_targets,
            stats.num_fillers,
            stats.avg_stretch_len,
            stats.avg_target_cost,
            stats.avg_join_cost,
            stats.total_cost
        );
        self.stats = Some(stats);
        self.state = SelectorState::Done;
        Ok(self.state)
    }

    /// `Idle`から`Done`（または`Aborted`）まで全ての段階を実行します。
    ///
    /// # 戻り値
    ///
    /// 最終状態
    ///
    /// # エラー
    ///
    /// `Idle`でない場合にエラーを返します。
    pub fn select(&mut self) -> Result<SelectorState> {
        let steps: [fn(&mut Self) -> Result<SelectorState>; 4] = [
            Self::gather_candidates,
            Self::forward,
            Self::backtrace,
            Self::finish,
        ];
        for step in steps {
            if step(self)? == SelectorState::Aborted {
                return Ok(SelectorState::Aborted);
            }
        }
        Ok(self.state)
    }

    /// 現在の状態
    #[inline(always)]
    pub fn state(&self) -> SelectorState {
        self.state
    }

    /// 選択されたユニット列。`Backtraced`以降で有効です。
    #[inline(always)]
    pub fn selected(&self) -> &[SelectedUnit] {
        &self.selected
    }

    /// 選択されたユニット数
    #[inline(always)]
    pub fn num_selected(&self) -> usize {
        self.selected.len()
    }

    /// 最良経路の総スコア
    #[inline(always)]
    pub fn total_cost(&self) -> f64 {
        self.total_cost
    }

    /// 選択結果の統計。`Done`でのみ`Some`です。
    #[inline(always)]
    pub fn stats(&self) -> Option<&SelectionStats> {
        self.stats.as_ref()
    }

    /// 回復処理の記録
    #[inline(always)]
    pub fn fallbacks(&self) -> &[FallbackEvent] {
        &self.fallbacks
    }

    /// ターゲット`i`の候補。`CandidatesGathered`以降で有効です。
    #[inline(always)]
    pub fn candidates(&self, i: usize) -> &[u32] {
        &self.candidates[i]
    }
}
