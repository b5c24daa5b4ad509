//! 1 開始局面からの自己対局と評価値列の収集

use chess::{BoardStatus, Color};
use katyusha_net::FeatureVector;
use serde::Serialize;

use super::engine::SearchEngine;
use super::features::{DecodeError, decode_features};
use super::position::{ParsedPosition, build_board, parse_legal_move};
use super::types::{EvalRecord, SearchLimit};

/// エピソード生成の設定
#[derive(Clone, Copy, Debug)]
pub struct EpisodeConfig {
    /// 最大手数（評価値列の長さ）
    pub num_moves: usize,
    pub limit: SearchLimit,
    /// 特徴量ベクトルの幅
    pub feature_width: usize,
}

/// エピソードが終わった理由
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EpisodeEnd {
    /// num_moves 手まで指した
    MaxMoves,
    /// 詰み・ステイルメイトに到達した
    Terminal,
    /// 開始局面が既に終局していた
    AlreadyTerminal,
    /// 評価値が返らなかった
    NoScore,
    /// 詰みスコアのみでセンチポーン値がなかった
    MateScore,
    /// 探索がタイムアウトした
    TimedOut,
    /// 学習モードなのに特徴量が返らなかった
    MissingFeatures,
    /// bestmove が無い、または非合法
    BadMove,
}

impl EpisodeEnd {
    /// hold-last-value で打ち切ったかどうか
    pub fn is_hold_last_value(self) -> bool {
        matches!(
            self,
            EpisodeEnd::NoScore
                | EpisodeEnd::MateScore
                | EpisodeEnd::TimedOut
                | EpisodeEnd::MissingFeatures
                | EpisodeEnd::BadMove
        )
    }
}

#[derive(Clone, Debug)]
pub struct PositionRecord {
    pub ply: usize,
    /// エンジンが返した手番側視点の評価
    pub eval: EvalRecord,
    /// 先手視点に直したセンチポーン値
    pub absolute_cp: f32,
    /// 指す前の局面の特徴量
    pub features: Option<FeatureVector>,
}

#[derive(Clone, Debug)]
pub struct EpisodeTrace {
    /// 実際に評価値を記録できた手
    pub records: Vec<PositionRecord>,
    /// 先手視点の評価値列。途中で終わった場合は最後の値で num_moves まで埋める
    pub evals: Vec<f32>,
    pub end: EpisodeEnd,
}

impl EpisodeTrace {
    fn empty(end: EpisodeEnd) -> Self {
        Self { records: Vec::new(), evals: Vec::new(), end }
    }

    pub fn played_plies(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn has_features(&self) -> bool {
        !self.records.is_empty() && self.records.iter().all(|r| r.features.is_some())
    }
}

#[derive(thiserror::Error, Debug)]
pub enum EpisodeError {
    #[error("ply {ply}: {source}")]
    Decode {
        ply: usize,
        #[source]
        source: DecodeError,
    },
    #[error("invalid start position: {0:#}")]
    StartPosition(anyhow::Error),
    #[error(transparent)]
    Engine(#[from] anyhow::Error),
}

/// 開始局面から最大 `num_moves` 手の自己対局を行い、評価値列を返す。
///
/// 評価値は指す前に読み取り、後手番の値は符号を反転して先手視点にする。
pub fn run_episode<E: SearchEngine + ?Sized>(
    engine: &mut E,
    start: &ParsedPosition,
    cfg: &EpisodeConfig,
) -> Result<EpisodeTrace, EpisodeError> {
    let mut board = build_board(start).map_err(EpisodeError::StartPosition)?;
    if board.status() != BoardStatus::Ongoing {
        log::debug!("start position is already terminal");
        return Ok(EpisodeTrace::empty(EpisodeEnd::AlreadyTerminal));
    }

    let mut records: Vec<PositionRecord> = Vec::with_capacity(cfg.num_moves);
    let mut end = EpisodeEnd::MaxMoves;

    for ply in 0..cfg.num_moves {
        let side = board.side_to_move();
        engine.set_position(&ParsedPosition::from_board(&board))?;
        let outcome = engine.go(cfg.limit)?;

        if outcome.timed_out {
            end = EpisodeEnd::TimedOut;
            break;
        }
        let Some(cp) = outcome.eval.centipawns else {
            end = if outcome.eval.mate_distance.is_some() {
                EpisodeEnd::MateScore
            } else {
                EpisodeEnd::NoScore
            };
            break;
        };

        let features = if engine.reports_features() {
            let Some(text) = outcome.features.as_deref() else {
                end = EpisodeEnd::MissingFeatures;
                break;
            };
            let fv = decode_features(text, cfg.feature_width)
                .map_err(|source| EpisodeError::Decode { ply, source })?;
            Some(fv)
        } else {
            None
        };

        let absolute_cp = if side == Color::Black { -(cp as f32) } else { cp as f32 };
        records.push(PositionRecord { ply, eval: outcome.eval, absolute_cp, features });

        let Some(mv) = outcome.bestmove.as_deref().and_then(|mv| parse_legal_move(&board, mv))
        else {
            log::debug!("ply {ply}: unusable bestmove {:?}", outcome.bestmove);
            end = EpisodeEnd::BadMove;
            break;
        };
        board = board.make_move_new(mv);
        if board.status() != BoardStatus::Ongoing {
            end = EpisodeEnd::Terminal;
            break;
        }
    }

    let mut evals: Vec<f32> = records.iter().map(|r| r.absolute_cp).collect();
    if let Some(&last) = evals.last() {
        evals.resize(cfg.num_moves, last);
    }
    log::debug!("episode finished: {} plies, end={:?}", records.len(), end);
    Ok(EpisodeTrace { records, evals, end })
}
