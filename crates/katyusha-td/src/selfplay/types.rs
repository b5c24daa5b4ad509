use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 1 回の探索で得た評価値（手番側から見た値）
///
/// `centipawns` と `mate_distance` はどちらか一方だけが意味を持つ。
/// どちらも `None` なら評価値なし。
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct EvalRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub centipawns: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mate_distance: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub depth: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub best_move: Option<String>,
}

impl EvalRecord {
    pub fn has_score(&self) -> bool {
        self.centipawns.is_some() || self.mate_distance.is_some()
    }
}

/// info 行から拾った最新の探索情報
#[derive(Default, Clone, Debug)]
pub struct InfoSnapshot {
    pub score_cp: Option<i32>,
    pub score_mate: Option<i32>,
    pub depth: Option<u32>,
    /// 学習モード時の `info string features ...` の本体
    pub features: Option<String>,
}

pub const FEATURES_PREFIX: &str = "info string features";

impl InfoSnapshot {
    /// info 行を解析し、multipv=1 の情報を保持する。
    pub fn update_from_line(&mut self, line: &str) {
        if let Some(rest) = line.strip_prefix(FEATURES_PREFIX) {
            self.features = Some(rest.trim().to_string());
            return;
        }
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.first().copied() != Some("info") || tokens.get(1).copied() == Some("string") {
            return;
        }
        let multipv = tokens
            .windows(2)
            .find(|w| w[0] == "multipv")
            .and_then(|w| w[1].parse::<u32>().ok())
            .unwrap_or(1);
        if multipv != 1 {
            return;
        }
        let mut i = 1;
        while i < tokens.len() {
            match tokens[i] {
                "depth" => {
                    if i + 1 < tokens.len() {
                        self.depth = tokens[i + 1].parse::<u32>().ok();
                        i += 1;
                    }
                }
                "score" => {
                    if i + 2 < tokens.len() {
                        match tokens[i + 1] {
                            "cp" => {
                                self.score_cp = tokens[i + 2].parse::<i32>().ok();
                                self.score_mate = None;
                                i += 2;
                            }
                            "mate" => {
                                self.score_mate = tokens[i + 2].parse::<i32>().ok();
                                self.score_cp = None;
                                i += 2;
                            }
                            _ => {}
                        }
                    }
                }
                // 以降は指し手の列
                "pv" => break,
                _ => {}
            }
            i += 1;
        }
    }

    pub fn into_eval_record(self, best_move: Option<String>) -> EvalRecord {
        EvalRecord {
            centipawns: self.score_cp,
            mate_distance: self.score_mate,
            depth: self.depth,
            best_move,
        }
    }
}

/// go コマンドの探索制限
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SearchLimit {
    #[serde(rename = "movetime")]
    MoveTime(u64),
    #[serde(rename = "depth")]
    Depth(u32),
}

impl SearchLimit {
    pub fn go_command(self) -> String {
        match self {
            SearchLimit::MoveTime(ms) => format!("go movetime {ms}"),
            SearchLimit::Depth(d) => format!("go depth {d}"),
        }
    }

    /// 時間制限付きならその長さ
    pub fn think_limit(self) -> Option<Duration> {
        match self {
            SearchLimit::MoveTime(ms) => Some(Duration::from_millis(ms)),
            SearchLimit::Depth(_) => None,
        }
    }
}

impl Default for SearchLimit {
    fn default() -> Self {
        SearchLimit::MoveTime(1000)
    }
}

#[derive(Debug)]
pub struct SearchOutcome {
    pub bestmove: Option<String>,
    pub elapsed_ms: u64,
    pub timed_out: bool,
    pub eval: EvalRecord,
    /// 最後に受け取った特徴量文字列（未デコード）
    pub features: Option<String>,
}

impl SearchOutcome {
    /// 評価値なしの番兵
    pub fn no_score(elapsed_ms: u64, timed_out: bool) -> Self {
        Self {
            bestmove: None,
            elapsed_ms,
            timed_out,
            eval: EvalRecord::default(),
            features: None,
        }
    }
}

pub fn duration_to_millis(d: Duration) -> u64 {
    d.as_millis().min(u128::from(u64::MAX)) as u64
}
