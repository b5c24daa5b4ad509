//! 単体テスト用の台本エンジン

use std::collections::VecDeque;

use anyhow::Result;

use super::engine::SearchEngine;
use super::position::ParsedPosition;
use super::types::{EvalRecord, SearchLimit, SearchOutcome};

#[derive(Clone, Debug)]
pub struct Reply {
    pub cp: Option<i32>,
    pub mate: Option<i32>,
    pub bestmove: Option<String>,
    pub features: Option<String>,
    pub timed_out: bool,
}

impl Reply {
    fn scored(cp: Option<i32>, mate: Option<i32>, mv: &str) -> Self {
        Self { cp, mate, bestmove: Some(mv.to_string()), features: None, timed_out: false }
    }

    pub fn cp(cp: i32, mv: &str) -> Self {
        Self::scored(Some(cp), None, mv)
    }

    pub fn mate(n: i32, mv: &str) -> Self {
        Self::scored(None, Some(n), mv)
    }

    pub fn no_score(mv: &str) -> Self {
        Self::scored(None, None, mv)
    }

    /// 期限内に bestmove が来なかった探索
    pub fn timed_out() -> Self {
        Self { cp: None, mate: None, bestmove: None, features: None, timed_out: true }
    }

    pub fn with_features(mut self, text: &str) -> Self {
        self.features = Some(text.to_string());
        self
    }
}

/// 返答を順に再生するエンジン。台本が尽きたら評価値なしを返す。
pub struct ScriptedEngine {
    replies: VecDeque<Reply>,
    learning: bool,
    positions: Vec<ParsedPosition>,
    options: Vec<(String, String)>,
    searches: usize,
}

impl ScriptedEngine {
    pub fn new(replies: Vec<Reply>) -> Self {
        Self {
            replies: replies.into(),
            learning: false,
            positions: Vec::new(),
            options: Vec::new(),
            searches: 0,
        }
    }

    pub fn learning(mut self) -> Self {
        self.learning = true;
        self
    }

    pub fn positions(&self) -> &[ParsedPosition] {
        &self.positions
    }

    pub fn options(&self) -> &[(String, String)] {
        &self.options
    }

    pub fn searches(&self) -> usize {
        self.searches
    }
}

impl SearchEngine for ScriptedEngine {
    fn label(&self) -> &str {
        "scripted"
    }

    fn initialize(&mut self) -> Result<()> {
        Ok(())
    }

    fn set_option(&mut self, name: &str, value: &str) -> Result<()> {
        if name == "Learning" {
            self.learning = value == "true";
        }
        self.options.push((name.to_string(), value.to_string()));
        Ok(())
    }

    fn set_position(&mut self, position: &ParsedPosition) -> Result<()> {
        self.positions.push(position.clone());
        Ok(())
    }

    fn go(&mut self, _limit: SearchLimit) -> Result<SearchOutcome> {
        self.searches += 1;
        let Some(reply) = self.replies.pop_front() else {
            return Ok(SearchOutcome::no_score(0, false));
        };
        if reply.timed_out {
            return Ok(SearchOutcome::no_score(0, true));
        }
        Ok(SearchOutcome {
            bestmove: reply.bestmove.clone(),
            elapsed_ms: 0,
            timed_out: false,
            eval: EvalRecord {
                centipawns: reply.cp,
                mate_distance: reply.mate,
                depth: Some(1),
                best_move: reply.bestmove,
            },
            features: reply.features,
        })
    }

    fn sync_ready(&mut self) -> Result<()> {
        Ok(())
    }

    fn reports_features(&self) -> bool {
        self.learning
    }

    fn shutdown(&mut self) -> Result<()> {
        Ok(())
    }
}
