#![allow(dead_code)]

use std::collections::VecDeque;

use anyhow::Result;
use katyusha_td::selfplay::{EvalRecord, ParsedPosition, SearchEngine, SearchLimit, SearchOutcome};

/// 手番側視点のスコアと指し手、特徴量を順に返すだけのエンジン
pub struct MockEngine {
    replies: VecDeque<(Option<i32>, &'static str, Option<String>)>,
    learning: bool,
    pub options: Vec<(String, String)>,
    pub positions: Vec<ParsedPosition>,
}

impl MockEngine {
    pub fn new() -> Self {
        Self { replies: VecDeque::new(), learning: false, options: Vec::new(), positions: Vec::new() }
    }

    pub fn reply(mut self, cp: i32, mv: &'static str, features: Option<String>) -> Self {
        self.replies.push_back((Some(cp), mv, features));
        self
    }

    pub fn replies_left(&self) -> usize {
        self.replies.len()
    }
}

impl SearchEngine for MockEngine {
    fn label(&self) -> &str {
        "mock"
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
        let Some((cp, mv, features)) = self.replies.pop_front() else {
            return Ok(SearchOutcome::no_score(0, false));
        };
        Ok(SearchOutcome {
            bestmove: Some(mv.to_string()),
            elapsed_ms: 1,
            timed_out: false,
            eval: EvalRecord { centipawns: cp, depth: Some(1), ..Default::default() },
            features: features.filter(|_| self.learning),
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

/// 全要素が `value` の特徴量文字列
pub fn uniform_features(value: f32, width: usize) -> String {
    vec![value.to_string(); width].join(",")
}
