use anyhow::Result;
use chess::{BoardStatus, Color};

use super::engine::SearchEngine;
use super::position::{ParsedPosition, build_board, parse_legal_move};
use super::types::SearchLimit;

/// ゲーム設定
pub struct GameConfig {
    pub max_plies: u32,
    pub limit: SearchLimit,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GameOutcome {
    WhiteWin,
    BlackWin,
    Draw,
}

impl GameOutcome {
    pub fn label(self) -> &'static str {
        match self {
            GameOutcome::WhiteWin => "1-0",
            GameOutcome::BlackWin => "0-1",
            GameOutcome::Draw => "1/2-1/2",
        }
    }

    fn loss_for(side: Color) -> Self {
        if side == Color::White { GameOutcome::BlackWin } else { GameOutcome::WhiteWin }
    }
}

/// 対局結果
#[derive(Clone, Debug)]
pub struct GameResult {
    pub outcome: GameOutcome,
    pub reason: &'static str,
    pub plies: u32,
    pub moves: Vec<String>,
}

fn finish(outcome: GameOutcome, reason: &'static str, plies: u32, moves: Vec<String>) -> GameResult {
    GameResult { outcome, reason, plies, moves }
}

/// 1局を実行する。
///
/// 時間切れ・指し手なし・非合法手はその手番側の負けとする。
pub fn run_game<W, B>(
    white: &mut W,
    black: &mut B,
    start_pos: &ParsedPosition,
    config: &GameConfig,
) -> Result<GameResult>
where
    W: SearchEngine + ?Sized,
    B: SearchEngine + ?Sized,
{
    let mut board = build_board(start_pos)?;
    white.new_game()?;
    black.new_game()?;

    let mut moves: Vec<String> = Vec::new();
    let mut plies = 0u32;

    while plies < config.max_plies {
        match board.status() {
            BoardStatus::Checkmate => {
                return Ok(finish(GameOutcome::loss_for(board.side_to_move()), "checkmate", plies, moves));
            }
            BoardStatus::Stalemate => {
                return Ok(finish(GameOutcome::Draw, "stalemate", plies, moves));
            }
            BoardStatus::Ongoing => {}
        }

        let side = board.side_to_move();
        let mut position = start_pos.clone();
        position.moves.extend(moves.iter().cloned());
        let outcome = if side == Color::White {
            white.set_position(&position)?;
            white.go(config.limit)?
        } else {
            black.set_position(&position)?;
            black.go(config.limit)?
        };

        if outcome.timed_out {
            return Ok(finish(GameOutcome::loss_for(side), "timeout", plies, moves));
        }
        let Some(mv_str) = outcome.bestmove else {
            return Ok(finish(GameOutcome::loss_for(side), "no_bestmove", plies, moves));
        };
        let Some(mv) = parse_legal_move(&board, &mv_str) else {
            log::warn!("illegal move '{mv_str}' at ply {plies}");
            return Ok(finish(GameOutcome::loss_for(side), "illegal_move", plies, moves));
        };
        board = board.make_move_new(mv);
        moves.push(mv_str);
        plies += 1;
    }

    let (outcome, reason) = match board.status() {
        BoardStatus::Checkmate => (GameOutcome::loss_for(board.side_to_move()), "checkmate"),
        BoardStatus::Stalemate => (GameOutcome::Draw, "stalemate"),
        BoardStatus::Ongoing => (GameOutcome::Draw, "max_plies"),
    };
    Ok(finish(outcome, reason, plies, moves))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selfplay::testing::{Reply, ScriptedEngine};

    fn config(max_plies: u32) -> GameConfig {
        GameConfig { max_plies, limit: SearchLimit::MoveTime(10) }
    }

    #[test]
    fn checkmate_ends_game() {
        let mut white = ScriptedEngine::new(vec![Reply::cp(0, "f2f3"), Reply::cp(0, "g2g4")]);
        let mut black = ScriptedEngine::new(vec![Reply::cp(0, "e7e5"), Reply::cp(0, "d8h4")]);
        let result = run_game(&mut white, &mut black, &ParsedPosition::startpos(), &config(20)).unwrap();
        assert_eq!(result.outcome, GameOutcome::BlackWin);
        assert_eq!(result.reason, "checkmate");
        assert_eq!(result.plies, 4);
        assert_eq!(black.positions()[1].moves, vec!["f2f3", "e7e5", "g2g4"]);
    }

    #[test]
    fn illegal_move_loses() {
        let mut white = ScriptedEngine::new(vec![Reply::cp(0, "e2e5")]);
        let mut black = ScriptedEngine::new(Vec::new());
        let result = run_game(&mut white, &mut black, &ParsedPosition::startpos(), &config(20)).unwrap();
        assert_eq!(result.outcome, GameOutcome::BlackWin);
        assert_eq!(result.reason, "illegal_move");
    }

    #[test]
    fn max_plies_is_a_draw() {
        let mut white = ScriptedEngine::new(vec![Reply::cp(0, "g1f3"), Reply::cp(0, "f3g1")]);
        let mut black = ScriptedEngine::new(vec![Reply::cp(0, "g8f6"), Reply::cp(0, "f6g8")]);
        let result = run_game(&mut white, &mut black, &ParsedPosition::startpos(), &config(4)).unwrap();
        assert_eq!(result.outcome, GameOutcome::Draw);
        assert_eq!(result.reason, "max_plies");
        assert_eq!(result.moves.len(), 4);
    }
}
