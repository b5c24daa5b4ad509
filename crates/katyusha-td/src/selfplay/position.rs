use std::io::BufRead;
use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result, anyhow, bail};
use chess::{Board, ChessMove};

use crate::common::io::open_reader;

/// UCI position 行を分解した結果。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParsedPosition {
    pub startpos: bool,
    pub fen: Option<String>,
    pub moves: Vec<String>,
}

impl ParsedPosition {
    /// 平手初期局面
    pub fn startpos() -> Self {
        Self { startpos: true, fen: None, moves: Vec::new() }
    }

    /// 盤面そのものを FEN で渡す
    pub fn from_board(board: &Board) -> Self {
        Self { startpos: false, fen: Some(board.to_string()), moves: Vec::new() }
    }
}

/// 開始局面ファイルを読む。1 行 1 局面、空行と `#` 行は無視する。
pub fn load_start_positions(path: &Path) -> Result<Vec<ParsedPosition>> {
    let reader = open_reader(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut positions = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("failed to read {}", path.display()))?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        // position形式または生のFEN形式の両方をサポート
        let parsed = parse_position_line(trimmed)
            .or_else(|_| parse_fen_only(trimmed))
            .and_then(|parsed| build_board(&parsed).map(|_| parsed))
            .with_context(|| format!("invalid position on line {}: {}", idx + 1, trimmed))?;
        positions.push(parsed);
    }
    if positions.is_empty() {
        bail!("no usable positions found in {}", path.display());
    }
    Ok(positions)
}

/// `position ...` 形式の行をパースする。
pub fn parse_position_line(line: &str) -> Result<ParsedPosition> {
    let mut tokens = line.split_whitespace().peekable();
    if tokens.peek().is_some_and(|tok| *tok == "position") {
        tokens.next();
    }
    match tokens.next() {
        Some("startpos") => {
            let moves = parse_moves(tokens)?;
            Ok(ParsedPosition { startpos: true, fen: None, moves })
        }
        Some("fen") => {
            let mut fen_tokens = Vec::new();
            while let Some(token) = tokens.next_if(|tok| *tok != "moves") {
                fen_tokens.push(token);
            }
            if fen_tokens.is_empty() {
                bail!("missing FEN payload");
            }
            let moves = parse_moves(tokens)?;
            Ok(ParsedPosition { startpos: false, fen: Some(fen_tokens.join(" ")), moves })
        }
        other => bail!("expected 'startpos' or 'fen' after 'position', got {:?}", other),
    }
}

/// FEN 文字列だけが渡されたときの簡易パーサ。
pub fn parse_fen_only(line: &str) -> Result<ParsedPosition> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        bail!("empty FEN");
    }
    Ok(ParsedPosition { startpos: false, fen: Some(trimmed.to_string()), moves: Vec::new() })
}

/// moves トークン以降を UCI 形式の指し手列として回収する。
pub fn parse_moves<'a, I>(iter: I) -> Result<Vec<String>>
where
    I: Iterator<Item = &'a str>,
{
    let mut iter = iter.peekable();
    match iter.peek() {
        Some(&"moves") => {
            iter.next();
            Ok(iter.map(|mv| mv.to_string()).collect())
        }
        Some(other) => bail!("expected 'moves' before move list, got '{other}'"),
        None => Ok(Vec::new()),
    }
}

pub fn build_board(parsed: &ParsedPosition) -> Result<Board> {
    let mut board = if parsed.startpos {
        Board::default()
    } else if let Some(fen) = &parsed.fen {
        Board::from_str(fen).map_err(|e| anyhow!("invalid FEN '{fen}': {e:?}"))?
    } else {
        bail!("missing FEN payload");
    };
    for mv_str in &parsed.moves {
        let mv = parse_legal_move(&board, mv_str)
            .ok_or_else(|| anyhow!("illegal or malformed move '{mv_str}' in start position"))?;
        board = board.make_move_new(mv);
    }
    Ok(board)
}

/// UCI 指し手文字列を、その局面で合法な場合に限り解釈する。
pub fn parse_legal_move(board: &Board, mv: &str) -> Option<ChessMove> {
    ChessMove::from_str(mv).ok().filter(|m| board.legal(*m))
}

pub fn describe_position(parsed: &ParsedPosition) -> String {
    let mut buf = String::from("position ");
    if parsed.startpos {
        buf.push_str("startpos");
    } else if let Some(fen) = &parsed.fen {
        buf.push_str("fen ");
        buf.push_str(fen);
    }
    if !parsed.moves.is_empty() {
        buf.push_str(" moves ");
        buf.push_str(&parsed.moves.join(" "));
    }
    buf
}
