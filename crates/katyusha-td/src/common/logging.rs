//! env_logger の初期化
//!
//! 損失の行は `l1 loss <値>` のように接頭辞なしで出し、
//! 行頭 2 語で拾えるようにする。

use std::fmt;
use std::io::{self, Write};

use log::Level;

/// 接頭辞なしで出力するログのターゲット
pub const LOSS_TARGET: &str = "td_loss";

/// 既定レベル info、標準エラー、色なし
pub fn init() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format(|buf, record| write_line(buf, record.level(), record.target(), record.args()))
        .write_style(env_logger::WriteStyle::Never)
        .target(env_logger::Target::Stderr)
        .init();
}

fn write_line<W: Write + ?Sized>(
    out: &mut W,
    level: Level,
    target: &str,
    args: &fmt::Arguments<'_>,
) -> io::Result<()> {
    if target == LOSS_TARGET {
        writeln!(out, "{args}")
    } else {
        writeln!(out, "[{level}] {target}: {args}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(level: Level, target: &str, args: fmt::Arguments<'_>) -> String {
        let mut out = Vec::new();
        write_line(&mut out, level, target, &args).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn loss_lines_start_with_metric_name() {
        let line = render(Level::Info, LOSS_TARGET, format_args!("l1 loss {}", 0.25));
        assert_eq!(line, "l1 loss 0.25\n");
        let tokens: Vec<&str> = line.split_whitespace().collect();
        assert_eq!(&tokens[..2], &["l1", "loss"]);
        assert_eq!(tokens[2].parse::<f64>().unwrap(), 0.25);
    }

    #[test]
    fn other_lines_keep_level_and_target() {
        let line = render(Level::Warn, "katyusha_td::orchestrator", format_args!("batch {}", 3));
        assert_eq!(line, "[WARN] katyusha_td::orchestrator: batch 3\n");
    }
}
