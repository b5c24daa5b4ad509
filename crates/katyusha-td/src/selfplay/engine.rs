use std::collections::{BTreeMap, HashSet};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, TryRecvError};
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow, bail};
use serde::{Deserialize, Serialize};

use super::position::{ParsedPosition, describe_position};
use super::types::{InfoSnapshot, SearchLimit, SearchOutcome, duration_to_millis};

pub const ENGINE_READY_TIMEOUT: Duration = Duration::from_secs(30);
pub const ENGINE_QUIT_TIMEOUT: Duration = Duration::from_millis(300);
pub const ENGINE_QUIT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// 探索エンジンに要求する操作。
///
/// 同じハンドルに対して同時に 2 つの操作を行ってはならない。
pub trait SearchEngine {
    fn label(&self) -> &str;

    /// ハンドシェイクと起動時オプションの送信
    fn initialize(&mut self) -> Result<()>;

    /// 名前と値をそのままエンジンに渡す
    fn set_option(&mut self, name: &str, value: &str) -> Result<()>;

    fn set_position(&mut self, position: &ParsedPosition) -> Result<()>;

    /// bestmove が返るまでブロックする。
    ///
    /// 評価値が得られなかった場合もエラーにはせず、評価値なしの結果を返す。
    fn go(&mut self, limit: SearchLimit) -> Result<SearchOutcome>;

    /// 前の要求がすべて処理されるまで待つ
    fn sync_ready(&mut self) -> Result<()>;

    /// 学習モード（特徴量出力あり）かどうか
    fn reports_features(&self) -> bool;

    fn new_game(&mut self) -> Result<()> {
        Ok(())
    }

    fn shutdown(&mut self) -> Result<()>;
}

/// エンジンプロセス起動時の設定。
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    pub path: PathBuf,
    pub args: Vec<String>,
    /// 起動時に送るUCIオプション
    pub options: BTreeMap<String, toml::Value>,
    /// 学習モード（特徴量出力）を切り替えるオプション名
    pub learning_option: String,
    /// 重みファイルのパスを渡すオプション名
    pub weights_option: String,
    /// movetime に上乗せする猶予 (ms)
    pub timeout_margin_ms: u64,
    /// depth 指定時の 1 手あたり上限 (ms)
    pub depth_timeout_ms: u64,
    /// タイムアウトした探索の bestmove を待つ上限 (ms)
    pub resync_timeout_ms: u64,
    /// 説明（対局ログ用）
    pub description: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::new(),
            args: Vec::new(),
            options: BTreeMap::new(),
            learning_option: "Learning".to_string(),
            weights_option: "WeightsFile".to_string(),
            timeout_margin_ms: 1000,
            depth_timeout_ms: 60_000,
            resync_timeout_ms: ENGINE_READY_TIMEOUT.as_millis() as u64,
            description: None,
        }
    }
}

/// `toml::Value` を setoption に渡せる文字列にする
pub fn option_value_string(value: &toml::Value) -> String {
    match value {
        toml::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn parse_bool_option(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "true" | "1" | "on" | "yes")
}

/// 1本のエンジンに対する入出力をカプセル化する。
pub struct EngineProcess {
    child: Child,
    stdin: BufWriter<ChildStdin>,
    rx: Receiver<String>,
    opt_names: HashSet<String>,
    config: EngineConfig,
    feature_mode: bool,
    /// タイムアウトした探索の bestmove がまだ届いていない
    search_pending: bool,
    exited: bool,
    pub label: String,
}

impl EngineProcess {
    /// プロセスを起動する。ハンドシェイクは [`SearchEngine::initialize`] で行う。
    pub fn spawn(cfg: &EngineConfig, label: impl Into<String>) -> Result<Self> {
        if cfg.path.as_os_str().is_empty() {
            bail!("engine path is not configured");
        }
        let mut cmd = Command::new(&cfg.path);
        if !cfg.args.is_empty() {
            cmd.args(&cfg.args);
        }
        let mut child = cmd
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .spawn()
            .with_context(|| format!("failed to spawn engine at {}", cfg.path.display()))?;
        let stdin = child.stdin.take().ok_or_else(|| anyhow!("no stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| anyhow!("no stdout"))?;
        let (tx, rx) = mpsc::channel::<String>();
        std::thread::spawn(move || {
            let reader = BufReader::new(stdout);
            for line in reader.lines() {
                match line {
                    Ok(l) => {
                        if tx.send(l).is_err() {
                            break;
                        }
                    }
                    Err(_) => break,
                }
            }
        });

        Ok(Self {
            child,
            stdin: BufWriter::new(stdin),
            rx,
            opt_names: HashSet::new(),
            config: cfg.clone(),
            feature_mode: false,
            search_pending: false,
            exited: false,
            label: label.into(),
        })
    }

    pub fn recv_line(&self, timeout: Duration) -> Result<String> {
        self.rx.recv_timeout(timeout).map_err(|e| match e {
            RecvTimeoutError::Timeout => anyhow!("{}: engine read timeout", self.label),
            RecvTimeoutError::Disconnected => anyhow!("{}: engine exited unexpectedly", self.label),
        })
    }

    pub fn write_line(&mut self, msg: &str) -> Result<()> {
        log::trace!("{} <- {}", self.label, msg);
        self.stdin.write_all(msg.as_bytes())?;
        self.stdin.write_all(b"\n")?;
        self.stdin.flush()?;
        Ok(())
    }

    fn margin(&self) -> Duration {
        Duration::from_millis(self.config.timeout_margin_ms)
    }

    fn resync_timeout(&self) -> Duration {
        Duration::from_millis(self.config.resync_timeout_ms)
    }

    /// タイムアウトした探索の bestmove を読み捨て、isready で同期し直す。
    ///
    /// 遅れた bestmove が来ないまま次の go を送ると応答が 1 手ずれるので、
    /// 同期できなければエラーにする。
    fn drain_pending(&mut self) -> Result<()> {
        if self.search_pending {
            let deadline = Instant::now() + self.resync_timeout();
            loop {
                let remaining = deadline.saturating_duration_since(Instant::now());
                match self.rx.recv_timeout(remaining) {
                    Ok(line) if line.starts_with("bestmove") => {
                        log::debug!("{}: discarded stale '{}'", self.label, line);
                        break;
                    }
                    Ok(_) => continue,
                    Err(RecvTimeoutError::Timeout) => {
                        bail!("{}: timed-out search never returned bestmove", self.label);
                    }
                    Err(RecvTimeoutError::Disconnected) => {
                        bail!("{}: engine exited unexpectedly", self.label);
                    }
                }
            }
            self.search_pending = false;
            self.sync_ready()?;
        }
        loop {
            match self.rx.try_recv() {
                Ok(line) => log::trace!("{}: dropped '{}'", self.label, line),
                Err(TryRecvError::Empty) => return Ok(()),
                Err(TryRecvError::Disconnected) => {
                    bail!("{}: engine exited unexpectedly", self.label)
                }
            }
        }
    }
}

impl SearchEngine for EngineProcess {
    fn label(&self) -> &str {
        &self.label
    }

    fn initialize(&mut self) -> Result<()> {
        self.write_line("uci")?;
        loop {
            let line = self.recv_line(ENGINE_READY_TIMEOUT)?;
            if let Some(rest) = line.strip_prefix("option ") {
                if let Some(name) = parse_option_name(rest) {
                    self.opt_names.insert(name);
                }
            } else if line == "uciok" {
                break;
            }
        }
        let options: Vec<(String, String)> = self
            .config
            .options
            .iter()
            .map(|(name, value)| (name.clone(), option_value_string(value)))
            .collect();
        for (name, value) in options {
            self.set_option(&name, &value)?;
        }
        self.sync_ready()?;
        log::info!("{}: engine ready ({} options advertised)", self.label, self.opt_names.len());
        Ok(())
    }

    fn set_option(&mut self, name: &str, value: &str) -> Result<()> {
        if !self.opt_names.is_empty() && !self.opt_names.contains(name) {
            log::warn!("{}: engine did not advertise option '{}'", self.label, name);
        }
        self.write_line(&format!("setoption name {} value {}", name, value))?;
        if name == self.config.learning_option {
            self.feature_mode = parse_bool_option(value);
        }
        Ok(())
    }

    fn set_position(&mut self, position: &ParsedPosition) -> Result<()> {
        self.write_line(&describe_position(position))
    }

    fn go(&mut self, limit: SearchLimit) -> Result<SearchOutcome> {
        self.drain_pending()?;
        self.write_line(&limit.go_command())?;

        let start = Instant::now();
        let margin = self.margin();
        let soft_limit = match limit.think_limit() {
            Some(think) => think + margin,
            None => Duration::from_millis(self.config.depth_timeout_ms),
        };
        let hard_limit = soft_limit + margin;
        let mut stop_sent = false;
        let mut snapshot = InfoSnapshot::default();

        loop {
            let elapsed = start.elapsed();
            let deadline = if stop_sent { hard_limit } else { soft_limit };
            if elapsed >= deadline {
                if !stop_sent {
                    self.write_line("stop")?;
                    stop_sent = true;
                    continue;
                }
                log::warn!("{}: no bestmove within {} ms", self.label, duration_to_millis(elapsed));
                self.search_pending = true;
                return Ok(SearchOutcome::no_score(duration_to_millis(elapsed), true));
            }

            let remaining = deadline.saturating_sub(elapsed);
            match self.rx.recv_timeout(remaining) {
                Ok(line) => {
                    if line.starts_with("info") {
                        snapshot.update_from_line(&line);
                        continue;
                    }
                    if let Some(rest) = line.strip_prefix("bestmove") {
                        let mv = rest
                            .split_whitespace()
                            .next()
                            .filter(|mv| *mv != "(none)" && *mv != "0000")
                            .map(str::to_string);
                        let features = snapshot.features.take();
                        return Ok(SearchOutcome {
                            bestmove: mv.clone(),
                            elapsed_ms: duration_to_millis(start.elapsed()),
                            timed_out: false,
                            eval: snapshot.into_eval_record(mv),
                            features,
                        });
                    }
                }
                // 次のループ先頭で stop / タイムアウト処理を行う
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    bail!("{}: engine exited unexpectedly", self.label);
                }
            }
        }
    }

    fn sync_ready(&mut self) -> Result<()> {
        self.write_line("isready")?;
        loop {
            let line = self.recv_line(ENGINE_READY_TIMEOUT)?;
            if line == "readyok" {
                break;
            }
        }
        Ok(())
    }

    fn reports_features(&self) -> bool {
        self.feature_mode
    }

    fn new_game(&mut self) -> Result<()> {
        self.write_line("ucinewgame")?;
        self.sync_ready()
    }

    fn shutdown(&mut self) -> Result<()> {
        if self.exited {
            return Ok(());
        }
        self.exited = true;
        let _ = self.write_line("quit");
        let deadline = Instant::now() + ENGINE_QUIT_TIMEOUT;
        while Instant::now() < deadline {
            if let Ok(Some(_)) = self.child.try_wait() {
                return Ok(());
            }
            std::thread::sleep(ENGINE_QUIT_POLL_INTERVAL);
        }
        log::debug!("{}: engine did not quit in time, killing", self.label);
        let _ = self.child.kill();
        self.child.wait().with_context(|| format!("{}: failed to reap engine", self.label))?;
        Ok(())
    }
}

impl Drop for EngineProcess {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}

pub fn parse_option_name(line: &str) -> Option<String> {
    let mut tokens = line.split_whitespace().peekable();
    while let Some(tok) = tokens.next() {
        if tok == "name" {
            let mut parts = Vec::new();
            while let Some(next) = tokens.next_if(|t| *t != "type") {
                parts.push(next);
            }
            if !parts.is_empty() {
                return Some(parts.join(" "));
            }
        }
    }
    None
}
