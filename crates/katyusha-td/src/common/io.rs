//! ファイルI/Oユーティリティ（gzip対応）

use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use serde::Serialize;

const READER_BUF_CAP: usize = 64 * 1024;

/// `-` は標準入力、拡張子 `.gz` は gzip として開く。
///
/// 追記で複数メンバになった gzip も最後まで読む。
pub fn open_reader<P: AsRef<Path>>(path: P) -> io::Result<Box<dyn BufRead>> {
    let p = path.as_ref();
    if p.to_string_lossy() == "-" {
        return Ok(Box::new(BufReader::with_capacity(READER_BUF_CAP, io::stdin())));
    }
    let f = File::open(p)?;
    if is_gzip(p) {
        let dec = flate2::read::MultiGzDecoder::new(f);
        return Ok(Box::new(BufReader::with_capacity(READER_BUF_CAP, dec)));
    }
    Ok(Box::new(BufReader::with_capacity(READER_BUF_CAP, f)))
}

fn is_gzip(p: &Path) -> bool {
    p.extension().and_then(|e| e.to_str()).is_some_and(|e| e.eq_ignore_ascii_case("gz"))
}

/// 追記専用の出力先。gzip は close で末尾を書き切る。
#[must_use = "call .close() to propagate compression/IO errors"]
pub enum Writer {
    Plain(BufWriter<File>),
    Gz(flate2::write::GzEncoder<File>),
}

impl Write for Writer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Writer::Plain(f) => f.write(buf),
            Writer::Gz(e) => e.write(buf),
        }
    }
    fn flush(&mut self) -> io::Result<()> {
        match self {
            Writer::Plain(f) => f.flush(),
            Writer::Gz(e) => e.flush(),
        }
    }
}

impl Writer {
    pub fn close(self) -> io::Result<()> {
        let file = match self {
            Writer::Plain(f) => f.into_inner().map_err(|e| e.into_error())?,
            Writer::Gz(e) => e.finish()?,
        };
        file.sync_all()
    }
}

/// 既存ファイルには追記する
pub fn open_writer<P: AsRef<Path>>(path: P) -> io::Result<Writer> {
    let p = path.as_ref();
    let f = OpenOptions::new().create(true).append(true).open(p)?;
    if is_gzip(p) {
        let enc = flate2::write::GzEncoder::new(f, flate2::Compression::default());
        return Ok(Writer::Gz(enc));
    }
    Ok(Writer::Plain(BufWriter::new(f)))
}

/// 1 行 1 レコードの JSON 出力
pub struct JsonlWriter {
    inner: Writer,
}

impl JsonlWriter {
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        Ok(Self { inner: open_writer(path)? })
    }

    /// 1 レコード書いて flush する
    pub fn write_record<T: Serialize>(&mut self, record: &T) -> io::Result<()> {
        serde_json::to_writer(&mut self.inner, record)?;
        self.inner.write_all(b"\n")?;
        self.inner.flush()
    }

    pub fn close(self) -> io::Result<()> {
        self.inner.close()
    }
}
