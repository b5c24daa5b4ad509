//! 重みスナップショットの入出力
//!
//! フォーマット (little endian):
//!
//! ```text
//! magic "KTSN" | u32 version | u32 layer_count
//! 各層: u32 name_len | name (UTF-8) | u32 rows | u32 cols | f32 weights[rows*cols] | f32 biases[rows]
//! ```
//!
//! 重みは [rows = 出力][cols = 入力] の行優先で並ぶ。

use std::ffi::OsStr;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{NetError, NetResult};

pub const SNAPSHOT_MAGIC: [u8; 4] = *b"KTSN";
pub const SNAPSHOT_VERSION: u32 = 1;

/// 1 層あたりの要素数上限（壊れたファイルで巨大確保しないため）
const MAX_LAYER_ELEMENTS: u64 = 1 << 26;
const MAX_NAME_LEN: usize = 256;

/// 1 層分の重みとバイアス
#[derive(Clone, Debug, PartialEq)]
pub struct LayerWeights {
    pub name: String,
    pub rows: usize,
    pub cols: usize,
    pub weights: Vec<f32>,
    pub biases: Vec<f32>,
}

/// 近似器の学習可能パラメータ一式
#[derive(Clone, Debug, Default, PartialEq)]
pub struct WeightSnapshot {
    pub layers: Vec<LayerWeights>,
}

impl WeightSnapshot {
    pub fn layer(&self, name: &str) -> Option<&LayerWeights> {
        self.layers.iter().find(|l| l.name == name)
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> NetResult<()> {
        writer.write_all(&SNAPSHOT_MAGIC)?;
        writer.write_u32::<LittleEndian>(SNAPSHOT_VERSION)?;
        writer.write_u32::<LittleEndian>(self.layers.len() as u32)?;
        for layer in &self.layers {
            let name = layer.name.as_bytes();
            writer.write_u32::<LittleEndian>(name.len() as u32)?;
            writer.write_all(name)?;
            writer.write_u32::<LittleEndian>(layer.rows as u32)?;
            writer.write_u32::<LittleEndian>(layer.cols as u32)?;
            for &w in &layer.weights {
                writer.write_f32::<LittleEndian>(w)?;
            }
            for &b in &layer.biases {
                writer.write_f32::<LittleEndian>(b)?;
            }
        }
        Ok(())
    }

    pub fn read_from<R: Read>(reader: &mut R) -> NetResult<Self> {
        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if magic != SNAPSHOT_MAGIC {
            return Err(NetError::InvalidMagic { expected: SNAPSHOT_MAGIC, actual: magic });
        }
        let version = reader.read_u32::<LittleEndian>()?;
        if version != SNAPSHOT_VERSION {
            return Err(NetError::UnsupportedVersion(version));
        }

        let count = reader.read_u32::<LittleEndian>()? as usize;
        let mut layers = Vec::with_capacity(count.min(64));
        for _ in 0..count {
            let name_len = reader.read_u32::<LittleEndian>()? as usize;
            if name_len > MAX_NAME_LEN {
                return Err(NetError::InvalidLayerName);
            }
            let mut name_buf = vec![0u8; name_len];
            reader.read_exact(&mut name_buf)?;
            let name = String::from_utf8(name_buf).map_err(|_| NetError::InvalidLayerName)?;

            let rows = reader.read_u32::<LittleEndian>()? as usize;
            let cols = reader.read_u32::<LittleEndian>()? as usize;
            let elements = rows as u64 * cols as u64;
            if elements > MAX_LAYER_ELEMENTS {
                return Err(NetError::LayerTooLarge { name, elements });
            }

            let mut weights = vec![0.0f32; rows * cols];
            reader.read_f32_into::<LittleEndian>(&mut weights)?;
            let mut biases = vec![0.0f32; rows];
            reader.read_f32_into::<LittleEndian>(&mut biases)?;
            layers.push(LayerWeights { name, rows, cols, weights, biases });
        }
        Ok(Self { layers })
    }

    /// ファイルへ保存する（原子的ではない。公開用には [`publish_atomic`] を使う）
    pub fn save(&self, path: &Path) -> NetResult<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        self.write_to(&mut writer)?;
        writer.flush()?;
        Ok(())
    }

    pub fn load(path: &Path) -> NetResult<Self> {
        let mut reader = BufReader::new(File::open(path)?);
        Self::read_from(&mut reader)
    }
}

/// 一時ファイルに書いてから rename で置き換える。
///
/// 読み手が書きかけのスナップショットを見ることはない。
pub fn publish_atomic(snapshot: &WeightSnapshot, path: &Path) -> NetResult<()> {
    let pid = std::process::id();
    let tmp = {
        let ext = path.extension().and_then(OsStr::to_str).unwrap_or("bin");
        path.with_extension(format!("{}.tmp.{}", ext, pid))
    };
    {
        let file = File::create(&tmp)?;
        let mut writer = BufWriter::new(file);
        snapshot.write_to(&mut writer)?;
        let file = writer.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
    }
    #[cfg(windows)]
    if path.exists() {
        let _ = fs::remove_file(path);
    }
    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(e.into());
    }
    Ok(())
}

/// バージョン付きチェックポイントと、エンジンが読む公開スナップショットを管理する。
pub struct SnapshotStore {
    checkpoint_dir: PathBuf,
    publish_path: PathBuf,
}

const CHECKPOINT_PREFIX: &str = "td_batch_";
const CHECKPOINT_EXT: &str = "bin";

impl SnapshotStore {
    pub fn new(checkpoint_dir: impl Into<PathBuf>, publish_path: impl Into<PathBuf>) -> NetResult<Self> {
        let checkpoint_dir = checkpoint_dir.into();
        fs::create_dir_all(&checkpoint_dir)?;
        let publish_path = publish_path.into();
        if let Some(parent) = publish_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        Ok(Self { checkpoint_dir, publish_path })
    }

    pub fn publish_path(&self) -> &Path {
        &self.publish_path
    }

    pub fn checkpoint_path(&self, version: u64) -> PathBuf {
        self.checkpoint_dir.join(format!("{CHECKPOINT_PREFIX}{version:06}.{CHECKPOINT_EXT}"))
    }

    /// バージョン付きチェックポイントを書き出す
    pub fn checkpoint(&self, snapshot: &WeightSnapshot, version: u64) -> NetResult<PathBuf> {
        let path = self.checkpoint_path(version);
        publish_atomic(snapshot, &path)?;
        log::debug!("checkpoint written: {}", path.display());
        Ok(path)
    }

    /// エンジンが参照する固定パスへ原子的に公開する
    pub fn publish(&self, snapshot: &WeightSnapshot) -> NetResult<&Path> {
        publish_atomic(snapshot, &self.publish_path)?;
        Ok(&self.publish_path)
    }

    /// 最新のチェックポイントを探す（再開用）
    pub fn latest_checkpoint(&self) -> NetResult<Option<(u64, PathBuf)>> {
        let mut best: Option<(u64, PathBuf)> = None;
        for entry in fs::read_dir(&self.checkpoint_dir)? {
            let path = entry?.path();
            if path.extension().and_then(OsStr::to_str) != Some(CHECKPOINT_EXT) {
                continue;
            }
            let Some(version) = path
                .file_stem()
                .and_then(OsStr::to_str)
                .and_then(|s| s.strip_prefix(CHECKPOINT_PREFIX))
                .and_then(|s| s.parse::<u64>().ok())
            else {
                continue;
            };
            if best.as_ref().is_none_or(|(v, _)| version > *v) {
                best = Some((version, path));
            }
        }
        Ok(best)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_snapshot() -> WeightSnapshot {
        WeightSnapshot {
            layers: vec![
                LayerWeights {
                    name: "global".to_string(),
                    rows: 2,
                    cols: 3,
                    weights: vec![0.1, -0.2, f32::MIN_POSITIVE, 1.0e-30, -0.0, 3.5],
                    biases: vec![0.25, -7.0],
                },
                LayerWeights {
                    name: "outlayer".to_string(),
                    rows: 1,
                    cols: 2,
                    weights: vec![1.0 / 3.0, -2.0 / 7.0],
                    biases: vec![0.0],
                },
            ],
        }
    }

    fn bits(s: &WeightSnapshot) -> Vec<(String, Vec<u32>, Vec<u32>)> {
        s.layers
            .iter()
            .map(|l| {
                (
                    l.name.clone(),
                    l.weights.iter().map(|w| w.to_bits()).collect(),
                    l.biases.iter().map(|b| b.to_bits()).collect(),
                )
            })
            .collect()
    }

    #[test]
    fn round_trip_is_bit_exact() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("weights.bin");
        let original = sample_snapshot();
        original.save(&path).unwrap();
        let loaded = WeightSnapshot::load(&path).unwrap();
        assert_eq!(bits(&original), bits(&loaded));
        assert_eq!(loaded.layer("outlayer").map(|l| (l.rows, l.cols)), Some((1, 2)));
    }

    #[test]
    fn rejects_bad_magic() {
        let mut data: &[u8] = b"NOPE\x01\x00\x00\x00";
        let err = WeightSnapshot::read_from(&mut data).unwrap_err();
        assert!(matches!(err, NetError::InvalidMagic { .. }));
    }

    #[test]
    fn publish_atomic_replaces_and_leaves_no_temp() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("current.bin");
        fs::write(&path, b"stale").unwrap();

        publish_atomic(&sample_snapshot(), &path).unwrap();

        let loaded = WeightSnapshot::load(&path).unwrap();
        assert_eq!(loaded, sample_snapshot());
        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains(".tmp."))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn store_finds_latest_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("ckpt"), dir.path().join("pub/current.bin")).unwrap();
        assert!(store.latest_checkpoint().unwrap().is_none());

        let snap = sample_snapshot();
        store.checkpoint(&snap, 3).unwrap();
        store.checkpoint(&snap, 12).unwrap();
        store.checkpoint(&snap, 7).unwrap();

        let (version, path) = store.latest_checkpoint().unwrap().unwrap();
        assert_eq!(version, 12);
        assert!(path.ends_with("td_batch_000012.bin"));

        let published = store.publish(&snap).unwrap();
        assert!(published.exists());
    }
}
