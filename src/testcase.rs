// SPDX-License-Identifier: Apache-2.0

//! Content-addressed testcases and seed loading.

use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

/// Number of hex characters retained from the blake3 digest for a
/// testcase fingerprint.
const FINGERPRINT_LEN: usize = 16;

/// Provenance of a testcase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Origin {
    /// Loaded from the long-lived seed corpus.
    CorpusSeed,
    /// Produced by the binary mutation engine.
    MutationBinary,
    /// Produced by a generative (non-binary) source.
    MutationGenerative,
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Origin::CorpusSeed => write!(f, "corpus-seed"),
            Origin::MutationBinary => write!(f, "mutation-binary"),
            Origin::MutationGenerative => write!(f, "mutation-generative"),
        }
    }
}

/// An immutable, content-addressed instruction sequence.
///
/// The `id` is always the fingerprint of `words`; two testcases with equal
/// words have equal ids regardless of origin or metadata. Construction goes
/// through [`Testcase::new`] so the invariant cannot be broken.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Testcase {
    id: String,
    words: Vec<u32>,
    origin: Origin,
    metadata: BTreeMap<String, String>,
}

impl Testcase {
    pub fn new(words: Vec<u32>, origin: Origin) -> Self {
        let id = fingerprint(&words);
        Self {
            id,
            words,
            origin,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: &str, value: &str) -> Self {
        self.metadata.insert(key.to_string(), value.to_string());
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn words(&self) -> &[u32] {
        &self.words
    }

    pub fn origin(&self) -> Origin {
        self.origin
    }

    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    /// Little-endian encoding of the instruction words, the canonical byte
    /// form used for hashing and external execution.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.words.len() * 4);
        for w in &self.words {
            out.extend_from_slice(&w.to_le_bytes());
        }
        out
    }
}

/// Computes the content fingerprint of an instruction word sequence.
pub fn fingerprint(words: &[u32]) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(b"rvfuzz:testcase");
    for w in words {
        hasher.update(&w.to_le_bytes());
    }
    hasher.finalize().to_hex().as_str()[..FINGERPRINT_LEN].to_string()
}

/// Error loading seed programs from a directory.
#[derive(Debug)]
pub enum SeedLoadError {
    Io { path: PathBuf, source: io::Error },
    Parse { path: PathBuf, line: usize },
}

impl fmt::Display for SeedLoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SeedLoadError::Io { path, source } => {
                write!(f, "failed to read seed '{}': {}", path.display(), source)
            }
            SeedLoadError::Parse { path, line } => {
                write!(
                    f,
                    "seed '{}' line {} is not an 8-digit hex instruction word",
                    path.display(),
                    line
                )
            }
        }
    }
}

impl std::error::Error for SeedLoadError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SeedLoadError::Io { source, .. } => Some(source),
            SeedLoadError::Parse { .. } => None,
        }
    }
}

/// Parses a `.hex` seed program: one hex instruction word per line, blank
/// lines and `#` comments skipped.
pub fn parse_hex_program(text: &str, path: &Path) -> Result<Vec<u32>, SeedLoadError> {
    let mut words = Vec::new();
    for (idx, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let word = u32::from_str_radix(line, 16).map_err(|_| SeedLoadError::Parse {
            path: path.to_path_buf(),
            line: idx + 1,
        })?;
        words.push(word);
    }
    Ok(words)
}

/// Loads every `.hex` file in `dir` as a corpus-seed testcase, sorted by
/// file name so the result is stable across platforms.
pub fn load_seed_dir(dir: &Path) -> Result<Vec<Testcase>, SeedLoadError> {
    let entries = std::fs::read_dir(dir).map_err(|e| SeedLoadError::Io {
        path: dir.to_path_buf(),
        source: e,
    })?;
    let mut paths: Vec<PathBuf> = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| SeedLoadError::Io {
            path: dir.to_path_buf(),
            source: e,
        })?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) == Some("hex") {
            paths.push(path);
        }
    }
    paths.sort();

    let mut seeds = Vec::with_capacity(paths.len());
    for path in paths {
        let text = std::fs::read_to_string(&path).map_err(|e| SeedLoadError::Io {
            path: path.clone(),
            source: e,
        })?;
        let words = parse_hex_program(&text, &path)?;
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_string();
        seeds.push(Testcase::new(words, Origin::CorpusSeed).with_metadata("seed_file", &name));
    }
    log::info!("loaded {} seed programs from {}", seeds.len(), dir.display());
    Ok(seeds)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_words_give_equal_ids() {
        let a = Testcase::new(vec![0x0000_0013, 0x0010_0073], Origin::CorpusSeed);
        let b = Testcase::new(vec![0x0000_0013, 0x0010_0073], Origin::MutationBinary);
        assert_eq!(a.id(), b.id());
        assert_ne!(
            a.id(),
            Testcase::new(vec![0x0000_0013], Origin::CorpusSeed).id()
        );
    }

    #[test]
    fn fingerprint_is_stable_length() {
        let id = fingerprint(&[0xdead_beef]);
        assert_eq!(id.len(), FINGERPRINT_LEN);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn hex_program_parses_words_and_skips_comments() {
        let text = "# header\n00000013\n\n00100073\n";
        let words = parse_hex_program(text, Path::new("t.hex")).unwrap();
        assert_eq!(words, vec![0x0000_0013, 0x0010_0073]);
    }

    #[test]
    fn hex_program_rejects_garbage() {
        let err = parse_hex_program("addi x1, x0, 1", Path::new("t.hex")).unwrap_err();
        match err {
            SeedLoadError::Parse { line, .. } => assert_eq!(line, 1),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn seed_dir_loads_sorted_hex_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.hex"), "00000013\n00000013\n00100073\n").unwrap();
        std::fs::write(dir.path().join("a.hex"), "00100073\n").unwrap();
        std::fs::write(dir.path().join("ignored.txt"), "zzz\n").unwrap();
        let seeds = load_seed_dir(dir.path()).unwrap();
        assert_eq!(seeds.len(), 2);
        assert_eq!(seeds[0].metadata().get("seed_file").unwrap(), "a");
        assert_eq!(seeds[1].words().len(), 3);
        assert_eq!(seeds[0].origin(), Origin::CorpusSeed);
    }
}
