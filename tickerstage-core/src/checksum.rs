//! MD5 integrity digests and `checksum.md5` side files.
//!
//! Side file format is one line: `<hex-digest>  <filename>`.

use std::fs;
use std::io::{self, Read};
use std::path::Path;

/// Name of the checksum side file written next to every persisted dataset.
pub const CHECKSUM_FILE: &str = "checksum.md5";

/// Lowercase hex MD5 of `bytes` (32 characters).
pub fn md5_hex(bytes: &[u8]) -> String {
    format!("{:x}", md5::compute(bytes))
}

/// Lowercase hex MD5 of a file's contents, read in chunks.
pub fn md5_file(path: &Path) -> io::Result<String> {
    let mut file = fs::File::open(path)?;
    let mut context = md5::Context::new();
    let mut buffer = vec![0u8; 256 * 1024];
    loop {
        let n = file.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        context.consume(&buffer[..n]);
    }
    Ok(format!("{:x}", context.finalize()))
}

/// True if `s` looks like an MD5 hex digest.
pub fn is_md5_hex(s: &str) -> bool {
    s.len() == 32 && s.chars().all(|c| c.is_ascii_hexdigit())
}

/// Render a checksum side-file line.
pub fn checksum_line(digest: &str, file_name: &str) -> String {
    format!("{digest}  {file_name}\n")
}

/// Parse a checksum side-file line into `(digest, file_name)`.
pub fn parse_checksum_line(line: &str) -> Option<(&str, &str)> {
    let (digest, name) = line.trim_end().split_once("  ")?;
    if !is_md5_hex(digest) || name.is_empty() {
        return None;
    }
    Some((digest, name))
}

/// Outcome of re-hashing a persisted file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Integrity {
    Intact,
    Mismatch { expected: String, actual: String },
    Missing,
}

impl Integrity {
    pub fn is_intact(&self) -> bool {
        matches!(self, Integrity::Intact)
    }
}

/// Re-hash `path` and compare with `expected`.
pub fn verify_file(path: &Path, expected: &str) -> io::Result<Integrity> {
    if !path.exists() {
        return Ok(Integrity::Missing);
    }
    let actual = md5_file(path)?;
    if actual.eq_ignore_ascii_case(expected) {
        Ok(Integrity::Intact)
    } else {
        Ok(Integrity::Mismatch {
            expected: expected.to_string(),
            actual,
        })
    }
}

/// Verify the dataset named by the `checksum.md5` file in `dir`.
pub fn verify_checksum_file(dir: &Path) -> io::Result<Integrity> {
    let side_file = dir.join(CHECKSUM_FILE);
    if !side_file.exists() {
        return Ok(Integrity::Missing);
    }
    let content = fs::read_to_string(&side_file)?;
    let (digest, name) = parse_checksum_line(&content).ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("malformed checksum file {}", side_file.display()),
        )
    })?;
    verify_file(&dir.join(name), digest)
}
