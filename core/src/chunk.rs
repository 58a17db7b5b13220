//! Line-aligned input chunking.
//!
//! `split` computes contiguous byte ranges over a line-oriented file such
//! that every boundary falls right after a line terminator and the ranges
//! exactly partition the file. `materialize` copies each range into its
//! own file so that every chunk can be scanned by an independent instance.
//!
//! The file is streamed twice (count lines, then place boundaries), so
//! memory use does not grow with the input.

use std::fs::{self, File};
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::ScanError;


/// A `[start, stop)` byte range of a source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub start: u64,
    pub stop: u64,
}

impl Chunk {
    pub fn len(&self) -> u64 {
        self.stop - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.stop == self.start
    }
}


// ---------------------------------------------------------------------------
// Splitting
// ---------------------------------------------------------------------------

/// Split `path` into at most `n` line-aligned chunks.
///
/// A file with at least `n` lines yields exactly `n` non-empty chunks; a
/// file with fewer lines yields one chunk per line. Chunks are balanced by
/// byte size, and the last one always ends at end of file.
pub fn split(path: &Path, n: usize) -> Result<Vec<Chunk>, ScanError> {
    let size = match fs::metadata(path) {
        Ok(meta) if meta.is_file() => meta.len(),
        Ok(_) => {
            return Err(ScanError::InvalidInput {
                path: path.to_path_buf(),
                reason: "not a regular file".into(),
            })
        }
        Err(e) => {
            return Err(ScanError::InvalidInput {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })
        }
    };
    if size == 0 {
        return Err(ScanError::InvalidInput {
            path: path.to_path_buf(),
            reason: "file is empty".into(),
        });
    }
    if n == 0 {
        return Err(ScanError::SplitError {
            path: path.to_path_buf(),
            reason: "zero chunks requested".into(),
        });
    }

    let mut total_lines: u64 = 0;
    for_each_line_end(path, |_| total_lines += 1)?;
    let k = (n as u64).min(total_lines);
    if k == 0 {
        return Err(ScanError::SplitError {
            path: path.to_path_buf(),
            reason: "no usable lines".into(),
        });
    }

    let mut chunks: Vec<Chunk> = Vec::with_capacity(k as usize);
    let mut start: u64 = 0;
    let mut start_line: u64 = 0;
    let mut line: u64 = 0;
    for_each_line_end(path, |end| {
        line += 1;
        let index = chunks.len() as u64;
        if index + 1 >= k || line <= start_line {
            return;
        }
        let reached_share = (end as u128) * (k as u128) >= (size as u128) * ((index + 1) as u128);
        let must_close = total_lines - line == k - 1 - index;
        if reached_share || must_close {
            chunks.push(Chunk { start, stop: end });
            start = end;
            start_line = line;
        }
    })?;
    chunks.push(Chunk { start, stop: size });

    debug!(path = %path.display(), requested = n, produced = chunks.len(), "split input");
    Ok(chunks)
}


/// Call `f` with the byte offset just past every line terminator, plus the
/// end-of-file offset when the last line has no terminator.
fn for_each_line_end<F: FnMut(u64)>(path: &Path, mut f: F) -> Result<(), ScanError> {
    let mut reader = BufReader::with_capacity(64 * 1024, File::open(path)?);
    let mut buf = [0u8; 64 * 1024];
    let mut offset: u64 = 0;
    let mut last: Option<u8> = None;
    loop {
        let read = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(read) => read,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        for (i, byte) in buf[..read].iter().enumerate() {
            if *byte == b'\n' {
                f(offset + i as u64 + 1);
            }
        }
        offset += read as u64;
        last = Some(buf[read - 1]);
    }
    if matches!(last, Some(b) if b != b'\n') {
        f(offset);
    }
    Ok(())
}


// ---------------------------------------------------------------------------
// Materializing
// ---------------------------------------------------------------------------

/// Name of the file holding chunk `index` of `source`.
pub fn chunk_file_name(source: &Path, index: usize) -> String {
    let base = source
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "input".to_string());
    format!("{}-chunk-{}", base, index)
}

/// Copy every chunk of `source` into its own file under `dest_dir`.
///
/// Creates `dest_dir` if needed. A chunk whose file cannot be written or
/// does not read back with the expected size is logged and skipped; only
/// the paths that were fully written are returned, in chunk order.
pub fn materialize(
    source: &Path,
    chunks: &[Chunk],
    dest_dir: &Path,
) -> Result<Vec<PathBuf>, ScanError> {
    fs::create_dir_all(dest_dir)?;

    let mut written = Vec::with_capacity(chunks.len());
    for (index, chunk) in chunks.iter().enumerate() {
        let dest = dest_dir.join(chunk_file_name(source, index));
        match copy_range(source, chunk, &dest) {
            Ok(()) => written.push(dest),
            Err(e) => {
                warn!(chunk = index, dest = %dest.display(), error = %e, "skipping chunk");
                if dest.is_file() {
                    let _ = fs::remove_file(&dest);
                }
            }
        }
    }
    Ok(written)
}

fn copy_range(source: &Path, chunk: &Chunk, dest: &Path) -> io::Result<()> {
    let mut src = File::open(source)?;
    src.seek(SeekFrom::Start(chunk.start))?;
    let mut limited = src.take(chunk.len());
    let mut out = File::create(dest)?;
    let copied = io::copy(&mut limited, &mut out)?;
    drop(out);

    let on_disk = fs::metadata(dest)?.len();
    if copied != chunk.len() || on_disk != chunk.len() {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("expected {} bytes, wrote {}", chunk.len(), on_disk),
        ));
    }
    Ok(())
}

/// Split `source` into `n` chunk files under `dest_dir`.
pub fn split_into_files(source: &Path, n: usize, dest_dir: &Path) -> Result<Vec<PathBuf>, ScanError> {
    let chunks = split(source, n)?;
    let files = materialize(source, &chunks, dest_dir)?;
    if files.is_empty() {
        return Err(ScanError::SplitError {
            path: source.to_path_buf(),
            reason: "no chunk file could be written".into(),
        });
    }
    Ok(files)
}

/// Delete chunk files, ignoring ones that are already gone.
pub fn remove_chunk_files(files: &[PathBuf]) {
    for file in files {
        if let Err(e) = fs::remove_file(file) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(file = %file.display(), error = %e, "could not remove chunk file");
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, content).unwrap();
        path
    }

    fn assert_partition(content: &str, chunks: &[Chunk]) {
        let bytes = content.as_bytes();
        assert_eq!(chunks.first().unwrap().start, 0);
        assert_eq!(chunks.last().unwrap().stop, bytes.len() as u64);
        for pair in chunks.windows(2) {
            assert_eq!(pair[0].stop, pair[1].start);
        }
        for c in chunks {
            assert!(!c.is_empty());
            let stop = c.stop as usize;
            if stop < bytes.len() {
                assert_eq!(bytes[stop - 1], b'\n', "boundary at {} splits a line", stop);
            }
        }
    }

    #[test]
    fn ten_lines_into_three_files() {
        let dir = tempfile::tempdir().unwrap();
        let content: String = (0..10).map(|i| format!("host-{}.example.com\n", i)).collect();
        let src = write(dir.path(), "targets.txt", &content);
        let out = dir.path().join("chunks");

        let files = split_into_files(&src, 3, &out).unwrap();
        assert_eq!(files.len(), 3);

        let mut total_lines = 0;
        for (i, f) in files.iter().enumerate() {
            assert_eq!(f.file_name().unwrap().to_string_lossy(), format!("targets.txt-chunk-{}", i));
            let data = fs::read_to_string(f).unwrap();
            assert!(!data.is_empty());
            assert!(data.ends_with('\n'));
            assert!(data.starts_with("host-"));
            total_lines += data.lines().count();
        }
        assert_eq!(total_lines, 10);
    }

    #[test]
    fn concatenated_chunks_reproduce_source() {
        let dir = tempfile::tempdir().unwrap();
        let inputs = [
            "a\nbb\nccc\ndddd\neeeee\n",
            "no-trailing-newline\nsecond",
            "one very long line that dominates the byte count of the file\nb\nc\nd\n",
            "\n\n\n\n",
            "single",
        ];
        for (case, content) in inputs.iter().enumerate() {
            let src = write(dir.path(), &format!("in-{}.txt", case), content);
            for n in 1..=7 {
                let chunks = split(&src, n).unwrap();
                assert_partition(content, &chunks);

                let out = dir.path().join(format!("out-{}-{}", case, n));
                let files = materialize(&src, &chunks, &out).unwrap();
                let joined: Vec<u8> = files.iter().flat_map(|f| fs::read(f).unwrap()).collect();
                assert_eq!(joined, content.as_bytes(), "case {} n {}", case, n);
            }
        }
    }

    #[test]
    fn chunk_count_matches_request_when_enough_lines() {
        let dir = tempfile::tempdir().unwrap();
        let content = "x\n".repeat(5) + &"y".repeat(500) + "\n";
        let src = write(dir.path(), "skewed.txt", &content);
        for n in 1..=6 {
            assert_eq!(split(&src, n).unwrap().len(), n);
        }
    }

    #[test]
    fn more_chunks_than_lines_gives_one_per_line() {
        let dir = tempfile::tempdir().unwrap();
        let src = write(dir.path(), "short.txt", "a\nb\nc");
        let chunks = split(&src, 10).unwrap();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[2], Chunk { start: 4, stop: 5 });
    }

    #[test]
    fn missing_or_empty_file_is_invalid_input() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.txt");
        assert!(matches!(split(&missing, 2), Err(ScanError::InvalidInput { .. })));

        let empty = write(dir.path(), "empty.txt", "");
        assert!(matches!(split(&empty, 2), Err(ScanError::InvalidInput { .. })));

        assert!(matches!(split(dir.path(), 2), Err(ScanError::InvalidInput { .. })));
    }

    #[test]
    fn zero_chunks_is_split_error() {
        let dir = tempfile::tempdir().unwrap();
        let src = write(dir.path(), "in.txt", "a\n");
        assert!(matches!(split(&src, 0), Err(ScanError::SplitError { .. })));
    }

    #[test]
    fn unwritable_chunk_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let src = write(dir.path(), "in.txt", "a\nb\nc\n");
        let out = dir.path().join("out");
        fs::create_dir_all(out.join("in.txt-chunk-1")).unwrap();

        let chunks = split(&src, 3).unwrap();
        let files = materialize(&src, &chunks, &out).unwrap();
        assert_eq!(files.len(), 2);
        assert!(files[0].ends_with("in.txt-chunk-0"));
        assert!(files[1].ends_with("in.txt-chunk-2"));
    }

    #[test]
    fn remove_chunk_files_tolerates_missing() {
        let dir = tempfile::tempdir().unwrap();
        let a = write(dir.path(), "a", "1\n");
        let gone = dir.path().join("gone");
        remove_chunk_files(&[a.clone(), gone]);
        assert!(!a.exists());
    }
}
