//! Positioned read of one byte range of a shared file.
use std::fs::File;
use std::io;
use std::sync::Arc;

/// Reads `[offset, offset + len)` of `file` without touching the shared
/// cursor, so many workers can read sections of one `File` concurrently.
#[derive(Debug, Clone)]
pub struct SectionReader {
    file: Arc<File>,
    offset: u64,
    len: u64,
}

#[cfg(unix)]
fn read_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    use std::os::unix::fs::FileExt;
    file.read_at(buf, offset)
}

#[cfg(windows)]
fn read_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    use std::os::windows::fs::FileExt;
    file.seek_read(buf, offset)
}

impl SectionReader {
    pub fn new(file: Arc<File>, offset: u64, len: u64) -> Self {
        Self { file, offset, len }
    }

    /// Read the whole section into one buffer.
    pub fn read_all(&self) -> io::Result<Vec<u8>> {
        let mut buf = vec![0u8; self.len as usize];
        let mut filled = 0usize;
        while filled < buf.len() {
            let n = read_at(&self.file, &mut buf[filled..], self.offset + filled as u64)?;
            if n == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("section at {} ended after {} of {} bytes", self.offset, filled, self.len),
                ));
            }
            filled += n;
        }
        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn temp_file(name: &str, data: &[u8]) -> std::path::PathBuf {
        let mut p = std::env::temp_dir();
        p.push(format!("s3cp_section_{}_{}", name, std::process::id()));
        let mut f = File::create(&p).expect("create");
        f.write_all(data).expect("write");
        p
    }

    #[test]
    fn reads_only_its_window_and_can_repeat() {
        let path = temp_file("window", b"0123456789");
        let file = Arc::new(File::open(&path).expect("open"));
        let r = SectionReader::new(file.clone(), 3, 4);
        assert_eq!(r.read_all().expect("first"), b"3456");
        assert_eq!(r.read_all().expect("again"), b"3456");
        let tail = SectionReader::new(file, 8, 2);
        assert_eq!(tail.read_all().expect("tail"), b"89");
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn truncated_file_is_an_error() {
        let path = temp_file("short", b"abc");
        let file = Arc::new(File::open(&path).expect("open"));
        let r = SectionReader::new(file, 1, 10);
        assert_eq!(r.read_all().expect_err("eof").kind(), io::ErrorKind::UnexpectedEof);
        let _ = std::fs::remove_file(path);
    }
}
