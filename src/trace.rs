use std::{
    fs,
    io::{self, BufRead, BufReader, Read},
    path::{Path, PathBuf},
    thread::{self, JoinHandle},
};

use crossbeam::channel::{Receiver, Sender};
use thiserror::Error;
use xz2::read::XzDecoder;

#[derive(Error, Debug)]
pub enum TraceError {
    #[error("cannot read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{}:{line}: `{text}` is not an unsigned decimal number", path.display())]
    Malformed {
        path: PathBuf,
        line: u64,
        text: String,
    },
}

/// Opens `path`, decompressing on the fly when it ends in `.xz`.
fn open(path: &Path) -> Result<Box<dyn BufRead + Send>, TraceError> {
    let file = fs::File::open(path).map_err(|source| TraceError::Io {
        path: path.to_owned(),
        source,
    })?;
    let stream: Box<dyn Read + Send> = if path.extension().is_some_and(|ext| ext == "xz") {
        Box::new(XzDecoder::new(file))
    } else {
        Box::new(file)
    };
    Ok(Box::new(BufReader::new(stream)))
}

/// Parses one decimal number per line, handing them to `emit` in order.
fn parse_lines<R: BufRead>(
    reader: R,
    path: &Path,
    mut emit: impl FnMut(u64) -> bool,
) -> Result<(), TraceError> {
    for (idx, line) in reader.lines().enumerate() {
        let line = line.map_err(|source| TraceError::Io {
            path: path.to_owned(),
            source,
        })?;
        let text = line.trim();
        let value = text.parse::<u64>().map_err(|_| TraceError::Malformed {
            path: path.to_owned(),
            line: idx as u64 + 1,
            text: text.to_owned(),
        })?;
        if !emit(value) {
            break;
        }
    }
    Ok(())
}

/// Reads a whole file of per-line numbers, such as interval access counts.
pub fn read_counts(path: &Path) -> Result<Vec<u64>, TraceError> {
    let mut counts = Vec::new();
    parse_lines(open(path)?, path, |value| {
        counts.push(value);
        true
    })?;
    Ok(counts)
}

/// An address stream decoded on a background thread.
///
/// Addresses arrive in blocks through a bounded channel; the first error
/// ends the stream after being yielded once.
pub struct Trace {
    rec: Receiver<Result<Vec<u64>, TraceError>>,
    block: std::vec::IntoIter<u64>,
    done: bool,
    _thread: JoinHandle<()>,
}

impl Trace {
    pub fn read(
        path: PathBuf,
        addr_per_block: usize,
        blocks_per_queue: usize,
    ) -> Result<Trace, TraceError> {
        let stream = open(&path)?;
        let addr_per_block = addr_per_block.max(1);
        let (sender, receiver) = crossbeam::channel::bounded(blocks_per_queue);

        let t = thread::spawn(move || Trace::run_thread(stream, path, addr_per_block, sender));

        Ok(Trace {
            rec: receiver,
            block: Vec::new().into_iter(),
            done: false,
            _thread: t,
        })
    }

    fn run_thread(
        stream: Box<dyn BufRead + Send>,
        path: PathBuf,
        addr_per_block: usize,
        queue: Sender<Result<Vec<u64>, TraceError>>,
    ) {
        let mut buffer = Vec::with_capacity(addr_per_block);
        let mut connected = true;
        let parsed = parse_lines(stream, &path, |addr| {
            buffer.push(addr);
            if buffer.len() == addr_per_block {
                let full = std::mem::replace(&mut buffer, Vec::with_capacity(addr_per_block));
                connected = queue.send(Ok(full)).is_ok();
            }
            connected
        });
        if !connected {
            return;
        }
        if !buffer.is_empty() && queue.send(Ok(buffer)).is_err() {
            return;
        }
        if let Err(err) = parsed {
            // The receiver may already be gone; nothing left to do then.
            let _ = queue.send(Err(err));
        }
    }
}

impl Iterator for Trace {
    type Item = Result<u64, TraceError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(addr) = self.block.next() {
                return Some(Ok(addr));
            }
            if self.done {
                return None;
            }
            match self.rec.recv() {
                Ok(Ok(block)) => self.block = block.into_iter(),
                Ok(Err(err)) => {
                    self.done = true;
                    return Some(Err(err));
                }
                Err(_) => {
                    self.done = true;
                    return None;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn temp_file(name: &str, contents: &[u8]) -> PathBuf {
        let path = std::env::temp_dir().join(format!("cat_sim_{}_{name}", std::process::id()));
        fs::File::create(&path)
            .and_then(|mut f| f.write_all(contents))
            .unwrap();
        path
    }

    #[test]
    fn streams_every_address_across_blocks() {
        let contents: String = (0..1000u64).map(|a| format!("{}\n", a * 64)).collect();
        let path = temp_file("blocks", contents.as_bytes());

        let trace = Trace::read(path.clone(), 7, 2).unwrap();
        let addrs: Vec<u64> = trace.map(Result::unwrap).collect();
        assert_eq!(addrs, (0..1000u64).map(|a| a * 64).collect::<Vec<_>>());
        fs::remove_file(path).unwrap();
    }

    #[test]
    fn malformed_line_fails_loudly() {
        let path = temp_file("malformed", b"64\n128\nabc\n256\n");
        let mut trace = Trace::read(path.clone(), 2, 2).unwrap();
        assert_eq!(trace.next().unwrap().unwrap(), 64);
        assert_eq!(trace.next().unwrap().unwrap(), 128);
        match trace.next() {
            Some(Err(TraceError::Malformed { line, text, .. })) => {
                assert_eq!(line, 3);
                assert_eq!(text, "abc");
            }
            other => panic!("expected malformed line, got {other:?}"),
        }
        assert!(trace.next().is_none());
        fs::remove_file(path).unwrap();
    }

    #[test]
    fn xz_traces_are_decompressed() {
        let mut encoder = xz2::write::XzEncoder::new(Vec::new(), 6);
        encoder.write_all(b"1\n2\n3\n").unwrap();
        let path = temp_file("trace.xz", &encoder.finish().unwrap());

        let addrs: Vec<u64> = Trace::read(path.clone(), 16, 1)
            .unwrap()
            .map(Result::unwrap)
            .collect();
        assert_eq!(addrs, vec![1, 2, 3]);
        fs::remove_file(path).unwrap();
    }

    #[test]
    fn counts_are_read_whole() {
        let path = temp_file("counts", b"2048000\r\n4096000\n");
        assert_eq!(read_counts(&path).unwrap(), vec![2_048_000, 4_096_000]);
        fs::remove_file(path).unwrap();
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let missing = std::env::temp_dir().join("cat_sim_definitely_missing.trace");
        assert!(matches!(
            Trace::read(missing, 4, 4),
            Err(TraceError::Io { .. })
        ));
    }
}
