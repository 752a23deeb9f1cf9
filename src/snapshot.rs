use std::{
    fs,
    io::{self, BufWriter, Write},
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

/// Cache state after an observed event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Snapshot {
    pub event: u64,
    pub occupancy: [u64; 2],
    pub accesses: u64,
    pub misses: u64,
}

/// What a periodic snapshot file records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotKind {
    /// Occupancy of owner A, one file.
    Occupancy,
    /// Occupancy of both owners, one file each.
    #[default]
    PairedOccupancy,
    Misses,
    Accesses,
}

impl SnapshotKind {
    pub fn suffixes(self) -> &'static [&'static str] {
        match self {
            SnapshotKind::Occupancy => &["_1"],
            SnapshotKind::PairedOccupancy => &["_1", "_2"],
            SnapshotKind::Misses => &["_miss"],
            SnapshotKind::Accesses => &["_access"],
        }
    }

    fn values(self, snapshot: &Snapshot) -> [u64; 2] {
        match self {
            SnapshotKind::Occupancy | SnapshotKind::PairedOccupancy => snapshot.occupancy,
            SnapshotKind::Misses => [snapshot.misses, 0],
            SnapshotKind::Accesses => [snapshot.accesses, 0],
        }
    }
}

pub trait Sink {
    fn record(&mut self, snapshot: &Snapshot) -> io::Result<()>;
}

impl Sink for Vec<Snapshot> {
    fn record(&mut self, snapshot: &Snapshot) -> io::Result<()> {
        self.push(*snapshot);
        Ok(())
    }
}

/// Discards every snapshot.
pub struct NullSink;

impl Sink for NullSink {
    fn record(&mut self, _snapshot: &Snapshot) -> io::Result<()> {
        Ok(())
    }
}

/// Writes one decimal value per line per output.
pub struct LineSink<W: Write> {
    kind: SnapshotKind,
    outputs: Vec<W>,
}

/// `<prefix><suffix>` for every output of `kind`.
pub fn output_paths(prefix: &Path, suffixes: &[&str]) -> Vec<PathBuf> {
    suffixes
        .iter()
        .map(|suffix| {
            let mut name = prefix.as_os_str().to_owned();
            name.push(suffix);
            PathBuf::from(name)
        })
        .collect()
}

impl LineSink<BufWriter<fs::File>> {
    pub fn create(kind: SnapshotKind, prefix: &Path) -> io::Result<Self> {
        let outputs = output_paths(prefix, kind.suffixes())
            .into_iter()
            .map(|path| fs::File::create(path).map(BufWriter::new))
            .collect::<io::Result<Vec<_>>>()?;
        Ok(LineSink::new(kind, outputs))
    }
}

impl<W: Write> LineSink<W> {
    pub fn new(kind: SnapshotKind, outputs: Vec<W>) -> Self {
        assert_eq!(outputs.len(), kind.suffixes().len());
        LineSink { kind, outputs }
    }

    pub fn finish(mut self) -> io::Result<Vec<W>> {
        for out in &mut self.outputs {
            out.flush()?;
        }
        Ok(self.outputs)
    }
}

impl<W: Write> Sink for LineSink<W> {
    fn record(&mut self, snapshot: &Snapshot) -> io::Result<()> {
        let values = self.kind.values(snapshot);
        for (out, value) in self.outputs.iter_mut().zip(values) {
            writeln!(out, "{value}")?;
        }
        Ok(())
    }
}
