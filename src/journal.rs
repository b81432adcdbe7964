use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

use crate::model::TransitionRecord;

/// One journal entry: `[u32 len][payload][u32 crc32]`, little-endian.
fn frame(record: &TransitionRecord) -> io::Result<Vec<u8>> {
    let payload =
        bincode::serialize(record).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let mut buf = Vec::with_capacity(payload.len() + 8);
    buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    buf.extend_from_slice(&payload);
    buf.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
    Ok(buf)
}

/// `Ok(false)` on a clean or torn end of file.
fn fill(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// Next intact payload, or `None` at end of file, a torn tail or a bad
/// checksum.
fn next_payload(reader: &mut impl Read, path: &Path) -> io::Result<Option<Vec<u8>>> {
    let mut word = [0u8; 4];
    if !fill(reader, &mut word)? {
        return Ok(None);
    }
    let mut payload = vec![0u8; u32::from_le_bytes(word) as usize];
    if !fill(reader, &mut payload)? || !fill(reader, &mut word)? {
        return Ok(None);
    }
    if u32::from_le_bytes(word) != crc32fast::hash(&payload) {
        tracing::warn!(path = %path.display(), "journal checksum mismatch; stopping replay");
        return Ok(None);
    }
    Ok(Some(payload))
}

/// Intact records and the byte length they occupy.
fn scan(path: &Path) -> io::Result<(Vec<TransitionRecord>, u64)> {
    let mut reader = match File::open(path) {
        Ok(f) => BufReader::new(f),
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok((Vec::new(), 0)),
        Err(e) => return Err(e),
    };
    let mut records = Vec::new();
    let mut intact = 0u64;
    while let Some(payload) = next_payload(&mut reader, path)? {
        match bincode::deserialize::<TransitionRecord>(&payload) {
            Ok(record) => records.push(record),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "undecodable journal entry; stopping replay");
                break;
            }
        }
        intact += payload.len() as u64 + 8;
    }
    Ok((records, intact))
}

/// Append-only audit journal of accepted status transitions.
///
/// Entries are never rewritten or removed. A torn last entry (crash during
/// append) is dropped on replay, as is anything after a corrupt entry;
/// [`Journal::recover`] cuts such a tail off before new appends land.
pub struct Journal {
    writer: BufWriter<File>,
    appended: u64,
}

impl Journal {
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
            appended: 0,
        })
    }

    /// Replay `path`, truncate anything after the last intact entry and open
    /// it for appending.
    pub fn recover(path: &Path) -> io::Result<(Self, Vec<TransitionRecord>)> {
        let (records, intact) = scan(path)?;
        if let Ok(meta) = std::fs::metadata(path)
            && meta.len() > intact
        {
            tracing::warn!(
                path = %path.display(),
                dropped_bytes = meta.len() - intact,
                "truncating damaged journal tail"
            );
            let file = OpenOptions::new().write(true).open(path)?;
            file.set_len(intact)?;
            file.sync_all()?;
        }
        Ok((Self::open(path)?, records))
    }

    /// Durable once this returns.
    pub fn append(&mut self, record: &TransitionRecord) -> io::Result<()> {
        self.writer.write_all(&frame(record)?)?;
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        self.appended += 1;
        Ok(())
    }

    /// Records appended through this handle.
    pub fn appended(&self) -> u64 {
        self.appended
    }

    /// Every intact record, in append order. A missing file is empty.
    pub fn replay(path: &Path) -> io::Result<Vec<TransitionRecord>> {
        Ok(scan(path)?.0)
    }
}
