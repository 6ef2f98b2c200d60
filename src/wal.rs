use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::model::Event;

/// Bytes of framing around each payload: u32 length prefix + u32 CRC.
const FRAME_OVERHEAD: u64 = 8;

/// Encode a single event as `[len][bincode][crc32]`.
fn encode_event(writer: &mut impl Write, event: &Event) -> io::Result<()> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = payload.len() as u32;
    let crc = crc32fast::hash(&payload);
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc.to_le_bytes())?;
    Ok(())
}

/// Read exactly `buf.len()` bytes. `Ok(false)` on a clean or torn end of file.
fn read_frame_part(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// What a replay recovered from disk.
#[derive(Debug, Default)]
pub struct Replay {
    pub events: Vec<Event>,
    /// Byte length of the valid prefix. Anything after it is a torn or corrupt tail.
    pub valid_len: u64,
    /// Whether bytes past `valid_len` were found.
    pub torn_tail: bool,
}

/// Append-only write-ahead log of reservation and resource events.
///
/// Format per entry: `[u32: len][bincode: Event][u32: crc32]`, little endian.
/// On open, a torn or corrupt tail left by a crash is cut off so that new
/// entries are never written behind unreadable bytes.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    appends_since_compact: u64,
}

impl Wal {
    /// Open (or create) the log at `path`, truncating any invalid tail.
    pub fn open(path: &Path) -> io::Result<Self> {
        Self::open_with_replay(path).map(|(wal, _)| wal)
    }

    /// Open the log and hand back what was replayed while validating it.
    pub fn open_with_replay(path: &Path) -> io::Result<(Self, Replay)> {
        let replay = Self::replay(path)?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        if replay.torn_tail {
            tracing::warn!(
                "wal {}: discarding invalid tail after byte {}",
                path.display(),
                replay.valid_len
            );
            file.set_len(replay.valid_len)?;
            file.sync_all()?;
        }
        let wal = Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            appends_since_compact: replay.events.len() as u64,
        };
        Ok((wal, replay))
    }

    /// Append one event and fsync. Production code batches through
    /// `append_buffered` + `flush_sync` instead.
    #[cfg(test)]
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        self.append_buffered(event)?;
        self.flush_sync()
    }

    /// Buffer an event without flushing. Durable only after `flush_sync()`.
    pub fn append_buffered(&mut self, event: &Event) -> io::Result<()> {
        encode_event(&mut self.writer, event)?;
        self.appends_since_compact += 1;
        Ok(())
    }

    pub fn flush_sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the compacted event set to a temp file next to the log and fsync it.
    pub fn write_compact_file(path: &Path, events: &[Event]) -> io::Result<()> {
        let tmp_path = path.with_extension("wal.tmp");
        let file = File::create(&tmp_path)?;
        let mut writer = BufWriter::new(file);
        for event in events {
            encode_event(&mut writer, event)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()?;
        Ok(())
    }

    /// Rename the temp file over the log and reopen for appends.
    pub fn swap_compact_file(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        let tmp_path = self.path.with_extension("wal.tmp");
        fs::rename(&tmp_path, &self.path)?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        self.writer = BufWriter::new(file);
        self.appends_since_compact = 0;
        Ok(())
    }

    #[cfg(test)]
    pub fn compact(&mut self, events: &[Event]) -> io::Result<()> {
        Self::write_compact_file(&self.path, events)?;
        self.swap_compact_file()
    }

    /// Entries written since the last compaction (or since open, counting replayed ones).
    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// Read every valid event from disk. A missing file is an empty log.
    /// Replay stops at the first truncated or corrupt entry.
    pub fn replay(path: &Path) -> io::Result<Replay> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Replay::default()),
            Err(e) => return Err(e),
        };
        let file_len = file.metadata()?.len();
        let mut reader = BufReader::new(file);
        let mut replay = Replay::default();

        loop {
            let mut len_buf = [0u8; 4];
            if !read_frame_part(&mut reader, &mut len_buf)? {
                break;
            }
            let len = u32::from_le_bytes(len_buf) as u64;
            if replay.valid_len + len + FRAME_OVERHEAD > file_len {
                break;
            }

            let mut payload = vec![0u8; len as usize];
            if !read_frame_part(&mut reader, &mut payload)? {
                break;
            }
            let mut crc_buf = [0u8; 4];
            if !read_frame_part(&mut reader, &mut crc_buf)? {
                break;
            }
            if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
                break;
            }
            match bincode::deserialize::<Event>(&payload) {
                Ok(event) => replay.events.push(event),
                Err(_) => break,
            }
            replay.valid_len += len + FRAME_OVERHEAD;
        }

        replay.torn_tail = replay.valid_len < file_len;
        Ok(replay)
    }
}
