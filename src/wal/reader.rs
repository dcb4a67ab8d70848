//! Log reader used during recovery.

use super::record::{Fragment, FragmentKind, HEADER_SIZE};
use crate::error::{Error, Result};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

/// Reads framed entries back from a log file.
pub struct LogReader {
    reader: BufReader<File>,
    position: u64,
}

impl LogReader {
    /// Open a log file for reading
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        Ok(Self { reader: BufReader::new(file), position: 0 })
    }

    /// Reads the next complete entry, reassembling fragments.
    ///
    /// Returns `Ok(None)` at a clean end of file. A torn or damaged tail
    /// surfaces as `Error::Corrupt`.
    pub fn read_next(&mut self) -> Result<Option<Vec<u8>>> {
        let mut assembled: Option<Vec<u8>> = None;

        loop {
            let fragment = match self.read_fragment()? {
                Some(f) => f,
                None if assembled.is_some() => {
                    return Err(Error::corrupt("log ends inside a fragmented entry"));
                }
                None => return Ok(None),
            };

            match (fragment.kind, assembled.as_mut()) {
                (FragmentKind::Full, None) => return Ok(Some(fragment.data)),
                (FragmentKind::First, None) => assembled = Some(fragment.data),
                (FragmentKind::Middle, Some(buf)) => buf.extend_from_slice(&fragment.data),
                (FragmentKind::Last, Some(buf)) => {
                    buf.extend_from_slice(&fragment.data);
                    return Ok(assembled);
                }
                (kind, _) => {
                    return Err(Error::corrupt(format!(
                        "unexpected {:?} fragment at offset {}",
                        kind, self.position
                    )));
                }
            }
        }
    }

    fn read_fragment(&mut self) -> Result<Option<Fragment>> {
        let mut header = [0u8; HEADER_SIZE];
        let read = read_full(&mut self.reader, &mut header)?;
        if read == 0 {
            return Ok(None);
        }
        if read < HEADER_SIZE {
            return Err(Error::corrupt("truncated fragment header"));
        }

        let length = Fragment::data_len(&header);
        let mut buffer = vec![0u8; HEADER_SIZE + length];
        buffer[..HEADER_SIZE].copy_from_slice(&header);
        if read_full(&mut self.reader, &mut buffer[HEADER_SIZE..])? < length {
            return Err(Error::corrupt("truncated fragment body"));
        }

        self.position += buffer.len() as u64;
        Fragment::decode(&buffer).map(Some)
    }

    /// Current read offset.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Reads entries until the end of the log or the first damaged one.
    pub fn recover_all(&mut self) -> Result<Vec<Vec<u8>>> {
        let mut entries = Vec::new();

        loop {
            match self.read_next() {
                Ok(Some(data)) => entries.push(data),
                Ok(None) => break,
                Err(Error::Corrupt(msg)) => {
                    log::warn!("log damaged at offset {}: {}", self.position, msg);
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        Ok(entries)
    }
}

// Like read_exact, but reports how many bytes were available at end of file.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(Error::Io(e)),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wal::writer::LogWriter;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_read_back_entries() {
        let temp_file = NamedTempFile::new().unwrap();
        let entries = vec![b"first".to_vec(), b"second".to_vec(), vec![0x5A; 100_000]];
        {
            let mut writer = LogWriter::new(temp_file.path()).unwrap();
            for e in &entries {
                writer.append(e).unwrap();
            }
            writer.sync().unwrap();
        }

        let mut reader = LogReader::new(temp_file.path()).unwrap();
        for expected in &entries {
            assert_eq!(reader.read_next().unwrap().as_ref(), Some(expected));
        }
        assert_eq!(reader.read_next().unwrap(), None);
        assert!(reader.position() > 100_000);
    }

    #[test]
    fn test_empty_file() {
        let temp_file = NamedTempFile::new().unwrap();
        let mut reader = LogReader::new(temp_file.path()).unwrap();
        assert_eq!(reader.read_next().unwrap(), None);
    }

    #[test]
    fn test_recover_stops_at_torn_tail() {
        let temp_file = NamedTempFile::new().unwrap();
        {
            let mut writer = LogWriter::new(temp_file.path()).unwrap();
            writer.append(b"complete").unwrap();
            writer.sync().unwrap();
        }
        {
            // Half of a fragment header.
            let mut file =
                std::fs::OpenOptions::new().append(true).open(temp_file.path()).unwrap();
            file.write_all(&[1, 2, 3]).unwrap();
        }

        let mut reader = LogReader::new(temp_file.path()).unwrap();
        assert_eq!(reader.recover_all().unwrap(), vec![b"complete".to_vec()]);
    }

    #[test]
    fn test_recover_stops_at_garbage() {
        let temp_file = NamedTempFile::new().unwrap();
        {
            let mut writer = LogWriter::new(temp_file.path()).unwrap();
            writer.append(b"one").unwrap();
            writer.append(b"two").unwrap();
            writer.sync().unwrap();
        }
        {
            let mut file =
                std::fs::OpenOptions::new().append(true).open(temp_file.path()).unwrap();
            file.write_all(b"CORRUPTED_DATA_12345").unwrap();
        }

        let mut reader = LogReader::new(temp_file.path()).unwrap();
        let recovered = reader.recover_all().unwrap();
        assert_eq!(recovered, vec![b"one".to_vec(), b"two".to_vec()]);
    }
}
