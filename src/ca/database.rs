//! The on-disk CA database: `serial`, `crlnumber`, `index.txt` and
//! `index.txt.attr`, in the layout the OpenSSL `ca` command reads and writes.
//!
//! Numbers are stored as upper-case hexadecimal text. `index.txt` holds one
//! tab separated line per issued certificate:
//!
//! ```text
//! status  expiry  revocation[,reason]  serial  file  subject
//! ```
//!
//! Every rewrite goes through `<file>.new`, keeping the previous version as
//! `<file>.old`.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use time::format_description::FormatItem;
use time::macros::format_description;
use time::{Date, Month, OffsetDateTime, PrimitiveDateTime, Time};
use tracing::debug;

use crate::cert::Certificate;
use crate::crl::{RevocationReason, RevokedEntry};
use crate::error::{CaError, Result};

/// First serial number and first CRL number of a new CA.
pub const INITIAL_NUMBER: u64 = 0x1000;

const SERIAL: &str = "serial";
const CRL_NUMBER: &str = "crlnumber";
const INDEX: &str = "index.txt";
const INDEX_ATTR_SUFFIX: &str = ".attr";
const INDEX_ATTR_CONTENT: &str = "unique_subject = no";
const UNKNOWN_FILE: &str = "unknown";

/// Formats a serial the way the CA database stores it: upper-case hex with an
/// even number of digits.
pub fn format_serial(serial: u64) -> String {
    let hex = format!("{serial:X}");
    if hex.len() % 2 == 1 {
        format!("0{hex}")
    } else {
        hex
    }
}

pub fn parse_serial(text: &str) -> Result<u64> {
    let text = text.trim();
    u64::from_str_radix(text, 16)
        .map_err(|_| CaError::DecodingError(format!("invalid serial number `{text}`")))
}

const SHORT_YEAR_TIME: &[FormatItem<'static>] =
    format_description!("[year repr:last_two][month][day][hour][minute][second]Z");
const FULL_YEAR_TIME: &[FormatItem<'static>] =
    format_description!("[year][month][day][hour][minute][second]Z");

/// `YYMMDDHHMMSSZ` or `YYYYMMDDHHMMSSZ`.
pub fn compact_time(at: OffsetDateTime, full_year: bool) -> String {
    let format = if full_year { FULL_YEAR_TIME } else { SHORT_YEAR_TIME };
    // Every component of both descriptions is present on an OffsetDateTime.
    at.to_offset(time::UtcOffset::UTC)
        .format(format)
        .unwrap_or_default()
}

/// Database time: UTCTime form through 2049, GeneralizedTime form afterwards.
pub fn format_time(at: OffsetDateTime) -> String {
    compact_time(at, at.year() >= 2050)
}

pub fn parse_time(text: &str) -> Result<OffsetDateTime> {
    let invalid = || CaError::DecodingError(format!("invalid database time `{text}`"));
    let digits = text.strip_suffix('Z').ok_or_else(invalid)?;
    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    let number = |range: std::ops::Range<usize>| -> Result<u32> {
        digits
            .get(range)
            .and_then(|s| s.parse().ok())
            .ok_or_else(invalid)
    };
    let (year, rest) = match digits.len() {
        12 => {
            let yy = number(0..2)? as i32;
            (if yy >= 50 { 1900 + yy } else { 2000 + yy }, 2)
        }
        14 => (number(0..4)? as i32, 4),
        _ => return Err(invalid()),
    };
    let month = Month::try_from(number(rest..rest + 2)? as u8).map_err(|_| invalid())?;
    let date = Date::from_calendar_date(year, month, number(rest + 2..rest + 4)? as u8)
        .map_err(|_| invalid())?;
    let time = Time::from_hms(
        number(rest + 4..rest + 6)? as u8,
        number(rest + 6..rest + 8)? as u8,
        number(rest + 8..rest + 10)? as u8,
    )
    .map_err(|_| invalid())?;
    Ok(PrimitiveDateTime::new(date, time).assume_utc())
}

/// Status flag of a ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryStatus {
    Valid,
    Revoked,
    Expired,
}

impl EntryStatus {
    fn flag(self) -> char {
        match self {
            EntryStatus::Valid => 'V',
            EntryStatus::Revoked => 'R',
            EntryStatus::Expired => 'E',
        }
    }
}

/// One line of `index.txt`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub status: EntryStatus,
    pub expiry: OffsetDateTime,
    pub revocation_date: Option<OffsetDateTime>,
    pub revocation_reason: Option<RevocationReason>,
    pub serial: u64,
    pub file: Option<String>,
    /// Subject in slash form, kept verbatim.
    pub subject: String,
}

impl IndexEntry {
    pub fn valid(serial: u64, expiry: OffsetDateTime, subject: impl ToString) -> Self {
        Self {
            status: EntryStatus::Valid,
            expiry,
            revocation_date: None,
            revocation_reason: None,
            serial,
            file: None,
            subject: subject.to_string(),
        }
    }

    /// Flips the entry to revoked.
    pub fn revoke(&mut self, at: OffsetDateTime, reason: RevocationReason) {
        self.status = EntryStatus::Revoked;
        self.revocation_date = Some(at);
        self.revocation_reason = Some(reason);
    }

    pub fn parse(line: &str) -> Result<Self> {
        let fields: Vec<&str> = line.split('\t').collect();
        let [status, expiry, revocation, serial, file, subject] = fields[..] else {
            return Err(CaError::DecodingError(format!(
                "index line should have 6 fields: `{line}`"
            )));
        };
        let status = match status {
            "V" => EntryStatus::Valid,
            "R" => EntryStatus::Revoked,
            "E" => EntryStatus::Expired,
            other => {
                return Err(CaError::DecodingError(format!(
                    "unknown index status `{other}`"
                )));
            }
        };
        let (revocation_date, revocation_reason) = if revocation.is_empty() {
            (None, None)
        } else {
            let mut parts = revocation.split(',');
            let date = parts.next().map(parse_time).transpose()?;
            let reason: Option<RevocationReason> = parts.next().map(str::parse).transpose()?;
            (date, reason)
        };
        Ok(Self {
            status,
            expiry: parse_time(expiry)?,
            revocation_date,
            revocation_reason,
            serial: parse_serial(serial)?,
            file: (file != UNKNOWN_FILE).then(|| file.to_string()),
            subject: subject.to_string(),
        })
    }
}

impl fmt::Display for IndexEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let revocation = match (self.revocation_date, self.revocation_reason) {
            (Some(date), Some(reason)) => format!("{},{reason}", format_time(date)),
            (Some(date), None) => format_time(date),
            _ => String::new(),
        };
        write!(
            f,
            "{}\t{}\t{}\t{}\t{}\t{}",
            self.status.flag(),
            format_time(self.expiry),
            revocation,
            format_serial(self.serial),
            self.file.as_deref().unwrap_or(UNKNOWN_FILE),
            self.subject
        )
    }
}

/// The issued-certificate ledger. Entries are only ever appended or updated
/// in place.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Index {
    entries: Vec<IndexEntry>,
}

impl Index {
    pub fn parse(text: &str) -> Result<Self> {
        let entries = text
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(IndexEntry::parse)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn find(&self, serial: u64) -> Option<&IndexEntry> {
        self.entries.iter().find(|entry| entry.serial == serial)
    }

    pub fn find_mut(&mut self, serial: u64) -> Option<&mut IndexEntry> {
        self.entries.iter_mut().find(|entry| entry.serial == serial)
    }

    pub fn push(&mut self, entry: IndexEntry) {
        self.entries.push(entry);
    }

    /// Entries to list in a CRL. `removeFromCRL` entries are left out.
    pub fn revoked_entries(&self) -> Vec<RevokedEntry> {
        self.entries
            .iter()
            .filter(|entry| entry.status == EntryStatus::Revoked)
            .filter(|entry| entry.revocation_reason != Some(RevocationReason::RemoveFromCrl))
            .filter_map(|entry| {
                entry.revocation_date.map(|date| RevokedEntry {
                    serial: entry.serial,
                    revocation_date: date,
                    reason: entry.revocation_reason,
                })
            })
            .collect()
    }
}

impl fmt::Display for Index {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for entry in &self.entries {
            writeln!(f, "{entry}")?;
        }
        Ok(())
    }
}

/// Files of the CA database.
#[derive(Debug, Clone)]
pub struct CaDatabase {
    index: PathBuf,
    serial: PathBuf,
    crl_number: PathBuf,
}

impl CaDatabase {
    /// Database laid out directly under a CA root directory.
    pub fn new(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self::from_paths(root.join(INDEX), root.join(SERIAL), root.join(CRL_NUMBER))
    }

    /// Database whose files are named by a CA configuration.
    pub fn from_paths(index: PathBuf, serial: PathBuf, crl_number: PathBuf) -> Self {
        Self {
            index,
            serial,
            crl_number,
        }
    }

    pub fn serial_path(&self) -> PathBuf {
        self.serial.clone()
    }

    pub fn crl_number_path(&self) -> PathBuf {
        self.crl_number.clone()
    }

    pub fn index_path(&self) -> PathBuf {
        self.index.clone()
    }

    pub fn index_attr_path(&self) -> PathBuf {
        let mut name = self.index.as_os_str().to_owned();
        name.push(INDEX_ATTR_SUFFIX);
        PathBuf::from(name)
    }

    /// Creates the database files that do not exist yet. Existing files are
    /// never overwritten.
    pub fn initialize(&self) -> Result<()> {
        let initial = format_serial(INITIAL_NUMBER);
        for (path, content) in [
            (self.serial_path(), initial.as_str()),
            (self.crl_number_path(), initial.as_str()),
            (self.index_path(), ""),
            (self.index_attr_path(), INDEX_ATTR_CONTENT),
        ] {
            if !path.exists() {
                fs::write(&path, content).map_err(|e| CaError::io(&path, e))?;
                debug!(path = %path.display(), "created CA database file");
            }
        }
        Ok(())
    }

    /// Serial number the next issued certificate receives.
    pub fn next_serial(&self) -> Result<u64> {
        read_number(&self.serial_path())
    }

    /// CRL number the next generated CRL receives.
    pub fn next_crl_number(&self) -> Result<u64> {
        read_number(&self.crl_number_path())
    }

    /// Returns the next serial and advances the counter.
    pub fn allocate_serial(&self) -> Result<u64> {
        allocate(&self.serial_path())
    }

    /// Returns the next CRL number and advances the counter.
    pub fn allocate_crl_number(&self) -> Result<u64> {
        allocate(&self.crl_number_path())
    }

    pub fn load_index(&self) -> Result<Index> {
        let path = self.index_path();
        let text = fs::read_to_string(&path).map_err(|e| CaError::io(&path, e))?;
        Index::parse(&text)
    }

    pub fn save_index(&self, index: &Index) -> Result<()> {
        replace(&self.index_path(), &index.to_string())
    }

    /// Appends a `Valid` entry. The serial must not be in the ledger yet.
    pub fn append(&self, entry: IndexEntry) -> Result<()> {
        let mut index = self.load_index()?;
        if index.find(entry.serial).is_some() {
            return Err(CaError::PreconditionError(format!(
                "serial {} is already in the CA database",
                format_serial(entry.serial)
            )));
        }
        debug!(serial = %format_serial(entry.serial), subject = %entry.subject, "appending index entry");
        index.push(entry);
        self.save_index(&index)
    }

    /// Marks `certificate` revoked. A certificate the ledger does not know is
    /// added as a revoked entry. Revoking twice is an error.
    pub fn revoke(
        &self,
        certificate: &Certificate,
        reason: RevocationReason,
        at: OffsetDateTime,
    ) -> Result<IndexEntry> {
        let mut index = self.load_index()?;
        let serial = certificate.serial()?;
        let entry = match index.find_mut(serial) {
            Some(entry) if entry.status == EntryStatus::Revoked => {
                return Err(CaError::PreconditionError(format!(
                    "certificate {} is already revoked",
                    format_serial(serial)
                )));
            }
            Some(entry) => {
                entry.revoke(at, reason);
                entry.clone()
            }
            None => {
                debug!(serial = %format_serial(serial), "adding unknown certificate to the CA database");
                let mut entry =
                    IndexEntry::valid(serial, certificate.not_after(), certificate.subject());
                entry.revoke(at, reason);
                index.push(entry.clone());
                entry
            }
        };
        self.save_index(&index)?;
        Ok(entry)
    }
}

fn read_number(path: &Path) -> Result<u64> {
    let text = fs::read_to_string(path).map_err(|e| CaError::io(path, e))?;
    parse_serial(&text)
}

fn allocate(path: &Path) -> Result<u64> {
    let current = read_number(path)?;
    let next = current
        .checked_add(1)
        .ok_or_else(|| CaError::InvalidArgument(format!("{} overflowed", path.display())))?;
    replace(path, &format!("{}\n", format_serial(next)))?;
    Ok(current)
}

/// Writes `<path>.new`, moves the current file to `<path>.old` and renames the
/// new file into place.
fn replace(path: &Path, content: &str) -> Result<()> {
    let sibling = |suffix: &str| {
        let mut name = path.as_os_str().to_owned();
        name.push(suffix);
        PathBuf::from(name)
    };
    let new = sibling(".new");
    let old = sibling(".old");
    fs::write(&new, content).map_err(|e| CaError::io(&new, e))?;
    if path.exists() {
        fs::rename(path, &old).map_err(|e| CaError::io(path, e))?;
    }
    fs::rename(&new, path).map_err(|e| CaError::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn test_serial_formatting() {
        assert_eq!(format_serial(0x1000), "1000");
        assert_eq!(format_serial(0xABC), "0ABC");
        assert_eq!(parse_serial("1000\n").unwrap(), 0x1000);
        assert_eq!(parse_serial("0abc").unwrap(), 0xABC);
        assert!(parse_serial("xyz").is_err());
    }

    #[test]
    fn test_time_formats() {
        let at = datetime!(2031-02-03 04:05:06 UTC);
        assert_eq!(format_time(at), "310203040506Z");
        assert_eq!(compact_time(at, true), "20310203040506Z");
        assert_eq!(parse_time("310203040506Z").unwrap(), at);
        assert_eq!(parse_time("20310203040506Z").unwrap(), at);

        let late = datetime!(2060-01-01 00:00:00 UTC);
        assert_eq!(format_time(late), "20600101000000Z");
        assert_eq!(parse_time(&format_time(late)).unwrap(), late);
        assert_eq!(
            parse_time("991231235959Z").unwrap(),
            datetime!(1999-12-31 23:59:59 UTC)
        );
        assert!(parse_time("2031").is_err());

        let offset = datetime!(2008-01-01 01:30:00 +02:00);
        assert_eq!(compact_time(offset, false), "071231233000Z");
        assert_eq!(compact_time(offset, true), "20071231233000Z");
    }

    #[test]
    fn test_index_line_layout() {
        let mut entry = IndexEntry::valid(
            0x1000,
            datetime!(2031-01-01 00:00:00 UTC),
            "/C=FR/CN=host1",
        );
        assert_eq!(
            entry.to_string(),
            "V\t310101000000Z\t\t1000\tunknown\t/C=FR/CN=host1"
        );

        entry.revoke(
            datetime!(2030-06-01 12:00:00 UTC),
            RevocationReason::KeyCompromise,
        );
        entry.file = Some("/tmp/cert.pem".to_string());
        let line = entry.to_string();
        assert_eq!(
            line,
            "R\t310101000000Z\t300601120000Z,keyCompromise\t1000\t/tmp/cert.pem\t/C=FR/CN=host1"
        );
        assert_eq!(IndexEntry::parse(&line).unwrap(), entry);
    }

    #[test]
    fn test_index_parses_openssl_lines() {
        let text = "V\t350101000000Z\t\t1000\tunknown\t/CN=a\nR\t350101000000Z\t250101000000Z\t1001\tunknown\t/CN=b\n";
        let index = Index::parse(text).unwrap();
        assert_eq!(index.len(), 2);
        assert_eq!(index.find(0x1001).unwrap().status, EntryStatus::Revoked);
        assert_eq!(index.find(0x1001).unwrap().revocation_reason, None);
        assert_eq!(index.to_string(), text);
        assert!(Index::parse("V\tbad").is_err());
    }

    #[test]
    fn test_revoked_entries_skip_remove_from_crl() {
        let at = datetime!(2030-01-01 00:00:00 UTC);
        let mut index = Index::default();
        for (serial, reason) in [
            (1, Some(RevocationReason::Superseded)),
            (2, Some(RevocationReason::RemoveFromCrl)),
            (3, None),
        ] {
            let mut entry = IndexEntry::valid(serial, at, "/CN=x");
            if let Some(reason) = reason {
                entry.revoke(at, reason);
            }
            index.push(entry);
        }
        let revoked = index.revoked_entries();
        assert_eq!(revoked.len(), 1);
        assert_eq!(revoked[0].serial, 1);
    }

    #[test]
    fn test_database_counters_and_files() {
        let dir = tempfile::tempdir().unwrap();
        let db = CaDatabase::new(dir.path());
        db.initialize().unwrap();
        assert_eq!(fs::read_to_string(db.serial_path()).unwrap(), "1000");
        assert_eq!(
            fs::read_to_string(db.index_attr_path()).unwrap(),
            "unique_subject = no"
        );

        assert_eq!(db.allocate_serial().unwrap(), 0x1000);
        assert_eq!(db.next_serial().unwrap(), 0x1001);
        assert_eq!(fs::read_to_string(db.serial_path()).unwrap(), "1001\n");
        assert_eq!(
            fs::read_to_string(dir.path().join("serial.old")).unwrap(),
            "1000"
        );

        // initialize never overwrites
        db.initialize().unwrap();
        assert_eq!(db.next_serial().unwrap(), 0x1001);
        assert_eq!(db.next_crl_number().unwrap(), 0x1000);
    }

    #[test]
    fn test_append_rejects_duplicate_serial() {
        let dir = tempfile::tempdir().unwrap();
        let db = CaDatabase::new(dir.path());
        db.initialize().unwrap();
        let entry = IndexEntry::valid(0x1000, OffsetDateTime::now_utc(), "/CN=x");
        db.append(entry.clone()).unwrap();
        assert!(matches!(
            db.append(entry),
            Err(CaError::PreconditionError(_))
        ));
        assert_eq!(db.load_index().unwrap().len(), 1);
    }
}
