//! Flat-file key pools.
//!
//! One text file per period (`key1d.txt`, ...), one key per line, plus the
//! append-only `key_solved.txt` log of issued keys. A key present in a pool has
//! never been issued; `retire` removes it from every pool and logs it.

mod locks;

pub use locks::FileLocks;

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{FixedOffset, Offset, Utc};
use serde::Serialize;

use crate::error::{AppError, Result};
use crate::models::Period;

use locks::{ReservedKeys, lock};

pub const SOLVED_FILE: &str = "key_solved.txt";

/// One parsed line of the solved log: `key | timestamp | email`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SolvedEntry {
    pub key: String,
    pub issued_at: Option<String>,
    pub email: Option<String>,
}

impl SolvedEntry {
    fn parse(line: &str) -> Option<Self> {
        let mut parts = line.split('|').map(str::trim);
        let key = parts.next().filter(|k| !k.is_empty())?.to_string();
        let issued_at = parts.next().filter(|s| !s.is_empty()).map(String::from);
        let email = parts.next().filter(|s| !s.is_empty()).map(String::from);
        Some(Self {
            key,
            issued_at,
            email,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PoolKeys {
    pub period: Period,
    pub keys: Vec<String>,
}

pub struct KeyPool {
    dir: PathBuf,
    offset: FixedOffset,
    locks: FileLocks,
    reserved: ReservedKeys,
}

/// A key held for one fulfillment. Other `reserve` calls skip it until this is
/// dropped; the key stays in its pool until `KeyPool::retire`.
pub struct KeyReservation {
    key: String,
    period: Period,
    reserved: ReservedKeys,
}

impl KeyReservation {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for KeyReservation {
    fn drop(&mut self) {
        self.reserved.release(&self.key);
    }
}

impl std::fmt::Debug for KeyReservation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyReservation")
            .field("key", &self.key)
            .field("period", &self.period)
            .finish()
    }
}

fn read_lines(path: &Path) -> io::Result<Vec<String>> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(content
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(e),
    }
}

fn write_lines(path: &Path, lines: &[String]) -> io::Result<()> {
    let mut content = lines.join("\n");
    if !lines.is_empty() {
        content.push('\n');
    }
    fs::write(path, content)
}

impl KeyPool {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        Self::with_offset(dir, Utc.fix())
    }

    /// Open a pool directory whose solved-log timestamps are written in `offset`.
    pub fn with_offset(dir: impl Into<PathBuf>, offset: FixedOffset) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            offset,
            locks: FileLocks::default(),
            reserved: ReservedKeys::default(),
        })
    }

    pub fn pool_path(&self, period: Period) -> PathBuf {
        self.dir.join(period.pool_file_name())
    }

    pub fn solved_path(&self) -> PathBuf {
        self.dir.join(SOLVED_FILE)
    }

    pub fn count(&self, period: Period) -> Result<usize> {
        Ok(self.list(period)?.len())
    }

    /// First unsold key for a period, without removing it. `None` when the pool
    /// is missing or empty.
    pub fn draw(&self, period: Period) -> Result<Option<String>> {
        Ok(self.list(period)?.into_iter().next())
    }

    /// First key of the pool not held by another in-flight fulfillment.
    pub fn reserve(&self, period: Period) -> Result<Option<KeyReservation>> {
        for key in self.list(period)? {
            if self.reserved.insert(&key) {
                return Ok(Some(KeyReservation {
                    key,
                    period,
                    reserved: self.reserved.clone(),
                }));
            }
        }
        Ok(None)
    }

    pub fn list(&self, period: Period) -> Result<Vec<String>> {
        let path = self.pool_path(period);
        let file_lock = self.locks.for_path(&path);
        let _guard = lock(&file_lock);
        Ok(read_lines(&path)?)
    }

    pub fn list_all(&self) -> Result<Vec<PoolKeys>> {
        Period::all()
            .map(|period| {
                Ok(PoolKeys {
                    period,
                    keys: self.list(period)?,
                })
            })
            .collect()
    }

    /// Append `key` to the solved log, then remove it from every pool it
    /// appears in. Returns false (after logging) on any file-system error. A
    /// failed log append leaves the pools untouched; a key found in no pool
    /// still counts as retired once the log line is written.
    pub fn retire(&self, key: &str, buyer_email: Option<&str>) -> bool {
        let key = key.trim();

        let timestamp = Utc::now()
            .with_timezone(&self.offset)
            .format("%Y-%m-%d %H:%M:%S");
        let line = match buyer_email {
            Some(email) => format!("{} | {} | {}", key, timestamp, email),
            None => format!("{} | {}", key, timestamp),
        };
        if let Err(e) = self.append_solved(&line) {
            tracing::error!(key = %key, error = %e, "Failed to append to solved log");
            return false;
        }

        let mut ok = true;
        for period in Period::all() {
            match self.remove_from_pool(period, key) {
                Ok(true) => tracing::info!(key = %key, period = %period, "Key removed from pool"),
                Ok(false) => {}
                Err(e) => {
                    tracing::error!(key = %key, period = %period, error = %e, "Failed to rewrite key pool");
                    ok = false;
                }
            }
        }
        ok
    }

    /// Append keys to a pool. Blank lines and keys already present in any pool
    /// or in the solved log are skipped. Returns how many were added.
    pub fn add_keys<S: AsRef<str>>(&self, period: Period, keys: &[S]) -> Result<usize> {
        let mut known: std::collections::HashSet<String> = std::collections::HashSet::new();
        for pool in self.list_all()? {
            known.extend(pool.keys);
        }
        for entry in self.solved_entries(usize::MAX)? {
            known.insert(entry.key);
        }

        let path = self.pool_path(period);
        let file_lock = self.locks.for_path(&path);
        let _guard = lock(&file_lock);

        let mut lines = read_lines(&path)?;
        let mut added = 0;
        for key in keys {
            let key = key.as_ref().trim();
            if key.is_empty() || !known.insert(key.to_string()) {
                continue;
            }
            lines.push(key.to_string());
            added += 1;
        }
        if added > 0 {
            write_lines(&path, &lines)?;
        }
        Ok(added)
    }

    /// Admin removal. Does not touch the solved log.
    pub fn remove_key(&self, period: Period, key: &str) -> Result<bool> {
        Ok(self.remove_from_pool(period, key.trim())?)
    }

    /// The last `limit` entries of the solved log, oldest first.
    pub fn solved_entries(&self, limit: usize) -> Result<Vec<SolvedEntry>> {
        let path = self.solved_path();
        let file_lock = self.locks.for_path(&path);
        let _guard = lock(&file_lock);
        let lines = read_lines(&path)?;
        let skip = lines.len().saturating_sub(limit);
        Ok(lines
            .iter()
            .skip(skip)
            .filter_map(|l| SolvedEntry::parse(l))
            .collect())
    }

    /// File names that make up the pool directory, in mirror order.
    pub fn file_names() -> Vec<String> {
        Period::all()
            .map(|p| p.pool_file_name())
            .chain(std::iter::once(SOLVED_FILE.to_string()))
            .collect()
    }

    /// Raw content of a pool or solved file (empty when missing).
    pub fn snapshot(&self, file_name: &str) -> Result<String> {
        let path = self.known_file(file_name)?;
        let file_lock = self.locks.for_path(&path);
        let _guard = lock(&file_lock);
        match fs::read_to_string(&path) {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Replace a pool or solved file wholesale.
    pub fn restore_file(&self, file_name: &str, content: &str) -> Result<()> {
        let path = self.known_file(file_name)?;
        let file_lock = self.locks.for_path(&path);
        let _guard = lock(&file_lock);
        fs::write(&path, content)?;
        Ok(())
    }

    fn known_file(&self, file_name: &str) -> Result<PathBuf> {
        if Self::file_names().iter().any(|n| n == file_name) {
            Ok(self.dir.join(file_name))
        } else {
            Err(AppError::BadRequest(format!("Unknown key file '{}'", file_name)))
        }
    }

    fn remove_from_pool(&self, period: Period, key: &str) -> io::Result<bool> {
        let path = self.pool_path(period);
        let file_lock = self.locks.for_path(&path);
        let _guard = lock(&file_lock);

        let lines = read_lines(&path)?;
        let before = lines.len();
        let remaining: Vec<String> = lines.into_iter().filter(|l| l != key).collect();
        if remaining.len() == before {
            return Ok(false);
        }
        write_lines(&path, &remaining)?;
        Ok(true)
    }

    fn append_solved(&self, line: &str) -> io::Result<()> {
        let path = self.solved_path();
        let file_lock = self.locks.for_path(&path);
        let _guard = lock(&file_lock);

        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        writeln!(file, "{}", line)?;
        file.flush()
    }
}
