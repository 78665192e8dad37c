//! Modification log
//!
//! One append-only text file per node, one line per applied write:
//! `<slot> <COMMAND> <key> [<value>]`. The log is the node's only durable
//! state: replaying it and folding SET/DEL by key rebuilds the node's key
//! space, which is how slots are migrated away from a dead pair.
//!
//! Replay groups keys by the slot they hash to *now*, not by the slot
//! recorded at write time, because ownership may have moved since.

use crate::common::{encode_address, slot_index, validate_token, Error, LogSyncPolicy, Result};
use crate::coordinator::node_client::Command;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Keys and values of one node, grouped by slot
pub type SlotData = HashMap<u16, HashMap<String, String>>;

/// A single log record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub slot: u16,
    pub command: Command,
    pub key: String,
    pub value: Option<String>,
}

impl LogEntry {
    pub fn new(command: Command, key: &str, value: Option<&str>) -> Self {
        Self {
            slot: slot_index(key.as_bytes()),
            command,
            key: key.to_string(),
            value: value.map(str::to_string),
        }
    }

    /// Render as one log line, without the trailing newline
    pub fn encode(&self) -> String {
        match &self.value {
            Some(v) => format!("{} {} {} {}", self.slot, self.command, self.key, v),
            None => format!("{} {} {}", self.slot, self.command, self.key),
        }
    }

    /// Parse one log line
    pub fn parse(line: &str) -> std::result::Result<Self, String> {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 3 || fields.len() > 4 {
            return Err(format!("expected 3 or 4 fields, found {}", fields.len()));
        }

        let slot: u16 = fields[0]
            .parse()
            .map_err(|_| format!("unparsable slot index {:?}", fields[0]))?;
        if slot as usize >= crate::common::SLOT_COUNT {
            return Err(format!("slot index {} out of range", slot));
        }

        let command: Command = fields[1].parse().map_err(|e: Error| e.to_string())?;
        let value = match (command, fields.get(3)) {
            (Command::Set, Some(v)) => Some(v.to_string()),
            (Command::Set, None) => return Err("SET record without value".into()),
            // A trailing value on DEL is tolerated and ignored
            (Command::Del, _) => None,
            (Command::Get, _) => return Err("GET is not a modification".into()),
        };

        Ok(Self {
            slot,
            command,
            key: fields[2].to_string(),
            value,
        })
    }
}

/// Per-node modification logs under one directory
pub struct ModificationLog {
    dir: PathBuf,
    sync_policy: LogSyncPolicy,
    writers: Mutex<HashMap<String, BufWriter<File>>>,
}

impl ModificationLog {
    /// Open the log directory, creating it if needed
    pub fn open(dir: impl AsRef<Path>, sync_policy: LogSyncPolicy) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        tracing::info!(dir = %dir.display(), ?sync_policy, "Modification log directory ready");

        Ok(Self {
            dir,
            sync_policy,
            writers: Mutex::new(HashMap::new()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File backing the log of `address`
    pub fn path_for(&self, address: &str) -> PathBuf {
        self.dir.join(encode_address(address))
    }

    /// Open (or create) the log of a freshly registered node.
    /// Existing records are kept.
    pub fn init(&self, address: &str) -> Result<()> {
        let mut writers = self.writers.lock();
        if writers.contains_key(address) {
            return Ok(());
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path_for(address))?;
        writers.insert(address.to_string(), BufWriter::new(file));
        tracing::debug!(node = %address, "Modification log opened");
        Ok(())
    }

    /// Append one record to the log of `address`
    pub fn append(
        &self,
        address: &str,
        command: Command,
        key: &str,
        value: Option<&str>,
    ) -> Result<()> {
        validate_token(key)?;
        if let Some(v) = value {
            validate_token(v)?;
        }
        let entry = LogEntry::new(command, key, value);

        let mut writers = self.writers.lock();
        let writer = writers.get_mut(address).ok_or_else(|| {
            Error::Internal(format!("modification log of {} is not initialised", address))
        })?;

        writeln!(writer, "{}", entry.encode())?;
        match self.sync_policy {
            LogSyncPolicy::Always => {
                writer.flush()?;
                writer.get_ref().sync_all()?;
            }
            LogSyncPolicy::Flush => writer.flush()?,
            LogSyncPolicy::Never => {}
        }
        Ok(())
    }

    /// Every record of `address` in append order.
    /// A node that never logged anything has an empty log.
    pub fn entries(&self, address: &str) -> Result<Vec<LogEntry>> {
        if let Some(writer) = self.writers.lock().get_mut(address) {
            writer.flush()?;
        }

        let file = match File::open(self.path_for(address)) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut entries = Vec::new();
        for (idx, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let entry = LogEntry::parse(&line).map_err(|reason| Error::LogCorrupted {
                node: address.to_string(),
                line: idx + 1,
                reason,
            })?;
            entries.push(entry);
        }
        Ok(entries)
    }

    /// Fold the log of `address` into its current key space.
    /// Any malformed record fails the whole replay.
    pub fn replay(&self, address: &str) -> Result<SlotData> {
        let mut data = SlotData::new();
        for entry in self.entries(address)? {
            let slot = slot_index(entry.key.as_bytes());
            match (entry.command, entry.value) {
                (Command::Set, Some(value)) => {
                    data.entry(slot).or_default().insert(entry.key, value);
                }
                (Command::Del, _) => {
                    if let Some(keys) = data.get_mut(&slot) {
                        keys.remove(&entry.key);
                    }
                }
                _ => {}
            }
        }
        data.retain(|_, keys| !keys.is_empty());

        tracing::debug!(
            node = %address,
            keys = data.values().map(|k| k.len()).sum::<usize>(),
            "Modification log replayed"
        );
        Ok(data)
    }

    /// Delete the log of `address` for good
    pub fn remove(&self, address: &str) -> Result<()> {
        self.writers.lock().remove(address);
        match std::fs::remove_file(self.path_for(address)) {
            Ok(()) => {
                tracing::info!(node = %address, "Modification log removed");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
