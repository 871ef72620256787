use std::io::{self, Write};

use serde::Serialize;

use crate::cache::CacheEntry;
use crate::request::Outcome;

#[derive(Debug, Clone, Serialize)]
pub struct CacheListing {
    pub key: String,
    pub stored_at: String,
    pub shape: (usize, usize),
}

impl From<&CacheEntry> for CacheListing {
    fn from(entry: &CacheEntry) -> Self {
        Self {
            key: entry.key.clone(),
            stored_at: entry.stored_at.to_rfc3339(),
            shape: entry.shape,
        }
    }
}

pub struct JsonLines;

impl JsonLines {
    pub fn print_outcome(outcome: &Outcome) -> io::Result<()> {
        Self::print_json(outcome)
    }

    pub fn print_listing(entry: &CacheEntry) -> io::Result<()> {
        Self::print_json(&CacheListing::from(entry))
    }

    pub fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout().lock();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}
