use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::domain::{Locus, ResizeAnchor};
use crate::error::LocusError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocusLayout {
    pub chrom: String,
    pub start: String,
    pub end: String,
    pub locus_column: String,
}

impl Default for LocusLayout {
    fn default() -> Self {
        Self {
            chrom: "chrom".to_string(),
            start: "start".to_string(),
            end: "end".to_string(),
            locus_column: "_locus_".to_string(),
        }
    }
}

impl LocusLayout {
    pub fn fields(&self, suffix: &str) -> [String; 3] {
        [
            format!("{}{suffix}", self.chrom),
            format!("{}{suffix}", self.start),
            format!("{}{suffix}", self.end),
        ]
    }

    pub fn has_any(&self, record: &Map<String, Value>, suffix: &str) -> bool {
        self.fields(suffix).iter().any(|name| record.contains_key(name))
    }

    pub fn locus(&self, record: &Map<String, Value>, suffix: &str) -> Result<Locus, LocusError> {
        let [chrom, start, end] = self.fields(suffix);
        Ok(Locus {
            chrom: string_field(record, &chrom)?,
            start: integer_field(record, &start)?,
            end: integer_field(record, &end)?,
        })
    }

    pub fn nest(&self, record: &mut Map<String, Value>, suffix: &str) -> Result<(), LocusError> {
        let locus = self.locus(record, suffix)?;
        record.insert(self.locus_column.clone(), self.to_value(&locus));
        Ok(())
    }

    pub fn unnest(&self, record: &mut Map<String, Value>, suffix: &str) -> Result<(), LocusError> {
        let nested = match record.remove(&self.locus_column) {
            Some(Value::Object(nested)) => nested,
            Some(_) => {
                return Err(LocusError::InvalidLocus(format!(
                    "column '{}' is not a locus",
                    self.locus_column
                )));
            }
            None => return Err(LocusError::MissingField(self.locus_column.clone())),
        };
        let locus = self.locus(&nested, "")?;
        let [chrom, start, end] = self.fields(suffix);
        record.insert(chrom, Value::from(locus.chrom));
        record.insert(start, Value::from(locus.start));
        record.insert(end, Value::from(locus.end));
        Ok(())
    }

    pub fn resize_record(
        &self,
        record: &mut Map<String, Value>,
        size: i64,
        anchor: ResizeAnchor,
        suffix: &str,
    ) -> Result<(), LocusError> {
        let locus = self.locus(record, suffix)?.resize(size, anchor)?;
        record.insert(self.locus_column.clone(), self.to_value(&locus));
        self.unnest(record, suffix)
    }

    fn to_value(&self, locus: &Locus) -> Value {
        let mut nested = Map::new();
        nested.insert(self.chrom.clone(), Value::from(locus.chrom.clone()));
        nested.insert(self.start.clone(), Value::from(locus.start));
        nested.insert(self.end.clone(), Value::from(locus.end));
        Value::Object(nested)
    }
}

fn string_field(record: &Map<String, Value>, name: &str) -> Result<String, LocusError> {
    match record.get(name) {
        Some(Value::String(value)) => Ok(value.clone()),
        Some(_) => Err(LocusError::InvalidField {
            field: name.to_string(),
            expected: "a string",
        }),
        None => Err(LocusError::MissingField(name.to_string())),
    }
}

fn integer_field(record: &Map<String, Value>, name: &str) -> Result<i64, LocusError> {
    match record.get(name) {
        Some(value) => value.as_i64().ok_or_else(|| LocusError::InvalidField {
            field: name.to_string(),
            expected: "an integer",
        }),
        None => Err(LocusError::MissingField(name.to_string())),
    }
}
