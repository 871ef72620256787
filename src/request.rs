use std::str::FromStr;

use camino::Utf8PathBuf;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::domain::{MatrixType, MatrixUnit};
use crate::error::LocusError;
use crate::key;

pub const CACHE_DIRECTIVE: &str = "cache-directive";

pub const SOURCE_FIELDS: [&str; 4] = ["path", "resolution", "matrix_type", "matrix_unit"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestType {
    ContactMatrix,
}

impl RequestType {
    pub fn of(envelope: &Value) -> Result<Self, LocusError> {
        match envelope.get("type") {
            Some(Value::String(kind)) if !kind.is_empty() => kind.parse(),
            Some(value) if is_truthy(value) => {
                Err(LocusError::UnknownRequestType(value.to_string()))
            }
            _ => Err(LocusError::MissingField("type".to_string())),
        }
    }
}

impl FromStr for RequestType {
    type Err = LocusError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "contact-matrix" | "hictk" => Ok(RequestType::ContactMatrix),
            _ => Err(LocusError::UnknownRequestType(value.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Outcome {
    Success(String),
    Failure(Map<String, Value>),
}

impl Outcome {
    pub fn failure(original: &Value, error: &LocusError) -> Self {
        let mut record = match original {
            Value::Object(map) => map.clone(),
            other => {
                let mut map = Map::new();
                map.insert("request".to_string(), other.clone());
                map
            }
        };
        record.insert("error".to_string(), Value::from(error.to_string()));
        Outcome::Failure(record)
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            Outcome::Success(_) => None,
            Outcome::Failure(record) => record.get("error").and_then(Value::as_str),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }
}

#[derive(Debug, Clone)]
pub struct BatchRequest {
    pub file: Map<String, Value>,
    pub cache: Map<String, Value>,
    pub regions: Vec<Value>,
}

impl BatchRequest {
    pub fn from_value(request: &Value) -> Result<Self, LocusError> {
        let request = request.as_object().ok_or_else(|| LocusError::InvalidField {
            field: "request".to_string(),
            expected: "a JSON object",
        })?;
        let file = required(request, "file")?;
        let cache = required(request, "cache")?;
        let regions = required(request, "regions")?;

        Ok(Self {
            file: expect_object("file", file)?,
            cache: expect_object("cache", cache)?,
            regions: regions
                .as_array()
                .cloned()
                .ok_or_else(|| LocusError::InvalidField {
                    field: "regions".to_string(),
                    expected: "a list of region objects",
                })?,
        })
    }

    pub fn existing_path(&self) -> Result<Utf8PathBuf, LocusError> {
        let path = match self.file.get("path") {
            Some(Value::String(path)) if !path.is_empty() => Utf8PathBuf::from(path),
            _ => return Err(LocusError::FileNotFound("no file['path'] given".to_string())),
        };
        if !path.as_std_path().exists() {
            return Err(LocusError::FileNotFound(path.to_string()));
        }
        Ok(path)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SourceOptions {
    pub path: Utf8PathBuf,
    pub resolution: Option<u64>,
    pub matrix_type: MatrixType,
    pub matrix_unit: MatrixUnit,
}

impl SourceOptions {
    pub fn from_file(file: &Map<String, Value>) -> Result<Self, LocusError> {
        let fields = key::pick(file, &SOURCE_FIELDS);
        let path = fields
            .get("path")
            .and_then(Value::as_str)
            .map(Utf8PathBuf::from)
            .ok_or_else(|| LocusError::SourceOpen("path must be a string".to_string()))?;
        let resolution = match fields.get("resolution") {
            None | Some(Value::Null) => None,
            Some(value) => Some(value.as_u64().filter(|res| *res > 0).ok_or_else(|| {
                LocusError::SourceOpen(format!("invalid resolution: {value}"))
            })?),
        };
        let matrix_type = match fields.get("matrix_type") {
            None | Some(Value::Null) => MatrixType::default(),
            Some(value) => parse_name(value, "matrix_type")?,
        };
        let matrix_unit = match fields.get("matrix_unit") {
            None | Some(Value::Null) => MatrixUnit::default(),
            Some(value) => parse_name(value, "matrix_unit")?,
        };
        Ok(Self {
            path,
            resolution,
            matrix_type,
            matrix_unit,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheDirective {
    pub key: Option<String>,
    pub reuse: bool,
}

impl Default for CacheDirective {
    fn default() -> Self {
        Self {
            key: None,
            reuse: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RegionDescriptor {
    pub params: Map<String, Value>,
    pub directive: CacheDirective,
}

impl RegionDescriptor {
    pub fn from_value(region: &Value) -> Result<Self, LocusError> {
        let region = region
            .as_object()
            .ok_or_else(|| LocusError::RegionFetch("region must be a JSON object".to_string()))?;
        let directive = match region.get(CACHE_DIRECTIVE) {
            None | Some(Value::Null) => CacheDirective::default(),
            Some(Value::Object(directive)) => parse_directive(directive)?,
            Some(_) => {
                return Err(LocusError::InvalidDirective(format!(
                    "'{CACHE_DIRECTIVE}' must be an object"
                )));
            }
        };
        let params = region
            .iter()
            .filter(|(name, _)| name.as_str() != CACHE_DIRECTIVE)
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();
        Ok(Self { params, directive })
    }

    pub fn cache_key(&self, file: &Map<String, Value>) -> Result<String, LocusError> {
        match &self.directive.key {
            Some(key) => Ok(key.clone()),
            None => key::serialize(&key::merge(file, &self.params)),
        }
    }
}

/// JSON truthiness: null, false, zero, and empty strings, lists and objects
/// count as absent.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().map(|n| n != 0.0).unwrap_or(true),
        Value::String(text) => !text.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

fn required<'a>(request: &'a Map<String, Value>, field: &str) -> Result<&'a Value, LocusError> {
    request
        .get(field)
        .filter(|value| is_truthy(value))
        .ok_or_else(|| LocusError::MissingField(field.to_string()))
}

fn expect_object(field: &str, value: &Value) -> Result<Map<String, Value>, LocusError> {
    value
        .as_object()
        .cloned()
        .ok_or_else(|| LocusError::InvalidField {
            field: field.to_string(),
            expected: "a JSON object",
        })
}

fn parse_directive(directive: &Map<String, Value>) -> Result<CacheDirective, LocusError> {
    let key = match directive.get("key") {
        None | Some(Value::Null) => None,
        Some(Value::String(key)) => Some(key.clone()),
        Some(_) => {
            return Err(LocusError::InvalidDirective("'key' must be a string".to_string()));
        }
    };
    let reuse = match directive.get("reuse") {
        None | Some(Value::Null) => true,
        Some(Value::Bool(reuse)) => *reuse,
        Some(_) => {
            return Err(LocusError::InvalidDirective("'reuse' must be a boolean".to_string()));
        }
    };
    Ok(CacheDirective { key, reuse })
}

fn parse_name<T>(value: &Value, field: &str) -> Result<T, LocusError>
where
    T: FromStr<Err = LocusError>,
{
    value
        .as_str()
        .ok_or_else(|| LocusError::SourceOpen(format!("{field} must be a string")))?
        .parse()
}
