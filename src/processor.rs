use std::iter::FusedIterator;
use std::mem;

use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::cache::{CacheOpener, ResultCache};
use crate::error::LocusError;
use crate::request::{BatchRequest, Outcome, RegionDescriptor, RequestType, SourceOptions};
use crate::source::{MatrixSource, SourceOpener};

#[derive(Debug, Clone)]
pub struct Processor<O, C> {
    sources: O,
    caches: C,
}

impl<O: SourceOpener, C: CacheOpener> Processor<O, C> {
    pub fn new(sources: O, caches: C) -> Self {
        Self { sources, caches }
    }

    pub fn process(&self, request: Value) -> Outcomes<'_, O, C> {
        Outcomes {
            processor: self,
            state: State::Unopened(request),
        }
    }

    pub fn dispatch(&self, envelope: Value) -> Outcomes<'_, O, C> {
        match RequestType::of(&envelope) {
            Ok(RequestType::ContactMatrix) => self.process(envelope),
            Err(err) => Outcomes {
                processor: self,
                state: State::Rejected(failure(&envelope, &err)),
            },
        }
    }

    fn open(&self, request: &Value) -> Result<Batch<O::Source, C::Cache>, LocusError> {
        let batch = BatchRequest::from_value(request)?;
        let path = batch.existing_path()?;
        let options = SourceOptions::from_file(&batch.file)?;
        let source = self.sources.open(&options).map_err(|err| match err {
            LocusError::SourceOpen(_) => err,
            other => LocusError::SourceOpen(other.to_string()),
        })?;
        let cache = self.caches.open(&batch.cache).map_err(|err| match err {
            LocusError::CacheOpen(_) => err,
            other => LocusError::CacheOpen(other.to_string()),
        })?;
        info!(path = %path, regions = batch.regions.len(), "opened batch");

        Ok(Batch {
            file: batch.file,
            source,
            cache,
            regions: batch.regions.into_iter(),
        })
    }
}

enum State<S, K> {
    Unopened(Value),
    Rejected(Outcome),
    Opened(Batch<S, K>),
    Done,
}

struct Batch<S, K> {
    file: Map<String, Value>,
    source: S,
    cache: K,
    regions: std::vec::IntoIter<Value>,
}

impl<S: MatrixSource, K: ResultCache> Batch<S, K> {
    fn process_region(&self, region: &Value) -> Result<String, LocusError> {
        let descriptor = RegionDescriptor::from_value(region)?;
        let key = descriptor.cache_key(&self.file)?;
        let reuse = descriptor.directive.reuse;

        if reuse && self.cache.contains(&key)? {
            debug!(key, "cache hit");
            return Ok(key);
        }

        let matrix = self.source.fetch(&descriptor.params)?;
        if reuse {
            if !self.cache.set_if_absent(&key, &matrix)? {
                debug!(key, "entry stored concurrently, keeping existing value");
            }
        } else {
            self.cache.set(&key, &matrix)?;
        }
        debug!(key, shape = ?matrix.dim(), reuse, "fetched region");
        Ok(key)
    }
}

pub struct Outcomes<'a, O: SourceOpener, C: CacheOpener> {
    processor: &'a Processor<O, C>,
    state: State<O::Source, C::Cache>,
}

impl<O: SourceOpener, C: CacheOpener> Iterator for Outcomes<'_, O, C> {
    type Item = Outcome;

    fn next(&mut self) -> Option<Outcome> {
        loop {
            match mem::replace(&mut self.state, State::Done) {
                State::Unopened(request) => match self.processor.open(&request) {
                    Ok(batch) => self.state = State::Opened(batch),
                    Err(err) => return Some(failure(&request, &err)),
                },
                State::Rejected(outcome) => return Some(outcome),
                State::Opened(mut batch) => {
                    let region = batch.regions.next()?;
                    let outcome = match batch.process_region(&region) {
                        Ok(key) => Outcome::Success(key),
                        Err(err) => failure(&region, &err),
                    };
                    self.state = State::Opened(batch);
                    return Some(outcome);
                }
                State::Done => return None,
            }
        }
    }
}

fn failure(payload: &Value, err: &LocusError) -> Outcome {
    if err.is_batch_fatal() {
        warn!(error = %err, "batch rejected");
    } else {
        warn!(error = %err, "region failed");
    }
    Outcome::failure(payload, err)
}

impl<O: SourceOpener, C: CacheOpener> FusedIterator for Outcomes<'_, O, C> {}
