use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use ndarray::Array2;
use serde_json::{Map, Value, json};

use locus::cache::{CacheOpener, ResultCache};
use locus::error::LocusError;
use locus::key;
use locus::processor::Processor;
use locus::request::{Outcome, SourceOptions};
use locus::source::{Matrix, MatrixSource, SourceOpener};

#[derive(Clone, Default)]
struct MockSources {
    opened: Arc<Mutex<Vec<SourceOptions>>>,
    fetches: Arc<Mutex<Vec<Map<String, Value>>>>,
}

struct MockSource {
    fetches: Arc<Mutex<Vec<Map<String, Value>>>>,
    fill: f64,
}

impl SourceOpener for MockSources {
    type Source = MockSource;

    fn open(&self, options: &SourceOptions) -> Result<MockSource, LocusError> {
        if options.resolution == Some(7) {
            return Err(LocusError::SourceOpen("resolution 7 is not available".to_string()));
        }
        self.opened.lock().unwrap().push(options.clone());
        Ok(MockSource {
            fetches: self.fetches.clone(),
            fill: options.resolution.unwrap_or(1) as f64,
        })
    }
}

impl MatrixSource for MockSource {
    fn fetch(&self, params: &Map<String, Value>) -> Result<Matrix, LocusError> {
        self.fetches.lock().unwrap().push(params.clone());
        if params.get("chrom") == Some(&json!("chrZ")) {
            return Err(LocusError::RegionFetch("unknown chromosome: chrZ".to_string()));
        }
        Ok(Array2::from_elem((2, 2), self.fill))
    }
}

#[derive(Clone, Default)]
struct MockCaches {
    entries: Arc<Mutex<HashMap<String, Matrix>>>,
    broken: Arc<Mutex<Vec<String>>>,
}

impl MockCaches {
    fn break_key(&self, key: &str) {
        self.broken.lock().unwrap().push(key.to_string());
    }

    fn check(&self, key: &str) -> Result<(), LocusError> {
        if self.broken.lock().unwrap().iter().any(|broken| broken == key) {
            return Err(LocusError::CacheAccess(format!("permission denied: {key}")));
        }
        Ok(())
    }
}

impl CacheOpener for MockCaches {
    type Cache = MockCaches;

    fn open(&self, config: &Map<String, Value>) -> Result<MockCaches, LocusError> {
        if config.get("directory").is_none() {
            return Err(LocusError::CacheOpen("'directory' is required".to_string()));
        }
        Ok(self.clone())
    }
}

impl ResultCache for MockCaches {
    fn contains(&self, key: &str) -> Result<bool, LocusError> {
        self.check(key)?;
        Ok(self.entries.lock().unwrap().contains_key(key))
    }

    fn get(&self, key: &str) -> Result<Option<Matrix>, LocusError> {
        self.check(key)?;
        Ok(self.entries.lock().unwrap().get(key).cloned())
    }

    fn set(&self, key: &str, value: &Matrix) -> Result<(), LocusError> {
        self.check(key)?;
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), value.clone());
        Ok(())
    }

    fn set_if_absent(&self, key: &str, value: &Matrix) -> Result<bool, LocusError> {
        self.check(key)?;
        let mut entries = self.entries.lock().unwrap();
        if entries.contains_key(key) {
            return Ok(false);
        }
        entries.insert(key.to_string(), value.clone());
        Ok(true)
    }
}

struct Fixture {
    _dir: tempfile::TempDir,
    path: String,
    sources: MockSources,
    caches: MockCaches,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("matrix.pixels");
        std::fs::write(&path, b"").unwrap();
        Self {
            path: path.to_str().unwrap().to_string(),
            _dir: dir,
            sources: MockSources::default(),
            caches: MockCaches::default(),
        }
    }

    fn processor(&self) -> Processor<MockSources, MockCaches> {
        Processor::new(self.sources.clone(), self.caches.clone())
    }

    fn fetch_count(&self) -> usize {
        self.sources.fetches.lock().unwrap().len()
    }

    fn stored(&self, key: &str) -> Option<Matrix> {
        self.caches.get(key).unwrap()
    }
}

fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => panic!("expected object"),
    }
}

#[test]
fn yields_one_key_per_region_in_order() {
    let fx = Fixture::new();
    let request = json!({
        "file": {"path": fx.path},
        "cache": {"directory": "/unused"},
        "regions": [
            {"chrom": "chr1", "start": 0, "end": 1000},
            {"chrom": "chr2", "start": 0, "end": 1000},
        ],
    });

    let outcomes = fx.processor().process(request).collect::<Vec<_>>();

    let expected = [
        key::serialize(&object(
            json!({"path": fx.path, "chrom": "chr1", "start": 0, "end": 1000}),
        ))
        .unwrap(),
        key::serialize(&object(
            json!({"path": fx.path, "chrom": "chr2", "start": 0, "end": 1000}),
        ))
        .unwrap(),
    ];
    assert_eq!(
        outcomes,
        vec![
            Outcome::Success(expected[0].clone()),
            Outcome::Success(expected[1].clone())
        ]
    );
    assert!(fx.stored(&expected[0]).is_some());
    assert!(fx.stored(&expected[1]).is_some());
}

#[test]
fn nothing_runs_until_pulled() {
    let fx = Fixture::new();
    let processor = fx.processor();
    let mut outcomes = processor.process(json!({
        "file": {"path": fx.path},
        "cache": {"directory": "/unused"},
        "regions": [{"chrom": "chr1"}, {"chrom": "chr2"}],
    }));
    assert!(fx.sources.opened.lock().unwrap().is_empty());

    assert!(outcomes.next().unwrap().is_success());
    assert_eq!(fx.sources.opened.lock().unwrap().len(), 1);
    assert_eq!(fx.fetch_count(), 1);

    drop(outcomes);
    assert_eq!(fx.fetch_count(), 1);
}

#[test]
fn cache_hit_skips_fetch_and_keeps_value() {
    let fx = Fixture::new();
    let region = json!({"chrom": "chr1", "start": 0, "end": 1000});
    let key = key::serialize(&object(
        json!({"path": fx.path, "chrom": "chr1", "start": 0, "end": 1000}),
    ))
    .unwrap();
    let original = Array2::from_elem((1, 1), 42.0);
    fx.caches.set(&key, &original).unwrap();

    let outcomes = fx
        .processor()
        .process(json!({
            "file": {"path": fx.path},
            "cache": {"directory": "/unused"},
            "regions": [region],
        }))
        .collect::<Vec<_>>();

    assert_eq!(outcomes, vec![Outcome::Success(key.clone())]);
    assert_eq!(fx.fetch_count(), 0);
    assert_eq!(fx.stored(&key), Some(original));
}

#[test]
fn reuse_false_forces_recomputation() {
    let fx = Fixture::new();
    let key = key::serialize(&object(json!({"path": fx.path, "resolution": 5, "chrom": "chr1"})))
        .unwrap();
    fx.caches.set(&key, &Array2::from_elem((1, 1), 42.0)).unwrap();

    let outcomes = fx
        .processor()
        .process(json!({
            "file": {"path": fx.path, "resolution": 5},
            "cache": {"directory": "/unused"},
            "regions": [{"chrom": "chr1", "cache-directive": {"reuse": false}}],
        }))
        .collect::<Vec<_>>();

    assert_eq!(outcomes, vec![Outcome::Success(key.clone())]);
    assert_eq!(fx.fetch_count(), 1);
    assert_eq!(fx.stored(&key), Some(Array2::from_elem((2, 2), 5.0)));
}

#[test]
fn missing_cache_fails_whole_batch() {
    let fx = Fixture::new();
    let request = json!({
        "file": {"path": fx.path},
        "regions": [{"chrom": "chr1"}, {"chrom": "chr2"}],
    });

    let outcomes = fx.processor().process(request.clone()).collect::<Vec<_>>();

    assert_eq!(outcomes.len(), 1);
    let Outcome::Failure(record) = &outcomes[0] else {
        panic!("expected failure");
    };
    assert_eq!(record["error"], json!("missing required field 'cache'"));
    assert_eq!(record["regions"], request["regions"]);
    assert_eq!(fx.fetch_count(), 0);
}

#[test]
fn missing_file_fails_whole_batch() {
    let fx = Fixture::new();
    let outcomes = fx
        .processor()
        .process(json!({
            "file": {"path": "/definitely/not/here.pixels"},
            "cache": {"directory": "/unused"},
            "regions": [{"chrom": "chr1"}],
        }))
        .collect::<Vec<_>>();

    assert_eq!(outcomes.len(), 1);
    assert_eq!(
        outcomes[0].error(),
        Some("file not found: /definitely/not/here.pixels")
    );
}

#[test]
fn open_failures_are_batch_fatal() {
    let fx = Fixture::new();
    let source_failure = fx
        .processor()
        .process(json!({
            "file": {"path": fx.path, "resolution": 7},
            "cache": {"directory": "/unused"},
            "regions": [{"chrom": "chr1"}],
        }))
        .collect::<Vec<_>>();
    assert_eq!(source_failure.len(), 1);
    assert!(source_failure[0].error().unwrap().starts_with("failed to open matrix source"));

    let cache_failure = fx
        .processor()
        .process(json!({
            "file": {"path": fx.path},
            "cache": {"size_limit": 10},
            "regions": [{"chrom": "chr1"}],
        }))
        .collect::<Vec<_>>();
    assert_eq!(cache_failure.len(), 1);
    assert!(cache_failure[0].error().unwrap().starts_with("failed to open result cache"));
    assert_eq!(fx.fetch_count(), 0);
}

#[test]
fn failing_region_does_not_stop_the_batch() {
    let fx = Fixture::new();
    let outcomes = fx
        .processor()
        .process(json!({
            "file": {"path": fx.path},
            "cache": {"directory": "/unused"},
            "regions": [{"chrom": "chr1"}, {"chrom": "chrZ"}, {"chrom": "chr3"}],
        }))
        .collect::<Vec<_>>();

    assert_eq!(outcomes.len(), 3);
    assert!(outcomes[0].is_success());
    assert_eq!(
        outcomes[1],
        Outcome::Failure(object(json!({"chrom": "chrZ", "error": "unknown chromosome: chrZ"})))
    );
    assert!(outcomes[2].is_success());
    assert_eq!(fx.fetch_count(), 3);
}

#[test]
fn explicit_key_overrides_derived_key() {
    let fx = Fixture::new();
    let outcomes = fx
        .processor()
        .process(json!({
            "file": {"path": fx.path},
            "cache": {"directory": "/unused"},
            "regions": [{"chrom": "chr1", "cache-directive": {"key": "custom"}}],
        }))
        .collect::<Vec<_>>();

    assert_eq!(outcomes, vec![Outcome::Success("custom".to_string())]);
    assert!(fx.stored("custom").is_some());
}

#[test]
fn directive_is_not_forwarded_to_source() {
    let fx = Fixture::new();
    let _ = fx
        .processor()
        .process(json!({
            "file": {"path": fx.path, "balance": "KR"},
            "cache": {"directory": "/unused"},
            "regions": [{"chrom": "chr1", "cache-directive": {"reuse": false}}],
        }))
        .collect::<Vec<_>>();

    let fetches = fx.sources.fetches.lock().unwrap();
    assert_eq!(Value::Object(fetches[0].clone()), json!({"chrom": "chr1"}));
    let opened = fx.sources.opened.lock().unwrap();
    assert_eq!(opened[0].resolution, None);
}

#[test]
fn invalid_directive_is_region_scoped() {
    let fx = Fixture::new();
    let outcomes = fx
        .processor()
        .process(json!({
            "file": {"path": fx.path},
            "cache": {"directory": "/unused"},
            "regions": [{"chrom": "chr1", "cache-directive": {"reuse": "no"}}, {"chrom": "chr2"}],
        }))
        .collect::<Vec<_>>();

    assert_eq!(
        outcomes[0].error(),
        Some("invalid cache directive: 'reuse' must be a boolean")
    );
    assert!(outcomes[1].is_success());
}

#[test]
fn dispatch_routes_by_type() {
    let fx = Fixture::new();
    let processor = fx.processor();

    let routed = processor
        .dispatch(json!({
            "type": "hictk",
            "file": {"path": fx.path},
            "cache": {"directory": "/unused"},
            "regions": [{"chrom": "chr1"}],
        }))
        .collect::<Vec<_>>();
    assert_eq!(routed.len(), 1);
    assert!(routed[0].is_success());

    let missing = processor.dispatch(json!({"regions": []})).collect::<Vec<_>>();
    assert_eq!(missing.len(), 1);
    assert_eq!(missing[0].error(), Some("missing required field 'type'"));

    let unknown = processor.dispatch(json!({"type": "bigwig"})).collect::<Vec<_>>();
    assert_eq!(unknown[0].error(), Some("unknown request type: bigwig"));
}

#[test]
fn cache_read_failure_is_region_scoped() {
    let fx = Fixture::new();
    fx.caches.break_key("second");

    let outcomes = fx
        .processor()
        .process(json!({
            "file": {"path": fx.path},
            "cache": {"directory": "/unused"},
            "regions": [
                {"chrom": "chr1", "cache-directive": {"key": "first"}},
                {"chrom": "chr2", "cache-directive": {"key": "second"}},
                {"chrom": "chr3", "cache-directive": {"key": "third"}},
            ],
        }))
        .collect::<Vec<_>>();

    assert_eq!(outcomes.len(), 3);
    assert_eq!(outcomes[0], Outcome::Success("first".to_string()));
    assert_eq!(
        outcomes[1],
        Outcome::Failure(object(json!({
            "chrom": "chr2",
            "cache-directive": {"key": "second"},
            "error": "cache access failed: permission denied: second",
        })))
    );
    assert_eq!(outcomes[2], Outcome::Success("third".to_string()));
    assert_eq!(fx.fetch_count(), 2);
}

#[test]
fn forced_write_failure_is_region_scoped() {
    let fx = Fixture::new();
    fx.caches.break_key("second");

    let outcomes = fx
        .processor()
        .process(json!({
            "file": {"path": fx.path},
            "cache": {"directory": "/unused"},
            "regions": [
                {"chrom": "chr1", "cache-directive": {"key": "first", "reuse": false}},
                {"chrom": "chr2", "cache-directive": {"key": "second", "reuse": false}},
                {"chrom": "chr3", "cache-directive": {"key": "third", "reuse": false}},
            ],
        }))
        .collect::<Vec<_>>();

    assert!(outcomes[0].is_success());
    assert_eq!(
        outcomes[1].error(),
        Some("cache access failed: permission denied: second")
    );
    assert!(outcomes[2].is_success());
    // the write is attempted after the fetch
    assert_eq!(fx.fetch_count(), 3);
    assert!(fx.stored("third").is_some());
}
