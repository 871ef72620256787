//! [`PixelFileOpener`] reads plain-text pixel files:
//!
//! ```text
//! #chrom  chr1  1000000
//! chr1  0     1000  chr1  0     1000  12
//! chr1  0     1000  chr1  1000  2000  5
//! ```
//!
//! Each data line is `chrom1 start1 end1 chrom2 start2 end2 count`. Every pixel
//! spans exactly one bin on both axes and a pixel is stored once for a pair of
//! bins; lookups are symmetric. `#chrom` lines declare chromosome lengths,
//! otherwise a chromosome ends at its last pixel. Files ending in `.gz` are
//! decompressed on the fly.

use std::collections::HashMap;
use std::io::BufRead;

use ndarray::Array2;
use serde_json::{Map, Value};
use tracing::debug;

use crate::domain::{Locus, MatrixType, MatrixUnit};
use crate::error::LocusError;
use crate::fs_util;
use crate::layout::LocusLayout;
use crate::request::SourceOptions;

pub type Matrix = Array2<f64>;

pub const DEFAULT_MAX_CELLS: usize = 1 << 26;

pub trait MatrixSource {
    fn fetch(&self, params: &Map<String, Value>) -> Result<Matrix, LocusError>;
}

pub trait SourceOpener {
    type Source: MatrixSource;

    fn open(&self, options: &SourceOptions) -> Result<Self::Source, LocusError>;
}

#[derive(Debug, Clone)]
pub struct PixelFileOpener {
    layout: LocusLayout,
    max_cells: usize,
}

impl Default for PixelFileOpener {
    fn default() -> Self {
        Self::new(LocusLayout::default())
    }
}

impl PixelFileOpener {
    pub fn new(layout: LocusLayout) -> Self {
        Self {
            layout,
            max_cells: DEFAULT_MAX_CELLS,
        }
    }

    pub fn with_max_cells(mut self, max_cells: usize) -> Self {
        self.max_cells = max_cells;
        self
    }
}

impl SourceOpener for PixelFileOpener {
    type Source = PixelMatrix;

    fn open(&self, options: &SourceOptions) -> Result<PixelMatrix, LocusError> {
        let mut matrix = PixelMatrix::open(options, self.layout.clone())?;
        matrix.max_cells = self.max_cells;
        Ok(matrix)
    }
}

#[derive(Debug, Clone)]
struct Chromosome {
    name: String,
    length: u64,
}

type PixelId = (usize, u64, usize, u64);

#[derive(Debug, Default)]
struct Expected {
    intra: HashMap<(usize, u64), f64>,
    inter: HashMap<(usize, usize), f64>,
}

#[derive(Debug)]
pub struct PixelMatrix {
    layout: LocusLayout,
    bin_size: u64,
    matrix_type: MatrixType,
    max_cells: usize,
    chromosomes: Vec<Chromosome>,
    index: HashMap<String, usize>,
    pixels: HashMap<PixelId, f64>,
    expected: Expected,
}

impl PixelMatrix {
    pub fn open(options: &SourceOptions, layout: LocusLayout) -> Result<Self, LocusError> {
        if options.matrix_unit != MatrixUnit::Bp {
            return Err(LocusError::SourceOpen(format!(
                "matrix unit {} is not supported by pixel files",
                options.matrix_unit
            )));
        }
        let reader = fs_util::open_text(options.path.as_std_path())
            .map_err(|err| LocusError::SourceOpen(err.to_string()))?;

        let mut matrix = Self {
            layout,
            bin_size: 0,
            matrix_type: options.matrix_type,
            max_cells: DEFAULT_MAX_CELLS,
            chromosomes: Vec::new(),
            index: HashMap::new(),
            pixels: HashMap::new(),
            expected: Expected::default(),
        };
        let mut declared = vec![];
        let mut bin_size = None;

        for (line_no, line) in reader.lines().enumerate() {
            let line = line.map_err(|err| LocusError::SourceOpen(err.to_string()))?;
            let line = line.trim();
            let at = |msg: &str| {
                LocusError::SourceOpen(format!("{}:{}: {msg}", options.path, line_no + 1))
            };
            if line.is_empty() {
                continue;
            }
            if let Some(rest) = line.strip_prefix("#chrom") {
                let fields = rest.split_whitespace().collect::<Vec<_>>();
                let [name, length] = fields[..] else {
                    return Err(at("expected '#chrom <name> <length>'"));
                };
                let length = length.parse().map_err(|_| at("invalid chromosome length"))?;
                let idx = matrix.chromosome_index(name);
                matrix.chromosomes[idx].length = length;
                declared.push(idx);
                continue;
            }
            if line.starts_with('#') {
                continue;
            }

            let fields = line.split_whitespace().collect::<Vec<_>>();
            let [chrom1, start1, end1, chrom2, start2, end2, count] = fields[..] else {
                return Err(at("expected 7 columns"));
            };
            let coordinate = |text: &str| text.parse::<u64>().map_err(|_| at("invalid coordinate"));
            let (start1, end1, start2, end2) =
                (coordinate(start1)?, coordinate(end1)?, coordinate(start2)?, coordinate(end2)?);
            let count = count.parse::<f64>().map_err(|_| at("invalid count"))?;

            let width = *bin_size.get_or_insert(end1.saturating_sub(start1));
            if width == 0
                || end1.checked_sub(start1) != Some(width)
                || end2.checked_sub(start2) != Some(width)
                || start1 % width != 0
                || start2 % width != 0
            {
                return Err(at("pixels must span exactly one bin"));
            }

            let c1 = matrix.chromosome_index(chrom1);
            let c2 = matrix.chromosome_index(chrom2);
            for (idx, end) in [(c1, end1), (c2, end2)] {
                if !declared.contains(&idx) {
                    let chrom = &mut matrix.chromosomes[idx];
                    chrom.length = chrom.length.max(end);
                }
            }
            *matrix
                .pixels
                .entry(ordered((c1, start1 / width), (c2, start2 / width)))
                .or_insert(0.0) += count;
        }

        matrix.bin_size = match (bin_size, options.resolution) {
            (Some(found), Some(requested)) if found != requested => {
                return Err(LocusError::SourceOpen(format!(
                    "resolution {requested} is not available (file is binned at {found})"
                )));
            }
            (Some(found), _) => found,
            (None, Some(requested)) => requested,
            (None, None) => {
                return Err(LocusError::SourceOpen(format!(
                    "cannot infer resolution of {}: no pixels",
                    options.path
                )));
            }
        };
        if matrix.matrix_type != MatrixType::Observed {
            matrix.expected = matrix.compute_expected();
        }

        debug!(
            path = %options.path,
            bin_size = matrix.bin_size,
            chromosomes = matrix.chromosomes.len(),
            pixels = matrix.pixels.len(),
            "opened pixel file"
        );
        Ok(matrix)
    }

    pub fn bin_size(&self) -> u64 {
        self.bin_size
    }

    pub fn chromosomes(&self) -> impl Iterator<Item = (&str, u64)> {
        self.chromosomes
            .iter()
            .map(|chrom| (chrom.name.as_str(), chrom.length))
    }

    fn chromosome_index(&mut self, name: &str) -> usize {
        if let Some(idx) = self.index.get(name) {
            return *idx;
        }
        let idx = self.chromosomes.len();
        self.chromosomes.push(Chromosome {
            name: name.to_string(),
            length: 0,
        });
        self.index.insert(name.to_string(), idx);
        idx
    }

    fn bin_count(&self, chrom: usize) -> u64 {
        self.chromosomes[chrom].length.div_ceil(self.bin_size)
    }

    fn compute_expected(&self) -> Expected {
        let mut intra = HashMap::<(usize, u64), f64>::new();
        let mut inter = HashMap::<(usize, usize), f64>::new();
        for ((c1, b1, c2, b2), count) in &self.pixels {
            if c1 == c2 {
                *intra.entry((*c1, b1.abs_diff(*b2))).or_insert(0.0) += count;
            } else {
                *inter.entry((*c1, *c2)).or_insert(0.0) += count;
            }
        }
        for ((chrom, distance), sum) in intra.iter_mut() {
            let cells = self.bin_count(*chrom).saturating_sub(*distance);
            *sum = if cells == 0 { 0.0 } else { *sum / cells as f64 };
        }
        for ((c1, c2), sum) in inter.iter_mut() {
            // Products of two bin counts can exceed u64.
            let cells = self.bin_count(*c1) as f64 * self.bin_count(*c2) as f64;
            *sum = if cells == 0.0 { 0.0 } else { *sum / cells };
        }
        Expected { intra, inter }
    }

    fn value(&self, a: (usize, u64), b: (usize, u64)) -> f64 {
        let observed = || self.pixels.get(&ordered(a, b)).copied().unwrap_or(0.0);
        let expected = || {
            let mean = if a.0 == b.0 {
                self.expected.intra.get(&(a.0, a.1.abs_diff(b.1)))
            } else {
                let (x, y) = if a.0 <= b.0 { (a.0, b.0) } else { (b.0, a.0) };
                self.expected.inter.get(&(x, y))
            };
            mean.copied().unwrap_or(0.0)
        };
        match self.matrix_type {
            MatrixType::Observed => observed(),
            MatrixType::Expected => expected(),
            MatrixType::ObservedOverExpected => {
                let expected = expected();
                if expected == 0.0 { 0.0 } else { observed() / expected }
            }
        }
    }

    fn bins(&self, range: &RangeQuery) -> Result<(usize, u64, u64), LocusError> {
        let chrom = *self
            .index
            .get(&range.chrom)
            .ok_or_else(|| {
                LocusError::RegionFetch(format!("unknown chromosome: {}", range.chrom))
            })?;
        let length = self.chromosomes[chrom].length;
        let (start, end) = match range.span {
            None => (0, length),
            Some((start, end)) => {
                if start < 0 || start >= end {
                    return Err(LocusError::RegionFetch(format!(
                        "invalid range {}:{start}-{end}",
                        range.chrom
                    )));
                }
                (start as u64, (end as u64).min(length))
            }
        };
        if start >= length {
            return Err(LocusError::RegionFetch(format!(
                "range starts past the end of {} ({length} bp)",
                range.chrom
            )));
        }
        Ok((chrom, start / self.bin_size, end.div_ceil(self.bin_size)))
    }

    fn shape(&self, rows: u64, cols: u64) -> Result<(usize, usize), LocusError> {
        let shape = usize::try_from(rows).ok().zip(usize::try_from(cols).ok());
        match shape {
            Some((r, c)) if r.checked_mul(c).is_some_and(|cells| cells <= self.max_cells) => {
                Ok((r, c))
            }
            _ => Err(LocusError::RegionFetch(format!(
                "region too large: {rows} x {cols} bins exceeds {} cells",
                self.max_cells
            ))),
        }
    }
}

impl MatrixSource for PixelMatrix {
    fn fetch(&self, params: &Map<String, Value>) -> Result<Matrix, LocusError> {
        let query = FetchQuery::parse(params, &self.layout)?;
        let (c1, first1, last1) = self.bins(&query.range1)?;
        let (c2, first2, last2) = self.bins(query.range2.as_ref().unwrap_or(&query.range1))?;

        let shape = self.shape(last1 - first1, last2 - first2)?;
        let matrix = Array2::from_shape_fn(shape, |(row, col)| {
            let value = self.value((c1, first1 + row as u64), (c2, first2 + col as u64));
            match query.count_type {
                CountType::Float => value,
                CountType::Int => value.round(),
            }
        });
        debug!(range1 = %query.range1, shape = ?matrix.dim(), "fetched matrix");
        Ok(matrix)
    }
}

fn ordered(a: (usize, u64), b: (usize, u64)) -> PixelId {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    (lo.0, lo.1, hi.0, hi.1)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CountType {
    Float,
    Int,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct RangeQuery {
    chrom: String,
    span: Option<(i64, i64)>,
}

impl std::fmt::Display for RangeQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.span {
            Some((start, end)) => write!(f, "{}:{start}-{end}", self.chrom),
            None => write!(f, "{}", self.chrom),
        }
    }
}

#[derive(Debug)]
struct FetchQuery {
    range1: RangeQuery,
    range2: Option<RangeQuery>,
    count_type: CountType,
}

const QUERY_FIELDS: [&str; 6] = [
    "range",
    "range1",
    "range2",
    "normalization",
    "count_type",
    "query_type",
];

impl FetchQuery {
    fn parse(params: &Map<String, Value>, layout: &LocusLayout) -> Result<Self, LocusError> {
        let [chrom1, start1, end1] = layout.fields("");
        let [chrom2, start2, end2] = layout.fields("2");
        let layout_fields = [&chrom1, &start1, &end1, &chrom2, &start2, &end2];
        if let Some(name) = params.keys().find(|name| {
            !QUERY_FIELDS.contains(&name.as_str()) && !layout_fields.contains(name)
        }) {
            return Err(LocusError::RegionFetch(format!(
                "unsupported fetch parameter '{name}'"
            )));
        }

        let bed = match optional_str(params, "query_type")? {
            None => false,
            Some(kind) if kind.eq_ignore_ascii_case("UCSC") => false,
            Some(kind) if kind.eq_ignore_ascii_case("BED") => true,
            Some(kind) => {
                return Err(LocusError::RegionFetch(format!("unknown query type: {kind}")));
            }
        };
        if let Some(norm) = optional_str(params, "normalization")? {
            if !norm.eq_ignore_ascii_case("NONE") {
                return Err(LocusError::RegionFetch(format!(
                    "normalization '{norm}' is not available"
                )));
            }
        }
        let count_type = match optional_str(params, "count_type")? {
            None | Some("float") => CountType::Float,
            Some("int") => CountType::Int,
            Some(other) => {
                return Err(LocusError::RegionFetch(format!("unknown count type: {other}")));
            }
        };

        let named1 = match (params.get("range1"), params.get("range")) {
            (Some(_), Some(_)) => {
                return Err(LocusError::RegionFetch(
                    "give either 'range' or 'range1', not both".to_string(),
                ));
            }
            (Some(_), None) => optional_str(params, "range1")?,
            (None, Some(_)) => optional_str(params, "range")?,
            (None, None) => None,
        };
        let range1 = pick_range(
            named1,
            layout_range(params, layout, "")?,
            bed,
        )?
        .ok_or_else(|| LocusError::RegionFetch("no region given".to_string()))?;
        let range2 = pick_range(
            optional_str(params, "range2")?,
            layout_range(params, layout, "2")?,
            bed,
        )?;

        Ok(Self {
            range1,
            range2,
            count_type,
        })
    }
}

fn optional_str<'a>(
    params: &'a Map<String, Value>,
    name: &str,
) -> Result<Option<&'a str>, LocusError> {
    match params.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(text)) => Ok(Some(text.as_str())),
        Some(_) => Err(LocusError::RegionFetch(format!("'{name}' must be a string"))),
    }
}

fn pick_range(
    named: Option<&str>,
    fields: Option<RangeQuery>,
    bed: bool,
) -> Result<Option<RangeQuery>, LocusError> {
    match (named, fields) {
        (Some(_), Some(_)) => Err(LocusError::RegionFetch(
            "region given both as a range string and as locus fields".to_string(),
        )),
        (Some(text), None) => parse_range(text, bed).map(Some),
        (None, fields) => Ok(fields),
    }
}

fn parse_range(text: &str, bed: bool) -> Result<RangeQuery, LocusError> {
    let invalid = || LocusError::RegionFetch(format!("invalid range: {text}"));
    if bed {
        let fields = text.split_whitespace().collect::<Vec<_>>();
        return match fields[..] {
            [chrom] => Ok(RangeQuery {
                chrom: chrom.to_string(),
                span: None,
            }),
            [chrom, start, end] => Ok(RangeQuery {
                chrom: chrom.to_string(),
                span: Some((
                    start.parse().map_err(|_| invalid())?,
                    end.parse().map_err(|_| invalid())?,
                )),
            }),
            _ => Err(invalid()),
        };
    }
    let text = text.trim();
    if text.is_empty() {
        return Err(invalid());
    }
    if !text.contains(':') {
        return Ok(RangeQuery {
            chrom: text.to_string(),
            span: None,
        });
    }
    let locus: Locus = text.parse().map_err(|_| invalid())?;
    Ok(RangeQuery {
        chrom: locus.chrom,
        span: Some((locus.start, locus.end)),
    })
}

fn layout_range(
    params: &Map<String, Value>,
    layout: &LocusLayout,
    suffix: &str,
) -> Result<Option<RangeQuery>, LocusError> {
    if !layout.has_any(params, suffix) {
        return Ok(None);
    }
    let [chrom, start, end] = layout.fields(suffix);
    if !params.contains_key(&start) && !params.contains_key(&end) {
        let chrom = optional_str(params, &chrom)?
            .ok_or_else(|| LocusError::RegionFetch(format!("missing '{chrom}'")))?;
        return Ok(Some(RangeQuery {
            chrom: chrom.to_string(),
            span: None,
        }));
    }
    let locus = layout
        .locus(params, suffix)
        .map_err(|err| LocusError::RegionFetch(err.to_string()))?;
    Ok(Some(RangeQuery {
        chrom: locus.chrom,
        span: Some((locus.start, locus.end)),
    }))
}
