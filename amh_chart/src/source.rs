use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::{
    parse_samples, Band, ChartError, InterpolatedCurve, InterpolationPolicy, LoadFailure, Sample,
};

/// Supplies the raw samples of one percentile band.
pub trait SampleSource: Sync {
    /// Where the band is read from, for error reporting.
    fn location(&self, band: Band) -> String;

    fn fetch(&self, band: Band) -> Result<Vec<Sample>, String>;
}

/// Reads `<root>/<N>th-percentile.json`.
#[derive(Clone, Debug)]
pub struct DirSource {
    root: PathBuf,
}

impl DirSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path(&self, band: Band) -> PathBuf {
        self.root.join(band.file_name())
    }
}

impl SampleSource for DirSource {
    fn location(&self, band: Band) -> String {
        self.path(band).display().to_string()
    }

    fn fetch(&self, band: Band) -> Result<Vec<Sample>, String> {
        let bytes = fs::read(self.path(band)).map_err(|e| e.to_string())?;
        parse_samples(&bytes)
    }
}

/// GETs `<base_url>/<N>th-percentile.json`.
#[cfg(feature = "http")]
#[derive(Clone, Debug)]
pub struct HttpSource {
    base_url: String,
    client: reqwest::blocking::Client,
}

#[cfg(feature = "http")]
impl HttpSource {
    pub fn new(base_url: impl Into<String>) -> Result<Self, ChartError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| ChartError::InvalidParameter(format!("http client: {}", e)))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }
}

#[cfg(feature = "http")]
impl SampleSource for HttpSource {
    fn location(&self, band: Band) -> String {
        format!("{}/{}", self.base_url, band.file_name())
    }

    fn fetch(&self, band: Band) -> Result<Vec<Sample>, String> {
        let response = self
            .client
            .get(self.location(band))
            .send()
            .map_err(|e| e.to_string())?;
        let status = response.status();
        if !status.is_success() {
            return Err(format!("HTTP error! status: {}", status));
        }
        let body = response.bytes().map_err(|e| e.to_string())?;
        parse_samples(&body)
    }
}

/// Raw samples per band. Either every requested band loaded or none did.
#[derive(Clone, Debug, Default)]
pub struct SampleStore {
    series: BTreeMap<Band, Vec<Sample>>,
}

impl SampleStore {
    pub fn from_series(series: impl IntoIterator<Item = (Band, Vec<Sample>)>) -> Self {
        Self {
            series: series.into_iter().collect(),
        }
    }

    /// Fetch all five bands concurrently. Any failure fails the whole load and the
    /// error names every band that failed.
    pub fn load(source: &dyn SampleSource) -> Result<Self, ChartError> {
        let results: Vec<(Band, Result<Vec<Sample>, String>)> = Band::ALL
            .par_iter()
            .map(|&band| (band, source.fetch(band)))
            .collect();

        let mut series = BTreeMap::new();
        let mut failures = Vec::new();
        for (band, result) in results {
            match result {
                Ok(samples) => {
                    debug!(band = %band, samples = samples.len(), "loaded percentile band");
                    series.insert(band, samples);
                }
                Err(reason) => {
                    let location = source.location(band);
                    warn!(band = %band, %location, %reason, "percentile band failed to load");
                    failures.push(LoadFailure {
                        band,
                        location,
                        reason,
                    });
                }
            }
        }
        if !failures.is_empty() {
            return Err(ChartError::DataLoad(failures));
        }
        info!(bands = series.len(), "percentile data loaded");
        Ok(Self { series })
    }

    pub fn get(&self, band: Band) -> Option<&[Sample]> {
        self.series.get(&band).map(Vec::as_slice)
    }

    pub fn bands(&self) -> impl Iterator<Item = Band> + '_ {
        self.series.keys().copied()
    }

    /// One interpolated curve per stored band.
    pub fn curves(
        &self,
        policy: InterpolationPolicy,
        grid_max_age: u32,
    ) -> BTreeMap<Band, InterpolatedCurve> {
        self.series
            .iter()
            .map(|(&band, samples)| (band, InterpolatedCurve::build(samples, policy, grid_max_age)))
            .collect()
    }
}
