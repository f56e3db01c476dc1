use std::collections::BTreeMap;

use chrono::NaiveDate;
use tracing::info;

use crate::patient::validate_value;
use crate::{
    resolve_age, AgeInput, AmhUnit, Band, ChartConfig, ChartError, ChartParams, ChartTable,
    InterpolatedCurve, PatientObservation, PatientPointManager, SampleSource, SampleStore,
};

/// Draws a chart table. Called once after initialisation and again after every
/// accepted submission. Implementations report failures as `ChartError::Render`.
pub trait ChartRenderer {
    fn draw(&mut self, table: &ChartTable, config: &ChartConfig) -> Result<(), ChartError>;
}

/// Renderer that draws nothing.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullRenderer;

impl ChartRenderer for NullRenderer {
    fn draw(&mut self, _table: &ChartTable, _config: &ChartConfig) -> Result<(), ChartError> {
        Ok(())
    }
}

#[derive(Clone, Debug)]
struct LoadedChart {
    curves: BTreeMap<Band, InterpolatedCurve>,
    table: ChartTable,
    patient: PatientPointManager,
}

/// Owns the chart table and the current patient point for one page/session.
pub struct ChartSession<R: ChartRenderer> {
    params: ChartParams,
    config: ChartConfig,
    renderer: R,
    chart: Option<LoadedChart>,
}

impl<R: ChartRenderer> ChartSession<R> {
    pub fn new(params: ChartParams, config: ChartConfig, renderer: R) -> Self {
        Self {
            params,
            config,
            renderer,
            chart: None,
        }
    }

    /// Load every band from `source` and build the table. Nothing is kept if any
    /// band fails.
    pub fn initialize(&mut self, source: &dyn SampleSource) -> Result<(), ChartError> {
        self.params.validate()?;
        let store = SampleStore::load(source)?;
        self.initialize_from_store(&store)
    }

    pub fn initialize_from_store(&mut self, store: &SampleStore) -> Result<(), ChartError> {
        self.params.validate()?;
        let curves = store.curves(self.params.policy, self.params.grid_max_age());
        let table = ChartTable::build(&curves, self.params.resolution, self.params.max_age)?;
        info!(
            rows = table.len(),
            bands = curves.len(),
            fingerprint = %table.fingerprint(),
            "chart initialized"
        );
        let chart = LoadedChart {
            curves,
            table,
            patient: PatientPointManager::new(self.params.snap),
        };
        self.renderer.draw(&chart.table, &self.config)?;
        self.chart = Some(chart);
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.chart.is_some()
    }

    pub fn params(&self) -> &ChartParams {
        &self.params
    }

    pub fn config(&self) -> &ChartConfig {
        &self.config
    }

    pub fn renderer(&self) -> &R {
        &self.renderer
    }

    pub fn table(&self) -> Option<&ChartTable> {
        self.chart.as_ref().map(|chart| &chart.table)
    }

    pub fn curve(&self, band: Band) -> Option<&InterpolatedCurve> {
        self.chart.as_ref()?.curves.get(&band)
    }

    pub fn last_observation(&self) -> Option<&PatientObservation> {
        self.chart.as_ref()?.patient.last()
    }

    /// Resolve the age from `age_input` and place the patient point.
    pub fn submit(
        &mut self,
        raw_value: f64,
        unit: AmhUnit,
        age_input: &AgeInput,
        today: NaiveDate,
    ) -> Result<PatientObservation, ChartError> {
        if self.chart.is_none() {
            return Err(ChartError::NotInitialized);
        }
        validate_value(raw_value)?;
        let age = resolve_age(age_input, today)?;
        self.submit_age(raw_value, unit, age)
    }

    /// Place the patient point at an already resolved age. If the redraw fails the
    /// previous point is restored and the render error is returned.
    pub fn submit_age(
        &mut self,
        raw_value: f64,
        unit: AmhUnit,
        age: f64,
    ) -> Result<PatientObservation, ChartError> {
        let chart = self.chart.as_mut().ok_or(ChartError::NotInitialized)?;
        let snapshot = (chart.table.clone(), chart.patient.clone());
        let observation = chart.patient.submit(&mut chart.table, raw_value, unit, age)?;
        if let Err(err) = self.renderer.draw(&chart.table, &self.config) {
            (chart.table, chart.patient) = snapshot;
            return Err(err);
        }
        Ok(observation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{InterpolationPolicy, Resolution, Sample};

    #[derive(Default)]
    struct CountingRenderer {
        draws: usize,
        patient_rows: Vec<Vec<usize>>,
    }

    impl ChartRenderer for CountingRenderer {
        fn draw(&mut self, table: &ChartTable, _config: &ChartConfig) -> Result<(), ChartError> {
            self.draws += 1;
            self.patient_rows.push(table.patient_rows());
            Ok(())
        }
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()
    }

    fn synthetic_store(bands: &[Band]) -> SampleStore {
        let samples = vec![Sample::new(0.0, 1.0), Sample::new(10.0, 2.0), Sample::new(20.0, 3.0)];
        SampleStore::from_series(bands.iter().map(|&b| (b, samples.clone())))
    }

    fn params(max_age: f64) -> ChartParams {
        ChartParams {
            resolution: Resolution::Coarse,
            max_age,
            policy: InterpolationPolicy::Continuous,
            ..ChartParams::default()
        }
    }

    #[test]
    fn test_submit_before_initialize() {
        let mut session = ChartSession::new(params(50.0), ChartConfig::default(), NullRenderer);
        let err = session
            .submit(2.0, AmhUnit::PmolPerL, &AgeInput::Direct("30".into()), today())
            .unwrap_err();
        assert!(matches!(err, ChartError::NotInitialized));
        assert!(matches!(
            session.submit_age(2.0, AmhUnit::PmolPerL, 30.0),
            Err(ChartError::NotInitialized)
        ));
    }

    #[test]
    fn test_three_band_end_to_end() {
        let store = synthetic_store(&[Band::P10, Band::P50, Band::P90]);
        let mut session =
            ChartSession::new(params(20.0), ChartConfig::default(), CountingRenderer::default());
        session.initialize_from_store(&store).unwrap();

        let table = session.table().unwrap();
        assert_eq!(table.len(), 21);
        for band in [Band::P10, Band::P50, Band::P90] {
            assert_eq!(table.rows()[5].band(band), Some(1.5));
        }
        assert_eq!(table.rows()[5].band(Band::P25), None);

        session
            .submit(2.0, AmhUnit::PmolPerL, &AgeInput::Direct("5".into()), today())
            .unwrap();
        let table = session.table().unwrap();
        assert_eq!(table.rows()[5].patient, Some(2.0));
        for (idx, row) in table.rows().iter().enumerate() {
            if idx != 5 {
                assert!(row.patient.is_none());
            }
        }
        assert_eq!(session.renderer().draws, 2);
    }

    #[test]
    fn test_rejected_submission_preserves_state() {
        let store = synthetic_store(&Band::ALL);
        let mut session =
            ChartSession::new(params(20.0), ChartConfig::default(), CountingRenderer::default());
        session.initialize_from_store(&store).unwrap();
        session
            .submit(4.0, AmhUnit::PmolPerL, &AgeInput::Direct("12".into()), today())
            .unwrap();
        let before = session.table().unwrap().clone();

        let cases = [
            (-1.0, AgeInput::Direct("10".into())),
            (4.0, AgeInput::Direct("".into())),
            (4.0, AgeInput::Direct("ten".into())),
            (4.0, AgeInput::BirthDate(None)),
        ];
        for (value, input) in cases {
            let err = session.submit(value, AmhUnit::PmolPerL, &input, today()).unwrap_err();
            assert!(err.is_recoverable(), "{err}");
        }
        assert_eq!(session.table().unwrap(), &before);
        assert_eq!(session.last_observation().unwrap().row, 12);
        assert_eq!(session.renderer().draws, 2);
    }

    #[test]
    fn test_value_checked_before_age() {
        let store = synthetic_store(&Band::ALL);
        let mut session = ChartSession::new(params(20.0), ChartConfig::default(), NullRenderer);
        session.initialize_from_store(&store).unwrap();
        let err = session
            .submit(0.0, AmhUnit::PmolPerL, &AgeInput::Direct("".into()), today())
            .unwrap_err();
        assert!(matches!(err, ChartError::InvalidValue(_)));
    }

    #[test]
    fn test_many_submissions_leave_one_point() {
        let store = synthetic_store(&Band::ALL);
        let mut session =
            ChartSession::new(params(50.0), ChartConfig::default(), CountingRenderer::default());
        session.initialize_from_store(&store).unwrap();
        let birth = NaiveDate::from_ymd_opt(1990, 6, 1).unwrap();
        session
            .submit(1.0, AmhUnit::NgPerMl, &AgeInput::BirthDate(Some(birth)), today())
            .unwrap();
        for age in [3.0, 17.0, 41.0, 28.0] {
            session.submit_age(6.0, AmhUnit::PmolPerL, age).unwrap();
        }
        let renderer = session.renderer();
        assert!(renderer.patient_rows.iter().skip(1).all(|rows| rows.len() == 1));
        assert_eq!(renderer.patient_rows.last().unwrap(), &vec![28]);
        assert_eq!(session.curve(Band::P50).unwrap().evaluate(15.0), Some(2.5));
    }

    struct FlakyRenderer {
        fail: bool,
    }

    impl ChartRenderer for FlakyRenderer {
        fn draw(&mut self, _table: &ChartTable, _config: &ChartConfig) -> Result<(), ChartError> {
            if self.fail {
                return Err(ChartError::Render("backend down".into()));
            }
            Ok(())
        }
    }

    #[test]
    fn test_render_failure_aborts_initialization() {
        let store = synthetic_store(&Band::ALL);
        let mut session = ChartSession::new(
            params(20.0),
            ChartConfig::default(),
            FlakyRenderer { fail: true },
        );
        let err = session.initialize_from_store(&store).unwrap_err();
        assert!(matches!(err, ChartError::Render(_)));
        assert!(!session.is_initialized());
        assert!(session.table().is_none());
        assert!(matches!(
            session.submit_age(2.0, AmhUnit::PmolPerL, 10.0),
            Err(ChartError::NotInitialized)
        ));
    }

    #[test]
    fn test_render_failure_restores_previous_point() {
        let store = synthetic_store(&Band::ALL);
        let mut session = ChartSession::new(
            params(20.0),
            ChartConfig::default(),
            FlakyRenderer { fail: false },
        );
        session.initialize_from_store(&store).unwrap();
        session.submit_age(3.0, AmhUnit::PmolPerL, 7.0).unwrap();
        let before = session.table().unwrap().clone();

        session.renderer.fail = true;
        let err = session.submit_age(2.0, AmhUnit::PmolPerL, 10.0).unwrap_err();
        assert!(matches!(err, ChartError::Render(_)));
        assert_eq!(session.table().unwrap(), &before);
        assert_eq!(session.table().unwrap().patient_rows(), vec![7]);
        assert_eq!(session.last_observation().unwrap().row, 7);

        session.renderer.fail = false;
        session.submit_age(2.0, AmhUnit::PmolPerL, 10.0).unwrap();
        assert_eq!(session.table().unwrap().patient_rows(), vec![10]);
    }

    #[test]
    fn test_invalid_params_block_initialization() {
        let store = synthetic_store(&Band::ALL);
        let mut session = ChartSession::new(params(75.0), ChartConfig::default(), NullRenderer);
        assert!(session.initialize_from_store(&store).is_err());
        assert!(!session.is_initialized());
    }
}
