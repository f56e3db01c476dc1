use std::fs;
use std::path::Path;

use amh_chart::{
    AgeInput, AmhUnit, Band, ChartConfig, ChartError, ChartParams, ChartSession, DirSource,
    InterpolationPolicy, NullRenderer, Resolution,
};
use chrono::NaiveDate;
use tempfile::TempDir;

fn write_band(dir: &Path, band: Band, body: &str) {
    fs::write(dir.join(band.file_name()), body).unwrap();
}

fn write_reference_data(dir: &Path) {
    let bodies = [
        (Band::P10, r#"[{"x": 20, "y": 10.0}, {"x": 30, "y": 6.0}, {"x": 45, "y": 0.5}]"#),
        (Band::P25, r#"[{"x": 20, "y": 18.0}, {"x": 30, "y": 12.0}, {"x": 45, "y": 1.0}]"#),
        (Band::P50, r#"[{"x": 30, "y": 20.0}, {"x": 20, "y": 28.0}, {"x": 45, "y": 2.0}]"#),
        (Band::P75, r#"[{"x": 20, "y": 40.0}, {"x": 30, "y": 31.0}, {"x": 45, "y": 4.0}]"#),
        (Band::P90, r#"[{"x": 20, "y": 55.0}, {"x": 30, "y": 44.0}, {"x": 45, "y": 7.5}]"#),
    ];
    for (band, body) in bodies {
        write_band(dir, band, body);
    }
}

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 1, 15).unwrap()
}

#[test]
fn loads_directory_and_places_patient_point() {
    let tmp = TempDir::new().unwrap();
    write_reference_data(tmp.path());

    let mut session =
        ChartSession::new(ChartParams::default(), ChartConfig::default(), NullRenderer);
    session.initialize(&DirSource::new(tmp.path())).unwrap();

    let table = session.table().unwrap();
    assert_eq!(table.len(), 51);
    assert_eq!(table.rows()[25].band(Band::P50), Some(24.0));
    // Flat beyond the sampled range.
    assert_eq!(table.rows()[50].band(Band::P90), Some(7.5));
    assert_eq!(table.rows()[3].band(Band::P10), Some(10.0));

    let obs = session
        .submit(2.8, AmhUnit::NgPerMl, &AgeInput::Direct("36.4".into()), today())
        .unwrap();
    assert_eq!(obs.row, 36);
    assert!((obs.value_pmol_l - 19.992).abs() < 1e-9);

    session
        .submit(
            21.0,
            AmhUnit::PmolPerL,
            &AgeInput::BirthDate(NaiveDate::from_ymd_opt(1992, 1, 15)),
            today(),
        )
        .unwrap();
    let table = session.table().unwrap();
    assert_eq!(table.patient_rows(), vec![33]);
    assert_eq!(table.rows()[33].patient, Some(21.0));
}

#[test]
fn missing_and_malformed_files_fail_the_whole_load() {
    let tmp = TempDir::new().unwrap();
    write_reference_data(tmp.path());
    fs::remove_file(tmp.path().join(Band::P25.file_name())).unwrap();
    write_band(tmp.path(), Band::P75, "not json");

    let mut session =
        ChartSession::new(ChartParams::default(), ChartConfig::default(), NullRenderer);
    let err = session.initialize(&DirSource::new(tmp.path())).unwrap_err();
    match &err {
        ChartError::DataLoad(failures) => {
            let bands: Vec<Band> = failures.iter().map(|f| f.band).collect();
            assert_eq!(bands, vec![Band::P25, Band::P75]);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(!session.is_initialized());
    assert!(session.table().is_none());

    let err = session
        .submit(3.0, AmhUnit::PmolPerL, &AgeInput::Direct("30".into()), today())
        .unwrap_err();
    assert!(matches!(err, ChartError::NotInitialized));
}

#[test]
fn dense_grid_leaves_uncovered_ages_empty() {
    let tmp = TempDir::new().unwrap();
    write_reference_data(tmp.path());

    let params = ChartParams {
        resolution: Resolution::Fine,
        max_age: 50.0,
        policy: InterpolationPolicy::DenseGrid,
        ..ChartParams::default()
    };
    let mut session = ChartSession::new(params, ChartConfig::default(), NullRenderer);
    session.initialize(&DirSource::new(tmp.path())).unwrap();

    let table = session.table().unwrap();
    assert_eq!(table.len(), 101);
    let row = table.row_index_for_age(19.0).unwrap();
    assert_eq!(table.rows()[row].band(Band::P50), None);
    let row = table.row_index_for_age(25.0).unwrap();
    assert_eq!(table.rows()[row].band(Band::P50), Some(24.0));
    let row = table.row_index_for_age(25.5).unwrap();
    assert!((table.rows()[row].band(Band::P50).unwrap() - 23.6).abs() < 1e-9);
    let row = table.row_index_for_age(46.0).unwrap();
    assert_eq!(table.rows()[row].band(Band::P90), None);
}
