mod render;

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use amh_chart::age::parse_birth_date;
use amh_chart::{
    parse_value, AgeInput, AmhUnit, ChartConfig, ChartParams, ChartRenderer, ChartSession,
    ChartTable, DirSource, InterpolationPolicy, NullRenderer, Resolution, RowSnap, SampleSource,
};
use anyhow::{anyhow, Context, Result};
use chrono::{Local, NaiveDate};
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum, ValueHint};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::render::{ChartKind, PlotRenderer};

#[derive(Parser, Debug)]
#[command(author, version, about = "AMH percentile reference chart CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write the interpolated chart table (and patient point) as CSV
    Table(TableArgs),
    /// Render the percentile chart with the patient point to PNG/SVG
    Plot(PlotArgs),
}

#[derive(Args, Debug)]
struct ChartArgs {
    /// Directory (or base URL with the `http` feature) holding <N>th-percentile.json files
    #[arg(long, default_value = "data", value_hint = ValueHint::DirPath)]
    data: String,

    /// Half-year rows instead of whole years
    #[arg(long, action = ArgAction::SetTrue)]
    fine: bool,

    /// Inclusive upper age of the table
    #[arg(long, default_value_t = 50.0)]
    max_age: f64,

    /// Interpolation edge policy
    #[arg(long, value_enum, default_value_t = PolicyOpt::Continuous)]
    policy: PolicyOpt,

    /// How a patient age maps onto a row
    #[arg(long, value_enum, default_value_t = SnapOpt::Nearest)]
    snap: SnapOpt,

    /// Verbose logging
    #[arg(long, action = ArgAction::SetTrue)]
    verbose: bool,
}

#[derive(Args, Debug)]
struct PatientArgs {
    /// AMH level of the patient
    #[arg(long)]
    value: Option<String>,

    /// Unit of --value (pmol/L or ng/ml)
    #[arg(long, default_value = "pmol/L")]
    unit: String,

    /// Patient age in years (0-50)
    #[arg(long, conflicts_with = "birth_date")]
    age: Option<String>,

    /// Patient birth date (YYYY-MM-DD)
    #[arg(long)]
    birth_date: Option<String>,

    /// Reference date for --birth-date (defaults to today)
    #[arg(long)]
    today: Option<NaiveDate>,
}

#[derive(Args, Debug)]
struct TableArgs {
    #[command(flatten)]
    chart: ChartArgs,

    #[command(flatten)]
    patient: PatientArgs,

    /// Output CSV path (`-` for stdout)
    #[arg(short, long, default_value = "-", value_hint = ValueHint::FilePath)]
    output: PathBuf,
}

#[derive(Args, Debug)]
struct PlotArgs {
    #[command(flatten)]
    chart: ChartArgs,

    #[command(flatten)]
    patient: PatientArgs,

    /// Output PNG figure path
    #[arg(long, default_value = "amh_chart.png", value_hint = ValueHint::FilePath)]
    png: PathBuf,

    /// Output SVG figure path
    #[arg(long, value_hint = ValueHint::FilePath)]
    svg: Option<PathBuf>,

    /// JSON chart configuration override
    #[arg(long, value_hint = ValueHint::FilePath)]
    chart_config: Option<PathBuf>,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum PolicyOpt {
    Continuous,
    DenseGrid,
}

impl From<PolicyOpt> for InterpolationPolicy {
    fn from(value: PolicyOpt) -> Self {
        match value {
            PolicyOpt::Continuous => InterpolationPolicy::Continuous,
            PolicyOpt::DenseGrid => InterpolationPolicy::DenseGrid,
        }
    }
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum SnapOpt {
    Nearest,
    Floor,
}

impl From<SnapOpt> for RowSnap {
    fn from(value: SnapOpt) -> Self {
        match value {
            SnapOpt::Nearest => RowSnap::Nearest,
            SnapOpt::Floor => RowSnap::Floor,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let verbose = match &cli.command {
        Command::Table(args) => args.chart.verbose,
        Command::Plot(args) => args.chart.verbose,
    };
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();

    match cli.command {
        Command::Table(args) => handle_table(args),
        Command::Plot(args) => handle_plot(args),
    }
}

fn handle_table(args: TableArgs) -> Result<()> {
    let mut session = ChartSession::new(
        chart_params(&args.chart),
        ChartConfig::default(),
        NullRenderer,
    );
    initialize(&mut session, &args.chart.data)?;
    apply_patient(&mut session, &args.patient)?;

    let table = session.table().ok_or_else(|| anyhow!("chart was not initialized"))?;
    if args.output.as_os_str() == "-" {
        let stdout = io::stdout();
        let mut writer = csv::Writer::from_writer(stdout.lock());
        write_table_rows(table, &mut writer)?;
    } else {
        let file = File::create(&args.output)
            .with_context(|| format!("failed to create {}", args.output.display()))?;
        let mut writer = csv::Writer::from_writer(file);
        write_table_rows(table, &mut writer)?;
        info!("Wrote chart table: {}", args.output.display());
    }
    Ok(())
}

fn handle_plot(args: PlotArgs) -> Result<()> {
    let config = match args.chart_config.as_ref() {
        Some(path) => load_chart_config(path)?,
        None => ChartConfig::default(),
    };
    let mut targets = vec![(args.png.clone(), ChartKind::Png)];
    if let Some(svg) = args.svg.clone() {
        targets.push((svg, ChartKind::Svg));
    }

    let mut session = ChartSession::new(
        chart_params(&args.chart),
        config,
        PlotRenderer::new(targets),
    );
    initialize(&mut session, &args.chart.data)?;
    apply_patient(&mut session, &args.patient)?;

    for path in session.renderer().written() {
        info!("Wrote plot: {}", path.display());
    }
    Ok(())
}

fn chart_params(args: &ChartArgs) -> ChartParams {
    ChartParams {
        resolution: if args.fine {
            Resolution::Fine
        } else {
            Resolution::Coarse
        },
        max_age: args.max_age,
        policy: args.policy.into(),
        snap: args.snap.into(),
    }
}

fn initialize<R: ChartRenderer>(session: &mut ChartSession<R>, data: &str) -> Result<()> {
    let source = open_source(data)?;
    session
        .initialize(source.as_ref())
        .with_context(|| format!("failed to build chart from {}", data))
}

fn open_source(data: &str) -> Result<Box<dyn SampleSource>> {
    if data.starts_with("http://") || data.starts_with("https://") {
        #[cfg(feature = "http")]
        {
            return Ok(Box::new(amh_chart::HttpSource::new(data)?));
        }
        #[cfg(not(feature = "http"))]
        {
            return Err(anyhow!(
                "{} looks like a URL but amh-chart was built without the `http` feature",
                data
            ));
        }
    }
    let root = PathBuf::from(data);
    if !root.is_dir() {
        return Err(anyhow!("data directory {} does not exist", root.display()));
    }
    Ok(Box::new(DirSource::new(root)))
}

fn apply_patient<R: ChartRenderer>(
    session: &mut ChartSession<R>,
    args: &PatientArgs,
) -> Result<()> {
    let Some(raw_value) = args.value.as_deref() else {
        if args.age.is_some() || args.birth_date.is_some() {
            warn!("Patient age given without --value; no patient point drawn");
        }
        return Ok(());
    };
    let value = parse_value(raw_value)?;
    let unit: AmhUnit = args.unit.parse()?;
    let age_input = match (&args.age, &args.birth_date) {
        (Some(age), _) => AgeInput::Direct(age.clone()),
        (None, Some(date)) => AgeInput::BirthDate(parse_birth_date(date)?),
        (None, None) => AgeInput::Direct(String::new()),
    };
    let today = args.today.unwrap_or_else(|| Local::now().date_naive());

    let observation = session.submit(value, unit, &age_input, today)?;
    info!(
        "Patient point: age {:.2} (row {}), AMH {:.2} pmol/L",
        observation.age, observation.row_age, observation.value_pmol_l
    );
    Ok(())
}

fn load_chart_config(path: &Path) -> Result<ChartConfig> {
    let text =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    let config = ChartConfig::from_json(&text)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    Ok(config)
}

fn write_table_rows<W: Write>(table: &ChartTable, writer: &mut csv::Writer<W>) -> Result<()> {
    let mut header = ChartTable::column_labels();
    header.push("Style".to_string());
    writer.write_record(&header)?;

    for row in table.rows() {
        let mut record = Vec::with_capacity(header.len());
        record.push(format!("{:.3}", row.age));
        for value in row.bands.iter().chain(std::iter::once(&row.patient)) {
            record.push(
                value
                    .map(|v| format!("{:.3}", v))
                    .unwrap_or_else(|| "".into()),
            );
        }
        record.push(row.style.clone().unwrap_or_default());
        writer.write_record(&record)?;
    }

    writer.flush()?;
    Ok(())
}
