//! CLI entry point for rust-vna
//!
//! Drives the measurement core with the simulated analyzer:
//! - `sweep`: run sweeps against a simulated device and print a trace view
//! - `calibrate`: measure the standards, apply a calibration and report the
//!   residual error against the true device
//!
//! # Usage
//!
//! ```bash
//! rust-vna sweep --trace s21 --view magnitude --peaks 3
//! rust-vna calibrate --kind full-solt --noise 0.001
//! ```

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use rust_vna::calibration::{CalibrationMeasurement, CalibrationType};
use rust_vna::config::{Settings, DEFAULT_CONFIG_PATH};
use rust_vna::data::trace::TraceId;
use rust_vna::data::transforms::ViewType;
use rust_vna::hardware::{Dut, MockVna};
use rust_vna::logging;
use rust_vna::measurement_types::LiveParameter;
use rust_vna::vna::Vna;
use serde::Serialize;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(name = "rust-vna")]
#[command(about = "Vector network analyzer measurement core with a simulated instrument", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
struct MockArgs {
    /// Points per sweep (overrides the configuration)
    #[arg(long)]
    points: Option<u32>,

    /// Sweeps averaged per point (overrides the configuration)
    #[arg(long)]
    averages: Option<u32>,

    /// Peak noise amplitude of the simulated receiver
    #[arg(long, default_value_t = 0.0)]
    noise: f64,

    /// Noise seed
    #[arg(long, default_value_t = 0x5EED)]
    seed: u64,
}

#[derive(Subcommand)]
enum Commands {
    /// Run sweeps and print one trace
    Sweep {
        #[command(flatten)]
        mock: MockArgs,

        /// Device under test
        #[arg(long, value_enum, default_value_t = DutArg::Resonator)]
        dut: DutArg,

        /// Number of sweeps to run
        #[arg(long, default_value_t = 1)]
        sweeps: u32,

        /// S-parameter to print
        #[arg(long, value_enum, default_value_t = ParameterArg::S11)]
        trace: ParameterArg,

        /// View to print
        #[arg(long, value_enum, default_value_t = ViewArg::Magnitude)]
        view: ViewArg,

        /// Print the frequencies of up to N peaks instead of the series
        #[arg(long)]
        peaks: Option<usize>,

        /// Output format
        #[arg(long, value_enum, default_value_t = OutputArg::Table)]
        output: OutputArg,
    },

    /// Calibrate against the simulated error model and verify the result
    Calibrate {
        #[command(flatten)]
        mock: MockArgs,

        /// Calibration to construct
        #[arg(long, value_enum, default_value_t = CalibrationArg::FullSolt)]
        kind: CalibrationArg,

        /// Also print a summary of the error-term traces
        #[arg(long)]
        error_terms: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum DutArg {
    Resonator,
    Open,
    Short,
    Load,
    Through,
}

#[derive(Clone, Copy, ValueEnum)]
enum ParameterArg {
    S11,
    S12,
    S21,
    S22,
}

impl From<ParameterArg> for LiveParameter {
    fn from(arg: ParameterArg) -> Self {
        match arg {
            ParameterArg::S11 => LiveParameter::S11,
            ParameterArg::S12 => LiveParameter::S12,
            ParameterArg::S21 => LiveParameter::S21,
            ParameterArg::S22 => LiveParameter::S22,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum ViewArg {
    Magnitude,
    Phase,
    Vswr,
    Impulse,
    Step,
    Impedance,
}

impl From<ViewArg> for ViewType {
    fn from(arg: ViewArg) -> Self {
        match arg {
            ViewArg::Magnitude => ViewType::Magnitude,
            ViewArg::Phase => ViewType::Phase,
            ViewArg::Vswr => ViewType::Vswr,
            ViewArg::Impulse => ViewType::Impulse,
            ViewArg::Step => ViewType::Step,
            ViewArg::Impedance => ViewType::Impedance,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum CalibrationArg {
    Port1Sol,
    Port2Sol,
    FullSolt,
    TransmissionNormalization,
}

impl From<CalibrationArg> for CalibrationType {
    fn from(arg: CalibrationArg) -> Self {
        match arg {
            CalibrationArg::Port1Sol => CalibrationType::Port1Sol,
            CalibrationArg::Port2Sol => CalibrationType::Port2Sol,
            CalibrationArg::FullSolt => CalibrationType::FullSolt,
            CalibrationArg::TransmissionNormalization => CalibrationType::TransmissionNormalization,
        }
    }
}

#[derive(Clone, Copy, PartialEq, ValueEnum)]
enum OutputArg {
    Table,
    Json,
}

#[derive(Serialize)]
struct SeriesOutput<'a> {
    trace: &'a str,
    view: ViewType,
    points: Vec<(f64, f64)>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings = Settings::load_from(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    logging::init_from_config(&settings).map_err(|e| anyhow!(e))?;

    match cli.command {
        Commands::Sweep {
            mock,
            dut,
            sweeps,
            trace,
            view,
            peaks,
            output,
        } => run_sweep(
            &settings,
            &mock,
            dut,
            sweeps,
            trace.into(),
            view.into(),
            peaks,
            output,
        ),
        Commands::Calibrate {
            mock,
            kind,
            error_terms,
        } => run_calibration(&settings, &mock, kind.into(), error_terms),
    }
}

fn build(settings: &Settings, args: &MockArgs) -> (Vna, MockVna) {
    let mut vna = Vna::new(settings);
    if let Some(points) = args.points {
        vna.set_points(points);
    }
    if let Some(averages) = args.averages {
        vna.set_averages(averages);
    }
    let mut mock = MockVna::with_seed(*vna.settings(), args.seed);
    mock.set_noise(args.noise);
    (vna, mock)
}

fn run_sweeps(vna: &mut Vna, mock: &mut MockVna, sweeps: u32) {
    for _ in 0..sweeps {
        // Excitation may change between sweeps
        mock.configure(*vna.settings());
        for dp in mock.sweep() {
            vna.deliver(dp);
        }
    }
}

fn live_trace(vna: &Vna, parameter: LiveParameter) -> Result<TraceId> {
    vna.traces()
        .traces()
        .find(|t| t.is_live() && t.parameter() == parameter)
        .map(|t| t.id())
        .ok_or_else(|| anyhow!("no live {parameter} trace"))
}

#[allow(clippy::too_many_arguments)]
fn run_sweep(
    settings: &Settings,
    args: &MockArgs,
    dut: DutArg,
    sweeps: u32,
    parameter: LiveParameter,
    view: ViewType,
    peaks: Option<usize>,
    output: OutputArg,
) -> Result<()> {
    let (mut vna, mut mock) = build(settings, args);
    let center = vna.settings().center();
    mock.set_dut(match dut {
        DutArg::Resonator => Dut::SeriesResonator {
            resonance: center,
            resistance: 0.2,
            reactance_slope: 5.0,
        },
        DutArg::Open => Dut::Open,
        DutArg::Short => Dut::Short,
        DutArg::Load => Dut::Load,
        DutArg::Through => Dut::Through,
    });

    let id = live_trace(&vna, parameter)?;
    if view.is_time_domain() {
        vna.add_tdr_interest(id)?;
    }
    run_sweeps(&mut vna, &mut mock, sweeps.max(1));
    info!(trace = %parameter, sweeps, "Sweeps complete");

    if let Some(max_peaks) = peaks {
        let found = vna.find_peaks(id, max_peaks, -100.0, 3.0)?;
        match output {
            OutputArg::Json => println!("{}", serde_json::to_string_pretty(&found)?),
            OutputArg::Table => {
                for freq in found {
                    println!("{:>14.0} Hz", freq);
                }
            }
        }
        return Ok(());
    }

    let points = vna.series(id, view)?;
    match output {
        OutputArg::Json => {
            let out = SeriesOutput {
                trace: parameter.as_str(),
                view,
                points,
            };
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        OutputArg::Table => {
            let x_unit = if view.is_time_domain() { "s" } else { "Hz" };
            println!("{:>16} {:>14}", x_unit, format!("{} [{}]", view, view.unit()));
            for (x, y) in points {
                println!("{:>16.6e} {:>14.4}", x, y);
            }
        }
    }
    Ok(())
}

fn standard_dut(kind: CalibrationMeasurement) -> Dut {
    match kind {
        CalibrationMeasurement::Port1Open | CalibrationMeasurement::Port2Open => Dut::Open,
        CalibrationMeasurement::Port1Short | CalibrationMeasurement::Port2Short => Dut::Short,
        CalibrationMeasurement::Port1Load | CalibrationMeasurement::Port2Load => Dut::Load,
        CalibrationMeasurement::Through => Dut::Through,
        CalibrationMeasurement::Isolation => Dut::Isolation,
    }
}

fn run_calibration(
    settings: &Settings,
    args: &MockArgs,
    kind: CalibrationType,
    error_terms: bool,
) -> Result<()> {
    let (mut vna, mut mock) = build(settings, args);
    // Both ports must be excited while measuring two-port standards
    mock.configure(*vna.settings());

    for &standard in kind.required_measurements() {
        mock.set_dut(standard_dut(standard));
        vna.start_calibration_measurement(standard);
        let mut sweeps = 0;
        while vna.calibration().measuring().is_some() {
            run_sweeps(&mut vna, &mut mock, 1);
            sweeps += 1;
            if sweeps > vna.settings().averages + 1 {
                return Err(anyhow!("measurement of {standard} did not complete"));
            }
        }
        println!("measured {:<14} ({} sweeps)", standard.as_str(), sweeps);
    }

    vna.apply_calibration(kind)?;
    println!("applied {kind}");

    let dut = Dut::SeriesResonator {
        resonance: vna.settings().center(),
        resistance: 0.2,
        reactance_slope: 5.0,
    };
    mock.set_dut(dut);
    let averages = vna.settings().averages;
    run_sweeps(&mut vna, &mut mock, averages);

    for parameter in LiveParameter::ALL {
        let id = live_trace(&vna, parameter)?;
        let trace = vna.trace(id)?;
        let index = parameter as usize;
        let residual = trace
            .samples()
            .iter()
            .map(|s| (s.value - dut.s_parameters(s.frequency)[index]).norm())
            .fold(0.0, f64::max);
        println!("{parameter}: max residual {residual:.3e}");
    }

    if error_terms {
        for id in vna.import_error_terms_as_traces() {
            let trace = vna.trace(id)?;
            let mean = trace.samples().iter().map(|s| s.magnitude()).sum::<f64>()
                / trace.len().max(1) as f64;
            println!("{:<28} mean |e| {:.4}", trace.name(), mean);
        }
    }
    Ok(())
}
