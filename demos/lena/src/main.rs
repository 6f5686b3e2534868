use std::path::PathBuf;

use cellflow::{
    core::{
        backend::Backend,
        layouts,
        report::AggregateReport,
        run::{run_valid, sweep},
        spec::{RngConfig, ScenarioSpec},
        traffic::TrafficClass,
        units::Nanosecs,
    },
    impls::{IdealBackend, Ns3Backend},
    utils,
};
use clap::{Parser, ValueEnum};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Scenario file in JSON or Dhall format. Overrides the layout options
    #[arg(long)]
    spec: Option<PathBuf>,

    /// Scenario shape
    #[arg(long, value_enum, default_value_t = Layout::MultiCell)]
    layout: Layout,

    /// Number of eNodeB + UE pairs
    #[arg(long = "numberOfNodes", default_value_t = 1)]
    number_of_nodes: usize,

    /// Radius of the disc UEs are placed on [m]
    #[arg(long, default_value_t = 50.0)]
    radius: f64,

    /// Distance between eNodeBs [m]
    #[arg(long, default_value_t = 60.0)]
    distance: f64,

    /// Total duration of the simulation [s]
    #[arg(long = "simTime")]
    sim_time: Option<f64>,

    /// Inter packet interval [ms]
    #[arg(long = "interPacketInterval", default_value_t = 100.0)]
    inter_packet_interval: f64,

    /// Random seed
    #[arg(long)]
    seed: Option<u64>,

    /// Run index selecting the random stream
    #[arg(long)]
    run: Option<u64>,

    /// Sweep over these run indices instead of a single run
    #[arg(long, value_delimiter = ',', conflicts_with = "run")]
    runs: Vec<u64>,

    /// Where to write the JSON report (a directory when sweeping)
    #[arg(long)]
    report: Option<PathBuf>,

    /// Where to write the flow monitor's native dump
    #[arg(long)]
    monitor: Option<PathBuf>,

    /// Simulation backend
    #[arg(long, value_enum, default_value_t = BackendKind::Ideal)]
    backend: BackendKind,

    /// The ns-3 source tree
    #[arg(long, default_value = "backends/ns-3-dev")]
    ns3_dir: PathBuf,

    /// Where ns-3 configs and data are written
    #[arg(long, default_value = "data")]
    data_dir: PathBuf,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Layout {
    MultiCell,
    TwoCell,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum BackendKind {
    Ideal,
    Ns3,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();
    let spec = scenario(&args)?;
    match args.backend {
        BackendKind::Ideal => execute(spec, &args, |_| IdealBackend::default()),
        BackendKind::Ns3 => execute(spec, &args, |run| {
            Ns3Backend::builder()
                .ns3_dir(args.ns3_dir.clone())
                .data_dir(args.data_dir.join(format!("run-{run}")))
                .build()
        }),
    }
}

impl Args {
    fn rng(&self) -> RngConfig {
        let default = RngConfig::default();
        RngConfig {
            seed: self.seed.unwrap_or(default.seed),
            run: self.run.unwrap_or(default.run),
        }
    }
}

fn scenario(args: &Args) -> anyhow::Result<ScenarioSpec> {
    let mut spec = match &args.spec {
        Some(path) => utils::read_spec(path)?,
        None => {
            let mut spec = match args.layout {
                Layout::MultiCell => {
                    layouts::multi_cell(args.number_of_nodes, args.distance, args.radius)
                }
                Layout::TwoCell => layouts::two_cell(args.radius),
            };
            spec.traffic.interval = Nanosecs::from_millis_f64(args.inter_packet_interval);
            spec
        }
    };
    if let Some(secs) = args.sim_time {
        spec.sim_time = Nanosecs::from_secs_f64(secs);
    }
    if args.seed.is_some() || args.run.is_some() || args.spec.is_none() {
        spec.rng = args.rng();
    }
    if args.runs.is_empty() {
        spec.output.report = args.report.clone().or(spec.output.report);
    }
    spec.output.monitor = args.monitor.clone().or(spec.output.monitor);
    Ok(spec)
}

fn execute<B, F>(spec: ScenarioSpec, args: &Args, make_backend: F) -> anyhow::Result<()>
where
    B: Backend,
    F: Fn(u64) -> B + Sync,
{
    let spec = spec.validate()?;
    if args.runs.is_empty() {
        let mut backend = make_backend(spec.rng().run);
        let report = run_valid(spec, &mut backend)?;
        summarize(&report);
    } else {
        let reports = sweep(&spec, &args.runs, make_backend)?;
        for (run, report) in &reports {
            println!("run {run}");
            summarize(report);
        }
        if let Some(dir) = &args.report {
            let paths = utils::write_reports(dir, &reports)?;
            log::info!("wrote {} reports to {}", paths.len(), dir.display());
        }
    }
    Ok(())
}

fn summarize(report: &AggregateReport) {
    for entry in report.entries() {
        let class = entry
            .class
            .map_or_else(|| "unclassified".to_owned(), |c| format!("{c:?}"));
        let throughput = entry
            .throughput
            .kbps()
            .map_or_else(|| "no traffic".to_owned(), |kbps| format!("{kbps:.3} Kbps"));
        println!(
            "flow {} ({}) {class}: {}/{} packets, {throughput}",
            entry.flow, entry.five_tuple, entry.rx_packets, entry.tx_packets
        );
    }
    for class in TrafficClass::ALL {
        if let Some(totals) = report.class_totals(class) {
            println!(
                "{class:?}: {} flows, {} of {} bytes received",
                totals.nr_flows, totals.rx_bytes, totals.tx_bytes
            );
        }
    }
    for warning in report.warnings() {
        println!("warning: {warning}");
    }
}
