//! `stmap`: command-line interface for the space-time placement engine.
//!
//! ```text
//! USAGE:
//!   stmap info <config>                     Print the hardware hierarchy
//!   stmap demo <config> [--split-y N] ...   Split, place and evaluate a conv layer
//! ```

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use stmap_chip::{HardwareConfig, MLCoord, PiIndex};
use stmap_engine::{ActionModel, CommEvaluator, MemoryEvaluator, PipelineExecutor, Scheduler};
use stmap_graph::{
    BiasType, ComputeBlock, ComputeOp, KernelWindow, Precision, Shape, SplitModes, SplitVector,
    StorageKind, TaskGraph, TaskId,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "stmap", about = "Space-time placement for tiled neuromorphic accelerators", version)]
struct Cli {
    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Print the hierarchy described by a hardware configuration.
    Info {
        /// Hardware configuration (TOML).
        config: PathBuf,
    },
    /// Split a convolution layer, place it and report memory, transfer
    /// times and the firing order.
    Demo {
        /// Hardware configuration (TOML).
        config: PathBuf,
        /// Parts along the output rows.
        #[arg(long, default_value_t = 2)]
        split_y: usize,
        /// Parts along the output channels.
        #[arg(long, default_value_t = 2)]
        split_f: usize,
        /// Parts along the input channels (adds an accumulation block).
        #[arg(long, default_value_t = 1)]
        split_r: usize,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Cmd::Info { config } => cmd_info(&config)?,
        Cmd::Demo {
            config,
            split_y,
            split_f,
            split_r,
        } => cmd_demo(&config, SplitVector::new(split_y, 1, split_f, split_r))?,
    }

    Ok(())
}

fn load(path: &Path) -> Result<HardwareConfig> {
    HardwareConfig::from_file(path).with_context(|| format!("loading {}", path.display()))
}

fn cmd_info(path: &Path) -> Result<()> {
    let hw = load(path)?;

    println!("Hardware     : {}", hw.name);
    for (i, level) in hw.space.iter().enumerate() {
        let dims: Vec<String> = level.dims.iter().map(ToString::to_string).collect();
        println!(
            "Level {i}      : {:<6} {:<8} {:>6.1} B/cycle per link",
            level.name,
            dims.join("×"),
            level.bandwidth
        );
    }
    println!("Time         : {} step(s) × {} phase(s)", hw.time.steps, hw.time.phases);
    println!(
        "Core memory  : {} bytes ({}-byte aligned)",
        hw.core.memory_bytes, hw.core.alignment
    );
    println!(
        "Columns      : {} ({} functional, {} disabled)",
        hw.column_count(),
        hw.column_count().saturating_sub(hw.core.disabled.len()),
        hw.core.disabled.len()
    );
    for core in &hw.core.disabled {
        println!("  disabled   : {core}");
    }
    println!("Units/point  : {}", PiIndex::ALL.map(|p| p.to_string()).join(", "));

    Ok(())
}

/// Input 18x18x16 -> Sic -> CC 3x3 (f=32, + Sw, Sb) -> Output 16x16x32
fn conv_layer() -> Result<(TaskGraph, TaskId, TaskId, TaskId)> {
    let (iy, ix, r, f) = (18, 18, 16, 32);
    let mut graph = TaskGraph::new();
    let input = graph.add_storage(StorageKind::Input, Shape::yxf(iy, ix, r), Precision::Int8)?;
    let act = graph.add_storage(StorageKind::Sic, Shape::yxf(iy, ix, r), Precision::Int8)?;
    let weight_shape = Shape {
        f,
        r,
        ky: 3,
        kx: 3,
        ..Shape::ZERO
    };
    let weight = graph.add_storage(StorageKind::Sw, weight_shape, Precision::Int8)?;
    let bias = graph.add_storage(StorageKind::Sb, Shape::vector(f), Precision::Int32)?;
    let conv = graph.add_compute(ComputeBlock::new(
        ComputeOp::Cc {
            window: KernelWindow::new(1, 0),
            bit_shift: 6,
        },
        Shape {
            y: iy - 2,
            x: ix - 2,
            f,
            r,
            ky: 3,
            kx: 3,
            iy,
            ix,
        },
        Precision::Int8,
        BiasType::Vector,
    ))?;
    let output = graph.add_storage(StorageKind::Output, Shape::yxf(iy - 2, ix - 2, f), Precision::Int8)?;

    graph.connect_whole(input, act, 0)?;
    graph.connect_whole(act, conv, 0)?;
    graph.connect_whole(weight, conv, 1)?;
    graph.connect_whole(bias, conv, 2)?;
    graph.connect_whole(conv, output, 0)?;
    graph.validate()?;
    Ok((graph, input, conv, output))
}

fn cmd_demo(path: &Path, vector: SplitVector) -> Result<()> {
    let hw = load(path)?;
    info!(hardware = %hw.name, %vector, "demo layer");
    let (graph, input, conv, output) = conv_layer()?;
    let mut model = ActionModel::new(graph, &hw);

    let new = model.split_task(conv, vector, SplitModes::default())?;
    model.graph().validate()?;
    let computes: Vec<TaskId> = new
        .iter()
        .copied()
        .filter(|id| model.graph().block(*id).is_some_and(|b| b.is_compute()))
        .collect();
    println!(
        "Split {vector}: {} new block(s), {} computation(s)",
        new.len(),
        computes.len()
    );

    let columns: Vec<MLCoord> = hw.columns().filter(|c| !hw.is_disabled(c)).collect();
    let Some(first) = columns.first() else {
        bail!("no functional core in {}", hw.name);
    };
    let slots = columns.len() * hw.points_per_column();
    if computes.len() > slots {
        bail!("{} computation(s) do not fit in {slots} point(s)", computes.len());
    }

    // Round-robin over columns, then phases, then steps.
    let mut last = first.at_time(0, 0, PiIndex::Memory);
    for (i, task) in computes.iter().enumerate() {
        let column = &columns[i % columns.len()];
        let round = i / columns.len();
        let (step, phase) = (round / hw.time.phases, round % hw.time.phases);
        let coord = column.at_time(step, phase, PiIndex::Axon);
        model.put_group_in(&coord, *task)?;
        last = coord.with_pi(hw.space_depth(), PiIndex::Memory);
    }
    model.put_in(&first.at_time(0, 0, PiIndex::Memory), input)?;
    if model.put_in(&last, output).is_err() {
        model.put_in(&first.at_time(0, 0, PiIndex::Memory), output)?;
    }
    let routed = model.route_placed_edges()?;
    model.check_consistency()?;
    println!(
        "Placed {} task(s), routed {routed} edge(s)",
        model.context().placed_count()
    );

    println!();
    println!("Memory (peak bytes per column)");
    for report in MemoryEvaluator::new(model.graph(), model.matrix()).evaluate_occupied()? {
        let flag = if report.exceeds_capacity() { "  OVER" } else { "" };
        println!("  {:<16} {:>8} / {}{flag}", report.column.to_string(), report.peak, report.capacity);
    }

    let mut comm = CommEvaluator::from_placement(&model)?;
    let done = comm.run_to_completion();
    let makespan = done.iter().map(|(_, t)| *t).fold(0.0, f64::max);
    println!();
    println!("Transfers    : {} complete, last at {makespan:.1} cycles", done.len());

    let fired = Scheduler::new(&model, PipelineExecutor::new()).run()?;
    println!("Schedule     : {} task(s) fired", fired.len());
    let order: Vec<String> = fired.iter().map(ToString::to_string).collect();
    println!("  {}", order.join(" "));

    Ok(())
}
