use std::process;

use env_logger::Env;
use log::{info, warn};
use mesi_lib::bus::DEFAULT_CORE_NUM;
use mesi_lib::error::{SimulatorError, SimulatorResult};
use mesi_lib::processor::CorePolicy;
use mesi_lib::run_wrapper::{run_trace, RunStats};

fn main() {
    env_logger::init_from_env(Env::default().filter_or("MESI_LOG_LEVEL", "warn"));
    if let Err(e) = run_eval() {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

/// Every rotation of the default priorities: [0,1,2,3], [1,2,3,0], ...
fn rotations() -> Vec<Vec<i32>> {
    let base: Vec<i32> = (0..DEFAULT_CORE_NUM as i32).collect();
    (0..DEFAULT_CORE_NUM)
        .map(|shift| {
            let mut priorities = base.clone();
            priorities.rotate_left(shift);
            priorities
        })
        .collect()
}

fn priority_label(priorities: &[i32]) -> String {
    priorities
        .iter()
        .map(|p| p.to_string())
        .collect::<Vec<_>>()
        .join("-")
}

fn run_eval() -> SimulatorResult<()> {
    let mut policy = CorePolicy::default();
    let mut trace_path = None;
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "-omp" => policy.omp = true,
            "-r" => policy.reduction = true,
            _ => trace_path = Some(arg),
        }
    }
    let trace_path = trace_path.ok_or_else(|| {
        SimulatorError::ConfigError("You should specify exactly one trace file".into())
    })?;
    let trace_base_name = trace_path.split('/').last().unwrap_or("trace").to_string();

    std::fs::create_dir_all("eval")?;
    let output_path = format!("eval/priority_eval_{}.csv", trace_base_name);
    let mut writer = csv::Writer::from_path(&output_path)?;
    writer.write_record([
        "Priorities",
        "Core",
        "Read hits",
        "Read misses",
        "Write hits",
        "Write misses",
        "Miss rate",
        "Cycles",
    ])?;

    let mut results: Vec<(Vec<i32>, RunStats)> = Vec::new();
    for priorities in rotations() {
        let label = priority_label(&priorities);
        info!("Running {} with priorities {}", trace_path, label);
        match run_trace(&trace_path, priorities.clone(), policy) {
            Ok(stats) => {
                for (id, history) in stats.histories.iter().enumerate() {
                    writer.write_record([
                        label.as_str(),
                        &id.to_string(),
                        &history.read_hits.to_string(),
                        &history.read_misses.to_string(),
                        &history.write_hits.to_string(),
                        &history.write_misses.to_string(),
                        &format!("{:.3}", history.miss_rate()),
                        &stats.total_cycles().to_string(),
                    ])?;
                }
                results.push((priorities, stats));
            }
            Err(e) => {
                warn!("Failed to run with priorities {}: {}", label, e);
                writer.write_record([label.as_str(), "Error", "", "", "", "", "", ""])?;
            }
        }
    }
    writer.flush()?;

    plot_miss_rates(&trace_base_name, &results)
}

/// One line per core: miss rate against the priority rotation
fn plot_miss_rates(
    trace_base_name: &str,
    results: &[(Vec<i32>, RunStats)],
) -> SimulatorResult<()> {
    use plotters::prelude::*;

    let plot_error = |e: &dyn std::fmt::Display| {
        SimulatorError::IoError(std::io::Error::new(
            std::io::ErrorKind::Other,
            format!("Failed to plot: {}", e),
        ))
    };

    let plot_title = format!("Miss rate per priority rotation: {}", trace_base_name);
    let output_path = format!("eval/priority_eval_{}.svg", trace_base_name);
    let root = SVGBackend::new(output_path.as_str(), (800, 600)).into_drawing_area();
    root.fill(&WHITE).map_err(|e| plot_error(&e))?;

    let mut ctx = ChartBuilder::on(&root)
        .caption(plot_title.as_str(), ("sans-serif", 32).into_font())
        .margin(5)
        .x_label_area_size(40)
        .y_label_area_size(40)
        .build_cartesian_2d(0..DEFAULT_CORE_NUM as i32, 0.0..1.0)
        .map_err(|e| plot_error(&e))?;
    ctx.configure_mesh()
        .x_desc("Rotation (core with highest precedence)")
        .y_desc("Miss rate")
        .draw()
        .map_err(|e| plot_error(&e))?;

    for id in 0..DEFAULT_CORE_NUM {
        let series = results.iter().map(|(priorities, stats)| {
            let top = priorities.iter().position(|p| *p == 0).unwrap_or(0);
            (top as i32, stats.histories[id].miss_rate())
        });
        let color = Palette99::pick(id).to_rgba();
        ctx.draw_series(LineSeries::new(series, color))
            .map_err(|e| plot_error(&e))?
            .label(format!("P{}", id))
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], color));
    }

    ctx.configure_series_labels()
        .background_style(&WHITE.mix(0.8))
        .border_style(&BLACK)
        .draw()
        .map_err(|e| plot_error(&e))?;
    root.present().map_err(|e| plot_error(&e))?;

    info!("Wrote eval/priority_eval_{}.{{csv,svg}}", trace_base_name);
    Ok(())
}
