use env_logger::Env;
use log::info;
use mesi_lib::bus::DEFAULT_CORE_NUM;
use mesi_lib::generator;
use mesi_lib::processor::CorePolicy;
use mesi_lib::run_wrapper;
use std::env;
use std::error::Error;
use std::path::Path;

fn parse_priorities(arg: &str) -> Result<Vec<i32>, Box<dyn Error>> {
    arg.split(',')
        .map(|p| {
            p.trim()
                .parse::<i32>()
                .map_err(|_| format!("Invalid priority '{}' after -p", p).into())
        })
        .collect()
}

fn main() -> Result<(), Box<dyn Error>> {
    let mut args = env::args().skip(1);
    let mut policy = CorePolicy::default();
    let mut priorities: Vec<i32> = (0..DEFAULT_CORE_NUM as i32).collect();
    let mut verbose = false;
    let mut trace_file = None;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-omp" => policy.omp = true,
            "-r" => policy.reduction = true,
            "-v" => verbose = true,
            "-p" => {
                let list = args
                    .next()
                    .ok_or("You should specify a priority list after -p")?;
                priorities = parse_priorities(&list)?;
            }
            _ if arg.starts_with('-') => {
                return Err(format!("Unknown parameter: {}", arg).into())
            }
            _ => trace_file = Some(arg),
        }
    }
    let trace_file = trace_file
        .ok_or("Usage: sim [-omp] [-r] [-p P0,P1,P2,P3] [-v] <trace-file>")?;
    if priorities.len() != DEFAULT_CORE_NUM {
        return Err(format!(
            "-p needs {} priorities, got {}",
            DEFAULT_CORE_NUM,
            priorities.len()
        )
        .into());
    }

    let default_level = if verbose { "trace" } else { "info" };
    let env = Env::default()
        .filter_or("MESI_LOG_LEVEL", default_level)
        .write_style_or("MESI_LOG_STYLE", "auto");
    env_logger::init_from_env(env);

    if !Path::new(&trace_file).exists() {
        info!("{} does not exist, generating a trace", trace_file);
        generator::write_omp_trace(
            &trace_file,
            DEFAULT_CORE_NUM,
            policy.reduction,
            None,
        )?;
    }

    let stats = run_wrapper::run_trace(&trace_file, priorities, policy)?;

    info!(
        "[HISTORY] {} cycles ({} from trace, {} draining)",
        stats.total_cycles(),
        stats.trace_cycles,
        stats.drain_cycles
    );
    for (id, history) in stats.histories.iter().enumerate() {
        info!(
            "[HISTORY] P{}: read hits {}, read misses {}, \
             write hits {}, write misses {}, miss rate {:.2}",
            id,
            history.read_hits,
            history.read_misses,
            history.write_hits,
            history.write_misses,
            history.miss_rate()
        );
    }
    if policy.omp && policy.reduction {
        info!("[HISTORY] public sum = {}", stats.public_sum);
    }

    Ok(())
}
