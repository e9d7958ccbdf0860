use env_logger::Env;
use mesi_lib::bus::DEFAULT_CORE_NUM;
use mesi_lib::generator::write_omp_trace;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init_from_env(Env::default().filter_or("MESI_LOG_LEVEL", "info"));

    let mut args = std::env::args().skip(1);
    let mut reduction = false;
    let mut seed = None;
    let mut output = None;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-r" => reduction = true,
            "-s" => {
                let value = args.next().ok_or("You should specify a seed after -s")?;
                seed = Some(value.parse::<u64>()?);
            }
            _ => output = Some(arg),
        }
    }
    let output = output.ok_or("Usage: trace-gen [-r] [-s seed] <out-file>")?;

    let lines = write_omp_trace(&output, DEFAULT_CORE_NUM, reduction, seed)?;
    println!("Generated {} with {} lines", output, lines);
    Ok(())
}
