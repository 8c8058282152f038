use clap::Parser;
use console::style;
use simple_logger::SimpleLogger;

use md_task_sync::run;
use md_task_sync::Error;
use md_task_sync::Opts;

fn main() -> Result<(), Error> {
    let opts = Opts::parse();
    SimpleLogger::new()
        .with_level(opts.loglevel().to_level_filter())
        .init()
        .expect("could not set up logger");
    log::trace!("opts: {opts:#?}");
    if let Err(error) = run(&opts) {
        let label = style("Error:").bold().red();
        eprintln!("{label} {error}");
        std::process::exit(1);
    };
    Ok(())
}
