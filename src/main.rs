use log::{ info, warn };

use std::env;
use std::process;
use std::sync::atomic::Ordering;

use lpr_driver::{ cli, dispatch, load_engine, Session };
use lpr_driver::report::Reporter;


fn main() {
    let options = match cli::parse(env::args_os()) {
        Ok(options) => options,
        Err(e) if cli::is_informational(&e) => {
            let _ = e.print();
            process::exit(0);
        }
        Err(e) => {
            Reporter::stdio().error(&cli::cli_error(&e));
            process::exit(1);
        }
    };

    let level = if options.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let mut reporter = Reporter::stdio();
    let engine = match load_engine(&options.engine) {
        Ok(engine) => engine,
        Err(e) => {
            reporter.error(&e);
            process::exit(1);
        }
    };
    info!("{} ready, country {}, top {}", engine.version(), options.engine.country, options.engine.topn);

    let mut session = Session::new(engine, options.session.clone(), reporter);
    let active = session.active_flag();
    if let Err(err) = ctrlc::set_handler(move || {
        active.store(false, Ordering::SeqCst);
    }) {
        warn!("Failed to install Ctrl+C handler: {err}");
    }
    session.prepare();

    let status = match dispatch::run(&mut session, &options.inputs) {
        Ok(()) => 0,
        Err(e) => {
            session.report_error(&e);
            1
        }
    };
    process::exit(status);
}
