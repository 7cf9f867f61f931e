use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use clap::Parser;
use serde::Serialize;

use interceptor::cli::{Cli, Command, OutputFormat, RunArgs};
use interceptor::core::Interceptor;
use interceptor::error::{ErrorKind, InterceptorError};
use interceptor::output;
use interceptor::privilege;

/// Set by the signal handler; the run loop turns it into a task stop.
static STOP_REQUESTED: AtomicBool = AtomicBool::new(false);

const POLL_INTERVAL: Duration = Duration::from_millis(100);

extern "C" fn signal_handler(_sig: libc::c_int) {
    STOP_REQUESTED.store(true, Ordering::Relaxed);
}

fn install_signal_handlers() {
    unsafe {
        libc::signal(
            libc::SIGTERM,
            signal_handler as *const () as libc::sighandler_t,
        );
        libc::signal(
            libc::SIGINT,
            signal_handler as *const () as libc::sighandler_t,
        );
    }
}

/// 1 missing privilege, 2 bad input, 3 not found, 4 anything else.
fn exit_code(err: &InterceptorError) -> i32 {
    if matches!(err, InterceptorError::SocketPermission(_)) {
        return 1;
    }
    match err.kind() {
        ErrorKind::BadInput => 2,
        ErrorKind::NotFound => 3,
        ErrorKind::Execution => 4,
    }
}

fn main() {
    env_logger::init();

    let cli = Cli::parse();
    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| run(cli)));

    match result {
        Ok(Ok(())) => std::process::exit(0),
        Ok(Err(e)) => {
            eprintln!("error: {e}");
            std::process::exit(exit_code(&e));
        }
        Err(_) => {
            eprintln!("error: fatal: unexpected panic");
            std::process::exit(4);
        }
    }
}

fn run(cli: Cli) -> Result<(), InterceptorError> {
    let format = cli.global.format;
    let mut app = Interceptor::new(cli.global.runtime_config())?;
    let mut stdout = io::stdout().lock();

    match cli.command {
        Command::Modules { category } => {
            let names = app.list_modules(category.as_deref().unwrap_or(""));
            output::write_rows(&names, format, &mut stdout)
        }
        Command::Info { module } => {
            output::write_value(&app.describe_module(&module)?, format, &mut stdout)
        }
        Command::Run(args) => run_module(&mut app, &args, format, &mut stdout),
        Command::Interfaces => output::write_rows(&app.interfaces()?, format, &mut stdout),
        Command::Hosts => output::write_rows(&app.hosts()?, format, &mut stdout),
        Command::Services => output::write_rows(&app.services()?, format, &mut stdout),
        Command::Credentials => output::write_rows(&app.credentials()?, format, &mut stdout),
        Command::Clear => {
            app.clear_data()?;
            if format == OutputFormat::Text {
                writeln!(stdout, "All data cleared.").map_err(InterceptorError::Serialization)?;
            }
            Ok(())
        }
    }
}

// ---------------------------------------------------------------------------
// Module runs
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct TaskReport {
    task: String,
    output: String,
}

/// Load and configure a module, run it as a task and follow it to the end.
///
/// Text output is streamed as it is polled; JSON output is collected into
/// one report. The first SIGINT/SIGTERM asks the task to stop.
fn run_module(
    app: &mut Interceptor,
    args: &RunArgs,
    format: OutputFormat,
    stdout: &mut impl Write,
) -> Result<(), InterceptorError> {
    if privilege::needs_capture_access(&args.module) {
        privilege::check_capture_access()?;
    }

    app.load_module(&args.module)?;
    for (name, value) in &args.set {
        app.set_argument(name, value)?;
    }

    install_signal_handlers();
    let task = app.start_module()?;
    log::info!("running {} as task {task}", args.module);

    let mut stop_sent = false;
    let mut collected = String::new();
    loop {
        if !stop_sent && STOP_REQUESTED.load(Ordering::Relaxed) {
            stop_sent = true;
            if !app.stop_task(&task)? {
                eprintln!("{task} cannot be stopped; waiting for it to finish");
            }
        }

        let status = app.poll_task(&task)?;
        match format {
            OutputFormat::Text => {
                stdout
                    .write_all(status.output.as_bytes())
                    .and_then(|()| stdout.flush())
                    .map_err(InterceptorError::Serialization)?;
            }
            OutputFormat::Json => collected.push_str(&status.output),
        }
        if !status.running {
            break;
        }
        thread::sleep(POLL_INTERVAL);
    }

    if format == OutputFormat::Json {
        output::write_json(
            &TaskReport {
                task,
                output: collected,
            },
            stdout,
        )?;
    }
    Ok(())
}
