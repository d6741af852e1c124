use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::{Arc, Mutex};

use clap::Parser;

use rust_basic::basic::{Interpreter, RunOutcome};
use rust_basic::codepage::CodePage;
use rust_basic::emulator::IoEmulator;
use rust_basic::sound::NullSoundDriver;

/// Run a BASIC program on the emulated console.
#[derive(Parser, Debug)]
#[command(name = "rust-basic", version, about)]
struct Args {
    /// BASIC source file to run
    program: PathBuf,

    /// Initial SCREEN mode (0-13)
    #[arg(long, default_value_t = 0)]
    screen: i64,

    /// Speed factor: divides every SLEEP/SOUND wait (useful for tests)
    #[arg(long, default_value_t = 1.0)]
    speed: f64,

    /// Binary font file replacing the built-in code page
    #[arg(long)]
    font: Option<PathBuf>,

    /// Window scale factor (SDL host only)
    #[arg(long, default_value_t = 2)]
    scale: u32,

    /// Run without a window, echoing PRINT output to stdout
    #[arg(long)]
    headless: bool,
}

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();

    let source = match std::fs::read_to_string(&args.program) {
        Ok(source) => source,
        Err(e) => {
            eprintln!("cannot read {}: {}", args.program.display(), e);
            return ExitCode::FAILURE;
        }
    };

    let outcome = if args.headless {
        run_headless(&source, &args)
    } else {
        run_hosted(&source, &args)
    };

    match outcome {
        Ok(RunOutcome::Completed) | Ok(RunOutcome::Cancelled) => ExitCode::SUCCESS,
        Ok(RunOutcome::Errored(_)) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("{}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(feature = "sdl")]
fn run_hosted(source: &str, args: &Args) -> Result<RunOutcome, String> {
    rust_basic::host::sdl::run(source, args.screen, args.speed, args.scale.max(1))
}

#[cfg(not(feature = "sdl"))]
fn run_hosted(source: &str, args: &Args) -> Result<RunOutcome, String> {
    log::info!("built without the sdl feature; running headless");
    run_headless(source, args)
}

/// Headless run: the framebuffer exists but nobody presents it; PRINT is
/// echoed to stdout through the print hook.
fn run_headless(source: &str, args: &Args) -> Result<RunOutcome, String> {
    let emu = Arc::new(Mutex::new(IoEmulator::new()));
    {
        let mut emu = emu.lock().map_err(|e| e.to_string())?;
        emu.load_screen_mode(args.screen).map_err(|e| e.to_string())?;
        if let Some(font_path) = &args.font {
            let bytes = std::fs::read(font_path).map_err(|e| e.to_string())?;
            let page = CodePage::parse_font(&bytes).map_err(|e| e.to_string())?;
            emu.set_code_page(page);
        }
    }

    let mut interpreter = Interpreter::new(emu, Box::new(NullSoundDriver::new()));
    interpreter.set_speed_factor(args.speed);
    interpreter.set_print_hook(Box::new(|s| {
        let mut stdout = std::io::stdout().lock();
        let _ = stdout.write_all(s.replace("\r\n", "\n").as_bytes());
        let _ = stdout.flush();
    }));

    Ok(interpreter.run(source))
}
