#[macro_use]
extern crate clap;

use clap::{Arg, ArgGroup};
use std::fs;
use std::path::Path;
use std::process::ExitCode;

use vcpu::io::StdIo;
use vcpu::RunOutcome;

#[derive(Debug)]
enum Error {
    Io(std::io::Error),
    Run(vex::Error),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Io(err) => write!(f, "reading input failed: {}", err),
            Error::Run(err) => write!(f, "{}", err),
        }
    }
}

fn main() -> ExitCode {
    let matches = app_from_crate!()
        .arg(
            Arg::with_name("ASSEMBLY")
                .help("Assembly source file to assemble and run")
                .index(1),
        )
        .arg(
            Arg::with_name("program")
                .short("p")
                .long("program")
                .takes_value(true)
                .value_name("PROGRAM")
                .help("Runs an already-assembled .vex container (as written by `vasm -o`) instead of assembling from source"),
        )
        .group(
            ArgGroup::with_name("input")
                .args(&["ASSEMBLY", "program"])
                .required(true),
        )
        .arg(
            Arg::with_name("interrupt")
                .short("i")
                .long("interrupt")
                .help("Trace per-tick execution and interrupt entry/exit"),
        )
        .arg(
            Arg::with_name("memory")
                .short("m")
                .long("memory")
                .takes_value(true)
                .value_name("BYTES")
                .default_value("1048576")
                .help("Requested memory size in bytes (the emulated address space is a fixed 1 MiB; a different value is accepted but has no effect)"),
        )
        .get_matches();

    let level = if matches.is_present("interrupt") { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    if let Ok(requested) = value_t!(matches.value_of("memory"), u32) {
        if requested as usize != vcpu::constants::MEMORY_SIZE {
            log::warn!(
                "requested memory size {} ignored: the emulated 8086 address space is fixed at {} bytes",
                requested,
                vcpu::constants::MEMORY_SIZE
            );
        }
    }

    let result = match matches.value_of("program") {
        Some(program) => run_vexfile(program),
        None => run_assembly(matches.value_of("ASSEMBLY").unwrap()),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            eprintln!("{}", err);
            ExitCode::FAILURE
        }
    }
}

fn run_assembly(input: &str) -> Result<u8, Error> {
    let path = Path::new(input);
    let source = fs::read_to_string(path).map_err(Error::Io)?;

    log::info!("assembling and running \"{}\"", path.display());
    let (machine, outcome) = vex::assemble_and_run(&source, StdIo::new()).map_err(Error::Run)?;
    report(machine, outcome)
}

fn run_vexfile(input: &str) -> Result<u8, Error> {
    log::info!("running pre-assembled \"{}\"", input);
    let (machine, outcome) = vex::run_vexfile(input, StdIo::new()).map_err(Error::Run)?;
    report(machine, outcome)
}

fn report<IO: vcpu::MachineIo>(machine: vcpu::Machine<IO>, outcome: RunOutcome) -> Result<u8, Error> {
    println!("{}", machine);
    let code = match outcome {
        RunOutcome::Halted => {
            println!("halted");
            0
        }
        RunOutcome::Breakpoint => {
            println!("stopped at breakpoint");
            0
        }
        RunOutcome::Exited(code) => {
            println!("exited with code {}", code);
            code
        }
        RunOutcome::EndOfProgram => {
            println!("ran off the end of the program");
            0
        }
    };
    Ok(code)
}
