//! Clebsch REPL - inspect descriptors, couplings and tensor-product plans.

use std::env;
use std::fs;

use candle_core::Device;
use clebsch::tensor_product::{ConnectionMode, InstructionSelector, TensorProduct};
use clebsch::{CouplingCache, Result, Rs, TensorProductConfig, TpError};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use tracing::info;
use tracing_subscriber::EnvFilter;

struct Session {
    cache: CouplingCache,
    config: TensorProductConfig,
    device: Device,
    json: bool,
}

impl Session {
    fn new() -> Self {
        Self {
            cache: CouplingCache::new(),
            config: TensorProductConfig::default(),
            device: Device::Cpu,
            json: false,
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_target(false)
        .init();

    let args: Vec<String> = env::args().collect();
    let mut session = Session::new();

    // If a file argument is provided, execute it line by line
    if args.len() > 1 {
        let path = &args[1];
        let source = match fs::read_to_string(path) {
            Ok(source) => source,
            Err(e) => {
                eprintln!("Error loading {}: {}", path, e);
                std::process::exit(1);
            }
        };
        info!(path = %path, "executing file");
        for (n, line) in source.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            match handle_command(line, &mut session) {
                Ok(true) => {}
                Ok(false) => break,
                Err(e) => {
                    eprintln!("{}:{}: {}", path, n + 1, e);
                    std::process::exit(1);
                }
            }
        }
        return Ok(());
    }

    run_repl(session)
}

fn run_repl(mut session: Session) -> Result<()> {
    let mut rl = match DefaultEditor::new() {
        Ok(rl) => rl,
        Err(e) => {
            eprintln!("Failed to create editor: {}", e);
            std::process::exit(1);
        }
    };

    loop {
        match rl.readline("clebsch> ") {
            Ok(line) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let _ = rl.add_history_entry(trimmed);

                match handle_command(trimmed, &mut session) {
                    Ok(true) => {}
                    Ok(false) => break,
                    Err(e) => eprintln!("Error: {}", e),
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("^C");
                continue;
            }
            Err(ReadlineError::Eof) => {
                println!("Bye!");
                break;
            }
            Err(err) => {
                eprintln!("Error: {:?}", err);
                break;
            }
        }
    }

    Ok(())
}

/// Handle one command. Returns false if the session should end.
fn handle_command(line: &str, session: &mut Session) -> Result<bool> {
    let (command, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    let rest = rest.trim();

    match command {
        ":quit" | ":q" | ":exit" => {
            println!("Bye!");
            return Ok(false);
        }

        ":help" | ":h" | ":?" => print_help(),

        ":json" => {
            session.json = !session.json;
            println!("JSON output {}", if session.json { "on" } else { "off" });
        }

        ":dim" => {
            let rs: Rs = rest.parse()?;
            if session.json {
                println!("{}", serde_json::json!({ "rs": rs, "dim": rs.dim(), "mul_dim": rs.mul_dim() }));
            } else {
                println!("{} : dim {}, channels {}", rs, rs.dim(), rs.mul_dim());
            }
        }

        ":simplify" => {
            let rs: Rs = rest.parse::<Rs>()?.simplify();
            if session.json {
                println!("{}", serde_json::to_string(&rs)?);
            } else {
                println!("{}", rs);
            }
        }

        ":cg" => {
            let degrees = rest
                .split_whitespace()
                .map(|s| s.parse::<u32>())
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|_| TpError::Configuration(format!("expected three degrees, got '{rest}'")))?;
            let [l1, l2, l3] = degrees[..] else {
                return Err(TpError::Configuration("usage: :cg <l1> <l2> <l3>".into()));
            };
            let coupling = session.cache.coupling(l1, l2, l3)?;
            if session.json {
                println!("{}", serde_json::to_string(&coupling.nonzeros())?);
            } else {
                let (d1, d2, d3) = coupling.shape();
                println!("C[{l1},{l2},{l3}] : {d1} x {d2} x {d3}");
                for (i, j, k, c) in coupling.nonzeros() {
                    println!("  ({i}, {j}, {k}) = {c:+.10}");
                }
            }
        }

        ":plan" => {
            let parts: Vec<&str> = rest.split(';').collect();
            let [rs1, rs2, tail] = parts[..] else {
                return Err(TpError::Configuration("usage: :plan <rs1> ; <rs2> ; <rs_out> [mode]".into()));
            };
            let (rs_out, mode) = split_mode(tail)?;
            let selector = InstructionSelector::Auto(mode);
            show_plan(session, &rs1.parse()?, &rs2.parse()?, &rs_out.parse()?, &selector)?;
        }

        ":square" => {
            let Some((rs, tail)) = rest.split_once(';') else {
                return Err(TpError::Configuration("usage: :square <rs> ; <rs_out> [mode]".into()));
            };
            let (rs_out, mode) = split_mode(tail)?;
            let rs: Rs = rs.parse()?;
            let selector = InstructionSelector::AutoSquare(mode);
            show_plan(session, &rs, &rs, &rs_out.parse()?, &selector)?;
        }

        _ => {
            return Err(TpError::Configuration(format!(
                "unknown command '{}', type :help for a list",
                command
            )))
        }
    }

    Ok(true)
}

/// Strip an optional trailing connection mode off a descriptor.
fn split_mode(text: &str) -> Result<(&str, ConnectionMode)> {
    let text = text.trim();
    match text.rsplit_once(char::is_whitespace) {
        Some((rs, last)) if last.chars().all(|c| c.is_ascii_alphabetic()) => Ok((rs, last.parse()?)),
        _ => Ok((text, ConnectionMode::default())),
    }
}

fn show_plan(session: &Session, rs1: &Rs, rs2: &Rs, rs_out: &Rs, selector: &InstructionSelector) -> Result<()> {
    let tp = TensorProduct::new(rs1, rs2, rs_out, selector, &session.config, &session.cache, &session.device)?;
    let instructions = tp.instructions();

    if session.json {
        println!("{}", serde_json::to_string_pretty(&instructions)?);
        return Ok(());
    }

    println!("{} x {} -> {}", tp.rs_in1(), tp.rs_in2(), tp.rs_out());
    for (instruction, kernel) in instructions.iter().zip(tp.kernel_names()) {
        println!("  {}  [{}]", instruction, kernel);
    }
    println!("{} instruction(s), {} weight(s)", instructions.len(), tp.weight_numel());
    Ok(())
}

fn print_help() {
    println!(
        r#"Clebsch Commands:
  :help, :h, :?                          Show this help
  :quit, :q                              Exit the REPL
  :plan <rs1> ; <rs2> ; <rs_out> [mode]  Plan a fully connected tensor product
  :square <rs> ; <rs_out> [mode]         Plan a tensor square
  :cg <l1> <l2> <l3>                     Show real coupling coefficients
  :dim <rs>                              Dimension of a descriptor
  :simplify <rs>                         Merge consecutive equal irreps
  :json                                  Toggle JSON output

Descriptors:
  20x1o + 4x2e + 3                       e/o mark parity, bare degree = 1 copy
Modes:
  uvw (default), uvu, uvv, uuw, uuu"#
    );
}
