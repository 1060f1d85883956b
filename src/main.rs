// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! lvmctl: run a JSON script of volume-management commands through an
//! engine and print each result.

use std::fs;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use clap::Parser;
use log::{error, info};
use serde_json::json;

use lvmcore::{Caller, Command, Engine, EngineConfig, NullIo};

#[derive(Parser, Debug)]
#[command(version, about = "Apply LVM commands to an in-memory engine")]
struct Opt {
    /// JSON file holding an array of commands
    script: PathBuf,

    #[arg(short, long)]
    /// TOML engine configuration
    config: Option<PathBuf>,

    #[arg(long)]
    /// Continue after a command fails
    keep_going: bool,
}

fn run(opt: &Opt) -> lvmcore::Result<bool> {
    let config = match opt.config {
        Some(ref path) => EngineConfig::load_from_file(path)?,
        None => EngineConfig::default(),
    };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(config.log_level.as_str()))
        .init();

    let script = fs::read_to_string(&opt.script)?;
    let commands: Vec<Command> = serde_json::from_str(&script)?;
    info!("{} commands from {}", commands.len(), opt.script.display());

    let engine = Engine::new(config, Arc::new(NullIo));
    let caller = Caller::current();
    let mut ok = true;

    for cmd in commands {
        let name = cmd.name();
        match engine.apply(caller, cmd) {
            Ok(resp) => println!("{}", serde_json::to_string(&resp)?),
            Err(e) => {
                error!("{}: {}", name, e);
                println!("{}", json!({ "result": "error", "op": name, "error": e.to_string() }));
                ok = false;
                if !opt.keep_going {
                    break;
                }
            }
        }
    }

    engine.shutdown();
    Ok(ok)
}

fn main() {
    let opt = Opt::parse();

    match run(&opt) {
        Ok(true) => {}
        Ok(false) => process::exit(1),
        Err(e) => {
            eprintln!("lvmctl: {}", e);
            process::exit(2);
        }
    }
}
