use std::io::{self, Read};
use std::path::Path;

use anyhow::Context;
use clap::{App, Arg};

use emberc::{lex, AsmBackend, Driver, DEFAULT_OUTPUT_PATH};

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let matches = App::new("emberc")
        .about("compiler front end for the ember expression language")
        .arg(
            Arg::with_name("output")
                .short("o")
                .long("output")
                .value_name("PATH")
                .takes_value(true)
                .help("where to write the emitted assembly"),
        )
        .get_matches();
    let output = matches.value_of("output").unwrap_or(DEFAULT_OUTPUT_PATH);

    let mut source = String::new();
    io::stdin()
        .read_to_string(&mut source)
        .context("failed to read source from stdin")?;

    let mut tokens = lex(&source);
    let mut driver = Driver::new(AsmBackend::new());
    driver.run(&mut tokens);

    driver
        .emit(Path::new(output))
        .with_context(|| format!("failed to emit {}", output))?;
    println!("Wrote {}", output);

    Ok(())
}
