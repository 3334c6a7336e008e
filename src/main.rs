use std::process::ExitCode;

fn main() -> ExitCode {
    lattice_dmx::run_cli()
}
