use std::process::ExitCode;

fn main() -> ExitCode {
    mekanos_cli::run()
}
