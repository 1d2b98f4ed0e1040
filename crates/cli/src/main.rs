use std::process::ExitCode;

fn main() -> ExitCode {
    cleanq_cli::run()
}
