use std::process::ExitCode;

fn main() -> ExitCode {
    slotline_cli::run()
}
