use std::process::ExitCode;

fn main() -> ExitCode {
    ExitCode::from(lockpid::cli::main_with_args(std::env::args_os()))
}
