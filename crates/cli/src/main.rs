use std::process::ExitCode;

fn main() -> ExitCode {
    answerbot_cli::run()
}
