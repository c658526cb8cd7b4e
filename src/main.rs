// Session Recorder - triggered machine-vision camera recording

use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();
    session_recorder_lib::run(args).await
}
