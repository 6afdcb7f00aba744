use mysh::{Environment, Interpreter, rc};
use std::io::IsTerminal;
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    init_logging();

    let mut env = Environment::from_process();
    for problem in rc::load(&mut env) {
        eprintln!("{problem}");
    }

    let mut shell = Interpreter::with_builtins(env);
    if std::io::stdin().is_terminal() {
        shell.enable_job_control();
    }
    let code = shell.repl()?;
    std::process::exit(code)
}

fn init_logging() {
    let filter = EnvFilter::try_from_env("MYSH_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
