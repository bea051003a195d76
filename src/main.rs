// src/main.rs

use dtexec::engine::linger::linger_forever;
use dtexec::engine::LingerDecision;
use dtexec::run;

fn main() {
    let argv = std::env::args_os().collect();
    match run(argv) {
        Ok(LingerDecision::Exit(code)) => std::process::exit(code),
        Ok(LingerDecision::Linger) => linger_forever(),
        Err(err) => {
            eprintln!("dtexec error: {err:?}");
            std::process::exit(1);
        }
    }
}
