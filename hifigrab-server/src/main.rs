use clap::Parser;

fn main() {
    let cli = hifigrab_server::Cli::parse();
    if let Err(err) = hifigrab_server::run(cli) {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}
