use h2d::config::Config;
use h2d::supervisor;

fn main() {
    let config = Config::from_args();
    env_logger::Builder::from_default_env()
        .filter_level(config.log_level)
        .init();

    if let Err(err) = supervisor::run(&config) {
        eprintln!("{:#}", err);
        std::process::exit(1);
    }
}
