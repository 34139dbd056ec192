use clap::Parser;
use gradeproxy::configuration::config::{CliArgs, Config};
use gradeproxy::controller::controller_handler::Controller;
use log::{error, info};

#[tokio::main]
async fn main() {
    // https://docs.rs/env_logger/latest/env_logger/
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .format_target(false)
        .init();

    println!(
        "
==============================================================================
                gradeproxy v{}: client/server grading harness
==============================================================================
",
        env!("CARGO_PKG_VERSION")
    );

    let args = CliArgs::parse();

    info!("Importing configuration");
    let config = match Config::load(&args) {
        Ok(config) => config,
        Err(e) => {
            error!("Unable to import configuration: {}", e);
            std::process::exit(1);
        }
    };
    info!(
        "Configuration imported: {} proxy on {} -> {}, logs in {}",
        config.mode,
        config.listen_port,
        config.backend_port,
        config.storage_dir.display()
    );

    let mut controller = match Controller::new(config) {
        Ok(controller) => controller,
        Err(e) => {
            error!("Unable to create a controller instance: {}, exiting...", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = controller.run().await {
        error!("Error occured in the controller process: {}, exiting...", e);
        std::process::exit(1);
    }
}
