mod logger;
mod parse_args;

use log::{error, info};
use logger::Logger;
use parse_args::parse_args;
use psc_mailbox::{open_port, MailboxTransport};
use spdm_proxy_server::ServerConfig;

fn main() {
    let args = match parse_args() {
        Ok(a) => a,
        Err(e) => {
            eprintln!("Error parsing arguments: {}", e);
            std::process::exit(1);
        }
    };

    // Set up logger
    let logger = match &args.log_file {
        Some(path) => match Logger::file(path, args.verbosity) {
            Ok(l) => {
                eprintln!("Logging to: {}", path);
                l
            }
            Err(e) => {
                eprintln!("Failed to open log file '{}': {}", path, e);
                std::process::exit(1);
            }
        },
        None => Logger::stderr(args.verbosity),
    };
    if let Err(e) = logger.install() {
        eprintln!("Failed to install logger: {}", e);
    }

    // There is no proxy without the mailbox
    let port = match open_port(&args.port_config()) {
        Ok(p) => p,
        Err(e) => {
            error!("Mailbox initialization failed: {}", e);
            std::process::exit(1);
        }
    };
    let mailbox = MailboxTransport::new(port).timeout(args.timeout);
    info!(
        "Mailbox ready ({:?} backend, {:?} timeout)",
        args.backend, args.timeout
    );

    let config = ServerConfig {
        port: args.port,
        transport_type: args.transport_type,
        ..ServerConfig::default()
    };
    if let Err(e) = spdm_proxy_server::start(config, mailbox) {
        error!("Create platform service socket failed: {}", e);
        std::process::exit(1);
    }
}
