#[macro_use]
extern crate log;

use clap::Parser;
use tokio::net::UdpSocket;

use sntp_suite::server::{ServerConfig, ServerDispatcher};

#[tokio::main]
async fn main() {
    env_logger::init();

    let args = Configuration::parse();
    args.validate().expect("Configuration is broken!");

    info!("Configuration valid. Starting up...");

    let socket = UdpSocket::bind((args.local_addr, args.local_port))
        .await
        .expect("Cannot bind to address");
    info!(
        "local socket: {}",
        socket.local_addr().expect("Cannot read local address")
    );

    let mut config = ServerConfig::new(args.lie_offset);
    config.stratum = args.stratum;
    config.poll = args.poll;
    config.workers = args.workers;

    let dispatcher = ServerDispatcher::start(socket, config);

    tokio::signal::ctrl_c()
        .await
        .expect("Cannot listen for shutdown signal");
    info!("Exiting...");

    dispatcher.stop().await;
    info!("Exited");
}

#[derive(Parser, Debug)]
#[clap(author = "Piotr Olszewski", version, about, long_about = None)]
pub struct Configuration {
    /// Offset in seconds to lie on, subtracted from every reported timestamp
    #[clap(short = 'l', long, allow_hyphen_values = true)]
    pub lie_offset: f64,
    /// Local address to bind for
    #[clap(short = 'a', long, default_value = "0.0.0.0")]
    pub local_addr: std::net::IpAddr,
    /// UDP port number for incoming packets
    #[clap(short = 'o', long, default_value_t = 123)]
    pub local_port: u16,
    /// Stratum advertised in replies
    #[clap(short, long, default_value_t = 2)]
    pub stratum: u8,
    /// Poll exponent advertised in replies
    #[clap(short, long, default_value_t = 10)]
    pub poll: i8,
    /// Number of worker tasks answering requests
    #[clap(short, long, default_value_t = 4)]
    pub workers: usize,
}

impl Configuration {
    pub fn validate(&self) -> Result<(), String> {
        if self.workers == 0 {
            return Err("at least one worker task is required".to_string());
        }
        if !self.lie_offset.is_finite() {
            return Err("lie offset must be a finite number of seconds".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::net::IpAddr;
    use std::str::FromStr;

    use super::*;

    #[test]
    fn validate_configuration_correct_test() {
        let conf = Configuration {
            lie_offset: -12.5,
            local_addr: IpAddr::from_str("127.0.0.1").unwrap(),
            local_port: 123,
            stratum: 2,
            poll: 10,
            workers: 4,
        };

        assert_eq!((), conf.validate().unwrap());
    }

    #[test]
    fn validate_configuration_incorrect_test() {
        let conf = Configuration {
            lie_offset: f64::NAN,
            local_addr: IpAddr::from_str("0.0.0.0").unwrap(),
            local_port: 123,
            stratum: 2,
            poll: 10,
            workers: 0,
        };
        assert!(conf.validate().is_err());
    }
}
