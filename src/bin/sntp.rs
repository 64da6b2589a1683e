#[macro_use]
extern crate log;

use std::time::Duration;

use clap::Parser;

use sntp_suite::client;

#[tokio::main]
async fn main() {
    env_logger::init();

    let args = Configuration::parse();
    args.validate().expect("Configuration is broken!");

    info!("Configuration valid. Starting up...");

    let result = client::request(
        &args.host,
        args.port,
        args.ntp_version,
        Duration::from_secs_f64(args.wait),
    )
    .await;

    match result {
        Ok(sync) => {
            println!("Offset: {}", sync.offset);
            println!("Round trip: {}", sync.round_trip);
        }
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    }
}

#[derive(Parser, Debug)]
#[clap(author = "Piotr Olszewski", version, about, long_about = None)]
pub struct Configuration {
    /// Server host name or address to query
    pub host: String,
    /// UDP port number of the server
    #[clap(short, long, default_value_t = 123)]
    pub port: u16,
    /// SNTP protocol version to send
    #[clap(short = 'n', long, default_value_t = 4)]
    pub ntp_version: u8,
    /// Seconds to wait for the reply
    #[clap(short, long, default_value_t = 5.0)]
    pub wait: f64,
}

impl Configuration {
    pub fn validate(&self) -> Result<(), String> {
        if self.ntp_version > 7 {
            return Err(format!(
                "version {} does not fit in 3 bits",
                self.ntp_version
            ));
        }
        if !(self.wait > 0.0) {
            return Err("wait must be a positive number of seconds".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_configuration_correct_test() {
        let conf = Configuration {
            host: "pool.ntp.org".to_string(),
            port: 123,
            ntp_version: 4,
            wait: 5.0,
        };

        assert_eq!((), conf.validate().unwrap());
    }

    #[test]
    fn validate_configuration_incorrect_test() {
        let conf = Configuration {
            host: "pool.ntp.org".to_string(),
            port: 123,
            ntp_version: 8,
            wait: 5.0,
        };
        assert!(conf.validate().is_err());

        let conf = Configuration {
            host: "pool.ntp.org".to_string(),
            port: 123,
            ntp_version: 4,
            wait: 0.0,
        };
        assert!(conf.validate().is_err());
    }
}
