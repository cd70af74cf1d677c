//! CLI command definitions

use clap::{Parser, Subcommand};
use luna_service_client::ServiceCategory;

#[derive(Parser)]
#[command(name = "luna-send")]
#[command(about = "Send calls to services on an in-process Luna bus", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Service identity to register as (the process id is appended)
    #[arg(long, env = "LUNA_SERVICE_ID", default_value = "com.webos.lunasend", global = true)]
    pub identity: String,

    /// How long to wait for responses, in milliseconds
    #[arg(long, env = "LUNA_SEND_TIMEOUT_MS", default_value_t = 1000, global = true)]
    pub timeout_ms: u64,

    /// Do not log request and response payloads
    #[arg(long, global = true)]
    pub quiet: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Issue a one-shot call and print the response
    ///
    /// Examples:
    ///   luna-send call luna://com.webos.audio/getVolume '{}'
    ///   luna-send call luna://com.webos.audio/setVolume '{"volume":30}'
    Call {
        /// Method URI
        uri: String,

        /// JSON request payload
        #[arg(default_value = "{}")]
        payload: String,
    },

    /// Subscribe and print responses until COUNT arrive or the timeout passes
    ///
    /// Examples:
    ///   luna-send subscribe luna://com.webos.audio/getVolume -n 2 \
    ///       --then luna://com.webos.audio/setVolume '{"volume":30}'
    Subscribe {
        /// Method URI
        uri: String,

        /// JSON request payload
        #[arg(default_value = "{}")]
        payload: String,

        /// Number of responses to wait for
        #[arg(short = 'n', long, default_value_t = 1)]
        count: usize,

        /// One-shot call (URI PAYLOAD) issued after subscribing (can be repeated)
        #[arg(long = "then", num_args = 2, value_names = ["URI", "PAYLOAD"])]
        then: Vec<String>,
    },

    /// Print the URI of a well-known platform service method
    ///
    /// Examples:
    ///   luna-send uri audio getVolume
    ///   luna-send uri 11 getSystemSettings
    Uri {
        /// Service category name or number
        #[arg(value_parser = parse_category)]
        category: i32,

        /// Method name
        action: String,
    },

    /// List the services hosted on the bus
    Services,
}

/// Parse a category name ("audio") or raw number ("3") into its numeric value
pub fn parse_category(s: &str) -> Result<i32, String> {
    if let Ok(index) = s.parse::<i32>() {
        return Ok(index);
    }

    let category = match s.to_lowercase().replace(['-', '_'], "").as_str() {
        "vsm" => ServiceCategory::Vsm,
        "display" => ServiceCategory::Display,
        "avblock" => ServiceCategory::AvBlock,
        "audio" => ServiceCategory::Audio,
        "broadcast" => ServiceCategory::Broadcast,
        "channel" => ServiceCategory::Channel,
        "externaldevice" => ServiceCategory::ExternalDevice,
        "dvr" => ServiceCategory::Dvr,
        "sound" => ServiceCategory::Sound,
        "subtitle" => ServiceCategory::Subtitle,
        "drm" => ServiceCategory::Drm,
        "setting" | "settings" => ServiceCategory::Setting,
        "photorenderer" => ServiceCategory::PhotoRenderer,
        _ => return Err(format!("Unknown service category: {}", s)),
    };
    Ok(category as i32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_category_names() {
        assert_eq!(parse_category("audio"), Ok(3));
        assert_eq!(parse_category("Settings"), Ok(11));
        assert_eq!(parse_category("photo-renderer"), Ok(12));
        assert_eq!(parse_category("42"), Ok(42));
        assert!(parse_category("radio").is_err());
    }

    #[test]
    fn test_subscribe_then_pairs() {
        let cli = Cli::parse_from([
            "luna-send",
            "subscribe",
            "luna://com.webos.audio/getVolume",
            "-n",
            "2",
            "--then",
            "luna://com.webos.audio/setVolume",
            r#"{"volume":30}"#,
        ]);

        match cli.command {
            Commands::Subscribe { count, then, payload, .. } => {
                assert_eq!(count, 2);
                assert_eq!(payload, "{}");
                assert_eq!(then.len(), 2);
            }
            _ => panic!("expected subscribe"),
        }
    }
}
