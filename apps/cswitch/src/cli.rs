use clap::Parser;

#[derive(Parser)]
#[command(name = "cswitch", about = "Local AI gateway relay")]
pub(crate) struct Cli {
    /// State directory; defaults to ~/.code-switch.
    #[arg(long, env = "CSWITCH_DATA_DIR", default_value = "")]
    pub(crate) data_dir: String,
    #[arg(long, default_value = "127.0.0.1")]
    pub(crate) host: String,
    #[arg(long, default_value_t = 18100)]
    pub(crate) port: u16,
    /// Capture request/response bodies into the store (TTL-bound).
    #[arg(long, default_value_t = false)]
    pub(crate) body_logging: bool,
    #[arg(long, default_value_t = 24)]
    pub(crate) body_ttl_hours: u64,
    /// Rotate equal-priority providers per request.
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub(crate) round_robin: bool,
    /// Mirror relay events to stderr as JSON lines.
    #[arg(long, default_value_t = false)]
    pub(crate) events_log: bool,
}
