use clap::Parser;

use crate::config::backend::BackendArgs;

#[derive(Parser, Clone, Debug)]
pub struct ListDevicesArgs {
    #[command(flatten)]
    pub backend: BackendArgs,

    #[arg(long, help = "Pretty-print the JSON output")]
    pub pretty: bool,
}
