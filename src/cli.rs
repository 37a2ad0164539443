#[derive(clap::Parser, Debug)]
#[clap(name = "event-snap", version, about = "Detect event pages and extract event records")]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(clap::Subcommand, Debug)]
pub enum Commands {
    /// Fetch a page, extract its event and store it
    Extract {
        url: String,
        /// Print the overlay frame URL as well
        #[clap(long)]
        overlay: bool,
    },
    /// Show the stored event the way the popup does
    Popup {
        /// Page the event came from, used for the widget link
        #[clap(long)]
        source: Option<String>,
    },
    /// Store the events API token
    SetToken { token: String },
    /// Refresh the remote events cache
    Fetch {
        /// Event page to fall back to when the API call fails
        #[clap(long)]
        page: Option<String>,
    },
    /// Keep the remote events cache fresh until interrupted
    Daemon,
}
