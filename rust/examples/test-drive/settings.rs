use std::path::PathBuf;

use structopt::StructOpt;

use secagg_server::settings::{ProtocolSettings, Settings, SettingsError};

#[derive(Debug, StructOpt)]
#[structopt(name = "Test Drive")]
pub struct Opt {
    #[structopt(
        short,
        long,
        parse(from_os_str),
        help = "The settings file. Overrides the protocol options below"
    )]
    pub config: Option<PathBuf>,

    #[structopt(default_value = "10", short, help = "The number of clients")]
    pub nb_client: u32,

    #[structopt(default_value = "1", short, help = "The number of clients dropping out after key sharing")]
    pub dropouts: u32,

    #[structopt(default_value = "3", short, help = "The secret sharing threshold")]
    pub threshold: u32,

    #[structopt(default_value = "4", short, help = "The length of the inputs")]
    pub len: usize,

    #[structopt(
        default_value = "50",
        short,
        help = "The time period at which to poll the coordinator, in milliseconds"
    )]
    pub period: u64,
}

impl Opt {
    /// Gets the protocol settings from the settings file, or from the options without one.
    ///
    /// Without a settings file, rounds advance on their own once every client registered.
    pub fn protocol_settings(&self) -> Result<ProtocolSettings, SettingsError> {
        match self.config {
            Some(ref path) => Ok(Settings::new(path)?.protocol),
            None => Ok(ProtocolSettings {
                threshold: self.threshold,
                min_participants: self.nb_client,
                auto_advance: true,
                auto_advance_min: self.nb_client,
            }),
        }
    }
}
