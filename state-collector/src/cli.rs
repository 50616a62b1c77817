use std::path::PathBuf;

use clap::Parser;

#[derive(Parser)]
pub struct Opts {
    /// Directory holding `collector.txt` and where `log.txt` is appended.
    /// Defaults to the current working directory.
    #[clap(long)]
    data_dir: Option<PathBuf>,

    /// If enabled, logs will be in JSON format.
    #[clap(short, long)]
    pub json: bool,
}

impl Opts {
    pub fn read() -> Opts {
        Opts::parse()
    }

    pub fn data_dir(&self) -> std::io::Result<PathBuf> {
        match self.data_dir.clone() {
            Some(path) => Ok(path),
            None => std::env::current_dir(),
        }
    }
}
