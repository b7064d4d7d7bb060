use clap::Parser;
use std::path::PathBuf;

#[derive(Parser)]
pub struct Cli {
    /// Directory whose regular files get packed into the image
    #[arg(long, short)]
    pub source: PathBuf,

    /// Path of the produced image
    #[arg(long, short = 'O')]
    pub image: PathBuf,

    /// Image size in sectors
    #[arg(long, default_value_t = 16 * 2048)]
    pub sectors: usize,
}
