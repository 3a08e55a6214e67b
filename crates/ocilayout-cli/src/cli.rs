use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "ocilayout",
    about = "Manage OCI image layouts on the local filesystem",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Layout directory
    #[arg(short = 'C', long, global = true, default_value = ".")]
    pub layout: PathBuf,

    /// TOML file with layout settings (sync, algorithm)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Debug, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Initialize (or re-open) a layout
    Init,
    /// Build an image from a config and layers and add it to the index
    Add(AddArgs),
    /// Build an image and swap it in for the selected index entries
    Replace(ReplaceArgs),
    /// List indexed images
    Ls,
    /// Write a blob, or the manifest of a selected image, to stdout
    Cat(CatArgs),
    /// Drop index entries (blobs are kept)
    Rm(SelectArgs),
    /// Verify blobs and check that indexed images are complete
    Fsck,
}

#[derive(Args)]
pub struct ImageArgs {
    /// Layer files, in order
    pub layers: Vec<PathBuf>,

    /// Image configuration JSON (defaults to `{}`)
    #[arg(long = "image-config")]
    pub image_config: Option<PathBuf>,

    /// Reference name annotation for the new index entry
    #[arg(short, long)]
    pub tag: Option<String>,
}

#[derive(Args)]
pub struct AddArgs {
    #[command(flatten)]
    pub image: ImageArgs,
}

#[derive(Args)]
pub struct ReplaceArgs {
    #[command(flatten)]
    pub image: ImageArgs,

    #[command(flatten)]
    pub select: SelectArgs,
}

#[derive(Args)]
pub struct SelectArgs {
    /// Select entries by reference name
    #[arg(long = "ref")]
    pub ref_name: Option<String>,

    /// Select entries by digest
    #[arg(long)]
    pub digest: Option<String>,
}

#[derive(Args)]
pub struct CatArgs {
    /// Blob digest (`sha256:<hex>`)
    pub blob: Option<String>,

    #[command(flatten)]
    pub select: SelectArgs,
}
