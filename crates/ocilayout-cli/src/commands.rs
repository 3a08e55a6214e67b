use std::fs;
use std::io;
use std::path::Path;

use anyhow::{bail, Context};
use colored::Colorize;
use ocilayout::{BlobImage, DescriptorMatcher, Digest, Image, Layout, LayoutConfig};

use crate::cli::*;

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    let config = match &cli.config {
        Some(path) => LayoutConfig::load(path)?,
        None => LayoutConfig::default(),
    };
    let layout = open_layout(&cli.command, &cli.layout, config)?;

    match cli.command {
        Command::Init => cmd_init(&layout),
        Command::Add(args) => cmd_add(&layout, args),
        Command::Replace(args) => cmd_replace(&layout, args),
        Command::Ls => cmd_ls(&layout, &cli.format),
        Command::Cat(args) => cmd_cat(&layout, args),
        Command::Rm(args) => cmd_rm(&layout, args),
        Command::Fsck => cmd_fsck(&layout),
    }
}

/// Only commands that write images may initialize a layout; the rest
/// require an existing one and leave the directory untouched.
fn open_layout(command: &Command, path: &Path, config: LayoutConfig) -> anyhow::Result<Layout> {
    let layout = match command {
        Command::Init | Command::Add(_) | Command::Replace(_) => Layout::with_config(path, config),
        Command::Ls | Command::Cat(_) | Command::Rm(_) | Command::Fsck => {
            Layout::open_with_config(path, config)
        }
    };
    layout.with_context(|| format!("opening layout at {}", path.display()))
}

fn cmd_init(layout: &Layout) -> anyhow::Result<()> {
    println!(
        "{} Initialized OCI layout in {}",
        "✓".green().bold(),
        layout.root().display().to_string().bold()
    );
    println!("  Images: {}", layout.images().len());
    Ok(())
}

fn cmd_add(layout: &Layout, args: AddArgs) -> anyhow::Result<()> {
    let image = build_image(&args.image)?;
    let desc = layout.add_image(&image)?;
    println!("{} Added {}", "✓".green().bold(), desc.digest.to_string().yellow());
    Ok(())
}

fn cmd_replace(layout: &Layout, args: ReplaceArgs) -> anyhow::Result<()> {
    let matcher = select(&args.select)?;
    let image = build_image(&args.image)?;
    let desc = layout.replace_image(&image, &matcher)?;
    println!(
        "{} Replaced {} with {}",
        "✓".green().bold(),
        matcher.to_string().cyan(),
        desc.digest.to_string().yellow()
    );
    Ok(())
}

fn cmd_ls(layout: &Layout, format: &OutputFormat) -> anyhow::Result<()> {
    let descriptors: Vec<_> = layout
        .images()
        .iter()
        .map(|i| i.descriptor().clone())
        .collect();
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&descriptors)?),
        OutputFormat::Text => {
            if descriptors.is_empty() {
                println!("No images.");
            }
            for d in &descriptors {
                println!(
                    "{:<24} {}  {:>10}  {}",
                    d.ref_name().unwrap_or("<none>").green(),
                    d.digest.short_hex().yellow(),
                    d.size,
                    d.media_type.dimmed()
                );
            }
        }
    }
    Ok(())
}

fn cmd_cat(layout: &Layout, args: CatArgs) -> anyhow::Result<()> {
    let digest: Digest = match (&args.blob, has_selection(&args.select)) {
        (Some(blob), false) => blob.parse()?,
        (None, true) => {
            let image = layout.find_image(&select(&args.select)?)?;
            image.descriptor().digest.clone()
        }
        _ => bail!("pass either a blob digest or --ref/--digest"),
    };
    let mut reader = layout.blob(&digest)?;
    io::copy(&mut reader, &mut io::stdout().lock())
        .with_context(|| format!("reading blob {digest}"))?;
    Ok(())
}

fn cmd_rm(layout: &Layout, args: SelectArgs) -> anyhow::Result<()> {
    let removed = layout.remove_image(&select(&args)?)?;
    if removed.is_empty() {
        println!("No matching images.");
    }
    for d in removed {
        println!("{} Removed {}", "✓".green(), d.digest.to_string().yellow());
    }
    Ok(())
}

fn cmd_fsck(layout: &Layout) -> anyhow::Result<()> {
    let report = layout.fsck()?;
    println!("Checked {} blobs", report.blobs_checked);
    for d in &report.corrupt {
        println!("  {} {}", "corrupt:".red().bold(), d);
    }
    for d in &report.missing {
        println!("  {} {}", "missing:".red().bold(), d);
    }
    for (d, reason) in &report.unreadable {
        println!("  {} {} ({})", "unreadable:".red().bold(), d.digest, reason);
    }
    if !report.is_clean() {
        bail!("layout has integrity problems");
    }
    println!("{} No issues.", "✓".green().bold());
    Ok(())
}

fn build_image(args: &ImageArgs) -> anyhow::Result<BlobImage> {
    let config = match &args.image_config {
        Some(path) => read_file(path)?,
        None => b"{}".to_vec(),
    };
    let layers = args
        .layers
        .iter()
        .map(|p| read_file(p))
        .collect::<anyhow::Result<Vec<_>>>()?;
    let layer_refs: Vec<&[u8]> = layers.iter().map(Vec::as_slice).collect();
    let image = BlobImage::oci_manifest(&config, &layer_refs);
    Ok(match &args.tag {
        Some(tag) => image.with_ref_name(tag),
        None => image,
    })
}

fn read_file(path: &Path) -> anyhow::Result<Vec<u8>> {
    fs::read(path).with_context(|| format!("reading {}", path.display()))
}

fn has_selection(args: &SelectArgs) -> bool {
    args.ref_name.is_some() || args.digest.is_some()
}

/// Matcher for `--ref` / `--digest`; both given means both must hold.
fn select(args: &SelectArgs) -> anyhow::Result<DescriptorMatcher> {
    let mut parts = Vec::new();
    if let Some(name) = &args.ref_name {
        parts.push(DescriptorMatcher::ref_name(name));
    }
    if let Some(digest) = &args.digest {
        parts.push(DescriptorMatcher::Digest(digest.parse()?));
    }
    match parts.len() {
        0 => bail!("select images with --ref and/or --digest"),
        1 => Ok(parts.remove(0)),
        _ => Ok(DescriptorMatcher::And(parts)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn selection(ref_name: Option<&str>, digest: Option<&str>) -> SelectArgs {
        SelectArgs {
            ref_name: ref_name.map(String::from),
            digest: digest.map(String::from),
        }
    }

    #[test]
    fn select_requires_a_criterion() {
        assert!(select(&selection(None, None)).is_err());
        assert!(!has_selection(&selection(None, None)));
    }

    #[test]
    fn select_combines_criteria() {
        let digest = format!("sha256:{}", "a".repeat(64));
        let m = select(&selection(Some("v1"), Some(&digest))).unwrap();
        assert!(matches!(m, DescriptorMatcher::And(ref inner) if inner.len() == 2));
        assert!(select(&selection(None, Some("sha256:short"))).is_err());
    }

    fn fast() -> LayoutConfig {
        LayoutConfig {
            sync: false,
            ..LayoutConfig::default()
        }
    }

    #[test]
    fn read_only_commands_need_an_existing_layout() {
        let dir = tempfile::tempdir().unwrap();
        for command in [Command::Ls, Command::Fsck, Command::Rm(selection(Some("v1"), None))] {
            let err = open_layout(&command, dir.path(), fast()).unwrap_err();
            assert!(format!("{err:#}").contains("is not an image layout"));
        }
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);

        open_layout(&Command::Init, dir.path(), fast()).unwrap();
        let layout = open_layout(&Command::Ls, dir.path(), fast()).unwrap();
        assert!(layout.images().is_empty());
    }

    #[test]
    fn build_image_reads_layers() {
        let dir = tempfile::tempdir().unwrap();
        let layer = dir.path().join("layer.tar");
        fs::write(&layer, b"layer bytes").unwrap();
        let args = ImageArgs {
            layers: vec![layer],
            image_config: None,
            tag: Some("v1".into()),
        };
        let image = build_image(&args).unwrap();
        assert_eq!(image.descriptor().ref_name(), Some("v1"));
        assert_eq!(image.blobs().unwrap().len(), 2);
    }
}
