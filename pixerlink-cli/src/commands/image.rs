//! Image upload and conversion commands.

use anyhow::{Context, Result};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use pixerlink::{Device, ImageEncoder, ImageFrame};
use std::fs;
use std::path::Path;

use crate::config::Config;
use crate::{Cli, use_fancy_output};

fn encode(cli: &Cli, image: &Path, width: u32, height: u32) -> Result<ImageFrame> {
    if !cli.quiet {
        eprintln!(
            "{} Converting {} to {width}x{height}",
            style("🖼").cyan(),
            image.display()
        );
    }

    ImageEncoder::new(width, height)
        .encode_file(image)
        .with_context(|| format!("Failed to convert image {}", image.display()))
}

/// Upload command implementation.
pub(crate) fn cmd_upload(
    cli: &Cli,
    config: &Config,
    image: &Path,
    width: u32,
    height: u32,
) -> Result<()> {
    let frame = encode(cli, image, width, height)?;

    let tcp = super::tcp_config(cli, config);
    let target = tcp.address();
    if !cli.quiet {
        eprintln!(
            "{} Uploading {} bytes to {target}",
            style("🔌").cyan(),
            frame.len()
        );
    }

    // Create progress bar
    let pb = if cli.quiet || !use_fancy_output() {
        ProgressBar::hidden()
    } else {
        let pb = ProgressBar::new(100);
        #[allow(clippy::unwrap_used)] // Static template string
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}% {msg}")
                .unwrap()
                .progress_chars("#>-"),
        );
        pb.set_draw_target(indicatif::ProgressDrawTarget::stderr());
        pb
    };

    let result = Device::new(tcp).upload_image(&frame, |sent, total| {
        if total > 0 {
            pb.set_position((sent * 100 / total) as u64);
        }
    });

    if let Err(err) = result {
        pb.abandon();
        return Err(err).with_context(|| format!("Failed to upload image to {target}"));
    }
    pb.finish_and_clear();

    if !cli.quiet {
        eprintln!("{} Image sent", style("✓").green());
    }
    Ok(())
}

/// Convert command implementation.
pub(crate) fn cmd_convert(
    cli: &Cli,
    image: &Path,
    output: &Path,
    width: u32,
    height: u32,
) -> Result<()> {
    let frame = encode(cli, image, width, height)?;
    let bytes = frame.to_bytes();

    fs::write(output, &bytes)
        .with_context(|| format!("Failed to write frame to {}", output.display()))?;

    if !cli.quiet {
        eprintln!(
            "{} Wrote {} bytes ({}x{}) to {}",
            style("✓").green(),
            bytes.len(),
            frame.width(),
            frame.height(),
            output.display()
        );
    }
    Ok(())
}
