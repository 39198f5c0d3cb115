use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use argh::FromArgs;
use indicatif::{ProgressBar, ProgressStyle};
use log::info;

use fota_delta::{apply, inspect, Config, Generator, Inputs, Mode, PatchInfo};

#[derive(FromArgs)]
/// Block-wise bsdiff patch generator for firmware-over-the-air updates.
struct Args {
    #[argh(subcommand)]
    command: Command,
}

#[derive(FromArgs)]
#[argh(subcommand)]
enum Command {
    Compressed(CompressedArgs),
    Uncompressed(UncompressedArgs),
    Apply(ApplyArgs),
    Info(InfoArgs),
}

#[derive(FromArgs)]
/// Diff uncompressed images along the section table of the compressed new image.
#[argh(subcommand, name = "compressed")]
struct CompressedArgs {
    /// old uncompressed image
    #[argh(positional)]
    old: PathBuf,
    /// new uncompressed image
    #[argh(positional)]
    new: PathBuf,
    /// new compressed image
    #[argh(positional)]
    new_compressed: PathBuf,
    /// patch to write
    #[argh(positional)]
    patch: PathBuf,
}

#[derive(FromArgs)]
/// Diff uncompressed elf or kernel images.
#[argh(subcommand, name = "uncompressed")]
struct UncompressedArgs {
    /// image kind: elf or kernel
    #[argh(positional)]
    mode: Mode,
    /// old image
    #[argh(positional)]
    old: PathBuf,
    /// new image
    #[argh(positional)]
    new: PathBuf,
    /// patch to write
    #[argh(positional)]
    patch: PathBuf,
}

#[derive(FromArgs)]
/// Rebuild a new image from an old image and a patch.
#[argh(subcommand, name = "apply")]
struct ApplyArgs {
    /// old image
    #[argh(positional)]
    old: PathBuf,
    /// patch to apply
    #[argh(positional)]
    patch: PathBuf,
    /// new image to write
    #[argh(positional)]
    new: PathBuf,
}

#[derive(FromArgs)]
/// Print the header and block table of a patch.
#[argh(subcommand, name = "info")]
struct InfoArgs {
    /// patch to read
    #[argh(positional)]
    patch: PathBuf,
}

fn open(path: &Path) -> Result<BufReader<File>> {
    File::open(path)
        .map(BufReader::new)
        .with_context(|| format!("failed to open {}", path.display()))
}

fn generate(inputs: Inputs<BufReader<File>>, patch_path: &Path) -> Result<()> {
    let patch = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(patch_path)
        .with_context(|| format!("failed to create {}", patch_path.display()))?;
    let mode = inputs.mode();
    let generator = Generator::new(inputs, patch, &Config::default())
        .with_context(|| format!("failed to start {} patch {}", mode, patch_path.display()))?;

    let bar = ProgressBar::new(generator.blocks() as u64);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} blocks")
            .progress_chars("##-"),
    );
    let summary = generator
        .run(|_| bar.inc(1))
        .with_context(|| format!("failed to write {}", patch_path.display()))?;
    bar.finish_and_clear();

    println!(
        "{}: {} bytes, CRC {:#010x}",
        patch_path.display(),
        summary.patch_len,
        summary.crc
    );
    Ok(())
}

fn apply_patch(args: &ApplyArgs) -> Result<()> {
    let mut patch = open(&args.patch)?;
    let info = inspect(&mut patch).with_context(|| format!("failed to read {}", args.patch.display()))?;
    patch
        .seek(SeekFrom::Start(0))
        .with_context(|| format!("failed to rewind {}", args.patch.display()))?;

    let mut old = open(&args.old)?;
    let mut new = File::create(&args.new)
        .map(BufWriter::new)
        .with_context(|| format!("failed to create {}", args.new.display()))?;
    // a compressed-mode prefix describes the compressed image, not the data rebuilt here
    if info.prefix.compression.is_none() {
        info.prefix
            .write_to(&mut new)
            .with_context(|| format!("failed to write {}", args.new.display()))?;
    }
    apply(&mut old, &mut new, &mut patch, &Config::default())
        .with_context(|| format!("failed to apply {} to {}", args.patch.display(), args.old.display()))?;
    new.flush()
        .with_context(|| format!("failed to write {}", args.new.display()))?;
    info!(
        "wrote {} ({} data bytes)",
        args.new.display(),
        info.new_len()
    );
    Ok(())
}

fn print_info(info: &PatchInfo) {
    let header = &info.header;
    println!("signature          {}", String::from_utf8_lossy(&header.signature));
    println!("patch CRC          {:#010x}", header.crc_patchfile.get());
    println!("compression format {}", header.old_file_compression_format.get());
    println!(
        "old blocks         {} x {} bytes",
        header.blocks_oldfile.get(),
        header.blocksize_oldfile.get()
    );
    println!(
        "new blocks         {} x {} bytes",
        header.blocks_newfile.get(),
        header.blocksize_newfile.get()
    );
    if let Some(crc) = info.prefix.crc {
        println!("new image CRC      {:#010x}", crc);
    }
    println!("binary header      {} bytes", header.binary_header_size.get());
    println!("compression header {} bytes", header.comp_header_size.get());
    println!();
    println!(
        "{:>6} {:<6} {:>8} {:>8} {:>10} {:>8} {:>8} {:>8}",
        "block", "token", "comp", "size", "crc", "ctrl", "diff", "extra"
    );
    for block in &info.blocks {
        println!(
            "{:>6} {:<6} {:>8} {:>8} {:#010x} {:>8} {:>8} {:>8}",
            block.block_number.get(),
            block.token().map(|token| token.to_string()).unwrap_or_default(),
            block.new_block_size_c.get(),
            block.new_block_size_u.get(),
            block.new_block_crc.get(),
            block.size_ctrl_block.get(),
            block.size_diff_block.get(),
            block.size_extra_block.get()
        );
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args: Args = argh::from_env();
    match args.command {
        Command::Compressed(args) => {
            let inputs = Inputs::compressed(open(&args.old)?, open(&args.new)?, open(&args.new_compressed)?);
            generate(inputs, &args.patch)
        }
        Command::Uncompressed(args) => {
            let inputs = match args.mode {
                Mode::Elf => Inputs::elf(open(&args.old)?, open(&args.new)?),
                Mode::Kernel => Inputs::kernel(open(&args.old)?, open(&args.new)?),
                Mode::Compressed => bail!("compressed images need the `compressed` subcommand"),
            };
            generate(inputs, &args.patch)
        }
        Command::Apply(args) => apply_patch(&args),
        Command::Info(args) => {
            let info = inspect(&mut open(&args.patch)?)
                .with_context(|| format!("failed to read {}", args.patch.display()))?;
            print_info(&info);
            Ok(())
        }
    }
}
