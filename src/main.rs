use clap::{Parser, Subcommand};
use log::LevelFilter;
use pack_organizer::config::{self, OrganizerConfig};
use pack_organizer::metadata::MetadataCodec;
use pack_organizer::output;
use pack_organizer::pipeline::{Pipeline, pack_info};
use pack_organizer::progress::{LogSink, Reporter};
use pack_organizer::transform::Transformer;
use std::io::Write;
use std::path::{Path, PathBuf};

fn version_string() -> &'static str {
    let on_tag = env!("ON_RELEASE_TAG");
    if on_tag == "true" {
        env!("CARGO_PKG_VERSION")
    } else {
        let hash = env!("GIT_HASH");
        if hash.is_empty() {
            "dev@unknown"
        } else {
            // Leaked once at startup
            Box::leak(format!("dev@{hash}").into_boxed_str())
        }
    }
}

#[derive(Parser)]
#[command(name = "pack-organizer")]
#[command(about = "Organize illustration packs for publishing")]
#[command(long_about = "\
Organize illustration packs for publishing

A pack is a directory of images. Point a command at a single pack, or at a
directory whose subdirectories are packs.

Pack layout after `process`:

  PackA/
  ├── metadata.json                # Written by `extract`, read by `process`
  ├── characters.txt               # Character names from metadata.json
  ├── PackA-19-10-2026.zip         # Archive of the full-quality copies
  ├── original_images/             # Sources, moved here once processed
  ├── preview_Images/image_1.webp  # Previews
  ├── free_post/image_1.jpeg       # Watermarked copies
  └── pixiv_safe/                  # Output of `transform`

Typical flow:

  pack-organizer extract packs/
  pack-organizer process packs/ --watermark mark.png
  pack-organizer transform packs/PackA

Run 'pack-organizer gen-config' to generate a documented pack-organizer.toml.")]
#[command(version = version_string())]
struct Cli {
    /// Config file (missing file means defaults)
    #[arg(long, default_value = config::CONFIG_FILE_NAME, global = true)]
    config: PathBuf,

    /// Log debug output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Read embedded metadata from every image into metadata.json
    Extract {
        /// A pack, or a directory of packs
        root: PathBuf,
    },
    /// Render previews, watermarked copies and archives
    Process {
        /// A pack, or a directory of packs
        root: PathBuf,
        /// Watermark image (overrides the config file)
        #[arg(long)]
        watermark: Option<PathBuf>,
    },
    /// Run original_images/ through the external transform into pixiv_safe/
    Transform {
        /// Pack directories
        #[arg(required = true)]
        packs: Vec<PathBuf>,
    },
    /// Show a pack's state without changing it
    Info {
        pack: PathBuf,
    },
    /// Print a stock pack-organizer.toml with all options documented
    GenConfig,
}

fn init_logging(verbose: bool) {
    let level = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    env_logger::Builder::new()
        .format(|buf, record| {
            writeln!(
                buf,
                "{} {:<5} {}",
                buf.timestamp_seconds(),
                record.level(),
                record.args()
            )
        })
        .filter(None, level)
        .parse_default_env()
        .target(env_logger::Target::Stdout)
        .init();
}

fn load(path: &Path) -> Result<OrganizerConfig, config::ConfigError> {
    let config = config::load_config(path)?;
    if path.exists() {
        log::debug!("loaded config from {}", path.display());
    }
    Ok(config)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let sink = LogSink;
    let reporter = Reporter::new(&sink);

    match cli.command {
        Command::Extract { root } => {
            let config = load(&cli.config)?;
            let report = Pipeline::new(&config, reporter).extract_metadata(&root)?;
            output::print_run_report(&report);
        }
        Command::Process { root, watermark } => {
            let mut config = load(&cli.config)?;
            if let Some(path) = watermark {
                config.watermark.path = path;
            }
            config.validate()?;
            let report = Pipeline::new(&config, reporter).process_images(&root)?;
            output::print_run_report(&report);
        }
        Command::Transform { packs } => {
            let config = load(&cli.config)?;
            let codec = MetadataCodec::new(config.metadata.max_embed_bytes);
            let transformer = Transformer::new(&config.transform, codec, reporter);
            let mut failures = 0;
            for (i, pack) in packs.iter().enumerate() {
                match transformer.process_pack(pack) {
                    Ok(report) => {
                        failures += report.failed;
                        output::print_transform_report(i + 1, &report);
                    }
                    Err(e) => {
                        failures += 1;
                        log::error!("{}: {e}", pack.display());
                    }
                }
            }
            if failures > 0 {
                return Err(format!("{failures} transform failures").into());
            }
        }
        Command::Info { pack } => {
            let config = load(&cli.config)?;
            let info = pack_info(&pack)?;
            let codec = MetadataCodec::new(config.metadata.max_embed_bytes);
            let transformer = Transformer::new(&config.transform, codec, reporter);
            let descriptor = match transformer.describe_descriptor() {
                Ok(d) => Some(d),
                Err(e) => {
                    log::debug!("workflow descriptor unavailable: {e}");
                    None
                }
            };
            output::print_pack_info(&info, descriptor.as_ref());
        }
        Command::GenConfig => {
            print!("{}", config::stock_config_toml());
        }
    }

    Ok(())
}
