use clap::{Parser, Subcommand};
use squish::config::{self, CompressConfig, ConfigError};
use squish::output;
use squish::pipeline::{CancelToken, CompressSettings, Compressor};
use squish::source::{self, ImageSource};
use std::path::{Path, PathBuf};

fn version_string() -> &'static str {
    let on_tag = env!("SQUISH_ON_RELEASE_TAG");
    if on_tag == "true" {
        env!("CARGO_PKG_VERSION")
    } else {
        let hash = env!("SQUISH_GIT_HASH");
        if hash.is_empty() {
            "dev@unknown"
        } else {
            // Leaked once at startup
            Box::leak(format!("dev@{hash}").into_boxed_str())
        }
    }
}

#[derive(Parser)]
#[command(name = "squish")]
#[command(about = "Compress images to size-bounded JPEGs for upload")]
#[command(long_about = "\
Compress images to size-bounded JPEGs for upload

Every image goes through the same stages:

  decode     header probe, power-of-two subsampling, retried on out-of-memory
  orient     EXIF orientation applied to the pixels (best effort)
  scale      longer side fitted to the bounds, aspect ratio kept
  check      estimated encode peak must fit in available memory
  encode     highest JPEG quality whose output fits the target size

Inputs can be files, directories (their photos, non-recursive) or - for stdin.
Results are written as new files; inputs are never modified.

Run 'squish gen-config' to generate a documented squish.toml.")]
#[command(version = version_string())]
struct Cli {
    /// Config file (default: ./squish.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Compress images to the target size
    Compress(CompressArgs),
    /// Show what compression would do without decoding pixels
    Probe {
        /// Image file, or - for stdin
        input: PathBuf,
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Print a stock squish.toml with all options documented
    GenConfig,
}

#[derive(clap::Args)]
struct CompressArgs {
    /// Image files, directories of photos, or - for stdin
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Target size per image, e.g. 2MiB, 500K or 1048576
    #[arg(long, value_parser = parse_size)]
    target_size: Option<u64>,

    /// Maximum output width in pixels
    #[arg(long)]
    max_width: Option<u32>,

    /// Maximum output height in pixels
    #[arg(long)]
    max_height: Option<u32>,

    /// Directory for compressed files (default: system temp dir)
    #[arg(long)]
    out_dir: Option<PathBuf>,

    /// Print a JSON report instead of text
    #[arg(long)]
    json: bool,
}

fn parse_size(value: &str) -> Result<u64, String> {
    config::parse_byte_size(value).map_err(|e| e.to_string())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();

    match cli.command {
        Command::Compress(args) => {
            let mut config = load_config(cli.config.as_deref())?;
            apply_overrides(&mut config, &args);
            config.validate()?;
            init_thread_pool(&config.processing);

            let sources = gather_inputs(&args.inputs)?;
            if sources.is_empty() {
                println!("No images found");
                return Ok(());
            }
            let labels: Vec<String> = sources.iter().map(ImageSource::label).collect();
            let compressor = Compressor::new(CompressSettings::from(&config));
            let cancel = CancelToken::new();

            let results = if args.json {
                compressor.compress_batch(&sources, &cancel, None)
            } else {
                let (tx, rx) = std::sync::mpsc::channel();
                let printer = std::thread::spawn(move || {
                    for event in rx {
                        for line in output::format_compress_event(&event) {
                            println!("{}", line);
                        }
                    }
                });
                let results = compressor.compress_batch(&sources, &cancel, Some(tx));
                printer.join().map_err(|_| "output thread panicked")?;
                results
            };

            if args.json {
                let report = output::format_json_report(&labels, &results);
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                output::print_summary(&results);
            }
            if results.iter().any(Result::is_err) {
                std::process::exit(1);
            }
        }
        Command::Probe { input, json } => {
            let config = load_config(cli.config.as_deref())?;
            let source = open_input(&input)?;
            let compressor = Compressor::new(CompressSettings::from(&config));
            let report = compressor.probe(&source)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                output::print_probe(&report);
            }
        }
        Command::GenConfig => {
            print!("{}", config::stock_config_toml());
        }
    }

    Ok(())
}

/// Explicit `--config` must exist; otherwise `./squish.toml` is optional.
fn load_config(path: Option<&Path>) -> Result<CompressConfig, ConfigError> {
    match path {
        Some(path) => config::load_config_file(path),
        None => config::load_config(Path::new(".")),
    }
}

fn apply_overrides(config: &mut CompressConfig, args: &CompressArgs) {
    if let Some(size) = args.target_size {
        config.encode.target_size_bytes = size;
    }
    if let Some(width) = args.max_width {
        config.bounds.max_width = width;
    }
    if let Some(height) = args.max_height {
        config.bounds.max_height = height;
    }
    if let Some(dir) = &args.out_dir {
        config.output.dir = Some(dir.clone());
    }
}

fn is_stdin(path: &Path) -> bool {
    path.as_os_str() == "-"
}

fn open_input(path: &Path) -> std::io::Result<ImageSource> {
    if is_stdin(path) {
        ImageSource::from_reader("stdin", std::io::stdin().lock())
    } else {
        Ok(ImageSource::from_path(path))
    }
}

/// Expand inputs in order. Stdin may appear at most once.
fn gather_inputs(inputs: &[PathBuf]) -> Result<Vec<ImageSource>, Box<dyn std::error::Error>> {
    if inputs.iter().filter(|p| is_stdin(p)).count() > 1 {
        return Err("stdin (-) can only be given once".into());
    }
    let mut sources = Vec::new();
    for input in inputs {
        if is_stdin(input) {
            sources.push(open_input(input)?);
        } else {
            sources.extend(source::collect_inputs(std::slice::from_ref(input))?);
        }
    }
    Ok(sources)
}

/// Initialize the rayon thread pool based on processing config.
///
/// Caps at the number of available CPU cores; users can constrain down, not up.
fn init_thread_pool(processing: &config::ProcessingConfig) {
    let threads = config::effective_threads(processing);
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build_global()
        .ok();
}
