use anyhow::{Context, Result};
use clap::Parser;
use class_linemap::archive::ArchiveStore;
use class_linemap::batch::{BatchConfig, run_batch};
use class_linemap::classfile::{ClassFile, MethodLines};
use class_linemap::cli::{Cli, Commands, LinesArgs};
use class_linemap::config::{log_filter, resolve_threads};
use class_linemap::manifest::read_units;
use class_linemap::mapping::LineMapping;
use class_linemap::remap::{RemapReport, remap_class};
use class_linemap::sink::ZipTextSink;
use serde::Serialize;
use std::path::{Path, PathBuf};

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli);

    match cli.command {
        Commands::Apply {
            input,
            units,
            output,
            threads,
        } => {
            let config = BatchConfig {
                threads: resolve_threads(threads)?,
            };
            let units = read_units(&units)?;
            let sink = ZipTextSink::create(&output)?;
            let summary = run_batch(&input, &units, &sink, &config)?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Commands::Remap {
            class,
            mapping,
            output,
        } => {
            let result = remap_file(&class, &mapping, output)?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Commands::Lines(args) => {
            let result = class_lines(&args)?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
    }

    Ok(())
}

fn init_logging(cli: &Cli) {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if let Some(level) = log_filter(cli.quiet, cli.verbose) {
        builder.filter_level(level);
    }
    builder.target(env_logger::Target::Stderr).init();
}

#[derive(Debug, Serialize)]
struct RemapResult {
    class_path: String,
    output_path: String,
    changed: bool,
    report: RemapReport,
}

fn remap_file(class: &Path, flat: &[i32], output: Option<PathBuf>) -> Result<RemapResult> {
    let bytes = std::fs::read(class)
        .with_context(|| format!("Failed to read class file: {}", class.display()))?;
    let mapping = LineMapping::from_flat(flat)?;
    let (patched, report) = remap_class(&bytes, &mapping)
        .with_context(|| format!("Failed to remap {}", class.display()))?;

    let target = output.unwrap_or_else(|| class.to_path_buf());
    if let Some(parent) = target.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&target, &patched)
        .with_context(|| format!("Failed to write class file: {}", target.display()))?;

    Ok(RemapResult {
        class_path: class.to_string_lossy().to_string(),
        output_path: target.to_string_lossy().to_string(),
        changed: patched != bytes,
        report,
    })
}

#[derive(Debug, Serialize)]
struct LinesResult {
    source: String,
    methods: Vec<MethodLines>,
}

fn class_lines(args: &LinesArgs) -> Result<LinesResult> {
    let (source, bytes) = match (&args.source.class_file, &args.source.class, &args.jar) {
        (Some(file), _, _) => (
            file.to_string_lossy().to_string(),
            std::fs::read(file)
                .with_context(|| format!("Failed to read class file: {}", file.display()))?,
        ),
        (None, Some(name), Some(jar)) => {
            let entry = format!("{}.class", name.replace('.', "/"));
            let store = ArchiveStore::new();
            let bytes = store.read(jar, &entry)?;
            store.close_all()?;
            (format!("{}!/{entry}", jar.display()), bytes)
        }
        _ => anyhow::bail!("Either --class-file or --jar with --class is required"),
    };

    let class = ClassFile::parse(&bytes).with_context(|| format!("Failed to parse {source}"))?;
    Ok(LinesResult {
        source,
        methods: class.methods().to_vec(),
    })
}
