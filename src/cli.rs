use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Clone, Parser)]
#[command(name = "class-linemap")]
#[command(about = "Point class file line numbers at lines of decompiled sources")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true)]
    pub quiet: bool,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Commands {
    /// Save decompiled sources and patch line numbers in the input jar.
    Apply {
        #[arg(long, value_name = "JAR")]
        input: PathBuf,

        /// Decompiler output, one JSON object per class.
        #[arg(long, value_name = "FILE")]
        units: PathBuf,

        /// Zip that receives the decompiled sources.
        #[arg(long, value_name = "ZIP")]
        output: PathBuf,

        #[arg(long, value_name = "N")]
        threads: Option<usize>,
    },
    /// Remap a single class file.
    Remap {
        #[arg(long, value_name = "FILE")]
        class: PathBuf,

        /// Flat original,target pairs, e.g. 10,100,20,200
        #[arg(long, value_delimiter = ',', allow_hyphen_values = true)]
        mapping: Vec<i32>,

        /// Defaults to rewriting the class file in place.
        #[arg(short = 'o', long, value_name = "FILE")]
        output: Option<PathBuf>,
    },
    /// Print the line-number tables of a class.
    Lines(LinesArgs),
}

#[derive(Debug, Clone, Args)]
#[group(required = true, multiple = false)]
pub struct LinesSource {
    /// Internal class name inside --jar, e.g. com/example/Foo
    #[arg(long, value_name = "NAME", requires = "jar")]
    pub class: Option<String>,

    #[arg(long, value_name = "FILE")]
    pub class_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Args)]
pub struct LinesArgs {
    #[arg(long, value_name = "JAR")]
    pub jar: Option<PathBuf>,

    #[command(flatten)]
    pub source: LinesSource,
}
