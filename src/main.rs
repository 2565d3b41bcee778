use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process;

use seqtrain::data::{single_tensor, FromFileList};
use seqtrain::ReaderError;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "seqtrain", version, about = "Recurrent sequence models and their numpy inputs")]
struct Cli {
    /// Log debug output
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Load .npy files (concatenated along the first axis) and print a summary
    Inspect {
        /// Input .npy files
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Validate every array named by the given list files
    CheckList {
        /// Directory the listed paths are relative to
        #[arg(long)]
        prefix: PathBuf,
        /// Expected shape, e.g. 3,4
        #[arg(long, value_delimiter = ',', required = true)]
        shape: Vec<usize>,
        /// Appended to every listed path
        #[arg(long, default_value = "")]
        suffix: String,
        /// Entry to read from each .npz file
        #[arg(long, default_value = "arr_0")]
        tensor_name: String,
        /// Plain-text list files, one path per line
        #[arg(required = true)]
        lists: Vec<PathBuf>,
    },
}

fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("warning: cannot install logger: {}", e);
    }

    match cli.command {
        Command::Inspect { files } => cmd_inspect(&files),
        Command::CheckList {
            prefix,
            shape,
            suffix,
            tensor_name,
            lists,
        } => cmd_check_list(prefix, shape, suffix, tensor_name, &lists),
    }
}

/// Shape and value range of the loaded arrays.
#[derive(Debug, PartialEq)]
struct Summary {
    shape: Vec<usize>,
    min: f32,
    max: f32,
    mean: f64,
}

fn inspect(files: &[PathBuf]) -> Result<Summary, ReaderError> {
    let array = single_tensor(files)?;
    let (min, max, sum) = array.iter().fold(
        (f32::INFINITY, f32::NEG_INFINITY, 0.0f64),
        |(min, max, sum), &v| (min.min(v), max.max(v), sum + v as f64),
    );
    Ok(Summary {
        shape: array.shape().to_vec(),
        min,
        max,
        mean: sum / array.len().max(1) as f64,
    })
}

fn cmd_inspect(files: &[PathBuf]) {
    let summary = match inspect(files) {
        Ok(summary) => summary,
        Err(e) => {
            eprintln!("error: {}", e);
            process::exit(1);
        }
    };

    println!("files: {}", files.len());
    println!("shape: {:?}", summary.shape);
    if summary.shape.iter().product::<usize>() > 0 {
        println!("min:   {}", summary.min);
        println!("max:   {}", summary.max);
        println!("mean:  {}", summary.mean);
    }
}

/// Number of valid arrays, or the count reached before the first error.
fn check_list(reader: &FromFileList, lists: &[PathBuf]) -> Result<usize, (usize, ReaderError)> {
    let mut checked = 0usize;
    for array in reader.load(lists) {
        array.map_err(|e| (checked, e))?;
        checked += 1;
    }
    Ok(checked)
}

fn cmd_check_list(prefix: PathBuf, shape: Vec<usize>, suffix: String, tensor_name: String, lists: &[PathBuf]) {
    let reader = FromFileList::new(prefix, shape)
        .with_suffix(suffix)
        .with_tensor_name(tensor_name);

    match check_list(&reader, lists) {
        Ok(checked) => println!("{} arrays of shape {:?}", checked, reader.shape()),
        Err((checked, e)) => {
            eprintln!("error: after {} valid arrays: {}", checked, e);
            process::exit(1);
        }
    }
}
