use std::env;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use env_logger::Builder;
use log::{debug, error, info, LevelFilter};

use jalnetra_pipelines::cli::{self, Arguments};
use jalnetra_pipelines::config::defs::{PipelineError, RunConfig};
use jalnetra_pipelines::pipelines::state::{PipelineStage, StageError};
use jalnetra_pipelines::pipelines::{classify_otus, edna_classify};
use jalnetra_pipelines::utils::fastx::sample_base_name;
use jalnetra_pipelines::utils::report::ReportPaths;
use jalnetra_pipelines::utils::system::{detect_cores_and_load, detect_ram};


#[tokio::main]
async fn main() -> Result<()> {
    let run_start = Instant::now();

    let args = cli::parse();

    let log_level = if args.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    Builder::new()
        .filter_level(log_level)
        .format(|buf, record| {
            writeln!(
                buf,
                "[{}] {}: {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.args()
            )
        })
        .init();

    println!("\n-------------\n Jalnetra eDNA\n-------------\n");

    let dir = env::current_dir()?;
    info!("The current directory is {:?}", dir);

    let (max_cores, cpu_load) = detect_cores_and_load(args.threads).await?;
    debug!("Using {} worker threads; CPU load {:.1}%", max_cores, cpu_load);

    let (total_ram, available_ram) = detect_ram()?;
    debug!("Available RAM: {} bytes (~{} GiB)", available_ram, available_ram / 1_073_741_824);
    debug!("Total RAM: {} bytes (~{} GiB)", total_ram, total_ram / 1_073_741_824);

    let module = args.module.clone();
    let result = match build_run_config(args, dir, max_cores, available_ram) {
        Ok(run_config) => {
            let run_config = Arc::new(run_config);
            info!("Sample {} -> {}", run_config.sample_name, run_config.out_dir.display());
            match module.as_str() {
                "edna_classify" => edna_classify_run(run_config).await,
                "classify_otus" => classify_otus_run(run_config).await,
                _ => Err(startup_error(PipelineError::InvalidConfig(format!("Invalid module: {}", module)))),
            }
        }
        Err(e) => Err(startup_error(e)),
    };

    match result {
        Ok(paths) => {
            info!("Per-OTU report: {}", paths.otu_report.display());
            info!("Taxon summary: {}", paths.summary_report.display());
        }
        Err(e) => {
            error!("Pipeline failed: {} at {} milliseconds.", e, run_start.elapsed().as_millis());
            std::process::exit(1);
        }
    }

    println!("Run complete: {} milliseconds.", run_start.elapsed().as_millis());
    Ok(())
}


async fn edna_classify_run(run_config: Arc<RunConfig>) -> Result<ReportPaths, StageError> {
    edna_classify::run(run_config).await
}

async fn classify_otus_run(run_config: Arc<RunConfig>) -> Result<ReportPaths, StageError> {
    classify_otus::run(run_config).await
}

fn startup_error(source: PipelineError) -> StageError {
    StageError { stage: PipelineStage::Idle, source }
}


fn build_run_config(
    args: Arguments,
    cwd: PathBuf,
    threads: usize,
    available_ram: u64,
) -> Result<RunConfig, PipelineError> {
    let sample_name = sample_name(&args)?;
    let out_dir = setup_output_dir(&args, &cwd, &sample_name)?;
    Ok(RunConfig::new(args, cwd, out_dir, sample_name, threads, available_ram)?)
}

/// Sample name from `--sample-name`, else derived from the R1 (or OTU FASTA) file name.
fn sample_name(args: &Arguments) -> Result<String, PipelineError> {
    if let Some(name) = &args.sample_name {
        let name = name.trim();
        if name.is_empty() || name.contains(std::path::MAIN_SEPARATOR) {
            return Err(PipelineError::InvalidConfig(format!("Invalid sample name '{}'", name)));
        }
        return Ok(name.to_string());
    }
    match args.file1.as_ref().or(args.otus.as_ref()) {
        Some(file) => Ok(sample_base_name(Path::new(file))),
        None => Err(PipelineError::Input("An input file (-i or --otus) is required".to_string())),
    }
}

/// Sets up output directory
/// If `out_dir` is specified from args, uses it;
/// otherwise, creates a directory named `<sample_base>_YYYYMMDD`.
/// Ensures the directory exists.
///
/// # Arguments
/// * `args` - The parsed command-line arguments.
/// * `cwd` - The current working directory.
/// * `sample_name` - Sample base used for the default directory name.
/// # Returns
/// path to the output directory.
fn setup_output_dir(args: &Arguments, cwd: &Path, sample_name: &str) -> Result<PathBuf, PipelineError> {
    let out_dir = match &args.out_dir {
        Some(out) => {
            let path = PathBuf::from(out);
            if path.is_absolute() {
                path
            } else {
                cwd.join(path)
            }
        }
        None => {
            let date = chrono::Local::now().format("%Y%m%d");
            cwd.join(format!("{}_{}", sample_name, date))
        }
    };

    std::fs::create_dir_all(&out_dir)
        .map_err(|e| PipelineError::IOError(format!("Failed to create output directory {}: {}", out_dir.display(), e)))?;
    info!("Output directory: {}", out_dir.display());
    Ok(out_dir)
}
