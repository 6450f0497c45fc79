use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use cloudkit_pipeline::args_file::{load_config_from_file, merge_configs};
use cloudkit_pipeline::stages::{ReaderParams, Source, WriterParams};
use cloudkit_pipeline::{FormatDescriptor, FormatKind, Pipeline, PipelineConfig};
use indicatif::{MultiProgress, ProgressBar};
use indicatif_log_bridge::LogWrapper;

#[derive(Parser)]
#[command(
    author,
    version,
    about = "cloudkit - filter, mesh and convert point clouds"
)]
struct Cli {
    /// Point cloud or mesh to read (ply, vtk, xyz, obj or stl).
    #[arg(value_name = "PATH")]
    input: PathBuf,
    /// Where to write the result. Without it only a summary is logged.
    #[arg(short, long, value_name = "PATH")]
    output: Option<PathBuf>,
    /// Format of the input, when the extension doesn't tell.
    #[arg(long, value_enum)]
    input_format: Option<FormatKind>,
    /// Format of the output, when the extension doesn't tell.
    #[arg(long, value_enum)]
    output_format: Option<FormatKind>,
    /// Write binary output where the format has a binary encoding.
    #[arg(long, default_value = "false")]
    binary: bool,
    /// File with more pipeline options. Options on the command line win.
    #[arg(long, value_name = "PATH")]
    args_file: Option<PathBuf>,
    #[clap(flatten)]
    pipeline: PipelineConfig,
}

impl Cli {
    fn reader(&self) -> anyhow::Result<ReaderParams> {
        let kind = match self.input_format {
            Some(kind) => kind,
            None => FormatKind::from_path(&self.input).with_context(|| {
                format!(
                    "Can't tell the format of {}, pass --input-format",
                    self.input.display()
                )
            })?,
        };
        // Binary encodings are detected from the content.
        Ok(ReaderParams::new(
            Source::Path(self.input.clone()),
            FormatDescriptor::text(kind),
        ))
    }

    fn writer(&self) -> anyhow::Result<Option<WriterParams>> {
        let Some(output) = &self.output else {
            return Ok(None);
        };
        let kind = match self.output_format {
            Some(kind) => kind,
            None => FormatKind::from_path(output).with_context(|| {
                format!(
                    "Can't tell the format of {}, pass --output-format",
                    output.display()
                )
            })?,
        };
        Ok(Some(WriterParams::to_file(
            output,
            FormatDescriptor::new(kind, self.binary),
        )))
    }

    fn config(&self) -> anyhow::Result<PipelineConfig> {
        let Some(path) = &self.args_file else {
            return Ok(self.pipeline.clone());
        };
        let from_file = load_config_from_file(path)
            .with_context(|| format!("Failed to load options from {}", path.display()))?;
        Ok(merge_configs(&from_file, &self.pipeline))
    }
}

fn init_logging(multi: &MultiProgress) -> anyhow::Result<()> {
    let logger =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
            .target(env_logger::Target::Stdout)
            .build();
    let level = logger.filter();
    LogWrapper::new(multi.clone(), logger)
        .try_init()
        .context("Failed to set up logging")?;
    log::set_max_level(level);
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let multi = MultiProgress::new();
    init_logging(&multi)?;

    let config = cli.config()?;
    let mut pipeline = Pipeline::new();
    let mut last = config.build(&mut pipeline, cli.reader()?)?;
    if let Some(writer) = cli.writer()? {
        last = pipeline.add_stage(last, writer)?;
    }

    let spinner = multi.add(ProgressBar::new_spinner());
    spinner.enable_steady_tick(Duration::from_millis(120));
    spinner.set_message(format!("Processing {}", cli.input.display()));
    let result = pipeline.pull(last);
    spinner.finish_and_clear();

    let result = result.with_context(|| format!("Failed to process {}", cli.input.display()))?;
    match result.bounds() {
        Some(bounds) => log::info!(
            "Result has {} points and {} cells, bounds {} to {}",
            result.point_count(),
            result.cell_count(),
            bounds.min,
            bounds.max
        ),
        None => log::info!("Result is empty"),
    }
    Ok(())
}
