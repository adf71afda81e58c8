mod bootstrap;

use anyhow::Result;
use cyclelog_core::error::CyclerError;
use cyclelog_core::settings::Settings;
use cyclelog_data::summary::DatasetSummary;
use cyclelog_export::{CsvExporter, TableSink};
use cyclelog_runtime::processor::{Processor, ProcessorConfig};
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::load_with_defaults();

    bootstrap::setup_logging(&settings.log_level, settings.log_file.as_deref())?;

    info!("cyclelog v{} starting", env!("CARGO_PKG_VERSION"));
    info!(
        "Data path: {}, workers: {}, extra files: {}",
        settings.data_path.display(),
        settings.worker_count(),
        settings.extra_files.as_str()
    );

    if let Err(err) = run(&settings).await {
        error!("{err}");
        eprintln!("{}: {err}", err.kind());
        std::process::exit(1);
    }
    Ok(())
}

async fn run(settings: &Settings) -> cyclelog_core::Result<()> {
    let processor = Processor::open(&settings.data_path, ProcessorConfig::from(settings))?;
    let result = processor.run().await?;

    if settings.summary {
        let statistics = DatasetSummary::from_dataset(&result.dataset);
        let report = serde_json::json!({
            "battery": result.battery,
            "equipment": result.equipment,
            "statistics": statistics,
            "anomalies": result.anomalies,
        });
        let text = serde_json::to_string_pretty(&report)
            .map_err(|e| CyclerError::Other(e.into()))?;
        println!("{text}");
    }

    if settings.no_export {
        info!("Export skipped (--no-export)");
        return Ok(());
    }

    let output_dir = bootstrap::ensure_output_dir(&settings.resolved_output_dir())?;
    let mut exporter =
        CsvExporter::new(output_dir).with_separate_channels(settings.separate_channels);
    for path in exporter.write_dataset(&result)? {
        println!("{}", path.display());
    }
    Ok(())
}
