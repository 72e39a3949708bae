use anyhow::Context;
use clap::Parser;
use platsim::core::harness::OutputTarget;
use platsim::core::interrupt::INTERRUPTED_EXIT_CODE;
use platsim::domain::model::{RunId, Stats};
use platsim::utils::error::ErrorCategory;
use platsim::utils::{logger, validation::Validate};
use platsim::core::{AttributeResolver, AttributeSpec, Species};
use platsim::{CliConfig, EngineConfig, PlatformConfig, PlatformError, SchemaRegistry, SimContext};
use std::path::{Path, PathBuf};

#[tokio::main]
async fn main() {
    let cli = CliConfig::parse();

    if std::env::var_os("PLATSIM_LOG_JSON").is_some() {
        logger::init_json_logger();
    } else {
        logger::init_cli_logger(cli.verbose);
    }

    tracing::info!("Starting platsim");
    tracing::debug!("CLI config: {:?}", cli);

    if let Err(e) = cli.validate() {
        tracing::error!("❌ Invalid arguments: {}", e);
        eprintln!("❌ {}", e);
        std::process::exit(1);
    }

    let result = if cli.schema {
        list_schema().await
    } else {
        run(&cli).await
    };

    if let Err(e) = result {
        let exit_code = match e.downcast_ref::<PlatformError>() {
            Some(PlatformError::Interrupted) => INTERRUPTED_EXIT_CODE,
            Some(err) => {
                tracing::error!("❌ {} (category: {:?})", err, err.category());
                tracing::error!("💡 Recovery suggestion: {}", err.recovery_suggestion());
                eprintln!("💡 {}", err.recovery_suggestion());
                match err.category() {
                    ErrorCategory::Configuration => 1,
                    ErrorCategory::Topology | ErrorCategory::Serialization => 2,
                    ErrorCategory::Execution => 3,
                    ErrorCategory::Io => 4,
                }
            }
            None => 1,
        };
        eprintln!("❌ {:#}", e);
        std::process::exit(exit_code);
    }
}

async fn list_schema() -> anyhow::Result<()> {
    let engine = EngineConfig::from_env()?;
    let schema = SchemaRegistry::discover(&engine.executable)
        .await
        .with_context(|| format!("failed to read the manifest of {}", engine.executable.display()))?;

    let resolver = AttributeResolver::with_defaults();
    for species in schema.iter() {
        println!(
            "{} (inputs: {}, outputs: {})",
            species.name(),
            species.max_inputs(),
            species.max_outputs()
        );
        for attribute in species.attributes() {
            println!("    {}", describe_attribute(&resolver, species, attribute));
        }
    }
    tracing::info!("📋 {} component species available", schema.len());
    Ok(())
}

/// Required attributes backed by a stock formula need not be set by hand.
fn describe_attribute(resolver: &AttributeResolver, species: &Species, attribute: &AttributeSpec) -> String {
    match &attribute.default {
        Some(default) => format!("{} = {}", attribute.name, default),
        None if resolver.has_formula(species.name(), &attribute.name) => {
            format!("{} (computed)", attribute.name)
        }
        None => format!("{} (required)", attribute.name),
    }
}

async fn run(cli: &CliConfig) -> anyhow::Result<()> {
    tracing::info!("📁 Loading platform description from: {}", cli.config);
    let config = PlatformConfig::from_file(&cli.config)
        .with_context(|| format!("failed to load platform description '{}'", cli.config))?;
    config.validate()?;

    let mut engine = config.engine_config()?;
    if let Some(workers) = cli.max_workers {
        engine.max_workers = workers;
    }
    let schema = SchemaRegistry::discover(&engine.executable)
        .await
        .with_context(|| format!("failed to read the manifest of {}", engine.executable.display()))?;
    tracing::info!("🔧 Engine provides {} component species", schema.len());

    let ctx = SimContext::new(engine, schema)?;
    let topology = config.build_topology(&ctx)?;

    let mut options = config.build_options()?;
    if let Some(format) = cli.format()? {
        options.formats = vec![format];
    }
    if let Some(output) = &cli.output {
        options.output = Some(OutputTarget::Path(PathBuf::from(output)));
    }

    if cli.dry_run {
        tracing::info!("🔍 DRY RUN MODE - nothing is written or simulated");
        for &format in &options.formats {
            print!("{}", topology.render(format, ctx.resolver())?);
        }
        return Ok(());
    }

    options.simulate |= cli.simulate;
    if !options.simulate {
        let outcome = ctx.build(&topology, &options).await?;
        for path in &outcome.written {
            println!("📁 Document saved to: {}", path.display());
        }
        return Ok(());
    }

    if cli.runs == 1 {
        let stats = ctx.run(&topology, &options).await?;
        report(None, stats.as_ref(), cli.stats_out.as_deref())?;
        return Ok(());
    }

    for i in 0..cli.runs {
        // Every run renders the same document; write it once.
        let run_options = if i == 0 {
            options.clone()
        } else {
            options.clone().output(None)
        };
        ctx.submit(&topology, &run_options).await?;
    }
    tracing::info!("⏳ Waiting for {} runs on {} workers", cli.runs, ctx.max_workers());

    let mut ready = ctx.drain_ready();
    while let Some(outcome) = ready.next().await {
        report(Some(outcome.id), outcome.stats.as_ref(), cli.stats_out.as_deref())?;
    }
    Ok(())
}

fn report(run: Option<RunId>, stats: Option<&Stats>, stats_out: Option<&str>) -> anyhow::Result<()> {
    let label = run.map_or_else(|| "run".to_string(), |id| id.to_string());
    let Some(stats) = stats else {
        println!("⚠️  {}: no statistics reported", label);
        return Ok(());
    };

    println!("✅ {}: {} metrics", label, stats.metric_count());
    for (component, metric, value) in stats.rows() {
        println!("    {}.{} = {} {}", component, metric, value.value, value.unit);
    }

    if let Some(path) = stats_out {
        let path = match run {
            Some(id) => with_run_suffix(Path::new(path), id),
            None => PathBuf::from(path),
        };
        stats
            .write_to(&path)
            .with_context(|| format!("failed to write statistics to {}", path.display()))?;
        println!("📁 Statistics saved to: {}", path.display());
    }
    Ok(())
}

/// `stats.json` becomes `stats-run-3.json`.
fn with_run_suffix(path: &Path, run: RunId) -> PathBuf {
    let stem = path.file_stem().map_or_else(String::new, |s| s.to_string_lossy().into_owned());
    let name = match path.extension() {
        Some(ext) => format!("{}-{}.{}", stem, run, ext.to_string_lossy()),
        None => format!("{}-{}", stem, run),
    };
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use platsim::core::PortLimit;

    #[test]
    fn test_describe_attribute_marks_stock_formulas() {
        let resolver = AttributeResolver::with_defaults();
        let memory = Species::new(
            "Memory",
            vec![
                AttributeSpec::required("size"),
                AttributeSpec::required("base_address"),
                AttributeSpec::optional("latency", "3"),
            ],
            PortLimit::Bounded(1),
            PortLimit::Bounded(0),
        );
        let lines: Vec<_> = memory
            .attributes()
            .iter()
            .map(|a| describe_attribute(&resolver, &memory, a))
            .collect();
        assert_eq!(lines, vec!["size (computed)", "base_address (required)", "latency = 3"]);
    }

    #[test]
    fn test_run_suffix() {
        assert_eq!(with_run_suffix(Path::new("out/stats.json"), RunId(3)), PathBuf::from("out/stats-run-3.json"));
        assert_eq!(with_run_suffix(Path::new("stats"), RunId(1)), PathBuf::from("stats-run-1"));
    }
}
