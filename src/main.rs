mod cli;

use std::io::{BufRead, Write};
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use colorimeter_correction::job::{run_job, FitJob, JobInput, JobServices, JobStage};
use colorimeter_correction::{
    from_device_corrections, ArtifactSerializer, CancelToken, CorrectionArtifact, CorrectionBody, CorrectionError,
    CorrectionKind, FitJobConfig, MeasurementSetLoader, PhotometricNormalizer, RepositoryOutcome,
};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands, FitArgs, ImportArgs, InspectArgs, PreviewArgs};

fn main() {
    init_tracing();

    if let Err(err) = run() {
        error!(error = %err, "command failed");
        if let Some(correction) = err.downcast_ref::<CorrectionError>() {
            eprintln!("{}", correction.user_message());
        }
        for cause in err.chain().skip(1) {
            error!(cause = %cause, "caused by");
        }
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Fit(args) => fit(args),
        Commands::Inspect(args) => inspect(args),
        Commands::Hash(args) => hash(args),
        Commands::Preview(args) => preview(args),
        Commands::Import(args) => import(args),
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn build_config(args: &FitArgs) -> Result<FitJobConfig> {
    let mut config = match &args.config {
        Some(path) => FitJobConfig::from_json_file(path)
            .map_err(|e| anyhow::anyhow!("{}", e))
            .with_context(|| format!("reading {}", path.display()))?,
        None => FitJobConfig::default(),
    };

    if let Some(kind) = args.kind {
        config.kind = kind.into();
    }
    if let Some(method) = args.method {
        config.method = method.into();
    }
    if args.no_y_correction {
        config.y_correction = false;
    }
    if let Some(observer) = args.observer {
        config.observer = observer;
    }
    if let Some(observer) = args.reference_observer {
        config.reference_observer = observer;
    }
    if args.description.is_some() {
        config.description = args.description.clone();
    }
    if args.display.is_some() {
        config.display = args.display.clone();
    }
    if args.manufacturer.is_some() {
        config.manufacturer = args.manufacturer.clone();
    }
    if args.manufacturer_id.is_some() {
        config.manufacturer_id = args.manufacturer_id.clone();
    }
    if let Some(technology) = &args.technology {
        config.technology = technology.clone();
    }
    if let Some(dir) = &args.output_dir {
        config.output_dir = dir.clone();
    }
    if let Some(policy) = args.overwrite {
        config.overwrite = policy.into();
    }
    if args.argyll_dir.is_some() {
        config.kernel.argyll_dir = args.argyll_dir.clone();
    }
    if args.no_upload {
        config.repository.enabled = false;
    }
    if let Some(url) = &args.repository_url {
        config.repository.base_url = url.clone();
    }

    config.validate()?;
    Ok(config)
}

/// Ask on the terminal before replacing an existing correction
fn confirm_on_terminal(path: &Path, existing: Option<&CorrectionArtifact>) -> bool {
    let mut stderr = std::io::stderr();
    let _ = writeln!(stderr, "{} already exists.", path.display());
    if let Some(stats) = existing.and_then(|artifact| artifact.statistics) {
        let _ = writeln!(
            stderr,
            "Existing fit: avg ΔE94 {:.4}, max ΔE94 {:.4}, avg ΔE00 {:.4}, max ΔE00 {:.4}",
            stats.avg_de94, stats.max_de94, stats.avg_de00, stats.max_de00
        );
    }
    let _ = write!(stderr, "Overwrite? [y/N] ");
    let _ = stderr.flush();

    let mut answer = String::new();
    if std::io::stdin().lock().read_line(&mut answer).is_err() {
        return false;
    }
    matches!(answer.trim(), "y" | "Y" | "yes" | "Yes")
}

fn fit(args: FitArgs) -> Result<()> {
    let config = build_config(&args)?;
    let mut inputs = vec![JobInput::Path(args.reference.clone())];
    match (&args.colorimeter, config.kind) {
        (Some(path), _) => inputs.push(JobInput::Path(path.clone())),
        (None, CorrectionKind::Matrix) => bail!("a matrix correction needs --colorimeter"),
        (None, CorrectionKind::Spectral) => {}
    }

    let services = JobServices::from_config(&config).with_overwrite_gate(Arc::new(confirm_on_terminal));
    let job = FitJob::new(inputs, config);
    let report = run_job(&job, &services, &CancelToken::new(), &|stage| match stage {
        JobStage::Loading { source } => info!(source = %source, "Loading measurements"),
        JobStage::Fitting { kind } => info!(kind = %kind, "Fitting correction"),
        JobStage::Writing { path } => info!(path = %path.display(), "Writing correction"),
        other => info!(stage = ?other, "Job stage"),
    })?;

    if let Some(stats) = report.artifact.statistics {
        println!("avg ΔE94 {:.6}  max ΔE94 {:.6}", stats.avg_de94, stats.max_de94);
        println!("avg ΔE00 {:.6}  max ΔE00 {:.6}", stats.avg_de00, stats.max_de00);
    }
    match &report.repository {
        Some(RepositoryOutcome::LocalOnly(reason)) => warn!(reason = %reason, "Correction kept local only"),
        Some(outcome) => info!(outcome = ?outcome, "Repository"),
        None => {}
    }
    println!("{}", report.path.display());
    Ok(())
}

fn read_artifact(path: &Path) -> Result<(String, CorrectionArtifact)> {
    let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let artifact = ArtifactSerializer::new().parse(&text, &path.display().to_string())?;
    Ok((text, artifact))
}

fn inspect(args: InspectArgs) -> Result<()> {
    let (_, artifact) = read_artifact(&args.path)?;
    let meta = &artifact.metadata;

    println!("Type:        {}", artifact.kind().file_type());
    println!("Descriptor:  {}", meta.description);
    if let Some(instrument) = &meta.instrument {
        println!("Instrument:  {}", instrument);
    }
    if let Some(reference) = &meta.reference_instrument {
        println!("Reference:   {}", reference);
    }
    if let Some(display) = &meta.display {
        println!("Display:     {}", display);
    }
    println!("Technology:  {}", meta.technology);
    if let Some(created) = &meta.created {
        println!("Created:     {}", created);
    }

    match &artifact.body {
        CorrectionBody::Matrix { matrix, method } => {
            println!("Fit method:  {}", method);
            for row in matrix.row_iter() {
                println!("  {:>14.10} {:>14.10} {:>14.10}", row[0], row[1], row[2]);
            }
        }
        CorrectionBody::Spectral(samples) => {
            println!(
                "Spectral:    {} samples, {} bands, {}-{} nm",
                samples.samples.len(),
                samples.range.bands,
                samples.range.start_nm,
                samples.range.end_nm
            );
        }
    }
    if let Some(stats) = artifact.statistics {
        println!("ΔE94:        avg {:.6}  max {:.6}", stats.avg_de94, stats.max_de94);
        println!("ΔE00:        avg {:.6}  max {:.6}", stats.avg_de00, stats.max_de00);
    }
    for (label, record) in [
        ("Reference", &artifact.provenance.reference),
        ("Target", &artifact.provenance.target),
    ] {
        if let Some(record) = record {
            println!("{:<12} {} ({})", format!("{}:", label), record.filename, record.hash);
        }
    }
    Ok(())
}

fn hash(args: InspectArgs) -> Result<()> {
    let (text, _) = read_artifact(&args.path)?;
    println!("{}", ArtifactSerializer::new().query_key(&text));
    Ok(())
}

fn preview(args: PreviewArgs) -> Result<()> {
    let set = MeasurementSetLoader::new().load_path(&args.path)?;
    let previews = PhotometricNormalizer::new().preview(&set)?;
    for patch in previews {
        println!(
            "{:>5}  RGB {:>6.2} {:>6.2} {:>6.2}  Lab {:>7.2} {:>7.2} {:>7.2}  {}",
            patch.sample_id,
            patch.device[0],
            patch.device[1],
            patch.device[2],
            patch.lab.l,
            patch.lab.a,
            patch.lab.b,
            patch.hex
        );
    }
    Ok(())
}

fn import(args: ImportArgs) -> Result<()> {
    let text = std::fs::read_to_string(&args.path).with_context(|| format!("reading {}", args.path.display()))?;
    let imported = from_device_corrections(&text, &args.path.display().to_string())?;
    let output_dir = match &args.output_dir {
        Some(dir) => dir.clone(),
        None => args.path.parent().map(Path::to_path_buf).unwrap_or_default(),
    };
    std::fs::create_dir_all(&output_dir).with_context(|| format!("creating {}", output_dir.display()))?;

    let serializer = ArtifactSerializer::new();
    let mut written = 0;
    for artifact in &imported.artifacts {
        let path = output_dir.join(serializer.derive_filename(artifact));
        if path.exists() && !args.force {
            warn!(path = %path.display(), "Skipping existing correction");
            continue;
        }
        std::fs::write(&path, serializer.serialize(artifact)).with_context(|| format!("writing {}", path.display()))?;
        println!("{}", path.display());
        written += 1;
    }
    info!(written, skipped = imported.skipped, "Device corrections imported");
    Ok(())
}
