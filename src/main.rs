use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use clap::{Parser, Subcommand};
use color_eyre::{
    Result,
    eyre::{WrapErr, eyre},
};
use gatemorph::{
    config::{Settings, load_config, validation::ConfigValidator},
    core::{
        CapabilityMatrix, Diagnostics, Mode, Outcome, ProviderId, Severity, Translator,
    },
    tracing_setup,
};

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Settings file (TOML, YAML or JSON); GATEMORPH_* variables override it
    #[clap(short, long, global = true)]
    settings: Option<PathBuf>,

    /// Log filter such as "debug" or "gatemorph=trace"
    #[clap(long, global = true)]
    log_level: Option<String>,

    /// Emit logs as JSON
    #[clap(long, global = true)]
    json_logs: bool,

    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Convert a provider's native configuration into a canonical document
    Import {
        #[clap(short, long)]
        provider: ProviderId,
        #[clap(short, long)]
        input: PathBuf,
        /// Defaults to stdout
        #[clap(short, long)]
        output: Option<PathBuf>,
    },
    /// Render a canonical document for one provider, or for all of them
    Generate {
        #[clap(short, long, required_unless_present = "all")]
        provider: Option<ProviderId>,
        /// Render every provider into --out-dir
        #[clap(long, conflicts_with = "provider", requires = "out_dir")]
        all: bool,
        #[clap(short, long)]
        input: PathBuf,
        /// Defaults to stdout
        #[clap(short, long, conflicts_with = "all")]
        output: Option<PathBuf>,
        #[clap(long)]
        out_dir: Option<PathBuf>,
    },
    /// Translate one provider's native configuration into another's
    Migrate {
        #[clap(long)]
        from: ProviderId,
        #[clap(long)]
        to: ProviderId,
        #[clap(short, long)]
        input: PathBuf,
        /// Defaults to stdout
        #[clap(short, long)]
        output: Option<PathBuf>,
    },
    /// Validate a canonical document
    Validate {
        #[clap(short, long)]
        input: PathBuf,
    },
    /// List supported providers
    Providers,
    /// Print the capability matrix
    Capabilities {
        #[clap(short, long)]
        provider: Option<ProviderId>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();
    let settings = Settings::load(args.settings.as_deref())
        .wrap_err("Failed to load settings")?;
    let level = args.log_level.as_deref().unwrap_or(&settings.log_level);
    let json = args.json_logs || settings.log_json;
    tracing_setup::init_tracing_with_config(level, json, json)
        .map_err(|e| eyre!("Failed to initialize tracing: {e}"))?;

    let code = match args.command {
        Commands::Providers => providers_command(),
        Commands::Capabilities { provider } => capabilities_command(provider),
        Commands::Validate { input } => validate_command(&input).await?,
        command => {
            let registry = settings.registry().wrap_err("Failed to build adapter registry")?;
            let translator = Translator::new(Arc::new(registry));
            translate_command(&translator, command).await?
        }
    };
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}

async fn translate_command(translator: &Translator, command: Commands) -> Result<i32> {
    match command {
        Commands::Import {
            provider,
            input,
            output,
        } => {
            let native = read_input(&input).await?;
            let outcome = translator.translate(Mode::Import, provider, &native).await?;
            finish(&outcome, output.as_deref()).await
        }
        Commands::Generate {
            provider: Some(provider),
            input,
            output,
            ..
        } => {
            let canonical = read_input(&input).await?;
            let outcome = translator
                .translate(Mode::Generate, provider, &canonical)
                .await?;
            finish(&outcome, output.as_deref()).await
        }
        Commands::Generate {
            input,
            out_dir: Some(out_dir),
            ..
        } => generate_all_command(translator, &input, &out_dir).await,
        Commands::Migrate {
            from,
            to,
            input,
            output,
        } => {
            let native = read_input(&input).await?;
            let outcome = translator.migrate(from, to, &native).await?;
            finish(&outcome, output.as_deref()).await
        }
        other => Err(eyre!("Unsupported command arguments: {other:?}")),
    }
}

async fn generate_all_command(translator: &Translator, input: &Path, out_dir: &Path) -> Result<i32> {
    let config = load_config(input).await?;
    tokio::fs::create_dir_all(out_dir)
        .await
        .wrap_err_with(|| format!("Failed to create {}", out_dir.display()))?;

    let providers = translator.registry().providers();
    let mut code = 0;
    for (provider, outcome) in translator.generate_all(Arc::new(config), &providers).await {
        match outcome {
            Ok(outcome) => {
                let path = out_dir.join(format!("{provider}.{}", provider.file_extension()));
                eprintln!("== {provider} -> {}", path.display());
                print_diagnostics(&outcome.diagnostics);
                write_output(Some(&path), &outcome.output).await?;
                code = code.max(outcome.exit_code());
            }
            Err(e) => {
                eprintln!("== {provider}: ❌ {e}");
                code = 1;
            }
        }
    }
    Ok(code)
}

async fn validate_command(input: &Path) -> Result<i32> {
    let config = load_config(input).await?;
    let diagnostics = ConfigValidator::validate(&config);
    print_diagnostics(&diagnostics);

    let routes: usize = config.services.iter().map(|s| s.routes.len()).sum();
    if diagnostics.has_errors() {
        eprintln!("❌ {} is invalid", input.display());
    } else {
        println!("✅ {} is valid", input.display());
        println!("   • Services: {}", config.services.len());
        println!("   • Routes: {routes}");
        println!("   • Proto descriptors: {}", config.proto_descriptors.len());
    }
    Ok(diagnostics.exit_code())
}

fn providers_command() -> i32 {
    for provider in ProviderId::ALL {
        println!("{:<16} .{}", provider.as_str(), provider.file_extension());
    }
    0
}

fn capabilities_command(provider: Option<ProviderId>) -> i32 {
    let providers = match provider {
        Some(provider) => vec![provider],
        None => ProviderId::ALL.to_vec(),
    };
    for provider in providers {
        println!("{provider}");
        for (feature, capability) in CapabilityMatrix::rows(provider) {
            let marker = capability.level.to_string();
            if capability.caveat.is_empty() {
                println!("  {:<36} {marker}", feature.path());
            } else {
                println!("  {:<36} {marker:<8} {}", feature.path(), capability.caveat);
            }
        }
    }
    0
}

async fn finish(outcome: &Outcome, output: Option<&Path>) -> Result<i32> {
    print_diagnostics(&outcome.diagnostics);
    write_output(output, &outcome.output).await?;
    Ok(outcome.exit_code())
}

fn print_diagnostics(diagnostics: &Diagnostics) {
    for (severity, group) in diagnostics.grouped() {
        let label = match severity {
            Severity::Error => "❌ errors",
            Severity::Warning => "⚠️  warnings",
            Severity::Info => "ℹ️  notes",
        };
        eprintln!("{label} ({}):", group.len());
        for diagnostic in group {
            eprintln!(
                "   • {} ({}): {}",
                diagnostic.scope, diagnostic.feature_path, diagnostic.message
            );
        }
    }
}

async fn read_input(path: &Path) -> Result<String> {
    tokio::fs::read_to_string(path)
        .await
        .wrap_err_with(|| format!("Failed to read {}", path.display()))
}

async fn write_output(path: Option<&Path>, text: &str) -> Result<()> {
    match path {
        Some(path) => tokio::fs::write(path, text)
            .await
            .wrap_err_with(|| format!("Failed to write {}", path.display())),
        None => {
            print!("{text}");
            Ok(())
        }
    }
}
