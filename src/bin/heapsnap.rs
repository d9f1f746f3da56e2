use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use heapdb::catalog::Catalog;
use heapdb::config::{self, SessionConfig};
use heapdb::graph::{FailurePolicy, HeapGraphBuilder, RootProvider};
use heapdb::heap::ObjectModel;
use heapdb::layout::LayoutResolver;
use heapdb::load::CoreImage;
use heapdb::logging::{self, LogFormat};
use heapdb::DebugInfoImage;

/// Reads object layouts out of debug info and turns core dumps into heap
/// snapshots.
#[derive(Debug, Parser)]
struct HeapSnap {
    /// JSON session configuration. Flags given here override it.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Log output format, pretty or json.
    #[arg(long, global = true, default_value = "pretty")]
    log_format: LogFormat,
    /// Namespace the catalogue's native types live in.
    #[arg(long, global = true)]
    namespace: Option<String>,
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Debug, Subcommand)]
enum Cmd {
    /// Print the constants defined on a type.
    Consts {
        image: PathBuf,
        type_name: String,
        /// Include constants from followed base classes.
        #[arg(long)]
        inherited: bool,
    },
    /// Print the enumerators of an enumeration type.
    Enum { image: PathBuf, type_name: String },
    /// Print the compiled layout of a catalogue kind.
    Layout { image: PathBuf, kind: String },
    /// Walk a core dump from its roots and write a heap snapshot.
    Snapshot {
        image: PathBuf,
        core: PathBuf,
        /// JSON list of root slot ranges.
        #[arg(long)]
        roots: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        /// Stop at the first undecodable object instead of skipping it.
        #[arg(long)]
        abort: bool,
    },
}

fn main() -> Result<()> {
    let args = HeapSnap::parse();
    logging::init(args.log_format, "info")?;

    let mut config = match &args.config {
        Some(path) => SessionConfig::load(path)?,
        None => SessionConfig::default(),
    };
    if let Some(ns) = &args.namespace {
        config.namespace = ns.clone();
    }

    match args.cmd {
        Cmd::Consts {
            image,
            type_name,
            inherited,
        } => cmd_consts(&open_image(&image, &config)?, &config, &type_name, inherited),
        Cmd::Enum { image, type_name } => {
            cmd_enum(&open_image(&image, &config)?, &config, &type_name)
        }
        Cmd::Layout { image, kind } => cmd_layout(&open_image(&image, &config)?, &config, &kind),
        Cmd::Snapshot {
            image,
            core,
            roots,
            output,
            abort,
        } => {
            if abort {
                config.failure_policy = FailurePolicy::Abort;
            }
            cmd_snapshot(&open_image(&image, &config)?, &config, &core, &roots, &output)
        }
    }
}

fn open_image(path: &Path, config: &SessionConfig) -> Result<DebugInfoImage> {
    let mut image = DebugInfoImage::open(path)
        .with_context(|| format!("loading debug info from {}", path.display()))?;
    image.set_base_allow_list(config.base_allow_patterns()?);
    Ok(image)
}

fn cmd_consts(
    image: &DebugInfoImage,
    config: &SessionConfig,
    type_name: &str,
    inherited: bool,
) -> Result<()> {
    let name = resolve_name(image, &config.namespace, type_name);
    let consts = image.read_all_consts(&name, inherited)?;
    let bold = ansi_term::Style::new().bold();
    println!("{}", bold.paint(&name));
    if consts.is_empty() {
        println!("  (no constants)");
    }
    for (n, v) in &consts {
        println!("  {:32} {:>12} {:#x}", n, v, v);
    }
    Ok(())
}

fn cmd_enum(image: &DebugInfoImage, config: &SessionConfig, type_name: &str) -> Result<()> {
    let name = resolve_name(image, &config.namespace, type_name);
    let members = image.enum_members(&name)?;
    let bold = ansi_term::Style::new().bold();
    println!("{} ({} enumerators)", bold.paint(&name), members.len());
    for (n, v) in &members {
        println!("  {:40} {}", n, v);
    }
    Ok(())
}

fn cmd_layout(image: &DebugInfoImage, config: &SessionConfig, kind: &str) -> Result<()> {
    let catalog = config.catalog();
    let entry = catalog
        .kinds
        .iter()
        .find(|e| e.kind.name().eq_ignore_ascii_case(kind))
        .ok_or_else(|| {
            anyhow!(
                "no kind {:?} in the catalogue; try one of: {}",
                kind,
                kind_names(&catalog)
            )
        })?;
    let resolver = LayoutResolver::new(image, config.missing_debug_info);
    let layout = resolver.compile(&entry.type_name, &entry.fields)?;
    print!("{}", layout.describe());
    Ok(())
}

fn cmd_snapshot(
    image: &DebugInfoImage,
    config: &SessionConfig,
    core: &Path,
    roots: &Path,
    output: &Path,
) -> Result<()> {
    let memory = CoreImage::open(core)
        .with_context(|| format!("loading core file {}", core.display()))?;
    if memory.word_size() != image.pointer_size() {
        bail!(
            "core file has {}-byte words but debug info says {}",
            memory.word_size(),
            image.pointer_size()
        );
    }
    let roots = config::load_roots(roots)?;
    let providers: Vec<&dyn RootProvider> = roots.iter().map(|r| r as &dyn RootProvider).collect();

    let model = ObjectModel::new(image, &memory, &config.catalog(), config)?;
    let graph = HeapGraphBuilder::new(&model, config.failure_policy, config.max_name_length)
        .build_from_roots(&providers)?;

    let file = std::fs::File::create(output)
        .with_context(|| format!("creating {}", output.display()))?;
    heapdb::snapshot::write_to(&graph, file)?;

    let summary = graph.summary();
    if graph.skipped_total() > 0 {
        println!("{}", ansi_term::Colour::Yellow.paint(summary));
    } else {
        println!("{}", ansi_term::Colour::Green.paint(summary));
    }
    println!("wrote {}", output.display());
    Ok(())
}

/// Uses `name` as given if the image knows it, else tries it inside the
/// configured namespace.
fn resolve_name(image: &DebugInfoImage, namespace: &str, name: &str) -> String {
    if image.find_type(name).is_ok() || name.contains("::") {
        return name.to_string();
    }
    let q = format!("{}::{}", namespace, name);
    if image.find_type(&q).is_ok() {
        q
    } else {
        name.to_string()
    }
}

fn kind_names(catalog: &Catalog) -> String {
    catalog
        .kinds
        .iter()
        .map(|e| e.kind.name())
        .collect::<Vec<_>>()
        .join(", ")
}
