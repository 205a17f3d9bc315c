use std::{
    collections::BTreeMap,
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::Context as _;
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "cardpress", version)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the sheet layout chosen for a card size.
    Layout(SizeArgs),
    /// Print the output files a row set would produce.
    Plan(PlanArgs),
    /// Render a folder of card images, one file per card or packed onto A4 sheets.
    Impose(ImposeArgs),
}

#[derive(Args, Debug)]
struct SizeArgs {
    /// Card width in millimetres.
    #[arg(long)]
    width_mm: f64,

    /// Card height in millimetres.
    #[arg(long)]
    height_mm: f64,
}

#[derive(Args, Debug)]
struct NamingArgs {
    /// Model config JSON carrying `output_suffix` and `imposition_settings`.
    #[arg(long)]
    model: Option<PathBuf>,

    /// Model display name; defaults to the model file's folder name.
    #[arg(long, requires = "model")]
    model_name: Option<String>,

    /// Naming pattern with `{column}` tokens. Overrides the model.
    #[arg(long)]
    pattern: Option<String>,

    /// Card width for sheet imposition. Overrides the model.
    #[arg(long, requires = "height_mm")]
    width_mm: Option<f64>,

    /// Card height for sheet imposition. Overrides the model.
    #[arg(long, requires = "width_mm")]
    height_mm: Option<f64>,
}

#[derive(Args, Debug)]
struct PlanArgs {
    /// JSON array of objects mapping column names to values.
    #[arg(long)]
    rows: PathBuf,

    #[command(flatten)]
    naming: NamingArgs,
}

#[derive(Args, Debug)]
struct ImposeArgs {
    /// Folder of PNG/JPEG cards.
    #[arg(long)]
    cards: PathBuf,

    /// Output root; a `Lote_*` folder is created inside it unless `--flat`.
    #[arg(long)]
    out: PathBuf,

    /// Write directly into `--out`.
    #[arg(long)]
    flat: bool,

    /// Queue finished sheets for printing.
    #[arg(long)]
    print: bool,

    /// Upper bound on workers.
    #[arg(long)]
    workers: Option<usize>,

    #[command(flatten)]
    naming: NamingArgs,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.cmd {
        Command::Layout(args) => cmd_layout(args),
        Command::Plan(args) => cmd_plan(args),
        Command::Impose(args) => cmd_impose(args),
    }
}

/// Naming pattern and imposition settings from the model file, then CLI overrides.
fn resolve_naming(
    args: &NamingArgs,
    default_pattern: &str,
) -> anyhow::Result<(String, cardpress::ImpositionSettings)> {
    let (mut pattern, mut imposition) = match &args.model {
        Some(path) => {
            let cfg = cardpress::ModelConfig::load(path)?;
            let name = args.model_name.clone().unwrap_or_else(|| model_name_from(path));
            let slug = cardpress::slugify_model_name(&name);
            (cfg.naming_pattern(&slug), cfg.imposition())
        }
        None => (
            default_pattern.to_string(),
            cardpress::ImpositionSettings::disabled(),
        ),
    };

    if let Some(p) = &args.pattern {
        pattern = p.clone();
    }
    if let (Some(w), Some(h)) = (args.width_mm, args.height_mm) {
        imposition = cardpress::ImpositionSettings::sheets(w, h)
            .with_print_after_generation(imposition.print_after_generation);
    }
    Ok((pattern, imposition))
}

fn model_name_from(path: &Path) -> String {
    path.parent()
        .and_then(|p| p.file_name())
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_string()
}

fn read_rows_json(path: &Path) -> anyhow::Result<Vec<cardpress::Row>> {
    let f = File::open(path).with_context(|| format!("open rows '{}'", path.display()))?;
    let r = BufReader::new(f);
    let rows: Vec<BTreeMap<String, String>> =
        serde_json::from_reader(r).with_context(|| "parse rows JSON")?;
    Ok(rows.into_iter().map(cardpress::Row::from_plain).collect())
}

fn cmd_layout(args: SizeArgs) -> anyhow::Result<()> {
    let layout = cardpress::SheetLayout::compute(
        args.width_mm,
        args.height_mm,
        &cardpress::SheetSpec::A4,
    )?;
    let json = serde_json::to_string_pretty(&layout).with_context(|| "encode layout")?;
    println!("{json}");
    Ok(())
}

fn cmd_plan(args: PlanArgs) -> anyhow::Result<()> {
    let rows = read_rows_json(&args.rows)?;
    let (pattern, imposition) = resolve_naming(&args.naming, "{nome}")?;

    let plan = cardpress::plan(rows, &pattern, &imposition)?;
    match &plan {
        cardpress::RunPlan::Direct { jobs } => {
            for job in jobs {
                println!("{}", job.output_filename);
            }
        }
        cardpress::RunPlan::Imposition { layout, pages } => {
            eprintln!(
                "{} sheets, {} per sheet ({})",
                pages.len(),
                layout.capacity,
                layout.orientation
            );
            for page in pages {
                println!("{}", page.output_filename);
                for card in &page.cards {
                    println!("  {}", card.output_filename);
                }
            }
        }
    }
    Ok(())
}

fn cmd_impose(args: ImposeArgs) -> anyhow::Result<()> {
    let rows = cardpress::rows_from_dir(&args.cards)
        .with_context(|| format!("list cards in '{}'", args.cards.display()))?;
    let (pattern, imposition) = resolve_naming(&args.naming, "{nome}")?;
    let imposition = if args.print {
        imposition.with_print_after_generation(true)
    } else {
        imposition
    };

    let out_dir = if args.flat {
        args.out.clone()
    } else {
        args.out
            .join(cardpress::batch_dir_name(chrono::Local::now().naive_local()))
    };

    let mut opts = cardpress::RenderManagerOpts::default();
    if let Some(n) = args.workers {
        opts.max_workers = Some(n);
        opts.imposition_max_workers = opts.imposition_max_workers.min(n.max(1));
    }

    let renderer = Arc::new(cardpress::ImageFileRenderer::new(&args.cards));
    let mut manager = cardpress::RenderManager::new(renderer, rows, &out_dir, pattern, imposition)
        .with_opts(opts);
    manager.start()?;
    let summary = manager.wait()?;

    if let Some(queue) = &summary.print_queue {
        for path in queue {
            println!("print {}", path.display());
        }
    }
    eprintln!(
        "wrote {} files ({}/{} cards) to {}",
        summary.files.len(),
        summary.cards_done,
        summary.total_cards,
        out_dir.display()
    );
    if !summary.errors.is_empty() {
        anyhow::bail!("{} errors during the run", summary.errors.len());
    }
    Ok(())
}
