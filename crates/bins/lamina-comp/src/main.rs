use base::{cli, cli::CommonArgs};
use layer::BsdfStorage;
use recipe::Recipe;
use std::path::PathBuf;

mod recipe;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let (args, launch_time) = cli::parse_args::<CliArgs>("lamina-comp");

    cli::setup_logging(
        args.common.log_timestamp.then_some(launch_time),
        args.common.log_level,
        &[],
    );

    if let Some(threads) = args.threads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()?;
    }

    let recipe = match &args.recipe {
        Some(path) => {
            log::info!("loading recipe {}", path.display());
            Recipe::load(path)?
        },
        None => {
            log::info!("no recipe given, building coated gold");
            Recipe::coated_gold()
        },
    };
    let output = recipe.output(args.output.as_deref());

    let (quadrature, layers) = layer::build_channels(&recipe.material, &recipe.adding)?;
    BsdfStorage::from_layers(&output, &layers, recipe.storage)?;

    log::info!(
        "{} channels, {} nodes, {} Fourier orders, {} / {} samples written to {}",
        layers.len(),
        quadrature.len(),
        layers.first().map_or(0, |l| l.order_count()),
        recipe.storage.precision.sample_size() * 8,
        recipe.storage.compression,
        output.display()
    );

    Ok(())
}

#[derive(clap::Parser, Debug, Clone)]
#[clap(
    author,
    version,
    about = "Builds a layered BSDF from a TOML recipe and writes it to disk."
)]
pub struct CliArgs {
    /// Recipe to build; the built-in coated gold material is used if omitted.
    pub recipe: Option<PathBuf>,

    /// Output file, overriding the one of the recipe.
    #[clap(short, long)]
    pub output: Option<PathBuf>,

    /// Number of worker threads, all cores by default.
    #[clap(long)]
    pub threads: Option<usize>,

    #[command(flatten)]
    pub common: CommonArgs,
}
