//! Usage: `mnist_sweep <images.idx> <labels.idx> [config.toml] [out_prefix]`

use dp_mnist::{load_idx_pair, run_sweep_on_raw, ExperimentConfig};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let (images_path, labels_path) = match (args.first(), args.get(1)) {
        (Some(i), Some(l)) => (i, l),
        _ => {
            eprintln!("usage: mnist_sweep <images.idx> <labels.idx> [config.toml] [out_prefix]");
            std::process::exit(2);
        }
    };
    let config = match args.get(2) {
        Some(path) => ExperimentConfig::from_path(path)?,
        None => ExperimentConfig::default(),
    };
    let prefix = args.get(3).map(String::as_str).unwrap_or("dp_mnist_sweep");

    let (images, labels) = load_idx_pair(images_path, labels_path)?;
    let report = run_sweep_on_raw(&config, &images, &labels)?;
    report.write_csv(format!("{prefix}.csv"))?;
    report.write_json(format!("{prefix}.json"))?;
    print!("{}", report.to_csv());
    Ok(())
}
