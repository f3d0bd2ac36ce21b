use dp_mnist::{run_sweep_on_raw, synthetic_digits, ExperimentConfig, ModelKind};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut config = ExperimentConfig::default();
    config.seed = 7;
    config.data.train = 1200;
    config.data.validation = 200;
    config.data.test = 400;
    config.training.batch_size = 64;
    config.training.epochs = 5;
    config.training.learning_rate = 0.5;
    config.training.cnn_filters = 4;
    config.privacy.epsilons = vec![0.5, 2.0, 8.0];
    config.privacy.noise_multipliers = vec![0.0];
    config.validate()?;

    let (images, labels) = synthetic_digits(2500, config.seed);
    let report = run_sweep_on_raw(&config, &images, &labels)?;

    print!("{}", report.to_csv());
    for kind in [ModelKind::Logistic, ModelKind::Cnn] {
        println!("{kind}: {:?}", report.f1_vs_epsilon(kind));
    }
    report.write_json(std::env::temp_dir().join("dp_mnist_synthetic_sweep.json"))?;
    Ok(())
}
