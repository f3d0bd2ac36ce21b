use dp_mnist::{calibrate_noise_multiplier, calibrate_num_updates, DpParams};

fn main() {
    let num_samples = 8000;
    let batch_size = 128;
    let epochs = 20;
    let delta = 1e-5;

    let base = DpParams::new(1.0, num_samples, batch_size, delta).expect("params");
    let q = base.sampling_rate();
    let updates = base.num_updates(epochs);
    println!("q = {q:.4}, {updates} updates over {epochs} epochs");

    for target in [0.5, 1.0, 2.0, 4.0, 8.0] {
        let sigma = calibrate_noise_multiplier(target, q, updates, delta, 1e-4).expect("sigma");
        let spent = DpParams::new(sigma, num_samples, batch_size, delta)
            .and_then(|p| p.epsilon(epochs))
            .expect("epsilon");
        println!("target {target:>4}: sigma = {sigma:.4}, epsilon = {spent:.4}");
    }

    let max_updates = calibrate_num_updates(2.0, 1.1, q, delta, 100).expect("updates");
    println!("sigma 1.1 stays within epsilon 2 for {max_updates} updates");
}
